use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};

pub type EventPayload = Map<String, Value>;

/// Poster run milestones (`template_loaded`, `mask_built`, `poster_generated`,
/// ...) written as one JSON object per line.
///
/// Every event carries `type`, `run_id` and `ts`; payload keys are applied on
/// top. Clones share one file handle, so concurrent renders append whole
/// lines. Without a path, events only reach `tracing`.
#[derive(Debug, Clone)]
pub struct EventSink {
    run_id: Arc<str>,
    path: Option<Arc<PathBuf>>,
    file: Arc<Mutex<Option<File>>>,
}

impl EventSink {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            run_id: Arc::from(run_id.into()),
            path: Some(Arc::new(path.into())),
            file: Arc::new(Mutex::new(None)),
        }
    }

    pub fn disabled(run_id: impl Into<String>) -> Self {
        Self {
            run_id: Arc::from(run_id.into()),
            path: None,
            file: Arc::new(Mutex::new(None)),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref().map(PathBuf::as_path)
    }

    pub fn emit(&self, event_type: &str, payload: EventPayload) -> anyhow::Result<Value> {
        let event = envelope(event_type, &self.run_id, payload);
        let line = serde_json::to_string(&event)?;
        tracing::debug!(target: "billboard::events", event = event_type, "{line}");

        if let Some(path) = self.path.as_deref() {
            let mut slot = self
                .file
                .lock()
                .map_err(|_| anyhow::anyhow!("event sink lock poisoned"))?;
            if slot.is_none() {
                *slot = Some(open_log(path)?);
            }
            if let Some(file) = slot.as_mut() {
                writeln!(file, "{line}")?;
            }
        }
        Ok(Value::Object(event))
    }

    /// Logs instead of failing: a lost event never aborts a render.
    pub fn note(&self, event_type: &str, payload: EventPayload) {
        if let Err(err) = self.emit(event_type, payload) {
            tracing::warn!(event = event_type, error = %err, "failed to append run event");
        }
    }
}

fn envelope(event_type: &str, run_id: &str, payload: EventPayload) -> EventPayload {
    let mut event = EventPayload::new();
    event.insert("type".to_string(), Value::from(event_type));
    event.insert("run_id".to_string(), Value::from(run_id));
    event.insert(
        "ts".to_string(),
        Value::from(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)),
    );
    event.extend(payload);
    event
}

fn open_log(path: &Path) -> anyhow::Result<File> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}
