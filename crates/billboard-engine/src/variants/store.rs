use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard};

use billboard_contracts::records::{RecordLocation, TemplatePosterRecord, VariantSlot};
use billboard_contracts::{PosterError, PosterResult};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::storage::ObjectStore;
use crate::util::extension_for_mime;

pub const METADATA_FILE: &str = "template_posters.json";
pub const SUPPORTED_CONTENT_TYPES: [&str; 3] = ["image/png", "image/jpeg", "image/webp"];

type SlotIndex = BTreeMap<VariantSlot, TemplatePosterRecord>;

#[derive(Debug, Default, Serialize, Deserialize)]
struct MetadataFile {
    #[serde(default)]
    records: Vec<TemplatePosterRecord>,
}

/// Durable per-slot template overrides.
///
/// The in-memory index is authoritative once opened. Uploads to one slot are
/// serialized by that slot's mutex; metadata and image files are written to a
/// temp file and renamed into place.
pub struct TemplatePosterStore {
    dir: PathBuf,
    index: RwLock<SlotIndex>,
    slot_locks: [Mutex<()>; 2],
    mirror: Option<Arc<dyn ObjectStore>>,
}

impl TemplatePosterStore {
    pub fn open(
        dir: impl Into<PathBuf>,
        mirror: Option<Arc<dyn ObjectStore>>,
    ) -> PosterResult<Self> {
        let dir = dir.into();
        let metadata_path = dir.join(METADATA_FILE);
        let mut index = BTreeMap::new();
        if metadata_path.exists() {
            let raw = fs::read_to_string(&metadata_path).map_err(|err| {
                PosterError::storage(format!("failed reading {}: {err}", metadata_path.display()))
            })?;
            let parsed: MetadataFile = serde_json::from_str(&raw).map_err(|err| {
                PosterError::storage(format!("invalid {}: {err}", metadata_path.display()))
            })?;
            for record in parsed.records {
                index.insert(record.slot, record);
            }
        }
        Ok(Self {
            dir,
            index: RwLock::new(index),
            slot_locks: [Mutex::new(()), Mutex::new(())],
            mirror,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get(&self, slot: VariantSlot) -> PosterResult<Option<TemplatePosterRecord>> {
        Ok(self.read_index()?.get(&slot).cloned())
    }

    /// Stored records in slot order.
    pub fn list(&self) -> PosterResult<Vec<TemplatePosterRecord>> {
        Ok(self.read_index()?.values().cloned().collect())
    }

    pub fn read_bytes(&self, record: &TemplatePosterRecord) -> PosterResult<Vec<u8>> {
        let path = self.dir.join(record.location.local_file());
        fs::read(&path).map_err(|err| {
            PosterError::storage(format!(
                "{} asset {} unreadable: {err}",
                record.slot,
                path.display()
            ))
        })
    }

    pub fn upload(
        &self,
        slot: VariantSlot,
        filename: &str,
        content_type: &str,
        bytes: &[u8],
    ) -> PosterResult<TemplatePosterRecord> {
        let content_type = normalize_content_type(content_type)?;
        let decoded = image::load_from_memory(bytes).map_err(|err| {
            PosterError::storage(format!("{slot} upload is not a decodable image: {err}"))
        })?;

        let _guard = self.slot_locks[slot.index()]
            .lock()
            .map_err(|_| PosterError::storage(format!("{slot} lock poisoned")))?;
        fs::create_dir_all(&self.dir).map_err(|err| {
            PosterError::storage(format!("failed creating {}: {err}", self.dir.display()))
        })?;

        let previous = self.get(slot)?;
        let extension = extension_for_mime(&content_type);
        let upload_id = uuid::Uuid::new_v4().simple().to_string();
        let file = format!("{}_{}.{extension}", slot.key(), &upload_id[..12]);
        write_atomic(&self.dir.join(&file), bytes)?;

        let location = match self.mirror.as_deref() {
            Some(store) => {
                let key = format!("template-posters/{}/{upload_id}.{extension}", slot.key());
                match store.put_bytes(&key, bytes, &content_type) {
                    Ok(url) => RecordLocation::Storage {
                        file: file.clone(),
                        url: url.or_else(|| store.public_url_for(&key)),
                        key,
                    },
                    Err(err) => {
                        warn!(
                            slot = slot.key(),
                            error = %err,
                            "variant mirror upload failed, keeping local copy only"
                        );
                        RecordLocation::Local { file: file.clone() }
                    }
                }
            }
            None => RecordLocation::Local { file: file.clone() },
        };

        let record = TemplatePosterRecord {
            slot,
            filename: sanitize_filename(filename),
            content_type,
            width: decoded.width(),
            height: decoded.height(),
            location,
            updated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        };
        if let Err(err) = self.commit(|index| {
            index.insert(slot, record.clone());
        }) {
            self.remove_file(&file);
            return Err(err);
        }

        if let Some(previous) = previous {
            self.remove_file(previous.location.local_file());
        }
        info!(
            slot = slot.key(),
            width = record.width,
            height = record.height,
            "stored template poster variant"
        );
        Ok(record)
    }

    pub fn remove(&self, slot: VariantSlot) -> PosterResult<Option<TemplatePosterRecord>> {
        let _guard = self.slot_locks[slot.index()]
            .lock()
            .map_err(|_| PosterError::storage(format!("{slot} lock poisoned")))?;
        let Some(previous) = self.get(slot)? else {
            return Ok(None);
        };
        self.commit(|index| {
            index.remove(&slot);
        })?;
        self.remove_file(previous.location.local_file());
        Ok(Some(previous))
    }

    fn read_index(&self) -> PosterResult<RwLockReadGuard<'_, SlotIndex>> {
        self.index
            .read()
            .map_err(|_| PosterError::storage("variant index lock poisoned"))
    }

    /// Applies `change` to a copy of the index, persists it, then swaps it in.
    fn commit(
        &self,
        change: impl FnOnce(&mut SlotIndex),
    ) -> PosterResult<()> {
        let mut index = self
            .index
            .write()
            .map_err(|_| PosterError::storage("variant index lock poisoned"))?;
        let mut next = index.clone();
        change(&mut next);
        let metadata = MetadataFile {
            records: next.values().cloned().collect(),
        };
        let encoded = serde_json::to_vec_pretty(&metadata)
            .map_err(|err| PosterError::storage(format!("metadata encode failed: {err}")))?;
        write_atomic(&self.dir.join(METADATA_FILE), &encoded)?;
        *index = next;
        Ok(())
    }

    fn remove_file(&self, file: &str) {
        let path = self.dir.join(file);
        if let Err(err) = fs::remove_file(&path) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed removing variant asset"
                );
            }
        }
    }
}

pub fn normalize_content_type(raw: &str) -> PosterResult<String> {
    let base = raw
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let canonical = match base.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        _ => base,
    };
    if SUPPORTED_CONTENT_TYPES.contains(&canonical.as_str()) {
        Ok(canonical)
    } else {
        Err(PosterError::UnsupportedContentType {
            content_type: raw.trim().to_string(),
        })
    }
}

fn sanitize_filename(raw: &str) -> String {
    let name = Path::new(raw.trim())
        .file_name()
        .and_then(|value| value.to_str())
        .unwrap_or_default();
    if name.is_empty() {
        "upload".to_string()
    } else {
        name.to_string()
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> PosterResult<()> {
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4().simple()));
    fs::write(&tmp, bytes)
        .and_then(|_| fs::rename(&tmp, path))
        .map_err(|err| {
            let _ = fs::remove_file(&tmp);
            PosterError::storage(format!("failed writing {}: {err}", path.display()))
        })
}
