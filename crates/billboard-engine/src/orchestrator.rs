use billboard_contracts::providers::RenderMode;
use billboard_contracts::{PosterError, PosterResult, ProviderError};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::providers::{
    build_backends, GenerationRequest, ImageBackend, ImageBytes, Operation, PlaceholderBackend,
};
use crate::util::error_chain_text;

const MAX_ERROR_CHARS: usize = 600;

#[derive(Debug, Clone)]
pub struct ProviderOutcome {
    pub provider: String,
    pub operation: Operation,
    pub image: ImageBytes,
    /// Attempts that failed before the winning call, in order.
    pub failures: Vec<ProviderError>,
    pub used_placeholder: bool,
}

/// Tries backends one at a time in priority order and stops at the first
/// success. Calls are never issued in parallel.
pub struct Orchestrator {
    backends: Vec<Box<dyn ImageBackend>>,
    fallback: Option<Box<dyn ImageBackend>>,
}

impl Orchestrator {
    pub fn new(backends: Vec<Box<dyn ImageBackend>>, allow_placeholder: bool) -> Self {
        let fallback: Option<Box<dyn ImageBackend>> = if allow_placeholder {
            Some(Box::new(PlaceholderBackend))
        } else {
            None
        };
        Self { backends, fallback }
    }

    pub fn from_config(config: &EngineConfig) -> anyhow::Result<Self> {
        Ok(Self::new(build_backends(config)?, config.allow_placeholder))
    }

    pub fn has_configured_backend(&self) -> bool {
        self.backends.iter().any(|backend| backend.is_configured())
    }

    pub fn run(
        &self,
        mode: RenderMode,
        request: &GenerationRequest,
    ) -> PosterResult<ProviderOutcome> {
        let operations: &[Operation] = match mode {
            RenderMode::Locked => &[Operation::Edit],
            RenderMode::Hybrid => &[Operation::Edit, Operation::Generate],
            RenderMode::Free => &[Operation::Generate],
        };
        if operations.contains(&Operation::Edit) && !request.has_edit_inputs() {
            if mode == RenderMode::Locked {
                return Err(PosterError::EditInputsMissing {
                    mode: mode.as_str().to_string(),
                });
            }
            debug!(mode = mode.as_str(), "no edit inputs, skipping edit pass");
        }

        if !self.has_configured_backend() {
            return self.run_fallback(mode, request);
        }

        let mut failures: Vec<ProviderError> = Vec::new();
        for &operation in operations {
            if operation == Operation::Edit && !request.has_edit_inputs() {
                continue;
            }
            for backend in self.backends.iter().filter(|backend| backend.is_configured()) {
                match invoke(backend.as_ref(), operation, request) {
                    Ok(image) => {
                        info!(
                            provider = backend.name(),
                            operation = operation.as_str(),
                            failed_attempts = failures.len(),
                            "provider call succeeded"
                        );
                        return Ok(ProviderOutcome {
                            provider: backend.name().to_string(),
                            operation,
                            image,
                            failures,
                            used_placeholder: false,
                        });
                    }
                    Err(err) => {
                        let failure = ProviderError::new(
                            backend.name(),
                            operation.as_str(),
                            error_chain_text(&err, MAX_ERROR_CHARS),
                        );
                        warn!(
                            provider = backend.name(),
                            operation = operation.as_str(),
                            error = %failure.message,
                            "provider call failed"
                        );
                        failures.push(failure);
                    }
                }
            }
        }
        Err(PosterError::AllProvidersExhausted { attempts: failures })
    }

    fn run_fallback(
        &self,
        mode: RenderMode,
        request: &GenerationRequest,
    ) -> PosterResult<ProviderOutcome> {
        let Some(fallback) = self.fallback.as_deref() else {
            return Err(PosterError::AllProvidersExhausted {
                attempts: Vec::new(),
            });
        };
        let operation = if mode != RenderMode::Free && request.has_edit_inputs() {
            Operation::Edit
        } else {
            Operation::Generate
        };
        info!(
            mode = mode.as_str(),
            operation = operation.as_str(),
            "no provider configured, using placeholder renderer"
        );
        let image = invoke(fallback, operation, request).map_err(|err| {
            PosterError::Provider(ProviderError::new(
                fallback.name(),
                operation.as_str(),
                error_chain_text(&err, MAX_ERROR_CHARS),
            ))
        })?;
        Ok(ProviderOutcome {
            provider: fallback.name().to_string(),
            operation,
            image,
            failures: Vec::new(),
            used_placeholder: true,
        })
    }
}

fn invoke(
    backend: &dyn ImageBackend,
    operation: Operation,
    request: &GenerationRequest,
) -> anyhow::Result<ImageBytes> {
    match operation {
        Operation::Edit => backend.edit(request),
        Operation::Generate => backend.generate(request),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use anyhow::bail;
    use billboard_contracts::providers::RenderMode;
    use billboard_contracts::PosterError;
    use image::{Rgba, RgbaImage};

    use super::Orchestrator;
    use crate::mask::EditMask;
    use crate::providers::{GenerationRequest, ImageBackend, ImageBytes, Operation};

    struct FakeBackend {
        name: &'static str,
        configured: bool,
        edit_ok: bool,
        generate_ok: bool,
        calls: Arc<AtomicUsize>,
    }

    impl FakeBackend {
        fn boxed(
            name: &'static str,
            configured: bool,
            edit_ok: bool,
            generate_ok: bool,
        ) -> (Box<dyn ImageBackend>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            let backend = Self {
                name,
                configured,
                edit_ok,
                generate_ok,
                calls: calls.clone(),
            };
            (Box::new(backend), calls)
        }

        fn answer(&self, ok: bool, operation: &str) -> anyhow::Result<ImageBytes> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if ok {
                Ok(ImageBytes::png(format!("{}:{operation}", self.name).into_bytes()))
            } else {
                bail!("{} {operation} refused", self.name)
            }
        }
    }

    impl ImageBackend for FakeBackend {
        fn name(&self) -> &str {
            self.name
        }

        fn is_configured(&self) -> bool {
            self.configured
        }

        fn generate(&self, _request: &GenerationRequest) -> anyhow::Result<ImageBytes> {
            self.answer(self.generate_ok, "generate")
        }

        fn edit(&self, _request: &GenerationRequest) -> anyhow::Result<ImageBytes> {
            self.answer(self.edit_ok, "edit")
        }
    }

    fn edit_request() -> GenerationRequest {
        let mut request = GenerationRequest::text_to_image("poster", 4, 4);
        request.base_image = Some(RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255])));
        request.mask = Some(EditMask::all_protected(4, 4));
        request
    }

    #[test]
    fn first_success_wins_and_later_backends_are_not_called() -> anyhow::Result<()> {
        let (a, a_calls) = FakeBackend::boxed("a", true, false, false);
        let (b, b_calls) = FakeBackend::boxed("b", true, true, true);
        let (c, c_calls) = FakeBackend::boxed("c", true, true, true);
        let orchestrator = Orchestrator::new(vec![a, b, c], true);

        let outcome = orchestrator.run(RenderMode::Locked, &edit_request())?;
        assert_eq!(outcome.provider, "b");
        assert_eq!(outcome.operation, Operation::Edit);
        assert_eq!(outcome.image.bytes, b"b:edit".to_vec());
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].provider, "a");
        assert!(!outcome.used_placeholder);
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
        assert_eq!(c_calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn exhaustion_names_every_configured_attempt() {
        let (a, _) = FakeBackend::boxed("a", true, false, false);
        let (b, b_calls) = FakeBackend::boxed("b", false, true, true);
        let (c, _) = FakeBackend::boxed("c", true, false, false);
        let orchestrator = Orchestrator::new(vec![a, b, c], true);

        match orchestrator.run(RenderMode::Locked, &edit_request()) {
            Err(PosterError::AllProvidersExhausted { attempts }) => {
                let names: Vec<&str> = attempts.iter().map(|item| item.provider.as_str()).collect();
                assert_eq!(names, vec!["a", "c"]);
                assert!(attempts[0].message.contains("a edit refused"));
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
        assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn hybrid_falls_back_to_generation() -> anyhow::Result<()> {
        let (a, _) = FakeBackend::boxed("a", true, false, true);
        let orchestrator = Orchestrator::new(vec![a], false);

        let outcome = orchestrator.run(RenderMode::Hybrid, &edit_request())?;
        assert_eq!(outcome.operation, Operation::Generate);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].operation, "edit");
        Ok(())
    }

    #[test]
    fn free_mode_never_edits() -> anyhow::Result<()> {
        let (a, _) = FakeBackend::boxed("a", true, true, true);
        let orchestrator = Orchestrator::new(vec![a], false);
        let outcome = orchestrator.run(RenderMode::Free, &edit_request())?;
        assert_eq!(outcome.operation, Operation::Generate);
        Ok(())
    }

    #[test]
    fn locked_mode_rejects_missing_edit_inputs() {
        let (a, calls) = FakeBackend::boxed("a", true, true, true);
        let orchestrator = Orchestrator::new(vec![a], true);
        let request = GenerationRequest::text_to_image("poster", 4, 4);
        let err = orchestrator.run(RenderMode::Locked, &request).err();
        assert!(matches!(
            err,
            Some(PosterError::EditInputsMissing { ref mode }) if mode == "locked"
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unconfigured_backends_fall_back_to_placeholder() -> anyhow::Result<()> {
        let (a, calls) = FakeBackend::boxed("a", false, true, true);
        let orchestrator = Orchestrator::new(vec![a], true);

        let request = GenerationRequest::text_to_image("x", 12, 9);
        let outcome = orchestrator.run(RenderMode::Free, &request)?;
        assert!(outcome.used_placeholder);
        assert_eq!(outcome.provider, "placeholder");
        let decoded = outcome.image.decode()?;
        assert_eq!((decoded.width(), decoded.height()), (12, 9));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[test]
    fn no_backend_and_no_placeholder_is_an_error() {
        let orchestrator = Orchestrator::new(Vec::new(), false);
        let err = orchestrator
            .run(RenderMode::Free, &GenerationRequest::text_to_image("x", 4, 4))
            .err();
        assert!(matches!(
            err,
            Some(PosterError::AllProvidersExhausted { ref attempts }) if attempts.is_empty()
        ));
    }
}
