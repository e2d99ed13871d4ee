pub mod config;
pub mod frame;
pub mod mask;
pub mod orchestrator;
pub mod pipeline;
pub mod providers;
pub mod storage;
pub mod templates;
mod util;
pub mod variants;

pub use config::EngineConfig;
pub use mask::{build_edit_mask, EditMask};
pub use orchestrator::{Orchestrator, ProviderOutcome};
pub use pipeline::{compose_prompt, PosterEngine, PosterRequest};
pub use templates::{TemplateCache, TemplateResources};
