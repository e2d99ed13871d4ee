mod resolver;
mod store;

pub use resolver::resolve_variants;
pub use store::{
    normalize_content_type, TemplatePosterStore, METADATA_FILE, SUPPORTED_CONTENT_TYPES,
};
