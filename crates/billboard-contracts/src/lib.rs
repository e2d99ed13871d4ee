pub mod content;
pub mod error;
pub mod events;
pub mod layout;
pub mod prompts;
pub mod providers;
pub mod records;

pub use error::{PosterError, PosterResult, ProviderError};
