mod manager;
mod types;
pub mod validation;

pub use manager::{CollectionError, CollectionManager};
pub use types::{CollectionDraft, CollectionPatch};
