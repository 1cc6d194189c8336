// # Import Module
//
// Connector-driven population of collections:
//
// - **ImportOrchestrator**: list -> register -> fetch -> stage -> submit, with
//   rollback when listing fails
// - **ConversionPipeline**: external extraction collaborator, fed one staged file at a time
// - **ImportProgressHandle**: per-collection progress subscriptions
//
// Public API:
// - `ImportHandle`: launch imports in the background, wait for them, subscribe to progress
// - `ImportProgress`: Real-time progress updates

mod conversion;
mod handle;
mod progress;
mod service;
mod types;

pub use conversion::{
    ConversionCompletion, ConversionError, ConversionOutcome, ConversionPipeline,
    ConversionRequest, PassthroughPipeline,
};
pub use handle::ImportHandle;
pub use service::ImportOrchestrator;
pub use types::{FileImportError, ImportProgress, ImportSummary};
