mod handle;

pub use handle::ImportProgressHandle;
