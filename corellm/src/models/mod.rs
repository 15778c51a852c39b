mod cache;
mod catalog;
pub mod events;

pub use cache::{SessionCache, SessionFuture};
pub use catalog::{CatalogListing, ModelCatalog, ModelCatalogEntry, DEFAULT_MODEL};
pub use events::ModelLoadingStateChanged;
