pub mod collection;

pub use collection::{
    CatalogRecord, CollectionIndex, InternalState, SolutionRecord, CATALOG_SYNC_ATTRS,
};
