pub mod catalog;
pub mod index;

pub use catalog::{Catalog, CatalogKind, SOLUTIONS_DIR, SOLUTION_ARCHIVE_NAME};
pub use index::{CatalogIndex, INDEX_FILE_NAME};
