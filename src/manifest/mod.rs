pub mod edit;
pub mod meta;

pub use edit::{VersionEdit, UNOWNED_LEVEL};
pub use meta::{BoundBuilder, DependenceMap, FileMetaData, FilePurpose};
