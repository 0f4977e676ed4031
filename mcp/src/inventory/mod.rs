//! Tool index: records, snapshots and their persistence.
//!
//! A snapshot is the only thing search and validation ever read. Building one
//! is the only operation here that opens sessions.

pub mod index;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod types;

pub use index::{BuildReport, ToolIndex};
pub use schema::validate_arguments;
pub use snapshot::{IndexSnapshot, ServerIndexEntry};
pub use store::{FileIndexStore, IndexStore, MemoryIndexStore, METADATA_FILE, TOOL_INDEX_FILE};
pub use types::{ToolKey, ToolRecord};
