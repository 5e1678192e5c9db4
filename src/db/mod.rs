// Re-export the Database struct and other public items
pub mod collection_log;
pub mod core;
pub mod feedback;
pub mod paper;
pub mod report;
mod schema;
pub mod source;

// Re-export Database and essential traits
pub use self::core::Database;
pub use self::core::DbLockErrorExt;
pub use self::paper::{PaperFilter, PaperStats, MAX_PREFILTER_IDS};
