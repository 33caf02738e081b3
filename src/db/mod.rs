// Re-export the Database struct and other public items
pub mod alert;
pub mod core;
pub mod record;
pub mod run;
mod schema;

// Re-export Database and essential traits
pub use self::core::{Database, PoolStats};
pub use sqlx::Row;
