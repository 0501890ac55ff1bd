//! SQLite persistence adapters and the buffered sample sink for Surge.

mod run_store;
mod sample_store;
mod sink;
mod util;

pub use run_store::SqliteRunStore;
pub use sample_store::SqliteSampleStore;
pub use sink::SampleSink;
pub use util::{create_sqlite_pool, run_migrations};

/// Embedded SQL migrations for the run database.
pub const MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
