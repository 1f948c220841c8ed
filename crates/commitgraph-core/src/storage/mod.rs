//! Storage abstraction layer.
//!
//! Graph facts and run records sit behind traits so the ingestion pipeline
//! never names a backend. SQLite is the only one shipped.

mod schema;
mod sqlite;
mod traits;

pub use schema::SCHEMA_VERSION;
pub use sqlite::SqliteGraphStore;
pub use traits::{GraphStore, RunStore};
