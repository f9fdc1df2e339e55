//! Persistence layer: libSQL-backed storage for regions, shipments and surveys.

mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::Database;
