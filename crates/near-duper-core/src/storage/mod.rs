pub mod models;
mod queries;
mod sqlite;

pub use queries::FingerprintRow;
pub use sqlite::Database;
