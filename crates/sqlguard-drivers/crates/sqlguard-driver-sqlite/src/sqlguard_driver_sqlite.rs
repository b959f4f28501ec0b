//! SQLite database driver implementation

mod connection;
mod driver;

pub use connection::{SqliteConnection, SqlitePreparedStatement, SqliteTransaction};
pub use driver::SqliteDriver;
