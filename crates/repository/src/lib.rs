//! Durable storage for events, bridge tasks, and scan cursors over sqlx /
//! Postgres, implementing the same prefixed key-value capability set a
//! LevelDB-backed repository would expose.

mod memory;
mod postgres;

pub use memory::InMemoryRepository;
pub use postgres::PostgresRepository;
