//! Database entities.
//!
//! We use SeaORM and target PostgreSQL (production) and SQLite (tests).

pub mod chunk;
pub mod file;
pub mod ring_node;
pub mod server;
pub mod upload_session;
