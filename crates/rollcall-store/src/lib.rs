//! rollcall-store — Durable encoding store backends.
//!
//! Both backends persist one record per (group, person), replace it
//! atomically and guard writes with a revision compare-and-swap.

pub mod codec;
pub mod dir;
pub mod sqlite;

pub use dir::DirEncodingStore;
pub use sqlite::SqliteEncodingStore;
