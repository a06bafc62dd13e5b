//! Row structs for the `tickets` and `events` tables.
//!
//! Each submodule contains a `FromRow` struct matching the database row and a
//! conversion into the corresponding `entrypass_core::ticket` type.

pub mod event;
pub mod ticket;
