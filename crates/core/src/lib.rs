//! Domain core for staff-side ticket verification and benefit redemption.
//!
//! Nothing in this crate performs I/O directly: remote reads and writes go
//! through the [`store::TicketStore`] trait and wall-clock time is always
//! passed in explicitly, so every rule here can be exercised without a
//! database or real-time waits.

pub mod error;
pub mod ledger;
pub mod pin;
pub mod redemption;
pub mod roles;
pub mod scan;
pub mod schedule;
pub mod store;
pub mod ticket;
pub mod types;
