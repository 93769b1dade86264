//! Descriptor table.
//!
//! - [`Slot`] - one cell with the empty/reserved/occupied protocol
//! - [`FdTable`] - fixed array of slots behind a single lock

mod slot;
mod table;

pub use slot::{Slot, SlotToken};
pub use table::{Fd, FdTable, MAX_FD, Reservation};
