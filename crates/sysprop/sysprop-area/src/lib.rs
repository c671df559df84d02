//! The property area: a fixed-layout shared memory region holding a table
//! of contents plus a dense array of seqlock-protected property records,
//! and the operations (C1-C5) over it.

mod area;
mod error;
mod layout;
mod waiter;

pub use area::{Area, PropertyRef};
pub use error::AreaError;
pub use layout::{AREA_SIZE, AREA_VERSION, MAX_ENTRIES, NAME_MAX_LEN, VALUE_MAX_LEN};
