//! Binary layout of the property area: header, table of contents, and the
//! dense array of property records that follows it.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │  count │ serial │ magic │ version │ reserved │  toc[MAX_ENTRIES] │  AreaHeader
//! ├────────────────────────────────────────────────────────────────┤
//! │  PropertyInfo[0]                                                │
//! ├────────────────────────────────────────────────────────────────┤
//! │  PropertyInfo[1]                                                │
//! ├────────────────────────────────────────────────────────────────┤
//! │  ...                                                            │
//! ├────────────────────────────────────────────────────────────────┤
//! │  PropertyInfo[MAX_ENTRIES-1]                                    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The table of contents stores byte offsets from the area base, not
//! pointers: every process maps this file at a different address.

use std::mem::size_of;
use std::sync::atomic::AtomicU32;

/// Upper bound on a property name including its NUL terminator.
pub const NAME_MAX_LEN: usize = 32;
/// Upper bound on a property value including its NUL terminator.
pub const VALUE_MAX_LEN: usize = 92;
/// Upper bound on the number of properties in one area.
///
/// 247 for historical reasons: it's the minimum the original Android
/// property store has always guaranteed ("at least 247 properties must
/// be supported").
pub const MAX_ENTRIES: usize = 247;

/// ASCII "SPRP" - identifies a valid area.
pub const AREA_MAGIC: u32 = 0x5350_5250;
pub const AREA_VERSION: u32 = 1;

/// Header at offset 0, with the table of contents inlined.
#[repr(C)]
pub struct AreaHeader {
    /// Number of populated entries. Monotonically non-decreasing during a boot.
    pub count: AtomicU32,
    /// Global change counter, incremented on every add and every update.
    pub serial: AtomicU32,
    pub magic: u32,
    pub version: u32,
    /// Padding to stabilize the ABI; unused.
    pub reserved: [u32; 4],
    /// Packed `(name_length << 24) | byte_offset_from_area_base` per slot.
    pub toc: [AtomicU32; MAX_ENTRIES],
}

/// A single property's name/serial/value, stored densely in the info region.
///
/// The name is written once at creation and never changes afterwards
/// (invariant 1). `serial` is the seqlock word guarding `value`.
#[repr(C)]
pub struct PropertyInfo {
    pub name: [u8; NAME_MAX_LEN],
    /// `(value_length << 24) | (counter << 1) | dirty`.
    pub serial: AtomicU32,
    pub value: [u8; VALUE_MAX_LEN],
}

/// Byte offset of the info region: immediately after the header (which
/// contains the TOC inline).
pub const INFO_REGION_START: usize = size_of::<AreaHeader>();

/// Total byte size of a fully-populated area (header + TOC + MAX_ENTRIES records).
pub const AREA_SIZE: usize = INFO_REGION_START + MAX_ENTRIES * size_of::<PropertyInfo>();

// --- TOC slot packing -------------------------------------------------

#[inline(always)]
pub fn toc_pack(name_len: u32, offset: u32) -> u32 {
    (name_len << 24) | offset
}

#[inline(always)]
pub fn toc_name_len(entry: u32) -> u32 {
    entry >> 24
}

#[inline(always)]
pub fn toc_offset(entry: u32) -> u32 {
    entry & 0x00FF_FFFF
}

// --- Record serial packing (seqlock word) ------------------------------

/// 23-bit change counter band; the counter wraps every 2^23 updates.
pub const SERIAL_COUNTER_MASK: u32 = 0x007F_FFFF;

#[inline(always)]
pub fn serial_value_len(serial: u32) -> u32 {
    serial >> 24
}

#[inline(always)]
pub fn serial_dirty(serial: u32) -> bool {
    (serial & 1) != 0
}

#[inline(always)]
pub fn serial_counter(serial: u32) -> u32 {
    (serial >> 1) & SERIAL_COUNTER_MASK
}

#[inline(always)]
pub fn make_serial(value_len: u32, counter: u32, dirty: bool) -> u32 {
    (value_len << 24) | ((counter & SERIAL_COUNTER_MASK) << 1) | (dirty as u32)
}
