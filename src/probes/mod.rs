//! Supported debug probe families.
//!
//! Only the ST-Link V2 / V2-1 family is implemented; the module
//! boundary is kept in case a second probe family is added later.

pub mod stlink;
