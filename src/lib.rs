//! Host-side driver for ST-Link V2 / V2-1 USB debug probes speaking SWD.
//!
//! [`Session`] is the entry point: `Session::open` binds the first
//! supported probe on the USB bus, negotiates its SWD frequency, and
//! drives it into debug mode. From there the session exposes core
//! register and target memory access.
//!
//! ```no_run
//! use stlink_swd::Session;
//!
//! let mut session = Session::open(1_800_000)?;
//! println!("{}", session.version().identity());
//! let core_id = session.get_coreid()?;
//! # Ok::<(), stlink_swd::Error>(())
//! ```

pub mod common;
pub mod error;
pub mod probes;
pub mod session;

pub use error::{Error, Result};
pub use probes::stlink::{DeviceDescriptor, Family, ProbeVersion, UsbInterface};
pub use session::Session;
