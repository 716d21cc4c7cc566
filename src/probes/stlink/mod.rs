//! ST-Link V2 / V2-1 command protocol: opcode tables, the raw USB
//! transport, and the decoded probe version.
//!
//! The session-level logic that drives these (mode switching,
//! frequency negotiation, memory/register access) lives in
//! [`crate::session`]; this module only carries the protocol's static
//! data and the transport it runs over.

pub mod constants;
pub mod usb_interface;
pub mod version;

pub use constants::{DeviceDescriptor, Family};
pub use usb_interface::{StLinkUsbDevice, UsbInterface};
pub use version::ProbeVersion;
