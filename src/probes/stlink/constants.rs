#![allow(unused)]
//! Opcode tables, device descriptor catalogue and frequency map for the
//! ST-Link V2 / V2-1 command protocol.

/// Command family opcodes and their sub-opcodes.
pub mod commands {
    // Top-level command families.
    pub const GET_VERSION: u8 = 0xF1;
    pub const DEBUG: u8 = 0xF2;
    pub const DFU: u8 = 0xF3;
    pub const SWIM: u8 = 0xF4;
    pub const GET_CURRENT_MODE: u8 = 0xF5;
    pub const GET_TARGET_VOLTAGE: u8 = 0xF7;

    // Current-mode codes, as returned by GET_CURRENT_MODE.
    pub mod mode {
        pub const DFU: u8 = 0;
        pub const MASS: u8 = 1;
        pub const DEBUG: u8 = 2;
        pub const SWIM: u8 = 3;
        pub const BOOTLOADER: u8 = 4;
    }

    pub mod dfu {
        pub const EXIT: u8 = 0x07;
    }

    pub mod swim {
        pub const ENTER: u8 = 0x00;
        pub const EXIT: u8 = 0x01;
    }

    /// Sub-opcodes common to both API generations.
    pub mod debug {
        pub const READMEM_32: u8 = 0x07;
        pub const WRITEMEM_32: u8 = 0x08;
        pub const RUN: u8 = 0x09;
        pub const STEP: u8 = 0x0A;
        pub const READMEM_8: u8 = 0x0C;
        pub const WRITEMEM_8: u8 = 0x0D;
        pub const EXIT: u8 = 0x21;
        pub const READCOREID: u8 = 0x22;
        pub const SYNC: u8 = 0x3E;
        pub const ENTER_SWD: u8 = 0xA3;

        /// Sub-opcodes introduced with the v2 command API.
        pub mod v2 {
            pub const NRST_LOW: u8 = 0x00;
            pub const NRST_HIGH: u8 = 0x01;
            pub const NRST_PULSE: u8 = 0x02;
            pub const ENTER: u8 = 0x30;
            pub const READ_IDCODES: u8 = 0x31;
            pub const RESETSYS: u8 = 0x32;
            pub const READREG: u8 = 0x33;
            pub const WRITEREG: u8 = 0x34;
            pub const WRITEDEBUGREG: u8 = 0x35;
            pub const READDEBUGREG: u8 = 0x36;
            pub const READALLREGS: u8 = 0x3A;
            pub const GETLASTRWSTATUS: u8 = 0x3B;
            pub const DRIVE_NRST: u8 = 0x3C;
            pub const START_TRACE_RX: u8 = 0x40;
            pub const STOP_TRACE_RX: u8 = 0x41;
            pub const GET_TRACE_NB: u8 = 0x42;
            pub const SWD_SET_FREQ: u8 = 0x43;
        }

        /// Sub-opcodes retained from the v1 command API.
        ///
        /// Carried here for data-model fidelity; the memory/register
        /// engine always issues the v2 forms above, matching the
        /// reference implementation these were distilled from.
        pub mod v1 {
            pub const RESETSYS: u8 = 0x03;
            pub const READALLREGS: u8 = 0x04;
            pub const READREG: u8 = 0x05;
            pub const WRITEREG: u8 = 0x06;
            pub const SETFP: u8 = 0x0B;
            pub const CLEARFP: u8 = 0x0E;
            pub const WRITEDEBUGREG: u8 = 0x0F;
            pub const SETWATCHPOINT: u8 = 0x10;
            pub const ENTER: u8 = 0x20;
        }
    }
}

/// Status byte the probe returns as the first byte of most command
/// responses; `0x80` means success.
pub const STATUS_OK: u8 = 0x80;

/// Probe family, distinguishing endpoint layout and the version's
/// trailing counter (SWIM count on V2, mass-storage count on V2-1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    V2,
    V21,
}

impl Family {
    pub fn tag(self) -> &'static str {
        match self {
            Family::V2 => "V2",
            Family::V21 => "V2-1",
        }
    }
}

/// An immutable description of one supported probe model.
#[derive(Debug, Clone, Copy)]
pub struct DeviceDescriptor {
    pub vendor_id: u16,
    pub product_id: u16,
    pub ep_out: u8,
    pub ep_in: u8,
    pub family: Family,
    /// Maximum payload bytes for a single 32-bit memory transfer.
    pub max_mem32: usize,
    /// Maximum payload bytes for a single 8-bit memory transfer.
    pub max_mem8: usize,
}

const DEFAULT_MAX_MEM32: usize = 1024;
const DEFAULT_MAX_MEM8: usize = 64;

/// The supported probe catalogue, in enumeration order. USB probing
/// walks this table in order and binds the first match.
pub const DEVICE_TABLE: &[DeviceDescriptor] = &[
    DeviceDescriptor {
        vendor_id: 0x0483,
        product_id: 0x3748,
        ep_out: 0x02,
        ep_in: 0x81,
        family: Family::V2,
        max_mem32: DEFAULT_MAX_MEM32,
        max_mem8: DEFAULT_MAX_MEM8,
    },
    DeviceDescriptor {
        vendor_id: 0x0483,
        product_id: 0x374B,
        ep_out: 0x01,
        ep_in: 0x81,
        family: Family::V21,
        max_mem32: DEFAULT_MAX_MEM32,
        max_mem8: DEFAULT_MAX_MEM8,
    },
];

/// Returns the supported family tags in catalogue order.
pub fn list() -> Vec<&'static str> {
    DEVICE_TABLE.iter().map(|d| d.family.tag()).collect()
}

/// Looks up the descriptor for a given family.
pub fn lookup(family: Family) -> &'static DeviceDescriptor {
    DEVICE_TABLE
        .iter()
        .find(|d| d.family == family)
        .expect("every Family variant has a DEVICE_TABLE row")
}

/// Finds the descriptor matching a (vendor, product) pair observed on
/// the bus, if any row of the table matches.
pub fn match_vid_pid(vendor_id: u16, product_id: u16) -> Option<&'static DeviceDescriptor> {
    DEVICE_TABLE
        .iter()
        .find(|d| d.vendor_id == vendor_id && d.product_id == product_id)
}

/// Default SWD frequency used by `Session::open` when the caller does
/// not request a specific rate.
pub const DEFAULT_SWD_FREQUENCY_HZ: u32 = 1_800_000;

/// Requested-Hz-to-divisor-byte table, in descending frequency order.
/// `resolve_divisor` walks this table top to bottom and returns the
/// first row whose frequency does not exceed the request.
pub const SWD_FREQUENCY_TABLE: &[(u32, u8)] = &[
    (4_000_000, 0),
    (1_800_000, 1),
    (1_200_000, 2),
    (950_000, 3),
    (480_000, 7),
    (240_000, 15),
    (125_000, 31),
    (100_000, 40),
    (50_000, 79),
    (25_000, 158),
];

/// Resolves a requested SWD frequency to a divisor byte using the
/// highest-frequency-match policy: the first table row whose frequency
/// is less than or equal to the request wins. Returns `None` when the
/// request is below the table's lowest entry.
pub fn resolve_divisor(requested_hz: u32) -> Option<u8> {
    SWD_FREQUENCY_TABLE
        .iter()
        .find(|(hz, _)| requested_hz >= *hz)
        .map(|(_, divisor)| *divisor)
}
