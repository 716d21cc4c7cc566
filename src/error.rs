//! Flat error taxonomy for the probe driver.
//!
//! Kept deliberately flat (no exception-style inheritance): a caller
//! matches on [`Error`] directly, and the one variant that wraps a
//! lower-level cause (`Transport`) carries a small [`TransportError`]
//! rather than multiplying top-level variants.

/// Errors surfaced by [`crate::session::Session`] and the protocol layers
/// underneath it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No USB device on the bus matched any row of the device descriptor
    /// table.
    #[error("no supported ST-Link probe found on the USB bus")]
    DeviceNotFound,

    /// A USB-level or protocol-level transport failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// An address or length was not a multiple of 4 where the operation
    /// requires it.
    #[error("{what} {value:#010x} is not a multiple of 4")]
    AddressAlignment {
        /// Names the offending input, e.g. `"address"` or `"length"`.
        what: &'static str,
        value: u32,
    },

    /// A transfer length exceeded the descriptor's transfer-size limit.
    #[error("{kind}-bit transfer of {len} bytes exceeds the probe's limit of {max} bytes")]
    SizeLimit { kind: u8, len: usize, max: usize },

    /// The requested SWD frequency resolved to no divisor in the
    /// frequency table.
    #[error("requested SWD frequency of {0} Hz is below the lowest frequency the probe supports")]
    InvalidFrequency(u32),
}

/// The cause carried by [`Error::Transport`].
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The USB stack reported writing fewer bytes than were handed to it.
    #[error("wrote {written} of {expected} bytes to the OUT endpoint")]
    ShortWrite { written: usize, expected: usize },

    /// The probe responded with a status byte other than the one the
    /// protocol layer expected (e.g. `SWD_SET_FREQ` not answering `0x80`).
    #[error("unexpected status byte {0:#04x} in probe response")]
    UnexpectedStatus(u8),

    /// The command frame exceeded the fixed 16-byte command size.
    #[error("command frame of {0} bytes exceeds the 16-byte limit")]
    CommandTooLong(usize),

    /// An error surfaced by the underlying USB library.
    #[error(transparent)]
    Usb(#[from] rusb::Error),
}

impl From<rusb::Error> for Error {
    fn from(e: rusb::Error) -> Self {
        Error::Transport(TransportError::from(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
