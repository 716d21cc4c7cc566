//! The session controller: composes the probe's open sequence and
//! exposes the mode-manager, frequency-negotiator and memory/register
//! operations as one handle.

use log::{debug, info, warn};

use crate::common::{be_u16, push_le32, BytesTo};
use crate::error::{Error, Result, TransportError};
use crate::probes::stlink::constants::{self, commands, DeviceDescriptor, STATUS_OK};
use crate::probes::stlink::usb_interface::{StLinkUsbDevice, UsbInterface, TIMEOUT};
use crate::probes::stlink::version::ProbeVersion;

/// A bound ST-Link session: the transport, the device descriptor it was
/// matched against, the probed firmware version, and the negotiated SWD
/// frequency.
///
/// Generic over the transport so tests can drive the exact same
/// protocol logic against a scripted [`mock::MockUsbInterface`](
/// crate::probes::stlink::usb_interface::mock::MockUsbInterface)
/// instead of real hardware. Real callers use the default type
/// parameter and never see the generic.
pub struct Session<D: UsbInterface = StLinkUsbDevice> {
    device: D,
    version: ProbeVersion,
    frequency_hz: u32,
    core_id: Option<u32>,
}

impl Session<StLinkUsbDevice> {
    /// Opens the first supported probe found on the USB bus and runs it
    /// through the full open sequence: version handshake, mode exit,
    /// frequency negotiation (API v2 only), SWD entry.
    pub fn open(requested_hz: u32) -> Result<Self> {
        let device = StLinkUsbDevice::open()?;
        Self::from_device(device, requested_hz)
    }
}

impl<D: UsbInterface> Session<D> {
    /// Runs the open sequence against an already-open transport. This is
    /// the seam that lets the sequence be exercised against a mock
    /// transport in tests; `Session::open` is the one entry point real
    /// callers need.
    pub fn from_device(mut device: D, requested_hz: u32) -> Result<Self> {
        let version = Self::probe_version(&mut device)?;
        info!("probe identity: {}", version.identity());

        Self::leave_state(&mut device)?;

        let frequency_hz = if version.api() == 2 {
            Self::negotiate_frequency(&mut device, requested_hz)?
        } else {
            warn!("probe speaks API v1: SWD_SET_FREQ is unavailable, frequency left at request");
            requested_hz
        };

        Self::enter_debug_swd(&mut device)?;

        let mut session = Session {
            device,
            version,
            frequency_hz,
            core_id: None,
        };
        // Best-effort cache; a target that isn't powered will simply
        // leave this as `None`.
        session.core_id = session.get_coreid().ok();
        Ok(session)
    }

    /// Consumes the session, releasing the transport. Equivalent to
    /// letting the session drop, spelled out for callers who want an
    /// explicit close point.
    pub fn close(self) {}

    pub fn version(&self) -> &ProbeVersion {
        &self.version
    }

    pub fn device_descriptor(&self) -> &DeviceDescriptor {
        self.device.descriptor()
    }

    /// The SWD frequency negotiated at open time (or the request, on an
    /// API-v1 probe where no negotiation took place).
    pub fn frequency_hz(&self) -> u32 {
        self.frequency_hz
    }

    /// The core ID cached during `open`, if reading it succeeded.
    pub fn core_id(&self) -> Option<u32> {
        self.core_id
    }

    // ---- Version Probe ----

    fn probe_version(device: &mut D) -> Result<ProbeVersion> {
        let response = device.xfer(&[commands::GET_VERSION, 0x80], None, 6, TIMEOUT)?;
        let word = be_u16(&response[0..2]);
        let family = device.descriptor().family;
        Ok(ProbeVersion::decode(word, family))
    }

    // ---- Mode Manager ----

    fn leave_state(device: &mut D) -> Result<()> {
        let response = device.xfer(&[commands::GET_CURRENT_MODE], None, 2, TIMEOUT)?;
        let exit_cmd = match response[0] {
            constants::commands::mode::DFU => Some([commands::DFU, commands::dfu::EXIT]),
            constants::commands::mode::DEBUG => Some([commands::DEBUG, commands::debug::EXIT]),
            constants::commands::mode::SWIM => Some([commands::SWIM, commands::swim::EXIT]),
            _ => None,
        };
        if let Some(cmd) = exit_cmd {
            debug!("leaving current probe mode (code {:#04x})", response[0]);
            device.xfer(&cmd, None, 0, TIMEOUT)?;
        }
        Ok(())
    }

    fn enter_debug_swd(device: &mut D) -> Result<()> {
        let cmd = [
            commands::DEBUG,
            commands::debug::v2::ENTER,
            commands::debug::ENTER_SWD,
        ];
        device.xfer(&cmd, None, 2, TIMEOUT)?;
        Ok(())
    }

    // ---- Frequency Negotiator ----

    fn negotiate_frequency(device: &mut D, requested_hz: u32) -> Result<u32> {
        let divisor =
            constants::resolve_divisor(requested_hz).ok_or(Error::InvalidFrequency(requested_hz))?;
        let cmd = [commands::DEBUG, commands::debug::v2::SWD_SET_FREQ, divisor];
        let response = device.xfer(&cmd, None, 2, TIMEOUT)?;
        if response[0] != STATUS_OK {
            return Err(Error::Transport(TransportError::UnexpectedStatus(
                response[0],
            )));
        }
        debug!("SWD frequency set: requested {requested_hz} Hz, divisor {divisor:#04x}");
        Ok(requested_hz)
    }

    // ---- Memory/Register Engine ----

    /// Reads the dual-ADC sample and computes target VCC in volts.
    /// Returns `None` when the reference sample is zero (no target
    /// power detected).
    pub fn get_target_voltage(&mut self) -> Result<Option<f32>> {
        let response = self
            .device
            .xfer(&[commands::GET_TARGET_VOLTAGE], None, 8, TIMEOUT)?;
        let an0 = (&response[0..4]).to_u32_le();
        let an1 = (&response[4..8]).to_u32_le();
        if an0 == 0 {
            return Ok(None);
        }
        let volts = 2.0 * an1 as f32 * 1.2 / an0 as f32;
        Ok(Some((volts * 1000.0).round() / 1000.0))
    }

    pub fn get_coreid(&mut self) -> Result<u32> {
        let cmd = [commands::DEBUG, commands::debug::READCOREID];
        let response = self.device.xfer(&cmd, None, 4, TIMEOUT)?;
        Ok((&response[0..4]).to_u32_le())
    }

    pub fn get_core_reg(&mut self, index: u8) -> Result<u32> {
        let cmd = [commands::DEBUG, commands::debug::v2::READREG, index];
        let response = self.device.xfer(&cmd, None, 8, TIMEOUT)?;
        Ok((&response[4..8]).to_u32_le())
    }

    pub fn set_core_reg(&mut self, index: u8, value: u32) -> Result<()> {
        let mut cmd = vec![commands::DEBUG, commands::debug::v2::WRITEREG, index];
        push_le32(&mut cmd, value);
        self.device.xfer(&cmd, None, 2, TIMEOUT)?;
        Ok(())
    }

    pub fn get_mem32(&mut self, addr: u32) -> Result<u32> {
        require_aligned("address", addr)?;
        let mut cmd = vec![commands::DEBUG, commands::debug::v2::READDEBUGREG];
        push_le32(&mut cmd, addr);
        let response = self.device.xfer(&cmd, None, 8, TIMEOUT)?;
        Ok((&response[4..8]).to_u32_le())
    }

    pub fn set_mem32(&mut self, addr: u32, value: u32) -> Result<()> {
        require_aligned("address", addr)?;
        let mut cmd = vec![commands::DEBUG, commands::debug::v2::WRITEDEBUGREG];
        push_le32(&mut cmd, addr);
        push_le32(&mut cmd, value);
        self.device.xfer(&cmd, None, 2, TIMEOUT)?;
        Ok(())
    }

    pub fn read_mem32(&mut self, addr: u32, size: u32) -> Result<Vec<u8>> {
        require_aligned("address", addr)?;
        require_aligned("length", size)?;
        require_within_limit(32, size as usize, self.device.descriptor().max_mem32)?;

        let mut cmd = vec![commands::DEBUG, commands::debug::READMEM_32];
        push_le32(&mut cmd, addr);
        push_le32(&mut cmd, size);
        self.device.xfer(&cmd, None, size as usize, TIMEOUT)
    }

    pub fn write_mem32(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        require_aligned("address", addr)?;
        require_aligned("length", data.len() as u32)?;
        require_within_limit(32, data.len(), self.device.descriptor().max_mem32)?;

        let mut cmd = vec![commands::DEBUG, commands::debug::WRITEMEM_32];
        push_le32(&mut cmd, addr);
        push_le32(&mut cmd, data.len() as u32);
        self.device.xfer(&cmd, Some(data), 0, TIMEOUT)?;
        Ok(())
    }

    /// No address alignment is required for 8-bit transfers.
    pub fn read_mem8(&mut self, addr: u32, size: u32) -> Result<Vec<u8>> {
        require_within_limit(8, size as usize, self.device.descriptor().max_mem8)?;

        let mut cmd = vec![commands::DEBUG, commands::debug::READMEM_8];
        push_le32(&mut cmd, addr);
        push_le32(&mut cmd, size);
        self.device.xfer(&cmd, None, size as usize, TIMEOUT)
    }

    pub fn write_mem8(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        require_within_limit(8, data.len(), self.device.descriptor().max_mem8)?;

        let mut cmd = vec![commands::DEBUG, commands::debug::WRITEMEM_8];
        push_le32(&mut cmd, addr);
        push_le32(&mut cmd, data.len() as u32);
        self.device.xfer(&cmd, Some(data), 0, TIMEOUT)?;
        Ok(())
    }
}

fn require_aligned(what: &'static str, value: u32) -> Result<()> {
    if value % 4 != 0 {
        return Err(Error::AddressAlignment { what, value });
    }
    Ok(())
}

fn require_within_limit(kind: u8, len: usize, max: usize) -> Result<()> {
    if len > max {
        return Err(Error::SizeLimit { kind, len, max });
    }
    Ok(())
}
