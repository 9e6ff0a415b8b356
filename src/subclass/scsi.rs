//! USB SCSI
//!
//! Unlike the upstream subclass (which only parses a CDB and hands it to an application
//! callback), [Scsi] *answers* every command itself: `TEST_UNIT_READY`, `REQUEST_SENSE`,
//! `INQUIRY` (standard + VPD), `MODE_SENSE(6)`, `START_STOP_UNIT`,
//! `PREVENT_ALLOW_MEDIUM_REMOVAL`, `READ_FORMAT_CAPACITIES`, `READ_CAPACITY(10)`, `READ(10)`,
//! `WRITE(10)` and `READ_BUFFER`/`WRITE_BUFFER` are all resolved against the [Lun]s it owns; only
//! the data plane (block IO, vendor CDBs) is delegated to [Lun].

use crate::transport::Transport;
use crate::CLASS_MASS_STORAGE;
use num_enum::TryFromPrimitive;
use usb_device::bus::InterfaceNumber;
use usb_device::bus::UsbBus;
use usb_device::class::{ControlIn, UsbClass};
use usb_device::descriptor::DescriptorWriter;
#[cfg(feature = "bbb")]
use {
    crate::descriptors,
    crate::fmt::debug,
    crate::lun::{Lun, LunPermissions, LunState, BLOCK_SIZE},
    crate::sense::{Asc, SenseData, SenseKey},
    crate::transport::bbb::{BulkOnly, BulkOnlyError, HostDirection},
    crate::transport::{CommandStatus, TransportError},
    core::borrow::BorrowMut,
    usb_device::bus::UsbBusAllocator,
    usb_device::UsbError,
};

/// SCSI device subclass code
pub const SUBCLASS_SCSI: u8 = 0x06; // SCSI Transparent command set

/* SCSI codes */

/* SPC */
const TEST_UNIT_READY: u8 = 0x00;
const REQUEST_SENSE: u8 = 0x03;
const INQUIRY: u8 = 0x12;
const MODE_SENSE_6: u8 = 0x1A;
const MODE_SENSE_10: u8 = 0x5A;
const START_STOP_UNIT: u8 = 0x1B;
const PREVENT_ALLOW_MEDIUM_REMOVAL: u8 = 0x1E;

/* SBC */
const READ_10: u8 = 0x28;
const READ_16: u8 = 0x88;
const READ_CAPACITY_10: u8 = 0x25;
const READ_CAPACITY_16: u8 = 0x9E;
const WRITE_10: u8 = 0x2A;
const READ_BUFFER: u8 = 0x3C;
const WRITE_BUFFER: u8 = 0x3B;

/* MMC */
const READ_FORMAT_CAPACITIES: u8 = 0x23;

/// SCSI command
///
/// Refer to specifications (SPC,SAM,SBC,MMC,etc.)
#[derive(Copy, Clone, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[non_exhaustive]
pub enum ScsiCommand {
    Unknown,

    /* SPC */
    Inquiry {
        evpd: bool,
        page_code: u8,
        alloc_len: u16,
    },
    TestUnitReady,
    RequestSense {
        desc: bool,
        alloc_len: u8,
    },
    ModeSense6 {
        dbd: bool,
        page_control: PageControl,
        page_code: u8,
        subpage_code: u8,
        alloc_len: u8,
    },
    ModeSense10 {
        dbd: bool,
        page_control: PageControl,
        page_code: u8,
        subpage_code: u8,
        alloc_len: u16,
    },
    StartStopUnit {
        start: bool,
    },
    PreventAllowMediumRemoval {
        prevent: bool,
    },

    /* SBC */
    ReadCapacity10,
    ReadCapacity16 {
        alloc_len: u32,
    },
    Read {
        lba: u64,
        len: u64,
    },
    Write {
        lba: u64,
        len: u64,
    },
    ReadBuffer {
        buffer_offset: u32,
        alloc_len: u32,
    },
    WriteBuffer {
        buffer_offset: u32,
        param_len: u32,
    },

    /* MMC */
    ReadFormatCapacities {
        alloc_len: u16,
    },

    /// Vendor-specific command (op code group 6 or 7), delegated to [crate::lun::Lun::vendor_command]
    Vendor,
}

#[repr(u8)]
#[derive(Copy, Clone, Debug, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PageControl {
    CurrentValues = 0b00,
    ChangeableValues = 0b01,
    DefaultValues = 0b10,
    SavedValues = 0b11,
}

fn is_vendor_group(opcode: u8) -> bool {
    matches!(opcode & 0xE0, 0xC0 | 0xE0)
}

fn parse_cb(cb: &[u8]) -> ScsiCommand {
    match cb[0] {
        TEST_UNIT_READY => ScsiCommand::TestUnitReady,
        INQUIRY => ScsiCommand::Inquiry {
            evpd: (cb[1] & 0b00000001) != 0,
            page_code: cb[2],
            alloc_len: u16::from_be_bytes([cb[3], cb[4]]),
        },
        REQUEST_SENSE => ScsiCommand::RequestSense {
            desc: (cb[1] & 0b00000001) != 0,
            alloc_len: cb[4],
        },
        START_STOP_UNIT => ScsiCommand::StartStopUnit {
            start: (cb[4] & 0b00000001) != 0,
        },
        PREVENT_ALLOW_MEDIUM_REMOVAL => ScsiCommand::PreventAllowMediumRemoval {
            prevent: (cb[4] & 0b00000001) != 0,
        },
        READ_CAPACITY_10 => ScsiCommand::ReadCapacity10,
        READ_CAPACITY_16 => ScsiCommand::ReadCapacity16 {
            alloc_len: u32::from_be_bytes([cb[10], cb[11], cb[12], cb[13]]),
        },
        READ_10 => ScsiCommand::Read {
            lba: u32::from_be_bytes([cb[2], cb[3], cb[4], cb[5]]) as u64,
            len: u16::from_be_bytes([cb[7], cb[8]]) as u64,
        },
        READ_16 => ScsiCommand::Read {
            lba: u64::from_be_bytes((cb[2..10]).try_into().unwrap()),
            len: u32::from_be_bytes((cb[10..14]).try_into().unwrap()) as u64,
        },
        WRITE_10 => ScsiCommand::Write {
            lba: u32::from_be_bytes([cb[2], cb[3], cb[4], cb[5]]) as u64,
            len: u16::from_be_bytes([cb[7], cb[8]]) as u64,
        },
        READ_BUFFER => ScsiCommand::ReadBuffer {
            buffer_offset: u32::from_be_bytes([0, cb[3], cb[4], cb[5]]),
            alloc_len: u32::from_be_bytes([0, cb[6], cb[7], cb[8]]),
        },
        WRITE_BUFFER => ScsiCommand::WriteBuffer {
            buffer_offset: u32::from_be_bytes([0, cb[3], cb[4], cb[5]]),
            param_len: u32::from_be_bytes([0, cb[6], cb[7], cb[8]]),
        },
        MODE_SENSE_6 => ScsiCommand::ModeSense6 {
            dbd: (cb[1] & 0b00001000) != 0,
            page_control: PageControl::try_from_primitive(cb[2] >> 6).unwrap(),
            page_code: cb[2] & 0b00111111,
            subpage_code: cb[3],
            alloc_len: cb[4],
        },
        MODE_SENSE_10 => ScsiCommand::ModeSense10 {
            dbd: (cb[1] & 0b00001000) != 0,
            page_control: PageControl::try_from_primitive(cb[2] >> 6).unwrap(),
            page_code: cb[2] & 0b00111111,
            subpage_code: cb[3],
            alloc_len: u16::from_be_bytes([cb[7], cb[8]]),
        },
        READ_FORMAT_CAPACITIES => ScsiCommand::ReadFormatCapacities {
            alloc_len: u16::from_be_bytes([cb[7], cb[8]]),
        },
        op if is_vendor_group(op) => ScsiCommand::Vendor,
        _ => ScsiCommand::Unknown,
    }
}

/// SCSI USB Mass Storage subclass
pub struct Scsi<T: Transport, L, const N: usize> {
    interface: InterfaceNumber,
    pub(crate) transport: T,
    luns: [L; N],
    sense: [SenseData; N],
    vendor: &'static str,
    product: &'static str,
    revision: &'static str,
    serial: &'static str,
    eui64: [u8; 8],
    exec: Execution,
}

/// In-flight, multi-`poll()` transaction state; the Rust realization of spec.md's per-command
/// "ctx" counter (§4.3). Cleared whenever a CSW is produced.
#[derive(Copy, Clone, Debug, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Execution {
    #[default]
    None,
    Read {
        lba: u32,
        remaining_blocks: u32,
    },
    Write {
        lba: u32,
        remaining_blocks: u32,
        filled: u16,
        block: [u8; BLOCK_SIZE as usize],
    },
    ReadBuffer {
        offset: u32,
        remaining: u32,
    },
    WriteBuffer {
        offset: u32,
        remaining: u32,
    },
}

/// SCSI subclass implementation with [Bulk Only Transport]
///
/// [Bulk Only Transport]: crate::transport::bbb::BulkOnly
#[cfg(feature = "bbb")]
impl<'alloc, Bus: UsbBus + 'alloc, Buf: BorrowMut<[u8]>, L: Lun, const N: usize>
    Scsi<BulkOnly<'alloc, Bus, Buf>, L, N>
{
    /// Creates an SCSI over Bulk Only Transport instance
    ///
    /// # Arguments
    /// * `alloc` - [UsbBusAllocator]
    /// * `packet_size` - Maximum USB packet size. Allowed values: 8,16,32,64
    /// * `buf` - The underlying IO buffer. It is **required** to fit at least a `CBW` and/or a
    ///   single packet. It is **recommended** that buffer fits at least one sector
    /// * `luns` - the fixed set of logical units this instance answers for; `max_lun` reported to
    ///   the host is `N - 1`
    /// * `vendor`/`product`/`revision`/`serial` - `INQUIRY` strings shared by every LUN
    /// * `eui64` - identifier used in VPD page 0x83 (Device Identification)
    ///
    /// # Errors
    /// * [InvalidMaxLun]
    /// * [BufferTooSmall]
    ///
    /// # Panics
    /// Panics if endpoint allocations fails.
    ///
    /// [InvalidMaxLun]: crate::transport::bbb::BulkOnlyError::InvalidMaxLun
    /// [BufferTooSmall]: crate::transport::bbb::BulkOnlyError::BufferTooSmall
    /// [UsbBusAllocator]: usb_device::bus::UsbBusAllocator
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        alloc: &'alloc UsbBusAllocator<Bus>,
        packet_size: u16,
        buf: Buf,
        luns: [L; N],
        vendor: &'static str,
        product: &'static str,
        revision: &'static str,
        serial: &'static str,
        eui64: [u8; 8],
    ) -> Result<Self, BulkOnlyError> {
        assert!(N >= 1 && N <= 16, "1..=16 LUNs are addressable (4-bit LUN field)");
        BulkOnly::new(alloc, packet_size, (N - 1) as u8, buf).map(|transport| Self {
            interface: alloc.interface(),
            transport,
            luns,
            sense: [SenseData::default(); N],
            vendor,
            product,
            revision,
            serial,
            eui64,
            exec: Execution::None,
        })
    }

    /// Drives the subclass in both directions, answering whatever command is pending.
    pub fn poll(&mut self) -> Result<(), UsbError> {
        fn map_ignore<T>(res: Result<T, TransportError<BulkOnlyError>>) -> Result<(), UsbError> {
            match res {
                Ok(_)
                | Err(TransportError::Usb(UsbError::WouldBlock))
                | Err(TransportError::Error(_)) => Ok(()),
                Err(TransportError::Usb(err)) => Err(err),
            }
        }

        map_ignore(self.transport.read())?;
        map_ignore(self.transport.write())?;

        if let Some(raw_cb) = self.transport.get_command() {
            if !self.transport.has_status() {
                let lun = raw_cb.lun as usize;
                let data_transfer_len = raw_cb.data_transfer_len;
                let direction = raw_cb.direction;

                if matches!(self.exec, Execution::None) {
                    let kind = parse_cb(raw_cb.bytes);
                    let mut cdb = [0u8; 16];
                    let cdb_len = raw_cb.bytes.len();
                    cdb[..cdb_len].copy_from_slice(raw_cb.bytes);
                    debug!("usb: scsi: Command: {}", kind);
                    self.dispatch(lun, kind, direction, data_transfer_len, &cdb[..cdb_len]);
                } else {
                    self.continue_exec(lun, direction, data_transfer_len);
                }

                loop {
                    match self.transport.write() {
                        Err(TransportError::Error(BulkOnlyError::FullPacketExpected)) => {
                            continue;
                        }
                        Ok(_)
                        | Err(TransportError::Error(_))
                        | Err(TransportError::Usb(UsbError::WouldBlock)) => { /* ignore */ }
                        Err(TransportError::Usb(err)) => {
                            return Err(err);
                        }
                    };
                    map_ignore(self.transport.read())?;
                    break;
                }
            }
        } else {
            self.exec = Execution::None;
        }

        Ok(())
    }

    /// Sends `full`, truncated to `h` bytes; a response strictly longer than `h` (case Hi<Di) is
    /// refused outright rather than partially delivered — `fail_phase` tears the IO buffer down
    /// immediately, so anything already written there would never reach the host.
    fn emit(&mut self, direction: HostDirection, h: u32, full: &[u8]) {
        match direction {
            HostDirection::In if full.len() <= h as usize => {
                let _ = self.transport.try_write_data_all(full);
                self.transport.set_status(CommandStatus::Passed);
            }
            _ => self.transport.set_status(CommandStatus::PhaseError),
        }
    }

    /// Completes a command with no data stage. `direction` must be `NotExpected`: if the host's
    /// CBW committed to an IN or OUT data phase for a command that has none (case 9), that's a
    /// phase error regardless of `ok`, mirroring `emit`'s direction check.
    fn no_data(&mut self, direction: HostDirection, ok: bool) {
        let status = if direction != HostDirection::NotExpected {
            CommandStatus::PhaseError
        } else if ok {
            CommandStatus::Passed
        } else {
            CommandStatus::Failed
        };
        self.transport.set_status(status);
    }

    /// Records sense and fails the command. `direction`/`h` aren't consulted: the transport's
    /// residual-driven stall (spec. §4.2) reacts the same way to `Failed` regardless of which
    /// way, if any, the host committed to move data.
    fn fail_sense(&mut self, lun: usize, _direction: HostDirection, _h: u32, key: SenseKey, asc: Asc) {
        if let Some(sense) = self.sense.get_mut(lun) {
            sense.set(key, asc);
        }
        self.transport.set_status(CommandStatus::Failed);
    }

    fn dispatch(&mut self, lun: usize, kind: ScsiCommand, direction: HostDirection, h: u32, cdb: &[u8]) {
        if lun >= N {
            self.transport.set_status(CommandStatus::Failed);
            return;
        }

        use ScsiCommand::*;
        match kind {
            TestUnitReady => {
                let ready = self.luns[lun].state() == LunState::Ready;
                if ready {
                    self.no_data(direction, true);
                } else {
                    self.fail_sense(lun, direction, h, SenseKey::NotReady, Asc::MEDIUM_NOT_PRESENT);
                }
            }
            RequestSense { .. } => {
                let mut full = [0u8; 18];
                let n = self.sense[lun].write_fixed(&mut full);
                self.emit(direction, h, &full[..n]);
                self.sense[lun].clear();
            }
            Inquiry { evpd, page_code, .. } => {
                if !evpd {
                    let mut full = [0u8; descriptors::INQUIRY_STANDARD_LEN];
                    descriptors::inquiry_standard(&mut full, true, self.vendor, self.product, self.revision);
                    self.emit(direction, h, &full);
                } else {
                    let mut full = [0u8; 32];
                    let n = match page_code {
                        0x00 => descriptors::vpd_supported_pages(&mut full),
                        0x80 => descriptors::vpd_serial_number(&mut full, self.serial),
                        0x83 => descriptors::vpd_device_identification(&mut full, self.vendor, self.eui64),
                        _ => {
                            self.fail_sense(lun, direction, h, SenseKey::IllegalRequest, Asc::INVALID_FIELD_IN_CDB);
                            return;
                        }
                    };
                    self.emit(direction, h, &full[..n]);
                }
            }
            ModeSense6 { .. } => {
                // header only: no mode pages implemented, write-protect bit reflects the LUN
                let mut full = [0u8; 4];
                full[0] = 3; // mode data length (excl. this byte)
                full[2] = if self.luns[lun].writable() { 0x00 } else { 0x80 };
                self.emit(direction, h, &full);
            }
            StartStopUnit { .. } | PreventAllowMediumRemoval { .. } => {
                self.no_data(direction, true);
            }
            ReadCapacity10 => {
                if self.luns[lun].state() != LunState::Ready {
                    self.fail_sense(lun, direction, h, SenseKey::NotReady, Asc::MEDIUM_NOT_PRESENT);
                    return;
                }
                let last_lba = self.luns[lun].capacity_blocks().saturating_sub(1);
                let mut full = [0u8; 8];
                full[0..4].copy_from_slice(&last_lba.to_be_bytes());
                full[4..8].copy_from_slice(&BLOCK_SIZE.to_be_bytes());
                self.emit(direction, h, &full);
            }
            ReadFormatCapacities { .. } => {
                let mut full = [0u8; 12];
                full[3] = 8; // capacity list length
                let (blocks, descriptor_code) = if self.luns[lun].state() == LunState::Ready {
                    (self.luns[lun].capacity_blocks(), 0b10) // formatted media
                } else {
                    (0, 0b11) // no media present
                };
                full[4..8].copy_from_slice(&blocks.to_be_bytes());
                full[8] = descriptor_code;
                full[9..12].copy_from_slice(&BLOCK_SIZE.to_be_bytes()[1..]);
                self.emit(direction, h, &full);
            }
            Read { lba, len } => {
                if !matches!(direction, HostDirection::In) {
                    self.transport.set_status(CommandStatus::PhaseError);
                    return;
                }
                if self.luns[lun].state() != LunState::Ready {
                    self.fail_sense(lun, direction, h, SenseKey::NotReady, Asc::MEDIUM_NOT_PRESENT);
                    return;
                }
                if lba + len > self.luns[lun].capacity_blocks() as u64 {
                    self.fail_sense(lun, direction, h, SenseKey::IllegalRequest, Asc::LBA_OUT_OF_RANGE);
                    return;
                }
                if len == 0 {
                    self.no_data(direction, true);
                    return;
                }
                self.exec = Execution::Read { lba: lba as u32, remaining_blocks: len as u32 };
                self.continue_exec(lun, direction, h);
            }
            Write { lba, len } => {
                if !matches!(direction, HostDirection::Out) {
                    self.transport.set_status(CommandStatus::PhaseError);
                    return;
                }
                if !self.luns[lun].writable() {
                    self.fail_sense(lun, direction, h, SenseKey::DataProtect, Asc::WRITE_PROTECTED);
                    return;
                }
                if lba + len > self.luns[lun].capacity_blocks() as u64 {
                    self.fail_sense(lun, direction, h, SenseKey::IllegalRequest, Asc::LBA_OUT_OF_RANGE);
                    return;
                }
                if len == 0 {
                    self.no_data(direction, true);
                    return;
                }
                if let Err(err) = self.luns[lun].write_preload(lba as u32) {
                    self.sense[lun].set_from_lun_error(err, true);
                    self.transport.set_status(CommandStatus::Failed);
                    return;
                }
                self.exec = Execution::Write {
                    lba: lba as u32,
                    remaining_blocks: len as u32,
                    filled: 0,
                    block: [0u8; BLOCK_SIZE as usize],
                };
                self.continue_exec(lun, direction, h);
            }
            ReadBuffer { buffer_offset, alloc_len } => {
                if !self.luns[lun].permissions().contains(LunPermissions::BUFFER_RAM) {
                    self.fail_sense(lun, direction, h, SenseKey::IllegalRequest, Asc::INVALID_FIELD_IN_CDB);
                    return;
                }
                if alloc_len == 0 {
                    self.no_data(direction, true);
                    return;
                }
                self.exec = Execution::ReadBuffer { offset: buffer_offset, remaining: alloc_len };
                self.continue_exec(lun, direction, h);
            }
            WriteBuffer { buffer_offset, param_len } => {
                if !self.luns[lun].permissions().contains(LunPermissions::BUFFER_RAM) {
                    self.fail_sense(lun, direction, h, SenseKey::IllegalRequest, Asc::INVALID_FIELD_IN_CDB);
                    return;
                }
                if param_len == 0 {
                    self.no_data(direction, true);
                    return;
                }
                self.exec = Execution::WriteBuffer { offset: buffer_offset, remaining: param_len };
                self.continue_exec(lun, direction, h);
            }
            Vendor => {
                if !self.luns[lun].permissions().contains(LunPermissions::VENDOR_COMMAND) {
                    self.fail_sense(lun, direction, h, SenseKey::IllegalRequest, Asc::INVALID_FIELD_IN_CDB);
                    return;
                }
                match self.luns[lun].vendor_command(cdb) {
                    Some(Ok(())) => self.no_data(direction, true),
                    Some(Err(err)) => {
                        self.sense[lun].set_from_lun_error(err, false);
                        self.transport.set_status(CommandStatus::Failed);
                    }
                    None => self.fail_sense(lun, direction, h, SenseKey::IllegalRequest, Asc::INVALID_FIELD_IN_CDB),
                }
            }
            ModeSense10 { .. } | ReadCapacity16 { .. } => {
                self.fail_sense(lun, direction, h, SenseKey::IllegalRequest, Asc::INVALID_FIELD_IN_CDB);
            }
            Unknown => {
                self.fail_sense(lun, direction, h, SenseKey::IllegalRequest, Asc::INVALID_FIELD_IN_CDB);
            }
        }
    }

    /// Advances a chunked `Execution` (`Read`/`Write`/`ReadBuffer`/`WriteBuffer`) by one step.
    /// `h` is the *live* residual `dCBWDataTransferLength` for this tick — used to detect the
    /// host running out of committed bytes before the command is satisfied (case Ho<Do).
    fn continue_exec(&mut self, lun: usize, direction: HostDirection, h: u32) {
        match self.exec {
            Execution::Read { lba, remaining_blocks } => {
                if remaining_blocks == 0 {
                    // direction was already validated against `In` at dispatch; this isn't a
                    // no-data command, its data stage has simply just finished.
                    self.exec = Execution::None;
                    self.transport.set_status(CommandStatus::Passed);
                    return;
                }
                if h < BLOCK_SIZE {
                    // host committed to less than the next whole block (case Hi>Di): stop here,
                    // the transport stalls IN on the residual.
                    self.exec = Execution::None;
                    self.transport.set_status(CommandStatus::Passed);
                    return;
                }
                let mut block = [0u8; BLOCK_SIZE as usize];
                match self.luns[lun].read_block(lba, &mut block) {
                    Ok(()) => {
                        if self.transport.try_write_data_all(&block).is_ok() {
                            self.exec = Execution::Read { lba: lba + 1, remaining_blocks: remaining_blocks - 1 };
                        }
                    }
                    Err(err) => {
                        self.exec = Execution::None;
                        self.sense[lun].set_from_lun_error(err, false);
                        self.transport.set_status(CommandStatus::Failed);
                    }
                }
            }
            Execution::Write { lba, remaining_blocks, filled, mut block } => {
                if remaining_blocks == 0 {
                    self.exec = Execution::None;
                    match self.luns[lun].write_complete() {
                        // direction was already validated against `Out` at dispatch; this isn't
                        // a no-data command, its data stage has simply just finished.
                        Ok(()) => self.transport.set_status(CommandStatus::Passed),
                        Err(err) => {
                            self.sense[lun].set_from_lun_error(err, true);
                            self.transport.set_status(CommandStatus::Failed);
                        }
                    }
                    return;
                }
                if !matches!(direction, HostDirection::Out) {
                    self.exec = Execution::None;
                    self.transport.set_status(CommandStatus::PhaseError);
                    return;
                }
                match self.transport.read_data(&mut block[filled as usize..]) {
                    Ok(n) => {
                        let filled = filled + n as u16;
                        if filled as u32 >= BLOCK_SIZE {
                            match self.luns[lun].write_block(lba, &block) {
                                Ok(()) => {
                                    self.exec = Execution::Write {
                                        lba: lba + 1,
                                        remaining_blocks: remaining_blocks - 1,
                                        filled: 0,
                                        block: [0u8; BLOCK_SIZE as usize],
                                    };
                                }
                                Err(err) => {
                                    self.exec = Execution::None;
                                    self.sense[lun].set_from_lun_error(err, true);
                                    self.transport.set_status(CommandStatus::Failed);
                                }
                            }
                        } else if h == 0 {
                            // host has nothing more to send but a block is still incomplete
                            // (case Ho<Do): abort with a phase error.
                            self.exec = Execution::None;
                            self.transport.set_status(CommandStatus::PhaseError);
                        } else {
                            self.exec = Execution::Write { lba, remaining_blocks, filled, block };
                        }
                    }
                    Err(_) => {
                        self.exec = Execution::Write { lba, remaining_blocks, filled, block };
                    }
                }
            }
            Execution::ReadBuffer { offset, remaining } => {
                if remaining == 0 {
                    // READ_BUFFER's data stage has simply just finished, not a no-data command.
                    self.exec = Execution::None;
                    self.transport.set_status(CommandStatus::Passed);
                    return;
                }
                let chunk = remaining.min(64) as usize;
                let mut scratch = [0u8; 64];
                match self.luns[lun].read_buffer(offset, &mut scratch[..chunk]) {
                    Ok(()) => {
                        if self.transport.try_write_data_all(&scratch[..chunk]).is_ok() {
                            self.exec = Execution::ReadBuffer {
                                offset: offset + chunk as u32,
                                remaining: remaining - chunk as u32,
                            };
                        }
                    }
                    Err(err) => {
                        self.exec = Execution::None;
                        self.sense[lun].set_from_lun_error(err, false);
                        self.transport.set_status(CommandStatus::Failed);
                    }
                }
            }
            Execution::WriteBuffer { offset, remaining } => {
                if remaining == 0 {
                    // WRITE_BUFFER's data stage has simply just finished, not a no-data command.
                    self.exec = Execution::None;
                    self.transport.set_status(CommandStatus::Passed);
                    return;
                }
                let mut scratch = [0u8; 64];
                let chunk = (remaining as usize).min(scratch.len());
                match self.transport.read_data(&mut scratch[..chunk]) {
                    Ok(n) if n > 0 => match self.luns[lun].write_buffer(offset, &scratch[..n]) {
                        Ok(()) => {
                            self.exec =
                                Execution::WriteBuffer { offset: offset + n as u32, remaining: remaining - n as u32 };
                        }
                        Err(err) => {
                            self.exec = Execution::None;
                            self.sense[lun].set_from_lun_error(err, true);
                            self.transport.set_status(CommandStatus::Failed);
                        }
                    },
                    Ok(_) if h == 0 => {
                        self.exec = Execution::None;
                        self.transport.set_status(CommandStatus::PhaseError);
                    }
                    _ => {}
                }
            }
            Execution::None => {}
        }
    }
}

impl<Bus, T, L, const N: usize> UsbClass<Bus> for Scsi<T, L, N>
where
    Bus: UsbBus,
    T: Transport<Bus = Bus>,
{
    fn get_configuration_descriptors(
        &self,
        writer: &mut DescriptorWriter,
    ) -> usb_device::Result<()> {
        writer.iad(
            self.interface,
            1,
            CLASS_MASS_STORAGE,
            SUBCLASS_SCSI,
            T::PROTO,
            None,
        )?;
        writer.interface(self.interface, CLASS_MASS_STORAGE, SUBCLASS_SCSI, T::PROTO)?;

        self.transport.get_endpoint_descriptors(writer)?;

        Ok(())
    }

    fn reset(&mut self) {
        self.transport.reset()
    }

    fn control_in(&mut self, xfer: ControlIn<Bus>) {
        self.transport.control_in(xfer)
    }

    fn control_out(&mut self, xfer: usb_device::class::ControlOut<Bus>) {
        self.transport.control_out(xfer)
    }
}
