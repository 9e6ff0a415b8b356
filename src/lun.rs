//! Logical Unit abstraction
//!
//! A [Lun] is the capability-set the embedding application plugs into [Scsi] in place of the
//! source firmware's table of read/write/write-complete/write-preload function pointers.
//!
//! [Scsi]: crate::subclass::scsi::Scsi

use bitflags::bitflags;

/// Block size assumed for every LUN (spec. SBC-3, 512-byte sectors)
pub const BLOCK_SIZE: u32 = 512;

/// Medium presence of a single logical unit
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LunState {
    /// No medium behind this LUN; `TEST_UNIT_READY` and most data commands fail
    #[default]
    NotPresent,
    /// Medium present and addressable
    Ready,
}

bitflags! {
    /// Gates which diagnostic/vendor operations a LUN accepts.
    ///
    /// `READ_BUFFER`/`WRITE_BUFFER` (spec. §4.3) are optional and vendor-sensitive; a LUN opts
    /// into each region individually.
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct LunPermissions: u8 {
        /// `READ_BUFFER`/`WRITE_BUFFER` may target internal RAM
        const BUFFER_RAM    = 0b0000_0001;
        /// `READ_BUFFER`/`WRITE_BUFFER` may target the echo buffer
        const BUFFER_ECHO   = 0b0000_0010;
        /// `READ_BUFFER`/`WRITE_BUFFER` may target microcode flash
        const BUFFER_MICROCODE = 0b0000_0100;
        /// Vendor-specific CDBs (group 6/7) are delegated to [Lun::vendor_command]
        ///
        /// [Lun::vendor_command]: crate::lun::Lun::vendor_command
        const VENDOR_COMMAND = 0b0000_1000;
    }
}

/// Error surfaced by a [Lun] data-plane operation
///
/// Mapped to SCSI sense by the caller (spec. §7): [LunError::Hardware] / [LunError::WriteFailed]
/// become MEDIUM_ERROR, [LunError::OutOfRange] becomes ILLEGAL_REQUEST.
#[derive(Debug, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LunError {
    /// `lba` is outside `0..capacity_blocks`
    OutOfRange,
    /// The underlying medium failed to service a read
    Hardware,
    /// The underlying medium failed to service a write
    WriteFailed,
    /// The operation is not permitted (e.g. write to a read-only LUN)
    NotPermitted,
}

/// A single SCSI logical unit backing an [Scsi] instance.
///
/// The data-plane (block read/write) and any vendor extension are implemented by the embedding
/// application; every other SCSI command in spec.md §4.3 (`INQUIRY`, `MODE_SENSE`,
/// `REQUEST_SENSE`, `READ_CAPACITY`, ...) is answered by [Scsi] itself using the metadata this
/// trait exposes.
///
/// [Scsi]: crate::subclass::scsi::Scsi
pub trait Lun {
    /// Current medium presence
    fn state(&self) -> LunState;

    /// Capacity in 512-byte blocks. Only meaningful while `state() == LunState::Ready`.
    fn capacity_blocks(&self) -> u32;

    /// Whether `WRITE(10)` is accepted
    fn writable(&self) -> bool;

    /// Which diagnostic/vendor operations this LUN accepts
    fn permissions(&self) -> LunPermissions {
        LunPermissions::empty()
    }

    /// Reads exactly one 512-byte block at `lba` into `buf`
    fn read_block(&mut self, lba: u32, buf: &mut [u8; BLOCK_SIZE as usize]) -> Result<(), LunError>;

    /// Writes exactly one 512-byte block at `lba` from `buf`
    fn write_block(&mut self, lba: u32, buf: &[u8; BLOCK_SIZE as usize]) -> Result<(), LunError>;

    /// Called once before the first block of a `WRITE(10)` transfer
    fn write_preload(&mut self, _lba: u32) -> Result<(), LunError> {
        Ok(())
    }

    /// Called once after the last block of a `WRITE(10)` transfer has been written
    fn write_complete(&mut self) -> Result<(), LunError> {
        Ok(())
    }

    /// Reads from a vendor-defined diagnostic region (`READ_BUFFER`), gated by [permissions]
    ///
    /// [permissions]: Lun::permissions
    fn read_buffer(&mut self, _offset: u32, _buf: &mut [u8]) -> Result<(), LunError> {
        Err(LunError::NotPermitted)
    }

    /// Writes to a vendor-defined diagnostic region (`WRITE_BUFFER`), gated by [permissions]
    ///
    /// [permissions]: Lun::permissions
    fn write_buffer(&mut self, _offset: u32, _buf: &[u8]) -> Result<(), LunError> {
        Err(LunError::NotPermitted)
    }

    /// Handles a vendor-specific CDB (group 6 or 7). `None` means "not implemented", which
    /// causes [Scsi] to answer with SCSI return code -1 (spec. §4.3).
    ///
    /// [Scsi]: crate::subclass::scsi::Scsi
    fn vendor_command(&mut self, _cdb: &[u8]) -> Option<Result<(), LunError>> {
        None
    }
}
