//! SCSI sense data (spec. §3 "Sense data", §4.3 "Sense invariants")

use crate::lun::LunError;

/// Fixed-format sense response code for "information on current errors" (SPC-4 §4.5.3)
const RESPONSE_CODE_CURRENT: u8 = 0x70;

/// `ADDITIONAL SENSE LENGTH` used whenever sense is populated (spec. §4.3: "fixed at 10")
const ADDITIONAL_LENGTH: u8 = 10;

/// SCSI sense key (SPC-4 table 46, the subset this core raises)
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SenseKey {
    NoSense = 0x00,
    NotReady = 0x02,
    MediumError = 0x03,
    IllegalRequest = 0x05,
    DataProtect = 0x07,
}

/// Additional Sense Code / Qualifier pairs this core raises
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Asc {
    pub code: u8,
    pub qualifier: u8,
}

impl Asc {
    pub const NO_ADDITIONAL_INFO: Asc = Asc { code: 0x00, qualifier: 0x00 };
    pub const NO_INDEX: Asc = Asc { code: 0x01, qualifier: 0x00 };
    pub const LBA_OUT_OF_RANGE: Asc = Asc { code: 0x21, qualifier: 0x00 };
    pub const INVALID_FIELD_IN_CDB: Asc = Asc { code: 0x24, qualifier: 0x00 };
    pub const WRITE_PROTECTED: Asc = Asc { code: 0x27, qualifier: 0x00 };
    pub const MEDIUM_NOT_PRESENT: Asc = Asc { code: 0x3A, qualifier: 0x00 };
    pub const WRITE_ERROR: Asc = Asc { code: 0x0C, qualifier: 0x00 };
}

/// Sense data for one LUN (spec. §3 "Sense data")
///
/// Cleared to all-zero key/asc/ascq by [SenseData::clear] (called from `REQUEST_SENSE`, per the
/// sense invariant in spec. §4.3). Populated by [SenseData::set].
#[derive(Debug, Default, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SenseData {
    key: Option<SenseKey>,
    asc: Asc,
    information: u32,
}

impl SenseData {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn set(&mut self, key: SenseKey, asc: Asc) {
        self.key = Some(key);
        self.asc = asc;
        self.information = 0;
    }

    pub fn set_with_information(&mut self, key: SenseKey, asc: Asc, information: u32) {
        self.set(key, asc);
        self.information = information;
    }

    /// Maps a data-plane error to sense per spec. §7 ("fatal errors... surface as SCSI sense
    /// MEDIUM_ERROR... ASC WRITE_ERROR or NO_INDEX depending on operation")
    pub fn set_from_lun_error(&mut self, err: LunError, writing: bool) {
        match err {
            LunError::OutOfRange => self.set(SenseKey::IllegalRequest, Asc::LBA_OUT_OF_RANGE),
            LunError::Hardware => self.set(
                SenseKey::MediumError,
                if writing { Asc::WRITE_ERROR } else { Asc::NO_INDEX },
            ),
            LunError::WriteFailed => self.set(SenseKey::MediumError, Asc::WRITE_ERROR),
            LunError::NotPermitted => self.set(SenseKey::IllegalRequest, Asc::INVALID_FIELD_IN_CDB),
        }
    }

    /// Writes the fixed-format `REQUEST_SENSE` response (SPC-4 §4.5.3), truncated to `dst.len()`
    pub fn write_fixed(&self, dst: &mut [u8]) -> usize {
        let mut full = [0u8; 18];
        full[0] = RESPONSE_CODE_CURRENT;
        full[2] = self.key.map(|k| k as u8).unwrap_or(0) & 0x0F;
        full[3..7].copy_from_slice(&self.information.to_be_bytes());
        full[7] = ADDITIONAL_LENGTH;
        full[12] = self.asc.code;
        full[13] = self.asc.qualifier;

        let n = full.len().min(dst.len());
        dst[..n].copy_from_slice(&full[..n]);
        n
    }

    pub fn key(&self) -> Option<SenseKey> {
        self.key
    }

    pub fn is_clear(&self) -> bool {
        self.key.is_none() && self.asc == Asc::NO_ADDITIONAL_INFO
    }
}
