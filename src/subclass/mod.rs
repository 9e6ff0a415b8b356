//! USB Mass Storage subclasses

#[cfg(feature = "scsi")]
pub mod scsi;
