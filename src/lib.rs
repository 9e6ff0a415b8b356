//! A USB Mass Storage (BOT + SCSI) class for [usb-device]
//!
//! # Subclasses:
//! * [SCSI] - SCSI device, answered internally against the [Lun]s it owns
//! * [Vendor Specific subclass] - implement [Transport] trait
//!
//! # Transports:
//! * [Bulk Only]
//! * [Vendor Specific Transport]
//!
//! # Features
//! | Feature | Description                           |
//! | ------- |---------------------------------------|
//! | `bbb` | Include Bulk Only Transport           |
//! | `scsi` | Include SCSI subclass                 |
//! | `defmt` | Enable logging via [defmt](https://crates.io/crates/defmt) crate |
//! | `extended_addressing` | Accept 16-byte CDBs / 64-bit LBAs |
//!
//! [usb-device]: https://crates.io/crates/usb-device
//! [SCSI]: crate::subclass::scsi
//! [Lun]: crate::lun::Lun
//! [Bulk Only]: crate::transport::bbb
//! [Vendor Specific subclass]: crate::subclass
//! [Vendor Specific Transport]: crate::transport
//! [Transport]: crate::transport::Transport

#![no_std]

#[cfg(feature = "bbb")]
pub(crate) mod buffer;
pub mod descriptors;
pub(crate) mod fmt;
pub mod lun;
pub mod sense;
pub mod subclass;
pub mod transport;

/// USB Mass Storage Class code
pub const CLASS_MASS_STORAGE: u8 = 0x08;
