//! Bit-exact USB descriptor constants (spec. §6.1)
//!
//! `usb-device` assembles the actual descriptor bytes (device, configuration, string, device
//! qualifier) from a [UsbDeviceBuilder] configuration; this module is the single place that
//! configuration is pinned to the values a compliance host expects, plus the SCSI-visible VPD
//! byte layouts (§6.4) that this crate itself serializes.
//!
//! [UsbDeviceBuilder]: usb_device::device::UsbDeviceBuilder

use usb_device::bus::{UsbBus, UsbBusAllocator};
use usb_device::device::{StringDescriptors, UsbDevice, UsbDeviceBuilder, UsbVidPid};

/// idVendor (spec. §6.1)
pub const VENDOR_ID: u16 = 0x3608;
/// idProduct (spec. §6.1)
pub const PRODUCT_ID: u16 = 0xC720;
/// bcdDevice, BCD (spec. §6.1)
pub const DEVICE_RELEASE: u16 = 0x0101;
/// bMaxPower, in mA (spec. §6.1: 0xFA * 2mA)
pub const MAX_POWER_MA: usize = 500;

/// Builds a [UsbDeviceBuilder] preconfigured to the bit-exact device descriptor fields of
/// spec. §6.1 (class/subclass/protocol 0/0/0 — defined per-interface; self-powered = false;
/// bcdDevice = 0x0101). The caller still supplies manufacturer/product/serial strings and calls
/// `.build()`.
pub fn device_builder<'a, B: UsbBus>(
    alloc: &'a UsbBusAllocator<B>,
    manufacturer: &'a str,
    product: &'a str,
) -> UsbDeviceBuilder<'a, B> {
    UsbDeviceBuilder::new(alloc, UsbVidPid(VENDOR_ID, PRODUCT_ID))
        .strings(&[StringDescriptors::new(usb_device::descriptor::lang_id::LangID::EN_US)
            .manufacturer(manufacturer)
            .product(product)])
        .expect("single language string block is always accepted")
        .device_release(DEVICE_RELEASE)
        .self_powered(false)
        .max_power(MAX_POWER_MA)
        .expect("500mA is within the 0-500mA range accepted by usb-device")
}

/// Convenience: build and finish the [UsbDevice] in one call.
pub fn build_usb_device<'a, B: UsbBus>(
    alloc: &'a UsbBusAllocator<B>,
    manufacturer: &'a str,
    product: &'a str,
) -> UsbDevice<'a, B> {
    device_builder(alloc, manufacturer, product).build()
}

/// Byte length of the standard `INQUIRY` response (spec. §6.4)
pub const INQUIRY_STANDARD_LEN: usize = 36;

/// Assembles the standard (EVPD=0) `INQUIRY` response (SPC-4 §6.6.2) into `dst`, which must be
/// at least [INQUIRY_STANDARD_LEN] bytes. `vendor`/`product`/`revision` are truncated/space-padded
/// to 8/16/4 ASCII bytes as SPC-4 requires.
pub fn inquiry_standard(dst: &mut [u8; INQUIRY_STANDARD_LEN], removable: bool, vendor: &str, product: &str, revision: &str) {
    dst.fill(0);
    dst[0] = 0x00; // peripheral qualifier 0, peripheral device type 0 (direct-access block device)
    dst[1] = if removable { 0x80 } else { 0x00 };
    dst[2] = 0x04; // SPC-2 compliant response
    dst[3] = 0x02; // response data format 2, no NormACA/HiSup
    dst[4] = (INQUIRY_STANDARD_LEN - 5) as u8; // additional length
    pad_ascii(&mut dst[8..16], vendor);
    pad_ascii(&mut dst[16..32], product);
    pad_ascii(&mut dst[32..36], revision);
}

fn pad_ascii(dst: &mut [u8], src: &str) {
    dst.fill(b' ');
    let bytes = src.as_bytes();
    let n = bytes.len().min(dst.len());
    dst[..n].copy_from_slice(&bytes[..n]);
}

/// VPD page 0x00 (Supported VPD Pages) — this core supports 0x00, 0x80, 0x83 (spec. §4.3)
pub fn vpd_supported_pages(dst: &mut [u8]) -> usize {
    const PAGES: [u8; 3] = [0x00, 0x80, 0x83];
    dst[0] = 0x00;
    dst[1] = 0x00; // page code 0x00
    dst[2] = 0x00;
    dst[3] = PAGES.len() as u8;
    dst[4..4 + PAGES.len()].copy_from_slice(&PAGES);
    4 + PAGES.len()
}

/// VPD page 0x80 (Unit Serial Number)
pub fn vpd_serial_number(dst: &mut [u8], serial: &str) -> usize {
    let bytes = serial.as_bytes();
    let n = bytes.len().min(dst.len().saturating_sub(4));
    dst[0] = 0x00;
    dst[1] = 0x80;
    dst[2] = 0x00;
    dst[3] = n as u8;
    dst[4..4 + n].copy_from_slice(&bytes[..n]);
    4 + n
}

/// VPD page 0x83 (Device Identification): one vendor-specific-id descriptor (T10 vendor ID +
/// EUI-64), per spec. §6.4.
pub fn vpd_device_identification(dst: &mut [u8], vendor: &str, eui64: [u8; 8]) -> usize {
    let mut vendor_id = [b' '; 8];
    pad_ascii(&mut vendor_id, vendor);

    const IDENTIFIER_LEN: u8 = 8 + 8; // T10 vendor id (8) + EUI-64 (8)
    const PAGE_LEN: u16 = 4 + IDENTIFIER_LEN as u16; // descriptor header (4) + identifier

    dst[0] = 0x00;
    dst[1] = 0x83;
    dst[2..4].copy_from_slice(&PAGE_LEN.to_be_bytes());

    let desc = &mut dst[4..4 + 4 + IDENTIFIER_LEN as usize];
    desc[0] = 0x02; // code set: binary
    desc[1] = 0x01; // association: logical unit, identifier type: T10 vendor ID
    desc[2] = 0x00;
    desc[3] = IDENTIFIER_LEN;
    desc[4..12].copy_from_slice(&vendor_id);
    desc[12..20].copy_from_slice(&eui64);

    4 + desc.len()
}
