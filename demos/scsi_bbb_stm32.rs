#![no_std]
#![no_main]

//! Reference embedding on the STM32F411 Discovery-style board, wiring a single [Lun] backed by
//! on-chip RAM into [Scsi]. Trimmed from the upstream crate's own STM32 example: the command
//! dispatch it hand-rolled per-command now lives inside [Scsi] itself, so this file only has to
//! implement the data plane.
//!
//! Not built by CI (no `thumbv7em` target here); illustrative only.

use core::cell::RefCell;
use core::mem::MaybeUninit;
use core::ptr::addr_of_mut;
use critical_section::Mutex;
use defmt_rtt as _;
use stm32f4xx_hal::gpio::alt::otg_fs::{Dm, Dp};
use stm32f4xx_hal::gpio::GpioExt;
use stm32f4xx_hal::otg_fs::{UsbBus, USB};
use stm32f4xx_hal::pac;
use stm32f4xx_hal::prelude::*;
use stm32f4xx_hal::rcc::RccExt;
use usb_device::prelude::*;
use usbd_storage::lun::{Lun, LunError, LunState, BLOCK_SIZE};
use usbd_storage::subclass::scsi::Scsi;

static mut USB_EP_MEMORY: [u32; 1024] = [0u32; 1024];
/// Not necessarily `'static`. May reside in some special memory location
static mut USB_TRANSPORT_BUF: MaybeUninit<[u8; 512]> = MaybeUninit::uninit();

const BLOCKS: u32 = 200;
const USB_PACKET_SIZE: u16 = 64; // 8,16,32,64

static STORAGE: Mutex<RefCell<[u8; (BLOCKS * BLOCK_SIZE) as usize]>> =
    Mutex::new(RefCell::new([0u8; (BLOCK_SIZE * BLOCKS) as usize]));

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    defmt::error!("{}", defmt::Display2Format(info));
    loop {}
}

/// A single LUN backed by the board's RAM, behind a `critical_section::Mutex` the way the
/// firmware keeps its other shared peripheral state.
struct RamLun;

impl Lun for RamLun {
    fn state(&self) -> LunState {
        LunState::Ready
    }

    fn capacity_blocks(&self) -> u32 {
        BLOCKS
    }

    fn writable(&self) -> bool {
        true
    }

    fn read_block(&mut self, lba: u32, buf: &mut [u8; BLOCK_SIZE as usize]) -> Result<(), LunError> {
        if lba >= BLOCKS {
            return Err(LunError::OutOfRange);
        }
        critical_section::with(|cs| {
            let start = (lba * BLOCK_SIZE) as usize;
            buf.copy_from_slice(&STORAGE.borrow_ref(cs)[start..start + BLOCK_SIZE as usize]);
        });
        Ok(())
    }

    fn write_block(&mut self, lba: u32, buf: &[u8; BLOCK_SIZE as usize]) -> Result<(), LunError> {
        if lba >= BLOCKS {
            return Err(LunError::OutOfRange);
        }
        critical_section::with(|cs| {
            let start = (lba * BLOCK_SIZE) as usize;
            STORAGE.borrow_ref_mut(cs)[start..start + BLOCK_SIZE as usize].copy_from_slice(buf);
        });
        Ok(())
    }
}

#[cortex_m_rt::entry]
fn main() -> ! {
    defmt::info!("Started...");

    // take core peripherals
    let cp = cortex_m::Peripherals::take().unwrap();
    // take device-specific peripherals
    let dp = pac::Peripherals::take().unwrap();

    // setup clocks
    let rcc = dp.RCC.constrain();
    let clocks = rcc
        .cfgr
        .use_hse(25.MHz()) // 25Mhz HSE is present on the board
        .sysclk(48.MHz())
        .require_pll48clk()
        .freeze();

    // setup GPIO
    let gpioa = dp.GPIOA.split();
    let gpioc = dp.GPIOC.split();
    // USB
    let mut pin_usb_dm = gpioa.pa11.into_push_pull_output();
    let mut pin_usb_dp = gpioa.pa12.into_push_pull_output();
    // indicator LED
    let mut led = gpioc.pc13.into_push_pull_output();

    // force D+ for 100ms
    // this forces the host to enumerate devices
    pin_usb_dm.set_low();
    pin_usb_dp.set_low();
    cp.SYST.delay(&clocks).delay_ms(100u32);

    let usb_peripheral = USB {
        usb_global: dp.OTG_FS_GLOBAL,
        usb_device: dp.OTG_FS_DEVICE,
        usb_pwrclk: dp.OTG_FS_PWRCLK,
        pin_dm: Dm::from(pin_usb_dm.into_alternate()),
        pin_dp: Dp::from(pin_usb_dp.into_alternate()),
        hclk: clocks.hclk(),
    };

    let usb_bus = UsbBus::new(usb_peripheral, unsafe { &mut *addr_of_mut!(USB_EP_MEMORY) });
    let mut scsi = Scsi::new(
        &usb_bus,
        USB_PACKET_SIZE,
        unsafe {
            #[allow(static_mut_refs)]
            USB_TRANSPORT_BUF.assume_init_mut().as_mut_slice()
        },
        [RamLun],
        "Foo Bar",
        "STM32 USB Flash",
        "1.23",
        "FOOBAR1234567890ABCD",
        [0u8; 8],
    )
    .unwrap();

    let mut usb_device = UsbDeviceBuilder::new(&usb_bus, UsbVidPid(0xabcd, 0xabcd))
        .strings(&[StringDescriptors::new(LangID::EN)
            .manufacturer("Foo Bar")
            .product("STM32 USB Flash")
            .serial_number("FOOBAR1234567890ABCDEF")])
        .unwrap()
        .self_powered(false)
        .build();

    loop {
        led.set_high();

        if !usb_device.poll(&mut [&mut scsi]) {
            continue;
        }

        led.set_low();
        if let Err(err) = scsi.poll() {
            defmt::error!("{}", err);
        }
    }
}
