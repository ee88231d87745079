//! USB HID composite device - boot keyboard + vendor comm channel.
//!
//! Initialises the Embassy USB stack on the ESP32-S3 OTG peripheral and
//! exposes two HID interfaces:
//!
//! - Interface 0: Keyboard (boot protocol, 8-byte reports)
//! - Interface 1: Comm (vendor page, report ID 3, 48-byte reports both
//!   ways)
//!
//! Host tooling looks the comm channel up by interface number, so the
//! keyboard interface must be registered first.

use defmt::{info, warn};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Receiver, Sender};
use embassy_usb::class::hid::{
    Config as HidConfig, HidReader, HidReaderWriter, HidWriter, State,
};
use embassy_usb::{Builder, Config, UsbDevice};
use esp_hal::otg_fs::asynch::{Config as DriverConfig, Driver};
use esp_hal::otg_fs::Usb;
use esp_hal::peripherals;
use keylink::config::{self, FRAME_QUEUE_DEPTH, HOST_REPORT_SIZE};
use keylink::host::{CommandDispatcher, FrameReassembler, RawFrame};
use keylink::ConfigStore;
use static_cell::StaticCell;

/// Report ID of the comm channel; prefixed to every comm report on the wire.
pub const COMM_REPORT_ID: u8 = 3;

/// Comm report on the wire: report ID + frame.
const COMM_PACKET_LEN: usize = 1 + HOST_REPORT_SIZE;

type UsbDriver = Driver<'static>;

const KEYBOARD_REPORT_DESCRIPTOR: &[u8] = &[
    0x05, 0x01, // Usage Page (Generic Desktop)
    0x09, 0x06, // Usage (Keyboard)
    0xA1, 0x01, // Collection (Application)
    0x05, 0x07, //   Usage Page (Keyboard/Keypad)
    0x19, 0xE0, //   Usage Minimum (Left Control)
    0x29, 0xE7, //   Usage Maximum (Right GUI)
    0x15, 0x00, //   Logical Minimum (0)
    0x25, 0x01, //   Logical Maximum (1)
    0x75, 0x01, //   Report Size (1)
    0x95, 0x08, //   Report Count (8)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    0x95, 0x01, //   Report Count (1)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x01, //   Input (Constant) - reserved byte
    0x05, 0x07, //   Usage Page (Keyboard/Keypad)
    0x19, 0x00, //   Usage Minimum (0)
    0x29, 0xFF, //   Usage Maximum (255)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, // Logical Maximum (255)
    0x95, 0x06, //   Report Count (6)
    0x75, 0x08, //   Report Size (8)
    0x81, 0x00, //   Input (Data, Array)
    0xC0, // End Collection
];

const COMM_REPORT_DESCRIPTOR: &[u8] = &[
    0x06, 0xFF, 0xFF, // Usage Page (Vendor Defined)
    0x09, 0x01, // Usage (Vendor Defined)
    0xA1, 0x01, // Collection (Application)
    0x85, COMM_REPORT_ID, //   Report ID
    0x09, 0x02, //   Usage (Vendor Defined) - input
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, //   Logical Maximum (255)
    0x75, 0x08, //   Report Size (8)
    0x95, HOST_REPORT_SIZE as u8, //   Report Count
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    0x09, 0x03, //   Usage (Vendor Defined) - output
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, //   Logical Maximum (255)
    0x75, 0x08, //   Report Size (8)
    0x95, HOST_REPORT_SIZE as u8, //   Report Count
    0x91, 0x02, //   Output (Data, Variable, Absolute)
    0xC0, // End Collection
];

static EP_OUT_BUFFER: StaticCell<[u8; 1024]> = StaticCell::new();
static KB_STATE: StaticCell<State> = StaticCell::new();
static COMM_STATE: StaticCell<State> = StaticCell::new();
static USB_CONFIG_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_BOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_MSOS_DESC: StaticCell<[u8; 256]> = StaticCell::new();
static USB_CTRL_BUF: StaticCell<[u8; 128]> = StaticCell::new();

/// Build result containing the USB device runner and the HID endpoints.
pub struct UsbHidDevice {
    pub device: UsbDevice<'static, UsbDriver>,
    pub keyboard_writer: HidWriter<'static, UsbDriver, 8>,
    pub comm_reader: HidReader<'static, UsbDriver, 64>,
    pub comm_writer: HidWriter<'static, UsbDriver, 64>,
}

/// Initialise the USB stack and create the composite HID device.
///
/// Must be called exactly once.  All static buffers are consumed here.
pub fn init(
    usb0: peripherals::USB0,
    dp: peripherals::GPIO20,
    dm: peripherals::GPIO19,
) -> UsbHidDevice {
    let usb = Usb::new(usb0, dp, dm);
    let ep_out_buffer = EP_OUT_BUFFER.init([0u8; 1024]);
    let driver = Driver::new(usb, ep_out_buffer, DriverConfig::default());

    let mut usb_config = Config::new(config::USB_VID, config::USB_PID);
    usb_config.manufacturer = Some(config::USB_MANUFACTURER);
    usb_config.product = Some(config::USB_PRODUCT);
    usb_config.serial_number = Some(config::USB_SERIAL_NUMBER);
    usb_config.max_power = 100; // mA
    usb_config.max_packet_size_0 = 64;

    let mut builder = Builder::new(
        driver,
        usb_config,
        USB_CONFIG_DESC.init([0u8; 256]),
        USB_BOS_DESC.init([0u8; 256]),
        USB_MSOS_DESC.init([0u8; 256]),
        USB_CTRL_BUF.init([0u8; 128]),
    );

    let kb_config = HidConfig {
        report_descriptor: KEYBOARD_REPORT_DESCRIPTOR,
        request_handler: None,
        poll_ms: config::USB_HID_POLL_MS,
        max_packet_size: 8,
    };
    let keyboard_writer = HidWriter::new(&mut builder, KB_STATE.init(State::new()), kb_config);

    let comm_config = HidConfig {
        report_descriptor: COMM_REPORT_DESCRIPTOR,
        request_handler: None,
        poll_ms: config::USB_HID_POLL_MS,
        max_packet_size: 64,
    };
    let comm = HidReaderWriter::<_, 64, 64>::new(
        &mut builder,
        COMM_STATE.init(State::new()),
        comm_config,
    );
    let (comm_reader, comm_writer) = comm.split();

    let device = builder.build();

    info!("USB HID composite device initialised (keyboard + comm)");

    UsbHidDevice {
        device,
        keyboard_writer,
        comm_reader,
        comm_writer,
    }
}

/// Run the USB device stack - must be spawned as a dedicated Embassy task.
pub async fn run_usb_device(mut device: UsbDevice<'static, UsbDriver>) -> ! {
    info!("USB device task started");
    device.run().await
}

/// Report every key released once the host has configured the keyboard.
pub async fn keyboard_idle(mut keyboard: HidWriter<'static, UsbDriver, 8>) {
    keyboard.ready().await;
    if keyboard.write(&[0u8; 8]).await.is_err() {
        warn!("USB keyboard write failed");
    }
}

/// Comm receive path. Only enqueues; a full queue drops the report.
pub async fn comm_reader_task(
    mut reader: HidReader<'static, UsbDriver, 64>,
    frames: &Sender<'static, CriticalSectionRawMutex, RawFrame, FRAME_QUEUE_DEPTH>,
) -> ! {
    info!("Comm reader task started");

    let mut buf = [0u8; 64];
    loop {
        let n = match reader.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                warn!("Comm read failed: {}", e);
                continue;
            }
        };

        // Report ID first, then the frame.
        let Some(frame) = buf[..n]
            .strip_prefix(&[COMM_REPORT_ID])
            .and_then(|f| RawFrame::try_from(f).ok())
        else {
            warn!("Unexpected comm report ({} bytes)", n);
            continue;
        };

        if frames.try_send(frame).is_err() {
            warn!("Comm frame queue full - dropping report");
        }
    }
}

/// Frame task - reassembles comm frames, dispatches complete messages and
/// writes the reply report.
pub async fn comm_frame_task<S: ConfigStore>(
    mut writer: HidWriter<'static, UsbDriver, 64>,
    frames: &Receiver<'static, CriticalSectionRawMutex, RawFrame, FRAME_QUEUE_DEPTH>,
    reassembler: &'static mut FrameReassembler,
    mut dispatcher: CommandDispatcher<S>,
) -> ! {
    info!("Comm frame task started");

    let mut packet = [0u8; COMM_PACKET_LEN];
    packet[0] = COMM_REPORT_ID;

    loop {
        let raw = frames.receive().await;
        let outcome = reassembler.process(&raw, &mut dispatcher).await;

        if let Some(reply) = outcome.reply() {
            packet[1..].copy_from_slice(&reply);
            if let Err(e) = writer.write(&packet).await {
                warn!("Comm write failed: {}", e);
            }
        }
    }
}
