//! keylink firmware - ESP32-S3 keyboard half with an ESP-NOW peer link
//! and a USB HID configuration channel.
//!
//! Boot sequence:
//!   1. Clocks, heap, Embassy time driver.
//!   2. Flash storage: load the peer record, write the hello entry.
//!   3. ESP-NOW: driver, transport and link state machine; rejoin the
//!      recorded peer if there is one.
//!   4. USB composite device (keyboard + comm).
//!   5. Button tasks.
//!
//! Tasks only talk to each other through the channels defined here.

#![no_std]
#![no_main]

mod radio;
mod storage;
mod ui;
mod usb;

use defmt::{info, unwrap, warn};
use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::Mutex;
use embassy_time::Instant;
use embassy_usb::class::hid::{HidReader, HidWriter};
use embassy_usb::UsbDevice;
use esp_backtrace as _;
use esp_hal::clock::CpuClock;
use esp_hal::efuse::Efuse;
use esp_hal::gpio::{Input, Pull};
use esp_hal::otg_fs::asynch::Driver;
use esp_hal::rng::Rng;
use esp_hal::timer::systimer::SystemTimer;
use esp_hal::timer::timg::TimerGroup;
use esp_println as _;
use esp_storage::FlashStorage;
use esp_wifi::esp_now::{EspNow, EspNowReceiver};
use esp_wifi::EspWifiController;
use keylink::config::{self, LINK_EVENT_QUEUE_DEPTH, RADIO_QUEUE_DEPTH};
use keylink::host::{bootstrap, CommandDispatcher, FrameChannel, FrameReassembler};
use keylink::link::RadioTransport;
use keylink::{LinkEvent, LinkStateMachine, PeerAddress};
use radio::esp_now::EspNowDriver;
use radio::{Link, LinkCommand, RadioFrame};
use static_cell::{ConstStaticCell, StaticCell};
use storage::{FlashConfigStore, Storage};

type CS = CriticalSectionRawMutex;

/// Datagrams from the radio rx task to the link task.
static RADIO_FRAMES: Channel<CS, RadioFrame, RADIO_QUEUE_DEPTH> = Channel::new();

/// Button presses to the link task.
static LINK_COMMANDS: Channel<CS, LinkCommand, 4> = Channel::new();

/// Link state changes and peer messages.
static LINK_EVENTS: Channel<CS, LinkEvent, LINK_EVENT_QUEUE_DEPTH> = Channel::new();

/// Raw comm reports from the USB reader to the frame task.
static HOST_FRAMES: FrameChannel<CS> = FrameChannel::new();

static WIFI_CONTROLLER: StaticCell<EspWifiController<'static>> = StaticCell::new();
static STORAGE: StaticCell<Mutex<CS, Storage>> = StaticCell::new();
static REASSEMBLER: ConstStaticCell<FrameReassembler> =
    ConstStaticCell::new(FrameReassembler::new());

#[esp_hal_embassy::main]
async fn main(spawner: Spawner) {
    let peripherals = esp_hal::init(esp_hal::Config::default().with_cpu_clock(CpuClock::max()));
    esp_alloc::heap_allocator!(72 * 1024);

    let systimer = SystemTimer::new(peripherals.SYSTIMER);
    esp_hal_embassy::init(systimer.alarm0);

    info!("keylink starting");

    // - Storage ----------------------------------------
    let storage = &*STORAGE.init(Mutex::new(Storage::new(FlashStorage::new())));
    let peer = storage.lock().await.load_peer().await;

    let mut config_store = FlashConfigStore::new(storage);
    if let Err(e) = bootstrap(&mut config_store).await {
        warn!("Bootstrap entry not written: {}", e);
    }

    // - ESP-NOW link -----------------------------------
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let wifi = &*WIFI_CONTROLLER.init(unwrap!(esp_wifi::init(
        timg0.timer0,
        Rng::new(peripherals.RNG),
        peripherals.RADIO_CLK,
    )));
    let esp_now = unwrap!(EspNow::new(wifi, peripherals.WIFI));
    let (manager, sender, receiver) = esp_now.split();
    let driver = unwrap!(EspNowDriver::new(manager, sender));

    let own = PeerAddress::new(Efuse::read_base_mac_address());
    info!("Own address {}", own);

    let transport = RadioTransport::new(driver, own, config::LINK_PSK);
    let mut link = LinkStateMachine::new(transport, LINK_EVENTS.sender());

    if let Some(peer) = peer {
        let rejoin = async {
            link.restore_peer(peer)?;
            let now = Instant::now().as_micros();
            link.start_rejoin(now, config::BOOT_REJOIN_TIMEOUT_MS).await
        };
        if let Err(e) = rejoin.await {
            warn!("Boot rejoin of {} failed: {}", peer, e);
        }
    }

    unwrap!(spawner.spawn(radio_rx(receiver)));
    unwrap!(spawner.spawn(link_task(link)));
    unwrap!(spawner.spawn(link_events(storage)));

    // - USB --------------------------------------------
    let usb = usb::hid_device::init(peripherals.USB0, peripherals.GPIO20, peripherals.GPIO19);
    unwrap!(spawner.spawn(usb_device(usb.device)));
    unwrap!(spawner.spawn(keyboard(usb.keyboard_writer)));
    unwrap!(spawner.spawn(comm_reader(usb.comm_reader)));
    unwrap!(spawner.spawn(comm_frames(
        usb.comm_writer,
        REASSEMBLER.take(),
        CommandDispatcher::new(config_store),
    )));

    // - Buttons ----------------------------------------
    let pair = Input::new(peripherals.GPIO0, Pull::Up);
    let action = Input::new(peripherals.GPIO14, Pull::Up);
    unwrap!(spawner.spawn(button(pair, LinkCommand::Pair)));
    unwrap!(spawner.spawn(button(action, LinkCommand::Action)));

    info!("All tasks spawned");
}

#[embassy_executor::task]
async fn radio_rx(receiver: EspNowReceiver<'static>) {
    radio::radio_rx_task(receiver, &RADIO_FRAMES.sender()).await
}

#[embassy_executor::task]
async fn link_task(link: Link) {
    radio::link_task(link, &RADIO_FRAMES.receiver(), &LINK_COMMANDS.receiver()).await
}

#[embassy_executor::task]
async fn link_events(storage: &'static Mutex<CS, Storage>) {
    radio::event_task(&LINK_EVENTS.receiver(), storage).await
}

#[embassy_executor::task]
async fn usb_device(device: UsbDevice<'static, Driver<'static>>) {
    usb::hid_device::run_usb_device(device).await
}

#[embassy_executor::task]
async fn keyboard(writer: HidWriter<'static, Driver<'static>, 8>) {
    usb::hid_device::keyboard_idle(writer).await
}

#[embassy_executor::task]
async fn comm_reader(reader: HidReader<'static, Driver<'static>, 64>) {
    usb::hid_device::comm_reader_task(reader, &HOST_FRAMES.sender()).await
}

#[embassy_executor::task]
async fn comm_frames(
    writer: HidWriter<'static, Driver<'static>, 64>,
    reassembler: &'static mut FrameReassembler,
    dispatcher: CommandDispatcher<FlashConfigStore>,
) {
    usb::hid_device::comm_frame_task(writer, &HOST_FRAMES.receiver(), reassembler, dispatcher).await
}

#[embassy_executor::task(pool_size = 2)]
async fn button(btn: Input<'static>, command: LinkCommand) {
    ui::buttons::button_task(btn, command, &LINK_COMMANDS.sender()).await
}
