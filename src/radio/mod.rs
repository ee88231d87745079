//! Radio subsystem - the ESP-NOW link on target.
//!
//! Three tasks share the link:
//!
//! - **rx**: copies each received datagram into `RADIO_FRAMES`. It never
//!   touches the peer table or the state machine.
//! - **link**: owns the `LinkStateMachine`; feeds it frames, button
//!   commands and ticks at the state's poll interval. Sends are awaited,
//!   so a peer that never ACKs only delays this task.
//! - **events**: consumes `LINK_EVENTS`, persists the connected peer and
//!   logs application messages from the peer.

pub mod esp_now;

use crate::storage::Storage;
use defmt::{debug, info, warn};
use embassy_futures::select::{select3, Either3};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Receiver, Sender};
use embassy_sync::mutex::Mutex;
use embassy_time::{Duration, Instant, Timer};
use esp_now::EspNowDriver;
use esp_wifi::esp_now::EspNowReceiver;
use heapless::Vec;
use keylink::config::{
    LINK_EVENT_QUEUE_DEPTH, MAX_MESSAGE_LEN, PAIR_TIMEOUT_MS, RADIO_QUEUE_DEPTH, REJOIN_TIMEOUT_MS,
};
use keylink::{Error, LinkEvent, LinkState, LinkStateMachine, PeerAddress};

/// One datagram as received, before any protocol handling.
pub struct RadioFrame {
    pub src: PeerAddress,
    pub data: Vec<u8, MAX_MESSAGE_LEN>,
}

/// Requests from the buttons to the link task.
#[derive(Clone, Copy, PartialEq, Eq, defmt::Format)]
pub enum LinkCommand {
    /// Start a discovery window.
    Pair,
    /// Toggle on the peer when connected, otherwise try to rejoin it.
    Action,
}

pub type LinkEventSender = Sender<'static, CriticalSectionRawMutex, LinkEvent, LINK_EVENT_QUEUE_DEPTH>;

/// The firmware's link: ESP-NOW driver, events published to `LINK_EVENTS`.
pub type Link = LinkStateMachine<EspNowDriver, LinkEventSender>;

fn now_us() -> u64 {
    Instant::now().as_micros()
}

/// Receive path. Only enqueues; a full queue drops the frame.
pub async fn radio_rx_task(
    mut receiver: EspNowReceiver<'static>,
    frames: &Sender<'static, CriticalSectionRawMutex, RadioFrame, RADIO_QUEUE_DEPTH>,
) -> ! {
    info!("Radio rx task started");

    loop {
        let received = receiver.receive_async().await;
        let src = PeerAddress::new(received.info.src_address);

        let Ok(data) = Vec::from_slice(received.data()) else {
            debug!("Oversized datagram from {} ({} bytes)", src, received.data().len());
            continue;
        };
        if frames.try_send(RadioFrame { src, data }).is_err() {
            warn!("Radio queue full - dropping frame from {}", src);
        }
    }
}

/// Link task. Sole owner of the state machine and the peer table.
pub async fn link_task(
    mut link: Link,
    frames: &Receiver<'static, CriticalSectionRawMutex, RadioFrame, RADIO_QUEUE_DEPTH>,
    commands: &Receiver<'static, CriticalSectionRawMutex, LinkCommand, 4>,
) -> ! {
    info!("Link task started ({})", link.state());

    let mut next_tick = Instant::now() + Duration::from_millis(link.poll_interval_ms());

    loop {
        let before = link.state();

        match select3(frames.receive(), commands.receive(), Timer::at(next_tick)).await {
            Either3::First(frame) => link.handle_frame(frame.src, &frame.data, now_us()).await,
            Either3::Second(command) => run_command(&mut link, command).await,
            Either3::Third(()) => {
                link.tick(now_us()).await;
                next_tick = Instant::now() + Duration::from_millis(link.poll_interval_ms());
            }
        }

        if link.state() != before {
            next_tick = Instant::now() + Duration::from_millis(link.poll_interval_ms());
        }
    }
}

async fn run_command(link: &mut Link, command: LinkCommand) {
    info!("Link command: {}", command);

    let result = match command {
        LinkCommand::Pair => link.start_pairing(now_us(), PAIR_TIMEOUT_MS).await,
        LinkCommand::Action if link.state() == LinkState::Connected => link.send_toggle().await,
        LinkCommand::Action => link.start_rejoin(now_us(), REJOIN_TIMEOUT_MS).await,
    };

    match result {
        Ok(()) => {}
        Err(Error::NotFound) => info!("No paired peer - press PAIR first"),
        Err(e) => warn!("{} failed: {}", command, e),
    }
}

/// Event task. Persists the peer on every new connection.
pub async fn event_task(
    events: &Receiver<'static, CriticalSectionRawMutex, LinkEvent, LINK_EVENT_QUEUE_DEPTH>,
    storage: &'static Mutex<CriticalSectionRawMutex, Storage>,
) -> ! {
    loop {
        match events.receive().await {
            LinkEvent::StateChanged { from, to } => info!("Link {} -> {}", from, to),
            LinkEvent::PeerConnected(peer) => {
                info!("Connected to {}", peer);
                if let Err(e) = storage.lock().await.save_peer(peer).await {
                    warn!("Could not persist peer {}: {}", peer, e);
                }
            }
            LinkEvent::Toggle => info!("Toggle from peer"),
            LinkEvent::KeyboardState(state) => debug!("Keyboard state: {=[u8]:02x}", &state[..]),
        }
    }
}
