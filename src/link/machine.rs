//! Link state machine - pairing, reconnection and liveness.
//!
//! Driven from outside by three kinds of input, all carrying the current
//! monotonic time in µs:
//!
//! - `handle_frame` for every inbound datagram,
//! - `tick` at the interval returned by `poll_interval_ms`,
//! - `start_pairing` / `start_rejoin` for button commands.
//!
//! Every input that may transmit is async and resolves once the radio has
//! reported the send outcome.
//!
//! Messages that do not fit the current state, or that come from a sender
//! other than the one we expect, are dropped without error. Radio send
//! failures are logged and never change state; the periodic re-send in the
//! transient states covers lost datagrams.

use crate::config::{
    CONNECTED_INTERVAL_MS, DISCOVERING_INTERVAL_MS, IDLE_INTERVAL_MS, KEYBOARD_STATE_LEN,
    LINK_LOST_INTERVAL_MS, LINK_TIMEOUT_MS, RECONNECTING_INTERVAL_MS, SECURING_INTERVAL_MS,
};
use crate::error::{Error, Result};
use crate::link::message::ProtocolMessage;
use crate::link::transport::{RadioDriver, RadioTransport};
use crate::link::{LinkState, PeerAddress};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::channel::Sender;

/// Something the rest of the firmware may want to react to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkEvent {
    /// Emitted once per actual state change.
    StateChanged { from: LinkState, to: LinkState },
    /// The link entered `Connected` with this peer. Persist it.
    PeerConnected(PeerAddress),
    /// Peer pressed its toggle.
    Toggle,
    /// Opaque keyboard state pushed by the peer.
    KeyboardState([u8; KEYBOARD_STATE_LEN]),
}

/// Sink for link events.
pub trait LinkObserver {
    fn notify(&mut self, event: LinkEvent);
}

impl<M: RawMutex, const N: usize> LinkObserver for Sender<'_, M, LinkEvent, N> {
    fn notify(&mut self, event: LinkEvent) {
        if self.try_send(event).is_err() {
            warn!("Link event queue full - dropping {:?}", event);
        }
    }
}

pub struct LinkStateMachine<D, O> {
    transport: RadioTransport<D>,
    observer: O,
    state: LinkState,
    /// Peer registered during discovery, not yet confirmed by Secure/SecureAck.
    pending: Option<PeerAddress>,
    /// End of the current pairing / rejoin window.
    deadline_us: Option<u64>,
    last_pong_us: u64,
    last_rtt_us: Option<u64>,
}

impl<D: RadioDriver, O: LinkObserver> LinkStateMachine<D, O> {
    pub fn new(transport: RadioTransport<D>, observer: O) -> Self {
        Self {
            transport,
            observer,
            state: LinkState::Idle,
            pending: None,
            deadline_us: None,
            last_pong_us: 0,
            last_rtt_us: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// The known (active) peer, if any.
    pub fn peer(&self) -> Option<PeerAddress> {
        self.transport.active_peer()
    }

    /// Round-trip time measured from the last matching Pong.
    pub fn last_rtt_us(&self) -> Option<u64> {
        self.last_rtt_us
    }

    pub fn transport(&self) -> &RadioTransport<D> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut RadioTransport<D> {
        &mut self.transport
    }

    pub fn observer(&self) -> &O {
        &self.observer
    }

    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    /// Tick interval for the current state.
    pub fn poll_interval_ms(&self) -> u64 {
        match self.state {
            LinkState::Idle => IDLE_INTERVAL_MS,
            LinkState::Discovering => DISCOVERING_INTERVAL_MS,
            LinkState::Securing => SECURING_INTERVAL_MS,
            LinkState::Reconnecting => RECONNECTING_INTERVAL_MS,
            LinkState::Connected => CONNECTED_INTERVAL_MS,
            LinkState::LinkLost => LINK_LOST_INTERVAL_MS,
        }
    }

    /// Register a peer loaded from persistent storage as the known peer.
    pub fn restore_peer(&mut self, peer: PeerAddress) -> Result<()> {
        self.transport.add_peer(peer, true, true)?;
        info!("Restored peer {}", peer);
        Ok(())
    }

    /// Broadcast discovery for `timeout_ms`. Restarts the window if a
    /// pairing is already running.
    pub async fn start_pairing(&mut self, now_us: u64, timeout_ms: u64) -> Result<()> {
        self.forget_pending();
        self.transport.add_broadcast_peer()?;
        self.deadline_us = Some(deadline(now_us, timeout_ms));
        info!("Pairing started ({} ms)", timeout_ms);
        self.set_state(LinkState::Discovering);
        self.send(PeerAddress::BROADCAST, ProtocolMessage::Discovery)
            .await;
        Ok(())
    }

    /// Try to reach the known peer for `timeout_ms`.
    pub async fn start_rejoin(&mut self, now_us: u64, timeout_ms: u64) -> Result<()> {
        let peer = self.transport.active_peer().ok_or(Error::NotFound)?;
        if self.state == LinkState::Connected {
            return Ok(());
        }
        if !self.transport.is_registered(&peer) {
            self.transport.add_peer(peer, true, true)?;
        }
        self.forget_pending();
        self.deadline_us = Some(deadline(now_us, timeout_ms));
        info!("Rejoin {} started ({} ms)", peer, timeout_ms);
        self.set_state(LinkState::Reconnecting);
        self.send(peer, ProtocolMessage::Reconnect).await;
        Ok(())
    }

    /// Send a toggle to the peer. Only while connected.
    pub async fn send_toggle(&mut self) -> Result<()> {
        let peer = self.connected_peer()?;
        self.transport.send(&peer, &ProtocolMessage::Toggle).await
    }

    /// Push keyboard state to the peer. Only while connected.
    pub async fn send_keyboard_state(&mut self, data: [u8; KEYBOARD_STATE_LEN]) -> Result<()> {
        let peer = self.connected_peer()?;
        self.transport
            .send(&peer, &ProtocolMessage::KeyboardState { data })
            .await
    }

    /// Process one inbound datagram from `src`.
    pub async fn handle_frame(&mut self, src: PeerAddress, data: &[u8], now_us: u64) {
        let Some(msg) = ProtocolMessage::decode(data) else {
            debug!("Dropping undecodable frame ({} bytes) from {}", data.len(), src);
            return;
        };

        let known = self.transport.active_peer() == Some(src);
        let state = self.state;

        match msg {
            // The sender holds no key for us yet, so the ack goes out in clear.
            ProtocolMessage::Discovery if state == LinkState::Discovering => {
                if self.begin_securing(src) {
                    self.send(PeerAddress::BROADCAST, ProtocolMessage::DiscoveryAck)
                        .await;
                }
            }
            ProtocolMessage::DiscoveryAck if state == LinkState::Discovering => {
                if self.begin_securing(src) {
                    self.send(src, ProtocolMessage::Secure).await;
                }
            }
            ProtocolMessage::Secure
                if state == LinkState::Securing && self.pending == Some(src) =>
            {
                if self.promote(src) {
                    self.send(src, ProtocolMessage::SecureAck).await;
                    self.enter_connected(src, now_us);
                }
            }
            ProtocolMessage::SecureAck
                if state == LinkState::Securing && self.pending == Some(src) =>
            {
                if self.promote(src) {
                    self.enter_connected(src, now_us);
                }
            }
            ProtocolMessage::Reconnect if known => {
                if !self.transport.is_registered(&src) {
                    if let Err(e) = self.transport.add_peer(src, true, true) {
                        warn!("Cannot re-register {}: {}", src, e);
                        return;
                    }
                }
                self.send(src, ProtocolMessage::ReconnectAck).await;
                self.enter_connected(src, now_us);
            }
            ProtocolMessage::ReconnectAck
                if known && matches!(state, LinkState::Reconnecting | LinkState::LinkLost) =>
            {
                self.enter_connected(src, now_us);
            }
            ProtocolMessage::Ping { timestamp } if known && is_live(state) => {
                self.send(src, ProtocolMessage::Pong { timestamp }).await;
            }
            ProtocolMessage::Pong { timestamp } if known && is_live(state) => {
                self.last_pong_us = now_us;
                self.last_rtt_us = Some(now_us.saturating_sub(timestamp));
                if state == LinkState::LinkLost {
                    self.enter_connected(src, now_us);
                }
            }
            ProtocolMessage::Toggle if known && state == LinkState::Connected => {
                self.observer.notify(LinkEvent::Toggle);
            }
            ProtocolMessage::KeyboardState { data } if known && state == LinkState::Connected => {
                self.observer.notify(LinkEvent::KeyboardState(data));
            }
            other => {
                debug!("Dropping {} from {} in {}", other.name(), src, state);
            }
        }
    }

    /// Periodic work for the current state.
    pub async fn tick(&mut self, now_us: u64) {
        match self.state {
            LinkState::Idle => {}
            LinkState::Discovering => {
                if self.window_expired(now_us) {
                    info!("Pairing window expired");
                    self.go_idle();
                    return;
                }
                if !self.transport.is_registered(&PeerAddress::BROADCAST) {
                    if let Err(e) = self.transport.add_broadcast_peer() {
                        warn!("Broadcast peer unavailable: {}", e);
                        return;
                    }
                }
                self.send(PeerAddress::BROADCAST, ProtocolMessage::Discovery)
                    .await;
            }
            LinkState::Securing => {
                if self.window_expired(now_us) {
                    info!("Secure handshake timed out");
                    self.go_idle();
                    return;
                }
                if let Some(peer) = self.pending {
                    self.send(peer, ProtocolMessage::Secure).await;
                }
            }
            LinkState::Reconnecting => {
                if self.window_expired(now_us) {
                    info!("Rejoin window expired");
                    self.go_idle();
                    return;
                }
                self.send_reconnect().await;
            }
            LinkState::Connected => {
                if let Some(peer) = self.transport.active_peer() {
                    self.send(peer, ProtocolMessage::Ping { timestamp: now_us })
                        .await;
                }
                let silent_us = now_us.saturating_sub(self.last_pong_us);
                if silent_us > LINK_TIMEOUT_MS * 1000 {
                    warn!("No pong for {} ms - link lost", silent_us / 1000);
                    self.set_state(LinkState::LinkLost);
                }
            }
            LinkState::LinkLost => self.send_reconnect().await,
        }
    }

    fn connected_peer(&self) -> Result<PeerAddress> {
        match (self.state, self.transport.active_peer()) {
            (LinkState::Connected, Some(peer)) => Ok(peer),
            _ => Err(Error::TransportFailure),
        }
    }

    /// Register `src` as the encrypted pending peer and move to Securing.
    fn begin_securing(&mut self, src: PeerAddress) -> bool {
        if let Err(e) = self.transport.add_peer(src, true, false) {
            debug!("Ignoring discovery from {}: {}", src, e);
            return false;
        }
        self.pending = Some(src);
        self.set_state(LinkState::Securing);
        true
    }

    /// Make `peer` the only registered peer.
    fn promote(&mut self, peer: PeerAddress) -> bool {
        if let Err(e) = self.transport.set_active_peer(peer) {
            warn!("Cannot activate {}: {}", peer, e);
            return false;
        }
        self.transport.delete_all_peers_except(Some(peer));
        true
    }

    fn enter_connected(&mut self, peer: PeerAddress, now_us: u64) {
        self.last_pong_us = now_us;
        self.deadline_us = None;
        self.forget_pending();
        if self.state != LinkState::Connected {
            self.set_state(LinkState::Connected);
            info!("Connected to {}", peer);
            self.observer.notify(LinkEvent::PeerConnected(peer));
        }
    }

    fn go_idle(&mut self) {
        self.forget_pending();
        self.deadline_us = None;
        self.set_state(LinkState::Idle);
    }

    /// Drop the entry of a discovery peer that never became active.
    fn forget_pending(&mut self) {
        if let Some(peer) = self.pending.take() {
            if self.transport.active_peer() != Some(peer) {
                let _ = self.transport.remove_peer(&peer);
            }
        }
    }

    fn window_expired(&self, now_us: u64) -> bool {
        self.deadline_us.is_some_and(|d| now_us >= d)
    }

    async fn send_reconnect(&mut self) {
        if let Some(peer) = self.transport.active_peer() {
            self.send(peer, ProtocolMessage::Reconnect).await;
        }
    }

    async fn send(&mut self, dst: PeerAddress, msg: ProtocolMessage) {
        if let Err(e) = self.transport.send(&dst, &msg).await {
            warn!("Failed to send {} to {}: {}", msg.name(), dst, e);
        }
    }

    fn set_state(&mut self, next: LinkState) {
        let from = self.state;
        if from == next {
            return;
        }
        info!("Link state {} -> {}", from, next);
        self.state = next;
        self.observer.notify(LinkEvent::StateChanged { from, to: next });
    }
}

fn is_live(state: LinkState) -> bool {
    matches!(state, LinkState::Connected | LinkState::LinkLost)
}

fn deadline(now_us: u64, timeout_ms: u64) -> u64 {
    now_us.saturating_add(timeout_ms.saturating_mul(1000))
}
