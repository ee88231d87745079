//! Unit tests for the link transport contract and the state machine.
//!
//! Time is passed explicitly, so every scenario runs instantly.

use super::machine::{LinkEvent, LinkObserver, LinkStateMachine};
use super::message::ProtocolMessage;
use super::mock::{Datagram, MockRadio};
use super::transport::{RadioDriver, RadioTransport};
use super::{derive_link_key, LinkState, PeerAddress};
use crate::config::{LINK_PSK, PAIR_TIMEOUT_MS, REJOIN_TIMEOUT_MS};
use crate::error::Error;
use embassy_futures::block_on;
use embassy_futures::select::{select, Either};

const A: PeerAddress = PeerAddress([0x24, 0x6F, 0x28, 0x00, 0x00, 0x01]);
const B: PeerAddress = PeerAddress([0x24, 0x6F, 0x28, 0x00, 0x00, 0x02]);
const C: PeerAddress = PeerAddress([0x24, 0x6F, 0x28, 0x00, 0x00, 0x03]);
const D: PeerAddress = PeerAddress([0x24, 0x6F, 0x28, 0x00, 0x00, 0x04]);
const E: PeerAddress = PeerAddress([0x24, 0x6F, 0x28, 0x00, 0x00, 0x05]);

#[derive(Default)]
struct Recorder(std::vec::Vec<LinkEvent>);

impl LinkObserver for Recorder {
    fn notify(&mut self, event: LinkEvent) {
        self.0.push(event);
    }
}

type Machine = LinkStateMachine<MockRadio, Recorder>;

fn machine(own: PeerAddress) -> Machine {
    LinkStateMachine::new(
        RadioTransport::new(MockRadio::new(), own, LINK_PSK),
        Recorder::default(),
    )
}

fn ms(v: u64) -> u64 {
    v * 1000
}

fn frame(msg: ProtocolMessage) -> std::vec::Vec<u8> {
    msg.encode().to_vec()
}

fn sent(m: &mut Machine) -> std::vec::Vec<Datagram> {
    let driver = m.transport_mut().driver_mut();
    std::iter::from_fn(|| driver.pop_sent()).collect()
}

fn events(m: &mut Machine) -> std::vec::Vec<LinkEvent> {
    core::mem::take(&mut m.observer_mut().0)
}

/// Pair `m` with `peer` at `now_us` (peer answers our discovery), then
/// clear the outbox and the recorded events.
fn connect(m: &mut Machine, peer: PeerAddress, now_us: u64) {
    block_on(m.start_pairing(now_us, PAIR_TIMEOUT_MS)).unwrap();
    block_on(m.handle_frame(peer, &frame(ProtocolMessage::Discovery), now_us));
    block_on(m.handle_frame(peer, &frame(ProtocolMessage::Secure), now_us));
    assert_eq!(m.state(), LinkState::Connected);
    sent(m);
    events(m);
}

fn transport(capacity: usize) -> RadioTransport<MockRadio> {
    RadioTransport::new(MockRadio::with_capacity(capacity), A, LINK_PSK)
}

// ═══════════════════════════════════════════════════════════════════════════
// Transport Tests
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn adding_existing_peer_is_idempotent() {
    let mut t = transport(4);
    t.add_peer(B, true, false).unwrap();
    t.add_peer(B, true, true).unwrap();

    assert_eq!(t.driver().peer_count(), 1);
    assert_eq!(t.active_peer(), Some(B));
}

#[test]
fn encrypted_peer_gets_derived_key() {
    let mut t = transport(4);
    t.add_peer(B, true, false).unwrap();
    t.add_peer(C, false, false).unwrap();

    let expected = derive_link_key(&B, &A, LINK_PSK);
    assert_eq!(t.driver().key_for(&B), Some(*expected.as_bytes()));
    assert_eq!(t.driver().key_for(&C), None);
}

#[test]
fn full_table_evicts_all_but_active_and_retries() {
    let mut t = transport(3);
    t.add_peer(B, true, true).unwrap();
    t.add_peer(C, true, false).unwrap();
    t.add_peer(D, true, false).unwrap();

    t.add_peer(E, true, false).unwrap();

    let mut peers = t.driver().peers();
    peers.sort_unstable();
    assert_eq!(peers.as_slice(), &[B, E]);
    assert_eq!(t.active_peer(), Some(B));
}

#[test]
fn full_table_after_eviction_is_resource_exhausted() {
    let mut t = transport(1);
    t.add_peer(B, true, true).unwrap();

    assert_eq!(t.add_peer(C, true, false), Err(Error::ResourceExhausted));
    assert!(t.is_registered(&B));
}

#[test]
fn send_to_unregistered_peer_fails() {
    let mut t = transport(4);
    assert_eq!(
        block_on(t.send(&B, &ProtocolMessage::Toggle)),
        Err(Error::UnknownPeer)
    );
    assert_eq!(t.driver().sent_count(), 0);
}

#[test]
fn non_unicast_and_own_addresses_are_rejected() {
    let mut t = transport(4);
    for addr in [
        PeerAddress::BROADCAST,
        PeerAddress([0; 6]),
        PeerAddress([0x01, 0x00, 0x5E, 0x00, 0x00, 0x01]),
        A,
    ] {
        assert_eq!(t.add_peer(addr, true, false), Err(Error::InvalidArgument));
    }
    assert_eq!(t.driver().peer_count(), 0);
}

#[test]
fn delete_all_except_keeps_designated_peer() {
    let mut t = transport(4);
    t.add_broadcast_peer().unwrap();
    t.add_peer(B, true, true).unwrap();
    t.add_peer(C, true, false).unwrap();

    assert_eq!(t.delete_all_peers_except(Some(B)), 2);
    assert_eq!(t.driver().peers().as_slice(), &[B]);
}

// ═══════════════════════════════════════════════════════════════════════════
// Pairing Tests
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn fresh_machine_is_idle() {
    let m = machine(A);
    assert_eq!(m.state(), LinkState::Idle);
    assert_eq!(m.peer(), None);
    assert_eq!(m.poll_interval_ms(), 500);
}

#[test]
fn pairing_without_reply_returns_to_idle_after_timeout() {
    let mut m = machine(A);
    block_on(m.start_pairing(0, 5000)).unwrap();
    assert_eq!(m.state(), LinkState::Discovering);
    assert_eq!(m.poll_interval_ms(), 200);

    let mut now = 0;
    while now < ms(4800) {
        now += ms(200);
        block_on(m.tick(now));
        assert_eq!(m.state(), LinkState::Discovering);
    }

    block_on(m.tick(ms(5000)));
    assert_eq!(m.state(), LinkState::Idle);

    let out = sent(&mut m);
    assert_eq!(out.len(), 25);
    assert!(out.iter().all(|d| d.dst.is_broadcast()
        && d.message() == Some(ProtocolMessage::Discovery)));

    assert_eq!(
        events(&mut m),
        [
            LinkEvent::StateChanged {
                from: LinkState::Idle,
                to: LinkState::Discovering
            },
            LinkEvent::StateChanged {
                from: LinkState::Discovering,
                to: LinkState::Idle
            },
        ]
    );
}

#[test]
fn restarting_pairing_does_not_repeat_state_change() {
    let mut m = machine(A);
    block_on(m.start_pairing(0, 5000)).unwrap();
    block_on(m.start_pairing(ms(1000), 5000)).unwrap();
    assert_eq!(events(&mut m).len(), 1);

    // The second call restarted the window.
    block_on(m.tick(ms(5500)));
    assert_eq!(m.state(), LinkState::Discovering);
}

#[test]
fn discovery_from_peer_registers_key_and_acks() {
    let mut m = machine(A);
    block_on(m.start_pairing(0, 5000)).unwrap();
    sent(&mut m);

    block_on(m.handle_frame(B, &frame(ProtocolMessage::Discovery), ms(300)));

    assert_eq!(m.state(), LinkState::Securing);
    let key = derive_link_key(&A, &B, LINK_PSK);
    assert_eq!(m.transport().driver().key_for(&B), Some(*key.as_bytes()));

    // B has no key for us yet: the ack must go out in clear.
    let out = sent(&mut m);
    assert_eq!(out.len(), 1);
    assert!(out[0].dst.is_broadcast());
    assert_eq!(out[0].key, None);
    assert_eq!(out[0].message(), Some(ProtocolMessage::DiscoveryAck));
}

#[test]
fn discovery_ack_sends_secure() {
    let mut m = machine(A);
    block_on(m.start_pairing(0, 5000)).unwrap();
    sent(&mut m);

    block_on(m.handle_frame(B, &frame(ProtocolMessage::DiscoveryAck), ms(300)));

    assert_eq!(m.state(), LinkState::Securing);
    let out = sent(&mut m);
    assert_eq!(out[0].dst, B);
    assert_eq!(out[0].message(), Some(ProtocolMessage::Secure));
    let key = derive_link_key(&A, &B, LINK_PSK);
    assert_eq!(out[0].key, Some(*key.as_bytes()));
}

#[test]
fn securing_retransmits_secure_until_window_ends() {
    let mut m = machine(A);
    block_on(m.start_pairing(0, 5000)).unwrap();
    block_on(m.handle_frame(B, &frame(ProtocolMessage::Discovery), ms(100)));
    sent(&mut m);

    block_on(m.tick(ms(300)));
    let out = sent(&mut m);
    assert_eq!(out[0].message(), Some(ProtocolMessage::Secure));

    block_on(m.tick(ms(5000)));
    assert_eq!(m.state(), LinkState::Idle);
    assert!(!m.transport().is_registered(&B));
}

#[test]
fn secure_from_pending_peer_connects() {
    let mut m = machine(A);
    block_on(m.start_pairing(0, 5000)).unwrap();
    block_on(m.handle_frame(B, &frame(ProtocolMessage::Discovery), ms(100)));
    sent(&mut m);
    events(&mut m);

    block_on(m.handle_frame(B, &frame(ProtocolMessage::Secure), ms(200)));

    assert_eq!(m.state(), LinkState::Connected);
    assert_eq!(m.peer(), Some(B));
    assert!(!m.transport().is_registered(&PeerAddress::BROADCAST));
    let out = sent(&mut m);
    assert_eq!(out[0].message(), Some(ProtocolMessage::SecureAck));
    assert_eq!(
        events(&mut m),
        [
            LinkEvent::StateChanged {
                from: LinkState::Securing,
                to: LinkState::Connected
            },
            LinkEvent::PeerConnected(B),
        ]
    );
}

#[test]
fn secure_from_other_sender_is_ignored() {
    let mut m = machine(A);
    block_on(m.start_pairing(0, 5000)).unwrap();
    block_on(m.handle_frame(B, &frame(ProtocolMessage::Discovery), ms(100)));

    block_on(m.handle_frame(C, &frame(ProtocolMessage::Secure), ms(200)));
    block_on(m.handle_frame(C, &frame(ProtocolMessage::SecureAck), ms(200)));

    assert_eq!(m.state(), LinkState::Securing);
    assert_eq!(m.peer(), None);
}

#[test]
fn replayed_secure_ack_after_connected_is_noop() {
    let mut m = machine(A);
    block_on(m.start_pairing(0, 5000)).unwrap();
    block_on(m.handle_frame(B, &frame(ProtocolMessage::DiscoveryAck), ms(100)));
    block_on(m.handle_frame(B, &frame(ProtocolMessage::SecureAck), ms(200)));
    assert_eq!(m.state(), LinkState::Connected);
    sent(&mut m);
    events(&mut m);

    block_on(m.handle_frame(B, &frame(ProtocolMessage::SecureAck), ms(300)));
    block_on(m.handle_frame(B, &frame(ProtocolMessage::SecureAck), ms(400)));

    assert_eq!(m.state(), LinkState::Connected);
    assert_eq!(m.peer(), Some(B));
    assert!(events(&mut m).is_empty());
    assert!(sent(&mut m).is_empty());
}

#[test]
fn messages_in_wrong_state_are_dropped() {
    let mut m = machine(A);
    block_on(m.handle_frame(B, &frame(ProtocolMessage::Discovery), 0));
    block_on(m.handle_frame(B, &frame(ProtocolMessage::Secure), 0));
    block_on(m.handle_frame(B, &[0xEE, 0x01], 0));

    assert_eq!(m.state(), LinkState::Idle);
    assert!(sent(&mut m).is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
// Liveness Tests
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn connected_tick_pings_with_timestamp() {
    let mut m = machine(A);
    connect(&mut m, B, 0);

    block_on(m.tick(ms(1000)));

    let out = sent(&mut m);
    assert_eq!(out[0].dst, B);
    assert_eq!(
        out[0].message(),
        Some(ProtocolMessage::Ping { timestamp: ms(1000) })
    );
}

#[test]
fn pong_from_peer_keeps_link_alive_and_measures_rtt() {
    let mut m = machine(A);
    connect(&mut m, B, 0);

    block_on(m.tick(ms(1000)));
    block_on(m.handle_frame(
        B,
        &frame(ProtocolMessage::Pong { timestamp: ms(1000) }),
        ms(1200),
    ));
    assert_eq!(m.last_rtt_us(), Some(ms(200)));

    for t in [2000, 3000, 4000] {
        block_on(m.tick(ms(t)));
    }
    assert_eq!(m.state(), LinkState::Connected);
}

#[test]
fn silent_link_is_declared_lost() {
    let mut m = machine(A);
    connect(&mut m, B, 0);

    for t in [1000, 2000, 3000] {
        block_on(m.tick(ms(t)));
        assert_eq!(m.state(), LinkState::Connected);
    }
    block_on(m.tick(ms(4000)));
    assert_eq!(m.state(), LinkState::LinkLost);
    assert_eq!(m.poll_interval_ms(), 250);
}

#[test]
fn pong_from_other_sender_never_updates_liveness() {
    let mut m = machine(A);
    connect(&mut m, B, 0);

    block_on(m.handle_frame(
        C,
        &frame(ProtocolMessage::Pong { timestamp: 0 }),
        ms(2500),
    ));
    block_on(m.tick(ms(4000)));
    assert_eq!(m.state(), LinkState::LinkLost);

    block_on(m.handle_frame(
        C,
        &frame(ProtocolMessage::Pong { timestamp: 0 }),
        ms(4100),
    ));
    assert_eq!(m.state(), LinkState::LinkLost);
    assert_eq!(m.last_rtt_us(), None);
}

#[test]
fn lost_link_sends_reconnect_and_recovers_on_pong() {
    let mut m = machine(A);
    connect(&mut m, B, 0);
    block_on(m.tick(ms(4000)));
    sent(&mut m);
    events(&mut m);

    block_on(m.tick(ms(4250)));
    let out = sent(&mut m);
    assert_eq!(out[0].message(), Some(ProtocolMessage::Reconnect));

    block_on(m.handle_frame(
        B,
        &frame(ProtocolMessage::Pong { timestamp: ms(4000) }),
        ms(4300),
    ));
    assert_eq!(m.state(), LinkState::Connected);
    assert_eq!(
        events(&mut m),
        [
            LinkEvent::StateChanged {
                from: LinkState::LinkLost,
                to: LinkState::Connected
            },
            LinkEvent::PeerConnected(B),
        ]
    );
}

#[test]
fn ping_from_peer_is_echoed() {
    let mut m = machine(A);
    connect(&mut m, B, 0);

    block_on(m.handle_frame(B, &frame(ProtocolMessage::Ping { timestamp: 777 }), ms(10)));
    block_on(m.handle_frame(C, &frame(ProtocolMessage::Ping { timestamp: 888 }), ms(10)));

    let out = sent(&mut m);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].dst, B);
    assert_eq!(out[0].message(), Some(ProtocolMessage::Pong { timestamp: 777 }));
}

#[test]
fn send_failure_does_not_change_state() {
    let mut m = machine(A);
    connect(&mut m, B, 0);
    m.transport_mut().driver_mut().set_fail_sends(true);

    block_on(m.tick(ms(1000)));
    block_on(m.handle_frame(B, &frame(ProtocolMessage::Ping { timestamp: 1 }), ms(1100)));

    assert_eq!(m.state(), LinkState::Connected);
    assert!(events(&mut m).is_empty());
}

#[test]
fn pending_send_suspends_the_tick() {
    let mut m = machine(A);
    connect(&mut m, B, 0);
    m.transport_mut().driver_mut().set_yield_sends(true);

    // The tick must give way while the radio has not reported the send.
    let first = block_on(select(m.tick(ms(1000)), core::future::ready(())));
    assert!(matches!(first, Either::Second(())));
    assert!(sent(&mut m).is_empty());

    block_on(m.tick(ms(1000)));
    let out = sent(&mut m);
    assert_eq!(out.len(), 1);
    assert_eq!(
        out[0].message(),
        Some(ProtocolMessage::Ping { timestamp: ms(1000) })
    );
}

// ═══════════════════════════════════════════════════════════════════════════
// Reconnection Tests
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn rejoin_without_known_peer_is_not_found() {
    let mut m = machine(A);
    assert_eq!(block_on(m.start_rejoin(0, REJOIN_TIMEOUT_MS)), Err(Error::NotFound));
    assert_eq!(m.state(), LinkState::Idle);
}

#[test]
fn rejoin_without_answer_times_out_to_idle() {
    let mut m = machine(A);
    m.restore_peer(B).unwrap();
    block_on(m.start_rejoin(0, 5000)).unwrap();
    assert_eq!(m.state(), LinkState::Reconnecting);

    block_on(m.tick(ms(250)));
    block_on(m.tick(ms(4750)));
    assert_eq!(m.state(), LinkState::Reconnecting);
    block_on(m.tick(ms(5000)));
    assert_eq!(m.state(), LinkState::Idle);
    assert_eq!(m.peer(), Some(B));

    let out = sent(&mut m);
    assert_eq!(out.len(), 3);
    assert!(out
        .iter()
        .all(|d| d.dst == B && d.message() == Some(ProtocolMessage::Reconnect)));
}

#[test]
fn reconnect_ack_completes_rejoin() {
    let mut m = machine(A);
    m.restore_peer(B).unwrap();
    block_on(m.start_rejoin(0, 5000)).unwrap();
    events(&mut m);

    block_on(m.handle_frame(C, &frame(ProtocolMessage::ReconnectAck), ms(100)));
    assert_eq!(m.state(), LinkState::Reconnecting);

    block_on(m.handle_frame(B, &frame(ProtocolMessage::ReconnectAck), ms(200)));
    assert_eq!(m.state(), LinkState::Connected);
    assert!(events(&mut m).contains(&LinkEvent::PeerConnected(B)));
}

#[test]
fn reconnect_from_known_peer_connects_from_idle() {
    let mut m = machine(A);
    m.restore_peer(B).unwrap();

    block_on(m.handle_frame(B, &frame(ProtocolMessage::Reconnect), ms(10)));

    assert_eq!(m.state(), LinkState::Connected);
    let out = sent(&mut m);
    assert_eq!(out[0].dst, B);
    assert_eq!(out[0].message(), Some(ProtocolMessage::ReconnectAck));
}

#[test]
fn reconnect_from_unknown_sender_is_ignored() {
    let mut m = machine(A);
    m.restore_peer(B).unwrap();

    block_on(m.handle_frame(C, &frame(ProtocolMessage::Reconnect), ms(10)));

    assert_eq!(m.state(), LinkState::Idle);
    assert!(sent(&mut m).is_empty());
}

#[test]
fn rejoin_while_connected_is_noop() {
    let mut m = machine(A);
    connect(&mut m, B, 0);
    block_on(m.start_rejoin(ms(10), 5000)).unwrap();
    assert_eq!(m.state(), LinkState::Connected);
    assert!(sent(&mut m).is_empty());
}

// ═══════════════════════════════════════════════════════════════════════════
// Application Message Tests
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn toggle_and_keyboard_state_from_peer_are_published() {
    let mut m = machine(A);
    connect(&mut m, B, 0);

    let mut data = [0u8; 31];
    data[3] = 0x42;
    block_on(m.handle_frame(B, &frame(ProtocolMessage::Toggle), ms(10)));
    block_on(m.handle_frame(C, &frame(ProtocolMessage::Toggle), ms(10)));
    block_on(m.handle_frame(B, &frame(ProtocolMessage::KeyboardState { data }), ms(20)));

    assert_eq!(
        events(&mut m),
        [LinkEvent::Toggle, LinkEvent::KeyboardState(data)]
    );
}

#[test]
fn outbound_toggle_requires_connection() {
    let mut m = machine(A);
    assert_eq!(block_on(m.send_toggle()), Err(Error::TransportFailure));

    connect(&mut m, B, 0);
    block_on(m.send_toggle()).unwrap();
    block_on(m.send_keyboard_state([7; 31])).unwrap();

    let out = sent(&mut m);
    assert_eq!(out[0].message(), Some(ProtocolMessage::Toggle));
    assert_eq!(
        out[1].message(),
        Some(ProtocolMessage::KeyboardState { data: [7; 31] })
    );
}
