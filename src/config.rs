//! Application-wide constants and compile-time configuration.
//!
//! All radio timing, protocol sizes, USB identity and flash layout live
//! here so they can be tuned in one place.

// ESP-NOW link

/// Wi-Fi channel used for every ESP-NOW frame.
pub const ESPNOW_CHANNEL: u8 = 1;

/// ESP-NOW primary master key (exactly 16 bytes).
pub const ESPNOW_PMK: &[u8; 16] = b"keylink-pmk-0420";

/// Pre-shared secret used only to derive per-pair link keys.
pub const LINK_PSK: &[u8; 16] = b"keylink-psk-v001";

/// Tick interval per link state (ms). Transient states tick faster than
/// the connected keepalive.
pub const IDLE_INTERVAL_MS: u64 = 500;
pub const DISCOVERING_INTERVAL_MS: u64 = 200;
pub const SECURING_INTERVAL_MS: u64 = 200;
pub const RECONNECTING_INTERVAL_MS: u64 = 250;
pub const LINK_LOST_INTERVAL_MS: u64 = 250;
pub const CONNECTED_INTERVAL_MS: u64 = 1000;

/// Silence after which a connected link is declared lost (ms).
pub const LINK_TIMEOUT_MS: u64 = 3000;

/// Discovery window used by the pair button (ms).
pub const PAIR_TIMEOUT_MS: u64 = 5000;

/// Rejoin window used by the action button when not connected (ms).
pub const REJOIN_TIMEOUT_MS: u64 = 5000;

/// Rejoin window tried once at boot when a peer record exists (ms).
pub const BOOT_REJOIN_TIMEOUT_MS: u64 = 10_000;

/// Size of the opaque keyboard-state blob carried over the link.
pub const KEYBOARD_STATE_LEN: usize = 31;

/// Largest encoded protocol message (tag + keyboard state).
pub const MAX_MESSAGE_LEN: usize = 1 + KEYBOARD_STATE_LEN;

/// Peer-table capacity assumed by the mock driver and the eviction logic.
pub const MAX_RADIO_PEERS: usize = 20;

/// Depth of the queue between the radio receive task and the link task.
pub const RADIO_QUEUE_DEPTH: usize = 8;

/// Depth of the link event queue (state changes, toggles, keyboard state).
pub const LINK_EVENT_QUEUE_DEPTH: usize = 8;

// Host communication (USB HID comm interface)

/// Fixed size of every comm report in both directions.
pub const HOST_REPORT_SIZE: usize = 48;

/// Payload bytes carried by a single host frame.
pub const MAX_FRAME_PAYLOAD: usize = 43;

/// Reassembly buffer capacity. Sized for a multi-second burst of frames
/// at the 1 ms polling rate (host tooling sends ~23 KB messages).
pub const REASSEMBLY_CAPACITY: usize = 24 * 1024;

/// Depth of the queue between the USB receive path and frame processing.
pub const FRAME_QUEUE_DEPTH: usize = 4;

/// Longest config entry name (keeps the composite key within 15 chars).
pub const MAX_CONFIG_KEY_LEN: usize = 12;

/// Largest config value. Key and value of a flash entry must share one
/// 4 KB sector with the item header and page markers.
pub const MAX_CONFIG_VALUE_LEN: usize = 3968;

/// Number of entries held by the in-memory store.
pub const MAX_CONFIG_ENTRIES: usize = 16;

// USB

/// USB VID/PID - Espressif test VID.
/// Replace with your own allocated VID/PID for production.
pub const USB_VID: u16 = 0x303A;
pub const USB_PID: u16 = 0x1324;

/// USB device strings.
pub const USB_MANUFACTURER: &str = "keylink";
pub const USB_PRODUCT: &str = "keylink keyboard";
pub const USB_SERIAL_NUMBER: &str = "000001";

/// USB HID polling interval (ms). 1 ms = 1000 Hz.
pub const USB_HID_POLL_MS: u8 = 1;

// GPIO pin assignments (ESP32-S3-DevKitC defaults)
//
//   Button PAIR    → GPIO0 (BOOT)
//   Button ACTION  → GPIO14
//   USB D-/D+      → GPIO19 / GPIO20

/// Button debounce time (ms).
pub const BUTTON_DEBOUNCE_MS: u64 = 50;

// Flash storage

/// Start of the storage region (default `nvs` partition offset).
pub const STORAGE_FLASH_START: u32 = 0x9000;

/// Size of the storage region (six 4 KB sectors).
pub const STORAGE_FLASH_SIZE: u32 = 0x6000;
