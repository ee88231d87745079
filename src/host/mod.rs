//! Host communication over the USB HID comm interface.
//!
//! 1. **Frame** - fixed 48-byte report codec with CRC-8.
//! 2. **Reassembly** - FIRST / MID / LAST accumulation into one message.
//! 3. **Dispatch** - GET / SET command execution and response building.
//! 4. **Store** - the config key/value store interface.
//!
//! The frame task owns the reassembler and the dispatcher; the USB
//! receive path only pushes raw reports into a `FrameChannel`.

pub mod dispatch;
pub mod frame;
pub mod reassembly;
pub mod store;


pub use dispatch::{CommandDispatcher, Opcode, Response};
pub use frame::{split_message, FrameFlag, HostFrame, RawFrame};
pub use reassembly::{FrameChannel, FrameOutcome, FrameReassembler};
pub use store::{bootstrap, ConfigKind, ConfigStore, MemoryConfigStore};
