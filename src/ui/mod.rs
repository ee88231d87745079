//! User input - two physical buttons.
//!
//! - **PAIR** (GPIO0 / BOOT): open a discovery window.
//! - **ACTION** (GPIO14): toggle on the peer when connected, otherwise
//!   try to rejoin the known peer.
//!
//! Presses are turned into `LinkCommand`s for the link task.

pub mod buttons;
