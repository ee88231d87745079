//! USB Device subsystem - presents a composite HID device to the host.
//!
//! The ESP32-S3's USB OTG controller (full speed) is driven by
//! `embassy-usb`.  The composite device has two HID interfaces:
//!
//! - Interface 0: Keyboard (boot protocol)
//! - Interface 1: Comm     (vendor page, 48-byte reports)
//!
//! The comm reader task pushes every OUT report into `HOST_FRAMES`; the
//! frame task reassembles, dispatches and writes the IN reply.

pub mod hid_device;
