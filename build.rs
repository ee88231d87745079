//! Build script - passes the esp-hal linker scripts to the embedded binary.
//!
//! Host builds (library + tests) do not enable the `embedded` feature and
//! are left untouched.

use std::env;

fn main() {
    // Only the firmware image links against the ESP32-S3 memory layout.
    if env::var_os("CARGO_FEATURE_EMBEDDED").is_some() {
        println!("cargo:rustc-link-arg-bins=-nostartfiles");
        println!("cargo:rustc-link-arg-bins=-Tlinkall.x");
        println!("cargo:rustc-link-arg-bins=-Tdefmt.x");
    }

    println!("cargo:rerun-if-changed=build.rs");
}
