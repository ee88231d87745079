//! GPIO button input with async debouncing.
//!
//! Buttons are active-low with the internal pull-up. Each one is handled
//! by its own task that waits for an edge, debounces it, and sends its
//! `LinkCommand` to the link task.

use crate::radio::LinkCommand;
use defmt::info;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Sender;
use embassy_time::{Duration, Timer};
use esp_hal::gpio::Input;
use keylink::config::BUTTON_DEBOUNCE_MS;

/// Run a single button polling loop.
///
/// Waits for the pin to go low (pressed), debounces, sends the command,
/// then waits for release before repeating.
pub async fn button_task(
    mut btn: Input<'static>,
    command: LinkCommand,
    tx: &Sender<'static, CriticalSectionRawMutex, LinkCommand, 4>,
) -> ! {
    loop {
        btn.wait_for_falling_edge().await;

        Timer::after(Duration::from_millis(BUTTON_DEBOUNCE_MS)).await;

        if btn.is_low() {
            info!("Button: {}", command);
            tx.send(command).await;

            // Wait for release to avoid repeat triggers.
            btn.wait_for_rising_edge().await;
            Timer::after(Duration::from_millis(BUTTON_DEBOUNCE_MS)).await;
        }
    }
}
