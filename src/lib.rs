//! Thread-safe driver for the PCA9685 16-channel, 12-bit PWM controller, with device
//! abstractions for RGB LEDs and pumps.
//!
//! The controller ([`Pca9685`]) owns a [`RegisterBus`](bus::RegisterBus), records each
//! channel's last commanded duty cycle, and lets independent threads drive different
//! channels without contending. [`RgbLed`] and [`Pump`] borrow a controller and translate
//! colors and speeds into duty cycles.
//!
//! Every bus-touching call takes a [`CancelToken`], checked between register writes.
//!
//! # Glossary
//!
//! - **Channel:** one of the 16 PWM outputs, numbered `0..=15`.
//! - **Duty cycle:** a pair of counts within the 4096-tick PWM period. The output goes high
//!   at `on` and low at `off`, both in `0..=4095`.
//! - **Prescale:** the 8-bit divider that sets the output frequency from the 25 MHz
//!   internal oscillator.
//! - **Broadcast registers:** the `ALL_LED` block; one write there sets every output.
//! - **Speed limits:** the duty span a pump's 0–100 % maps onto.
//! - **Calibration:** per-color duty spans for an RGB LED.
//!
//! # Features
//!
//! - `log` (default): log through the [`log`](https://docs.rs/log) facade.
//! - `defmt`: log through `defmt` and derive `defmt::Format` on public types.
//! - `host` (default): the in-memory [`MemoryBus`](bus::MemoryBus) emulator.

mod fmt; // must come first so its macros are visible to the other modules

pub mod bus;
pub mod cancel;
mod error;
pub mod pca9685;
pub mod pump;
pub mod register;
pub mod rgb_led;

pub use crate::cancel::CancelToken;
pub use crate::error::{Error, Result};
pub use crate::pca9685::{ChannelState, Config, ControllerState, Duty, Pca9685, PwmMap};
pub use crate::pump::{Pump, SpeedLimits};
pub use crate::rgb_led::{Calibration, DutyRange, RgbLed};
