//! PCA9685 register map and the pure encoding helpers built on it.
//!
//! Every multi-byte register write is the register address followed by little-endian
//! 16-bit values. The chip auto-increments the register pointer when
//! [`MODE1_AUTO_INCREMENT`] is set, so one bus write covers a channel's four registers.

use core::time::Duration;

/// Mode control register 1.
pub const MODE1: u8 = 0x00;
/// Mode control register 2.
pub const MODE2: u8 = 0x01;
/// `LED0_ON_L`, the first of channel 0's four on/off registers.
pub const LED0: u8 = 0x06;
/// `ALL_LED_ON_L`, the first of the four broadcast registers.
pub const ALL_LED: u8 = 0xFA;
/// Prescaler for the PWM output frequency.
pub const PRESCALE: u8 = 0xFE;

/// MODE1: respond to the LED all-call address.
pub const MODE1_ALL_CALL: u8 = 0x01;
/// MODE1: low-power mode, oscillator off.
pub const MODE1_SLEEP: u8 = 0x10;
/// MODE1: register auto-increment.
pub const MODE1_AUTO_INCREMENT: u8 = 0x20;
/// MODE1: restart enabled.
pub const MODE1_RESTART: u8 = 0x80;

/// MODE2: outputs change on ACK rather than STOP.
pub const MODE2_OUTNE: u8 = 0x01;
/// MODE2: totem-pole (push-pull) outputs instead of open-drain.
pub const MODE2_OUTDRV: u8 = 0x04;
/// MODE2: invert output logic.
pub const MODE2_INVRT: u8 = 0x10;

/// Number of PWM channels on the chip.
pub const CHANNEL_COUNT: usize = 16;
/// Counts per PWM cycle.
pub const PWM_RESOLUTION: u16 = 4096;
/// Largest on/off count.
pub const MAX_DUTY: u16 = PWM_RESOLUTION - 1;
/// Lowest programmable output frequency (Hz).
pub const MIN_FREQUENCY: f64 = 24.0;
/// Highest programmable output frequency (Hz).
pub const MAX_FREQUENCY: f64 = 1526.0;
/// Internal oscillator frequency (Hz).
pub const OSCILLATOR_HZ: f64 = 25_000_000.0;
/// Smallest prescale value the chip accepts.
pub const MIN_PRESCALE: u8 = 3;

/// Time the oscillator needs after leaving sleep before RESTART may be set.
pub const OSCILLATOR_SETTLE: Duration = Duration::from_micros(500);

/// `true` when `hz` is a programmable output frequency.
#[must_use]
pub fn frequency_in_range(hz: f64) -> bool {
    (MIN_FREQUENCY..=MAX_FREQUENCY).contains(&hz)
}

/// Prescale value for an output frequency: `round(25 MHz / (4096 * hz)) - 1`, floored at 3.
///
/// The caller is expected to have checked [`frequency_in_range`]; inside that range the
/// result always fits a byte.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "clamped into u8 range first"
)]
pub fn prescale_for(hz: f64) -> u8 {
    let prescale = (OSCILLATOR_HZ / (f64::from(PWM_RESOLUTION) * hz)).round() - 1.0;
    prescale.clamp(f64::from(MIN_PRESCALE), f64::from(u8::MAX)) as u8
}

/// First register of `channel`'s on/off block, or `None` for a channel outside `0..=15`.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    reason = "CHANNEL_COUNT is 16"
)]
pub const fn led_register(channel: u8) -> Option<u8> {
    if channel >= CHANNEL_COUNT as u8 {
        return None;
    }
    Some(LED0 + 4 * channel)
}

/// Encode an on/off pair as `[on_lo, on_hi, off_lo, off_hi]`.
#[must_use]
pub const fn encode_duty(on: u16, off: u16) -> [u8; 4] {
    let [on_lo, on_hi] = on.to_le_bytes();
    let [off_lo, off_hi] = off.to_le_bytes();
    [on_lo, on_hi, off_lo, off_hi]
}

/// MODE2 value for the configured output stage.
#[must_use]
pub const fn mode2_for(invert_logic: bool, open_drain: bool) -> u8 {
    let mut mode2 = 0;
    if !open_drain {
        mode2 |= MODE2_OUTDRV;
    }
    if invert_logic {
        mode2 |= MODE2_INVRT;
    }
    mode2
}
