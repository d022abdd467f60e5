//! Error and result types shared by the controller and the device abstractions.

use derive_more::{Debug, Display, Error};
use embedded_hal::i2c::ErrorKind;

/// Result type used throughout this crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Errors raised by [`Pca9685`](crate::pca9685::Pca9685) and the device abstractions built on it.
///
/// Validation errors are always detected before any bus traffic. Bus and cancellation
/// errors are never retried internally.
#[derive(Debug, Display, Error, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Channel index is outside `0..=15`.
    #[display("invalid channel number: {channel}")]
    InvalidChannel {
        /// Rejected channel index.
        channel: u8,
    },

    /// Frequency is outside the `24..=1526` Hz range the prescaler can produce.
    #[display("frequency {hz} Hz out of range (24-1526 Hz)")]
    FrequencyOutOfRange {
        /// Rejected frequency in Hz.
        hz: f64,
    },

    /// An on/off count does not fit the 12-bit duty-cycle domain.
    #[display("duty value {value} exceeds 4095")]
    DutyOutOfRange {
        /// Rejected count.
        value: u16,
    },

    /// Speed is outside `0..=100` percent.
    #[display("speed percentage {percent} must be between 0 and 100")]
    PercentOutOfRange {
        /// Rejected percentage.
        percent: f64,
    },

    /// Brightness is outside `0.0..=1.0`.
    #[display("brightness {brightness} must be between 0 and 1")]
    BrightnessOutOfRange {
        /// Rejected brightness.
        brightness: f64,
    },

    /// Speed limits are reversed or the maximum exceeds 4095.
    #[display("invalid speed limits: min {min}, max {max}")]
    InvalidSpeedLimits {
        /// Requested minimum duty.
        min: u16,
        /// Requested maximum duty.
        max: u16,
    },

    /// A write was attempted on a disabled channel.
    #[display("channel {channel} is disabled")]
    ChannelDisabled {
        /// Disabled channel index.
        channel: u8,
    },

    /// The register bus reported a failure.
    #[display("bus error at register {register:#04X}: {kind}")]
    Bus {
        /// Register the failed access targeted.
        register: u8,
        /// Bus-level classification of the failure.
        kind: ErrorKind,
    },

    /// Releasing the register bus failed.
    #[display("bus error while closing: {kind}")]
    BusClose {
        /// Bus-level classification of the failure.
        kind: ErrorKind,
    },

    /// The cancellation token was fired.
    #[display("operation cancelled")]
    Cancelled,

    /// The cancellation token's deadline passed.
    #[display("deadline exceeded")]
    DeadlineExceeded,
}

impl Error {
    /// Wrap a bus error for the given register.
    pub(crate) fn bus<E: embedded_hal::i2c::Error>(register: u8, error: &E) -> Self {
        Self::Bus {
            register,
            kind: error.kind(),
        }
    }

    /// `true` for [`Error::Cancelled`] and [`Error::DeadlineExceeded`].
    #[must_use]
    pub const fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }
}
