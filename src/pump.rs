//! A device abstraction for a pump (or any open-loop speed actuator) on one PCA9685 channel.
//!
//! See [`Pump`] for usage examples.

use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};

use crate::bus::RegisterBus;
use crate::cancel::CancelToken;
use crate::pca9685::Pca9685;
use crate::register::MAX_DUTY;
use crate::{Error, Result};

/// Duty-cycle span a pump's 0–100 % speed maps onto.
///
/// Always `min <= max <= 4095`. Deserializing goes through [`SpeedLimits::new`], so a
/// reversed or oversized pair is rejected there too.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(try_from = "SpeedLimitsFields")]
pub struct SpeedLimits {
    min: u16,
    max: u16,
}

#[derive(Deserialize)]
struct SpeedLimitsFields {
    min: u16,
    max: u16,
}

impl TryFrom<SpeedLimitsFields> for SpeedLimits {
    type Error = Error;

    fn try_from(fields: SpeedLimitsFields) -> Result<Self> {
        Self::new(fields.min, fields.max)
    }
}

impl Default for SpeedLimits {
    fn default() -> Self {
        Self {
            min: 0,
            max: MAX_DUTY,
        }
    }
}

impl SpeedLimits {
    /// Limits exactly as given.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSpeedLimits`] if `min > max` or `max > 4095`.
    pub const fn new(min: u16, max: u16) -> Result<Self> {
        if min > max || max > MAX_DUTY {
            return Err(Error::InvalidSpeedLimits { min, max });
        }
        Ok(Self { min, max })
    }

    /// Limits repaired rather than rejected: reversed bounds are swapped and both are
    /// clamped to 4095.
    #[must_use]
    pub fn normalized(min: u16, max: u16) -> Self {
        let (min, max) = if min > max { (max, min) } else { (min, max) };
        Self {
            min: min.min(MAX_DUTY),
            max: max.min(MAX_DUTY),
        }
    }

    /// Duty at 0 %.
    #[must_use]
    pub const fn min(&self) -> u16 {
        self.min
    }

    /// Duty at 100 %.
    #[must_use]
    pub const fn max(&self) -> u16 {
        self.max
    }

    /// Off count for `percent` (already checked to be in `0..=100`):
    /// `round(percent * (max - min) / 100) + min`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "percent is within 0..=100, so the result lies within min..=max"
    )]
    pub fn duty_for(&self, percent: f64) -> u16 {
        let span = f64::from(self.max - self.min);
        let offset = (percent * span / 100.0).round().clamp(0.0, span) as u16;
        self.min + offset
    }

    /// Inverse of [`duty_for`](Self::duty_for): `0` at or below `min`, `100` at or above
    /// `max`, otherwise `round((duty - min) * 100 / (max - min))`.
    #[must_use]
    pub fn percent_for(&self, duty: u16) -> f64 {
        if duty <= self.min {
            return 0.0;
        }
        if duty >= self.max {
            return 100.0;
        }
        let span = f64::from(self.max - self.min);
        (f64::from(duty - self.min) * 100.0 / span).round()
    }
}

/// A device abstraction for a pump on one [`Pca9685`] channel.
///
/// Open loop: the speed is a PWM ratio, and [`current_speed`](Self::current_speed) reads
/// back the last commanded duty, not a measurement.
///
/// # Example
///
/// ```
/// use pwm_envoy::{CancelToken, Config, Pca9685, bus::MemoryBus, pump::Pump};
///
/// let pca = Pca9685::new(MemoryBus::new(), Config::default())?;
/// let pump = Pump::with_speed_limits(&pca, 4, 1000, 3500)?;
/// let cancel = CancelToken::new();
///
/// pump.set_speed(50.0, &cancel)?;
/// assert_eq!(pump.current_speed()?, 50.0);
/// pump.stop(&cancel)?;
/// # Ok::<(), pwm_envoy::Error>(())
/// ```
#[derive(Debug)]
pub struct Pump<'a, B> {
    pca: &'a Pca9685<B>,
    channel: u8,
    limits: RwLock<SpeedLimits>,
}

impl<'a, B: RegisterBus> Pump<'a, B> {
    /// Create a pump over the full `0..=4095` duty span and enable its channel.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidChannel`] if `channel` is outside `0..=15`.
    pub fn new(pca: &'a Pca9685<B>, channel: u8) -> Result<Self> {
        Self::with_limits(pca, channel, SpeedLimits::default())
    }

    /// Create a pump with custom speed limits and enable its channel.
    ///
    /// Reversed limits are swapped and both are clamped to 4095 (see
    /// [`SpeedLimits::normalized`]).
    ///
    /// # Errors
    ///
    /// [`Error::InvalidChannel`] if `channel` is outside `0..=15`.
    pub fn with_speed_limits(pca: &'a Pca9685<B>, channel: u8, min: u16, max: u16) -> Result<Self> {
        Self::with_limits(pca, channel, SpeedLimits::normalized(min, max))
    }

    /// Create a pump with already-validated speed limits, for example ones loaded from a
    /// configuration file, and enable its channel.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidChannel`] if `channel` is outside `0..=15`.
    pub fn with_limits(pca: &'a Pca9685<B>, channel: u8, limits: SpeedLimits) -> Result<Self> {
        pca.enable(&[channel])
            .inspect_err(|error| error!("Pump::new: {}", error))?;
        info!(
            "Pump::new: channel {}, limits {}..={}",
            channel,
            limits.min,
            limits.max
        );
        Ok(Self {
            pca,
            channel,
            limits: RwLock::new(limits),
        })
    }

    fn limits(&self) -> SpeedLimits {
        *self.limits.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run at `percent` of the speed span.
    ///
    /// # Errors
    ///
    /// [`Error::PercentOutOfRange`] outside `0..=100`, otherwise any error from
    /// [`Pca9685::set_pwm`].
    pub fn set_speed(&self, percent: f64, cancel: &CancelToken) -> Result<()> {
        debug!("Pump::set_speed: channel {}, {} %", self.channel, percent);
        if !(0.0..=100.0).contains(&percent) {
            let error = Error::PercentOutOfRange { percent };
            error!("Pump::set_speed: {}", error);
            return Err(error);
        }
        let duty = self.limits().duty_for(percent);
        self.pca.set_pwm(self.channel, 0, duty, cancel)
    }

    /// Speed of 0 %.
    ///
    /// # Errors
    ///
    /// Any error from [`set_speed`](Self::set_speed).
    pub fn stop(&self, cancel: &CancelToken) -> Result<()> {
        info!("Pump::stop: channel {}", self.channel);
        self.set_speed(0.0, cancel)
    }

    /// Last commanded speed, recovered from the channel's recorded off count with the
    /// current limits.
    ///
    /// Changing the limits changes how an earlier command reads back.
    ///
    /// # Errors
    ///
    /// Any error from [`Pca9685::channel_state`].
    pub fn current_speed(&self) -> Result<f64> {
        let state = self.pca.channel_state(self.channel)?;
        Ok(self.limits().percent_for(state.off))
    }

    /// Replace the speed limits used from now on, in both directions.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidSpeedLimits`] if `min > max` or `max > 4095`; the old limits stay.
    pub fn set_speed_limits(&self, min: u16, max: u16) -> Result<()> {
        let limits = SpeedLimits::new(min, max)
            .inspect_err(|error| error!("Pump::set_speed_limits: {}", error))?;
        debug!("Pump::set_speed_limits: {}..={}", min, max);
        *self.limits.write().unwrap_or_else(PoisonError::into_inner) = limits;
        Ok(())
    }

    /// Current speed limits.
    #[must_use]
    pub fn speed_limits(&self) -> SpeedLimits {
        self.limits()
    }

    /// Channel the pump is on.
    #[must_use]
    pub const fn channel(&self) -> u8 {
        self.channel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reversed_limits_are_rejected() {
        assert_eq!(
            SpeedLimits::new(3000, 1000),
            Err(Error::InvalidSpeedLimits { min: 3000, max: 1000 })
        );
        assert_eq!(
            SpeedLimits::new(0, 4096),
            Err(Error::InvalidSpeedLimits { min: 0, max: 4096 })
        );
    }

    #[test]
    fn normalized_swaps_and_clamps() {
        let limits = SpeedLimits::normalized(3000, 1000);
        assert_eq!((limits.min(), limits.max()), (1000, 3000));

        let limits = SpeedLimits::normalized(100, 9000);
        assert_eq!((limits.min(), limits.max()), (100, 4095));

        let limits = SpeedLimits::normalized(5000, 6000);
        assert_eq!((limits.min(), limits.max()), (4095, 4095));
    }

    #[test]
    fn forward_law_hits_the_limits() -> Result<()> {
        let limits = SpeedLimits::new(1000, 3500)?;
        assert_eq!(limits.duty_for(0.0), 1000);
        assert_eq!(limits.duty_for(50.0), 2250);
        assert_eq!(limits.duty_for(100.0), 3500);
        Ok(())
    }

    #[test]
    fn inverse_law_saturates() -> Result<()> {
        let limits = SpeedLimits::new(1000, 3500)?;
        assert!(limits.percent_for(0) == 0.0);
        assert!(limits.percent_for(1000) == 0.0);
        assert!(limits.percent_for(2250) == 50.0);
        assert!(limits.percent_for(3500) == 100.0);
        assert!(limits.percent_for(4095) == 100.0);
        Ok(())
    }

    #[test]
    fn whole_percent_round_trips() -> Result<()> {
        let limits = SpeedLimits::new(1000, 3500)?;
        for percent in 0..=100_u8 {
            let percent = f64::from(percent);
            let back = limits.percent_for(limits.duty_for(percent));
            assert!((back - percent).abs() <= 0.02, "{percent} came back as {back}");
        }
        Ok(())
    }

    #[test]
    fn degenerate_span_reads_back_as_bounds() -> Result<()> {
        let limits = SpeedLimits::new(2000, 2000)?;
        assert_eq!(limits.duty_for(75.0), 2000);
        assert!(limits.percent_for(2000) == 0.0);
        assert!(limits.percent_for(2001) == 100.0);
        Ok(())
    }
}
