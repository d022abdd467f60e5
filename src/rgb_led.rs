//! A device abstraction for an RGB LED on three PCA9685 channels.
//!
//! See [`RgbLed`] for usage examples.

use serde::{Deserialize, Serialize};
use std::sync::{PoisonError, RwLock};

use crate::bus::RegisterBus;
use crate::cancel::CancelToken;
use crate::pca9685::{Duty, Pca9685, PwmMap};
use crate::register::MAX_DUTY;
use crate::{Error, Result};

/// RGB color type accepted by [`RgbLed::set_rgb8`].
pub use smart_leds::RGB8;

/// Usable duty-cycle span of one LED channel.
///
/// `min` may exceed `max`; the scaling law still clamps every result to `max`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DutyRange {
    /// Duty at color level 0.
    pub min: u16,
    /// Duty at color level 255 and full brightness.
    pub max: u16,
}

impl Default for DutyRange {
    fn default() -> Self {
        Self {
            min: 0,
            max: MAX_DUTY,
        }
    }
}

/// Per-color duty-cycle spans, used to balance LEDs of different efficiency.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[serde(default)]
pub struct Calibration {
    /// Red channel span.
    pub red: DutyRange,
    /// Green channel span.
    pub green: DutyRange,
    /// Blue channel span.
    pub blue: DutyRange,
}

/// Off count for an 8-bit color level: `round(value * brightness * (max - min) / 255 + min)`,
/// clamped to `max`.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "clamped into 0..=max first"
)]
pub fn color_duty(value: u8, brightness: f64, range: DutyRange) -> u16 {
    let span = f64::from(range.max) - f64::from(range.min);
    let scaled = (f64::from(value) * brightness * span / 255.0 + f64::from(range.min)).round();
    scaled.clamp(0.0, f64::from(range.max)) as u16
}

#[derive(Clone, Copy, Debug)]
struct Settings {
    calibration: Calibration,
    brightness: f64,
}

/// A device abstraction for an RGB LED driven by three [`Pca9685`] channels.
///
/// Every color change goes out as one [`Pca9685::set_multi_pwm`] batch with all three
/// channels in phase (`on = 0`). The batch is not atomic, so a failure can leave the LED
/// showing a mix of the old and new colors.
///
/// # Example
///
/// ```
/// use pwm_envoy::{CancelToken, Config, Pca9685, bus::MemoryBus};
/// use pwm_envoy::rgb_led::{RGB8, RgbLed};
///
/// let pca = Pca9685::new(MemoryBus::new(), Config::default())?;
/// let led = RgbLed::new(&pca, 0, 1, 2)?;
/// let cancel = CancelToken::new();
///
/// led.set_color(255, 128, 0, &cancel)?;   // orange
/// led.set_brightness(0.5)?;                // applies from the next color on
/// led.set_rgb8(RGB8::new(0, 0, 255), &cancel)?;
/// led.off(&cancel)?;
/// # Ok::<(), pwm_envoy::Error>(())
/// ```
#[derive(Debug)]
pub struct RgbLed<'a, B> {
    pca: &'a Pca9685<B>,
    channels: [u8; 3],
    settings: RwLock<Settings>,
}

impl<'a, B: RegisterBus> RgbLed<'a, B> {
    /// Create an LED on the given red, green and blue channels and enable them.
    ///
    /// Starts at full brightness with the default calibration.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidChannel`] if any index is outside `0..=15`.
    pub fn new(pca: &'a Pca9685<B>, red: u8, green: u8, blue: u8) -> Result<Self> {
        debug!("RgbLed::new: channels {}, {}, {}", red, green, blue);
        pca.enable(&[red, green, blue])
            .inspect_err(|error| error!("RgbLed::new: {}", error))?;
        info!("RgbLed::new: ready on channels {}, {}, {}", red, green, blue);
        Ok(Self {
            pca,
            channels: [red, green, blue],
            settings: RwLock::new(Settings {
                calibration: Calibration::default(),
                brightness: 1.0,
            }),
        })
    }

    /// Show a color given as 8-bit levels.
    ///
    /// # Errors
    ///
    /// Any error from [`Pca9685::set_multi_pwm`].
    pub fn set_color(&self, red: u8, green: u8, blue: u8, cancel: &CancelToken) -> Result<()> {
        debug!("RgbLed::set_color: {}, {}, {}", red, green, blue);
        let Settings {
            calibration,
            brightness,
        } = *self.settings.read().unwrap_or_else(PoisonError::into_inner);
        let [red_channel, green_channel, blue_channel] = self.channels;
        let batch: PwmMap = [
            (red_channel, color_duty(red, brightness, calibration.red)),
            (green_channel, color_duty(green, brightness, calibration.green)),
            (blue_channel, color_duty(blue, brightness, calibration.blue)),
        ]
        .into_iter()
        .map(|(channel, off)| (channel, Duty::from_off(off)))
        .collect();
        self.pca
            .set_multi_pwm(&batch, cancel)
            .inspect_err(|error| error!("RgbLed::set_color: {}", error))
    }

    /// Show an [`RGB8`] color.
    ///
    /// # Errors
    ///
    /// Any error from [`set_color`](Self::set_color).
    pub fn set_rgb8(&self, color: RGB8, cancel: &CancelToken) -> Result<()> {
        self.set_color(color.r, color.g, color.b, cancel)
    }

    /// Full white at the current brightness.
    ///
    /// # Errors
    ///
    /// Any error from [`set_color`](Self::set_color).
    pub fn on(&self, cancel: &CancelToken) -> Result<()> {
        info!("RgbLed::on");
        self.set_color(u8::MAX, u8::MAX, u8::MAX, cancel)
    }

    /// All three channels dark.
    ///
    /// # Errors
    ///
    /// Any error from [`set_color`](Self::set_color).
    pub fn off(&self, cancel: &CancelToken) -> Result<()> {
        info!("RgbLed::off");
        self.set_color(0, 0, 0, cancel)
    }

    /// Scale later colors by `brightness` in `0.0..=1.0`.
    ///
    /// The color already showing is not changed.
    ///
    /// # Errors
    ///
    /// [`Error::BrightnessOutOfRange`].
    pub fn set_brightness(&self, brightness: f64) -> Result<()> {
        debug!("RgbLed::set_brightness: {}", brightness);
        if !(0.0..=1.0).contains(&brightness) {
            let error = Error::BrightnessOutOfRange { brightness };
            error!("RgbLed::set_brightness: {}", error);
            return Err(error);
        }
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .brightness = brightness;
        Ok(())
    }

    /// Current brightness.
    #[must_use]
    pub fn brightness(&self) -> f64 {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .brightness
    }

    /// Replace the calibration used by later colors.
    pub fn set_calibration(&self, calibration: Calibration) {
        debug!("RgbLed::set_calibration");
        self.settings
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .calibration = calibration;
    }

    /// Current calibration.
    #[must_use]
    pub fn calibration(&self) -> Calibration {
        self.settings
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .calibration
    }

    /// The red, green and blue channel indices.
    #[must_use]
    pub const fn channels(&self) -> [u8; 3] {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: DutyRange = DutyRange { min: 0, max: 4095 };

    #[test]
    fn full_scale_levels() {
        assert_eq!(color_duty(255, 1.0, FULL), 4095);
        assert_eq!(color_duty(0, 1.0, FULL), 0);
        assert_eq!(color_duty(128, 1.0, FULL), 2056);
    }

    #[test]
    fn brightness_scales_before_rounding() {
        assert_eq!(color_duty(255, 0.5, FULL), 2048);
        assert_eq!(color_duty(255, 0.0, FULL), 0);
    }

    #[test]
    fn calibrated_span_is_offset_by_min() {
        let range = DutyRange { min: 1000, max: 3000 };
        assert_eq!(color_duty(0, 1.0, range), 1000);
        assert_eq!(color_duty(255, 1.0, range), 3000);
        assert_eq!(color_duty(51, 1.0, range), 1400);
    }

    #[test]
    fn reversed_span_is_clamped_to_max() {
        let range = DutyRange { min: 3000, max: 1000 };
        assert_eq!(color_duty(0, 1.0, range), 1000);
        assert_eq!(color_duty(255, 1.0, range), 1000);
    }
}
