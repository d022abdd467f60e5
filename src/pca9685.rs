//! The PCA9685 controller: frequency programming and per-channel duty-cycle state.
//!
//! See [`Pca9685`] for usage examples.
//!
//! # Locking
//!
//! Each of the 16 channels has its own reader/writer lock, so writes to different
//! channels never contend. Frequency changes and all-channel broadcasts share one
//! controller-wide exclusive lock; they do not exclude single-channel writes. No
//! operation ever holds more than one channel lock at a time, and the bus mutex is
//! always taken last.

use core::fmt;
use core::time::Duration;
use heapless::FnvIndexMap;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::thread;

use crate::bus::RegisterBus;
use crate::cancel::CancelToken;
use crate::register::{
    ALL_LED, CHANNEL_COUNT, MAX_DUTY, MODE1, MODE1_ALL_CALL, MODE1_AUTO_INCREMENT, MODE1_RESTART,
    MODE1_SLEEP, MODE2, OSCILLATOR_SETTLE, PRESCALE, encode_duty, frequency_in_range,
    led_register, mode2_for, prescale_for,
};
use crate::{Error, Result};

/// Number of interpolation steps [`Pca9685::fade`] takes between its endpoints.
pub const FADE_STEPS: u16 = 20;

/// Default output frequency (Hz).
pub const DEFAULT_FREQUENCY: f64 = 1000.0;

/// Controller configuration.
///
/// Loadable with any `serde` format; the cancellation token is never serialized and
/// defaults to one that never fires.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Output frequency programmed at construction, `24..=1526` Hz.
    pub initial_frequency: f64,
    /// Invert the output logic.
    pub invert_logic: bool,
    /// Open-drain outputs instead of push-pull.
    pub open_drain: bool,
    /// Parent of the controller's own token. Cancelling it shuts down operations that
    /// run without an explicit token, such as [`Pca9685::set_frequency`] and
    /// [`Pca9685::disable`].
    #[serde(skip)]
    pub cancel: CancelToken,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            initial_frequency: DEFAULT_FREQUENCY,
            invert_logic: false,
            open_drain: false,
            cancel: CancelToken::new(),
        }
    }
}

/// One on/off register pair, in counts within the 4096-tick cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Duty {
    /// Count at which the output goes high.
    pub on: u16,
    /// Count at which the output goes low.
    pub off: u16,
}

impl Duty {
    /// Duty pair from explicit counts.
    #[must_use]
    pub const fn new(on: u16, off: u16) -> Self {
        Self { on, off }
    }

    /// Duty pair that goes high at count 0 and low at `off`.
    #[must_use]
    pub const fn from_off(off: u16) -> Self {
        Self { on: 0, off }
    }
}

/// Per-channel settings for [`Pca9685::set_multi_pwm`], applied in insertion order.
pub type PwmMap = FnvIndexMap<u8, Duty, CHANNEL_COUNT>;

/// Snapshot of one channel's recorded state.
///
/// `on`/`off` are the last values written while the channel was enabled. A disabled
/// channel keeps them here even though the chip is told to output nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ChannelState {
    /// Whether writes to the channel are accepted.
    pub enabled: bool,
    /// Recorded on count.
    pub on: u16,
    /// Recorded off count.
    pub off: u16,
}

impl ChannelState {
    const INITIAL: Self = Self {
        enabled: true,
        on: 0,
        off: 0,
    };
}

/// Snapshot of the whole controller, see [`Pca9685::dump_state`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ControllerState {
    /// Last successfully programmed frequency (Hz).
    pub frequency: f64,
    /// Every channel, by index.
    pub channels: [ChannelState; CHANNEL_COUNT],
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "PCA9685 state: frequency {} Hz", self.frequency)?;
        for (index, channel) in self.channels.iter().enumerate() {
            writeln!(
                f,
                "channel {index}: enabled={}, on={}, off={}",
                channel.enabled, channel.on, channel.off
            )?;
        }
        Ok(())
    }
}

/// A 16-channel, 12-bit PWM controller on a [`RegisterBus`].
///
/// All methods take `&self`; share the controller between threads by reference (for
/// example with [`std::thread::scope`]) or behind an `Arc`.
///
/// # Example
///
/// ```
/// use pwm_envoy::{CancelToken, Config, Pca9685, PwmMap, Duty, bus::MemoryBus};
///
/// let pca = Pca9685::new(MemoryBus::new(), Config::default())?;
/// let cancel = CancelToken::new();
///
/// pca.set_frequency(50.0)?;
/// pca.set_pwm(0, 0, 307, &cancel)?;
///
/// let mut batch = PwmMap::new();
/// batch.insert(1, Duty::from_off(1024)).ok();
/// batch.insert(2, Duty::from_off(2048)).ok();
/// pca.set_multi_pwm(&batch, &cancel)?;
///
/// pca.disable(&[0])?;
/// assert!(!pca.channel_state(0)?.enabled);
/// pca.close()?;
/// # Ok::<(), pwm_envoy::Error>(())
/// ```
pub struct Pca9685<B> {
    bus: Mutex<B>,
    frequency: RwLock<f64>,
    channels: [RwLock<ChannelState>; CHANNEL_COUNT],
    cancel: CancelToken,
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

const fn check_duty(value: u16) -> Result<()> {
    if value > MAX_DUTY {
        return Err(Error::DutyOutOfRange { value });
    }
    Ok(())
}

/// Off count for `step` of a [`FADE_STEPS`]-step linear fade from `start` to `end`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "the interpolated value lies between two u16 endpoints"
)]
fn fade_value(start: u16, end: u16, step: u16) -> u16 {
    let delta = f64::from(end) - f64::from(start);
    let value = f64::from(start) + delta * f64::from(step) / f64::from(FADE_STEPS);
    value.round() as u16
}

impl<B: RegisterBus> Pca9685<B> {
    /// Take ownership of `bus` and bring the chip into a known state.
    ///
    /// Resets MODE1 (sleep, auto-increment), programs MODE2 from the output-stage flags,
    /// then programs `config.initial_frequency`. No controller is returned unless every
    /// step succeeds, but the chip may be left part-way through the sequence.
    ///
    /// # Errors
    ///
    /// [`Error::FrequencyOutOfRange`] before any bus traffic, a bus error from any step, or a
    /// cancellation error if `config.cancel` has already fired.
    pub fn new(bus: B, config: Config) -> Result<Self> {
        info!(
            "Pca9685::new: initial frequency {} Hz, invert {}, open-drain {}",
            config.initial_frequency,
            config.invert_logic,
            config.open_drain
        );
        if !frequency_in_range(config.initial_frequency) {
            let error = Error::FrequencyOutOfRange {
                hz: config.initial_frequency,
            };
            error!("Pca9685::new: {}", error);
            return Err(error);
        }

        let pca = Self {
            bus: Mutex::new(bus),
            frequency: RwLock::new(0.0),
            channels: core::array::from_fn(|_| RwLock::new(ChannelState::INITIAL)),
            cancel: config.cancel.child(),
        };

        pca.reset()?;
        let mode2 = mode2_for(config.invert_logic, config.open_drain);
        pca.write_reg(MODE2, &[mode2])
            .inspect_err(|error| error!("Pca9685::new: MODE2 write failed: {}", error))?;
        debug!("Pca9685::new: MODE2 = {}", mode2);
        pca.set_frequency(config.initial_frequency)?;

        Ok(pca)
    }

    fn with_bus<R>(
        &self,
        register: u8,
        access: impl FnOnce(&mut B) -> Result<R, B::Error>,
    ) -> Result<R> {
        let mut bus = self.bus.lock().unwrap_or_else(PoisonError::into_inner);
        access(&mut bus).map_err(|error| Error::bus(register, &error))
    }

    fn write_reg(&self, register: u8, bytes: &[u8]) -> Result<()> {
        self.with_bus(register, |bus| bus.write_reg(register, bytes))
    }

    fn read_mode1(&self) -> Result<u8> {
        let mut data = [0_u8];
        self.with_bus(MODE1, |bus| bus.read_reg(MODE1, &mut data))
            .inspect_err(|error| error!("read_mode1: {}", error))?;
        let [mode] = data;
        trace!("read_mode1: {}", mode);
        Ok(mode)
    }

    fn slot(&self, channel: u8) -> Result<&RwLock<ChannelState>> {
        self.channels
            .get(usize::from(channel))
            .ok_or(Error::InvalidChannel { channel })
    }

    fn channel_registers(&self, channel: u8) -> Result<(&RwLock<ChannelState>, u8)> {
        let register = led_register(channel).ok_or(Error::InvalidChannel { channel })?;
        Ok((self.slot(channel)?, register))
    }

    /// The controller's own cancellation token, a child of [`Config::cancel`] that also
    /// fires on [`close`](Self::close).
    #[must_use]
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Last successfully programmed output frequency (Hz).
    #[must_use]
    pub fn frequency(&self) -> f64 {
        *read(&self.frequency)
    }

    /// Put the chip to sleep with register auto-increment on.
    ///
    /// # Errors
    ///
    /// A bus error from the MODE1 write.
    pub fn reset(&self) -> Result<()> {
        info!("Pca9685::reset");
        let _frequency = write(&self.frequency);
        self.write_reg(MODE1, &[MODE1_SLEEP | MODE1_AUTO_INCREMENT])
            .inspect_err(|error| error!("reset: MODE1 write failed: {}", error))
    }

    /// Make the chip respond to the LED all-call I²C address.
    ///
    /// # Errors
    ///
    /// A bus error from the MODE1 read or write.
    pub fn enable_all_call(&self) -> Result<()> {
        info!("Pca9685::enable_all_call");
        let _frequency = write(&self.frequency);
        let mode = self.read_mode1()?;
        self.write_reg(MODE1, &[mode | MODE1_ALL_CALL])
    }

    /// Program the output frequency (Hz).
    ///
    /// Puts the oscillator to sleep, writes the prescaler, wakes the oscillator, waits
    /// for it to settle, then restarts PWM with auto-increment on. The wake-up write is
    /// the previous MODE1 with SLEEP cleared rather than the previous MODE1 verbatim, so
    /// a chip that was asleep (as after [`reset`](Self::reset)) ends up running. The recorded frequency
    /// only changes once the whole sequence has succeeded; after a failure the chip's
    /// real state is unknown.
    ///
    /// # Errors
    ///
    /// [`Error::FrequencyOutOfRange`] outside `24..=1526` Hz, a cancellation error if the
    /// controller token has fired, or a bus error from any step.
    pub fn set_frequency(&self, hz: f64) -> Result<()> {
        info!("Pca9685::set_frequency: {} Hz", hz);
        if !frequency_in_range(hz) {
            let error = Error::FrequencyOutOfRange { hz };
            error!("set_frequency: {}", error);
            return Err(error);
        }

        let mut frequency = write(&self.frequency);
        self.cancel.check()?;

        let prescale = prescale_for(hz);
        debug!("set_frequency: prescale {}", prescale);

        let old_mode = self.read_mode1()?;
        let awake = old_mode & !MODE1_SLEEP;
        let sequence = [
            (MODE1, (old_mode & !MODE1_RESTART) | MODE1_SLEEP),
            (PRESCALE, prescale),
            (MODE1, awake),
        ];
        for (register, value) in sequence {
            self.write_reg(register, &[value])
                .inspect_err(|error| error!("set_frequency: {}", error))?;
        }
        thread::sleep(OSCILLATOR_SETTLE);
        self.write_reg(MODE1, &[awake | MODE1_RESTART | MODE1_AUTO_INCREMENT])
            .inspect_err(|error| error!("set_frequency: restart failed: {}", error))?;

        *frequency = hz;
        debug!("set_frequency: now {} Hz", hz);
        Ok(())
    }

    /// Set one channel's on/off counts.
    ///
    /// The bus write and the recorded state change happen under the channel's exclusive
    /// lock.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidChannel`], [`Error::DutyOutOfRange`], [`Error::ChannelDisabled`], a
    /// cancellation error if `cancel` has fired, or a bus error.
    pub fn set_pwm(&self, channel: u8, on: u16, off: u16, cancel: &CancelToken) -> Result<()> {
        debug!("set_pwm: channel {}, on={}, off={}", channel, on, off);
        let (slot, register) = self.channel_registers(channel)?;
        check_duty(on)?;
        check_duty(off)?;

        let mut state = write(slot);
        if !state.enabled {
            warn!("set_pwm: channel {} is disabled", channel);
            return Err(Error::ChannelDisabled { channel });
        }
        cancel
            .check()
            .inspect_err(|error| warn!("set_pwm: channel {}: {}", channel, error))?;
        self.write_reg(register, &encode_duty(on, off))
            .inspect_err(|error| error!("set_pwm: channel {}: {}", channel, error))?;

        state.on = on;
        state.off = off;
        Ok(())
    }

    /// Set every channel at once through the broadcast registers.
    ///
    /// The chip applies the broadcast to all outputs; only enabled channels have their
    /// recorded state updated.
    ///
    /// # Errors
    ///
    /// [`Error::DutyOutOfRange`], a cancellation error if `cancel` has fired, or a bus
    /// error.
    pub fn set_all_pwm(&self, on: u16, off: u16, cancel: &CancelToken) -> Result<()> {
        info!("Pca9685::set_all_pwm: on={}, off={}", on, off);
        check_duty(on)?;
        check_duty(off)?;

        let _frequency = write(&self.frequency);
        cancel
            .check()
            .inspect_err(|error| warn!("set_all_pwm: {}", error))?;
        self.write_reg(ALL_LED, &encode_duty(on, off))
            .inspect_err(|error| error!("set_all_pwm: {}", error))?;

        for slot in &self.channels {
            let mut state = write(slot);
            if state.enabled {
                state.on = on;
                state.off = off;
            }
        }
        Ok(())
    }

    /// Set several channels, one bus write each, in the map's insertion order.
    ///
    /// Every channel index and count is validated before anything is written. The batch
    /// is not atomic: if cancellation fires or a write fails part-way, channels already
    /// written keep their new values and the rest are left as they were.
    ///
    /// # Errors
    ///
    /// The first validation error, or the first error from an individual
    /// [`set_pwm`](Self::set_pwm).
    pub fn set_multi_pwm(&self, settings: &PwmMap, cancel: &CancelToken) -> Result<()> {
        info!("Pca9685::set_multi_pwm: {} channels", settings.len());
        for (&channel, duty) in settings {
            self.slot(channel)
                .and_then(|_| check_duty(duty.on))
                .and_then(|()| check_duty(duty.off))
                .inspect_err(|error| error!("set_multi_pwm: {}", error))?;
        }

        for (&channel, duty) in settings {
            cancel.check().inspect_err(|error| {
                warn!("set_multi_pwm: stopped before channel {}: {}", channel, error);
            })?;
            self.set_pwm(channel, duty.on, duty.off, cancel)?;
        }
        Ok(())
    }

    /// Accept writes on the given channels again.
    ///
    /// The outputs stay silent until the next write.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidChannel`] if any index is invalid, in which case nothing changes.
    pub fn enable(&self, channels: &[u8]) -> Result<()> {
        info!("Pca9685::enable: {} channels", channels.len());
        self.validate_channels(channels)?;
        for &channel in channels {
            write(self.slot(channel)?).enabled = true;
        }
        Ok(())
    }

    /// Reject writes on the given channels and silence their outputs.
    ///
    /// Each channel is marked disabled, then its registers are set to zero/zero using the
    /// controller token. The recorded on/off values are kept. If a silencing write fails,
    /// the channel stays disabled and the error is returned.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidChannel`] if any index is invalid (nothing changes), otherwise the
    /// first cancellation or bus error.
    pub fn disable(&self, channels: &[u8]) -> Result<()> {
        info!("Pca9685::disable: {} channels", channels.len());
        self.validate_channels(channels)?;
        for &channel in channels {
            let (slot, register) = self.channel_registers(channel)?;
            let mut state = write(slot);
            state.enabled = false;
            self.cancel
                .check()
                .and_then(|()| self.write_reg(register, &encode_duty(0, 0)))
                .inspect_err(|error| {
                    error!("disable: channel {} left logically disabled: {}", channel, error);
                })?;
        }
        Ok(())
    }

    fn validate_channels(&self, channels: &[u8]) -> Result<()> {
        for &channel in channels {
            self.slot(channel)
                .inspect_err(|error| error!("validate_channels: {}", error))?;
        }
        Ok(())
    }

    /// Ramp a channel's off count linearly from `start` to `end` over `duration`.
    ///
    /// Writes [`FADE_STEPS`]` + 1` values (both endpoints included) with `on = 0`, evenly
    /// spaced in time. Each step is a separate register write.
    ///
    /// # Errors
    ///
    /// Validation errors before the first write; otherwise the first error from a step,
    /// including a cancellation error the first time `cancel` is seen fired.
    pub fn fade(
        &self,
        channel: u8,
        start: u16,
        end: u16,
        duration: Duration,
        cancel: &CancelToken,
    ) -> Result<()> {
        info!(
            "Pca9685::fade: channel {} from {} to {} over {} ms",
            channel,
            start,
            end,
            duration.as_millis()
        );
        self.slot(channel)?;
        check_duty(start)?;
        check_duty(end)?;

        let step_duration = duration / u32::from(FADE_STEPS);
        for step in 0..=FADE_STEPS {
            if step > 0 {
                thread::sleep(step_duration);
            }
            cancel.check().inspect_err(|error| {
                warn!("fade: channel {} stopped at step {}: {}", channel, step, error);
            })?;
            let value = fade_value(start, end, step);
            self.set_pwm(channel, 0, value, cancel)?;
            trace!("fade: channel {} step {} -> {}", channel, step, value);
        }
        info!("Pca9685::fade: channel {} done", channel);
        Ok(())
    }

    /// Recorded state of one channel.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidChannel`].
    pub fn channel_state(&self, channel: u8) -> Result<ChannelState> {
        let state = *read(self.slot(channel)?);
        trace!(
            "channel_state: channel {}: enabled={}, on={}, off={}",
            channel,
            state.enabled,
            state.on,
            state.off
        );
        Ok(state)
    }

    /// Snapshot of the frequency and every channel.
    ///
    /// Channels are read one at a time, so concurrent writers may be seen part-way.
    #[must_use]
    pub fn dump_state(&self) -> ControllerState {
        let frequency = *read(&self.frequency);
        let mut channels = [ChannelState::INITIAL; CHANNEL_COUNT];
        for (snapshot, slot) in channels.iter_mut().zip(&self.channels) {
            *snapshot = *read(slot);
        }
        ControllerState {
            frequency,
            channels,
        }
    }

    /// Fire the controller token and release the bus.
    ///
    /// # Errors
    ///
    /// [`Error::BusClose`] if the bus fails to release.
    pub fn close(self) -> Result<()> {
        info!("Pca9685::close");
        self.cancel.cancel();
        let mut bus = self.bus.into_inner().unwrap_or_else(PoisonError::into_inner);
        bus.close().map_err(|error| Error::BusClose {
            kind: embedded_hal::i2c::Error::kind(&error),
        })
    }
}

impl<B> fmt::Debug for Pca9685<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pca9685")
            .field("frequency", &*read(&self.frequency))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fade_hits_both_endpoints() {
        assert_eq!(fade_value(100, 4000, 0), 100);
        assert_eq!(fade_value(100, 4000, FADE_STEPS), 4000);
        assert_eq!(fade_value(4095, 0, FADE_STEPS), 0);
    }

    #[test]
    fn fade_interpolates_downward() {
        assert_eq!(fade_value(4095, 0, 10), 2048);
        assert_eq!(fade_value(2000, 1000, 5), 1750);
    }

    #[test]
    fn flat_fade_stays_put() {
        for step in 0..=FADE_STEPS {
            assert_eq!(fade_value(1234, 1234, step), 1234);
        }
    }

    #[test]
    fn duty_limit_is_4095() {
        assert_eq!(check_duty(4095), Ok(()));
        assert_eq!(check_duty(4096), Err(Error::DutyOutOfRange { value: 4096 }));
    }

    #[test]
    fn dump_renders_every_channel() {
        let state = ControllerState {
            frequency: 1000.0,
            channels: [ChannelState::INITIAL; CHANNEL_COUNT],
        };
        let text = state.to_string();
        assert!(text.starts_with("PCA9685 state: frequency 1000 Hz\n"));
        assert!(text.contains("channel 15: enabled=true, on=0, off=0\n"));
        assert_eq!(text.lines().count(), 17);
    }
}
