#![allow(
    clippy::indexing_slicing,
    reason = "addresses come from u8 registers and the file holds all 256 of them"
)]

use embedded_hal::i2c::ErrorKind;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::RegisterBus;
use crate::register::{ALL_LED, CHANNEL_COUNT, LED0};

const REGISTER_COUNT: usize = 256;

/// In-memory emulation of the PCA9685 register file.
///
/// Writes land at consecutive addresses (auto-increment), reads of registers that were
/// never written return zeros, and a write to the broadcast registers is mirrored into
/// every channel's on/off block. Clones share the same registers, so a test can keep one
/// handle while the controller owns another.
///
/// Faults can be injected to exercise error paths.
///
/// # Example
///
/// ```
/// use pwm_envoy::{CancelToken, Config, Pca9685, bus::MemoryBus};
///
/// let bus = MemoryBus::new();
/// let pca = Pca9685::new(bus.clone(), Config::default())?;
/// pca.set_pwm(2, 0, 2048, &CancelToken::new())?;
/// assert_eq!(bus.channel(2), (0, 2048));
/// # Ok::<(), pwm_envoy::Error>(())
/// ```
#[derive(Clone, Debug, Default)]
pub struct MemoryBus {
    state: Arc<Mutex<State>>,
}

#[derive(Debug)]
struct State {
    registers: [u8; REGISTER_COUNT],
    journal: Vec<(u8, Vec<u8>)>,
    writes_before_failure: Option<usize>,
    failing_register: Option<u8>,
    fail_reads: bool,
    closed: bool,
}

impl Default for State {
    fn default() -> Self {
        Self {
            registers: [0; REGISTER_COUNT],
            journal: Vec::new(),
            writes_before_failure: None,
            failing_register: None,
            fail_reads: false,
            closed: false,
        }
    }
}

impl MemoryBus {
    /// Fresh register file, all zeros.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current value of one register.
    #[must_use]
    pub fn register(&self, register: u8) -> u8 {
        self.state().registers[usize::from(register)]
    }

    /// Recorded `(on, off)` counts of a channel's registers.
    ///
    /// # Panics
    ///
    /// If `channel` is not below 16.
    #[must_use]
    pub fn channel(&self, channel: u8) -> (u16, u16) {
        assert!(usize::from(channel) < CHANNEL_COUNT, "channel out of range");
        let state = self.state();
        let base = usize::from(LED0) + 4 * usize::from(channel);
        let read = |offset: usize| {
            u16::from_le_bytes([state.registers[base + offset], state.registers[base + offset + 1]])
        };
        (read(0), read(2))
    }

    /// Every successful write so far, as `(register, payload)`.
    #[must_use]
    pub fn journal(&self) -> Vec<(u8, Vec<u8>)> {
        self.state().journal.clone()
    }

    /// Forget the write journal.
    pub fn clear_journal(&self) {
        self.state().journal.clear();
    }

    /// Number of successful writes so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.state().journal.len()
    }

    /// Let `count` more writes succeed, then fail every write after them.
    pub fn fail_writes_after(&self, count: usize) {
        self.state().writes_before_failure = Some(count);
    }

    /// Fail every write that starts at `register`.
    pub fn fail_register(&self, register: u8) {
        self.state().failing_register = Some(register);
    }

    /// Fail every read.
    pub fn fail_reads(&self) {
        self.state().fail_reads = true;
    }

    /// Remove every injected fault.
    pub fn heal(&self) {
        let mut state = self.state();
        state.writes_before_failure = None;
        state.failing_register = None;
        state.fail_reads = false;
    }

    /// `true` once [`RegisterBus::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }
}

impl State {
    fn store(&mut self, register: u8, bytes: &[u8]) {
        for (offset, byte) in bytes.iter().enumerate() {
            let address = (usize::from(register) + offset) % REGISTER_COUNT;
            self.registers[address] = *byte;
        }
        let broadcast = usize::from(ALL_LED)..usize::from(ALL_LED) + 4;
        for (offset, byte) in bytes.iter().enumerate() {
            let address = usize::from(register) + offset;
            if broadcast.contains(&address) {
                let field = address - broadcast.start;
                for channel in 0..CHANNEL_COUNT {
                    self.registers[usize::from(LED0) + 4 * channel + field] = *byte;
                }
            }
        }
    }
}

impl RegisterBus for MemoryBus {
    type Error = ErrorKind;

    fn write_reg(&mut self, register: u8, bytes: &[u8]) -> Result<(), Self::Error> {
        let mut state = self.state();
        if state.failing_register == Some(register) {
            return Err(ErrorKind::Other);
        }
        if let Some(remaining) = state.writes_before_failure {
            if remaining == 0 {
                return Err(ErrorKind::Other);
            }
            state.writes_before_failure = Some(remaining - 1);
        }
        state.store(register, bytes);
        state.journal.push((register, bytes.to_vec()));
        Ok(())
    }

    fn read_reg(&mut self, register: u8, buffer: &mut [u8]) -> Result<(), Self::Error> {
        let state = self.state();
        if state.fail_reads {
            return Err(ErrorKind::Other);
        }
        for (offset, byte) in buffer.iter_mut().enumerate() {
            *byte = state.registers[(usize::from(register) + offset) % REGISTER_COUNT];
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        self.state().closed = true;
        Ok(())
    }
}
