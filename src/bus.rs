//! The register bus the controller talks through, and the adapters that ship with the crate.
//!
//! [`RegisterBus`] is the whole contract: write bytes starting at a register, read bytes
//! starting at a register, release the bus. Nothing is retried, batched or made
//! transactional at this layer.
//!
//! - [`I2cBus`] adapts any [`embedded_hal::i2c::I2c`] implementation, such as
//!   `linux-embedded-hal`'s `I2cdev`.
//! - [`MemoryBus`] (feature `host`) emulates the chip's register file in memory.

#[cfg(feature = "host")]
mod memory;

use core::fmt;
use embedded_hal::i2c::{ErrorKind, I2c, SevenBitAddress};
use heapless::Vec;

#[cfg(feature = "host")]
pub use memory::MemoryBus;

/// Power-on I²C address of a PCA9685 with all address pins low.
pub const DEFAULT_ADDRESS: SevenBitAddress = 0x40;

/// Largest payload [`I2cBus`] sends in a single register write.
pub const MAX_WRITE_LEN: usize = 16;

/// Byte-oriented register access to the peripheral.
///
/// The controller serializes its own calls, so implementations only see one call at a
/// time from a given controller.
pub trait RegisterBus {
    /// Bus failure, classified through [`embedded_hal::i2c::Error::kind`].
    type Error: embedded_hal::i2c::Error;

    /// Write `bytes` starting at `register`.
    ///
    /// # Errors
    ///
    /// Any transport failure.
    fn write_reg(&mut self, register: u8, bytes: &[u8]) -> Result<(), Self::Error>;

    /// Fill `buffer` with the contents of consecutive registers starting at `register`.
    ///
    /// # Errors
    ///
    /// Any transport failure.
    fn read_reg(&mut self, register: u8, buffer: &mut [u8]) -> Result<(), Self::Error>;

    /// Release the bus.
    ///
    /// # Errors
    ///
    /// Any transport failure while releasing.
    fn close(&mut self) -> Result<(), Self::Error>;
}

/// [`RegisterBus`] over an `embedded-hal` I²C bus at a fixed device address.
///
/// # Example
///
/// ```rust,no_run
/// # fn example<I2C: embedded_hal::i2c::I2c + Send>(i2c: I2C) -> pwm_envoy::Result<()> {
/// use pwm_envoy::{Config, Pca9685, bus::I2cBus};
///
/// let pca = Pca9685::new(I2cBus::new(i2c), Config::default())?;
/// pca.close()
/// # }
/// ```
#[derive(Debug)]
pub struct I2cBus<I2C> {
    i2c: I2C,
    address: SevenBitAddress,
}

impl<I2C: I2c> I2cBus<I2C> {
    /// Adapter at [`DEFAULT_ADDRESS`].
    #[must_use]
    pub const fn new(i2c: I2C) -> Self {
        Self::with_address(i2c, DEFAULT_ADDRESS)
    }

    /// Adapter at a custom 7-bit address.
    #[must_use]
    pub const fn with_address(i2c: I2C, address: SevenBitAddress) -> Self {
        Self { i2c, address }
    }

    /// Device address this adapter talks to.
    #[must_use]
    pub const fn address(&self) -> SevenBitAddress {
        self.address
    }

    /// Give back the wrapped bus.
    pub fn release(self) -> I2C {
        self.i2c
    }
}

/// Failure of an [`I2cBus`] access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2cBusError<E> {
    /// The underlying bus failed.
    I2c(E),
    /// The payload does not fit in [`MAX_WRITE_LEN`] bytes.
    PayloadTooLong,
}

impl<E: fmt::Debug> fmt::Display for I2cBusError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I2c(error) => write!(f, "I2C transfer failed: {error:?}"),
            Self::PayloadTooLong => write!(f, "payload longer than {MAX_WRITE_LEN} bytes"),
        }
    }
}

impl<E: fmt::Debug> core::error::Error for I2cBusError<E> {}

impl<E: embedded_hal::i2c::Error> embedded_hal::i2c::Error for I2cBusError<E> {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::I2c(error) => error.kind(),
            Self::PayloadTooLong => ErrorKind::Other,
        }
    }
}

impl<I2C: I2c> RegisterBus for I2cBus<I2C> {
    type Error = I2cBusError<I2C::Error>;

    fn write_reg(&mut self, register: u8, bytes: &[u8]) -> Result<(), Self::Error> {
        let mut frame: Vec<u8, { MAX_WRITE_LEN + 1 }> = Vec::new();
        frame
            .push(register)
            .map_err(|_| I2cBusError::PayloadTooLong)?;
        frame
            .extend_from_slice(bytes)
            .map_err(|()| I2cBusError::PayloadTooLong)?;
        self.i2c
            .write(self.address, &frame)
            .map_err(I2cBusError::I2c)
    }

    fn read_reg(&mut self, register: u8, buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.i2c
            .write_read(self.address, &[register], buffer)
            .map_err(I2cBusError::I2c)
    }

    fn close(&mut self) -> Result<(), Self::Error> {
        // The handle itself is released when the adapter is dropped.
        Ok(())
    }
}
