//! Serial EEPROM driver (25LC256)
//!
//! Word-aligned reads and writes of 16, 32 and 64-bit values over SPI.
//! Values are stored most-significant byte first. Each access waits for
//! any write cycle still in progress, and every write sets the
//! write-enable latch again first because the chip clears it at the end
//! of each write.

use embedded_hal::delay::DelayNs;
use embedded_hal::spi::{Operation, SpiDevice};

use crate::config::{NVM_BUSY_POLL_INTERVAL_US, NVM_BUSY_POLL_LIMIT, NVM_PAGE_SIZE, NVM_SIZE};

// ===================================================================
// Instruction Set
// ===================================================================

pub const CMD_WRSR: u8 = 0x01; // Write status register
pub const CMD_WRITE: u8 = 0x02; // Write data
pub const CMD_READ: u8 = 0x03; // Read data
pub const CMD_WRDI: u8 = 0x04; // Reset write enable latch
pub const CMD_RDSR: u8 = 0x05; // Read status register
pub const CMD_WREN: u8 = 0x06; // Set write enable latch

pub const STATUS_WIP: u8 = 0x01; // Write in progress
pub const STATUS_WEL: u8 = 0x02; // Write enable latch

// ===================================================================
// Errors
// ===================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NvmError {
    /// Address is not word aligned
    Misaligned(u16),
    /// Write would wrap around inside a page
    CrossesPage(u16),
    /// Access runs past the end of the array
    OutOfRange(u16),
    /// Write-in-progress never cleared
    Busy,
    /// SPI transfer failed
    Bus,
}

/// 16-bit cell storage used to persist the machine record
pub trait CellStore {
    fn read_cell(&mut self, address: u16) -> Result<u16, NvmError>;
    fn write_cell(&mut self, address: u16, value: u16) -> Result<(), NvmError>;
}

// ===================================================================
// Driver
// ===================================================================

pub struct Eeprom<SPI, D> {
    spi: SPI,
    delay: D,
}

impl<SPI, D> Eeprom<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    pub fn new(spi: SPI, delay: D) -> Self {
        Self { spi, delay }
    }

    /// Check the device answers and is not stuck mid-write
    pub fn initialize(&mut self) -> Result<u8, NvmError> {
        let status = self.read_status()?;
        info!("EEPROM status register: {=u8:#x}", status);
        if status & STATUS_WIP != 0 {
            self.wait_ready()?;
        }
        Ok(status)
    }

    pub fn read_status(&mut self) -> Result<u8, NvmError> {
        let mut status = [0u8; 1];
        self.spi
            .transaction(&mut [Operation::Write(&[CMD_RDSR]), Operation::Read(&mut status)])
            .map_err(|_| NvmError::Bus)?;
        Ok(status[0])
    }

    /// Poll the status register until the write cycle completes
    pub fn wait_ready(&mut self) -> Result<(), NvmError> {
        for _ in 0..NVM_BUSY_POLL_LIMIT {
            if self.read_status()? & STATUS_WIP == 0 {
                return Ok(());
            }
            self.delay.delay_us(NVM_BUSY_POLL_INTERVAL_US);
        }
        warn!("EEPROM busy after {} status polls", NVM_BUSY_POLL_LIMIT);
        Err(NvmError::Busy)
    }

    fn write_enable(&mut self) -> Result<(), NvmError> {
        self.spi.write(&[CMD_WREN]).map_err(|_| NvmError::Bus)
    }

    fn check_span(address: u16, len: usize, write: bool) -> Result<(), NvmError> {
        if address % 2 != 0 {
            return Err(NvmError::Misaligned(address));
        }
        if u32::from(address) + len as u32 > NVM_SIZE {
            return Err(NvmError::OutOfRange(address));
        }
        if write && usize::from(address % NVM_PAGE_SIZE) + len > usize::from(NVM_PAGE_SIZE) {
            return Err(NvmError::CrossesPage(address));
        }
        Ok(())
    }

    /// Sequential read starting at an even address
    pub fn read_bytes(&mut self, address: u16, buf: &mut [u8]) -> Result<(), NvmError> {
        Self::check_span(address, buf.len(), false)?;
        self.wait_ready()?;

        let [hi, lo] = address.to_be_bytes();
        self.spi
            .transaction(&mut [Operation::Write(&[CMD_READ, hi, lo]), Operation::Read(buf)])
            .map_err(|_| NvmError::Bus)
    }

    /// Page write starting at an even address, within a single page
    pub fn write_bytes(&mut self, address: u16, data: &[u8]) -> Result<(), NvmError> {
        Self::check_span(address, data.len(), true)?;
        self.wait_ready()?;
        self.write_enable()?;

        let [hi, lo] = address.to_be_bytes();
        self.spi
            .transaction(&mut [Operation::Write(&[CMD_WRITE, hi, lo]), Operation::Write(data)])
            .map_err(|_| NvmError::Bus)
    }

    pub fn read_u16(&mut self, address: u16) -> Result<u16, NvmError> {
        let mut buf = [0u8; 2];
        self.read_bytes(address, &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    pub fn write_u16(&mut self, address: u16, value: u16) -> Result<(), NvmError> {
        self.write_bytes(address, &value.to_be_bytes())
    }

    pub fn read_u32(&mut self, address: u16) -> Result<u32, NvmError> {
        let mut buf = [0u8; 4];
        self.read_bytes(address, &mut buf)?;
        Ok(u32::from_be_bytes(buf))
    }

    pub fn write_u32(&mut self, address: u16, value: u32) -> Result<(), NvmError> {
        self.write_bytes(address, &value.to_be_bytes())
    }

    pub fn read_u64(&mut self, address: u16) -> Result<u64, NvmError> {
        let mut buf = [0u8; 8];
        self.read_bytes(address, &mut buf)?;
        Ok(u64::from_be_bytes(buf))
    }

    pub fn write_u64(&mut self, address: u16, value: u64) -> Result<(), NvmError> {
        self.write_bytes(address, &value.to_be_bytes())
    }

    /// Release the SPI device and delay provider
    pub fn release(self) -> (SPI, D) {
        (self.spi, self.delay)
    }
}

impl<SPI, D> CellStore for Eeprom<SPI, D>
where
    SPI: SpiDevice,
    D: DelayNs,
{
    fn read_cell(&mut self, address: u16) -> Result<u16, NvmError> {
        self.read_u16(address)
    }

    fn write_cell(&mut self, address: u16, value: u16) -> Result<(), NvmError> {
        self.write_u16(address, value)
    }
}

// ===================================================================
// Test Support
// ===================================================================
