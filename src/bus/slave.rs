//! Inverter-side process-data runtime over a LAN9252-class slave controller (ESC)
//!
//! The ESC is reached through a register interface ([`EscInterface`]); the
//! physical SPI/QSPI transport lives behind that trait. This module implements
//! the register protocol on top of it:
//! - direct registers (reset, byte test, ready)
//! - indirect CSR access through `ECAT_CSR_DATA` / `ECAT_CSR_CMD`
//! - process RAM transfers through the PRAM read/write FIFOs
//!
//! Every busy-wait is bounded by [`POLL_LIMIT`].

use super::driver::AlState;
use crate::protocol::ProcessData;

/// Process RAM window size per direction [bytes]
pub const BUFFER_SIZE: usize = 32;

/// Upper bound of register polls per wait
pub const POLL_LIMIT: u32 = 1000;

/// Direct register addresses
pub mod regs {
    pub const PRAM_RD_FIFO: u16 = 0x0000;
    pub const PRAM_WR_FIFO: u16 = 0x0020;
    pub const ID_REV: u16 = 0x0050;
    pub const IRQ_CFG: u16 = 0x0054;
    pub const INT_EN: u16 = 0x005C;
    pub const BYTE_TEST: u16 = 0x0064;
    pub const HW_CFG: u16 = 0x0074;
    pub const RESET_CTL: u16 = 0x01F8;
    pub const ECAT_CSR_DATA: u16 = 0x0300;
    pub const ECAT_CSR_CMD: u16 = 0x0304;
    pub const ECAT_PRAM_RD_ADDR_LEN: u16 = 0x0308;
    pub const ECAT_PRAM_RD_CMD: u16 = 0x030C;
    pub const ECAT_PRAM_WR_ADDR_LEN: u16 = 0x0310;
    pub const ECAT_PRAM_WR_CMD: u16 = 0x0314;

    pub const DIGITAL_RST: u32 = 0x0000_0001;
    pub const BYTE_TEST_VALUE: u32 = 0x8765_4321;
    pub const HW_CFG_READY: u32 = 0x0800_0000;
    pub const CSR_WRITE: u32 = 0x80;
    pub const CSR_READ: u32 = 0xC0;
    pub const CSR_BUSY: u32 = 0x8000_0000;
    pub const PRAM_ABORT: u32 = 0x4000_0000;
    pub const PRAM_BUSY: u32 = 0x8000_0000;
}

/// EtherCAT core (CSR) addresses
pub mod csr {
    pub const AL_STATUS: u16 = 0x0130;
    pub const AL_EVENT_MASK: u16 = 0x0204;
    pub const WDOG_STATUS: u16 = 0x0440;

    pub const PRAM_BUFFER_OUT: u16 = 0x1000;
    pub const PRAM_BUFFER_IN: u16 = 0x1200;

    pub const WDOG_STATUS_OK: u32 = 0x01;
    pub const AL_EVENT_SYNC0: u32 = 0x0000_0004;
    pub const AL_EVENT_SM0: u32 = 0x0000_0100;
}

/// Register-level access to the slave controller
pub trait EscInterface {
    type Error;

    fn read_register(&mut self, addr: u16) -> Result<u32, Self::Error>;

    fn write_register(&mut self, addr: u16, value: u32) -> Result<(), Self::Error>;

    /// Burst read from a FIFO data port
    fn read_fifo(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), Self::Error>;

    /// Burst write to a FIFO data port
    fn write_fifo(&mut self, addr: u16, data: &[u8]) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EscError<E> {
    Transport(E),
    /// A bounded wait on `register` expired
    Timeout { register: u16 },
}

impl<E> From<E> for EscError<E> {
    fn from(e: E) -> Self {
        Self::Transport(e)
    }
}

/// Interrupt source used to synchronise the application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SyncMode {
    #[default]
    Async,
    /// Distributed-clock SYNC0
    DcSync,
    /// Sync manager 0 (process output written)
    SmSync,
}

/// Result of one cyclic exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlaveStatus {
    /// AL status low nibble
    pub al_status: u8,
    pub watchdog_expired: bool,
}

impl SlaveStatus {
    pub const fn offline() -> Self {
        Self {
            al_status: 0,
            watchdog_expired: true,
        }
    }

    pub fn al_state(&self) -> AlState {
        AlState::from_status(self.al_status)
    }

    /// Process outputs are valid only in OP with a running watchdog
    pub fn is_operational(&self) -> bool {
        !self.watchdog_expired && self.al_state() == AlState::Op
    }

    /// Status byte: AL state in the low nibble, bit 7 set on watchdog expiry
    pub fn raw(&self) -> u8 {
        let mut status = self.al_status & 0x0F;
        if self.watchdog_expired {
            status |= 0x80;
        }
        status
    }
}

impl Default for SlaveStatus {
    fn default() -> Self {
        Self::offline()
    }
}

pub struct FieldbusSlaveRuntime<E: EscInterface> {
    esc: E,
    buffer_out: [u8; BUFFER_SIZE],
    buffer_in: [u8; BUFFER_SIZE],
    status: SlaveStatus,
}

impl<E: EscInterface> FieldbusSlaveRuntime<E> {
    pub const fn new(esc: E) -> Self {
        Self {
            esc,
            buffer_out: [0; BUFFER_SIZE],
            buffer_in: [0; BUFFER_SIZE],
            status: SlaveStatus::offline(),
        }
    }

    /// Reset the controller and configure the sync interrupt
    ///
    /// # Returns
    /// Chip ID / revision register
    pub fn init(&mut self, sync: SyncMode) -> Result<u32, EscError<E::Error>> {
        self.esc.write_register(regs::RESET_CTL, regs::DIGITAL_RST)?;
        self.wait_direct(regs::RESET_CTL, |v| v & regs::DIGITAL_RST == 0)?;
        self.wait_direct(regs::BYTE_TEST, |v| v == regs::BYTE_TEST_VALUE)?;
        self.wait_direct(regs::HW_CFG, |v| v & regs::HW_CFG_READY != 0)?;

        let id_rev = self.esc.read_register(regs::ID_REV)?;
        info!("Detected ESC chip {:x} rev {}", id_rev >> 16, id_rev & 0xFFFF);

        let event_mask = match sync {
            SyncMode::Async => None,
            SyncMode::DcSync => Some(csr::AL_EVENT_SYNC0),
            SyncMode::SmSync => Some(csr::AL_EVENT_SM0),
        };
        if let Some(mask) = event_mask {
            self.csr_write(csr::AL_EVENT_MASK, mask, 4)?;
            // IRQ pin enabled, active high, push-pull
            self.esc.write_register(regs::IRQ_CFG, 0x0000_0111)?;
            self.esc.write_register(regs::INT_EN, 0x0000_0001)?;
        }
        info!("ESC sync mode {:?}", sync);

        Ok(id_rev)
    }

    /// Mirror the local buffers against process RAM
    ///
    /// Outputs are taken over only in OP with a running watchdog; otherwise the
    /// local output buffer is zeroed. Inputs are always written back.
    pub fn cyclic(&mut self) -> Result<SlaveStatus, EscError<E::Error>> {
        match self.exchange() {
            Ok(status) => {
                self.status = status;
                Ok(status)
            }
            Err(e) => {
                self.buffer_out = [0; BUFFER_SIZE];
                self.status = SlaveStatus::offline();
                Err(e)
            }
        }
    }

    fn exchange(&mut self) -> Result<SlaveStatus, EscError<E::Error>> {
        let wdog = self.csr_read(csr::WDOG_STATUS, 4)?;
        let al = self.csr_read(csr::AL_STATUS, 4)?;
        let status = SlaveStatus {
            al_status: (al & 0x0F) as u8,
            watchdog_expired: wdog & csr::WDOG_STATUS_OK == 0,
        };

        if status.is_operational() {
            let mut out = [0u8; BUFFER_SIZE];
            self.pram_read(csr::PRAM_BUFFER_OUT, &mut out)?;
            self.buffer_out = out;
        } else {
            self.buffer_out = [0; BUFFER_SIZE];
        }

        let inputs = self.buffer_in;
        self.pram_write(csr::PRAM_BUFFER_IN, &inputs)?;
        Ok(status)
    }

    /// Last status seen by [`cyclic`](Self::cyclic)
    pub fn status(&self) -> SlaveStatus {
        self.status
    }

    /// Decode the payload last received from the master
    pub fn receive<S: ProcessData>(&self) -> Option<S> {
        if S::SIZE > BUFFER_SIZE {
            return None;
        }
        S::decode(&self.buffer_out[..S::SIZE])
    }

    /// Stage a payload for the next exchange; oversized payloads are dropped
    pub fn send<S: ProcessData>(&mut self, value: &S) {
        if S::SIZE > BUFFER_SIZE {
            return;
        }
        let _ = value.encode(&mut self.buffer_in);
    }

    pub fn esc(&self) -> &E {
        &self.esc
    }

    pub fn esc_mut(&mut self) -> &mut E {
        &mut self.esc
    }

    fn wait_direct(
        &mut self,
        addr: u16,
        done: impl Fn(u32) -> bool,
    ) -> Result<u32, EscError<E::Error>> {
        for _ in 0..POLL_LIMIT {
            let value = self.esc.read_register(addr)?;
            if done(value) {
                return Ok(value);
            }
        }
        Err(EscError::Timeout { register: addr })
    }

    /// Indirect CSR read
    pub fn csr_read(&mut self, addr: u16, len: u8) -> Result<u32, EscError<E::Error>> {
        let cmd = (regs::CSR_READ << 24) | ((len as u32) << 16) | addr as u32;
        self.esc.write_register(regs::ECAT_CSR_CMD, cmd)?;
        self.wait_direct(regs::ECAT_CSR_CMD, |v| v & regs::CSR_BUSY == 0)?;
        Ok(self.esc.read_register(regs::ECAT_CSR_DATA)?)
    }

    /// Indirect CSR write
    pub fn csr_write(&mut self, addr: u16, value: u32, len: u8) -> Result<(), EscError<E::Error>> {
        self.esc.write_register(regs::ECAT_CSR_DATA, value)?;
        let cmd = (regs::CSR_WRITE << 24) | ((len as u32) << 16) | addr as u32;
        self.esc.write_register(regs::ECAT_CSR_CMD, cmd)?;
        self.wait_direct(regs::ECAT_CSR_CMD, |v| v & regs::CSR_BUSY == 0)?;
        Ok(())
    }

    fn pram_read(&mut self, addr: u16, buf: &mut [u8]) -> Result<(), EscError<E::Error>> {
        self.pram_prepare(regs::ECAT_PRAM_RD_CMD, regs::ECAT_PRAM_RD_ADDR_LEN, addr, buf.len())?;
        self.esc.read_fifo(regs::PRAM_RD_FIFO, buf)?;
        Ok(())
    }

    fn pram_write(&mut self, addr: u16, data: &[u8]) -> Result<(), EscError<E::Error>> {
        self.pram_prepare(regs::ECAT_PRAM_WR_CMD, regs::ECAT_PRAM_WR_ADDR_LEN, addr, data.len())?;
        self.esc.write_fifo(regs::PRAM_WR_FIFO, data)?;
        Ok(())
    }

    /// Abort any pending FIFO transfer, start a new one and wait for FIFO space
    fn pram_prepare(
        &mut self,
        cmd_reg: u16,
        addr_len_reg: u16,
        addr: u16,
        len: usize,
    ) -> Result<(), EscError<E::Error>> {
        self.esc.write_register(cmd_reg, regs::PRAM_ABORT)?;
        self.wait_direct(cmd_reg, |v| v & regs::PRAM_BUSY == 0)?;
        self.esc
            .write_register(addr_len_reg, ((len as u32) << 16) | addr as u32)?;
        self.esc.write_register(cmd_reg, regs::PRAM_BUSY)?;
        let dwords = (len / 4) as u32;
        self.wait_direct(cmd_reg, |v| (v >> 8) & 0xFF >= dwords)?;
        Ok(())
    }
}
