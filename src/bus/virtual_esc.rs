//! Register-level model of a LAN9252-class slave controller
//!
//! Used by host tests and by the master's simulated bus: the "network side"
//! (AL state, watchdog, process RAM) is driven directly, the "application side"
//! goes through [`EscInterface`] exactly like real hardware.

use super::driver::AlState;
use super::slave::{csr, regs, EscInterface, BUFFER_SIZE};

/// Injected transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransportFault;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct FifoState {
    addr: u16,
    len: u16,
    armed: bool,
}

#[derive(Debug, Clone)]
pub struct VirtualEsc {
    al_state: AlState,
    watchdog_ok: bool,
    ready: bool,
    fault: bool,
    csr_data: u32,
    event_mask: u32,
    irq_cfg: u32,
    int_en: u32,
    read_fifo: FifoState,
    write_fifo: FifoState,
    pram_out: [u8; BUFFER_SIZE],
    pram_in: [u8; BUFFER_SIZE],
}

impl VirtualEsc {
    pub const fn new() -> Self {
        Self {
            al_state: AlState::Init,
            watchdog_ok: false,
            ready: true,
            fault: false,
            csr_data: 0,
            event_mask: 0,
            irq_cfg: 0,
            int_en: 0,
            read_fifo: FifoState {
                addr: 0,
                len: 0,
                armed: false,
            },
            write_fifo: FifoState {
                addr: 0,
                len: 0,
                armed: false,
            },
            pram_out: [0; BUFFER_SIZE],
            pram_in: [0; BUFFER_SIZE],
        }
    }

    pub fn set_al_state(&mut self, state: AlState) {
        self.al_state = state;
    }

    pub fn al_state(&self) -> AlState {
        self.al_state
    }

    pub fn set_watchdog_ok(&mut self, ok: bool) {
        self.watchdog_ok = ok;
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    /// Make every register access fail
    pub fn set_fault(&mut self, fault: bool) {
        self.fault = fault;
    }

    pub fn event_mask(&self) -> u32 {
        self.event_mask
    }

    pub fn interrupt_enabled(&self) -> bool {
        self.int_en & 0x01 != 0 && self.irq_cfg & 0x100 != 0
    }

    /// Process outputs as written by the master
    pub fn outputs_mut(&mut self) -> &mut [u8; BUFFER_SIZE] {
        &mut self.pram_out
    }

    /// Process inputs as last written by the application
    pub fn inputs(&self) -> &[u8; BUFFER_SIZE] {
        &self.pram_in
    }

    fn check(&self) -> Result<(), TransportFault> {
        if self.fault {
            Err(TransportFault)
        } else {
            Ok(())
        }
    }

    fn csr_read(&self, addr: u16) -> u32 {
        match addr {
            csr::AL_STATUS => self.al_state as u32,
            csr::WDOG_STATUS => self.watchdog_ok as u32,
            csr::AL_EVENT_MASK => self.event_mask,
            _ => 0,
        }
    }

    fn csr_write(&mut self, addr: u16, value: u32) {
        if addr == csr::AL_EVENT_MASK {
            self.event_mask = value;
        }
    }

    fn fifo_status(fifo: &FifoState) -> u32 {
        if fifo.armed {
            ((fifo.len as u32 / 4) & 0xFF) << 8
        } else {
            0
        }
    }

    fn window(&mut self, addr: u16) -> Option<&mut [u8; BUFFER_SIZE]> {
        match addr {
            csr::PRAM_BUFFER_OUT => Some(&mut self.pram_out),
            csr::PRAM_BUFFER_IN => Some(&mut self.pram_in),
            _ => None,
        }
    }
}

impl Default for VirtualEsc {
    fn default() -> Self {
        Self::new()
    }
}

impl EscInterface for VirtualEsc {
    type Error = TransportFault;

    fn read_register(&mut self, addr: u16) -> Result<u32, TransportFault> {
        self.check()?;
        let value = match addr {
            regs::RESET_CTL => 0,
            regs::BYTE_TEST => regs::BYTE_TEST_VALUE,
            regs::HW_CFG if self.ready => regs::HW_CFG_READY,
            regs::ID_REV => 0x9252_0001,
            regs::ECAT_CSR_DATA => self.csr_data,
            regs::ECAT_CSR_CMD => 0,
            regs::ECAT_PRAM_RD_CMD => Self::fifo_status(&self.read_fifo),
            regs::ECAT_PRAM_WR_CMD => Self::fifo_status(&self.write_fifo),
            _ => 0,
        };
        Ok(value)
    }

    fn write_register(&mut self, addr: u16, value: u32) -> Result<(), TransportFault> {
        self.check()?;
        match addr {
            regs::ECAT_CSR_DATA => self.csr_data = value,
            regs::ECAT_CSR_CMD => {
                let target = (value & 0xFFFF) as u16;
                match value >> 24 {
                    regs::CSR_READ => self.csr_data = self.csr_read(target),
                    regs::CSR_WRITE => self.csr_write(target, self.csr_data),
                    _ => {}
                }
            }
            regs::IRQ_CFG => self.irq_cfg = value,
            regs::INT_EN => self.int_en = value,
            regs::ECAT_PRAM_RD_ADDR_LEN => {
                self.read_fifo.addr = (value & 0xFFFF) as u16;
                self.read_fifo.len = ((value >> 16) & 0xFF) as u16;
            }
            regs::ECAT_PRAM_WR_ADDR_LEN => {
                self.write_fifo.addr = (value & 0xFFFF) as u16;
                self.write_fifo.len = ((value >> 16) & 0xFF) as u16;
            }
            regs::ECAT_PRAM_RD_CMD => self.read_fifo.armed = value & regs::PRAM_BUSY != 0,
            regs::ECAT_PRAM_WR_CMD => self.write_fifo.armed = value & regs::PRAM_BUSY != 0,
            _ => {}
        }
        Ok(())
    }

    fn read_fifo(&mut self, _addr: u16, buf: &mut [u8]) -> Result<(), TransportFault> {
        self.check()?;
        let fifo = self.read_fifo;
        self.read_fifo.armed = false;
        if let Some(window) = self.window(fifo.addr) {
            let n = buf.len().min(fifo.len as usize).min(BUFFER_SIZE);
            buf[..n].copy_from_slice(&window[..n]);
        }
        Ok(())
    }

    fn write_fifo(&mut self, _addr: u16, data: &[u8]) -> Result<(), TransportFault> {
        self.check()?;
        let fifo = self.write_fifo;
        self.write_fifo.armed = false;
        if let Some(window) = self.window(fifo.addr) {
            let n = data.len().min(fifo.len as usize).min(BUFFER_SIZE);
            window[..n].copy_from_slice(&data[..n]);
        }
        Ok(())
    }
}
