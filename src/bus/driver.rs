//! Raw bus primitives driven by [`FieldbusMaster`](super::FieldbusMaster)
//!
//! One implementation exists per network backend. The master only sequences
//! these calls; it never touches frames itself.

use core::time::Duration;

/// Application-layer state of a bus device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AlState {
    None = 0x00,
    Init = 0x01,
    PreOp = 0x02,
    Boot = 0x03,
    SafeOp = 0x04,
    Op = 0x08,
}

impl AlState {
    /// Decode the low nibble of an AL status register
    pub fn from_status(status: u8) -> Self {
        match status & 0x0F {
            0x01 => Self::Init,
            0x02 => Self::PreOp,
            0x03 => Self::Boot,
            0x04 => Self::SafeOp,
            0x08 => Self::Op,
            _ => Self::None,
        }
    }
}

/// Working-counter contributions of the mapped process image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct WkcContribution {
    pub outputs: u16,
    pub inputs: u16,
}

impl WkcContribution {
    /// Outputs are corroborated twice (master write + device acknowledge)
    pub const fn expected(&self) -> i32 {
        self.outputs as i32 * 2 + self.inputs as i32
    }
}

/// Interface open failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PortError {
    NotFound,
    PermissionDenied,
    Busy,
}

/// Bus backend primitives
///
/// Slave positions are 1-based; position 0 addresses all devices.
pub trait BusDriver {
    /// Open the network interface
    fn open(&mut self, ifname: &str) -> Result<(), PortError>;

    /// Enumerate devices and bring them to PRE-OP
    ///
    /// # Returns
    /// Number of devices found
    fn config_init(&mut self) -> usize;

    /// Map every device's process data into the cyclic image
    fn config_map(&mut self) -> WkcContribution;

    /// Configure distributed clocks
    fn config_dc(&mut self);

    /// Wait until `slave` reaches `state` or the timeout elapses
    ///
    /// # Returns
    /// Lowest state observed
    fn state_check(&mut self, slave: u16, state: AlState, timeout: Duration) -> AlState;

    /// Request a state for `slave`
    fn write_state(&mut self, slave: u16, state: AlState);

    /// Transmit the output image
    fn send_processdata(&mut self);

    /// Receive the returning frame
    ///
    /// # Returns
    /// Working counter, or a negative value when nothing arrived in time
    fn receive_processdata(&mut self, timeout: Duration) -> i32;

    /// Number of enumerated devices
    fn slave_count(&self) -> usize;

    /// Input segment of a device (bytes declared by the device)
    fn inputs(&self, slave: usize) -> Option<&[u8]>;

    /// Output segment of a device
    fn outputs_mut(&mut self, slave: usize) -> Option<&mut [u8]>;

    /// Release the interface
    fn close(&mut self);
}
