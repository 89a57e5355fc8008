// Cyclic process-data schemas exchanged between master and inverter
//
// Both ends encode/decode through these routines; the layout is fixed here and
// never derived from struct layout.

/// Fixed-size process-data payload
pub trait ProcessData: Sized {
    /// Encoded size in bytes
    const SIZE: usize;

    /// Encode into `out[..SIZE]`
    ///
    /// # Returns
    /// * `false` if `out` is shorter than `SIZE` (nothing is written)
    fn encode(&self, out: &mut [u8]) -> bool;

    /// Decode from a slice of exactly `SIZE` bytes
    ///
    /// # Returns
    /// * `None` if the slice length differs from `SIZE`
    fn decode(data: &[u8]) -> Option<Self>;
}

/// `MasterToSlave` byte 4, bits 0..1
const COMMAND_MASK: u8 = 0b11;

/// `SlaveToMaster` byte 12, bits 0..1
const STATE_MASK: u8 = 0b11;

/// Control command (2-bit field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ControlCommand {
    #[default]
    None = 0,
    ServoOn = 1,
    ServoOff = 2,
    ResetError = 3,
}

impl ControlCommand {
    fn from_bits(bits: u8) -> Self {
        match bits & COMMAND_MASK {
            1 => Self::ServoOn,
            2 => Self::ServoOff,
            3 => Self::ResetError,
            _ => Self::None,
        }
    }
}

/// State report (2-bit field)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StateReport {
    #[default]
    None = 0,
    Run = 1,
    Stop = 2,
    Error = 3,
}

impl StateReport {
    fn from_bits(bits: u8) -> Self {
        match bits & STATE_MASK {
            1 => Self::Run,
            2 => Self::Stop,
            3 => Self::Error,
            _ => Self::None,
        }
    }
}

/// Master → inverter payload (5 bytes)
///
/// | offset | field |
/// |---|---|
/// | 0..4 | reference, f32 LE |
/// | 4 | bits 0..1: control command, bits 2..7 reserved (0) |
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MasterToSlave {
    /// Velocity [rad/s] or q-axis current [A] reference, depending on the inverter's reference mode
    pub reference: f32,
    pub command: ControlCommand,
}

impl MasterToSlave {
    pub const fn new() -> Self {
        Self {
            reference: 0.0,
            command: ControlCommand::None,
        }
    }
}

impl ProcessData for MasterToSlave {
    const SIZE: usize = 5;

    fn encode(&self, out: &mut [u8]) -> bool {
        if out.len() < Self::SIZE {
            return false;
        }
        out[0..4].copy_from_slice(&self.reference.to_le_bytes());
        out[4] = self.command as u8 & COMMAND_MASK;
        true
    }

    fn decode(data: &[u8]) -> Option<Self> {
        if data.len() != Self::SIZE {
            return None;
        }
        let reference = f32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        Some(Self {
            reference,
            command: ControlCommand::from_bits(data[4]),
        })
    }
}

/// Inverter → master payload (13 bytes)
///
/// | offset | field |
/// |---|---|
/// | 0..4 | mechanical position count, i32 LE |
/// | 4..8 | velocity count (counts per speed sample), i32 LE |
/// | 8..12 | q-axis current [A], f32 LE |
/// | 12 | bits 0..1: state report, bits 2..7 reserved (0) |
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SlaveToMaster {
    pub position: i32,
    pub velocity: i32,
    pub current: f32,
    pub state: StateReport,
}

impl SlaveToMaster {
    pub const fn new() -> Self {
        Self {
            position: 0,
            velocity: 0,
            current: 0.0,
            state: StateReport::None,
        }
    }
}

impl ProcessData for SlaveToMaster {
    const SIZE: usize = 13;

    fn encode(&self, out: &mut [u8]) -> bool {
        if out.len() < Self::SIZE {
            return false;
        }
        out[0..4].copy_from_slice(&self.position.to_le_bytes());
        out[4..8].copy_from_slice(&self.velocity.to_le_bytes());
        out[8..12].copy_from_slice(&self.current.to_le_bytes());
        out[12] = self.state as u8 & STATE_MASK;
        true
    }

    fn decode(data: &[u8]) -> Option<Self> {
        if data.len() != Self::SIZE {
            return None;
        }
        Some(Self {
            position: i32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            velocity: i32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            current: f32::from_le_bytes([data[8], data[9], data[10], data[11]]),
            state: StateReport::from_bits(data[12]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn command_strategy() -> impl Strategy<Value = ControlCommand> {
        (0u8..4).prop_map(ControlCommand::from_bits)
    }

    fn state_strategy() -> impl Strategy<Value = StateReport> {
        (0u8..4).prop_map(StateReport::from_bits)
    }

    proptest! {
        #[test]
        fn master_to_slave_round_trip(bits in any::<u32>(), command in command_strategy()) {
            let value = MasterToSlave { reference: f32::from_bits(bits), command };
            let mut buf = [0u8; MasterToSlave::SIZE];
            prop_assert!(value.encode(&mut buf));
            let decoded = MasterToSlave::decode(&buf).unwrap();
            prop_assert_eq!(decoded.reference.to_bits(), bits);
            prop_assert_eq!(decoded.command, command);
        }

        #[test]
        fn slave_to_master_round_trip(
            position in any::<i32>(),
            velocity in any::<i32>(),
            bits in any::<u32>(),
            state in state_strategy(),
        ) {
            let value = SlaveToMaster { position, velocity, current: f32::from_bits(bits), state };
            let mut buf = [0u8; SlaveToMaster::SIZE];
            prop_assert!(value.encode(&mut buf));
            let decoded = SlaveToMaster::decode(&buf).unwrap();
            prop_assert_eq!(decoded.position, position);
            prop_assert_eq!(decoded.velocity, velocity);
            prop_assert_eq!(decoded.current.to_bits(), bits);
            prop_assert_eq!(decoded.state, state);
        }
    }

    #[test]
    fn test_wire_layout() {
        let value = MasterToSlave {
            reference: 1.0,
            command: ControlCommand::ResetError,
        };
        let mut buf = [0xFFu8; 5];
        assert!(value.encode(&mut buf));
        assert_eq!(buf, [0x00, 0x00, 0x80, 0x3F, 0x03]);

        let feedback = SlaveToMaster {
            position: -2,
            velocity: 258,
            current: 0.0,
            state: StateReport::Stop,
        };
        let mut buf = [0u8; 13];
        assert!(feedback.encode(&mut buf));
        assert_eq!(&buf[0..4], &[0xFE, 0xFF, 0xFF, 0xFF]);
        assert_eq!(&buf[4..8], &[0x02, 0x01, 0x00, 0x00]);
        assert_eq!(buf[12], 0x02);
    }

    #[test]
    fn test_size_mismatch_is_absent() {
        assert!(MasterToSlave::decode(&[0u8; 4]).is_none());
        assert!(MasterToSlave::decode(&[0u8; 6]).is_none());
        assert!(SlaveToMaster::decode(&[0u8; 12]).is_none());
    }

    #[test]
    fn test_encode_rejects_short_buffer() {
        let mut buf = [0xAAu8; 4];
        assert!(!MasterToSlave::new().encode(&mut buf));
        assert_eq!(buf, [0xAA; 4]);
    }

    #[test]
    fn test_reserved_bits_ignored() {
        let decoded = MasterToSlave::decode(&[0, 0, 0, 0, 0xFD]).unwrap();
        assert_eq!(decoded.command, ControlCommand::ServoOn);
    }

    #[test]
    fn test_state_reserved_bits_ignored() {
        let mut buf = [0u8; 13];
        buf[12] = 0xFE;
        let decoded = SlaveToMaster::decode(&buf).unwrap();
        assert_eq!(decoded.state, StateReport::Stop);

        let mut out = [0xFFu8; 13];
        let feedback = SlaveToMaster {
            state: StateReport::Error,
            ..SlaveToMaster::new()
        };
        assert!(feedback.encode(&mut out));
        assert_eq!(out[12], 0b11);
    }
}
