//! Typed view over one device's segment of the cyclic image

use core::marker::PhantomData;

use super::driver::BusDriver;
use super::master::FieldbusMaster;
use crate::protocol::ProcessData;

/// Cyclic process image addressed by 1-based device position
pub trait ProcessImage {
    fn device_count(&self) -> usize;

    fn input_segment(&self, index: usize) -> Option<&[u8]>;

    fn output_segment(&mut self, index: usize) -> Option<&mut [u8]>;
}

impl<D: BusDriver> ProcessImage for FieldbusMaster<D> {
    fn device_count(&self) -> usize {
        self.slave_count()
    }

    fn input_segment(&self, index: usize) -> Option<&[u8]> {
        self.driver().inputs(index)
    }

    fn output_segment(&mut self, index: usize) -> Option<&mut [u8]> {
        self.driver_mut().outputs_mut(index)
    }
}

/// Typed process-data channel for the device at `index`
///
/// Invalid accesses never fail loudly: `receive` yields `None`, `send` drops the
/// value. Persistent problems show up in the bus working counter instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessDataChannel<S> {
    index: usize,
    _schema: PhantomData<S>,
}

impl<S: ProcessData> ProcessDataChannel<S> {
    pub const fn new(index: usize) -> Self {
        Self {
            index,
            _schema: PhantomData,
        }
    }

    pub const fn index(&self) -> usize {
        self.index
    }

    fn in_range<I: ProcessImage + ?Sized>(&self, image: &I) -> bool {
        self.index >= 1 && self.index <= image.device_count()
    }

    /// Decode the device's input segment
    ///
    /// # Returns
    /// * `None` if the device is not enumerated or declares fewer input bytes than `S::SIZE`
    pub fn receive<I: ProcessImage + ?Sized>(&self, image: &I) -> Option<S> {
        if !self.in_range(image) {
            return None;
        }
        let segment = image.input_segment(self.index)?;
        if S::SIZE > segment.len() {
            return None;
        }
        S::decode(&segment[..S::SIZE])
    }

    /// Encode `value` into the device's output segment, or drop it silently
    pub fn send<I: ProcessImage + ?Sized>(&self, image: &mut I, value: &S) {
        if !self.in_range(image) {
            return;
        }
        if let Some(segment) = image.output_segment(self.index) {
            // encode writes nothing into a short segment
            let _ = value.encode(segment);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::master::tests::MockDriver;
    use crate::bus::master::InitState;
    use crate::protocol::{ControlCommand, MasterToSlave, SlaveToMaster, StateReport};
    use std::vec;

    fn operational_master(slaves: usize) -> FieldbusMaster<MockDriver> {
        let mut master = FieldbusMaster::new(MockDriver::new(slaves));
        assert_eq!(master.init("eth0"), InitState::AllOperational);
        master
    }

    #[test]
    fn test_receive_decodes_inputs() {
        let mut master = operational_master(2);
        let feedback = SlaveToMaster {
            position: 1234,
            velocity: -5,
            current: 0.25,
            state: StateReport::Run,
        };
        feedback.encode(&mut master.driver_mut().inputs[1]);

        let channel = ProcessDataChannel::<SlaveToMaster>::new(2);
        assert_eq!(channel.receive(&master), Some(feedback));
    }

    #[test]
    fn test_receive_out_of_range_is_absent() {
        let master = operational_master(1);
        assert!(ProcessDataChannel::<SlaveToMaster>::new(0)
            .receive(&master)
            .is_none());
        assert!(ProcessDataChannel::<SlaveToMaster>::new(2)
            .receive(&master)
            .is_none());
    }

    #[test]
    fn test_receive_short_segment_is_absent() {
        let mut master = operational_master(1);
        master.driver_mut().inputs[0] = vec![0u8; 8];
        assert!(ProcessDataChannel::<SlaveToMaster>::new(1)
            .receive(&master)
            .is_none());
    }

    #[test]
    fn test_receive_longer_segment_uses_prefix() {
        let mut master = operational_master(1);
        master.driver_mut().inputs[0] = vec![0u8; 32];
        master.driver_mut().inputs[0][12] = 0x02;
        let received = ProcessDataChannel::<SlaveToMaster>::new(1).receive(&master);
        assert_eq!(received.map(|f| f.state), Some(StateReport::Stop));
    }

    #[test]
    fn test_send_writes_outputs() {
        let mut master = operational_master(1);
        let command = MasterToSlave {
            reference: 2.5,
            command: ControlCommand::ServoOn,
        };
        ProcessDataChannel::new(1).send(&mut master, &command);
        assert_eq!(
            MasterToSlave::decode(&master.driver().outputs[0]),
            Some(command)
        );
    }

    #[test]
    fn test_send_invalid_is_dropped() {
        let mut master = operational_master(1);
        master.driver_mut().outputs[0] = vec![0xAAu8; 4];
        let command = MasterToSlave {
            reference: 1.0,
            command: ControlCommand::ServoOff,
        };
        ProcessDataChannel::new(1).send(&mut master, &command);
        ProcessDataChannel::new(3).send(&mut master, &command);
        assert_eq!(master.driver().outputs[0], vec![0xAAu8; 4]);
    }
}
