//! Fieldbus master: bring-up state machine and cyclic exchange

use core::time::Duration;

use super::driver::{AlState, BusDriver};

/// Timeout of a single state transition
pub const STATE_TIMEOUT: Duration = Duration::from_secs(2);

/// Wait budget for all devices to reach SAFE-OP
pub const SAFE_OP_TIMEOUT: Duration = Duration::from_secs(8);

/// Bounded receive wait per cycle
pub const RECEIVE_TIMEOUT: Duration = Duration::from_micros(2000);

/// State check timeout of one OPERATIONAL poll
pub const OP_POLL_TIMEOUT: Duration = Duration::from_micros(50_000);

/// Number of OPERATIONAL polls before giving up
pub const OP_RETRY_BUDGET: u32 = 40;

/// Bring-up result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitState {
    AllOperational,
    PortOpenFailed,
    SlavesNotFound,
    NotAllOperational,
}

/// Fieldbus master
///
/// Owns the driver (and with it the interface handle) exclusively.
/// The interface is returned to INIT and released on [`close`](Self::close)
/// or when the master is dropped.
pub struct FieldbusMaster<D: BusDriver> {
    driver: D,
    expected_wkc: i32,
    last_wkc: i32,
    opened: bool,
}

impl<D: BusDriver> FieldbusMaster<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            expected_wkc: 0,
            last_wkc: 0,
            opened: false,
        }
    }

    /// Open `ifname` and drive every device to OPERATIONAL
    ///
    /// # Arguments
    /// * `ifname` - Network interface name
    ///
    /// # Returns
    /// Exactly one [`InitState`]; anything but `AllOperational` is fatal for the session
    pub fn init(&mut self, ifname: &str) -> InitState {
        if self.opened {
            self.close();
        }

        if let Err(e) = self.driver.open(ifname) {
            error!("Failed to open interface {}: {:?}", ifname, e);
            return InitState::PortOpenFailed;
        }
        self.opened = true;
        info!("Interface {} opened", ifname);

        let found = self.driver.config_init();
        if found == 0 {
            error!("No slaves found on {}", ifname);
            return InitState::SlavesNotFound;
        }
        info!("{} slaves found and configured", found);

        let wkc = self.driver.config_map();
        self.driver.config_dc();

        let reached = self.driver.state_check(0, AlState::SafeOp, SAFE_OP_TIMEOUT);
        if reached != AlState::SafeOp {
            warn!("Not all slaves reached SAFE-OP (lowest state {:?})", reached);
        }

        self.expected_wkc = wkc.expected();
        debug!(
            "Expected working counter {} (outputs {}, inputs {})",
            self.expected_wkc, wkc.outputs, wkc.inputs
        );

        // Devices must see a valid output image before OP
        self.driver.send_processdata();
        self.last_wkc = self.driver.receive_processdata(RECEIVE_TIMEOUT);

        info!("Requesting OPERATIONAL state for all slaves");
        self.driver.write_state(0, AlState::Op);

        for attempt in 0..OP_RETRY_BUDGET {
            self.driver.send_processdata();
            self.last_wkc = self.driver.receive_processdata(RECEIVE_TIMEOUT);
            if self.driver.state_check(0, AlState::Op, OP_POLL_TIMEOUT) == AlState::Op {
                info!("All slaves operational after {} polls", attempt + 1);
                return InitState::AllOperational;
            }
        }

        error!("Not all slaves reached OPERATIONAL state");
        InitState::NotAllOperational
    }

    /// Exchange one cycle of process data
    ///
    /// # Returns
    /// `true` when the working counter meets the expected value
    pub fn update(&mut self) -> bool {
        if !self.opened {
            return false;
        }
        self.driver.send_processdata();
        self.last_wkc = self.driver.receive_processdata(RECEIVE_TIMEOUT);
        self.last_wkc >= self.expected_wkc
    }

    /// Return all devices to INIT and release the interface
    pub fn close(&mut self) {
        if !self.opened {
            return;
        }
        info!("Requesting INIT state for all slaves");
        self.driver.write_state(0, AlState::Init);
        self.driver.close();
        self.opened = false;
    }

    pub fn is_open(&self) -> bool {
        self.opened
    }

    pub fn expected_wkc(&self) -> i32 {
        self.expected_wkc
    }

    pub fn last_wkc(&self) -> i32 {
        self.last_wkc
    }

    pub fn slave_count(&self) -> usize {
        self.driver.slave_count()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}

impl<D: BusDriver> Drop for FieldbusMaster<D> {
    fn drop(&mut self) {
        self.close();
    }
}
