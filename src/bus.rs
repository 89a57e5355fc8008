//! Fieldbus process-data layer
//!
//! Master-side bring-up and cyclic exchange, typed channels over the process
//! image, and the inverter-side slave controller runtime.

pub mod channel;
pub mod driver;
pub mod health;
pub mod master;
pub mod slave;
pub mod virtual_esc;

pub use channel::{ProcessDataChannel, ProcessImage};
pub use driver::{AlState, BusDriver, PortError, WkcContribution};
pub use health::{BusHealth, HealthTransition};
pub use master::{FieldbusMaster, InitState};
pub use slave::{EscError, EscInterface, FieldbusSlaveRuntime, SlaveStatus, SyncMode};
pub use virtual_esc::{TransportFault, VirtualEsc};
