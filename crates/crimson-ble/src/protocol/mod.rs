//! Crimson headband protocol definitions.
//!
//! - [`constants`]: GATT identifiers, command codes and device error codes.
//! - [`types`]: connectivity and sensor enumerations, decoded payloads.
//! - [`events`]: listener and driver event unions.

pub mod constants;
pub mod events;
pub mod types;

pub use constants::{CharacteristicRole, CommandCode, ErrorCodes, Uuids};
pub use events::{DeviceEvent, DriverEvent};
pub use types::*;
