//! # crimson-ble
//!
//! A client-side BLE GATT driver for the Crimson EEG/IMU headband.
//!
//! The crate discovers headbands, negotiates their GATT topology, runs one
//! connection state machine per device and correlates outbound commands with
//! the device's asynchronous responses. Packing and unpacking the protocol
//! bytes is left to a [`Codec`] implementation; the radio is reached through
//! a [`BleTransport`] implementation (a [`btleplug`](https://docs.rs/btleplug)
//! backed one ships behind the `btleplug` feature).
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use crimson_ble::{CrimsonConfig, CrimsonDriver};
//! use crimson_ble::btleplug::BtleplugTransport;
//!
//! #[tokio::main]
//! async fn main() -> crimson_ble::CrimsonResult<()> {
//!     let config = CrimsonConfig::discover(None)?;
//!     let (transport, events) = BtleplugTransport::new().await?;
//!     let driver = CrimsonDriver::new(config, Arc::new(transport), Arc::new(MyCodec::new()));
//!     driver.spawn_event_loop(events);
//!
//!     let mut found = driver.start_scan().await?;
//!     let peripheral = found.recv().await.expect("scan ended");
//!     driver.stop_scan().await?;
//!
//!     let session = driver.session(&peripheral);
//!     let mut events = session.events();
//!     session.connect().await?;
//!     session.pair().await?.await?;
//!     session.start_data_stream().await?.await?;
//!
//!     while let Some(event) = futures_util::StreamExt::next(&mut events).await {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Layers
//!
//! | Layer | Type | Responsibility |
//! |-------|------|----------------|
//! | Driver | [`CrimsonDriver`] | Event routing, session registry, correlation table |
//! | Session | [`DeviceSession`] | Connectivity state machine, gating, commands |
//! | Adapter | [`Adapter`] | Scan, advertisement filter, GATT negotiation |
//! | Framing | [`frame`] | Trim codec output to exactly one frame |
//!
//! ## Configuration
//!
//! See [`CrimsonConfig`]. Environment variables:
//!
//! ```bash
//! export CRIMSON_MOCK_PREFIX="CM_"
//! export CRIMSON_LOG_LEVEL="debug"
//! ```
//!
//! Or a `crimson.toml` file:
//!
//! ```toml
//! log_level = "debug"
//!
//! [scan]
//! power_on_timeout_secs = 10
//! ```

pub mod adapter;
#[cfg(feature = "btleplug")]
pub mod btleplug;
pub mod codec;
pub mod config;
pub mod correlation;
pub mod driver;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod session;
pub mod streams;
pub mod transport;

// ─── Public re-exports ──────────────────────────────────────────────────

pub use adapter::{Adapter, Peripheral};
pub use codec::{Codec, CodecEvent, Command, DeviceHandle, MessageId};
pub use config::{CrimsonConfig, LogLevel};
pub use driver::CrimsonDriver;
pub use error::{CrimsonError, CrimsonResult};
pub use protocol::{DeviceEvent, DriverEvent};
pub use session::{DeviceSession, PendingResponse};
pub use streams::{DeviceEventStream, TypedStream};
pub use transport::{Advertisement, BleTransport, TransportEvent, WriteMode};
