//! # BLE Transport Capability
//!
//! The driver talks to the radio through [`BleTransport`]. The trait is
//! object-safe (operations return boxed futures) so the driver can hold an
//! `Arc<dyn BleTransport>` and tests can substitute an in-memory double.
//!
//! Asynchronous occurrences (adapter power changes, advertisements,
//! notifications, link drops) are delivered separately as
//! [`TransportEvent`]s, which the driver consumes through
//! [`CrimsonDriver::handle_transport_event`](crate::CrimsonDriver::handle_transport_event).

use futures_util::future::BoxFuture;
use uuid::Uuid;

use crate::error::CrimsonResult;

/// GATT write flavour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WriteMode {
    #[default]
    WithoutResponse,
    WithResponse,
}

/// One advertisement received while scanning.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Advertisement {
    pub address: String,
    pub local_name: Option<String>,
    pub rssi: Option<i16>,
    /// Raw manufacturer specific data, company id bytes included.
    pub manufacturer_data: Vec<u8>,
}

/// Asynchronous event raised by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    AdapterStateChanged { available: bool },
    Discovered(Advertisement),
    Notification {
        address: String,
        characteristic: Uuid,
        value: Vec<u8>,
    },
    /// The link dropped (for any reason, including a deliberate disconnect).
    Disconnected { address: String },
}

/// BLE central operations used by the driver.
///
/// Every operation addresses a peripheral by its address string.
pub trait BleTransport: Send + Sync {
    /// Whether the radio is powered on and usable right now.
    fn is_available(&self) -> bool;

    fn start_scan(&self, allow_duplicates: bool) -> BoxFuture<'_, CrimsonResult<()>>;

    fn stop_scan(&self) -> BoxFuture<'_, CrimsonResult<()>>;

    fn connect<'a>(&'a self, address: &'a str) -> BoxFuture<'a, CrimsonResult<()>>;

    fn disconnect<'a>(&'a self, address: &'a str) -> BoxFuture<'a, CrimsonResult<()>>;

    fn is_connected<'a>(&'a self, address: &'a str) -> BoxFuture<'a, bool>;

    /// Discover the subset of `services` present on the peripheral.
    fn discover_services<'a>(
        &'a self,
        address: &'a str,
        services: &'a [Uuid],
    ) -> BoxFuture<'a, CrimsonResult<Vec<Uuid>>>;

    /// Discover the subset of `characteristics` present on `service`.
    fn discover_characteristics<'a>(
        &'a self,
        address: &'a str,
        service: Uuid,
        characteristics: &'a [Uuid],
    ) -> BoxFuture<'a, CrimsonResult<Vec<Uuid>>>;

    fn set_notify<'a>(
        &'a self,
        address: &'a str,
        characteristic: Uuid,
        enabled: bool,
    ) -> BoxFuture<'a, CrimsonResult<()>>;

    fn read<'a>(
        &'a self,
        address: &'a str,
        characteristic: Uuid,
    ) -> BoxFuture<'a, CrimsonResult<Vec<u8>>>;

    fn write<'a>(
        &'a self,
        address: &'a str,
        characteristic: Uuid,
        value: &'a [u8],
        mode: WriteMode,
    ) -> BoxFuture<'a, CrimsonResult<()>>;
}
