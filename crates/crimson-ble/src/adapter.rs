//! # BLE Adapter
//!
//! [`Adapter`] sits between the sessions and the [`BleTransport`]. It owns:
//!
//! - the radio availability flag (fed by `AdapterStateChanged` events),
//! - the scan state and the sink that receives accepted advertisements,
//! - the peripheral registry keyed by address, including each peripheral's
//!   [`CharacteristicSet`].
//!
//! ## Negotiation
//!
//! After the transport connects, [`Adapter::connect`] walks the GATT
//! topology strictly in sequence:
//!
//! ```text
//! discover services (data stream, device information, battery)
//!   └─ for each service: link still up? → discover known characteristics
//!        └─ for each characteristic: link still up? → classify
//!             notify       → enable notifications
//!             battery      → enable notifications, read once
//!             device info  → read UTF-8 string ("" on failure)
//! link still up? → write + notify present? → ready
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::config::CrimsonConfig;
use crate::error::{CrimsonError, CrimsonResult};
use crate::protocol::constants::{
    CharacteristicRole, MANUFACTURER_DATA_MIN_LEN, MANUFACTURER_SIGNATURE, Uuids,
};
use crate::protocol::types::DeviceInfo;
use crate::transport::{Advertisement, BleTransport, WriteMode};

/// A headband accepted by the advertisement filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peripheral {
    pub address: String,
    pub name: String,
    pub rssi: Option<i16>,
    pub battery_level: u8,
    pub pairing_mode: bool,
}

/// Accept or reject an advertisement.
///
/// Mock boards are recognised by their name prefix and reported with a fixed
/// battery level in pairing mode. Real headbands must carry manufacturer data
/// starting with `0x42 0x52`, followed by the battery level and the pairing
/// flag.
#[must_use]
pub fn classify_advertisement(adv: &Advertisement, config: &CrimsonConfig) -> Option<Peripheral> {
    let name = adv.local_name.clone().unwrap_or_default();

    if !config.mock_name_prefix.is_empty() && name.starts_with(&config.mock_name_prefix) {
        return Some(Peripheral {
            address: adv.address.clone(),
            name,
            rssi: adv.rssi,
            battery_level: config.mock_battery_level,
            pairing_mode: true,
        });
    }

    let md = &adv.manufacturer_data;
    if md.len() < MANUFACTURER_DATA_MIN_LEN || md[..2] != MANUFACTURER_SIGNATURE {
        return None;
    }
    Some(Peripheral {
        address: adv.address.clone(),
        name,
        rssi: adv.rssi,
        battery_level: md[2],
        pairing_mode: md[3] == 1,
    })
}

/// Characteristics discovered on one peripheral, keyed by role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CharacteristicSet {
    by_role: HashMap<CharacteristicRole, Uuid>,
}

impl CharacteristicSet {
    pub fn insert(&mut self, role: CharacteristicRole, uuid: Uuid) {
        self.by_role.insert(role, uuid);
    }

    #[must_use]
    pub fn get(&self, role: CharacteristicRole) -> Option<Uuid> {
        self.by_role.get(&role).copied()
    }

    /// Role of a discovered characteristic, if it belongs to this set.
    #[must_use]
    pub fn role_of(&self, uuid: Uuid) -> Option<CharacteristicRole> {
        self.by_role
            .iter()
            .find_map(|(role, id)| (*id == uuid).then_some(*role))
    }

    /// Usable for command I/O: both data-stream channels are present.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.by_role.contains_key(&CharacteristicRole::Write)
            && self.by_role.contains_key(&CharacteristicRole::Notify)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_role.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_role.clear();
    }
}

/// Outcome of a successful negotiation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Negotiated {
    /// Present when the device information service was found.
    pub device_info: Option<DeviceInfo>,
    /// Level from the seed read of the battery characteristic.
    pub battery_level: Option<u8>,
}

#[derive(Debug)]
struct PeripheralEntry {
    peripheral: Peripheral,
    characteristics: CharacteristicSet,
}

#[derive(Debug, Default)]
struct ScanState {
    scanning: bool,
    sink: Option<mpsc::UnboundedSender<Peripheral>>,
}

/// Scan lifecycle, GATT negotiation and the peripheral registry.
pub struct Adapter {
    transport: Arc<dyn BleTransport>,
    config: CrimsonConfig,
    peripherals: Mutex<HashMap<String, PeripheralEntry>>,
    available: watch::Sender<bool>,
    scan: Mutex<ScanState>,
}

impl Adapter {
    pub fn new(transport: Arc<dyn BleTransport>, config: CrimsonConfig) -> Self {
        let (available, _) = watch::channel(transport.is_available());
        Self {
            transport,
            config,
            peripherals: Mutex::new(HashMap::new()),
            available,
            scan: Mutex::new(ScanState::default()),
        }
    }

    // ─── Availability ───────────────────────────────────────────────────

    /// Whether the radio is currently usable.
    #[must_use]
    pub fn is_available(&self) -> bool {
        *self.available.borrow()
    }

    /// Record a radio power change. Returns `true` if the flag changed.
    pub fn set_available(&self, available: bool) -> bool {
        let changed = self.available.send_replace(available) != available;
        if changed {
            tracing::info!(available, "BLE adapter state changed");
        }
        changed
    }

    async fn wait_until_available(&self) -> CrimsonResult<()> {
        if self.transport.is_available() {
            self.available.send_replace(true);
            return Ok(());
        }
        let mut rx = self.available.subscribe();
        let timeout = self.config.power_on_timeout();
        match tokio::time::timeout(timeout, rx.wait_for(|available| *available)).await {
            Ok(Ok(_)) => Ok(()),
            _ => {
                tracing::warn!(
                    timeout_secs = timeout.as_secs(),
                    "Bluetooth did not power on in time"
                );
                Err(CrimsonError::AdapterUnavailable)
            }
        }
    }

    // ─── Scanning ───────────────────────────────────────────────────────

    /// Start discovery. Accepted peripherals are sent to `sink`.
    ///
    /// Waits up to `scan.power_on_timeout_secs` for the radio. Calling this
    /// while already scanning replaces the sink.
    ///
    /// # Errors
    ///
    /// Returns [`CrimsonError::AdapterUnavailable`] if the radio stays off,
    /// or [`CrimsonError::ScanError`] if the transport refuses to scan.
    pub async fn start_scan(&self, sink: mpsc::UnboundedSender<Peripheral>) -> CrimsonResult<()> {
        self.wait_until_available().await?;

        {
            let mut scan = self.scan.lock().unwrap_or_else(PoisonError::into_inner);
            if scan.scanning {
                tracing::debug!("Scan already running, replacing result sink");
            }
            scan.scanning = true;
            scan.sink = Some(sink);
        }

        if let Err(e) = self
            .transport
            .start_scan(self.config.scan.allow_duplicates)
            .await
        {
            let mut scan = self.scan.lock().unwrap_or_else(PoisonError::into_inner);
            scan.scanning = false;
            scan.sink = None;
            tracing::warn!(error = %e, "BLE start scan failed");
            return Err(CrimsonError::ScanError {
                reason: e.to_string(),
            });
        }

        tracing::info!("BLE scan started");
        Ok(())
    }

    /// Stop discovery. Stopping when not scanning is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`CrimsonError::ScanError`] if the transport fails to stop.
    pub async fn stop_scan(&self) -> CrimsonResult<()> {
        {
            let mut scan = self.scan.lock().unwrap_or_else(PoisonError::into_inner);
            if !scan.scanning {
                return Ok(());
            }
            scan.scanning = false;
            scan.sink = None;
        }
        self.transport
            .stop_scan()
            .await
            .map_err(|e| CrimsonError::ScanError {
                reason: e.to_string(),
            })?;
        tracing::info!("BLE scan stopped");
        Ok(())
    }

    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.scan
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .scanning
    }

    /// Filter an advertisement and forward it to the scan sink.
    ///
    /// Advertisements arriving while not scanning are ignored.
    pub fn handle_advertisement(&self, adv: &Advertisement) -> Option<Peripheral> {
        let scan = self.scan.lock().unwrap_or_else(PoisonError::into_inner);
        if !scan.scanning {
            return None;
        }
        let peripheral = classify_advertisement(adv, &self.config)?;
        tracing::debug!(
            address = %peripheral.address,
            name = %peripheral.name,
            rssi = ?peripheral.rssi,
            battery_level = peripheral.battery_level,
            pairing_mode = peripheral.pairing_mode,
            "Discovered headband",
        );
        if let Some(sink) = &scan.sink {
            if sink.send(peripheral.clone()).is_err() {
                tracing::debug!("Scan result receiver dropped");
            }
        }
        Some(peripheral)
    }

    // ─── Peripheral registry ────────────────────────────────────────────

    /// Register a peripheral so the adapter can connect to it and route its
    /// notifications.
    pub fn start_listen(&self, peripheral: &Peripheral) {
        let mut peripherals = self.peripherals.lock().unwrap_or_else(PoisonError::into_inner);
        peripherals
            .entry(peripheral.address.clone())
            .and_modify(|entry| entry.peripheral = peripheral.clone())
            .or_insert_with(|| PeripheralEntry {
                peripheral: peripheral.clone(),
                characteristics: CharacteristicSet::default(),
            });
    }

    #[must_use]
    pub fn peripheral(&self, address: &str) -> Option<Peripheral> {
        self.peripherals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .map(|entry| entry.peripheral.clone())
    }

    #[must_use]
    pub fn characteristics(&self, address: &str) -> Option<CharacteristicSet> {
        self.peripherals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .map(|entry| entry.characteristics.clone())
    }

    /// Role of `characteristic` on the peripheral at `address`.
    #[must_use]
    pub fn role_of(&self, address: &str, characteristic: Uuid) -> Option<CharacteristicRole> {
        self.peripherals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .and_then(|entry| entry.characteristics.role_of(characteristic))
    }

    /// Apply a battery notification. Returns the new level.
    pub fn handle_battery(&self, address: &str, value: &[u8]) -> Option<u8> {
        let level = *value.first()?;
        let mut peripherals = self.peripherals.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = peripherals.get_mut(address) {
            entry.peripheral.battery_level = level;
        }
        tracing::debug!(address, level, "Battery level updated");
        Some(level)
    }

    fn record_characteristic(&self, address: &str, role: CharacteristicRole, uuid: Uuid) {
        let mut peripherals = self.peripherals.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = peripherals.get_mut(address) {
            entry.characteristics.insert(role, uuid);
        }
    }

    fn take_characteristics(&self, address: &str) -> CharacteristicSet {
        let mut peripherals = self.peripherals.lock().unwrap_or_else(PoisonError::into_inner);
        peripherals
            .get_mut(address)
            .map(|entry| std::mem::take(&mut entry.characteristics))
            .unwrap_or_default()
    }

    // ─── Connection ─────────────────────────────────────────────────────

    /// Connect to a registered peripheral and negotiate its GATT topology.
    ///
    /// # Errors
    ///
    /// - [`CrimsonError::DeviceNotFound`] if `start_listen` was never called
    /// - [`CrimsonError::Transport`] if the link cannot be established
    /// - [`CrimsonError::ConnectionLost`] if the link drops mid-negotiation
    /// - [`CrimsonError::NegotiationFailed`] if discovery fails or the
    ///   write/notify pair is missing
    pub async fn connect(&self, address: &str) -> CrimsonResult<Negotiated> {
        if self.peripheral(address).is_none() {
            tracing::warn!(address, "Peripheral is not registered, cannot connect");
            return Err(CrimsonError::DeviceNotFound {
                address: address.to_string(),
            });
        }

        tracing::info!(address, "Connecting");
        self.transport.connect(address).await.inspect_err(|e| {
            tracing::warn!(address, error = %e, "Transport connect failed");
        })?;

        self.take_characteristics(address);
        self.negotiate(address).await.inspect_err(|e| {
            tracing::error!(address, error = %e, "GATT negotiation failed");
        })
    }

    async fn negotiate(&self, address: &str) -> CrimsonResult<Negotiated> {
        tracing::debug!(address, "Discovering services");
        let services = self
            .transport
            .discover_services(address, &Uuids::REQUIRED_SERVICES)
            .await
            .map_err(|e| CrimsonError::NegotiationFailed {
                address: address.to_string(),
                reason: format!("service discovery failed: {e}"),
            })?;

        let mut result = Negotiated::default();
        for service in services {
            self.ensure_connected(address).await?;
            tracing::debug!(address, %service, "Discovering characteristics");
            let characteristics = self
                .transport
                .discover_characteristics(address, service, &Uuids::KNOWN_CHARACTERISTICS)
                .await
                .map_err(|e| CrimsonError::NegotiationFailed {
                    address: address.to_string(),
                    reason: format!("characteristic discovery on {service} failed: {e}"),
                })?;

            for characteristic in characteristics {
                self.ensure_connected(address).await?;
                let Some(role) = CharacteristicRole::classify(characteristic) else {
                    tracing::debug!(address, %characteristic, "Ignoring unknown characteristic");
                    continue;
                };
                self.setup_characteristic(address, role, characteristic, &mut result)
                    .await;
            }
        }

        self.ensure_connected(address).await?;
        let ready = self
            .characteristics(address)
            .is_some_and(|set| set.is_ready());
        if !ready {
            return Err(CrimsonError::NegotiationFailed {
                address: address.to_string(),
                reason: "data stream write/notify characteristics not found".into(),
            });
        }

        tracing::info!(address, "Data stream characteristics ready");
        Ok(result)
    }

    async fn setup_characteristic(
        &self,
        address: &str,
        role: CharacteristicRole,
        uuid: Uuid,
        result: &mut Negotiated,
    ) {
        tracing::debug!(address, characteristic = %uuid, %role, "Found characteristic");
        self.record_characteristic(address, role, uuid);

        match role {
            CharacteristicRole::Write => {}
            CharacteristicRole::Notify => {
                if let Err(e) = self.transport.set_notify(address, uuid, true).await {
                    tracing::error!(address, error = %e, "Enabling data stream notification failed");
                }
            }
            CharacteristicRole::Battery => {
                if let Err(e) = self.transport.set_notify(address, uuid, true).await {
                    tracing::error!(address, error = %e, "Enabling battery notification failed");
                }
                match self.transport.read(address, uuid).await {
                    Ok(value) => {
                        result.battery_level = self.handle_battery(address, &value);
                    }
                    Err(e) => tracing::warn!(address, error = %e, "Battery level read failed"),
                }
            }
            _ => {
                let value = self.read_string(address, uuid).await;
                tracing::debug!(address, %role, value = %value, "Device information");
                let info = result.device_info.get_or_insert_with(DeviceInfo::default);
                match role {
                    CharacteristicRole::ManufacturerName => info.manufacturer_name = value,
                    CharacteristicRole::ModelNumber => info.model_number = value,
                    CharacteristicRole::SerialNumber => info.serial_number = value,
                    CharacteristicRole::HardwareRevision => info.hardware_revision = value,
                    CharacteristicRole::FirmwareRevision => info.firmware_revision = value,
                    _ => {}
                }
            }
        }
    }

    async fn read_string(&self, address: &str, characteristic: Uuid) -> String {
        match self.transport.read(address, characteristic).await {
            Ok(value) => String::from_utf8_lossy(&value).into_owned(),
            Err(e) => {
                tracing::warn!(address, %characteristic, error = %e, "Reading string characteristic failed");
                String::new()
            }
        }
    }

    async fn ensure_connected(&self, address: &str) -> CrimsonResult<()> {
        if self.transport.is_connected(address).await {
            return Ok(());
        }
        tracing::warn!(address, "Link dropped during negotiation");
        Err(CrimsonError::ConnectionLost {
            address: address.to_string(),
            reason: "link dropped during negotiation".into(),
        })
    }

    /// Write one frame to the data stream write characteristic.
    ///
    /// # Errors
    ///
    /// Returns [`CrimsonError::DeviceNotFound`],
    /// [`CrimsonError::CharacteristicUnavailable`] or the transport's write
    /// error.
    pub async fn write_data(&self, address: &str, data: &[u8], mode: WriteMode) -> CrimsonResult<()> {
        let write = {
            let peripherals = self.peripherals.lock().unwrap_or_else(PoisonError::into_inner);
            let Some(entry) = peripherals.get(address) else {
                tracing::warn!(address, "Peripheral is not registered, cannot write");
                return Err(CrimsonError::DeviceNotFound {
                    address: address.to_string(),
                });
            };
            entry
                .characteristics
                .get(CharacteristicRole::Write)
                .ok_or(CrimsonError::CharacteristicUnavailable {
                    role: CharacteristicRole::Write,
                })?
        };

        self.transport
            .write(address, write, data, mode)
            .await
            .inspect_err(|e| tracing::warn!(address, error = %e, "Write data failed"))
    }

    /// Clear the characteristic set and, while the link is up, switch off
    /// notifications on the data stream and battery characteristics.
    pub async fn reset(&self, address: &str) {
        let set = self.take_characteristics(address);
        if set.is_empty() || !self.transport.is_connected(address).await {
            return;
        }
        for role in [CharacteristicRole::Notify, CharacteristicRole::Battery] {
            if let Some(uuid) = set.get(role) {
                if let Err(e) = self.transport.set_notify(address, uuid, false).await {
                    tracing::debug!(address, %role, error = %e, "Disabling notification failed");
                }
            }
        }
    }

    /// Deliberately tear down the link and forget the peripheral.
    ///
    /// # Errors
    ///
    /// Returns the transport's disconnect error. The peripheral is removed
    /// from the registry regardless.
    pub async fn disconnect(&self, address: &str) -> CrimsonResult<()> {
        if self.peripheral(address).is_none() {
            tracing::warn!(address, "Peripheral is not registered, nothing to disconnect");
            return Ok(());
        }
        self.reset(address).await;
        self.peripherals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(address);

        self.transport.disconnect(address).await.inspect_err(|e| {
            tracing::warn!(address, error = %e, "Transport disconnect failed");
        })
    }
}

impl std::fmt::Debug for Adapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Adapter")
            .field("available", &self.is_available())
            .field("scanning", &self.is_scanning())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adv(name: Option<&str>, md: &[u8]) -> Advertisement {
        Advertisement {
            address: "aa:bb:cc:dd:ee:ff".into(),
            local_name: name.map(str::to_string),
            rssi: Some(-60),
            manufacturer_data: md.to_vec(),
        }
    }

    #[test]
    fn test_classify_manufacturer_data() {
        let config = CrimsonConfig::default();
        let p = classify_advertisement(&adv(Some("cmsn_OK"), &[0x42, 0x52, 80, 1]), &config)
            .unwrap();
        assert_eq!(p.name, "cmsn_OK");
        assert_eq!(p.battery_level, 80);
        assert!(p.pairing_mode);

        let p = classify_advertisement(&adv(None, &[0x42, 0x52, 12, 0, 9]), &config).unwrap();
        assert_eq!(p.name, "");
        assert_eq!(p.battery_level, 12);
        assert!(!p.pairing_mode);
    }

    #[test]
    fn test_classify_rejects_foreign_devices() {
        let config = CrimsonConfig::default();
        assert!(classify_advertisement(&adv(Some("Watch"), &[0x4c, 0x00, 1, 2]), &config).is_none());
        assert!(classify_advertisement(&adv(Some("Short"), &[0x42, 0x52, 80]), &config).is_none());
        assert!(classify_advertisement(&adv(None, &[]), &config).is_none());
    }

    #[test]
    fn test_classify_mock_prefix() {
        let config = CrimsonConfig::default();
        let p = classify_advertisement(&adv(Some("CM_bench"), &[]), &config).unwrap();
        assert_eq!(p.battery_level, 66);
        assert!(p.pairing_mode);

        let config = CrimsonConfig {
            mock_name_prefix: String::new(),
            ..CrimsonConfig::default()
        };
        assert!(classify_advertisement(&adv(Some("CM_bench"), &[]), &config).is_none());
    }

    #[test]
    fn test_characteristic_set_readiness() {
        let mut set = CharacteristicSet::default();
        assert!(!set.is_ready());
        set.insert(
            CharacteristicRole::Write,
            Uuids::CHARACTERISTIC_DATA_STREAM_WRITE,
        );
        assert!(!set.is_ready());
        set.insert(
            CharacteristicRole::Notify,
            Uuids::CHARACTERISTIC_DATA_STREAM_NOTIFY,
        );
        assert!(set.is_ready());
        assert_eq!(
            set.role_of(Uuids::CHARACTERISTIC_DATA_STREAM_NOTIFY),
            Some(CharacteristicRole::Notify)
        );
        set.clear();
        assert!(set.is_empty());
    }
}
