//! # btleplug Transport
//!
//! [`BtleplugTransport`] implements [`BleTransport`] on top of the platform
//! BLE stack through [`btleplug`](https://docs.rs/btleplug). Enabled with the
//! `btleplug` feature.
//!
//! ```no_run
//! use std::sync::Arc;
//! use crimson_ble::{CrimsonConfig, CrimsonDriver, Codec};
//! use crimson_ble::btleplug::BtleplugTransport;
//!
//! # async fn demo(codec: Arc<dyn Codec>) -> crimson_ble::CrimsonResult<()> {
//! let (transport, events) = BtleplugTransport::new().await?;
//! let driver = CrimsonDriver::new(CrimsonConfig::discover(None)?, Arc::new(transport), codec);
//! let _event_loop = driver.spawn_event_loop(events);
//! let mut found = driver.start_scan().await?;
//! if let Some(peripheral) = found.recv().await {
//!     driver.stop_scan().await?;
//!     driver.session(&peripheral).connect().await?;
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use ::btleplug::api::{
    Central, CentralEvent, CentralState, Characteristic, Manager as _, Peripheral as _,
    ScanFilter, WriteType,
};
use ::btleplug::platform::{Adapter as BtAdapter, Manager, Peripheral as BtPeripheral, PeripheralId};
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{CrimsonError, CrimsonResult};
use crate::protocol::constants::MANUFACTURER_SIGNATURE;
use crate::transport::{Advertisement, BleTransport, TransportEvent, WriteMode};

/// Company id whose little-endian bytes form the manufacturer signature.
const COMPANY_ID: u16 = u16::from_le_bytes(MANUFACTURER_SIGNATURE);

type PeripheralMap = Arc<Mutex<HashMap<String, BtPeripheral>>>;

/// [`BleTransport`] backed by the first adapter btleplug reports.
pub struct BtleplugTransport {
    adapter: BtAdapter,
    available: Arc<AtomicBool>,
    peripherals: PeripheralMap,
    notification_tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    events: mpsc::UnboundedSender<TransportEvent>,
    central_task: JoinHandle<()>,
}

impl BtleplugTransport {
    /// Open the first adapter and start forwarding its events.
    ///
    /// Feed the returned receiver to
    /// [`CrimsonDriver::spawn_event_loop`](crate::CrimsonDriver::spawn_event_loop).
    ///
    /// # Errors
    ///
    /// Returns [`CrimsonError::AdapterUnavailable`] when no adapter exists,
    /// or a transport error from the platform stack.
    pub async fn new() -> CrimsonResult<(Self, mpsc::UnboundedReceiver<TransportEvent>)> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or(CrimsonError::AdapterUnavailable)?;

        let powered = matches!(adapter.adapter_state().await, Ok(CentralState::PoweredOn));
        tracing::info!(powered, "Opened BLE adapter");

        let available = Arc::new(AtomicBool::new(powered));
        let peripherals = PeripheralMap::default();
        let (tx, rx) = mpsc::unbounded_channel();

        let central_events = adapter.events().await?;
        let central_task = tokio::spawn(forward_central_events(
            adapter.clone(),
            central_events,
            Arc::clone(&available),
            Arc::clone(&peripherals),
            tx.clone(),
        ));

        Ok((
            Self {
                adapter,
                available,
                peripherals,
                notification_tasks: Mutex::new(HashMap::new()),
                events: tx,
                central_task,
            },
            rx,
        ))
    }

    fn lookup(&self, address: &str) -> CrimsonResult<BtPeripheral> {
        self.peripherals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .cloned()
            .ok_or_else(|| CrimsonError::DeviceNotFound {
                address: address.to_string(),
            })
    }

    fn characteristic(peripheral: &BtPeripheral, uuid: Uuid) -> CrimsonResult<Characteristic> {
        peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| CrimsonError::Transport {
                reason: format!("characteristic {uuid} not discovered"),
            })
    }

    async fn spawn_notification_forwarder(
        &self,
        address: &str,
        peripheral: &BtPeripheral,
    ) -> CrimsonResult<()> {
        let mut notifications = peripheral.notifications().await?;
        let tx = self.events.clone();
        let owner = address.to_string();
        let task = tokio::spawn(async move {
            while let Some(n) = notifications.next().await {
                let event = TransportEvent::Notification {
                    address: owner.clone(),
                    characteristic: n.uuid,
                    value: n.value,
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
            tracing::debug!(address = %owner, "Notification stream ended");
        });
        let previous = self
            .notification_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(address.to_string(), task);
        if let Some(previous) = previous {
            previous.abort();
        }
        Ok(())
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        self.central_task.abort();
        for (_, task) in self
            .notification_tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
        {
            task.abort();
        }
    }
}

impl std::fmt::Debug for BtleplugTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleplugTransport")
            .field("available", &self.available.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

async fn forward_central_events(
    adapter: BtAdapter,
    mut events: std::pin::Pin<Box<dyn futures_core::Stream<Item = CentralEvent> + Send>>,
    available: Arc<AtomicBool>,
    peripherals: PeripheralMap,
    tx: mpsc::UnboundedSender<TransportEvent>,
) {
    while let Some(event) = events.next().await {
        let forwarded = match event {
            CentralEvent::StateUpdate(state) => {
                let powered = matches!(state, CentralState::PoweredOn);
                available.store(powered, Ordering::Relaxed);
                Some(TransportEvent::AdapterStateChanged { available: powered })
            }
            CentralEvent::DeviceDiscovered(id)
            | CentralEvent::DeviceUpdated(id)
            | CentralEvent::ManufacturerDataAdvertisement { id, .. } => {
                advertisement(&adapter, &id, &peripherals)
                    .await
                    .map(TransportEvent::Discovered)
            }
            CentralEvent::DeviceDisconnected(id) => {
                address_of(&adapter, &id)
                    .await
                    .map(|address| TransportEvent::Disconnected { address })
            }
            _ => None,
        };
        if let Some(event) = forwarded {
            if tx.send(event).is_err() {
                break;
            }
        }
    }
    tracing::debug!("Central event stream ended");
}

async fn address_of(adapter: &BtAdapter, id: &PeripheralId) -> Option<String> {
    adapter
        .peripheral(id)
        .await
        .ok()
        .map(|p| p.address().to_string())
}

async fn advertisement(
    adapter: &BtAdapter,
    id: &PeripheralId,
    peripherals: &PeripheralMap,
) -> Option<Advertisement> {
    let peripheral = adapter.peripheral(id).await.ok()?;
    let properties = peripheral.properties().await.ok()??;
    let address = peripheral.address().to_string();

    let manufacturer_data = properties
        .manufacturer_data
        .get(&COMPANY_ID)
        .map(|data| (COMPANY_ID, data))
        .or_else(|| properties.manufacturer_data.iter().next().map(|(id, d)| (*id, d)))
        .map(|(company, data)| {
            let mut bytes = company.to_le_bytes().to_vec();
            bytes.extend_from_slice(data);
            bytes
        })
        .unwrap_or_default();

    peripherals
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(address.clone(), peripheral);

    Some(Advertisement {
        address,
        local_name: properties.local_name,
        rssi: properties.rssi,
        manufacturer_data,
    })
}

impl BleTransport for BtleplugTransport {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    fn start_scan(&self, allow_duplicates: bool) -> BoxFuture<'_, CrimsonResult<()>> {
        Box::pin(async move {
            if !allow_duplicates {
                tracing::debug!("Duplicate filtering is left to the platform stack");
            }
            self.adapter.start_scan(ScanFilter::default()).await?;
            Ok(())
        })
    }

    fn stop_scan(&self) -> BoxFuture<'_, CrimsonResult<()>> {
        Box::pin(async move {
            self.adapter.stop_scan().await?;
            Ok(())
        })
    }

    fn connect<'a>(&'a self, address: &'a str) -> BoxFuture<'a, CrimsonResult<()>> {
        Box::pin(async move {
            let peripheral = self.lookup(address)?;
            peripheral.connect().await?;
            self.spawn_notification_forwarder(address, &peripheral).await
        })
    }

    fn disconnect<'a>(&'a self, address: &'a str) -> BoxFuture<'a, CrimsonResult<()>> {
        Box::pin(async move {
            let task = self
                .notification_tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(address);
            if let Some(task) = task {
                task.abort();
            }
            let peripheral = self.lookup(address)?;
            peripheral.disconnect().await?;
            Ok(())
        })
    }

    fn is_connected<'a>(&'a self, address: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            match self.lookup(address) {
                Ok(peripheral) => peripheral.is_connected().await.unwrap_or(false),
                Err(_) => false,
            }
        })
    }

    fn discover_services<'a>(
        &'a self,
        address: &'a str,
        services: &'a [Uuid],
    ) -> BoxFuture<'a, CrimsonResult<Vec<Uuid>>> {
        Box::pin(async move {
            let peripheral = self.lookup(address)?;
            peripheral.discover_services().await?;
            let present = peripheral.services();
            Ok(services
                .iter()
                .copied()
                .filter(|uuid| present.iter().any(|s| s.uuid == *uuid))
                .collect())
        })
    }

    fn discover_characteristics<'a>(
        &'a self,
        address: &'a str,
        service: Uuid,
        characteristics: &'a [Uuid],
    ) -> BoxFuture<'a, CrimsonResult<Vec<Uuid>>> {
        Box::pin(async move {
            let peripheral = self.lookup(address)?;
            let Some(found) = peripheral.services().into_iter().find(|s| s.uuid == service) else {
                return Ok(Vec::new());
            };
            Ok(characteristics
                .iter()
                .copied()
                .filter(|uuid| found.characteristics.iter().any(|c| c.uuid == *uuid))
                .collect())
        })
    }

    fn set_notify<'a>(
        &'a self,
        address: &'a str,
        characteristic: Uuid,
        enabled: bool,
    ) -> BoxFuture<'a, CrimsonResult<()>> {
        Box::pin(async move {
            let peripheral = self.lookup(address)?;
            let characteristic = Self::characteristic(&peripheral, characteristic)?;
            if enabled {
                peripheral.subscribe(&characteristic).await?;
            } else {
                peripheral.unsubscribe(&characteristic).await?;
            }
            Ok(())
        })
    }

    fn read<'a>(
        &'a self,
        address: &'a str,
        characteristic: Uuid,
    ) -> BoxFuture<'a, CrimsonResult<Vec<u8>>> {
        Box::pin(async move {
            let peripheral = self.lookup(address)?;
            let characteristic = Self::characteristic(&peripheral, characteristic)?;
            Ok(peripheral.read(&characteristic).await?)
        })
    }

    fn write<'a>(
        &'a self,
        address: &'a str,
        characteristic: Uuid,
        value: &'a [u8],
        mode: WriteMode,
    ) -> BoxFuture<'a, CrimsonResult<()>> {
        Box::pin(async move {
            let peripheral = self.lookup(address)?;
            let characteristic = Self::characteristic(&peripheral, characteristic)?;
            let write_type = match mode {
                WriteMode::WithoutResponse => WriteType::WithoutResponse,
                WriteMode::WithResponse => WriteType::WithResponse,
            };
            peripheral.write(&characteristic, value, write_type).await?;
            Ok(())
        })
    }
}
