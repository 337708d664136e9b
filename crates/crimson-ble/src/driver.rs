//! # Crimson Driver
//!
//! [`CrimsonDriver`] is the entry point. It owns the registries that the
//! sessions share (adapter, session registry, correlation table) and routes
//! [`TransportEvent`]s:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       CrimsonDriver                          │
//! │                                                              │
//! │  event loop (spawned task, or handle_transport_event):       │
//! │    AdapterStateChanged ─► Adapter availability ─► broadcast  │
//! │    Discovered          ─► advertisement filter ─► scan sink  │
//! │    Notification ─┬─ notify  ─► session: frame ─► codec ─►    │
//! │                  │               responses ─► correlation    │
//! │                  │               telemetry ─► listener       │
//! │                  └─ battery ─► session battery level         │
//! │    Disconnected        ─► session forced to Disconnected     │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::adapter::{Adapter, Peripheral};
use crate::codec::{Codec, MessageId};
use crate::config::{CrimsonConfig, LogLevel};
use crate::correlation::{Completion, CorrelationTable, Response};
use crate::error::{CrimsonError, CrimsonResult};
use crate::protocol::constants::CharacteristicRole;
use crate::protocol::events::DriverEvent;
use crate::session::{DeviceSession, SessionRegistry};
use crate::transport::{BleTransport, TransportEvent};

/// State shared by the driver and every session it hands out.
pub(crate) struct DriverShared {
    pub(crate) config: CrimsonConfig,
    pub(crate) adapter: Adapter,
    pub(crate) codec: Arc<dyn Codec>,
    pub(crate) sessions: SessionRegistry,
    correlations: Mutex<CorrelationTable>,
    events: broadcast::Sender<DriverEvent>,
}

impl DriverShared {
    pub(crate) fn register(&self, msg_id: MessageId, address: &str, completion: Completion) {
        self.correlations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .register(msg_id, address, completion);
    }

    pub(crate) fn cancel(&self, msg_id: MessageId) {
        self.correlations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel(msg_id);
    }

    pub(crate) fn abandon(&self, address: &str) {
        self.correlations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .abandon_device(address);
    }

    /// Fire the matching completion outside the table lock.
    pub(crate) fn resolve(&self, response: Response) -> bool {
        let completion = self
            .correlations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .claim(&response);
        completion.is_some_and(|completion| completion.fire(response))
    }

    fn pending_count(&self) -> usize {
        self.correlations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Client-side driver for Crimson headbands.
///
/// Cheap to clone; clones share the same registries.
#[derive(Clone)]
pub struct CrimsonDriver {
    shared: Arc<DriverShared>,
}

impl CrimsonDriver {
    /// Create a driver over `transport` and `codec`.
    pub fn new(config: CrimsonConfig, transport: Arc<dyn BleTransport>, codec: Arc<dyn Codec>) -> Self {
        let (events, _) = broadcast::channel(config.events.channel_capacity.max(1));
        codec.set_log_level(config.log_level);
        let adapter = Adapter::new(transport, config.clone());
        Self {
            shared: Arc::new(DriverShared {
                config,
                adapter,
                codec,
                sessions: SessionRegistry::default(),
                correlations: Mutex::new(CorrelationTable::new()),
                events,
            }),
        }
    }

    pub fn config(&self) -> &CrimsonConfig {
        &self.shared.config
    }

    pub fn adapter(&self) -> &Adapter {
        &self.shared.adapter
    }

    /// Subscribe to adapter-level events.
    pub fn event_receiver(&self) -> broadcast::Receiver<DriverEvent> {
        self.shared.events.subscribe()
    }

    /// Forward a new log level to the codec.
    pub fn set_log_level(&self, level: LogLevel) {
        tracing::debug!(?level, "Setting codec log level");
        self.shared.codec.set_log_level(level);
    }

    // ─── Scanning ───────────────────────────────────────────────────────

    /// Start discovery and return the stream of accepted headbands.
    ///
    /// # Errors
    ///
    /// Returns [`CrimsonError::AdapterUnavailable`](crate::CrimsonError::AdapterUnavailable)
    /// if the radio stays off, or a scan error from the transport. Scan errors
    /// are also broadcast as [`DriverEvent::scan_error`].
    pub async fn start_scan(&self) -> CrimsonResult<mpsc::UnboundedReceiver<Peripheral>> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(e) = self.shared.adapter.start_scan(tx).await {
            if matches!(e, CrimsonError::ScanError { .. }) {
                let _ = self.shared.events.send(DriverEvent::scan_error());
            }
            return Err(e);
        }
        Ok(rx)
    }

    /// Stop discovery. A no-op when not scanning.
    ///
    /// # Errors
    ///
    /// Returns a scan error from the transport.
    pub async fn stop_scan(&self) -> CrimsonResult<()> {
        self.shared.adapter.stop_scan().await
    }

    // ─── Sessions ───────────────────────────────────────────────────────

    /// Session for a discovered headband. Returns the live session if one is
    /// already registered for the address.
    pub fn session(&self, peripheral: &Peripheral) -> DeviceSession {
        self.shared
            .sessions
            .get(&peripheral.address)
            .unwrap_or_else(|| DeviceSession::new(Arc::clone(&self.shared), peripheral))
    }

    /// Live session registered for `address`, if any.
    pub fn find_session(&self, address: &str) -> Option<DeviceSession> {
        self.shared.sessions.get(address)
    }

    /// Number of commands still waiting for a device response.
    pub fn pending_responses(&self) -> usize {
        self.shared.pending_count()
    }

    // ─── Transport events ───────────────────────────────────────────────

    /// Route one transport event.
    pub async fn handle_transport_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::AdapterStateChanged { available } => {
                if self.shared.adapter.set_available(available) {
                    let event = if available {
                        DriverEvent::AdapterAvailable
                    } else {
                        DriverEvent::power_off()
                    };
                    let _ = self.shared.events.send(event);
                }
            }
            TransportEvent::Discovered(adv) => {
                self.shared.adapter.handle_advertisement(&adv);
            }
            TransportEvent::Notification {
                address,
                characteristic,
                value,
            } => match self.shared.adapter.role_of(&address, characteristic) {
                Some(CharacteristicRole::Notify) => match self.shared.sessions.get(&address) {
                    Some(session) => session.on_raw_data(&value).await,
                    None => tracing::debug!(address = %address, "Data for unknown session"),
                },
                Some(CharacteristicRole::Battery) => {
                    let level = self.shared.adapter.handle_battery(&address, &value);
                    if let (Some(level), Some(session)) = (level, self.shared.sessions.get(&address)) {
                        session.on_battery_level(level);
                    }
                }
                _ => {
                    tracing::debug!(address = %address, %characteristic, "Ignoring notification");
                }
            },
            TransportEvent::Disconnected { address } => match self.shared.sessions.get(&address) {
                Some(session) => {
                    session.on_transport_disconnected().await;
                    let _ = self
                        .shared
                        .events
                        .send(DriverEvent::PeripheralDisconnected { address });
                }
                None => {
                    self.shared.adapter.reset(&address).await;
                }
            },
        }
    }

    /// Spawn a task that routes every event from `events` until the channel
    /// closes.
    pub fn spawn_event_loop(
        &self,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> JoinHandle<()> {
        let driver = self.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                driver.handle_transport_event(event).await;
            }
            tracing::debug!("Transport event loop exiting");
        })
    }

    /// Stop scanning and disconnect every live session.
    pub async fn dispose(&self) {
        if let Err(e) = self.stop_scan().await {
            tracing::warn!(error = %e, "Stopping scan during dispose failed");
        }
        for session in self.shared.sessions.all() {
            if let Err(e) = session.disconnect().await {
                tracing::warn!(address = %session.address(), error = %e, "Disconnect during dispose failed");
            }
        }
    }
}

impl std::fmt::Debug for CrimsonDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrimsonDriver")
            .field("adapter", &self.shared.adapter)
            .field("pending_responses", &self.pending_responses())
            .finish_non_exhaustive()
    }
}
