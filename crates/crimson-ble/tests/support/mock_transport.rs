use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crimson_ble::protocol::Uuids;
use crimson_ble::transport::{BleTransport, WriteMode};
use crimson_ble::{CrimsonError, CrimsonResult};
use futures_util::future::BoxFuture;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    StartScan,
    StopScan,
    Connect(String),
    Disconnect(String),
    DiscoverServices,
    DiscoverCharacteristics(Uuid),
    SetNotify(Uuid, bool),
    Read(Uuid),
    Write(Uuid),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Written {
    pub characteristic: Uuid,
    pub value: Vec<u8>,
    pub mode: WriteMode,
}

struct State {
    available: bool,
    connected: HashSet<String>,
    topology: Vec<(Uuid, Vec<Uuid>)>,
    values: HashMap<Uuid, Vec<u8>>,
    failing_reads: HashSet<Uuid>,
    drop_after_service_discovery: bool,
    fail_connect: bool,
    fail_scan: bool,
    notifying: HashSet<Uuid>,
    calls: Vec<Call>,
    writes: Vec<Written>,
}

/// In-memory GATT peripheral with a scriptable topology.
pub struct MockTransport {
    state: Mutex<State>,
}

impl MockTransport {
    /// A powered adapter in front of a headband exposing every known
    /// characteristic.
    pub fn crimson() -> Self {
        let topology = vec![
            (
                Uuids::SERVICE_DATA_STREAM,
                vec![
                    Uuids::CHARACTERISTIC_DATA_STREAM_WRITE,
                    Uuids::CHARACTERISTIC_DATA_STREAM_NOTIFY,
                ],
            ),
            (
                Uuids::SERVICE_DEVICE_INFORMATION,
                vec![
                    Uuids::CHARACTERISTIC_MANUFACTURER_NAME,
                    Uuids::CHARACTERISTIC_MODEL_NUMBER,
                    Uuids::CHARACTERISTIC_SERIAL_NUMBER,
                    Uuids::CHARACTERISTIC_HARDWARE_REVISION,
                    Uuids::CHARACTERISTIC_FIRMWARE_REVISION,
                ],
            ),
            (
                Uuids::SERVICE_BATTERY_LEVEL,
                vec![Uuids::CHARACTERISTIC_BATTERY_LEVEL],
            ),
        ];
        let values = HashMap::from([
            (Uuids::CHARACTERISTIC_MANUFACTURER_NAME, b"Crimson".to_vec()),
            (Uuids::CHARACTERISTIC_MODEL_NUMBER, b"CM-1".to_vec()),
            (Uuids::CHARACTERISTIC_SERIAL_NUMBER, b"SN0042".to_vec()),
            (Uuids::CHARACTERISTIC_HARDWARE_REVISION, b"1.2".to_vec()),
            (Uuids::CHARACTERISTIC_FIRMWARE_REVISION, b"3.4.5".to_vec()),
            (Uuids::CHARACTERISTIC_BATTERY_LEVEL, vec![87]),
        ]);
        Self {
            state: Mutex::new(State {
                available: true,
                connected: HashSet::new(),
                topology,
                values,
                failing_reads: HashSet::new(),
                drop_after_service_discovery: false,
                fail_connect: false,
                fail_scan: false,
                notifying: HashSet::new(),
                calls: Vec::new(),
                writes: Vec::new(),
            }),
        }
    }

    pub fn powered_off(self) -> Self {
        self.state.lock().unwrap().available = false;
        self
    }

    pub fn without_characteristic(self, characteristic: Uuid) -> Self {
        for (_, chars) in &mut self.state.lock().unwrap().topology {
            chars.retain(|c| *c != characteristic);
        }
        self
    }

    pub fn without_service(self, service: Uuid) -> Self {
        self.state
            .lock()
            .unwrap()
            .topology
            .retain(|(s, _)| *s != service);
        self
    }

    pub fn with_failing_read(self, characteristic: Uuid) -> Self {
        self.state.lock().unwrap().failing_reads.insert(characteristic);
        self
    }

    /// The link drops right after service discovery.
    pub fn dropping_link_during_negotiation(self) -> Self {
        self.state.lock().unwrap().drop_after_service_discovery = true;
        self
    }

    pub fn failing_connect(self) -> Self {
        self.state.lock().unwrap().fail_connect = true;
        self
    }

    pub fn failing_scan(self) -> Self {
        self.state.lock().unwrap().fail_scan = true;
        self
    }

    pub fn set_available(&self, available: bool) {
        self.state.lock().unwrap().available = available;
    }

    pub fn drop_link(&self, address: &str) {
        self.state.lock().unwrap().connected.remove(address);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn writes(&self) -> Vec<Written> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().unwrap().writes.len()
    }

    pub fn is_notifying(&self, characteristic: Uuid) -> bool {
        self.state.lock().unwrap().notifying.contains(&characteristic)
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }

    fn require_link(&self, address: &str) -> CrimsonResult<()> {
        if self.state.lock().unwrap().connected.contains(address) {
            return Ok(());
        }
        Err(CrimsonError::Transport {
            reason: format!("{address} is not connected"),
        })
    }
}

impl BleTransport for MockTransport {
    fn is_available(&self) -> bool {
        self.state.lock().unwrap().available
    }

    fn start_scan(&self, _allow_duplicates: bool) -> BoxFuture<'_, CrimsonResult<()>> {
        Box::pin(async move {
            self.record(Call::StartScan);
            if self.state.lock().unwrap().fail_scan {
                return Err(CrimsonError::Transport {
                    reason: "scan refused".into(),
                });
            }
            Ok(())
        })
    }

    fn stop_scan(&self) -> BoxFuture<'_, CrimsonResult<()>> {
        Box::pin(async move {
            self.record(Call::StopScan);
            Ok(())
        })
    }

    fn connect<'a>(&'a self, address: &'a str) -> BoxFuture<'a, CrimsonResult<()>> {
        Box::pin(async move {
            self.record(Call::Connect(address.to_string()));
            let mut state = self.state.lock().unwrap();
            if state.fail_connect {
                return Err(CrimsonError::Transport {
                    reason: "connection refused".into(),
                });
            }
            state.connected.insert(address.to_string());
            Ok(())
        })
    }

    fn disconnect<'a>(&'a self, address: &'a str) -> BoxFuture<'a, CrimsonResult<()>> {
        Box::pin(async move {
            self.record(Call::Disconnect(address.to_string()));
            let mut state = self.state.lock().unwrap();
            state.connected.remove(address);
            state.notifying.clear();
            Ok(())
        })
    }

    fn is_connected<'a>(&'a self, address: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move { self.state.lock().unwrap().connected.contains(address) })
    }

    fn discover_services<'a>(
        &'a self,
        address: &'a str,
        services: &'a [Uuid],
    ) -> BoxFuture<'a, CrimsonResult<Vec<Uuid>>> {
        Box::pin(async move {
            self.record(Call::DiscoverServices);
            self.require_link(address)?;
            let mut state = self.state.lock().unwrap();
            let found = state
                .topology
                .iter()
                .map(|(s, _)| *s)
                .filter(|s| services.contains(s))
                .collect();
            if state.drop_after_service_discovery {
                state.connected.remove(address);
            }
            Ok(found)
        })
    }

    fn discover_characteristics<'a>(
        &'a self,
        address: &'a str,
        service: Uuid,
        characteristics: &'a [Uuid],
    ) -> BoxFuture<'a, CrimsonResult<Vec<Uuid>>> {
        Box::pin(async move {
            self.record(Call::DiscoverCharacteristics(service));
            self.require_link(address)?;
            let state = self.state.lock().unwrap();
            Ok(state
                .topology
                .iter()
                .find(|(s, _)| *s == service)
                .map(|(_, chars)| {
                    chars
                        .iter()
                        .copied()
                        .filter(|c| characteristics.contains(c))
                        .collect()
                })
                .unwrap_or_default())
        })
    }

    fn set_notify<'a>(
        &'a self,
        address: &'a str,
        characteristic: Uuid,
        enabled: bool,
    ) -> BoxFuture<'a, CrimsonResult<()>> {
        Box::pin(async move {
            self.record(Call::SetNotify(characteristic, enabled));
            self.require_link(address)?;
            let mut state = self.state.lock().unwrap();
            if enabled {
                state.notifying.insert(characteristic);
            } else {
                state.notifying.remove(&characteristic);
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
            self.record(Call::Read(characteristic));
            self.require_link(address)?;
            let state = self.state.lock().unwrap();
            if state.failing_reads.contains(&characteristic) {
                return Err(CrimsonError::Transport {
                    reason: "read not permitted".into(),
                });
            }
            Ok(state.values.get(&characteristic).cloned().unwrap_or_default())
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
            self.record(Call::Write(characteristic));
            self.require_link(address)?;
            self.state.lock().unwrap().writes.push(Written {
                characteristic,
                value: value.to_vec(),
                mode,
            });
            Ok(())
        })
    }
}
