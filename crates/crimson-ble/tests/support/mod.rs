#![allow(dead_code)]

pub mod mock_codec;
pub mod mock_transport;

use std::sync::Arc;

use crimson_ble::transport::{Advertisement, TransportEvent};
use crimson_ble::{CrimsonConfig, CrimsonDriver, DeviceEvent, DeviceSession, Peripheral};
use tokio::sync::mpsc;

use mock_codec::MockCodec;
use mock_transport::MockTransport;

pub const ADDRESS: &str = "c4:64:e3:10:20:30";

pub struct Harness {
    pub driver: CrimsonDriver,
    pub transport: Arc<MockTransport>,
    pub codec: Arc<MockCodec>,
}

impl Harness {
    pub fn new(transport: MockTransport) -> Self {
        Self::with_config(transport, CrimsonConfig::default())
    }

    pub fn with_config(transport: MockTransport, config: CrimsonConfig) -> Self {
        let transport = Arc::new(transport);
        let codec = Arc::new(MockCodec::new());
        let driver = CrimsonDriver::new(config, transport.clone(), codec.clone());
        Self {
            driver,
            transport,
            codec,
        }
    }

    /// Scan, feed one advertisement and return the accepted peripheral.
    pub async fn discover(&self, name: &str, manufacturer_data: &[u8]) -> Peripheral {
        let mut found = self.driver.start_scan().await.expect("scan should start");
        self.driver
            .handle_transport_event(TransportEvent::Discovered(Advertisement {
                address: ADDRESS.into(),
                local_name: Some(name.into()),
                rssi: Some(-55),
                manufacturer_data: manufacturer_data.to_vec(),
            }))
            .await;
        let peripheral = found.try_recv().expect("advertisement should be accepted");
        self.driver.stop_scan().await.expect("scan should stop");
        peripheral
    }

    pub async fn session(&self) -> DeviceSession {
        let peripheral = self.discover("cmsn_OK", &[0x42, 0x52, 80, 1]).await;
        self.driver.session(&peripheral)
    }

    pub async fn connected_session(&self) -> DeviceSession {
        let session = self.session().await;
        session.connect().await.expect("connect should succeed");
        session
    }

    /// Connected session with a completed pairing exchange.
    pub async fn paired_session(&self) -> DeviceSession {
        let session = self.connected_session().await;
        let pending = session.pair().await.expect("pair request should be written");
        self.respond_ok(pending.msg_id()).await;
        pending.await.expect("pairing should succeed");
        assert!(session.is_paired());
        session
    }

    /// Deliver a frame on the data stream notify characteristic.
    pub async fn notify(&self, frame: Vec<u8>) {
        self.driver
            .handle_transport_event(TransportEvent::Notification {
                address: ADDRESS.into(),
                characteristic: crimson_ble::protocol::Uuids::CHARACTERISTIC_DATA_STREAM_NOTIFY,
                value: frame,
            })
            .await;
    }

    pub async fn respond_ok(&self, msg_id: u32) {
        self.notify(MockCodec::config_response_frame(msg_id, true, 0))
            .await;
    }

    pub async fn drop_link(&self) {
        self.transport.drop_link(ADDRESS);
        self.driver
            .handle_transport_event(TransportEvent::Disconnected {
                address: ADDRESS.into(),
            })
            .await;
    }
}

/// Everything queued on a listener right now.
pub fn drain(rx: &mut mpsc::UnboundedReceiver<DeviceEvent>) -> Vec<DeviceEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn kinds(events: &[DeviceEvent]) -> Vec<&'static str> {
    events.iter().map(DeviceEvent::kind).collect()
}
