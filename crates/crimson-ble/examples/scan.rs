//! Scan for Crimson headbands and print each one found.
//!
//! ```bash
//! CRIMSON_LOG_LEVEL=debug cargo run --example scan --features btleplug
//! ```
//!
//! Scanning needs no protocol codec, so this example plugs in one that
//! refuses to pack anything.

use std::sync::Arc;
use std::time::Duration;

use crimson_ble::btleplug::BtleplugTransport;
use crimson_ble::codec::{Codec, CodecEvent, Command, DeviceHandle, MessageId};
use crimson_ble::protocol::ContactState;
use crimson_ble::{CrimsonConfig, CrimsonDriver, CrimsonError, CrimsonResult};
use tracing_subscriber::EnvFilter;

struct ScanOnlyCodec;

impl ScanOnlyCodec {
    fn unsupported<T>() -> CrimsonResult<T> {
        Err(CrimsonError::Codec {
            reason: "scan example has no protocol codec".into(),
        })
    }
}

impl Codec for ScanOnlyCodec {
    fn create_device(&self, _address: &str) -> DeviceHandle {
        DeviceHandle(0)
    }

    fn generate_message_id(&self) -> MessageId {
        0
    }

    fn encode_command(&self, _command: &Command, _msg_id: MessageId) -> CrimsonResult<Vec<u8>> {
        Self::unsupported()
    }

    fn pack_pair_request(&self, _address: &str, _msg_id: MessageId) -> CrimsonResult<Vec<u8>> {
        Self::unsupported()
    }

    fn pack_validate_pairing(&self, _address: &str, _msg_id: MessageId) -> CrimsonResult<Vec<u8>> {
        Self::unsupported()
    }

    fn decode(&self, _handle: DeviceHandle, _frame: &[u8]) -> Vec<CodecEvent> {
        Vec::new()
    }

    fn contact_state(&self, _handle: DeviceHandle) -> ContactState {
        ContactState::Unknown
    }

    fn set_data_subscription(&self, _handle: DeviceHandle, _a: bool, _m: bool, _s: bool) {}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = CrimsonConfig::discover(None)?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(config.log_level.filter_directive()))
        .init();

    let (transport, events) = BtleplugTransport::new().await?;
    let driver = CrimsonDriver::new(config, Arc::new(transport), Arc::new(ScanOnlyCodec));
    let event_loop = driver.spawn_event_loop(events);

    println!("Scanning for headbands (10 s)...");
    let mut found = driver.start_scan().await?;
    let deadline = tokio::time::sleep(Duration::from_secs(10));
    tokio::pin!(deadline);

    let mut seen = std::collections::HashSet::new();
    loop {
        tokio::select! {
            () = &mut deadline => break,
            peripheral = found.recv() => {
                let Some(p) = peripheral else { break };
                if seen.insert(p.address.clone()) {
                    println!(
                        "  {} {:<18} battery {:>3}%  pairing mode: {}  rssi: {:?}",
                        p.address, p.name, p.battery_level, p.pairing_mode, p.rssi
                    );
                }
            }
        }
    }

    driver.dispose().await;
    event_loop.abort();
    if seen.is_empty() {
        println!("No headbands found. Make sure the headband is powered on.");
    }
    Ok(())
}
