use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crimson_ble::codec::{Codec, CodecEvent, Command, DeviceHandle, MessageId};
use crimson_ble::protocol::{ContactState, LeadOffStatus, SystemInfo};
use crimson_ble::{CrimsonResult, LogLevel};

const MAGIC: [u8; 2] = [0xcc, 0xa5];
const TRAILER: [u8; 4] = [0xee, 0xee, 0xee, 0xee];
/// Zero bytes appended to encoder output, like a codec scratch buffer.
pub const SCRATCH_PADDING: usize = 8;

pub const TAG_COMMAND: u8 = 0x01;
pub const TAG_PAIR: u8 = 0x02;
pub const TAG_CONFIG_RESPONSE: u8 = 0x81;
pub const TAG_SYSTEM_INFO: u8 = 0x82;
pub const TAG_ATTENTION: u8 = 0x90;
pub const TAG_SIGNAL_WARNING: u8 = 0x91;
pub const TAG_LEAD_OFF: u8 = 0x92;
pub const TAG_LOG: u8 = 0x93;

/// Build a frame: 6-byte header (size in bytes 4-5), body, 4-byte trailer.
pub fn frame(tag: u8, cmd: u8, body: &[u8]) -> Vec<u8> {
    let size = u16::try_from(body.len()).unwrap().to_be_bytes();
    let mut out = vec![MAGIC[0], MAGIC[1], tag, cmd, size[0], size[1]];
    out.extend_from_slice(body);
    out.extend_from_slice(&TRAILER);
    out
}

#[derive(Default)]
struct Recorded {
    devices: Vec<String>,
    commands: Vec<(MessageId, Command)>,
    pair_requests: Vec<(MessageId, bool)>,
    decoded: usize,
    subscriptions: HashMap<u64, (bool, bool, bool)>,
    log_level: Option<LogLevel>,
}

/// Stand-in codec with a trivial frame layout.
pub struct MockCodec {
    next_msg_id: AtomicU32,
    next_handle: AtomicU64,
    recorded: Mutex<Recorded>,
}

impl MockCodec {
    pub fn new() -> Self {
        Self {
            next_msg_id: AtomicU32::new(1),
            next_handle: AtomicU64::new(1),
            recorded: Mutex::new(Recorded::default()),
        }
    }

    pub fn config_response_frame(msg_id: MessageId, success: bool, error_code: i32) -> Vec<u8> {
        let mut body = msg_id.to_be_bytes().to_vec();
        body.push(u8::from(success));
        body.extend_from_slice(&error_code.to_be_bytes());
        frame(TAG_CONFIG_RESPONSE, 0, &body)
    }

    pub fn system_info_frame(msg_id: MessageId, error_code: i32) -> Vec<u8> {
        let mut body = msg_id.to_be_bytes().to_vec();
        body.extend_from_slice(&error_code.to_be_bytes());
        frame(TAG_SYSTEM_INFO, 0, &body)
    }

    pub fn attention_frame(percent: u8) -> Vec<u8> {
        frame(TAG_ATTENTION, 0, &[percent])
    }

    pub fn signal_warning_frame(quality: u8) -> Vec<u8> {
        frame(TAG_SIGNAL_WARNING, 0, &[quality])
    }

    pub fn lead_off_frame(center: bool, side: bool) -> Vec<u8> {
        frame(TAG_LEAD_OFF, 0, &[u8::from(center), u8::from(side)])
    }

    pub fn log_frame(line: &str) -> Vec<u8> {
        frame(TAG_LOG, 0, line.as_bytes())
    }

    pub fn devices(&self) -> Vec<String> {
        self.recorded.lock().unwrap().devices.clone()
    }

    pub fn commands(&self) -> Vec<(MessageId, Command)> {
        self.recorded.lock().unwrap().commands.clone()
    }

    pub fn last_command(&self) -> Option<(MessageId, Command)> {
        self.recorded.lock().unwrap().commands.last().cloned()
    }

    /// `(msg_id, pairing_mode)` per pairing request packed.
    pub fn pair_requests(&self) -> Vec<(MessageId, bool)> {
        self.recorded.lock().unwrap().pair_requests.clone()
    }

    pub fn decoded_frames(&self) -> usize {
        self.recorded.lock().unwrap().decoded
    }

    pub fn subscription(&self, handle: u64) -> Option<(bool, bool, bool)> {
        self.recorded.lock().unwrap().subscriptions.get(&handle).copied()
    }

    pub fn log_level(&self) -> Option<LogLevel> {
        self.recorded.lock().unwrap().log_level
    }

    fn padded(mut frame: Vec<u8>) -> Vec<u8> {
        frame.extend_from_slice(&[0; SCRATCH_PADDING]);
        frame
    }
}

fn msg_id_of(body: &[u8]) -> MessageId {
    MessageId::from_be_bytes([body[0], body[1], body[2], body[3]])
}

fn i32_at(body: &[u8], at: usize) -> i32 {
    i32::from_be_bytes([body[at], body[at + 1], body[at + 2], body[at + 3]])
}

impl Codec for MockCodec {
    fn create_device(&self, address: &str) -> DeviceHandle {
        self.recorded.lock().unwrap().devices.push(address.to_string());
        DeviceHandle(self.next_handle.fetch_add(1, Ordering::SeqCst))
    }

    fn generate_message_id(&self) -> MessageId {
        self.next_msg_id.fetch_add(1, Ordering::SeqCst)
    }

    fn encode_command(&self, command: &Command, msg_id: MessageId) -> CrimsonResult<Vec<u8>> {
        self.recorded
            .lock()
            .unwrap()
            .commands
            .push((msg_id, command.clone()));
        let mut body = msg_id.to_be_bytes().to_vec();
        match command {
            Command::System(_) => {}
            Command::SetDeviceName(name) => body.extend_from_slice(name.as_bytes()),
            Command::SetLedColor(rgb) => body.extend_from_slice(rgb),
            Command::SetSleepIdleTime(v) | Command::SetVibrationIntensity(v) => {
                body.extend_from_slice(&v.to_be_bytes());
            }
            Command::ConfigImu(rate) => body.push(rate.value()),
            Command::ConfigAfe(_) => body.push(0xaf),
        }
        let cmd = command.code().code().to_be_bytes()[0];
        Ok(Self::padded(frame(TAG_COMMAND, cmd, &body)))
    }

    fn pack_pair_request(&self, _address: &str, msg_id: MessageId) -> CrimsonResult<Vec<u8>> {
        self.recorded
            .lock()
            .unwrap()
            .pair_requests
            .push((msg_id, true));
        Ok(Self::padded(frame(TAG_PAIR, 1, &msg_id.to_be_bytes())))
    }

    fn pack_validate_pairing(&self, _address: &str, msg_id: MessageId) -> CrimsonResult<Vec<u8>> {
        self.recorded
            .lock()
            .unwrap()
            .pair_requests
            .push((msg_id, false));
        Ok(Self::padded(frame(TAG_PAIR, 2, &msg_id.to_be_bytes())))
    }

    fn decode(&self, _handle: DeviceHandle, frame: &[u8]) -> Vec<CodecEvent> {
        self.recorded.lock().unwrap().decoded += 1;
        let body = &frame[6..frame.len() - TRAILER.len()];
        let event = match frame[2] {
            TAG_CONFIG_RESPONSE => CodecEvent::ConfigResponse {
                msg_id: msg_id_of(body),
                success: body[4] == 1,
                error_code: i32_at(body, 5),
            },
            TAG_SYSTEM_INFO => {
                let error_code = i32_at(body, 4);
                CodecEvent::SystemInfoResponse {
                    msg_id: msg_id_of(body),
                    info: (error_code == 0).then(|| SystemInfo {
                        firmware_info: "3.4.5".into(),
                        device_id: "CM-0042".into(),
                        hardware_info: "rev B".into(),
                    }),
                    error_code,
                }
            }
            TAG_ATTENTION => CodecEvent::Attention(f32::from(body[0]) / 100.0),
            TAG_SIGNAL_WARNING => CodecEvent::SignalQualityWarning {
                quality: i32::from(body[0]),
            },
            TAG_LEAD_OFF => CodecEvent::LeadOff(LeadOffStatus {
                center: body[0] == 1,
                side: body[1] == 1,
            }),
            TAG_LOG => CodecEvent::Log(String::from_utf8_lossy(body).into_owned()),
            _ => return Vec::new(),
        };
        vec![event]
    }

    fn contact_state(&self, _handle: DeviceHandle) -> ContactState {
        ContactState::Contact
    }

    fn set_data_subscription(
        &self,
        handle: DeviceHandle,
        attention: bool,
        meditation: bool,
        social_engagement: bool,
    ) {
        self.recorded
            .lock()
            .unwrap()
            .subscriptions
            .insert(handle.0, (attention, meditation, social_engagement));
    }

    fn set_log_level(&self, level: LogLevel) {
        self.recorded.lock().unwrap().log_level = Some(level);
    }
}
