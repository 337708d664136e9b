//! # Protocol Codec Capability
//!
//! The byte layout of commands and responses belongs to an external codec.
//! The driver only needs it to:
//!
//! - allocate a per-device decoding context ([`DeviceHandle`]),
//! - generate message ids for correlation,
//! - pack commands and pairing requests,
//! - decode inbound frames into [`CodecEvent`]s.
//!
//! Codec output may be longer than the packed frame; the session trims it
//! with [`extract_frame`](crate::frame::extract_frame) before writing.

use crate::config::LogLevel;
use crate::error::CrimsonResult;
use crate::protocol::constants::CommandCode;
use crate::protocol::types::{
    AfeConfig, BrainWave, ContactState, EegData, ImuData, ImuSampleRate, LeadOffStatus,
    Orientation, SystemInfo,
};

/// Codec-generated id tagging an outbound command and its response.
pub type MessageId = u32;

/// Opaque handle to a codec-side device context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u64);

/// Outbound command with its arguments. Arguments are validated by the
/// session before the codec ever sees them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Argument-less command (`StartDataStream`, `Shutdown`, ...).
    System(CommandCode),
    SetDeviceName(String),
    SetLedColor([u8; 3]),
    SetSleepIdleTime(u32),
    SetVibrationIntensity(u32),
    ConfigImu(ImuSampleRate),
    ConfigAfe(AfeConfig),
}

impl Command {
    /// Wire command code.
    #[must_use]
    pub fn code(&self) -> CommandCode {
        match self {
            Self::System(code) => *code,
            Self::SetDeviceName(_) => CommandCode::SetDeviceName,
            Self::SetLedColor(_) => CommandCode::SetLedColor,
            Self::SetSleepIdleTime(_) => CommandCode::SetSleepIdleTime,
            Self::SetVibrationIntensity(_) => CommandCode::SetVibrationIntensity,
            Self::ConfigImu(_) => CommandCode::ImuConfig,
            Self::ConfigAfe(_) => CommandCode::AfeConfig,
        }
    }
}

/// Event produced by decoding one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum CodecEvent {
    /// Acknowledgement of a configuration command.
    ConfigResponse {
        msg_id: MessageId,
        success: bool,
        error_code: i32,
    },
    /// Answer to a `GetSystemInfo` query.
    SystemInfoResponse {
        msg_id: MessageId,
        info: Option<SystemInfo>,
        error_code: i32,
    },
    LeadOff(LeadOffStatus),
    /// Signal quality dropped; the session follows up with a lead-off query.
    SignalQualityWarning { quality: i32 },
    ContactStateChanged(ContactState),
    OrientationChanged(Orientation),
    Imu(ImuData),
    Eeg(EegData),
    BrainWave(BrainWave),
    Attention(f32),
    Meditation(f32),
    SocialEngagement(f32),
    /// Diagnostic line emitted by the codec.
    Log(String),
}

/// Packing/decoding capability supplied by the protocol codec.
pub trait Codec: Send + Sync {
    /// Allocate a decoding context for the device at `address`.
    fn create_device(&self, address: &str) -> DeviceHandle;

    fn generate_message_id(&self) -> MessageId;

    /// Pack `command` tagged with `msg_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CrimsonError::Codec`](crate::CrimsonError::Codec) if the
    /// command cannot be packed.
    fn encode_command(&self, command: &Command, msg_id: MessageId) -> CrimsonResult<Vec<u8>>;

    /// Pack a pair request for a device in pairing mode.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the request cannot be packed.
    fn pack_pair_request(&self, address: &str, msg_id: MessageId) -> CrimsonResult<Vec<u8>>;

    /// Pack a request that validates stored pairing information.
    ///
    /// # Errors
    ///
    /// Returns a codec error if the request cannot be packed.
    fn pack_validate_pairing(&self, address: &str, msg_id: MessageId) -> CrimsonResult<Vec<u8>>;

    /// Decode one complete frame.
    fn decode(&self, handle: DeviceHandle, frame: &[u8]) -> Vec<CodecEvent>;

    fn contact_state(&self, handle: DeviceHandle) -> ContactState;

    /// Choose which derived metrics the codec reports for this device.
    fn set_data_subscription(
        &self,
        handle: DeviceHandle,
        attention: bool,
        meditation: bool,
        social_engagement: bool,
    );

    fn set_log_level(&self, _level: LogLevel) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_codes() {
        assert_eq!(
            Command::System(CommandCode::StartDataStream).code(),
            CommandCode::StartDataStream
        );
        assert_eq!(
            Command::SetDeviceName("ok12".into()).code().code(),
            10
        );
        assert_eq!(Command::SetLedColor([1, 2, 3]).code().code(), 9);
        assert_eq!(Command::SetSleepIdleTime(10).code().code(), 11);
        assert_eq!(Command::SetVibrationIntensity(50).code().code(), 12);
        assert_eq!(Command::ConfigImu(ImuSampleRate::Sr104).code().code(), -2);
        assert_eq!(Command::ConfigAfe(AfeConfig::default()).code().code(), -1);
    }
}
