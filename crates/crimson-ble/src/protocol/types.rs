//! Device state enumerations and decoded payload types.

use serde::{Deserialize, Serialize};

/// Connectivity of a device session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Connecting,
    Connected,
    Disconnecting,
    #[default]
    Disconnected,
}

impl std::fmt::Display for Connectivity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnecting => "disconnecting",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Electrode contact state reported by the codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactState {
    #[default]
    Unknown,
    Contact,
    NoContact,
}

/// Headband orientation reported by the codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    #[default]
    Unknown,
    Normal,
    UpsideDown,
}

/// IMU output data rate. `Unused` switches the IMU off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ImuSampleRate {
    Unused = 0x00,
    Sr12_5 = 0x10,
    Sr26 = 0x20,
    Sr52 = 0x30,
    Sr104 = 0x40,
    Sr208 = 0x50,
    Sr416 = 0x60,
    Sr833 = 0x70,
}

impl ImuSampleRate {
    /// Wire value of this rate.
    #[must_use]
    pub fn value(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ImuSampleRate {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::Unused),
            0x10 => Ok(Self::Sr12_5),
            0x20 => Ok(Self::Sr26),
            0x30 => Ok(Self::Sr52),
            0x40 => Ok(Self::Sr104),
            0x50 => Ok(Self::Sr208),
            0x60 => Ok(Self::Sr416),
            0x70 => Ok(Self::Sr833),
            other => Err(other),
        }
    }
}

/// Analog front-end sample rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AfeSampleRate {
    Sr125 = 0,
    Sr250 = 1,
    Sr500 = 2,
    Sr1000 = 3,
}

/// Analog front-end channel selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AfeChannel {
    None = 0,
    Ch1 = 1,
    Ch2 = 2,
    Both = 3,
}

/// Lead-off detection current.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LeadOffOption {
    Disabled = 0,
    Ac = 1,
    Dc6nA = 2,
    Dc22nA = 3,
    Dc6uA = 4,
    Dc22uA = 5,
}

/// Analog front-end configuration sent with [`CommandCode::AfeConfig`].
///
/// [`CommandCode::AfeConfig`]: crate::protocol::constants::CommandCode::AfeConfig
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AfeConfig {
    pub sample_rate: AfeSampleRate,
    pub data_channel: AfeChannel,
    pub rld_channel: AfeChannel,
    pub lead_off_channel: AfeChannel,
    pub lead_off_option: LeadOffOption,
}

impl Default for AfeConfig {
    fn default() -> Self {
        Self {
            sample_rate: AfeSampleRate::Sr250,
            data_channel: AfeChannel::Ch1,
            rld_channel: AfeChannel::Both,
            lead_off_channel: AfeChannel::Ch2,
            lead_off_option: LeadOffOption::Dc6nA,
        }
    }
}

/// Device information strings read once during negotiation.
///
/// A field whose read failed is left empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub manufacturer_name: String,
    pub model_number: String,
    pub serial_number: String,
    pub hardware_revision: String,
    pub firmware_revision: String,
}

/// System information returned by a `GetSystemInfo` query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub firmware_info: String,
    pub device_id: String,
    pub hardware_info: String,
}

/// Accelerometer/gyroscope batch decoded from one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImuData {
    pub sample_rate: f32,
    /// Accelerometer samples, one `[x, y, z]` per sample.
    pub acc: Vec<[f32; 3]>,
    /// Gyroscope samples, one `[x, y, z]` per sample.
    pub gyro: Vec<[f32; 3]>,
}

/// Raw EEG batch decoded from one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EegData {
    pub sequence: u32,
    pub sample_rate: f32,
    pub samples: Vec<f32>,
}

/// Band power statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BrainWave {
    pub delta: f32,
    pub theta: f32,
    pub low_alpha: f32,
    pub high_alpha: f32,
    pub low_beta: f32,
    pub high_beta: f32,
    pub low_gamma: f32,
    pub middle_gamma: f32,
}

/// Lead-off flags for the two electrode sites.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadOffStatus {
    pub center: bool,
    pub side: bool,
}
