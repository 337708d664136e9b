//! Protocol constants: GATT identifiers, command codes, device error codes
//! and advertisement signatures.

use uuid::Uuid;

/// Size of the fixed frame header. Bytes 4–5 carry the body size (big-endian).
pub const FRAME_HEADER_LEN: usize = 6;

/// Fixed wrapper overhead around a frame body (header + trailer).
pub const FRAME_WRAPPER_LEN: usize = 10;

/// First two bytes of the manufacturer data advertised by a Crimson headband.
///
/// Filtering by service UUID is unreliable on some platforms (notably
/// Windows), so discovery matches on this signature instead.
pub const MANUFACTURER_SIGNATURE: [u8; 2] = [0x42, 0x52];

/// Minimum manufacturer data length: signature, battery level, pairing flag.
pub const MANUFACTURER_DATA_MIN_LEN: usize = 4;

/// Expand a 16-bit Bluetooth SIG assigned number into a full 128-bit UUID.
#[must_use]
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5f9b_34fb)
}

/// Known GATT service and characteristic identifiers.
pub struct Uuids;

impl Uuids {
    // ─── Services ───────────────────────────────────────────────────

    /// Vendor data-stream service carrying the command/notify channels.
    pub const SERVICE_DATA_STREAM: Uuid = Uuid::from_u128(0x0d74_0001_d26f_4dbb_95e8_a4f5_c55c_57a9);

    /// Standard Device Information service.
    pub const SERVICE_DEVICE_INFORMATION: Uuid = uuid_from_u16(0x180a);

    /// Standard Battery service.
    pub const SERVICE_BATTERY_LEVEL: Uuid = uuid_from_u16(0x180f);

    // ─── Data stream ────────────────────────────────────────────────

    /// Outbound command channel.
    pub const CHARACTERISTIC_DATA_STREAM_WRITE: Uuid =
        Uuid::from_u128(0x0d74_0002_d26f_4dbb_95e8_a4f5_c55c_57a9);

    /// Inbound frame notifications.
    pub const CHARACTERISTIC_DATA_STREAM_NOTIFY: Uuid =
        Uuid::from_u128(0x0d74_0003_d26f_4dbb_95e8_a4f5_c55c_57a9);

    // ─── Battery / device information ───────────────────────────────

    pub const CHARACTERISTIC_BATTERY_LEVEL: Uuid = uuid_from_u16(0x2a19);
    pub const CHARACTERISTIC_MANUFACTURER_NAME: Uuid = uuid_from_u16(0x2a29);
    pub const CHARACTERISTIC_MODEL_NUMBER: Uuid = uuid_from_u16(0x2a24);
    pub const CHARACTERISTIC_SERIAL_NUMBER: Uuid = uuid_from_u16(0x2a25);
    pub const CHARACTERISTIC_FIRMWARE_REVISION: Uuid = uuid_from_u16(0x2a26);
    pub const CHARACTERISTIC_HARDWARE_REVISION: Uuid = uuid_from_u16(0x2a27);

    /// Services requested during negotiation, in discovery order.
    pub const REQUIRED_SERVICES: [Uuid; 3] = [
        Self::SERVICE_DATA_STREAM,
        Self::SERVICE_DEVICE_INFORMATION,
        Self::SERVICE_BATTERY_LEVEL,
    ];

    /// Characteristics requested from every discovered service.
    pub const KNOWN_CHARACTERISTICS: [Uuid; 8] = [
        Self::CHARACTERISTIC_DATA_STREAM_NOTIFY,
        Self::CHARACTERISTIC_DATA_STREAM_WRITE,
        Self::CHARACTERISTIC_BATTERY_LEVEL,
        Self::CHARACTERISTIC_MANUFACTURER_NAME,
        Self::CHARACTERISTIC_MODEL_NUMBER,
        Self::CHARACTERISTIC_SERIAL_NUMBER,
        Self::CHARACTERISTIC_FIRMWARE_REVISION,
        Self::CHARACTERISTIC_HARDWARE_REVISION,
    ];
}

/// Role a discovered characteristic plays for the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacteristicRole {
    Write,
    Notify,
    Battery,
    ManufacturerName,
    ModelNumber,
    SerialNumber,
    HardwareRevision,
    FirmwareRevision,
}

impl CharacteristicRole {
    /// Classify a characteristic by UUID. Unknown UUIDs yield `None`.
    #[must_use]
    pub fn classify(uuid: Uuid) -> Option<Self> {
        match uuid {
            Uuids::CHARACTERISTIC_DATA_STREAM_WRITE => Some(Self::Write),
            Uuids::CHARACTERISTIC_DATA_STREAM_NOTIFY => Some(Self::Notify),
            Uuids::CHARACTERISTIC_BATTERY_LEVEL => Some(Self::Battery),
            Uuids::CHARACTERISTIC_MANUFACTURER_NAME => Some(Self::ManufacturerName),
            Uuids::CHARACTERISTIC_MODEL_NUMBER => Some(Self::ModelNumber),
            Uuids::CHARACTERISTIC_SERIAL_NUMBER => Some(Self::SerialNumber),
            Uuids::CHARACTERISTIC_HARDWARE_REVISION => Some(Self::HardwareRevision),
            Uuids::CHARACTERISTIC_FIRMWARE_REVISION => Some(Self::FirmwareRevision),
            _ => None,
        }
    }

    /// `true` for the five read-once device information strings.
    #[must_use]
    pub fn is_device_info(self) -> bool {
        matches!(
            self,
            Self::ManufacturerName
                | Self::ModelNumber
                | Self::SerialNumber
                | Self::HardwareRevision
                | Self::FirmwareRevision
        )
    }
}

impl std::fmt::Display for CharacteristicRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Write => "data stream write",
            Self::Notify => "data stream notify",
            Self::Battery => "battery level",
            Self::ManufacturerName => "manufacturer name",
            Self::ModelNumber => "model number",
            Self::SerialNumber => "serial number",
            Self::HardwareRevision => "hardware revision",
            Self::FirmwareRevision => "firmware revision",
        };
        f.write_str(name)
    }
}

/// Command codes understood by the headband firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum CommandCode {
    AfeConfig = -1,
    ImuConfig = -2,
    Unused = 0,
    Pair = 1,
    CheckPairStatus = 2,
    StartDataStream = 3,
    StopDataStream = 4,
    Shutdown = 5,
    EnterOta = 6,
    EnterFactoryMode = 7,
    RestoreFactorySettings = 8,
    SetLedColor = 9,
    SetDeviceName = 10,
    SetSleepIdleTime = 11,
    SetVibrationIntensity = 12,
    GetSystemInfo = 13,
    GetLeadOffStatus = 14,
}

impl CommandCode {
    /// Wire value of this command.
    #[must_use]
    pub fn code(self) -> i8 {
        self as i8
    }
}

impl TryFrom<i8> for CommandCode {
    type Error = i8;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        let code = match value {
            -1 => Self::AfeConfig,
            -2 => Self::ImuConfig,
            0 => Self::Unused,
            1 => Self::Pair,
            2 => Self::CheckPairStatus,
            3 => Self::StartDataStream,
            4 => Self::StopDataStream,
            5 => Self::Shutdown,
            6 => Self::EnterOta,
            7 => Self::EnterFactoryMode,
            8 => Self::RestoreFactorySettings,
            9 => Self::SetLedColor,
            10 => Self::SetDeviceName,
            11 => Self::SetSleepIdleTime,
            12 => Self::SetVibrationIntensity,
            13 => Self::GetSystemInfo,
            14 => Self::GetLeadOffStatus,
            other => return Err(other),
        };
        Ok(code)
    }
}

/// Error codes reported by the device or the driver.
pub struct ErrorCodes;

impl ErrorCodes {
    pub const NONE: i32 = 0;
    pub const PAIR_FAILED: i32 = 3;
    pub const VALIDATE_INFO_FAILED: i32 = 4;
    pub const BLE_POWER_OFF: i32 = -1001;
    pub const DONGLE_UNAVAILABLE: i32 = -1002;
    pub const SCAN_ERROR: i32 = -1003;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_uuid_expansion() {
        assert_eq!(
            uuid_from_u16(0x180a).to_string(),
            "0000180a-0000-1000-8000-00805f9b34fb"
        );
        assert_eq!(
            Uuids::CHARACTERISTIC_BATTERY_LEVEL.to_string(),
            "00002a19-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_vendor_uuids() {
        assert_eq!(
            Uuids::SERVICE_DATA_STREAM.to_string(),
            "0d740001-d26f-4dbb-95e8-a4f5c55c57a9"
        );
        assert_eq!(
            Uuids::CHARACTERISTIC_DATA_STREAM_NOTIFY.to_string(),
            "0d740003-d26f-4dbb-95e8-a4f5c55c57a9"
        );
    }

    #[test]
    fn test_classify_known_characteristics() {
        let roles: Vec<_> = Uuids::KNOWN_CHARACTERISTICS
            .iter()
            .filter_map(|u| CharacteristicRole::classify(*u))
            .collect();
        assert_eq!(roles.len(), 8);
        assert_eq!(
            roles.iter().filter(|r| r.is_device_info()).count(),
            5,
            "five device information strings"
        );
        assert_eq!(CharacteristicRole::classify(uuid_from_u16(0x2a00)), None);
    }

    #[test]
    fn test_command_codes() {
        assert_eq!(CommandCode::AfeConfig.code(), -1);
        assert_eq!(CommandCode::ImuConfig.code(), -2);
        assert_eq!(CommandCode::Pair.code(), 1);
        assert_eq!(CommandCode::GetLeadOffStatus.code(), 14);
        assert_eq!(CommandCode::try_from(13), Ok(CommandCode::GetSystemInfo));
        assert_eq!(CommandCode::try_from(15), Err(15));
    }
}
