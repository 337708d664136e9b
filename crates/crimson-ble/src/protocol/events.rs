//! Events delivered to session listeners and driver subscribers.

use crate::error::CrimsonError;
use crate::protocol::constants::ErrorCodes;
use crate::protocol::types::{
    BrainWave, ContactState, Connectivity, DeviceInfo, EegData, ImuData, LeadOffStatus,
    Orientation,
};

/// Event delivered to the listener of a single [`DeviceSession`].
///
/// Listeners receive these through the `mpsc` channel returned by
/// [`DeviceSession::subscribe`], or as a [`DeviceEventStream`].
///
/// [`DeviceSession`]: crate::session::DeviceSession
/// [`DeviceSession::subscribe`]: crate::session::DeviceSession::subscribe
/// [`DeviceEventStream`]: crate::streams::DeviceEventStream
#[derive(Debug)]
pub enum DeviceEvent {
    /// An operation on this device failed.
    Error(CrimsonError),
    ConnectivityChanged(Connectivity),
    /// Device information strings read during negotiation. Always delivered
    /// before the `ConnectivityChanged(Connected)` event of the same connect.
    DeviceInfoReady(DeviceInfo),
    ContactStateChanged(ContactState),
    OrientationChanged(Orientation),
    Imu(ImuData),
    Eeg(EegData),
    BrainWave(BrainWave),
    Attention(f32),
    Meditation(f32),
    SocialEngagement(f32),
    LeadOff(LeadOffStatus),
    /// Battery percentage from the seed read or a battery notification.
    BatteryLevel(u8),
}

impl DeviceEvent {
    /// Short name of the event kind, used in log fields.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Error(_) => "error",
            Self::ConnectivityChanged(_) => "connectivity_changed",
            Self::DeviceInfoReady(_) => "device_info_ready",
            Self::ContactStateChanged(_) => "contact_state_changed",
            Self::OrientationChanged(_) => "orientation_changed",
            Self::Imu(_) => "imu",
            Self::Eeg(_) => "eeg",
            Self::BrainWave(_) => "brain_wave",
            Self::Attention(_) => "attention",
            Self::Meditation(_) => "meditation",
            Self::SocialEngagement(_) => "social_engagement",
            Self::LeadOff(_) => "lead_off",
            Self::BatteryLevel(_) => "battery_level",
        }
    }
}

/// Adapter-level event broadcast to every driver subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// The Bluetooth radio became available.
    AdapterAvailable,
    /// Adapter-level failure carrying an [`ErrorCodes`] value.
    Error { code: i32 },
    /// A peripheral dropped its link without being asked to.
    PeripheralDisconnected { address: String },
}

impl DriverEvent {
    /// Event broadcast when the radio is switched off.
    #[must_use]
    pub fn power_off() -> Self {
        Self::Error {
            code: ErrorCodes::BLE_POWER_OFF,
        }
    }

    /// Event broadcast when the transport refuses to start a scan.
    #[must_use]
    pub fn scan_error() -> Self {
        Self::Error {
            code: ErrorCodes::SCAN_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_power_off_event_code() {
        assert_eq!(DriverEvent::power_off(), DriverEvent::Error { code: -1001 });
        assert_eq!(DriverEvent::scan_error(), DriverEvent::Error { code: -1003 });
    }

    #[test]
    fn test_device_event_kind() {
        assert_eq!(DeviceEvent::BatteryLevel(80).kind(), "battery_level");
        assert_eq!(
            DeviceEvent::ConnectivityChanged(Connectivity::Connected).kind(),
            "connectivity_changed"
        );
    }
}
