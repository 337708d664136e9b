//! # Error Types
//!
//! Semantic error types for the Crimson BLE driver. Every variant carries
//! enough context to diagnose the problem without digging through logs.
//!
//! ## Error Categories
//!
//! | Category | Variants | Fatal? |
//! |----------|----------|--------|
//! | State violation | `InvalidState`, `NotPaired` | No — the call is a no-op |
//! | Transport | `Transport`, `DeviceNotFound`, `CharacteristicUnavailable`, `ConnectionLost`, ... | Per operation |
//! | Negotiation | `NegotiationFailed` | For the connection attempt |
//! | Malformed frame | `FrameIncomplete` | No — the frame is dropped |
//! | Argument validation | `InvalidArgument` | No — nothing is written |
//!
//! ## Device Error Codes
//!
//! Responses from the headband carry a numeric error code.
//! [`CrimsonError::from_device_error`] maps known codes to semantic variants.

use thiserror::Error;

use crate::protocol::constants::{CharacteristicRole, ErrorCodes};
use crate::protocol::types::Connectivity;

/// Convenient Result alias for driver operations.
pub type CrimsonResult<T> = std::result::Result<T, CrimsonError>;

/// All errors that can occur while driving a Crimson headband.
#[derive(Error, Debug)]
pub enum CrimsonError {
    // ─── State ──────────────────────────────────────────────────────
    /// The operation is not valid in the session's current connectivity state.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: Connectivity,
    },

    /// The operation requires a paired device.
    #[error("Cannot {operation}: device is not paired")]
    NotPaired { operation: &'static str },

    // ─── Adapter ────────────────────────────────────────────────────
    /// Bluetooth is powered off or otherwise unavailable.
    #[error("Bluetooth adapter is unavailable. Check that the radio is powered on.")]
    AdapterUnavailable,

    /// The USB dongle used as a BLE adapter is unavailable.
    #[error("BLE dongle is unavailable")]
    DongleUnavailable,

    /// Starting or stopping discovery failed.
    #[error("Scan error: {reason}")]
    ScanError { reason: String },

    // ─── Transport ──────────────────────────────────────────────────
    /// No peripheral with this address is registered with the adapter.
    #[error("Device {address} is not registered with the adapter")]
    DeviceNotFound { address: String },

    /// A required characteristic has not been discovered (or was cleared).
    #[error("The {role} characteristic is unavailable")]
    CharacteristicUnavailable { role: CharacteristicRole },

    /// The link dropped while an operation was in progress.
    #[error("Connection to {address} lost: {reason}")]
    ConnectionLost { address: String, reason: String },

    /// Low-level transport failure (connect, discover, read, write, notify).
    #[error("Transport error: {reason}")]
    Transport { reason: String },

    // ─── Negotiation ────────────────────────────────────────────────
    /// GATT negotiation finished without the write/notify channel pair.
    #[error("GATT negotiation with {address} failed: {reason}")]
    NegotiationFailed { address: String, reason: String },

    // ─── Framing ────────────────────────────────────────────────────
    /// A buffer is shorter than the frame length declared in its header.
    #[error("Incomplete frame: expected {expected} bytes, got {actual}")]
    FrameIncomplete { expected: usize, actual: usize },

    // ─── Commands ───────────────────────────────────────────────────
    /// A command argument is out of range.
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// The device rejected the pair request.
    #[error("Pairing failed")]
    PairFailed,

    /// The device rejected the stored pairing information.
    #[error("Stored pairing information is invalid; put the device in pairing mode")]
    PairingValidationFailed,

    /// Device-reported error code without a more specific variant.
    #[error("Device error {code}")]
    DeviceError { code: i32 },

    /// The pending response was dropped without ever being resolved
    /// (typically because the device disconnected first).
    #[error("Response to message {msg_id} was abandoned")]
    ResponseAbandoned { msg_id: u32 },

    // ─── Codec ──────────────────────────────────────────────────────
    /// The protocol codec could not pack or decode a frame.
    #[error("Codec error: {reason}")]
    Codec { reason: String },

    // ─── Config ─────────────────────────────────────────────────────
    /// Configuration file error (missing, malformed, or invalid values).
    #[error("Configuration error: {reason}")]
    ConfigError { reason: String },

    // ─── I/O ────────────────────────────────────────────────────────
    /// Filesystem or I/O error (config file reading, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CrimsonError {
    /// Map a device or driver error code to the most specific error variant.
    ///
    /// Returns `None` for [`ErrorCodes::NONE`].
    ///
    /// - `3`: pair request rejected
    /// - `4`: stored pairing information invalid
    /// - `-1001`: Bluetooth powered off
    /// - `-1002`: dongle unavailable
    /// - `-1003`: scan error
    #[must_use]
    pub fn from_device_error(code: i32) -> Option<Self> {
        let err = match code {
            ErrorCodes::NONE => return None,
            ErrorCodes::PAIR_FAILED => CrimsonError::PairFailed,
            ErrorCodes::VALIDATE_INFO_FAILED => CrimsonError::PairingValidationFailed,
            ErrorCodes::BLE_POWER_OFF => CrimsonError::AdapterUnavailable,
            ErrorCodes::DONGLE_UNAVAILABLE => CrimsonError::DongleUnavailable,
            ErrorCodes::SCAN_ERROR => CrimsonError::ScanError {
                reason: "device reported scan error".into(),
            },
            _ => CrimsonError::DeviceError { code },
        };
        Some(err)
    }

    /// Copy of this error for a second consumer (the listener and the
    /// caller both receive failures). I/O errors keep their kind and message.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Self::InvalidState { operation, state } => Self::InvalidState {
                operation: *operation,
                state: *state,
            },
            Self::NotPaired { operation } => Self::NotPaired {
                operation: *operation,
            },
            Self::AdapterUnavailable => Self::AdapterUnavailable,
            Self::DongleUnavailable => Self::DongleUnavailable,
            Self::ScanError { reason } => Self::ScanError {
                reason: reason.clone(),
            },
            Self::DeviceNotFound { address } => Self::DeviceNotFound {
                address: address.clone(),
            },
            Self::CharacteristicUnavailable { role } => {
                Self::CharacteristicUnavailable { role: *role }
            }
            Self::ConnectionLost { address, reason } => Self::ConnectionLost {
                address: address.clone(),
                reason: reason.clone(),
            },
            Self::Transport { reason } => Self::Transport {
                reason: reason.clone(),
            },
            Self::NegotiationFailed { address, reason } => Self::NegotiationFailed {
                address: address.clone(),
                reason: reason.clone(),
            },
            Self::FrameIncomplete { expected, actual } => Self::FrameIncomplete {
                expected: *expected,
                actual: *actual,
            },
            Self::InvalidArgument { reason } => Self::InvalidArgument {
                reason: reason.clone(),
            },
            Self::PairFailed => Self::PairFailed,
            Self::PairingValidationFailed => Self::PairingValidationFailed,
            Self::DeviceError { code } => Self::DeviceError { code: *code },
            Self::ResponseAbandoned { msg_id } => Self::ResponseAbandoned { msg_id: *msg_id },
            Self::Codec { reason } => Self::Codec {
                reason: reason.clone(),
            },
            Self::ConfigError { reason } => Self::ConfigError {
                reason: reason.clone(),
            },
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }

    /// Returns `true` if the operation was refused because of the session's
    /// connectivity or pairing state. Such calls never touch the transport.
    pub fn is_state_violation(&self) -> bool {
        matches!(
            self,
            CrimsonError::InvalidState { .. } | CrimsonError::NotPaired { .. }
        )
    }

    /// Returns `true` if this error indicates the link is gone and the
    /// session should be reconnected.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            CrimsonError::ConnectionLost { .. }
                | CrimsonError::DeviceNotFound { .. }
                | CrimsonError::AdapterUnavailable
                | CrimsonError::DongleUnavailable
        )
    }
}

// ─── From impls for external error types ────────────────────────────────

#[cfg(feature = "config-toml")]
impl From<toml::de::Error> for CrimsonError {
    fn from(err: toml::de::Error) -> Self {
        CrimsonError::ConfigError {
            reason: err.to_string(),
        }
    }
}

#[cfg(feature = "btleplug")]
impl From<btleplug::Error> for CrimsonError {
    fn from(err: btleplug::Error) -> Self {
        CrimsonError::Transport {
            reason: err.to_string(),
        }
    }
}
