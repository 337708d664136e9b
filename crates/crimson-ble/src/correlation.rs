//! # Command/Response Correlation
//!
//! Outbound commands are tagged with a codec-generated message id. The
//! device answers asynchronously; [`CorrelationTable`] maps each id to the
//! completion waiting for it.
//!
//! Entries are registered before the write so that a fast response can never
//! arrive ahead of its registration. Each entry fires at most once. Entries
//! for a device that disconnects are dropped without firing; no timeout is
//! enforced.

use std::collections::HashMap;

use crate::codec::MessageId;
use crate::error::{CrimsonError, CrimsonResult};
use crate::protocol::types::SystemInfo;

/// Acknowledgement of a configuration command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub msg_id: MessageId,
    pub success: bool,
    pub error_code: i32,
}

impl CommandResponse {
    /// Convert the acknowledgement into a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the error mapped from `error_code` when the device reports
    /// failure.
    pub fn into_result(self) -> CrimsonResult<()> {
        if self.success {
            return Ok(());
        }
        Err(CrimsonError::from_device_error(self.error_code)
            .unwrap_or(CrimsonError::DeviceError { code: self.error_code }))
    }
}

/// Answer to a `GetSystemInfo` query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemInfoResponse {
    pub msg_id: MessageId,
    pub info: Option<SystemInfo>,
    pub error_code: i32,
}

impl SystemInfoResponse {
    /// Convert the answer into a `Result`.
    ///
    /// # Errors
    ///
    /// Returns the mapped device error for a non-zero `error_code`, or
    /// [`CrimsonError::Codec`] when the payload is missing.
    pub fn into_result(self) -> CrimsonResult<SystemInfo> {
        if let Some(err) = CrimsonError::from_device_error(self.error_code) {
            return Err(err);
        }
        self.info.ok_or_else(|| CrimsonError::Codec {
            reason: format!("system info response {} carried no payload", self.msg_id),
        })
    }
}

/// A decoded response that may resolve a pending entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Command(CommandResponse),
    SystemInfo(SystemInfoResponse),
}

impl Response {
    #[must_use]
    pub fn msg_id(&self) -> MessageId {
        match self {
            Self::Command(r) => r.msg_id,
            Self::SystemInfo(r) => r.msg_id,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ResponseKind {
        match self {
            Self::Command(_) => ResponseKind::Command,
            Self::SystemInfo(_) => ResponseKind::SystemInfo,
        }
    }

    /// Error code carried by the response, or
    /// [`ErrorCodes::NONE`](crate::protocol::constants::ErrorCodes::NONE).
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            Self::Command(r) => r.error_code,
            Self::SystemInfo(r) => r.error_code,
        }
    }
}

/// Kind tag of a completion or response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Command,
    SystemInfo,
}

pub type CommandCompletion = Box<dyn FnOnce(CommandResponse) + Send>;
pub type SystemInfoCompletion = Box<dyn FnOnce(SystemInfoResponse) + Send>;

/// Callback waiting for a response of a specific kind.
pub enum Completion {
    Command(CommandCompletion),
    SystemInfo(SystemInfoCompletion),
}

impl Completion {
    /// Wrap a command-ack callback.
    pub fn command(f: impl FnOnce(CommandResponse) + Send + 'static) -> Self {
        Self::Command(Box::new(f))
    }

    /// Wrap a system-info callback.
    pub fn system_info(f: impl FnOnce(SystemInfoResponse) + Send + 'static) -> Self {
        Self::SystemInfo(Box::new(f))
    }

    #[must_use]
    pub fn kind(&self) -> ResponseKind {
        match self {
            Self::Command(_) => ResponseKind::Command,
            Self::SystemInfo(_) => ResponseKind::SystemInfo,
        }
    }

    /// Invoke the callback. Returns `false` (without invoking anything) when
    /// the response is of the wrong kind.
    pub fn fire(self, response: Response) -> bool {
        match (self, response) {
            (Self::Command(f), Response::Command(r)) => {
                f(r);
                true
            }
            (Self::SystemInfo(f), Response::SystemInfo(r)) => {
                f(r);
                true
            }
            _ => false,
        }
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Completion").field(&self.kind()).finish()
    }
}

#[derive(Debug)]
struct Entry {
    address: String,
    completion: Completion,
}

/// Pending completions keyed by message id.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    entries: HashMap<MessageId, Entry>,
}

impl CorrelationTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a completion for `msg_id` on behalf of the device at `address`.
    ///
    /// A stale entry under the same id is dropped unfired.
    pub fn register(&mut self, msg_id: MessageId, address: impl Into<String>, completion: Completion) {
        let address = address.into();
        tracing::debug!(msg_id, address = %address, kind = ?completion.kind(), "Registering completion");
        if let Some(stale) = self.entries.insert(
            msg_id,
            Entry {
                address,
                completion,
            },
        ) {
            tracing::warn!(msg_id, address = %stale.address, "Replaced a pending completion with the same id");
        }
    }

    /// Remove and return the completion matching `response`.
    ///
    /// Unknown ids are logged and ignored. A response whose kind differs from
    /// the registered completion leaves the entry in place.
    pub fn claim(&mut self, response: &Response) -> Option<Completion> {
        let msg_id = response.msg_id();
        let Some(entry) = self.entries.get(&msg_id) else {
            tracing::warn!(msg_id, "Response for unknown message id");
            return None;
        };
        if entry.completion.kind() != response.kind() {
            tracing::warn!(
                msg_id,
                expected = ?entry.completion.kind(),
                received = ?response.kind(),
                "Response kind does not match pending completion",
            );
            return None;
        }
        self.entries.remove(&msg_id).map(|entry| entry.completion)
    }

    /// Fire the completion matching `response`. Returns `true` if one fired.
    pub fn resolve(&mut self, response: Response) -> bool {
        match self.claim(&response) {
            Some(completion) => completion.fire(response),
            None => false,
        }
    }

    /// Drop the entry for `msg_id` without firing it.
    pub fn cancel(&mut self, msg_id: MessageId) -> bool {
        self.entries.remove(&msg_id).is_some()
    }

    /// Drop every entry owned by `address` without firing. Returns how many
    /// were dropped.
    pub fn abandon_device(&mut self, address: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.address != address);
        let dropped = before - self.entries.len();
        if dropped > 0 {
            tracing::debug!(address, dropped, "Abandoned pending completions");
        }
        dropped
    }

    #[must_use]
    pub fn contains(&self, msg_id: MessageId) -> bool {
        self.entries.contains_key(&msg_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
