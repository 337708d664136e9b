//! # Device Session
//!
//! [`DeviceSession`] is the per-headband state machine:
//!
//! ```text
//! Disconnected ──connect()──► Connecting ──negotiated──► Connected
//!      ▲                                                     │
//!      └──────────── Disconnecting ◄──disconnect()───────────┘
//!
//! transport disconnect: any state ──► Disconnected
//! ```
//!
//! The paired flag is cleared on every connectivity change. Commands other
//! than [`pair`](DeviceSession::pair) require a connected, paired session;
//! otherwise they log a warning and return an error without writing.
//!
//! Commands return a [`PendingResponse`] that resolves when the device
//! answers. A response that never comes (because the device disconnected)
//! resolves to [`CrimsonError::ResponseAbandoned`].

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};

use crate::adapter::Peripheral;
use crate::codec::{CodecEvent, Command, DeviceHandle, MessageId};
use crate::correlation::{CommandResponse, Completion, Response, SystemInfoResponse};
use crate::driver::DriverShared;
use crate::error::{CrimsonError, CrimsonResult};
use crate::frame::extract_frame;
use crate::protocol::constants::CommandCode;
use crate::protocol::events::DeviceEvent;
use crate::protocol::types::{
    AfeConfig, ContactState, Connectivity, DeviceInfo, ImuSampleRate, SystemInfo,
};
use crate::streams::DeviceEventStream;
use crate::transport::WriteMode;

const DEVICE_NAME_MIN_LEN: usize = 4;
const DEVICE_NAME_MAX_LEN: usize = 18;
const SLEEP_IDLE_TIME_MAX_SECS: u32 = 1000;
const VIBRATION_INTENSITY_MAX: u32 = 100;

// ─── PendingResponse ────────────────────────────────────────────────────

/// Device answer to a command, resolved by the correlation table.
#[must_use = "dropping a PendingResponse discards the device's answer"]
#[derive(Debug)]
pub struct PendingResponse<T> {
    msg_id: MessageId,
    rx: oneshot::Receiver<CrimsonResult<T>>,
}

impl<T> PendingResponse<T> {
    fn new(msg_id: MessageId, rx: oneshot::Receiver<CrimsonResult<T>>) -> Self {
        Self { msg_id, rx }
    }

    fn resolved(msg_id: MessageId, value: CrimsonResult<T>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(value);
        Self { msg_id, rx }
    }

    /// Message id the command was tagged with.
    pub fn msg_id(&self) -> MessageId {
        self.msg_id
    }
}

impl<T> Future for PendingResponse<T> {
    type Output = CrimsonResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let msg_id = self.msg_id;
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| {
                received.unwrap_or_else(|_| Err(CrimsonError::ResponseAbandoned { msg_id }))
            })
    }
}

// ─── Argument validation ────────────────────────────────────────────────

/// Device names are 4 to 18 characters.
///
/// # Errors
///
/// Returns [`CrimsonError::InvalidArgument`] for names outside that range.
pub fn validate_device_name(name: &str) -> CrimsonResult<()> {
    let len = name.chars().count();
    if (DEVICE_NAME_MIN_LEN..=DEVICE_NAME_MAX_LEN).contains(&len) {
        return Ok(());
    }
    Err(CrimsonError::InvalidArgument {
        reason: format!(
            "device name must be {DEVICE_NAME_MIN_LEN} to {DEVICE_NAME_MAX_LEN} characters, got {len}"
        ),
    })
}

/// Exactly three components, each in `0..=255`.
///
/// # Errors
///
/// Returns [`CrimsonError::InvalidArgument`] for any other input.
pub fn validate_led_color(rgb: &[u32]) -> CrimsonResult<[u8; 3]> {
    let invalid = || CrimsonError::InvalidArgument {
        reason: format!("LED color must be three components in 0..=255, got {rgb:?}"),
    };
    let [r, g, b] = rgb else {
        return Err(invalid());
    };
    Ok([
        u8::try_from(*r).map_err(|_| invalid())?,
        u8::try_from(*g).map_err(|_| invalid())?,
        u8::try_from(*b).map_err(|_| invalid())?,
    ])
}

/// Idle time before sleep, `0..=1000` seconds.
///
/// # Errors
///
/// Returns [`CrimsonError::InvalidArgument`] above 1000.
pub fn validate_sleep_idle_time(secs: u32) -> CrimsonResult<()> {
    if secs <= SLEEP_IDLE_TIME_MAX_SECS {
        return Ok(());
    }
    Err(CrimsonError::InvalidArgument {
        reason: format!("idle time must be within 0..={SLEEP_IDLE_TIME_MAX_SECS} seconds, got {secs}"),
    })
}

/// Vibration intensity, `0..=100`.
///
/// # Errors
///
/// Returns [`CrimsonError::InvalidArgument`] above 100.
pub fn validate_vibration_intensity(intensity: u32) -> CrimsonResult<()> {
    if intensity <= VIBRATION_INTENSITY_MAX {
        return Ok(());
    }
    Err(CrimsonError::InvalidArgument {
        reason: format!("vibration intensity must be within 0..={VIBRATION_INTENSITY_MAX}, got {intensity}"),
    })
}

/// `ImuSampleRate::Unused` is reserved for [`DeviceSession::stop_imu`].
///
/// # Errors
///
/// Returns [`CrimsonError::InvalidArgument`] for `Unused`.
pub fn validate_imu_sample_rate(rate: ImuSampleRate) -> CrimsonResult<()> {
    if rate == ImuSampleRate::Unused {
        return Err(CrimsonError::InvalidArgument {
            reason: "IMU sample rate must be one of 12.5 Hz to 833 Hz".into(),
        });
    }
    Ok(())
}

// ─── Session registry ───────────────────────────────────────────────────

/// Live sessions keyed by address. At most one per address.
///
/// Entries are strong: a connected session stays routable after the caller
/// drops its handle, until `disconnect()` or a link drop removes it.
#[derive(Default)]
pub(crate) struct SessionRegistry {
    sessions: Mutex<HashMap<String, Arc<SessionInner>>>,
}

impl SessionRegistry {
    /// Register `inner` for its address.
    ///
    /// Fails with the holder's connectivity when a different session
    /// already owns the address.
    fn claim(&self, inner: &Arc<SessionInner>) -> Result<(), Connectivity> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(holder) = sessions.get(&inner.address) {
            if !Arc::ptr_eq(holder, inner) {
                return Err(holder.state().connectivity);
            }
        }
        sessions.insert(inner.address.clone(), Arc::clone(inner));
        Ok(())
    }

    /// Remove the entry for `inner`'s address if it still points at `inner`.
    fn remove(&self, inner: &Arc<SessionInner>) -> bool {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let owned = sessions
            .get(&inner.address)
            .is_some_and(|holder| Arc::ptr_eq(holder, inner));
        if owned {
            sessions.remove(&inner.address);
        }
        owned
    }

    pub(crate) fn get(&self, address: &str) -> Option<DeviceSession> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(address)
            .map(|inner| DeviceSession {
                inner: Arc::clone(inner),
            })
    }

    pub(crate) fn all(&self) -> Vec<DeviceSession> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|inner| DeviceSession {
                inner: Arc::clone(inner),
            })
            .collect()
    }
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_set().entries(sessions.keys()).finish()
    }
}

// ─── DeviceSession ──────────────────────────────────────────────────────

#[derive(Debug)]
struct SessionState {
    name: String,
    pairing_mode: bool,
    connectivity: Connectivity,
    paired: bool,
    battery_level: u8,
    device_info: Option<DeviceInfo>,
    led_color: Option<[u8; 3]>,
    codec_handle: Option<DeviceHandle>,
    listener: Option<mpsc::UnboundedSender<DeviceEvent>>,
}

pub(crate) struct SessionInner {
    address: String,
    shared: Arc<DriverShared>,
    state: Mutex<SessionState>,
}

impl SessionInner {
    fn state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to one headband. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct DeviceSession {
    inner: Arc<SessionInner>,
}

impl DeviceSession {
    pub(crate) fn new(shared: Arc<DriverShared>, peripheral: &Peripheral) -> Self {
        let state = SessionState {
            name: peripheral.name.clone(),
            pairing_mode: peripheral.pairing_mode,
            connectivity: Connectivity::Disconnected,
            paired: false,
            battery_level: peripheral.battery_level,
            device_info: None,
            led_color: None,
            codec_handle: None,
            listener: None,
        };
        Self {
            inner: Arc::new(SessionInner {
                address: peripheral.address.clone(),
                shared,
                state: Mutex::new(state),
            }),
        }
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn address(&self) -> &str {
        &self.inner.address
    }

    pub fn name(&self) -> String {
        self.inner.state().name.clone()
    }

    pub fn connectivity(&self) -> Connectivity {
        self.inner.state().connectivity
    }

    pub fn is_connected(&self) -> bool {
        self.connectivity() == Connectivity::Connected
    }

    pub fn is_paired(&self) -> bool {
        self.inner.state().paired
    }

    /// Whether the headband advertised itself as being in pairing mode.
    pub fn pairing_mode(&self) -> bool {
        self.inner.state().pairing_mode
    }

    /// Battery percentage from the advertisement, the seed read, or the
    /// latest notification.
    pub fn battery_level(&self) -> u8 {
        self.inner.state().battery_level
    }

    pub fn device_info(&self) -> Option<DeviceInfo> {
        self.inner.state().device_info.clone()
    }

    /// Electrode contact state tracked by the codec. `Unknown` before the
    /// first connect.
    pub fn contact_state(&self) -> ContactState {
        let handle = self.inner.state().codec_handle;
        handle.map_or(ContactState::Unknown, |h| self.inner.shared.codec.contact_state(h))
    }

    fn peripheral(&self) -> Peripheral {
        let state = self.inner.state();
        Peripheral {
            address: self.inner.address.clone(),
            name: state.name.clone(),
            rssi: None,
            battery_level: state.battery_level,
            pairing_mode: state.pairing_mode,
        }
    }

    // ─── Listener ───────────────────────────────────────────────────────

    /// Attach a listener, replacing any previous one.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<DeviceEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.state().listener = Some(tx);
        rx
    }

    /// Attach a listener and expose it as a `Stream`.
    pub fn events(&self) -> DeviceEventStream {
        DeviceEventStream::new(self.subscribe())
    }

    /// Detach the listener.
    pub fn unsubscribe(&self) {
        self.inner.state().listener = None;
    }

    fn emit(&self, event: DeviceEvent) {
        let listener = self.inner.state().listener.clone();
        if let Some(listener) = listener {
            if listener.send(event).is_err() {
                tracing::debug!(address = %self.inner.address, "Listener dropped");
            }
        }
    }

    fn set_connectivity(&self, connectivity: Connectivity) {
        {
            let mut state = self.inner.state();
            state.paired = false;
            if state.connectivity == connectivity {
                return;
            }
            state.connectivity = connectivity;
        }
        tracing::info!(address = %self.inner.address, %connectivity, "Connectivity changed");
        self.emit(DeviceEvent::ConnectivityChanged(connectivity));
    }

    // ─── Lifecycle ──────────────────────────────────────────────────────

    /// Connect and negotiate. Only valid from `Disconnected`.
    ///
    /// On success the session is `Connected` and unpaired. If negotiation
    /// fails the session stays `Connecting`, the error is reported to the
    /// listener and returned; call [`disconnect`](Self::disconnect) to reset.
    ///
    /// # Errors
    ///
    /// Returns [`CrimsonError::InvalidState`] when not disconnected or when
    /// another session already owns the address, or the adapter's
    /// connect/negotiation error.
    pub async fn connect(&self) -> CrimsonResult<()> {
        let state = self.connectivity();
        if state != Connectivity::Disconnected {
            tracing::warn!(address = %self.inner.address, %state, "Device is not disconnected when calling connect");
            self.emit(DeviceEvent::Error(CrimsonError::InvalidState {
                operation: "connect",
                state,
            }));
            return Err(CrimsonError::InvalidState {
                operation: "connect",
                state,
            });
        }

        if let Err(state) = self.inner.shared.sessions.claim(&self.inner) {
            tracing::warn!(address = %self.inner.address, %state, "Another session owns this address");
            let err = CrimsonError::InvalidState {
                operation: "connect",
                state,
            };
            self.emit(DeviceEvent::Error(err.duplicate()));
            return Err(err);
        }

        {
            let mut state = self.inner.state();
            if state.codec_handle.is_none() {
                state.codec_handle = Some(self.inner.shared.codec.create_device(&self.inner.address));
            }
        }
        self.inner.shared.adapter.start_listen(&self.peripheral());
        self.set_connectivity(Connectivity::Connecting);

        let negotiated = match self.inner.shared.adapter.connect(&self.inner.address).await {
            Ok(negotiated) => negotiated,
            Err(e) => {
                self.emit(DeviceEvent::Error(e.duplicate()));
                return Err(e);
            }
        };

        if self.connectivity() != Connectivity::Connecting {
            return Err(CrimsonError::ConnectionLost {
                address: self.inner.address.clone(),
                reason: "session changed state during negotiation".into(),
            });
        }

        {
            let mut state = self.inner.state();
            if let Some(level) = negotiated.battery_level {
                state.battery_level = level;
            }
            if negotiated.device_info.is_some() {
                state.device_info.clone_from(&negotiated.device_info);
            }
        }
        if let Some(level) = negotiated.battery_level {
            self.emit(DeviceEvent::BatteryLevel(level));
        }
        if let Some(info) = negotiated.device_info {
            self.emit(DeviceEvent::DeviceInfoReady(info));
        }
        self.set_connectivity(Connectivity::Connected);
        Ok(())
    }

    /// Tear down the link and leave the session registry.
    ///
    /// Pending responses resolve to [`CrimsonError::ResponseAbandoned`].
    ///
    /// # Errors
    ///
    /// Returns the transport's disconnect error; the session is
    /// `Disconnected` regardless.
    pub async fn disconnect(&self) -> CrimsonResult<()> {
        let state = self.connectivity();
        if matches!(state, Connectivity::Disconnected | Connectivity::Disconnecting) {
            tracing::warn!(address = %self.inner.address, %state, "Device is already {state}");
        }

        self.inner.shared.sessions.remove(&self.inner);
        self.inner.shared.abandon(&self.inner.address);

        let live = matches!(state, Connectivity::Connecting | Connectivity::Connected);
        if live {
            self.set_connectivity(Connectivity::Disconnecting);
        }
        let result = self.inner.shared.adapter.disconnect(&self.inner.address).await;
        self.set_connectivity(Connectivity::Disconnected);
        result
    }

    /// The transport reported the link gone.
    pub(crate) async fn on_transport_disconnected(&self) {
        tracing::info!(address = %self.inner.address, "Link dropped");
        self.inner.shared.sessions.remove(&self.inner);
        self.inner.shared.abandon(&self.inner.address);
        self.inner.shared.adapter.reset(&self.inner.address).await;
        self.set_connectivity(Connectivity::Disconnected);
    }

    // ─── Gating ─────────────────────────────────────────────────────────

    fn require_connected(&self, operation: &'static str) -> CrimsonResult<()> {
        let state = self.connectivity();
        if state == Connectivity::Connected {
            return Ok(());
        }
        tracing::warn!(address = %self.inner.address, operation, "Device is not connected");
        Err(CrimsonError::InvalidState { operation, state })
    }

    fn require_paired(&self, operation: &'static str) -> CrimsonResult<()> {
        self.require_connected(operation)?;
        if self.is_paired() {
            return Ok(());
        }
        tracing::warn!(address = %self.inner.address, operation, "Device is not paired");
        Err(CrimsonError::NotPaired { operation })
    }

    fn reject(&self, err: CrimsonError) -> CrimsonError {
        tracing::warn!(address = %self.inner.address, error = %err, "Rejected command argument");
        self.emit(DeviceEvent::Error(err.duplicate()));
        err
    }

    // ─── Writing ────────────────────────────────────────────────────────

    fn default_write_mode(&self) -> WriteMode {
        if self.inner.shared.config.write_with_response {
            WriteMode::WithResponse
        } else {
            WriteMode::WithoutResponse
        }
    }

    /// Write codec output to the device, trimmed to one frame.
    ///
    /// # Errors
    ///
    /// Returns [`CrimsonError::InvalidState`] when not connected,
    /// [`CrimsonError::FrameIncomplete`] for a short buffer, or the
    /// adapter's write error.
    pub async fn write_raw(&self, bytes: &[u8], mode: WriteMode) -> CrimsonResult<()> {
        self.require_connected("write")?;
        let frame = extract_frame(bytes)?;
        self.inner
            .shared
            .adapter
            .write_data(&self.inner.address, frame, mode)
            .await
    }

    /// Register `completion` under `msg_id`, then write. The entry is dropped
    /// if the write fails.
    async fn send_tracked(
        &self,
        msg_id: MessageId,
        completion: Completion,
        bytes: &[u8],
    ) -> CrimsonResult<()> {
        let frame = extract_frame(bytes)?;
        self.inner
            .shared
            .register(msg_id, &self.inner.address, completion);
        let written = self
            .inner
            .shared
            .adapter
            .write_data(&self.inner.address, frame, self.default_write_mode())
            .await;
        if let Err(e) = written {
            self.inner.shared.cancel(msg_id);
            return Err(e);
        }
        tracing::debug!(address = %self.inner.address, msg_id, "Command sent");
        Ok(())
    }

    async fn send_command_with(
        &self,
        command: Command,
        on_ack: impl FnOnce(&CommandResponse) + Send + 'static,
    ) -> CrimsonResult<PendingResponse<()>> {
        let codec = &self.inner.shared.codec;
        let msg_id = codec.generate_message_id();
        let bytes = codec.encode_command(&command, msg_id)?;
        let (tx, rx) = oneshot::channel();
        let completion = Completion::command(move |response| {
            on_ack(&response);
            let _ = tx.send(response.into_result());
        });
        tracing::debug!(address = %self.inner.address, msg_id, command = ?command.code(), "Sending command");
        self.send_tracked(msg_id, completion, &bytes).await?;
        Ok(PendingResponse::new(msg_id, rx))
    }

    async fn send_command(&self, command: Command) -> CrimsonResult<PendingResponse<()>> {
        self.send_command_with(command, |_| {}).await
    }

    async fn system_command(
        &self,
        operation: &'static str,
        code: CommandCode,
    ) -> CrimsonResult<PendingResponse<()>> {
        self.require_paired(operation)?;
        self.send_command(Command::System(code)).await
    }

    // ─── Pairing ────────────────────────────────────────────────────────

    /// Pair with the headband, or validate stored pairing information when
    /// the headband is not in pairing mode.
    ///
    /// The session counts as paired as soon as the device answers, whatever
    /// the answer; the returned response carries the device's verdict.
    ///
    /// # Errors
    ///
    /// Returns [`CrimsonError::InvalidState`] when not connected, or a
    /// codec/transport error.
    pub async fn pair(&self) -> CrimsonResult<PendingResponse<()>> {
        self.require_connected("pair")?;

        let codec = &self.inner.shared.codec;
        let msg_id = codec.generate_message_id();
        let pairing_mode = self.pairing_mode();
        let bytes = if pairing_mode {
            codec.pack_pair_request(&self.inner.address, msg_id)?
        } else {
            codec.pack_validate_pairing(&self.inner.address, msg_id)?
        };
        tracing::info!(address = %self.inner.address, msg_id, pairing_mode, "Pairing");

        let weak = Arc::downgrade(&self.inner);
        let (tx, rx) = oneshot::channel();
        let completion = Completion::command(move |response| {
            if let Some(inner) = weak.upgrade() {
                let mut state = inner.state();
                if state.connectivity == Connectivity::Connected {
                    state.paired = true;
                }
            }
            let _ = tx.send(response.into_result());
        });
        self.send_tracked(msg_id, completion, &bytes).await?;
        Ok(PendingResponse::new(msg_id, rx))
    }

    // ─── Commands ───────────────────────────────────────────────────────

    /// # Errors
    ///
    /// Returns a state error when not connected and paired, or a
    /// codec/transport error.
    pub async fn start_data_stream(&self) -> CrimsonResult<PendingResponse<()>> {
        self.system_command("start data stream", CommandCode::StartDataStream)
            .await
    }

    /// # Errors
    ///
    /// Returns a state error when not connected and paired, or a
    /// codec/transport error.
    pub async fn stop_data_stream(&self) -> CrimsonResult<PendingResponse<()>> {
        self.system_command("stop data stream", CommandCode::StopDataStream)
            .await
    }

    /// # Errors
    ///
    /// Returns a state error when not connected and paired, or a
    /// codec/transport error.
    pub async fn shutdown(&self) -> CrimsonResult<PendingResponse<()>> {
        self.system_command("shutdown", CommandCode::Shutdown).await
    }

    /// Ask for the lead-off status; the answer arrives as a
    /// [`DeviceEvent::LeadOff`].
    ///
    /// # Errors
    ///
    /// Returns a state error when not connected and paired, or a
    /// codec/transport error.
    pub async fn get_lead_off_status(&self) -> CrimsonResult<PendingResponse<()>> {
        self.system_command("get lead-off status", CommandCode::GetLeadOffStatus)
            .await
    }

    /// # Errors
    ///
    /// Returns a state error when not connected and paired, or a
    /// codec/transport error.
    pub async fn get_system_info(&self) -> CrimsonResult<PendingResponse<SystemInfo>> {
        self.require_paired("get system info")?;
        let codec = &self.inner.shared.codec;
        let msg_id = codec.generate_message_id();
        let bytes = codec.encode_command(&Command::System(CommandCode::GetSystemInfo), msg_id)?;
        let (tx, rx) = oneshot::channel();
        let completion = Completion::system_info(move |response: SystemInfoResponse| {
            let _ = tx.send(response.into_result());
        });
        self.send_tracked(msg_id, completion, &bytes).await?;
        Ok(PendingResponse::new(msg_id, rx))
    }

    /// Rename the headband. The session name follows once the device
    /// acknowledges.
    ///
    /// # Errors
    ///
    /// Returns a state error, [`CrimsonError::InvalidArgument`] for names
    /// outside 4 to 18 characters, or a codec/transport error.
    pub async fn set_device_name(&self, name: &str) -> CrimsonResult<PendingResponse<()>> {
        self.require_paired("set device name")?;
        validate_device_name(name).map_err(|e| self.reject(e))?;

        let weak = Arc::downgrade(&self.inner);
        let new_name = name.to_string();
        self.send_command_with(Command::SetDeviceName(name.to_string()), move |ack| {
            if !ack.success {
                return;
            }
            if let Some(inner) = weak.upgrade() {
                tracing::info!(address = %inner.address, name = %new_name, "Device renamed");
                inner.state().name = new_name;
            }
        })
        .await
    }

    /// Set the LED color. Repeating the current color is answered locally.
    ///
    /// # Errors
    ///
    /// Returns a state error, [`CrimsonError::InvalidArgument`] unless given
    /// three components in `0..=255`, or a codec/transport error.
    pub async fn set_led_color(&self, rgb: &[u32]) -> CrimsonResult<PendingResponse<()>> {
        self.require_paired("set LED color")?;
        let color = validate_led_color(rgb).map_err(|e| self.reject(e))?;

        if self.inner.state().led_color == Some(color) {
            return Ok(PendingResponse::resolved(0, Ok(())));
        }
        self.inner.state().led_color = Some(color);

        let weak = Arc::downgrade(&self.inner);
        let pending = self
            .send_command_with(Command::SetLedColor(color), move |ack| {
                if ack.success {
                    return;
                }
                if let Some(inner) = weak.upgrade() {
                    inner.state().led_color = None;
                }
            })
            .await;
        if pending.is_err() {
            self.inner.state().led_color = None;
        }
        pending
    }

    /// # Errors
    ///
    /// Returns a state error, [`CrimsonError::InvalidArgument`] above 1000
    /// seconds, or a codec/transport error.
    pub async fn set_sleep_idle_time(&self, secs: u32) -> CrimsonResult<PendingResponse<()>> {
        self.require_paired("set sleep idle time")?;
        validate_sleep_idle_time(secs).map_err(|e| self.reject(e))?;
        self.send_command(Command::SetSleepIdleTime(secs)).await
    }

    /// # Errors
    ///
    /// Returns a state error, [`CrimsonError::InvalidArgument`] above 100,
    /// or a codec/transport error.
    pub async fn set_vibration_intensity(
        &self,
        intensity: u32,
    ) -> CrimsonResult<PendingResponse<()>> {
        self.require_paired("set vibration intensity")?;
        validate_vibration_intensity(intensity).map_err(|e| self.reject(e))?;
        self.send_command(Command::SetVibrationIntensity(intensity))
            .await
    }

    /// # Errors
    ///
    /// Returns a state error, [`CrimsonError::InvalidArgument`] for
    /// `ImuSampleRate::Unused`, or a codec/transport error.
    pub async fn start_imu(&self, rate: ImuSampleRate) -> CrimsonResult<PendingResponse<()>> {
        self.require_paired("start IMU")?;
        validate_imu_sample_rate(rate).map_err(|e| self.reject(e))?;
        self.send_command(Command::ConfigImu(rate)).await
    }

    /// # Errors
    ///
    /// Returns a state error when not connected and paired, or a
    /// codec/transport error.
    pub async fn stop_imu(&self) -> CrimsonResult<PendingResponse<()>> {
        self.require_paired("stop IMU")?;
        self.send_command(Command::ConfigImu(ImuSampleRate::Unused))
            .await
    }

    /// Reconfigure the analog front end.
    ///
    /// # Errors
    ///
    /// Returns a state error when not connected and paired, or a
    /// codec/transport error.
    pub async fn configure_afe(&self, config: AfeConfig) -> CrimsonResult<PendingResponse<()>> {
        self.require_paired("configure AFE")?;
        self.send_command(Command::ConfigAfe(config)).await
    }

    /// Choose which derived metrics the codec reports.
    ///
    /// # Errors
    ///
    /// Returns [`CrimsonError::InvalidState`] before the first connect.
    pub fn set_data_subscription(
        &self,
        attention: bool,
        meditation: bool,
        social_engagement: bool,
    ) -> CrimsonResult<()> {
        let (handle, state) = {
            let state = self.inner.state();
            (state.codec_handle, state.connectivity)
        };
        let Some(handle) = handle else {
            tracing::error!(address = %self.inner.address, "No codec context, connect first");
            return Err(CrimsonError::InvalidState {
                operation: "set data subscription",
                state,
            });
        };
        self.inner
            .shared
            .codec
            .set_data_subscription(handle, attention, meditation, social_engagement);
        Ok(())
    }

    // ─── Inbound ────────────────────────────────────────────────────────

    /// Bytes from the data stream notify characteristic.
    pub(crate) async fn on_raw_data(&self, value: &[u8]) {
        let frame = match extract_frame(value) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(address = %self.inner.address, error = %e, "Dropping notification");
                return;
            }
        };
        let Some(handle) = self.inner.state().codec_handle else {
            tracing::debug!(address = %self.inner.address, "No codec context, dropping frame");
            return;
        };
        let events = self.inner.shared.codec.decode(handle, frame);
        for event in events {
            self.dispatch(event).await;
        }
    }

    async fn dispatch(&self, event: CodecEvent) {
        match event {
            CodecEvent::ConfigResponse {
                msg_id,
                success,
                error_code,
            } => {
                tracing::debug!(address = %self.inner.address, msg_id, success, error_code, "Config response");
                self.inner.shared.resolve(Response::Command(CommandResponse {
                    msg_id,
                    success,
                    error_code,
                }));
            }
            CodecEvent::SystemInfoResponse {
                msg_id,
                info,
                error_code,
            } => {
                self.inner
                    .shared
                    .resolve(Response::SystemInfo(SystemInfoResponse {
                        msg_id,
                        info,
                        error_code,
                    }));
            }
            CodecEvent::SignalQualityWarning { quality } => {
                tracing::info!(address = %self.inner.address, quality, "Signal quality warning");
                if let Err(e) = self.get_lead_off_status().await {
                    tracing::debug!(address = %self.inner.address, error = %e, "Lead-off query skipped");
                }
            }
            CodecEvent::Log(line) => {
                tracing::debug!(address = %self.inner.address, "codec: {line}");
            }
            CodecEvent::LeadOff(status) => self.emit(DeviceEvent::LeadOff(status)),
            CodecEvent::ContactStateChanged(s) => self.emit(DeviceEvent::ContactStateChanged(s)),
            CodecEvent::OrientationChanged(o) => self.emit(DeviceEvent::OrientationChanged(o)),
            CodecEvent::Imu(data) => self.emit(DeviceEvent::Imu(data)),
            CodecEvent::Eeg(data) => self.emit(DeviceEvent::Eeg(data)),
            CodecEvent::BrainWave(wave) => self.emit(DeviceEvent::BrainWave(wave)),
            CodecEvent::Attention(v) => self.emit(DeviceEvent::Attention(v)),
            CodecEvent::Meditation(v) => self.emit(DeviceEvent::Meditation(v)),
            CodecEvent::SocialEngagement(v) => self.emit(DeviceEvent::SocialEngagement(v)),
        }
    }

    pub(crate) fn on_battery_level(&self, level: u8) {
        self.inner.state().battery_level = level;
        self.emit(DeviceEvent::BatteryLevel(level));
    }
}

impl std::fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state();
        f.debug_struct("DeviceSession")
            .field("address", &self.inner.address)
            .field("name", &state.name)
            .field("connectivity", &state.connectivity)
            .field("paired", &state.paired)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_name_bounds() {
        assert!(validate_device_name("abc").is_err());
        assert!(validate_device_name("ok12").is_ok());
        assert!(validate_device_name(&"x".repeat(18)).is_ok());
        assert!(validate_device_name(&"x".repeat(19)).is_err());
        assert!(validate_device_name("").is_err());
    }

    #[test]
    fn test_led_color_validation() {
        assert_eq!(validate_led_color(&[255, 0, 16]).unwrap(), [255, 0, 16]);
        assert!(validate_led_color(&[256, 0, 0]).is_err());
        assert!(validate_led_color(&[1, 2]).is_err());
        assert!(validate_led_color(&[1, 2, 3, 4]).is_err());
    }

    #[test]
    fn test_numeric_bounds() {
        assert!(validate_sleep_idle_time(0).is_ok());
        assert!(validate_sleep_idle_time(1000).is_ok());
        assert!(validate_sleep_idle_time(1001).is_err());
        assert!(validate_vibration_intensity(100).is_ok());
        assert!(validate_vibration_intensity(101).is_err());
        assert!(validate_imu_sample_rate(ImuSampleRate::Sr12_5).is_ok());
        assert!(validate_imu_sample_rate(ImuSampleRate::Unused).is_err());
    }

    #[tokio::test]
    async fn test_pending_response_abandoned_when_sender_dropped() {
        let (tx, rx) = oneshot::channel::<CrimsonResult<()>>();
        let pending = PendingResponse::new(5, rx);
        drop(tx);
        assert!(matches!(
            pending.await,
            Err(CrimsonError::ResponseAbandoned { msg_id: 5 })
        ));
    }

    #[tokio::test]
    async fn test_pending_response_resolved() {
        let pending = PendingResponse::resolved(0, Ok(()));
        assert_eq!(pending.msg_id(), 0);
        assert!(pending.await.is_ok());
    }
}
