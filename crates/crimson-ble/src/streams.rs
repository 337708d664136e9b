//! # Stream Utilities
//!
//! `Stream` adapters over a session's listener channel.
//!
//! [`DeviceEventStream`] yields every [`DeviceEvent`]. [`TypedStream`] keeps
//! only the events a parser closure accepts, and the `subscribe_*` helpers
//! build the common ones:
//!
//! ```no_run
//! use crimson_ble::{DeviceSession, streams};
//! use futures_util::StreamExt;
//!
//! # async fn demo(session: &DeviceSession) {
//! let mut eeg = streams::subscribe_eeg(session);
//! while let Some(batch) = eeg.next().await {
//!     println!("{} samples", batch.samples.len());
//! }
//! # }
//! ```
//!
//! A session has a single listener; subscribing again detaches the previous
//! stream, which then ends.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use tokio::sync::mpsc;

use crate::protocol::events::DeviceEvent;
use crate::protocol::types::{BrainWave, Connectivity, EegData, ImuData};
use crate::session::DeviceSession;

/// Every event delivered to a session listener.
#[derive(Debug)]
pub struct DeviceEventStream {
    rx: mpsc::UnboundedReceiver<DeviceEvent>,
}

impl DeviceEventStream {
    pub fn new(rx: mpsc::UnboundedReceiver<DeviceEvent>) -> Self {
        Self { rx }
    }

    /// Keep only the events `parser` maps to `Some`.
    pub fn typed<T, F>(self, parser: F) -> TypedStream<T, F>
    where
        F: Fn(DeviceEvent) -> Option<T>,
    {
        TypedStream::new(self.rx, parser)
    }
}

impl Stream for DeviceEventStream {
    type Item = DeviceEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Stream of the listener events a parser closure accepts.
///
/// # Example
///
/// ```rust
/// use crimson_ble::protocol::DeviceEvent;
/// use crimson_ble::streams::TypedStream;
/// use futures_util::StreamExt;
/// use tokio::sync::mpsc;
///
/// let rt = tokio::runtime::Builder::new_current_thread()
///     .build()
///     .unwrap();
///
/// rt.block_on(async {
///     let (tx, rx) = mpsc::unbounded_channel();
///     let mut stream = TypedStream::new(rx, |event| match event {
///         DeviceEvent::BatteryLevel(level) => Some(level),
///         _ => None,
///     });
///
///     tx.send(DeviceEvent::Attention(0.4)).unwrap();
///     tx.send(DeviceEvent::BatteryLevel(80)).unwrap();
///     drop(tx);
///
///     assert_eq!(stream.next().await, Some(80));
///     assert_eq!(stream.next().await, None);
/// });
/// ```
pub struct TypedStream<T, F>
where
    F: Fn(DeviceEvent) -> Option<T>,
{
    rx: mpsc::UnboundedReceiver<DeviceEvent>,
    parser: F,
}

impl<T, F> TypedStream<T, F>
where
    F: Fn(DeviceEvent) -> Option<T>,
{
    pub fn new(rx: mpsc::UnboundedReceiver<DeviceEvent>, parser: F) -> Self {
        Self { rx, parser }
    }
}

impl<T, F> Stream for TypedStream<T, F>
where
    F: Fn(DeviceEvent) -> Option<T> + Unpin,
{
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match self.rx.poll_recv(cx) {
                Poll::Ready(Some(event)) => {
                    if let Some(parsed) = (self.parser)(event) {
                        return Poll::Ready(Some(parsed));
                    }
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

// ─── Convenience subscriptions ──────────────────────────────────────────

/// Raw EEG batches.
pub fn subscribe_eeg(session: &DeviceSession) -> impl Stream<Item = EegData> + use<> {
    session.events().typed(|event| match event {
        DeviceEvent::Eeg(data) => Some(data),
        _ => None,
    })
}

/// Accelerometer/gyroscope batches.
pub fn subscribe_imu(session: &DeviceSession) -> impl Stream<Item = ImuData> + use<> {
    session.events().typed(|event| match event {
        DeviceEvent::Imu(data) => Some(data),
        _ => None,
    })
}

/// Band power statistics.
pub fn subscribe_brain_wave(session: &DeviceSession) -> impl Stream<Item = BrainWave> + use<> {
    session.events().typed(|event| match event {
        DeviceEvent::BrainWave(wave) => Some(wave),
        _ => None,
    })
}

/// Connectivity transitions.
pub fn subscribe_connectivity(session: &DeviceSession) -> impl Stream<Item = Connectivity> + use<> {
    session.events().typed(|event| match event {
        DeviceEvent::ConnectivityChanged(c) => Some(c),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_device_event_stream_ends_when_sender_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = DeviceEventStream::new(rx);
        tx.send(DeviceEvent::Meditation(0.5)).unwrap();
        drop(tx);

        assert!(matches!(stream.next().await, Some(DeviceEvent::Meditation(_))));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_typed_stream_skips_other_events() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = DeviceEventStream::new(rx).typed(|event| match event {
            DeviceEvent::ConnectivityChanged(c) => Some(c),
            _ => None,
        });
        tx.send(DeviceEvent::BatteryLevel(3)).unwrap();
        tx.send(DeviceEvent::ConnectivityChanged(Connectivity::Connected))
            .unwrap();
        drop(tx);

        assert_eq!(stream.next().await, Some(Connectivity::Connected));
        assert_eq!(stream.next().await, None);
    }
}
