//! Core traits and data types for the acquisition pipeline.
//!
//! This module defines the abstractions everything else is built on: the
//! [`Potentiostat`] capability implemented by instrument drivers, the [`Sample`]
//! values they stream, and the [`ConnectionState`] tracked by the session.
//!
//! # Data Flow
//!
//! ```text
//! Potentiostat --[Sample]--> mpsc (bounded) --> forwarder task --> mpsc (bounded) --> SampleSink --> TraceStore
//!                                                     |
//!                                                     +--> RedrawHook (request repaint)
//! ```
//!
//! # Thread Safety
//!
//! Drivers must be `Send + Sync` so the session actor can own them on the Tokio
//! runtime. Samples only ever cross threads through bounded channels; the
//! trace they end up in is owned by a single thread.

use crate::error::AppResult;
use crate::technique::MeasurementMethod;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

// =============================================================================
// Basic Data Types
// =============================================================================

/// A labelled scalar reading streamed by an instrument.
///
/// The label is free text chosen by the driver (e.g. "potential", "E_potential",
/// "I_current"). It is only used to route the value into a series.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Channel name as reported by the instrument
    pub label: String,
    /// Measured value in SI units (V or A)
    pub value: f64,
}

impl Sample {
    /// Creates a sample from a label and a value.
    pub fn new(label: impl Into<String>, value: f64) -> Self {
        Self {
            label: label.into(),
            value,
        }
    }
}

/// The series a sample belongs to once its label has been classified.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleChannel {
    /// Applied potential, volts
    Potential,
    /// Measured current, amperes
    Current,
}

impl SampleChannel {
    /// Classifies a free-text label by case-insensitive substring match.
    ///
    /// "potential" is checked first, so a label containing both words is a
    /// potential. Labels containing neither return `None`.
    pub fn classify(label: &str) -> Option<Self> {
        let label = label.to_lowercase();
        if label.contains("potential") {
            Some(SampleChannel::Potential)
        } else if label.contains("current") {
            Some(SampleChannel::Current)
        } else {
            None
        }
    }
}

/// Opaque identifier of a discovered device.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(value: &str) -> Self {
        DeviceId(value.to_string())
    }
}

/// Connection state of an instrument session.
///
/// Transitions only happen through explicit session calls (or by observing
/// that an acquisition finished). There is no automatic reconnection.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No device connected
    #[default]
    Disconnected,
    /// A connect call is in flight
    Connecting,
    /// Connected and idle
    Connected(DeviceId),
    /// Connected with an acquisition running
    Measuring(DeviceId),
}

impl ConnectionState {
    /// True when a device is connected, whether idle or measuring.
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connected(_) | ConnectionState::Measuring(_)
        )
    }

    /// True while an acquisition is running.
    pub fn is_measuring(&self) -> bool {
        matches!(self, ConnectionState::Measuring(_))
    }

    /// The connected device, if any.
    pub fn device(&self) -> Option<&DeviceId> {
        match self {
            ConnectionState::Connected(id) | ConnectionState::Measuring(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected(id) => write!(f, "Connected to {}", id),
            ConnectionState::Measuring(id) => write!(f, "Measuring on {}", id),
        }
    }
}

// =============================================================================
// Instrument Capability
// =============================================================================

/// Capability implemented by potentiostat drivers.
///
/// This is the boundary to the vendor instrument library. A driver is only
/// responsible for talking to hardware; connection-state rules are enforced by
/// [`crate::instrument::InstrumentSession`].
#[async_trait]
pub trait Potentiostat: Send + Sync {
    /// Human readable driver name.
    fn name(&self) -> String;

    /// Lists the devices currently reachable.
    async fn discover(&mut self) -> AppResult<Vec<DeviceId>>;

    /// Opens a connection to `device`.
    async fn connect(&mut self, device: &DeviceId) -> AppResult<()>;

    /// Closes the current connection.
    async fn disconnect(&mut self) -> AppResult<()>;

    /// Starts an acquisition for `method`, streaming samples into `samples`.
    ///
    /// Returns the handle of the task producing samples. The task ends when the
    /// sweep completes, when [`Potentiostat::stop`] is called, or when the
    /// receiving side is dropped.
    async fn measure(
        &mut self,
        method: &MeasurementMethod,
        samples: mpsc::Sender<Sample>,
    ) -> AppResult<JoinHandle<()>>;

    /// Asks a running acquisition to halt. Best effort: samples already in
    /// flight may still be delivered after this returns.
    async fn stop(&mut self) -> AppResult<()>;
}

/// Callback used to schedule a redraw on the thread owning the trace.
///
/// In the GUI this wraps `egui::Context::request_repaint`; headless users pass
/// [`RedrawHook::noop`].
#[derive(Clone)]
pub struct RedrawHook(Arc<dyn Fn() + Send + Sync>);

impl RedrawHook {
    /// Wraps a closure.
    pub fn new(f: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// A hook that does nothing.
    pub fn noop() -> Self {
        Self::new(|| {})
    }

    /// Requests a redraw.
    pub fn request(&self) {
        (self.0)()
    }
}

impl fmt::Debug for RedrawHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RedrawHook(<function>)")
    }
}
