//! Message types for actor-based communication
//!
//! Commands sent from the GUI (or the headless CLI) to the [`SessionActor`].
//! Each command carries a oneshot responder so callers can either await the
//! result or poll it once per frame without blocking.
//!
//! [`SessionActor`]: crate::app_actor::SessionActor

use crate::core::{ConnectionState, DeviceId, RedrawHook, Sample};
use crate::error::AppResult;
use crate::instrument::MeasurementHandle;
use crate::technique::MeasurementMethod;
use tokio::sync::{mpsc, oneshot};

/// Commands that can be sent to the SessionActor
#[derive(Debug)]
pub enum SessionCommand {
    /// List reachable devices
    Discover {
        response: oneshot::Sender<AppResult<Vec<DeviceId>>>,
    },

    /// Connect to a specific device
    Connect {
        device: DeviceId,
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Discover and connect to the first device found
    ConnectFirst {
        response: oneshot::Sender<AppResult<DeviceId>>,
    },

    /// Disconnect, stopping any running measurement
    Disconnect {
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Start a measurement. Samples are forwarded to `samples` and `redraw`
    /// is invoked after each one.
    Measure {
        method: MeasurementMethod,
        samples: mpsc::Sender<Sample>,
        redraw: RedrawHook,
        response: oneshot::Sender<AppResult<MeasurementHandle>>,
    },

    /// Stop the running measurement
    Stop {
        response: oneshot::Sender<AppResult<()>>,
    },

    /// Get the current connection state
    GetState {
        response: oneshot::Sender<ConnectionState>,
    },

    /// Shut the session down, disconnecting if needed
    Shutdown {
        response: oneshot::Sender<()>,
    },
}

impl SessionCommand {
    /// Helper to create a Discover command
    pub fn discover() -> (Self, oneshot::Receiver<AppResult<Vec<DeviceId>>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Discover { response: tx }, rx)
    }

    /// Helper to create a Connect command
    pub fn connect(device: DeviceId) -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Connect { device, response: tx }, rx)
    }

    /// Helper to create a ConnectFirst command
    pub fn connect_first() -> (Self, oneshot::Receiver<AppResult<DeviceId>>) {
        let (tx, rx) = oneshot::channel();
        (Self::ConnectFirst { response: tx }, rx)
    }

    /// Helper to create a Disconnect command
    pub fn disconnect() -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Disconnect { response: tx }, rx)
    }

    /// Helper to create a Measure command
    pub fn measure(
        method: MeasurementMethod,
        samples: mpsc::Sender<Sample>,
        redraw: RedrawHook,
    ) -> (Self, oneshot::Receiver<AppResult<MeasurementHandle>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self::Measure {
                method,
                samples,
                redraw,
                response: tx,
            },
            rx,
        )
    }

    /// Helper to create a Stop command
    pub fn stop() -> (Self, oneshot::Receiver<AppResult<()>>) {
        let (tx, rx) = oneshot::channel();
        (Self::Stop { response: tx }, rx)
    }

    /// Helper to create a GetState command
    pub fn get_state() -> (Self, oneshot::Receiver<ConnectionState>) {
        let (tx, rx) = oneshot::channel();
        (Self::GetState { response: tx }, rx)
    }

    /// Helper to create a Shutdown command
    pub fn shutdown() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self::Shutdown { response: tx }, rx)
    }
}
