//! Instrument session: the connection state machine around a driver.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Disconnected
//!                               Connected -> Measuring -> Connected
//! ```
//!
//! The session is the only place these rules live. Drivers implementing
//! [`Potentiostat`] just talk to hardware. Nothing is retried: every failed
//! call is returned to the caller as-is.

pub mod mock;

use crate::config::InstrumentConfig;
use crate::core::{ConnectionState, DeviceId, Potentiostat, Sample};
use crate::error::{AppResult, EchemError};
use crate::technique::{MeasurementMethod, Technique};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use mock::MockPotentiostat;

/// Creates the driver named in the configuration.
pub fn driver_from_config(config: &InstrumentConfig) -> AppResult<Box<dyn Potentiostat>> {
    match config.driver.as_str() {
        "mock" => Ok(Box::new(MockPotentiostat::from_config(config))),
        other => Err(EchemError::Configuration(format!(
            "Unknown instrument driver '{}'",
            other
        ))),
    }
}

/// Describes an accepted measurement request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MeasurementHandle {
    /// Sequential id within this session
    pub id: u64,
    pub technique: Technique,
    pub device: DeviceId,
    pub started_at: DateTime<Utc>,
}

/// Connection state machine wrapping one driver.
pub struct InstrumentSession {
    driver: Box<dyn Potentiostat>,
    state: ConnectionState,
    acquisition: Option<JoinHandle<()>>,
    next_measurement: u64,
}

impl InstrumentSession {
    pub fn new(driver: Box<dyn Potentiostat>) -> Self {
        Self {
            driver,
            state: ConnectionState::Disconnected,
            acquisition: None,
            next_measurement: 1,
        }
    }

    /// Name of the wrapped driver.
    pub fn driver_name(&self) -> String {
        self.driver.name()
    }

    /// Current state, without checking for finished acquisitions.
    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Moves `Measuring` back to `Connected` once the acquisition task has ended.
    pub fn poll(&mut self) -> &ConnectionState {
        if let ConnectionState::Measuring(device) = &self.state {
            let finished = self
                .acquisition
                .as_ref()
                .map_or(true, |task| task.is_finished());
            if finished {
                info!("Measurement complete");
                self.state = ConnectionState::Connected(device.clone());
                self.acquisition = None;
            }
        }
        &self.state
    }

    /// Lists reachable devices.
    pub async fn discover(&mut self) -> AppResult<Vec<DeviceId>> {
        let devices = self.driver.discover().await?;
        info!(count = devices.len(), "Discovered devices");
        Ok(devices)
    }

    /// Connects to `device`. Only valid while disconnected.
    pub async fn connect(&mut self, device: DeviceId) -> AppResult<()> {
        if self.state != ConnectionState::Disconnected {
            return Err(EchemError::AlreadyConnected);
        }

        self.state = ConnectionState::Connecting;
        match self.driver.connect(&device).await {
            Ok(()) => {
                info!(%device, "Connected");
                self.state = ConnectionState::Connected(device);
                Ok(())
            }
            Err(e) => {
                warn!(%device, error = %e, "Connection failed");
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Discovers devices and connects to the first one found.
    pub async fn connect_first(&mut self) -> AppResult<DeviceId> {
        if self.state != ConnectionState::Disconnected {
            return Err(EchemError::AlreadyConnected);
        }
        let device = self
            .discover()
            .await?
            .into_iter()
            .next()
            .ok_or(EchemError::NoDevicesFound)?;
        self.connect(device.clone()).await?;
        Ok(device)
    }

    /// Disconnects, stopping a running measurement first.
    pub async fn disconnect(&mut self) -> AppResult<()> {
        self.poll();
        match &self.state {
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                return Err(EchemError::NotConnected)
            }
            ConnectionState::Measuring(_) => {
                warn!("Disconnect requested while measuring; stopping first");
                if let Err(e) = self.stop().await {
                    warn!(error = %e, "Stop failed during disconnect; aborting acquisition");
                    if let Some(task) = self.acquisition.take() {
                        task.abort();
                    }
                }
            }
            ConnectionState::Connected(_) => {}
        }

        self.driver.disconnect().await?;
        self.acquisition = None;
        self.state = ConnectionState::Disconnected;
        info!("Disconnected");
        Ok(())
    }

    /// Starts a measurement streaming into `samples`.
    ///
    /// Fails fast with `NotConnected` when no device is connected and with
    /// `MeasurementInProgress` while another measurement runs.
    pub async fn measure(
        &mut self,
        method: &MeasurementMethod,
        samples: mpsc::Sender<Sample>,
    ) -> AppResult<MeasurementHandle> {
        self.poll();
        let device = match &self.state {
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                return Err(EchemError::NotConnected)
            }
            ConnectionState::Measuring(_) => return Err(EchemError::MeasurementInProgress),
            ConnectionState::Connected(device) => device.clone(),
        };

        let task = self.driver.measure(method, samples).await?;
        let handle = MeasurementHandle {
            id: self.next_measurement,
            technique: method.technique(),
            device: device.clone(),
            started_at: Utc::now(),
        };
        self.next_measurement += 1;
        self.acquisition = Some(task);
        self.state = ConnectionState::Measuring(device);
        info!(id = handle.id, technique = %handle.technique, "Measurement started");
        Ok(handle)
    }

    /// Halts a running measurement. Best effort: already queued samples may
    /// still be delivered. A no-op when connected but idle.
    pub async fn stop(&mut self) -> AppResult<()> {
        self.poll();
        match &self.state {
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                Err(EchemError::NotConnected)
            }
            ConnectionState::Connected(_) => Ok(()),
            ConnectionState::Measuring(device) => {
                let device = device.clone();
                self.driver.stop().await?;
                self.acquisition = None;
                self.state = ConnectionState::Connected(device);
                info!("Measurement stopped");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::technique::{self, Technique};
    use tokio::time::{sleep, Duration};

    fn session(time_scale: f64) -> InstrumentSession {
        InstrumentSession::new(Box::new(
            MockPotentiostat::default().with_time_scale(time_scale),
        ))
    }

    fn dpv() -> MeasurementMethod {
        technique::build(Technique::Dpv, &technique::preset(Technique::Dpv).defaults()).unwrap()
    }

    #[tokio::test]
    async fn test_measure_while_disconnected_fails_fast() {
        let mut session = session(0.0);
        let (tx, mut rx) = mpsc::channel(8);
        let err = session.measure(&dpv(), tx).await.unwrap_err();
        assert!(matches!(err, EchemError::NotConnected));
        assert_eq!(session.state(), &ConnectionState::Disconnected);
        // The sender was dropped without anything being sent
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_connect_first_and_disconnect() {
        let mut session = session(0.0);
        let device = session.connect_first().await.unwrap();
        assert_eq!(device, DeviceId::from("MockSens-0001"));
        assert_eq!(session.state(), &ConnectionState::Connected(device));

        assert!(matches!(
            session.connect_first().await,
            Err(EchemError::AlreadyConnected)
        ));

        session.disconnect().await.unwrap();
        assert_eq!(session.state(), &ConnectionState::Disconnected);
        assert!(matches!(
            session.disconnect().await,
            Err(EchemError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_no_devices_found() {
        let mut session = InstrumentSession::new(Box::new(MockPotentiostat::new(vec![])));
        assert!(matches!(
            session.connect_first().await,
            Err(EchemError::NoDevicesFound)
        ));
        assert_eq!(session.state(), &ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_failed_connect_returns_to_disconnected() {
        let mut session = session(0.0);
        let err = session.connect(DeviceId::from("PS4-404")).await.unwrap_err();
        assert!(matches!(err, EchemError::Device(_)));
        assert_eq!(session.state(), &ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_second_measure_is_rejected_while_running() {
        let mut session = session(1.0);
        session.connect_first().await.unwrap();

        let (tx, _rx) = mpsc::channel(1024);
        let handle = session.measure(&dpv(), tx).await.unwrap();
        assert_eq!(handle.id, 1);
        assert!(session.state().is_measuring());

        let (tx2, _rx2) = mpsc::channel(8);
        assert!(matches!(
            session.measure(&dpv(), tx2).await,
            Err(EchemError::MeasurementInProgress)
        ));

        session.stop().await.unwrap();
        assert!(!session.state().is_measuring());
        assert!(session.state().is_connected());
    }

    #[tokio::test]
    async fn test_disconnect_while_measuring_force_stops() {
        let mut session = session(1.0);
        session.connect_first().await.unwrap();
        let (tx, _rx) = mpsc::channel(1024);
        session.measure(&dpv(), tx).await.unwrap();

        session.disconnect().await.unwrap();
        assert_eq!(session.state(), &ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_poll_observes_completed_acquisition() {
        let mut session = session(0.0);
        session.connect_first().await.unwrap();
        let (tx, mut rx) = mpsc::channel(1024);
        session.measure(&dpv(), tx).await.unwrap();

        while rx.recv().await.is_some() {}
        // The task may still be winding down after dropping its sender
        for _ in 0..50 {
            if !session.poll().is_measuring() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(matches!(session.poll(), ConnectionState::Connected(_)));
    }
}
