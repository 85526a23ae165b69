//! Actor owning the instrument session.
//!
//! All session state lives in a single async task that processes
//! [`SessionCommand`]s one at a time, so connect, measure and stop requests are
//! serialized without locks. The GUI talks to it through a [`SessionClient`]
//! and never awaits on its own thread.
//!
//! During a measurement the actor runs a forwarder task that moves samples from
//! the driver's channel into the caller's channel and fires the redraw hook
//! after each one.

use crate::{
    core::{ConnectionState, DeviceId, RedrawHook, Sample},
    data::{DrainReport, SampleSink, TraceStore},
    error::{AppResult, EchemError},
    instrument::{InstrumentSession, MeasurementHandle},
    messages::SessionCommand,
    technique::MeasurementMethod,
};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// Actor that manages the instrument session
pub struct SessionActor {
    session: InstrumentSession,
    forwarder: Option<JoinHandle<()>>,
    sample_channel_capacity: usize,
}

impl SessionActor {
    /// Creates a new SessionActor
    pub fn new(session: InstrumentSession, sample_channel_capacity: usize) -> Self {
        Self {
            session,
            forwarder: None,
            sample_channel_capacity: sample_channel_capacity.max(1),
        }
    }

    /// Runs the actor event loop, processing commands until shutdown
    pub async fn run(mut self, mut command_rx: mpsc::Receiver<SessionCommand>) {
        info!(driver = %self.session.driver_name(), "SessionActor started");

        while let Some(command) = command_rx.recv().await {
            match command {
                SessionCommand::Discover { response } => {
                    let result = self.session.discover().await;
                    let _ = response.send(result);
                }

                SessionCommand::Connect { device, response } => {
                    let result = self.session.connect(device).await;
                    let _ = response.send(result);
                }

                SessionCommand::ConnectFirst { response } => {
                    let result = self.session.connect_first().await;
                    let _ = response.send(result);
                }

                SessionCommand::Disconnect { response } => {
                    let result = self.session.disconnect().await;
                    if result.is_ok() {
                        self.abort_forwarder();
                    }
                    let _ = response.send(result);
                }

                SessionCommand::Measure {
                    method,
                    samples,
                    redraw,
                    response,
                } => {
                    let result = self.start_measurement(&method, samples, redraw).await;
                    let _ = response.send(result);
                }

                SessionCommand::Stop { response } => {
                    // The forwarder drains whatever the driver already queued
                    // and exits once the driver drops its sender.
                    let result = self.session.stop().await;
                    let _ = response.send(result);
                }

                SessionCommand::GetState { response } => {
                    let _ = response.send(self.session.poll().clone());
                }

                SessionCommand::Shutdown { response } => {
                    info!("Shutdown command received");
                    self.shutdown().await;
                    let _ = response.send(());
                    break;
                }
            }
        }

        info!("SessionActor shutting down");
    }

    async fn start_measurement(
        &mut self,
        method: &MeasurementMethod,
        samples: mpsc::Sender<Sample>,
        redraw: RedrawHook,
    ) -> AppResult<MeasurementHandle> {
        let (driver_tx, mut driver_rx) = mpsc::channel(self.sample_channel_capacity);
        let handle = self.session.measure(method, driver_tx).await?;

        // A previous forwarder may still be draining a stopped run
        self.abort_forwarder();

        let id = handle.id;
        self.forwarder = Some(tokio::spawn(async move {
            let mut forwarded = 0usize;
            while let Some(sample) = driver_rx.recv().await {
                if samples.send(sample).await.is_err() {
                    debug!(id, "Sample receiver dropped; ending forwarder");
                    break;
                }
                forwarded += 1;
                redraw.request();
            }
            debug!(id, forwarded, "Forwarder finished");
            redraw.request();
        }));

        Ok(handle)
    }

    fn abort_forwarder(&mut self) {
        if let Some(task) = self.forwarder.take() {
            task.abort();
        }
    }

    async fn shutdown(&mut self) {
        if self.session.poll().is_connected() {
            if let Err(e) = self.session.disconnect().await {
                warn!(error = %e, "Disconnect during shutdown failed");
            }
        }
        self.abort_forwarder();
    }
}

/// Cloneable handle for sending commands to a running [`SessionActor`].
#[derive(Clone, Debug)]
pub struct SessionClient {
    command_tx: mpsc::Sender<SessionCommand>,
}

impl SessionClient {
    /// Spawns `actor` on the current Tokio runtime and returns a client for it.
    pub fn spawn(actor: SessionActor, command_channel_capacity: usize) -> (Self, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::channel(command_channel_capacity.max(1));
        let task = tokio::spawn(actor.run(command_rx));
        (Self { command_tx }, task)
    }

    /// Queues a command without waiting. Used from the UI thread.
    pub fn try_send(&self, command: SessionCommand) -> AppResult<()> {
        self.command_tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                EchemError::ChannelClosed("session command queue is full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                EchemError::ChannelClosed("session actor has stopped".to_string())
            }
        })
    }

    async fn request<T>(
        &self,
        (command, response): (SessionCommand, oneshot::Receiver<T>),
    ) -> AppResult<T> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| EchemError::ChannelClosed("session actor has stopped".to_string()))?;
        response
            .await
            .map_err(|_| EchemError::ChannelClosed("session actor dropped the response".to_string()))
    }

    pub async fn discover(&self) -> AppResult<Vec<DeviceId>> {
        self.request(SessionCommand::discover()).await?
    }

    pub async fn connect(&self, device: DeviceId) -> AppResult<()> {
        self.request(SessionCommand::connect(device)).await?
    }

    pub async fn connect_first(&self) -> AppResult<DeviceId> {
        self.request(SessionCommand::connect_first()).await?
    }

    pub async fn disconnect(&self) -> AppResult<()> {
        self.request(SessionCommand::disconnect()).await?
    }

    pub async fn measure(
        &self,
        method: MeasurementMethod,
        samples: mpsc::Sender<Sample>,
        redraw: RedrawHook,
    ) -> AppResult<MeasurementHandle> {
        self.request(SessionCommand::measure(method, samples, redraw))
            .await?
    }

    pub async fn stop(&self) -> AppResult<()> {
        self.request(SessionCommand::stop()).await?
    }

    pub async fn state(&self) -> AppResult<ConnectionState> {
        self.request(SessionCommand::get_state()).await
    }

    /// Stops the actor. Later requests fail with `ChannelClosed`.
    pub async fn shutdown(&self) -> AppResult<()> {
        self.request(SessionCommand::shutdown()).await
    }
}

/// Waits for the actor task to end. A panic or cancellation is logged and
/// reported as `false`.
pub async fn join_actor(task: JoinHandle<()>) -> bool {
    match task.await {
        Ok(()) => true,
        Err(e) => {
            warn!(error = %e, "Session actor task ended abnormally");
            false
        }
    }
}

/// Runs one measurement to completion and collects it into a fresh trace.
///
/// The session must already be connected. Used by the headless CLI.
pub async fn acquire(
    client: &SessionClient,
    method: MeasurementMethod,
    sample_channel_capacity: usize,
) -> AppResult<(TraceStore, DrainReport)> {
    let (tx, rx) = mpsc::channel(sample_channel_capacity.max(1));
    let handle = client.measure(method, tx, RedrawHook::noop()).await?;

    let mut trace = TraceStore::new();
    let mut sink = SampleSink::new();
    sink.attach(rx);
    let report = sink.run_to_end(&mut trace).await;
    info!(
        id = handle.id,
        points = trace.len(),
        dropped = report.dropped,
        "Acquisition complete"
    );
    Ok((trace, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instrument::MockPotentiostat;
    use crate::technique::{self, Technique};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn spawn_mock(time_scale: f64) -> (SessionClient, JoinHandle<()>) {
        let session = InstrumentSession::new(Box::new(
            MockPotentiostat::default().with_time_scale(time_scale),
        ));
        SessionClient::spawn(SessionActor::new(session, 64), 8)
    }

    fn method(technique: Technique) -> MeasurementMethod {
        technique::build(technique, &technique::preset(technique).defaults()).unwrap()
    }

    #[tokio::test]
    async fn test_measure_requires_connection() {
        let (client, _task) = spawn_mock(0.0);
        let (tx, mut rx) = mpsc::channel(16);
        let err = client
            .measure(method(Technique::Dpv), tx, RedrawHook::noop())
            .await
            .unwrap_err();
        assert!(matches!(err, EchemError::NotConnected));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_rejected_sweep_keeps_session_alive() {
        let (client, _task) = spawn_mock(0.0);
        let device = client.connect_first().await.unwrap();

        let mut values = technique::preset(Technique::Dpv).defaults();
        values.insert(technique::STEP_POTENTIAL.to_string(), 1e-300);
        let dpv = technique::build(Technique::Dpv, &values).unwrap();
        let (tx, _rx) = mpsc::channel(16);
        let err = client.measure(dpv, tx, RedrawHook::noop()).await.unwrap_err();
        assert!(matches!(err, EchemError::Device(_)));

        // The actor is still serving requests and the session is usable
        assert_eq!(
            client.state().await.unwrap(),
            ConnectionState::Connected(device)
        );
        let (trace, _) = acquire(&client, method(Technique::Dpv), 32).await.unwrap();
        assert_eq!(trace.len(), 201);
    }

    #[tokio::test]
    async fn test_samples_are_forwarded_with_redraws() {
        let (client, _task) = spawn_mock(0.0);
        client.connect_first().await.unwrap();

        let redraws = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&redraws);
        let hook = RedrawHook::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let (tx, mut rx) = mpsc::channel(16);
        let handle = client.measure(method(Technique::Swv), tx, hook).await.unwrap();
        assert_eq!(handle.technique, Technique::Swv);

        let mut received = 0;
        while rx.recv().await.is_some() {
            received += 1;
        }
        // 251 points, each a potential and a current sample
        assert_eq!(received, 502);
        // One per sample plus the final one when the run ends
        assert_eq!(redraws.load(Ordering::SeqCst), 503);
    }

    #[tokio::test]
    async fn test_state_follows_session() {
        let (client, _task) = spawn_mock(1.0);
        assert_eq!(client.state().await.unwrap(), ConnectionState::Disconnected);

        let device = client.connect_first().await.unwrap();
        assert_eq!(
            client.state().await.unwrap(),
            ConnectionState::Connected(device.clone())
        );

        let (tx, _rx) = mpsc::channel(16);
        client
            .measure(method(Technique::Cv), tx, RedrawHook::noop())
            .await
            .unwrap();
        assert_eq!(
            client.state().await.unwrap(),
            ConnectionState::Measuring(device.clone())
        );

        client.stop().await.unwrap();
        assert_eq!(client.state().await.unwrap(), ConnectionState::Connected(device));

        client.disconnect().await.unwrap();
        assert_eq!(client.state().await.unwrap(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_shutdown_closes_client() {
        let (client, task) = spawn_mock(0.0);
        client.connect_first().await.unwrap();
        client.shutdown().await.unwrap();
        task.await.unwrap();

        assert!(matches!(
            client.state().await,
            Err(EchemError::ChannelClosed(_))
        ));
    }

    #[tokio::test]
    async fn test_join_actor_reports_abnormal_end() {
        let (client, task) = spawn_mock(0.0);
        client.shutdown().await.unwrap();
        assert!(join_actor(task).await);

        let crashed = tokio::spawn(async {
            panic!("actor crashed");
        });
        assert!(!join_actor(crashed).await);

        let (_client, task) = spawn_mock(0.0);
        task.abort();
        assert!(!join_actor(task).await);
    }

    #[tokio::test]
    async fn test_acquire_collects_full_sweep() {
        let (client, _task) = spawn_mock(0.0);
        client.connect_first().await.unwrap();
        let (trace, report) = acquire(&client, method(Technique::Dpv), 32).await.unwrap();
        assert!(report.finished);
        assert_eq!(report.dropped, 0);
        assert_eq!(trace.voltage().len(), 201);
        assert_eq!(trace.current().len(), 201);
    }
}
