//! Tests for session shutdown while connected or measuring.

use echem_daq::{
    app_actor::{SessionActor, SessionClient},
    config::Settings,
    core::RedrawHook,
    error::EchemError,
    instrument::{self, InstrumentSession},
    technique::{self, Technique},
};
use std::time::Duration;
use tokio::sync::mpsc;

/// Helper to spawn the session the way the binary does, from configuration.
fn spawn_from_settings(settings: &Settings) -> (SessionClient, tokio::task::JoinHandle<()>) {
    let driver = instrument::driver_from_config(&settings.instrument).unwrap();
    let actor = SessionActor::new(
        InstrumentSession::new(driver),
        settings.acquisition.sample_channel_capacity,
    );
    SessionClient::spawn(actor, settings.acquisition.command_channel_capacity)
}

#[tokio::test]
async fn test_shutdown_while_measuring_is_prompt() {
    let settings = Settings::default();
    let (client, task) = spawn_from_settings(&settings);
    client.connect_first().await.unwrap();

    let method = technique::build(Technique::Cv, &technique::preset(Technique::Cv).defaults())
        .unwrap();
    let (tx, mut rx) = mpsc::channel(16);
    client.measure(method, tx, RedrawHook::noop()).await.unwrap();

    let start = std::time::Instant::now();
    client.shutdown().await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(start.elapsed() < Duration::from_secs(5));

    // The forwarder is gone, so the stream ends
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        while rx.recv().await.is_some() {}
    })
    .await;
    assert!(drained.is_ok());
}

#[tokio::test]
async fn test_requests_after_shutdown_fail() {
    let (client, task) = spawn_from_settings(&Settings::default());
    client.shutdown().await.unwrap();
    task.await.unwrap();

    assert!(matches!(
        client.connect_first().await,
        Err(EchemError::ChannelClosed(_))
    ));
}

#[test]
fn test_unknown_driver_is_rejected() {
    let mut settings = Settings::default();
    settings.instrument.driver = "ps-trace".to_string();
    assert!(matches!(
        instrument::driver_from_config(&settings.instrument),
        Err(EchemError::Configuration(_))
    ));
}
