//! Demo: two in-process participants call each other over the loopback
//! transport and the in-memory relay, then swap cameras mid-call.

use anyhow::Result;
use duocall::application::{CallController, CallStatus};
use duocall::config::Config;
use duocall::infrastructure::media::SyntheticMediaBackend;
use duocall::infrastructure::relay::InMemoryRelay;
use duocall::infrastructure::transport::LoopbackPair;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_path(path)?,
        None => Config::default(),
    };

    let relay = Arc::new(InMemoryRelay::new());
    let (factory_a, factory_b) = LoopbackPair::factories();

    // first participant: no room parameter, so it creates the room
    let alice = CallController::join(
        "https://calls.local/call",
        relay.clone(),
        Arc::new(SyntheticMediaBackend::new()),
        Arc::new(factory_a),
        config.clone(),
    )?;
    info!(link = %alice.share_link(), "room created");

    // second participant joins through the shared link
    let bob = CallController::join(
        &alice.share_link(),
        relay,
        Arc::new(SyntheticMediaBackend::new()),
        Arc::new(factory_b),
        config,
    )?;

    let mut alice_status = alice.watch_status();
    let mut bob_status = bob.watch_status();

    alice.start_call().await?;
    bob.start_call().await?;

    wait_for(&mut alice_status, CallStatus::Connected).await?;
    wait_for(&mut bob_status, CallStatus::Connected).await?;
    info!("both participants connected");

    let cameras = alice.list_devices().await.video_inputs;
    if let Some(other) = cameras.get(1) {
        alice.switch_camera(other.id.clone()).await?;
        info!(camera = %other.label, "switched camera mid-call");
    }

    alice.end_call().await;
    bob.end_call().await;
    info!("call finished");
    Ok(())
}

async fn wait_for(
    status: &mut watch::Receiver<CallStatus>,
    expected: CallStatus,
) -> Result<()> {
    let wait = async {
        loop {
            if *status.borrow_and_update() == expected {
                return Ok(());
            }
            status.changed().await?;
        }
    };
    let outcome: std::result::Result<(), watch::error::RecvError> =
        tokio::time::timeout(Duration::from_secs(5), wait).await?;
    outcome?;
    Ok(())
}
