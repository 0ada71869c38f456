use holler::config::Config;
use holler::domain::call::CallType;
use holler::domain::shared::value_objects::UserId;
use holler::domain::signaling::SignalingEngine;
use holler::infrastructure::store::MemoryStore;
use std::sync::Arc;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .init();

    info!("Starting Holler signaling demo");

    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    info!("Configuration loaded: {:?}", config);

    demo_call_lifecycle(&config).await?;

    info!("Demo finished");
    Ok(())
}

/// Run a scripted two-party call over the in-memory store: start,
/// incoming, accept, heartbeats, end.
async fn demo_call_lifecycle(config: &Config) -> anyhow::Result<()> {
    let store = Arc::new(MemoryStore::with_collection(
        config.store.collection.clone(),
    ));

    let mut alice = SignalingEngine::new(store.clone(), config.signaling.clone());
    let mut bob = SignalingEngine::new(store.clone(), config.signaling.clone());
    let mut alice_events = alice.subscribe_events();
    let mut bob_events = bob.subscribe_events();

    alice.sign_in(UserId::from("alice"));
    bob.sign_in(UserId::from("bob"));

    let call_id = alice
        .start_call(&[UserId::from("bob")], CallType::Voice)
        .await?;
    info!(call = %call_id, "alice started a voice call to bob");

    alice.pump().await;
    bob.pump().await;
    while let Ok(event) = bob_events.try_recv() {
        info!(?event, "bob observed");
    }

    bob.accept_call().await?;
    alice.pump().await;
    bob.pump().await;

    alice.send_heartbeat().await?;
    bob.send_heartbeat().await?;
    alice.pump().await;
    bob.pump().await;

    alice.end_call().await?;
    alice.pump().await;
    bob.pump().await;

    while let Ok(event) = alice_events.try_recv() {
        info!(?event, "alice observed");
    }
    while let Ok(event) = bob_events.try_recv() {
        info!(?event, "bob observed");
    }

    Ok(())
}
