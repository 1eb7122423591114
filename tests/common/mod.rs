#![allow(dead_code)]

use async_trait::async_trait;
use duocall::application::{CallController, CallStatus};
use duocall::config::Config;
use duocall::domain::media::{LocalStream, MediaBackend, MediaDeviceInfo, StreamConstraints};
use duocall::infrastructure::media::SyntheticMediaBackend;
use duocall::infrastructure::relay::InMemoryRelay;
use duocall::infrastructure::transport::loopback::{
    LoopbackFactory, LoopbackPair, LoopbackTransport,
};
use duocall::Result;
use std::sync::Arc;
use std::time::Duration;

/// Synthetic backend whose acquisitions take a while to resolve, for
/// exercising interleavings around an in-flight acquire.
pub struct SlowBackend {
    inner: SyntheticMediaBackend,
    delay: Duration,
}

impl SlowBackend {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: SyntheticMediaBackend::new(),
            delay,
        }
    }
}

#[async_trait]
impl MediaBackend for SlowBackend {
    async fn enumerate_devices(&self) -> Result<Vec<MediaDeviceInfo>> {
        self.inner.enumerate_devices().await
    }

    async fn acquire(&self, constraints: &StreamConstraints) -> Result<LocalStream> {
        tokio::time::sleep(self.delay).await;
        self.inner.acquire(constraints).await
    }
}

/// Two participants wired together over the in-memory relay and a
/// loopback transport pair, with handles kept for fault injection.
pub struct CallFixture {
    pub relay: Arc<InMemoryRelay>,
    pub alice: CallController,
    pub bob: CallController,
    pub alice_transport: Arc<LoopbackTransport>,
    pub bob_transport: Arc<LoopbackTransport>,
    pub alice_backend: Arc<SyntheticMediaBackend>,
    pub bob_backend: Arc<SyntheticMediaBackend>,
}

pub fn fixture() -> CallFixture {
    let relay = Arc::new(InMemoryRelay::new());
    let (a, b) = LoopbackPair::new();
    let alice_transport = a.transport();
    let bob_transport = b.transport();
    let alice_backend = Arc::new(SyntheticMediaBackend::new());
    let bob_backend = Arc::new(SyntheticMediaBackend::new());

    // alice arrives with no room parameter and creates the room
    let alice = CallController::join(
        "https://calls.test/call",
        relay.clone(),
        alice_backend.clone(),
        Arc::new(LoopbackFactory::new(a)),
        Config::default(),
    )
    .unwrap();

    // bob follows the shared link
    let bob = CallController::join(
        &alice.share_link(),
        relay.clone(),
        bob_backend.clone(),
        Arc::new(LoopbackFactory::new(b)),
        Config::default(),
    )
    .unwrap();

    CallFixture {
        relay,
        alice,
        bob,
        alice_transport,
        bob_transport,
        alice_backend,
        bob_backend,
    }
}

/// Start both sides and wait until each reports connected.
pub async fn start_both(fixture: &CallFixture) {
    fixture.alice.start_call().await.unwrap();
    fixture.bob.start_call().await.unwrap();
    wait_for(&fixture.alice, |s| *s == CallStatus::Connected).await;
    wait_for(&fixture.bob, |s| *s == CallStatus::Connected).await;
}

pub async fn wait_for(controller: &CallController, predicate: impl Fn(&CallStatus) -> bool) {
    let mut rx = controller.watch_status();
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if predicate(&rx.borrow_and_update()) {
                return;
            }
            if rx.changed().await.is_err() {
                panic!("status channel closed");
            }
        }
    })
    .await
    .expect("timed out waiting for call status");
}
