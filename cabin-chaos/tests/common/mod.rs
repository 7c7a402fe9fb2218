//! Shared fixtures for the chaos integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use cabin_cluster::{ClusterLifecycle, MemorySandbox};
use cabin_core::{Clock, ClusterSpec, HarnessConfig, MemberIdentity, VirtualClock};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_test_writer()
        .try_init();
}

pub fn cluster(size: u64) -> ClusterSpec {
    ClusterSpec::with_cluster_uuid(
        (1..=size)
            .map(|id| MemberIdentity::new(id, format!("127.0.0.1:{}", 5253 + id)))
            .collect(),
        "chaostst",
    )
    .unwrap()
}

type Hook = Box<dyn FnOnce() + Send>;

/// Virtual clock that runs registered hooks once time reaches them, standing
/// in for things that happen while the harness sleeps.
#[derive(Default)]
pub struct HookClock {
    inner: VirtualClock,
    hooks: Mutex<Vec<(Duration, Hook)>>,
}

impl HookClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(&self, when: Duration, hook: impl FnOnce() + Send + 'static) {
        self.hooks.lock().push((when, Box::new(hook)));
    }

    fn fire_due(&self) {
        let now = self.inner.now();
        let due: Vec<Hook> = {
            let mut hooks = self.hooks.lock();
            let (due, later): (Vec<_>, Vec<_>) =
                hooks.drain(..).partition(|(when, _)| *when <= now);
            *hooks = later;
            due.into_iter().map(|(_, hook)| hook).collect()
        };
        for hook in due {
            hook();
        }
    }
}

#[async_trait]
impl Clock for HookClock {
    fn now(&self) -> Duration {
        self.inner.now()
    }

    async fn sleep(&self, duration: Duration) {
        self.inner.sleep(duration).await;
        self.fire_due();
    }
}

pub struct Harness {
    pub lifecycle: ClusterLifecycle,
    pub sandbox: MemorySandbox,
    pub clock: Arc<HookClock>,
}

impl Harness {
    pub async fn running(size: u64, config: HarnessConfig) -> Self {
        let sandbox = MemorySandbox::new();
        let clock = Arc::new(HookClock::new());
        let mut lifecycle = ClusterLifecycle::new(
            cluster(size),
            config,
            Arc::new(sandbox.clone()),
            clock.clone(),
        );
        lifecycle.restore_all().await.unwrap();
        Self {
            lifecycle,
            sandbox,
            clock,
        }
    }

    pub fn member(&self, id: u64) -> MemberIdentity {
        self.lifecycle
            .cluster()
            .member(cabin_core::MemberId(id))
            .cloned()
            .unwrap()
    }
}
