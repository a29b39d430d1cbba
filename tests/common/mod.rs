//! Shared actors and helpers for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use service_harness::lifecycle::{Actor, ActorError, Shutdown};
use service_harness::registry::{MemoryStore, RegistrationManager, RegistrationTimeouts};

/// What a [`ScriptedActor`] does in `execute`.
#[derive(Clone, Copy)]
pub enum Script {
    /// Return `Err(message)` after the delay.
    FailAfter(Duration, &'static str),
    /// Return `Ok(())` after the delay.
    ReturnAfter(Duration),
    /// Block until interrupted, then take `linger` to wind down.
    BlockUntilInterrupted { linger: Duration },
    /// Block until [`ScriptedActor::fire`] is called, then return `Ok(())`.
    WaitForFire,
}

/// Actor with scripted behaviour that records how it was interrupted.
pub struct ScriptedActor {
    name: String,
    script: Script,
    stop: Shutdown,
    fire: Shutdown,
    interrupts: AtomicUsize,
    causes: Mutex<Vec<Option<String>>>,
    finished: AtomicBool,
}

impl ScriptedActor {
    pub fn new(name: &str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            script,
            stop: Shutdown::new(),
            fire: Shutdown::new(),
            interrupts: AtomicUsize::new(0),
            causes: Mutex::new(Vec::new()),
            finished: AtomicBool::new(false),
        })
    }

    pub fn fire(&self) {
        self.fire.trigger();
    }

    pub fn interrupts(&self) -> usize {
        self.interrupts.load(Ordering::SeqCst)
    }

    /// Display strings of the causes passed to `interrupt`.
    pub fn causes(&self) -> Vec<Option<String>> {
        self.causes.lock().unwrap().clone()
    }

    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Actor for ScriptedActor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self) -> Result<(), ActorError> {
        let result = match self.script {
            Script::FailAfter(delay, message) => {
                tokio::time::sleep(delay).await;
                Err(ActorError::other(message))
            }
            Script::ReturnAfter(delay) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Script::BlockUntilInterrupted { linger } => {
                self.stop.wait().await;
                tokio::time::sleep(linger).await;
                Ok(())
            }
            Script::WaitForFire => {
                tokio::select! {
                    _ = self.fire.wait() => {}
                    _ = self.stop.wait() => {}
                }
                Ok(())
            }
        };
        self.finished.store(true, Ordering::SeqCst);
        result
    }

    async fn interrupt(&self, cause: Option<&ActorError>) {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        self.causes.lock().unwrap().push(cause.map(ToString::to_string));
        self.stop.trigger();
    }
}

pub fn blocking(name: &str) -> Arc<ScriptedActor> {
    ScriptedActor::new(
        name,
        Script::BlockUntilInterrupted {
            linger: Duration::ZERO,
        },
    )
}

pub fn manager(store: &MemoryStore) -> Arc<RegistrationManager> {
    Arc::new(RegistrationManager::new(
        Arc::new(store.clone()),
        RegistrationTimeouts::default(),
    ))
}

/// HTTP client that never goes through an environment proxy.
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
