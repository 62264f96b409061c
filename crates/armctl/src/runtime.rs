//! Async runtime shared by the adapters.

use std::future::Future;

use bevy::prelude::*;
use tokio::runtime::{Builder, Handle, Runtime};

/// Tokio runtime shared by the request adapter and session transports.
///
/// The control loop itself never runs on it; async tasks reach the loop only
/// through channels.
#[derive(Resource, Debug)]
pub struct ArmctlRuntime(Runtime);

impl ArmctlRuntime {
    /// Builds a multi-threaded runtime with `worker_threads` workers.
    pub fn new(worker_threads: usize) -> std::io::Result<Self> {
        Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("armctl-io")
            .enable_all()
            .build()
            .map(Self)
    }

    /// Handle for spawning from outside the runtime.
    pub fn handle(&self) -> Handle {
        self.0.handle().clone()
    }

    /// Spawns a detached task.
    pub fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) {
        tracing::debug!("[ArmctlRuntime::spawn] Spawning detached task");
        drop(self.0.spawn(task));
    }
}
