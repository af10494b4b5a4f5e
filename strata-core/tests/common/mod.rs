//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Once};
use std::time::Duration;

use strata_core::config::RuntimeConfig;
use strata_core::graph::ReadyTask;
use strata_core::runtime::{AccessProcessor, Collaborators, InMemoryBackend, ReadyQueue};
use tracing_subscriber::EnvFilter;

/// How long a test waits for something the processor should do promptly.
pub const PATIENCE: Duration = Duration::from_secs(5);

static TRACING: Once = Once::new();

/// Route engine logs to the test harness. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub struct Engine {
    pub processor: Arc<AccessProcessor>,
    pub ready: ReadyQueue,
    pub backend: InMemoryBackend,
}

impl Engine {
    pub fn start() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        init_tracing();
        let ready = ReadyQueue::new();
        let backend = InMemoryBackend::new();
        let processor = AccessProcessor::start(
            config,
            Collaborators::new(ready.clone(), backend.clone()),
        )
        .expect("processor starts");
        Self {
            processor: Arc::new(processor),
            ready,
            backend,
        }
    }

    /// Next ready task, failing the test if none shows up in time.
    pub fn next_ready(&self) -> ReadyTask {
        self.ready
            .pop_timeout(PATIENCE)
            .expect("a task should have become ready")
    }

    /// Wait until every request sent so far by this thread was processed.
    pub fn settle(&self) {
        self.processor
            .current_task_state()
            .expect("processor answers");
    }
}
