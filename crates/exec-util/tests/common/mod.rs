//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use exec_util::{PoolConfig, SyncOptions};

/// Lines collected from a stream handler
#[derive(Clone, Default)]
pub struct Lines(Arc<Mutex<Vec<String>>>);

impl Lines {
    pub fn new() -> Self {
        Self::default()
    }

    /// A handler that appends every line it sees
    pub fn collector(&self) -> impl FnMut(&str) + Send + 'static {
        let lines = self.0.clone();
        move |line| lines.lock().unwrap().push(line.to_string())
    }

    pub fn get(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Options with short timeouts so failing tests fail fast
pub fn quick_options() -> SyncOptions {
    SyncOptions::default()
        .with_process_timeout(Duration::from_secs(10))
        .with_drain_timeout(Duration::from_secs(5))
        .with_shutdown_timeout(Duration::from_secs(5))
        .with_pool(PoolConfig {
            thread_name: "exec-util-test".to_string(),
            ..PoolConfig::default()
        })
}
