//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::health::BackendHealthTracker;
use crate::load_balancer::LoadBalancer;

/// Round-robin selector.
/// Each call starts one position later than the previous one and wraps around.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn order(&self, backends: &[Arc<BackendHealthTracker>]) -> Vec<Arc<BackendHealthTracker>> {
        if backends.is_empty() {
            return Vec::new();
        }

        let start = self.counter.fetch_add(1, Ordering::Relaxed) % backends.len();
        backends[start..]
            .iter()
            .chain(&backends[..start])
            .cloned()
            .collect()
    }
}
