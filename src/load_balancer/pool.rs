//! Backend pool management.
//!
//! # Responsibilities
//! - Own the health trackers of one config generation
//! - Resolve backend id lists to trackers
//! - Apply load balancing per backend group

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;

use crate::config::BackendSpec;
use crate::health::BackendHealthTracker;
use crate::load_balancer::{round_robin::RoundRobin, LoadBalancer};
use crate::observability::EventBus;

#[derive(Debug)]
pub struct BackendPool {
    /// Config order.
    trackers: Vec<Arc<BackendHealthTracker>>,
    by_id: HashMap<String, Arc<BackendHealthTracker>>,
    /// Group key -> balancer. Created on first use.
    balancers: DashMap<String, RoundRobin>,
}

impl BackendPool {
    pub fn new(specs: Vec<BackendSpec>, events: &EventBus) -> Self {
        let trackers: Vec<_> = specs
            .into_iter()
            .map(|spec| Arc::new(BackendHealthTracker::new(spec, events.clone())))
            .collect();
        let by_id = trackers.iter().map(|t| (t.id().to_string(), t.clone())).collect();

        Self {
            trackers,
            by_id,
            balancers: DashMap::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Arc<BackendHealthTracker>> {
        self.by_id.get(id)
    }

    /// Every tracker, in config order (for health checking and reporting).
    pub fn all(&self) -> &[Arc<BackendHealthTracker>] {
        &self.trackers
    }

    pub fn len(&self) -> usize {
        self.trackers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trackers.is_empty()
    }

    /// Trackers for `ids` in the group's rotated order. Unknown ids are skipped.
    pub fn candidates(&self, group: &str, ids: &[String]) -> Vec<Arc<BackendHealthTracker>> {
        let members: Vec<_> = ids
            .iter()
            .filter_map(|id| {
                let tracker = self.by_id.get(id);
                if tracker.is_none() {
                    tracing::debug!(group = %group, backend = %id, "Backend not found in pool");
                }
                tracker.cloned()
            })
            .collect();

        self.balancers.entry(group.to_string()).or_default().order(&members)
    }
}
