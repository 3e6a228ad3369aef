//! Typed evaluator registry.
//!
//! Evaluators are registered explicitly at wiring time. Updates replace the whole
//! list (copy-on-write), so a chain already running keeps the list it started with.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::flags::evaluator::FlagEvaluator;

/// One registered evaluator.
#[derive(Clone)]
pub struct EvaluatorRegistration {
    pub id: String,
    pub weight: i32,
    pub instance: Arc<dyn FlagEvaluator>,
}

impl std::fmt::Debug for EvaluatorRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluatorRegistration")
            .field("id", &self.id)
            .field("weight", &self.weight)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
pub struct EvaluatorRegistry {
    entries: ArcSwap<Vec<Arc<EvaluatorRegistration>>>,
}

impl EvaluatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register using the evaluator's own weight. An existing entry with the same
    /// id is replaced in place, keeping its registration order.
    pub fn register(&self, id: impl Into<String>, instance: Arc<dyn FlagEvaluator>) {
        let weight = instance.weight();
        self.register_with_weight(id, weight, instance);
    }

    pub fn register_with_weight(&self, id: impl Into<String>, weight: i32, instance: Arc<dyn FlagEvaluator>) {
        let entry = Arc::new(EvaluatorRegistration {
            id: id.into(),
            weight,
            instance,
        });
        tracing::debug!(evaluator = %entry.id, weight, "Registering flag evaluator");

        self.entries.rcu(|current| {
            let mut next: Vec<_> = current.iter().cloned().collect();
            match next.iter().position(|e| e.id == entry.id) {
                Some(i) => next[i] = entry.clone(),
                None => next.push(entry.clone()),
            }
            next
        });
    }

    /// Remove by id. Returns whether anything was removed.
    pub fn unregister(&self, id: &str) -> bool {
        let previous = self.entries.rcu(|current| {
            current.iter().filter(|e| e.id != id).cloned().collect::<Vec<_>>()
        });
        let removed = previous.iter().any(|e| e.id == id);
        if removed {
            tracing::debug!(evaluator = %id, "Unregistered flag evaluator");
        }
        removed
    }

    /// Registrations in registration order.
    pub fn snapshot(&self) -> Arc<Vec<Arc<EvaluatorRegistration>>> {
        self.entries.load_full()
    }

    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }
}
