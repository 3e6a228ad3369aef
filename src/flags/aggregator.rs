//! Priority-ordered flag evaluation chain.
//!
//! # Algorithm
//! ```text
//! discover: registry snapshot − the aggregator itself, stable-sorted by weight
//! for each evaluator (lowest weight first):
//!     caller cancelled?  → Cancelled
//!     Ok(value)          → decided, stop
//!     EvaluatorFatal     → stop, propagate
//!     NoDecision / other → continue
//! exhausted              → NoDecision
//! ```
//!
//! # Design Decisions
//! - Discovery runs on every lookup against an immutable registry snapshot
//! - Equal weights keep registration order
//! - The aggregator excludes itself by registration id and by instance identity,
//!   so registering it into its own registry can never recurse

use std::sync::Arc;

use crate::flags::evaluator::{FlagError, FlagEvaluator, RequestContext};
use crate::flags::registry::{EvaluatorRegistration, EvaluatorRegistry};
use crate::observability::{metrics, EventBus, ProxyEvent};

/// How a flag lookup ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagOutcome {
    Decided,
    Abstained,
    Fatal,
    DefaultedNoEvaluators,
}

impl FlagOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagOutcome::Decided => "decided",
            FlagOutcome::Abstained => "abstained",
            FlagOutcome::Fatal => "fatal",
            FlagOutcome::DefaultedNoEvaluators => "no_evaluators",
        }
    }
}

/// Result of a non-fatal lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagDecision {
    pub value: bool,
    /// Id of the deciding evaluator, if one decided.
    pub evaluator: Option<String>,
    pub outcome: FlagOutcome,
}

impl FlagDecision {
    pub fn is_decided(&self) -> bool {
        self.outcome == FlagOutcome::Decided
    }

    /// The decided value, or `default` when nobody decided.
    pub fn value_or(&self, default: bool) -> bool {
        if self.is_decided() {
            self.value
        } else {
            default
        }
    }
}

pub const AGGREGATOR_ID: &str = "feature-flag-aggregator";

pub struct FeatureFlagAggregator {
    id: String,
    weight: i32,
    registry: Arc<EvaluatorRegistry>,
    events: EventBus,
}

impl FeatureFlagAggregator {
    pub fn new(registry: Arc<EvaluatorRegistry>, events: EventBus) -> Self {
        Self {
            id: AGGREGATOR_ID.to_string(),
            weight: 0,
            registry,
            events,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn registry(&self) -> &Arc<EvaluatorRegistry> {
        &self.registry
    }

    /// Evaluators consulted by a lookup, in consultation order.
    pub fn discover_evaluators(&self) -> Vec<Arc<EvaluatorRegistration>> {
        let me = self as *const Self as *const ();
        let mut found: Vec<_> = self
            .registry
            .snapshot()
            .iter()
            .filter(|reg| reg.id != self.id && Arc::as_ptr(&reg.instance) as *const () != me)
            .cloned()
            .collect();
        found.sort_by_key(|reg| reg.weight);
        found
    }

    /// Run the chain for one flag.
    ///
    /// `Ok` covers decided and undecided lookups; fatal and cancelled lookups are errors.
    pub fn decide(&self, flag: &str, tenant: Option<&str>, ctx: &RequestContext) -> Result<FlagDecision, FlagError> {
        let evaluators = self.discover_evaluators();
        if evaluators.is_empty() {
            metrics::record_flag_evaluation(flag, FlagOutcome::DefaultedNoEvaluators.as_str());
            return Ok(FlagDecision {
                value: false,
                evaluator: None,
                outcome: FlagOutcome::DefaultedNoEvaluators,
            });
        }

        for reg in &evaluators {
            if ctx.is_cancelled() {
                tracing::debug!(flag = %flag, "Flag evaluation cancelled by caller");
                metrics::record_flag_evaluation(flag, "cancelled");
                return Err(FlagError::Cancelled { flag: flag.to_string() });
            }

            match reg.instance.evaluate_flag(flag, tenant, ctx) {
                Ok(value) => {
                    tracing::trace!(flag = %flag, evaluator = %reg.id, value, "Flag decided");
                    metrics::record_flag_evaluation(flag, FlagOutcome::Decided.as_str());
                    return Ok(FlagDecision {
                        value,
                        evaluator: Some(reg.id.clone()),
                        outcome: FlagOutcome::Decided,
                    });
                }
                Err(FlagError::EvaluatorFatal { evaluator, reason }) => {
                    let evaluator = evaluator.unwrap_or_else(|| reg.id.clone());
                    tracing::error!(flag = %flag, evaluator = %evaluator, reason = %reason, "Fatal flag evaluator error");
                    metrics::record_flag_evaluation(flag, FlagOutcome::Fatal.as_str());
                    self.events.publish(ProxyEvent::FlagEvaluatorFatal {
                        flag: flag.to_string(),
                        evaluator: evaluator.clone(),
                    });
                    return Err(FlagError::EvaluatorFatal {
                        evaluator: Some(evaluator),
                        reason,
                    });
                }
                Err(FlagError::NoDecision) => {
                    tracing::trace!(flag = %flag, evaluator = %reg.id, "Evaluator abstained");
                }
                Err(e) => {
                    tracing::warn!(flag = %flag, evaluator = %reg.id, error = %e, "Flag evaluator failed, treating as abstention");
                }
            }
        }

        metrics::record_flag_evaluation(flag, FlagOutcome::Abstained.as_str());
        Ok(FlagDecision {
            value: false,
            evaluator: None,
            outcome: FlagOutcome::Abstained,
        })
    }
}

impl FlagEvaluator for FeatureFlagAggregator {
    fn evaluate_flag(&self, flag: &str, tenant: Option<&str>, ctx: &RequestContext) -> Result<bool, FlagError> {
        let decision = self.decide(flag, tenant, ctx)?;
        if decision.is_decided() {
            Ok(decision.value)
        } else {
            Err(FlagError::NoDecision)
        }
    }

    fn weight(&self) -> i32 {
        self.weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    #[derive(Clone, Copy)]
    enum Reply {
        Value(bool),
        Abstain,
        Fatal,
        Broken,
    }

    struct Scripted {
        name: &'static str,
        weight: i32,
        reply: Reply,
        calls: AtomicUsize,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Scripted {
        fn new(name: &'static str, weight: i32, reply: Reply, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                weight,
                reply,
                calls: AtomicUsize::new(0),
                log: log.clone(),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl FlagEvaluator for Scripted {
        fn evaluate_flag(&self, _: &str, _: Option<&str>, _: &RequestContext) -> Result<bool, FlagError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.log.lock().unwrap().push(self.name);
            match self.reply {
                Reply::Value(v) => Ok(v),
                Reply::Abstain => Err(FlagError::NoDecision),
                Reply::Fatal => Err(FlagError::fatal("tenant suspended")),
                Reply::Broken => Err(FlagError::other("backing store unreachable")),
            }
        }

        fn weight(&self) -> i32 {
            self.weight
        }
    }

    fn setup() -> (Arc<EvaluatorRegistry>, Arc<Mutex<Vec<&'static str>>>) {
        (Arc::new(EvaluatorRegistry::new()), Arc::new(Mutex::new(Vec::new())))
    }

    fn ctx() -> RequestContext {
        RequestContext::default()
    }

    #[test]
    fn test_lowest_weight_decides_first() {
        let (registry, log) = setup();
        let w30 = Scripted::new("w30", 30, Reply::Value(false), &log);
        let w10 = Scripted::new("w10", 10, Reply::Value(true), &log);
        let w20 = Scripted::new("w20", 20, Reply::Value(false), &log);
        registry.register("w30", w30.clone());
        registry.register("w10", w10.clone());
        registry.register("w20", w20.clone());

        let aggregator = FeatureFlagAggregator::new(registry, EventBus::detached());
        let decision = aggregator.decide("canary", None, &ctx()).unwrap();

        assert!(decision.value);
        assert_eq!(decision.evaluator.as_deref(), Some("w10"));
        assert_eq!(decision.outcome, FlagOutcome::Decided);
        assert_eq!(w20.calls(), 0);
        assert_eq!(w30.calls(), 0);
    }

    #[test]
    fn test_fatal_short_circuits() {
        let (registry, log) = setup();
        let w10 = Scripted::new("w10", 10, Reply::Abstain, &log);
        let w20 = Scripted::new("w20", 20, Reply::Fatal, &log);
        let w30 = Scripted::new("w30", 30, Reply::Value(true), &log);
        registry.register("w10", w10);
        registry.register("w20", w20);
        registry.register("w30", w30.clone());

        let (bus, mut rx) = EventBus::channel(4);
        let aggregator = FeatureFlagAggregator::new(registry, bus);
        let err = aggregator.evaluate_flag("canary", Some("acme"), &ctx()).unwrap_err();

        assert!(err.is_fatal());
        assert!(matches!(&err, FlagError::EvaluatorFatal { evaluator: Some(e), .. } if e == "w20"));
        assert_eq!(w30.calls(), 0);
        assert_eq!(*log.lock().unwrap(), vec!["w10", "w20"]);
        assert_eq!(
            rx.try_recv().unwrap(),
            ProxyEvent::FlagEvaluatorFatal {
                flag: "canary".into(),
                evaluator: "w20".into()
            }
        );
    }

    #[test]
    fn test_all_abstain() {
        let (registry, log) = setup();
        registry.register("a", Scripted::new("a", 10, Reply::Abstain, &log));
        registry.register("b", Scripted::new("b", 20, Reply::Abstain, &log));

        let aggregator = FeatureFlagAggregator::new(registry, EventBus::detached());
        assert!(aggregator.evaluate_flag("f", None, &ctx()).unwrap_err().is_no_decision());
        assert!(aggregator.evaluate_flag_with_default("f", None, &ctx(), true));

        let decision = aggregator.decide("f", None, &ctx()).unwrap();
        assert_eq!(decision.outcome, FlagOutcome::Abstained);
        assert!(!decision.value);
        assert!(decision.value_or(true));
    }

    #[test]
    fn test_non_fatal_error_is_abstention() {
        let (registry, log) = setup();
        registry.register("broken", Scripted::new("broken", 10, Reply::Broken, &log));
        registry.register("config", Scripted::new("config", 20, Reply::Value(true), &log));

        let aggregator = FeatureFlagAggregator::new(registry, EventBus::detached());
        let decision = aggregator.decide("f", None, &ctx()).unwrap();
        assert_eq!(decision.evaluator.as_deref(), Some("config"));
        assert!(decision.value);
    }

    #[test]
    fn test_empty_registry() {
        let (registry, _) = setup();
        let aggregator = FeatureFlagAggregator::new(registry, EventBus::detached());
        assert!(aggregator.evaluate_flag("f", None, &ctx()).unwrap_err().is_no_decision());
        assert_eq!(
            aggregator.decide("f", None, &ctx()).unwrap().outcome,
            FlagOutcome::DefaultedNoEvaluators
        );
    }

    #[test]
    fn test_excludes_itself() {
        let (registry, log) = setup();
        registry.register("only", Scripted::new("only", 50, Reply::Abstain, &log));

        let aggregator = Arc::new(FeatureFlagAggregator::new(registry.clone(), EventBus::detached()));
        registry.register(AGGREGATOR_ID, aggregator.clone());
        registry.register("alias", aggregator.clone());

        let ids: Vec<_> = aggregator.discover_evaluators().iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["only".to_string()]);
        assert!(aggregator.evaluate_flag("f", None, &ctx()).unwrap_err().is_no_decision());
    }

    #[test]
    fn test_equal_weights_keep_registration_order() {
        let (registry, log) = setup();
        registry.register("first", Scripted::new("first", 10, Reply::Abstain, &log));
        registry.register("second", Scripted::new("second", 10, Reply::Abstain, &log));
        registry.register("third", Scripted::new("third", 5, Reply::Abstain, &log));

        let aggregator = FeatureFlagAggregator::new(registry, EventBus::detached());
        let _ = aggregator.decide("f", None, &ctx());
        assert_eq!(*log.lock().unwrap(), vec!["third", "first", "second"]);
    }

    #[test]
    fn test_cancelled_context_stops_chain() {
        let (registry, log) = setup();
        let evaluator = Scripted::new("a", 10, Reply::Value(true), &log);
        registry.register("a", evaluator.clone());

        let token = CancellationToken::new();
        token.cancel();
        let aggregator = FeatureFlagAggregator::new(registry, EventBus::detached());
        let err = aggregator
            .decide("f", None, &ctx().with_cancellation(token))
            .unwrap_err();

        assert!(matches!(err, FlagError::Cancelled { .. }));
        assert_eq!(evaluator.calls(), 0);
    }

    #[test]
    fn test_registration_weight_overrides_instance_weight() {
        let (registry, log) = setup();
        registry.register("late", Scripted::new("late", 1, Reply::Value(false), &log));
        registry.register_with_weight("early", 0, Scripted::new("early", 99, Reply::Value(true), &log));

        let aggregator = FeatureFlagAggregator::new(registry, EventBus::detached());
        assert!(aggregator.evaluate_flag("f", None, &ctx()).unwrap());
    }
}
