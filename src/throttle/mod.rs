//! The Throttle rate-limiting engine: a sliding-window, multi-bucket rate
//! limiter enforcing per-rule, per-key limits on event count or cumulative
//! byte size.

pub mod backend;
pub mod bucket;
pub mod coordinator;
pub mod distribution;

use std::sync::Arc;

use crate::clock::Clock;
use crate::config::ThrottleConfig;
use crate::errors::ConfigError;
use crate::event::Event;

pub use bucket::Verdict;
pub use coordinator::Registry;

/// A running throttle instance for one pipeline. Multiple `Throttle`
/// instances started with the same pipeline name and the same `Registry`
/// share one underlying limiter map, per the original's "multiple throttle
/// action instances in the same pipeline share state" behaviour.
pub struct Throttle {
    pipeline: String,
    map: Arc<coordinator::LimiterMap>,
    registry: Registry,
}

impl Throttle {
    pub fn start(
        pipeline: &str,
        cfg: &ThrottleConfig,
        registry: &Registry,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        let map = registry.get_or_create(pipeline, cfg, clock)?;
        Ok(Self {
            pipeline: pipeline.to_string(),
            map,
            registry: registry.clone(),
        })
    }

    /// Computes the throttle key, selects the matching rule, and attempts
    /// to charge the event's cost against the current sliding window.
    pub fn charge(&self, event: &dyn Event) -> Verdict {
        self.map.charge(event)
    }

    /// Number of (throttle-key, rule) limiters currently tracked. Exposed
    /// for tests exercising the expiry sweeper; not used on the charge path.
    pub fn limiter_count(&self) -> usize {
        self.map.limiter_count()
    }

    /// Signals the sweeper and any sync workers to stop and removes this
    /// pipeline's entry from the registry.
    pub fn stop(self) {
        self.map.shutdown();
        self.registry.remove(&self.pipeline);
    }
}
