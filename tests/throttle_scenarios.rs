//! End-to-end Throttle scenarios mirroring the concrete pass/drop arithmetic
//! a host pipeline would observe.

use std::sync::Arc;

use chrono::Utc;
use event_throttle_core::clock::ManualClock;
use event_throttle_core::config::{LimiterBackend, LimitKind, RedisBackendConfig, RuleConfig, ThrottleConfig};
use event_throttle_core::event::JsonEvent;
use event_throttle_core::throttle::{Registry, Throttle, Verdict};
use serde_json::json;
use std::collections::BTreeMap;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn throttle_count_scenario() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cfg = ThrottleConfig {
            throttle_field: "k8s_pod".to_string(),
            default_limit: 3,
            buckets_count: 1,
            bucket_interval: "100ms".to_string(),
            ..ThrottleConfig::default()
        };
        let registry = Registry::new();
        let throttle = Throttle::start("pipeline-a", &cfg, &registry, clock.clone()).unwrap();

        let event = JsonEvent::new(json!({"k8s_pod": "pod-1"}));
        let verdicts: Vec<_> = (0..5).map(|_| throttle.charge(&event)).collect();
        assert_eq!(
            verdicts,
            vec![Verdict::Pass, Verdict::Pass, Verdict::Pass, Verdict::Drop, Verdict::Drop]
        );

        clock.advance(chrono::Duration::milliseconds(150));
        assert_eq!(throttle.charge(&event), Verdict::Pass);
        throttle.stop();
    }

    #[tokio::test]
    async fn throttle_rule_ordering_scenario() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cfg = ThrottleConfig {
            throttle_field: "k8s_ns".to_string(),
            default_limit: 20,
            buckets_count: 1,
            bucket_interval: "100ms".to_string(),
            rules: vec![
                RuleConfig {
                    limit: 2,
                    limit_kind: None,
                    conditions: BTreeMap::from([("k8s_ns".to_string(), "ns_1".to_string())]),
                },
                RuleConfig {
                    limit: 3,
                    limit_kind: None,
                    conditions: BTreeMap::from([("k8s_ns".to_string(), "ns_2".to_string())]),
                },
            ],
            ..ThrottleConfig::default()
        };
        let registry = Registry::new();
        let throttle = Throttle::start("pipeline-b", &cfg, &registry, clock.clone()).unwrap();

        let ns1 = JsonEvent::new(json!({"k8s_ns": "ns_1"}));
        let ns2 = JsonEvent::new(json!({"k8s_ns": "ns_2"}));
        let other = JsonEvent::new(json!({"k8s_ns": "other"}));

        let mut ns1_passed = 0;
        let mut ns2_passed = 0;
        let mut other_passed = 0;

        for bucket in 0..5 {
            for _ in 0..10 {
                if throttle.charge(&ns1) == Verdict::Pass {
                    ns1_passed += 1;
                }
                if throttle.charge(&ns2) == Verdict::Pass {
                    ns2_passed += 1;
                }
                if throttle.charge(&other) == Verdict::Pass {
                    other_passed += 1;
                }
            }
            if bucket < 4 {
                clock.advance(chrono::Duration::milliseconds(100));
            }
        }

        assert_eq!(ns1_passed, 5 * 2);
        assert_eq!(ns2_passed, 5 * 3);
        assert_eq!(other_passed, 5 * 20);
        throttle.stop();
    }

    #[tokio::test]
    async fn size_throttle_scenario() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cfg = ThrottleConfig {
            throttle_field: "k8s_pod".to_string(),
            default_limit: 300,
            limit_kind: LimitKind::Size,
            buckets_count: 1,
            bucket_interval: "100ms".to_string(),
            ..ThrottleConfig::default()
        };
        let registry = Registry::new();
        let throttle = Throttle::start("pipeline-c", &cfg, &registry, clock.clone()).unwrap();

        let payload = "x".repeat(70);
        let event = JsonEvent::new(json!({"k8s_pod": "pod-1", "payload": payload}));
        let verdicts: Vec<_> = (0..4).map(|_| throttle.charge(&event)).collect();
        assert_eq!(&verdicts[..3], &[Verdict::Pass, Verdict::Pass, Verdict::Pass]);
        assert_eq!(verdicts[3], Verdict::Drop);

        clock.advance(chrono::Duration::milliseconds(100));
        assert_eq!(throttle.charge(&event), Verdict::Pass);
        throttle.stop();
    }

    #[tokio::test]
    async fn external_store_fallback_does_not_block_pipeline_start() {
        let cfg = ThrottleConfig {
            throttle_field: "k8s_pod".to_string(),
            default_limit: 5,
            buckets_count: 1,
            bucket_interval: "100ms".to_string(),
            limiter_backend: LimiterBackend::Redis,
            redis_backend_cfg: RedisBackendConfig {
                endpoint: "127.0.0.1:1".to_string(),
                ..RedisBackendConfig::default()
            },
            ..ThrottleConfig::default()
        };
        let registry = Registry::new();
        let throttle = Throttle::start("pipeline-d", &cfg, &registry, Arc::new(event_throttle_core::clock::SystemClock))
            .expect("pipeline still starts with an unreachable backend");

        let event = JsonEvent::new(json!({"k8s_pod": "pod-1"}));
        for _ in 0..5 {
            assert_eq!(throttle.charge(&event), Verdict::Pass);
        }
        assert_eq!(throttle.charge(&event), Verdict::Drop);
        throttle.stop();
    }

    #[tokio::test]
    async fn expiry_scenario() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        // Window (1000ms) wider than the 10ms clock advance below, so any
        // drop in `limiter_count()` can only come from sweeper eviction, not
        // ordinary bucket rollover.
        let cfg = ThrottleConfig {
            throttle_field: "k8s_pod".to_string(),
            default_limit: 10,
            buckets_count: 1000,
            bucket_interval: "1ms".to_string(),
            limiter_expiration: "5ms".to_string(),
            ..ThrottleConfig::default()
        };
        let registry = Registry::new();
        let throttle = Throttle::start("pipeline-e", &cfg, &registry, clock.clone()).unwrap();

        let event = JsonEvent::new(json!({"k8s_pod": "pod-1"}));
        throttle.charge(&event);
        assert_eq!(throttle.limiter_count(), 1);

        clock.advance(chrono::Duration::milliseconds(10));
        // Let the (real-time-scheduled) sweeper task observe the idle
        // limiter against the manual clock's cutoff and evict it.
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;

        assert_eq!(throttle.limiter_count(), 0);
        throttle.stop();
    }
}
