use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::{LimitKind, ThrottleConfig};
use crate::errors::ConfigError;
use crate::event::{parse_field_path, Event};

use super::backend::{parse_limit_payload, LimitBackend, MemoryBackend, RedisBackend};
use super::bucket::{Limiter, Verdict};
use super::distribution::Distribution;

struct CompiledRule {
    /// Ordinal used in the throttle key prefix and the Redis sync key;
    /// index 0 is always the catch-all default.
    ordinal: usize,
    limit: i64,
    limit_kind: LimitKind,
    conditions: Vec<(Vec<String>, Vec<u8>)>,
}

impl CompiledRule {
    fn matches(&self, event: &dyn Event) -> bool {
        self.conditions.iter().all(|(path, expected)| {
            let path: Vec<&str> = path.iter().map(String::as_str).collect();
            event.dig(&path).as_deref() == Some(expected.as_slice())
        })
    }
}

fn epoch() -> DateTime<Utc> {
    DateTime::from_timestamp(0, 0).expect("unix epoch is representable")
}

fn align_to_interval(now: DateTime<Utc>, interval: std::time::Duration) -> DateTime<Utc> {
    let interval_nanos = interval.as_nanos().max(1) as i64;
    let since_epoch = now.signed_duration_since(epoch()).num_nanoseconds().unwrap_or(0);
    let aligned = since_epoch.div_euclid(interval_nanos) * interval_nanos;
    epoch() + chrono::Duration::nanoseconds(aligned)
}

/// Per-pipeline collection of limiters: compiled rules, a throttle-key →
/// limiter map, the shared clock, configured expiry, and the background
/// sweeper/sync tasks.
pub struct LimiterMap {
    pipeline: String,
    rules: Vec<CompiledRule>,
    throttle_field: Vec<String>,
    time_field: Vec<String>,
    distribution: Option<Arc<Distribution>>,
    distribution_field: Vec<String>,
    buckets_count: usize,
    bucket_interval: std::time::Duration,
    limiter_expiration: std::time::Duration,
    limiter_key_field: Vec<String>,
    clock: Arc<dyn Clock>,
    limiters: RwLock<HashMap<String, Arc<Limiter>>>,
    /// Throttle key -> literal Redis key read from the event's
    /// `LimiterKeyField`, refreshed on every charge. Only populated when
    /// `limiter_key_field` is configured.
    redis_keys: RwLock<HashMap<String, String>>,
    shutdown: Arc<AtomicBool>,
    notify: Arc<Notify>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl LimiterMap {
    pub fn build(
        pipeline: &str,
        cfg: &ThrottleConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>, ConfigError> {
        if cfg.buckets_count == 0 {
            return Err(ConfigError::InvalidRule {
                reason: "buckets_count must be at least 1".to_string(),
            });
        }

        let distribution = cfg
            .limit_distribution
            .as_ref()
            .map(Distribution::build)
            .transpose()?
            .map(Arc::new);

        let mut rules = vec![CompiledRule {
            ordinal: 0,
            limit: cfg.default_limit,
            limit_kind: cfg.limit_kind,
            conditions: Vec::new(),
        }];
        for (i, rule) in cfg.rules.iter().enumerate() {
            let conditions = rule
                .conditions
                .iter()
                .map(|(field, value)| (parse_field_path(field), value.clone().into_bytes()))
                .collect();
            rules.push(CompiledRule {
                ordinal: i + 1,
                limit: rule.limit,
                limit_kind: rule.limit_kind.unwrap_or(cfg.limit_kind),
                conditions,
            });
        }

        let distribution_field = cfg
            .limit_distribution
            .as_ref()
            .map(|d| parse_field_path(&d.field))
            .unwrap_or_default();

        let limiter_key_field = cfg
            .redis_backend_cfg
            .limiter_key_field
            .as_deref()
            .map(parse_field_path)
            .unwrap_or_default();

        let map = Arc::new(Self {
            pipeline: pipeline.to_string(),
            rules,
            throttle_field: parse_field_path(&cfg.throttle_field),
            time_field: parse_field_path(&cfg.time_field),
            distribution,
            distribution_field,
            buckets_count: cfg.buckets_count,
            bucket_interval: cfg.bucket_interval()?,
            limiter_expiration: cfg.limiter_expiration()?,
            limiter_key_field,
            clock,
            limiters: RwLock::new(HashMap::new()),
            redis_keys: RwLock::new(HashMap::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
            tasks: std::sync::Mutex::new(Vec::new()),
        });

        map.clone().spawn_sweeper();

        if cfg.limiter_backend == crate::config::LimiterBackend::Redis {
            let backend: Arc<dyn LimitBackend> = if cfg.redis_backend_cfg.endpoint.is_empty() {
                tracing::warn!("redis limiter backend configured with no endpoint, falling back to local limits");
                Arc::new(MemoryBackend)
            } else {
                match RedisBackend::new(&cfg.redis_backend_cfg.endpoint, cfg.redis_backend_cfg.password.as_deref()) {
                    Ok(backend) => Arc::new(backend),
                    Err(err) => {
                        tracing::warn!(error = %err, "failed to construct redis client, falling back to local limits");
                        Arc::new(MemoryBackend)
                    }
                }
            };
            map.clone().spawn_sync_workers(backend, cfg.redis_backend_cfg.sync_interval()?, cfg.redis_backend_cfg.worker_count.max(1), cfg.redis_backend_cfg.limiter_value_field.clone());
        }

        Ok(map)
    }

    fn match_rule(&self, event: &dyn Event) -> &CompiledRule {
        self.rules
            .iter()
            .skip(1)
            .find(|rule| rule.matches(event))
            .unwrap_or(&self.rules[0])
    }

    fn field_as_string(&self, event: &dyn Event, path: &[String]) -> String {
        let refs: Vec<&str> = path.iter().map(String::as_str).collect();
        event
            .dig(&refs)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
            .unwrap_or_default()
    }

    fn resolve_event_time(&self, event: &dyn Event) -> DateTime<Utc> {
        if self.time_field.is_empty() {
            return self.clock.now();
        }
        let refs: Vec<&str> = self.time_field.iter().map(String::as_str).collect();
        match event.dig(&refs) {
            Some(bytes) => match std::str::from_utf8(&bytes).ok().and_then(|s| DateTime::parse_from_rfc3339(s).ok()) {
                Some(parsed) => parsed.with_timezone(&Utc),
                None => {
                    tracing::debug!("time_field present but unparseable as RFC 3339, falling back to wall clock");
                    self.clock.now()
                }
            },
            None => self.clock.now(),
        }
    }

    pub fn charge(&self, event: &dyn Event) -> Verdict {
        let rule = self.match_rule(event);
        let key_value = self.field_as_string(event, &self.throttle_field);
        let key = format!("{}:{}", rule.ordinal, key_value);
        let now = self.resolve_event_time(event);

        let limiter = self.get_or_create_limiter(&key, rule, now);

        let cost = match rule.limit_kind {
            LimitKind::Count => 1,
            LimitKind::Size => event.raw_len() as i64,
        };

        let category = self
            .distribution
            .as_ref()
            .map(|_| self.field_as_string(event, &self.distribution_field));

        if !self.limiter_key_field.is_empty() {
            let redis_key = self.field_as_string(event, &self.limiter_key_field);
            if !redis_key.is_empty() {
                self.redis_keys.write().unwrap().insert(key.clone(), redis_key);
            }
        }

        limiter.charge(now, cost, category.as_deref())
    }

    fn get_or_create_limiter(&self, key: &str, rule: &CompiledRule, now: DateTime<Utc>) -> Arc<Limiter> {
        if let Some(limiter) = self.limiters.read().unwrap().get(key) {
            return limiter.clone();
        }
        let mut limiters = self.limiters.write().unwrap();
        limiters
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(Limiter::new(
                    self.buckets_count,
                    self.bucket_interval,
                    rule.limit,
                    rule.limit_kind,
                    self.distribution.clone(),
                    align_to_interval(now, self.bucket_interval),
                    now,
                ))
            })
            .clone()
    }

    fn spawn_sweeper(self: Arc<Self>) {
        let shutdown = self.shutdown.clone();
        let notify = self.notify.clone();
        let interval = self.bucket_interval;
        let expiration = self.limiter_expiration;
        let pipeline = self.pipeline.clone();
        let map = self.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = notify.notified() => break,
                }
                if shutdown.load(Ordering::SeqCst) {
                    break;
                }
                let cutoff = map.clock.now() - chrono::Duration::from_std(expiration).unwrap_or(chrono::Duration::zero());
                let before;
                {
                    let mut limiters = map.limiters.write().unwrap();
                    before = limiters.len();
                    limiters.retain(|_, limiter| !limiter.is_idle_since(cutoff));
                }
                let after = map.limiters.read().unwrap().len();
                if before != after {
                    tracing::debug!(pipeline = %pipeline, evicted = before - after, "expiry sweeper evicted idle limiters");
                }
            }
        });
        self.tasks.lock().unwrap().push(handle);
    }

    fn spawn_sync_workers(
        self: Arc<Self>,
        backend: Arc<dyn LimitBackend>,
        sync_interval: std::time::Duration,
        worker_count: usize,
        value_field: Option<String>,
    ) {
        for worker_id in 0..worker_count {
            let shutdown = self.shutdown.clone();
            let notify = self.notify.clone();
            let map = self.clone();
            let backend = backend.clone();
            let value_field = value_field.clone();
            let handle = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(sync_interval) => {}
                        _ = notify.notified() => break,
                    }
                    if shutdown.load(Ordering::SeqCst) {
                        break;
                    }
                    map.sync_limits_once(worker_id, worker_count, &*backend, value_field.as_deref()).await;
                }
            });
            self.tasks.lock().unwrap().push(handle);
        }
    }

    async fn sync_limits_once(&self, worker_id: usize, worker_count: usize, backend: &dyn LimitBackend, value_field: Option<&str>) {
        let keys: Vec<String> = self.limiters.read().unwrap().keys().cloned().collect();
        for (i, key) in keys.iter().enumerate() {
            if i % worker_count != worker_id {
                continue;
            }

            let store_key = if self.limiter_key_field.is_empty() {
                let key_value = key.splitn(2, ':').nth(1).unwrap_or("");
                format!("{}_{}_{}_limit", self.pipeline, field_path_label(&self.throttle_field), key_value)
            } else {
                let Some(custom_key) = self.redis_keys.read().unwrap().get(key).cloned() else {
                    continue;
                };
                custom_key
            };

            let Some(raw) = backend.fetch_raw(&store_key).await else {
                continue;
            };
            if let Some(limit) = parse_limit_payload(&raw, value_field) {
                if let Some(limiter) = self.limiters.read().unwrap().get(key) {
                    limiter.set_effective_limit(limit);
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
        for handle in self.tasks.lock().unwrap().drain(..) {
            handle.abort();
        }
    }

    /// Number of live (throttle-key, rule) limiters currently tracked. Used
    /// by tests to observe sweeper eviction directly instead of inferring it
    /// from charge-path side effects.
    pub fn limiter_count(&self) -> usize {
        self.limiters.read().unwrap().len()
    }
}

fn field_path_label(path: &[String]) -> String {
    path.join(".")
}

/// Process-wide pipeline-name → limiter-map registry. A single
/// reader/writer lock guards it; it is written only at pipeline start/stop.
/// Prefer constructing an explicit `Registry` and passing it to
/// `Throttle::start`; [`Registry::global`] exists only for hosts that want
/// the original's implicit cross-instance sharing.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<RwLock<HashMap<String, Arc<LimiterMap>>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static Registry {
        static GLOBAL: OnceLock<Registry> = OnceLock::new();
        GLOBAL.get_or_init(Registry::new)
    }

    pub(crate) fn get_or_create(
        &self,
        pipeline: &str,
        cfg: &ThrottleConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<LimiterMap>, ConfigError> {
        if let Some(existing) = self.inner.read().unwrap().get(pipeline) {
            return Ok(existing.clone());
        }
        let mut guard = self.inner.write().unwrap();
        if let Some(existing) = guard.get(pipeline) {
            return Ok(existing.clone());
        }
        let map = LimiterMap::build(pipeline, cfg, clock)?;
        guard.insert(pipeline.to_string(), map.clone());
        Ok(map)
    }

    pub(crate) fn remove(&self, pipeline: &str) {
        self.inner.write().unwrap().remove(pipeline);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::config::RuleConfig;
    use crate::event::JsonEvent;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn cfg() -> ThrottleConfig {
        ThrottleConfig {
            throttle_field: "k8s_ns".to_string(),
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
            default_limit: 20,
            ..ThrottleConfig::default()
        }
    }

    #[test]
    fn rule_ordering_selects_first_matching_rule() {
        let map = LimiterMap::build("p", &cfg(), Arc::new(SystemClock)).unwrap();
        let ns1 = JsonEvent::new(json!({"k8s_ns": "ns_1"}));
        let rule = map.match_rule(&ns1);
        assert_eq!(rule.ordinal, 1);
        assert_eq!(rule.limit, 2);

        let other = JsonEvent::new(json!({"k8s_ns": "other"}));
        let rule = map.match_rule(&other);
        assert_eq!(rule.ordinal, 0);
        assert_eq!(rule.limit, 20);
        map.shutdown();
    }

    #[test]
    fn charge_counts_per_namespace_independently() {
        let map = LimiterMap::build("p", &cfg(), Arc::new(SystemClock)).unwrap();
        let ns1 = JsonEvent::new(json!({"k8s_ns": "ns_1"}));
        assert_eq!(map.charge(&ns1), Verdict::Pass);
        assert_eq!(map.charge(&ns1), Verdict::Pass);
        assert_eq!(map.charge(&ns1), Verdict::Drop);
        map.shutdown();
    }
}
