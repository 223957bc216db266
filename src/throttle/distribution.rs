use std::collections::HashMap;

use crate::config::LimitDistributionConfig;
use crate::errors::ConfigError;

/// Which counter slot a resolved categorical value falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// One of the configured ratio entries.
    Mapped(usize),
    /// The remainder slot (only exists when ratios sum to less than 1).
    Default,
    /// No default slot exists and this value isn't listed — it is not
    /// constrained by the distribution at all.
    Unconstrained,
}

/// Sub-allocates a rule's limit across categorical values of a chosen event
/// field. Parsed and validated at rule-compile time; immutable thereafter.
pub struct Distribution {
    pub(crate) field: String,
    ratios: Vec<f64>,
    value_to_index: HashMap<String, usize>,
    has_default: bool,
}

impl Distribution {
    pub fn build(cfg: &LimitDistributionConfig) -> Result<Self, ConfigError> {
        if cfg.ratios.is_empty() {
            return Err(ConfigError::InvalidDistribution {
                reason: "ratios list must not be empty".to_string(),
            });
        }

        let mut ratios = Vec::with_capacity(cfg.ratios.len());
        let mut value_to_index = HashMap::new();
        let mut sum = 0.0;

        for (idx, entry) in cfg.ratios.iter().enumerate() {
            if !(entry.ratio > 0.0 && entry.ratio <= 1.0) {
                return Err(ConfigError::InvalidDistribution {
                    reason: format!("ratio {} is not in (0, 1]", entry.ratio),
                });
            }
            if entry.values.is_empty() {
                return Err(ConfigError::InvalidDistribution {
                    reason: format!("ratio entry {idx} has an empty values list"),
                });
            }
            for value in &entry.values {
                if value_to_index.insert(value.clone(), idx).is_some() {
                    return Err(ConfigError::InvalidDistribution {
                        reason: format!("value {value:?} listed in more than one ratio entry"),
                    });
                }
            }
            sum += entry.ratio;
            ratios.push(entry.ratio);
        }

        if sum > 1.0 + f64::EPSILON {
            return Err(ConfigError::InvalidDistribution {
                reason: format!("ratios sum to {sum}, which exceeds 1"),
            });
        }

        Ok(Self {
            field: cfg.field.clone(),
            ratios,
            value_to_index,
            has_default: sum < 1.0 - f64::EPSILON,
        })
    }

    pub fn resolve(&self, value: &str) -> Slot {
        if let Some(&idx) = self.value_to_index.get(value) {
            return Slot::Mapped(idx);
        }
        if self.has_default {
            Slot::Default
        } else {
            Slot::Unconstrained
        }
    }

    /// Counter-array index for a resolved slot, or `None` when the slot
    /// carries no sub-limit of its own.
    pub fn slot_index(&self, slot: Slot) -> Option<usize> {
        match slot {
            Slot::Mapped(idx) => Some(idx),
            Slot::Default => Some(self.ratios.len()),
            Slot::Unconstrained => None,
        }
    }

    /// Total number of per-bucket counters needed: one per ratio entry plus
    /// a reserved (possibly unused) default slot.
    pub fn slot_count(&self) -> usize {
        self.ratios.len() + 1
    }

    pub fn mapped_limit(&self, idx: usize, main_limit: i64) -> i64 {
        (self.ratios[idx] * main_limit as f64).floor() as i64
    }

    /// The default slot's effective limit: the main limit minus whatever
    /// the mapped ratio entries already floor-allocate, not a second
    /// independent `floor(default_ratio * limit)` — this keeps the sum of
    /// all slots' limits from exceeding the main limit due to double
    /// flooring.
    pub fn default_limit(&self, main_limit: i64) -> i64 {
        if !self.has_default {
            return 0;
        }
        let allocated: i64 = (0..self.ratios.len()).map(|i| self.mapped_limit(i, main_limit)).sum();
        (main_limit - allocated).max(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ComplexRatio;

    fn cfg(entries: &[(f64, &[&str])]) -> LimitDistributionConfig {
        LimitDistributionConfig {
            field: "level".to_string(),
            ratios: entries
                .iter()
                .map(|(ratio, values)| ComplexRatio {
                    ratio: *ratio,
                    values: values.iter().map(|v| v.to_string()).collect(),
                })
                .collect(),
        }
    }

    #[test]
    fn rejects_sum_greater_than_one() {
        let cfg = cfg(&[(0.5, &["error"]), (0.3, &["warn"]), (0.3, &["info"])]);
        assert!(Distribution::build(&cfg).is_err());
    }

    #[test]
    fn accepts_sum_less_than_one_with_default_remainder() {
        let cfg = cfg(&[(0.5, &["error"]), (0.3, &["warn", "info"])]);
        let dist = Distribution::build(&cfg).unwrap();
        assert!(dist.has_default);
        assert_eq!(dist.mapped_limit(0, 12), 6);
        assert_eq!(dist.mapped_limit(1, 12), 3);
        assert_eq!(dist.default_limit(12), 3);
    }

    #[test]
    fn sum_equal_to_one_has_no_default_slot() {
        let cfg = cfg(&[(0.5, &["a"]), (0.5, &["b"])]);
        let dist = Distribution::build(&cfg).unwrap();
        assert!(!dist.has_default);
        assert_eq!(dist.resolve("c"), Slot::Unconstrained);
    }

    #[test]
    fn rejects_overlapping_values() {
        let cfg = cfg(&[(0.5, &["error"]), (0.3, &["error"])]);
        assert!(Distribution::build(&cfg).is_err());
    }

    #[test]
    fn resolve_maps_known_and_unknown_values() {
        let cfg = cfg(&[(0.5, &["error"]), (0.3, &["warn", "info"])]);
        let dist = Distribution::build(&cfg).unwrap();
        assert_eq!(dist.resolve("error"), Slot::Mapped(0));
        assert_eq!(dist.resolve("warn"), Slot::Mapped(1));
        assert_eq!(dist.resolve("info"), Slot::Mapped(1));
        assert_eq!(dist.resolve("debug"), Slot::Default);
    }
}
