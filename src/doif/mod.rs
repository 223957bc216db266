//! The DoIf predicate engine: a tree-structured, compiled predicate
//! evaluator used to decide whether an action applies to a given event.

pub mod build;
pub mod equality;
pub mod node;

use crate::config::DoIfConfig;
use crate::errors::{ConfigError, StructuralMismatch};
use crate::event::Event;

use node::DoIfNode;

/// A compiled, immutable predicate tree.
pub struct DoIf {
    root: DoIfNode,
}

impl DoIf {
    /// Builds a predicate tree from configuration. Predicate trees are
    /// built once at pipeline start and are immutable thereafter.
    pub fn build(cfg: &DoIfConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            root: DoIfNode::from_config(cfg)?,
        })
    }

    /// Evaluates the tree against an event. Pure and idempotent: depends
    /// only on the tree and the byte content of the fields it references.
    pub fn check(&self, event: &dyn Event) -> bool {
        self.root.check(event)
    }

    /// Structural comparison against another tree. Used by tests and by
    /// hosts reconciling a config reload against the running tree.
    pub fn structural_eq(&self, other: &DoIf) -> Result<(), StructuralMismatch> {
        equality::structural_eq(&self.root, &other.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::JsonEvent;
    use serde_json::json;

    fn field_op_cfg(op: &str, field: &str, values: &[&str], case_sensitive: bool) -> DoIfConfig {
        DoIfConfig::FieldOp {
            op: op.to_string(),
            field: field.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
            case_sensitive,
        }
    }

    #[test]
    fn equal_case_insensitive_end_to_end() {
        let cfg = field_op_cfg("equal", "pod", &["Test-Pod"], false);
        let tree = DoIf::build(&cfg).unwrap();
        assert!(tree.check(&JsonEvent::new(json!({"pod": "test-pod"}))));
        assert!(!tree.check(&JsonEvent::new(json!({"pod": "other"}))));
        assert!(!tree.check(&JsonEvent::new(json!({"service": "x"}))));
    }

    #[test]
    fn regex_and_not_end_to_end() {
        let cfg = DoIfConfig::Logical {
            op: "not".to_string(),
            operands: vec![field_op_cfg("regex", "pod", &["^my-"], true)],
        };
        let tree = DoIf::build(&cfg).unwrap();
        assert!(!tree.check(&JsonEvent::new(json!({"pod": "my-x"}))));
        assert!(tree.check(&JsonEvent::new(json!({"pod": "other"}))));
    }

    #[test]
    fn structural_eq_is_reflexive_and_detects_drift() {
        let cfg = field_op_cfg("equal", "pod", &["x"], true);
        let a = DoIf::build(&cfg).unwrap();
        let b = DoIf::build(&cfg).unwrap();
        assert!(a.structural_eq(&b).is_ok());

        let drifted_cfg = field_op_cfg("equal", "pod", &["y"], true);
        let c = DoIf::build(&drifted_cfg).unwrap();
        assert!(a.structural_eq(&c).is_err());
    }

    #[test]
    fn build_rejects_invalid_config() {
        let cfg = field_op_cfg("equal", "", &["x"], true);
        assert!(DoIf::build(&cfg).is_err());
    }
}
