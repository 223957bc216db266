use std::collections::HashMap;

use regex::bytes::Regex;

use crate::config::DoIfConfig;
use crate::errors::ConfigError;
use crate::event::parse_field_path;

use super::node::{DoIfNode, FieldOp, FieldOpNode, LogicalNode, LogicalOp};

fn ascii_lower(data: &[u8]) -> Vec<u8> {
    data.iter().map(|b| b.to_ascii_lowercase()).collect()
}

/// Builds a field-op leaf from raw construction parameters, mirroring the
/// original `NewFieldOpNode` factory: validates the operator name, the
/// field path, and the values list, then pre-computes the operator-specific
/// comparison data (length index, fast-path bounds, compiled regexes).
pub fn build_field_op(
    op: &str,
    field: &str,
    case_sensitive: bool,
    values: Vec<String>,
) -> Result<FieldOpNode, ConfigError> {
    let field_op = FieldOp::parse(op).ok_or_else(|| ConfigError::InvalidFieldOp {
        op: op.to_string(),
        reason: "unrecognised operator".to_string(),
    })?;

    if field.is_empty() {
        return Err(ConfigError::InvalidFieldOp {
            op: op.to_string(),
            reason: "field path must not be empty".to_string(),
        });
    }
    if values.is_empty() {
        return Err(ConfigError::InvalidFieldOp {
            op: op.to_string(),
            reason: "values list must not be empty".to_string(),
        });
    }

    let field_path = parse_field_path(field);
    let raw_values: Vec<Vec<u8>> = values.iter().map(|v| v.clone().into_bytes()).collect();

    let mut node = FieldOpNode {
        op: field_op,
        field: field.to_string(),
        field_path,
        case_sensitive,
        values: Vec::new(),
        values_by_len: HashMap::new(),
        regexes: Vec::new(),
        min_len: 0,
        max_len: 0,
        len_comparand: 0,
    };

    match field_op {
        FieldOp::Equal => {
            let folded: Vec<Vec<u8>> = raw_values
                .iter()
                .map(|v| if case_sensitive { v.clone() } else { ascii_lower(v) })
                .collect();
            node.min_len = folded.iter().map(Vec::len).min().unwrap_or(0);
            node.max_len = folded.iter().map(Vec::len).max().unwrap_or(0);
            let mut by_len: HashMap<usize, Vec<Vec<u8>>> = HashMap::new();
            for v in folded.iter().cloned() {
                by_len.entry(v.len()).or_default().push(v);
            }
            node.values_by_len = by_len;
            node.values = folded;
        }
        FieldOp::Contains | FieldOp::Prefix | FieldOp::Suffix => {
            let folded: Vec<Vec<u8>> = raw_values
                .iter()
                .map(|v| if case_sensitive { v.clone() } else { ascii_lower(v) })
                .collect();
            node.min_len = folded.iter().map(Vec::len).min().unwrap_or(0);
            node.max_len = folded.iter().map(Vec::len).max().unwrap_or(0);
            node.values = folded;
        }
        FieldOp::Regex => {
            let mut regexes = Vec::with_capacity(values.len());
            for pattern in &values {
                let compiled = Regex::new(pattern).map_err(|source| ConfigError::BadRegex {
                    pattern: pattern.clone(),
                    source,
                })?;
                regexes.push(compiled);
            }
            node.regexes = regexes;
        }
        FieldOp::LenLt | FieldOp::LenLe | FieldOp::LenGt | FieldOp::LenGe | FieldOp::LenEq | FieldOp::LenNe => {
            if values.len() != 1 {
                return Err(ConfigError::InvalidFieldOp {
                    op: op.to_string(),
                    reason: format!("length operator requires exactly one value, got {}", values.len()),
                });
            }
            let comparand: i64 = values[0].trim().parse().map_err(|_| ConfigError::InvalidFieldOp {
                op: op.to_string(),
                reason: format!("value {:?} is not a parseable integer", values[0]),
            })?;
            node.len_comparand = comparand;
        }
    }

    Ok(node)
}

/// Builds a logical internal node, mirroring `NewLogicalNode`: `not`
/// requires exactly one operand, `and`/`or` require at least one.
pub fn build_logical(op: &str, children: Vec<DoIfNode>) -> Result<LogicalNode, ConfigError> {
    let logical_op = LogicalOp::parse(op).ok_or_else(|| ConfigError::InvalidLogicalOp {
        op: op.to_string(),
        reason: "unrecognised operator".to_string(),
    })?;

    match logical_op {
        LogicalOp::Not if children.len() != 1 => {
            return Err(ConfigError::InvalidLogicalOp {
                op: op.to_string(),
                reason: format!("not requires exactly one operand, got {}", children.len()),
            })
        }
        LogicalOp::And | LogicalOp::Or if children.is_empty() => {
            return Err(ConfigError::InvalidLogicalOp {
                op: op.to_string(),
                reason: "requires at least one operand".to_string(),
            })
        }
        _ => {}
    }

    Ok(LogicalNode {
        op: logical_op,
        children,
    })
}

impl DoIfNode {
    pub fn from_config(cfg: &DoIfConfig) -> Result<DoIfNode, ConfigError> {
        match cfg {
            DoIfConfig::FieldOp {
                op,
                field,
                values,
                case_sensitive,
            } => Ok(DoIfNode::FieldOp(build_field_op(
                op,
                field,
                *case_sensitive,
                values.clone(),
            )?)),
            DoIfConfig::Logical { op, operands } => {
                let children = operands
                    .iter()
                    .map(DoIfNode::from_config)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(DoIfNode::Logical(build_logical(op, children)?))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_field() {
        let err = build_field_op("equal", "", true, vec!["x".to_string()]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFieldOp { .. }));
    }

    #[test]
    fn rejects_empty_values() {
        let err = build_field_op("equal", "pod", true, vec![]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFieldOp { .. }));
    }

    #[test]
    fn rejects_unknown_operator() {
        let err = build_field_op("startswith", "pod", true, vec!["x".to_string()]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFieldOp { .. }));
    }

    #[test]
    fn rejects_bad_regex() {
        let err = build_field_op("regex", "pod", true, vec!["(".to_string()]).unwrap_err();
        assert!(matches!(err, ConfigError::BadRegex { .. }));
    }

    #[test]
    fn rejects_len_op_with_multiple_values() {
        let err = build_field_op("len <", "pod", true, vec!["1".to_string(), "2".to_string()]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFieldOp { .. }));
    }

    #[test]
    fn rejects_len_op_with_unparseable_value() {
        let err = build_field_op("len <", "pod", true, vec!["nope".to_string()]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFieldOp { .. }));
    }

    #[test]
    fn not_requires_exactly_one_child() {
        let err = build_logical("not", vec![]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLogicalOp { .. }));
    }

    #[test]
    fn and_requires_at_least_one_child() {
        let err = build_logical("and", vec![]).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidLogicalOp { .. }));
    }

    #[test]
    fn from_config_builds_nested_tree() {
        let cfg = DoIfConfig::Logical {
            op: "not".to_string(),
            operands: vec![DoIfConfig::FieldOp {
                op: "regex".to_string(),
                field: "pod".to_string(),
                values: vec!["^my-".to_string()],
                case_sensitive: true,
            }],
        };
        let node = DoIfNode::from_config(&cfg).unwrap();
        assert!(matches!(node, DoIfNode::Logical(_)));
    }
}
