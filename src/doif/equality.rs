use crate::errors::StructuralMismatch;

use super::node::{DoIfNode, FieldOp, FieldOpNode, LogicalNode};

fn mismatch(path: &str, reason: impl Into<String>) -> StructuralMismatch {
    StructuralMismatch::new(path, reason)
}

fn eq_field_op(a: &FieldOpNode, b: &FieldOpNode, path: &str) -> Result<(), StructuralMismatch> {
    if a.op != b.op {
        return Err(mismatch(path, format!("operator differs: {} vs {}", a.op.name(), b.op.name())));
    }
    if a.field != b.field {
        return Err(mismatch(path, format!("field differs: {:?} vs {:?}", a.field, b.field)));
    }
    if a.case_sensitive != b.case_sensitive {
        return Err(mismatch(path, "case_sensitive differs"));
    }

    if a.op == FieldOp::Regex {
        if a.regexes.len() != b.regexes.len() {
            return Err(mismatch(path, "regex value count differs"));
        }
        for (i, (ra, rb)) in a.regexes.iter().zip(b.regexes.iter()).enumerate() {
            if ra.as_str() != rb.as_str() {
                return Err(mismatch(
                    &format!("{path}/values[{i}]"),
                    format!("regex pattern differs: {:?} vs {:?}", ra.as_str(), rb.as_str()),
                ));
            }
        }
        return Ok(());
    }

    if a.op.is_len_op() {
        if a.len_comparand != b.len_comparand {
            return Err(mismatch(
                path,
                format!("length comparand differs: {} vs {}", a.len_comparand, b.len_comparand),
            ));
        }
        return Ok(());
    }

    if a.values != b.values {
        return Err(mismatch(path, "values differ"));
    }
    Ok(())
}

fn eq_logical(a: &LogicalNode, b: &LogicalNode, path: &str) -> Result<(), StructuralMismatch> {
    if a.op != b.op {
        return Err(mismatch(path, format!("operator differs: {} vs {}", a.op.name(), b.op.name())));
    }
    if a.children.len() != b.children.len() {
        return Err(mismatch(
            path,
            format!("operand count differs: {} vs {}", a.children.len(), b.children.len()),
        ));
    }
    for (i, (ca, cb)) in a.children.iter().zip(b.children.iter()).enumerate() {
        eq_node(ca, cb, &format!("{path}/operand[{i}]"))?;
    }
    Ok(())
}

fn eq_node(a: &DoIfNode, b: &DoIfNode, path: &str) -> Result<(), StructuralMismatch> {
    match (a, b) {
        (DoIfNode::FieldOp(fa), DoIfNode::FieldOp(fb)) => eq_field_op(fa, fb, path),
        (DoIfNode::Logical(la), DoIfNode::Logical(lb)) => eq_logical(la, lb, path),
        _ => Err(mismatch(path, "node kind differs (field-op vs logical)")),
    }
}

/// Structural comparison of two predicate trees. Returns a descriptive
/// error pinpointing the first difference by indented path through the
/// tree, rather than a bare boolean.
pub fn structural_eq(a: &DoIfNode, b: &DoIfNode) -> Result<(), StructuralMismatch> {
    eq_node(a, b, "root")
}
