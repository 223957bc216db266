use std::collections::HashMap;

use regex::bytes::Regex;

use crate::event::Event;

/// Field-level comparison kind. Ordering here mirrors construction order,
/// not evaluation precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    Equal,
    Contains,
    Prefix,
    Suffix,
    Regex,
    LenLt,
    LenLe,
    LenGt,
    LenGe,
    LenEq,
    LenNe,
}

impl FieldOp {
    pub fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "equal" => FieldOp::Equal,
            "contains" => FieldOp::Contains,
            "prefix" => FieldOp::Prefix,
            "suffix" => FieldOp::Suffix,
            "regex" => FieldOp::Regex,
            "len <" => FieldOp::LenLt,
            "len <=" => FieldOp::LenLe,
            "len >" => FieldOp::LenGt,
            "len >=" => FieldOp::LenGe,
            "len ==" => FieldOp::LenEq,
            "len !=" => FieldOp::LenNe,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            FieldOp::Equal => "equal",
            FieldOp::Contains => "contains",
            FieldOp::Prefix => "prefix",
            FieldOp::Suffix => "suffix",
            FieldOp::Regex => "regex",
            FieldOp::LenLt => "len <",
            FieldOp::LenLe => "len <=",
            FieldOp::LenGt => "len >",
            FieldOp::LenGe => "len >=",
            FieldOp::LenEq => "len ==",
            FieldOp::LenNe => "len !=",
        }
    }

    /// Ops for which the cached `min_len`/`max_len` fast path applies —
    /// everything except regex and the length comparators, which compare
    /// the length directly.
    fn has_fast_path(self) -> bool {
        matches!(
            self,
            FieldOp::Equal | FieldOp::Contains | FieldOp::Prefix | FieldOp::Suffix
        )
    }

    pub(crate) fn is_len_op(self) -> bool {
        matches!(
            self,
            FieldOp::LenLt | FieldOp::LenLe | FieldOp::LenGt | FieldOp::LenGe | FieldOp::LenEq | FieldOp::LenNe
        )
    }
}

/// Logical combinator kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    Or,
    And,
    Not,
}

impl LogicalOp {
    pub fn parse(op: &str) -> Option<Self> {
        Some(match op {
            "or" => LogicalOp::Or,
            "and" => LogicalOp::And,
            "not" => LogicalOp::Not,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            LogicalOp::Or => "or",
            LogicalOp::And => "and",
            LogicalOp::Not => "not",
        }
    }
}

/// A field-op leaf: an operator, the field path it reads, and
/// operator-specific comparison data.
pub struct FieldOpNode {
    pub(crate) op: FieldOp,
    pub(crate) field: String,
    pub(crate) field_path: Vec<String>,
    pub(crate) case_sensitive: bool,
    /// Raw comparison values, case-folded if `!case_sensitive`. Used by
    /// contains/prefix/suffix directly and indexed by length for equal.
    pub(crate) values: Vec<Vec<u8>>,
    pub(crate) values_by_len: HashMap<usize, Vec<Vec<u8>>>,
    pub(crate) regexes: Vec<Regex>,
    pub(crate) min_len: usize,
    pub(crate) max_len: usize,
    pub(crate) len_comparand: i64,
}

/// A logical internal node: a combinator and its ordered children.
pub struct LogicalNode {
    pub(crate) op: LogicalOp,
    pub(crate) children: Vec<DoIfNode>,
}

/// A node in a predicate tree — either a field-level comparison or a
/// logical combination of child nodes.
pub enum DoIfNode {
    FieldOp(FieldOpNode),
    Logical(LogicalNode),
}

fn ascii_lower(data: &[u8]) -> Vec<u8> {
    data.iter().map(|b| b.to_ascii_lowercase()).collect()
}

impl FieldOpNode {
    fn resolve<'e>(&self, event: &'e dyn Event) -> Option<Vec<u8>> {
        let path: Vec<&str> = self.field_path.iter().map(String::as_str).collect();
        event.dig(&path)
    }

    pub fn check(&self, event: &dyn Event) -> bool {
        let data = self.resolve(event);

        if self.op.has_fast_path() {
            let len = data.as_ref().map_or(0, Vec::len);
            if len < self.min_len {
                return false;
            }
        }

        match self.op {
            FieldOp::Equal => self.check_equal(data.as_deref()),
            FieldOp::Contains => self.check_contains(data.as_deref()),
            FieldOp::Prefix => self.check_prefix(data.as_deref()),
            FieldOp::Suffix => self.check_suffix(data.as_deref()),
            FieldOp::Regex => self.check_regex(data.as_deref()),
            _ if self.op.is_len_op() => self.check_len(data.as_deref()),
            _ => unreachable!("exhaustive over FieldOp"),
        }
    }

    fn check_equal(&self, data: Option<&[u8]>) -> bool {
        // A missing field (null) matches only a null configured value; the
        // values list never contains one, so a missing field never matches.
        let Some(data) = data else {
            return false;
        };
        let folded = if self.case_sensitive {
            data.to_vec()
        } else {
            ascii_lower(data)
        };
        match self.values_by_len.get(&folded.len()) {
            Some(candidates) => candidates.iter().any(|v| v.as_slice() == folded.as_slice()),
            None => false,
        }
    }

    fn fold(&self, data: Option<&[u8]>) -> Vec<u8> {
        let data = data.unwrap_or(&[]);
        if self.case_sensitive {
            data.to_vec()
        } else {
            ascii_lower(data)
        }
    }

    fn check_contains(&self, data: Option<&[u8]>) -> bool {
        let folded = self.fold(data);
        self.values
            .iter()
            .any(|v| contains_subslice(&folded, v))
    }

    fn check_prefix(&self, data: Option<&[u8]>) -> bool {
        let folded = self.fold(data);
        let window_len = folded.len().min(self.max_len);
        let window = &folded[..window_len];
        self.values.iter().any(|v| window.starts_with(v.as_slice()))
    }

    fn check_suffix(&self, data: Option<&[u8]>) -> bool {
        let folded = self.fold(data);
        let start = folded.len().saturating_sub(self.max_len);
        let window = &folded[start..];
        self.values.iter().any(|v| window.ends_with(v.as_slice()))
    }

    fn check_regex(&self, data: Option<&[u8]>) -> bool {
        let data = data.unwrap_or(&[]);
        self.regexes.iter().any(|r| r.is_match(data))
    }

    fn check_len(&self, data: Option<&[u8]>) -> bool {
        let len = data.map_or(0, <[u8]>::len) as i64;
        match self.op {
            FieldOp::LenLt => len < self.len_comparand,
            FieldOp::LenLe => len <= self.len_comparand,
            FieldOp::LenGt => len > self.len_comparand,
            FieldOp::LenGe => len >= self.len_comparand,
            FieldOp::LenEq => len == self.len_comparand,
            FieldOp::LenNe => len != self.len_comparand,
            _ => unreachable!(),
        }
    }
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() {
        return true;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

impl LogicalNode {
    pub fn check(&self, event: &dyn Event) -> bool {
        match self.op {
            LogicalOp::Or => self.children.iter().any(|c| c.check(event)),
            LogicalOp::And => self.children.iter().all(|c| c.check(event)),
            LogicalOp::Not => !self.children[0].check(event),
        }
    }
}

impl DoIfNode {
    pub fn check(&self, event: &dyn Event) -> bool {
        match self {
            DoIfNode::FieldOp(node) => node.check(event),
            DoIfNode::Logical(node) => node.check(event),
        }
    }
}
