//! Node filter predicates.
//!
//! Filters are plain values that can be evaluated against a [`Node`]. A
//! textual form is accepted for operator-facing queries:
//!
//! | Expression        | Meaning                                   |
//! |-------------------|-------------------------------------------|
//! | `id=42`           | node ID equals 42                         |
//! | `meta=h1\|hw`     | meta equals the value                     |
//! | `meta~=h1`        | meta contains the value                   |
//! | `tier0=server1`   | tier at level 0 equals the value          |
//! | `tier1~=zone`     | tier at level 1 starts with the value     |
//! | `tier~=zone`      | any tier starts with the value            |
//! | `address0~=10.0.` | address at index 0 starts with the value  |
//! | `address=a:1`     | any address equals the value              |

use crate::error::{RingError, RingResult};
use crate::node::{Node, NodeId};
use std::fmt;
use std::str::FromStr;

/// How a string field is compared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextMatch {
    /// Whole-value equality.
    Exact(String),
    /// The field starts with the value.
    Prefix(String),
    /// The field contains the value.
    Contains(String),
}

impl TextMatch {
    /// Test a field against this matcher.
    pub fn is_match(&self, field: &str) -> bool {
        match self {
            TextMatch::Exact(v) => field == v,
            TextMatch::Prefix(v) => field.starts_with(v.as_str()),
            TextMatch::Contains(v) => field.contains(v.as_str()),
        }
    }

    fn op_and_value(&self) -> (&'static str, &str) {
        match self {
            TextMatch::Exact(v) => ("=", v),
            TextMatch::Prefix(v) | TextMatch::Contains(v) => ("~=", v),
        }
    }
}

/// A predicate over nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeFilter {
    /// Node ID equals.
    Id(NodeId),
    /// Meta string match.
    Meta(TextMatch),
    /// Tier match, at a specific level or at any level.
    Tier {
        /// Tier level, `None` for any.
        level: Option<usize>,
        /// Comparison.
        matcher: TextMatch,
    },
    /// Address match, at a specific index or at any index.
    Address {
        /// Address index, `None` for any.
        index: Option<usize>,
        /// Comparison.
        matcher: TextMatch,
    },
}

impl NodeFilter {
    /// Node ID equals `id`.
    pub fn id(id: NodeId) -> Self {
        NodeFilter::Id(id)
    }

    /// Meta contains `value`.
    pub fn meta_contains(value: impl Into<String>) -> Self {
        NodeFilter::Meta(TextMatch::Contains(value.into()))
    }

    /// Tier at `level` equals `value`.
    pub fn tier_eq(level: usize, value: impl Into<String>) -> Self {
        NodeFilter::Tier {
            level: Some(level),
            matcher: TextMatch::Exact(value.into()),
        }
    }

    /// Tier at `level` starts with `prefix`.
    pub fn tier_prefix(level: usize, prefix: impl Into<String>) -> Self {
        NodeFilter::Tier {
            level: Some(level),
            matcher: TextMatch::Prefix(prefix.into()),
        }
    }

    /// Address at `index` starts with `prefix`.
    pub fn address_prefix(index: usize, prefix: impl Into<String>) -> Self {
        NodeFilter::Address {
            index: Some(index),
            matcher: TextMatch::Prefix(prefix.into()),
        }
    }

    /// Any address equals `value`.
    pub fn address_eq(value: impl Into<String>) -> Self {
        NodeFilter::Address {
            index: None,
            matcher: TextMatch::Exact(value.into()),
        }
    }

    /// Evaluate this filter against a node.
    pub fn matches(&self, node: &Node) -> bool {
        match self {
            NodeFilter::Id(id) => node.id() == *id,
            NodeFilter::Meta(m) => m.is_match(node.meta()),
            NodeFilter::Tier { level, matcher } => match level {
                Some(level) => node.tier(*level).is_some_and(|t| matcher.is_match(t)),
                None => node.tiers().iter().any(|t| matcher.is_match(t)),
            },
            NodeFilter::Address { index, matcher } => match index {
                Some(index) => node.address(*index).is_some_and(|a| matcher.is_match(a)),
                None => node.addresses().iter().any(|a| matcher.is_match(a)),
            },
        }
    }
}

impl fmt::Display for NodeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let position = |p: &Option<usize>| p.map(|p| p.to_string()).unwrap_or_default();
        match self {
            NodeFilter::Id(id) => write!(f, "id={id}"),
            NodeFilter::Meta(m) => {
                let (op, v) = m.op_and_value();
                write!(f, "meta{op}{v}")
            }
            NodeFilter::Tier { level, matcher } => {
                let (op, v) = matcher.op_and_value();
                write!(f, "tier{}{op}{v}", position(level))
            }
            NodeFilter::Address { index, matcher } => {
                let (op, v) = matcher.op_and_value();
                write!(f, "address{}{op}{v}", position(index))
            }
        }
    }
}

impl FromStr for NodeFilter {
    type Err = RingError;

    fn from_str(expr: &str) -> RingResult<Self> {
        let invalid = |cause: &str| RingError::InvalidFilter {
            expr: expr.to_string(),
            cause: cause.to_string(),
        };

        let eq = expr.find('=').ok_or_else(|| invalid("missing '='"))?;
        let fuzzy = eq > 0 && expr.as_bytes()[eq - 1] == b'~';
        let key = if fuzzy { &expr[..eq - 1] } else { &expr[..eq] };
        let value = &expr[eq + 1..];

        if value.is_empty() {
            return Err(invalid("empty value"));
        }

        if key == "id" {
            if fuzzy {
                return Err(invalid("id only supports '='"));
            }
            let id = value.parse().map_err(|_| invalid("id is not a number"))?;
            return Ok(NodeFilter::Id(id));
        }

        if key == "meta" {
            let matcher = if fuzzy {
                TextMatch::Contains(value.to_string())
            } else {
                TextMatch::Exact(value.to_string())
            };
            return Ok(NodeFilter::Meta(matcher));
        }

        let matcher = if fuzzy {
            TextMatch::Prefix(value.to_string())
        } else {
            TextMatch::Exact(value.to_string())
        };

        let parse_position = |suffix: &str| -> RingResult<Option<usize>> {
            if suffix.is_empty() {
                Ok(None)
            } else {
                suffix
                    .parse()
                    .map(Some)
                    .map_err(|_| invalid("position is not a number"))
            }
        };

        if let Some(suffix) = key.strip_prefix("tier") {
            return Ok(NodeFilter::Tier {
                level: parse_position(suffix)?,
                matcher,
            });
        }
        if let Some(suffix) = key.strip_prefix("address") {
            return Ok(NodeFilter::Address {
                index: parse_position(suffix)?,
                matcher,
            });
        }

        Err(invalid("unknown field"))
    }
}

/// Something that holds an ordered collection of nodes.
pub trait NodeSet {
    /// All nodes, in insertion order.
    fn nodes(&self) -> &[Node];

    /// Look up a node by ID.
    fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes().iter().find(|n| n.id() == id)
    }

    /// Nodes matching every filter. An empty filter list matches all nodes.
    fn filter(&self, filters: &[NodeFilter]) -> Vec<&Node> {
        self.nodes()
            .iter()
            .filter(|n| filters.iter().all(|f| f.matches(n)))
            .collect()
    }
}

impl NodeSet for [Node] {
    fn nodes(&self) -> &[Node] {
        self
    }
}
