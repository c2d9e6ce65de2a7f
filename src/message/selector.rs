//! Boolean expressions over metadata: the `Select` action's matching
//! algebra.
//!
//! Grounded in `original_source/src/multio/message/MetadataMatcher.cc`
//! and `MetadataSelector.cc`, reworked from eckit's generic
//! `LocalConfiguration` visitor onto `serde_yaml::Value`. Leaf nodes
//! ([`MatchKeys`]) test a fixed set of key/allowed-values pairs;
//! internal nodes ([`MatchReduce`]) combine children with `And`/`Or`
//! and an optional negation. Construction recognizes the same
//! configuration sugar: `match:` (positive), `ignore:` (negated),
//! `any:` (Or), `all:` (And), `not:` (negate).

use serde_yaml::Value;

use crate::error::ConfigurationError;
use crate::message::metadata::{Metadata, MetadataValue};

/// Combinator applied at a [`MatchReduce`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduce {
    And,
    Or,
}

/// A leaf matcher: every listed key must be present in the metadata
/// and its value must be one of the allowed values.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchKeys {
    matcher: Vec<(String, Vec<MetadataValue>)>,
    negate: bool,
}

impl MatchKeys {
    fn from_mapping(mapping: &serde_yaml::Mapping, negate: bool) -> Result<Self, ConfigurationError> {
        let mut matcher = Vec::with_capacity(mapping.len());
        for (k, v) in mapping {
            let key = k
                .as_str()
                .ok_or_else(|| cfg_err("matcher keys must be strings"))?
                .to_string();
            let allowed = match v {
                Value::Sequence(items) => items
                    .iter()
                    .map(scalar_to_metadata_value)
                    .collect::<Result<Vec<_>, _>>()?,
                other => vec![scalar_to_metadata_value(other)?],
            };
            matcher.push((key, allowed));
        }
        Ok(Self { matcher, negate })
    }

    fn matches(&self, md: &Metadata) -> bool {
        let mut res = true;
        for (key, allowed) in &self.matcher {
            match md.get(key) {
                Ok(value) if allowed.iter().any(|a| a == value) => {}
                _ => {
                    res = false;
                    break;
                }
            }
        }
        if self.negate {
            !res
        } else {
            res
        }
    }
}

/// An internal node: reduces a list of children with `And`/`Or`, then
/// optionally negates the result.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchReduce {
    reduce: Reduce,
    negate: bool,
    children: Vec<MatchNode>,
}

impl MatchReduce {
    fn matches(&self, md: &Metadata) -> bool {
        let res = match self.reduce {
            Reduce::Or => self.children.iter().any(|c| c.matches(md)),
            Reduce::And => self.children.iter().all(|c| c.matches(md)),
        };
        if self.negate {
            !res
        } else {
            res
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum MatchNode {
    Keys(MatchKeys),
    Reduce(Box<MatchReduce>),
}

impl MatchNode {
    fn matches(&self, md: &Metadata) -> bool {
        match self {
            MatchNode::Keys(mk) => mk.matches(md),
            MatchNode::Reduce(mr) => mr.matches(md),
        }
    }
}

/// A compiled metadata selector: pure, side-effect free, safe to call
/// concurrently. An absent (empty) selector matches every message.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataSelector {
    root: Option<MatchNode>,
}

impl MetadataSelector {
    /// The selector that matches everything — used as the default
    /// when an action's configuration has no `match`/`ignore`/`any`/
    /// `all`/`not` block.
    pub fn match_all() -> Self {
        Self { root: None }
    }

    pub fn matches(&self, md: &Metadata) -> bool {
        match &self.root {
            None => true,
            Some(node) => node.matches(md),
        }
    }

    /// Parse from a YAML document, typically one action's configuration
    /// block. A mapping with none of the sugar keys is treated as
    /// "no selector" (matches everything), matching the ergonomics of
    /// an action that doesn't configure a filter at all.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigurationError> {
        let value: Value = serde_yaml::from_str(text).map_err(ConfigurationError::Parse)?;
        Self::from_value(&value)
    }

    pub fn from_value(cfg: &Value) -> Result<Self, ConfigurationError> {
        let mapping = match cfg.as_mapping() {
            Some(m) => m,
            None => return Ok(Self::match_all()),
        };
        if !has_selector_sugar(mapping) {
            return Ok(Self::match_all());
        }
        Ok(Self {
            root: Some(construct(cfg, false)?),
        })
    }
}

fn has_selector_sugar(mapping: &serde_yaml::Mapping) -> bool {
    ["match", "ignore", "any", "all", "not"]
        .iter()
        .any(|k| mapping.contains_key(Value::String((*k).to_string())))
}

fn construct(cfg: &Value, negate: bool) -> Result<MatchNode, ConfigurationError> {
    let mapping = cfg
        .as_mapping()
        .ok_or_else(|| cfg_err("selector block must be a mapping"))?;

    let get = |key: &str| mapping.get(Value::String(key.to_string()));
    let has_any = get("any").is_some();
    let has_all = get("all").is_some();
    let has_match = get("match").is_some();
    let has_ignore = get("ignore").is_some();
    let has_match_or_ignore = has_match || has_ignore;
    let has_not = get("not").is_some();

    let key_count = [has_any, has_all, has_not, has_match_or_ignore]
        .iter()
        .filter(|b| **b)
        .count();
    if key_count > 1 {
        return Err(cfg_err(
            "selector block can only have one of \"any\", \"all\", \"not\", or \"match\"/\"ignore\"",
        ));
    }
    if key_count == 0 {
        return Err(cfg_err(
            "selector block requires an \"any\", \"all\", \"not\", \"match\" or \"ignore\" key",
        ));
    }

    if has_not {
        return construct(&get("not").unwrap(), !negate);
    }

    if has_match_or_ignore {
        if has_match && has_ignore {
            let match_node = parse_match_value(&get("match").unwrap(), false)?;
            let ignore_node = parse_match_value(&get("ignore").unwrap(), true)?;
            return Ok(MatchNode::Reduce(Box::new(MatchReduce {
                reduce: Reduce::And,
                negate,
                children: vec![match_node, ignore_node],
            })));
        }
        let (key, predicate) = if has_match {
            ("match", negate)
        } else {
            ("ignore", !negate)
        };
        let node = parse_match_value(&get(key).unwrap(), predicate)?;
        return Ok(match node {
            MatchNode::Keys(mk) => MatchNode::Reduce(Box::new(MatchReduce {
                reduce: Reduce::Or,
                negate: false,
                children: vec![MatchNode::Keys(mk)],
            })),
            reduce @ MatchNode::Reduce(_) => reduce,
        });
    }

    // any / all
    let reduce = if has_all { Reduce::And } else { Reduce::Or };
    let key = if has_all { "all" } else { "any" };
    let items = get(key)
        .unwrap()
        .as_sequence()
        .cloned()
        .ok_or_else(|| cfg_err(&format!("selector block for \"{key}\" must be a list of maps")))?;

    let mut children = Vec::with_capacity(items.len());
    for item in &items {
        children.push(construct(item, false)?);
    }
    Ok(MatchNode::Reduce(Box::new(MatchReduce {
        reduce,
        negate,
        children,
    })))
}

fn parse_match_value(value: &Value, negate: bool) -> Result<MatchNode, ConfigurationError> {
    if let Some(mapping) = value.as_mapping() {
        return Ok(MatchNode::Keys(MatchKeys::from_mapping(mapping, negate)?));
    }
    if let Some(items) = value.as_sequence() {
        if items.len() == 1 {
            let mapping = items[0]
                .as_mapping()
                .ok_or_else(|| cfg_err("match/ignore list elements must be maps"))?;
            return Ok(MatchNode::Keys(MatchKeys::from_mapping(mapping, negate)?));
        }
        let mut children = Vec::with_capacity(items.len());
        for item in items {
            let mapping = item
                .as_mapping()
                .ok_or_else(|| cfg_err("match/ignore list elements must be maps"))?;
            children.push(MatchNode::Keys(MatchKeys::from_mapping(mapping, false)?));
        }
        return Ok(MatchNode::Reduce(Box::new(MatchReduce {
            reduce: Reduce::Or,
            negate,
            children,
        })));
    }
    Err(cfg_err("match/ignore block must be a map or a list of maps"))
}

fn scalar_to_metadata_value(value: &Value) -> Result<MetadataValue, ConfigurationError> {
    match value {
        Value::Bool(b) => Ok(MetadataValue::Bool(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(MetadataValue::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(MetadataValue::Double(f))
            } else {
                Err(cfg_err("unsupported numeric matcher value"))
            }
        }
        Value::String(s) => Ok(MetadataValue::String(s.clone())),
        _ => Err(cfg_err("matcher values must be scalars")),
    }
}

fn cfg_err(msg: &str) -> ConfigurationError {
    ConfigurationError::Parse(serde_yaml::Error::from(
        std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string()),
    ))
}
