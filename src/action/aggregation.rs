//! The `Aggregation` action: reassembles per-peer partial fields into
//! one global field.
//!
//! Grounded in `original_source/src/multio/action/actions/aggregation/
//! Aggregation.h`'s `MessageMap` (`msgMap_`, `processedParts_` via
//! `bookProcessedPart`/`contains`/`partsCount`/`addNew`/`reset`) and
//! the scatter rules in spec.md §4.4, which in turn match
//! `Domain::scatter_f64`'s transcription of `Domain.cc`.

use std::collections::{HashMap, HashSet};

use crate::action::ActionContext;
use crate::domain::{decode_payload, encode_payload};
use crate::error::{AggregationError, SimioError};
use crate::message::{Message, Peer, Precision, Tag};

struct FieldState {
    global: Vec<f64>,
    precision: Precision,
    global_size: u64,
    scope: String,
    template: Message,
}

/// One active field's aggregation state plus the bookkeeping needed to
/// detect duplicate and late partials, per spec.md §4.4's invariants.
pub struct Aggregation {
    /// How many vertical levels each Field payload is stacked into.
    /// Spec.md §4.4 scatters "per level" without specifying how a
    /// message declares its level count; this port reads it from
    /// `metadata["levels"]`, defaulting to a single level.
    default_level_count: usize,
    strict: bool,
    msg_map: HashMap<String, FieldState>,
    processed_parts: HashMap<String, HashSet<Peer>>,
    /// FieldIds already forwarded; a further partial for one of these
    /// is a bug upstream (a peer resending, or miscounted expected
    /// peers) and is reported as `UnexpectedLatePart` rather than
    /// silently restarting aggregation.
    completed: HashSet<String>,
    flush_counts: HashMap<String, usize>,
}

impl Aggregation {
    pub fn new(default_level_count: usize, strict: bool) -> Self {
        Self {
            default_level_count: default_level_count.max(1),
            strict,
            msg_map: HashMap::new(),
            processed_parts: HashMap::new(),
            completed: HashSet::new(),
            flush_counts: HashMap::new(),
        }
    }

    pub fn execute(
        &mut self,
        message: Message,
        ctx: &ActionContext,
    ) -> Result<Option<Message>, SimioError> {
        match message.tag {
            Tag::Field => self.handle_field(message, ctx),
            Tag::Domain => self.handle_domain(message, ctx),
            Tag::Flush | Tag::StepComplete => Ok(self.handle_flush(message, ctx)),
            _ => Ok(Some(message)),
        }
    }

    /// Register the partition carried in a `Domain` message's payload
    /// (spec.md §4.5's `add(message)`), then forward so a `Print` or
    /// `Sink` action later in the chain can still observe it.
    ///
    /// This is the Aggregation action's doorway into the Domain
    /// Registry: spec.md presents the registry (§4.5) immediately
    /// alongside Aggregation (§4.4), and every descriptor this action
    /// later needs in `handle_field`'s step 2 was registered through
    /// here first.
    fn handle_domain(
        &mut self,
        message: Message,
        ctx: &ActionContext,
    ) -> Result<Option<Message>, SimioError> {
        let name = match message.metadata.get_string("domain") {
            Ok(name) => name.to_string(),
            Err(_) => {
                tracing::warn!(peer = %message.source, "Domain message missing a \"domain\" metadata key, dropping");
                return Ok(None);
            }
        };
        let structured = message.metadata.get_bool("structured").unwrap_or(false);

        let descriptor = match crate::domain::Domain::parse(&message.payload, structured, message.global_size) {
            Ok(d) => d,
            Err(err) => return self.domain_failure(err),
        };

        if let Err(err) = ctx.domain_registry.add(&name, message.source.clone(), descriptor) {
            return self.domain_failure(err);
        }
        if let Err(err) = ctx.domain_registry.check_consistency(&name, message.global_size) {
            tracing::debug!(domain = %name, error = %err, "domain not yet consistent");
        }

        Ok(Some(message))
    }

    fn handle_field(
        &mut self,
        message: Message,
        ctx: &ActionContext,
    ) -> Result<Option<Message>, SimioError> {
        let field_id = message.field_id.clone();

        if self.completed.contains(&field_id) {
            tracing::warn!(field_id = %field_id, "partial arrived for a field already aggregated and forwarded");
            return Ok(None);
        }

        let domain_name = match message.metadata.get_string("domain") {
            Ok(name) => name.to_string(),
            Err(_) => {
                let err = crate::error::DomainError::UnknownDomain {
                    name: "<unset>".to_string(),
                    peer: message.source.to_string(),
                };
                return self.domain_failure(err);
            }
        };

        let domain = match ctx.domain_registry.get(&domain_name, &message.source) {
            Some(d) => d,
            None => {
                let err = crate::error::DomainError::UnknownDomain {
                    name: domain_name.clone(),
                    peer: message.source.to_string(),
                };
                return self.domain_failure(err);
            }
        };
        ctx.domain_registry.warn_if_inconsistent(&domain_name);

        let level_count = message
            .metadata
            .get_long_or("levels", self.default_level_count as i64)
            .map(|v| v.max(1) as usize)
            .unwrap_or(self.default_level_count);

        let state = self.msg_map.entry(field_id.clone()).or_insert_with(|| {
            let mut template = message.clone();
            template.payload = Vec::new();
            FieldState {
                global: vec![0.0; message.global_size as usize * level_count],
                precision: message.precision,
                global_size: message.global_size,
                scope: domain_name.clone(),
                template,
            }
        });

        let local = decode_payload(&message.payload, message.precision);
        if let Err(err) = domain.scatter_f64(&local, &mut state.global, state.global_size as usize, level_count) {
            tracing::warn!(field_id = %field_id, error = %err, "scatter failed, discarding partial");
            return Ok(None);
        }

        let parts = self.processed_parts.entry(field_id.clone()).or_default();
        if !parts.insert(message.source.clone()) {
            tracing::warn!(field_id = %field_id, peer = %message.source, "{}", AggregationError::DuplicatePart(field_id.clone()));
            return Ok(None);
        }

        let expected = ctx.domain_registry.peer_count(&domain_name);
        if parts.len() >= expected && expected > 0 {
            let global = std::mem::take(&mut state.global);
            let precision = state.precision;
            let mut out = state.template.clone();
            out.payload = encode_payload(&global, precision);
            out.source = out.destination.clone();

            self.msg_map.remove(&field_id);
            self.processed_parts.remove(&field_id);
            self.completed.insert(field_id);
            return Ok(Some(out));
        }

        Ok(None)
    }

    fn handle_flush(&mut self, message: Message, ctx: &ActionContext) -> Option<Message> {
        let scope = message.metadata.get_string("domain").ok().map(str::to_string);
        // A `StepComplete`/`Flush` with no `"domain"` key is a global,
        // all-domains barrier (`Client::write_step_complete` never
        // attaches one) rather than a barrier scoped to a domain named
        // literally "default", so it's counted against every distinct
        // peer registered under any domain, not a registry lookup for
        // a domain that was never registered.
        let expected = match &scope {
            Some(name) => ctx.domain_registry.peer_count(name).max(1),
            None => ctx.domain_registry.distinct_peer_count().max(1),
        };
        let key = scope.clone().unwrap_or_else(|| "\0global".to_string());
        let counter = self.flush_counts.entry(key).or_insert(0);
        *counter += 1;

        if *counter < expected {
            return None;
        }
        *counter = 0;

        let in_scope: Vec<String> = self
            .msg_map
            .iter()
            .filter(|(_, s)| scope.as_deref().map_or(true, |name| s.scope == name))
            .map(|(id, _)| id.clone())
            .collect();

        for field_id in in_scope {
            let have = self.processed_parts.get(&field_id).map(HashSet::len).unwrap_or(0);
            tracing::warn!(
                "{}",
                AggregationError::IncompleteAggregation {
                    field_id: field_id.clone(),
                    have,
                    expected,
                }
            );
            self.msg_map.remove(&field_id);
            self.processed_parts.remove(&field_id);
        }

        Some(message)
    }

    fn domain_failure(&self, err: crate::error::DomainError) -> Result<Option<Message>, SimioError> {
        if self.strict {
            return Err(SimioError::Domain(err));
        }
        tracing::warn!(error = %err, "dropping field with unresolved domain");
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Domain, DomainRegistry};
    use crate::message::Metadata;

    fn ctx_with_domain(registry: &DomainRegistry) -> ActionContext {
        ActionContext {
            domain_registry: registry.clone(),
        }
    }

    fn field_message(source: Peer, field_id_step: i64, payload: Vec<f64>) -> Message {
        let mut md = Metadata::new();
        md.set("precision", "double");
        md.set("domain", "grid");
        md.set("param", 130i64);
        md.set("step", field_id_step);
        Message::new(
            Tag::Field,
            source,
            Peer::new("servers", 0),
            md,
            encode_payload(&payload, Precision::Double),
            8,
        )
        .unwrap()
    }

    #[test]
    fn two_clients_produce_one_global_field() {
        let registry = DomainRegistry::new();
        let c0 = Peer::new("clients", 0);
        let c1 = Peer::new("clients", 1);
        registry.add("grid", c0.clone(), Domain::Unstructured(vec![0, 2, 4, 6])).unwrap();
        registry.add("grid", c1.clone(), Domain::Unstructured(vec![1, 3, 5, 7])).unwrap();

        let ctx = ctx_with_domain(&registry);
        let mut agg = Aggregation::new(1, false);

        let a = field_message(c0, 1, vec![0.0, 2.0, 4.0, 6.0]);
        let b = field_message(c1, 1, vec![1.0, 3.0, 5.0, 7.0]);

        assert!(agg.execute(a, &ctx).unwrap().is_none());
        let forwarded = agg.execute(b, &ctx).unwrap().unwrap();
        let values = decode_payload(&forwarded.payload, Precision::Double);
        assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    fn domain_message(source: Peer, indices: &[i64], global_size: u64) -> Message {
        let mut md = Metadata::new();
        md.set("precision", "double");
        md.set("domain", "grid");
        md.set("structured", false);
        let mut payload = Vec::with_capacity(indices.len() * 8);
        for &idx in indices {
            payload.extend_from_slice(&idx.to_le_bytes());
        }
        Message::new(Tag::Domain, source, Peer::new("servers", 0), md, payload, global_size).unwrap()
    }

    #[test]
    fn domain_message_registers_before_field_arrives() {
        let ctx = ctx_with_domain(&DomainRegistry::new());
        let mut agg = Aggregation::new(1, false);

        let c0 = Peer::new("clients", 0);
        let c1 = Peer::new("clients", 1);
        let d0 = domain_message(c0.clone(), &[0, 2, 4, 6], 8);
        let d1 = domain_message(c1.clone(), &[1, 3, 5, 7], 8);
        assert!(agg.execute(d0, &ctx).unwrap().is_some());
        assert!(agg.execute(d1, &ctx).unwrap().is_some());
        assert_eq!(ctx.domain_registry.peer_count("grid"), 2);

        let a = field_message(c0, 1, vec![0.0, 2.0, 4.0, 6.0]);
        let b = field_message(c1, 1, vec![1.0, 3.0, 5.0, 7.0]);
        assert!(agg.execute(a, &ctx).unwrap().is_none());
        let forwarded = agg.execute(b, &ctx).unwrap().unwrap();
        let values = decode_payload(&forwarded.payload, Precision::Double);
        assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn malformed_domain_payload_is_dropped_not_fatal() {
        let ctx = ctx_with_domain(&DomainRegistry::new());
        let mut agg = Aggregation::new(1, false);

        let mut md = Metadata::new();
        md.set("precision", "double");
        md.set("domain", "grid");
        md.set("structured", false);
        // Seven bytes is not a multiple of 8 — malformed.
        let bad = Message::new(Tag::Domain, Peer::new("clients", 0), Peer::new("servers", 0), md, vec![0u8; 7], 8).unwrap();
        assert!(agg.execute(bad, &ctx).unwrap().is_none());
    }

    #[test]
    fn late_partial_after_completion_is_discarded() {
        let registry = DomainRegistry::new();
        let c0 = Peer::new("clients", 0);
        registry.add("grid", c0.clone(), Domain::Unstructured(vec![0, 1])).unwrap();
        let ctx = ctx_with_domain(&registry);
        let mut agg = Aggregation::new(1, false);

        let a = field_message(c0.clone(), 1, vec![10.0, 20.0]);
        let forwarded = agg.execute(a, &ctx).unwrap();
        assert!(forwarded.is_some());

        let late = field_message(Peer::new("clients", 9), 1, vec![30.0, 40.0]);
        assert!(agg.execute(late, &ctx).unwrap().is_none());
    }

    fn step_complete(source: Peer) -> Message {
        let md = Metadata::new();
        Message::new(Tag::StepComplete, source, Peer::new("servers", 0), md, Vec::new(), 0).unwrap()
    }

    #[test]
    fn flush_with_no_domain_key_waits_for_every_known_peer() {
        let registry = DomainRegistry::new();
        let c0 = Peer::new("clients", 0);
        let c1 = Peer::new("clients", 1);
        registry.add("grid", c0.clone(), Domain::Unstructured(vec![0])).unwrap();
        registry.add("grid", c1.clone(), Domain::Unstructured(vec![1])).unwrap();
        let ctx = ctx_with_domain(&registry);
        let mut agg = Aggregation::new(1, false);

        // Neither StepComplete carries a "domain" key, matching
        // Client::write_step_complete's actual shape. The barrier must
        // not fire after only the first of two known client peers.
        assert!(agg.execute(step_complete(c0), &ctx).unwrap().is_none());
        let forwarded = agg.execute(step_complete(c1), &ctx).unwrap();
        assert!(forwarded.is_some());
    }

    #[test]
    fn duplicate_part_from_same_peer_does_not_overwrite() {
        let registry = DomainRegistry::new();
        let c0 = Peer::new("clients", 0);
        let c1 = Peer::new("clients", 1);
        registry.add("grid", c0.clone(), Domain::Unstructured(vec![0])).unwrap();
        registry.add("grid", c1.clone(), Domain::Unstructured(vec![1])).unwrap();
        let ctx = ctx_with_domain(&registry);
        let mut agg = Aggregation::new(1, false);

        let first = field_message(c0.clone(), 1, vec![1.0]);
        let field_id = first.field_id.clone();
        assert!(agg.execute(first, &ctx).unwrap().is_none());

        let duplicate = field_message(c0, 1, vec![99.0]);
        assert!(agg.execute(duplicate, &ctx).unwrap().is_none());
        // Still waiting on c1; aggregation not complete, so the
        // overwrite attempt from c0 must not have completed early.
        assert_eq!(agg.processed_parts.get(&field_id).map(HashSet::len), Some(1));
    }
}
