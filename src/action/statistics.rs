//! The `Statistics` action: per-`fieldId` running reductions over a
//! rolling window, emitted on the window boundary (spec.md §4.3).
//!
//! The window boundary concept is named but not defined by spec.md;
//! `original_source/src/multio/action/Period.h` supplies the concrete
//! shape reused here: a start point plus a duration, with `is_within`
//! deciding whether a given step still belongs to the current window.

use std::collections::HashMap;

use crate::domain::{decode_payload, encode_payload};
use crate::message::{Message, Precision, Tag};

/// A half-open step window `[start, start + duration)`, grounded on
/// `Period.h`'s `DatePeriod`/`DateTimePeriod`.
#[derive(Debug, Clone, Copy)]
pub struct Period {
    start: i64,
    duration: i64,
}

impl Period {
    pub fn new(start: i64, duration: i64) -> Self {
        Self { start, duration: duration.max(1) }
    }

    pub fn is_within(&self, step: i64) -> bool {
        step >= self.start && step < self.start + self.duration
    }

    pub fn reset(&mut self, start: i64) {
        self.start = start;
    }
}

/// Which reduction a [`Statistics`] action applies across a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceKind {
    Mean,
    Min,
    Max,
    Accumulate,
}

struct Accumulator {
    values: Vec<f64>,
    samples: u64,
    precision: Precision,
    /// The most recent Field message seen for this series, payload
    /// cleared — supplies the source/destination/metadata the emitted
    /// reduction is built from, the same role `FieldState::template`
    /// plays in `action/aggregation.rs`.
    template: Message,
}

/// One window's running accumulator per `fieldId`, reduced and
/// emitted when a `StepComplete` crosses the window's write frequency.
pub struct Statistics {
    kind: ReduceKind,
    window_length: i64,
    windows: HashMap<String, (Period, Accumulator)>,
}

impl Statistics {
    pub fn new(kind: ReduceKind, window_length: i64) -> Self {
        Self {
            kind,
            window_length: window_length.max(1),
            windows: HashMap::new(),
        }
    }

    pub fn execute(&mut self, message: Message) -> Vec<Message> {
        match message.tag {
            Tag::Field => self.handle_field(message),
            Tag::StepComplete => self.handle_step_complete(message),
            Tag::Flush => self.handle_flush(message),
            _ => vec![message],
        }
    }

    fn handle_field(&mut self, message: Message) -> Vec<Message> {
        let step = message.metadata.get_long_or("step", 0).unwrap_or(0);
        let local = decode_payload(&message.payload, message.precision);

        // `message.field_id` includes `step`, which is exactly the
        // axis a window accumulates across — use a step-independent
        // series key instead so the same accumulator is reused for
        // every step of one physical field.
        let series = series_key(&message);
        let mut template = message.clone();
        template.payload = Vec::new();

        let entry = self.windows.entry(series).or_insert_with(|| {
            (
                Period::new(step, self.window_length),
                Accumulator {
                    values: vec![0.0; local.len()],
                    samples: 0,
                    precision: message.precision,
                    template: template.clone(),
                },
            )
        });
        let (period, acc) = entry;

        if !period.is_within(step) {
            period.reset(step);
            acc.values = vec![0.0; local.len()];
            acc.samples = 0;
        }
        acc.template = template;

        reduce_into(self.kind, &mut acc.values, &local);
        acc.samples += 1;
        Vec::new()
    }

    /// Reduce and emit every window whose boundary `step + 1` has
    /// crossed, then forward the triggering `StepComplete` itself —
    /// spec.md §4.3 requires every non-terminal action to forward
    /// control messages regardless of how many Fields it also emits.
    fn handle_step_complete(&mut self, message: Message) -> Vec<Message> {
        let step = message.metadata.get_long_or("step", 0).unwrap_or(0);
        let due: Vec<String> = self
            .windows
            .iter()
            .filter(|(_, (period, _))| !period.is_within(step + 1))
            .map(|(id, _)| id.clone())
            .collect();

        let mut out: Vec<Message> = due
            .into_iter()
            .filter_map(|series| self.windows.remove(&series))
            .map(|(_, acc)| self.reduced_field(acc))
            .collect();
        out.push(message);
        out
    }

    /// On Flush, complete every in-flight window that has at least
    /// one sample; a window that never received a sample is discarded
    /// and logged rather than emitted as a reduction over nothing
    /// (spec.md §4.3: "complete if sufficient data... else report and
    /// discard"). The Flush itself is always forwarded.
    fn handle_flush(&mut self, message: Message) -> Vec<Message> {
        let windows = std::mem::take(&mut self.windows);
        let mut out = Vec::with_capacity(windows.len() + 1);
        for (series, (_, acc)) in windows {
            if acc.samples == 0 {
                tracing::warn!(series = %series, "discarding empty statistics window on flush");
                continue;
            }
            out.push(self.reduced_field(acc));
        }
        out.push(message);
        out
    }

    fn reduced_field(&self, acc: Accumulator) -> Message {
        let mut reduced = acc.values;
        if self.kind == ReduceKind::Mean && acc.samples > 0 {
            for v in reduced.iter_mut() {
                *v /= acc.samples as f64;
            }
        }
        let mut out = acc.template;
        out.tag = Tag::Field;
        out.payload = encode_payload(&reduced, acc.precision);
        out
    }
}

/// A step-independent key for grouping a physical field's samples
/// across an accumulation window: every identifying key except
/// `step`.
fn series_key(message: &Message) -> String {
    let md = &message.metadata;
    let mut parts = Vec::new();
    for key in ["param", "parameter", "level", "domain"] {
        if let Ok(value) = md.get(key) {
            parts.push(format!("{key}={value:?}"));
        }
    }
    parts.join(",")
}

fn reduce_into(kind: ReduceKind, acc: &mut [f64], sample: &[f64]) {
    for (a, s) in acc.iter_mut().zip(sample.iter()) {
        *a = match kind {
            ReduceKind::Mean | ReduceKind::Accumulate => *a + *s,
            ReduceKind::Min => a.min(*s),
            ReduceKind::Max => a.max(*s),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Metadata, Peer, Precision};

    fn field(step: i64, values: Vec<f64>) -> Message {
        let mut md = Metadata::new();
        md.set("precision", "double");
        md.set("param", 1i64);
        md.set("step", step);
        Message::new(
            Tag::Field,
            Peer::new("c", 0),
            Peer::new("s", 0),
            md,
            encode_payload(&values, Precision::Double),
            values.len() as u64,
        )
        .unwrap()
    }

    fn step_complete(step: i64) -> Message {
        let mut md = Metadata::new();
        md.set("precision", "double");
        md.set("param", 1i64);
        md.set("step", step);
        Message::new(Tag::StepComplete, Peer::new("c", 0), Peer::new("s", 0), md, vec![], 0).unwrap()
    }

    #[test]
    fn mean_reduces_over_the_window() {
        let mut stats = Statistics::new(ReduceKind::Mean, 2);
        assert!(stats.execute(field(0, vec![2.0, 4.0])).is_empty());
        assert!(stats.execute(field(1, vec![4.0, 8.0])).is_empty());

        let outputs = stats.execute(step_complete(1));
        // One reduced Field plus the forwarded StepComplete itself.
        assert_eq!(outputs.len(), 2);
        let emitted = outputs.iter().find(|m| m.tag == Tag::Field).unwrap();
        let values = decode_payload(&emitted.payload, Precision::Double);
        assert_eq!(values, vec![3.0, 6.0]);
        assert!(outputs.iter().any(|m| m.tag == Tag::StepComplete));
    }

    #[test]
    fn multiple_concurrent_series_each_emit_on_step_complete() {
        let mut stats = Statistics::new(ReduceKind::Accumulate, 1);

        let mut param1 = Metadata::new();
        param1.set("precision", "double");
        param1.set("param", 1i64);
        param1.set("step", 0i64);
        let f1 = Message::new(
            Tag::Field,
            Peer::new("c", 0),
            Peer::new("s", 0),
            param1,
            encode_payload(&[1.0], Precision::Double),
            1,
        )
        .unwrap();

        let mut param2 = Metadata::new();
        param2.set("precision", "double");
        param2.set("param", 2i64);
        param2.set("step", 0i64);
        let f2 = Message::new(
            Tag::Field,
            Peer::new("c", 0),
            Peer::new("s", 0),
            param2,
            encode_payload(&[10.0], Precision::Double),
            1,
        )
        .unwrap();

        assert!(stats.execute(f1).is_empty());
        assert!(stats.execute(f2).is_empty());

        let outputs = stats.execute(step_complete(0));
        let fields: Vec<&Message> = outputs.iter().filter(|m| m.tag == Tag::Field).collect();
        assert_eq!(fields.len(), 2, "both in-flight series must be emitted, not just one");
        let values: Vec<f64> = fields
            .iter()
            .map(|m| decode_payload(&m.payload, Precision::Double)[0])
            .collect();
        assert!(values.contains(&1.0));
        assert!(values.contains(&10.0));
    }

    #[test]
    fn flush_completes_a_window_that_has_a_sample() {
        let mut stats = Statistics::new(ReduceKind::Mean, 4);
        assert!(stats.execute(field(0, vec![5.0])).is_empty());

        let mut flush_md = Metadata::new();
        flush_md.set("precision", "double");
        let flush = Message::new(Tag::Flush, Peer::new("c", 0), Peer::new("s", 0), flush_md, vec![], 0).unwrap();
        let outputs = stats.execute(flush);

        // The one window had a sample, so it completes and is emitted
        // alongside the forwarded Flush.
        assert_eq!(outputs.len(), 2);
        assert!(outputs.iter().any(|m| m.tag == Tag::Flush));
        assert!(stats.windows.is_empty());
    }

    #[test]
    fn flush_discards_a_window_with_no_samples_but_still_forwards() {
        let mut stats = Statistics::new(ReduceKind::Mean, 4);

        // A window can only be reached with zero samples defensively
        // (normal arrival always increments `samples` in the same
        // call); insert one directly to exercise the discard branch.
        let template = field(0, vec![0.0]);
        stats.windows.insert(
            "forced-empty".to_string(),
            (
                Period::new(0, 4),
                Accumulator {
                    values: vec![0.0],
                    samples: 0,
                    precision: Precision::Double,
                    template,
                },
            ),
        );

        let mut flush_md = Metadata::new();
        flush_md.set("precision", "double");
        let flush = Message::new(Tag::Flush, Peer::new("c", 0), Peer::new("s", 0), flush_md, vec![], 0).unwrap();
        let outputs = stats.execute(flush);

        // The empty window is discarded, not emitted as a Field — only
        // the forwarded Flush comes back.
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].tag, Tag::Flush);
        assert!(stats.windows.is_empty());
    }
}
