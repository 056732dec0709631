//! Clarity context builder.
//!
//! Assembles the bounded markdown context handed to the conversational
//! fallback. The output feeds a cost-metered LLM call, so growth is a
//! correctness bug: every field is defensively truncated and the final
//! output never exceeds `max_lines` lines.

use chrono::Utc;

use synapse_common::{DispatcherDecision, RawSignal, SynapticSearchHit};

use crate::ledger::LedgerSnapshot;

/// Longest field value carried into the context verbatim.
const VALUE_TRUNCATE_CHARS: usize = 220;

/// Inline JSON objects keep at most this many keys.
const JSON_KEY_CAP: usize = 6;

const TRUNCATION_MARKER: &str = " [TRUNCATED]";

/// Line accumulator with a hard cap. Pushes past the cap are silently
/// dropped; the last retained line is annotated once.
struct LineBudget {
    lines: Vec<String>,
    cap: usize,
    dropped: bool,
}

impl LineBudget {
    fn new(cap: usize) -> Self {
        Self {
            lines: Vec::new(),
            cap,
            dropped: false,
        }
    }

    fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() < self.cap {
            self.lines.push(line.into());
            return;
        }
        if !self.dropped {
            self.dropped = true;
            if let Some(last) = self.lines.last_mut() {
                last.push_str(TRUNCATION_MARKER);
            }
        }
    }

    fn finish(self) -> String {
        let body = self.lines.join("\n");
        // A pushed value could smuggle newlines past the per-push count;
        // hard-slice as the final safety net.
        let line_count = body.lines().count();
        if line_count > self.cap {
            body.lines()
                .take(self.cap)
                .collect::<Vec<_>>()
                .join("\n")
        } else {
            body
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{cut}…")
    }
}

/// Render a JSON value on one line, keeping at most [`JSON_KEY_CAP`] keys
/// of a top-level object.
fn compact_json(value: &serde_json::Value) -> String {
    let rendered = match value {
        serde_json::Value::Object(map) if map.len() > JSON_KEY_CAP => {
            let kept: serde_json::Map<String, serde_json::Value> = map
                .iter()
                .take(JSON_KEY_CAP)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            format!(
                "{} (+{} keys)",
                serde_json::Value::Object(kept),
                map.len() - JSON_KEY_CAP
            )
        }
        other => other.to_string(),
    };
    truncate_chars(&rendered.replace('\n', " "), VALUE_TRUNCATE_CHARS)
}

/// Build the conversational-fallback context. Pure given its inputs except
/// for the generation timestamp header; output line count never exceeds
/// `max_lines`.
pub fn build_context(
    signal: &RawSignal,
    decision: &DispatcherDecision,
    hits: &[SynapticSearchHit],
    ledger: &LedgerSnapshot,
    max_lines: usize,
) -> String {
    let mut out = LineBudget::new(max_lines);

    out.push(format!("# Clarity context — {}", Utc::now().to_rfc3339()));
    out.push("");

    out.push("## Signal");
    out.push(format!(
        "- type={} channel={} at={}",
        signal.signal_type,
        signal.channel,
        signal.created_at.to_rfc3339()
    ));
    out.push(format!(
        "- text: {}",
        truncate_chars(signal.normalized_text.trim(), VALUE_TRUNCATE_CHARS)
    ));
    out.push("");

    out.push("## Decision");
    out.push(format!(
        "- module={} outcome={:?} confidence={:.2} strict={}",
        decision.module, decision.outcome, decision.confidence, decision.strict_parameters_met
    ));
    out.push(format!("- reasons: {}", decision.reason.join(", ")));
    if let Some(draft) = &decision.extracted.draft {
        match serde_json::to_value(draft) {
            Ok(v) => out.push(format!("- draft: {}", compact_json(&v))),
            Err(_) => out.push("- draft: <unserializable>"),
        }
    }
    out.push("");

    out.push("## Synaptic hits");
    if hits.is_empty() {
        out.push("- none");
    }
    for hit in hits {
        out.push(format!(
            "- [{}] sim={:.2} {}",
            hit.kind,
            hit.similarity,
            truncate_chars(&hit.text, VALUE_TRUNCATE_CHARS)
        ));
    }
    out.push("");

    out.push("## Recent signals");
    for row in &ledger.raw_signals {
        out.push(format!(
            "- ({}) {}",
            row.signal_type,
            truncate_chars(&row.normalized_text, VALUE_TRUNCATE_CHARS)
        ));
    }
    out.push("");

    out.push("## Recent OCR traces");
    for trace in &ledger.ocr_traces {
        out.push(format!(
            "- merchant={} total={} {}",
            trace.merchant.as_deref().unwrap_or("?"),
            trace
                .total
                .map(|t| format!("{t:.2}"))
                .unwrap_or_else(|| "?".to_string()),
            trace.currency.as_deref().unwrap_or("")
        ));
    }
    out.push("");

    out.push("## Recent handshakes");
    for hs in &ledger.handshakes {
        out.push(format!(
            "- [{}] module={} confidence={:.2} payload={}",
            hs.status,
            hs.module,
            hs.confidence,
            compact_json(&hs.payload)
        ));
    }

    out.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use synapse_common::{
        DecisionOutcome, DecisionStrategy, ExtractedFields, Handshake, HitKind,
    };
    use uuid::Uuid;

    fn signal(text: &str) -> RawSignal {
        RawSignal {
            id: Uuid::new_v4(),
            signal_type: "text".to_string(),
            channel: "telegram".to_string(),
            normalized_text: text.to_string(),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    fn decision() -> DispatcherDecision {
        DispatcherDecision {
            strategy: DecisionStrategy::Semantic,
            module: synapse_common::TargetModule::OpenAi,
            outcome: DecisionOutcome::Fallback,
            confidence: 0.3,
            strict_parameters_met: false,
            extracted: ExtractedFields::default(),
            reason: vec!["strategy=semantic".into(), "fallback=low_confidence".into()],
        }
    }

    fn hit(text: &str) -> SynapticSearchHit {
        SynapticSearchHit {
            id: Uuid::new_v4(),
            kind: HitKind::PastContext,
            text: text.to_string(),
            metadata: serde_json::json!({}),
            similarity: 0.8,
            distance: 0.2,
            created_at: Utc::now(),
        }
    }

    fn handshake(payload: serde_json::Value) -> Handshake {
        Handshake {
            id: Uuid::new_v4(),
            raw_signal_id: Uuid::new_v4(),
            module: "finance".to_string(),
            status: "approved".to_string(),
            confidence: 0.7,
            payload,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn respects_line_cap_with_oversized_ledger() {
        let ledger = LedgerSnapshot {
            raw_signals: (0..500).map(|i| signal(&format!("row {i}"))).collect(),
            ocr_traces: vec![],
            handshakes: vec![],
        };
        let out = build_context(&signal("hello"), &decision(), &[], &ledger, 40);

        assert!(out.lines().count() <= 40);
        assert!(out.contains(TRUNCATION_MARKER.trim()));
    }

    #[test]
    fn no_marker_when_everything_fits() {
        let ledger = LedgerSnapshot {
            raw_signals: vec![signal("one")],
            ocr_traces: vec![],
            handshakes: vec![],
        };
        let out = build_context(&signal("hello"), &decision(), &[hit("ctx")], &ledger, 200);

        assert!(out.lines().count() <= 200);
        assert!(!out.contains("[TRUNCATED]"));
        assert!(out.contains("## Recent signals"));
    }

    #[test]
    fn long_values_are_char_truncated() {
        let long = "x".repeat(5_000);
        let ledger = LedgerSnapshot {
            raw_signals: vec![],
            ocr_traces: vec![],
            handshakes: vec![],
        };
        let out = build_context(&signal(&long), &decision(), &[], &ledger, 100);

        let text_line = out
            .lines()
            .find(|l| l.starts_with("- text:"))
            .expect("signal text line present");
        assert!(text_line.chars().count() < 300);
        assert!(text_line.ends_with('…'));
    }

    #[test]
    fn inline_json_capped_at_six_keys() {
        let payload = serde_json::json!({
            "a": 1, "b": 2, "c": 3, "d": 4, "e": 5, "f": 6, "g": 7, "h": 8
        });
        let ledger = LedgerSnapshot {
            raw_signals: vec![],
            ocr_traces: vec![],
            handshakes: vec![handshake(payload)],
        };
        let out = build_context(&signal("hi"), &decision(), &[], &ledger, 100);

        assert!(out.contains("(+2 keys)"));
    }

    #[test]
    fn embedded_newlines_cannot_exceed_cap() {
        let sneaky = "line1\nline2\nline3\nline4\nline5".to_string();
        let ledger = LedgerSnapshot {
            raw_signals: vec![],
            ocr_traces: vec![],
            handshakes: vec![handshake(serde_json::json!({ "note": sneaky }))],
        };
        // Tight cap so the handshake line lands at the boundary
        let out = build_context(&signal("hi"), &decision(), &[], &ledger, 10);
        assert!(out.lines().count() <= 10);
    }
}
