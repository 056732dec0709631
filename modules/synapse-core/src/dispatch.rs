//! The signal dispatcher: two-tier classification with confidence-gated
//! routing.
//!
//! Tier one is the tactical reflex (deterministic pattern extraction); when
//! it produces a complete draft the decision is high-confidence and
//! `strict_parameters_met`. Otherwise the semantic tier asks the classifier
//! gateway for a verdict with model-derived confidence. Confidence bands
//! then map to a first-class `DecisionOutcome`; the `reason` trail is
//! diagnostics only.

use std::sync::Arc;

use tracing::info;

use synapse_common::{
    CryptoAction, DecisionOutcome, DecisionStrategy, DispatcherDecision, ExtractedFields,
    ModuleDraft, RawSignal, SynapseError, TargetModule,
};

use crate::deps::{ClassifierService, SignalVerdict, SynapseDeps};
use crate::reflex;

/// Confidence assigned when every required field parsed deterministically.
const REFLEX_CONFIDENCE: f32 = 0.95;

pub struct Dispatcher {
    classifier: Arc<dyn ClassifierService>,
    auto_commit_threshold: f32,
    discard_threshold: f32,
}

impl Dispatcher {
    pub fn new(
        classifier: Arc<dyn ClassifierService>,
        auto_commit_threshold: f32,
        discard_threshold: f32,
    ) -> Self {
        Self {
            classifier,
            auto_commit_threshold,
            discard_threshold,
        }
    }

    pub fn from_deps(deps: &SynapseDeps) -> Self {
        Self::new(
            deps.classifier.clone(),
            deps.config.auto_commit_threshold,
            deps.config.discard_threshold,
        )
    }

    /// Classify one signal. Fails fast with a validation error on
    /// empty/whitespace-only text; classifier outages surface as transient
    /// gateway errors for the caller to translate.
    pub async fn dispatch(&self, signal: &RawSignal) -> Result<DispatcherDecision, SynapseError> {
        let text = signal.normalized_text.trim();
        if text.is_empty() {
            return Err(SynapseError::Validation(
                "signal text is empty".to_string(),
            ));
        }

        let decision = match self.tactical_reflex(text) {
            Some(decision) => decision,
            None => self.semantic(signal, text).await?,
        };

        info!(
            signal_id = %signal.id,
            module = %decision.module,
            outcome = ?decision.outcome,
            confidence = decision.confidence,
            strategy = ?decision.strategy,
            "signal dispatched"
        );

        Ok(decision)
    }

    fn tactical_reflex(&self, text: &str) -> Option<DispatcherDecision> {
        let mut matches = reflex::extract(text);
        if matches.is_empty() {
            return None;
        }

        let runner_up = matches
            .get(1)
            .map(|m| m.draft.target_module())
            .filter(|m| *m != matches[0].draft.target_module());
        let primary = matches.remove(0);
        let module = primary.draft.target_module();

        let mut reason = vec![
            "strategy=tactical_reflex".to_string(),
            format!("module={module}"),
        ];
        if let Some(other) = runner_up {
            reason.push(format!("runner_up={other}"));
        }
        reason.push(format!("confidence={REFLEX_CONFIDENCE:.2}"));
        reason.push("strict_parameters_met=true".to_string());

        let (outcome, mut outcome_reason) = self.band(module, REFLEX_CONFIDENCE, true);
        reason.append(&mut outcome_reason);

        Some(DispatcherDecision {
            strategy: DecisionStrategy::TacticalReflex,
            module,
            outcome,
            confidence: REFLEX_CONFIDENCE,
            strict_parameters_met: true,
            extracted: ExtractedFields {
                draft: Some(primary.draft),
                keywords: primary.keywords,
            },
            reason,
        })
    }

    async fn semantic(
        &self,
        signal: &RawSignal,
        text: &str,
    ) -> Result<DispatcherDecision, SynapseError> {
        let verdict = self
            .classifier
            .classify_signal(text, Some(&signal.signal_type))
            .await
            .map_err(|e| SynapseError::TransientGateway(e.to_string()))?;

        let module = TargetModule::parse(&verdict.module).unwrap_or(TargetModule::OpenAi);
        let confidence = verdict.confidence.clamp(0.0, 1.0);
        let keywords = verdict.keywords.clone();
        let draft = draft_from_verdict(module, &verdict, text);
        let has_draft = draft.is_some();

        let mut reason = vec![
            "strategy=semantic".to_string(),
            format!("module={module}"),
            format!("confidence={confidence:.2}"),
            "strict_parameters_met=false".to_string(),
        ];
        let (outcome, mut outcome_reason) = self.band(module, confidence, has_draft);
        reason.append(&mut outcome_reason);

        Ok(DispatcherDecision {
            strategy: DecisionStrategy::Semantic,
            module,
            outcome,
            confidence,
            strict_parameters_met: false,
            extracted: ExtractedFields { draft, keywords },
            reason,
        })
    }

    /// Map a confidence to its routing band. Returns the outcome plus the
    /// diagnostic tokens that explain it, in a fixed order.
    fn band(
        &self,
        module: TargetModule,
        confidence: f32,
        has_valid_draft: bool,
    ) -> (DecisionOutcome, Vec<String>) {
        if module == TargetModule::OpenAi {
            return (
                DecisionOutcome::Fallback,
                vec!["fallback=conversational_module".to_string()],
            );
        }
        if confidence >= self.auto_commit_threshold {
            if has_valid_draft {
                (
                    DecisionOutcome::Committed,
                    vec!["auto_commit=true".to_string()],
                )
            } else {
                // Confident about the module but missing required fields:
                // ask a targeted question instead of committing garbage.
                (
                    DecisionOutcome::Clarify,
                    vec![
                        "auto_commit=false".to_string(),
                        "clarify=incomplete_parameters".to_string(),
                    ],
                )
            }
        } else if confidence > self.discard_threshold {
            if has_valid_draft {
                (
                    DecisionOutcome::Drafted,
                    vec![
                        "auto_commit=false".to_string(),
                        "draft=pending_confirmation".to_string(),
                    ],
                )
            } else {
                (
                    DecisionOutcome::Clarify,
                    vec![
                        "auto_commit=false".to_string(),
                        "clarify=incomplete_parameters".to_string(),
                    ],
                )
            }
        } else {
            (
                DecisionOutcome::Fallback,
                vec!["fallback=low_confidence".to_string()],
            )
        }
    }
}

/// Assemble a module draft from the flat semantic verdict. Returns `None`
/// when required fields are missing or invalid; the band logic downgrades
/// those decisions to `Clarify`.
fn draft_from_verdict(
    module: TargetModule,
    verdict: &SignalVerdict,
    text: &str,
) -> Option<ModuleDraft> {
    let draft = match module {
        TargetModule::Finance => ModuleDraft::Finance {
            merchant: verdict.merchant.clone()?,
            amount: verdict.amount?,
            currency: verdict.currency.clone()?.to_uppercase(),
        },
        TargetModule::Todo => ModuleDraft::Todo {
            title: verdict.todo_title.clone()?,
        },
        TargetModule::Crypto => ModuleDraft::Crypto {
            action: match verdict.crypto_action.as_deref()? {
                "buy" => CryptoAction::Buy,
                "sell" => CryptoAction::Sell,
                _ => return None,
            },
            symbol: verdict.crypto_symbol.clone()?.to_uppercase(),
            amount: verdict.crypto_amount?,
            price: verdict.crypto_price,
        },
        TargetModule::Links => ModuleDraft::Links {
            url: verdict.link_url.clone()?,
            title: verdict.link_title.clone(),
        },
        TargetModule::OpenAi => ModuleDraft::OpenAi {
            prompt: text.to_string(),
        },
    };

    draft.validate().ok().map(|_| draft)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::TopicVerdict;
    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::Utc;
    use uuid::Uuid;

    struct FixedClassifier {
        verdict: SignalVerdict,
    }

    #[async_trait]
    impl ClassifierService for FixedClassifier {
        async fn classify_signal(&self, _text: &str, _hint: Option<&str>) -> Result<SignalVerdict> {
            Ok(self.verdict.clone())
        }

        async fn classify_news(
            &self,
            _title: &str,
            _body: &str,
            _hint: Option<&str>,
        ) -> Result<TopicVerdict> {
            unreachable!("signal tests never tag news")
        }
    }

    fn signal(text: &str) -> RawSignal {
        RawSignal {
            id: Uuid::new_v4(),
            signal_type: "text".to_string(),
            channel: "test".to_string(),
            normalized_text: text.to_string(),
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
        }
    }

    fn verdict(module: &str, confidence: f32) -> SignalVerdict {
        SignalVerdict {
            module: module.to_string(),
            confidence,
            merchant: None,
            amount: None,
            currency: None,
            todo_title: None,
            crypto_action: None,
            crypto_symbol: None,
            crypto_amount: None,
            crypto_price: None,
            link_url: None,
            link_title: None,
            keywords: vec![],
        }
    }

    fn dispatcher(v: SignalVerdict) -> Dispatcher {
        Dispatcher::new(Arc::new(FixedClassifier { verdict: v }), 0.85, 0.55)
    }

    #[tokio::test]
    async fn empty_text_fails_fast() {
        let d = dispatcher(verdict("openai", 0.5));
        let err = d.dispatch(&signal("   ")).await.unwrap_err();
        assert!(matches!(err, SynapseError::Validation(_)));
    }

    #[tokio::test]
    async fn reflex_commit_scenario() {
        // Classifier must not be consulted; any verdict would do.
        let d = dispatcher(verdict("openai", 0.0));
        let decision = d.dispatch(&signal("Pizza Hut 12.50 EUR")).await.unwrap();

        assert_eq!(decision.strategy, DecisionStrategy::TacticalReflex);
        assert_eq!(decision.module, TargetModule::Finance);
        assert_eq!(decision.outcome, DecisionOutcome::Committed);
        assert!(decision.strict_parameters_met);
        assert!(decision.confidence >= 0.85);
        assert!(decision.reason.contains(&"auto_commit=true".to_string()));
        match decision.extracted.draft {
            Some(ModuleDraft::Finance {
                ref merchant,
                amount,
                ref currency,
            }) => {
                assert_eq!(merchant, "Pizza Hut");
                assert!((amount - 12.50).abs() < f64::EPSILON);
                assert_eq!(currency, "EUR");
            }
            ref other => panic!("expected finance draft, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn low_signal_text_falls_back() {
        let d = dispatcher(verdict("openai", 0.30));
        let decision = d.dispatch(&signal("talvez marcar consulta")).await.unwrap();

        assert_eq!(decision.strategy, DecisionStrategy::Semantic);
        assert_eq!(decision.module, TargetModule::OpenAi);
        assert_eq!(decision.outcome, DecisionOutcome::Fallback);
        assert!(decision
            .reason
            .contains(&"fallback=conversational_module".to_string()));
    }

    #[tokio::test]
    async fn mid_band_confidence_drafts() {
        let mut v = verdict("todo", 0.70);
        v.todo_title = Some("marcar consulta".to_string());
        let d = dispatcher(v);
        let decision = d.dispatch(&signal("marcar consulta amanhã")).await.unwrap();

        assert_eq!(decision.outcome, DecisionOutcome::Drafted);
        assert!(decision
            .reason
            .contains(&"draft=pending_confirmation".to_string()));
    }

    #[tokio::test]
    async fn below_discard_falls_back() {
        let mut v = verdict("todo", 0.40);
        v.todo_title = Some("something".to_string());
        let d = dispatcher(v);
        let decision = d.dispatch(&signal("hmm not sure")).await.unwrap();

        assert_eq!(decision.outcome, DecisionOutcome::Fallback);
        assert!(decision
            .reason
            .contains(&"fallback=low_confidence".to_string()));
    }

    #[tokio::test]
    async fn confident_module_without_fields_clarifies() {
        let d = dispatcher(verdict("finance", 0.90));
        let decision = d.dispatch(&signal("spent money at the cafe")).await.unwrap();

        assert_eq!(decision.outcome, DecisionOutcome::Clarify);
        assert!(decision
            .reason
            .contains(&"clarify=incomplete_parameters".to_string()));
    }

    #[tokio::test]
    async fn reflex_reason_trail_is_deterministic() {
        let d = dispatcher(verdict("openai", 0.0));
        let a = d.dispatch(&signal("Pizza Hut 12.50 EUR")).await.unwrap();
        let b = d.dispatch(&signal("Pizza Hut 12.50 EUR")).await.unwrap();
        assert_eq!(a.reason, b.reason);
        assert_eq!(
            a.reason[..2],
            [
                "strategy=tactical_reflex".to_string(),
                "module=finance".to_string()
            ]
        );
    }
}
