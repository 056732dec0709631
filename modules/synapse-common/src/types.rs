use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SynapseError;

// --- Signal enums ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Text,
    Voice,
    Ocr,
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalType::Text => write!(f, "text"),
            SignalType::Voice => write!(f, "voice"),
            SignalType::Ocr => write!(f, "ocr"),
        }
    }
}

/// Domain module a signal routes to. `OpenAi` is the conversational
/// fallback, never an auto-commit target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TargetModule {
    Finance,
    Todo,
    Crypto,
    Links,
    #[serde(rename = "openai")]
    OpenAi,
}

impl TargetModule {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetModule::Finance => "finance",
            TargetModule::Todo => "todo",
            TargetModule::Crypto => "crypto",
            TargetModule::Links => "links",
            TargetModule::OpenAi => "openai",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "finance" => Some(TargetModule::Finance),
            "todo" => Some(TargetModule::Todo),
            "crypto" => Some(TargetModule::Crypto),
            "links" => Some(TargetModule::Links),
            "openai" => Some(TargetModule::OpenAi),
            _ => None,
        }
    }
}

impl std::fmt::Display for TargetModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which tier of the dispatcher produced the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStrategy {
    TacticalReflex,
    Semantic,
}

/// First-class routing outcome. Downstream consumers branch on this
/// instead of scanning the `reason` trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionOutcome {
    /// Confidence cleared the auto-commit threshold; extraction persisted.
    Committed,
    /// Mid-band confidence; a pending handshake awaits the owner.
    Drafted,
    /// Parameters incomplete but intent recognizable; ask a targeted question.
    Clarify,
    /// Below the discard threshold, or the module is conversational.
    Fallback,
}

// --- Signals ---

/// One unit of user input. Immutable once created; retained as ledger history.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct RawSignal {
    pub id: Uuid,
    pub signal_type: String,
    pub channel: String,
    pub normalized_text: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// OCR'd receipt trace attached to an `Ocr` signal.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct OcrTrace {
    pub id: Uuid,
    pub raw_signal_id: Uuid,
    pub merchant: Option<String>,
    pub total: Option<f64>,
    pub currency: Option<String>,
    pub raw_text: String,
    pub created_at: DateTime<Utc>,
}

// --- Module drafts ---

/// Direction of a crypto portfolio mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CryptoAction {
    Buy,
    Sell,
}

/// Module-specific extraction payload. Tagged union instead of a free-form
/// map: each variant carries exactly the fields its module needs, and
/// `validate` enforces the required ones.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "module", rename_all = "snake_case")]
pub enum ModuleDraft {
    Finance {
        merchant: String,
        amount: f64,
        currency: String,
    },
    Todo {
        title: String,
    },
    Crypto {
        action: CryptoAction,
        symbol: String,
        amount: f64,
        price: Option<f64>,
    },
    Links {
        url: String,
        title: Option<String>,
    },
    #[serde(rename = "openai")]
    OpenAi {
        prompt: String,
    },
}

impl ModuleDraft {
    pub fn target_module(&self) -> TargetModule {
        match self {
            ModuleDraft::Finance { .. } => TargetModule::Finance,
            ModuleDraft::Todo { .. } => TargetModule::Todo,
            ModuleDraft::Crypto { .. } => TargetModule::Crypto,
            ModuleDraft::Links { .. } => TargetModule::Links,
            ModuleDraft::OpenAi { .. } => TargetModule::OpenAi,
        }
    }

    /// Module-specific required-field validation.
    pub fn validate(&self) -> Result<(), SynapseError> {
        let fail = |msg: &str| Err(SynapseError::Validation(msg.to_string()));
        match self {
            ModuleDraft::Finance {
                merchant,
                amount,
                currency,
            } => {
                if merchant.trim().is_empty() {
                    return fail("finance draft requires a merchant");
                }
                if !amount.is_finite() || *amount <= 0.0 {
                    return fail("finance draft requires a positive amount");
                }
                if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
                    return fail("finance draft requires a 3-letter currency code");
                }
                Ok(())
            }
            ModuleDraft::Todo { title } => {
                if title.trim().is_empty() {
                    return fail("todo draft requires a title");
                }
                Ok(())
            }
            ModuleDraft::Crypto { symbol, amount, .. } => {
                if symbol.trim().is_empty() {
                    return fail("crypto draft requires a symbol");
                }
                if !amount.is_finite() || *amount <= 0.0 {
                    return fail("crypto draft requires a positive amount");
                }
                Ok(())
            }
            ModuleDraft::Links { url, .. } => {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return fail("links draft requires an http(s) URL");
                }
                Ok(())
            }
            ModuleDraft::OpenAi { prompt } => {
                if prompt.trim().is_empty() {
                    return fail("openai draft requires a prompt");
                }
                Ok(())
            }
        }
    }
}

/// Fields pulled out of a signal by either dispatcher tier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub draft: Option<ModuleDraft>,
    pub keywords: Vec<String>,
}

/// The dispatcher's verdict for one signal. Produced once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherDecision {
    pub strategy: DecisionStrategy,
    pub module: TargetModule,
    pub outcome: DecisionOutcome,
    pub confidence: f32,
    pub strict_parameters_met: bool,
    pub extracted: ExtractedFields,
    /// Ordered diagnostic trail ("auto_commit=true", ...). Deterministic
    /// given the same inputs; routing never branches on it.
    pub reason: Vec<String>,
}

// --- Synaptic search ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum HitKind {
    CompletedTask,
    RecurringMerchant,
    PastContext,
    OcrContext,
}

impl HitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HitKind::CompletedTask => "completed_task",
            HitKind::RecurringMerchant => "recurring_merchant",
            HitKind::PastContext => "past_context",
            HitKind::OcrContext => "ocr_context",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed_task" => Some(HitKind::CompletedTask),
            "recurring_merchant" => Some(HitKind::RecurringMerchant),
            "past_context" => Some(HitKind::PastContext),
            "ocr_context" => Some(HitKind::OcrContext),
            _ => None,
        }
    }
}

impl std::fmt::Display for HitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ephemeral nearest-neighbor match, computed per request.
/// `similarity` and `distance` are complementary: similarity = 1 − cosine
/// distance as returned by the vector store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynapticSearchHit {
    pub id: Uuid,
    pub kind: HitKind,
    pub text: String,
    pub metadata: serde_json::Value,
    pub similarity: f32,
    pub distance: f32,
    pub created_at: DateTime<Utc>,
}

/// A resolution worth remembering. Persisted (embedded) when a handshake
/// is approved so future dispatches can retrieve it via similarity search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynapticMemory {
    pub kind: HitKind,
    pub text: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

// --- Handshake ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeStatus {
    PendingConfirmation,
    /// An approval's side effects are running. Claims the row so a
    /// concurrent callback cannot execute them a second time.
    Executing,
    Approved,
    Rejected,
    Failed,
}

impl HandshakeStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            HandshakeStatus::Approved | HandshakeStatus::Rejected | HandshakeStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakeStatus::PendingConfirmation => "pending_confirmation",
            HandshakeStatus::Executing => "executing",
            HandshakeStatus::Approved => "approved",
            HandshakeStatus::Rejected => "rejected",
            HandshakeStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_confirmation" => Some(HandshakeStatus::PendingConfirmation),
            "executing" => Some(HandshakeStatus::Executing),
            "approved" => Some(HandshakeStatus::Approved),
            "rejected" => Some(HandshakeStatus::Rejected),
            "failed" => Some(HandshakeStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for HandshakeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A low-confidence draft awaiting owner confirmation.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Handshake {
    pub id: Uuid,
    pub raw_signal_id: Uuid,
    pub module: String,
    pub status: String,
    pub confidence: f32,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Handshake {
    pub fn status_enum(&self) -> Option<HandshakeStatus> {
        HandshakeStatus::parse(&self.status)
    }
}

// --- News ---

/// Closed topic enumeration for news tagging. Classifier output outside
/// this set is rejected and replaced with the safe default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Ai,
    Crypto,
    Geopolitics,
    Macro,
    Regulation,
    Tech,
}

impl Topic {
    pub const ALL: [Topic; 6] = [
        Topic::Ai,
        Topic::Crypto,
        Topic::Geopolitics,
        Topic::Macro,
        Topic::Regulation,
        Topic::Tech,
    ];

    /// Fallback when the classifier hallucinates a topic.
    pub const SAFE_DEFAULT: Topic = Topic::Tech;

    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Ai => "ai",
            Topic::Crypto => "crypto",
            Topic::Geopolitics => "geopolitics",
            Topic::Macro => "macro",
            Topic::Regulation => "regulation",
            Topic::Tech => "tech",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "ai" => Some(Topic::Ai),
            "crypto" => Some(Topic::Crypto),
            "geopolitics" => Some(Topic::Geopolitics),
            "macro" => Some(Topic::Macro),
            "regulation" => Some(Topic::Regulation),
            "tech" => Some(Topic::Tech),
            _ => None,
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One canonical news row. When a near-duplicate arrives, the incoming item
/// is dropped and the existing row is marked as the group head by setting
/// `dedup_group_id` to its own id. Rows collapsed into another row's group
/// are excluded from public listings.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct NewsItem {
    pub id: Uuid,
    pub title: String,
    pub summary: String,
    pub source_url: String,
    pub source_name: String,
    pub topic_primary: String,
    pub tags: Vec<String>,
    pub tag_confidence: f32,
    pub score: f32,
    pub dedup_group_id: Option<Uuid>,
    pub published_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_draft_finance_validation() {
        let ok = ModuleDraft::Finance {
            merchant: "Pizza Hut".into(),
            amount: 12.50,
            currency: "EUR".into(),
        };
        assert!(ok.validate().is_ok());
        assert_eq!(ok.target_module(), TargetModule::Finance);

        let bad_currency = ModuleDraft::Finance {
            merchant: "Pizza Hut".into(),
            amount: 12.50,
            currency: "EURO".into(),
        };
        assert!(bad_currency.validate().is_err());

        let bad_amount = ModuleDraft::Finance {
            merchant: "Pizza Hut".into(),
            amount: -3.0,
            currency: "EUR".into(),
        };
        assert!(bad_amount.validate().is_err());
    }

    #[test]
    fn module_draft_serde_tag() {
        let draft = ModuleDraft::Todo {
            title: "buy milk".into(),
        };
        let json = serde_json::to_value(&draft).unwrap();
        assert_eq!(json["module"], "todo");
        assert_eq!(json["title"], "buy milk");

        let back: ModuleDraft = serde_json::from_value(json).unwrap();
        assert_eq!(back, draft);
    }

    #[test]
    fn handshake_status_terminality() {
        assert!(!HandshakeStatus::PendingConfirmation.is_terminal());
        assert!(!HandshakeStatus::Executing.is_terminal());
        assert!(HandshakeStatus::Approved.is_terminal());
        assert!(HandshakeStatus::Rejected.is_terminal());
        assert!(HandshakeStatus::Failed.is_terminal());
    }

    #[test]
    fn topic_parse_rejects_unknown() {
        assert_eq!(Topic::parse("Crypto"), Some(Topic::Crypto));
        assert_eq!(Topic::parse("  macro "), Some(Topic::Macro));
        assert_eq!(Topic::parse("sports"), None);
    }

    #[test]
    fn target_module_round_trip() {
        for m in [
            TargetModule::Finance,
            TargetModule::Todo,
            TargetModule::Crypto,
            TargetModule::Links,
            TargetModule::OpenAi,
        ] {
            assert_eq!(TargetModule::parse(m.as_str()), Some(m));
        }
        assert_eq!(TargetModule::parse("openai"), Some(TargetModule::OpenAi));
    }
}
