//! Classification core: the signal dispatcher, clarity context builder,
//! handshake state machine, and synaptic (vector-similarity) search.

pub mod context;
pub mod deps;
pub mod dispatch;
pub mod handshake;
pub mod ledger;
pub mod reflex;
pub mod route;
pub mod store;
pub mod synaptic;
#[cfg(feature = "test-utils")]
pub mod testutil;

pub use context::build_context;
pub use deps::{
    ClassifierService, EmbeddingService, OpenAiClassifier, OpenAiEmbedder, SynapseDeps,
    VectorIndex,
};
pub use dispatch::Dispatcher;
pub use handshake::{create_draft, record_handshake};
pub use ledger::LedgerSnapshot;
pub use route::{handle_signal, SignalResponse, SignalSubmission};
pub use synaptic::{cosine_similarity, PgVectorIndex, SynapticSearch};
