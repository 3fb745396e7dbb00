//! Chain-of-Thought Pipeline Components
//!
//! The reasoning core of the service:
//! - Context value types and the reasoning chain
//! - Evidence assembly under a token budget
//! - Question classification and decomposition
//! - Iterative multi-step reasoning
//! - Leak-free answer synthesis

mod classifier;
mod decomposer;
mod manager;
mod reasoner;
mod synthesizer;
pub mod types;

pub use classifier::{Classification, QuestionClassifier, QuestionPattern};
pub use decomposer::{DecomposerConfig, QuestionDecomposer};
pub use manager::{ContextManager, ContextManagerConfig};
pub use reasoner::{IterativeReasoner, ReasonerConfig, ReasoningOutcome};
pub use synthesizer::{AnswerSynthesizer, SynthesizedAnswer, INSUFFICIENT_INFORMATION};
pub use types::{
    ConstraintPriority, ConversationContext, ConversationEntity, ConversationTurn, CotConfig,
    CotStrategy, DocumentContext, DocumentContextList, EntityType, OutputFormat, PromptConstraint,
    PromptInstructions, ReasoningContext, ReasoningStep, ReasoningVisibility, TurnRole,
};
