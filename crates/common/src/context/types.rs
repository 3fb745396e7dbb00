//! Context value types for the reasoning pipeline
//!
//! Every piece of request-scoped state is an explicit frozen value type:
//! retrieved evidence, conversation state, prompt instructions, and the
//! reasoning chain. Nothing here is an untyped key/value map, and nothing
//! is mutated after construction; each pipeline stage returns new values.

use serde::{Deserialize, Serialize};

/// Hard cap on reasoning steps, regardless of request configuration
pub const MAX_REASONING_STEPS_CAP: usize = 10;

/// One retrieved evidence item
///
/// Produced by retrieval, consumed read-only by reasoning and generation.
/// Score and rank bounds are enforced by the constructor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentContext {
    text: String,
    source_id: String,
    document_name: Option<String>,
    page_number: Option<u32>,
    chunk_index: Option<u32>,
    relevance_score: f32,
    retrieval_rank: u32,
}

impl DocumentContext {
    /// Create an evidence item; clamps the score to [0, 1] and the rank to >= 1
    pub fn new(
        text: impl Into<String>,
        source_id: impl Into<String>,
        relevance_score: f32,
        retrieval_rank: u32,
    ) -> Self {
        Self {
            text: text.into(),
            source_id: source_id.into(),
            document_name: None,
            page_number: None,
            chunk_index: None,
            relevance_score: relevance_score.clamp(0.0, 1.0),
            retrieval_rank: retrieval_rank.max(1),
        }
    }

    pub fn with_document_name(mut self, name: impl Into<String>) -> Self {
        self.document_name = Some(name.into());
        self
    }

    pub fn with_page_number(mut self, page: u32) -> Self {
        self.page_number = Some(page);
        self
    }

    pub fn with_chunk_index(mut self, index: u32) -> Self {
        self.chunk_index = Some(index);
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn document_name(&self) -> Option<&str> {
        self.document_name.as_deref()
    }

    pub fn page_number(&self) -> Option<u32> {
        self.page_number
    }

    pub fn chunk_index(&self) -> Option<u32> {
        self.chunk_index
    }

    pub fn relevance_score(&self) -> f32 {
        self.relevance_score
    }

    pub fn retrieval_rank(&self) -> u32 {
        self.retrieval_rank
    }

    /// Return a copy with a new score and rank (used by reranking)
    pub fn rescored(&self, relevance_score: f32, retrieval_rank: u32) -> Self {
        Self {
            relevance_score: relevance_score.clamp(0.0, 1.0),
            retrieval_rank: retrieval_rank.max(1),
            ..self.clone()
        }
    }

    /// Return a copy with the text truncated to at most `max_chars` characters
    pub fn truncated(&self, max_chars: usize) -> Self {
        if self.text.chars().count() <= max_chars {
            return self.clone();
        }
        Self {
            text: self.text.chars().take(max_chars).collect(),
            ..self.clone()
        }
    }

    /// Estimate token count (1 token ~= 4 characters)
    pub fn estimated_tokens(&self) -> usize {
        self.text.len() / 4
    }
}

/// Ordered evidence list, deduplicated by source id
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentContextList {
    items: Vec<DocumentContext>,
}

impl DocumentContextList {
    /// Build from ranked evidence; the first occurrence of a source id wins
    pub fn from_ranked(documents: Vec<DocumentContext>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let items = documents
            .into_iter()
            .filter(|d| seen.insert(d.source_id.clone()))
            .collect();
        Self { items }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DocumentContext> {
        self.items.iter()
    }

    pub fn items(&self) -> &[DocumentContext] {
        &self.items
    }

    /// Keep only the k highest-ranked items
    pub fn top_k(&self, k: usize) -> Self {
        Self {
            items: self.items.iter().take(k).cloned().collect(),
        }
    }

    /// Ordered source ids of all items
    pub fn source_ids(&self) -> Vec<String> {
        self.items.iter().map(|d| d.source_id.clone()).collect()
    }

    /// Total estimated tokens across all items
    pub fn estimated_tokens(&self) -> usize {
        self.items.iter().map(|d| d.estimated_tokens()).sum()
    }

    /// Render the evidence as numbered blocks, bounded by `max_chars`.
    ///
    /// At least one item is always rendered so the model never receives an
    /// empty document section for a non-empty list.
    pub fn render_for_prompt(&self, max_chars: usize) -> String {
        let mut out = String::new();
        for (i, doc) in self.items.iter().enumerate() {
            let label = match doc.document_name() {
                Some(name) => format!("[{}] {} (source {})", i + 1, name, doc.source_id),
                None => format!("[{}] source {}", i + 1, doc.source_id),
            };
            let block = format!("{}\n{}\n\n", label, doc.text.trim());
            if i > 0 && out.len() + block.len() > max_chars {
                break;
            }
            out.push_str(&block);
        }
        out.trim_end().to_string()
    }
}

/// Entity type recognized in conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Organization,
    Person,
    Location,
    Date,
    Concept,
    Other,
}

/// An entity mentioned during the conversation
///
/// Constructed only through the factory functions; callers pick the
/// constructor matching their input shape instead of relying on runtime
/// type inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationEntity {
    entity_text: String,
    entity_type: EntityType,
    confidence: f32,
    first_mentioned_turn: u32,
    mention_count: u32,
}

impl ConversationEntity {
    /// Create an entity from free text with heuristic typing
    pub fn from_text(entity_text: impl Into<String>, first_mentioned_turn: u32) -> Self {
        let entity_text = entity_text.into().trim().to_string();
        let entity_type = if looks_like_date(&entity_text) {
            EntityType::Date
        } else {
            EntityType::Concept
        };
        Self {
            entity_text,
            entity_type,
            confidence: 0.5,
            first_mentioned_turn: first_mentioned_turn.max(1),
            mention_count: 1,
        }
    }

    /// Create an entity from named-entity recognizer output
    pub fn from_recognizer_output(
        entity_text: impl Into<String>,
        label: &str,
        confidence: f32,
        first_mentioned_turn: u32,
    ) -> Self {
        let entity_type = match label.to_uppercase().as_str() {
            "ORG" | "ORGANIZATION" => EntityType::Organization,
            "PER" | "PERSON" => EntityType::Person,
            "LOC" | "GPE" | "LOCATION" => EntityType::Location,
            "DATE" | "TIME" => EntityType::Date,
            "CONCEPT" | "MISC" => EntityType::Concept,
            _ => EntityType::Other,
        };
        Self {
            entity_text: entity_text.into().trim().to_string(),
            entity_type,
            confidence: confidence.clamp(0.0, 1.0),
            first_mentioned_turn: first_mentioned_turn.max(1),
            mention_count: 1,
        }
    }

    /// Return a copy with one more recorded mention
    pub fn mentioned_again(&self) -> Self {
        Self {
            mention_count: self.mention_count + 1,
            ..self.clone()
        }
    }

    pub fn entity_text(&self) -> &str {
        &self.entity_text
    }

    pub fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn first_mentioned_turn(&self) -> u32 {
        self.first_mentioned_turn
    }

    pub fn mention_count(&self) -> u32 {
        self.mention_count
    }
}

fn looks_like_date(text: &str) -> bool {
    let year = regex_lite::Regex::new(r"^(19|20)\d{2}$").unwrap();
    year.is_match(text.trim())
}

/// Speaker role for a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Assistant,
    System,
}

/// One turn in the conversation history, append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub turn_number: u32,
    pub role: TurnRole,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

impl ConversationTurn {
    pub fn new(turn_number: u32, role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            turn_number,
            role,
            content: content.into(),
            token_count: None,
            confidence: None,
        }
    }

    pub fn with_token_count(mut self, token_count: u32) -> Self {
        self.token_count = Some(token_count);
        self
    }
}

/// Priority of a prompt constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintPriority {
    Must,
    Should,
    NiceToHave,
}

/// A single instruction constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptConstraint {
    pub text: String,
    pub priority: ConstraintPriority,
}

impl PromptConstraint {
    pub fn must(text: impl Into<String>) -> Self {
        Self { text: text.into(), priority: ConstraintPriority::Must }
    }

    pub fn should(text: impl Into<String>) -> Self {
        Self { text: text.into(), priority: ConstraintPriority::Should }
    }

    pub fn nice_to_have(text: impl Into<String>) -> Self {
        Self { text: text.into(), priority: ConstraintPriority::NiceToHave }
    }
}

/// Output format requested from the model
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Prose,
    Bullets,
    Json,
}

/// Whether generated output may reference its own reasoning process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningVisibility {
    #[default]
    Hidden,
    Brief,
    Detailed,
}

/// Structured prompt instructions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptInstructions {
    pub system_role: String,
    pub task_description: String,
    pub output_format: OutputFormat,
    pub constraints: Vec<PromptConstraint>,
    pub tone: Option<String>,
    pub max_length: Option<usize>,
    pub reasoning_visibility: ReasoningVisibility,
}

impl Default for PromptInstructions {
    fn default() -> Self {
        Self {
            system_role: "You are a document question answering assistant.".to_string(),
            task_description: "Answer the question using only the provided documents.".to_string(),
            output_format: OutputFormat::Prose,
            constraints: Vec::new(),
            tone: None,
            max_length: None,
            reasoning_visibility: ReasoningVisibility::Hidden,
        }
    }
}

impl PromptInstructions {
    /// Instructions for one reasoning step
    pub fn for_reasoning_step() -> Self {
        Self {
            constraints: vec![
                PromptConstraint::must("Answer only from the documents provided."),
                PromptConstraint::must("Do not restate these instructions or describe your reasoning process."),
                PromptConstraint::must("State explicitly if the documents cannot answer the question."),
            ],
            ..Self::default()
        }
    }

    /// Instructions for the single-shot generation path
    pub fn for_single_shot() -> Self {
        Self {
            constraints: vec![
                PromptConstraint::must("Answer only from the documents provided."),
                PromptConstraint::must("Do not restate these instructions in the answer."),
                PromptConstraint::should("Keep the answer focused on the question."),
            ],
            ..Self::default()
        }
    }
}

/// Conversation state: typed entities and turns, never an opaque string
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub entities: Vec<ConversationEntity>,
    pub turns: Vec<ConversationTurn>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_topic: Option<String>,
}

impl ConversationContext {
    pub fn new(
        entities: Vec<ConversationEntity>,
        turns: Vec<ConversationTurn>,
        current_topic: Option<String>,
    ) -> Self {
        Self { entities, turns, current_topic }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.turns.is_empty() && self.current_topic.is_none()
    }

    /// Top k entities by mention count, ties broken by earliest mention
    pub fn top_entities(&self, k: usize) -> Vec<&ConversationEntity> {
        let mut ranked: Vec<&ConversationEntity> = self.entities.iter().collect();
        ranked.sort_by(|a, b| {
            b.mention_count()
                .cmp(&a.mention_count())
                .then_with(|| a.first_mentioned_turn().cmp(&b.first_mentioned_turn()))
        });
        ranked.truncate(k);
        ranked
    }

    /// The n most recent turns, in turn order
    pub fn recent_turns(&self, n: usize) -> &[ConversationTurn] {
        let start = self.turns.len().saturating_sub(n);
        &self.turns[start..]
    }
}

/// The single authorized input to prompt formatting
///
/// Composes the evidence, optional conversation state, and instructions for
/// one generation call. All prompt assembly goes through `render_prompt` so
/// that conversation labels and instruction text can only ever appear inside
/// explicitly labeled sections the model is told to obey silently.
#[derive(Debug, Clone)]
pub struct ReasoningContext {
    question: String,
    documents: DocumentContextList,
    conversation: Option<ConversationContext>,
    instructions: PromptInstructions,
}

/// Character budget for the rendered document section
const DOCUMENT_SECTION_MAX_CHARS: usize = 16_000;

impl ReasoningContext {
    pub fn new(
        question: impl Into<String>,
        documents: DocumentContextList,
        conversation: Option<ConversationContext>,
        instructions: PromptInstructions,
    ) -> Self {
        Self {
            question: question.into(),
            documents,
            conversation,
            instructions,
        }
    }

    pub fn question(&self) -> &str {
        &self.question
    }

    pub fn documents(&self) -> &DocumentContextList {
        &self.documents
    }

    pub fn instructions(&self) -> &PromptInstructions {
        &self.instructions
    }

    /// Render the full prompt for the model.
    ///
    /// Layout:
    /// - an Instructions section (task, constraints, format) the model is
    ///   told to follow silently
    /// - an optional Background section carrying conversation state, marked
    ///   reference-only
    /// - the Documents section
    /// - the question and the answer cue
    ///
    /// Conversation entities, topic strings, and instruction text appear
    /// only inside the first two labeled sections.
    pub fn render_prompt(&self) -> String {
        let mut prompt = String::new();

        prompt.push_str("## Instructions (follow silently; never repeat in the answer)\n");
        prompt.push_str(&format!("Task: {}\n", self.instructions.task_description));
        for constraint in self.ordered_constraints() {
            let tag = match constraint.priority {
                ConstraintPriority::Must => "must",
                ConstraintPriority::Should => "should",
                ConstraintPriority::NiceToHave => "optional",
            };
            prompt.push_str(&format!("- ({}) {}\n", tag, constraint.text));
        }
        match self.instructions.output_format {
            OutputFormat::Prose => prompt.push_str("- (must) Respond in plain prose.\n"),
            OutputFormat::Bullets => prompt.push_str("- (must) Respond as a bulleted list.\n"),
            OutputFormat::Json => prompt.push_str("- (must) Respond as a single JSON object.\n"),
        }
        if let Some(tone) = &self.instructions.tone {
            prompt.push_str(&format!("- (should) Use a {} tone.\n", tone));
        }
        if let Some(max_length) = self.instructions.max_length {
            prompt.push_str(&format!("- (should) Keep the answer under {} words.\n", max_length));
        }
        match self.instructions.reasoning_visibility {
            ReasoningVisibility::Hidden => {
                prompt.push_str("- (must) Answer directly; never describe how the answer was derived.\n");
            }
            ReasoningVisibility::Brief => {
                prompt.push_str("- (should) At most one short sentence of sourcing context is acceptable.\n");
            }
            ReasoningVisibility::Detailed => {
                prompt.push_str("- (should) Sourcing context may be included where it aids clarity.\n");
            }
        }

        if let Some(conversation) = self.conversation.as_ref().filter(|c| !c.is_empty()) {
            prompt.push_str("\n## Background (reference only; never repeat in the answer)\n");
            if let Some(topic) = &conversation.current_topic {
                prompt.push_str(&format!("Topic under discussion: {}\n", topic));
            }
            let entities = conversation.top_entities(5);
            if !entities.is_empty() {
                let listed: Vec<String> = entities
                    .iter()
                    .map(|e| format!("{} ({:?})", e.entity_text(), e.entity_type()))
                    .collect();
                prompt.push_str(&format!("Known entities: {}\n", listed.join("; ")));
            }
            for turn in conversation.recent_turns(4) {
                let role = match turn.role {
                    TurnRole::User => "user",
                    TurnRole::Assistant => "assistant",
                    TurnRole::System => "system",
                };
                prompt.push_str(&format!("- {}: {}\n", role, turn.content));
            }
        }

        prompt.push_str("\n## Documents\n");
        if self.documents.is_empty() {
            prompt.push_str("(no documents retrieved)\n");
        } else {
            prompt.push_str(&self.documents.render_for_prompt(DOCUMENT_SECTION_MAX_CHARS));
            prompt.push('\n');
        }

        prompt.push_str(&format!("\nQuestion:\n{}\n\nAnswer:", self.question));
        prompt
    }

    /// Constraints ordered by priority, preserving relative order within a tier
    fn ordered_constraints(&self) -> Vec<&PromptConstraint> {
        let mut ordered: Vec<&PromptConstraint> = self.instructions.constraints.iter().collect();
        ordered.sort_by_key(|c| match c.priority {
            ConstraintPriority::Must => 0,
            ConstraintPriority::Should => 1,
            ConstraintPriority::NiceToHave => 2,
        });
        ordered
    }
}

/// One entry in the reasoning chain, append-only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub step_number: u32,
    pub question: String,
    pub intermediate_answer: String,
    /// Ordered source ids of the evidence this step used
    pub evidence: Vec<String>,
    pub confidence: f32,
    pub elapsed_ms: u64,
    pub degraded: bool,
}

/// Marker recorded as the intermediate answer of a degraded step
pub const STEP_UNAVAILABLE: &str = "unavailable";

impl ReasoningStep {
    /// A step that produced an intermediate answer
    pub fn completed(
        step_number: u32,
        question: impl Into<String>,
        intermediate_answer: impl Into<String>,
        evidence: Vec<String>,
        confidence: f32,
        elapsed_ms: u64,
    ) -> Self {
        Self {
            step_number,
            question: question.into(),
            intermediate_answer: intermediate_answer.into(),
            evidence,
            confidence: confidence.clamp(0.0, 1.0),
            elapsed_ms,
            degraded: false,
        }
    }

    /// A step that failed to produce evidence or an answer
    pub fn unavailable(step_number: u32, question: impl Into<String>, elapsed_ms: u64) -> Self {
        Self {
            step_number,
            question: question.into(),
            intermediate_answer: STEP_UNAVAILABLE.to_string(),
            evidence: Vec::new(),
            confidence: 0.0,
            elapsed_ms,
            degraded: true,
        }
    }

    /// Whether this step can contribute to synthesis
    pub fn is_usable(&self) -> bool {
        !self.degraded && !self.intermediate_answer.trim().is_empty()
    }
}

/// Reasoning strategy selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CotStrategy {
    ZeroShot,
    #[default]
    Decomposition,
    Iterative,
    TreeOfThought,
}

impl CotStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CotStrategy::ZeroShot => "zero_shot",
            CotStrategy::Decomposition => "decomposition",
            CotStrategy::Iterative => "iterative",
            CotStrategy::TreeOfThought => "tree_of_thought",
        }
    }
}

impl std::str::FromStr for CotStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "zero_shot" => Ok(CotStrategy::ZeroShot),
            "decomposition" => Ok(CotStrategy::Decomposition),
            "iterative" => Ok(CotStrategy::Iterative),
            "tree_of_thought" => Ok(CotStrategy::TreeOfThought),
            other => Err(format!("unknown reasoning strategy '{}'", other)),
        }
    }
}

/// Per-request chain-of-thought configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CotConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub strategy: CotStrategy,

    #[serde(default = "default_steps")]
    pub max_reasoning_steps: usize,

    #[serde(default)]
    pub include_reasoning_chain: bool,

    #[serde(default)]
    pub parallel_decomposition: bool,
}

fn default_true() -> bool {
    true
}

fn default_steps() -> usize {
    5
}

impl Default for CotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: CotStrategy::default(),
            max_reasoning_steps: 5,
            include_reasoning_chain: false,
            parallel_decomposition: false,
        }
    }
}

impl CotConfig {
    /// Apply the hard cap and lower bound to the step budget
    pub fn clamped(mut self) -> Self {
        self.max_reasoning_steps = self.max_reasoning_steps.clamp(1, MAX_REASONING_STEPS_CAP);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, text: &str, score: f32, rank: u32) -> DocumentContext {
        DocumentContext::new(text, id, score, rank)
    }

    #[test]
    fn test_document_context_clamps_bounds() {
        let d = DocumentContext::new("text", "s-1", 1.7, 0);
        assert_eq!(d.relevance_score(), 1.0);
        assert_eq!(d.retrieval_rank(), 1);
    }

    #[test]
    fn test_document_list_dedup_by_source() {
        let list = DocumentContextList::from_ranked(vec![
            doc("s-1", "first", 0.9, 1),
            doc("s-2", "second", 0.8, 2),
            doc("s-1", "duplicate", 0.7, 3),
        ]);
        assert_eq!(list.len(), 2);
        assert_eq!(list.source_ids(), vec!["s-1", "s-2"]);
        assert_eq!(list.items()[0].text(), "first");
    }

    #[test]
    fn test_document_list_top_k() {
        let list = DocumentContextList::from_ranked(vec![
            doc("s-1", "first", 0.9, 1),
            doc("s-2", "second", 0.8, 2),
            doc("s-3", "third", 0.7, 3),
        ]);
        let top = list.top_k(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top.source_ids(), vec!["s-1", "s-2"]);
    }

    #[test]
    fn test_hidden_visibility_forbids_derivation_talk() {
        let list = DocumentContextList::from_ranked(vec![doc("s-1", "Evidence.", 0.9, 1)]);
        let ctx = ReasoningContext::new(
            "What is X?",
            list,
            None,
            PromptInstructions::default(),
        );
        let prompt = ctx.render_prompt();
        assert!(prompt.contains("never describe how the answer was derived"));
    }

    #[test]
    fn test_entity_factories() {
        let concept = ConversationEntity::from_text("attention mechanism", 1);
        assert_eq!(concept.entity_type(), EntityType::Concept);
        assert_eq!(concept.mention_count(), 1);

        let date = ConversationEntity::from_text("2019", 2);
        assert_eq!(date.entity_type(), EntityType::Date);

        let org = ConversationEntity::from_recognizer_output("Acme Corp", "ORG", 1.4, 0);
        assert_eq!(org.entity_type(), EntityType::Organization);
        assert_eq!(org.confidence(), 1.0);
        assert_eq!(org.first_mentioned_turn(), 1);
    }

    #[test]
    fn test_entity_mentioned_again_is_a_copy() {
        let first = ConversationEntity::from_text("transformers", 1);
        let second = first.mentioned_again();
        assert_eq!(first.mention_count(), 1);
        assert_eq!(second.mention_count(), 2);
    }

    #[test]
    fn test_top_entities_by_mentions() {
        let a = ConversationEntity::from_text("alpha", 1);
        let b = ConversationEntity::from_text("beta", 2)
            .mentioned_again()
            .mentioned_again();
        let ctx = ConversationContext::new(vec![a, b], vec![], None);

        let top = ctx.top_entities(1);
        assert_eq!(top[0].entity_text(), "beta");
    }

    #[test]
    fn test_recent_turns_view() {
        let turns: Vec<ConversationTurn> = (1..=5)
            .map(|i| ConversationTurn::new(i, TurnRole::User, format!("turn {}", i)))
            .collect();
        let ctx = ConversationContext::new(vec![], turns, None);

        let recent = ctx.recent_turns(2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].turn_number, 4);
    }

    #[test]
    fn test_render_prompt_sections_are_ordered() {
        let list = DocumentContextList::from_ranked(vec![doc("s-1", "Evidence text.", 0.9, 1)]);
        let ctx = ReasoningContext::new(
            "What is attention?",
            list,
            None,
            PromptInstructions::for_reasoning_step(),
        );
        let prompt = ctx.render_prompt();

        let instructions = prompt.find("## Instructions").unwrap();
        let documents = prompt.find("## Documents").unwrap();
        let question = prompt.find("Question:").unwrap();
        assert!(instructions < documents);
        assert!(documents < question);
        assert!(prompt.ends_with("Answer:"));
    }

    #[test]
    fn test_render_prompt_keeps_conversation_out_of_answer_region() {
        let list = DocumentContextList::from_ranked(vec![doc("s-1", "Evidence text.", 0.9, 1)]);
        let entities = vec![ConversationEntity::from_recognizer_output(
            "Previously discussed: secret entity",
            "MISC",
            0.9,
            1,
        )];
        let turns = vec![ConversationTurn::new(1, TurnRole::User, "earlier question")];
        let conversation = ConversationContext::new(entities, turns, Some("Conversation context: hidden topic".into()));
        let ctx = ReasoningContext::new(
            "What is attention?",
            list,
            Some(conversation),
            PromptInstructions::for_reasoning_step(),
        );

        let prompt = ctx.render_prompt();
        let documents_at = prompt.find("## Documents").unwrap();
        let answer_region = &prompt[documents_at..];

        // Entity labels and topic strings may only appear before the
        // document section, inside the labeled background block.
        assert!(!answer_region.contains("Previously discussed:"));
        assert!(!answer_region.contains("Conversation context:"));
        assert!(!answer_region.contains("hidden topic"));
        let background_at = prompt.find("## Background").unwrap();
        assert!(background_at < documents_at);
    }

    #[test]
    fn test_constraints_ordered_by_priority() {
        let mut instructions = PromptInstructions::default();
        instructions.constraints = vec![
            PromptConstraint::nice_to_have("add examples"),
            PromptConstraint::must("answer from documents"),
        ];
        let ctx = ReasoningContext::new("q", DocumentContextList::default(), None, instructions);
        let prompt = ctx.render_prompt();

        let must_at = prompt.find("(must) answer from documents").unwrap();
        let nice_at = prompt.find("(optional) add examples").unwrap();
        assert!(must_at < nice_at);
    }

    #[test]
    fn test_reasoning_step_markers() {
        let ok = ReasoningStep::completed(1, "q", "an answer", vec!["s-1".into()], 0.8, 12);
        assert!(ok.is_usable());

        let bad = ReasoningStep::unavailable(2, "q", 5);
        assert!(!bad.is_usable());
        assert!(bad.degraded);
        assert_eq!(bad.intermediate_answer, STEP_UNAVAILABLE);
    }

    #[test]
    fn test_cot_config_clamps_step_budget() {
        let config = CotConfig {
            max_reasoning_steps: 50,
            ..CotConfig::default()
        }
        .clamped();
        assert_eq!(config.max_reasoning_steps, MAX_REASONING_STEPS_CAP);

        let zero = CotConfig {
            max_reasoning_steps: 0,
            ..CotConfig::default()
        }
        .clamped();
        assert_eq!(zero.max_reasoning_steps, 1);
    }

    #[test]
    fn test_strategy_parsing() {
        use std::str::FromStr;
        assert_eq!(CotStrategy::from_str("iterative").unwrap(), CotStrategy::Iterative);
        assert!(CotStrategy::from_str("deep").is_err());
    }
}
