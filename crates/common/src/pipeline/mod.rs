//! Pipeline Orchestrator
//!
//! Sequences the six stages of a search request:
//! Resolution -> Query Enhancement -> Retrieval -> Reranking ->
//! Reasoning (conditional) -> Generation.
//!
//! Stage failures split into two classes. Configuration failures are fatal
//! and propagate to the caller. Degradable failures (retrieval timeouts,
//! reasoning step errors) fall through to generation with whatever evidence
//! and reasoning exist, so a partial answer always beats no answer. The
//! single-shot path never touches the chain-of-thought components.

pub mod enhancer;

pub use enhancer::{EnhancedQuery, EnhancerConfig, QueryEnhancer};

use crate::config::AppConfig;
use crate::context::{
    AnswerSynthesizer, ContextManager, ContextManagerConfig, ConversationContext, CotConfig,
    CotStrategy, DocumentContext, DocumentContextList, IterativeReasoner, PromptInstructions,
    QuestionClassifier, QuestionDecomposer, ReasonerConfig, ReasoningContext, ReasoningStep,
    DecomposerConfig, INSUFFICIENT_INFORMATION,
};
use crate::errors::{AppError, Result};
use crate::llm::{GenerationRequest, Generator};
use crate::retrieval::{Reranker, RerankerConfig, Retriever};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Pipeline stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Resolved,
    Enhanced,
    Retrieved,
    Reranked,
    Reasoned,
    Skipped,
    Generated,
    Done,
    Failed,
}

impl PipelineStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineStage::Resolved => "resolved",
            PipelineStage::Enhanced => "enhanced",
            PipelineStage::Retrieved => "retrieved",
            PipelineStage::Reranked => "reranked",
            PipelineStage::Reasoned => "reasoned",
            PipelineStage::Skipped => "skipped",
            PipelineStage::Generated => "generated",
            PipelineStage::Done => "done",
            PipelineStage::Failed => "failed",
        }
    }
}

/// Search request consumed by the orchestrator
///
/// Conversation state arrives as typed entities and turns; free-form
/// metadata strings are not accepted anywhere in the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub question: String,
    pub collection_id: String,
    pub user_id: String,

    #[serde(default)]
    pub cot_config: Option<CotConfig>,

    #[serde(default)]
    pub conversation: Option<ConversationContext>,
}

/// One evidence item in the response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub source_id: String,
    pub text: String,
    pub relevance_score: f32,
    pub rank: u32,
}

impl EvidenceItem {
    fn from_document(doc: &DocumentContext) -> Self {
        Self {
            source_id: doc.source_id().to_string(),
            text: doc.text().to_string(),
            relevance_score: doc.relevance_score(),
            rank: doc.retrieval_rank(),
        }
    }
}

/// Search response produced by the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub answer: String,
    pub evidence: Vec<EvidenceItem>,

    /// Present only when the request asked for the chain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_chain: Option<Vec<ReasoningStep>>,

    pub strategy_used: String,
    pub total_reasoning_time_ms: u64,
    pub retrieval_rounds: usize,
}

/// Question length bounds, applied after trimming
const QUESTION_MIN_CHARS: usize = 3;
const QUESTION_MAX_CHARS: usize = 1000;

/// The sole entry point used by the service layer
pub struct Orchestrator {
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
    classifier: QuestionClassifier,
    decomposer: QuestionDecomposer,
    reasoner: IterativeReasoner,
    synthesizer: AnswerSynthesizer,
    enhancer: QueryEnhancer,
    reranker: Reranker,
    context_manager: ContextManager,
    default_cot: CotConfig,
    reasoning_available: bool,
    retrieval_top_k: usize,
    single_shot_max_tokens: usize,
}

impl Orchestrator {
    /// Assemble the pipeline from configuration.
    ///
    /// Fails with a configuration error when no valid strategy or provider
    /// setup exists; per-request execution never re-checks these.
    pub fn new(
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
        config: &AppConfig,
    ) -> Result<Self> {
        let default_strategy: CotStrategy =
            config.reasoning.strategy.parse().map_err(|message| AppError::Configuration {
                message,
            })?;

        let manager_config = ContextManagerConfig {
            max_tokens: config.reasoning.context_token_budget,
            max_documents: config.retrieval.top_k,
            min_relevance: config.retrieval.min_score,
        };

        let reasoner = IterativeReasoner::new(
            retriever.clone(),
            generator.clone(),
            ContextManager::new(manager_config.clone()),
            ReasonerConfig {
                top_k: config.retrieval.top_k,
                step_timeout: config.reasoning.step_timeout(),
                request_deadline: config.reasoning.request_deadline(),
                parallel_limit: config.reasoning.parallel_limit,
                ..ReasonerConfig::default()
            },
        );

        let decomposer = QuestionDecomposer::new(generator.clone(), DecomposerConfig::default());

        let default_cot = CotConfig {
            enabled: config.reasoning.enabled,
            strategy: default_strategy,
            max_reasoning_steps: config.reasoning.max_steps,
            include_reasoning_chain: false,
            parallel_decomposition: false,
        }
        .clamped();

        Ok(Self {
            retriever,
            generator,
            classifier: QuestionClassifier::new(),
            decomposer,
            reasoner,
            synthesizer: AnswerSynthesizer::new(),
            enhancer: QueryEnhancer::default(),
            reranker: Reranker::new(RerankerConfig::default()),
            context_manager: ContextManager::new(manager_config),
            default_cot,
            reasoning_available: config.reasoning.enabled,
            retrieval_top_k: config.retrieval.top_k,
            single_shot_max_tokens: config.llm.max_tokens,
        })
    }

    /// Execute one search request end to end
    pub async fn execute_search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();

        // Stage: Resolved
        let question = validate_question(&request)?;
        validate_conversation(request.conversation.as_ref())?;
        let (cot, forced) = self.resolve_cot(request.cot_config.clone());
        trace_stage(PipelineStage::Resolved);

        // Stage: Enhanced
        let enhanced = self.enhancer.enhance(&question);
        trace_stage(PipelineStage::Enhanced);

        // Stage: Retrieved (degradable)
        let mut retrieval_rounds = 1usize;
        let raw_documents = match self
            .retriever
            .retrieve(&enhanced.retrieval_query, self.retrieval_top_k)
            .await
        {
            Ok(documents) => documents,
            Err(e) if e.is_degradable() => {
                warn!(error = %e, "Retrieval failed, continuing without evidence");
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        trace_stage(PipelineStage::Retrieved);

        // Stage: Reranked (pure)
        let reranked = self
            .reranker
            .rerank(&enhanced.normalized, raw_documents, self.retrieval_top_k);
        let evidence = self.context_manager.assemble(reranked);
        trace_stage(PipelineStage::Reranked);

        // Stage: Reasoned or Skipped
        let classification = self.classifier.classify(&question);
        let use_cot = self.reasoning_available
            && cot.enabled
            && (forced || classification.needs_multi_step);

        let mut fell_back = false;
        let mut reasoning_time_ms = 0u64;
        let mut chain: Option<Vec<ReasoningStep>> = None;
        let mut strategy_used = "single_shot";

        let answer = if use_cot {
            let reasoning_start = Instant::now();
            match self
                .run_reasoning(&question, request.conversation.as_ref(), &cot)
                .await
            {
                Ok((steps, rounds, strategy)) => {
                    retrieval_rounds += rounds;
                    reasoning_time_ms = reasoning_start.elapsed().as_millis() as u64;
                    let synthesized = self.synthesizer.synthesize(&question, &steps);
                    strategy_used = strategy;
                    chain = Some(steps);
                    trace_stage(PipelineStage::Reasoned);
                    synthesized.answer
                }
                Err(e) if e.is_degradable() => {
                    warn!(error = %e, "Reasoning failed, falling back to single-shot generation");
                    fell_back = true;
                    self.generate_single_shot(&question, &evidence, request.conversation.as_ref())
                        .await?
                }
                Err(e) => return Err(e),
            }
        } else {
            trace_stage(PipelineStage::Skipped);
            self.generate_single_shot(&question, &evidence, request.conversation.as_ref())
                .await?
        };
        trace_stage(PipelineStage::Generated);

        let response = SearchResponse {
            answer,
            evidence: evidence.iter().map(EvidenceItem::from_document).collect(),
            reasoning_chain: if cot.include_reasoning_chain { chain } else { None },
            strategy_used: strategy_used.to_string(),
            total_reasoning_time_ms: reasoning_time_ms,
            retrieval_rounds,
        };

        crate::metrics::record_pipeline(
            started.elapsed().as_secs_f64(),
            &response.strategy_used,
            fell_back,
        );
        tracing::info!(
            stage = PipelineStage::Done.as_str(),
            strategy = %response.strategy_used,
            evidence = response.evidence.len(),
            retrieval_rounds = response.retrieval_rounds,
            latency_ms = started.elapsed().as_millis() as u64,
            user_id = %request.user_id,
            collection_id = %request.collection_id,
            "Search completed"
        );

        Ok(response)
    }

    /// Merge request-level configuration over service defaults.
    ///
    /// Returns the effective config plus whether reasoning was explicitly
    /// requested (which bypasses the classifier verdict).
    fn resolve_cot(&self, request_cot: Option<CotConfig>) -> (CotConfig, bool) {
        match request_cot {
            Some(cot) => {
                let forced = cot.enabled;
                (cot.clamped(), forced)
            }
            None => (self.default_cot.clone(), false),
        }
    }

    /// Plan and execute the reasoning chain.
    ///
    /// Returns the chain, the retrieval rounds spent, and the strategy that
    /// actually executed.
    async fn run_reasoning(
        &self,
        question: &str,
        conversation: Option<&ConversationContext>,
        cot: &CotConfig,
    ) -> Result<(Vec<ReasoningStep>, usize, &'static str)> {
        // Tree-of-thought execution is not implemented as a real tree; it
        // runs as a shallow decomposition and is reported as such.
        let strategy = match cot.strategy {
            CotStrategy::TreeOfThought => CotStrategy::Decomposition,
            s => s,
        };

        let plan = match strategy {
            CotStrategy::ZeroShot => vec![question.to_string()],
            _ => self.decomposer.decompose(question, cot.max_reasoning_steps).await,
        };
        debug!(steps = plan.len(), strategy = strategy.as_str(), "Reasoning plan ready");

        // Iterative strategy feeds each step with prior answers, which only
        // works sequentially.
        let mut effective = cot.clone();
        if strategy == CotStrategy::Iterative {
            effective.parallel_decomposition = false;
        }

        let outcome = self.reasoner.run(&plan, conversation, &effective).await?;
        Ok((outcome.steps, outcome.retrieval_rounds, strategy.as_str()))
    }

    /// Generate directly from reranked evidence, without the reasoning chain
    async fn generate_single_shot(
        &self,
        question: &str,
        evidence: &DocumentContextList,
        conversation: Option<&ConversationContext>,
    ) -> Result<String> {
        if evidence.is_empty() {
            return Ok(INSUFFICIENT_INFORMATION.to_string());
        }

        let instructions = PromptInstructions::for_single_shot();
        let system_role = instructions.system_role.clone();
        let context = ReasoningContext::new(
            question,
            evidence.clone(),
            conversation.cloned(),
            instructions,
        );

        let request = GenerationRequest::new(context.render_prompt())
            .with_system(system_role)
            .with_max_tokens(self.single_shot_max_tokens);

        // A failure here is the final generation call failing after the
        // provider client exhausted its retries; it surfaces to the caller.
        let generation = self.generator.generate(&request).await?;
        Ok(generation.text.trim().to_string())
    }
}

fn trace_stage(stage: PipelineStage) {
    debug!(stage = stage.as_str(), "Pipeline stage complete");
}

/// Validate question and identifier fields
fn validate_question(request: &SearchRequest) -> Result<String> {
    if request.collection_id.trim().is_empty() {
        return Err(AppError::MissingField {
            field: "collection_id".to_string(),
        });
    }
    if request.user_id.trim().is_empty() {
        return Err(AppError::MissingField {
            field: "user_id".to_string(),
        });
    }

    let question = request.question.trim().to_string();
    let length = question.chars().count();
    if !(QUESTION_MIN_CHARS..=QUESTION_MAX_CHARS).contains(&length) {
        return Err(AppError::Validation {
            message: format!(
                "question must be between {} and {} characters after trimming",
                QUESTION_MIN_CHARS, QUESTION_MAX_CHARS
            ),
            field: Some("question".to_string()),
        });
    }
    Ok(question)
}

/// Validate bounds on typed conversation state arriving over the wire
fn validate_conversation(conversation: Option<&ConversationContext>) -> Result<()> {
    let Some(conversation) = conversation else {
        return Ok(());
    };

    for entity in &conversation.entities {
        if !(0.0..=1.0).contains(&entity.confidence()) {
            return Err(AppError::Validation {
                message: "entity confidence must be within [0, 1]".to_string(),
                field: Some("conversation.entities".to_string()),
            });
        }
        if entity.mention_count() < 1 || entity.first_mentioned_turn() < 1 {
            return Err(AppError::Validation {
                message: "entity mention counts and turns start at 1".to_string(),
                field: Some("conversation.entities".to_string()),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::types::STEP_UNAVAILABLE;
    use crate::llm::{Generation, TokenUsage};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Retriever double with per-call failure injection and optional delay
    struct ScriptedRetriever {
        calls: AtomicUsize,
        fail_on: Vec<usize>,
        fail_all: bool,
        delay: Duration,
    }

    impl ScriptedRetriever {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on: vec![],
                fail_all: false,
                delay: Duration::ZERO,
            }
        }

        fn failing_on(fail_on: Vec<usize>) -> Self {
            Self {
                fail_on,
                ..Self::ok()
            }
        }

        fn failing_all() -> Self {
            Self {
                fail_all: true,
                ..Self::ok()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::ok()
            }
        }
    }

    #[async_trait]
    impl Retriever for ScriptedRetriever {
        async fn retrieve(&self, query: &str, _top_k: usize) -> Result<Vec<DocumentContext>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail_all || self.fail_on.contains(&call) {
                return Err(AppError::Retrieval {
                    message: "search backend unavailable".into(),
                });
            }
            Ok(vec![
                DocumentContext::new(format!("Evidence about {}", query), format!("s-{}", call), 0.9, 1),
                DocumentContext::new("Secondary evidence.", format!("s-{}-b", call), 0.6, 2),
            ])
        }
    }

    /// Generator double: serves a decomposition plan and per-question answers
    struct ScriptedGenerator {
        plan: Option<String>,
        answers: HashMap<String, String>,
        default_answer: Option<String>,
        fail_generation: bool,
        decomposition_calls: AtomicUsize,
        generation_calls: AtomicUsize,
    }

    impl ScriptedGenerator {
        fn new(plan: Option<&str>) -> Self {
            Self {
                plan: plan.map(str::to_string),
                answers: HashMap::new(),
                default_answer: Some("A grounded answer from the documents.".to_string()),
                fail_generation: false,
                decomposition_calls: AtomicUsize::new(0),
                generation_calls: AtomicUsize::new(0),
            }
        }

        fn with_answer(mut self, question: &str, answer: &str) -> Self {
            self.answers.insert(question.to_string(), answer.to_string());
            self
        }

        fn failing() -> Self {
            Self {
                plan: None,
                answers: HashMap::new(),
                default_answer: None,
                fail_generation: true,
                decomposition_calls: AtomicUsize::new(0),
                generation_calls: AtomicUsize::new(0),
            }
        }

        fn question_in(prompt: &str) -> String {
            prompt
                .rsplit("Question:")
                .next()
                .unwrap_or("")
                .replace("Answer:", "")
                .trim()
                .to_string()
        }
    }

    #[async_trait]
    impl Generator for ScriptedGenerator {
        async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
            if request.prompt.starts_with("Break the question") {
                self.decomposition_calls.fetch_add(1, Ordering::SeqCst);
                return match &self.plan {
                    Some(plan) => Ok(Generation {
                        text: plan.clone(),
                        usage: TokenUsage::default(),
                    }),
                    None => Err(AppError::Generation {
                        message: "decomposition unavailable".into(),
                    }),
                };
            }

            self.generation_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_generation {
                return Err(AppError::Generation {
                    message: "provider overloaded".into(),
                });
            }

            let question = Self::question_in(&request.prompt);
            let text = self
                .answers
                .get(&question)
                .cloned()
                .or_else(|| self.default_answer.clone())
                .unwrap_or_default();
            Ok(Generation {
                text,
                usage: TokenUsage::default(),
            })
        }

        fn model_name(&self) -> &str {
            "scripted"
        }
    }

    fn config() -> AppConfig {
        AppConfig::default()
    }

    fn request(question: &str) -> SearchRequest {
        SearchRequest {
            question: question.to_string(),
            collection_id: "col-1".to_string(),
            user_id: "user-1".to_string(),
            cot_config: None,
            conversation: None,
        }
    }

    fn orchestrator(
        retriever: ScriptedRetriever,
        generator: ScriptedGenerator,
        config: &AppConfig,
    ) -> (Orchestrator, Arc<ScriptedGenerator>) {
        let generator = Arc::new(generator);
        let orchestrator = Orchestrator::new(Arc::new(retriever), generator.clone(), config)
            .expect("orchestrator config");
        (orchestrator, generator)
    }

    #[tokio::test]
    async fn test_scenario_a_two_step_decomposition() {
        let generator = ScriptedGenerator::new(Some("1. What is X?\n2. How does X relate to Y?"))
            .with_answer("What is X?", "X is a sparse retrieval method.")
            .with_answer("How does X relate to Y?", "X feeds its output into Y.");
        let (orchestrator, generator) =
            orchestrator(ScriptedRetriever::ok(), generator, &config());

        let mut req = request("What is X and how does X relate to Y?");
        req.cot_config = Some(CotConfig {
            include_reasoning_chain: true,
            ..CotConfig::default()
        });
        let response = orchestrator.execute_search(req).await.unwrap();

        assert_eq!(response.strategy_used, "decomposition");
        let chain = response.reasoning_chain.as_ref().unwrap();
        assert_eq!(chain.len(), 2);

        // Content from both steps, joined without a meta-prefix.
        assert!(response.answer.contains("X is a sparse retrieval method."));
        assert!(response.answer.contains("feeds its output into Y"));
        assert!(!response.answer.starts_with("Based on"));
        assert_eq!(generator.decomposition_calls.load(Ordering::SeqCst), 1);
        assert!(response.retrieval_rounds >= 3);
        assert!(response.total_reasoning_time_ms < 10_000);
    }

    #[tokio::test]
    async fn test_scenario_b_degraded_step_is_silent() {
        // Initial retrieval is call 1; the three reasoning steps are calls
        // 2..4. Failing call 3 degrades step 2 of 3.
        let generator = ScriptedGenerator::new(Some("1. part one?\n2. part two?\n3. part three?"))
            .with_answer("part one?", "First finding.")
            .with_answer("part three?", "Third finding.");
        let (orchestrator, _) = orchestrator(
            ScriptedRetriever::failing_on(vec![3]),
            generator,
            &config(),
        );

        let mut req = request("What is A, and what is B, and what is C?");
        req.cot_config = Some(CotConfig {
            include_reasoning_chain: true,
            ..CotConfig::default()
        });
        let response = orchestrator.execute_search(req).await.unwrap();

        let chain = response.reasoning_chain.as_ref().unwrap();
        assert_eq!(chain.len(), 3);
        assert!(chain[0].is_usable());
        assert!(chain[1].degraded);
        assert_eq!(chain[1].intermediate_answer, STEP_UNAVAILABLE);
        assert!(chain[2].is_usable());

        // Answer is non-empty and silent about the failure.
        assert!(response.answer.contains("First finding."));
        assert!(response.answer.contains("hird finding"));
        assert!(!response.answer.contains(STEP_UNAVAILABLE));
        assert!(!response.answer.to_lowercase().contains("fail"));
    }

    #[tokio::test]
    async fn test_scenario_c_total_failure_yields_exact_message() {
        let (orchestrator, _) = orchestrator(
            ScriptedRetriever::failing_all(),
            ScriptedGenerator::failing(),
            &config(),
        );

        let response = orchestrator
            .execute_search(request("What is X and how does X relate to Y?"))
            .await
            .unwrap();

        assert_eq!(response.answer, INSUFFICIENT_INFORMATION);
        assert!(response.evidence.is_empty());
    }

    #[tokio::test]
    async fn test_scenario_d_disabled_cot_never_reasons() {
        let generator = ScriptedGenerator::new(Some("1. should never be used"));
        let (orchestrator, generator) =
            orchestrator(ScriptedRetriever::ok(), generator, &config());

        let mut req = request("What is X and how does X relate to Y?");
        req.cot_config = Some(CotConfig {
            enabled: false,
            ..CotConfig::default()
        });
        let response = orchestrator.execute_search(req).await.unwrap();

        assert_eq!(response.strategy_used, "single_shot");
        assert!(response.reasoning_chain.is_none());
        assert_eq!(response.total_reasoning_time_ms, 0);
        assert_eq!(response.retrieval_rounds, 1);
        assert_eq!(generator.decomposition_calls.load(Ordering::SeqCst), 0);
        assert_eq!(generator.generation_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_scenario_e_deadline_forces_partial_synthesis() {
        let mut config = config();
        config.reasoning.request_deadline_secs = 1;

        let generator = ScriptedGenerator::new(Some(
            "1. q one alpha?\n2. q two beta?\n3. q three gamma?\n4. q four delta?\n5. q five epsilon?",
        ));
        let (orchestrator, _) = orchestrator(
            ScriptedRetriever::slow(Duration::from_millis(420)),
            generator,
            &config,
        );

        let mut req = request("What is X and how does X relate to Y?");
        req.cot_config = Some(CotConfig {
            include_reasoning_chain: true,
            ..CotConfig::default()
        });
        let response = orchestrator.execute_search(req).await.unwrap();

        let chain = response.reasoning_chain.as_ref().unwrap();
        assert!(!chain.is_empty());
        assert!(chain.len() < 5);
        assert!(!response.answer.is_empty());
    }

    #[tokio::test]
    async fn test_simple_question_takes_single_shot_path() {
        let generator = ScriptedGenerator::new(None);
        let (orchestrator, generator) =
            orchestrator(ScriptedRetriever::ok(), generator, &config());

        let response = orchestrator
            .execute_search(request("What is attention?"))
            .await
            .unwrap();

        assert_eq!(response.strategy_used, "single_shot");
        assert_eq!(response.answer, "A grounded answer from the documents.");
        assert_eq!(generator.decomposition_calls.load(Ordering::SeqCst), 0);
        assert!(!response.evidence.is_empty());
    }

    #[tokio::test]
    async fn test_explicit_enable_forces_reasoning_on_simple_question() {
        let generator = ScriptedGenerator::new(Some("1. component one?\n2. component two?"));
        let (orchestrator, generator) =
            orchestrator(ScriptedRetriever::ok(), generator, &config());

        let mut req = request("What is attention?");
        req.cot_config = Some(CotConfig::default());
        let response = orchestrator.execute_search(req).await.unwrap();

        assert_eq!(response.strategy_used, "decomposition");
        assert_eq!(generator.decomposition_calls.load(Ordering::SeqCst), 1);
        assert!(response.reasoning_chain.is_none());
    }

    #[tokio::test]
    async fn test_chain_order_is_deterministic_across_runs() {
        let plan = "1. What is X?\n2. How does X relate to Y?";
        let mut questions: Vec<Vec<String>> = Vec::new();

        for _ in 0..2 {
            let generator = ScriptedGenerator::new(Some(plan))
                .with_answer("What is X?", "X is a method.")
                .with_answer("How does X relate to Y?", "X precedes Y.");
            let (orchestrator, _) =
                orchestrator(ScriptedRetriever::ok(), generator, &config());

            let mut req = request("What is X and how does X relate to Y?");
            req.cot_config = Some(CotConfig {
                include_reasoning_chain: true,
                parallel_decomposition: false,
                ..CotConfig::default()
            });
            let response = orchestrator.execute_search(req).await.unwrap();
            questions.push(
                response
                    .reasoning_chain
                    .unwrap()
                    .iter()
                    .map(|s| s.question.clone())
                    .collect(),
            );
        }

        assert_eq!(questions[0], questions[1]);
    }

    #[tokio::test]
    async fn test_step_budget_is_hard_capped() {
        let plan = (1..=15)
            .map(|i| format!("{}. distinct question number {}?", i, i))
            .collect::<Vec<_>>()
            .join("\n");
        let generator = ScriptedGenerator::new(Some(&plan));
        let (orchestrator, _) = orchestrator(ScriptedRetriever::ok(), generator, &config());

        let mut req = request("What is X and how does X relate to Y?");
        req.cot_config = Some(CotConfig {
            max_reasoning_steps: 50,
            include_reasoning_chain: true,
            ..CotConfig::default()
        });
        let response = orchestrator.execute_search(req).await.unwrap();

        assert!(response.reasoning_chain.unwrap().len() <= 10);
    }

    #[tokio::test]
    async fn test_question_length_validation() {
        let (orchestrator, _) = orchestrator(
            ScriptedRetriever::ok(),
            ScriptedGenerator::new(None),
            &config(),
        );

        let err = orchestrator.execute_search(request("  x ")).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));

        let err = orchestrator
            .execute_search(request(&"y".repeat(1001)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_missing_identifiers_rejected() {
        let (orchestrator, _) = orchestrator(
            ScriptedRetriever::ok(),
            ScriptedGenerator::new(None),
            &config(),
        );

        let mut req = request("What is attention?");
        req.collection_id = String::new();
        let err = orchestrator.execute_search(req).await.unwrap_err();
        assert!(matches!(err, AppError::MissingField { .. }));
    }

    #[tokio::test]
    async fn test_single_shot_generation_failure_propagates() {
        let (orchestrator, _) = orchestrator(
            ScriptedRetriever::ok(),
            ScriptedGenerator::failing(),
            &config(),
        );

        let err = orchestrator
            .execute_search(request("What is attention?"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Generation { .. }));
    }

    #[tokio::test]
    async fn test_retrieval_failure_on_single_shot_degrades_to_message() {
        let (orchestrator, _) = orchestrator(
            ScriptedRetriever::failing_all(),
            ScriptedGenerator::new(None),
            &config(),
        );

        let response = orchestrator
            .execute_search(request("What is attention?"))
            .await
            .unwrap();
        assert_eq!(response.answer, INSUFFICIENT_INFORMATION);
    }

    #[test]
    fn test_invalid_default_strategy_is_configuration_error() {
        let mut config = AppConfig::default();
        config.reasoning.strategy = "deep".to_string();
        let result = Orchestrator::new(
            Arc::new(ScriptedRetriever::ok()),
            Arc::new(ScriptedGenerator::new(None)),
            &config,
        );
        assert!(matches!(result, Err(AppError::Configuration { .. })));
    }
}
