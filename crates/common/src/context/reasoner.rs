//! Iterative Reasoner - executes the reasoning plan step by step
//!
//! For each sub-question: formulate a retrieval query from the sub-question
//! plus a bounded summary of prior answers, retrieve evidence, build a
//! scoped reasoning context, generate an intermediate answer, and append a
//! reasoning step. Individual step failure is never fatal: a step that
//! times out or errors is recorded as degraded and the chain continues.
//!
//! Steps run sequentially by default. Plans with no detected dependencies
//! may run concurrently under a bounded limit, with results committed in
//! plan order so the chain is deterministic either way.

use crate::context::manager::ContextManager;
use crate::context::types::{
    ConversationContext, CotConfig, DocumentContextList, PromptInstructions, ReasoningContext,
    ReasoningStep,
};
use crate::errors::Result;
use crate::llm::{GenerationRequest, Generator};
use crate::retrieval::Retriever;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Reasoner configuration
#[derive(Debug, Clone)]
pub struct ReasonerConfig {
    /// Evidence items to retrieve per step
    pub top_k: usize,

    /// Per-step timeout
    pub step_timeout: Duration,

    /// Overall reasoning deadline for the request
    pub request_deadline: Duration,

    /// Concurrency bound for parallel plans
    pub parallel_limit: usize,

    /// Character budget for the prior-answer summary fed into retrieval
    pub max_summary_chars: usize,

    /// Output token budget per intermediate answer
    pub generation_max_tokens: usize,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            step_timeout: Duration::from_secs(10),
            request_deadline: Duration::from_secs(45),
            parallel_limit: 4,
            max_summary_chars: 600,
            generation_max_tokens: 400,
        }
    }
}

/// Result of executing a reasoning plan
#[derive(Debug, Clone)]
pub struct ReasoningOutcome {
    /// Chain entries in plan order
    pub steps: Vec<ReasoningStep>,

    /// Retrieval calls attempted while reasoning
    pub retrieval_rounds: usize,
}

/// Back-reference words that make a sub-question depend on earlier answers
const DEPENDENT_WORDS: &[&str] = &[
    "it", "this", "that", "these", "those", "they", "them", "former", "latter", "aforementioned",
];

/// Executes reasoning plans against the retriever and generator
pub struct IterativeReasoner {
    retriever: Arc<dyn Retriever>,
    generator: Arc<dyn Generator>,
    context_manager: ContextManager,
    config: ReasonerConfig,
}

impl IterativeReasoner {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        generator: Arc<dyn Generator>,
        context_manager: ContextManager,
        config: ReasonerConfig,
    ) -> Self {
        Self {
            retriever,
            generator,
            context_manager,
            config,
        }
    }

    /// Execute a reasoning plan.
    ///
    /// Only provider-fatal (configuration) errors propagate; every
    /// recoverable failure is absorbed into a degraded step.
    pub async fn run(
        &self,
        plan: &[String],
        conversation: Option<&ConversationContext>,
        cot: &CotConfig,
    ) -> Result<ReasoningOutcome> {
        let started = Instant::now();

        let outcome = if cot.parallel_decomposition && plan.len() > 1 && !has_dependencies(plan) {
            self.run_parallel(plan, conversation, started).await?
        } else {
            self.run_sequential(plan, conversation, started).await?
        };

        let degraded = outcome.steps.iter().filter(|s| s.degraded).count();
        crate::metrics::record_reasoning(
            started.elapsed().as_secs_f64(),
            outcome.steps.len(),
            degraded,
        );
        debug!(
            steps = outcome.steps.len(),
            degraded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Reasoning chain complete"
        );

        Ok(outcome)
    }

    async fn run_sequential(
        &self,
        plan: &[String],
        conversation: Option<&ConversationContext>,
        started: Instant,
    ) -> Result<ReasoningOutcome> {
        let mut steps: Vec<ReasoningStep> = Vec::with_capacity(plan.len());
        let mut retrieval_rounds = 0;

        for (i, sub_question) in plan.iter().enumerate() {
            let number = (i + 1) as u32;
            if started.elapsed() >= self.config.request_deadline {
                warn!(
                    completed = steps.len(),
                    planned = plan.len(),
                    "Request deadline reached, truncating reasoning plan"
                );
                break;
            }

            let summary = summarize_prior(&steps, self.config.max_summary_chars);
            let query = formulate_query(sub_question, summary.as_deref());
            retrieval_rounds += 1;

            let step_start = Instant::now();
            let step = match tokio::time::timeout(
                self.config.step_timeout,
                self.execute_step(number, sub_question, &query, conversation),
            )
            .await
            {
                Ok(result) => result?,
                Err(_) => {
                    warn!(step = number, "Reasoning step timed out");
                    ReasoningStep::unavailable(
                        number,
                        sub_question.clone(),
                        step_start.elapsed().as_millis() as u64,
                    )
                }
            };
            steps.push(step);
        }

        Ok(ReasoningOutcome {
            steps,
            retrieval_rounds,
        })
    }

    /// Run dependency-free steps concurrently, committing in plan order.
    async fn run_parallel(
        &self,
        plan: &[String],
        conversation: Option<&ConversationContext>,
        started: Instant,
    ) -> Result<ReasoningOutcome> {
        let deadline = self.config.request_deadline;
        let step_timeout = self.config.step_timeout;

        let results: Vec<(usize, Result<Option<ReasoningStep>>)> =
            stream::iter(plan.iter().enumerate().map(|(i, sub_question)| {
                let query = formulate_query(sub_question, None);
                Box::pin(async move {
                    let number = (i + 1) as u32;
                    if started.elapsed() >= deadline {
                        return (i, Ok(None));
                    }
                    let step_start = Instant::now();
                    let outcome = match tokio::time::timeout(
                        step_timeout,
                        self.execute_step(number, sub_question, &query, conversation),
                    )
                    .await
                    {
                        Ok(result) => result.map(Some),
                        Err(_) => {
                            warn!(step = number, "Reasoning step timed out");
                            Ok(Some(ReasoningStep::unavailable(
                                number,
                                sub_question.clone(),
                                step_start.elapsed().as_millis() as u64,
                            )))
                        }
                    };
                    (i, outcome)
                })
            }))
            .buffer_unordered(self.config.parallel_limit.max(1))
            .collect()
            .await;

        // Commit buffered results in plan order regardless of completion order.
        let mut slots: Vec<Option<ReasoningStep>> = vec![None; plan.len()];
        let mut retrieval_rounds = 0;
        for (i, result) in results {
            match result? {
                Some(step) => {
                    retrieval_rounds += 1;
                    slots[i] = Some(step);
                }
                None => {}
            }
        }

        Ok(ReasoningOutcome {
            steps: slots.into_iter().flatten().collect(),
            retrieval_rounds,
        })
    }

    /// Execute one reasoning step end to end.
    ///
    /// Returns Err only for provider-fatal errors; recoverable retrieval
    /// and generation failures yield a degraded step.
    async fn execute_step(
        &self,
        number: u32,
        sub_question: &str,
        query: &str,
        conversation: Option<&ConversationContext>,
    ) -> Result<ReasoningStep> {
        let step_start = Instant::now();

        let documents = match self.retriever.retrieve(query, self.config.top_k).await {
            Ok(documents) => documents,
            Err(e) if e.is_degradable() => {
                warn!(step = number, error = %e, "Retrieval failed, step degraded");
                return Ok(ReasoningStep::unavailable(
                    number,
                    sub_question,
                    step_start.elapsed().as_millis() as u64,
                ));
            }
            Err(e) => return Err(e),
        };

        let evidence = self.context_manager.assemble(documents);
        if evidence.is_empty() {
            debug!(step = number, "No usable evidence for step");
            return Ok(ReasoningStep::unavailable(
                number,
                sub_question,
                step_start.elapsed().as_millis() as u64,
            ));
        }

        let instructions = PromptInstructions::for_reasoning_step();
        let system_role = instructions.system_role.clone();
        let context = ReasoningContext::new(
            sub_question,
            evidence.clone(),
            conversation.cloned(),
            instructions,
        );
        let request = GenerationRequest::new(context.render_prompt())
            .with_system(system_role)
            .with_max_tokens(self.config.generation_max_tokens);

        match self.generator.generate(&request).await {
            Ok(generation) => {
                let answer = generation.text.trim().to_string();
                if answer.is_empty() {
                    return Ok(ReasoningStep::unavailable(
                        number,
                        sub_question,
                        step_start.elapsed().as_millis() as u64,
                    ));
                }
                let confidence = step_confidence(&evidence, &answer);
                Ok(ReasoningStep::completed(
                    number,
                    sub_question,
                    answer,
                    evidence.source_ids(),
                    confidence,
                    step_start.elapsed().as_millis() as u64,
                ))
            }
            Err(e) if e.is_degradable() => {
                warn!(step = number, error = %e, "Generation failed, step degraded");
                Ok(ReasoningStep::unavailable(
                    number,
                    sub_question,
                    step_start.elapsed().as_millis() as u64,
                ))
            }
            Err(e) => Err(e),
        }
    }
}

/// Build the retrieval query for a step from its sub-question and a bounded
/// summary of earlier answers (never raw prior prompts).
fn formulate_query(sub_question: &str, prior_summary: Option<&str>) -> String {
    match prior_summary {
        Some(summary) if !summary.is_empty() => {
            format!("{} (established so far: {})", sub_question, summary)
        }
        _ => sub_question.to_string(),
    }
}

/// Bounded summary of prior usable answers
fn summarize_prior(steps: &[ReasoningStep], max_chars: usize) -> Option<String> {
    let mut summary = String::new();
    for step in steps.iter().filter(|s| s.is_usable()) {
        if !summary.is_empty() {
            summary.push_str("; ");
        }
        summary.push_str(step.intermediate_answer.trim());
        if summary.len() >= max_chars {
            break;
        }
    }
    if summary.is_empty() {
        return None;
    }
    if summary.chars().count() > max_chars {
        summary = summary.chars().take(max_chars).collect();
    }
    Some(summary)
}

/// Detect whether any sub-question references earlier steps.
///
/// Conservative: a single back-reference word anywhere in the plan forces
/// sequential execution.
fn has_dependencies(plan: &[String]) -> bool {
    plan.iter().skip(1).any(|sub_question| {
        sub_question
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| DEPENDENT_WORDS.contains(&word.to_lowercase().as_str()))
    })
}

/// Blend evidence relevance with answer substance
fn step_confidence(evidence: &DocumentContextList, answer: &str) -> f32 {
    if evidence.is_empty() {
        return 0.0;
    }
    let avg_relevance =
        evidence.iter().map(|d| d.relevance_score()).sum::<f32>() / evidence.len() as f32;
    let length_factor = (answer.len() as f32 / 300.0).min(1.0);

    let mut confidence = avg_relevance * 0.7 + length_factor * 0.3;
    let lower = answer.to_lowercase();
    if lower.contains("cannot be answered") || lower.contains("not contain enough information") {
        confidence *= 0.3;
    }
    confidence.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::manager::{ContextManager, ContextManagerConfig};
    use crate::context::types::DocumentContext;
    use crate::errors::AppError;
    use crate::llm::{Generation, TokenUsage};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Retriever double: fails on listed call numbers, optional per-call delay
    struct ScriptedRetriever {
        calls: AtomicUsize,
        fail_on: Vec<usize>,
        delay_ms: u64,
    }

    impl ScriptedRetriever {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on: vec![],
                delay_ms: 0,
            }
        }

        fn failing_on(fail_on: Vec<usize>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on,
                delay_ms: 0,
            }
        }
    }

    #[async_trait]
    impl Retriever for ScriptedRetriever {
        async fn retrieve(&self, query: &str, _top_k: usize) -> Result<Vec<DocumentContext>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.delay_ms * call as u64)).await;
            }
            if self.fail_on.contains(&call) {
                return Err(AppError::Retrieval {
                    message: "search backend unavailable".into(),
                });
            }
            Ok(vec![DocumentContext::new(
                format!("Evidence for: {}", query),
                format!("s-{}", call),
                0.8,
                1,
            )])
        }
    }

    /// Generator double answering with the step question
    struct EchoGenerator;

    #[async_trait]
    impl Generator for EchoGenerator {
        async fn generate(&self, request: &GenerationRequest) -> Result<Generation> {
            let question = request
                .prompt
                .rsplit("Question:")
                .next()
                .unwrap_or("")
                .replace("Answer:", "");
            Ok(Generation {
                text: format!("Answer about {}", question.trim()),
                usage: TokenUsage::default(),
            })
        }

        fn model_name(&self) -> &str {
            "echo"
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl Generator for FailingGenerator {
        async fn generate(&self, _request: &GenerationRequest) -> Result<Generation> {
            Err(AppError::Generation {
                message: "provider overloaded".into(),
            })
        }

        fn model_name(&self) -> &str {
            "failing"
        }
    }

    fn manager() -> ContextManager {
        ContextManager::new(ContextManagerConfig {
            min_relevance: 0.0,
            ..ContextManagerConfig::default()
        })
    }

    fn plan(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_sequential_chain_in_plan_order() {
        let reasoner = IterativeReasoner::new(
            Arc::new(ScriptedRetriever::new()),
            Arc::new(EchoGenerator),
            manager(),
            ReasonerConfig::default(),
        );

        let plan = plan(&["What is X?", "How does X relate to Y?"]);
        let outcome = reasoner
            .run(&plan, None, &CotConfig::default())
            .await
            .unwrap();

        assert_eq!(outcome.steps.len(), 2);
        assert_eq!(outcome.retrieval_rounds, 2);
        assert_eq!(outcome.steps[0].step_number, 1);
        assert_eq!(outcome.steps[0].question, "What is X?");
        assert_eq!(outcome.steps[1].question, "How does X relate to Y?");
        assert!(outcome.steps.iter().all(|s| s.is_usable()));
        assert!(!outcome.steps[0].evidence.is_empty());
    }

    #[tokio::test]
    async fn test_retrieval_failure_degrades_only_that_step() {
        // Step 2 of 3 fails; 1 and 3 still answer.
        let reasoner = IterativeReasoner::new(
            Arc::new(ScriptedRetriever::failing_on(vec![2])),
            Arc::new(EchoGenerator),
            manager(),
            ReasonerConfig::default(),
        );

        let plan = plan(&["first part?", "second part?", "third part?"]);
        let outcome = reasoner
            .run(&plan, None, &CotConfig::default())
            .await
            .unwrap();

        assert_eq!(outcome.steps.len(), 3);
        assert!(outcome.steps[0].is_usable());
        assert!(outcome.steps[1].degraded);
        assert_eq!(outcome.steps[1].intermediate_answer, "unavailable");
        assert!(outcome.steps[2].is_usable());
    }

    #[tokio::test]
    async fn test_all_failures_produce_empty_usable_chain() {
        let reasoner = IterativeReasoner::new(
            Arc::new(ScriptedRetriever::failing_on(vec![1, 2])),
            Arc::new(FailingGenerator),
            manager(),
            ReasonerConfig::default(),
        );

        let plan = plan(&["first part?", "second part?"]);
        let outcome = reasoner
            .run(&plan, None, &CotConfig::default())
            .await
            .unwrap();

        assert_eq!(outcome.steps.len(), 2);
        assert!(outcome.steps.iter().all(|s| s.degraded));
        assert!(outcome.steps.iter().all(|s| !s.is_usable()));
    }

    #[tokio::test]
    async fn test_step_timeout_records_degraded_step() {
        let retriever = ScriptedRetriever {
            calls: AtomicUsize::new(0),
            fail_on: vec![],
            delay_ms: 200,
        };
        let reasoner = IterativeReasoner::new(
            Arc::new(retriever),
            Arc::new(EchoGenerator),
            manager(),
            ReasonerConfig {
                step_timeout: Duration::from_millis(50),
                ..ReasonerConfig::default()
            },
        );

        let plan = plan(&["slow question?"]);
        let outcome = reasoner
            .run(&plan, None, &CotConfig::default())
            .await
            .unwrap();

        assert_eq!(outcome.steps.len(), 1);
        assert!(outcome.steps[0].degraded);
    }

    #[tokio::test]
    async fn test_deadline_truncates_remaining_plan() {
        let retriever = ScriptedRetriever {
            calls: AtomicUsize::new(0),
            fail_on: vec![],
            delay_ms: 30,
        };
        let reasoner = IterativeReasoner::new(
            Arc::new(retriever),
            Arc::new(EchoGenerator),
            manager(),
            ReasonerConfig {
                request_deadline: Duration::from_millis(80),
                ..ReasonerConfig::default()
            },
        );

        let plan = plan(&["q1?", "q2?", "q3?", "q4?", "q5?"]);
        let outcome = reasoner
            .run(&plan, None, &CotConfig::default())
            .await
            .unwrap();

        // The deadline fires after the early steps; later ones never start.
        assert!(outcome.steps.len() < 5);
        assert!(!outcome.steps.is_empty());
    }

    #[tokio::test]
    async fn test_parallel_commits_in_plan_order() {
        // Increasing per-call delay makes completion order the reverse of
        // start order often enough to catch ordering bugs.
        let retriever = ScriptedRetriever {
            calls: AtomicUsize::new(0),
            fail_on: vec![],
            delay_ms: 10,
        };
        let reasoner = IterativeReasoner::new(
            Arc::new(retriever),
            Arc::new(EchoGenerator),
            manager(),
            ReasonerConfig::default(),
        );

        let cot = CotConfig {
            parallel_decomposition: true,
            ..CotConfig::default()
        };
        let plan = plan(&["alpha topic?", "beta topic?", "gamma topic?"]);
        let outcome = reasoner.run(&plan, None, &cot).await.unwrap();

        assert_eq!(outcome.steps.len(), 3);
        assert_eq!(outcome.steps[0].question, "alpha topic?");
        assert_eq!(outcome.steps[1].question, "beta topic?");
        assert_eq!(outcome.steps[2].question, "gamma topic?");
        assert_eq!(
            outcome.steps.iter().map(|s| s.step_number).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn test_dependent_plan_stays_sequential() {
        let plan = plan(&["What is X?", "How does it compare to Y?"]);
        assert!(has_dependencies(&plan));
    }

    #[test]
    fn test_summarize_prior_is_bounded() {
        let steps = vec![
            ReasoningStep::completed(1, "q1", "a".repeat(500), vec![], 0.8, 1),
            ReasoningStep::completed(2, "q2", "b".repeat(500), vec![], 0.8, 1),
        ];
        let summary = summarize_prior(&steps, 600).unwrap();
        assert!(summary.chars().count() <= 600);
    }

    #[test]
    fn test_summarize_prior_skips_degraded() {
        let steps = vec![ReasoningStep::unavailable(1, "q1", 1)];
        assert!(summarize_prior(&steps, 600).is_none());
    }

    #[test]
    fn test_formulate_query_includes_summary() {
        let query = formulate_query("How is it used?", Some("X is a method"));
        assert!(query.starts_with("How is it used?"));
        assert!(query.contains("X is a method"));
    }
}
