//! Guideline matching
//!
//! The matcher decides which guidelines apply in the current turn. Each
//! guideline resolves to a matching *strategy* (per-guideline override →
//! per-tag override → the generic default). The generic strategy classifies
//! its guidelines into six buckets, each with its own prompt framing, slices
//! them into dynamically sized batches, and evaluates all batches
//! concurrently — one schematic LLM call per batch, each wrapped in
//! retry-up-to-three. Matches come back in input order; a per-strategy
//! transform then post-processes them (the journey-step transform keeps at
//! most one step per journey and only steps reachable from the journey's
//! current position).

use crate::agent::{Agent, Customer};
use crate::context::{ContextVariable, Interaction, Term};
use crate::error::Result;
use crate::guideline::{Guideline, GuidelineMatch};
use crate::journey::Journey;
use crate::provider::{
    generate, with_retries, GenerationHints, SchematicGenerator, TokenUsage,
};
use crate::types::{GuidelineId, JourneyId, NodeId, SessionId};
use futures::future::join_all;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::tasks::ensure_active;

/// Read-only context shared by every batch of one matching pass
#[derive(Debug, Clone)]
pub struct MatchingContext {
    pub session_id: SessionId,
    pub agent: Agent,
    pub customer: Customer,
    pub interaction: Interaction,
    pub terms: Vec<Term>,
    pub variables: Vec<ContextVariable>,
    /// Guidelines applied in prior turns
    pub applied_guideline_ids: HashSet<GuidelineId>,
    /// Journeys activated for this turn
    pub active_journeys: Vec<Journey>,
    /// Current position per active journey (`None` = not started)
    pub journey_tips: HashMap<JourneyId, Option<NodeId>>,
}

impl MatchingContext {
    fn journey(&self, id: &JourneyId) -> Option<&Journey> {
        self.active_journeys.iter().find(|j| j.id == *id)
    }

    /// Shared prompt preamble: who is talking to whom, about what
    pub(crate) fn prompt_header(&self) -> String {
        let mut sections = Vec::new();

        sections.push(format!(
            "You support '{}'{} in a conversation with customer '{}'.",
            self.agent.name,
            self.agent
                .description
                .as_deref()
                .map(|d| format!(" ({d})"))
                .unwrap_or_default(),
            self.customer.name,
        ));

        if !self.terms.is_empty() {
            let glossary: Vec<String> = self
                .terms
                .iter()
                .map(|t| format!("- {}: {}", t.name, t.description))
                .collect();
            sections.push(format!("Domain glossary:\n{}", glossary.join("\n")));
        }

        if !self.variables.is_empty() {
            let variables: Vec<String> = self
                .variables
                .iter()
                .map(|v| format!("- {} = {}", v.name, v.value))
                .collect();
            sections.push(format!("Known customer context:\n{}", variables.join("\n")));
        }

        sections.push(format!(
            "Conversation so far:\n{}",
            self.interaction.transcript()
        ));

        sections.join("\n\n")
    }
}

/// The six generic buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    JourneyStepSelection,
    Observational,
    Disambiguation,
    PrevAppliedCustomerDependent,
    PrevAppliedActionable,
    Actionable,
}

/// A unit of LLM evaluation: several guidelines judged in one call
#[derive(Debug, Clone)]
pub struct MatchingBatch {
    pub kind: BatchKind,
    pub guidelines: Vec<Guideline>,
}

/// Items per batch as a function of how many guidelines a strategy received
pub fn batch_size(guideline_count: usize) -> usize {
    match guideline_count {
        0..=10 => 1,
        11..=20 => 2,
        21..=30 => 3,
        _ => 5,
    }
}

/// A strategy classifies guidelines into batches and post-processes matches
pub trait GuidelineMatchingStrategy: Send + Sync {
    /// Class name used for grouping
    fn name(&self) -> &str;

    /// Slice the guidelines this strategy owns into batches
    fn create_batches(
        &self,
        guidelines: Vec<Guideline>,
        context: &MatchingContext,
    ) -> Vec<MatchingBatch>;

    /// Post-process the merged matches of this strategy
    fn transform_matches(
        &self,
        context: &MatchingContext,
        matches: Vec<GuidelineMatch>,
    ) -> Vec<GuidelineMatch>;
}

/// The default strategy: six buckets, dynamic batch sizing, journey-step
/// path filtering
pub struct GenericStrategy;

impl GenericStrategy {
    /// Classify guidelines into buckets, bucket order fixed
    fn classify(
        &self,
        guidelines: Vec<Guideline>,
        context: &MatchingContext,
    ) -> Vec<(BatchKind, Vec<Guideline>)> {
        let active: HashSet<JourneyId> =
            context.active_journeys.iter().map(|j| j.id).collect();

        let mut buckets: Vec<(BatchKind, Vec<Guideline>)> = vec![
            (BatchKind::JourneyStepSelection, Vec::new()),
            (BatchKind::Observational, Vec::new()),
            (BatchKind::Disambiguation, Vec::new()),
            (BatchKind::PrevAppliedCustomerDependent, Vec::new()),
            (BatchKind::PrevAppliedActionable, Vec::new()),
            (BatchKind::Actionable, Vec::new()),
        ];

        for guideline in guidelines {
            let kind = if let Some(node) = &guideline.metadata.journey_node {
                if active.contains(&node.journey_id) {
                    BatchKind::JourneyStepSelection
                } else {
                    // Steps of journeys that are not active this turn are
                    // not evaluated at all.
                    continue;
                }
            } else if guideline.is_observational() {
                if guideline.is_disambiguation_head() {
                    BatchKind::Disambiguation
                } else {
                    BatchKind::Observational
                }
            } else if context.applied_guideline_ids.contains(&guideline.id)
                && !guideline.metadata.continuous
            {
                if guideline.metadata.customer_dependent_action_data {
                    BatchKind::PrevAppliedCustomerDependent
                } else {
                    BatchKind::PrevAppliedActionable
                }
            } else {
                BatchKind::Actionable
            };

            buckets
                .iter_mut()
                .find(|(k, _)| *k == kind)
                .expect("bucket exists for every kind")
                .1
                .push(guideline);
        }

        buckets.retain(|(_, guidelines)| !guidelines.is_empty());
        buckets
    }
}

impl GuidelineMatchingStrategy for GenericStrategy {
    fn name(&self) -> &str {
        "generic"
    }

    fn create_batches(
        &self,
        guidelines: Vec<Guideline>,
        context: &MatchingContext,
    ) -> Vec<MatchingBatch> {
        let size = batch_size(guidelines.len());
        let mut batches = Vec::new();

        for (kind, bucket) in self.classify(guidelines, context) {
            for chunk in bucket.chunks(size) {
                batches.push(MatchingBatch {
                    kind,
                    guidelines: chunk.to_vec(),
                });
            }
        }

        batches
    }

    fn transform_matches(
        &self,
        context: &MatchingContext,
        matches: Vec<GuidelineMatch>,
    ) -> Vec<GuidelineMatch> {
        // Journey-step selection: keep only steps reachable from the
        // journey's current position, and at most one step per journey.
        let mut selected_step: HashMap<JourneyId, &GuidelineMatch> = HashMap::new();

        for candidate in &matches {
            let journey_id = match candidate.journey_id() {
                Some(id) => id,
                None => continue,
            };

            if !self.step_is_reachable(context, &journey_id, candidate) {
                continue;
            }

            match selected_step.get(&journey_id) {
                Some(best) if best.score >= candidate.score => {}
                _ => {
                    selected_step.insert(journey_id, candidate);
                }
            }
        }

        let kept_ids: HashSet<GuidelineId> = selected_step
            .values()
            .map(|m| m.guideline.id.clone())
            .collect();

        matches
            .iter()
            .filter(|m| match m.journey_id() {
                Some(_) => kept_ids.contains(&m.guideline.id),
                None => true,
            })
            .cloned()
            .collect()
    }
}

impl GenericStrategy {
    fn step_is_reachable(
        &self,
        context: &MatchingContext,
        journey_id: &JourneyId,
        candidate: &GuidelineMatch,
    ) -> bool {
        let journey = match context.journey(journey_id) {
            Some(journey) => journey,
            None => return false,
        };

        let node_id = match candidate
            .guideline
            .metadata
            .journey_node
            .as_ref()
            .map(|n| n.node_id)
        {
            Some(id) => id,
            None => return false,
        };

        match context.journey_tips.get(journey_id).copied().flatten() {
            // Not started: only the root step may be selected.
            None => node_id == journey.root,
            // Started: stay on the current step or advance one transition.
            Some(tip) => node_id == tip || journey.successors(tip).contains(&node_id),
        }
    }
}

/// Strategy resolution: per-guideline override → per-tag override → default
pub struct StrategyResolver {
    per_guideline: HashMap<GuidelineId, Arc<dyn GuidelineMatchingStrategy>>,
    per_tag: HashMap<String, Arc<dyn GuidelineMatchingStrategy>>,
    default: Arc<dyn GuidelineMatchingStrategy>,
}

impl StrategyResolver {
    /// Resolver with the generic default and no overrides
    pub fn new() -> Self {
        Self {
            per_guideline: HashMap::new(),
            per_tag: HashMap::new(),
            default: Arc::new(GenericStrategy),
        }
    }

    /// Override the strategy for one guideline
    pub fn with_guideline_override(
        mut self,
        guideline_id: GuidelineId,
        strategy: Arc<dyn GuidelineMatchingStrategy>,
    ) -> Self {
        self.per_guideline.insert(guideline_id, strategy);
        self
    }

    /// Override the strategy for every guideline carrying a tag
    pub fn with_tag_override(
        mut self,
        tag: impl Into<String>,
        strategy: Arc<dyn GuidelineMatchingStrategy>,
    ) -> Self {
        self.per_tag.insert(tag.into(), strategy);
        self
    }

    /// Resolve the strategy for a guideline
    pub fn resolve(&self, guideline: &Guideline) -> Arc<dyn GuidelineMatchingStrategy> {
        if let Some(strategy) = self.per_guideline.get(&guideline.id) {
            return strategy.clone();
        }
        for tag in &guideline.tags {
            if let Some(strategy) = self.per_tag.get(tag) {
                return strategy.clone();
            }
        }
        self.default.clone()
    }
}

impl Default for StrategyResolver {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-guideline verdict returned by a batch evaluation
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GuidelineCheck {
    /// 1-based position of the guideline within the batch
    pub guideline_number: usize,
    pub applies: bool,
    /// Confidence in `[0, 1]`
    pub confidence: f32,
    pub rationale: String,
}

/// Result schema of one batch evaluation
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct GuidelineBatchResult {
    pub checks: Vec<GuidelineCheck>,
}

/// Accounting for one processed batch
#[derive(Debug, Clone)]
pub struct BatchGeneration {
    pub kind: BatchKind,
    pub guideline_count: usize,
    pub usage: TokenUsage,
    pub duration: Duration,
}

/// Output of one matching pass
#[derive(Debug, Clone, Default)]
pub struct MatchingResult {
    pub matches: Vec<GuidelineMatch>,
    pub batch_generations: Vec<BatchGeneration>,
    pub total_duration: Duration,
}

impl MatchingResult {
    /// Usage summed across batches
    pub fn usage(&self) -> TokenUsage {
        let mut usage = TokenUsage::default();
        for batch in &self.batch_generations {
            usage.add(batch.usage);
        }
        usage
    }
}

/// Missing-part classification used by response analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum MissingPartKind {
    /// Core to the task; the guideline remains unapplied
    Functional,
    /// Tone or politeness; the guideline still counts as applied
    Behavioral,
}

/// Per-guideline verdict of the response analysis
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResponseAnalysisCheck {
    /// 1-based position of the guideline within the analysis input
    pub guideline_number: usize,
    /// Whether the emitted reply carried out the guideline's action
    pub fulfilled: bool,
    /// What part of the action is missing, when not fulfilled
    pub missing_part: Option<String>,
    /// Classification of the missing part, when not fulfilled
    pub classification: Option<MissingPartKind>,
}

/// Result schema of the response analysis
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResponseAnalysisResult {
    pub checks: Vec<ResponseAnalysisCheck>,
}

/// Outcome of analyzing an emitted reply against this turn's matches
#[derive(Debug, Clone, Default)]
pub struct ResponseAnalysis {
    /// Guidelines that now count as applied
    pub applied_guideline_ids: Vec<GuidelineId>,
    pub usage: TokenUsage,
}

/// Strategy-based, batched, concurrent guideline matcher
#[derive(Clone)]
pub struct GuidelineMatcher {
    generator: Arc<dyn SchematicGenerator>,
    resolver: Arc<StrategyResolver>,
}

impl GuidelineMatcher {
    /// Create a matcher with the default resolver
    pub fn new(generator: Arc<dyn SchematicGenerator>) -> Self {
        Self {
            generator,
            resolver: Arc::new(StrategyResolver::new()),
        }
    }

    /// Create a matcher with a custom resolver
    pub fn with_resolver(
        generator: Arc<dyn SchematicGenerator>,
        resolver: StrategyResolver,
    ) -> Self {
        Self {
            generator,
            resolver: Arc::new(resolver),
        }
    }

    /// Decide which of `guidelines` apply in the current turn.
    ///
    /// Returns matches in input order per batch, batches in creation order,
    /// strategy groups in first-seen order.
    pub async fn match_guidelines(
        &self,
        context: &MatchingContext,
        guidelines: Vec<Guideline>,
        cancel: &CancellationToken,
    ) -> Result<MatchingResult> {
        if guidelines.is_empty() {
            return Ok(MatchingResult::default());
        }
        ensure_active(cancel, context.session_id)?;

        let started = Instant::now();

        // Group guidelines by strategy class name, insertion-ordered.
        let mut groups: Vec<(String, Arc<dyn GuidelineMatchingStrategy>, Vec<Guideline>)> =
            Vec::new();
        for guideline in guidelines {
            let strategy = self.resolver.resolve(&guideline);
            match groups.iter_mut().find(|(name, _, _)| name == strategy.name()) {
                Some((_, _, group)) => group.push(guideline),
                None => groups.push((strategy.name().to_string(), strategy, vec![guideline])),
            }
        }

        // Create every strategy's batches up front, then process ALL batches
        // concurrently; results merge back per strategy in creation order.
        let mut flat_batches = Vec::new();
        for (group_index, (name, strategy, group)) in groups.iter().enumerate() {
            let batches = strategy.create_batches(group.clone(), context);
            debug!(
                strategy = %name,
                batch_count = batches.len(),
                "Created matching batches"
            );
            for batch in batches {
                flat_batches.push((group_index, batch));
            }
        }

        let outcomes = join_all(
            flat_batches
                .into_iter()
                .map(|(group_index, batch)| async move {
                    (group_index, self.process_batch(context, batch).await)
                }),
        )
        .await;

        ensure_active(cancel, context.session_id)?;

        let mut batch_generations = Vec::new();
        let mut per_group_matches: Vec<Vec<GuidelineMatch>> = vec![Vec::new(); groups.len()];
        for (group_index, outcome) in outcomes {
            match outcome {
                Ok((batch_matches, generation)) => {
                    per_group_matches[group_index].extend(batch_matches);
                    batch_generations.push(generation);
                }
                Err(err) if err.is_cancellation() => return Err(err),
                Err(err) => {
                    // A failed batch loses its guidelines for this turn but
                    // never fails the pass.
                    warn!(strategy = %groups[group_index].0, error = %err, "Matching batch failed");
                }
            }
        }

        let mut matches = Vec::new();
        for ((_, strategy, _), strategy_matches) in groups.iter().zip(per_group_matches) {
            matches.extend(strategy.transform_matches(context, strategy_matches));
        }

        let total_duration = started.elapsed();
        info!(
            match_count = matches.len(),
            batch_count = batch_generations.len(),
            duration_ms = total_duration.as_millis() as u64,
            "Guideline matching complete"
        );

        Ok(MatchingResult {
            matches,
            batch_generations,
            total_duration,
        })
    }

    async fn process_batch(
        &self,
        context: &MatchingContext,
        batch: MatchingBatch,
    ) -> Result<(Vec<GuidelineMatch>, BatchGeneration)> {
        let started = Instant::now();
        let prompt = batch_prompt(context, &batch);

        let result = with_retries("guideline_batch", |_attempt| {
            let prompt = prompt.clone();
            async move {
                generate::<GuidelineBatchResult>(
                    self.generator.as_ref(),
                    &prompt,
                    &GenerationHints::default(),
                )
                .await
            }
        })
        .await?;

        let mut matches = Vec::new();
        for (index, guideline) in batch.guidelines.iter().enumerate() {
            let check = result
                .content
                .checks
                .iter()
                .find(|c| c.guideline_number == index + 1);
            if let Some(check) = check {
                if check.applies {
                    matches.push(GuidelineMatch::new(
                        guideline.clone(),
                        check.confidence,
                        check.rationale.clone(),
                    ));
                }
            }
        }

        let generation = BatchGeneration {
            kind: batch.kind,
            guideline_count: batch.guidelines.len(),
            usage: result.usage,
            duration: started.elapsed(),
        };

        Ok((matches, generation))
    }

    /// After the reply went out, decide which matched guidelines were
    /// actually carried out by it.
    ///
    /// Only actionable, non-continuous, not-yet-applied guidelines are
    /// analyzed. A guideline counts as applied when the reply fulfilled its
    /// action, or when the only missing part is behavioral.
    pub async fn analyze_response(
        &self,
        context: &MatchingContext,
        matches: &[GuidelineMatch],
        reply: &str,
    ) -> Result<ResponseAnalysis> {
        let candidates: Vec<&GuidelineMatch> = matches
            .iter()
            .filter(|m| !m.guideline.is_observational())
            .filter(|m| !m.guideline.metadata.continuous)
            .filter(|m| !context.applied_guideline_ids.contains(&m.guideline.id))
            .collect();

        if candidates.is_empty() {
            return Ok(ResponseAnalysis::default());
        }

        let prompt = analysis_prompt(context, &candidates, reply);
        let result = with_retries("response_analysis", |_attempt| {
            let prompt = prompt.clone();
            async move {
                generate::<ResponseAnalysisResult>(
                    self.generator.as_ref(),
                    &prompt,
                    &GenerationHints::default(),
                )
                .await
            }
        })
        .await?;

        let mut applied = Vec::new();
        for (index, candidate) in candidates.iter().enumerate() {
            let check = result
                .content
                .checks
                .iter()
                .find(|c| c.guideline_number == index + 1);
            if let Some(check) = check {
                let counts_as_applied = check.fulfilled
                    || check.classification == Some(MissingPartKind::Behavioral);
                if counts_as_applied {
                    applied.push(candidate.guideline.id.clone());
                }
            }
        }

        debug!(
            analyzed = candidates.len(),
            applied = applied.len(),
            "Response analysis complete"
        );

        Ok(ResponseAnalysis {
            applied_guideline_ids: applied,
            usage: result.usage,
        })
    }
}

fn guideline_listing(guidelines: &[Guideline]) -> String {
    guidelines
        .iter()
        .enumerate()
        .map(|(index, g)| match &g.content.action {
            Some(action) if !action.trim().is_empty() => format!(
                "{}. When: {} — then: {}",
                index + 1,
                g.content.condition,
                action
            ),
            _ => format!("{}. When: {}", index + 1, g.content.condition),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn batch_prompt(context: &MatchingContext, batch: &MatchingBatch) -> String {
    let framing = match batch.kind {
        BatchKind::Actionable => {
            "Decide, for each behavioral rule below, whether its condition holds \
             at this point of the conversation."
        }
        BatchKind::Observational => {
            "The rules below are observations with no action. Decide, for each, \
             whether the observation currently holds."
        }
        BatchKind::Disambiguation => {
            "The rules below detect ambiguous customer intent. Decide, for each, \
             whether the customer's latest request is genuinely ambiguous between \
             the alternatives the rule covers."
        }
        BatchKind::PrevAppliedCustomerDependent => {
            "Each rule below was already carried out earlier in this conversation, \
             but its action depends on data the customer provides. Decide, for \
             each, whether the customer's latest message supplies new data that \
             calls for carrying it out again."
        }
        BatchKind::PrevAppliedActionable => {
            "Each rule below was already carried out earlier in this conversation. \
             Decide, for each, whether something new happened that requires \
             carrying it out again; mere repetition of old context does not."
        }
        BatchKind::JourneyStepSelection => {
            "The entries below are candidate next steps of an ongoing multi-step \
             process. Decide which single step (if any) the conversation has \
             reached; at most one step per process should apply."
        }
    };

    format!(
        "{}\n\n{}\n\nRules:\n{}\n\nFor every rule return one check with its \
         guideline_number (1-based, same order as listed), whether it applies, \
         your confidence between 0 and 1, and a short rationale.",
        context.prompt_header(),
        framing,
        guideline_listing(&batch.guidelines),
    )
}

fn analysis_prompt(
    context: &MatchingContext,
    candidates: &[&GuidelineMatch],
    reply: &str,
) -> String {
    let listing = candidates
        .iter()
        .enumerate()
        .map(|(index, m)| {
            format!(
                "{}. {}",
                index + 1,
                m.guideline.content.action.as_deref().unwrap_or_default()
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{}\n\nThe agent just replied:\n{}\n\nFor each required action below, \
         decide whether the reply carried it out. If not, describe the missing \
         part and classify it: 'functional' when something core to the task is \
         missing, 'behavioral' when only tone or politeness is missing.\n\n\
         Actions:\n{}\n\nReturn one check per action with its guideline_number \
         (1-based, same order as listed).",
        context.prompt_header(),
        reply,
        listing,
    )
}
