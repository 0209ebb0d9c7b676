//! The phased investigation state machine.
//!
//! TRIAGE gathers initial context, HYPOTHESIZE populates the hypothesis
//! tree, INVESTIGATE executes targeted queries for the top frontier
//! hypothesis, EVALUATE weighs the evidence and updates the tree, and the
//! loop repeats until a confirmed root cause, an empty frontier, or an
//! exhausted iteration budget leads to CONCLUDE (and REMEDIATE when a
//! matching recipe exists). Each iteration runs to completion; suspension
//! points are tool calls, LLM calls, and discovery.

pub mod prompt;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Duration, Instant};
use uuid::Uuid;

use sleuth_core::config::SleuthConfig;
use sleuth_core::event::{InvestigationEvent, Phase};
use sleuth_core::investigation::HypothesisId;
use sleuth_core::knowledge::{KnowledgeSearch, StaticKnowledgeSearch};
use sleuth_core::llm::{ChatResponse, LlmClient, ToolCallRequest};
use sleuth_core::tool::{Tool, ToolInvocation, ToolSet};
use sleuth_core::SleuthError;
use sleuth_graph::ServiceGraph;
use sleuth_skills::{RecipeRegistry, SkillRunner, StepOutcome};

use crate::causal::{CausalQuery, CausalQueryBuilder, QueryContext};
use crate::compactor::{CompactionInputs, ContextCompactor};
use crate::context::{
    InfraContextMgr, KnowledgeContextMgr, ServiceContextConfig, ServiceContextMgr,
};
use crate::hypothesis::{
    decide_outcome, is_specific, HypothesisEngine, HypothesisNode, HypothesisOutcome,
};
use crate::memory::{HypothesisAction, InvestigationMemory};
use crate::scratchpad::Scratchpad;

use prompt::{
    compose_system_prompt, compose_user_prompt, evaluate_instruction, hypothesis_context,
    parse_hypotheses, parse_sub_hypotheses, parse_verdict, CONCLUDE_INSTRUCTION,
    HYPOTHESIZE_INSTRUCTION, TRIAGE_INSTRUCTION,
};

/// Terminal output of an investigation.
#[derive(Debug, Clone)]
pub struct InvestigationReport {
    pub answer: String,
    pub investigation_id: String,
    pub confirmed_root_cause: Option<String>,
    pub iterations: u32,
    pub remediation: Vec<StepOutcome>,
}

/// Caller-side handle: the event stream and the cancellation signal.
pub struct InvestigationHandle {
    events: mpsc::Receiver<InvestigationEvent>,
    cancel: watch::Sender<bool>,
}

impl InvestigationHandle {
    /// Abort after the current tool call completes. Partial state persists.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    pub async fn next_event(&mut self) -> Option<InvestigationEvent> {
        self.events.recv().await
    }

    /// Drain events until the terminal one (consumed along with the rest).
    pub async fn collect_events(mut self) -> Vec<InvestigationEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }
}

pub struct InvestigationBuilder {
    query: String,
    incident_id: Option<String>,
    session_id: Option<String>,
    config: SleuthConfig,
    llm: Option<Arc<dyn LlmClient>>,
    tools: ToolSet,
    knowledge: Option<Arc<dyn KnowledgeSearch>>,
    graph: Option<Arc<tokio::sync::RwLock<ServiceGraph>>>,
    infra_inventory: Option<Arc<dyn Tool>>,
    recipes: Option<RecipeRegistry>,
    skill_runner: Option<SkillRunner>,
    data_dir: Option<PathBuf>,
}

impl InvestigationBuilder {
    pub fn incident_id(mut self, incident_id: impl Into<String>) -> Self {
        self.incident_id = Some(incident_id.into());
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn config(mut self, config: SleuthConfig) -> Self {
        self.config = config;
        self
    }

    pub fn llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }

    pub fn knowledge(mut self, knowledge: Arc<dyn KnowledgeSearch>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn graph(mut self, graph: Arc<tokio::sync::RwLock<ServiceGraph>>) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn infra_inventory(mut self, inventory: Arc<dyn Tool>) -> Self {
        self.infra_inventory = Some(inventory);
        self
    }

    pub fn recipes(mut self, recipes: RecipeRegistry) -> Self {
        self.recipes = Some(recipes);
        self
    }

    pub fn skill_runner(mut self, runner: SkillRunner) -> Self {
        self.skill_runner = Some(runner);
        self
    }

    pub fn data_dir(mut self, data_dir: PathBuf) -> Self {
        self.data_dir = Some(data_dir);
        self
    }

    pub fn build(self) -> (Investigation, InvestigationHandle) {
        let session_id = self
            .session_id
            .unwrap_or_else(|| format!("inv_{}", &Uuid::new_v4().simple().to_string()[..12]));
        let data_dir = self
            .data_dir
            .unwrap_or_else(|| self.config.global.data_dir.clone());

        let scratchpad = Scratchpad::new(
            data_dir
                .join("scratchpad")
                .join(format!("{session_id}.jsonl")),
            self.config.scratchpad.clone(),
        );
        let memory = InvestigationMemory::open(
            &self.query,
            self.incident_id.clone(),
            &session_id,
            data_dir.join("investigations"),
        );
        let hypotheses = HypothesisEngine::new(&self.query, self.config.hypothesis.clone());
        let compactor = ContextCompactor::new(self.config.compactor.clone());
        let knowledge = self
            .knowledge
            .unwrap_or_else(|| Arc::new(StaticKnowledgeSearch::default()));
        let knowledge_mgr = KnowledgeContextMgr::new(knowledge, self.config.knowledge.clone());
        let infra_mgr = self
            .infra_inventory
            .map(|inventory| InfraContextMgr::new(inventory, self.config.infra.clone()));
        let service_mgr = self
            .graph
            .map(|graph| ServiceContextMgr::new(graph, ServiceContextConfig::default()));

        let (events_tx, events_rx) = mpsc::channel(64);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let investigation = Investigation {
            config: self.config,
            llm: self.llm.expect("an LlmClient is required"),
            tools: self.tools,
            scratchpad,
            memory,
            hypotheses,
            compactor,
            query_builder: CausalQueryBuilder::new(),
            knowledge_mgr,
            infra_mgr,
            service_mgr,
            recipes: self.recipes,
            skill_runner: self.skill_runner,
            events: events_tx,
            cancel: cancel_rx,
            phase: Phase::Triage,
            session_id,
            disabled_tools: HashSet::new(),
            round_result_ids: Vec::new(),
            infra_summary: None,
        };
        let handle = InvestigationHandle {
            events: events_rx,
            cancel: cancel_tx,
        };
        (investigation, handle)
    }
}

pub struct Investigation {
    config: SleuthConfig,
    llm: Arc<dyn LlmClient>,
    tools: ToolSet,
    scratchpad: Scratchpad,
    memory: InvestigationMemory,
    hypotheses: HypothesisEngine,
    compactor: ContextCompactor,
    query_builder: CausalQueryBuilder,
    knowledge_mgr: KnowledgeContextMgr,
    infra_mgr: Option<InfraContextMgr>,
    service_mgr: Option<ServiceContextMgr>,
    recipes: Option<RecipeRegistry>,
    skill_runner: Option<SkillRunner>,
    events: mpsc::Sender<InvestigationEvent>,
    cancel: watch::Receiver<bool>,
    phase: Phase,
    session_id: String,
    /// Tools marked at-limit after a permanent failure.
    disabled_tools: HashSet<String>,
    /// Result ids appended during the current investigate/evaluate round.
    round_result_ids: Vec<String>,
    infra_summary: Option<String>,
}

impl Investigation {
    pub fn builder(query: impl Into<String>) -> InvestigationBuilder {
        InvestigationBuilder {
            query: query.into(),
            incident_id: None,
            session_id: None,
            config: SleuthConfig::default(),
            llm: None,
            tools: ToolSet::new(),
            knowledge: None,
            graph: None,
            infra_inventory: None,
            recipes: None,
            skill_runner: None,
            data_dir: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn run(mut self) -> Result<InvestigationReport, SleuthError> {
        let investigation_id = self.session_id.clone();
        match self.run_inner().await {
            Ok(report) => {
                self.emit(InvestigationEvent::Done {
                    answer: report.answer.clone(),
                    investigation_id,
                })
                .await;
                Ok(report)
            }
            Err(SleuthError::Cancelled) => {
                if let Err(err) = self.memory.save() {
                    tracing::warn!(error = %err, "failed to persist state on cancellation");
                }
                self.emit(InvestigationEvent::Cancelled { investigation_id })
                    .await;
                Err(SleuthError::Cancelled)
            }
            Err(other) => Err(other),
        }
    }

    async fn run_inner(&mut self) -> Result<InvestigationReport, SleuthError> {
        let query = self.memory.state().query.clone();
        self.scratchpad.record_init(&self.session_id, &query);
        tracing::info!(session_id = %self.session_id, %query, "investigation starting");

        self.prefetch(&query).await?;

        self.triage().await?;

        self.transition(Phase::Hypothesize).await;
        self.hypothesize().await?;

        while !self.hypotheses.is_complete() {
            if self.memory.current_iteration() >= self.config.investigation.max_iterations {
                tracing::info!(
                    iterations = self.memory.current_iteration(),
                    "iteration budget exhausted, concluding"
                );
                break;
            }
            self.check_cancelled()?;

            let Some(target) = self.hypotheses.frontier().first().map(|n| (*n).clone()) else {
                break;
            };

            self.transition(Phase::Investigate).await;
            self.investigate(&target).await?;

            self.transition(Phase::Evaluate).await;
            self.evaluate(&target).await?;
        }

        self.transition(Phase::Conclude).await;
        let answer = self.conclude().await?;

        let remediation = self.maybe_remediate().await;

        if let Err(err) = self.memory.save() {
            tracing::warn!(error = %err, "failed to persist final state");
        }

        Ok(InvestigationReport {
            answer,
            investigation_id: self.session_id.clone(),
            confirmed_root_cause: self.memory.state().confirmed_root_cause.clone(),
            iterations: self.memory.current_iteration(),
            remediation,
        })
    }

    /// Infra and knowledge prefetch before TRIAGE.
    async fn prefetch(&mut self, query: &str) -> Result<(), SleuthError> {
        self.check_cancelled()?;
        if let Some(ref infra_mgr) = self.infra_mgr {
            let snapshot = infra_mgr.discover(false).await;
            self.infra_summary = Some(snapshot.build_compact_summary());
        }
        if let Err(err) = self.knowledge_mgr.init().await {
            tracing::warn!(error = %err, "knowledge prefetch failed");
        }
        if let Err(err) = self
            .knowledge_mgr
            .query_for_investigation(query, None)
            .await
        {
            tracing::warn!(error = %err, "initial knowledge query failed");
        }
        let context = self.knowledge_mgr.context();
        self.emit(InvestigationEvent::KnowledgeRetrieved {
            runbooks: context.runbooks.len(),
            postmortems: context.postmortems.len(),
            known_issues: context.known_issues.len(),
        })
        .await;
        Ok(())
    }

    /// TRIAGE: a bounded exploratory loop that surfaces services and
    /// symptoms. Completes when the model stops requesting tools or the
    /// triage budget is spent.
    async fn triage(&mut self) -> Result<(), SleuthError> {
        for _ in 0..self.config.investigation.max_triage_iterations {
            self.check_cancelled()?;
            self.memory.advance_iteration();
            self.maybe_compact().await;

            let (system, user) = self.compose_prompts(TRIAGE_INSTRUCTION).await;
            let response = match self.llm.chat(&system, &user, &self.tools.specs()).await {
                Ok(response) => response,
                Err(err) => {
                    tracing::warn!(error = %err, "triage LLM call failed");
                    break;
                }
            };
            self.handle_reasoning(&response).await;

            if response.tool_calls.is_empty() {
                self.memory.extract_from_thinking(&response.content, None);
                break;
            }
            self.execute_requested_calls(&response.tool_calls).await?;
            self.refresh_knowledge().await;
        }
        Ok(())
    }

    /// HYPOTHESIZE: parse proposed hypotheses from the model into the tree.
    async fn hypothesize(&mut self) -> Result<(), SleuthError> {
        self.check_cancelled()?;
        let (system, user) = self.compose_prompts(HYPOTHESIZE_INSTRUCTION).await;
        let response = match self.llm.chat(&system, &user, &[]).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "hypothesize LLM call failed");
                return Ok(());
            }
        };
        self.handle_reasoning(&response).await;

        let parsed = parse_hypotheses(&response.content);
        if parsed.is_empty() {
            tracing::warn!("model proposed no parseable hypotheses");
            return Ok(());
        }
        for hypothesis in parsed {
            match self.hypotheses.propose(
                &hypothesis.statement,
                hypothesis.category,
                hypothesis.priority,
                None,
            ) {
                Ok(_) => {
                    self.memory.add_hypothesis_update(
                        &hypothesis.statement,
                        HypothesisAction::Formed,
                        None,
                    );
                }
                Err(err) => tracing::warn!(error = %err, "hypothesis rejected"),
            }
        }
        self.memory
            .record_active_hypotheses(self.hypotheses.active_statements());
        Ok(())
    }

    /// INVESTIGATE: execute a bounded batch of targeted queries for the top
    /// frontier hypothesis.
    async fn investigate(&mut self, target: &HypothesisNode) -> Result<(), SleuthError> {
        self.round_result_ids.clear();

        let candidates = self.query_builder.build_queries(&target.statement);
        let context = QueryContext {
            service: self
                .memory
                .state()
                .services_discovered
                .first()
                .cloned(),
            error_type: None,
            time_range: Some("-1h".to_string()),
        };
        let refined: Vec<CausalQuery> = candidates
            .into_iter()
            .map(|query| {
                if self.query_builder.is_query_too_broad(&query.invocation) {
                    CausalQuery {
                        invocation: self
                            .query_builder
                            .suggest_refinements(&query.invocation, &context),
                        relevance: query.relevance,
                    }
                } else {
                    query
                }
            })
            .collect();
        let plan = self
            .query_builder
            .plan(&[refined], self.config.investigation.max_queries);

        tracing::debug!(
            hypothesis = %target.statement,
            queries = plan.len(),
            "executing causal queries"
        );
        for invocation in plan {
            self.check_cancelled()?;
            self.execute_invocation(&invocation).await;
        }
        self.refresh_knowledge().await;
        Ok(())
    }

    /// EVALUATE: one iteration of the per-iteration protocol, ending with a
    /// verdict that updates the hypothesis tree.
    async fn evaluate(&mut self, target: &HypothesisNode) -> Result<(), SleuthError> {
        self.memory.advance_iteration();
        self.maybe_compact().await;

        let instruction = evaluate_instruction(&target.statement);
        let (system, user) = self.compose_prompts(&instruction).await;
        let response = match self.llm.chat(&system, &user, &self.tools.specs()).await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(error = %err, "evaluate LLM call failed, keeping hypothesis active");
                return Ok(());
            }
        };
        self.handle_reasoning(&response).await;

        if !response.tool_calls.is_empty() {
            self.execute_requested_calls(&response.tool_calls).await?;
        }

        let Some((strength, reasoning)) = parse_verdict(&response.content) else {
            tracing::warn!("no parseable verdict, skipping evaluation step");
            return Ok(());
        };

        let sources = self.round_result_ids.clone();
        if let Err(err) =
            self.hypotheses
                .attach_evidence(target.id, strength, &reasoning, sources.clone())
        {
            tracing::warn!(error = %err, "failed to attach evidence");
            return Ok(());
        }
        self.memory
            .add_evidence(target.id, strength, &reasoning, sources);

        let specific = is_specific(
            &target.statement,
            &self.memory.state().services_discovered,
        );
        match decide_outcome(strength, specific) {
            HypothesisOutcome::Confirm => {
                if let Err(err) = self.hypotheses.confirm(target.id, vec![]) {
                    tracing::warn!(error = %err, "confirmation rejected");
                } else {
                    self.memory.add_hypothesis_update(
                        &target.statement,
                        HypothesisAction::Confirmed,
                        Some(&reasoning),
                    );
                }
            }
            HypothesisOutcome::Branch => {
                let subs = parse_sub_hypotheses(&response.content);
                if subs.is_empty() {
                    tracing::debug!("strong but unspecific with no refinements, keeping active");
                }
                for sub in subs.iter().take(self.config.hypothesis.max_branches) {
                    match self.hypotheses.propose(
                        sub,
                        target.category,
                        target.priority,
                        Some(target.id),
                    ) {
                        Ok(_) => {
                            self.memory
                                .add_hypothesis_update(sub, HypothesisAction::Formed, None);
                        }
                        Err(err) => tracing::warn!(error = %err, "sub-hypothesis rejected"),
                    }
                }
            }
            HypothesisOutcome::Keep => {}
            HypothesisOutcome::Prune => {
                if let Err(err) = self.hypotheses.prune(target.id, &reasoning) {
                    tracing::warn!(error = %err, "prune rejected");
                } else {
                    self.memory.add_hypothesis_update(
                        &target.statement,
                        HypothesisAction::Pruned,
                        Some(&reasoning),
                    );
                }
            }
        }
        self.memory
            .record_active_hypotheses(self.hypotheses.active_statements());
        Ok(())
    }

    /// CONCLUDE: final report. Always carries either the confirmed root
    /// cause or an explicit unknown-cause summary with the open frontier.
    async fn conclude(&mut self) -> Result<String, SleuthError> {
        self.emit(InvestigationEvent::AnswerStart).await;

        let structured = self.memory.build_final_summary();
        let (system, user) = self.compose_prompts(CONCLUDE_INSTRUCTION).await;
        let narrative = match self.llm.chat(&system, &user, &[]).await {
            Ok(response) => {
                self.handle_reasoning(&response).await;
                response.content.trim().to_string()
            }
            Err(err) => {
                tracing::warn!(error = %err, "conclude LLM call failed, using structured summary");
                String::new()
            }
        };

        let answer = if narrative.is_empty() {
            structured
        } else {
            format!("{narrative}\n\n---\n{structured}")
        };
        self.memory.update_progress_summary("investigation concluded");
        Ok(answer)
    }

    /// REMEDIATE: only with a confirmed root cause and a matching recipe.
    async fn maybe_remediate(&mut self) -> Vec<StepOutcome> {
        let Some(root_cause) = self.memory.state().confirmed_root_cause.clone() else {
            return Vec::new();
        };
        let Some(ref recipes) = self.recipes else {
            return Vec::new();
        };
        let services = self.memory.state().services_discovered.clone();
        let Some(recipe) = recipes.find_for_root_cause(&root_cause, &services).cloned() else {
            tracing::info!("no remediation recipe matches the confirmed root cause");
            return Vec::new();
        };

        self.transition(Phase::Remediate).await;
        self.memory.add_remediation_step(&format!(
            "selected recipe '{}' for root cause",
            recipe.metadata.name
        ));

        let Some(ref runner) = self.skill_runner else {
            return Vec::new();
        };
        match runner.run(&recipe).await {
            Ok(outcomes) => {
                for outcome in &outcomes {
                    self.memory.add_remediation_step(&format!(
                        "{}: executed={} error={}",
                        outcome.step,
                        outcome.executed,
                        outcome.error.as_deref().unwrap_or("none")
                    ));
                }
                outcomes
            }
            Err(err) => {
                tracing::warn!(error = %err, "remediation recipe failed");
                self.memory
                    .add_escalation(&format!("remediation failed: {err}"));
                Vec::new()
            }
        }
    }

    /// Execute one tool invocation: soft-cap consultation, timeout, result
    /// capture, discovery feedback. Errors surface as events, never abort.
    async fn execute_invocation(&mut self, invocation: &ToolInvocation) -> Option<String> {
        if self.disabled_tools.contains(&invocation.tool) {
            tracing::debug!(tool = %invocation.tool, "tool is at-limit for this session, skipping");
            return None;
        }

        let check = self
            .scratchpad
            .can_call_tool(&invocation.tool, Some(&invocation.args.to_string()));
        if let Some(warning) = check.warning {
            self.emit(InvestigationEvent::ToolLimit {
                tool: invocation.tool.clone(),
                warning,
            })
            .await;
        }

        let Some(tool) = self.tools.get(&invocation.tool) else {
            self.emit(InvestigationEvent::ToolError {
                tool: invocation.tool.clone(),
                error: "unknown tool".into(),
            })
            .await;
            return None;
        };

        self.emit(InvestigationEvent::ToolStart {
            tool: invocation.tool.clone(),
            args: invocation.args.clone(),
        })
        .await;

        let started = Instant::now();
        let per_call = Duration::from_millis(self.config.investigation.tool_timeout_ms);
        match timeout(per_call, tool.execute(invocation.args.clone())).await {
            Ok(Ok(result)) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                let result_id = self.scratchpad.append_tool_result(
                    &invocation.tool,
                    invocation.args.clone(),
                    result,
                    duration_ms,
                );
                if let Some(io_error) = self.scratchpad.take_last_io_error() {
                    tracing::warn!(error = %io_error, "scratchpad log write failed");
                }
                let services = self
                    .scratchpad
                    .get_result_by_id(&result_id)
                    .map(|r| r.summary.services.clone())
                    .unwrap_or_default();
                self.memory.discover_services(&services);
                self.round_result_ids.push(result_id.clone());
                self.emit(InvestigationEvent::ToolEnd {
                    tool: invocation.tool.clone(),
                    result_id: result_id.clone(),
                    duration_ms,
                })
                .await;
                Some(result_id)
            }
            Ok(Err(err)) => {
                if !err.is_transient() {
                    // Permanent failures (auth and the like) would loop
                    // forever; mark the tool at-limit for the session.
                    self.disabled_tools.insert(invocation.tool.clone());
                }
                self.emit(InvestigationEvent::ToolError {
                    tool: invocation.tool.clone(),
                    error: err.to_string(),
                })
                .await;
                None
            }
            Err(_) => {
                self.emit(InvestigationEvent::ToolError {
                    tool: invocation.tool.clone(),
                    error: format!("timed out after {}ms", per_call.as_millis()),
                })
                .await;
                None
            }
        }
    }

    /// Execute LLM-requested calls sequentially, in the order the model
    /// emitted them, so scratchpad ordering stays deterministic.
    async fn execute_requested_calls(
        &mut self,
        calls: &[ToolCallRequest],
    ) -> Result<(), SleuthError> {
        for call in calls {
            self.check_cancelled()?;
            let invocation = ToolInvocation::new(call.name.clone(), call.args.clone());
            self.execute_invocation(&invocation).await;
        }
        self.refresh_knowledge().await;
        Ok(())
    }

    /// Step 2 of the iteration protocol: compact when the context is heavy.
    async fn maybe_compact(&mut self) {
        if self.scratchpad.token_estimate() <= self.config.investigation.compaction_token_threshold
        {
            return;
        }
        let active_ids: Vec<HypothesisId> = self.hypotheses.active_ids();
        let state = self.memory.state();
        let plan = {
            let inputs = CompactionInputs {
                results: self.scratchpad.results(),
                notes: &state.notes,
                active_hypothesis_ids: &active_ids,
                services_discovered: &state.services_discovered,
                symptoms: &state.symptoms_identified,
                query: &state.query,
            };
            self.compactor.compact(&inputs)
        };
        let cleared = self.scratchpad.apply_compaction_plan(&plan);
        if cleared > 0 {
            self.emit(InvestigationEvent::ContextCleared { cleared }).await;
        }
    }

    /// Feed newly discovered services and symptoms back into the knowledge
    /// manager.
    async fn refresh_knowledge(&mut self) {
        let state = self.memory.state().clone();
        match self.knowledge_mgr.update_from_investigation_state(&state).await {
            Ok(added) if added > 0 => {
                let context = self.knowledge_mgr.context();
                self.emit(InvestigationEvent::KnowledgeRetrieved {
                    runbooks: context.runbooks.len(),
                    postmortems: context.postmortems.len(),
                    known_issues: context.known_issues.len(),
                })
                .await;
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "knowledge refresh failed"),
        }
    }

    async fn compose_prompts(&self, instruction: &str) -> (String, String) {
        let knowledge_summary = self.knowledge_mgr.build_compact_summary();
        let mut service_summaries = Vec::new();
        if let Some(ref service_mgr) = self.service_mgr {
            for service in self.memory.state().services_discovered.iter().take(2) {
                if let Some(context) = service_mgr
                    .build_context(service, self.knowledge_mgr.context())
                    .await
                {
                    service_summaries.push(context.build_compact_summary());
                }
            }
        }
        let system = compose_system_prompt(
            &self.tools.specs(),
            self.infra_summary.as_deref(),
            &knowledge_summary,
            &service_summaries,
        );

        let frontier = self.hypotheses.frontier();
        let user = compose_user_prompt(
            &self.scratchpad.build_tiered_context(),
            &hypothesis_context(&frontier),
            &self.memory.build_context_summary(),
            instruction,
        );
        (system, user)
    }

    async fn handle_reasoning(&mut self, response: &ChatResponse) {
        if let Some(ref thinking) = response.thinking {
            self.emit(InvestigationEvent::Thinking {
                text: thinking.clone(),
            })
            .await;
            self.scratchpad.record_thinking(thinking);
            self.memory.extract_from_thinking(thinking, None);
        }
    }

    async fn transition(&mut self, to: Phase) {
        let from = self.phase;
        if from == to {
            return;
        }
        tracing::info!(%from, %to, "phase transition");
        self.scratchpad.record_phase_transition(from, to);
        self.phase = to;
        self.emit(InvestigationEvent::PhaseTransition { from, to }).await;
    }

    fn check_cancelled(&self) -> Result<(), SleuthError> {
        if *self.cancel.borrow() {
            Err(SleuthError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn emit(&self, event: InvestigationEvent) {
        if self.events.send(event).await.is_err() {
            // Receiver dropped: the caller stopped listening. Keep going.
            tracing::debug!("event receiver dropped");
        }
    }
}
