//! Structured findings that survive context compaction.
//!
//! Notes are append-only, keyed by iteration and hypothesis, and persisted
//! as `{session_id}.json` after every write. The extractor mines the model's
//! reasoning text for findings using configurable keyword lexicons.

use std::path::{Path, PathBuf};

use regex::Regex;
use serde::{Deserialize, Serialize};

use sleuth_core::error::SleuthError;
use sleuth_core::investigation::{
    EvidenceStrength, HypothesisId, InvestigationNote, InvestigationState, NoteType,
};

/// What happened to a hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HypothesisAction {
    Formed,
    Pruned,
    Confirmed,
}

/// Keyword lexicons used by [`InvestigationMemory::extract_from_thinking`].
/// Configuration, not code: operators can extend these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryLexicons {
    pub root_cause: Vec<String>,
    pub symptom: Vec<String>,
    pub evidence: Vec<String>,
}

impl Default for MemoryLexicons {
    fn default() -> Self {
        Self {
            root_cause: ["root cause", "caused by", "because of", "due to", "culprit"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            symptom: [
                "symptom", "observing", "elevated", "spike", "degraded", "failing", "timing out",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            evidence: [
                "evidence", "confirms", "shows that", "indicates", "consistent with", "rules out",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

const MIN_SENTENCE_LEN: usize = 15;

pub struct InvestigationMemory {
    state: InvestigationState,
    directory: PathBuf,
    lexicons: MemoryLexicons,
    service_pattern: Regex,
}

impl InvestigationMemory {
    /// Open the memory for a session: load the prior file when present,
    /// otherwise start fresh.
    pub fn open(
        query: &str,
        incident_id: Option<String>,
        session_id: &str,
        directory: PathBuf,
    ) -> Self {
        let state = match Self::load(&directory, session_id) {
            Ok(Some(state)) => {
                tracing::info!(session_id, "loaded prior investigation state");
                state
            }
            Ok(None) => InvestigationState::new(query, incident_id, session_id.to_string()),
            Err(err) => {
                tracing::warn!(session_id, error = %err, "failed to load prior state, starting fresh");
                InvestigationState::new(query, incident_id, session_id.to_string())
            }
        };
        Self {
            state,
            directory,
            lexicons: MemoryLexicons::default(),
            // Hyphen/underscore-joined identifiers read as service names.
            service_pattern: Regex::new(r"\b[a-z][a-z0-9]*(?:[-_][a-z0-9]+)+\b")
                .expect("service pattern is valid"),
        }
    }

    pub fn with_lexicons(mut self, lexicons: MemoryLexicons) -> Self {
        self.lexicons = lexicons;
        self
    }

    pub fn state(&self) -> &InvestigationState {
        &self.state
    }

    pub fn notes(&self) -> &[InvestigationNote] {
        &self.state.notes
    }

    pub fn current_iteration(&self) -> u32 {
        self.state.current_iteration
    }

    pub fn advance_iteration(&mut self) {
        self.state.current_iteration += 1;
        self.persist();
    }

    pub fn update_progress_summary(&mut self, text: &str) {
        self.state.progress_summary = text.to_string();
        self.persist();
    }

    pub fn record_active_hypotheses(&mut self, statements: Vec<String>) {
        self.state.active_hypotheses = statements;
        self.persist();
    }

    /// Record services surfaced outside of note-taking (tool summaries).
    pub fn discover_services(&mut self, services: &[String]) {
        let mut changed = false;
        for service in services {
            changed |= self.state.discover_service(service);
        }
        if changed {
            self.persist();
        }
    }

    pub fn add_symptom(&mut self, content: &str, services: Vec<String>, sources: Vec<String>) {
        self.state.identify_symptom(content);
        for service in &services {
            self.state.discover_service(service);
        }
        let note = InvestigationNote::new(NoteType::Symptom, content, self.state.current_iteration)
            .with_services(services)
            .with_sources(sources);
        self.append_note(note);
    }

    pub fn add_evidence(
        &mut self,
        hypothesis_id: HypothesisId,
        strength: EvidenceStrength,
        content: &str,
        sources: Vec<String>,
    ) {
        let confidence = match strength {
            EvidenceStrength::Strong => 0.9,
            EvidenceStrength::Weak => 0.5,
            EvidenceStrength::Contradicting => 0.8,
            _ => 0.3,
        };
        let note = InvestigationNote::new(NoteType::Evidence, content, self.state.current_iteration)
            .with_strength(strength)
            .with_confidence(confidence)
            .with_sources(sources)
            .for_hypothesis(hypothesis_id);
        self.append_note(note);
    }

    pub fn add_hypothesis_update(
        &mut self,
        statement: &str,
        action: HypothesisAction,
        reasoning: Option<&str>,
    ) {
        let content = match reasoning {
            Some(reasoning) => format!("{statement} [{action:?}: {reasoning}]"),
            None => format!("{statement} [{action:?}]"),
        };
        match action {
            HypothesisAction::Formed => {
                if !self.state.active_hypotheses.iter().any(|h| h == statement) {
                    self.state.active_hypotheses.push(statement.to_string());
                }
            }
            HypothesisAction::Pruned => {
                self.state.active_hypotheses.retain(|h| h != statement);
                self.state.pruned_hypotheses.push(statement.to_string());
            }
            HypothesisAction::Confirmed => {
                self.state.active_hypotheses.retain(|h| h != statement);
                self.confirm_root_cause(statement);
            }
        }
        let note = InvestigationNote::new(
            NoteType::HypothesisUpdate,
            content,
            self.state.current_iteration,
        );
        self.append_note(note);
    }

    /// Confirmation side effect: the root cause takes the hypothesis
    /// statement, and all strong-evidence note contents are aggregated into
    /// a final candidate note.
    fn confirm_root_cause(&mut self, statement: &str) {
        self.state.confirmed_root_cause = Some(statement.to_string());
        let strong: Vec<String> = self
            .state
            .notes
            .iter()
            .filter(|n| n.evidence_strength == Some(EvidenceStrength::Strong))
            .map(|n| n.content.clone())
            .collect();
        if !strong.is_empty() {
            let note = InvestigationNote::new(
                NoteType::RootCauseCandidate,
                format!("{statement} (supported by: {})", strong.join("; ")),
                self.state.current_iteration,
            )
            .with_confidence(0.9);
            self.append_note(note);
        }
    }

    pub fn add_root_cause_candidate(&mut self, content: &str, confidence: f64) {
        let note = InvestigationNote::new(
            NoteType::RootCauseCandidate,
            content,
            self.state.current_iteration,
        )
        .with_confidence(confidence);
        self.append_note(note);
    }

    pub fn add_service_impact(&mut self, service: &str, content: &str) {
        self.state.discover_service(service);
        let note = InvestigationNote::new(
            NoteType::ServiceImpact,
            content,
            self.state.current_iteration,
        )
        .with_services(vec![service.to_string()]);
        self.append_note(note);
    }

    pub fn add_remediation_step(&mut self, content: &str) {
        let note = InvestigationNote::new(
            NoteType::RemediationStep,
            content,
            self.state.current_iteration,
        );
        self.append_note(note);
    }

    pub fn add_escalation(&mut self, content: &str) {
        let note =
            InvestigationNote::new(NoteType::Escalation, content, self.state.current_iteration);
        self.append_note(note);
    }

    /// Mine the model's reasoning text: sentence-split, classify by lexicon,
    /// extract service names. Best-effort by design.
    pub fn extract_from_thinking(&mut self, text: &str, result_id: Option<&str>) -> usize {
        let sources: Vec<String> = result_id.map(|id| vec![id.to_string()]).unwrap_or_default();
        let mut appended = 0;

        for sentence in split_sentences(text) {
            if sentence.len() <= MIN_SENTENCE_LEN {
                continue;
            }
            let lowered = sentence.to_lowercase();
            let services = self.extract_services(&lowered);
            for service in &services {
                self.state.discover_service(service);
            }

            let note_type = if self.lexicons.root_cause.iter().any(|kw| lowered.contains(kw)) {
                Some(NoteType::RootCauseCandidate)
            } else if self.lexicons.symptom.iter().any(|kw| lowered.contains(kw)) {
                Some(NoteType::Symptom)
            } else if self.lexicons.evidence.iter().any(|kw| lowered.contains(kw)) {
                Some(NoteType::Evidence)
            } else {
                None
            };

            let Some(note_type) = note_type else {
                continue;
            };
            if note_type == NoteType::Symptom {
                self.state.identify_symptom(sentence.trim());
            }
            let note = InvestigationNote::new(
                note_type,
                sentence.trim(),
                self.state.current_iteration,
            )
            .with_services(services)
            .with_sources(sources.clone());
            self.append_note(note);
            appended += 1;
        }
        appended
    }

    fn extract_services(&self, lowered: &str) -> Vec<String> {
        let mut services = Vec::new();
        for found in self.service_pattern.find_iter(lowered) {
            let name = found.as_str().to_string();
            if !services.contains(&name) {
                services.push(name);
            }
        }
        services
    }

    /// Per-iteration prompt injection.
    pub fn build_context_summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Iteration {}: {} notes so far.\n",
            self.state.current_iteration,
            self.state.notes.len()
        ));
        if !self.state.progress_summary.is_empty() {
            out.push_str(&format!("Progress: {}\n", self.state.progress_summary));
        }
        if !self.state.symptoms_identified.is_empty() {
            out.push_str(&format!(
                "Symptoms: {}\n",
                self.state.symptoms_identified.join("; ")
            ));
        }
        if !self.state.services_discovered.is_empty() {
            out.push_str(&format!(
                "Services involved: {}\n",
                self.state.services_discovered.join(", ")
            ));
        }
        if let Some(ref cause) = self.state.confirmed_root_cause {
            out.push_str(&format!("Confirmed root cause: {cause}\n"));
        }
        for note in self.state.notes.iter().rev().take(8).rev() {
            out.push_str(&format!("- [{:?}] {}\n", note.note_type, note.content));
        }
        out
    }

    /// The concluding report body.
    pub fn build_final_summary(&self) -> String {
        let mut out = String::new();
        match &self.state.confirmed_root_cause {
            Some(cause) => out.push_str(&format!("Root cause: {cause}\n\n")),
            None => out.push_str("Root cause: not confirmed (insufficient evidence)\n\n"),
        }
        if !self.state.symptoms_identified.is_empty() {
            out.push_str(&format!(
                "Symptoms observed:\n{}\n\n",
                bullets(&self.state.symptoms_identified)
            ));
        }
        let evidence: Vec<String> = self
            .state
            .notes
            .iter()
            .filter(|n| n.note_type == NoteType::Evidence)
            .map(|n| {
                let strength = n
                    .evidence_strength
                    .map(|s| format!("{s:?}").to_lowercase())
                    .unwrap_or_else(|| "unrated".into());
                format!("{} ({strength}; sources: {})", n.content, n.source_result_ids.join(", "))
            })
            .collect();
        if !evidence.is_empty() {
            out.push_str(&format!("Evidence chain:\n{}\n\n", bullets(&evidence)));
        }
        if !self.state.pruned_hypotheses.is_empty() {
            out.push_str(&format!(
                "Ruled out:\n{}\n\n",
                bullets(&self.state.pruned_hypotheses)
            ));
        }
        if !self.state.active_hypotheses.is_empty() {
            out.push_str(&format!(
                "Still open:\n{}\n",
                bullets(&self.state.active_hypotheses)
            ));
        }
        out
    }

    fn append_note(&mut self, note: InvestigationNote) {
        self.state.notes.push(note);
        self.persist();
    }

    /// Write the state blob. Failures are logged, never fatal: the in-memory
    /// state remains authoritative for the rest of the run.
    fn persist(&mut self) {
        self.state.touch();
        if let Err(err) = self.save() {
            tracing::warn!(error = %err, "failed to persist investigation state");
        }
    }

    pub fn save(&self) -> Result<(), SleuthError> {
        std::fs::create_dir_all(&self.directory)?;
        let path = self.file_path();
        let encoded = serde_json::to_vec_pretty(&self.state)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        std::fs::write(path, encoded)?;
        Ok(())
    }

    pub fn load(
        directory: &Path,
        session_id: &str,
    ) -> Result<Option<InvestigationState>, SleuthError> {
        let path = directory.join(format!("{session_id}.json"));
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let state = serde_json::from_slice(&bytes)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        Ok(Some(state))
    }

    fn file_path(&self) -> PathBuf {
        self.directory
            .join(format!("{}.json", self.state.session_id))
    }
}

fn split_sentences(text: &str) -> Vec<&str> {
    text.split(|c| matches!(c, '.' | '!' | '?' | '\n'))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

fn bullets(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}
