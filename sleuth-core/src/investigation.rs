use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type NoteId = Uuid;
pub type HypothesisId = Uuid;

/// How strongly a tool result supports (or contradicts) a hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceStrength {
    Pending,
    None,
    Weak,
    Strong,
    Contradicting,
}

/// Typed finding appended to the investigation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteType {
    Symptom,
    Evidence,
    HypothesisUpdate,
    RootCauseCandidate,
    RemediationStep,
    Escalation,
    ServiceImpact,
}

/// A structured finding. Notes are append-only per investigation and survive
/// context compaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationNote {
    pub id: NoteId,
    pub note_type: NoteType,
    pub content: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_strength: Option<EvidenceStrength>,
    #[serde(default)]
    pub source_result_ids: Vec<String>,
    #[serde(default)]
    pub services_involved: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hypothesis_id: Option<HypothesisId>,
    pub iteration: u32,
    pub timestamp: DateTime<Utc>,
}

impl InvestigationNote {
    pub fn new(note_type: NoteType, content: impl Into<String>, iteration: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            note_type,
            content: content.into(),
            confidence: 0.5,
            evidence_strength: None,
            source_result_ids: Vec::new(),
            services_involved: Vec::new(),
            hypothesis_id: None,
            iteration,
            timestamp: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    pub fn with_strength(mut self, strength: EvidenceStrength) -> Self {
        self.evidence_strength = Some(strength);
        self
    }

    pub fn with_sources(mut self, result_ids: Vec<String>) -> Self {
        self.source_result_ids = result_ids;
        self
    }

    pub fn with_services(mut self, services: Vec<String>) -> Self {
        self.services_involved = services;
        self
    }

    pub fn for_hypothesis(mut self, hypothesis_id: HypothesisId) -> Self {
        self.hypothesis_id = Some(hypothesis_id);
        self
    }
}

/// The persisted shape of an investigation. Created at start, saved after
/// every iteration, loadable by session id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvestigationState {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    pub session_id: String,
    #[serde(default)]
    pub notes: Vec<InvestigationNote>,
    #[serde(default)]
    pub progress_summary: String,
    #[serde(default)]
    pub services_discovered: Vec<String>,
    #[serde(default)]
    pub symptoms_identified: Vec<String>,
    #[serde(default)]
    pub active_hypotheses: Vec<String>,
    #[serde(default)]
    pub pruned_hypotheses: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_root_cause: Option<String>,
    pub current_iteration: u32,
    pub started_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl InvestigationState {
    pub fn new(query: impl Into<String>, incident_id: Option<String>, session_id: String) -> Self {
        let now = Utc::now();
        Self {
            query: query.into(),
            incident_id,
            session_id,
            notes: Vec::new(),
            progress_summary: String::new(),
            services_discovered: Vec::new(),
            symptoms_identified: Vec::new(),
            active_hypotheses: Vec::new(),
            pruned_hypotheses: Vec::new(),
            confirmed_root_cause: None,
            current_iteration: 0,
            started_at: now,
            last_updated_at: now,
        }
    }

    /// Record a discovered service if unseen. Returns true when it was new.
    pub fn discover_service(&mut self, service: &str) -> bool {
        if self.services_discovered.iter().any(|s| s == service) {
            return false;
        }
        self.services_discovered.push(service.to_string());
        true
    }

    /// Record an identified symptom if unseen. Returns true when it was new.
    pub fn identify_symptom(&mut self, symptom: &str) -> bool {
        if self.symptoms_identified.iter().any(|s| s == symptom) {
            return false;
        }
        self.symptoms_identified.push(symptom.to_string());
        true
    }

    pub fn touch(&mut self) {
        self.last_updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_builders_compose() {
        let hyp = Uuid::new_v4();
        let note = InvestigationNote::new(NoteType::Evidence, "p99 spiked at 14:02", 3)
            .with_confidence(0.8)
            .with_strength(EvidenceStrength::Strong)
            .with_sources(vec!["tr_a1".into()])
            .with_services(vec!["payments-api".into()])
            .for_hypothesis(hyp);

        assert_eq!(note.note_type, NoteType::Evidence);
        assert_eq!(note.confidence, 0.8);
        assert_eq!(note.evidence_strength, Some(EvidenceStrength::Strong));
        assert_eq!(note.hypothesis_id, Some(hyp));
        assert_eq!(note.iteration, 3);
    }

    #[test]
    fn confidence_is_clamped() {
        let note = InvestigationNote::new(NoteType::Symptom, "x", 0).with_confidence(1.7);
        assert_eq!(note.confidence, 1.0);
    }

    #[test]
    fn discovery_dedupes() {
        let mut state = InvestigationState::new("why is checkout slow", None, "s1".into());
        assert!(state.discover_service("payments-api"));
        assert!(!state.discover_service("payments-api"));
        assert!(state.identify_symptom("elevated latency"));
        assert!(!state.identify_symptom("elevated latency"));
        assert_eq!(state.services_discovered.len(), 1);
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = InvestigationState::new("query", Some("INC-1234".into()), "sess".into());
        state
            .notes
            .push(InvestigationNote::new(NoteType::Symptom, "5xx spike", 1));
        let encoded = serde_json::to_string(&state).unwrap();
        let decoded: InvestigationState = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.query, state.query);
        assert_eq!(decoded.incident_id.as_deref(), Some("INC-1234"));
        assert_eq!(decoded.notes.len(), 1);
        assert_eq!(decoded.started_at, state.started_at);
    }
}
