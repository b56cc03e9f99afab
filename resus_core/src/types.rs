//! Core domain types for the resuscitation engine.
//!
//! This module defines the types shared by both clinical engines:
//! - Patient context (weight, age, trauma flag)
//! - Dose specifications and steps
//! - Questions, pathways and sub-pathways
//! - The fixed-pathway session and its audit log

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Answers keyed by question id
pub type Answers = BTreeMap<String, String>;

// ============================================================================
// Patient
// ============================================================================

/// What the core knows about the patient
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct PatientContext {
    pub weight_kg: Option<f64>,
    /// True when `weight_kg` came from the age estimate rather than the clinician
    #[serde(default)]
    pub weight_estimated: bool,
    pub age: Option<String>,
    #[serde(default)]
    pub is_trauma: bool,
}

impl PatientContext {
    /// Build a patient context, discarding unusable weights.
    ///
    /// A weight that is not a positive finite number is dropped (logged at
    /// warn) so every dose falls back to per-kg text. When no weight is given
    /// but the age parses, the age-based estimate is used and flagged.
    pub fn new(weight_kg: Option<f64>, age: Option<&str>, is_trauma: bool) -> Self {
        let weight_kg = match weight_kg {
            Some(w) if w.is_finite() && w > 0.0 => Some(w),
            Some(w) => {
                tracing::warn!("Discarding invalid patient weight {} kg", w);
                None
            }
            None => None,
        };

        let age = age
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string);

        let (weight_kg, weight_estimated) = match (weight_kg, age.as_deref()) {
            (Some(w), _) => (Some(w), false),
            (None, Some(a)) => match crate::weight::estimate_weight_from_age(a) {
                Some(estimate) => {
                    tracing::info!("Estimated weight {} kg from age '{}'", estimate, a);
                    (Some(estimate), true)
                }
                None => (None, false),
            },
            (None, None) => (None, false),
        };

        Self {
            weight_kg,
            weight_estimated,
            age,
            is_trauma,
        }
    }

    /// Parsed age, if the free text is recognizable
    pub fn parsed_age(&self) -> Option<crate::weight::Age> {
        self.age.as_deref().and_then(crate::weight::parse_age)
    }

    /// Younger than 28 days. Unknown age is not a neonate.
    pub fn is_neonate(&self) -> bool {
        self.parsed_age()
            .map(|age| age.in_days() < crate::weight::NEONATE_DAYS)
            .unwrap_or(false)
    }

    pub fn age_in_years(&self) -> Option<f64> {
        self.parsed_age().map(|age| age.in_years())
    }

    /// One-line description for logs and exports
    pub fn describe(&self) -> String {
        let weight = match self.weight_kg {
            Some(w) if self.weight_estimated => format!("{} kg (estimated)", w),
            Some(w) => format!("{} kg", w),
            None => "weight unknown".to_string(),
        };
        let age = self.age.as_deref().unwrap_or("age unknown");
        let trauma = if self.is_trauma { "trauma" } else { "medical" };
        format!("{}, {}, {}", weight, age, trauma)
    }
}

// ============================================================================
// Doses and Steps
// ============================================================================

/// Weight-scaled drug or energy dose
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DoseSpec {
    pub drug: String,
    pub per_kg: f64,
    pub unit: String,
    pub route: String,
    pub max_dose: Option<f64>,
    pub concentration: Option<String>,
    pub preparation: Option<String>,
    pub frequency: Option<String>,
}

impl DoseSpec {
    pub fn new(drug: &str, per_kg: f64, unit: &str, route: &str) -> Self {
        Self {
            drug: drug.into(),
            per_kg,
            unit: unit.into(),
            route: route.into(),
            max_dose: None,
            concentration: None,
            preparation: None,
            frequency: None,
        }
    }

    pub fn max(mut self, max_dose: f64) -> Self {
        self.max_dose = Some(max_dose);
        self
    }

    pub fn concentration(mut self, text: &str) -> Self {
        self.concentration = Some(text.into());
        self
    }

    pub fn preparation(mut self, text: &str) -> Self {
        self.preparation = Some(text.into());
        self
    }

    pub fn frequency(mut self, text: &str) -> Self {
        self.frequency = Some(text.into());
        self
    }
}

/// A single clinician action within a pathway
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Step {
    pub id: String,
    pub action: String,
    pub detail: Option<String>,
    pub dose: Option<DoseSpec>,
    /// Advisory countdown owned by the presentation layer
    pub timer_seconds: Option<u32>,
    /// Prompt shown after the step; its presence routes through REASSESS
    pub reassess: Option<String>,
    pub escalation: Option<String>,
    pub critical: bool,
}

impl Step {
    pub fn new(id: &str, action: &str) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            detail: None,
            dose: None,
            timer_seconds: None,
            reassess: None,
            escalation: None,
            critical: false,
        }
    }

    pub fn detail(mut self, text: &str) -> Self {
        self.detail = Some(text.into());
        self
    }

    pub fn dose(mut self, dose: DoseSpec) -> Self {
        self.dose = Some(dose);
        self
    }

    pub fn timer(mut self, seconds: u32) -> Self {
        self.timer_seconds = Some(seconds);
        self
    }

    pub fn reassess(mut self, prompt: &str) -> Self {
        self.reassess = Some(prompt.into());
        self
    }

    pub fn escalation(mut self, text: &str) -> Self {
        self.escalation = Some(text.into());
        self
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

// ============================================================================
// Questions and Pathways
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AnswerOption {
    pub value: String,
    pub label: String,
}

/// A question with a closed set of answers
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Question {
    pub id: String,
    pub prompt: String,
    pub options: Vec<AnswerOption>,
}

impl Question {
    pub fn new(id: &str, prompt: &str, options: &[(&str, &str)]) -> Self {
        Self {
            id: id.into(),
            prompt: prompt.into(),
            options: options
                .iter()
                .map(|(value, label)| AnswerOption {
                    value: (*value).into(),
                    label: (*label).into(),
                })
                .collect(),
        }
    }

    /// Whether `value` is one of the offered answers
    pub fn accepts(&self, value: &str) -> bool {
        self.options.iter().any(|o| o.value == value)
    }
}

/// Predicate over answered clarifying questions
pub type MatchFn = fn(&Answers) -> bool;

#[derive(Clone, Debug)]
pub struct SubPathway {
    pub id: String,
    pub name: String,
    pub matches: MatchFn,
    pub steps: Vec<Step>,
}

/// A named clinical protocol
#[derive(Clone, Debug)]
pub struct Pathway {
    pub id: String,
    pub name: String,
    pub icon: String,
    pub questions: Vec<Question>,
    /// Evaluated in declared order, first match wins
    pub sub_pathways: Vec<SubPathway>,
    pub default_steps: Vec<Step>,
}

impl Pathway {
    pub fn sub_pathway(&self, id: &str) -> Option<&SubPathway> {
        self.sub_pathways.iter().find(|s| s.id == id)
    }
}

// ============================================================================
// Inputs
// ============================================================================

/// A discrete clinical input dispatched by the presentation layer.
///
/// `kind` is either a question id (with the answer in `value`) or one of the
/// command kinds below.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Input {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl Input {
    pub const SELECT_PATHWAY: &'static str = "select_pathway";
    pub const STEP_DONE: &'static str = "step_done";
    pub const IMPROVING: &'static str = "improving";
    pub const BEGIN: &'static str = "begin";
    pub const INTERVENTION_DONE: &'static str = "intervention_done";
    pub const RESOLVE_THREAT: &'static str = "resolve_threat";
    pub const ROSC: &'static str = "rosc";
    pub const ACKNOWLEDGE_ALERT: &'static str = "acknowledge_alert";
    pub const DIAGNOSIS: &'static str = "diagnosis";

    /// Build an input, normalizing the kind to trimmed lower case
    pub fn new(kind: &str, value: &str) -> Self {
        Self {
            kind: kind.trim().to_lowercase(),
            value: value.trim().to_string(),
        }
    }

    pub fn answer(question_id: &str, value: &str) -> Self {
        Self::new(question_id, value)
    }

    pub fn select_pathway(pathway_id: &str) -> Self {
        Self::new(Self::SELECT_PATHWAY, pathway_id)
    }

    pub fn step_done() -> Self {
        Self::new(Self::STEP_DONE, "")
    }

    pub fn improving(yes: bool) -> Self {
        Self::new(Self::IMPROVING, if yes { "yes" } else { "no" })
    }

    /// Answer value in the canonical form used for matching
    pub fn normalized_value(&self) -> String {
        self.value.trim().to_lowercase()
    }
}

// ============================================================================
// Audit Log
// ============================================================================

/// Primary-survey letter
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Letter {
    X,
    A,
    B,
    C,
    D,
    E,
}

impl Letter {
    pub const ORDER: [Letter; 6] = [
        Letter::X,
        Letter::A,
        Letter::B,
        Letter::C,
        Letter::D,
        Letter::E,
    ];

    /// The letter after this one, or None after E
    pub fn next(self) -> Option<Letter> {
        let idx = Self::ORDER.iter().position(|l| *l == self)?;
        Self::ORDER.get(idx + 1).copied()
    }

    pub fn title(self) -> &'static str {
        match self {
            Letter::X => "Catastrophic hemorrhage",
            Letter::A => "Airway",
            Letter::B => "Breathing",
            Letter::C => "Circulation",
            Letter::D => "Disability",
            Letter::E => "Exposure",
        }
    }
}

impl fmt::Display for Letter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// What a log entry records
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStart,
    Triage,
    PathwaySelected,
    Clarify,
    PhaseChange,
    StepCompleted,
    NextStep,
    Escalation,
    Stabilized,
    Finding,
    Threat,
    Intervention,
    ThreatResolved,
    SafetyAlert,
    AlertAcknowledged,
    LetterAdvanced,
    Diagnosis,
}

impl EventKind {
    pub fn label(self) -> &'static str {
        match self {
            EventKind::SessionStart => "START",
            EventKind::Triage => "TRIAGE",
            EventKind::PathwaySelected => "PATHWAY",
            EventKind::Clarify => "CLARIFY",
            EventKind::PhaseChange => "PHASE",
            EventKind::StepCompleted => "STEP",
            EventKind::NextStep => "NEXT",
            EventKind::Escalation => "ESCALATION",
            EventKind::Stabilized => "STABILIZED",
            EventKind::Finding => "FINDING",
            EventKind::Threat => "THREAT",
            EventKind::Intervention => "INTERVENTION",
            EventKind::ThreatResolved => "RESOLVED",
            EventKind::SafetyAlert => "SAFETY",
            EventKind::AlertAcknowledged => "ACK",
            EventKind::LetterAdvanced => "SURVEY",
            EventKind::Diagnosis => "DIAGNOSIS",
        }
    }
}

/// One chronological audit entry
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub letter: Option<Letter>,
    pub detail: String,
}

/// Append an entry, never letting timestamps run backwards
pub(crate) fn record(
    log: &mut Vec<LogEntry>,
    now: DateTime<Utc>,
    kind: EventKind,
    letter: Option<Letter>,
    detail: impl Into<String>,
) {
    let timestamp = log.last().map_or(now, |last| last.timestamp.max(now));
    log.push(LogEntry {
        timestamp,
        kind,
        letter,
        detail: detail.into(),
    });
}

// ============================================================================
// Fixed-Pathway Session
// ============================================================================

/// Phase of the fixed-pathway state machine
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Triage,
    Identify,
    Clarify,
    Intervene,
    Reassess,
    Stabilized,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Triage => "TRIAGE",
            Phase::Identify => "IDENTIFY",
            Phase::Clarify => "CLARIFY",
            Phase::Intervene => "INTERVENE",
            Phase::Reassess => "REASSESS",
            Phase::Stabilized => "STABILIZED",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CompletedStep {
    pub step_id: String,
    pub completed_at: DateTime<Utc>,
}

/// One resuscitation episode driven through the fixed pathways
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub id: Uuid,
    pub phase: Phase,
    pub pathway_id: Option<String>,
    pub sub_pathway_id: Option<String>,
    /// Triage answers (breathing, pulse, consciousness)
    pub triage: Answers,
    /// Clarifying-question answers for the selected pathway
    pub answers: Answers,
    pub completed_steps: Vec<CompletedStep>,
    pub current_step_index: usize,
    pub patient: PatientContext,
    pub diagnosis: Option<String>,
    pub started_at: DateTime<Utc>,
    pub log: Vec<LogEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_letter_order() {
        assert_eq!(Letter::X.next(), Some(Letter::A));
        assert_eq!(Letter::D.next(), Some(Letter::E));
        assert_eq!(Letter::E.next(), None);
    }

    #[test]
    fn test_patient_discards_invalid_weight() {
        let patient = PatientContext::new(Some(-4.0), None, false);
        assert_eq!(patient.weight_kg, None);

        let patient = PatientContext::new(Some(0.0), None, false);
        assert_eq!(patient.weight_kg, None);
    }

    #[test]
    fn test_patient_estimates_weight_from_age() {
        let patient = PatientContext::new(None, Some("3 years"), false);
        assert_eq!(patient.weight_kg, Some(14.0));
        assert!(patient.weight_estimated);

        let patient = PatientContext::new(Some(11.0), Some("3 years"), false);
        assert_eq!(patient.weight_kg, Some(11.0));
        assert!(!patient.weight_estimated);
    }

    #[test]
    fn test_neonate_detection() {
        assert!(PatientContext::new(None, Some("5 days"), false).is_neonate());
        assert!(!PatientContext::new(None, Some("2 years"), false).is_neonate());
        assert!(!PatientContext::new(Some(3.0), None, false).is_neonate());
    }

    #[test]
    fn test_record_clamps_timestamps() {
        let mut log = Vec::new();
        let t0 = Utc::now();
        record(&mut log, t0, EventKind::SessionStart, None, "start");
        record(
            &mut log,
            t0 - chrono::Duration::seconds(5),
            EventKind::Triage,
            None,
            "late clock",
        );
        assert_eq!(log[1].timestamp, t0);
    }

    #[test]
    fn test_input_normalizes_kind() {
        let input = Input::new("  Breathing ", " No ");
        assert_eq!(input.kind, "breathing");
        assert_eq!(input.normalized_value(), "no");
    }
}
