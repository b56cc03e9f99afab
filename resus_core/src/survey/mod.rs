//! Letter-by-letter primary survey engine.
//!
//! Instead of fixed pathways this engine walks the X/A/B/C/D/E letters,
//! records each answer as a finding, and evaluates a rule table that turns
//! accumulated findings into threats with generated interventions. Safety
//! rules watch the cumulative record of completed interventions.

mod engine;
mod questions;
mod safety;
mod threats;

pub use engine::{create_survey, current_questions, dispatch, pending_interventions};
pub use safety::SafetyRule;
pub use threats::ThreatRule;

use crate::types::{record, Answers, EventKind, Letter, LogEntry, PatientContext, Question, Step};
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

static DEFAULT_PROTOCOL: Lazy<SurveyProtocol> = Lazy::new(build_default_protocol);

/// Get a reference to the built-in survey protocol
pub fn get_default_protocol() -> &'static SurveyProtocol {
    &DEFAULT_PROTOCOL
}

pub fn build_default_protocol() -> SurveyProtocol {
    SurveyProtocol {
        questions: questions::default_questions(),
        threat_rules: threats::default_rules(),
        safety_rules: safety::default_rules(),
    }
}

// ============================================================================
// Protocol tables
// ============================================================================

/// A survey question bound to its letter
#[derive(Clone, Debug)]
pub struct SurveyQuestion {
    pub letter: Letter,
    pub question: Question,
    /// Only asked when the patient is a trauma case
    pub trauma_only: bool,
}

/// Questions and rule tables, evaluated in declared order
#[derive(Clone, Debug)]
pub struct SurveyProtocol {
    pub questions: Vec<SurveyQuestion>,
    pub threat_rules: Vec<ThreatRule>,
    pub safety_rules: Vec<SafetyRule>,
}

impl SurveyProtocol {
    /// Questions asked at `letter` for this patient
    pub fn questions_for<'a>(
        &'a self,
        letter: Letter,
        patient: &PatientContext,
    ) -> impl Iterator<Item = &'a SurveyQuestion> + 'a {
        let trauma = patient.is_trauma;
        self.questions
            .iter()
            .filter(move |q| q.letter == letter && (!q.trauma_only || trauma))
    }

    pub fn question(&self, id: &str) -> Option<&SurveyQuestion> {
        self.questions.iter().find(|q| q.question.id == id)
    }

    /// Returns a list of validation errors, or empty Vec if valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let mut question_ids = HashSet::new();
        for q in &self.questions {
            if q.question.id.is_empty() {
                errors.push("Survey question has empty ID".to_string());
            }
            if !question_ids.insert(q.question.id.as_str()) {
                errors.push(format!("Duplicate survey question '{}'", q.question.id));
            }
            if q.question.options.is_empty() {
                errors.push(format!("Survey question '{}' has no options", q.question.id));
            }
        }

        let mut rule_ids = HashSet::new();
        for rule in &self.threat_rules {
            if !rule_ids.insert(rule.id) {
                errors.push(format!("Duplicate threat rule '{}'", rule.id));
            }
            for input in rule.inputs {
                if !question_ids.contains(input) {
                    errors.push(format!(
                        "Threat rule '{}' reads unknown question '{}'",
                        rule.id, input
                    ));
                }
            }
        }

        let mut safety_ids = HashSet::new();
        for rule in &self.safety_rules {
            if !safety_ids.insert(rule.id) {
                errors.push(format!("Duplicate safety rule '{}'", rule.id));
            }
            if let Some(threat) = rule.threat_id {
                if !rule_ids.contains(threat) {
                    errors.push(format!(
                        "Safety rule '{}' refers to unknown threat '{}'",
                        rule.id, threat
                    ));
                }
            }
        }

        errors
    }
}

// ============================================================================
// Session types
// ============================================================================

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SurveyPhase {
    Idle,
    PrimarySurvey,
    Intervention,
    CardiacArrest,
    SecondarySurvey,
}

impl fmt::Display for SurveyPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SurveyPhase::Idle => "IDLE",
            SurveyPhase::PrimarySurvey => "PRIMARY_SURVEY",
            SurveyPhase::Intervention => "INTERVENTION",
            SurveyPhase::CardiacArrest => "CARDIAC_ARREST",
            SurveyPhase::SecondarySurvey => "SECONDARY_SURVEY",
        };
        f.write_str(name)
    }
}

/// Ordered from least to most severe
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ThreatSeverity {
    Monitor,
    Urgent,
    Critical,
}

impl fmt::Display for ThreatSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ThreatSeverity::Monitor => "monitor",
            ThreatSeverity::Urgent => "urgent",
            ThreatSeverity::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// A recorded answer
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Finding {
    /// Same as the question id
    pub id: String,
    pub letter: Letter,
    pub description: String,
    /// Highest severity of the threats this finding contributed to
    pub severity: Option<ThreatSeverity>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Intervention {
    pub step: Step,
    pub completed: bool,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<Step> for Intervention {
    fn from(step: Step) -> Self {
        Self {
            step,
            completed: false,
            completed_at: None,
        }
    }
}

/// A condition inferred from findings. Never removed, only resolved.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Threat {
    pub id: String,
    pub name: String,
    pub letter: Letter,
    pub severity: ThreatSeverity,
    /// Cardiac arrest threats end only on ROSC
    pub arrest: bool,
    pub interventions: Vec<Intervention>,
    pub resolved: bool,
    pub findings: Vec<String>,
    pub identified_at: DateTime<Utc>,
}

impl Threat {
    pub fn all_done(&self) -> bool {
        self.interventions.iter().all(|i| i.completed)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Danger,
}

/// Raised by a safety rule; stays until acknowledged
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SafetyAlert {
    /// Same as the safety rule id
    pub id: String,
    pub message: String,
    pub severity: AlertSeverity,
    pub raised_at: DateTime<Utc>,
    pub acknowledged: bool,
    pub threat_id: Option<String>,
}

/// One resuscitation episode driven through the primary survey
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SurveySession {
    pub id: Uuid,
    pub phase: SurveyPhase,
    pub letter: Letter,
    pub patient: PatientContext,
    pub findings: Vec<Finding>,
    pub threats: Vec<Threat>,
    pub alerts: Vec<SafetyAlert>,
    pub diagnosis: Option<String>,
    pub started_at: DateTime<Utc>,
    pub log: Vec<LogEntry>,
}

impl SurveySession {
    /// Findings as a question id to answer map
    pub fn answers(&self) -> Answers {
        self.findings
            .iter()
            .map(|f| (f.id.clone(), f.description.clone()))
            .collect()
    }

    pub fn finding(&self, id: &str) -> Option<&Finding> {
        self.findings.iter().find(|f| f.id == id)
    }

    pub fn threat(&self, id: &str) -> Option<&Threat> {
        self.threats.iter().find(|t| t.id == id)
    }

    pub fn has_threat(&self, id: &str) -> bool {
        self.threat(id).is_some()
    }

    pub fn completed_interventions(&self) -> impl Iterator<Item = &Intervention> {
        self.threats
            .iter()
            .flat_map(|t| t.interventions.iter())
            .filter(|i| i.completed)
    }

    /// Whether any intervention with this id has been completed
    pub fn completed(&self, intervention_id: &str) -> bool {
        self.completed_interventions()
            .any(|i| i.step.id == intervention_id)
    }

    /// Completed interventions whose id starts with `prefix`
    pub fn completed_count(&self, prefix: &str) -> usize {
        self.completed_interventions()
            .filter(|i| i.step.id.starts_with(prefix))
            .count()
    }

    pub fn unacknowledged_alerts(&self) -> impl Iterator<Item = &SafetyAlert> {
        self.alerts.iter().filter(|a| !a.acknowledged)
    }

    pub(crate) fn record(
        &mut self,
        now: DateTime<Utc>,
        kind: EventKind,
        letter: Option<Letter>,
        detail: impl Into<String>,
    ) {
        record(&mut self.log, now, kind, letter, detail);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_protocol_validates() {
        let errors = build_default_protocol().validate();
        assert!(
            errors.is_empty(),
            "Default protocol has validation errors: {:?}",
            errors
        );
    }

    #[test]
    fn test_every_letter_has_questions() {
        let protocol = get_default_protocol();
        let trauma = PatientContext::new(Some(20.0), None, true);
        for letter in Letter::ORDER {
            assert!(
                protocol.questions_for(letter, &trauma).count() > 0,
                "no questions at {}",
                letter
            );
        }
    }

    #[test]
    fn test_x_questions_hidden_for_medical_patients() {
        let protocol = get_default_protocol();
        let medical = PatientContext::new(Some(20.0), None, false);
        assert_eq!(protocol.questions_for(Letter::X, &medical).count(), 0);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(ThreatSeverity::Critical > ThreatSeverity::Urgent);
        assert!(ThreatSeverity::Urgent > ThreatSeverity::Monitor);
    }
}
