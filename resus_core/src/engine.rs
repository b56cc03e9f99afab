//! Shared interface over the two clinical engines.
//!
//! The fixed-pathway machine and the primary survey are alternate workflows
//! for the same bedside job. `ClinicalEngine` lets a presentation layer drive
//! either one: start a case, dispatch inputs, ask what to show next, and
//! export the audit record.

use crate::audit::{render_audit, AuditHeader, AuditSummary};
use crate::dose::{calculate_dose, CalculatedDose};
use crate::machine;
use crate::pathways::{get_default_registry, PathwayRegistry};
use crate::survey::{
    self, get_default_protocol, SafetyAlert, SurveyPhase, SurveyProtocol, SurveySession,
    ThreatSeverity,
};
use crate::types::*;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

/// A pathway offered at IDENTIFY
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct PathwayOption {
    pub id: String,
    pub name: String,
    pub icon: String,
}

/// An outstanding survey intervention with its dose for this patient
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct PendingIntervention {
    pub threat_id: String,
    pub threat_name: String,
    pub severity: ThreatSeverity,
    pub step: Step,
    pub dose: Option<CalculatedDose>,
}

/// What the presentation layer should show next
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "prompt", rename_all = "snake_case")]
pub enum Prompt {
    /// Survey created but not begun
    Begin,
    Question {
        question: Question,
    },
    /// All unanswered survey questions at the current letter
    Questions {
        letter: Letter,
        questions: Vec<Question>,
    },
    SelectPathway {
        options: Vec<PathwayOption>,
    },
    Step {
        index: usize,
        total: usize,
        step: Step,
        dose: Option<CalculatedDose>,
    },
    Reassess {
        question: String,
        escalation: Option<String>,
    },
    Interventions {
        items: Vec<PendingIntervention>,
    },
    CardiacArrest {
        items: Vec<PendingIntervention>,
    },
    Complete {
        summary: AuditSummary,
    },
}

pub trait ClinicalEngine {
    type Session: Clone + Serialize + DeserializeOwned;

    /// Short name used in exports and snapshots
    fn name(&self) -> &'static str;

    fn session_id(&self, session: &Self::Session) -> Uuid;

    fn start(&self, patient: PatientContext, now: DateTime<Utc>) -> Self::Session;

    /// Pure transition; invalid inputs return an unchanged copy
    fn dispatch(&self, session: &Self::Session, input: &Input, now: DateTime<Utc>)
        -> Self::Session;

    fn prompt(&self, session: &Self::Session) -> Prompt;

    fn log<'s>(&self, session: &'s Self::Session) -> &'s [LogEntry];

    fn summary(&self, session: &Self::Session) -> AuditSummary;

    fn is_complete(&self, session: &Self::Session) -> bool;

    fn header(&self, session: &Self::Session, include_patient: bool) -> AuditHeader;

    /// Unacknowledged safety alerts
    fn active_alerts(&self, _session: &Self::Session) -> Vec<SafetyAlert> {
        Vec::new()
    }

    /// Plain-text audit record
    fn export(&self, session: &Self::Session, include_patient: bool) -> String {
        render_audit(
            &self.header(session, include_patient),
            self.log(session),
            &self.summary(session),
        )
    }
}

// ============================================================================
// Fixed pathways
// ============================================================================

#[derive(Clone, Copy, Debug)]
pub struct PathwayEngine<'a> {
    registry: &'a PathwayRegistry,
}

impl<'a> PathwayEngine<'a> {
    pub fn new(registry: &'a PathwayRegistry) -> Self {
        Self { registry }
    }
}

impl Default for PathwayEngine<'static> {
    fn default() -> Self {
        Self::new(get_default_registry())
    }
}

impl ClinicalEngine for PathwayEngine<'_> {
    type Session = Session;

    fn name(&self) -> &'static str {
        "pathway"
    }

    fn session_id(&self, session: &Session) -> Uuid {
        session.id
    }

    fn start(&self, patient: PatientContext, now: DateTime<Utc>) -> Session {
        machine::create_session_at(patient, now)
    }

    fn dispatch(&self, session: &Session, input: &Input, now: DateTime<Utc>) -> Session {
        machine::transition_at(session, input, self.registry, now)
    }

    fn prompt(&self, session: &Session) -> Prompt {
        let complete = || Prompt::Complete {
            summary: self.summary(session),
        };

        match session.phase {
            Phase::Triage => machine::get_triage_question(session)
                .map(|q| Prompt::Question {
                    question: q.clone(),
                })
                .unwrap_or_else(complete),
            Phase::Identify => Prompt::SelectPathway {
                options: self
                    .registry
                    .pathways()
                    .iter()
                    .map(|p| PathwayOption {
                        id: p.id.clone(),
                        name: p.name.clone(),
                        icon: p.icon.clone(),
                    })
                    .collect(),
            },
            Phase::Clarify => machine::get_clarifying_question(session, self.registry)
                .map(|q| Prompt::Question {
                    question: q.clone(),
                })
                .unwrap_or_else(complete),
            Phase::Intervene => match machine::get_current_step(session, self.registry) {
                Some(step) => Prompt::Step {
                    index: session.current_step_index,
                    total: machine::get_current_steps(session, self.registry).len(),
                    step: step.clone(),
                    dose: step
                        .dose
                        .as_ref()
                        .map(|d| calculate_dose(d, session.patient.weight_kg)),
                },
                None => complete(),
            },
            Phase::Reassess => match machine::get_current_step(session, self.registry) {
                Some(step) => Prompt::Reassess {
                    question: step.reassess.clone().unwrap_or_default(),
                    escalation: step.escalation.clone(),
                },
                None => complete(),
            },
            Phase::Stabilized => complete(),
        }
    }

    fn log<'s>(&self, session: &'s Session) -> &'s [LogEntry] {
        &session.log
    }

    fn summary(&self, session: &Session) -> AuditSummary {
        AuditSummary {
            threats: 0,
            interventions: session.completed_steps.len(),
            safety_alerts: 0,
        }
    }

    fn is_complete(&self, session: &Session) -> bool {
        session.phase == Phase::Stabilized
    }

    fn header(&self, session: &Session, include_patient: bool) -> AuditHeader {
        AuditHeader {
            engine: self.name(),
            session_id: self.session_id(session),
            started_at: session.started_at,
            patient: include_patient.then(|| session.patient.describe()),
            diagnosis: session.diagnosis.clone(),
        }
    }
}

// ============================================================================
// Primary survey
// ============================================================================

#[derive(Clone, Copy, Debug)]
pub struct SurveyEngine<'a> {
    protocol: &'a SurveyProtocol,
}

impl<'a> SurveyEngine<'a> {
    pub fn new(protocol: &'a SurveyProtocol) -> Self {
        Self { protocol }
    }

    fn pending(&self, session: &SurveySession, arrest_only: bool) -> Vec<PendingIntervention> {
        survey::pending_interventions(session)
            .into_iter()
            .filter(|(threat, _)| !arrest_only || threat.arrest)
            .map(|(threat, intervention)| PendingIntervention {
                threat_id: threat.id.clone(),
                threat_name: threat.name.clone(),
                severity: threat.severity,
                step: intervention.step.clone(),
                dose: intervention
                    .step
                    .dose
                    .as_ref()
                    .map(|d| calculate_dose(d, session.patient.weight_kg)),
            })
            .collect()
    }
}

impl Default for SurveyEngine<'static> {
    fn default() -> Self {
        Self::new(get_default_protocol())
    }
}

impl ClinicalEngine for SurveyEngine<'_> {
    type Session = SurveySession;

    fn name(&self) -> &'static str {
        "survey"
    }

    fn session_id(&self, session: &SurveySession) -> Uuid {
        session.id
    }

    fn start(&self, patient: PatientContext, now: DateTime<Utc>) -> SurveySession {
        survey::create_survey(patient, now)
    }

    fn dispatch(&self, session: &SurveySession, input: &Input, now: DateTime<Utc>) -> SurveySession {
        survey::dispatch(session, input, self.protocol, now)
    }

    fn prompt(&self, session: &SurveySession) -> Prompt {
        match session.phase {
            SurveyPhase::Idle => Prompt::Begin,
            SurveyPhase::PrimarySurvey => Prompt::Questions {
                letter: session.letter,
                questions: survey::current_questions(session, self.protocol)
                    .into_iter()
                    .map(|q| q.question.clone())
                    .collect(),
            },
            SurveyPhase::Intervention => Prompt::Interventions {
                items: self.pending(session, false),
            },
            SurveyPhase::CardiacArrest => Prompt::CardiacArrest {
                items: self.pending(session, true),
            },
            SurveyPhase::SecondarySurvey => Prompt::Complete {
                summary: self.summary(session),
            },
        }
    }

    fn log<'s>(&self, session: &'s SurveySession) -> &'s [LogEntry] {
        &session.log
    }

    fn summary(&self, session: &SurveySession) -> AuditSummary {
        AuditSummary {
            threats: session.threats.len(),
            interventions: session.completed_interventions().count(),
            safety_alerts: session.alerts.len(),
        }
    }

    fn is_complete(&self, session: &SurveySession) -> bool {
        session.phase == SurveyPhase::SecondarySurvey
    }

    fn header(&self, session: &SurveySession, include_patient: bool) -> AuditHeader {
        AuditHeader {
            engine: self.name(),
            session_id: self.session_id(session),
            started_at: session.started_at,
            patient: include_patient.then(|| session.patient.describe()),
            diagnosis: session.diagnosis.clone(),
        }
    }

    fn active_alerts(&self, session: &SurveySession) -> Vec<SafetyAlert> {
        session.unacknowledged_alerts().cloned().collect()
    }
}
