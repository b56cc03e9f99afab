//! Fixed-pathway session state machine.
//!
//! Phases run TRIAGE → IDENTIFY → CLARIFY → INTERVENE ⇄ REASSESS → STABILIZED.
//!
//! `transition` is pure: it clones the session, applies the input to the
//! clone and returns it. An input that does not apply to the current phase
//! returns an unchanged copy and appends nothing to the log.

use crate::pathways::{resolve_sub_pathway, steps_for, PathwayRegistry};
use crate::types::*;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use uuid::Uuid;

/// Pathway entered when triage finds no breathing or no pulse
pub const CARDIAC_ARREST_PATHWAY: &str = "cardiac_arrest";

static TRIAGE_QUESTIONS: Lazy<Vec<Question>> = Lazy::new(|| {
    vec![
        Question::new("breathing", "Is the patient breathing?", &[("yes", "Yes"), ("no", "No")]),
        Question::new("pulse", "Is there a pulse?", &[("yes", "Yes"), ("no", "No")]),
        Question::new(
            "consciousness",
            "Level of consciousness (AVPU)?",
            &[
                ("alert", "Alert"),
                ("voice", "Responds to voice"),
                ("pain", "Responds to pain"),
                ("unresponsive", "Unresponsive"),
            ],
        ),
    ]
});

/// Triage questions in the order they are asked
pub fn triage_questions() -> &'static [Question] {
    &TRIAGE_QUESTIONS
}

/// Start a new session at TRIAGE, stamped with the current time
pub fn create_session(weight_kg: Option<f64>, age: Option<&str>, is_trauma: bool) -> Session {
    create_session_at(PatientContext::new(weight_kg, age, is_trauma), Utc::now())
}

pub fn create_session_at(patient: PatientContext, now: DateTime<Utc>) -> Session {
    let mut session = Session {
        id: Uuid::new_v4(),
        phase: Phase::Triage,
        pathway_id: None,
        sub_pathway_id: None,
        triage: Answers::new(),
        answers: Answers::new(),
        completed_steps: Vec::new(),
        current_step_index: 0,
        diagnosis: None,
        started_at: now,
        log: Vec::new(),
        patient,
    };
    let detail = format!("Session started: {}", session.patient.describe());
    record(&mut session.log, now, EventKind::SessionStart, None, detail);
    tracing::info!("Created session {}", session.id);
    session
}

/// Apply one input, stamping log entries with the current time
pub fn transition(session: &Session, input: &Input, registry: &PathwayRegistry) -> Session {
    transition_at(session, input, registry, Utc::now())
}

/// Apply one input at time `now`
pub fn transition_at(
    session: &Session,
    input: &Input,
    registry: &PathwayRegistry,
    now: DateTime<Utc>,
) -> Session {
    let mut next = session.clone();

    let changed = match session.phase {
        Phase::Triage => on_triage(&mut next, input, registry, now),
        Phase::Identify => on_identify(&mut next, input, registry, now),
        Phase::Clarify => on_clarify(&mut next, input, registry, now),
        Phase::Intervene => on_intervene(&mut next, input, registry, now),
        Phase::Reassess => on_reassess(&mut next, input, registry, now),
        Phase::Stabilized => false,
    };

    if changed {
        next
    } else {
        tracing::debug!(
            "Ignoring input '{}'='{}' in phase {}",
            input.kind,
            input.value,
            session.phase
        );
        session.clone()
    }
}

// ============================================================================
// Queries
// ============================================================================

/// Steps of the selected pathway and sub-pathway; empty before selection
pub fn get_current_steps<'a>(session: &Session, registry: &'a PathwayRegistry) -> &'a [Step] {
    session
        .pathway_id
        .as_deref()
        .and_then(|id| registry.get(id))
        .map(|p| steps_for(p, session.sub_pathway_id.as_deref()))
        .unwrap_or(&[])
}

/// The step being worked on, only while intervening or reassessing
pub fn get_current_step<'a>(session: &Session, registry: &'a PathwayRegistry) -> Option<&'a Step> {
    match session.phase {
        Phase::Intervene | Phase::Reassess => {
            get_current_steps(session, registry).get(session.current_step_index)
        }
        _ => None,
    }
}

/// Next unanswered triage question while in TRIAGE
pub fn get_triage_question(session: &Session) -> Option<&'static Question> {
    if session.phase != Phase::Triage {
        return None;
    }
    triage_questions()
        .iter()
        .find(|q| !session.triage.contains_key(&q.id))
}

/// Next unanswered clarifying question while in CLARIFY
pub fn get_clarifying_question<'a>(
    session: &Session,
    registry: &'a PathwayRegistry,
) -> Option<&'a Question> {
    if session.phase != Phase::Clarify {
        return None;
    }
    let pathway = registry.get(session.pathway_id.as_deref()?)?;
    pathway
        .questions
        .iter()
        .find(|q| !session.answers.contains_key(&q.id))
}

// ============================================================================
// Phase handlers
// ============================================================================

fn on_triage(s: &mut Session, input: &Input, registry: &PathwayRegistry, now: DateTime<Utc>) -> bool {
    let Some(question) = get_triage_question(s) else {
        return false;
    };
    if input.kind != question.id {
        return false;
    }
    let value = input.normalized_value();
    if !question.accepts(&value) {
        return false;
    }

    s.triage.insert(question.id.clone(), value.clone());
    record(
        &mut s.log,
        now,
        EventKind::Triage,
        None,
        format!("{} = {}", question.id, value),
    );

    // No breathing or no pulse skips the rest of triage
    let arrested = matches!(question.id.as_str(), "breathing" | "pulse") && value == "no";
    if arrested {
        let Some(pathway) = registry.get(CARDIAC_ARREST_PATHWAY) else {
            tracing::warn!("Cardiac arrest pathway missing from registry");
            return true;
        };
        tracing::info!("Triage short-circuit: {} = no", question.id);
        s.pathway_id = Some(pathway.id.clone());
        record(
            &mut s.log,
            now,
            EventKind::PathwaySelected,
            None,
            format!("{} (triage: {} = no)", pathway.name, question.id),
        );
        let triage = s.triage.clone();
        start_intervention(s, registry, &triage, now);
        return true;
    }

    if get_triage_question(s).is_none() {
        set_phase(s, Phase::Identify, now);
    }
    true
}

fn on_identify(
    s: &mut Session,
    input: &Input,
    registry: &PathwayRegistry,
    now: DateTime<Utc>,
) -> bool {
    if input.kind != Input::SELECT_PATHWAY {
        return false;
    }
    let Some(pathway) = registry.get(&input.normalized_value()) else {
        tracing::warn!("Unknown pathway '{}'", input.value);
        return false;
    };

    tracing::info!("Pathway selected: {}", pathway.id);
    s.pathway_id = Some(pathway.id.clone());
    record(&mut s.log, now, EventKind::PathwaySelected, None, pathway.name.clone());

    if pathway.questions.is_empty() {
        start_intervention(s, registry, &Answers::new(), now);
    } else {
        set_phase(s, Phase::Clarify, now);
    }
    true
}

fn on_clarify(
    s: &mut Session,
    input: &Input,
    registry: &PathwayRegistry,
    now: DateTime<Utc>,
) -> bool {
    let Some(pathway) = s.pathway_id.as_deref().and_then(|id| registry.get(id)) else {
        return false;
    };
    let Some(question) = pathway.questions.iter().find(|q| q.id == input.kind) else {
        return false;
    };
    if s.answers.contains_key(&question.id) {
        return false;
    }
    let value = input.normalized_value();
    if !question.accepts(&value) {
        return false;
    }

    s.answers.insert(question.id.clone(), value.clone());
    record(
        &mut s.log,
        now,
        EventKind::Clarify,
        None,
        format!("{} = {}", question.id, value),
    );

    if pathway.questions.iter().all(|q| s.answers.contains_key(&q.id)) {
        let answers = s.answers.clone();
        start_intervention(s, registry, &answers, now);
    }
    true
}

fn on_intervene(
    s: &mut Session,
    input: &Input,
    registry: &PathwayRegistry,
    now: DateTime<Utc>,
) -> bool {
    if input.kind != Input::STEP_DONE {
        return false;
    }
    let steps = get_current_steps(s, registry);
    let Some(step) = steps.get(s.current_step_index) else {
        return false;
    };

    s.completed_steps.push(CompletedStep {
        step_id: step.id.clone(),
        completed_at: now,
    });
    tracing::debug!("Step completed: {}", step.id);
    record(
        &mut s.log,
        now,
        EventKind::StepCompleted,
        None,
        format!("{}: {}", step.id, step.action),
    );

    if s.current_step_index + 1 >= steps.len() {
        set_phase(s, Phase::Stabilized, now);
        record(
            &mut s.log,
            now,
            EventKind::Stabilized,
            None,
            format!("All {} steps complete", steps.len()),
        );
    } else if let Some(prompt) = &step.reassess {
        set_phase(s, Phase::Reassess, now);
        tracing::debug!("Reassess: {}", prompt);
    } else {
        s.current_step_index += 1;
    }
    true
}

/// Both answers advance to the next step; `no` is logged as an escalation
fn on_reassess(
    s: &mut Session,
    input: &Input,
    registry: &PathwayRegistry,
    now: DateTime<Utc>,
) -> bool {
    if input.kind != Input::IMPROVING {
        return false;
    }
    let improving = match input.normalized_value().as_str() {
        "yes" => true,
        "no" => false,
        _ => return false,
    };

    let steps = get_current_steps(s, registry);
    let Some(current) = steps.get(s.current_step_index) else {
        return false;
    };
    let Some(next) = steps.get(s.current_step_index + 1) else {
        return false;
    };

    if improving {
        record(
            &mut s.log,
            now,
            EventKind::NextStep,
            None,
            format!("Improving, continue: {}", next.action),
        );
    } else {
        let escalation = current.escalation.as_deref().unwrap_or("Not improving");
        tracing::info!("Escalation after {}", current.id);
        record(
            &mut s.log,
            now,
            EventKind::Escalation,
            None,
            format!("{}; continue: {}", escalation, next.action),
        );
    }

    s.current_step_index += 1;
    set_phase(s, Phase::Intervene, now);
    true
}

/// Resolve the sub-pathway from `answers` and start at the first step
fn start_intervention(
    s: &mut Session,
    registry: &PathwayRegistry,
    answers: &Answers,
    now: DateTime<Utc>,
) {
    let Some(pathway) = s.pathway_id.as_deref().and_then(|id| registry.get(id)) else {
        return;
    };
    let sub = resolve_sub_pathway(pathway, answers);

    s.sub_pathway_id = sub.map(|sub| sub.id.clone());
    s.diagnosis = Some(match sub {
        Some(sub) => format!("{}: {}", pathway.name, sub.name),
        None => pathway.name.clone(),
    });
    s.current_step_index = 0;
    record(
        &mut s.log,
        now,
        EventKind::Diagnosis,
        None,
        s.diagnosis.clone().unwrap_or_default(),
    );
    set_phase(s, Phase::Intervene, now);
}

fn set_phase(s: &mut Session, phase: Phase, now: DateTime<Utc>) {
    if s.phase == phase {
        return;
    }
    tracing::info!("Phase {} -> {}", s.phase, phase);
    let detail = format!("{} -> {}", s.phase, phase);
    s.phase = phase;
    record(&mut s.log, now, EventKind::PhaseChange, None, detail);
}
