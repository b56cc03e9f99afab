//! Survey transitions.
//!
//! `dispatch` never mutates its argument: it works on a copy and returns it.
//! Inputs that are invalid for the current phase return an unchanged copy
//! with no new log entries.

use super::{
    Finding, Intervention, SafetyAlert, SurveyPhase, SurveyProtocol, SurveyQuestion,
    SurveySession, Threat, ThreatSeverity,
};
use crate::dose::calculate_dose;
use crate::types::{EventKind, Input, Letter, PatientContext};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Create an idle survey. Trauma patients start at X, everyone else at A.
pub fn create_survey(patient: PatientContext, now: DateTime<Utc>) -> SurveySession {
    let letter = if patient.is_trauma { Letter::X } else { Letter::A };
    let mut session = SurveySession {
        id: Uuid::new_v4(),
        phase: SurveyPhase::Idle,
        letter,
        findings: Vec::new(),
        threats: Vec::new(),
        alerts: Vec::new(),
        diagnosis: None,
        started_at: now,
        log: Vec::new(),
        patient,
    };
    let detail = format!("Primary survey created: {}", session.patient.describe());
    session.record(now, EventKind::SessionStart, None, detail);
    session
}

/// Apply one input at time `now`
pub fn dispatch(
    session: &SurveySession,
    input: &Input,
    protocol: &SurveyProtocol,
    now: DateTime<Utc>,
) -> SurveySession {
    let mut next = session.clone();

    let changed = match input.kind.as_str() {
        Input::BEGIN => on_begin(&mut next, protocol, now),
        Input::INTERVENTION_DONE => on_intervention_done(&mut next, input, protocol, now),
        Input::RESOLVE_THREAT => on_resolve_threat(&mut next, input, protocol, now),
        Input::ROSC => on_rosc(&mut next, protocol, now),
        Input::ACKNOWLEDGE_ALERT => on_acknowledge(&mut next, input, now),
        Input::DIAGNOSIS => on_diagnosis(&mut next, input, now),
        _ => on_answer(&mut next, input, protocol, now),
    };

    if changed {
        next
    } else {
        tracing::debug!(
            "Ignoring input '{}' in survey phase {}",
            input.kind,
            session.phase
        );
        session.clone()
    }
}

/// Unanswered questions at the current letter; empty outside the primary survey
pub fn current_questions<'a>(
    session: &SurveySession,
    protocol: &'a SurveyProtocol,
) -> Vec<&'a SurveyQuestion> {
    if session.phase != SurveyPhase::PrimarySurvey {
        return Vec::new();
    }
    protocol
        .questions_for(session.letter, &session.patient)
        .filter(|q| session.finding(&q.question.id).is_none())
        .collect()
}

/// Outstanding interventions of unresolved threats, most severe threat first
pub fn pending_interventions(session: &SurveySession) -> Vec<(&Threat, &Intervention)> {
    let mut pending: Vec<_> = session
        .threats
        .iter()
        .filter(|t| !t.resolved)
        .flat_map(|t| {
            t.interventions
                .iter()
                .filter(|i| !i.completed)
                .map(move |i| (t, i))
        })
        .collect();
    pending.sort_by(|a, b| b.0.severity.cmp(&a.0.severity));
    pending
}

// ============================================================================
// Handlers
// ============================================================================

fn on_begin(s: &mut SurveySession, protocol: &SurveyProtocol, now: DateTime<Utc>) -> bool {
    if s.phase != SurveyPhase::Idle {
        return false;
    }
    set_phase(s, SurveyPhase::PrimarySurvey, now);
    settle(s, protocol, now);
    true
}

fn on_answer(
    s: &mut SurveySession,
    input: &Input,
    protocol: &SurveyProtocol,
    now: DateTime<Utc>,
) -> bool {
    if s.phase != SurveyPhase::PrimarySurvey {
        return false;
    }
    let Some(question) = protocol
        .questions_for(s.letter, &s.patient)
        .find(|q| q.question.id == input.kind)
    else {
        return false;
    };
    // First answer wins
    if s.finding(&question.question.id).is_some() {
        return false;
    }
    let value = input.normalized_value();
    if !question.question.accepts(&value) {
        return false;
    }

    s.findings.push(Finding {
        id: question.question.id.clone(),
        letter: question.letter,
        description: value.clone(),
        severity: None,
        timestamp: now,
    });
    s.record(
        now,
        EventKind::Finding,
        Some(question.letter),
        format!("{} = {}", question.question.id, value),
    );

    identify_threats(s, protocol, now);
    settle(s, protocol, now);
    true
}

fn on_intervention_done(
    s: &mut SurveySession,
    input: &Input,
    protocol: &SurveyProtocol,
    now: DateTime<Utc>,
) -> bool {
    if s.phase == SurveyPhase::Idle {
        return false;
    }
    let value = input.normalized_value();
    let (threat_id, intervention_id) = match value.split_once(':') {
        Some((threat, id)) => (Some(threat.trim()), id.trim()),
        None => (None, value.as_str()),
    };

    let Some((t_idx, i_idx)) = s.threats.iter().enumerate().find_map(|(t_idx, t)| {
        if t.resolved || threat_id.is_some_and(|id| id != t.id) {
            return None;
        }
        t.interventions
            .iter()
            .position(|i| !i.completed && i.step.id == intervention_id)
            .map(|i_idx| (t_idx, i_idx))
    }) else {
        return false;
    };

    let weight = s.patient.weight_kg;
    let threat = &mut s.threats[t_idx];
    let intervention = &mut threat.interventions[i_idx];
    intervention.completed = true;
    intervention.completed_at = Some(now);

    let mut detail = format!("{}: {}", threat.name, intervention.step.action);
    if let Some(dose) = &intervention.step.dose {
        detail = format!("{} ({})", detail, calculate_dose(dose, weight).calculated_dose);
    }
    let letter = threat.letter;

    let resolved = if !threat.arrest && threat.all_done() {
        threat.resolved = true;
        Some(format!("{}: all interventions complete", threat.name))
    } else {
        None
    };

    s.record(now, EventKind::Intervention, Some(letter), detail);
    if let Some(detail) = resolved {
        s.record(now, EventKind::ThreatResolved, Some(letter), detail);
    }

    check_safety(s, protocol, now);
    settle(s, protocol, now);
    true
}

fn on_resolve_threat(
    s: &mut SurveySession,
    input: &Input,
    protocol: &SurveyProtocol,
    now: DateTime<Utc>,
) -> bool {
    if s.phase == SurveyPhase::Idle {
        return false;
    }
    let id = input.normalized_value();
    // Arrest ends only on ROSC
    let Some(threat) = s
        .threats
        .iter_mut()
        .find(|t| t.id == id && !t.resolved && !t.arrest)
    else {
        return false;
    };
    threat.resolved = true;
    let (letter, detail) = (threat.letter, format!("{} resolved", threat.name));

    s.record(now, EventKind::ThreatResolved, Some(letter), detail);
    settle(s, protocol, now);
    true
}

fn on_rosc(s: &mut SurveySession, protocol: &SurveyProtocol, now: DateTime<Utc>) -> bool {
    if s.phase != SurveyPhase::CardiacArrest {
        return false;
    }
    let Some(threat) = s.threats.iter_mut().find(|t| t.arrest && !t.resolved) else {
        return false;
    };
    threat.resolved = true;
    let letter = threat.letter;

    s.record(
        now,
        EventKind::ThreatResolved,
        Some(letter),
        "Return of spontaneous circulation",
    );
    settle(s, protocol, now);
    true
}

fn on_acknowledge(s: &mut SurveySession, input: &Input, now: DateTime<Utc>) -> bool {
    if s.phase == SurveyPhase::Idle {
        return false;
    }
    let id = input.normalized_value();
    let Some(alert) = s
        .alerts
        .iter_mut()
        .find(|a| a.id == id && !a.acknowledged)
    else {
        return false;
    };
    alert.acknowledged = true;
    let detail = format!("Acknowledged: {}", alert.message);

    s.record(now, EventKind::AlertAcknowledged, None, detail);
    true
}

fn on_diagnosis(s: &mut SurveySession, input: &Input, now: DateTime<Utc>) -> bool {
    if s.phase == SurveyPhase::Idle || input.value.is_empty() {
        return false;
    }
    if s.diagnosis.as_deref() == Some(input.value.as_str()) {
        return false;
    }
    s.diagnosis = Some(input.value.clone());
    s.record(now, EventKind::Diagnosis, None, input.value.clone());
    true
}

// ============================================================================
// Rule evaluation
// ============================================================================

/// Fire every threat rule that matches and has not fired yet, in declared order
fn identify_threats(s: &mut SurveySession, protocol: &SurveyProtocol, now: DateTime<Utc>) {
    let answers = s.answers();

    for rule in &protocol.threat_rules {
        if s.has_threat(rule.id) || !(rule.condition)(&answers, s) {
            continue;
        }

        let interventions = (rule.interventions)(s).into_iter().map(Into::into).collect();
        let contributing: Vec<String> = rule
            .inputs
            .iter()
            .filter(|id| answers.contains_key(**id))
            .map(|id| id.to_string())
            .collect();

        for finding in s
            .findings
            .iter_mut()
            .filter(|f| contributing.contains(&f.id))
        {
            finding.severity = finding.severity.max(Some(rule.severity));
        }

        tracing::info!("Threat identified: {} ({})", rule.id, rule.severity);
        s.threats.push(Threat {
            id: rule.id.to_string(),
            name: rule.name.to_string(),
            letter: rule.letter,
            severity: rule.severity,
            arrest: rule.arrest,
            interventions,
            resolved: false,
            findings: contributing,
            identified_at: now,
        });
        s.record(
            now,
            EventKind::Threat,
            Some(rule.letter),
            format!("{} ({})", rule.name, rule.severity),
        );
    }
}

/// Raise every safety alert whose condition now holds, once per session
fn check_safety(s: &mut SurveySession, protocol: &SurveyProtocol, now: DateTime<Utc>) {
    for rule in &protocol.safety_rules {
        if s.alerts.iter().any(|a| a.id == rule.id) || !(rule.condition)(s) {
            continue;
        }
        tracing::warn!("Safety alert raised: {}", rule.id);
        s.alerts.push(SafetyAlert {
            id: rule.id.to_string(),
            message: rule.message.to_string(),
            severity: rule.severity,
            raised_at: now,
            acknowledged: false,
            threat_id: rule.threat_id.map(str::to_string),
        });
        s.record(now, EventKind::SafetyAlert, None, rule.message);
    }
}

fn letter_complete(s: &SurveySession, protocol: &SurveyProtocol) -> bool {
    protocol
        .questions_for(s.letter, &s.patient)
        .all(|q| s.finding(&q.question.id).is_some())
}

/// Move to the phase the current threats and findings call for.
///
/// Precedence: unresolved arrest, then unresolved critical threats, then
/// urgent threats at or before a completed letter. Completed letters with
/// nothing blocking advance the survey.
fn settle(s: &mut SurveySession, protocol: &SurveyProtocol, now: DateTime<Utc>) {
    if s.phase == SurveyPhase::Idle {
        return;
    }

    let target = loop {
        let open = |t: &&Threat| !t.resolved;
        if s.threats.iter().filter(open).any(|t| t.arrest) {
            break SurveyPhase::CardiacArrest;
        }
        if s
            .threats
            .iter()
            .filter(open)
            .any(|t| t.severity == ThreatSeverity::Critical)
        {
            break SurveyPhase::Intervention;
        }
        if s.phase == SurveyPhase::SecondarySurvey {
            break SurveyPhase::SecondarySurvey;
        }
        if !letter_complete(s, protocol) {
            break SurveyPhase::PrimarySurvey;
        }
        if s
            .threats
            .iter()
            .filter(open)
            .any(|t| t.severity == ThreatSeverity::Urgent && t.letter <= s.letter)
        {
            break SurveyPhase::Intervention;
        }
        match s.letter.next() {
            Some(next) => {
                let detail = format!("{} complete, moving to {}", s.letter.title(), next.title());
                s.letter = next;
                s.record(now, EventKind::LetterAdvanced, Some(next), detail);
            }
            None => break SurveyPhase::SecondarySurvey,
        }
    };

    set_phase(s, target, now);
}

fn set_phase(s: &mut SurveySession, phase: SurveyPhase, now: DateTime<Utc>) {
    if s.phase == phase {
        return;
    }
    let detail = format!("{} -> {}", s.phase, phase);
    s.phase = phase;
    s.record(now, EventKind::PhaseChange, Some(s.letter), detail);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::survey::get_default_protocol;

    const NORMAL: &[(&str, &str)] = &[
        ("a_airway", "patent"),
        ("a_swelling", "no"),
        ("a_stridor", "no"),
        ("b_breathing", "normal"),
        ("b_spo2", "normal"),
        ("b_wheeze", "no"),
        ("c_pulse", "present"),
        ("c_heart_rate", "normal"),
        ("c_perfusion", "normal"),
        ("c_sepsis", "no"),
        ("d_avpu", "alert"),
        ("d_seizure", "no"),
        ("d_glucose", "normal"),
        ("d_ketones", "unknown"),
        ("d_pupils", "equal"),
        ("e_temperature", "normal"),
        ("e_rash", "none"),
        ("e_injuries", "no"),
    ];

    fn apply(s: &SurveySession, kind: &str, value: &str) -> SurveySession {
        dispatch(s, &Input::new(kind, value), get_default_protocol(), Utc::now())
    }

    fn begun(weight: f64, age: &str, trauma: bool) -> SurveySession {
        let s = create_survey(PatientContext::new(Some(weight), Some(age), trauma), Utc::now());
        apply(&s, Input::BEGIN, "")
    }

    /// Answer the normal value for every question at `letter`
    fn normal_letter(mut s: SurveySession, letter: &str) -> SurveySession {
        for (id, value) in NORMAL.iter().filter(|(id, _)| id.starts_with(letter)) {
            s = apply(&s, id, value);
        }
        s
    }

    #[test]
    fn test_begin_sets_starting_letter() {
        let medical = begun(20.0, "5 years", false);
        assert_eq!(medical.phase, SurveyPhase::PrimarySurvey);
        assert_eq!(medical.letter, Letter::A);

        let trauma = begun(20.0, "5 years", true);
        assert_eq!(trauma.letter, Letter::X);
    }

    #[test]
    fn test_answers_ignored_while_idle() {
        let s = create_survey(PatientContext::new(Some(20.0), None, false), Utc::now());
        let next = apply(&s, "a_airway", "patent");
        assert_eq!(next, s);
    }

    #[test]
    fn test_normal_survey_reaches_secondary() {
        let mut s = begun(20.0, "5 years", false);
        for letter in ["a_", "b_", "c_", "d_", "e_"] {
            s = normal_letter(s, letter);
        }
        assert_eq!(s.phase, SurveyPhase::SecondarySurvey);
        assert!(s.threats.is_empty());
        assert_eq!(s.findings.len(), NORMAL.len());
        let advances = s
            .log
            .iter()
            .filter(|e| e.kind == EventKind::LetterAdvanced)
            .count();
        assert_eq!(advances, 4);
    }

    #[test]
    fn test_critical_threat_preempts_survey() {
        let s = begun(20.0, "5 years", false);
        let s = apply(&s, "a_airway", "obstructed");

        assert_eq!(s.phase, SurveyPhase::Intervention);
        let threat = s.threat("airway_obstruction").unwrap();
        assert_eq!(threat.severity, ThreatSeverity::Critical);
        assert_eq!(threat.findings, vec!["a_airway".to_string()]);
        assert_eq!(
            s.finding("a_airway").unwrap().severity,
            Some(ThreatSeverity::Critical)
        );

        let mut s = apply(&s, Input::INTERVENTION_DONE, "airway_obstruction:airway_maneuver");
        for id in ["suction", "airway_adjunct", "airway_expert"] {
            s = apply(&s, Input::INTERVENTION_DONE, id);
        }
        assert!(s.threat("airway_obstruction").unwrap().resolved);
        assert_eq!(s.phase, SurveyPhase::PrimarySurvey);
        assert_eq!(s.letter, Letter::A);
        assert_eq!(current_questions(&s, get_default_protocol()).len(), 2);
    }

    #[test]
    fn test_urgent_threat_detours_at_end_of_letter() {
        let s = begun(15.0, "2 years", false);
        let s = apply(&s, "a_airway", "patent");
        let s = apply(&s, "a_swelling", "no");
        let s = apply(&s, "a_stridor", "yes");

        assert!(s.has_threat("upper_airway_obstruction"));
        assert_eq!(s.phase, SurveyPhase::Intervention);
        assert_eq!(s.letter, Letter::A);

        let s = apply(&s, Input::RESOLVE_THREAT, "upper_airway_obstruction");
        assert_eq!(s.phase, SurveyPhase::PrimarySurvey);
        assert_eq!(s.letter, Letter::B);
    }

    #[test]
    fn test_arrest_until_rosc() {
        let s = begun(20.0, "5 years", false);
        let s = normal_letter(normal_letter(s, "a_"), "b_");
        let s = apply(&s, "c_pulse", "absent");
        assert_eq!(s.phase, SurveyPhase::CardiacArrest);

        // Completing every arrest intervention does not end the arrest
        let mut done = s.clone();
        let ids: Vec<String> = done
            .threat("cardiac_arrest")
            .unwrap()
            .interventions
            .iter()
            .map(|i| i.step.id.clone())
            .collect();
        for id in &ids {
            done = apply(&done, Input::INTERVENTION_DONE, id);
        }
        assert_eq!(done.phase, SurveyPhase::CardiacArrest);
        assert_eq!(apply(&done, Input::RESOLVE_THREAT, "cardiac_arrest"), done);

        let after = apply(&s, Input::ROSC, "");
        assert!(after.threat("cardiac_arrest").unwrap().resolved);
        assert_eq!(after.phase, SurveyPhase::PrimarySurvey);
        assert_eq!(after.letter, Letter::C);
    }

    #[test]
    fn test_rosc_ignored_outside_arrest() {
        let s = begun(20.0, "5 years", false);
        assert_eq!(apply(&s, Input::ROSC, ""), s);
    }

    #[test]
    fn test_insulin_without_potassium_alert_persists() {
        let mut s = begun(30.0, "10 years", false);
        for letter in ["a_", "b_", "c_"] {
            s = normal_letter(s, letter);
        }
        s = apply(&s, "d_avpu", "alert");
        s = apply(&s, "d_seizure", "no");
        s = apply(&s, "d_glucose", "high");
        s = apply(&s, "d_ketones", "positive");
        assert!(s.has_threat("dka"));

        s = apply(&s, Input::INTERVENTION_DONE, "dka_fluids");
        s = apply(&s, Input::INTERVENTION_DONE, "insulin");
        assert_eq!(s.unacknowledged_alerts().count(), 1);
        assert_eq!(s.alerts[0].id, "insulin_without_potassium");

        s = apply(&s, Input::INTERVENTION_DONE, "glucose_monitor");
        assert_eq!(s.unacknowledged_alerts().count(), 1);

        s = apply(&s, Input::ACKNOWLEDGE_ALERT, "insulin_without_potassium");
        assert_eq!(s.unacknowledged_alerts().count(), 0);
        assert!(s.alerts[0].acknowledged);

        // Raised once per session
        s = apply(&s, Input::INTERVENTION_DONE, "potassium");
        assert_eq!(s.alerts.len(), 1);
    }

    #[test]
    fn test_first_finding_wins() {
        let s = begun(20.0, "5 years", false);
        let s = apply(&s, "a_airway", "patent");
        let again = apply(&s, "a_airway", "obstructed");
        assert_eq!(again, s);
        assert!(again.threats.is_empty());
    }

    #[test]
    fn test_unknown_answer_value_is_noop() {
        let s = begun(20.0, "5 years", false);
        assert_eq!(apply(&s, "a_airway", "maybe"), s);
        assert_eq!(apply(&s, "b_breathing", "normal"), s);
    }

    #[test]
    fn test_pending_interventions_critical_first() {
        let s = begun(20.0, "5 years", false);
        let s = apply(&s, "a_airway", "at_risk");
        let s = apply(&s, "a_swelling", "yes");
        assert_eq!(s.phase, SurveyPhase::Intervention);

        let pending = pending_interventions(&s);
        assert_eq!(pending.first().unwrap().0.id, "anaphylaxis");
        assert_eq!(pending.last().unwrap().0.id, "airway_at_risk");
    }

    #[test]
    fn test_log_never_runs_backwards() {
        let protocol = get_default_protocol();
        let t0 = Utc::now();
        let s = create_survey(PatientContext::new(Some(20.0), None, false), t0);
        let s = dispatch(&s, &Input::new(Input::BEGIN, ""), protocol, t0);
        let s = dispatch(
            &s,
            &Input::new("a_airway", "obstructed"),
            protocol,
            t0 - chrono::Duration::seconds(30),
        );
        assert!(s.log.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }
}
