//! Threat rule table.
//!
//! Rules are evaluated in declared order after every finding; declaration
//! order is clinical precedence. Each rule fires at most once per session.
//! Builders see the session as it stands when the rule fires, so they can
//! tailor interventions to age, trauma status or earlier threats.

use super::{SurveySession, ThreatSeverity};
use crate::types::{Answers, DoseSpec, Letter, Step};

pub type ThreatCondition = fn(&Answers, &SurveySession) -> bool;
pub type InterventionBuilder = fn(&SurveySession) -> Vec<Step>;

#[derive(Clone, Debug)]
pub struct ThreatRule {
    pub id: &'static str,
    pub name: &'static str,
    pub letter: Letter,
    pub severity: ThreatSeverity,
    /// Switches the survey into cardiac arrest instead of intervention
    pub arrest: bool,
    /// Question ids the condition reads; used as the threat's contributing findings
    pub inputs: &'static [&'static str],
    pub condition: ThreatCondition,
    pub interventions: InterventionBuilder,
}

fn is(answers: &Answers, key: &str, value: &str) -> bool {
    answers.get(key).map(String::as_str) == Some(value)
}

fn rule(
    id: &'static str,
    name: &'static str,
    letter: Letter,
    severity: ThreatSeverity,
    inputs: &'static [&'static str],
    condition: ThreatCondition,
    interventions: InterventionBuilder,
) -> ThreatRule {
    ThreatRule {
        id,
        name,
        letter,
        severity,
        arrest: false,
        inputs,
        condition,
        interventions,
    }
}

pub(super) fn default_rules() -> Vec<ThreatRule> {
    use Letter::*;
    use ThreatSeverity::*;

    vec![
        rule(
            "catastrophic_hemorrhage",
            "Catastrophic hemorrhage",
            X,
            Critical,
            &["x_hemorrhage"],
            |a, _| is(a, "x_hemorrhage", "yes"),
            hemorrhage_control,
        ),
        rule(
            "airway_obstruction",
            "Airway obstruction",
            A,
            Critical,
            &["a_airway"],
            |a, _| is(a, "a_airway", "obstructed"),
            airway_opening,
        ),
        rule(
            "anaphylaxis",
            "Anaphylaxis",
            A,
            Critical,
            &["a_swelling"],
            |a, _| is(a, "a_swelling", "yes"),
            anaphylaxis_treatment,
        ),
        rule(
            "airway_at_risk",
            "Airway at risk",
            A,
            Urgent,
            &["a_airway"],
            |a, _| is(a, "a_airway", "at_risk"),
            |_| {
                vec![
                    Step::new("airway_position", "Position to open the airway; suction ready"),
                    Step::new("airway_watch", "Continuous airway observation"),
                ]
            },
        ),
        rule(
            "upper_airway_obstruction",
            "Upper airway obstruction (croup)",
            A,
            Urgent,
            &["a_stridor", "a_swelling"],
            |a, _| is(a, "a_stridor", "yes") && is(a, "a_swelling", "no"),
            croup_treatment,
        ),
        rule(
            "apnoea",
            "Apnoea",
            B,
            Critical,
            &["b_breathing"],
            |a, _| is(a, "b_breathing", "absent"),
            |_| {
                vec![
                    Step::new("bvm_ventilation", "Bag-valve-mask ventilation with 100% oxygen")
                        .detail("12-20 breaths/min; 20-30 in infants.")
                        .critical(),
                    Step::new("airway_expert", "Call for advanced airway support").critical(),
                ]
            },
        ),
        rule(
            "hypoxia",
            "Severe hypoxia",
            B,
            Critical,
            &["b_spo2"],
            |a, _| is(a, "b_spo2", "very_low"),
            |_| {
                vec![Step::new("oxygen", "High-flow oxygen via non-rebreather mask (15 L/min)")
                    .reassess("Is SpO2 rising to 94% or above?")
                    .critical()]
            },
        ),
        rule(
            "respiratory_distress",
            "Respiratory distress",
            B,
            Urgent,
            &["b_breathing", "b_spo2"],
            |a, _| is(a, "b_breathing", "distressed") || is(a, "b_spo2", "low"),
            |_| {
                vec![
                    Step::new("oxygen", "Oxygen to keep SpO2 94-98%"),
                    Step::new("position", "Position of comfort"),
                ]
            },
        ),
        rule(
            "bronchospasm",
            "Bronchospasm",
            B,
            Urgent,
            &["b_wheeze"],
            |a, _| is(a, "b_wheeze", "yes"),
            bronchospasm_treatment,
        ),
        ThreatRule {
            arrest: true,
            ..rule(
                "cardiac_arrest",
                "Cardiac arrest",
                C,
                Critical,
                &["c_pulse"],
                |a, _| is(a, "c_pulse", "absent"),
                arrest_interventions,
            )
        },
        rule(
            "bradycardia",
            "Bradycardia with poor perfusion",
            C,
            Critical,
            &["c_heart_rate", "c_pulse"],
            |a, _| is(a, "c_heart_rate", "bradycardic") && is(a, "c_pulse", "present"),
            |_| {
                vec![
                    Step::new("ventilate_oxygen", "Ventilate with 100% oxygen").critical(),
                    Step::new("cpr_if_below_60", "Start CPR if HR stays below 60/min").critical(),
                    epinephrine_iv(),
                ]
            },
        ),
        rule(
            "septic_shock",
            "Septic shock",
            C,
            Critical,
            &["c_perfusion", "c_sepsis"],
            |a, _| is(a, "c_perfusion", "poor") && is(a, "c_sepsis", "yes"),
            |s| {
                let mut steps = vec![iv_access(), fluid_bolus(s)];
                steps.extend(antibiotics(s));
                steps
            },
        ),
        rule(
            "shock",
            "Shock",
            C,
            Urgent,
            &["c_perfusion", "c_sepsis"],
            |a, _| is(a, "c_perfusion", "poor") && is(a, "c_sepsis", "no"),
            |s| vec![iv_access(), fluid_bolus(s)],
        ),
        rule(
            "status_epilepticus",
            "Status epilepticus",
            D,
            Critical,
            &["d_seizure"],
            |a, _| is(a, "d_seizure", "yes"),
            seizure_ladder,
        ),
        rule(
            "hypoglycemia",
            "Hypoglycemia",
            D,
            Critical,
            &["d_glucose"],
            |a, _| is(a, "d_glucose", "low"),
            |_| {
                vec![
                    Step::new("dextrose", "Give dextrose 10%")
                        .dose(DoseSpec::new("Dextrose 10%", 2.0, "mL", "IV/IO").max(250.0))
                        .timer(900)
                        .critical(),
                    Step::new("recheck_glucose", "Recheck glucose in 15 minutes").timer(900),
                ]
            },
        ),
        rule(
            "raised_icp",
            "Raised intracranial pressure",
            D,
            Critical,
            &["d_pupils"],
            |a, _| is(a, "d_pupils", "unequal"),
            raised_icp_treatment,
        ),
        rule(
            "dka",
            "Diabetic ketoacidosis",
            D,
            Urgent,
            &["d_glucose", "d_ketones"],
            |a, _| is(a, "d_glucose", "high") && is(a, "d_ketones", "positive"),
            dka_management,
        ),
        rule(
            "decreased_consciousness",
            "Decreased consciousness",
            D,
            Urgent,
            &["d_avpu"],
            |a, _| is(a, "d_avpu", "pain") || is(a, "d_avpu", "unresponsive"),
            |_| {
                vec![
                    Step::new("protect_airway", "Protect the airway; intubate if GCS 8 or below")
                        .critical(),
                    Step::new("check_glucose", "Check bedside glucose"),
                ]
            },
        ),
        rule(
            "purpuric_rash",
            "Purpuric rash (possible meningococcal sepsis)",
            E,
            Critical,
            &["e_rash"],
            |a, _| is(a, "e_rash", "petechial"),
            |s| {
                let mut steps = vec![iv_access()];
                steps.extend(antibiotics(s));
                steps
            },
        ),
        rule(
            "hypothermia",
            "Hypothermia",
            E,
            Urgent,
            &["e_temperature"],
            |a, _| is(a, "e_temperature", "hypothermia"),
            |_| vec![Step::new("warming", "Active external warming; warm IV fluids")],
        ),
        rule(
            "injuries",
            "Injuries",
            E,
            Urgent,
            &["e_injuries"],
            |a, _| is(a, "e_injuries", "yes"),
            |_| {
                vec![
                    Step::new("analgesia", "Give intranasal fentanyl")
                        .dose(DoseSpec::new("Fentanyl", 1.5, "mcg", "IN").max(100.0)),
                    Step::new("splint", "Splint fractures; log roll to inspect the back"),
                ]
            },
        ),
        rule(
            "fever",
            "Fever",
            E,
            Monitor,
            &["e_temperature"],
            |a, _| is(a, "e_temperature", "fever"),
            |_| {
                vec![Step::new("antipyretic", "Give paracetamol")
                    .dose(DoseSpec::new("Paracetamol", 15.0, "mg", "PO/IV").max(1000.0))]
            },
        ),
        rule(
            "urticaria",
            "Urticaria",
            E,
            Monitor,
            &["e_rash"],
            |a, s| is(a, "e_rash", "urticaria") && !s.has_threat("anaphylaxis"),
            |_| {
                vec![
                    Step::new("antihistamine", "Give antihistamine")
                        .dose(DoseSpec::new("Chlorphenamine", 0.2, "mg", "PO/IV").max(10.0)),
                    Step::new("observe_anaphylaxis", "Observe for progression to anaphylaxis"),
                ]
            },
        ),
    ]
}

// ============================================================================
// Intervention builders
// ============================================================================

fn iv_access() -> Step {
    Step::new("iv_access", "IV/IO access; send gas, lactate, glucose and cultures").critical()
}

fn epinephrine_iv() -> Step {
    Step::new("epinephrine", "Give epinephrine IV/IO")
        .dose(
            DoseSpec::new("Epinephrine", 0.01, "mg", "IV/IO")
                .max(1.0)
                .concentration("0.1 mg/mL (1:10,000)")
                .frequency("repeat every 3-5 min"),
        )
        .critical()
}

/// Neonates get 10 mL/kg, everyone else 20 mL/kg
fn fluid_bolus(s: &SurveySession) -> Step {
    let ml_per_kg = if s.patient.is_neonate() { 10.0 } else { 20.0 };
    Step::new("fluid_bolus", "Give fluid bolus")
        .dose(
            DoseSpec::new("Balanced crystalloid", ml_per_kg, "mL", "IV/IO")
                .max(1000.0)
                .preparation("push over 5-10 min"),
        )
        .reassess("Are heart rate and perfusion improving?")
        .critical()
}

/// Neonates get ampicillin with gentamicin; older children ceftriaxone
fn antibiotics(s: &SurveySession) -> Vec<Step> {
    if s.patient.is_neonate() {
        vec![
            Step::new("ampicillin", "Give ampicillin")
                .dose(DoseSpec::new("Ampicillin", 50.0, "mg", "IV"))
                .critical(),
            Step::new("gentamicin", "Give gentamicin")
                .dose(DoseSpec::new("Gentamicin", 4.0, "mg", "IV"))
                .critical(),
        ]
    } else {
        vec![Step::new("ceftriaxone", "Give ceftriaxone")
            .dose(DoseSpec::new("Ceftriaxone", 100.0, "mg", "IV/IO").max(2000.0))
            .critical()]
    }
}

fn hemorrhage_control(_: &SurveySession) -> Vec<Step> {
    vec![
        Step::new("direct_pressure", "Direct pressure and hemostatic packing").critical(),
        Step::new("tourniquet", "Apply tourniquet for limb hemorrhage").critical(),
        Step::new("txa", "Give tranexamic acid")
            .dose(
                DoseSpec::new("Tranexamic acid", 15.0, "mg", "IV")
                    .max(1000.0)
                    .preparation("over 10 min"),
            )
            .critical(),
    ]
}

fn airway_opening(s: &SurveySession) -> Vec<Step> {
    let maneuver = if s.patient.is_trauma {
        Step::new("airway_maneuver", "Jaw thrust with manual in-line stabilisation")
    } else {
        Step::new("airway_maneuver", "Head tilt-chin lift (neutral position in infants)")
    };
    vec![
        maneuver.critical(),
        Step::new("suction", "Suction under direct vision").critical(),
        Step::new("airway_adjunct", "Insert oropharyngeal or nasopharyngeal airway"),
        Step::new("airway_expert", "Call for advanced airway support").critical(),
    ]
}

fn anaphylaxis_treatment(s: &SurveySession) -> Vec<Step> {
    vec![
        Step::new("epinephrine_im", "Give IM epinephrine")
            .dose(
                DoseSpec::new("Epinephrine", 0.01, "mg", "IM")
                    .max(0.5)
                    .concentration("1 mg/mL (1:1000)")
                    .frequency("repeat every 5 min if no improvement"),
            )
            .timer(300)
            .critical(),
        Step::new("oxygen", "High-flow oxygen"),
        fluid_bolus(s),
    ]
}

fn croup_treatment(_: &SurveySession) -> Vec<Step> {
    vec![
        Step::new("dexamethasone", "Give dexamethasone")
            .dose(DoseSpec::new("Dexamethasone", 0.6, "mg", "PO/IM").max(16.0)),
        Step::new("nebulised_epinephrine", "Nebulised epinephrine for stridor at rest")
            .dose(
                DoseSpec::new("Epinephrine 1:1000", 0.5, "mL", "nebulised")
                    .max(5.0)
                    .concentration("1 mg/mL"),
            ),
    ]
}

/// Salbutamol is a fixed dose by age band; unknown age gets the lower dose
fn bronchospasm_treatment(s: &SurveySession) -> Vec<Step> {
    let salbutamol = match s.patient.age_in_years() {
        Some(years) if years >= 5.0 => "Nebulised salbutamol 5 mg",
        _ => "Nebulised salbutamol 2.5 mg",
    };
    vec![
        Step::new("salbutamol", salbutamol)
            .detail("Repeat every 20 min; add ipratropium 250 mcg.")
            .timer(1200),
        Step::new("steroid", "Give oral prednisolone")
            .dose(DoseSpec::new("Prednisolone", 1.0, "mg", "PO").max(40.0)),
    ]
}

fn arrest_interventions(_: &SurveySession) -> Vec<Step> {
    let shock = |id: &str, joules: f64| {
        Step::new(id, "Shock if VF/pVT")
            .dose(DoseSpec::new("Defibrillation", joules, "J", "").max(200.0))
            .critical()
    };
    vec![
        Step::new("cpr", "Start CPR 15:2").timer(120).critical(),
        Step::new("attach_defib", "Attach defibrillator pads; check rhythm").critical(),
        epinephrine_iv(),
        shock("shock_1", 2.0),
        shock("shock_2", 4.0),
        shock("shock_3", 4.0),
        Step::new("amiodarone", "Give amiodarone after the third shock")
            .dose(DoseSpec::new("Amiodarone", 5.0, "mg", "IV/IO").max(300.0))
            .critical(),
        Step::new("hs_and_ts", "Review reversible causes (Hs & Ts)"),
    ]
}

fn seizure_ladder(_: &SurveySession) -> Vec<Step> {
    vec![
        Step::new("benzodiazepine_1", "Give first benzodiazepine")
            .dose(DoseSpec::new("Midazolam", 0.3, "mg", "buccal/IN").max(10.0))
            .timer(300)
            .critical(),
        Step::new("benzodiazepine_2", "Give second benzodiazepine if still seizing")
            .dose(DoseSpec::new("Lorazepam", 0.1, "mg", "IV/IO").max(4.0))
            .timer(300)
            .critical(),
        Step::new("second_line", "Give levetiracetam if still seizing")
            .dose(DoseSpec::new("Levetiracetam", 40.0, "mg", "IV/IO").max(3000.0))
            .critical(),
    ]
}

fn raised_icp_treatment(s: &SurveySession) -> Vec<Step> {
    let referral = if s.patient.is_trauma {
        "Emergency neurosurgical referral"
    } else {
        "Urgent CT head and PICU review"
    };
    vec![
        Step::new("head_up", "Head up 30 degrees, neutral neck").critical(),
        Step::new("hypertonic_saline", "Give hypertonic saline")
            .dose(DoseSpec::new("Sodium chloride 3%", 3.0, "mL", "IV").max(250.0))
            .critical(),
        Step::new("neuro_referral", referral),
    ]
}

fn dka_management(_: &SurveySession) -> Vec<Step> {
    vec![
        Step::new("dka_fluids", "Give 0.9% saline over 60 minutes")
            .dose(
                DoseSpec::new("Sodium chloride 0.9%", 10.0, "mL", "IV")
                    .max(1000.0)
                    .preparation("over 60 min"),
            )
            .timer(3600)
            .critical(),
        Step::new("insulin", "Start insulin infusion after fluids")
            .dose(
                DoseSpec::new("Insulin (regular)", 0.1, "units", "IV infusion")
                    .frequency("per hour"),
            )
            .detail("No bolus.")
            .critical(),
        Step::new("potassium", "Add potassium 40 mmol/L to fluids").critical(),
        Step::new("glucose_monitor", "Hourly glucose and neuro observations").timer(3600),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::survey::create_survey;
    use crate::types::PatientContext;
    use chrono::Utc;

    fn session_for(age: &str, trauma: bool) -> SurveySession {
        create_survey(PatientContext::new(None, Some(age), trauma), Utc::now())
    }

    fn ids(steps: &[Step]) -> Vec<&str> {
        steps.iter().map(|s| s.id.as_str()).collect()
    }

    #[test]
    fn test_neonate_gets_neonatal_antibiotics_and_small_bolus() {
        let s = session_for("10 days", false);
        let steps = antibiotics(&s);
        assert_eq!(ids(&steps), vec!["ampicillin", "gentamicin"]);
        assert_eq!(fluid_bolus(&s).dose.unwrap().per_kg, 10.0);
    }

    #[test]
    fn test_older_child_gets_ceftriaxone() {
        let s = session_for("4 years", false);
        assert_eq!(ids(&antibiotics(&s)), vec!["ceftriaxone"]);
        assert_eq!(fluid_bolus(&s).dose.unwrap().per_kg, 20.0);
    }

    #[test]
    fn test_salbutamol_by_age() {
        let young = bronchospasm_treatment(&session_for("2 years", false));
        assert!(young[0].action.contains("2.5 mg"));

        let older = bronchospasm_treatment(&session_for("9 years", false));
        assert!(older[0].action.contains("5 mg"));
        assert!(!older[0].action.contains("2.5"));
    }

    #[test]
    fn test_trauma_airway_uses_jaw_thrust() {
        let steps = airway_opening(&session_for("6 years", true));
        assert!(steps[0].action.contains("Jaw thrust"));

        let steps = airway_opening(&session_for("6 years", false));
        assert!(steps[0].action.contains("chin lift"));
    }

    #[test]
    fn test_dka_fluids_listed_before_insulin() {
        let steps = dka_management(&session_for("10 years", false));
        let order = ids(&steps);
        let fluids = order.iter().position(|id| *id == "dka_fluids").unwrap();
        let insulin = order.iter().position(|id| *id == "insulin").unwrap();
        assert!(fluids < insulin);
        assert_eq!(steps[fluids].dose.as_ref().unwrap().per_kg, 10.0);
    }
}
