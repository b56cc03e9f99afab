//! Built-in pathway registry.
//!
//! Each pathway lists its clarifying questions, its sub-pathways in the order
//! they are matched, and a default step list used when none matches. Step
//! order within a list is clinical order: fluids before insulin, amiodarone
//! only after the third shock, and so on.

use crate::types::*;
use crate::{Error, Result};
use once_cell::sync::Lazy;
use std::collections::HashSet;

/// Registry built once and shared by every session
static DEFAULT_REGISTRY: Lazy<PathwayRegistry> = Lazy::new(build_default_registry);

/// Get a reference to the built-in registry
pub fn get_default_registry() -> &'static PathwayRegistry {
    &DEFAULT_REGISTRY
}

/// Lookup table from pathway id to definition, in display order
#[derive(Clone, Debug)]
pub struct PathwayRegistry {
    pathways: Vec<Pathway>,
}

impl PathwayRegistry {
    pub fn new(pathways: Vec<Pathway>) -> Self {
        Self { pathways }
    }

    /// Build a registry and reject it if validation finds any problem
    pub fn checked(pathways: Vec<Pathway>) -> Result<Self> {
        let registry = Self::new(pathways);
        let errors = registry.validate();
        if errors.is_empty() {
            Ok(registry)
        } else {
            Err(Error::Registry(errors.join("; ")))
        }
    }

    pub fn get(&self, id: &str) -> Option<&Pathway> {
        self.pathways.iter().find(|p| p.id == id)
    }

    pub fn pathways(&self) -> &[Pathway] {
        &self.pathways
    }

    /// Validate the registry for consistency and completeness
    ///
    /// Returns a list of validation errors, or empty Vec if valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut seen = HashSet::new();

        for pathway in &self.pathways {
            let id = &pathway.id;
            if id.is_empty() {
                errors.push("Pathway has empty ID".to_string());
            }
            if !seen.insert(id.as_str()) {
                errors.push(format!("Duplicate pathway ID '{}'", id));
            }
            if pathway.name.is_empty() {
                errors.push(format!("Pathway '{}' has empty name", id));
            }

            let mut question_ids = HashSet::new();
            for question in &pathway.questions {
                if question.id.is_empty() {
                    errors.push(format!("Pathway '{}' has a question with empty ID", id));
                }
                if !question_ids.insert(question.id.as_str()) {
                    errors.push(format!(
                        "Pathway '{}' repeats question '{}'",
                        id, question.id
                    ));
                }
                if question.options.is_empty() {
                    errors.push(format!(
                        "Pathway '{}': question '{}' has no options",
                        id, question.id
                    ));
                }
            }

            // A fallback must exist for answers that match no sub-pathway
            let empty = Answers::new();
            let has_catch_all = pathway.sub_pathways.iter().any(|s| (s.matches)(&empty));
            if pathway.default_steps.is_empty() && !has_catch_all {
                errors.push(format!(
                    "Pathway '{}' has no default steps and no catch-all sub-pathway",
                    id
                ));
            }

            errors.extend(validate_steps(&format!("{}/default", id), &pathway.default_steps, false));
            for sub in &pathway.sub_pathways {
                if sub.id.is_empty() {
                    errors.push(format!("Pathway '{}' has a sub-pathway with empty ID", id));
                }
                errors.extend(validate_steps(&format!("{}/{}", id, sub.id), &sub.steps, true));
            }
        }

        errors
    }
}

fn validate_steps(context: &str, steps: &[Step], required: bool) -> Vec<String> {
    let mut errors = Vec::new();
    if required && steps.is_empty() {
        errors.push(format!("'{}' has no steps", context));
    }

    let mut ids = HashSet::new();
    for step in steps {
        if step.id.is_empty() {
            errors.push(format!("'{}' has a step with empty ID", context));
        }
        if step.action.trim().is_empty() {
            errors.push(format!("'{}': step '{}' has empty action", context, step.id));
        }
        if !ids.insert(step.id.as_str()) {
            errors.push(format!("'{}' repeats step '{}'", context, step.id));
        }
        if let Some(dose) = &step.dose {
            if !(dose.per_kg.is_finite() && dose.per_kg > 0.0) {
                errors.push(format!(
                    "'{}': step '{}' has invalid per-kg dose {}",
                    context, step.id, dose.per_kg
                ));
            }
            if matches!(dose.max_dose, Some(max) if !(max.is_finite() && max > 0.0)) {
                errors.push(format!("'{}': step '{}' has invalid max dose", context, step.id));
            }
        }
    }
    errors
}

/// First sub-pathway, in declared order, whose predicate accepts the answers
pub fn resolve_sub_pathway<'a>(pathway: &'a Pathway, answers: &Answers) -> Option<&'a SubPathway> {
    pathway.sub_pathways.iter().find(|s| (s.matches)(answers))
}

/// Steps for a pathway given the resolved sub-pathway id
pub fn steps_for<'a>(pathway: &'a Pathway, sub_pathway_id: Option<&str>) -> &'a [Step] {
    sub_pathway_id
        .and_then(|id| pathway.sub_pathway(id))
        .map(|s| s.steps.as_slice())
        .unwrap_or(pathway.default_steps.as_slice())
}

fn answer_is(answers: &Answers, key: &str, value: &str) -> bool {
    answers.get(key).map(String::as_str) == Some(value)
}

fn sub(id: &str, name: &str, matches: MatchFn, steps: Vec<Step>) -> SubPathway {
    SubPathway {
        id: id.into(),
        name: name.into(),
        matches,
        steps,
    }
}

/// Builds the built-in registry
///
/// **Note**: prefer `get_default_registry()`, which returns the cached copy.
pub fn build_default_registry() -> PathwayRegistry {
    PathwayRegistry::new(vec![
        cardiac_arrest(),
        respiratory(),
        shock(),
        allergic(),
        seizure(),
        metabolic(),
        trauma(),
        toxicology(),
    ])
}

// ============================================================================
// Shared steps
// ============================================================================

fn cpr_start() -> Step {
    Step::new("cpr_start", "Start high-quality chest compressions (CPR 15:2)")
        .detail("Rate 100-120/min, depth one third of the chest, full recoil. Minimise pauses.")
        .critical()
}

fn cpr_cycle(id: &str) -> Step {
    Step::new(id, "Resume CPR for 2 minutes, then rhythm check")
        .timer(120)
        .critical()
}

fn epinephrine_iv(id: &str) -> Step {
    Step::new(id, "Give epinephrine IV/IO")
        .dose(
            DoseSpec::new("Epinephrine", 0.01, "mg", "IV/IO")
                .max(1.0)
                .concentration("0.1 mg/mL (1:10,000), 0.1 mL/kg")
                .frequency("repeat every 3-5 min"),
        )
        .critical()
}

fn shock_step(id: &str, action: &str, joules_per_kg: f64) -> Step {
    Step::new(id, action)
        .dose(DoseSpec::new("Defibrillation", joules_per_kg, "J", "").max(200.0))
        .detail("Resume compressions immediately after the shock.")
        .critical()
}

fn hs_and_ts() -> Step {
    Step::new("hs_and_ts", "Review reversible causes (Hs & Ts)").detail(
        "Hypoxia, hypovolemia, hydrogen ion, hypo/hyperkalemia, hypothermia; \
         tension pneumothorax, tamponade, toxins, thrombosis.",
    )
}

fn post_rosc() -> Step {
    Step::new("post_rosc", "Post-resuscitation care").detail(
        "Target SpO2 94-99%, normocapnia, treat hypotension, avoid fever, check glucose.",
    )
}

fn iv_access() -> Step {
    Step::new("iv_access", "Obtain IV/IO access; send gas, lactate, glucose and cultures")
        .critical()
}

fn fluid_bolus(id: &str, action: &str, ml_per_kg: f64) -> Step {
    Step::new(id, action)
        .dose(
            DoseSpec::new("Balanced crystalloid", ml_per_kg, "mL", "IV/IO")
                .max(1000.0)
                .preparation("push over 5-10 min"),
        )
        .reassess("Are heart rate, capillary refill and blood pressure improving?")
        .escalation("Check for crackles or hepatomegaly before further fluid")
        .critical()
}

fn high_flow_oxygen() -> Step {
    Step::new("oxygen", "High-flow oxygen via non-rebreather mask (15 L/min)")
        .reassess("Is SpO2 improving to 94% or above?")
        .escalation("Support ventilation with bag-valve-mask and call airway expertise")
}

fn dextrose_bolus() -> Step {
    Step::new("dextrose", "Give dextrose 10% IV/IO")
        .dose(
            DoseSpec::new("Dextrose 10%", 2.0, "mL", "IV/IO")
                .max(250.0)
                .preparation("0.2 g/kg"),
        )
        .detail("No access: glucagon IM 0.5 mg (< 25 kg) or 1 mg.")
        .timer(900)
        .reassess("Is repeat glucose above 4 mmol/L (70 mg/dL)?")
        .escalation("Repeat dextrose 2 mL/kg and start a dextrose infusion")
        .critical()
}

fn airway_protect() -> Step {
    Step::new("airway", "Protect airway: recovery position, suction, oxygen").critical()
}

// ============================================================================
// Pathways
// ============================================================================

fn cardiac_arrest() -> Pathway {
    Pathway {
        id: "cardiac_arrest".into(),
        name: "Cardiac Arrest".into(),
        icon: "heart-pulse".into(),
        questions: vec![Question::new(
            "rhythm",
            "What rhythm is on the monitor?",
            &[
                ("shockable", "VF / pulseless VT"),
                ("non_shockable", "Asystole / PEA"),
                ("unknown", "Not yet known"),
            ],
        )],
        sub_pathways: vec![
            sub(
                "shockable",
                "VF / pulseless VT",
                |a| answer_is(a, "rhythm", "shockable"),
                vec![
                    cpr_start(),
                    shock_step("shock_1", "Deliver first shock", 2.0),
                    cpr_cycle("cpr_cycle_1"),
                    shock_step("shock_2", "Deliver second shock", 4.0),
                    epinephrine_iv("epinephrine_1"),
                    cpr_cycle("cpr_cycle_2"),
                    shock_step("shock_3", "Deliver third shock", 4.0),
                    Step::new("amiodarone", "Give amiodarone after the third shock")
                        .dose(DoseSpec::new("Amiodarone", 5.0, "mg", "IV/IO").max(300.0))
                        .detail("Only after three shocks. May repeat twice for refractory VF/pVT.")
                        .critical(),
                    cpr_cycle("cpr_cycle_3")
                        .reassess("Is there return of spontaneous circulation?")
                        .escalation(
                            "No ROSC: shock every 2 min, epinephrine every 3-5 min, treat Hs & Ts",
                        ),
                    hs_and_ts(),
                    post_rosc(),
                ],
            ),
            sub(
                "non_shockable",
                "Asystole / PEA",
                |a| answer_is(a, "rhythm", "non_shockable"),
                vec![
                    cpr_start(),
                    epinephrine_iv("epinephrine_1").detail("Give as soon as access is obtained."),
                    cpr_cycle("cpr_cycle_1")
                        .reassess("Has the rhythm changed or is there ROSC?")
                        .escalation("Shockable rhythm: switch to the VF/pVT sequence"),
                    epinephrine_iv("epinephrine_2").timer(240),
                    hs_and_ts(),
                    post_rosc(),
                ],
            ),
            sub(
                "respiratory_arrest",
                "Respiratory arrest",
                |a| answer_is(a, "breathing", "no"),
                vec![
                    Step::new("rescue_breaths", "Open the airway and give 5 rescue breaths")
                        .detail("Head tilt-chin lift (jaw thrust in trauma). Bag-valve-mask with 100% oxygen.")
                        .critical(),
                    Step::new("pulse_check", "Check pulse for no more than 10 seconds")
                        .timer(10)
                        .reassess("Is there a pulse above 60/min with adequate perfusion?")
                        .escalation("No pulse or HR < 60 with poor perfusion: start CPR")
                        .critical(),
                    Step::new("cpr_if_needed", "Start CPR 15:2 if pulse absent or HR < 60")
                        .critical(),
                    Step::new("attach_monitor", "Attach defibrillator pads and assess rhythm")
                        .critical(),
                    epinephrine_iv("epinephrine_1"),
                    Step::new("rescue_breathing", "Rescue breathing 20-30/min while pulse present")
                        .timer(120)
                        .reassess("Is spontaneous breathing returning?"),
                    post_rosc(),
                ],
            ),
        ],
        default_steps: vec![
            cpr_start(),
            Step::new("attach_monitor", "Attach defibrillator pads and check rhythm")
                .reassess("Is the rhythm non-shockable (asystole/PEA)?")
                .escalation("Shockable: deliver 2 J/kg and follow the VF/pVT sequence")
                .critical(),
            epinephrine_iv("epinephrine_1"),
            cpr_cycle("cpr_cycle_1"),
            hs_and_ts(),
            post_rosc(),
        ],
    }
}

fn respiratory() -> Pathway {
    Pathway {
        id: "respiratory".into(),
        name: "Respiratory Distress".into(),
        icon: "lungs".into(),
        questions: vec![Question::new(
            "sound",
            "What is the dominant respiratory sound?",
            &[
                ("stridor", "Stridor / barking cough"),
                ("wheeze", "Wheeze"),
                ("crackles", "Crackles in an infant (bronchiolitis)"),
                ("none", "None / unclear"),
            ],
        )],
        sub_pathways: vec![
            sub(
                "croup",
                "Croup",
                |a| answer_is(a, "sound", "stridor"),
                vec![
                    Step::new("keep_calm", "Keep the child calm on the parent's lap"),
                    Step::new("dexamethasone", "Give dexamethasone")
                        .dose(DoseSpec::new("Dexamethasone", 0.6, "mg", "PO/IM").max(16.0)),
                    Step::new("nebulised_epinephrine", "Nebulised epinephrine for stridor at rest")
                        .dose(
                            DoseSpec::new("Epinephrine 1:1000", 0.5, "mL", "nebulised")
                                .max(5.0)
                                .concentration("1 mg/mL"),
                        )
                        .timer(1800)
                        .reassess("Is stridor at rest settling?")
                        .escalation("Repeat nebulised epinephrine and call anaesthesia/ENT")
                        .critical(),
                    Step::new("observe", "Observe for rebound for at least 2 hours").timer(7200),
                ],
            ),
            sub(
                "asthma",
                "Acute asthma",
                |a| answer_is(a, "sound", "wheeze"),
                vec![
                    Step::new("oxygen", "Oxygen to keep SpO2 94-98%"),
                    Step::new("salbutamol", "Nebulised salbutamol back-to-back")
                        .dose(
                            DoseSpec::new("Salbutamol", 0.15, "mg", "nebulised")
                                .max(5.0)
                                .frequency("every 20 min for 3 doses"),
                        )
                        .detail("Add ipratropium 250 mcg to the first three nebulisers.")
                        .timer(1200)
                        .reassess("Is work of breathing improving?")
                        .escalation("Poor response: give IV magnesium")
                        .critical(),
                    Step::new("steroid", "Give oral prednisolone")
                        .dose(DoseSpec::new("Prednisolone", 1.0, "mg", "PO").max(40.0)),
                    Step::new("magnesium", "IV magnesium sulfate over 20 minutes")
                        .dose(DoseSpec::new("Magnesium sulfate", 40.0, "mg", "IV").max(2000.0))
                        .timer(1200)
                        .reassess("Has the child moved out of severe asthma?")
                        .escalation("IV salbutamol or aminophylline; PICU review")
                        .critical(),
                    Step::new("disposition", "Reassess and arrange admission level"),
                ],
            ),
            sub(
                "bronchiolitis",
                "Bronchiolitis",
                |a| answer_is(a, "sound", "crackles"),
                vec![
                    Step::new("suction", "Gentle nasal suction"),
                    Step::new("oxygen", "Oxygen if SpO2 below 92%")
                        .reassess("Is the infant holding SpO2 at 92% or above and feeding?")
                        .escalation("Start high-flow nasal cannula or CPAP"),
                    Step::new("hydration", "NG or IV fluids if feeding poorly"),
                ],
            ),
        ],
        default_steps: vec![
            Step::new("position", "Position of comfort; assess airway patency"),
            high_flow_oxygen().critical(),
            Step::new("monitor", "Continuous SpO2, respiratory rate and work-of-breathing monitoring"),
        ],
    }
}

fn shock() -> Pathway {
    Pathway {
        id: "shock".into(),
        name: "Shock".into(),
        icon: "droplet".into(),
        questions: vec![Question::new(
            "shock_type",
            "What type of shock is most likely?",
            &[
                ("septic", "Septic (fever, rash, infection source)"),
                ("hypovolemic", "Hypovolemic (losses, dehydration, bleeding)"),
                ("cardiogenic", "Cardiogenic (hepatomegaly, gallop, crackles)"),
                ("unknown", "Unclear"),
            ],
        )],
        sub_pathways: vec![
            sub(
                "septic",
                "Septic shock",
                |a| answer_is(a, "shock_type", "septic"),
                vec![
                    iv_access(),
                    fluid_bolus("fluid_bolus_1", "Give fluid bolus", 20.0).escalation(
                        "Fluid-refractory after 40-60 mL/kg: start epinephrine or norepinephrine infusion",
                    ),
                    Step::new("antibiotics", "Give broad-spectrum antibiotics within 1 hour")
                        .dose(DoseSpec::new("Ceftriaxone", 100.0, "mg", "IV/IO").max(2000.0))
                        .detail("Neonates: ampicillin with gentamicin or cefotaxime instead.")
                        .critical(),
                    fluid_bolus("fluid_bolus_2", "Repeat fluid bolus if still shocked", 20.0),
                    Step::new("inotrope", "Start peripheral epinephrine infusion if fluid-refractory")
                        .detail("0.05-0.3 mcg/kg/min; call PICU."),
                ],
            ),
            sub(
                "hypovolemic",
                "Hypovolemic shock",
                |a| answer_is(a, "shock_type", "hypovolemic"),
                vec![
                    iv_access(),
                    fluid_bolus("fluid_bolus_1", "Give fluid bolus", 20.0),
                    fluid_bolus("fluid_bolus_2", "Repeat fluid bolus if still shocked", 20.0),
                    Step::new("blood", "Transfuse packed red cells if hemorrhage")
                        .dose(DoseSpec::new("Packed red cells", 10.0, "mL", "IV/IO")),
                ],
            ),
            sub(
                "cardiogenic",
                "Cardiogenic shock",
                |a| answer_is(a, "shock_type", "cardiogenic"),
                vec![
                    iv_access(),
                    fluid_bolus("cautious_bolus", "Give a cautious small fluid bolus", 5.0)
                        .escalation("Worsening crackles or hepatomegaly: stop fluids, start inotrope"),
                    Step::new("inotrope", "Start inotrope infusion")
                        .detail("Epinephrine 0.05-0.3 mcg/kg/min or milrinone; call cardiology/PICU."),
                    Step::new("ecg_echo", "12-lead ECG and urgent echocardiogram"),
                ],
            ),
        ],
        default_steps: vec![
            iv_access(),
            fluid_bolus("fluid_bolus_1", "Give fluid bolus", 20.0),
            Step::new("identify_cause", "Identify the shock type and reselect the pathway"),
        ],
    }
}

fn allergic() -> Pathway {
    Pathway {
        id: "allergic".into(),
        name: "Anaphylaxis".into(),
        icon: "syringe".into(),
        questions: vec![],
        sub_pathways: vec![],
        default_steps: vec![
            Step::new("epinephrine_im", "Give IM epinephrine")
                .dose(
                    DoseSpec::new("Epinephrine", 0.01, "mg", "IM")
                        .max(0.5)
                        .concentration("1 mg/mL (1:1000)")
                        .preparation("anterolateral thigh")
                        .frequency("repeat every 5 min if no improvement"),
                )
                .timer(300)
                .reassess("Are airway, breathing and circulation improving?")
                .escalation("No improvement after two IM doses: start epinephrine infusion")
                .critical(),
            Step::new("remove_trigger", "Remove trigger, call for help, lie flat with legs raised")
                .detail("Sit up if breathing is difficult."),
            high_flow_oxygen(),
            fluid_bolus("fluid_bolus", "Give fluid bolus for hypotension", 20.0),
            Step::new("epinephrine_im_repeat", "Repeat IM epinephrine if no improvement")
                .timer(300)
                .critical(),
            Step::new("antihistamine", "Antihistamine for skin symptoms (after epinephrine)")
                .dose(DoseSpec::new("Chlorphenamine", 0.2, "mg", "IV/IM").max(10.0)),
            Step::new("observe", "Observe for biphasic reaction for 6-12 hours"),
        ],
    }
}

fn seizure() -> Pathway {
    Pathway {
        id: "seizure".into(),
        name: "Status Epilepticus".into(),
        icon: "brain".into(),
        questions: vec![Question::new(
            "glucose",
            "Bedside glucose?",
            &[
                ("low", "Below 3 mmol/L (54 mg/dL)"),
                ("normal", "Normal"),
                ("unknown", "Not yet measured"),
            ],
        )],
        sub_pathways: vec![sub(
            "hypoglycemic_seizure",
            "Hypoglycemic seizure",
            |a| answer_is(a, "glucose", "low"),
            vec![
                airway_protect(),
                dextrose_bolus().escalation("Seizure continues: give benzodiazepine"),
                Step::new("benzodiazepine_1", "Give benzodiazepine if still seizing")
                    .dose(DoseSpec::new("Midazolam", 0.3, "mg", "buccal").max(10.0)),
                Step::new("recheck_glucose", "Recheck glucose").timer(900),
            ],
        )],
        default_steps: vec![
            airway_protect(),
            Step::new("check_glucose", "Check bedside glucose"),
            Step::new("benzodiazepine_1", "Give first benzodiazepine")
                .dose(DoseSpec::new("Midazolam", 0.3, "mg", "buccal/IN").max(10.0))
                .detail("With IV access: lorazepam 0.1 mg/kg (max 4 mg).")
                .timer(300)
                .reassess("Has the seizure stopped?")
                .escalation("Still seizing at 5 minutes: second benzodiazepine")
                .critical(),
            Step::new("benzodiazepine_2", "Give second benzodiazepine")
                .dose(DoseSpec::new("Lorazepam", 0.1, "mg", "IV/IO").max(4.0))
                .detail("No more than two benzodiazepine doses.")
                .timer(300)
                .reassess("Has the seizure stopped?")
                .escalation("Still seizing: second-line agent")
                .critical(),
            Step::new("second_line", "Give second-line anticonvulsant over 5 minutes")
                .dose(DoseSpec::new("Levetiracetam", 40.0, "mg", "IV/IO").max(3000.0))
                .detail("Alternative: phenytoin 20 mg/kg over 20 min.")
                .timer(600)
                .reassess("Has the seizure stopped?")
                .escalation("Refractory status: RSI and PICU")
                .critical(),
            Step::new("rsi", "Prepare for rapid sequence intubation").critical(),
        ],
    }
}

fn metabolic() -> Pathway {
    Pathway {
        id: "metabolic".into(),
        name: "Metabolic Emergency".into(),
        icon: "flask".into(),
        questions: vec![
            Question::new(
                "glucose",
                "Bedside glucose?",
                &[
                    ("low", "Below 3 mmol/L (54 mg/dL)"),
                    ("normal", "Normal"),
                    ("high", "Above 11 mmol/L (200 mg/dL)"),
                ],
            ),
            Question::new(
                "ketones",
                "Blood ketones?",
                &[
                    ("positive", "3 mmol/L or above"),
                    ("negative", "Below 3 mmol/L"),
                    ("unknown", "Not measured"),
                ],
            ),
        ],
        sub_pathways: vec![
            sub(
                "dka",
                "Diabetic ketoacidosis",
                |a| answer_is(a, "glucose", "high") && answer_is(a, "ketones", "positive"),
                vec![
                    Step::new("assess", "Assess dehydration, GCS and acidosis (gas, ketones, electrolytes)")
                        .critical(),
                    Step::new("fluid_bolus", "Give 0.9% saline bolus over 60 minutes")
                        .dose(
                            DoseSpec::new("Sodium chloride 0.9%", 10.0, "mL", "IV")
                                .max(1000.0)
                                .preparation("over 60 min"),
                        )
                        .detail("Cerebral edema risk: do not give 20 mL/kg rapid boluses.")
                        .timer(3600)
                        .critical(),
                    Step::new("deficit_fluids", "Start deficit and maintenance fluids over 48 hours"),
                    Step::new("insulin", "Start insulin infusion 1-2 hours after fluids")
                        .dose(
                            DoseSpec::new("Insulin (regular)", 0.1, "units", "IV infusion")
                                .frequency("per hour"),
                        )
                        .detail("Never before fluids and never as a bolus. 0.05 units/kg/h in young children.")
                        .critical(),
                    Step::new("potassium", "Add potassium 40 mmol/L to fluids once passing urine")
                        .critical(),
                    Step::new("glucose_monitor", "Hourly glucose; add dextrose below 14 mmol/L")
                        .timer(3600),
                    Step::new("neuro_obs", "Hourly neuro observations for cerebral edema")
                        .reassess("Is the neurological status stable?")
                        .escalation("Cerebral edema: hypertonic saline or mannitol, reduce fluids by a third"),
                    Step::new("cerebral_edema_ready", "Keep hypertonic saline drawn up")
                        .dose(DoseSpec::new("Sodium chloride 3%", 3.0, "mL", "IV").max(250.0)),
                ],
            ),
            sub(
                "hypoglycemia",
                "Hypoglycemia",
                |a| answer_is(a, "glucose", "low"),
                vec![
                    dextrose_bolus(),
                    Step::new("recheck_glucose", "Recheck glucose").timer(900),
                    Step::new("maintenance", "Start dextrose-containing maintenance fluids; look for the cause"),
                ],
            ),
        ],
        default_steps: vec![
            Step::new("check_labs", "Check glucose, ketones, blood gas and electrolytes"),
            Step::new("correct", "Correct the identified abnormality and reselect the pathway"),
        ],
    }
}

fn trauma() -> Pathway {
    Pathway {
        id: "trauma".into(),
        name: "Major Trauma".into(),
        icon: "bandage".into(),
        questions: vec![
            Question::new(
                "bleeding",
                "Major external or internal hemorrhage?",
                &[("yes", "Yes"), ("no", "No")],
            ),
            Question::new(
                "head_injury",
                "Head injury with GCS 8 or below or lateralizing signs?",
                &[("yes", "Yes"), ("no", "No")],
            ),
        ],
        sub_pathways: vec![
            sub(
                "hemorrhagic",
                "Hemorrhagic shock",
                |a| answer_is(a, "bleeding", "yes"),
                vec![
                    Step::new("control_bleeding", "Control bleeding: direct pressure, tourniquet, hemostatic dressing")
                        .critical(),
                    Step::new("airway_cspine", "Airway with cervical spine protection").critical(),
                    Step::new("iv_access", "Two IV/IO access points; crossmatch"),
                    Step::new("txa", "Give tranexamic acid within 3 hours of injury")
                        .dose(
                            DoseSpec::new("Tranexamic acid", 15.0, "mg", "IV")
                                .max(1000.0)
                                .preparation("over 10 min"),
                        )
                        .critical(),
                    Step::new("blood", "Transfuse blood products")
                        .dose(DoseSpec::new("Packed red cells", 10.0, "mL", "IV/IO"))
                        .reassess("Are heart rate and perfusion improving?")
                        .escalation("Activate massive transfusion protocol; surgical control")
                        .critical(),
                    Step::new("surgery", "Early surgical referral"),
                ],
            ),
            sub(
                "tbi",
                "Severe traumatic brain injury",
                |a| answer_is(a, "head_injury", "yes"),
                vec![
                    Step::new("airway_cspine", "Airway with cervical spine protection").critical(),
                    Step::new("oxygenation", "Avoid hypoxia and hypocapnia: SpO2 94% or above, normal CO2"),
                    Step::new("head_up", "Head up 30 degrees, neutral neck, loosen collar"),
                    Step::new("hypertonic_saline", "Give hypertonic saline for raised ICP")
                        .dose(DoseSpec::new("Sodium chloride 3%", 3.0, "mL", "IV").max(250.0))
                        .reassess("Are pupils and GCS improving?")
                        .escalation("Mannitol 0.5 g/kg and emergency neurosurgery")
                        .critical(),
                    Step::new("avoid_hypotension", "Maintain age-appropriate blood pressure"),
                    Step::new("ct_neurosurgery", "Urgent CT head and neurosurgical referral"),
                ],
            ),
        ],
        default_steps: vec![
            Step::new("cspine", "Cervical spine protection; primary survey (cABCDE)").critical(),
            Step::new("expose", "Full exposure, log roll, keep warm"),
            Step::new("analgesia", "Give intranasal fentanyl")
                .dose(DoseSpec::new("Fentanyl", 1.5, "mcg", "IN").max(100.0)),
            Step::new("imaging", "Trauma imaging as indicated"),
        ],
    }
}

fn toxicology() -> Pathway {
    Pathway {
        id: "toxicology".into(),
        name: "Poisoning".into(),
        icon: "flask-skull".into(),
        questions: vec![Question::new(
            "agent",
            "Suspected agent?",
            &[
                ("opioid", "Opioid (pinpoint pupils, apnoea)"),
                ("tricyclic", "Tricyclic antidepressant (wide QRS)"),
                ("unknown", "Unknown"),
            ],
        )],
        sub_pathways: vec![
            sub(
                "opioid",
                "Opioid toxicity",
                |a| answer_is(a, "agent", "opioid"),
                vec![
                    Step::new("ventilate", "Support ventilation with bag-valve-mask").critical(),
                    Step::new("naloxone", "Give naloxone")
                        .dose(DoseSpec::new("Naloxone", 0.1, "mg", "IV/IO/IN").max(2.0))
                        .timer(180)
                        .reassess("Is respiratory effort improving?")
                        .escalation("Repeat every 2-3 min; consider infusion")
                        .critical(),
                    Step::new("observe", "Observe for recurrence; naloxone is shorter-acting"),
                ],
            ),
            sub(
                "tricyclic",
                "Tricyclic toxicity",
                |a| answer_is(a, "agent", "tricyclic"),
                vec![
                    Step::new("ecg", "12-lead ECG: QRS over 100 ms, R wave in aVR").critical(),
                    Step::new("bicarbonate", "Give sodium bicarbonate 8.4%")
                        .dose(DoseSpec::new("Sodium bicarbonate 8.4%", 1.0, "mEq", "IV").max(50.0))
                        .reassess("Is the QRS narrowing?")
                        .escalation("Repeat bicarbonate; avoid phenytoin")
                        .critical(),
                    Step::new("seizure_ready", "Treat seizures with benzodiazepines"),
                ],
            ),
        ],
        default_steps: vec![
            Step::new("supportive", "Support airway, breathing and circulation; check glucose")
                .critical(),
            Step::new("toxidrome", "Identify the toxidrome and contact the poison centre"),
            Step::new("decontamination", "Activated charcoal if within 1 hour and airway protected")
                .dose(DoseSpec::new("Activated charcoal", 1.0, "g", "PO").max(50.0)),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_loads() {
        let registry = build_default_registry();
        assert_eq!(registry.pathways().len(), 8);
    }

    #[test]
    fn test_default_registry_validates() {
        let registry = build_default_registry();
        let errors = registry.validate();
        assert!(
            errors.is_empty(),
            "Default registry has validation errors: {:?}",
            errors
        );
    }

    #[test]
    fn test_every_pathway_has_a_step_source() {
        for pathway in get_default_registry().pathways() {
            let has_sub_steps = pathway.sub_pathways.iter().any(|s| !s.steps.is_empty());
            assert!(
                has_sub_steps || !pathway.default_steps.is_empty(),
                "{} has no steps",
                pathway.id
            );
        }
    }

    #[test]
    fn test_every_step_has_id_and_action() {
        for pathway in get_default_registry().pathways() {
            let all_steps = pathway
                .sub_pathways
                .iter()
                .flat_map(|s| s.steps.iter())
                .chain(pathway.default_steps.iter());
            for step in all_steps {
                assert!(!step.id.is_empty(), "empty step id in {}", pathway.id);
                assert!(!step.action.is_empty(), "empty action in {}", pathway.id);
            }
        }
    }

    #[test]
    fn test_first_match_wins() {
        let registry = build_default_registry();
        let trauma = registry.get("trauma").unwrap();
        let mut answers = Answers::new();
        answers.insert("bleeding".into(), "yes".into());
        answers.insert("head_injury".into(), "yes".into());

        let resolved = resolve_sub_pathway(trauma, &answers).unwrap();
        assert_eq!(resolved.id, "hemorrhagic");
    }

    #[test]
    fn test_no_match_uses_default_steps() {
        let registry = build_default_registry();
        let shock = registry.get("shock").unwrap();
        let mut answers = Answers::new();
        answers.insert("shock_type".into(), "unknown".into());

        assert!(resolve_sub_pathway(shock, &answers).is_none());
        assert_eq!(steps_for(shock, None), shock.default_steps.as_slice());
    }

    #[test]
    fn test_dka_fluids_precede_insulin() {
        let registry = build_default_registry();
        let steps = steps_for(registry.get("metabolic").unwrap(), Some("dka"));
        let fluids = steps.iter().position(|s| s.id == "fluid_bolus").unwrap();
        let insulin = steps.iter().position(|s| s.id == "insulin").unwrap();
        assert!(fluids < insulin);

        let bolus = steps[fluids].dose.as_ref().unwrap();
        assert!(bolus.per_kg <= 10.0, "DKA bolus must stay at 10 mL/kg or less");
    }

    #[test]
    fn test_amiodarone_follows_third_shock() {
        let registry = build_default_registry();
        let steps = steps_for(registry.get("cardiac_arrest").unwrap(), Some("shockable"));
        let amiodarone = steps.iter().position(|s| s.id == "amiodarone").unwrap();
        let shocks_before = steps[..amiodarone]
            .iter()
            .filter(|s| s.id.starts_with("shock_"))
            .count();
        assert_eq!(shocks_before, 3);
    }

    #[test]
    fn test_validation_catches_missing_fallback() {
        let broken = Pathway {
            id: "broken".into(),
            name: "Broken".into(),
            icon: String::new(),
            questions: vec![Question::new("q", "Q?", &[("a", "A")])],
            sub_pathways: vec![sub("only_a", "Only A", |a| answer_is(a, "q", "a"), vec![
                Step::new("s", "Do something"),
            ])],
            default_steps: vec![],
        };
        let result = PathwayRegistry::checked(vec![broken]);
        assert!(matches!(result, Err(Error::Registry(_))));
    }

    #[test]
    fn test_validation_catches_bad_steps() {
        let broken = Pathway {
            id: "broken".into(),
            name: "Broken".into(),
            icon: String::new(),
            questions: vec![],
            sub_pathways: vec![],
            default_steps: vec![
                Step::new("", "No id"),
                Step::new("dup", " "),
                Step::new("dup", "Duplicate"),
            ],
        };
        let errors = PathwayRegistry::new(vec![broken]).validate();
        assert_eq!(errors.len(), 3, "{:?}", errors);
    }
}
