//! Primary survey questions, letter by letter.

use super::SurveyQuestion;
use crate::types::{Letter, Question};

const YES_NO: &[(&str, &str)] = &[("yes", "Yes"), ("no", "No")];

fn ask(letter: Letter, id: &str, prompt: &str, options: &[(&str, &str)]) -> SurveyQuestion {
    SurveyQuestion {
        letter,
        question: Question::new(id, prompt, options),
        trauma_only: false,
    }
}

pub(super) fn default_questions() -> Vec<SurveyQuestion> {
    vec![
        // X: catastrophic hemorrhage, trauma only
        SurveyQuestion {
            trauma_only: true,
            ..ask(
                Letter::X,
                "x_hemorrhage",
                "Catastrophic external hemorrhage?",
                YES_NO,
            )
        },
        // A
        ask(
            Letter::A,
            "a_airway",
            "Airway status?",
            &[
                ("patent", "Patent"),
                ("at_risk", "At risk (snoring, gurgling, secretions)"),
                ("obstructed", "Obstructed"),
            ],
        ),
        ask(
            Letter::A,
            "a_swelling",
            "Facial, lip or tongue swelling after an exposure?",
            YES_NO,
        ),
        ask(Letter::A, "a_stridor", "Stridor?", YES_NO),
        // B
        ask(
            Letter::B,
            "b_breathing",
            "Breathing effort?",
            &[
                ("normal", "Normal"),
                ("distressed", "Increased work of breathing"),
                ("absent", "Absent or agonal"),
            ],
        ),
        ask(
            Letter::B,
            "b_spo2",
            "Oxygen saturation?",
            &[
                ("normal", "94% or above"),
                ("low", "90-93%"),
                ("very_low", "Below 90%"),
            ],
        ),
        ask(Letter::B, "b_wheeze", "Wheeze?", YES_NO),
        // C
        ask(
            Letter::C,
            "c_pulse",
            "Central pulse?",
            &[("present", "Present"), ("absent", "Absent")],
        ),
        ask(
            Letter::C,
            "c_heart_rate",
            "Heart rate?",
            &[
                ("normal", "Normal for age"),
                ("bradycardic", "Below 60/min with poor perfusion"),
                ("tachycardic", "Tachycardic"),
            ],
        ),
        ask(
            Letter::C,
            "c_perfusion",
            "Perfusion?",
            &[
                ("normal", "Normal"),
                ("poor", "Poor (capillary refill over 2 s, cool peripheries)"),
            ],
        ),
        ask(
            Letter::C,
            "c_sepsis",
            "Fever, rash or suspected infection?",
            YES_NO,
        ),
        // D
        ask(
            Letter::D,
            "d_avpu",
            "Level of consciousness (AVPU)?",
            &[
                ("alert", "Alert"),
                ("voice", "Responds to voice"),
                ("pain", "Responds to pain"),
                ("unresponsive", "Unresponsive"),
            ],
        ),
        ask(Letter::D, "d_seizure", "Actively seizing?", YES_NO),
        ask(
            Letter::D,
            "d_glucose",
            "Bedside glucose?",
            &[
                ("low", "Below 3 mmol/L (54 mg/dL)"),
                ("normal", "Normal"),
                ("high", "Above 11 mmol/L (200 mg/dL)"),
            ],
        ),
        ask(
            Letter::D,
            "d_ketones",
            "Blood ketones?",
            &[
                ("positive", "3 mmol/L or above"),
                ("negative", "Below 3 mmol/L"),
                ("unknown", "Not measured"),
            ],
        ),
        ask(
            Letter::D,
            "d_pupils",
            "Pupils?",
            &[("equal", "Equal and reactive"), ("unequal", "Unequal or fixed")],
        ),
        // E
        ask(
            Letter::E,
            "e_temperature",
            "Temperature?",
            &[
                ("normal", "Normal"),
                ("fever", "38 C or above"),
                ("hypothermia", "Below 35 C"),
            ],
        ),
        ask(
            Letter::E,
            "e_rash",
            "Rash?",
            &[
                ("none", "None"),
                ("urticaria", "Urticaria"),
                ("petechial", "Petechial or purpuric"),
            ],
        ),
        ask(Letter::E, "e_injuries", "Other injuries found on exposure?", YES_NO),
    ]
}
