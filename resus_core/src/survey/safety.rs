//! Safety rules over the cumulative intervention record.
//!
//! Evaluated after every completed intervention. A rule raises its alert at
//! most once per session; the alert stays until acknowledged.

use super::{AlertSeverity, SurveySession};

pub type SafetyCondition = fn(&SurveySession) -> bool;

#[derive(Clone, Debug)]
pub struct SafetyRule {
    pub id: &'static str,
    pub message: &'static str,
    pub severity: AlertSeverity,
    /// Threat the alert belongs to, if any
    pub threat_id: Option<&'static str>,
    pub condition: SafetyCondition,
}

/// Total mL/kg given across completed boluses
fn bolus_volume_per_kg(s: &SurveySession) -> f64 {
    s.completed_interventions()
        .filter(|i| i.step.id == "fluid_bolus" || i.step.id == "dka_fluids")
        .filter_map(|i| i.step.dose.as_ref())
        .map(|d| d.per_kg)
        .sum()
}

pub(super) fn default_rules() -> Vec<SafetyRule> {
    vec![
        SafetyRule {
            id: "insulin_without_potassium",
            message: "Insulin running without potassium replacement: risk of fatal hypokalemia",
            severity: AlertSeverity::Danger,
            threat_id: Some("dka"),
            condition: |s| s.completed("insulin") && !s.completed("potassium"),
        },
        SafetyRule {
            id: "insulin_before_fluids",
            message: "Insulin started before fluid resuscitation in DKA",
            severity: AlertSeverity::Danger,
            threat_id: Some("dka"),
            condition: |s| s.completed("insulin") && !s.completed("dka_fluids"),
        },
        SafetyRule {
            id: "amiodarone_before_third_shock",
            message: "Amiodarone given before the third shock",
            severity: AlertSeverity::Danger,
            threat_id: Some("cardiac_arrest"),
            condition: |s| s.completed("amiodarone") && s.completed_count("shock_") < 3,
        },
        SafetyRule {
            id: "benzodiazepine_limit",
            message: "Benzodiazepine limit reached (two doses): give the second-line agent, no further benzodiazepines",
            severity: AlertSeverity::Warning,
            threat_id: Some("status_epilepticus"),
            condition: |s| s.completed_count("benzodiazepine") >= 2,
        },
        SafetyRule {
            id: "dka_rapid_bolus",
            message: "20 mL/kg bolus given with DKA: risk of cerebral edema",
            severity: AlertSeverity::Warning,
            threat_id: Some("dka"),
            condition: |s| {
                s.has_threat("dka")
                    && s.completed_interventions().any(|i| {
                        i.step.id == "fluid_bolus"
                            && i.step.dose.as_ref().is_some_and(|d| d.per_kg >= 20.0)
                    })
            },
        },
        SafetyRule {
            id: "fluid_overload",
            message: "60 mL/kg or more of bolus fluid given: reassess for fluid overload",
            severity: AlertSeverity::Warning,
            threat_id: None,
            condition: |s| bolus_volume_per_kg(s) >= 60.0,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::survey::{create_survey, Intervention, Threat, ThreatSeverity};
    use crate::types::{DoseSpec, Letter, PatientContext, Step};
    use chrono::Utc;

    fn with_done(ids: &[&str]) -> SurveySession {
        let mut s = create_survey(PatientContext::new(Some(20.0), None, false), Utc::now());
        s.threats.push(Threat {
            id: "test".into(),
            name: "Test".into(),
            letter: Letter::C,
            severity: ThreatSeverity::Critical,
            arrest: false,
            interventions: ids
                .iter()
                .map(|id| Intervention {
                    step: Step::new(id, id),
                    completed: true,
                    completed_at: Some(Utc::now()),
                })
                .collect(),
            resolved: false,
            findings: Vec::new(),
            identified_at: Utc::now(),
        });
        s
    }

    fn fires(rule_id: &str, s: &SurveySession) -> bool {
        let rules = default_rules();
        let rule = rules.iter().find(|r| r.id == rule_id).unwrap();
        (rule.condition)(s)
    }

    #[test]
    fn test_insulin_without_potassium() {
        assert!(fires("insulin_without_potassium", &with_done(&["insulin"])));
        assert!(!fires(
            "insulin_without_potassium",
            &with_done(&["insulin", "potassium"])
        ));
    }

    #[test]
    fn test_amiodarone_before_third_shock() {
        assert!(fires(
            "amiodarone_before_third_shock",
            &with_done(&["shock_1", "shock_2", "amiodarone"])
        ));
        assert!(!fires(
            "amiodarone_before_third_shock",
            &with_done(&["shock_1", "shock_2", "shock_3", "amiodarone"])
        ));
    }

    #[test]
    fn test_benzodiazepine_limit() {
        let rules = default_rules();
        let rule = rules.iter().find(|r| r.id == "benzodiazepine_limit").unwrap();
        assert_eq!(rule.severity, AlertSeverity::Warning);
        assert!(rule.message.starts_with("Benzodiazepine limit reached"));
        assert!(rule.message.contains("second-line"));

        assert!(!fires("benzodiazepine_limit", &with_done(&["benzodiazepine_1"])));
        assert!(fires(
            "benzodiazepine_limit",
            &with_done(&["benzodiazepine_1", "benzodiazepine_2"])
        ));
    }

    #[test]
    fn test_fluid_overload_sums_boluses() {
        let mut s = with_done(&[]);
        for _ in 0..3 {
            s.threats[0].interventions.push(Intervention {
                step: Step::new("fluid_bolus", "bolus")
                    .dose(DoseSpec::new("Crystalloid", 20.0, "mL", "IV")),
                completed: true,
                completed_at: Some(Utc::now()),
            });
        }
        assert!(fires("fluid_overload", &s));
        s.threats[0].interventions.pop();
        assert!(!fires("fluid_overload", &s));
    }
}
