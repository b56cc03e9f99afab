//! Weight-scaled dose calculation.
//!
//! Doses are `per_kg × weight`, clamped to the dose's maximum, then rounded
//! by magnitude (rounded down instead when rounding would pass the maximum):
//! - below 1 unit: 2 decimal places
//! - 1 to 10 units: 1 decimal place
//! - 10 units and above: nearest integer
//!
//! Without a usable weight the per-kg rate is returned as text. A weight is
//! never assumed.

use crate::DoseSpec;
use serde::Serialize;

/// Suffix shown when the computed amount was clamped to the maximum
pub const MAX_DOSE_MARKER: &str = "(MAX DOSE)";

/// A dose rendered for the clinician
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct CalculatedDose {
    /// e.g. "0.2 mg IV" or "0.01 mg/kg IV (max 1 mg)"
    pub calculated_dose: String,
    /// Concentration, preparation and frequency notes, joined
    pub preparation: String,
    /// Rounded amount in the dose unit; None when weight is unknown
    pub amount: Option<f64>,
    pub capped: bool,
}

/// Calculate a dose for the given weight.
///
/// Non-positive or non-finite weights are treated as unknown.
pub fn calculate_dose(spec: &DoseSpec, weight_kg: Option<f64>) -> CalculatedDose {
    let preparation = preparation_text(spec);

    let Some(weight) = weight_kg.filter(|w| w.is_finite() && *w > 0.0) else {
        return CalculatedDose {
            calculated_dose: per_kg_text(spec),
            preparation,
            amount: None,
            capped: false,
        };
    };

    let raw = spec.per_kg * weight;
    let (amount, capped) = match spec.max_dose {
        Some(max) if raw > max => (max, true),
        _ => (raw, false),
    };

    // Rounding up must not carry the amount past the cap
    let amount = match spec.max_dose {
        Some(max) if round_dose(amount) > max => round_dose_down(amount),
        _ => round_dose(amount),
    };

    let mut text = join_nonempty(&[&format_quantity(amount), &spec.unit, &spec.route], " ");
    if capped {
        text.push(' ');
        text.push_str(MAX_DOSE_MARKER);
    }

    CalculatedDose {
        calculated_dose: text,
        preparation,
        amount: Some(amount),
        capped,
    }
}

/// Steps per unit at this magnitude
fn tier_scale(amount: f64) -> f64 {
    if amount < 1.0 {
        100.0
    } else if amount < 10.0 {
        10.0
    } else {
        1.0
    }
}

/// Tiered rounding by magnitude
pub fn round_dose(amount: f64) -> f64 {
    let scale = tier_scale(amount);
    (amount * scale).round() / scale
}

/// Tiered rounding that never goes up, for amounts held at a cap
pub fn round_dose_down(amount: f64) -> f64 {
    let scale = tier_scale(amount);
    (amount * scale).floor() / scale
}

/// Render a number without a trailing ".0"
pub(crate) fn format_quantity(value: f64) -> String {
    format!("{}", value)
}

fn per_kg_text(spec: &DoseSpec) -> String {
    let rate = format!("{} {}/kg", format_quantity(spec.per_kg), spec.unit);
    let mut text = join_nonempty(&[&rate, &spec.route], " ");
    if let Some(max) = spec.max_dose {
        text.push_str(&format!(" (max {} {})", format_quantity(max), spec.unit));
    }
    text
}

fn preparation_text(spec: &DoseSpec) -> String {
    let parts: Vec<&str> = [&spec.concentration, &spec.preparation, &spec.frequency]
        .into_iter()
        .filter_map(|p| p.as_deref())
        .collect();
    join_nonempty(&parts, "; ")
}

fn join_nonempty(parts: &[&str], sep: &str) -> String {
    parts
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(sep)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epinephrine_iv() -> DoseSpec {
        DoseSpec::new("Epinephrine", 0.01, "mg", "IV/IO")
            .max(1.0)
            .concentration("0.1 mg/mL (1:10,000)")
            .frequency("every 3-5 min")
    }

    #[test]
    fn test_scaled_dose() {
        let dose = calculate_dose(&epinephrine_iv(), Some(20.0));
        assert_eq!(dose.amount, Some(0.2));
        assert_eq!(dose.calculated_dose, "0.2 mg IV/IO");
        assert!(!dose.capped);
        assert_eq!(dose.preparation, "0.1 mg/mL (1:10,000); every 3-5 min");
    }

    #[test]
    fn test_dose_capped_at_max() {
        let dose = calculate_dose(&epinephrine_iv(), Some(150.0));
        assert_eq!(dose.amount, Some(1.0));
        assert!(dose.capped);
        assert!(dose.calculated_dose.ends_with(MAX_DOSE_MARKER));
    }

    #[test]
    fn test_unknown_weight_gives_per_kg_text() {
        let dose = calculate_dose(&epinephrine_iv(), None);
        assert_eq!(dose.amount, None);
        assert_eq!(dose.calculated_dose, "0.01 mg/kg IV/IO (max 1 mg)");
    }

    #[test]
    fn test_non_positive_weight_is_unknown() {
        for weight in [0.0, -12.0, f64::NAN] {
            let dose = calculate_dose(&epinephrine_iv(), Some(weight));
            assert_eq!(dose.amount, None);
            assert!(dose.calculated_dose.contains("mg/kg"));
        }
    }

    #[test]
    fn test_tiered_rounding() {
        assert_eq!(round_dose(0.123), 0.12);
        assert_eq!(round_dose(0.999), 1.0);
        assert_eq!(round_dose(3.456), 3.5);
        assert_eq!(round_dose(9.94), 9.9);
        assert_eq!(round_dose(12.6), 13.0);
        assert_eq!(round_dose(250.4), 250.0);
    }

    #[test]
    fn test_capped_amount_keeps_tier_precision() {
        let spec = DoseSpec::new("Test", 1.0, "mg", "IV").max(2.55);
        let dose = calculate_dose(&spec, Some(100.0));
        assert_eq!(dose.amount, Some(2.5));
        assert_eq!(dose.calculated_dose, "2.5 mg IV (MAX DOSE)");

        let spec = DoseSpec::new("Test", 1.0, "mg", "IV").max(0.997);
        assert_eq!(calculate_dose(&spec, Some(5.0)).amount, Some(0.99));

        // A cap already at tier precision is shown as is
        let spec = DoseSpec::new("Test", 0.01, "mg", "IM").max(0.5);
        assert_eq!(calculate_dose(&spec, Some(80.0)).calculated_dose, "0.5 mg IM (MAX DOSE)");
    }

    #[test]
    fn test_rounding_applied_to_text() {
        let amiodarone = DoseSpec::new("Amiodarone", 5.0, "mg", "IV/IO").max(300.0);
        assert_eq!(
            calculate_dose(&amiodarone, Some(13.3)).calculated_dose,
            "67 mg IV/IO"
        );

        let shock = DoseSpec::new("Defibrillation", 2.0, "J", "");
        assert_eq!(calculate_dose(&shock, Some(3.4)).calculated_dose, "6.8 J");
    }

    #[test]
    fn test_never_exceeds_max() {
        let specs = [
            epinephrine_iv(),
            DoseSpec::new("Adenosine", 0.1, "mg", "IV").max(6.0),
            DoseSpec::new("Dextrose 10%", 2.0, "mL", "IV").max(250.0),
            DoseSpec::new("Ondansetron", 0.15, "mg", "IV").max(0.997),
        ];
        for spec in &specs {
            let max = spec.max_dose.unwrap();
            let mut weight = 0.5;
            while weight <= 150.0 {
                let dose = calculate_dose(spec, Some(weight));
                assert!(
                    dose.amount.unwrap() <= max,
                    "{} at {} kg gave {:?} over max {}",
                    spec.drug,
                    weight,
                    dose.amount,
                    max
                );
                weight += 0.7;
            }
        }
    }

    #[test]
    fn test_unknown_weight_always_mentions_unit_per_kg() {
        for unit in ["mg", "mcg", "mL", "J", "units", "mEq", "g"] {
            let spec = DoseSpec::new("Drug", 1.5, unit, "IV");
            let dose = calculate_dose(&spec, None);
            assert!(dose.calculated_dose.contains(&format!("{}/kg", unit)));
        }
    }
}
