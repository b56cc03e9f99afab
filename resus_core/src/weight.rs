//! Age parsing and weight-for-age estimation.
//!
//! Estimates use the standard pediatric bands:
//! - under 28 days: 3.5 kg
//! - 1 to 12 months: (0.5 × months) + 4
//! - 1 to 5 years: (2 × years) + 8
//! - 6 to 17 years: (3 × years) + 7
//!
//! Adults (18 years and over) get no estimate.

use serde::{Deserialize, Serialize};

pub const NEONATE_WEIGHT_KG: f64 = 3.5;
pub const NEONATE_DAYS: f64 = 28.0;

const DAYS_PER_YEAR: f64 = 365.25;
const DAYS_PER_MONTH: f64 = DAYS_PER_YEAR / 12.0;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgeUnit {
    Days,
    Weeks,
    Months,
    Years,
}

/// A parsed age magnitude
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct Age {
    pub value: f64,
    pub unit: AgeUnit,
}

impl Age {
    pub fn in_days(&self) -> f64 {
        match self.unit {
            AgeUnit::Days => self.value,
            AgeUnit::Weeks => self.value * 7.0,
            AgeUnit::Months => self.value * DAYS_PER_MONTH,
            AgeUnit::Years => self.value * DAYS_PER_YEAR,
        }
    }

    pub fn in_months(&self) -> f64 {
        match self.unit {
            AgeUnit::Months => self.value,
            AgeUnit::Years => self.value * 12.0,
            _ => self.in_days() / DAYS_PER_MONTH,
        }
    }

    pub fn in_years(&self) -> f64 {
        match self.unit {
            AgeUnit::Years => self.value,
            AgeUnit::Months => self.value / 12.0,
            _ => self.in_days() / DAYS_PER_YEAR,
        }
    }
}

/// Parse free-text ages such as "3 years", "6m", "2 wks" or a bare "5".
///
/// A bare number is read as years. Returns None for anything else.
pub fn parse_age(text: &str) -> Option<Age> {
    let text = text.trim().to_lowercase();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, rest) = text.split_at(split);

    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }

    let rest = rest.trim();
    let rest = rest.strip_suffix("old").map(str::trim_end).unwrap_or(rest);

    let unit = match rest.trim_end_matches('.') {
        "" | "y" | "yr" | "yrs" | "year" | "years" | "yo" | "y/o" => AgeUnit::Years,
        "m" | "mo" | "mos" | "mth" | "mths" | "month" | "months" => AgeUnit::Months,
        "w" | "wk" | "wks" | "week" | "weeks" => AgeUnit::Weeks,
        "d" | "day" | "days" => AgeUnit::Days,
        _ => return None,
    };

    Some(Age { value, unit })
}

/// Estimated weight in kg for a parsed age, rounded to 0.1 kg
pub fn estimate_weight(age: &Age) -> Option<f64> {
    let kg = if age.in_days() < NEONATE_DAYS {
        NEONATE_WEIGHT_KG
    } else if age.in_months() < 12.0 {
        0.5 * age.in_months() + 4.0
    } else {
        let years = age.in_years();
        if years < 6.0 {
            2.0 * years + 8.0
        } else if years < 18.0 {
            3.0 * years + 7.0
        } else {
            return None;
        }
    };

    Some((kg * 10.0).round() / 10.0)
}

/// Estimate weight from free-text age; None when the text is not an age
pub fn estimate_weight_from_age(text: &str) -> Option<f64> {
    let age = parse_age(text)?;
    estimate_weight(&age)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_common_forms() {
        for text in ["3 years", "6 months", "3y", "6m", "2 weeks", "5", "10 days", "4 yo"] {
            assert!(parse_age(text).is_some(), "failed to parse '{}'", text);
        }
    }

    #[test]
    fn test_bare_number_is_years() {
        assert_eq!(
            parse_age("5"),
            Some(Age {
                value: 5.0,
                unit: AgeUnit::Years
            })
        );
    }

    #[test]
    fn test_unit_detection() {
        assert_eq!(parse_age("6m").unwrap().unit, AgeUnit::Months);
        assert_eq!(parse_age("2 Weeks").unwrap().unit, AgeUnit::Weeks);
        assert_eq!(parse_age("3 years old").unwrap().unit, AgeUnit::Years);
        assert_eq!(parse_age("1 day").unwrap().unit, AgeUnit::Days);
    }

    #[test]
    fn test_rejects_unparseable() {
        for text in ["", "toddler", "three years", "5 decades", "1.2.3 years", "-2 years"] {
            assert!(parse_age(text).is_none(), "unexpectedly parsed '{}'", text);
            assert!(estimate_weight_from_age(text).is_none());
        }
    }

    #[test]
    fn test_reference_ranges() {
        let neonate = estimate_weight_from_age("1 day").unwrap();
        assert!((neonate - 3.5).abs() <= 0.5);

        let infant = estimate_weight_from_age("6 months").unwrap();
        assert!(infant > 5.0 && infant < 10.0);

        let toddler = estimate_weight_from_age("3 years").unwrap();
        assert!(toddler > 12.0 && toddler < 18.0);

        let child = estimate_weight_from_age("8 years").unwrap();
        assert!(child > 20.0 && child < 35.0);
    }

    #[test]
    fn test_band_formulas() {
        assert_eq!(estimate_weight_from_age("6 months"), Some(7.0));
        assert_eq!(estimate_weight_from_age("12 months"), Some(10.0));
        assert_eq!(estimate_weight_from_age("1 year"), Some(10.0));
        assert_eq!(estimate_weight_from_age("3 years"), Some(14.0));
        assert_eq!(estimate_weight_from_age("8 years"), Some(31.0));
        assert_eq!(estimate_weight_from_age("2 weeks"), Some(3.5));
    }

    #[test]
    fn test_adults_get_no_estimate() {
        assert_eq!(estimate_weight_from_age("25 years"), None);
    }
}
