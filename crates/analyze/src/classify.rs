//! DeviationClassifier: maps a timing delta to a severity tier.
//!
//! Evaluated top to bottom, first match wins:
//!
//! | Condition            | Severity | Code |
//! |----------------------|----------|------|
//! | never activated      | Critical | 1A   |
//! | delta > 10           | High     | 1B   |
//! | 5 < delta <= 10      | Medium   | 2    |
//! | 2 <= delta <= 5      | Low      | 3    |
//! | 0 < delta < 2        | None     | -    |
//!
//! The 5 s and 10 s boundaries fall into the lower bracket; 2 s is the Low
//! floor. All comparisons are exact decimal arithmetic.

use std::fmt;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Severity tier of a deviation. `None` is compliant: logged, no fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    None,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::None => "none",
        }
    }

    /// Whether a deviation of this severity produces a compliance fault.
    pub fn raises_fault(self) -> bool {
        !matches!(self, Severity::None)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Regulatory deviation code attached to every fault-raising tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviationCode {
    #[serde(rename = "1A")]
    NeverActivated,
    #[serde(rename = "1B")]
    SevereDelay,
    #[serde(rename = "2")]
    ModerateDelay,
    #[serde(rename = "3")]
    MinorDelay,
}

impl DeviationCode {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviationCode::NeverActivated => "1A",
            DeviationCode::SevereDelay => "1B",
            DeviationCode::ModerateDelay => "2",
            DeviationCode::MinorDelay => "3",
        }
    }
}

/// Classifier output for one delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub severity: Severity,
    pub code: Option<DeviationCode>,
}

const HIGH_ABOVE: Decimal = Decimal::from_parts(10, 0, 0, false, 0);
const MEDIUM_ABOVE: Decimal = Decimal::from_parts(5, 0, 0, false, 0);
const LOW_FROM: Decimal = Decimal::from_parts(2, 0, 0, false, 0);

/// Classify a delta in seconds; `None` means the step never activated.
///
/// Callers only pass positive deltas. A non-positive delta classifies as
/// `Severity::None` so the table stays total.
pub fn classify(delta: Option<Decimal>) -> Classification {
    let Some(delta) = delta else {
        return Classification {
            severity: Severity::Critical,
            code: Some(DeviationCode::NeverActivated),
        };
    };

    let (severity, code) = if delta > HIGH_ABOVE {
        (Severity::High, Some(DeviationCode::SevereDelay))
    } else if delta > MEDIUM_ABOVE {
        (Severity::Medium, Some(DeviationCode::ModerateDelay))
    } else if delta >= LOW_FROM {
        (Severity::Low, Some(DeviationCode::MinorDelay))
    } else {
        (Severity::None, None)
    };
    Classification { severity, code }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn severity_of(delta: &str) -> Severity {
        classify(Some(Decimal::from_str(delta).unwrap())).severity
    }

    #[test]
    fn boundary_table() {
        assert_eq!(severity_of("2.0"), Severity::Low);
        assert_eq!(severity_of("2.01"), Severity::Low);
        assert_eq!(severity_of("5.0"), Severity::Low);
        assert_eq!(severity_of("5.01"), Severity::Medium);
        assert_eq!(severity_of("10.0"), Severity::Medium);
        assert_eq!(severity_of("10.01"), Severity::High);
    }

    #[test]
    fn small_positive_delta_is_compliant() {
        assert_eq!(severity_of("0.01"), Severity::None);
        assert_eq!(severity_of("1.99"), Severity::None);
        assert_eq!(classify(Some(Decimal::ONE)).code, None);
    }

    #[test]
    fn never_activated_is_critical_1a() {
        let c = classify(None);
        assert_eq!(c.severity, Severity::Critical);
        assert_eq!(c.code, Some(DeviationCode::NeverActivated));
        assert_eq!(c.code.map(DeviationCode::as_str), Some("1A"));
    }

    #[test]
    fn codes_follow_tiers() {
        let code = |d: &str| classify(Some(Decimal::from_str(d).unwrap())).code;
        assert_eq!(code("11"), Some(DeviationCode::SevereDelay));
        assert_eq!(code("7"), Some(DeviationCode::ModerateDelay));
        assert_eq!(code("3"), Some(DeviationCode::MinorDelay));
    }

    #[test]
    fn severity_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Severity::None).unwrap(), "\"none\"");
        assert_eq!(
            serde_json::to_string(&DeviationCode::SevereDelay).unwrap(),
            "\"1B\""
        );
        assert!(Severity::Low.raises_fault());
        assert!(!Severity::None.raises_fault());
    }
}
