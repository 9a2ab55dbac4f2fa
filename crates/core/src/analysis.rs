//! Analysis result types and the pure derivations applied to them.
//!
//! The risk level and clinical note of a result are functions of its probability vector only.
//! They are computed once when the result is created and stored with it.

use crate::constants::{DOMINANT_THRESHOLD, RESULT_ID_PREFIX, RESULT_ID_TOKEN_LEN};
use crate::{TriageError, TriageResult};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

const BASE36_UPPER: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Opaque identifier of an analysis result, and therefore of the history record holding it.
///
/// Generated identifiers look like `TOSSE-4K2Z9QX`. Identifiers read back from storage are
/// accepted as-is as long as they are not blank; nothing else depends on the format.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResultId(String);

impl ResultId {
    /// Generates a fresh identifier from a short random base-36 token.
    ///
    /// Uniqueness is best effort; no collision check is made.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let token: String = (0..RESULT_ID_TOKEN_LEN)
            .map(|_| char::from(BASE36_UPPER[rng.gen_range(0..BASE36_UPPER.len())]))
            .collect();
        Self(format!("{}-{}", RESULT_ID_PREFIX, token))
    }

    /// Wraps an externally supplied identifier.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::InvalidInput` if `input` is blank.
    pub fn parse(input: &str) -> TriageResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(TriageError::InvalidInput(
                "result identifier cannot be empty".into(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResultId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ResultId {
    type Err = TriageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResultId::parse(s)
    }
}

impl TryFrom<String> for ResultId {
    type Error = TriageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ResultId::parse(&value)
    }
}

impl From<ResultId> for String {
    fn from(id: ResultId) -> Self {
        id.0
    }
}

/// The conditions the classifier reports on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Condition {
    Pneumonia,
    Bronchitis,
    Asthma,
    Normal,
}

impl Condition {
    pub fn label(self) -> &'static str {
        match self {
            Condition::Pneumonia => "Pneumonia",
            Condition::Bronchitis => "Bronchitis",
            Condition::Asthma => "Asthma",
            Condition::Normal => "Normal",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Per-condition probabilities, each a percentage in `[0, 100]`.
///
/// The four values are not required to sum to 100.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisProbabilities {
    pub pneumonia: f64,
    #[serde(rename = "bronchite")]
    pub bronchitis: f64,
    #[serde(rename = "asma")]
    pub asthma: f64,
    pub normal: f64,
}

impl DiagnosisProbabilities {
    /// Builds a vector, checking every value is a finite percentage.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::InvalidInput` naming the first out-of-range value.
    pub fn new(pneumonia: f64, bronchitis: f64, asthma: f64, normal: f64) -> TriageResult<Self> {
        let probabilities = Self {
            pneumonia,
            bronchitis,
            asthma,
            normal,
        };
        for (condition, value) in probabilities.entries() {
            if !(0.0..=100.0).contains(&value) {
                return Err(TriageError::InvalidInput(format!(
                    "{} probability must be within 0..=100, got {}",
                    condition, value
                )));
            }
        }
        Ok(probabilities)
    }

    /// The four values in fixed order: pneumonia, bronchitis, asthma, normal.
    pub fn entries(&self) -> [(Condition, f64); 4] {
        [
            (Condition::Pneumonia, self.pneumonia),
            (Condition::Bronchitis, self.bronchitis),
            (Condition::Asthma, self.asthma),
            (Condition::Normal, self.normal),
        ]
    }

    /// Entries sorted by descending probability. Ties keep the fixed order.
    pub fn ranked(&self) -> Vec<(Condition, f64)> {
        let mut entries = self.entries().to_vec();
        entries.sort_by(|a, b| b.1.total_cmp(&a.1));
        entries
    }

    /// The most probable condition.
    pub fn top(&self) -> (Condition, f64) {
        self.entries()
            .into_iter()
            .fold((Condition::Pneumonia, f64::NEG_INFINITY), |best, entry| {
                if entry.1 > best.1 {
                    entry
                } else {
                    best
                }
            })
    }
}

/// Coarse severity classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    #[serde(alias = "Baixo")]
    Low,
    #[serde(alias = "Moderado")]
    Moderate,
    #[serde(alias = "Elevado")]
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RiskLevel::Low => "Low",
            RiskLevel::Moderate => "Moderate",
            RiskLevel::High => "High",
        })
    }
}

pub const NOTE_PNEUMONIA: &str = "High-energy acoustic pattern in the mid frequencies. Suggests \
parenchymal consolidation compatible with pneumonia.";
pub const NOTE_BRONCHITIS: &str = "Acoustic pattern compatible with bronchial hypersecretion. \
Low-frequency wheezing components are present.";
pub const NOTE_ASTHMA: &str = "Acute obstructive component detected. The analysis indicates \
persistent bronchiolar narrowing during the expiratory phase.";
pub const NOTE_NORMAL: &str = "Bioacoustic pattern within normal limits. No evidence of \
obstructive or infectious pathology was detected by the model.";

/// Pneumonia first, then bronchitis or asthma, otherwise low.
pub fn derive_risk_level(probabilities: &DiagnosisProbabilities) -> RiskLevel {
    if probabilities.pneumonia > DOMINANT_THRESHOLD {
        RiskLevel::High
    } else if probabilities.bronchitis > DOMINANT_THRESHOLD
        || probabilities.asthma > DOMINANT_THRESHOLD
    {
        RiskLevel::Moderate
    } else {
        RiskLevel::Low
    }
}

/// Narrative for the first dominant condition in pneumonia, bronchitis, asthma order.
pub fn derive_clinical_note(probabilities: &DiagnosisProbabilities) -> &'static str {
    if probabilities.pneumonia > DOMINANT_THRESHOLD {
        NOTE_PNEUMONIA
    } else if probabilities.bronchitis > DOMINANT_THRESHOLD {
        NOTE_BRONCHITIS
    } else if probabilities.asthma > DOMINANT_THRESHOLD {
        NOTE_ASTHMA
    } else {
        NOTE_NORMAL
    }
}

/// Outcome of one completed analysis. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    id: ResultId,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    timestamp: DateTime<Utc>,
    probabilities: DiagnosisProbabilities,
    risk_level: RiskLevel,
    audio_duration: f64,
    clinical_note: String,
}

impl AnalysisResult {
    /// Creates a result stamped now with a fresh identifier, deriving risk and note.
    pub fn new(probabilities: DiagnosisProbabilities, audio_duration: f64) -> Self {
        Self::at(ResultId::generate(), Utc::now(), probabilities, audio_duration)
    }

    /// Creates a result with an explicit identity and time.
    ///
    /// The timestamp is truncated to whole milliseconds, the precision it is persisted with.
    pub fn at(
        id: ResultId,
        timestamp: DateTime<Utc>,
        probabilities: DiagnosisProbabilities,
        audio_duration: f64,
    ) -> Self {
        let timestamp =
            DateTime::from_timestamp_millis(timestamp.timestamp_millis()).unwrap_or(timestamp);
        Self {
            id,
            timestamp,
            risk_level: derive_risk_level(&probabilities),
            clinical_note: derive_clinical_note(&probabilities).to_string(),
            probabilities,
            audio_duration,
        }
    }

    /// Returns a copy of this result filed under a different identifier.
    pub fn rekeyed(&self, id: ResultId) -> Self {
        Self {
            id,
            ..self.clone()
        }
    }

    pub fn id(&self) -> &ResultId {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn probabilities(&self) -> &DiagnosisProbabilities {
        &self.probabilities
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    /// Recorded audio length in seconds.
    pub fn audio_duration(&self) -> f64 {
        self.audio_duration
    }

    pub fn clinical_note(&self) -> &str {
        &self.clinical_note
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probs(pneumonia: f64, bronchitis: f64, asthma: f64, normal: f64) -> DiagnosisProbabilities {
        DiagnosisProbabilities::new(pneumonia, bronchitis, asthma, normal).unwrap()
    }

    #[test]
    fn test_risk_and_note_follow_threshold_order() {
        let pneumonia = probs(82.0, 12.0, 4.0, 2.0);
        assert_eq!(derive_risk_level(&pneumonia), RiskLevel::High);
        assert_eq!(derive_clinical_note(&pneumonia), NOTE_PNEUMONIA);

        let bronchitis = probs(8.0, 76.0, 11.0, 5.0);
        assert_eq!(derive_risk_level(&bronchitis), RiskLevel::Moderate);
        assert_eq!(derive_clinical_note(&bronchitis), NOTE_BRONCHITIS);

        let asthma = probs(5.0, 15.0, 74.0, 6.0);
        assert_eq!(derive_risk_level(&asthma), RiskLevel::Moderate);
        assert_eq!(derive_clinical_note(&asthma), NOTE_ASTHMA);

        let normal = probs(2.0, 4.0, 5.0, 89.0);
        assert_eq!(derive_risk_level(&normal), RiskLevel::Low);
        assert_eq!(derive_clinical_note(&normal), NOTE_NORMAL);
    }

    #[test]
    fn test_pneumonia_wins_over_other_dominant_values() {
        // Vectors need not sum to 100.
        let both = probs(60.0, 90.0, 0.0, 0.0);
        assert_eq!(derive_risk_level(&both), RiskLevel::High);
        assert_eq!(derive_clinical_note(&both), NOTE_PNEUMONIA);
    }

    #[test]
    fn test_threshold_is_strict() {
        let edge = probs(50.0, 50.0, 50.0, 0.0);
        assert_eq!(derive_risk_level(&edge), RiskLevel::Low);
        assert_eq!(derive_clinical_note(&edge), NOTE_NORMAL);
    }

    #[test]
    fn test_new_rejects_out_of_range_values() {
        assert!(DiagnosisProbabilities::new(101.0, 0.0, 0.0, 0.0).is_err());
        assert!(DiagnosisProbabilities::new(0.0, -1.0, 0.0, 0.0).is_err());
        assert!(DiagnosisProbabilities::new(0.0, 0.0, f64::NAN, 0.0).is_err());
    }

    #[test]
    fn test_ranked_and_top() {
        let p = probs(5.0, 15.0, 74.0, 6.0);
        let ranked: Vec<Condition> = p.ranked().into_iter().map(|(c, _)| c).collect();
        assert_eq!(
            ranked,
            vec![
                Condition::Asthma,
                Condition::Bronchitis,
                Condition::Normal,
                Condition::Pneumonia
            ]
        );
        assert_eq!(p.top(), (Condition::Asthma, 74.0));
    }

    #[test]
    fn test_generated_id_format() {
        let id = ResultId::generate();
        let token = id
            .as_str()
            .strip_prefix("TOSSE-")
            .expect("id should carry the project prefix");
        assert_eq!(token.len(), 7);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_parse_rejects_blank_id() {
        assert!(ResultId::parse("  ").is_err());
        assert_eq!(ResultId::parse("legacy-1").unwrap().as_str(), "legacy-1");
    }

    #[test]
    fn test_result_derives_fields_and_truncates_timestamp() {
        let ts = DateTime::parse_from_rfc3339("2025-02-01T10:20:30.123456789Z")
            .unwrap()
            .with_timezone(&Utc);
        let result = AnalysisResult::at(
            ResultId::parse("TOSSE-AAAAAAA").unwrap(),
            ts,
            probs(8.0, 76.0, 11.0, 5.0),
            4.2,
        );
        assert_eq!(result.risk_level(), RiskLevel::Moderate);
        assert_eq!(result.clinical_note(), NOTE_BRONCHITIS);
        assert_eq!(result.timestamp().timestamp_millis(), ts.timestamp_millis());
        assert_eq!(result.timestamp().timestamp_subsec_nanos(), 123_000_000);

        let rekeyed = result.rekeyed(ResultId::parse("TOSSE-BBBBBBB").unwrap());
        assert_eq!(rekeyed.id().as_str(), "TOSSE-BBBBBBB");
        assert_eq!(rekeyed.probabilities(), result.probabilities());
        assert_eq!(rekeyed.timestamp(), result.timestamp());
    }

    #[test]
    fn test_legacy_risk_labels_are_accepted() {
        let level: RiskLevel = serde_json::from_str("\"Elevado\"").unwrap();
        assert_eq!(level, RiskLevel::High);
        let level: RiskLevel = serde_json::from_str("\"Moderado\"").unwrap();
        assert_eq!(level, RiskLevel::Moderate);
        assert_eq!(serde_json::to_string(&RiskLevel::Low).unwrap(), "\"Low\"");
    }
}
