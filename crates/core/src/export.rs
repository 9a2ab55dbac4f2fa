//! Plain-text export of the history.

use crate::constants::EXPORT_SEPARATOR_WIDTH;
use crate::store::HistoryRecord;
use crate::{TriageError, TriageResult};
use chrono::{NaiveDate, TimeZone};

const EXPORT_TITLE: &str = "TOSSE PROJECT - HISTORY REPORT";
const TIMESTAMP_FORMAT: &str = "%d/%m/%Y, %H:%M:%S";

/// Renders every record as a text block, in list order (newest first).
///
/// Records are numbered so that the newest carries the highest number. Timestamps are shown in
/// `tz`.
///
/// # Errors
///
/// Returns `TriageError::EmptyHistory` when there is nothing to export.
pub fn render_history<Tz: TimeZone>(records: &[HistoryRecord], tz: &Tz) -> TriageResult<String>
where
    Tz::Offset: std::fmt::Display,
{
    if records.is_empty() {
        return Err(TriageError::EmptyHistory);
    }

    let total = records.len();
    let mut out = String::new();
    out.push_str(&format!("{}\n", EXPORT_TITLE));
    out.push_str(&format!("{}\n", "=".repeat(EXPORT_SEPARATOR_WIDTH)));
    out.push('\n');

    for (index, record) in records.iter().enumerate() {
        let result = &record.result;
        let probabilities = result.probabilities();
        let when = result.timestamp().with_timezone(tz).format(TIMESTAMP_FORMAT);

        out.push_str(&format!("Diagnosis #{}\n", total - index));
        out.push_str(&format!("Date and time: {}\n", when));
        out.push_str(&format!("Patient name: {}\n", record.patient.name));
        out.push_str(&format!("Clinical opinion: {}\n", result.clinical_note()));
        out.push_str("Analysis results:\n");
        out.push_str(&format!("  - Pneumonia probability: {}%\n", probabilities.pneumonia));
        out.push_str(&format!("  - Bronchitis probability: {}%\n", probabilities.bronchitis));
        out.push_str(&format!("  - Asthma probability: {}%\n", probabilities.asthma));
        out.push_str(&format!("  - Normality probability: {}%\n", probabilities.normal));
        out.push_str(&format!("{}\n", "-".repeat(EXPORT_SEPARATOR_WIDTH)));
        out.push('\n');
    }

    Ok(out)
}

/// Suggested file name for an export produced on `date`.
pub fn default_export_filename(date: NaiveDate) -> String {
    format!("tosse_history_{}.txt", date.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{AnalysisResult, DiagnosisProbabilities, ResultId, NOTE_NORMAL};
    use crate::patient::PatientDraft;
    use chrono::{DateTime, FixedOffset, Utc};

    fn record(id: &str, name: &str, rfc3339: &str, probabilities: DiagnosisProbabilities) -> HistoryRecord {
        let patient = PatientDraft {
            name: name.into(),
            birth_date: "1990-07-01".into(),
            address: "Largo do Carmo 1".into(),
            phone: "".into(),
            consent: true,
        }
        .validate()
        .unwrap();
        let ts = DateTime::parse_from_rfc3339(rfc3339)
            .unwrap()
            .with_timezone(&Utc);
        HistoryRecord::new(
            patient,
            AnalysisResult::at(ResultId::parse(id).unwrap(), ts, probabilities, 3.0),
        )
    }

    #[test]
    fn test_empty_history_cannot_be_exported() {
        let err = render_history(&[], &Utc).expect_err("empty export should fail");
        assert!(matches!(err, TriageError::EmptyHistory));
    }

    #[test]
    fn test_render_history_layout() {
        let records = vec![
            record(
                "TOSSE-0000002",
                "Bruno Dias",
                "2025-03-02T15:04:05Z",
                DiagnosisProbabilities::new(2.0, 4.0, 5.0, 89.0).unwrap(),
            ),
            record(
                "TOSSE-0000001",
                "Ana Costa",
                "2025-03-01T09:00:00Z",
                DiagnosisProbabilities::new(82.0, 12.0, 4.0, 2.0).unwrap(),
            ),
        ];

        let text = render_history(&records, &Utc).unwrap();
        let expected_first_block = format!(
            "Diagnosis #2\n\
             Date and time: 02/03/2025, 15:04:05\n\
             Patient name: Bruno Dias\n\
             Clinical opinion: {}\n\
             Analysis results:\n\
             \x20 - Pneumonia probability: 2%\n\
             \x20 - Bronchitis probability: 4%\n\
             \x20 - Asthma probability: 5%\n\
             \x20 - Normality probability: 89%\n\
             ----------------------------------------\n\n",
            NOTE_NORMAL
        );

        assert!(text.starts_with(
            "TOSSE PROJECT - HISTORY REPORT\n========================================\n\n"
        ));
        assert!(text.contains(&expected_first_block), "got:\n{}", text);

        let second = text.find("Diagnosis #1").expect("second block present");
        assert!(text.find("Diagnosis #2").unwrap() < second);
        assert!(text[second..].contains("Patient name: Ana Costa"));
        assert_eq!(text.matches("----------------------------------------\n").count(), 2);
    }

    #[test]
    fn test_render_history_uses_given_time_zone() {
        let records = vec![record(
            "TOSSE-0000001",
            "Ana Costa",
            "2025-08-01T23:30:00Z",
            DiagnosisProbabilities::new(2.0, 4.0, 5.0, 89.0).unwrap(),
        )];
        let lisbon_summer = FixedOffset::east_opt(3600).unwrap();
        let text = render_history(&records, &lisbon_summer).unwrap();
        assert!(text.contains("Date and time: 02/08/2025, 00:30:00"));
    }

    #[test]
    fn test_default_export_filename() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 9).unwrap();
        assert_eq!(default_export_filename(date), "tosse_history_2025-01-09.txt");
    }
}
