//! Patient registration data.
//!
//! A [`PatientDraft`] holds the raw registration form values as typed by the operator. Only a
//! draft that passes [`PatientDraft::validate`] becomes a [`PatientData`], which is the value
//! threaded through the workflow and persisted alongside each analysis.

use crate::error::ValidationError;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use tosse_types::NonEmptyText;

/// Date format accepted for the birth date field.
const BIRTH_DATE_FORMAT: &str = "%Y-%m-%d";

/// A registered patient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientData {
    pub name: NonEmptyText,
    pub birth_date: NaiveDate,
    pub address: NonEmptyText,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub consent: bool,
}

impl PatientData {
    /// Age in whole years on the given date.
    ///
    /// Returns 0 when `on` precedes the birth date.
    pub fn age_on(&self, on: NaiveDate) -> u32 {
        let mut years = on.year() - self.birth_date.year();
        if (on.month(), on.day()) < (self.birth_date.month(), self.birth_date.day()) {
            years -= 1;
        }
        u32::try_from(years).unwrap_or(0)
    }

    /// Re-opens this patient as an editable draft.
    pub fn to_draft(&self) -> PatientDraft {
        PatientDraft {
            name: self.name.to_string(),
            birth_date: self.birth_date.format(BIRTH_DATE_FORMAT).to_string(),
            address: self.address.to_string(),
            phone: self.phone.clone().unwrap_or_default(),
            consent: self.consent,
        }
    }
}

/// Raw registration form input.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientDraft {
    pub name: String,
    pub birth_date: String,
    pub address: String,
    #[serde(default)]
    pub phone: String,
    pub consent: bool,
}

impl PatientDraft {
    /// Whether the proceed action should be enabled.
    ///
    /// This is the same check the form performs before enabling its button: every required
    /// field is filled and consent is given. It does not parse the birth date.
    pub fn is_complete(&self) -> bool {
        !self.name.trim().is_empty()
            && !self.birth_date.trim().is_empty()
            && !self.address.trim().is_empty()
            && self.consent
    }

    /// Validates the draft and builds the patient.
    ///
    /// # Errors
    ///
    /// Returns the first failing field, checked in form order: name, birth date, address,
    /// consent.
    pub fn validate(&self) -> Result<PatientData, ValidationError> {
        let name = NonEmptyText::new(&self.name).map_err(|_| ValidationError::MissingName)?;

        let raw_birth_date = self.birth_date.trim();
        if raw_birth_date.is_empty() {
            return Err(ValidationError::MissingBirthDate);
        }
        let birth_date = NaiveDate::parse_from_str(raw_birth_date, BIRTH_DATE_FORMAT)
            .map_err(|_| ValidationError::InvalidBirthDate(raw_birth_date.to_string()))?;

        let address =
            NonEmptyText::new(&self.address).map_err(|_| ValidationError::MissingAddress)?;

        if !self.consent {
            return Err(ValidationError::ConsentRequired);
        }

        let phone = Some(self.phone.trim())
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        Ok(PatientData {
            name,
            birth_date,
            address,
            phone,
            consent: true,
        })
    }
}
