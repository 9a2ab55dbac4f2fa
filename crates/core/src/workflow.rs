//! Screen sequencing for one triage session.
//!
//! The [`WorkflowController`] walks the operator through registration, recording and result
//! review, and threads the current patient and latest result between those steps. It is handed
//! its [`ResultStore`] and [`Analyzer`] at construction; everything else it holds lives only for
//! the session.
//!
//! ## Transitions
//!
//! ```text
//! Welcome      -> Registration | History
//! Registration -> Welcome | Recording (valid patient only)
//! Recording    -> Registration | Result (analysis completion only)
//! Result       -> Registration | History | Welcome
//! History      -> Welcome | Registration | Report
//! Report       -> History | Welcome | Registration
//! ```
//!
//! ## Analysis and navigation
//!
//! Analysis is started with [`WorkflowController::begin_analysis`], which hands out an
//! [`AnalysisJob`] that runs without borrowing the controller. Leaving the recording screen
//! before the job is handed back invalidates it, and [`WorkflowController::finish_analysis`]
//! then discards the late result instead of saving it.
//!
//! ## Edit mode
//!
//! Opening a history record for edit keys the session to that record's identifier. The next
//! completed analysis is filed under the same identifier, so saving it replaces the original
//! record in place. Edit mode ends when that analysis is saved, or when the operator leaves
//! through the result or welcome screens.

use crate::analysis::{AnalysisResult, ResultId};
use crate::engine::{Analyzer, AudioSample, ProgressSender};
use crate::export::render_history;
use crate::patient::{PatientData, PatientDraft};
use crate::store::{HistoryRecord, ResultStore};
use crate::{TriageError, TriageResult};
use chrono::TimeZone;
use std::fmt;
use std::sync::Arc;

/// The screens of the triage flow.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Screen {
    Welcome,
    Registration,
    Recording,
    Result,
    History,
    Report,
}

impl Screen {
    /// Whether the flow permits moving from `self` to `to`.
    pub fn can_navigate_to(self, to: Screen) -> bool {
        use Screen::*;
        matches!(
            (self, to),
            (Welcome, Registration)
                | (Welcome, History)
                | (Registration, Welcome)
                | (Registration, Recording)
                | (Recording, Registration)
                | (Recording, Result)
                | (Result, Registration)
                | (Result, History)
                | (Result, Welcome)
                | (History, Welcome)
                | (History, Registration)
                | (History, Report)
                | (Report, History)
                | (Report, Welcome)
                | (Report, Registration)
        )
    }
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Screen::Welcome => "welcome",
            Screen::Registration => "registration",
            Screen::Recording => "recording",
            Screen::Result => "result",
            Screen::History => "history",
            Screen::Report => "report",
        })
    }
}

/// Identifies one started analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AnalysisTicket(u64);

/// A started analysis, detached from the controller while it runs.
pub struct AnalysisJob {
    ticket: AnalysisTicket,
    analyzer: Arc<dyn Analyzer>,
}

impl AnalysisJob {
    pub fn ticket(&self) -> AnalysisTicket {
        self.ticket
    }

    /// Runs the analyzer. Hand the outcome to [`WorkflowController::finish_analysis`].
    ///
    /// # Errors
    ///
    /// Propagates the analyzer's failure.
    pub async fn run(
        self,
        sample: AudioSample,
        duration_secs: f64,
        progress: Option<ProgressSender>,
    ) -> TriageResult<CompletedAnalysis> {
        let result = self
            .analyzer
            .analyze(&sample, duration_secs, progress.as_ref())
            .await?;
        Ok(CompletedAnalysis {
            ticket: self.ticket,
            result,
        })
    }
}

/// A finished analysis waiting to be delivered to the controller.
#[derive(Debug)]
pub struct CompletedAnalysis {
    ticket: AnalysisTicket,
    result: AnalysisResult,
}

impl CompletedAnalysis {
    pub fn ticket(&self) -> AnalysisTicket {
        self.ticket
    }

    pub fn result(&self) -> &AnalysisResult {
        &self.result
    }
}

pub struct WorkflowController {
    store: ResultStore,
    analyzer: Arc<dyn Analyzer>,
    screen: Screen,
    patient: Option<PatientData>,
    last_result: Option<AnalysisResult>,
    editing: Option<ResultId>,
    next_ticket: u64,
    active: Option<AnalysisTicket>,
}

impl WorkflowController {
    /// Creates a controller on the welcome screen.
    pub fn new(store: ResultStore, analyzer: Arc<dyn Analyzer>) -> Self {
        Self {
            store,
            analyzer,
            screen: Screen::Welcome,
            patient: None,
            last_result: None,
            editing: None,
            next_ticket: 0,
            active: None,
        }
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// The patient in transit: the one being registered, recorded or reported on.
    pub fn patient(&self) -> Option<&PatientData> {
        self.patient.as_ref()
    }

    /// The result shown on the result or report screen.
    pub fn last_result(&self) -> Option<&AnalysisResult> {
        self.last_result.as_ref()
    }

    /// Identifier of the record being edited, if the session is in edit mode.
    pub fn editing(&self) -> Option<&ResultId> {
        self.editing.as_ref()
    }

    /// Whether an analysis has been started and not yet delivered or invalidated.
    pub fn analysis_in_progress(&self) -> bool {
        self.active.is_some()
    }

    /// Registration form contents to prefill from the patient in transit.
    pub fn registration_draft(&self) -> PatientDraft {
        self.patient
            .as_ref()
            .map(PatientData::to_draft)
            .unwrap_or_default()
    }

    fn transition(&mut self, to: Screen, action: &'static str) -> TriageResult<()> {
        let from = self.screen;
        if !from.can_navigate_to(to) {
            return Err(TriageError::InvalidTransition { from, action });
        }

        if from == Screen::Recording && to != Screen::Result {
            if let Some(ticket) = self.active.take() {
                tracing::warn!(?ticket, "left recording, analysis result will be discarded");
            }
        }
        if to == Screen::Welcome || from == Screen::Result {
            self.editing = None;
        }

        tracing::debug!(%from, %to, "{}", action);
        self.screen = to;
        Ok(())
    }

    /// Opens the registration form for a new test.
    ///
    /// The patient in transit, if any, is kept to prefill the form. Edit mode is cleared.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::InvalidTransition` when registration cannot be reached from the
    /// current screen.
    pub fn start_new(&mut self) -> TriageResult<()> {
        self.transition(Screen::Registration, "start a new test")?;
        self.editing = None;
        Ok(())
    }

    pub fn view_history(&mut self) -> TriageResult<()> {
        self.transition(Screen::History, "view history")
    }

    pub fn go_home(&mut self) -> TriageResult<()> {
        self.transition(Screen::Welcome, "go home")
    }

    /// Steps back one screen.
    ///
    /// Registration and history go home, recording returns to registration (abandoning any
    /// running analysis) and a report returns to history.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::InvalidTransition` on screens without a back action.
    pub fn back(&mut self) -> TriageResult<()> {
        let to = match self.screen {
            Screen::Registration | Screen::History => Screen::Welcome,
            Screen::Recording => Screen::Registration,
            Screen::Report => Screen::History,
            Screen::Welcome | Screen::Result => {
                return Err(TriageError::InvalidTransition {
                    from: self.screen,
                    action: "go back",
                })
            }
        };
        self.transition(to, "go back")
    }

    /// Accepts the registration form and moves on to recording.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::Validation` if a required field is missing or consent was not
    /// given; the controller stays on the registration screen.
    pub fn submit_registration(&mut self, draft: &PatientDraft) -> TriageResult<()> {
        if self.screen != Screen::Registration {
            return Err(TriageError::InvalidTransition {
                from: self.screen,
                action: "submit registration",
            });
        }

        let patient = draft.validate()?;
        self.patient = Some(patient);
        self.transition(Screen::Recording, "submit registration")
    }

    /// Abandons recording because the capture device is unavailable.
    ///
    /// Returns the error to surface to the operator. When on the recording screen the flow goes
    /// back to registration; on any other screen an `InvalidTransition` is returned instead.
    pub fn fail_capture(&mut self, reason: impl Into<String>) -> TriageError {
        let reason = reason.into();
        if self.screen != Screen::Recording {
            return TriageError::InvalidTransition {
                from: self.screen,
                action: "abandon capture",
            };
        }
        if let Err(e) = self.transition(Screen::Registration, "abandon capture") {
            return e;
        }
        tracing::warn!("audio capture unavailable: {}", reason);
        TriageError::CaptureUnavailable(reason)
    }

    /// Starts an analysis of the recording.
    ///
    /// A previously started analysis that has not been delivered is superseded.
    ///
    /// # Errors
    ///
    /// Returns `TriageError::InvalidTransition` outside the recording screen.
    pub fn begin_analysis(&mut self) -> TriageResult<AnalysisJob> {
        if self.screen != Screen::Recording {
            return Err(TriageError::InvalidTransition {
                from: self.screen,
                action: "start analysis",
            });
        }

        let ticket = AnalysisTicket(self.next_ticket);
        self.next_ticket += 1;
        self.active = Some(ticket);

        Ok(AnalysisJob {
            ticket,
            analyzer: Arc::clone(&self.analyzer),
        })
    }

    /// Delivers a finished analysis.
    ///
    /// If the analysis is still the active one, the record is saved (replacing the edited record
    /// in edit mode), the result becomes current and the flow moves to the result screen.
    /// A stale analysis is discarded and `Ok(None)` is returned.
    ///
    /// # Errors
    ///
    /// Returns `TriageError` if saving the record fails. The flow then stays on recording with
    /// the analysis still active, so the same `completed` can be delivered again. In edit mode,
    /// `TriageError::RecordNotFound` means the edited record no longer exists.
    pub fn finish_analysis(
        &mut self,
        completed: &CompletedAnalysis,
    ) -> TriageResult<Option<&AnalysisResult>> {
        if self.screen != Screen::Recording || self.active != Some(completed.ticket) {
            tracing::warn!(
                ticket = ?completed.ticket,
                id = %completed.result.id(),
                "discarding analysis delivered after leaving recording"
            );
            return Ok(None);
        }

        let patient = self.patient.clone().ok_or(TriageError::NoActiveAnalysis)?;
        let result = match &self.editing {
            Some(id) => {
                let result = completed.result.rekeyed(id.clone());
                self.store
                    .replace(HistoryRecord::new(patient, result.clone()))?;
                result
            }
            None => {
                self.store
                    .save(HistoryRecord::new(patient, completed.result.clone()))?;
                completed.result.clone()
            }
        };

        self.active = None;
        self.editing = None;
        self.transition(Screen::Result, "complete analysis")?;
        Ok(Some(&*self.last_result.insert(result)))
    }

    /// Runs an analysis to completion and delivers it.
    ///
    /// # Errors
    ///
    /// Returns `TriageError` if analysis cannot start, the analyzer fails, or saving fails.
    pub async fn analyze(
        &mut self,
        sample: AudioSample,
        duration_secs: f64,
        progress: Option<ProgressSender>,
    ) -> TriageResult<&AnalysisResult> {
        let job = self.begin_analysis()?;
        let completed = job.run(sample, duration_secs, progress).await?;
        self.finish_analysis(&completed)?
            .ok_or(TriageError::NoActiveAnalysis)
    }

    fn find_record(&self, id: &ResultId) -> TriageResult<HistoryRecord> {
        self.store
            .get(id)
            .cloned()
            .ok_or_else(|| TriageError::RecordNotFound(id.to_string()))
    }

    /// Opens the report for one history record.
    pub fn view_report(&mut self, id: &ResultId) -> TriageResult<()> {
        if self.screen != Screen::History {
            return Err(TriageError::InvalidTransition {
                from: self.screen,
                action: "view report",
            });
        }
        let record = self.find_record(id)?;
        self.patient = Some(record.patient);
        self.last_result = Some(record.result);
        self.transition(Screen::Report, "view report")
    }

    /// Reopens a history record for edit.
    ///
    /// The record's patient prefills registration and the session enters edit mode keyed by
    /// `id`.
    pub fn edit_record(&mut self, id: &ResultId) -> TriageResult<()> {
        if self.screen != Screen::History {
            return Err(TriageError::InvalidTransition {
                from: self.screen,
                action: "edit record",
            });
        }
        let record = self.find_record(id)?;
        self.transition(Screen::Registration, "edit record")?;
        self.patient = Some(record.patient);
        self.editing = Some(id.clone());
        Ok(())
    }

    /// Deletes a history record. Returns whether anything was removed.
    pub fn delete_record(&mut self, id: &ResultId) -> TriageResult<bool> {
        if self.screen != Screen::History {
            return Err(TriageError::InvalidTransition {
                from: self.screen,
                action: "delete record",
            });
        }
        self.store.delete(id)
    }

    /// Renders the whole history as plain text.
    pub fn export_history<Tz: TimeZone>(&self, tz: &Tz) -> TriageResult<String>
    where
        Tz::Offset: fmt::Display,
    {
        render_history(self.store.list(), tz)
    }
}
