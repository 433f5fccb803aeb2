//! Job lifecycle state machine.
//!
//! An import job moves through a fixed sequence of stages:
//!
//! ```text
//! UPLOADING → UPLOADED → EXTRACTING → EXTRACTED → IMPORTING → IMPORTED
//!                                                → TRAINING → COMPLETE
//! ```
//!
//! From any active stage a job can fall out to ERROR or CANCELLED; both are
//! restartable via `start`, which resumes from IMPORTING when an extracted
//! tree already exists. The transition table below is the single authority:
//! every status write in the job store is validated against it.
//!
//! Status strings are the canonical uppercase set only. Lowercase variants
//! must never be surfaced.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of an import job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Uploading,
    Uploaded,
    Extracting,
    Extracted,
    Importing,
    Imported,
    Training,
    Complete,
    Error,
    Cancelled,
}

impl JobStatus {
    /// All statuses a `start` event may be issued from.
    pub const STARTABLE: [JobStatus; 3] =
        [JobStatus::Uploaded, JobStatus::Error, JobStatus::Cancelled];

    /// Whether this status is one of the active pipeline stages.
    ///
    /// Active stages may be cancelled and may fall out to ERROR.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            JobStatus::Extracting
                | JobStatus::Extracted
                | JobStatus::Importing
                | JobStatus::Imported
                | JobStatus::Training
        )
    }

    /// Whether the job is finished (successfully or not).
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Error | JobStatus::Cancelled
        )
    }

    /// Whether the transition `self -> to` is permitted.
    ///
    /// Intra-stage progress updates (`to == self`) are allowed for active
    /// stages so the job store can publish progress without special cases.
    pub fn can_transition(self, to: JobStatus) -> bool {
        use JobStatus::*;
        if self == to && self.is_active() {
            return true;
        }
        match (self, to) {
            (Uploading, Uploaded) => true,
            // `start` from an idle or failed job, with or without resume
            (Uploaded | Error | Cancelled, Extracting) => true,
            (Uploaded | Error | Cancelled, Importing) => true,
            (Extracting, Extracted) => true,
            (Extracted, Importing) => true,
            (Importing, Imported) => true,
            (Imported, Training) => true,
            (Training, Complete) => true,
            (from, Cancelled) if from.is_active() => true,
            (from, Error) if from.is_active() => true,
            _ => false,
        }
    }

    /// Validate a transition, returning `InvalidTransition` when refused.
    pub fn check_transition(self, to: JobStatus) -> Result<()> {
        if self.can_transition(to) {
            Ok(())
        } else {
            Err(Error::InvalidTransition { from: self, to })
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Uploading => "UPLOADING",
            JobStatus::Uploaded => "UPLOADED",
            JobStatus::Extracting => "EXTRACTING",
            JobStatus::Extracted => "EXTRACTED",
            JobStatus::Importing => "IMPORTING",
            JobStatus::Imported => "IMPORTED",
            JobStatus::Training => "TRAINING",
            JobStatus::Complete => "COMPLETE",
            JobStatus::Error => "ERROR",
            JobStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "UPLOADING" => Ok(JobStatus::Uploading),
            "UPLOADED" => Ok(JobStatus::Uploaded),
            "EXTRACTING" => Ok(JobStatus::Extracting),
            "EXTRACTED" => Ok(JobStatus::Extracted),
            "IMPORTING" => Ok(JobStatus::Importing),
            "IMPORTED" => Ok(JobStatus::Imported),
            "TRAINING" => Ok(JobStatus::Training),
            "COMPLETE" => Ok(JobStatus::Complete),
            "ERROR" => Ok(JobStatus::Error),
            "CANCELLED" => Ok(JobStatus::Cancelled),
            other => Err(Error::UnknownStatus(other.to_string())),
        }
    }
}

/// The three long-running pipeline stages.
///
/// Each stage owns a span of the overall progress scale, so that
/// `progress_percent` is monotone across the whole pipeline and reaches
/// 100 exactly at COMPLETE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extracting,
    Importing,
    Training,
}

impl Stage {
    /// (start, end) of this stage's span on the overall 0–100 scale.
    fn span(self) -> (u8, u8) {
        match self {
            Stage::Extracting => (0, 25),
            Stage::Importing => (25, 70),
            Stage::Training => (70, 100),
        }
    }

    /// Map stage-local progress (0–100) to overall progress (0–100).
    pub fn overall_percent(self, stage_progress: u8) -> u8 {
        let (start, end) = self.span();
        let p = stage_progress.min(100) as u32;
        start + ((end - start) as u32 * p / 100) as u8
    }

    /// The stage a given active status reports progress under, if any.
    pub fn for_status(status: JobStatus) -> Option<Stage> {
        match status {
            JobStatus::Extracting | JobStatus::Extracted => Some(Stage::Extracting),
            JobStatus::Importing | JobStatus::Imported => Some(Stage::Importing),
            JobStatus::Training | JobStatus::Complete => Some(Stage::Training),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_permitted() {
        use JobStatus::*;
        let path = [
            Uploading, Uploaded, Extracting, Extracted, Importing, Imported, Training, Complete,
        ];
        for pair in path.windows(2) {
            assert!(
                pair[0].can_transition(pair[1]),
                "{} -> {} should be permitted",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn active_stages_can_cancel_and_error() {
        use JobStatus::*;
        for status in [Extracting, Extracted, Importing, Imported, Training] {
            assert!(status.can_transition(Cancelled));
            assert!(status.can_transition(Error));
        }
        assert!(!Complete.can_transition(Cancelled));
        assert!(!Uploaded.can_transition(Error));
    }

    #[test]
    fn resume_skips_extraction_when_allowed() {
        use JobStatus::*;
        for from in [Uploaded, Error, Cancelled] {
            assert!(from.can_transition(Extracting));
            assert!(from.can_transition(Importing));
        }
    }

    #[test]
    fn backwards_transitions_are_refused() {
        use JobStatus::*;
        assert!(!Imported.can_transition(Extracting));
        assert!(!Complete.can_transition(Importing));
        assert!(!Training.can_transition(Importing));
        let err = Training.check_transition(Importing).unwrap_err();
        assert!(matches!(err, crate::error::Error::InvalidTransition { .. }));
    }

    #[test]
    fn intra_stage_updates_only_for_active_stages() {
        assert!(JobStatus::Importing.can_transition(JobStatus::Importing));
        assert!(!JobStatus::Complete.can_transition(JobStatus::Complete));
        assert!(!JobStatus::Uploaded.can_transition(JobStatus::Uploaded));
    }

    #[test]
    fn overall_percent_is_monotone_across_stages() {
        let mut last = 0u8;
        for stage in [Stage::Extracting, Stage::Importing, Stage::Training] {
            for p in 0..=100u8 {
                let overall = stage.overall_percent(p);
                assert!(overall >= last, "{:?} at {} regressed", stage, p);
                last = overall;
            }
        }
        assert_eq!(Stage::Training.overall_percent(100), 100);
    }

    #[test]
    fn status_strings_round_trip() {
        use JobStatus::*;
        for status in [
            Uploading, Uploaded, Extracting, Extracted, Importing, Imported, Training, Complete,
            Error, Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
            // Serde representation matches the canonical string
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert!("cancelled".parse::<JobStatus>().is_err());
    }
}
