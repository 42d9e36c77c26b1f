use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle status of a stored verdict record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VerdictStatus {
    /// Accepted but not evaluated. The pipeline itself never writes this state.
    Pending,
    Complete,
    Failed,
}

/// Top-level moderation classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, EnumString, Display, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VerdictOutcome {
    Clean,
    Flagged,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LabelScore {
    pub name: String,
    pub score: f64,
}

/// Structured moderation result for one piece of content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Verdict {
    pub outcome: VerdictOutcome,
    pub toxicity: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<LabelScore>,
}

impl Verdict {
    /// Build a verdict from raw classifier scores.
    ///
    /// Content is flagged when the overall toxicity reaches `threshold`; the
    /// category labels are only kept for flagged content.
    pub fn from_scores(toxicity: f64, labels: Vec<LabelScore>, threshold: f64) -> Self {
        if toxicity >= threshold {
            Self {
                outcome: VerdictOutcome::Flagged,
                toxicity,
                labels,
            }
        } else {
            Self {
                outcome: VerdictOutcome::Clean,
                toxicity,
                labels: Vec::new(),
            }
        }
    }

    pub fn clean() -> Self {
        Self {
            outcome: VerdictOutcome::Clean,
            toxicity: 0.0,
            labels: Vec::new(),
        }
    }
}

/// Durable verdict row keyed by content id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VerdictRecord {
    pub content_id: String,
    pub status: VerdictStatus,
    pub verdict: Option<Verdict>,
    pub error: Option<String>,
    pub evaluated_at: DateTime<Utc>,
}

impl VerdictRecord {
    pub fn complete(content_id: impl Into<String>, verdict: Verdict, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            content_id: content_id.into(),
            status: VerdictStatus::Complete,
            verdict: Some(verdict),
            error: None,
            evaluated_at,
        }
    }

    pub fn failed(content_id: impl Into<String>, error: impl Into<String>, evaluated_at: DateTime<Utc>) -> Self {
        Self {
            content_id: content_id.into(),
            status: VerdictStatus::Failed,
            verdict: None,
            error: Some(error.into()),
            evaluated_at,
        }
    }
}

/// How a store resolves a write for a content id that already has a record.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OverwritePolicy {
    /// A strictly newer `evaluated_at` replaces the stored record.
    #[default]
    LastWriteWins,
    /// Like `LastWriteWins`, except a `complete` record is never replaced.
    RejectIfComplete,
}

impl OverwritePolicy {
    pub fn rejects_complete(self) -> bool {
        matches!(self, OverwritePolicy::RejectIfComplete)
    }
}

/// What an upsert did to the stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

/// Decide whether `incoming` replaces `existing`.
///
/// Equal timestamps keep the stored record, so re-applying a write is a no-op.
/// The SQL upsert in `db::queries` encodes the same rule.
pub fn should_replace(
    existing: Option<&VerdictRecord>,
    incoming: &VerdictRecord,
    policy: OverwritePolicy,
) -> bool {
    match existing {
        None => true,
        Some(current) => {
            if policy.rejects_complete() && current.status == VerdictStatus::Complete {
                return false;
            }
            incoming.evaluated_at > current.evaluated_at
        }
    }
}

/// Response for `GET /api/v1/content/{content_id}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct VerdictResponse {
    pub content_id: String,
    pub status: VerdictStatus,
    pub verdict: Option<Verdict>,
    pub error: Option<String>,
    pub evaluated_at: DateTime<Utc>,
}

impl From<VerdictRecord> for VerdictResponse {
    fn from(record: VerdictRecord) -> Self {
        Self {
            content_id: record.content_id,
            status: record.status,
            verdict: record.verdict,
            error: record.error,
            evaluated_at: record.evaluated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_threshold_flags_and_keeps_labels() {
        let labels = vec![LabelScore {
            name: "INSULT".to_string(),
            score: 0.8,
        }];
        let verdict = Verdict::from_scores(0.3, labels.clone(), 0.3);
        assert_eq!(verdict.outcome, VerdictOutcome::Flagged);
        assert_eq!(verdict.labels, labels);

        let verdict = Verdict::from_scores(0.29, labels, 0.3);
        assert_eq!(verdict.outcome, VerdictOutcome::Clean);
        assert!(verdict.labels.is_empty());
    }

    #[test]
    fn test_first_write_always_lands() {
        let record = VerdictRecord::complete("c1", Verdict::clean(), at(0));
        assert!(should_replace(None, &record, OverwritePolicy::LastWriteWins));
        assert!(should_replace(None, &record, OverwritePolicy::RejectIfComplete));
    }

    #[test]
    fn test_same_write_twice_is_noop() {
        let record = VerdictRecord::complete("c1", Verdict::clean(), at(0));
        assert!(!should_replace(Some(&record), &record, OverwritePolicy::LastWriteWins));
    }

    #[test]
    fn test_last_write_wins_by_evaluated_at() {
        let older = VerdictRecord::failed("c1", "bad input", at(0));
        let newer = VerdictRecord::complete("c1", Verdict::clean(), at(0) + Duration::seconds(1));
        assert!(should_replace(Some(&older), &newer, OverwritePolicy::LastWriteWins));
        assert!(!should_replace(Some(&newer), &older, OverwritePolicy::LastWriteWins));
    }

    #[test]
    fn test_reject_if_complete_keeps_complete_record() {
        let complete = VerdictRecord::complete("c1", Verdict::clean(), at(0));
        let later_failure = VerdictRecord::failed("c1", "bad input", at(10));
        assert!(!should_replace(Some(&complete), &later_failure, OverwritePolicy::RejectIfComplete));
        assert!(should_replace(Some(&later_failure), &VerdictRecord::complete("c1", Verdict::clean(), at(20)), OverwritePolicy::RejectIfComplete));
    }

    #[test]
    fn test_status_round_trips_through_text() {
        assert_eq!(VerdictStatus::Complete.to_string(), "complete");
        assert_eq!("failed".parse::<VerdictStatus>().unwrap(), VerdictStatus::Failed);
    }
}
