//! Per-reading classification summary

use alerting::AlertObligation;
use reading_validator::ClassificationResult;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStatus {
    Ok,
    Rejected,
}

/// What the engine decided about one ingested payload
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationSummary {
    pub status: SummaryStatus,
    pub trace_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Every classification of the reading, `Normal` included
    pub anomalies: Vec<ClassificationResult>,
    /// Obligations opened by this reading
    pub alerts_fired: Vec<AlertObligation>,
    /// Storage could not be consulted or written for this reading
    pub storage_degraded: bool,
}

impl ClassificationSummary {
    pub fn accepted(
        anomalies: Vec<ClassificationResult>,
        alerts_fired: Vec<AlertObligation>,
        storage_degraded: bool,
    ) -> Self {
        Self {
            status: SummaryStatus::Ok,
            trace_id: Uuid::new_v4(),
            reason: None,
            anomalies,
            alerts_fired,
            storage_degraded,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            status: SummaryStatus::Rejected,
            trace_id: Uuid::new_v4(),
            reason: Some(reason.into()),
            anomalies: Vec::new(),
            alerts_fired: Vec::new(),
            storage_degraded: false,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == SummaryStatus::Ok
    }
}
