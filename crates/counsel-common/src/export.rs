use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::CommonError;
use crate::evaluation::CompetencyScores;
use crate::report::EvaluationReport;

const FILE_PREFIX: &str = "咨询报告";

/// Downloadable summary of a finished practice session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportExport {
    pub scenario: String,
    pub overall_score: f64,
    pub conversation_turns: u32,
    pub competency_scores: CompetencyScores,
    /// ISO-8601, UTC, millisecond precision
    pub timestamp: String,
}

impl ReportExport {
    pub fn new(report: &EvaluationReport, now: DateTime<Utc>) -> Self {
        Self {
            scenario: report.scenario_name.clone(),
            overall_score: report.overall_score,
            conversation_turns: report.conversation_turns,
            competency_scores: report.competency_scores,
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }

    pub fn to_pretty_json(&self) -> Result<String, CommonError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// `咨询报告_<scenario>_<YYYY-MM-DD>.json`, dated by the (UTC) timestamp.
    /// Path separators in the scenario name become `_`.
    pub fn file_name(&self) -> String {
        let scenario: String = self
            .scenario
            .chars()
            .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
            .collect();
        let date: String = self.timestamp.chars().take(10).collect();
        format!("{FILE_PREFIX}_{scenario}_{date}.json")
    }

    /// Write the export into `dir` and return the file path.
    pub fn save(&self, dir: &Path) -> Result<PathBuf, CommonError> {
        let path = dir.join(self.file_name());
        std::fs::write(&path, self.to_pretty_json()?)?;
        info!(path = %path.display(), scenario = %self.scenario, "report exported");
        Ok(path)
    }
}
