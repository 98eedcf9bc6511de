/// Derivation of the post-session evaluation report.
///
/// Everything here is a pure function of the session outcome. Missing
/// evaluation data degrades to zero scores and "no data" placeholders; building
/// a report never fails.
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::evaluation::{CompetencyScores, Dimension, ListField, OverallEvaluation};

/// Upper bound of every score axis.
pub const FULL_MARK: f64 = 10.0;

/// Number of strengths/weaknesses shown on the report.
pub const MAX_DISPLAYED_ITEMS: usize = 3;

/// Shown in place of an empty strengths/weaknesses list.
pub const NO_DATA_PLACEHOLDER: &str = "暂无数据";

static NUMBERED_ITEM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+\.\s+").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    Novice,
    Competent,
    Expert,
}

impl Rank {
    /// Below 4 is novice, 4 through 7 inclusive is competent, above 7 expert.
    pub fn from_score(score: f64) -> Self {
        if score < 4.0 {
            Rank::Novice
        } else if score <= 7.0 {
            Rank::Competent
        } else {
            Rank::Expert
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Rank::Novice => "novice",
            Rank::Competent => "competent",
            Rank::Expert => "expert",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Rank::Novice => "新手上路",
            Rank::Competent => "合格咨询师",
            Rank::Expert => "资深专家",
        }
    }
}

/// Split a strengths/weaknesses field into items.
///
/// A string is treated as a numbered list ("1. foo 2. bar") and split on the
/// `<number>. ` markers. This relies on the gateway's output format: text
/// without markers comes back as a single item.
pub fn parse_list_field(field: Option<&ListField>) -> Vec<String> {
    match field {
        None => Vec::new(),
        Some(ListField::Items(items)) => items.clone(),
        Some(ListField::Text(text)) => NUMBERED_ITEM_RE
            .split(text)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    }
}

/// One axis of the competency radar chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RadarPoint {
    pub dimension: &'static str,
    pub value: f64,
    pub full_mark: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DimensionScore {
    pub dimension: Dimension,
    pub label: &'static str,
    pub score: f64,
}

impl DimensionScore {
    pub fn display(&self) -> String {
        format!("{:.1}", self.score)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub scenario_name: String,
    pub overall_score: f64,
    pub rank: Rank,
    pub conversation_turns: u32,
    pub feedback: Option<String>,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub competency_scores: CompetencyScores,
}

impl EvaluationReport {
    pub fn build(
        scenario_name: impl Into<String>,
        evaluation: Option<&OverallEvaluation>,
        competency_scores: &CompetencyScores,
        conversation_turns: u32,
    ) -> Self {
        let structured = evaluation.and_then(|e| e.structured_output.as_ref());

        let overall_score = structured
            .and_then(|s| s.overall_score)
            .filter(|v| v.is_finite())
            .unwrap_or(0.0);

        let feedback = evaluation
            .and_then(|e| e.natural_language_feedback.as_deref())
            .filter(|f| !f.trim().is_empty())
            .map(str::to_string);

        Self {
            scenario_name: scenario_name.into(),
            overall_score,
            rank: Rank::from_score(overall_score),
            conversation_turns,
            feedback,
            strengths: parse_list_field(structured.and_then(|s| s.strengths.as_ref())),
            weaknesses: parse_list_field(structured.and_then(|s| s.weaknesses.as_ref())),
            competency_scores: *competency_scores,
        }
    }

    /// Overall score with one decimal, e.g. "6.2".
    pub fn score_display(&self) -> String {
        format!("{:.1}", self.overall_score)
    }

    pub fn displayed_strengths(&self) -> DisplayedItems<'_> {
        DisplayedItems::from_items(&self.strengths)
    }

    pub fn displayed_weaknesses(&self) -> DisplayedItems<'_> {
        DisplayedItems::from_items(&self.weaknesses)
    }

    pub fn radar(&self) -> Vec<RadarPoint> {
        Dimension::ALL
            .iter()
            .map(|&dim| RadarPoint {
                dimension: dim.label(),
                value: self.competency_scores.get(dim),
                full_mark: FULL_MARK,
            })
            .collect()
    }

    pub fn dimension_scores(&self) -> Vec<DimensionScore> {
        Dimension::ALL
            .iter()
            .map(|&dim| DimensionScore {
                dimension: dim,
                label: dim.label(),
                score: self.competency_scores.get(dim),
            })
            .collect()
    }
}

/// What a strengths/weaknesses panel shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayedItems<'a> {
    Items(&'a [String]),
    Placeholder(&'static str),
}

impl<'a> DisplayedItems<'a> {
    fn from_items(items: &'a [String]) -> Self {
        if items.is_empty() {
            DisplayedItems::Placeholder(NO_DATA_PLACEHOLDER)
        } else {
            DisplayedItems::Items(&items[..items.len().min(MAX_DISPLAYED_ITEMS)])
        }
    }
}
