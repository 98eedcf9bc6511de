/// Data produced by a practice session: the transcript and the gateway's
/// end-of-session evaluation.
///
/// Field names of the evaluation payload are kept exactly as the gateway's
/// evaluation workflow emits them, including the Chinese keys of
/// `structured_output`.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message exchanged with the simulated visitor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
}

/// Chronological message history of one chat session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    turns: Vec<ConversationTurn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, role: Role, content: impl Into<String>) {
        self.turns.push(ConversationTurn {
            role,
            content: content.into(),
        });
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    /// Number of exchanges the trainee started, i.e. user messages sent.
    pub fn exchange_count(&self) -> u32 {
        self.turns.iter().filter(|t| t.role == Role::User).count() as u32
    }
}

/// Strengths or weaknesses as returned by the gateway: either one numbered
/// list in a single string, or an already split list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ListField {
    Text(String),
    Items(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredOutput {
    #[serde(rename = "稳定优势", default, skip_serializing_if = "Option::is_none")]
    pub strengths: Option<ListField>,
    #[serde(rename = "结构性短板", default, skip_serializing_if = "Option::is_none")]
    pub weaknesses: Option<ListField>,
    /// Overall score on a 0-10 scale
    #[serde(rename = "综合得分", default, skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<f64>,
}

/// End-of-session evaluation. Immutable once received.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OverallEvaluation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub natural_language_feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<StructuredOutput>,
}

/// The six fixed competency axes, in radar-chart order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Dimension {
    Professionalism,
    Relational,
    Science,
    Application,
    Education,
    Systems,
}

impl Dimension {
    pub const ALL: [Dimension; 6] = [
        Dimension::Professionalism,
        Dimension::Relational,
        Dimension::Science,
        Dimension::Application,
        Dimension::Education,
        Dimension::Systems,
    ];

    /// Wire key, as used in `CompetencyScores` JSON.
    pub fn key(self) -> &'static str {
        match self {
            Dimension::Professionalism => "Professionalism",
            Dimension::Relational => "Relational",
            Dimension::Science => "Science",
            Dimension::Application => "Application",
            Dimension::Education => "Education",
            Dimension::Systems => "Systems",
        }
    }

    /// Trainee-facing axis label.
    pub fn label(self) -> &'static str {
        match self {
            Dimension::Professionalism => "专业素养",
            Dimension::Relational => "关系建立",
            Dimension::Science => "科学知识",
            Dimension::Application => "应用能力",
            Dimension::Education => "教育指导",
            Dimension::Systems => "系统思维",
        }
    }
}

/// Per-dimension scores in [0, 10]. An absent dimension reads as 0, which
/// means "not touched in this session", not a failing score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CompetencyScores {
    #[serde(rename = "Professionalism", default, skip_serializing_if = "Option::is_none")]
    pub professionalism: Option<f64>,
    #[serde(rename = "Relational", default, skip_serializing_if = "Option::is_none")]
    pub relational: Option<f64>,
    #[serde(rename = "Science", default, skip_serializing_if = "Option::is_none")]
    pub science: Option<f64>,
    #[serde(rename = "Application", default, skip_serializing_if = "Option::is_none")]
    pub application: Option<f64>,
    #[serde(rename = "Education", default, skip_serializing_if = "Option::is_none")]
    pub education: Option<f64>,
    #[serde(rename = "Systems", default, skip_serializing_if = "Option::is_none")]
    pub systems: Option<f64>,
}

impl CompetencyScores {
    fn slot(&self, dim: Dimension) -> Option<f64> {
        match dim {
            Dimension::Professionalism => self.professionalism,
            Dimension::Relational => self.relational,
            Dimension::Science => self.science,
            Dimension::Application => self.application,
            Dimension::Education => self.education,
            Dimension::Systems => self.systems,
        }
    }

    fn slot_mut(&mut self, dim: Dimension) -> &mut Option<f64> {
        match dim {
            Dimension::Professionalism => &mut self.professionalism,
            Dimension::Relational => &mut self.relational,
            Dimension::Science => &mut self.science,
            Dimension::Application => &mut self.application,
            Dimension::Education => &mut self.education,
            Dimension::Systems => &mut self.systems,
        }
    }

    /// Score for `dim`, with absent and non-finite values reading as 0.
    pub fn get(&self, dim: Dimension) -> f64 {
        self.slot(dim).filter(|v| v.is_finite()).unwrap_or(0.0)
    }

    pub fn set(&mut self, dim: Dimension, score: f64) {
        *self.slot_mut(dim) = Some(score);
    }

    pub fn with(mut self, dim: Dimension, score: f64) -> Self {
        self.set(dim, score);
        self
    }
}
