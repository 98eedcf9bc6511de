use serde::{Deserialize, Serialize};

use crate::error::CommonError;

/// The simulated visitor's backstory, used to script the role-play.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitorProfile {
    /// Display name with a short identity note, e.g. "小妍（大学生，20岁）"
    pub name: String,
    pub age: String,
    /// Presenting problem
    pub problem: String,
    /// Psychological defense pattern the trainee has to work through
    pub defense: String,
    pub training_goal: String,
}

/// A predefined counseling role-play setup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: u32,
    pub title: String,
    /// Emotional context, e.g. "情绪低落、焦虑、逃避"
    pub subtitle: String,
    pub description: String,
    /// Training goal shown on the selection card
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visitor_profile: Option<VisitorProfile>,
}

impl Scenario {
    /// Catalog slots without a title are reserved but not yet written.
    pub fn is_placeholder(&self) -> bool {
        self.title.trim().is_empty()
    }

    fn placeholder(id: u32) -> Self {
        Self {
            id,
            title: String::new(),
            subtitle: String::new(),
            description: String::new(),
            goal: String::new(),
            visitor_profile: None,
        }
    }
}

/// Read-only list of scenarios offered on the selection screen.
#[derive(Debug, Clone)]
pub struct ScenarioCatalog {
    scenarios: Vec<Scenario>,
}

impl ScenarioCatalog {
    pub fn new(scenarios: Vec<Scenario>) -> Self {
        Self { scenarios }
    }

    /// The shipped catalog: nine slots, the first fully written.
    pub fn builtin() -> Self {
        let mut scenarios = vec![Scenario {
            id: 1,
            title: "失恋导致人际关系受挫".to_string(),
            subtitle: "情绪低落、焦虑、逃避".to_string(),
            description: String::new(),
            goal: "目标: 建立专业帮助关系，通过倾听和提问，展现以来访者为中心的态度，在互动中建立初步连接"
                .to_string(),
            visitor_profile: Some(VisitorProfile {
                name: "小妍（大学生，20岁）".to_string(),
                age: "20岁".to_string(),
                problem: "睡眠质量差，人际关系困扰".to_string(),
                defense: "高阻抗/高度理性化。她倾向于否认情绪，将心理痛苦归因于外部琐事或生理不适。"
                    .to_string(),
                training_goal: "面对一位极力维持\"表面平静\"的来访者，请尝试突破她的逻辑防御，建立安全信任的咨访同盟，引导她从\"抱怨室友\"转向\"自我觉察\"。"
                    .to_string(),
            }),
        }];
        scenarios.extend((2..=9).map(Scenario::placeholder));
        Self { scenarios }
    }

    /// Load a catalog from a JSON array of scenarios.
    pub fn from_json_str(json: &str) -> Result<Self, CommonError> {
        let scenarios: Vec<Scenario> = serde_json::from_str(json)?;
        Ok(Self { scenarios })
    }

    pub fn all(&self) -> &[Scenario] {
        &self.scenarios
    }

    /// Scenarios that can actually be practiced.
    pub fn available(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.iter().filter(|s| !s.is_placeholder())
    }

    pub fn get(&self, id: u32) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.id == id)
    }

    /// Pick a scenario for a practice session.
    pub fn select(&self, id: u32) -> Result<Scenario, CommonError> {
        self.get(id).cloned().ok_or(CommonError::UnknownScenario(id))
    }
}

impl Default for ScenarioCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}
