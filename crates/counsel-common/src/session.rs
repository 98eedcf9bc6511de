/// Screen-level state machine of the practice app.
///
/// `login -> scenario-selection -> chat -> report`, driven one event at a time
/// by UI callbacks. `AppState` is an immutable record: `apply` consumes it and
/// returns the next state. No transition fails; an event with no edge from
/// the current screen leaves the state as it was.
use tracing::debug;

use crate::evaluation::{CompetencyScores, OverallEvaluation};
use crate::report::EvaluationReport;
use crate::scenario::Scenario;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Login,
    ScenarioSelection,
    Chat,
    Report,
}

impl Screen {
    pub fn as_str(self) -> &'static str {
        match self {
            Screen::Login => "login",
            Screen::ScenarioSelection => "scenario-selection",
            Screen::Chat => "chat",
            Screen::Report => "report",
        }
    }
}

/// What a finished chat hands over to the report screen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOutcome {
    pub evaluation: Option<OverallEvaluation>,
    pub competency_scores: CompetencyScores,
    pub conversation_turns: u32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum AppState {
    #[default]
    Login,
    ScenarioSelection,
    Chat {
        scenario: Scenario,
    },
    Report {
        scenario: Scenario,
        outcome: SessionOutcome,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Credentials are accepted locally without verification.
    SubmitLogin,
    Logout,
    SelectScenario(Scenario),
    /// Leave the chat or the report for the scenario list.
    BackToScenarios,
    Finish {
        evaluation: Option<OverallEvaluation>,
        competency_scores: Option<CompetencyScores>,
        conversation_turns: Option<u32>,
    },
    StartNew,
}

impl Event {
    fn name(&self) -> &'static str {
        match self {
            Event::SubmitLogin => "submit-login",
            Event::Logout => "logout",
            Event::SelectScenario(_) => "select-scenario",
            Event::BackToScenarios => "back-to-scenarios",
            Event::Finish { .. } => "finish",
            Event::StartNew => "start-new",
        }
    }
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn apply(self, event: Event) -> Self {
        match (self, event) {
            (AppState::Login, Event::SubmitLogin) => AppState::ScenarioSelection,
            (AppState::ScenarioSelection, Event::Logout) => AppState::Login,
            (AppState::ScenarioSelection, Event::SelectScenario(scenario)) => {
                AppState::Chat { scenario }
            }
            (AppState::Chat { .. }, Event::BackToScenarios)
            | (AppState::Report { .. }, Event::BackToScenarios) => AppState::ScenarioSelection,
            (
                AppState::Chat { scenario },
                Event::Finish {
                    evaluation,
                    competency_scores,
                    conversation_turns,
                },
            ) => AppState::Report {
                scenario,
                outcome: SessionOutcome {
                    evaluation,
                    competency_scores: competency_scores.unwrap_or_default(),
                    conversation_turns: conversation_turns.unwrap_or(0),
                },
            },
            (AppState::Report { scenario, .. }, Event::StartNew) => AppState::Chat { scenario },
            (state, event) => {
                debug!(
                    screen = state.screen().as_str(),
                    event = event.name(),
                    "event ignored on this screen"
                );
                state
            }
        }
    }

    pub fn screen(&self) -> Screen {
        match self {
            AppState::Login => Screen::Login,
            AppState::ScenarioSelection => Screen::ScenarioSelection,
            AppState::Chat { .. } => Screen::Chat,
            AppState::Report { .. } => Screen::Report,
        }
    }

    pub fn scenario(&self) -> Option<&Scenario> {
        match self {
            AppState::Chat { scenario } | AppState::Report { scenario, .. } => Some(scenario),
            AppState::Login | AppState::ScenarioSelection => None,
        }
    }

    pub fn outcome(&self) -> Option<&SessionOutcome> {
        match self {
            AppState::Report { outcome, .. } => Some(outcome),
            _ => None,
        }
    }

    /// The report for the current screen, if it is the report screen.
    pub fn report(&self) -> Option<EvaluationReport> {
        match self {
            AppState::Report { scenario, outcome } => Some(EvaluationReport::build(
                scenario.title.clone(),
                outcome.evaluation.as_ref(),
                &outcome.competency_scores,
                outcome.conversation_turns,
            )),
            _ => None,
        }
    }
}
