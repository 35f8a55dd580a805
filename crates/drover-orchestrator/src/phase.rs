//! Pure state machine for the agent loop
//!
//! `transition(state, event) -> (state, actions)` with no I/O. The executor
//! feeds it round boundaries and outcomes and carries out the actions it
//! returns: injected messages, progress notifications and the final stop.
//!
//! Terminal phases ignore further events; this function never panics.

use drover_core::{LoopPhase, StopReason};

/// Budget parameters fixed for one task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub max_rounds: usize,
    pub wind_down_buffer: usize,
    pub exploration_rounds: usize,
    pub progress_every: usize,
}

impl Budget {
    /// Rounds remaining, counting `round` itself
    pub fn rounds_left(&self, round: usize) -> usize {
        (self.max_rounds + 1).saturating_sub(round)
    }

    /// Suggested verification allowance (about 20% of the budget)
    pub fn verification_rounds(&self) -> usize {
        (self.max_rounds / 5).max(1)
    }

    /// Rounds left for implementation after exploring and verifying
    pub fn implementation_rounds(&self) -> usize {
        self.max_rounds
            .saturating_sub(self.exploration_rounds)
            .saturating_sub(self.verification_rounds())
    }
}

/// Loop state for one task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopState {
    pub phase: LoopPhase,
    pub budget: Budget,
    /// Last round started (0 before the first)
    pub round: usize,
    pub wound_down: bool,
    pub pause_requested: bool,
}

impl LoopState {
    pub fn new(budget: Budget) -> Self {
        Self {
            phase: LoopPhase::Exploring,
            budget,
            round: 0,
            wound_down: false,
            pause_requested: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.phase.is_terminal()
    }
}

/// Inputs from the executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A new round is about to call the model
    RoundStarted { round: usize },
    /// The round's tool calls ran
    ToolsExecuted { wrote_files: bool, ran_verification: bool },
    /// The model answered without tool calls
    TerminalMessage,
    /// The last round finished with tool calls still pending
    BudgetExhausted,
    /// The model provider failed
    ModelFailed { message: String },
    /// An external stop was observed between rounds
    StopRequested,
}

/// Side effects for the executor to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Tell the model to wrap up and summarize
    InjectWindDown { rounds_left: usize },
    /// Demand a pause report: done, remaining, next steps
    DemandPauseReport,
    /// Send a progress notification
    EmitProgress,
    /// Build a summary from the change log because the model gave none
    SynthesizeSummary,
    /// Stop the loop
    Finish { reason: StopReason, paused: bool },
    LogActivity { message: String },
}

/// Pure transition function
pub fn transition(state: LoopState, event: Event) -> (LoopState, Vec<Action>) {
    if state.phase.is_terminal() {
        return (state, vec![]);
    }

    match event {
        Event::RoundStarted { round } => {
            let mut next = state;
            next.round = round;
            let mut actions = Vec::new();

            // A buffer of 1 lands on the final round: both messages go out together
            let rounds_left = next.budget.rounds_left(round);
            if rounds_left == next.budget.wind_down_buffer
                && next.budget.wind_down_buffer > 0
                && !next.wound_down
            {
                next.wound_down = true;
                next.phase = LoopPhase::Summarizing;
                actions.push(Action::InjectWindDown { rounds_left });
            }
            if rounds_left <= 1 {
                next.pause_requested = true;
                next.phase = LoopPhase::Summarizing;
                actions.push(Action::DemandPauseReport);
            }

            let every = next.budget.progress_every.max(1);
            if round == 1 || round % every == 0 {
                actions.push(Action::EmitProgress);
            }

            (next, actions)
        }

        Event::ToolsExecuted {
            wrote_files,
            ran_verification,
        } => {
            let mut next = state;
            next.phase = match next.phase {
                LoopPhase::Exploring
                    if wrote_files || next.round >= next.budget.exploration_rounds =>
                {
                    if ran_verification && wrote_files {
                        LoopPhase::Verifying
                    } else {
                        LoopPhase::Implementing
                    }
                }
                LoopPhase::Implementing if ran_verification => LoopPhase::Verifying,
                LoopPhase::Verifying if wrote_files && !ran_verification => {
                    LoopPhase::Implementing
                }
                phase => phase,
            };
            (next, vec![])
        }

        Event::TerminalMessage => {
            let mut next = state;
            let (phase, reason, paused) = if next.pause_requested {
                (LoopPhase::Paused, StopReason::PauseReport, true)
            } else {
                (LoopPhase::Completed, StopReason::Finished, false)
            };
            next.phase = phase;
            (next, vec![Action::Finish { reason, paused }])
        }

        Event::BudgetExhausted => {
            let mut next = state;
            next.phase = LoopPhase::Paused;
            let actions = vec![
                Action::LogActivity {
                    message: format!("Budget of {} rounds exhausted", next.budget.max_rounds),
                },
                Action::SynthesizeSummary,
                Action::Finish {
                    reason: StopReason::BudgetExhausted,
                    paused: true,
                },
            ];
            (next, actions)
        }

        Event::ModelFailed { message } => {
            let mut next = state;
            next.phase = LoopPhase::Paused;
            let actions = vec![
                Action::LogActivity {
                    message: format!("Model error: {}", message),
                },
                Action::SynthesizeSummary,
                Action::Finish {
                    reason: StopReason::ModelError,
                    paused: true,
                },
            ];
            (next, actions)
        }

        Event::StopRequested => {
            let mut next = state;
            next.phase = LoopPhase::Paused;
            let actions = vec![
                Action::SynthesizeSummary,
                Action::Finish {
                    reason: StopReason::Stopped,
                    paused: true,
                },
            ];
            (next, actions)
        }
    }
}
