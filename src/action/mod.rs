// action/mod.rs - Tick-driven actions
//
//! Actions are the unit of work an agent performs once per simulation tick.
//!
//! Every action follows the same lifecycle:
//!
//! ```text
//! Initial ──check_preconditions──> PreconditionsMet ──apply──> Intermediate ─┐
//!    │                                                            ▲          │ apply
//!    └──────────────────────────> PreconditionsFailed             └──────────┘
//!                                                    apply ──> Completed | Aborted | Failed
//! ```
//!
//! `Completed`, `Aborted` and `Failed` end the activation. The owner must call
//! [`Action::reset`] before the action can run again.
//!
//! Implementors provide [`Action::perform`] (one bounded unit of work) and
//! optionally [`Action::evaluate_preconditions`]; the lifecycle bookkeeping
//! lives in the provided methods and in [`ActionCore`].

mod state_machine;

pub use state_machine::{InterruptibleAction, StateKey, StateMachine, Transition};

use crate::context::{AgentContext, DeliveryError};
use crate::message::Tick;
use crate::protocol::SessionError;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use tracing::{debug, trace, warn};

/// Outcome of an action for the current activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionState {
    /// Not evaluated since the last reset
    Initial,
    PreconditionsMet,
    PreconditionsFailed,
    /// Work in progress; resumes on the next tick
    Intermediate,
    Completed,
    Aborted,
    Failed,
}

impl ActionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionState::Initial => "initial",
            ActionState::PreconditionsMet => "preconditions_met",
            ActionState::PreconditionsFailed => "preconditions_failed",
            ActionState::Intermediate => "intermediate",
            ActionState::Completed => "completed",
            ActionState::Aborted => "aborted",
            ActionState::Failed => "failed",
        }
    }

    /// States in which `apply` does work
    pub fn is_runnable(&self) -> bool {
        matches!(self, ActionState::PreconditionsMet | ActionState::Intermediate)
    }

    /// End of the current activation
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ActionState::Completed | ActionState::Aborted | ActionState::Failed
        )
    }

    /// States `perform` may report
    fn is_work_outcome(&self) -> bool {
        matches!(self, ActionState::Intermediate) || self.is_terminal()
    }
}

impl fmt::Display for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Contract violations. These are caller or implementor defects, never
/// ordinary protocol outcomes.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ActionError {
    #[error("action '{action}': preconditions checked in state {state}, expected initial")]
    PreconditionsOutOfOrder { action: String, state: ActionState },

    #[error("action '{action}': work reported non-work state {state}")]
    InvalidOutcome { action: String, state: ActionState },

    #[error("action '{action}': no handler for state key '{key}'")]
    UnhandledState { action: String, key: String },

    #[error("action '{action}': illegal transition from '{from}' to '{to}'")]
    IllegalTransition {
        action: String,
        from: String,
        to: String,
    },

    #[error("action '{action}': {source}")]
    Session {
        action: String,
        #[source]
        source: SessionError,
    },

    #[error("action '{action}': {source}")]
    Delivery {
        action: String,
        #[source]
        source: DeliveryError,
    },
}

/// Lifecycle bookkeeping shared by every action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCore {
    name: String,
    state: ActionState,
    completion_count: u64,
    last_completion_tick: Option<Tick>,
    last_applied_tick: Option<Tick>,
}

impl ActionCore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: ActionState::Initial,
            completion_count: 0,
            last_completion_tick: None,
            last_applied_tick: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ActionState {
        self.state
    }

    pub fn completion_count(&self) -> u64 {
        self.completion_count
    }

    pub fn last_completion_tick(&self) -> Option<Tick> {
        self.last_completion_tick
    }

    pub fn last_applied_tick(&self) -> Option<Tick> {
        self.last_applied_tick
    }

    fn record_outcome(&mut self, state: ActionState, tick: Tick) {
        if state == ActionState::Completed {
            self.completion_count += 1;
            self.last_completion_tick = Some(tick);
        }
        self.state = state;
    }

    /// Keeps the applied-tick guard: at most one `apply` per tick, across resets
    fn reset(&mut self) {
        self.state = ActionState::Initial;
    }

    fn full_reset(&mut self) {
        self.reset();
        self.completion_count = 0;
        self.last_completion_tick = None;
    }
}

/// An agent action driven once per tick by its owner.
pub trait Action: Send + fmt::Debug {
    fn core(&self) -> &ActionCore;

    fn core_mut(&mut self) -> &mut ActionCore;

    /// Decide whether this activation should run. Called once per activation.
    fn evaluate_preconditions(&mut self, _ctx: &dyn AgentContext) -> bool {
        true
    }

    /// One tick of work. Must report `Intermediate` or a terminal state.
    fn perform(&mut self, ctx: &mut dyn AgentContext) -> Result<ActionState, ActionError>;

    /// Clear implementation state for a fresh activation
    fn on_reset(&mut self) {}

    fn as_any(&self) -> &dyn Any;

    /// Protocol-specific end key of the last finished activation, if any
    fn end_label(&self) -> Option<String> {
        None
    }

    fn name(&self) -> &str {
        self.core().name()
    }

    fn state(&self) -> ActionState {
        self.core().state()
    }

    /// Successful completions since the last full reset
    fn completion_count(&self) -> u64 {
        self.core().completion_count()
    }

    fn last_completion_tick(&self) -> Option<Tick> {
        self.core().last_completion_tick()
    }

    fn check_preconditions(&mut self, ctx: &dyn AgentContext) -> Result<ActionState, ActionError> {
        let state = self.state();
        if state != ActionState::Initial {
            return Err(ActionError::PreconditionsOutOfOrder {
                action: self.name().to_string(),
                state,
            });
        }

        let next = if self.evaluate_preconditions(ctx) {
            ActionState::PreconditionsMet
        } else {
            ActionState::PreconditionsFailed
        };
        trace!(action = %self.name(), agent = %ctx.agent_id(), state = %next, "Preconditions evaluated");
        self.core_mut().state = next;
        Ok(next)
    }

    /// Run exactly one tick's worth of work.
    ///
    /// Outside `PreconditionsMet`/`Intermediate`, and on a second call within
    /// the same tick, this is a no-op returning the current state.
    fn apply(&mut self, ctx: &mut dyn AgentContext) -> Result<ActionState, ActionError> {
        let state = self.state();
        if !state.is_runnable() {
            return Ok(state);
        }

        let tick = ctx.current_tick();
        if self.core().last_applied_tick == Some(tick) {
            trace!(action = %self.name(), tick, "Already applied this tick");
            return Ok(state);
        }
        self.core_mut().last_applied_tick = Some(tick);

        let span = tracing::debug_span!("action", name = %self.name(), agent = %ctx.agent_id(), tick);
        let _enter = span.enter();

        let next = match self.perform(ctx) {
            Ok(next) if next.is_work_outcome() => next,
            Ok(next) => {
                let err = ActionError::InvalidOutcome {
                    action: self.name().to_string(),
                    state: next,
                };
                return Err(mark_failed(self, err));
            }
            Err(err) => return Err(mark_failed(self, err)),
        };

        if next != state {
            debug!(from = %state, to = %next, "Action state changed");
        }
        self.core_mut().record_outcome(next, tick);
        Ok(next)
    }

    /// Back to `Initial` for a fresh activation; keeps the completion count
    fn reset(&mut self) {
        self.core_mut().reset();
        self.on_reset();
    }

    /// Reset and forget completion history
    fn full_reset(&mut self) {
        self.core_mut().full_reset();
        self.on_reset();
    }
}

/// A contract violation ends the activation as `Failed`; `apply` is a no-op
/// until the owner resets.
fn mark_failed<A: Action + ?Sized>(action: &mut A, err: ActionError) -> ActionError {
    warn!(action = %action.name(), error = %err, "Action failed");
    action.core_mut().state = ActionState::Failed;
    err
}

type WorkFn = Box<dyn FnMut(&mut dyn AgentContext) -> ActionState + Send>;
type GuardFn = Box<dyn FnMut(&dyn AgentContext) -> bool + Send>;

/// Closure-backed action for simple behaviours
pub struct FnAction {
    core: ActionCore,
    guard: Option<GuardFn>,
    work: WorkFn,
}

impl FnAction {
    pub fn new<F>(name: impl Into<String>, work: F) -> Self
    where
        F: FnMut(&mut dyn AgentContext) -> ActionState + Send + 'static,
    {
        Self {
            core: ActionCore::new(name),
            guard: None,
            work: Box::new(work),
        }
    }

    /// Finishes on its first tick
    pub fn one_shot<F>(name: impl Into<String>, mut work: F) -> Self
    where
        F: FnMut(&mut dyn AgentContext) + Send + 'static,
    {
        Self::new(name, move |ctx| {
            work(ctx);
            ActionState::Completed
        })
    }

    pub fn with_precondition<G>(mut self, guard: G) -> Self
    where
        G: FnMut(&dyn AgentContext) -> bool + Send + 'static,
    {
        self.guard = Some(Box::new(guard));
        self
    }
}

impl fmt::Debug for FnAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnAction")
            .field("core", &self.core)
            .field("has_guard", &self.guard.is_some())
            .finish()
    }
}

impl Action for FnAction {
    fn core(&self) -> &ActionCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ActionCore {
        &mut self.core
    }

    fn evaluate_preconditions(&mut self, ctx: &dyn AgentContext) -> bool {
        match self.guard.as_mut() {
            Some(guard) => guard(ctx),
            None => true,
        }
    }

    fn perform(&mut self, ctx: &mut dyn AgentContext) -> Result<ActionState, ActionError> {
        Ok((self.work)(ctx))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::LocalContext;

    #[test]
    fn test_one_shot_lifecycle() {
        let mut ctx = LocalContext::new("agent", 1);
        let mut action = FnAction::one_shot("once", |_| {});

        assert_eq!(action.state(), ActionState::Initial);
        assert_eq!(action.check_preconditions(&ctx).unwrap(), ActionState::PreconditionsMet);
        assert_eq!(action.apply(&mut ctx).unwrap(), ActionState::Completed);
        assert_eq!(action.completion_count(), 1);
        assert_eq!(action.last_completion_tick(), Some(1));

        // Terminal: apply is a no-op until reset
        ctx.set_tick(2);
        assert_eq!(action.apply(&mut ctx).unwrap(), ActionState::Completed);
        assert_eq!(action.completion_count(), 1);
    }

    #[test]
    fn test_preconditions_out_of_order() {
        let ctx = LocalContext::new("agent", 1);
        let mut action = FnAction::one_shot("once", |_| {});
        action.check_preconditions(&ctx).unwrap();

        let err = action.check_preconditions(&ctx).unwrap_err();
        assert!(matches!(err, ActionError::PreconditionsOutOfOrder { state: ActionState::PreconditionsMet, .. }));
    }

    #[test]
    fn test_preconditions_failed_blocks_apply() {
        let mut ctx = LocalContext::new("agent", 1);
        let mut action = FnAction::one_shot("never", |_| panic!("must not run"))
            .with_precondition(|_| false);

        assert_eq!(action.check_preconditions(&ctx).unwrap(), ActionState::PreconditionsFailed);
        assert_eq!(action.apply(&mut ctx).unwrap(), ActionState::PreconditionsFailed);
    }

    #[test]
    fn test_apply_before_preconditions_is_noop() {
        let mut ctx = LocalContext::new("agent", 1);
        let mut action = FnAction::one_shot("once", |_| panic!("must not run"));
        assert_eq!(action.apply(&mut ctx).unwrap(), ActionState::Initial);
    }

    #[test]
    fn test_at_most_once_per_tick() {
        let mut ctx = LocalContext::new("agent", 5);
        let mut runs = 0u32;
        let counter = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let seen = counter.clone();
        let mut action = FnAction::new("cyclic", move |_| {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            ActionState::Intermediate
        });

        action.check_preconditions(&ctx).unwrap();
        for _ in 0..3 {
            action.apply(&mut ctx).unwrap();
            runs += 1;
        }
        assert_eq!(runs, 3);
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 1);

        ctx.set_tick(6);
        action.apply(&mut ctx).unwrap();
        assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invalid_outcome() {
        let mut ctx = LocalContext::new("agent", 1);
        let mut action = FnAction::new("broken", |_| ActionState::PreconditionsMet);
        action.check_preconditions(&ctx).unwrap();

        let err = action.apply(&mut ctx).unwrap_err();
        assert!(matches!(err, ActionError::InvalidOutcome { .. }));
        assert_eq!(action.state(), ActionState::Failed);
    }

    #[test]
    fn test_failed_action_is_not_retried() {
        let mut ctx = LocalContext::new("agent", 1);
        let calls = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
        let seen = calls.clone();
        let mut action = FnAction::new("broken", move |_| {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            ActionState::Initial
        });
        action.check_preconditions(&ctx).unwrap();
        assert!(action.apply(&mut ctx).is_err());

        ctx.set_tick(2);
        assert_eq!(action.apply(&mut ctx).unwrap(), ActionState::Failed);
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(action.completion_count(), 0);
    }

    #[test]
    fn test_reset_keeps_completions_full_reset_clears() {
        let mut ctx = LocalContext::new("agent", 1);
        let mut action = FnAction::one_shot("once", |_| {});

        for tick in 1..=3 {
            ctx.set_tick(tick);
            action.check_preconditions(&ctx).unwrap();
            action.apply(&mut ctx).unwrap();
            action.reset();
            assert_eq!(action.state(), ActionState::Initial);
        }
        assert_eq!(action.completion_count(), 3);
        assert_eq!(action.last_completion_tick(), Some(3));

        action.full_reset();
        assert_eq!(action.completion_count(), 0);
        assert_eq!(action.last_completion_tick(), None);
    }

    #[test]
    fn test_reset_keeps_tick_guard() {
        let mut ctx = LocalContext::new("agent", 1);
        let mut action = FnAction::one_shot("once", |_| {});
        action.check_preconditions(&ctx).unwrap();
        action.apply(&mut ctx).unwrap();
        action.reset();

        action.check_preconditions(&ctx).unwrap();
        assert_eq!(action.apply(&mut ctx).unwrap(), ActionState::PreconditionsMet);
        assert_eq!(action.completion_count(), 1);

        ctx.set_tick(2);
        assert_eq!(action.apply(&mut ctx).unwrap(), ActionState::Completed);
        assert_eq!(action.completion_count(), 2);
    }
}
