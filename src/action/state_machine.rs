// action/state_machine.rs - Interruptible State Machine Executor

use super::{Action, ActionCore, ActionError, ActionState};
use crate::context::AgentContext;
use std::any::Any;
use std::fmt::{Debug, Display};
use tracing::{debug, info};

/// Closed set of phases of one protocol.
///
/// `successors` is the static adjacency table: the executor refuses any
/// handler outcome whose key is not listed for the current key. A key with
/// no successors is terminal.
pub trait StateKey: Copy + Eq + Debug + Display + Send + 'static {
    fn successors(self) -> &'static [Self];

    fn is_terminal(self) -> bool {
        self.successors().is_empty()
    }
}

/// Handler outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition<K> {
    /// Keep running; dispatch `K` on the next tick
    Next(K),
    /// Terminal success
    End(K),
    /// Terminal failure
    Fail(K),
    /// Jump back to `K` without ending the activation
    Reset(K),
}

impl<K: Copy> Transition<K> {
    pub fn key(&self) -> K {
        match *self {
            Transition::Next(k) | Transition::End(k) | Transition::Fail(k) | Transition::Reset(k) => k,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Transition::End(_) | Transition::Fail(_))
    }
}

/// Protocol logic driven by [`InterruptibleAction`].
///
/// `handle` runs exactly one phase evaluation per tick and must match on every
/// key of `Key`. Terminal keys are never dispatched by the executor; a
/// handler that is asked to run one should return
/// [`ActionError::UnhandledState`].
pub trait StateMachine: Send + Debug + 'static {
    type Key: StateKey;

    /// Key every fresh activation starts from
    const INITIAL: Self::Key;

    fn preconditions(&self, _ctx: &dyn AgentContext) -> bool {
        true
    }

    fn handle(
        &mut self,
        key: Self::Key,
        ctx: &mut dyn AgentContext,
    ) -> Result<Transition<Self::Key>, ActionError>;

    /// Return all session state to its initial value
    fn reset(&mut self);
}

/// Action that suspends a [`StateMachine`] between ticks.
///
/// Holds the current key and the terminal flag; the machine owns its own
/// counters. A terminal key stays readable through [`end_key`](Self::end_key)
/// until the owner resets the action.
#[derive(Debug)]
pub struct InterruptibleAction<M: StateMachine> {
    core: ActionCore,
    machine: M,
    current: M::Key,
    end_state_reached: bool,
}

impl<M: StateMachine> InterruptibleAction<M> {
    pub fn new(name: impl Into<String>, machine: M) -> Self {
        Self {
            core: ActionCore::new(name),
            machine,
            current: M::INITIAL,
            end_state_reached: false,
        }
    }

    pub fn current_key(&self) -> M::Key {
        self.current
    }

    /// The end or failure key of the last finished activation
    pub fn end_key(&self) -> Option<M::Key> {
        self.end_state_reached.then_some(self.current)
    }

    pub fn machine(&self) -> &M {
        &self.machine
    }

    pub fn machine_mut(&mut self) -> &mut M {
        &mut self.machine
    }

    fn check_transition(&self, from: M::Key, transition: Transition<M::Key>) -> Result<(), ActionError> {
        let to = transition.key();
        let adjacent = from.successors().contains(&to);
        let resumable = transition.is_terminal() || !to.is_terminal();
        if adjacent && resumable {
            Ok(())
        } else {
            Err(ActionError::IllegalTransition {
                action: self.core.name().to_string(),
                from: from.to_string(),
                to: format!("{:?}", transition),
            })
        }
    }
}

impl<M: StateMachine> Action for InterruptibleAction<M> {
    fn core(&self) -> &ActionCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ActionCore {
        &mut self.core
    }

    fn evaluate_preconditions(&mut self, ctx: &dyn AgentContext) -> bool {
        self.machine.preconditions(ctx)
    }

    fn perform(&mut self, ctx: &mut dyn AgentContext) -> Result<ActionState, ActionError> {
        if self.end_state_reached {
            self.current = M::INITIAL;
            self.end_state_reached = false;
        }

        let from = self.current;
        let transition = self.machine.handle(from, ctx)?;
        self.check_transition(from, transition)?;

        let to = transition.key();
        self.current = to;
        if from != to {
            debug!(from = %from, to = %to, "State transition");
        }

        let state = match transition {
            Transition::Next(_) | Transition::Reset(_) => ActionState::Intermediate,
            Transition::End(_) => ActionState::Completed,
            Transition::Fail(_) => ActionState::Aborted,
        };
        if transition.is_terminal() {
            self.end_state_reached = true;
            info!(action = %self.core.name(), key = %to, outcome = %state, "Activation finished");
        }
        Ok(state)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn end_label(&self) -> Option<String> {
        self.end_key().map(|key| key.to_string())
    }

    fn on_reset(&mut self) {
        self.current = M::INITIAL;
        self.end_state_reached = false;
        self.machine.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::LocalContext;
    use std::fmt;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Light {
        Red,
        Green,
        Broken,
        Off,
    }

    impl fmt::Display for Light {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl StateKey for Light {
        fn successors(self) -> &'static [Self] {
            match self {
                Light::Red => &[Light::Green, Light::Red],
                Light::Green => &[Light::Red, Light::Off, Light::Broken],
                Light::Broken | Light::Off => &[],
            }
        }
    }

    /// Scripted machine: returns the queued transitions in order
    #[derive(Debug, Default)]
    struct Scripted {
        script: Vec<Transition<Light>>,
        seen: Vec<Light>,
        resets: u32,
    }

    impl StateMachine for Scripted {
        type Key = Light;
        const INITIAL: Light = Light::Red;

        fn handle(&mut self, key: Light, _ctx: &mut dyn AgentContext) -> Result<Transition<Light>, ActionError> {
            self.seen.push(key);
            if key.is_terminal() {
                return Err(ActionError::UnhandledState {
                    action: "scripted".into(),
                    key: key.to_string(),
                });
            }
            Ok(self.script.remove(0))
        }

        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    fn run(script: Vec<Transition<Light>>) -> (InterruptibleAction<Scripted>, LocalContext) {
        let ctx = LocalContext::new("agent", 0);
        let machine = Scripted { script, ..Default::default() };
        (InterruptibleAction::new("light", machine), ctx)
    }

    #[test]
    fn test_resumes_across_ticks() {
        let (mut action, mut ctx) = run(vec![
            Transition::Next(Light::Green),
            Transition::Next(Light::Red),
            Transition::Next(Light::Green),
            Transition::End(Light::Off),
        ]);
        action.check_preconditions(&ctx).unwrap();

        let mut states = Vec::new();
        for tick in 1..=4 {
            ctx.set_tick(tick);
            states.push(action.apply(&mut ctx).unwrap());
        }

        assert_eq!(
            states,
            vec![
                ActionState::Intermediate,
                ActionState::Intermediate,
                ActionState::Intermediate,
                ActionState::Completed
            ]
        );
        assert_eq!(action.machine().seen, vec![Light::Red, Light::Green, Light::Red, Light::Green]);
        assert_eq!(action.end_key(), Some(Light::Off));
        assert_eq!(action.completion_count(), 1);
    }

    #[test]
    fn test_failure_maps_to_aborted() {
        let (mut action, mut ctx) = run(vec![Transition::Next(Light::Green), Transition::Fail(Light::Broken)]);
        action.check_preconditions(&ctx).unwrap();
        ctx.set_tick(1);
        action.apply(&mut ctx).unwrap();
        ctx.set_tick(2);
        assert_eq!(action.apply(&mut ctx).unwrap(), ActionState::Aborted);
        assert_eq!(action.end_key(), Some(Light::Broken));
        assert_eq!(action.completion_count(), 0);
    }

    #[test]
    fn test_reset_transition_stays_active() {
        let (mut action, mut ctx) = run(vec![Transition::Next(Light::Green), Transition::Reset(Light::Red)]);
        action.check_preconditions(&ctx).unwrap();
        ctx.set_tick(1);
        action.apply(&mut ctx).unwrap();
        ctx.set_tick(2);
        assert_eq!(action.apply(&mut ctx).unwrap(), ActionState::Intermediate);
        assert_eq!(action.current_key(), Light::Red);
        assert_eq!(action.end_key(), None);
    }

    #[test]
    fn test_illegal_transition_is_fatal() {
        // Red cannot jump straight to Off
        let (mut action, mut ctx) = run(vec![Transition::End(Light::Off)]);
        action.check_preconditions(&ctx).unwrap();
        ctx.set_tick(1);
        let err = action.apply(&mut ctx).unwrap_err();
        assert!(matches!(err, ActionError::IllegalTransition { .. }));
        assert_eq!(action.state(), ActionState::Failed);

        // the handler is not dispatched again
        ctx.set_tick(2);
        assert_eq!(action.apply(&mut ctx).unwrap(), ActionState::Failed);
        assert_eq!(action.machine().seen, vec![Light::Red]);
        assert_eq!(action.end_key(), None);
    }

    #[test]
    fn test_next_into_terminal_is_fatal() {
        let (mut action, mut ctx) = run(vec![Transition::Next(Light::Green), Transition::Next(Light::Off)]);
        action.check_preconditions(&ctx).unwrap();
        ctx.set_tick(1);
        action.apply(&mut ctx).unwrap();
        ctx.set_tick(2);
        assert!(action.apply(&mut ctx).is_err());
    }

    #[test]
    fn test_reset_mid_run_restarts_from_initial() {
        let (mut action, mut ctx) = run(vec![
            Transition::Next(Light::Green),
            Transition::Next(Light::Red),
        ]);
        action.check_preconditions(&ctx).unwrap();
        ctx.set_tick(1);
        action.apply(&mut ctx).unwrap();
        assert_eq!(action.current_key(), Light::Green);

        action.reset();
        assert_eq!(action.state(), ActionState::Initial);
        assert_eq!(action.current_key(), Light::Red);
        assert_eq!(action.machine().resets, 1);

        action.check_preconditions(&ctx).unwrap();
        ctx.set_tick(2);
        action.apply(&mut ctx).unwrap();
        assert_eq!(action.machine().seen, vec![Light::Red, Light::Red]);
    }
}
