//! Finite state machine for the Elasticsearch lifecycle
//!
//! The phase stored on the resource only ever moves forward:
//! `Unreconciled -> Creating -> (Initializing ->) Running`. Deleting the
//! resource moves it to `Dormant`, which is represented by a DormantDatabase
//! rather than a phase on the resource itself.

use std::fmt;

use crate::crd::DatabasePhase;

/// Lifecycle states, including the ones that have no stored phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// No phase recorded yet
    Unreconciled,
    Creating,
    Initializing,
    Running,
    /// Resource deleted and preserved as a DormantDatabase
    Dormant,
}

impl From<Option<DatabasePhase>> for LifecycleState {
    fn from(phase: Option<DatabasePhase>) -> Self {
        match phase {
            None => LifecycleState::Unreconciled,
            Some(DatabasePhase::Creating) => LifecycleState::Creating,
            Some(DatabasePhase::Initializing) => LifecycleState::Initializing,
            Some(DatabasePhase::Running) => LifecycleState::Running,
        }
    }
}

impl LifecycleState {
    /// Phase persisted on the resource for this state
    pub fn phase(&self) -> Option<DatabasePhase> {
        match self {
            LifecycleState::Creating => Some(DatabasePhase::Creating),
            LifecycleState::Initializing => Some(DatabasePhase::Initializing),
            LifecycleState::Running => Some(DatabasePhase::Running),
            LifecycleState::Unreconciled | LifecycleState::Dormant => None,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleState::Unreconciled => write!(f, "Unreconciled"),
            LifecycleState::Creating => write!(f, "Creating"),
            LifecycleState::Initializing => write!(f, "Initializing"),
            LifecycleState::Running => write!(f, "Running"),
            LifecycleState::Dormant => write!(f, "Dormant"),
        }
    }
}

/// Events that move an instance through its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// The operator picked the resource up and stamped its creation time
    Stamped,
    /// A restore from a snapshot is about to start
    InitializationStarted,
    /// Workloads are up (and initialization, if any, has finished)
    Started,
    /// The resource was deleted and converted into a DormantDatabase
    Paused,
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LifecycleEvent::Stamped => write!(f, "Stamped"),
            LifecycleEvent::InitializationStarted => write!(f, "InitializationStarted"),
            LifecycleEvent::Started => write!(f, "Started"),
            LifecycleEvent::Paused => write!(f, "Paused"),
        }
    }
}

/// Facts the guards look at
#[derive(Debug, Clone, Default)]
pub struct TransitionContext {
    /// Whether the spec requests initialization from a snapshot
    pub has_snapshot_source: bool,
}

/// A state transition definition
#[derive(Debug)]
pub struct Transition {
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub event: LifecycleEvent,
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: LifecycleState,
        to: LifecycleState,
        event: LifecycleEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug)]
pub enum TransitionResult {
    Success {
        from: LifecycleState,
        to: LifecycleState,
        event: LifecycleEvent,
        description: &'static str,
    },
    InvalidTransition {
        current: LifecycleState,
        event: LifecycleEvent,
    },
    GuardFailed {
        from: LifecycleState,
        to: LifecycleState,
        event: LifecycleEvent,
        reason: String,
    },
}

impl TransitionResult {
    /// Target state of a successful transition
    pub fn target(&self) -> Option<LifecycleState> {
        match self {
            TransitionResult::Success { to, .. } => Some(*to),
            _ => None,
        }
    }
}

/// Lifecycle state machine
pub struct LifecycleStateMachine {
    transitions: Vec<Transition>,
}

impl Default for LifecycleStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleStateMachine {
    pub fn new() -> Self {
        use LifecycleEvent as E;
        use LifecycleState as S;

        Self {
            transitions: vec![
                Transition::new(S::Unreconciled, S::Creating, E::Stamped, "Resource picked up"),
                Transition::new(
                    S::Creating,
                    S::Initializing,
                    E::InitializationStarted,
                    "Restoring data from snapshot",
                ),
                Transition::new(S::Creating, S::Running, E::Started, "Database is running"),
                Transition::new(
                    S::Initializing,
                    S::Running,
                    E::Started,
                    "Initialization finished, database is running",
                ),
                // Deletion pauses from any live state
                Transition::new(S::Unreconciled, S::Dormant, E::Paused, "Paused before creation"),
                Transition::new(S::Creating, S::Dormant, E::Paused, "Paused while creating"),
                Transition::new(
                    S::Initializing,
                    S::Dormant,
                    E::Paused,
                    "Paused while initializing",
                ),
                Transition::new(S::Running, S::Dormant, E::Paused, "Paused"),
            ],
        }
    }

    /// Attempt to transition to a new state based on an event
    pub fn transition(
        &self,
        current: LifecycleState,
        event: LifecycleEvent,
        ctx: &TransitionContext,
    ) -> TransitionResult {
        let transition = self
            .transitions
            .iter()
            .find(|t| t.from == current && t.event == event);

        match transition {
            Some(t) => match self.check_guard(t, ctx) {
                Some(reason) => TransitionResult::GuardFailed {
                    from: t.from,
                    to: t.to,
                    event,
                    reason,
                },
                None => TransitionResult::Success {
                    from: t.from,
                    to: t.to,
                    event,
                    description: t.description,
                },
            },
            None => TransitionResult::InvalidTransition { current, event },
        }
    }

    /// Check if a transition exists (ignoring guards)
    pub fn can_transition(&self, from: LifecycleState, event: &LifecycleEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == from && t.event == *event)
    }

    pub fn valid_events(&self, state: LifecycleState) -> Vec<&LifecycleEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == state)
            .map(|t| &t.event)
            .collect()
    }

    fn check_guard(&self, transition: &Transition, ctx: &TransitionContext) -> Option<String> {
        match transition.event {
            LifecycleEvent::InitializationStarted if !ctx.has_snapshot_source => {
                Some("no snapshot source configured".to_string())
            }
            _ => None,
        }
    }
}
