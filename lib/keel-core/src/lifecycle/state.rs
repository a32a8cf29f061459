use std::fmt;

use serde::{Deserialize, Serialize};

/// The lifecycle state of a managed service.
///
/// Services move forward through these states and never backwards:
///
/// ```text
/// init ──► starting ──► running ──► stopping ──► stopped
///   │          │           │           │
///   │          │           │           └──────► shutdown
///   └──────────┴───────────┴───────────┴──────► crashed
///   └─────────────────────────────────────────► stopped (never started)
/// ```
///
/// `stopped`, `shutdown`, and `crashed` are terminal. A service instance that reached a terminal state is never started
/// again: a fresh instance has to be created instead.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Constructed, and `on_init` has run, but `start` has not been called.
    Init,

    /// `on_start` and the start of child services are in progress.
    Starting,

    /// Startup completed successfully.
    Running,

    /// Teardown is in progress.
    Stopping,

    /// Teardown completed without a shutdown being requested.
    Stopped,

    /// Teardown completed, including the `on_shutdown` hook.
    Shutdown,

    /// An unrecovered failure occurred.
    Crashed,
}

impl LifecycleState {
    /// Every state, in lifecycle order.
    pub const ALL: [LifecycleState; 7] = [
        Self::Init,
        Self::Starting,
        Self::Running,
        Self::Stopping,
        Self::Stopped,
        Self::Shutdown,
        Self::Crashed,
    ];

    /// Returns the lowercase name of the state.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Shutdown => "shutdown",
            Self::Crashed => "crashed",
        }
    }

    /// Returns `true` if no further transition can happen from this state.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Shutdown | Self::Crashed)
    }

    /// Returns `true` if moving from `self` to `next` is a legal transition.
    pub const fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;

        match (*self, next) {
            (Init, Starting) | (Init, Stopped) => true,
            (Starting, Running) => true,
            (Running, Stopping) => true,
            (Stopping, Stopped) | (Stopping, Shutdown) => true,
            (Init | Starting | Running | Stopping, Crashed) => true,
            _ => false,
        }
    }

    /// Validates the transition from `self` to `next`, returning `next` if it is legal.
    ///
    /// # Errors
    ///
    /// If the transition is not legal, an error is returned and the state must not be changed.
    pub const fn transition_to(self, next: LifecycleState) -> Result<LifecycleState, IllegalTransition> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(IllegalTransition { from: self, to: next })
        }
    }

    pub(crate) const fn ordinal(&self) -> usize {
        match self {
            Self::Init => 0,
            Self::Starting => 1,
            Self::Running => 2,
            Self::Stopping => 3,
            Self::Stopped => 4,
            Self::Shutdown => 5,
            Self::Crashed => 6,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An attempted lifecycle transition that the state machine does not allow.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct IllegalTransition {
    /// State the service was in.
    pub from: LifecycleState,

    /// State the service was asked to move to.
    pub to: LifecycleState,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal lifecycle transition from '{}' to '{}'", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}
