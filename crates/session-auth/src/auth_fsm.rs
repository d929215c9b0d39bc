//! Session state machine using rust-fsm.
//!
//! ## State Diagram
//!
//! ```text
//! ┌─────────────────┐   CheckStarted    ┌─────────────────┐
//! │ Unauthenticated │ ────────────────► │    Checking     │
//! └─────────────────┘                   └────────┬────────┘
//!        ▲    ▲                                  │
//!        │    │ Rejected / SignedOut             │ Verified
//!        │    └──────────────────────────────────┤
//!        │                                       ▼
//!        │        SignedOut             ┌─────────────────┐
//!        └───────────────────────────── │  Authenticated  │
//!                                       └─────────────────┘
//! ```
//!
//! `LoginSucceeded` leads to `Authenticated` from every state, and
//! `Authenticated` re-enters `Checking` on a manual re-verification.

use rust_fsm::*;
use serde::{Deserialize, Serialize};

state_machine! {
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub session_machine(Unauthenticated)

    Unauthenticated => {
        CheckStarted => Checking,
        LoginSucceeded => Authenticated,
        SignedOut => Unauthenticated
    },
    Checking => {
        Verified => Authenticated,
        Rejected => Unauthenticated,
        LoginSucceeded => Authenticated,
        SignedOut => Unauthenticated
    },
    Authenticated => {
        CheckStarted => Checking,
        LoginSucceeded => Authenticated,
        SignedOut => Unauthenticated
    }
}

pub use session_machine::Input as SessionMachineInput;
pub use session_machine::State as SessionMachineState;
pub use session_machine::StateMachine as SessionMachine;

/// Public view of the session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Unauthenticated,
    /// A stored token is being validated.
    Checking,
    Authenticated,
}

impl SessionStatus {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionStatus::Authenticated)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Unauthenticated => "unauthenticated",
            SessionStatus::Checking => "checking",
            SessionStatus::Authenticated => "authenticated",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&SessionMachineState> for SessionStatus {
    fn from(state: &SessionMachineState) -> Self {
        match state {
            SessionMachineState::Unauthenticated => SessionStatus::Unauthenticated,
            SessionMachineState::Checking => SessionStatus::Checking,
            SessionMachineState::Authenticated => SessionStatus::Authenticated,
        }
    }
}
