//! Authentication session for session-sync.
//!
//! [`SessionManager`] owns the token lifecycle: it loads the stored token,
//! rejects locally expired JWTs without a round trip, verifies the rest with
//! the server, and tears everything down on logout. Consumers observe it
//! through state listeners or a `watch` channel.

mod auth_fsm;
mod claims;
mod error;
mod session;
mod user;

pub use auth_fsm::{SessionMachine, SessionMachineInput, SessionMachineState, SessionStatus};
pub use claims::{decode_claims, is_jwt_shaped, ClaimsError, TokenClaims};
pub use error::{AuthError, AuthErrorKind, AuthResult};
pub use session::{ListenerId, LogoutComplete, SessionManager, SessionSnapshot};
pub use user::User;
