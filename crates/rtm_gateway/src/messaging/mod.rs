//! Client command parsing and routing.
//!
//! This module classifies inbound frames and dispatches them to the
//! authenticator, the application-level ping handler, or the bus.

pub mod router;
pub mod types;

pub use router::{CommandRouter, Rejection, RouteOutcome};
pub use types::{Command, RelayCommand, PONG_FRAME};
