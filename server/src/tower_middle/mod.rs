/// Tower middleware module
///
/// This module contains the Tower layers wrapped around the router:
/// - access guard (session resolution + route policy + cookie relay)
/// - request timeout
pub mod access_guard;
pub mod tower_timeout_handler;

pub use access_guard::{AccessGuard, AccessGuardLayer, CurrentSession};
pub use tower_timeout_handler::{TimeoutLayer, TimeoutService};
