pub mod access;
pub mod claims;
pub mod json_error;
pub mod login;
pub mod server_config;
pub mod session;

pub use self::access::{AccessDecision, RouteClass};
pub use self::claims::AccessClaims;
pub use self::json_error::{ErrorResponse, SuccessResponse};
pub use self::login::{LoginData, LoginError};
pub use self::session::{Role, Session};
