pub mod routes;

pub use routes::{AppState, AuthenticatedUser, ImamUser, OptionalAuthenticatedUser};
