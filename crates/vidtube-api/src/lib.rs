pub mod auth;
pub mod channels;
pub mod error;
pub mod form;
pub mod middleware;
pub mod password;
pub mod profile;
pub mod routes;
pub mod state;
pub mod sweeper;
pub mod tokens;

pub use error::ApiError;
pub use routes::router;
pub use state::{AppState, AppStateInner};
