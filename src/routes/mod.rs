use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::error::AppError;
use crate::market::CommandOutput;
use crate::state::AppState;

/// Unwrap the one `CommandOutput` variant a handler expects.
macro_rules! expect_output {
    ($output:expr, $variant:pat => $value:expr) => {
        match $output {
            $variant => $value,
            other => return Err(crate::routes::unexpected_output(&other)),
        }
    };
}

pub mod board;
pub mod home;
pub mod posts;
pub mod threads;

pub(crate) fn unexpected_output(output: &CommandOutput) -> AppError {
    AppError::Internal(format!("Unexpected command output: {:?}", output))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(home::index))
        .merge(board::router())
        .merge(posts::router())
        .merge(threads::router())
}

/// The full application with request tracing, ready to serve.
pub fn app(state: AppState) -> Router {
    router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
