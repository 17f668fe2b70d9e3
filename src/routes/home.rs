use askama::Template;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;

use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::market::{Command, CommandOutput};
use crate::routes::board::PostCard;
use crate::state::AppState;

#[derive(Template)]
#[template(path = "pages/board.html")]
pub struct BoardPageTemplate {
    pub username: String,
    pub posts: Vec<PostCard>,
    pub empty_message: &'static str,
}

/// Wrapper to render askama templates as axum responses
pub struct Html<T: Template>(pub T);

impl<T: Template> IntoResponse for Html<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!("Template render error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
            }
        }
    }
}

/// Tradeboard page: other sellers' open posts plus the search form
pub async fn index(State(state): State<AppState>, user: CurrentUser) -> AppResult<Response> {
    let output = state
        .market
        .execute(&user.id, Command::Tradeboard, Utc::now())
        .await?;
    let listings = expect_output!(output, CommandOutput::Listings(listings) => listings);

    Ok(Html(BoardPageTemplate {
        username: user.username,
        posts: PostCard::from_listings(&listings, &user.id),
        empty_message: "Nothing for sale right now.",
    })
    .into_response())
}
