use askama::Template;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::error::AppResult;
use crate::extractors::{CurrentUser, TypedForm};
use crate::market::{Command, CommandOutput, PostForm, PostId};
use crate::routes::board::PostCard;
use crate::routes::home::Html;
use crate::state::AppState;

#[derive(Template)]
#[template(path = "components/post_card.html")]
struct PostCardTemplate {
    post: PostCard,
}

#[derive(Serialize)]
struct BookmarkResponse {
    bookmarked: bool,
    post_id: i64,
}

async fn run(state: &AppState, user: &CurrentUser, command: Command) -> AppResult<CommandOutput> {
    Ok(state.market.execute(&user.id, command, Utc::now()).await?)
}

async fn post_card(
    state: &AppState,
    user: &CurrentUser,
    command: Command,
) -> AppResult<Html<PostCardTemplate>> {
    let output = run(state, user, command).await?;
    let post = expect_output!(output, CommandOutput::Post(post) => post);
    Ok(Html(PostCardTemplate {
        post: PostCard::new(&post, &user.id, false, None),
    }))
}

async fn create(
    State(state): State<AppState>,
    user: CurrentUser,
    TypedForm(form): TypedForm<PostForm>,
) -> AppResult<Response> {
    let card = post_card(&state, &user, Command::CreatePost(form)).await?;
    Ok((StatusCode::CREATED, card).into_response())
}

async fn edit(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    TypedForm(form): TypedForm<PostForm>,
) -> AppResult<impl IntoResponse> {
    let command = Command::EditPost {
        post: PostId(id),
        form,
    };
    post_card(&state, &user, command).await
}

async fn delete(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<StatusCode> {
    let output = run(&state, &user, Command::DeletePost(PostId(id))).await?;
    expect_output!(output, CommandOutput::Deleted(_) => ());
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_sold(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    post_card(&state, &user, Command::MarkSold(PostId(id))).await
}

async fn toggle_bookmark(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Json<BookmarkResponse>> {
    let output = run(&state, &user, Command::ToggleBookmark(PostId(id))).await?;
    let (post, bookmarked) = expect_output!(
        output,
        CommandOutput::Bookmark { post, bookmarked } => (post, bookmarked)
    );
    Ok(Json(BookmarkResponse {
        bookmarked,
        post_id: post.get(),
    }))
}

/// Open (or reuse) the viewer's thread with the seller and go there
async fn open_thread(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<Redirect> {
    let output = run(&state, &user, Command::OpenThread(PostId(id))).await?;
    let thread = expect_output!(output, CommandOutput::Thread(thread) => thread);
    Ok(Redirect::to(&format!("/threads/{}", thread.id)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/posts", post(create))
        .route("/posts/{id}", post(edit).delete(delete))
        .route("/posts/{id}/sold", post(mark_sold))
        .route("/posts/{id}/bookmark", post(toggle_bookmark))
        .route("/posts/{id}/thread", post(open_thread))
}
