use askama::Template;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::extractors::{CurrentUser, TypedForm};
use crate::market::{Command, CommandOutput, Post, PostListing, SearchForm, UserId};
use crate::routes::home::Html;
use crate::state::AppState;

/// Flattened post for templates.
pub struct PostCard {
    pub id: i64,
    pub title: String,
    pub author: String,
    pub isbn: String,
    pub edition: i64,
    pub price: i64,
    pub description: String,
    pub post_type: &'static str,
    pub seller_name: String,
    pub date_posted: String,
    pub image: String,
    pub score: String,
    pub sold: bool,
    pub bookmarked: bool,
    pub mine: bool,
}

impl PostCard {
    pub fn new(post: &Post, viewer: &UserId, bookmarked: bool, score: Option<f64>) -> Self {
        Self {
            id: post.id.get(),
            title: post.title.clone(),
            author: post.author.clone(),
            isbn: post.isbn.clone(),
            edition: post.edition,
            price: post.price,
            description: post.description.clone(),
            post_type: post.post_type.as_str(),
            seller_name: post.seller_name.clone(),
            date_posted: post.date_posted.format("%b %-d, %Y").to_string(),
            image: post.image.clone().unwrap_or_default(),
            score: score.map(|s| format!("{:.2}", s)).unwrap_or_default(),
            sold: post.is_sold(),
            bookmarked,
            mine: post.is_owned_by(viewer),
        }
    }

    pub fn from_listings(listings: &[PostListing], viewer: &UserId) -> Vec<Self> {
        listings
            .iter()
            .map(|l| Self::new(&l.post, viewer, l.bookmarked, l.score))
            .collect()
    }
}

#[derive(Template)]
#[template(path = "components/post_list.html")]
pub struct PostListTemplate {
    pub posts: Vec<PostCard>,
    pub empty_message: &'static str,
}

#[derive(Serialize)]
struct SearchResponse {
    results: String,
    count: usize,
}

async fn listing(
    state: &AppState,
    user: &CurrentUser,
    command: Command,
) -> AppResult<Vec<PostListing>> {
    let output = state.market.execute(&user.id, command, Utc::now()).await?;
    Ok(expect_output!(output, CommandOutput::Listings(listings) => listings))
}

/// Tradeboard fragment
async fn board(State(state): State<AppState>, user: CurrentUser) -> AppResult<impl IntoResponse> {
    let listings = listing(&state, &user, Command::Tradeboard).await?;
    Ok(Html(PostListTemplate {
        posts: PostCard::from_listings(&listings, &user.id),
        empty_message: "Nothing for sale right now.",
    }))
}

/// Run a search and return the rendered results with a count
async fn search(
    State(state): State<AppState>,
    user: CurrentUser,
    TypedForm(form): TypedForm<SearchForm>,
) -> AppResult<impl IntoResponse> {
    let listings = listing(&state, &user, Command::SearchPosts(form)).await?;

    let results = PostListTemplate {
        posts: PostCard::from_listings(&listings, &user.id),
        empty_message: "No posts match your search.",
    }
    .render()
    .map_err(|e| AppError::Internal(format!("Template render error: {}", e)))?;

    Ok(Json(SearchResponse {
        results,
        count: listings.len(),
    }))
}

/// The viewer's own posts still for sale
async fn selling(State(state): State<AppState>, user: CurrentUser) -> AppResult<impl IntoResponse> {
    let listings = listing(&state, &user, Command::SellList).await?;
    Ok(Html(PostListTemplate {
        posts: PostCard::from_listings(&listings, &user.id),
        empty_message: "You have no posts for sale.",
    }))
}

async fn bookmarks(
    State(state): State<AppState>,
    user: CurrentUser,
) -> AppResult<impl IntoResponse> {
    let listings = listing(&state, &user, Command::BookmarkedPosts).await?;
    Ok(Html(PostListTemplate {
        posts: PostCard::from_listings(&listings, &user.id),
        empty_message: "You have not bookmarked anything yet.",
    }))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/board", get(board))
        .route("/board/search", post(search))
        .route("/board/selling", get(selling))
        .route("/board/bookmarks", get(bookmarks))
}
