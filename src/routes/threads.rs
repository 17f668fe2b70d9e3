use askama::Template;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;

use crate::error::AppResult;
use crate::extractors::{CurrentUser, TypedForm};
use crate::market::domain::Role;
use crate::market::{
    Command, CommandOutput, Message, MessageForm, MessageId, MessageThread, OfferState, ThreadId,
    ThreadView, UserId,
};
use crate::routes::home::Html;
use crate::state::AppState;

/// Timestamps handed to clients for polling keep full precision so that the
/// staleness comparison is exact.
fn poll_stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub struct MessageCard {
    pub id: i64,
    pub sender_name: String,
    pub time_sent: String,
    pub content: String,
    pub image: String,
    pub mine: bool,
    pub is_offer: bool,
    pub offer_amount: i64,
    pub offer_state: &'static str,
    pub can_respond: bool,
    pub can_retract: bool,
}

impl MessageCard {
    fn new(message: &Message, viewer: &UserId) -> Self {
        let mine = message.sender_id == *viewer;
        let pending = message.offer_state() == Some(OfferState::Pending);
        Self {
            id: message.id.get(),
            sender_name: message.sender_name.clone(),
            time_sent: message.time_sent.format("%b %-d, %H:%M").to_string(),
            content: message.content.clone(),
            image: message.image.clone().unwrap_or_default(),
            mine,
            is_offer: message.offer.is_some(),
            offer_amount: message.offer.map(|o| o.amount).unwrap_or_default(),
            offer_state: message.offer_state().map(OfferState::as_str).unwrap_or(""),
            can_respond: pending && !mine,
            can_retract: pending && mine,
        }
    }
}

pub struct ThreadRow {
    pub id: i64,
    pub post_title: String,
    pub counterpart: String,
    pub last_updated: String,
}

impl ThreadRow {
    fn new(thread: &MessageThread, viewer: &UserId) -> Self {
        Self {
            id: thread.id.get(),
            post_title: thread.post_title.clone(),
            counterpart: thread.counterpart_name(viewer).to_string(),
            last_updated: thread.last_updated.format("%b %-d, %H:%M").to_string(),
        }
    }
}

pub struct PostGroup {
    pub post_id: i64,
    pub post_title: String,
    pub threads: Vec<ThreadRow>,
}

#[derive(Template)]
#[template(path = "components/thread.html")]
struct ThreadTemplate {
    thread_id: i64,
    post_id: i64,
    post_title: String,
    counterpart: String,
    is_seller: bool,
    poll_interval_secs: u64,
    last_updated: String,
    messages: Vec<MessageCard>,
}

#[derive(Template)]
#[template(path = "components/thread_messages.html")]
struct ThreadMessagesTemplate {
    thread_id: i64,
    last_updated: String,
    messages: Vec<MessageCard>,
}

impl ThreadMessagesTemplate {
    fn new(view: &ThreadView, viewer: &UserId) -> Self {
        Self {
            thread_id: view.thread.id.get(),
            last_updated: poll_stamp(view.thread.last_updated),
            messages: view
                .messages
                .iter()
                .map(|m| MessageCard::new(m, viewer))
                .collect(),
        }
    }
}

#[derive(Template)]
#[template(path = "components/threads_buying.html")]
struct ThreadsBuyingTemplate {
    threads: Vec<ThreadRow>,
}

#[derive(Template)]
#[template(path = "components/threads_selling.html")]
struct ThreadsSellingTemplate {
    groups: Vec<PostGroup>,
}

#[derive(Deserialize)]
struct RefreshQuery {
    since: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RespondForm {
    accept: bool,
}

async fn run(state: &AppState, user: &CurrentUser, command: Command) -> AppResult<CommandOutput> {
    Ok(state.market.execute(&user.id, command, Utc::now()).await?)
}

async fn thread_view(state: &AppState, user: &CurrentUser, id: ThreadId) -> AppResult<ThreadView> {
    let output = run(state, user, Command::GetThread(id)).await?;
    Ok(expect_output!(output, CommandOutput::ThreadView(view) => view))
}

/// Threads where the viewer is the buyer, listed by seller
async fn buying(State(state): State<AppState>, user: CurrentUser) -> AppResult<impl IntoResponse> {
    let output = run(&state, &user, Command::SellerThreads).await?;
    let threads = expect_output!(output, CommandOutput::SellerThreads(threads) => threads);

    Ok(Html(ThreadsBuyingTemplate {
        threads: threads
            .iter()
            .map(|t| ThreadRow::new(t, &user.id))
            .collect(),
    }))
}

/// Buyers on each of the viewer's posts
async fn selling(State(state): State<AppState>, user: CurrentUser) -> AppResult<impl IntoResponse> {
    let output = run(&state, &user, Command::BuyerThreads).await?;
    let grouped = expect_output!(output, CommandOutput::BuyerThreads(grouped) => grouped);

    let groups = grouped
        .iter()
        .map(|g| PostGroup {
            post_id: g.post.id.get(),
            post_title: g.post.title.clone(),
            threads: g
                .threads
                .iter()
                .map(|t| ThreadRow::new(t, &user.id))
                .collect(),
        })
        .collect();

    Ok(Html(ThreadsSellingTemplate { groups }))
}

async fn show(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    let view = thread_view(&state, &user, ThreadId(id)).await?;
    let thread = &view.thread;

    Ok(Html(ThreadTemplate {
        thread_id: thread.id.get(),
        post_id: thread.post_id.get(),
        post_title: thread.post_title.clone(),
        counterpart: thread.counterpart_name(&user.id).to_string(),
        is_seller: thread.role_of(&user.id) == Some(Role::Seller),
        poll_interval_secs: state.config.market.poll_interval_secs,
        last_updated: poll_stamp(thread.last_updated),
        messages: view
            .messages
            .iter()
            .map(|m| MessageCard::new(m, &user.id))
            .collect(),
    }))
}

/// Polling endpoint: the message list if anything was sent after `since`,
/// otherwise an empty body.
async fn refresh(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Query(query): Query<RefreshQuery>,
) -> AppResult<Response> {
    let command = Command::RefreshThread {
        thread: ThreadId(id),
        since: query.since,
    };
    let output = run(&state, &user, command).await?;
    let delta = expect_output!(output, CommandOutput::Delta(delta) => delta);

    Ok(match delta {
        Some(view) => Html(ThreadMessagesTemplate::new(&view, &user.id)).into_response(),
        None => (StatusCode::OK, "").into_response(),
    })
}

async fn send_message(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    TypedForm(form): TypedForm<MessageForm>,
) -> AppResult<impl IntoResponse> {
    let thread = ThreadId(id);
    let output = run(&state, &user, Command::SendMessage { thread, form }).await?;
    expect_output!(output, CommandOutput::Message(_) => ());

    // Re-render the whole list: a new offer may have retracted earlier ones.
    let view = thread_view(&state, &user, thread).await?;
    Ok(Html(ThreadMessagesTemplate::new(&view, &user.id)))
}

async fn retract(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    let output = run(&state, &user, Command::RetractOffer(MessageId(id))).await?;
    let outcome = expect_output!(output, CommandOutput::Offer(outcome) => outcome);
    Ok(Html(ThreadMessagesTemplate::new(&outcome.view, &user.id)))
}

async fn respond(
    State(state): State<AppState>,
    user: CurrentUser,
    Path(id): Path<i64>,
    Form(form): Form<RespondForm>,
) -> AppResult<impl IntoResponse> {
    let command = Command::RespondToOffer {
        message: MessageId(id),
        accept: form.accept,
    };
    let output = run(&state, &user, command).await?;
    let outcome = expect_output!(output, CommandOutput::Offer(outcome) => outcome);
    Ok(Html(ThreadMessagesTemplate::new(&outcome.view, &user.id)))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/threads/buying", get(buying))
        .route("/threads/selling", get(selling))
        .route("/threads/{id}", get(show))
        .route("/threads/{id}/refresh", get(refresh))
        .route("/threads/{id}/messages", post(send_message))
        .route("/messages/{id}/retract", post(retract))
        .route("/messages/{id}/respond", post(respond))
}
