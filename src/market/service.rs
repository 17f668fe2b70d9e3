use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::domain::*;
use super::repository::{ListingScope, MarketRepository, OfferUpdate};
use super::search::SearchPlan;
use super::validation::{MessageForm, PostForm, SearchForm};
use super::MarketError;

/// Result of a respond/retract attempt. `changed` is false when the offer was
/// already resolved and the call did nothing.
#[derive(Debug, Clone, PartialEq)]
pub struct OfferOutcome {
    pub view: ThreadView,
    pub changed: bool,
}

/// Marketplace engine. Every operation takes the acting user explicitly and
/// never reads identity from anywhere else.
#[derive(Clone)]
pub struct Marketplace {
    repo: Arc<dyn MarketRepository>,
}

impl Marketplace {
    pub fn new(repo: Arc<dyn MarketRepository>) -> Self {
        Self { repo }
    }

    // --- Posts ---

    pub async fn create_post(
        &self,
        actor: &UserId,
        form: PostForm,
        now: DateTime<Utc>,
    ) -> Result<Post, MarketError> {
        let draft = form.into_draft()?;
        let post = self.repo.create_post(actor, &draft, now).await?;
        tracing::info!(post = %post.id, seller = %actor, "Created post");
        Ok(post)
    }

    pub async fn edit_post(
        &self,
        actor: &UserId,
        id: PostId,
        form: PostForm,
    ) -> Result<Post, MarketError> {
        self.owned_post(actor, id).await?;
        let draft = form.into_draft()?;
        let post = self.repo.update_post(id, &draft).await?;
        tracing::info!(post = %id, "Edited post");
        Ok(post)
    }

    pub async fn delete_post(&self, actor: &UserId, id: PostId) -> Result<(), MarketError> {
        self.owned_post(actor, id).await?;
        self.repo.delete_post(id).await?;
        tracing::info!(post = %id, "Deleted post");
        Ok(())
    }

    pub async fn mark_sold(&self, actor: &UserId, id: PostId) -> Result<Post, MarketError> {
        let post = self.owned_post(actor, id).await?;
        if post.is_sold() {
            tracing::debug!(post = %id, "Post already sold");
            return Ok(post);
        }
        let post = self
            .repo
            .set_transaction_state(id, TransactionState::Complete)
            .await?;
        tracing::info!(post = %id, "Marked post sold");
        Ok(post)
    }

    pub async fn tradeboard(&self, viewer: &UserId) -> Result<Vec<PostListing>, MarketError> {
        Ok(self.repo.list_posts(ListingScope::Tradeboard, viewer).await?)
    }

    pub async fn sell_list(&self, viewer: &UserId) -> Result<Vec<PostListing>, MarketError> {
        Ok(self.repo.list_posts(ListingScope::Selling, viewer).await?)
    }

    pub async fn bookmarked_posts(
        &self,
        viewer: &UserId,
    ) -> Result<Vec<PostListing>, MarketError> {
        Ok(self.repo.list_posts(ListingScope::Bookmarked, viewer).await?)
    }

    pub async fn search(
        &self,
        viewer: &UserId,
        form: SearchForm,
    ) -> Result<Vec<PostListing>, MarketError> {
        let criteria = form.into_criteria()?;
        let plan = SearchPlan::build(&criteria);
        Ok(self.repo.search_posts(&plan, viewer).await?)
    }

    // --- Bookmarks ---

    pub async fn toggle_bookmark(
        &self,
        actor: &UserId,
        post: PostId,
        now: DateTime<Utc>,
    ) -> Result<bool, MarketError> {
        self.existing_post(post).await?;
        let bookmarked = self.repo.toggle_bookmark(actor, post, now).await?;
        tracing::debug!(post = %post, user = %actor, bookmarked, "Toggled bookmark");
        Ok(bookmarked)
    }

    // --- Threads ---

    pub async fn open_thread(
        &self,
        actor: &UserId,
        post: PostId,
        now: DateTime<Utc>,
    ) -> Result<MessageThread, MarketError> {
        let post = self.existing_post(post).await?;
        if post.is_owned_by(actor) {
            tracing::warn!(post = %post.id, user = %actor, "Seller tried to open a thread on own post");
            return Err(MarketError::Forbidden(
                "Cannot open a thread on your own post".into(),
            ));
        }
        Ok(self.repo.open_thread(post.id, actor, now).await?)
    }

    pub async fn get_thread(&self, actor: &UserId, id: ThreadId) -> Result<ThreadView, MarketError> {
        let thread = self.participant_thread(actor, id).await?;
        self.view(thread).await
    }

    /// Full thread resend, gated by a staleness check against `since`.
    pub async fn thread_delta(
        &self,
        actor: &UserId,
        id: ThreadId,
        since: DateTime<Utc>,
    ) -> Result<Option<ThreadView>, MarketError> {
        let thread = self.participant_thread(actor, id).await?;
        if !thread.has_activity_since(since) {
            return Ok(None);
        }
        self.view(thread).await.map(Some)
    }

    /// Threads on the actor's posts, grouped by post.
    pub async fn buyer_threads(&self, seller: &UserId) -> Result<Vec<PostThreads>, MarketError> {
        Ok(self.repo.threads_for_seller(seller).await?)
    }

    /// Threads the actor opened as a buyer.
    pub async fn seller_threads(
        &self,
        buyer: &UserId,
    ) -> Result<Vec<MessageThread>, MarketError> {
        Ok(self.repo.threads_for_buyer(buyer).await?)
    }

    // --- Messages and offers ---

    pub async fn send_message(
        &self,
        actor: &UserId,
        thread: ThreadId,
        form: MessageForm,
        now: DateTime<Utc>,
    ) -> Result<Message, MarketError> {
        let thread = self.participant_thread(actor, thread).await?;
        let message = form.into_message()?;
        let stored = self
            .repo
            .insert_message(thread.id, actor, &message, now)
            .await?;

        match stored.offer {
            Some(offer) => tracing::info!(
                thread = %thread.id,
                message = %stored.id,
                amount = offer.amount,
                "Offer sent"
            ),
            None => tracing::debug!(thread = %thread.id, message = %stored.id, "Message sent"),
        }
        Ok(stored)
    }

    pub async fn respond_to_offer(
        &self,
        actor: &UserId,
        message: MessageId,
        accept: bool,
    ) -> Result<OfferOutcome, MarketError> {
        self.update_offer(actor, message, OfferAction::Respond { accept })
            .await
    }

    pub async fn retract_offer(
        &self,
        actor: &UserId,
        message: MessageId,
    ) -> Result<OfferOutcome, MarketError> {
        self.update_offer(actor, message, OfferAction::Retract).await
    }

    async fn update_offer(
        &self,
        actor: &UserId,
        id: MessageId,
        action: OfferAction,
    ) -> Result<OfferOutcome, MarketError> {
        let (message, changed) = match self.repo.update_offer(id, actor, action).await? {
            OfferUpdate::Applied(message) => {
                tracing::info!(
                    message = %id,
                    state = message.offer_state().map(OfferState::as_str).unwrap_or("none"),
                    "Offer updated"
                );
                (message, true)
            }
            OfferUpdate::Refused { message, error } if error.is_no_op() => {
                tracing::debug!(message = %id, reason = %error, "Offer update was a no-op");
                (message, false)
            }
            OfferUpdate::Refused { error, .. } => {
                tracing::warn!(message = %id, user = %actor, reason = %error, "Offer update refused");
                return Err(MarketError::Forbidden(error.to_string()));
            }
        };

        let view = self.get_thread(actor, message.thread_id).await?;
        Ok(OfferOutcome { view, changed })
    }

    // --- Helpers ---

    async fn existing_post(&self, id: PostId) -> Result<Post, MarketError> {
        self.repo
            .find_post(id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("post {id}")))
    }

    async fn owned_post(&self, actor: &UserId, id: PostId) -> Result<Post, MarketError> {
        let post = self.existing_post(id).await?;
        if !post.is_owned_by(actor) {
            tracing::warn!(post = %id, user = %actor, "Non-seller tried to modify post");
            return Err(MarketError::Forbidden("Only the seller can change this post".into()));
        }
        Ok(post)
    }

    async fn participant_thread(
        &self,
        actor: &UserId,
        id: ThreadId,
    ) -> Result<MessageThread, MarketError> {
        let thread = self
            .repo
            .find_thread(id)
            .await?
            .ok_or_else(|| MarketError::NotFound(format!("thread {id}")))?;
        if !thread.is_participant(actor) {
            tracing::warn!(thread = %id, user = %actor, "Non-participant tried to use thread");
            return Err(MarketError::Forbidden(
                "Only the buyer and seller can use this thread".into(),
            ));
        }
        Ok(thread)
    }

    async fn view(&self, thread: MessageThread) -> Result<ThreadView, MarketError> {
        let messages = self.repo.list_messages(thread.id).await?;
        Ok(ThreadView { thread, messages })
    }
}
