//! Closed set of client actions. Every request the HTTP layer accepts maps
//! to exactly one variant, and `Marketplace::execute` handles them all.

use chrono::{DateTime, Utc};

use super::domain::*;
use super::service::{Marketplace, OfferOutcome};
use super::validation::{MessageForm, PostForm, SearchForm};
use super::MarketError;

#[derive(Debug, Clone)]
pub enum Command {
    Tradeboard,
    SearchPosts(SearchForm),
    SellList,
    BookmarkedPosts,
    CreatePost(PostForm),
    EditPost { post: PostId, form: PostForm },
    DeletePost(PostId),
    MarkSold(PostId),
    ToggleBookmark(PostId),
    OpenThread(PostId),
    BuyerThreads,
    SellerThreads,
    GetThread(ThreadId),
    RefreshThread { thread: ThreadId, since: DateTime<Utc> },
    SendMessage { thread: ThreadId, form: MessageForm },
    RetractOffer(MessageId),
    RespondToOffer { message: MessageId, accept: bool },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tradeboard => "tradeboard",
            Self::SearchPosts(_) => "search_posts",
            Self::SellList => "sell_list",
            Self::BookmarkedPosts => "bookmarked_posts",
            Self::CreatePost(_) => "create_post",
            Self::EditPost { .. } => "edit_post",
            Self::DeletePost(_) => "delete_post",
            Self::MarkSold(_) => "mark_sold",
            Self::ToggleBookmark(_) => "toggle_bookmark",
            Self::OpenThread(_) => "open_thread",
            Self::BuyerThreads => "buyer_threads",
            Self::SellerThreads => "seller_threads",
            Self::GetThread(_) => "get_thread",
            Self::RefreshThread { .. } => "refresh_thread",
            Self::SendMessage { .. } => "send_message",
            Self::RetractOffer(_) => "retract_offer",
            Self::RespondToOffer { .. } => "respond_to_offer",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutput {
    Listings(Vec<PostListing>),
    Post(Post),
    Deleted(PostId),
    Bookmark { post: PostId, bookmarked: bool },
    Thread(MessageThread),
    BuyerThreads(Vec<PostThreads>),
    SellerThreads(Vec<MessageThread>),
    ThreadView(ThreadView),
    /// `None` when nothing happened since the client's last poll
    Delta(Option<ThreadView>),
    Message(Message),
    Offer(OfferOutcome),
}

impl Marketplace {
    pub async fn execute(
        &self,
        actor: &UserId,
        command: Command,
        now: DateTime<Utc>,
    ) -> Result<CommandOutput, MarketError> {
        tracing::debug!(command = command.name(), user = %actor, "Executing command");

        let output = match command {
            Command::Tradeboard => CommandOutput::Listings(self.tradeboard(actor).await?),
            Command::SearchPosts(form) => CommandOutput::Listings(self.search(actor, form).await?),
            Command::SellList => CommandOutput::Listings(self.sell_list(actor).await?),
            Command::BookmarkedPosts => {
                CommandOutput::Listings(self.bookmarked_posts(actor).await?)
            }
            Command::CreatePost(form) => CommandOutput::Post(self.create_post(actor, form, now).await?),
            Command::EditPost { post, form } => {
                CommandOutput::Post(self.edit_post(actor, post, form).await?)
            }
            Command::DeletePost(post) => {
                self.delete_post(actor, post).await?;
                CommandOutput::Deleted(post)
            }
            Command::MarkSold(post) => CommandOutput::Post(self.mark_sold(actor, post).await?),
            Command::ToggleBookmark(post) => CommandOutput::Bookmark {
                post,
                bookmarked: self.toggle_bookmark(actor, post, now).await?,
            },
            Command::OpenThread(post) => CommandOutput::Thread(self.open_thread(actor, post, now).await?),
            Command::BuyerThreads => CommandOutput::BuyerThreads(self.buyer_threads(actor).await?),
            Command::SellerThreads => CommandOutput::SellerThreads(self.seller_threads(actor).await?),
            Command::GetThread(thread) => CommandOutput::ThreadView(self.get_thread(actor, thread).await?),
            Command::RefreshThread { thread, since } => {
                CommandOutput::Delta(self.thread_delta(actor, thread, since).await?)
            }
            Command::SendMessage { thread, form } => {
                CommandOutput::Message(self.send_message(actor, thread, form, now).await?)
            }
            Command::RetractOffer(message) => {
                CommandOutput::Offer(self.retract_offer(actor, message).await?)
            }
            Command::RespondToOffer { message, accept } => {
                CommandOutput::Offer(self.respond_to_offer(actor, message, accept).await?)
            }
        };

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::market::repository::SqliteMarketRepository;
    use std::sync::Arc;

    fn market() -> Marketplace {
        let pool = db::memory_pool().unwrap();
        db::run_migrations(&pool).unwrap();
        pool.get()
            .unwrap()
            .execute_batch("INSERT INTO users (id, username) VALUES ('s', 'sam'), ('b', 'bea');")
            .unwrap();
        Marketplace::new(Arc::new(SqliteMarketRepository::new(pool)))
    }

    fn form() -> PostForm {
        PostForm {
            title: "Microeconomics".into(),
            isbn: "0131469681".into(),
            author: "Mankiw".into(),
            description: "Clean copy".into(),
            edition: Some(7),
            price: Some(35),
            post_type: Some(PostType::Textbook),
            image: None,
        }
    }

    #[tokio::test]
    async fn commands_drive_a_full_negotiation() {
        let market = market();
        let seller = UserId::new("s");
        let buyer = UserId::new("b");
        let now = Utc::now();

        let CommandOutput::Post(post) = market
            .execute(&seller, Command::CreatePost(form()), now)
            .await
            .unwrap()
        else {
            panic!("expected a post");
        };

        let CommandOutput::Thread(thread) = market
            .execute(&buyer, Command::OpenThread(post.id), now)
            .await
            .unwrap()
        else {
            panic!("expected a thread");
        };

        let CommandOutput::Message(offer) = market
            .execute(
                &buyer,
                Command::SendMessage {
                    thread: thread.id,
                    form: MessageForm {
                        content: "would you take 30?".into(),
                        offer: Some(30),
                        ..MessageForm::default()
                    },
                },
                now,
            )
            .await
            .unwrap()
        else {
            panic!("expected a message");
        };

        let output = market
            .execute(
                &seller,
                Command::RespondToOffer {
                    message: offer.id,
                    accept: true,
                },
                now,
            )
            .await
            .unwrap();
        let CommandOutput::Offer(outcome) = output else {
            panic!("expected an offer outcome");
        };
        assert!(outcome.changed);
        assert_eq!(
            outcome.view.messages[0].offer_state(),
            Some(OfferState::Accepted)
        );
    }

    #[tokio::test]
    async fn bookmark_command_reports_new_state() {
        let market = market();
        let seller = UserId::new("s");
        let buyer = UserId::new("b");
        let now = Utc::now();

        let CommandOutput::Post(post) = market
            .execute(&seller, Command::CreatePost(form()), now)
            .await
            .unwrap()
        else {
            panic!("expected a post");
        };

        let output = market
            .execute(&buyer, Command::ToggleBookmark(post.id), now)
            .await
            .unwrap();
        assert_eq!(
            output,
            CommandOutput::Bookmark {
                post: post.id,
                bookmarked: true
            }
        );
    }

    #[test]
    fn command_names_are_snake_case() {
        assert_eq!(Command::Tradeboard.name(), "tradeboard");
        assert_eq!(
            Command::RespondToOffer {
                message: MessageId(1),
                accept: false
            }
            .name(),
            "respond_to_offer"
        );
    }
}
