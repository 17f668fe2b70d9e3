// Repository pattern - isolates all database side effects
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use std::collections::HashMap;
use thiserror::Error;

use crate::db::DbTime;
use crate::market::domain::*;
use crate::market::search::{FilterClause, Relevance, SearchPlan, SortOrder, SIMILARITY_THRESHOLD};
use crate::state::DbPool;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Database error: {0}")]
    Database(#[from] r2d2::Error),

    #[error("SQL error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Result of trying to move an offer forward inside one transaction.
#[derive(Debug, Clone, PartialEq)]
pub enum OfferUpdate {
    /// The transition was written; carries the updated message.
    Applied(Message),
    /// Nothing was written; carries the untouched message and the reason.
    Refused { message: Message, error: OfferError },
}

/// Which fixed listing a viewer is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingScope {
    /// Other sellers' posts still for sale
    Tradeboard,
    /// The viewer's own posts still for sale
    Selling,
    /// The viewer's bookmarks, most recently bookmarked first
    Bookmarked,
}

/// Repository trait - all marketplace storage operations
#[async_trait]
pub trait MarketRepository: Send + Sync {
    async fn create_post(
        &self,
        seller: &UserId,
        draft: &PostDraft,
        now: DateTime<Utc>,
    ) -> Result<Post, RepositoryError>;

    async fn find_post(&self, id: PostId) -> Result<Option<Post>, RepositoryError>;

    async fn update_post(&self, id: PostId, draft: &PostDraft) -> Result<Post, RepositoryError>;

    async fn delete_post(&self, id: PostId) -> Result<bool, RepositoryError>;

    async fn set_transaction_state(
        &self,
        id: PostId,
        state: TransactionState,
    ) -> Result<Post, RepositoryError>;

    /// Evaluate a search plan over every post not sold by `viewer`.
    async fn search_posts(
        &self,
        plan: &SearchPlan,
        viewer: &UserId,
    ) -> Result<Vec<PostListing>, RepositoryError>;

    async fn list_posts(
        &self,
        scope: ListingScope,
        viewer: &UserId,
    ) -> Result<Vec<PostListing>, RepositoryError>;

    /// Flip bookmark membership atomically; returns the new membership.
    async fn toggle_bookmark(
        &self,
        user: &UserId,
        post: PostId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Get or create the (post, buyer) thread.
    async fn open_thread(
        &self,
        post: PostId,
        buyer: &UserId,
        now: DateTime<Utc>,
    ) -> Result<MessageThread, RepositoryError>;

    async fn find_thread(&self, id: ThreadId) -> Result<Option<MessageThread>, RepositoryError>;

    async fn threads_for_buyer(&self, buyer: &UserId)
        -> Result<Vec<MessageThread>, RepositoryError>;

    async fn threads_for_seller(&self, seller: &UserId)
        -> Result<Vec<PostThreads>, RepositoryError>;

    /// Messages newest first; equal timestamps fall back to reverse insertion order.
    async fn list_messages(&self, thread: ThreadId) -> Result<Vec<Message>, RepositoryError>;

    async fn find_message(&self, id: MessageId) -> Result<Option<Message>, RepositoryError>;

    /// Persist a message. Offers retract every pending offer already in the
    /// thread within the same transaction.
    async fn insert_message(
        &self,
        thread: ThreadId,
        sender: &UserId,
        message: &NewMessage,
        now: DateTime<Utc>,
    ) -> Result<Message, RepositoryError>;

    /// Load, check and write an offer transition atomically.
    async fn update_offer(
        &self,
        id: MessageId,
        actor: &UserId,
        action: OfferAction,
    ) -> Result<OfferUpdate, RepositoryError>;
}

// --- Column mappings ---

impl ToSql for UserId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for UserId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        String::column_result(value).map(UserId)
    }
}

macro_rules! sql_row_id {
    ($name:ident) => {
        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map($name)
            }
        }
    };
}

sql_row_id!(PostId);
sql_row_id!(ThreadId);
sql_row_id!(MessageId);

macro_rules! sql_text_enum {
    ($name:ident) => {
        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

sql_text_enum!(PostType);
sql_text_enum!(TransactionState);
sql_text_enum!(MessageKind);

const POST_COLUMNS: &str = "p.id AS id, p.seller_id AS seller_id, u.username AS seller_name, \
     p.title AS title, p.isbn AS isbn, p.author AS author, p.description AS description, \
     p.price AS price, p.edition AS edition, p.post_type AS post_type, \
     p.date_posted AS date_posted, p.transaction_state AS transaction_state, p.image AS image";

const THREAD_SELECT: &str = "SELECT t.id AS id, t.post_id AS post_id, p.title AS post_title, \
     t.buyer_id AS buyer_id, b.username AS buyer_name, \
     p.seller_id AS seller_id, s.username AS seller_name, \
     t.created_at AS created_at, t.last_updated AS last_updated \
     FROM message_threads t \
     JOIN posts p ON p.id = t.post_id \
     JOIN users b ON b.id = t.buyer_id \
     JOIN users s ON s.id = p.seller_id";

const MESSAGE_SELECT: &str = "SELECT m.id AS id, m.thread_id AS thread_id, \
     m.sender_id AS sender_id, u.username AS sender_name, m.time_sent AS time_sent, \
     m.content AS content, m.kind AS kind, m.offer_amount AS offer_amount, \
     m.offer_accepted AS offer_accepted, m.offer_retracted AS offer_retracted, m.image AS image \
     FROM messages m JOIN users u ON u.id = m.sender_id";

fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
    Ok(Post {
        id: row.get("id")?,
        seller_id: row.get("seller_id")?,
        seller_name: row.get("seller_name")?,
        title: row.get("title")?,
        isbn: row.get("isbn")?,
        author: row.get("author")?,
        description: row.get("description")?,
        price: row.get("price")?,
        edition: row.get("edition")?,
        post_type: row.get("post_type")?,
        date_posted: row.get::<_, DbTime>("date_posted")?.0,
        transaction_state: row.get("transaction_state")?,
        image: row.get("image")?,
    })
}

fn listing_from_row(row: &Row<'_>) -> rusqlite::Result<PostListing> {
    Ok(PostListing {
        post: post_from_row(row)?,
        bookmarked: row.get("bookmarked")?,
        score: row.get("score")?,
    })
}

fn thread_from_row(row: &Row<'_>) -> rusqlite::Result<MessageThread> {
    Ok(MessageThread {
        id: row.get("id")?,
        post_id: row.get("post_id")?,
        post_title: row.get("post_title")?,
        buyer_id: row.get("buyer_id")?,
        buyer_name: row.get("buyer_name")?,
        seller_id: row.get("seller_id")?,
        seller_name: row.get("seller_name")?,
        created_at: row.get::<_, DbTime>("created_at")?.0,
        last_updated: row.get::<_, DbTime>("last_updated")?.0,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let kind: MessageKind = row.get("kind")?;
    let offer = match kind {
        MessageKind::Offer => Some(Offer {
            amount: row.get::<_, Option<i64>>("offer_amount")?.unwrap_or_default(),
            accepted: row.get("offer_accepted")?,
            retracted: row.get("offer_retracted")?,
        }),
        MessageKind::Text => None,
    };

    Ok(Message {
        id: row.get("id")?,
        thread_id: row.get("thread_id")?,
        sender_id: row.get("sender_id")?,
        sender_name: row.get("sender_name")?,
        time_sent: row.get::<_, DbTime>("time_sent")?.0,
        content: row.get("content")?,
        image: row.get("image")?,
        offer,
    })
}

// --- Connection-level helpers, usable inside or outside a transaction ---

fn load_post(conn: &Connection, id: PostId) -> rusqlite::Result<Option<Post>> {
    conn.query_row(
        &format!("SELECT {POST_COLUMNS} FROM posts p JOIN users u ON u.id = p.seller_id WHERE p.id = ?1"),
        params![id],
        post_from_row,
    )
    .optional()
}

fn load_thread(conn: &Connection, id: ThreadId) -> rusqlite::Result<Option<MessageThread>> {
    conn.query_row(
        &format!("{THREAD_SELECT} WHERE t.id = ?1"),
        params![id],
        thread_from_row,
    )
    .optional()
}

fn load_message(conn: &Connection, id: MessageId) -> rusqlite::Result<Option<Message>> {
    conn.query_row(
        &format!("{MESSAGE_SELECT} WHERE m.id = ?1"),
        params![id],
        message_from_row,
    )
    .optional()
}

fn pending_offers(conn: &Connection, thread: ThreadId) -> rusqlite::Result<Vec<Message>> {
    let mut stmt = conn.prepare(&format!(
        "{MESSAGE_SELECT} WHERE m.thread_id = ?1 AND m.kind = 'Offer' \
         AND m.offer_accepted IS NULL AND m.offer_retracted = 0"
    ))?;
    let messages = stmt
        .query_map(params![thread], message_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(messages)
}

fn write_offer(conn: &Connection, id: MessageId, offer: &Offer) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE messages SET offer_accepted = ?2, offer_retracted = ?3 WHERE id = ?1",
        params![id, offer.accepted, offer.retracted],
    )?;
    Ok(())
}

/// SQL for the relevance score of a plan, plus its bound arguments.
fn score_sql(relevance: Option<&Relevance>) -> (&'static str, Vec<String>) {
    match relevance {
        Some(Relevance::Title(title)) => ("similarity(p.title, ?)", vec![title.clone()]),
        Some(Relevance::Author(author)) => ("similarity(p.author, ?)", vec![author.clone()]),
        Some(Relevance::TitleAndAuthor { title, author }) => (
            "(similarity(p.author, ?) + similarity(p.title, ?))",
            vec![author.clone(), title.clone()],
        ),
        None => ("NULL", Vec::new()),
    }
}

fn order_sql(sort: SortOrder) -> &'static str {
    match sort {
        SortOrder::DatePostedDesc => "date_posted DESC, id DESC",
        SortOrder::PriceAsc => "price ASC, date_posted DESC, id DESC",
        SortOrder::EditionAsc => "edition ASC, date_posted DESC, id DESC",
        SortOrder::TitleAsc => "title COLLATE NOCASE ASC, date_posted DESC, id DESC",
        SortOrder::AuthorAsc => "author COLLATE NOCASE ASC, date_posted DESC, id DESC",
        SortOrder::RelevanceDesc => "score DESC, date_posted DESC, id DESC",
    }
}

/// Translate a plan into one SELECT over a scored, viewer-filtered subquery.
fn compile_search(plan: &SearchPlan, viewer: &UserId) -> (String, Vec<Box<dyn ToSql>>) {
    let (score, score_args) = score_sql(plan.relevance.as_ref());
    let mut args: Vec<Box<dyn ToSql>> = Vec::new();
    for arg in score_args {
        args.push(Box::new(arg));
    }
    args.push(Box::new(viewer.clone()));
    args.push(Box::new(viewer.clone()));

    let mut conditions: Vec<&'static str> = Vec::new();
    for clause in &plan.clauses {
        match clause {
            FilterClause::Relevant { or_isbn: None } => {
                conditions.push("score > ?");
                args.push(Box::new(SIMILARITY_THRESHOLD));
            }
            FilterClause::Relevant {
                or_isbn: Some(isbn),
            } => {
                conditions.push("(score > ? OR isbn = ?)");
                args.push(Box::new(SIMILARITY_THRESHOLD));
                args.push(Box::new(isbn.clone()));
            }
            FilterClause::Isbn(isbn) => {
                conditions.push("isbn = ?");
                args.push(Box::new(isbn.clone()));
            }
            FilterClause::Edition(edition) => {
                conditions.push("edition = ?");
                args.push(Box::new(*edition));
            }
            FilterClause::MaxPrice(max_price) => {
                conditions.push("price <= ?");
                args.push(Box::new(*max_price));
            }
            FilterClause::PostedSince(since) => {
                conditions.push("date_posted >= ?");
                args.push(Box::new(DbTime(*since)));
            }
            FilterClause::PostType(post_type) => {
                conditions.push("post_type = ?");
                args.push(Box::new(*post_type));
            }
        }
    }

    let filter = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        "SELECT * FROM (\
           SELECT {POST_COLUMNS}, {score} AS score, \
             EXISTS(SELECT 1 FROM bookmarks bm WHERE bm.post_id = p.id AND bm.user_id = ?) AS bookmarked \
           FROM posts p JOIN users u ON u.id = p.seller_id \
           WHERE p.seller_id != ?\
         ) AS candidates{filter} ORDER BY {order}",
        order = order_sql(plan.sort),
    );

    (sql, args)
}

/// SQLite implementation
pub struct SqliteMarketRepository {
    pool: DbPool,
}

impl SqliteMarketRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MarketRepository for SqliteMarketRepository {
    async fn create_post(
        &self,
        seller: &UserId,
        draft: &PostDraft,
        now: DateTime<Utc>,
    ) -> Result<Post, RepositoryError> {
        let conn = self.pool.get()?;

        conn.execute(
            "INSERT INTO posts (seller_id, title, isbn, author, description, price, edition,
                                post_type, date_posted, transaction_state, image)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'InProgress', ?10)",
            params![
                seller,
                draft.title,
                draft.isbn,
                draft.author,
                draft.description,
                draft.price,
                draft.edition,
                draft.post_type,
                DbTime(now),
                draft.image,
            ],
        )?;
        let id = PostId(conn.last_insert_rowid());

        load_post(&conn, id)?.ok_or_else(|| RepositoryError::NotFound(format!("post {id}")))
    }

    async fn find_post(&self, id: PostId) -> Result<Option<Post>, RepositoryError> {
        let conn = self.pool.get()?;
        Ok(load_post(&conn, id)?)
    }

    async fn update_post(&self, id: PostId, draft: &PostDraft) -> Result<Post, RepositoryError> {
        let conn = self.pool.get()?;

        let rows = conn.execute(
            "UPDATE posts SET title = ?2, isbn = ?3, author = ?4, description = ?5,
                              price = ?6, edition = ?7, post_type = ?8, image = ?9
             WHERE id = ?1",
            params![
                id,
                draft.title,
                draft.isbn,
                draft.author,
                draft.description,
                draft.price,
                draft.edition,
                draft.post_type,
                draft.image,
            ],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound(format!("post {id}")));
        }

        load_post(&conn, id)?.ok_or_else(|| RepositoryError::NotFound(format!("post {id}")))
    }

    async fn delete_post(&self, id: PostId) -> Result<bool, RepositoryError> {
        let conn = self.pool.get()?;
        let rows = conn.execute("DELETE FROM posts WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    async fn set_transaction_state(
        &self,
        id: PostId,
        state: TransactionState,
    ) -> Result<Post, RepositoryError> {
        let conn = self.pool.get()?;

        let rows = conn.execute(
            "UPDATE posts SET transaction_state = ?2 WHERE id = ?1",
            params![id, state],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound(format!("post {id}")));
        }

        load_post(&conn, id)?.ok_or_else(|| RepositoryError::NotFound(format!("post {id}")))
    }

    async fn search_posts(
        &self,
        plan: &SearchPlan,
        viewer: &UserId,
    ) -> Result<Vec<PostListing>, RepositoryError> {
        let conn = self.pool.get()?;

        let (sql, args) = compile_search(plan, viewer);
        tracing::debug!(clauses = plan.clauses.len(), sort = ?plan.sort, "Running post search");

        let mut stmt = conn.prepare(&sql)?;
        let listings = stmt
            .query_map(params_from_iter(args.iter()), listing_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(listings)
    }

    async fn list_posts(
        &self,
        scope: ListingScope,
        viewer: &UserId,
    ) -> Result<Vec<PostListing>, RepositoryError> {
        let conn = self.pool.get()?;

        let (join, filter, order) = match scope {
            ListingScope::Tradeboard => (
                "",
                "p.seller_id != ?1 AND p.transaction_state = 'InProgress'",
                "p.date_posted DESC, p.id DESC",
            ),
            ListingScope::Selling => (
                "",
                "p.seller_id = ?1 AND p.transaction_state = 'InProgress'",
                "p.date_posted DESC, p.id DESC",
            ),
            ListingScope::Bookmarked => (
                "JOIN bookmarks mine ON mine.post_id = p.id AND mine.user_id = ?1",
                "1 = 1",
                "mine.date_bookmarked DESC, p.id DESC",
            ),
        };

        let sql = format!(
            "SELECT {POST_COLUMNS}, NULL AS score, \
               EXISTS(SELECT 1 FROM bookmarks bm WHERE bm.post_id = p.id AND bm.user_id = ?1) AS bookmarked \
             FROM posts p JOIN users u ON u.id = p.seller_id {join} \
             WHERE {filter} ORDER BY {order}"
        );

        let mut stmt = conn.prepare(&sql)?;
        let listings = stmt
            .query_map(params![viewer], listing_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(listings)
    }

    async fn toggle_bookmark(
        &self,
        user: &UserId,
        post: PostId,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let existing: bool = tx.query_row(
            "SELECT COUNT(*) > 0 FROM bookmarks WHERE user_id = ?1 AND post_id = ?2",
            params![user, post],
            |row| row.get(0),
        )?;

        if existing {
            tx.execute(
                "DELETE FROM bookmarks WHERE user_id = ?1 AND post_id = ?2",
                params![user, post],
            )?;
        } else {
            tx.execute(
                "INSERT INTO bookmarks (user_id, post_id, date_bookmarked) VALUES (?1, ?2, ?3)",
                params![user, post, DbTime(now)],
            )?;
        }

        tx.commit()?;
        Ok(!existing)
    }

    async fn open_thread(
        &self,
        post: PostId,
        buyer: &UserId,
        now: DateTime<Utc>,
    ) -> Result<MessageThread, RepositoryError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let created = tx.execute(
            "INSERT INTO message_threads (post_id, buyer_id, created_at, last_updated)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(post_id, buyer_id) DO NOTHING",
            params![post, buyer, DbTime(now)],
        )?;

        let thread = tx
            .query_row(
                &format!("{THREAD_SELECT} WHERE t.post_id = ?1 AND t.buyer_id = ?2"),
                params![post, buyer],
                thread_from_row,
            )
            .optional()?
            .ok_or_else(|| RepositoryError::NotFound(format!("thread on post {post}")))?;

        tx.commit()?;

        if created > 0 {
            tracing::info!(thread = %thread.id, post = %post, "Opened message thread");
        }
        Ok(thread)
    }

    async fn find_thread(&self, id: ThreadId) -> Result<Option<MessageThread>, RepositoryError> {
        let conn = self.pool.get()?;
        Ok(load_thread(&conn, id)?)
    }

    async fn threads_for_buyer(
        &self,
        buyer: &UserId,
    ) -> Result<Vec<MessageThread>, RepositoryError> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(&format!(
            "{THREAD_SELECT} WHERE t.buyer_id = ?1 ORDER BY t.last_updated DESC, t.id DESC"
        ))?;
        let threads = stmt
            .query_map(params![buyer], thread_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(threads)
    }

    async fn threads_for_seller(
        &self,
        seller: &UserId,
    ) -> Result<Vec<PostThreads>, RepositoryError> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(&format!(
            "{THREAD_SELECT} WHERE p.seller_id = ?1 ORDER BY t.last_updated DESC, t.id DESC"
        ))?;
        let threads = stmt
            .query_map(params![seller], thread_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        let mut by_post: HashMap<PostId, Vec<MessageThread>> = HashMap::new();
        for thread in threads {
            by_post.entry(thread.post_id).or_default().push(thread);
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT {POST_COLUMNS} FROM posts p JOIN users u ON u.id = p.seller_id \
             WHERE p.seller_id = ?1 \
               AND EXISTS(SELECT 1 FROM message_threads t WHERE t.post_id = p.id) \
             ORDER BY p.date_posted DESC, p.id DESC"
        ))?;
        let posts = stmt
            .query_map(params![seller], post_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(posts
            .into_iter()
            .map(|post| {
                let threads = by_post.remove(&post.id).unwrap_or_default();
                PostThreads { post, threads }
            })
            .collect())
    }

    async fn list_messages(&self, thread: ThreadId) -> Result<Vec<Message>, RepositoryError> {
        let conn = self.pool.get()?;

        let mut stmt = conn.prepare(&format!(
            "{MESSAGE_SELECT} WHERE m.thread_id = ?1 ORDER BY m.time_sent DESC, m.id DESC"
        ))?;
        let messages = stmt
            .query_map(params![thread], message_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(messages)
    }

    async fn find_message(&self, id: MessageId) -> Result<Option<Message>, RepositoryError> {
        let conn = self.pool.get()?;
        Ok(load_message(&conn, id)?)
    }

    async fn insert_message(
        &self,
        thread: ThreadId,
        sender: &UserId,
        message: &NewMessage,
        now: DateTime<Utc>,
    ) -> Result<Message, RepositoryError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if message.offer_amount.is_some() {
            let mut superseded = 0;
            for earlier in pending_offers(&tx, thread)? {
                let Some(offer) = earlier.offer else { continue };
                if let Ok(retracted) = offer.retract() {
                    write_offer(&tx, earlier.id, &retracted)?;
                    superseded += 1;
                }
            }
            if superseded > 0 {
                tracing::info!(thread = %thread, superseded, "Retracted superseded offers");
            }
        }

        tx.execute(
            "INSERT INTO messages (thread_id, sender_id, time_sent, content, kind, offer_amount, image)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                thread,
                sender,
                DbTime(now),
                message.content,
                message.kind(),
                message.offer_amount,
                message.image,
            ],
        )?;
        let id = MessageId(tx.last_insert_rowid());

        tx.execute(
            "UPDATE message_threads SET last_updated = ?2 WHERE id = ?1 AND last_updated < ?2",
            params![thread, DbTime(now)],
        )?;

        let stored = load_message(&tx, id)?
            .ok_or_else(|| RepositoryError::NotFound(format!("message {id}")))?;

        tx.commit()?;
        Ok(stored)
    }

    async fn update_offer(
        &self,
        id: MessageId,
        actor: &UserId,
        action: OfferAction,
    ) -> Result<OfferUpdate, RepositoryError> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let message =
            load_message(&tx, id)?.ok_or_else(|| RepositoryError::NotFound(format!("message {id}")))?;
        let thread = load_thread(&tx, message.thread_id)?
            .ok_or_else(|| RepositoryError::NotFound(format!("thread {}", message.thread_id)))?;

        match action.apply(&message, &thread, actor) {
            Ok(offer) => {
                write_offer(&tx, id, &offer)?;
                tx.commit()?;
                Ok(OfferUpdate::Applied(Message {
                    offer: Some(offer),
                    ..message
                }))
            }
            // Dropping the transaction rolls it back; nothing was written.
            Err(error) => Ok(OfferUpdate::Refused { message, error }),
        }
    }
}
