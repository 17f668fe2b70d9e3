// Domain types - pure, no storage or HTTP concerns
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// New types for compile-time safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

macro_rules! row_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl $name {
            pub fn get(self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(PostId);
row_id!(ThreadId);
row_id!(MessageId);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown value: {}", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostType {
    #[default]
    Other,
    Textbook,
}

impl PostType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Other => "Other",
            Self::Textbook => "Textbook",
        }
    }
}

impl FromStr for PostType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Other" => Ok(Self::Other),
            "Textbook" => Ok(Self::Textbook),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    #[default]
    InProgress,
    Complete,
}

impl TransactionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "InProgress",
            Self::Complete => "Complete",
        }
    }
}

impl FromStr for TransactionState {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "InProgress" => Ok(Self::InProgress),
            "Complete" => Ok(Self::Complete),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Text,
    Offer,
}

impl MessageKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "Text",
            Self::Offer => "Offer",
        }
    }
}

impl FromStr for MessageKind {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Text" => Ok(Self::Text),
            "Offer" => Ok(Self::Offer),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// A book listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Post {
    pub id: PostId,
    pub seller_id: UserId,
    pub seller_name: String,
    pub title: String,
    pub isbn: String,
    pub author: String,
    pub description: String,
    pub price: i64,
    pub edition: i64,
    pub post_type: PostType,
    pub date_posted: DateTime<Utc>,
    pub transaction_state: TransactionState,
    pub image: Option<String>,
}

impl Post {
    pub fn is_owned_by(&self, user: &UserId) -> bool {
        self.seller_id == *user
    }

    pub fn is_sold(&self) -> bool {
        self.transaction_state == TransactionState::Complete
    }
}

/// Validated field values for creating or editing a post.
#[derive(Debug, Clone, PartialEq)]
pub struct PostDraft {
    pub title: String,
    pub isbn: String,
    pub author: String,
    pub description: String,
    pub price: i64,
    pub edition: i64,
    pub post_type: PostType,
    pub image: Option<String>,
}

/// A post as seen by a particular viewer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostListing {
    pub post: Post,
    pub bookmarked: bool,
    /// Relevance score, present only when the search ranked by text similarity
    pub score: Option<f64>,
}

/// A buyer/seller conversation about one post. The seller is always the
/// post's seller; it is joined in at read time, never stored on the thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageThread {
    pub id: ThreadId,
    pub post_id: PostId,
    pub post_title: String,
    pub buyer_id: UserId,
    pub buyer_name: String,
    pub seller_id: UserId,
    pub seller_name: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Buyer,
    Seller,
}

impl MessageThread {
    pub fn role_of(&self, user: &UserId) -> Option<Role> {
        if self.buyer_id == *user {
            Some(Role::Buyer)
        } else if self.seller_id == *user {
            Some(Role::Seller)
        } else {
            None
        }
    }

    pub fn is_participant(&self, user: &UserId) -> bool {
        self.role_of(user).is_some()
    }

    /// Name of the other participant from `viewer`'s side.
    pub fn counterpart_name(&self, viewer: &UserId) -> &str {
        match self.role_of(viewer) {
            Some(Role::Buyer) => &self.seller_name,
            _ => &self.buyer_name,
        }
    }

    /// Polling staleness check: has anything been sent after `since`?
    pub fn has_activity_since(&self, since: DateTime<Utc>) -> bool {
        self.last_updated > since
    }
}

/// Offer lifecycle.
///
/// ```text
/// Pending ──respond(true)──▶ Accepted
///    │   ──respond(false)─▶ Rejected
///    └──retract/supersede─▶ Retracted
/// ```
///
/// Every state but `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferState {
    Pending,
    Accepted,
    Rejected,
    Retracted,
}

impl OfferState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Retracted => "retracted",
        }
    }

    pub fn is_terminal(self) -> bool {
        self != Self::Pending
    }
}

/// The offer carried by an Offer-kind message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub amount: i64,
    pub accepted: Option<bool>,
    pub retracted: bool,
}

impl Offer {
    pub fn new(amount: i64) -> Self {
        Self {
            amount,
            accepted: None,
            retracted: false,
        }
    }

    pub fn state(&self) -> OfferState {
        match (self.accepted, self.retracted) {
            (Some(true), _) => OfferState::Accepted,
            (Some(false), _) => OfferState::Rejected,
            (None, true) => OfferState::Retracted,
            (None, false) => OfferState::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.state() == OfferState::Pending
    }

    /// Transition: Pending → Accepted | Rejected
    pub fn respond(self, accept: bool) -> Result<Self, OfferError> {
        match self.state() {
            OfferState::Pending => Ok(Self {
                accepted: Some(accept),
                ..self
            }),
            state => Err(OfferError::Terminal(state)),
        }
    }

    /// Transition: Pending → Retracted. Also used when a newer offer
    /// supersedes this one.
    pub fn retract(self) -> Result<Self, OfferError> {
        match self.state() {
            OfferState::Pending => Ok(Self {
                retracted: true,
                ..self
            }),
            state => Err(OfferError::Terminal(state)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub sender_id: UserId,
    pub sender_name: String,
    pub time_sent: DateTime<Utc>,
    pub content: String,
    pub image: Option<String>,
    pub offer: Option<Offer>,
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        if self.offer.is_some() {
            MessageKind::Offer
        } else {
            MessageKind::Text
        }
    }

    pub fn offer_state(&self) -> Option<OfferState> {
        self.offer.map(|offer| offer.state())
    }
}

/// Validated content of a message about to be sent.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub content: String,
    pub image: Option<String>,
    pub offer_amount: Option<i64>,
}

impl NewMessage {
    pub fn kind(&self) -> MessageKind {
        if self.offer_amount.is_some() {
            MessageKind::Offer
        } else {
            MessageKind::Text
        }
    }
}

/// An actor's attempt to move an offer forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferAction {
    Respond { accept: bool },
    Retract,
}

impl OfferAction {
    /// Check `actor` may perform this action on `message` and compute the
    /// resulting offer. Pure: the caller persists the result.
    pub fn apply(
        self,
        message: &Message,
        thread: &MessageThread,
        actor: &UserId,
    ) -> Result<Offer, OfferError> {
        match self {
            Self::Respond { accept } => {
                if !thread.is_participant(actor) {
                    return Err(OfferError::NotParticipant);
                }
                if message.sender_id == *actor {
                    return Err(OfferError::OwnOffer);
                }
                let offer = message.offer.ok_or(OfferError::NotAnOffer)?;
                offer.respond(accept)
            }
            Self::Retract => {
                if message.sender_id != *actor {
                    return Err(OfferError::NotSender);
                }
                let offer = message.offer.ok_or(OfferError::NotRetractable)?;
                offer.retract()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfferError {
    NotAnOffer,
    NotParticipant,
    OwnOffer,
    NotSender,
    /// Only offers can be retracted; plain text stays as sent.
    NotRetractable,
    Terminal(OfferState),
}

impl OfferError {
    /// State conflicts are absorbed as no-ops; the rest are refusals.
    pub fn is_no_op(self) -> bool {
        matches!(self, Self::NotAnOffer | Self::Terminal(_))
    }
}

impl fmt::Display for OfferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAnOffer => write!(f, "Message is not an offer"),
            Self::NotParticipant => write!(f, "Only thread participants can respond to offers"),
            Self::OwnOffer => write!(f, "Cannot respond to your own offer"),
            Self::NotSender => write!(f, "Only the sender can retract an offer"),
            Self::NotRetractable => write!(f, "Only offers can be retracted"),
            Self::Terminal(state) => write!(f, "Offer is already {}", state.as_str()),
        }
    }
}

impl std::error::Error for OfferError {}

/// A thread together with its messages, newest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadView {
    pub thread: MessageThread,
    pub messages: Vec<Message>,
}

/// One of a seller's posts with the buyer threads opened on it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostThreads {
    pub post: Post,
    pub threads: Vec<MessageThread>,
}
