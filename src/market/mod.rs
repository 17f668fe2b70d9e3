pub mod command;
pub mod domain;
pub mod repository;
pub mod search;
pub mod service;
pub mod similarity;
pub mod validation;

use thiserror::Error;
use validator::ValidationErrors;

pub use command::{Command, CommandOutput};
pub use domain::{
    Message, MessageId, MessageThread, Offer, OfferAction, OfferError, OfferState, Post, PostId,
    PostListing, PostThreads, ThreadId, ThreadView, UserId,
};
pub use repository::{MarketRepository, RepositoryError, SqliteMarketRepository};
pub use search::{SearchCriteria, SearchPlan, SortKey};
pub use service::{Marketplace, OfferOutcome};
pub use validation::{MessageForm, PostForm, SearchForm};

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationErrors),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Repository error: {0}")]
    Repository(RepositoryError),
}

impl From<RepositoryError> for MarketError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => MarketError::NotFound(what),
            other => MarketError::Repository(other),
        }
    }
}
