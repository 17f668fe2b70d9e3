//! Incoming form schemas. Each form declares its field constraints with
//! `validator` and is checked in a single pass; the resulting
//! `ValidationErrors` carry one entry per failing field.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::{Validate, ValidationError, ValidationErrors};

use crate::market::domain::{NewMessage, PostDraft, PostType};
use crate::market::search::{SearchCriteria, SortKey};

pub const MAX_MESSAGE_CHARS: u64 = 1000;

/// HTML forms submit untouched inputs as empty strings.
fn empty_as_none<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let raw = Option::<String>::deserialize(de)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse::<T>().map(Some).map_err(serde::de::Error::custom),
    }
}

/// ISBNs are exactly 10 or 13 ASCII digits.
fn validate_isbn(isbn: &str) -> Result<(), ValidationError> {
    if !isbn.chars().all(|c| c.is_ascii_digit()) {
        return Err(ValidationError::new("isbn_numeric")
            .with_message(format!("\"{isbn}\" has non-numeric characters").into()));
    }
    if isbn.len() != 10 && isbn.len() != 13 {
        return Err(ValidationError::new("isbn_length")
            .with_message(format!("\"{isbn}\" has neither 10 nor 13 digits").into()));
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct PostForm {
    #[serde(default)]
    #[validate(length(min = 1, max = 100, message = "Title must be 1 to 100 characters"))]
    pub title: String,

    #[serde(default)]
    #[validate(custom(function = "validate_isbn"))]
    pub isbn: String,

    #[serde(default)]
    #[validate(length(min = 1, max = 50, message = "Author must be 1 to 50 characters"))]
    pub author: String,

    #[serde(default)]
    #[validate(length(min = 1, max = 350, message = "Description must be 1 to 350 characters"))]
    pub description: String,

    #[serde(default, deserialize_with = "empty_as_none")]
    #[validate(
        required(message = "Edition is required"),
        range(min = 1, max = 100, message = "Edition must be between 1 and 100")
    )]
    pub edition: Option<i64>,

    #[serde(default, deserialize_with = "empty_as_none")]
    #[validate(
        required(message = "Price is required"),
        range(min = 1, max = 400, message = "Price must be between 1 and 400")
    )]
    pub price: Option<i64>,

    #[serde(default, deserialize_with = "empty_as_none")]
    pub post_type: Option<PostType>,

    #[serde(default, deserialize_with = "empty_as_none")]
    pub image: Option<String>,
}

impl PostForm {
    pub fn into_draft(self) -> Result<PostDraft, ValidationErrors> {
        self.validate()?;
        Ok(PostDraft {
            title: self.title.trim().to_string(),
            isbn: self.isbn,
            author: self.author.trim().to_string(),
            description: self.description.trim().to_string(),
            price: self.price.unwrap_or_default(),
            edition: self.edition.unwrap_or_default(),
            post_type: self.post_type.unwrap_or_default(),
            image: self.image,
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct SearchForm {
    #[serde(default, deserialize_with = "empty_as_none")]
    #[validate(length(max = 100, message = "Title must be at most 100 characters"))]
    pub title: Option<String>,

    #[serde(default, deserialize_with = "empty_as_none")]
    #[validate(custom(function = "validate_isbn"))]
    pub isbn: Option<String>,

    #[serde(default, deserialize_with = "empty_as_none")]
    #[validate(length(max = 50, message = "Author must be at most 50 characters"))]
    pub author: Option<String>,

    #[serde(default, deserialize_with = "empty_as_none")]
    #[validate(range(min = 1, max = 100, message = "Edition must be between 1 and 100"))]
    pub edition: Option<i64>,

    #[serde(default, alias = "price", deserialize_with = "empty_as_none")]
    #[validate(range(min = 1, max = 400, message = "Maximum price must be between 1 and 400"))]
    pub max_price: Option<i64>,

    #[serde(default, deserialize_with = "empty_as_none")]
    pub posted_since: Option<NaiveDate>,

    #[serde(default, deserialize_with = "empty_as_none")]
    pub post_type: Option<PostType>,

    #[serde(default, deserialize_with = "empty_as_none")]
    pub sort_by: Option<SortKey>,
}

impl SearchForm {
    pub fn into_criteria(self) -> Result<SearchCriteria, ValidationErrors> {
        self.validate()?;
        Ok(SearchCriteria {
            title: self.title,
            isbn: self.isbn,
            author: self.author,
            edition: self.edition,
            max_price: self.max_price,
            posted_since: self.posted_since,
            post_type: self.post_type,
            sort: self.sort_by.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[validate(schema(function = "validate_message_body", skip_on_field_errors = false))]
pub struct MessageForm {
    #[serde(default, alias = "text")]
    #[validate(length(max = 1000, message = "Messages are limited to 1000 characters"))]
    pub content: String,

    #[serde(default, deserialize_with = "empty_as_none")]
    pub image: Option<String>,

    #[serde(default, deserialize_with = "empty_as_none")]
    #[validate(range(min = 1, max = 400, message = "Offers must be between 1 and 400"))]
    pub offer: Option<i64>,
}

fn validate_message_body(form: &MessageForm) -> Result<(), ValidationError> {
    if form.content.trim().is_empty() && form.offer.is_none() {
        return Err(ValidationError::new("empty_message")
            .with_message("A message needs text or an offer".into()));
    }
    Ok(())
}

impl MessageForm {
    pub fn into_message(self) -> Result<NewMessage, ValidationErrors> {
        self.validate()?;
        Ok(NewMessage {
            content: self.content.trim().to_string(),
            image: self.image,
            offer_amount: self.offer,
        })
    }
}

/// One failed constraint, flattened for clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl FieldError {
    /// A submitted value that could not be read as the field's type.
    pub fn malformed(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            code: "malformed".into(),
            message: message.into(),
        }
    }
}

pub fn field_errors(errors: &ValidationErrors) -> Vec<FieldError> {
    let mut flat: Vec<FieldError> = errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            let field = field.to_string();
            errs.iter().map(move |e| FieldError {
                field: field.clone(),
                code: e.code.to_string(),
                message: e
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| e.code.to_string()),
            })
        })
        .collect();
    flat.sort_by(|a, b| a.field.cmp(&b.field).then_with(|| a.code.cmp(&b.code)));
    flat
}
