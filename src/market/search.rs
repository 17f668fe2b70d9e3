//! Search criteria → store-independent query plan.
//!
//! A plan is a list of typed filter clauses that are all AND-combined, an
//! optional relevance score and a single sort order. Stores translate plans
//! into whatever their query language is.

use chrono::{DateTime, NaiveDate, Utc};
use std::str::FromStr;

use crate::market::domain::{PostType, UnknownVariant};

/// Fixed cut-off for fuzzy title/author matches.
pub const SIMILARITY_THRESHOLD: f64 = 0.3;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortKey {
    #[default]
    DatePostedDesc,
    PriceAsc,
    EditionAsc,
    TitleAsc,
    AuthorAsc,
    RelevanceDesc,
}

impl SortKey {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DatePostedDesc => "date_posted",
            Self::PriceAsc => "price",
            Self::EditionAsc => "edition",
            Self::TitleAsc => "title",
            Self::AuthorAsc => "author",
            Self::RelevanceDesc => "relevance",
        }
    }
}

impl FromStr for SortKey {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "date_posted" => Ok(Self::DatePostedDesc),
            "price" => Ok(Self::PriceAsc),
            "edition" => Ok(Self::EditionAsc),
            "title" => Ok(Self::TitleAsc),
            "author" => Ok(Self::AuthorAsc),
            "relevance" => Ok(Self::RelevanceDesc),
            other => Err(UnknownVariant(other.to_string())),
        }
    }
}

/// What the user asked for. ISBN shape is checked by the form layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchCriteria {
    pub title: Option<String>,
    pub isbn: Option<String>,
    pub author: Option<String>,
    pub edition: Option<i64>,
    pub max_price: Option<i64>,
    pub posted_since: Option<NaiveDate>,
    pub post_type: Option<PostType>,
    pub sort: SortKey,
}

/// How a post's relevance score is computed.
#[derive(Debug, Clone, PartialEq)]
pub enum Relevance {
    Title(String),
    Author(String),
    /// sim(author) + sim(title); ranges over [0, 2]
    TitleAndAuthor { title: String, author: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FilterClause {
    /// score > threshold, or an exact ISBN hit when one was supplied
    Relevant { or_isbn: Option<String> },
    Isbn(String),
    Edition(i64),
    MaxPrice(i64),
    PostedSince(DateTime<Utc>),
    PostType(PostType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    DatePostedDesc,
    PriceAsc,
    EditionAsc,
    TitleAsc,
    AuthorAsc,
    RelevanceDesc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchPlan {
    pub relevance: Option<Relevance>,
    pub clauses: Vec<FilterClause>,
    pub sort: SortOrder,
}

impl SearchPlan {
    pub fn build(criteria: &SearchCriteria) -> Self {
        let relevance = match (criteria.title.clone(), criteria.author.clone()) {
            (Some(title), Some(author)) => Some(Relevance::TitleAndAuthor { title, author }),
            (Some(title), None) => Some(Relevance::Title(title)),
            (None, Some(author)) => Some(Relevance::Author(author)),
            (None, None) => None,
        };

        let mut clauses = Vec::new();
        match (&relevance, &criteria.isbn) {
            (Some(_), isbn) => clauses.push(FilterClause::Relevant {
                or_isbn: isbn.clone(),
            }),
            (None, Some(isbn)) => clauses.push(FilterClause::Isbn(isbn.clone())),
            (None, None) => {}
        }
        if let Some(edition) = criteria.edition {
            clauses.push(FilterClause::Edition(edition));
        }
        if let Some(max_price) = criteria.max_price {
            clauses.push(FilterClause::MaxPrice(max_price));
        }
        if let Some(since) = criteria.posted_since {
            clauses.push(FilterClause::PostedSince(start_of_day(since)));
        }
        if let Some(post_type) = criteria.post_type {
            clauses.push(FilterClause::PostType(post_type));
        }

        let sort = match criteria.sort {
            SortKey::DatePostedDesc => SortOrder::DatePostedDesc,
            SortKey::PriceAsc => SortOrder::PriceAsc,
            SortKey::EditionAsc => SortOrder::EditionAsc,
            SortKey::TitleAsc => SortOrder::TitleAsc,
            SortKey::AuthorAsc => SortOrder::AuthorAsc,
            SortKey::RelevanceDesc if relevance.is_some() => SortOrder::RelevanceDesc,
            SortKey::RelevanceDesc => SortOrder::DatePostedDesc,
        };

        Self {
            relevance,
            clauses,
            sort,
        }
    }

    /// Plan for an empty search: everything, newest first.
    pub fn everything() -> Self {
        Self::build(&SearchCriteria::default())
    }
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_criteria_has_no_clauses_and_sorts_by_date() {
        let plan = SearchPlan::everything();
        assert!(plan.clauses.is_empty());
        assert!(plan.relevance.is_none());
        assert_eq!(plan.sort, SortOrder::DatePostedDesc);
    }

    #[test]
    fn title_and_author_combine_into_one_score() {
        let plan = SearchPlan::build(&SearchCriteria {
            title: Some("Calculus".into()),
            author: Some("Stewart".into()),
            ..Default::default()
        });
        assert_eq!(
            plan.relevance,
            Some(Relevance::TitleAndAuthor {
                title: "Calculus".into(),
                author: "Stewart".into()
            })
        );
        assert_eq!(plan.clauses, vec![FilterClause::Relevant { or_isbn: None }]);
    }

    #[test]
    fn isbn_is_or_combined_with_similarity() {
        let plan = SearchPlan::build(&SearchCriteria {
            author: Some("Stewart".into()),
            isbn: Some("9780131469686".into()),
            ..Default::default()
        });
        assert_eq!(plan.relevance, Some(Relevance::Author("Stewart".into())));
        assert_eq!(
            plan.clauses,
            vec![FilterClause::Relevant {
                or_isbn: Some("9780131469686".into())
            }]
        );
    }

    #[test]
    fn isbn_alone_is_the_sole_text_filter() {
        let plan = SearchPlan::build(&SearchCriteria {
            isbn: Some("0131469681".into()),
            edition: Some(3),
            ..Default::default()
        });
        assert!(plan.relevance.is_none());
        assert_eq!(
            plan.clauses,
            vec![
                FilterClause::Isbn("0131469681".into()),
                FilterClause::Edition(3)
            ]
        );
    }

    #[test]
    fn numeric_and_date_filters_are_anded() {
        let plan = SearchPlan::build(&SearchCriteria {
            max_price: Some(50),
            posted_since: NaiveDate::from_ymd_opt(2024, 2, 1),
            post_type: Some(PostType::Textbook),
            ..Default::default()
        });
        assert_eq!(
            plan.clauses,
            vec![
                FilterClause::MaxPrice(50),
                FilterClause::PostedSince(
                    NaiveDate::from_ymd_opt(2024, 2, 1)
                        .unwrap()
                        .and_hms_opt(0, 0, 0)
                        .unwrap()
                        .and_utc()
                ),
                FilterClause::PostType(PostType::Textbook),
            ]
        );
    }

    #[test]
    fn relevance_sort_falls_back_without_text_filters() {
        let plan = SearchPlan::build(&SearchCriteria {
            max_price: Some(50),
            sort: SortKey::RelevanceDesc,
            ..Default::default()
        });
        assert_eq!(plan.sort, SortOrder::DatePostedDesc);

        let ranked = SearchPlan::build(&SearchCriteria {
            title: Some("Physics".into()),
            sort: SortKey::RelevanceDesc,
            ..Default::default()
        });
        assert_eq!(ranked.sort, SortOrder::RelevanceDesc);
    }

    #[test]
    fn sort_keys_parse_from_form_values() {
        for key in [
            SortKey::DatePostedDesc,
            SortKey::PriceAsc,
            SortKey::EditionAsc,
            SortKey::TitleAsc,
            SortKey::AuthorAsc,
            SortKey::RelevanceDesc,
        ] {
            assert_eq!(key.as_str().parse::<SortKey>().unwrap(), key);
        }
        assert!("-similarity".parse::<SortKey>().is_err());
    }
}
