//! Trigram similarity for fuzzy title/author matching.
//!
//! Follows the usual trigram model: text is lower-cased and split into words
//! on non-alphanumeric characters, each word is padded with two leading blanks
//! and one trailing blank, and the distinct 3-character windows form the
//! word's trigram set. Similarity is the shared trigram count over the size of
//! the union of both sets, so it always lies in `[0, 1]`.

use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use std::collections::BTreeSet;

pub type Trigram = [char; 3];

/// Distinct trigrams of `text`.
pub fn trigrams(text: &str) -> BTreeSet<Trigram> {
    let mut set = BTreeSet::new();
    let lowered = text.to_lowercase();

    for word in lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let padded: Vec<char> = [' ', ' ']
            .into_iter()
            .chain(word.chars())
            .chain(std::iter::once(' '))
            .collect();
        for window in padded.windows(3) {
            set.insert([window[0], window[1], window[2]]);
        }
    }

    set
}

pub fn similarity(a: &str, b: &str) -> f64 {
    let left = trigrams(a);
    let right = trigrams(b);

    let shared = left.intersection(&right).count();
    let union = left.len() + right.len() - shared;
    if union == 0 {
        return 0.0;
    }
    shared as f64 / union as f64
}

/// Expose `similarity(a, b)` to SQL so search plans can score and rank in the
/// database. NULL on either side scores 0.
pub fn register_sql_function(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        "similarity",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let a: Option<String> = ctx.get(0)?;
            let b: Option<String> = ctx.get(1)?;
            Ok(match (a, b) {
                (Some(a), Some(b)) => similarity(&a, &b),
                _ => 0.0,
            })
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn identical_strings_score_one() {
        assert!(close(similarity("Calculus", "calculus"), 1.0));
    }

    #[test]
    fn unrelated_strings_score_zero() {
        assert!(close(similarity("abc", "xyz"), 0.0));
    }

    #[test]
    fn empty_input_scores_zero() {
        assert!(close(similarity("", ""), 0.0));
        assert!(close(similarity("", "calculus"), 0.0));
    }

    #[test]
    fn padding_matches_word_boundaries() {
        // "word" shares 4 of 11 distinct trigrams with "two words"
        assert!(close(similarity("word", "two words"), 4.0 / 11.0));
    }

    #[test]
    fn extra_words_dilute_the_score() {
        assert!(close(similarity("Calculus", "Calculus II"), 0.75));
        assert!(similarity("Calculus", "Calculus: Early Transcendentals") < 0.3);
    }

    #[test]
    fn punctuation_splits_words() {
        assert_eq!(trigrams("Smith, J."), trigrams("smith j"));
    }

    #[test]
    fn score_is_symmetric() {
        let a = "Organic Chemistry";
        let b = "Chemistry of Organics";
        assert!(close(similarity(a, b), similarity(b, a)));
    }

    #[test]
    fn sql_function_matches_rust_function() {
        let conn = Connection::open_in_memory().unwrap();
        register_sql_function(&conn).unwrap();

        let score: f64 = conn
            .query_row("SELECT similarity('word', 'two words')", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert!(close(score, similarity("word", "two words")));

        let null_score: f64 = conn
            .query_row("SELECT similarity(NULL, 'x')", [], |row| row.get(0))
            .unwrap();
        assert!(close(null_score, 0.0));
    }
}
