//! Lexical sentiment scoring.
//!
//! A deliberately small heuristic: count tokens found in a positive and a
//! negative word list and normalise the difference by the square root of the
//! number of meaningful words, so one strong word in a one-line post does not
//! swing as hard as the same word repeated through a rant.
//!
//! ```text
//! score = clamp((positive - negative) / sqrt(words longer than 2 chars), -1, 1)
//! ```

use once_cell::sync::Lazy;
use std::collections::HashSet;

static POSITIVE_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "good", "great", "excellent", "amazing", "awesome", "best", "love", "loved",
        "happy", "helpful", "recommend", "recommended", "perfect", "fantastic", "nice",
        "easy", "wonderful", "useful", "reliable", "impressed", "success", "successful",
        "thanks", "worth", "affordable", "fast", "solid", "glad", "interested",
        "excited",
    ]
    .into_iter()
    .collect()
});

static NEGATIVE_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "bad", "terrible", "awful", "horrible", "worst", "hate", "hated", "poor",
        "broken", "problem", "problems", "issue", "issues", "disappointed",
        "disappointing", "expensive", "difficult", "frustrated", "frustrating", "scam",
        "useless", "annoying", "slow", "fail", "failed", "failing", "bug", "buggy",
        "unreliable", "waste",
    ]
    .into_iter()
    .collect()
});

/// Score `text` in `[-1.0, 1.0]`. Empty or wordless text scores `0.0`.
pub fn score(text: &str) -> f64 {
    let lowered = text.to_lowercase();

    let mut positive = 0i64;
    let mut negative = 0i64;
    let mut total_words = 0usize;

    for token in lowered.split_whitespace() {
        if POSITIVE_WORDS.contains(token) {
            positive += 1;
        } else if NEGATIVE_WORDS.contains(token) {
            negative += 1;
        }
        if token.chars().count() > 2 {
            total_words += 1;
        }
    }

    if total_words == 0 {
        return 0.0;
    }

    let raw = (positive - negative) as f64 / (total_words as f64).sqrt();
    raw.clamp(-1.0, 1.0)
}
