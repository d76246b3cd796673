//! Query normalization + validation.
//!
//! A query that fails validation never reaches the upstream search client.

/// Validation rules, taken from [`crate::config::Config`] at startup.
#[derive(Clone, Debug)]
pub struct QueryRules {
    pub min_len: usize,
    pub max_len: usize,
    pub blocked_terms: Vec<String>,
}

/// A validated, normalized search query.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Query {
    text: String,
    is_url: bool,
}

/// Why a raw query was rejected. Each variant maps to a specific
/// user-facing message; none of these are retried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvalidQuery {
    TooShort { min: usize },
    TooLong { max: usize },
    BlockedTerm,
}

impl InvalidQuery {
    pub fn user_message(&self) -> String {
        match self {
            InvalidQuery::TooShort { min } => {
                format!("Query too short (minimum {min} characters)")
            }
            InvalidQuery::TooLong { max } => {
                format!("Query too long (maximum {max} characters)")
            }
            InvalidQuery::BlockedTerm => "Query contains restricted terms".to_string(),
        }
    }
}

impl Query {
    /// Trim, bound-check and blacklist-check a raw query string.
    ///
    /// The blacklist is a case-insensitive substring match.
    pub fn parse(raw: &str, rules: &QueryRules) -> Result<Self, InvalidQuery> {
        let text = raw.trim().to_string();
        let len = text.chars().count();

        if len < rules.min_len {
            return Err(InvalidQuery::TooShort {
                min: rules.min_len,
            });
        }
        if len > rules.max_len {
            return Err(InvalidQuery::TooLong {
                max: rules.max_len,
            });
        }

        let lower = text.to_lowercase();
        if rules.blocked_terms.iter().any(|t| lower.contains(t)) {
            return Err(InvalidQuery::BlockedTerm);
        }

        let is_url = text.starts_with("http://") || text.starts_with("https://");
        Ok(Self { text, is_url })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// True iff the query carries an `http://`/`https://` prefix; decides
    /// whether the upstream request uses the `url` or `keyword` parameter.
    pub fn is_url(&self) -> bool {
        self.is_url
    }
}
