//! Query service: cache lookup first, external answer service on a miss.

use tracing::{debug, info, warn};

use crate::cache::{preview, CacheStats, CacheStore, StoreError};
use crate::client::{Answerer, GenerateError, ServiceStatus};

/// Longest question accepted, in characters.
pub const MAX_QUESTION_CHARS: usize = 500;

/// Where an answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Live,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Answer {
    pub text: String,
    pub source: Source,
}

/// Per-query failure. Nothing is cached when one of these is returned.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("please type a question first")]
    EmptyQuestion,

    #[error("question is too long ({0} characters, max 500)")]
    QuestionTooLong(usize),

    #[error("answer failed: {0}")]
    Service(#[from] GenerateError),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error("the answer cache is disabled")]
    CacheDisabled,
}

impl QueryError {
    /// Whether the user may simply resubmit.
    pub fn is_retryable(&self) -> bool {
        match self {
            QueryError::Service(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Answers questions, memoizing successful answers in an optional [`CacheStore`].
pub struct QueryService {
    store: Option<CacheStore>,
    answerer: Box<dyn Answerer>,
}

impl QueryService {
    /// `store = None` disables caching entirely.
    pub fn new(store: Option<CacheStore>, answerer: Box<dyn Answerer>) -> Self {
        Self { store, answerer }
    }

    pub fn cache_enabled(&self) -> bool {
        self.store.is_some()
    }

    pub async fn answer(&self, question: &str) -> Result<Answer, QueryError> {
        validate(question)?;

        if let Some(text) = self.cached(question) {
            return Ok(Answer {
                text,
                source: Source::Cache,
            });
        }

        info!("Asking answer service: {}", preview(question));
        let text = self.answerer.generate(question).await?;

        if let Some(store) = &self.store {
            if let Err(e) = store.store(question, &text) {
                warn!("Failed to cache answer: {}", e);
            }
        }

        Ok(Answer {
            text,
            source: Source::Live,
        })
    }

    /// A read failure degrades to a miss.
    fn cached(&self, question: &str) -> Option<String> {
        let store = self.store.as_ref()?;
        match store.lookup(question) {
            Ok(Some(entry)) => Some(entry.answer),
            Ok(None) => None,
            Err(e) => {
                warn!("Cache lookup failed, treating as miss: {}", e);
                None
            }
        }
    }

    pub fn stats(&self) -> Result<CacheStats, QueryError> {
        Ok(self.store()?.stats()?)
    }

    pub fn clear(&self) -> Result<usize, QueryError> {
        Ok(self.store()?.clear()?)
    }

    pub async fn check_service(&self) -> Result<ServiceStatus, QueryError> {
        debug!("Checking answer service");
        Ok(self.answerer.check().await?)
    }

    fn store(&self) -> Result<&CacheStore, QueryError> {
        self.store.as_ref().ok_or(QueryError::CacheDisabled)
    }
}

fn validate(question: &str) -> Result<(), QueryError> {
    if question.trim().is_empty() {
        return Err(QueryError::EmptyQuestion);
    }
    let len = question.chars().count();
    if len > MAX_QUESTION_CHARS {
        return Err(QueryError::QuestionTooLong(len));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_questions_are_rejected() {
        assert!(matches!(validate(""), Err(QueryError::EmptyQuestion)));
        assert!(matches!(validate(" \n\t"), Err(QueryError::EmptyQuestion)));
    }

    #[test]
    fn length_limit_counts_characters() {
        let at_limit = "é".repeat(MAX_QUESTION_CHARS);
        assert!(validate(&at_limit).is_ok());

        let over = "a".repeat(MAX_QUESTION_CHARS + 1);
        assert!(matches!(
            validate(&over),
            Err(QueryError::QuestionTooLong(n)) if n == MAX_QUESTION_CHARS + 1
        ));
    }

    #[test]
    fn retryable_follows_service_error_kind() {
        assert!(QueryError::Service(GenerateError::Network("down".into())).is_retryable());
        assert!(!QueryError::Service(GenerateError::Authentication("bad".into())).is_retryable());
        assert!(!QueryError::EmptyQuestion.is_retryable());
    }
}
