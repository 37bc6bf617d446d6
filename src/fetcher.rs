use chrono::{DateTime, TimeDelta, Utc};

use crate::error::FetchError;
use crate::message::RawMessage;

/// Hard ceiling on messages processed per batch.
pub const MAX_MESSAGES_CAP: usize = 1000;

/// What to search for: one sender, messages newer than `after`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageQuery {
    pub sender: String,
    pub after: DateTime<Utc>,
    pub max_results: usize,
}

impl MessageQuery {
    /// Query covering the `lookback_days` before `now`; `max_results` is capped.
    pub fn lookback(
        sender: impl Into<String>,
        lookback_days: u32,
        max_results: usize,
        now: DateTime<Utc>,
    ) -> Self {
        let window = TimeDelta::try_days(i64::from(lookback_days)).unwrap_or(TimeDelta::MAX);
        Self {
            sender: sender.into(),
            after: now.checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC),
            max_results: max_results.min(MAX_MESSAGES_CAP),
        }
    }

    /// Mail-search syntax, e.g. `from:no-reply@mail.foodpanda.pk after:1704067200`.
    pub fn to_search_string(&self) -> String {
        format!("from:{} after:{}", self.sender, self.after.timestamp())
    }
}

/// The external mail service: search by query, then fetch by id.
///
/// Implementations own timeouts and transport; callers never retry.
pub trait MessageFetcher {
    /// Ids in retrieval order, at most `query.max_results` of them.
    fn list_message_ids(&self, query: &MessageQuery) -> Result<Vec<String>, FetchError>;

    fn fetch_message(&self, id: &str) -> Result<RawMessage, FetchError>;
}

impl<T: MessageFetcher + ?Sized> MessageFetcher for &T {
    fn list_message_ids(&self, query: &MessageQuery) -> Result<Vec<String>, FetchError> {
        (**self).list_message_ids(query)
    }

    fn fetch_message(&self, id: &str) -> Result<RawMessage, FetchError> {
        (**self).fetch_message(id)
    }
}
