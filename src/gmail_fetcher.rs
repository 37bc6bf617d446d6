//! Blocking client for the Gmail v1 REST API.
//!
//! Only the two calls the pipeline needs: `messages.list` (paged) and
//! `messages.get`. Obtaining the OAuth access token is someone else's job.

use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::FetchError;
use crate::fetcher::{MessageFetcher, MessageQuery};
use crate::message::{GmailMessage, RawMessage};

pub const DEFAULT_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1/users/me";
pub const ACCESS_TOKEN_ENV: &str = "GMAIL_ACCESS_TOKEN";

/// Largest `maxResults` the list endpoint honors.
const MAX_PAGE_SIZE: usize = 500;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPage {
    #[serde(default)]
    messages: Vec<MessageRef>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    id: String,
}

/// Appends a page of ids up to `max`; returns the token for the next page
/// only when more ids are still wanted.
fn append_page(ids: &mut Vec<String>, page: ListPage, max: usize) -> Option<String> {
    let room = max.saturating_sub(ids.len());
    ids.extend(page.messages.into_iter().take(room).map(|m| m.id));
    if ids.len() >= max {
        return None;
    }
    page.next_page_token.filter(|t| !t.is_empty())
}

pub struct GmailFetcher {
    client: Client,
    api_base: String,
    access_token: String,
}

impl GmailFetcher {
    pub fn new(api_base: &str, access_token: impl Into<String>) -> Result<Self, FetchError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        })
    }

    /// Reads the bearer token from `GMAIL_ACCESS_TOKEN`.
    pub fn from_env(api_base: &str) -> Result<Self, FetchError> {
        let token = std::env::var(ACCESS_TOKEN_ENV)
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(FetchError::MissingToken {
                env_var: ACCESS_TOKEN_ENV,
            })?;
        Self::new(api_base, token)
    }

    fn list_url(&self) -> String {
        format!("{}/messages", self.api_base)
    }

    fn message_url(&self, id: &str) -> String {
        format!("{}/messages/{id}", self.api_base)
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let resp = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(query)
            .send()?;
        let status = resp.status();
        let body = resp.text()?;
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

impl MessageFetcher for GmailFetcher {
    fn list_message_ids(&self, query: &MessageQuery) -> Result<Vec<String>, FetchError> {
        let search = query.to_search_string();
        info!(query = %search, max = query.max_results, "listing messages");

        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;
        while ids.len() < query.max_results {
            let page_size = (query.max_results - ids.len()).min(MAX_PAGE_SIZE);
            let mut params = vec![("q", search.clone()), ("maxResults", page_size.to_string())];
            if let Some(token) = page_token.take() {
                params.push(("pageToken", token));
            }
            let page: ListPage = self.get_json(&self.list_url(), &params)?;
            debug!(page_len = page.messages.len(), "received message page");
            match append_page(&mut ids, page, query.max_results) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(ids)
    }

    fn fetch_message(&self, id: &str) -> Result<RawMessage, FetchError> {
        let msg: GmailMessage =
            self.get_json(&self.message_url(id), &[("format", "full".to_string())])?;
        Ok(msg.into_raw())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(json: &str) -> ListPage {
        serde_json::from_str(json).expect("parse list page")
    }

    #[test]
    fn append_page_stops_at_max_and_drops_token() {
        let mut ids = vec!["a".to_string()];
        let next = append_page(
            &mut ids,
            page(r#"{"messages":[{"id":"b","threadId":"b"},{"id":"c"},{"id":"d"}],"nextPageToken":"p2"}"#),
            3,
        );
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(next, None);
    }

    #[test]
    fn append_page_forwards_token_while_more_wanted() {
        let mut ids = Vec::new();
        let next = append_page(
            &mut ids,
            page(r#"{"messages":[{"id":"x"}],"nextPageToken":"p2","resultSizeEstimate":2}"#),
            10,
        );
        assert_eq!(ids, vec!["x"]);
        assert_eq!(next.as_deref(), Some("p2"));
    }

    #[test]
    fn empty_mailbox_page_has_no_messages_key() {
        let mut ids = Vec::new();
        let next = append_page(&mut ids, page(r#"{"resultSizeEstimate":0}"#), 10);
        assert!(ids.is_empty());
        assert_eq!(next, None);
    }

    #[test]
    fn urls_ignore_trailing_slash_on_base() {
        let fetcher = GmailFetcher::new("https://mail.example.test/v1/users/me/", "tok")
            .expect("build client");
        assert_eq!(
            fetcher.list_url(),
            "https://mail.example.test/v1/users/me/messages"
        );
        assert_eq!(
            fetcher.message_url("18c"),
            "https://mail.example.test/v1/users/me/messages/18c"
        );
    }
}
