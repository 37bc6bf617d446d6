use serde::{Deserialize, Serialize};

/// One `name: value` header as delivered by the mail service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Message as handed to the extractor: headers plus a base64url body.
///
/// Owned by whoever fetched it; the extractor only borrows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    pub body: String,
}

impl RawMessage {
    pub fn new(id: impl Into<String>, headers: Vec<Header>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            headers,
            body: body.into(),
        }
    }

    /// First header whose name matches exactly (case-sensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name == name)
            .map(|h| h.value.as_str())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailMessage {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub payload: GmailPart,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailPart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: GmailBody,
    #[serde(default)]
    pub parts: Vec<GmailPart>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GmailBody {
    #[serde(default)]
    pub data: Option<String>,
}

fn first_plain_text_data(part: &GmailPart) -> Option<&str> {
    if part.mime_type.eq_ignore_ascii_case("text/plain") {
        if let Some(data) = part.body.data.as_deref() {
            return Some(data);
        }
    }
    part.parts.iter().find_map(first_plain_text_data)
}

impl GmailMessage {
    /// Picks the body the way receipts are usually laid out: the first
    /// `text/plain` part, else the first part, else the top-level body.
    pub fn into_raw(self) -> RawMessage {
        let payload = self.payload;
        let body = first_plain_text_data(&payload)
            .or_else(|| {
                payload
                    .parts
                    .first()
                    .and_then(|p| p.body.data.as_deref())
            })
            .or(payload.body.data.as_deref())
            .unwrap_or_default()
            .to_string();
        RawMessage {
            id: self.id,
            headers: payload.headers,
            body,
        }
    }
}

impl From<GmailMessage> for RawMessage {
    fn from(msg: GmailMessage) -> Self {
        msg.into_raw()
    }
}
