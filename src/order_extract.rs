//! Turns one order-confirmation message into one [`Order`].
//!
//! Extraction is total: every field that cannot be recovered is replaced by its
//! sentinel and flagged [`FieldOrigin::Defaulted`], and a body that does not
//! decode at all yields an all-sentinel record instead of an error.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

use crate::message::RawMessage;

pub const NO_DATE: &str = "No Date";
pub const DEFAULT_MERCHANT: &str = "Unknown";
pub const DEFAULT_AMOUNT: f64 = 0.0;

const DATE_HEADER: &str = "Date";

/// base64url that accepts bodies with or without `=` padding.
const BODY_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Amount anchors, tried in order; the first one that captures wins.
pub const AMOUNT_ANCHORS: [AmountAnchor; 2] = [
    AmountAnchor {
        label: "Total",
        currency: "PKR",
    },
    AmountAnchor {
        label: "Received",
        currency: "Rs.",
    },
];

fn merchant_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Partner:\s+Name:(.*)").expect("invalid merchant regex"))
}

/// Whether a field was read from the message or replaced by its sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOrigin {
    Extracted,
    Defaulted,
}

impl FieldOrigin {
    fn of<T>(value: &Option<T>) -> Self {
        if value.is_some() {
            FieldOrigin::Extracted
        } else {
            FieldOrigin::Defaulted
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub timestamp: FieldOrigin,
    pub amount: FieldOrigin,
    pub merchant: FieldOrigin,
}

impl Provenance {
    pub fn all(origin: FieldOrigin) -> Self {
        Self {
            timestamp: origin,
            amount: origin,
            merchant: origin,
        }
    }
}

/// One normalized expense record.
///
/// `timestamp` is the raw `Date` header text; parsing it is left to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub timestamp: String,
    pub amount: f64,
    pub merchant: String,
    pub provenance: Provenance,
}

impl Order {
    /// True when at least one field holds a sentinel instead of message data.
    pub fn is_partial(&self) -> bool {
        self.provenance != Provenance::all(FieldOrigin::Extracted)
    }
}

/// A two-stage text anchor such as `Total ... PKR 1,250.50`.
///
/// Capture semantics: take the text after the first `label`, cut at the next
/// `label`; inside it take the text after the first `currency`, cut at the
/// next `currency` or line break, and trim it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountAnchor {
    pub label: &'static str,
    pub currency: &'static str,
}

impl AmountAnchor {
    pub fn capture<'a>(&self, text: &'a str) -> Option<&'a str> {
        let (_, rest) = text.split_once(self.label)?;
        let segment = cut_at(rest, self.label);
        let (_, value) = segment.split_once(self.currency)?;
        let value = cut_at(value, self.currency);
        Some(cut_at(value, "\n").trim())
    }
}

fn cut_at<'a>(text: &'a str, stop: &str) -> &'a str {
    text.find(stop).map_or(text, |end| &text[..end])
}

/// Parses `1,250.50`-style text; thousands separators are dropped.
pub fn parse_amount(raw: &str) -> Option<f64> {
    raw.replace(',', "")
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

/// Decodes a base64url body into UTF-8 text.
pub fn decode_body(body: &str) -> Option<String> {
    let bytes = BODY_ENGINE.decode(body.trim()).ok()?;
    String::from_utf8(bytes).ok()
}

/// Encodes plain text into the body form [`decode_body`] accepts.
pub fn encode_body(text: &str) -> String {
    BODY_ENGINE.encode(text.as_bytes())
}

/// First anchor that captures decides the amount; unparseable text is not
/// retried with later anchors.
pub fn extract_amount(text: &str) -> Option<f64> {
    AMOUNT_ANCHORS
        .iter()
        .find_map(|anchor| anchor.capture(text))
        .and_then(parse_amount)
}

pub fn extract_merchant(text: &str) -> Option<String> {
    merchant_re()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

#[derive(Debug, Clone)]
pub struct OrderExtractor {
    merchant_default: String,
}

impl Default for OrderExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_MERCHANT)
    }
}

impl OrderExtractor {
    pub fn new(merchant_default: impl Into<String>) -> Self {
        Self {
            merchant_default: merchant_default.into(),
        }
    }

    pub fn merchant_default(&self) -> &str {
        &self.merchant_default
    }

    /// Record used when the body cannot be decoded at all.
    pub fn unparsed(&self) -> Order {
        Order {
            timestamp: NO_DATE.to_string(),
            amount: DEFAULT_AMOUNT,
            merchant: self.merchant_default.clone(),
            provenance: Provenance::all(FieldOrigin::Defaulted),
        }
    }

    pub fn extract(&self, msg: &RawMessage) -> Order {
        let Some(text) = decode_body(&msg.body) else {
            debug!(id = %msg.id, "message body did not decode; using sentinels");
            return self.unparsed();
        };

        let timestamp = msg.header(DATE_HEADER).map(str::to_string);
        let amount = extract_amount(&text);
        let merchant = extract_merchant(&text);

        let provenance = Provenance {
            timestamp: FieldOrigin::of(&timestamp),
            amount: FieldOrigin::of(&amount),
            merchant: FieldOrigin::of(&merchant),
        };
        Order {
            timestamp: timestamp.unwrap_or_else(|| NO_DATE.to_string()),
            amount: amount.unwrap_or(DEFAULT_AMOUNT),
            merchant: merchant.unwrap_or_else(|| self.merchant_default.clone()),
            provenance,
        }
    }
}
