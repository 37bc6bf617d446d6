use panda_expense::{GmailMessage, OrderColumns, OrderExtractor, RawMessage, DEFAULT_MERCHANT};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::env;
use std::io::{self, Read};

#[derive(Debug, Deserialize)]
struct AdapterRequest {
    schema_version: u64,
    #[serde(default)]
    merchant_default: Option<String>,
    messages: Vec<AdapterMessage>,
}

/// Either the flat `{id, headers, body}` shape or a Gmail `messages.get` body.
/// An object with a `payload` key is the Gmail shape; anything else must be a
/// valid flat message.
#[derive(Debug)]
enum AdapterMessage {
    Raw(RawMessage),
    Gmail(GmailMessage),
}

impl<'de> Deserialize<'de> for AdapterMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        let is_gmail = value
            .as_object()
            .map(|obj| obj.contains_key("payload"))
            .unwrap_or(false);
        if is_gmail {
            serde_json::from_value(value)
                .map(AdapterMessage::Gmail)
                .map_err(|e| D::Error::custom(format!("invalid gmail message: {e}")))
        } else {
            serde_json::from_value(value)
                .map(AdapterMessage::Raw)
                .map_err(|e| D::Error::custom(format!("invalid message: {e}")))
        }
    }
}

impl From<AdapterMessage> for RawMessage {
    fn from(msg: AdapterMessage) -> Self {
        match msg {
            AdapterMessage::Raw(raw) => raw,
            AdapterMessage::Gmail(gmail) => gmail.into_raw(),
        }
    }
}

#[derive(Debug, Serialize)]
struct AdapterErrorBody {
    category: String,
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status")]
enum AdapterResponse {
    #[serde(rename = "success")]
    Success { payload: Value },
    #[serde(rename = "error")]
    Error { error: AdapterErrorBody },
}

fn parse_bool_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|arg| arg == flag)
}

fn read_stdin_json() -> Result<Value, String> {
    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .map_err(|e| format!("failed to read stdin: {e}"))?;
    if raw.trim().is_empty() {
        return Err("empty stdin request".to_string());
    }
    serde_json::from_str::<Value>(&raw).map_err(|e| format!("invalid JSON request: {e}"))
}

fn dispatch(req: AdapterRequest) -> Result<Value, String> {
    if req.schema_version != 1 {
        return Err(format!(
            "unsupported schema_version: {}",
            req.schema_version
        ));
    }
    let merchant_default = req
        .merchant_default
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_MERCHANT);
    let extractor = OrderExtractor::new(merchant_default);

    let orders = req
        .messages
        .into_iter()
        .map(RawMessage::from)
        .map(|msg| extractor.extract(&msg))
        .collect::<Vec<_>>();
    let columns = orders.iter().collect::<OrderColumns>();
    let total: f64 = columns.amounts.iter().sum();

    Ok(json!({
        "count": orders.len(),
        "partial_count": orders.iter().filter(|o| o.is_partial()).count(),
        "total": total,
        "columns": columns,
        "orders": orders,
    }))
}

fn handle_request(request: Value, verbose: bool) -> AdapterResponse {
    let result = serde_json::from_value::<AdapterRequest>(request)
        .map_err(|e| format!("request root invalid: {e}"))
        .and_then(|req| {
            if verbose {
                eprintln!(
                    "[order_extract_adapter] messages={}",
                    req.messages.len()
                );
            }
            dispatch(req)
        });
    match result {
        Ok(payload) => AdapterResponse::Success { payload },
        Err(message) => error_response(message),
    }
}

fn error_response(message: String) -> AdapterResponse {
    AdapterResponse::Error {
        error: AdapterErrorBody {
            category: "ADAPTER_PROTOCOL_ERROR".to_string(),
            message,
            error_type: "AdapterError".to_string(),
        },
    }
}

fn main() {
    let args = env::args().skip(1).collect::<Vec<_>>();
    let pretty = parse_bool_flag(&args, "--pretty");
    let verbose = parse_bool_flag(&args, "--verbose");

    let resp = match read_stdin_json() {
        Ok(request) => handle_request(request, verbose),
        Err(message) => error_response(message),
    };

    let out = if pretty {
        serde_json::to_string_pretty(&resp)
    } else {
        serde_json::to_string(&resp)
    }
    .unwrap_or_else(|e| {
        json!({
            "status": "error",
            "error": {
                "category": "ADAPTER_PROTOCOL_ERROR",
                "message": format!("serialize response failed: {e}"),
                "type": "SerializeError",
            }
        })
        .to_string()
    });

    print!("{out}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use panda_expense::order_extract::encode_body;

    fn success_payload(request: Value) -> Value {
        match handle_request(request, false) {
            AdapterResponse::Success { payload } => payload,
            AdapterResponse::Error { error } => panic!("unexpected error: {}", error.message),
        }
    }

    fn error_message(request: Value) -> String {
        match handle_request(request, false) {
            AdapterResponse::Error { error } => {
                assert_eq!(error.category, "ADAPTER_PROTOCOL_ERROR");
                error.message
            }
            AdapterResponse::Success { payload } => panic!("unexpected success: {payload}"),
        }
    }

    #[test]
    fn flat_request_yields_columns() {
        let payload = success_payload(json!({
            "schema_version": 1,
            "messages": [{
                "id": "m1",
                "headers": [{"name": "Date", "value": "Tue, 02 Jan 2024 19:05:11 +0500"}],
                "body": encode_body("Partner: Name: Karachi Broast\nTotal PKR 1,250.50\n"),
            }],
        }));
        assert_eq!(payload["count"], 1);
        assert_eq!(payload["partial_count"], 0);
        assert_eq!(payload["columns"]["amounts"], json!([1250.5]));
        assert_eq!(payload["columns"]["merchants"], json!(["Karachi Broast"]));
        assert_eq!(
            payload["columns"]["timestamps"],
            json!(["Tue, 02 Jan 2024 19:05:11 +0500"])
        );
    }

    #[test]
    fn gmail_shaped_request_uses_plain_text_part() {
        let payload = success_payload(json!({
            "schema_version": 1,
            "messages": [{
                "id": "18c",
                "payload": {
                    "mimeType": "multipart/alternative",
                    "headers": [{"name": "Date", "value": "Wed, 3 Jan 2024 13:45:00 +0500"}],
                    "parts": [
                        {"mimeType": "text/html", "body": {"data": encode_body("<b>x</b>")}},
                        {"mimeType": "text/plain", "body": {"data": encode_body("Received Rs. 899\n")}},
                    ],
                },
            }],
        }));
        assert_eq!(payload["columns"]["amounts"], json!([899.0]));
        assert_eq!(payload["columns"]["merchants"], json!(["Unknown"]));
        assert_eq!(payload["columns"]["partial"], json!([true]));
    }

    #[test]
    fn unsupported_schema_version_is_rejected() {
        let message = error_message(json!({"schema_version": 2, "messages": []}));
        assert!(message.contains("unsupported schema_version: 2"));
    }

    #[test]
    fn blank_merchant_default_falls_back_to_unknown() {
        let request = |merchant_default: &str| {
            json!({
                "schema_version": 1,
                "merchant_default": merchant_default,
                "messages": [{"id": "a", "body": encode_body("Total PKR 5\n")}],
            })
        };
        let blank = success_payload(request("   "));
        assert_eq!(blank["columns"]["merchants"], json!([DEFAULT_MERCHANT]));
        let custom = success_payload(request("  Panda Mart "));
        assert_eq!(custom["columns"]["merchants"], json!(["Panda Mart"]));
    }

    #[test]
    fn malformed_flat_message_is_an_error_not_a_blank_order() {
        let message = error_message(json!({
            "schema_version": 1,
            "messages": [
                {"id": "a", "headers": "oops", "body": encode_body("Total PKR 5\n")},
                {"id": "b", "headers": [], "body": encode_body("Total PKR 5\n")},
            ],
        }));
        assert!(message.contains("request root invalid"));
        assert!(message.contains("invalid message"));

        let missing_body = error_message(json!({
            "schema_version": 1,
            "messages": [{"id": "c", "headers": []}],
        }));
        assert!(missing_body.contains("invalid message"));
    }
}
