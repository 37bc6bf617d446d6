use mailparse::{
    addrparse_header, dateparse, parse_headers, parse_mail, MailAddr, MailHeader, MailHeaderMap,
    ParsedMail,
};
use scraper::{Html, Selector};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::FetchError;
use crate::fetcher::{MessageFetcher, MessageQuery};
use crate::message::{Header, RawMessage};
use crate::order_extract::encode_body;

fn body_selector() -> &'static Selector {
    static SEL: OnceLock<Selector> = OnceLock::new();
    SEL.get_or_init(|| Selector::parse("body").expect("invalid body selector"))
}

fn is_eml(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.eq_ignore_ascii_case("eml"))
        .unwrap_or(false)
}

fn collect_eml_files(input_path: &Path) -> Result<(Vec<PathBuf>, PathBuf), FetchError> {
    if !input_path.exists() {
        return Err(FetchError::MailboxNotFound(
            input_path.to_string_lossy().to_string(),
        ));
    }
    if input_path.is_file() {
        let root = input_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let files = if is_eml(input_path) {
            vec![input_path.to_path_buf()]
        } else {
            Vec::new()
        };
        return Ok((files, root));
    }

    let mut files = WalkDir::new(input_path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_eml(p))
        .collect::<Vec<_>>();
    files.sort();
    Ok((files, input_path.to_path_buf()))
}

fn html_to_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let root = doc
        .select(body_selector())
        .next()
        .unwrap_or_else(|| doc.root_element());
    root.text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// True when any address in the header equals `sender`, ignoring case.
fn from_matches(header: &MailHeader, sender: &str) -> bool {
    let Ok(addrs) = addrparse_header(header) else {
        return false;
    };
    let sender = sender.trim();
    addrs.iter().any(|addr| match addr {
        MailAddr::Single(info) => info.addr.eq_ignore_ascii_case(sender),
        MailAddr::Group(group) => group
            .addrs
            .iter()
            .any(|info| info.addr.eq_ignore_ascii_case(sender)),
    })
}

/// Plain text wins; an HTML-only message is flattened to text.
fn extract_best_body(mail: &ParsedMail) -> Option<String> {
    fn walk(mail: &ParsedMail, want: &str) -> Option<String> {
        if mail.ctype.mimetype.eq_ignore_ascii_case(want) {
            if let Ok(body) = mail.get_body() {
                return Some(body);
            }
        }
        mail.subparts.iter().find_map(|part| walk(part, want))
    }

    walk(mail, "text/plain").or_else(|| walk(mail, "text/html").map(|html| html_to_text(&html)))
}

/// A directory (or single file) of saved `.eml` messages.
///
/// Message ids are paths relative to the mailbox root.
#[derive(Debug)]
pub struct EmlMailbox {
    root: PathBuf,
    files: Vec<PathBuf>,
}

impl EmlMailbox {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FetchError> {
        let (files, root) = collect_eml_files(path.as_ref())?;
        debug!(root = %root.display(), files = files.len(), "opened eml mailbox");
        Ok(Self { root, files })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    fn id_of(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .to_string()
    }

    fn path_of(&self, id: &str) -> Option<&PathBuf> {
        self.files.iter().find(|p| self.id_of(p) == id)
    }

    fn matches(&self, path: &Path, query: &MessageQuery) -> bool {
        let Ok(bytes) = fs::read(path) else {
            warn!(path = %path.display(), "unreadable eml skipped");
            return false;
        };
        let Ok((headers, _)) = parse_headers(&bytes) else {
            warn!(path = %path.display(), "eml headers did not parse; skipped");
            return false;
        };
        let from_ok = headers
            .get_first_header("From")
            .map(|h| from_matches(h, &query.sender))
            .unwrap_or(false);
        if !from_ok {
            return false;
        }
        match headers.get_first_value("Date").map(|d| dateparse(&d)) {
            Some(Ok(ts)) => ts >= query.after.timestamp(),
            _ => true,
        }
    }
}

impl MessageFetcher for EmlMailbox {
    fn list_message_ids(&self, query: &MessageQuery) -> Result<Vec<String>, FetchError> {
        Ok(self
            .files
            .iter()
            .filter(|p| self.matches(p, query))
            .take(query.max_results)
            .map(|p| self.id_of(p))
            .collect())
    }

    fn fetch_message(&self, id: &str) -> Result<RawMessage, FetchError> {
        let path = self
            .path_of(id)
            .ok_or_else(|| FetchError::MessageNotFound(id.to_string()))?;
        let bytes = fs::read(path).map_err(|source| FetchError::Read {
            id: id.to_string(),
            source,
        })?;
        let mail = parse_mail(&bytes).map_err(|source| FetchError::Mime {
            id: id.to_string(),
            source,
        })?;
        let headers = mail
            .headers
            .iter()
            .map(|h| Header::new(h.get_key(), h.get_value()))
            .collect::<Vec<_>>();
        let text = extract_best_body(&mail).unwrap_or_default();
        Ok(RawMessage::new(id, headers, encode_body(&text)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order_extract::OrderExtractor;
    use chrono::{TimeZone, Utc};

    const PANDA: &str = "no-reply@mail.foodpanda.pk";

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).expect("write eml fixture");
    }

    fn plain_eml(from: &str, date: &str, body: &str) -> String {
        format!(
            "From: foodpanda <{from}>\r\nTo: me@example.com\r\nSubject: Your order\r\nDate: {date}\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n{body}"
        )
    }

    fn query(after_year: i32) -> MessageQuery {
        MessageQuery {
            sender: PANDA.to_string(),
            after: Utc.with_ymd_and_hms(after_year, 1, 1, 0, 0, 0).unwrap(),
            max_results: 1000,
        }
    }

    #[test]
    fn lists_only_matching_sender_within_window() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "a.eml",
            &plain_eml(PANDA, "Tue, 02 Jan 2024 19:05:11 +0500", "Total PKR 10\r\n"),
        );
        write(
            dir.path(),
            "b.eml",
            &plain_eml("news@shop.example", "Tue, 02 Jan 2024 19:05:11 +0500", "hi"),
        );
        write(
            dir.path(),
            "c.eml",
            &plain_eml(PANDA, "Sun, 05 Mar 2023 12:00:00 +0500", "Total PKR 20\r\n"),
        );
        write(dir.path(), "notes.txt", "not a message");

        let mailbox = EmlMailbox::open(dir.path()).expect("open mailbox");
        assert_eq!(mailbox.len(), 3);
        assert_eq!(mailbox.list_message_ids(&query(2024)).expect("list"), vec!["a.eml"]);
        assert_eq!(
            mailbox.list_message_ids(&query(2023)).expect("list"),
            vec!["a.eml", "c.eml"]
        );
    }

    #[test]
    fn sender_must_match_whole_address() {
        let dir = tempfile::tempdir().expect("tempdir");
        let date = "Tue, 02 Jan 2024 19:05:11 +0500";
        write(dir.path(), "a.eml", &plain_eml(PANDA, date, "Total PKR 10\r\n"));
        write(
            dir.path(),
            "b.eml",
            &plain_eml("no-reply@mail.foodpanda.pk.example", date, "Total PKR 10\r\n"),
        );
        write(
            dir.path(),
            "c.eml",
            &plain_eml("No-Reply@Mail.FoodPanda.pk", date, "Total PKR 10\r\n"),
        );
        write(
            dir.path(),
            "d.eml",
            &plain_eml("x-no-reply@mail.foodpanda.pk", date, "Total PKR 10\r\n"),
        );

        let mailbox = EmlMailbox::open(dir.path()).expect("open mailbox");
        assert_eq!(
            mailbox.list_message_ids(&query(2024)).expect("list"),
            vec!["a.eml", "c.eml"]
        );
    }

    #[test]
    fn fetched_plain_message_feeds_extractor() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "order.eml",
            &plain_eml(
                PANDA,
                "Tue, 02 Jan 2024 19:05:11 +0500",
                "Partner: Name: Karachi Broast\r\nTotal: PKR 1,250.50\r\n",
            ),
        );
        let mailbox = EmlMailbox::open(dir.path()).expect("open mailbox");
        let msg = mailbox.fetch_message("order.eml").expect("fetch");
        assert_eq!(msg.header("Date"), Some("Tue, 02 Jan 2024 19:05:11 +0500"));

        let order = OrderExtractor::default().extract(&msg);
        assert_eq!(order.amount, 1250.50);
        assert_eq!(order.merchant, "Karachi Broast");
    }

    #[test]
    fn html_only_message_is_flattened_to_text() {
        let dir = tempfile::tempdir().expect("tempdir");
        let eml = format!(
            "From: {PANDA}\r\nDate: Wed, 03 Jan 2024 13:00:00 +0500\r\nMIME-Version: 1.0\r\nContent-Type: multipart/alternative; boundary=\"XX\"\r\n\r\n--XX\r\nContent-Type: text/html; charset=utf-8\r\n\r\n<html><head><style>p {{ color: red }}</style></head><body><table><tr><td>Partner:</td><td>Name: Ginsoy</td></tr><tr><td>Total</td><td>PKR 2,100</td></tr></table></body></html>\r\n--XX--\r\n"
        );
        write(dir.path(), "html.eml", &eml);

        let mailbox = EmlMailbox::open(dir.path()).expect("open mailbox");
        let order = OrderExtractor::default()
            .extract(&mailbox.fetch_message("html.eml").expect("fetch"));
        assert_eq!(order.merchant, "Ginsoy");
        assert_eq!(order.amount, 2100.0);
    }

    #[test]
    fn unknown_id_and_missing_path_are_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mailbox = EmlMailbox::open(dir.path()).expect("open empty mailbox");
        assert!(mailbox.is_empty());
        assert!(matches!(
            mailbox.fetch_message("nope.eml"),
            Err(FetchError::MessageNotFound(_))
        ));
        assert!(matches!(
            EmlMailbox::open(dir.path().join("missing")),
            Err(FetchError::MailboxNotFound(_))
        ));
    }
}
