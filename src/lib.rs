pub mod batch;
pub mod config;
pub mod eml_fetcher;
pub mod error;
pub mod fetcher;
pub mod gmail_fetcher;
pub mod message;
pub mod order_cache;
pub mod order_extract;
pub mod spend_report;

pub use batch::{
    collect_orders, BatchError, BatchOutcome, BatchProgress, BatchRequest, BatchStage,
    OrderBatch, OrderColumns,
};
pub use config::Config;
pub use eml_fetcher::EmlMailbox;
pub use error::{CacheError, ConfigError, Error, FetchError, Result};
pub use fetcher::{MessageFetcher, MessageQuery, MAX_MESSAGES_CAP};
pub use gmail_fetcher::GmailFetcher;
pub use message::{GmailMessage, Header, RawMessage};
pub use order_cache::{load_orders, save_orders};
pub use order_extract::{
    FieldOrigin, Order, OrderExtractor, Provenance, DEFAULT_MERCHANT, NO_DATE,
};
pub use spend_report::{build_spend_report, ReportOptions, SpendReport};
