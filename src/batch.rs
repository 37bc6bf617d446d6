//! Sequential fetch → extract loop around the extractor.
//!
//! One message is fetched and extracted before the next is requested. The
//! running total and collected orders are owned by the loop; progress is
//! pushed to the caller after every message.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::fetcher::{MessageFetcher, MessageQuery};
use crate::order_extract::{Order, OrderExtractor};

/// Caller-supplied batch parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRequest {
    pub sender: String,
    pub lookback_days: u32,
    pub max_messages: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatchProgress {
    pub processed: usize,
    pub total: usize,
    pub running_total: f64,
}

/// The three aligned output columns, plus whether each record was partial.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OrderColumns {
    pub timestamps: Vec<String>,
    pub amounts: Vec<f64>,
    pub merchants: Vec<String>,
    pub partial: Vec<bool>,
}

impl OrderColumns {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

impl<'a> FromIterator<&'a Order> for OrderColumns {
    fn from_iter<I: IntoIterator<Item = &'a Order>>(iter: I) -> Self {
        let mut cols = OrderColumns::default();
        for order in iter {
            cols.timestamps.push(order.timestamp.clone());
            cols.amounts.push(order.amount);
            cols.merchants.push(order.merchant.clone());
            cols.partial.push(order.is_partial());
        }
        cols
    }
}

/// Orders in retrieval order with their running total.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderBatch {
    pub orders: Vec<Order>,
    pub running_total: f64,
}

impl OrderBatch {
    fn push(&mut self, order: Order) {
        self.running_total += order.amount;
        self.orders.push(order);
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn partial_count(&self) -> usize {
        self.orders.iter().filter(|o| o.is_partial()).count()
    }

    pub fn columns(&self) -> OrderColumns {
        self.orders.iter().collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// The search matched nothing; not an error.
    NoMessages,
    Completed(OrderBatch),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchStage {
    Listing,
    Fetching { id: String, index: usize },
}

impl fmt::Display for BatchStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStage::Listing => write!(f, "listing messages failed"),
            BatchStage::Fetching { id, index } => {
                write!(f, "fetching message #{} ({id}) failed", index + 1)
            }
        }
    }
}

/// A fetch failure aborts the batch. Orders collected before it are kept in
/// `partial`; callers decide whether to use or discard them.
#[derive(Debug, Error)]
#[error("{stage}: {source}")]
pub struct BatchError {
    pub stage: BatchStage,
    #[source]
    pub source: FetchError,
    pub partial: OrderBatch,
}

pub fn collect_orders<F, P>(
    fetcher: &F,
    extractor: &OrderExtractor,
    request: &BatchRequest,
    now: DateTime<Utc>,
    mut on_progress: P,
) -> Result<BatchOutcome, BatchError>
where
    F: MessageFetcher + ?Sized,
    P: FnMut(&BatchProgress),
{
    let query = MessageQuery::lookback(
        request.sender.as_str(),
        request.lookback_days,
        request.max_messages,
        now,
    );
    let mut ids = fetcher
        .list_message_ids(&query)
        .map_err(|source| BatchError {
            stage: BatchStage::Listing,
            source,
            partial: OrderBatch::default(),
        })?;
    if ids.len() > query.max_results {
        warn!(
            listed = ids.len(),
            cap = query.max_results,
            "fetcher returned more ids than requested; truncating"
        );
        ids.truncate(query.max_results);
    }
    if ids.is_empty() {
        info!(sender = %request.sender, days = request.lookback_days, "no matching messages");
        return Ok(BatchOutcome::NoMessages);
    }

    let total = ids.len();
    info!(total, "processing messages");
    let mut batch = OrderBatch::default();
    for (index, id) in ids.iter().enumerate() {
        let msg = match fetcher.fetch_message(id) {
            Ok(msg) => msg,
            Err(source) => {
                return Err(BatchError {
                    stage: BatchStage::Fetching {
                        id: id.clone(),
                        index,
                    },
                    source,
                    partial: batch,
                })
            }
        };
        let order = extractor.extract(&msg);
        if order.is_partial() {
            debug!(id = %id, provenance = ?order.provenance, "order extracted with defaults");
        }
        batch.push(order);
        on_progress(&BatchProgress {
            processed: index + 1,
            total,
            running_total: batch.running_total,
        });
    }

    info!(
        orders = batch.len(),
        partial = batch.partial_count(),
        total = batch.running_total,
        "batch complete"
    );
    Ok(BatchOutcome::Completed(batch))
}
