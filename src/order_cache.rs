use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

use crate::error::CacheError;
use crate::order_extract::{FieldOrigin, Order, Provenance};

fn extracted() -> FieldOrigin {
    FieldOrigin::Extracted
}

/// One CSV line. Origin columns are optional so bare `date,price,merchant`
/// files still load.
#[derive(Debug, Serialize, Deserialize)]
struct CacheRow {
    date: String,
    price: f64,
    merchant: String,
    #[serde(default = "extracted")]
    date_origin: FieldOrigin,
    #[serde(default = "extracted")]
    price_origin: FieldOrigin,
    #[serde(default = "extracted")]
    merchant_origin: FieldOrigin,
}

impl From<&Order> for CacheRow {
    fn from(order: &Order) -> Self {
        Self {
            date: order.timestamp.clone(),
            price: order.amount,
            merchant: order.merchant.clone(),
            date_origin: order.provenance.timestamp,
            price_origin: order.provenance.amount,
            merchant_origin: order.provenance.merchant,
        }
    }
}

impl From<CacheRow> for Order {
    fn from(row: CacheRow) -> Self {
        Order {
            timestamp: row.date,
            amount: row.price,
            merchant: row.merchant,
            provenance: Provenance {
                timestamp: row.date_origin,
                amount: row.price_origin,
                merchant: row.merchant_origin,
            },
        }
    }
}

pub fn save_orders(path: impl AsRef<Path>, orders: &[Order]) -> Result<(), CacheError> {
    let path = path.as_ref();
    let mut wtr = csv::Writer::from_path(path)?;
    for order in orders {
        wtr.serialize(CacheRow::from(order))?;
    }
    wtr.flush()?;
    info!(path = %path.display(), orders = orders.len(), "saved order cache");
    Ok(())
}

pub fn load_orders(path: impl AsRef<Path>) -> Result<Vec<Order>, CacheError> {
    let path = path.as_ref();
    let mut rdr = csv::Reader::from_path(path)?;
    let orders = rdr
        .deserialize::<CacheRow>()
        .map(|row| row.map(Order::from))
        .collect::<Result<Vec<_>, _>>()?;
    info!(path = %path.display(), orders = orders.len(), "loaded order cache");
    Ok(orders)
}
