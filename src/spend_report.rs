use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, Timelike};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::order_extract::{FieldOrigin, Order};

pub const CURRENCY: &str = "PKR";

#[derive(Debug, Clone, PartialEq)]
pub struct ReportOptions {
    pub monthly_budget: Option<f64>,
    pub top_merchants: usize,
    pub recent_orders: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            monthly_budget: None,
            top_merchants: 10,
            recent_orders: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisPeriod {
    pub earliest: String,
    pub latest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonthlySpend {
    pub month_key: String,
    pub label: String,
    pub total: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlySpend {
    pub hour: u32,
    pub count: usize,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MerchantSpend {
    pub merchant: String,
    pub total: f64,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentOrder {
    pub date: String,
    pub amount: f64,
    pub merchant: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetStatus {
    pub month_key: String,
    pub budget: f64,
    pub spent: f64,
    pub remaining: f64,
    pub used_ratio: f64,
    pub days_elapsed: u32,
    pub days_in_month: u32,
    pub projected_spend: f64,
    pub over_budget: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpendReport {
    pub total_spent: f64,
    pub total_orders: usize,
    pub average_order: f64,
    /// Orders whose amount is the 0.0 sentinel rather than a parsed value.
    pub defaulted_amount_count: usize,
    pub undated_count: usize,
    pub period: Option<AnalysisPeriod>,
    pub months: Vec<MonthlySpend>,
    pub hours: Vec<HourlySpend>,
    pub merchants: Vec<MerchantSpend>,
    pub recent_orders: Vec<RecentOrder>,
    pub budget: Option<BudgetStatus>,
}

fn round_to(value: f64, digits: i32) -> f64 {
    let factor = 10_f64.powi(digits);
    (value * factor).round() / factor
}

fn round_money(value: f64) -> f64 {
    round_to(value, 2)
}

fn month_key(dt: &NaiveDateTime) -> String {
    format!("{:04}-{:02}", dt.year(), dt.month())
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    match (
        NaiveDate::from_ymd_opt(year, month, 1),
        NaiveDate::from_ymd_opt(next_year, next_month, 1),
    ) {
        (Some(start), Some(end)) => u32::try_from((end - start).num_days()).unwrap_or(30),
        _ => 30,
    }
}

/// `1234567.5` → `1,234,567.50`.
pub fn format_money(value: f64) -> String {
    let text = format!("{:.2}", value.abs());
    let (int_part, frac_part) = text.split_once('.').unwrap_or((text.as_str(), "00"));
    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    let sign = if value < 0.0 { "-" } else { "" };
    format!("{sign}{grouped}.{frac_part}")
}

/// Parses a `Date` header value (RFC 2822, optionally followed by a `(TZ)`
/// comment). RFC 3339 is accepted for caches written by other tools.
pub fn parse_order_timestamp(raw: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = raw.trim();
    let cleaned = match trimmed.rfind('(') {
        Some(idx) if trimmed.ends_with(')') => trimmed[..idx].trim_end(),
        _ => trimmed,
    };
    DateTime::parse_from_rfc2822(cleaned)
        .or_else(|_| DateTime::parse_from_rfc3339(cleaned))
        .ok()
}

fn budget_status(budget: f64, spent: f64, today: NaiveDate) -> BudgetStatus {
    let days_in_month = days_in_month(today.year(), today.month());
    let days_elapsed = today.day();
    let projected = if days_elapsed == 0 {
        spent
    } else {
        spent / f64::from(days_elapsed) * f64::from(days_in_month)
    };
    BudgetStatus {
        month_key: format!("{:04}-{:02}", today.year(), today.month()),
        budget: round_money(budget),
        spent: round_money(spent),
        remaining: round_money(budget - spent),
        used_ratio: if budget > 0.0 {
            round_to(spent / budget, 4)
        } else {
            0.0
        },
        days_elapsed,
        days_in_month,
        projected_spend: round_money(projected),
        over_budget: spent > budget,
    }
}

pub fn build_spend_report(orders: &[Order], opts: &ReportOptions, today: NaiveDate) -> SpendReport {
    let total_spent: f64 = orders.iter().map(|o| o.amount).sum();
    let total_orders = orders.len();
    let defaulted_amount_count = orders
        .iter()
        .filter(|o| o.provenance.amount == FieldOrigin::Defaulted)
        .count();

    let dated = orders
        .iter()
        .filter_map(|o| parse_order_timestamp(&o.timestamp).map(|dt| (dt.naive_local(), o)))
        .collect::<Vec<_>>();
    let undated_count = total_orders - dated.len();

    let period = match (
        dated.iter().map(|(dt, _)| *dt).min(),
        dated.iter().map(|(dt, _)| *dt).max(),
    ) {
        (Some(earliest), Some(latest)) => Some(AnalysisPeriod {
            earliest: earliest.format("%B %d, %Y").to_string(),
            latest: latest.format("%B %d, %Y").to_string(),
        }),
        _ => None,
    };

    let mut month_map = BTreeMap::<String, (String, f64, usize)>::new();
    let mut hours = (0..24)
        .map(|hour| HourlySpend {
            hour,
            count: 0,
            total: 0.0,
        })
        .collect::<Vec<_>>();
    for (dt, order) in &dated {
        let entry = month_map
            .entry(month_key(dt))
            .or_insert_with(|| (dt.format("%B %Y").to_string(), 0.0, 0));
        entry.1 += order.amount;
        entry.2 += 1;

        let bucket = &mut hours[dt.hour() as usize];
        bucket.count += 1;
        bucket.total += order.amount;
    }
    for bucket in &mut hours {
        bucket.total = round_money(bucket.total);
    }
    let months = month_map
        .into_iter()
        .rev()
        .map(|(month_key, (label, total, count))| MonthlySpend {
            month_key,
            label,
            total: round_money(total),
            count,
        })
        .collect::<Vec<_>>();

    let mut merchant_map = HashMap::<&str, (f64, usize)>::new();
    for order in orders {
        let entry = merchant_map.entry(order.merchant.as_str()).or_insert((0.0, 0));
        entry.0 += order.amount;
        entry.1 += 1;
    }
    let mut merchants = merchant_map
        .into_iter()
        .map(|(merchant, (total, count))| MerchantSpend {
            merchant: merchant.to_string(),
            total: round_money(total),
            count,
        })
        .collect::<Vec<_>>();
    merchants.sort_by(|a, b| {
        b.total
            .total_cmp(&a.total)
            .then(b.count.cmp(&a.count))
            .then_with(|| a.merchant.cmp(&b.merchant))
    });
    merchants.truncate(opts.top_merchants);

    let mut recent = dated.clone();
    recent.sort_by(|a, b| b.0.cmp(&a.0));
    let recent_orders = recent
        .into_iter()
        .take(opts.recent_orders)
        .map(|(dt, order)| RecentOrder {
            date: dt.format("%Y-%m-%d %H:%M").to_string(),
            amount: round_money(order.amount),
            merchant: order.merchant.clone(),
        })
        .collect::<Vec<_>>();

    let budget = opts.monthly_budget.map(|budget| {
        let current_key = format!("{:04}-{:02}", today.year(), today.month());
        let spent = dated
            .iter()
            .filter(|(dt, _)| month_key(dt) == current_key)
            .map(|(_, o)| o.amount)
            .sum::<f64>();
        budget_status(budget, spent, today)
    });

    SpendReport {
        total_spent: round_money(total_spent),
        total_orders,
        average_order: if total_orders == 0 {
            0.0
        } else {
            round_money(total_spent / total_orders as f64)
        },
        defaulted_amount_count,
        undated_count,
        period,
        months,
        hours,
        merchants,
        recent_orders,
        budget,
    }
}

impl fmt::Display for SpendReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(period) = &self.period {
            writeln!(f, "Analysis period: {} - {}", period.earliest, period.latest)?;
        }
        writeln!(f, "Total spent:   {CURRENCY} {}", format_money(self.total_spent))?;
        writeln!(f, "Total orders:  {}", self.total_orders)?;
        writeln!(f, "Average order: {CURRENCY} {}", format_money(self.average_order))?;
        if self.defaulted_amount_count > 0 {
            writeln!(
                f,
                "Orders without a readable amount: {}",
                self.defaulted_amount_count
            )?;
        }

        if !self.months.is_empty() {
            writeln!(f, "\nMonthly breakdown")?;
            for m in &self.months {
                writeln!(
                    f,
                    "  {:<16} {CURRENCY} {:>12}  {:>4} orders",
                    m.label,
                    format_money(m.total),
                    m.count
                )?;
            }
        }

        if !self.merchants.is_empty() {
            writeln!(f, "\nTop merchants")?;
            for m in &self.merchants {
                writeln!(
                    f,
                    "  {:<28} {CURRENCY} {:>12}  {:>4} orders",
                    m.merchant,
                    format_money(m.total),
                    m.count
                )?;
            }
        }

        if !self.recent_orders.is_empty() {
            writeln!(f, "\nRecent orders")?;
            for o in &self.recent_orders {
                writeln!(
                    f,
                    "  {}  {CURRENCY} {:>10}  {}",
                    o.date,
                    format_money(o.amount),
                    o.merchant
                )?;
            }
        }

        if let Some(b) = &self.budget {
            writeln!(f, "\nBudget {}", b.month_key)?;
            writeln!(
                f,
                "  spent {CURRENCY} {} of {CURRENCY} {} ({:.1}%), projected {CURRENCY} {}",
                format_money(b.spent),
                format_money(b.budget),
                b.used_ratio * 100.0,
                format_money(b.projected_spend)
            )?;
            if b.over_budget {
                writeln!(f, "  over budget by {CURRENCY} {}", format_money(-b.remaining))?;
            }
        }
        Ok(())
    }
}
