// 💸 Transaction - One reported transfer between two transactors

use crate::reader::{parse_amount, Row};
use chrono::NaiveDate;

/// A transaction row lifted into a typed view. Amounts are signed;
/// negative values are corrections or refunds and pass through as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionRecord {
    pub id: String,
    pub donor_id: String,
    pub recipient_id: String,
    pub amount: f64,
    pub date: Option<NaiveDate>,
    pub transaction_type: String,
    pub reported_election_year: String,
    pub reported_state: String,
    pub description: String,
}

impl TransactionRecord {
    /// None when the amount is missing or unparseable; such rows carry no
    /// usable transfer and are dropped upstream.
    pub fn from_row(row: &Row) -> Option<TransactionRecord> {
        let get = |key: &str| row.get(key).cloned().unwrap_or_default();
        let amount = parse_amount(&get("amount"))?;
        let date = NaiveDate::parse_from_str(&get("date"), "%Y-%m-%d").ok();
        Some(TransactionRecord {
            id: get("id"),
            donor_id: get("donor_id"),
            recipient_id: get("recipient_id"),
            amount,
            date,
            transaction_type: get("transaction_type"),
            reported_election_year: get("reported_election_year"),
            reported_state: get("reported_state"),
            description: get("description"),
        })
    }
}
