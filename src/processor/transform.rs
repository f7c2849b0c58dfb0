//! Source transaction → target transaction(s)
//!
//! Pure functions; all I/O happens in the processor.

use chrono::{DateTime, NaiveDate, Utc};

use crate::clients::{SourceTransaction, TargetTransaction};
use crate::core_types::TargetId;
use crate::money::{DEFAULT_DECIMALS, format_minor};

pub const PAYEE_MAX_CHARS: usize = 140;
pub const NOTES_MAX_CHARS: usize = 350;
pub const DEFAULT_CURRENCY: &str = "aud";
pub const DEFAULT_PAYEE: &str = "Unknown";
pub const ROUND_UP_PAYEE: &str = "Round Up";
pub const ROUND_UP_ID_SUFFIX: &str = "-roundup";
pub const STATUS_UNCLEARED: &str = "uncleared";

/// Target ids the transaction resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedMappings {
    pub asset_id: TargetId,
    pub category_id: Option<TargetId>,
}

/// Truncate to at most `max` characters on a char boundary
pub fn truncate_chars(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

/// Settled date, else created date (bank-local calendar), else when the event occurred
pub fn transaction_date(txn: &SourceTransaction, occurred_at: DateTime<Utc>) -> NaiveDate {
    txn.settled_at
        .or(txn.created_at)
        .map(|ts| ts.date_naive())
        .unwrap_or_else(|| occurred_at.date_naive())
}

fn currency(txn: &SourceTransaction) -> String {
    if txn.currency.is_empty() {
        DEFAULT_CURRENCY.to_string()
    } else {
        txn.currency.to_lowercase()
    }
}

/// Build the target record for `txn`, followed by its round-up record if any.
///
/// The round-up shares the asset but not the category, and is keyed
/// `<source id>-roundup` so both records stay idempotent.
pub fn to_target(
    txn: &SourceTransaction,
    occurred_at: DateTime<Utc>,
    mappings: ResolvedMappings,
) -> Vec<TargetTransaction> {
    let payee = if txn.description.trim().is_empty() {
        DEFAULT_PAYEE.to_string()
    } else {
        truncate_chars(&txn.description, PAYEE_MAX_CHARS)
    };
    let date = transaction_date(txn, occurred_at);
    let currency = currency(txn);

    let mut out = Vec::with_capacity(2);
    out.push(TargetTransaction {
        external_id: txn.id.clone(),
        asset_id: mappings.asset_id,
        category_id: mappings.category_id,
        amount: format_minor(txn.amount_minor, DEFAULT_DECIMALS),
        currency: currency.clone(),
        payee: payee.clone(),
        notes: truncate_chars(txn.message.as_deref().unwrap_or(""), NOTES_MAX_CHARS),
        date,
        status: STATUS_UNCLEARED.to_string(),
    });

    if let Some(round_up) = txn.round_up_minor.filter(|v| *v != 0) {
        out.push(TargetTransaction {
            external_id: format!("{}{}", txn.id, ROUND_UP_ID_SUFFIX),
            asset_id: mappings.asset_id,
            category_id: None,
            amount: format_minor(round_up, DEFAULT_DECIMALS),
            currency,
            payee: ROUND_UP_PAYEE.to_string(),
            notes: truncate_chars(&format!("Round up for: {}", payee), NOTES_MAX_CHARS),
            date,
            status: STATUS_UNCLEARED.to_string(),
        });
    }

    out
}
