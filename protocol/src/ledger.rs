//! # Transfer Ledger Aggregator
//!
//! Rebuilds "how much did this stream receive, per session" from the raw
//! incoming transfer list. The wallet is the only durable record of value,
//! so nothing here is cached: callers fetch a fresh transfer list for every
//! request and fold it with the functions below.
//!
//! ## Rules
//!
//! - Only transfers on the configured account and on a subaddress in the
//!   index set count.
//! - Spent outputs are dropped from aggregates and stake totals (they were
//!   already refunded or slashed). Tip lookups keep them: a tip that was
//!   later swept was still received.
//! - `confirmed` counts a transfer once `confirmations >= required`.
//! - "Latest" is the highest `timestampSec`. Ties keep the first transfer
//!   seen for aggregates; tip and stake lookups break ties on amount.
//! - All sums are exact `u128` atomic units. Group totals always add up
//!   to the top-level totals.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::amount::decimal;
use crate::session::SubaddrIndex;
use crate::wallet::TransferRecord;

/// Which slice of the wallet to aggregate.
#[derive(Debug, Clone)]
pub struct AggregateQuery<'a> {
    pub account_index: u32,
    pub address_indices: &'a SubaddrIndex,
    pub confirmations_required: u64,
}

/// Everything received on one subaddress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferGroup {
    pub address_index: u32,
    pub transfer_count: u64,
    #[serde(with = "decimal")]
    pub total_atomic: u128,
    #[serde(with = "decimal")]
    pub confirmed_atomic: u128,
    pub confirmations_max: u64,
    pub observed_at_ms: Option<u64>,
    pub txid: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTotals {
    pub transfer_count: u64,
    #[serde(with = "decimal")]
    pub total_atomic: u128,
    #[serde(with = "decimal")]
    pub confirmed_atomic: u128,
}

/// Groups sorted newest first, plus their sum.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerAggregate {
    pub groups: Vec<TransferGroup>,
    pub totals: LedgerTotals,
}

struct Fold<'t> {
    group: TransferGroup,
    latest: &'t TransferRecord,
}

/// Folds `transfers` into one group per subaddress.
pub fn aggregate(transfers: &[TransferRecord], query: &AggregateQuery<'_>) -> LedgerAggregate {
    let mut by_index: BTreeMap<u32, Fold<'_>> = BTreeMap::new();

    for t in transfers.iter().filter(|t| {
        t.subaddr_index.major == query.account_index
            && query.address_indices.contains(&t.subaddr_index.minor)
            && !t.spent
    }) {
        let minor = t.subaddr_index.minor;
        let fold = by_index.entry(minor).or_insert_with(|| Fold {
            group: TransferGroup {
                address_index: minor,
                transfer_count: 0,
                total_atomic: 0,
                confirmed_atomic: 0,
                confirmations_max: 0,
                observed_at_ms: None,
                txid: None,
            },
            latest: t,
        });

        let g = &mut fold.group;
        g.transfer_count += 1;
        g.total_atomic += t.amount_atomic;
        if t.confirmations >= query.confirmations_required {
            g.confirmed_atomic += t.amount_atomic;
        }
        g.confirmations_max = g.confirmations_max.max(t.confirmations);

        if t.timestamp_sec.unwrap_or(0) > fold.latest.timestamp_sec.unwrap_or(0) {
            fold.latest = t;
        }
    }

    let mut groups: Vec<TransferGroup> = by_index
        .into_values()
        .map(|Fold { mut group, latest }| {
            group.observed_at_ms = observed_at_ms(latest);
            group.txid = latest.txid.clone();
            group
        })
        .collect();

    // Newest first; groups with no timestamp sink to the bottom.
    groups.sort_by(|a, b| b.observed_at_ms.unwrap_or(0).cmp(&a.observed_at_ms.unwrap_or(0)));

    let totals = groups.iter().fold(LedgerTotals::default(), |mut acc, g| {
        acc.transfer_count += g.transfer_count;
        acc.total_atomic += g.total_atomic;
        acc.confirmed_atomic += g.confirmed_atomic;
        acc
    });

    LedgerAggregate { groups, totals }
}

fn observed_at_ms(t: &TransferRecord) -> Option<u64> {
    t.timestamp_sec
        .filter(|&s| s > 0)
        .map(|s| s.saturating_mul(1000))
}

/// Latest by timestamp, then by amount. Equal on both keeps the first.
fn pick_latest<'t>(candidates: impl Iterator<Item = &'t TransferRecord>) -> Option<&'t TransferRecord> {
    candidates.fold(None, |best: Option<&TransferRecord>, t| match best {
        None => Some(t),
        Some(b) => {
            let newer = (t.timestamp_sec.unwrap_or(0), t.amount_atomic)
                > (b.timestamp_sec.unwrap_or(0), b.amount_atomic);
            Some(if newer { t } else { b })
        }
    })
}

// ---------------------------------------------------------------------------
// Tip lookup
// ---------------------------------------------------------------------------

/// The most recent tip on one subaddress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TipMatch {
    #[serde(with = "decimal")]
    pub amount_atomic: u128,
    pub confirmations: u64,
    pub confirmed: bool,
    pub observed_at_ms: Option<u64>,
    pub txid: Option<String>,
}

pub fn find_latest_transfer(
    transfers: &[TransferRecord],
    account_index: u32,
    address_index: u32,
    confirmations_required: u64,
) -> Option<TipMatch> {
    let latest = pick_latest(transfers.iter().filter(|t| {
        t.subaddr_index.major == account_index && t.subaddr_index.minor == address_index
    }))?;
    Some(TipMatch {
        amount_atomic: latest.amount_atomic,
        confirmations: latest.confirmations,
        confirmed: latest.confirmations >= confirmations_required,
        observed_at_ms: observed_at_ms(latest),
        txid: latest.txid.clone(),
    })
}

// ---------------------------------------------------------------------------
// Stake totals
// ---------------------------------------------------------------------------

/// Unspent value sitting on one stake subaddress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeTotals {
    #[serde(with = "decimal")]
    pub total_atomic: u128,
    #[serde(with = "decimal")]
    pub confirmed_atomic: u128,
    pub transfer_count: u64,
    pub last_observed_at_ms: Option<u64>,
    pub last_txid: Option<String>,
}

pub fn stake_totals(
    transfers: &[TransferRecord],
    account_index: u32,
    address_index: u32,
    confirmations_required: u64,
) -> StakeTotals {
    let matches = || {
        transfers.iter().filter(|t| {
            t.subaddr_index.major == account_index
                && t.subaddr_index.minor == address_index
                && !t.spent
        })
    };

    let mut totals = matches().fold(StakeTotals::default(), |mut acc, t| {
        acc.total_atomic += t.amount_atomic;
        if t.confirmations >= confirmations_required {
            acc.confirmed_atomic += t.amount_atomic;
        }
        acc.transfer_count += 1;
        acc
    });
    if let Some(latest) = pick_latest(matches()) {
        totals.last_observed_at_ms = observed_at_ms(latest);
        totals.last_txid = latest.txid.clone();
    }
    totals
}

/// Most recent funding time on one subaddress, spent outputs included.
/// Zero when nothing was ever received.
pub fn last_funded_at_secs(transfers: &[TransferRecord], account_index: u32, address_index: u32) -> u64 {
    transfers
        .iter()
        .filter(|t| t.subaddr_index.major == account_index && t.subaddr_index.minor == address_index)
        .filter_map(|t| t.timestamp_sec)
        .max()
        .unwrap_or(0)
}
