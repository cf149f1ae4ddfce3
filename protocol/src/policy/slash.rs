//! Slash policy: when may the stream owner sweep a stake?
//!
//! Only once the stake subaddress has been quiet for `slash_min_age_secs`.
//! Any incoming transfer, spent or not, restarts the window.

use serde::Serialize;

use crate::ledger::last_funded_at_secs;
use crate::wallet::TransferRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlashQuery {
    pub account_index: u32,
    pub address_index: u32,
    pub slash_min_age_secs: u64,
    pub now_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlashDecision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_secs: Option<u64>,
    /// 0 when no transfer carries a timestamp.
    pub last_timestamp_sec: u64,
}

impl SlashDecision {
    pub fn last_observed_at_ms(&self) -> Option<u64> {
        (self.last_timestamp_sec > 0).then(|| self.last_timestamp_sec.saturating_mul(1000))
    }
}

pub fn can_slash(transfers: &[TransferRecord], q: &SlashQuery) -> SlashDecision {
    let last = last_funded_at_secs(transfers, q.account_index, q.address_index);
    let elapsed = q.now_secs.saturating_sub(last);
    if last > 0 && elapsed < q.slash_min_age_secs {
        return SlashDecision {
            allowed: false,
            wait_secs: Some(q.slash_min_age_secs - elapsed),
            last_timestamp_sec: last,
        };
    }
    SlashDecision {
        allowed: true,
        wait_secs: None,
        last_timestamp_sec: last,
    }
}
