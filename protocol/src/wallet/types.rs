//! Normalized wallet RPC results.
//!
//! Wallet RPC is loose about types (numbers as strings, optional fields,
//! empty strings meaning "nothing"). These structs are what callers see
//! after [`WalletRpcClient`](super::WalletRpcClient) has cleaned that up.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::amount::{decimal, parse_amount, parse_count, parse_index};

/// `(account, subaddress)` coordinates of a wallet output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubaddrCoord {
    pub major: u32,
    pub minor: u32,
}

/// One incoming transfer as reported by `get_transfers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    #[serde(with = "decimal")]
    pub amount_atomic: u128,
    pub confirmations: u64,
    pub subaddr_index: SubaddrCoord,
    pub txid: Option<String>,
    pub timestamp_sec: Option<u64>,
    #[serde(default)]
    pub spent: bool,
}

impl TransferRecord {
    /// Normalizes one raw `get_transfers` entry. Entries without a usable
    /// amount or subaddress index are dropped.
    pub fn from_rpc(raw: &Value) -> Option<Self> {
        let amount_atomic = parse_amount(raw.get("amount")?)?;
        let idx = raw.get("subaddr_index")?;
        let major = u32::try_from(parse_index(idx.get("major")?)?).ok()?;
        let minor = u32::try_from(parse_index(idx.get("minor")?)?).ok()?;
        Some(Self {
            amount_atomic,
            confirmations: raw.get("confirmations").and_then(parse_count).unwrap_or(0),
            subaddr_index: SubaddrCoord { major, minor },
            txid: raw.get("txid").and_then(Value::as_str).map(str::to_string),
            timestamp_sec: raw.get("timestamp").and_then(parse_count),
            spent: raw.get("spent").and_then(Value::as_bool).unwrap_or(false),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedAddress {
    pub address: String,
    pub address_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubaddressEntry {
    pub address: String,
    pub address_index: u32,
    pub label: Option<String>,
}

/// `get_address` result: the account's primary address plus every
/// subaddress with its label.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressListing {
    pub address: String,
    pub addresses: Vec<SubaddressEntry>,
}

impl AddressListing {
    /// `(index, label)` pairs for building a [`LabelIndex`](crate::session::LabelIndex).
    pub fn labels(&self) -> impl Iterator<Item = (u32, &str)> {
        self.addresses
            .iter()
            .filter_map(|a| a.label.as_deref().map(|l| (a.address_index, l)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubaddressBalance {
    pub address_index: u32,
    pub balance_atomic: u128,
    pub unlocked_atomic: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Balance {
    pub balance_atomic: u128,
    pub unlocked_atomic: u128,
    pub per_subaddress: Vec<SubaddressBalance>,
}

impl Balance {
    /// Unlocked amount on one subaddress, zero if the wallet did not list it.
    pub fn unlocked_for(&self, address_index: u32) -> u128 {
        self.per_subaddress
            .iter()
            .find(|s| s.address_index == address_index)
            .map(|s| s.unlocked_atomic)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepResult {
    pub txids: Vec<String>,
    pub amount_atomic: u128,
}

/// Result of `make_multisig` or one `exchange_multisig_keys` round. Both
/// fields are `None` when the wallet returned an empty string.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MultisigRound {
    pub address: Option<String>,
    pub multisig_info: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedMultisig {
    pub tx_data_hex: String,
    pub txids: Vec<String>,
}

/// Dev-wallet helper input (`dstream_inject_transfer`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectTransfer {
    pub account_index: u32,
    pub address_index: u32,
    pub amount_atomic: u128,
    pub confirmations: u64,
    pub txid: Option<String>,
    pub timestamp_sec: Option<u64>,
}

/// How aggressively `probe_methods` exercises the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMode {
    /// Call every method with harmless parameters.
    Active,
    /// Skip methods with side effects and assume they exist.
    #[default]
    Passive,
}

impl ProbeMode {
    /// Anything other than `active` (any case) means passive.
    pub fn from_str_lossy(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("active") {
            Self::Active
        } else {
            Self::Passive
        }
    }
}

/// Outcome of probing one method.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodProbe {
    pub method: String,
    pub supported: bool,
    pub code: Option<i64>,
    pub message: String,
}

pub(crate) fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

pub(crate) fn non_empty_trimmed(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn transfer_normalization() {
        let t = TransferRecord::from_rpc(&json!({
            "amount": 1500, "confirmations": -2, "txid": "ab",
            "subaddr_index": {"major": 0, "minor": "3"}, "timestamp": 1700000000.9
        }))
        .unwrap();
        assert_eq!(t.amount_atomic, 1500);
        assert_eq!(t.confirmations, 0);
        assert_eq!(t.subaddr_index, SubaddrCoord { major: 0, minor: 3 });
        assert_eq!(t.timestamp_sec, Some(1_700_000_000));
        assert!(!t.spent);
    }

    #[test]
    fn transfer_without_index_or_amount_dropped() {
        assert!(TransferRecord::from_rpc(&json!({"amount":"1"})).is_none());
        assert!(TransferRecord::from_rpc(
            &json!({"amount":"x","subaddr_index":{"major":0,"minor":1}})
        )
        .is_none());
        assert!(TransferRecord::from_rpc(
            &json!({"amount":"1","subaddr_index":{"major":-1,"minor":1}})
        )
        .is_none());
    }

    #[test]
    fn probe_mode_lossy() {
        assert_eq!(ProbeMode::from_str_lossy("ACTIVE"), ProbeMode::Active);
        assert_eq!(ProbeMode::from_str_lossy(""), ProbeMode::Passive);
        assert_eq!(ProbeMode::from_str_lossy("bogus"), ProbeMode::Passive);
    }
}
