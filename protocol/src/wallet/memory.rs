//! # In-Memory Wallet
//!
//! A wallet RPC double that answers the same JSON methods as a real
//! wallet, in-process. Addresses are fake (`mockxmr_<hash>`), transfers are
//! injected by hand, and the multisig methods return opaque placeholder
//! strings that follow the real call sequence.
//!
//! Backs the test suites and `--wallet-rpc-origin memory:` dev runs.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::RngCore;
use serde_json::{json, Value};

use super::error::WalletRpcError;
use super::transport::RpcTransport;
use super::types::{InjectTransfer, SubaddrCoord};
use crate::amount::{parse_amount, parse_index};
use crate::clock::SharedClock;
use crate::config::RPC_METHOD_NOT_FOUND;
use crate::crypto::hash::sha256_hex;

const INVALID_PARAMS: i64 = -32602;
const WALLET_ERROR: i64 = -32000;

/// Address index of the fake multisig wallet address.
const MULTISIG_ADDRESS_INDEX: u32 = 9000;

#[derive(Debug, Clone)]
struct StoredAddress {
    address: String,
    label: String,
}

#[derive(Debug, Clone)]
struct StoredTransfer {
    amount: u128,
    confirmations: u64,
    txid: String,
    timestamp: u64,
    coord: SubaddrCoord,
    spent: bool,
}

#[derive(Debug, Default)]
struct State {
    accounts: HashMap<u32, Vec<StoredAddress>>,
    transfers: Vec<StoredTransfer>,
    prepared: bool,
    exchange_calls: u32,
}

impl State {
    fn account(&mut self, account_index: u32) -> &mut Vec<StoredAddress> {
        self.accounts.entry(account_index).or_insert_with(|| {
            vec![StoredAddress {
                address: fake_address(account_index, 0),
                label: String::new(),
            }]
        })
    }
}

pub struct MemoryWallet {
    state: Mutex<State>,
    clock: SharedClock,
}

impl MemoryWallet {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            state: Mutex::new(State::default()),
            clock,
        }
    }

    /// Direct (non-RPC) transfer injection for tests.
    pub fn inject_transfer(&self, t: &InjectTransfer) -> Result<String, WalletRpcError> {
        let params = json!({
            "account_index": t.account_index,
            "address_index": t.address_index,
            "amount": t.amount_atomic.to_string(),
            "confirmations": t.confirmations,
            "txid": t.txid,
            "timestamp": t.timestamp_sec,
        });
        let mut state = self.state.lock();
        self.inject(&mut state, &params)
    }

    /// Forgets every address, transfer and multisig flag.
    pub fn reset(&self) {
        *self.state.lock() = State::default();
    }

    /// Bumps confirmations on every transfer, like blocks being mined.
    pub fn confirm_all(&self, confirmations: u64) {
        for t in self.state.lock().transfers.iter_mut() {
            t.confirmations = t.confirmations.max(confirmations);
        }
    }

    fn inject(&self, state: &mut State, params: &Value) -> Result<String, WalletRpcError> {
        let account = index_param(params, "account_index", 0)?;
        let address_index = index_param(params, "address_index", 0)?;
        let amount = params
            .get("amount")
            .filter(|v| v.is_string())
            .and_then(parse_amount)
            .ok_or_else(|| invalid("invalid amount"))?;
        let confirmations = match params.get("confirmations") {
            None | Some(Value::Null) => 0,
            Some(v) => parse_index(v).ok_or_else(|| invalid("invalid confirmations"))?,
        };
        let txid = params
            .get("txid")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(random_txid);
        let timestamp = params
            .get("timestamp")
            .and_then(parse_index)
            .unwrap_or_else(|| self.clock.now_secs());

        if state.account(account).len() <= address_index as usize {
            return Err(invalid("unknown subaddress"));
        }
        state.transfers.push(StoredTransfer {
            amount,
            confirmations,
            txid: txid.clone(),
            timestamp,
            coord: SubaddrCoord {
                major: account,
                minor: address_index,
            },
            spent: false,
        });
        Ok(txid)
    }

    fn dispatch(&self, method: &str, params: &Value) -> Result<Value, WalletRpcError> {
        let mut state = self.state.lock();
        match method {
            "get_version" => Ok(json!({ "version": 65536 })),
            "refresh" => Ok(json!({ "blocks_fetched": 0, "received_money": false })),

            "create_address" => {
                let account = index_param(params, "account_index", 0)?;
                let label = params
                    .get("label")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string();
                let list = state.account(account);
                let next = list.len() as u32;
                let address = fake_address(account, next);
                list.push(StoredAddress {
                    address: address.clone(),
                    label,
                });
                Ok(json!({ "address": address, "address_index": next }))
            }

            "get_address" => {
                let account = index_param(params, "account_index", 0)?;
                let list = state.account(account);
                let addresses: Vec<Value> = list
                    .iter()
                    .enumerate()
                    .map(|(i, a)| json!({ "address": a.address, "address_index": i, "label": a.label }))
                    .collect();
                Ok(json!({ "address": list[0].address, "addresses": addresses }))
            }

            "get_transfers" => {
                let (confirmed, pool): (Vec<_>, Vec<_>) =
                    state.transfers.iter().partition(|t| t.confirmations > 0);
                Ok(json!({
                    "in": confirmed.into_iter().map(transfer_json).collect::<Vec<_>>(),
                    "pool": pool.into_iter().map(transfer_json).collect::<Vec<_>>(),
                }))
            }

            "get_balance" => {
                let account = index_param(params, "account_index", 0)?;
                let filter: Option<Vec<u64>> = params
                    .get("address_indices")
                    .and_then(Value::as_array)
                    .map(|a| a.iter().filter_map(parse_index).collect());

                let mut total = 0u128;
                let mut unlocked = 0u128;
                let mut per: BTreeMap<u32, (u128, u128)> = BTreeMap::new();
                for t in state.transfers.iter().filter(|t| {
                    t.coord.major == account
                        && !t.spent
                        && filter
                            .as_ref()
                            .map_or(true, |f| f.contains(&(t.coord.minor as u64)))
                }) {
                    let row = per.entry(t.coord.minor).or_default();
                    total += t.amount;
                    row.0 += t.amount;
                    if t.confirmations > 0 {
                        unlocked += t.amount;
                        row.1 += t.amount;
                    }
                }
                let per_subaddress: Vec<Value> = per
                    .into_iter()
                    .map(|(idx, (bal, unl))| {
                        json!({
                            "address_index": idx,
                            "balance": bal.to_string(),
                            "unlocked_balance": unl.to_string(),
                        })
                    })
                    .collect();
                Ok(json!({
                    "balance": total.to_string(),
                    "unlocked_balance": unlocked.to_string(),
                    "per_subaddress": per_subaddress,
                }))
            }

            "sweep_all" => {
                let account = index_param(params, "account_index", 0)?;
                let destination = params.get("address").and_then(Value::as_str).unwrap_or("");
                let targets: Vec<u64> = params
                    .get("subaddr_indices")
                    .and_then(Value::as_array)
                    .map(|a| a.iter().filter_map(parse_index).collect())
                    .unwrap_or_default();
                // Real wallets reject malformed destinations; this one only
                // knows its own fake addresses, so "invalid" is the sentinel.
                if destination.trim().is_empty() || destination == "invalid" {
                    return Err(invalid("invalid address"));
                }
                if targets.is_empty() {
                    return Err(invalid("invalid subaddr_indices"));
                }

                let mut swept = 0u128;
                for t in state.transfers.iter_mut().filter(|t| {
                    t.coord.major == account
                        && targets.contains(&(t.coord.minor as u64))
                        && !t.spent
                        && t.confirmations > 0
                }) {
                    swept += t.amount;
                    t.spent = true;
                }
                if swept == 0 {
                    return Ok(json!({ "tx_hash_list": [], "amount_list": [] }));
                }
                Ok(json!({ "tx_hash_list": [random_txid()], "amount_list": [swept.to_string()] }))
            }

            "prepare_multisig" => {
                state.prepared = true;
                state.exchange_calls = 0;
                Ok(json!({ "multisig_info": placeholder("prepare") }))
            }

            "make_multisig" => {
                let infos = string_array(params, "multisig_info");
                let threshold = params.get("threshold").and_then(parse_index).unwrap_or(0);
                if infos.is_empty() {
                    return Err(invalid("invalid multisig_info"));
                }
                if threshold < 2 {
                    return Err(invalid("invalid threshold"));
                }
                if !state.prepared {
                    return Err(not_prepared());
                }
                state.exchange_calls = 0;
                Ok(json!({
                    "address": fake_address(0, MULTISIG_ADDRESS_INDEX),
                    "multisig_info": placeholder("exchange-1"),
                }))
            }

            "exchange_multisig_keys" => {
                if string_array(params, "multisig_info").is_empty() {
                    return Err(invalid("invalid multisig_info"));
                }
                if !state.prepared {
                    return Err(not_prepared());
                }
                state.exchange_calls += 1;
                let info = if state.exchange_calls >= 2 {
                    String::new()
                } else {
                    placeholder("exchange-2")
                };
                Ok(json!({ "address": fake_address(0, MULTISIG_ADDRESS_INDEX), "multisig_info": info }))
            }

            "export_multisig_info" => {
                if !state.prepared {
                    return Err(not_prepared());
                }
                Ok(json!({ "info": placeholder("export") }))
            }

            "import_multisig_info" => {
                let infos = string_array(params, "info");
                if infos.is_empty() {
                    return Err(invalid("invalid info"));
                }
                Ok(json!({ "n_outputs": infos.len() * 2 }))
            }

            "sign_multisig" => {
                let hex = tx_hex_param(params)?;
                Ok(json!({ "tx_data_hex": format!("{hex}aa"), "tx_hash_list": [random_txid()] }))
            }

            "submit_multisig" => {
                tx_hex_param(params)?;
                Ok(json!({ "tx_hash_list": [random_txid()] }))
            }

            "dstream_inject_transfer" => {
                self.inject(&mut state, params)?;
                Ok(json!({ "ok": true }))
            }

            "dstream_reset" => {
                *state = State::default();
                Ok(json!({ "ok": true }))
            }

            other => Err(WalletRpcError::Rpc {
                code: RPC_METHOD_NOT_FOUND,
                message: format!("method not found: {other}"),
            }),
        }
    }
}

#[async_trait]
impl RpcTransport for MemoryWallet {
    async fn call(&self, method: &str, params: Value) -> Result<Value, WalletRpcError> {
        self.dispatch(method, &params)
    }
}

fn fake_address(account: u32, index: u32) -> String {
    let hash = sha256_hex(format!("dstream-mock:{account}:{index}").as_bytes());
    format!("mockxmr_{}", &hash[..64])
}

fn random_txid() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn placeholder(prefix: &str) -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("{prefix}:{}", hex::encode(bytes))
}

fn transfer_json(t: &StoredTransfer) -> Value {
    json!({
        "amount": t.amount.to_string(),
        "confirmations": t.confirmations,
        "txid": t.txid,
        "timestamp": t.timestamp,
        "subaddr_index": { "major": t.coord.major, "minor": t.coord.minor },
        "spent": t.spent,
    })
}

fn invalid(message: &str) -> WalletRpcError {
    WalletRpcError::Rpc {
        code: INVALID_PARAMS,
        message: message.to_string(),
    }
}

fn not_prepared() -> WalletRpcError {
    WalletRpcError::Rpc {
        code: WALLET_ERROR,
        message: "wallet not prepared for multisig".into(),
    }
}

fn index_param(params: &Value, key: &str, default: u32) -> Result<u32, WalletRpcError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => parse_index(v)
            .and_then(|i| u32::try_from(i).ok())
            .ok_or_else(|| invalid(&format!("invalid {key}"))),
    }
}

fn string_array(params: &Value, key: &str) -> Vec<String> {
    params
        .get(key)
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn tx_hex_param(params: &Value) -> Result<String, WalletRpcError> {
    let hex = params
        .get("tx_data_hex")
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim();
    if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid("invalid tx_data_hex"));
    }
    Ok(hex.to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn wallet() -> MemoryWallet {
        MemoryWallet::new(Arc::new(ManualClock::at_secs(1_700_000_000)))
    }

    fn inject(w: &MemoryWallet, idx: u32, amount: u128, conf: u64) {
        w.inject_transfer(&InjectTransfer {
            account_index: 0,
            address_index: idx,
            amount_atomic: amount,
            confirmations: conf,
            txid: None,
            timestamp_sec: None,
        })
        .unwrap();
    }

    #[tokio::test]
    async fn addresses_are_deterministic() {
        let w = wallet();
        let a = w
            .call("create_address", json!({"account_index":0,"label":"x"}))
            .await
            .unwrap();
        assert_eq!(a["address_index"], 1);
        assert_eq!(a["address"], fake_address(0, 1));
        assert!(fake_address(0, 1).starts_with("mockxmr_"));
        assert_eq!(fake_address(0, 1).len(), "mockxmr_".len() + 64);
    }

    #[tokio::test]
    async fn balance_and_sweep() {
        let w = wallet();
        w.call("create_address", json!({"label":"a"})).await.unwrap();
        inject(&w, 1, 100, 3);
        inject(&w, 1, 50, 0);

        let b = w.call("get_balance", json!({"account_index":0,"address_indices":[1]})).await.unwrap();
        assert_eq!(b["balance"], "150");
        assert_eq!(b["unlocked_balance"], "100");

        let s = w
            .call("sweep_all", json!({"account_index":0,"subaddr_indices":[1],"address":"dest"}))
            .await
            .unwrap();
        assert_eq!(s["amount_list"][0], "100");

        // Only the unconfirmed output is left.
        let b = w.call("get_balance", json!({"account_index":0})).await.unwrap();
        assert_eq!(b["unlocked_balance"], "0");
        assert_eq!(b["balance"], "50");
    }

    #[tokio::test]
    async fn inject_into_unknown_subaddress_fails() {
        let w = wallet();
        let err = w
            .call("dstream_inject_transfer", json!({"address_index":5,"amount":"1"}))
            .await
            .unwrap_err();
        assert_eq!(err.rpc_code(), Some(INVALID_PARAMS));
    }

    #[tokio::test]
    async fn multisig_sequence() {
        let w = wallet();
        let err = w
            .call("make_multisig", json!({"multisig_info":["a"],"threshold":2}))
            .await
            .unwrap_err();
        assert_eq!(err.rpc_code(), Some(WALLET_ERROR));

        w.call("prepare_multisig", json!({})).await.unwrap();
        let made = w
            .call("make_multisig", json!({"multisig_info":["a"],"threshold":2}))
            .await
            .unwrap();
        assert!(made["multisig_info"].as_str().unwrap().starts_with("exchange-1:"));

        let first = w.call("exchange_multisig_keys", json!({"multisig_info":["b"]})).await.unwrap();
        assert!(!first["multisig_info"].as_str().unwrap().is_empty());
        let second = w.call("exchange_multisig_keys", json!({"multisig_info":["c"]})).await.unwrap();
        assert_eq!(second["multisig_info"], "");

        let signed = w.call("sign_multisig", json!({"tx_data_hex":"ABCD"})).await.unwrap();
        assert_eq!(signed["tx_data_hex"], "abcdaa");
    }

    #[tokio::test]
    async fn reset_and_unknown_method() {
        let w = wallet();
        w.call("create_address", json!({"label":"a"})).await.unwrap();
        w.reset();
        let listing = w.call("get_address", json!({})).await.unwrap();
        assert_eq!(listing["addresses"].as_array().unwrap().len(), 1);

        let err = w.call("frobnicate", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "wallet rpc error -32601: method not found: frobnicate");
    }
}
