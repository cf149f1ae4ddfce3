//! # Typed Wallet RPC Client
//!
//! Thin, normalizing wrapper over an [`RpcTransport`]. Every method maps
//! one wallet RPC call to one typed result. There is no caching and no
//! retrying: transfer lists and balances change between reads, and a
//! failed call is reported to the caller as-is.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{json, Value};

use super::error::WalletRpcError;
use super::transport::RpcTransport;
use super::types::*;
use crate::amount::{parse_amount, parse_count, parse_index};

/// Methods skipped by passive probes because calling them for real has
/// side effects.
const PASSIVE_SKIP_METHODS: &[&str] = &[
    "sweep_all",
    "prepare_multisig",
    "make_multisig",
    "exchange_multisig_keys",
    "export_multisig_info",
    "import_multisig_info",
    "sign_multisig",
    "submit_multisig",
];

#[derive(Clone)]
pub struct WalletRpcClient {
    transport: Arc<dyn RpcTransport>,
}

impl WalletRpcClient {
    pub fn new(transport: Arc<dyn RpcTransport>) -> Self {
        Self { transport }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, WalletRpcError> {
        self.transport.call(method, params).await
    }

    // -----------------------------------------------------------------------
    // Wallet basics
    // -----------------------------------------------------------------------

    pub async fn get_version(&self) -> Result<u64, WalletRpcError> {
        let res = self.call("get_version", json!({})).await?;
        Ok(res.get("version").and_then(parse_index).unwrap_or(0))
    }

    pub async fn create_address(
        &self,
        account_index: u32,
        label: &str,
    ) -> Result<CreatedAddress, WalletRpcError> {
        let res = self
            .call(
                "create_address",
                json!({ "account_index": account_index, "label": label }),
            )
            .await?;
        let invalid = WalletRpcError::InvalidResult {
            method: "create_address",
        };
        let address = non_empty_trimmed(res.get("address")).ok_or(invalid.clone())?;
        let address_index = res
            .get("address_index")
            .and_then(parse_index)
            .and_then(|i| u32::try_from(i).ok())
            .ok_or(invalid)?;
        Ok(CreatedAddress {
            address,
            address_index,
        })
    }

    pub async fn get_address(&self, account_index: u32) -> Result<AddressListing, WalletRpcError> {
        let res = self
            .call("get_address", json!({ "account_index": account_index }))
            .await?;
        let address = non_empty_trimmed(res.get("address")).ok_or(WalletRpcError::InvalidResult {
            method: "get_address",
        })?;
        let addresses = res
            .get("addresses")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|a| {
                        Some(SubaddressEntry {
                            address: non_empty_trimmed(a.get("address"))?,
                            address_index: u32::try_from(parse_index(a.get("address_index")?)?)
                                .ok()?,
                            label: non_empty_trimmed(a.get("label")),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(AddressListing { address, addresses })
    }

    /// Every incoming transfer the wallet knows about: confirmed, pending
    /// and in the mempool.
    pub async fn get_incoming_transfers(&self) -> Result<Vec<TransferRecord>, WalletRpcError> {
        let res = self
            .call(
                "get_transfers",
                json!({ "in": true, "pending": true, "pool": true }),
            )
            .await?;
        let mut out = Vec::new();
        for bucket in ["in", "pending", "pool"] {
            if let Some(list) = res.get(bucket).and_then(Value::as_array) {
                out.extend(list.iter().filter_map(TransferRecord::from_rpc));
            }
        }
        Ok(out)
    }

    pub async fn refresh(&self) -> Result<(), WalletRpcError> {
        self.call("refresh", json!({})).await.map(|_| ())
    }

    /// Balance of `account_index`, optionally restricted to some subaddresses.
    pub async fn get_balance(
        &self,
        account_index: u32,
        address_indices: &[u32],
    ) -> Result<Balance, WalletRpcError> {
        let mut params = json!({ "account_index": account_index });
        let unique: BTreeSet<u32> = address_indices.iter().copied().collect();
        if !unique.is_empty() {
            params["address_indices"] = json!(unique);
        }
        let res = self.call("get_balance", params).await?;

        let per_subaddress = res
            .get("per_subaddress")
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(|e| {
                        Some(SubaddressBalance {
                            address_index: u32::try_from(parse_index(e.get("address_index")?)?)
                                .ok()?,
                            balance_atomic: e.get("balance").and_then(parse_amount).unwrap_or(0),
                            unlocked_atomic: e
                                .get("unlocked_balance")
                                .and_then(parse_amount)
                                .unwrap_or(0),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Balance {
            balance_atomic: res.get("balance").and_then(parse_amount).unwrap_or(0),
            unlocked_atomic: res
                .get("unlocked_balance")
                .and_then(parse_amount)
                .unwrap_or(0),
            per_subaddress,
        })
    }

    /// Sweeps every unlocked output of one subaddress to `destination`.
    pub async fn sweep_all(
        &self,
        account_index: u32,
        address_index: u32,
        destination: &str,
    ) -> Result<SweepResult, WalletRpcError> {
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(WalletRpcError::InvalidRequest(
                "sweep_all requires destination address".into(),
            ));
        }
        let res = self
            .call(
                "sweep_all",
                json!({
                    "account_index": account_index,
                    "subaddr_indices": [address_index],
                    "address": destination,
                }),
            )
            .await?;
        let amount_atomic = res
            .get("amount_list")
            .and_then(Value::as_array)
            .map(|l| l.iter().filter_map(parse_amount).sum())
            .unwrap_or(0);
        Ok(SweepResult {
            txids: string_list(res.get("tx_hash_list")),
            amount_atomic,
        })
    }

    // -----------------------------------------------------------------------
    // Multisig
    // -----------------------------------------------------------------------

    pub async fn prepare_multisig(&self) -> Result<String, WalletRpcError> {
        let res = self.call("prepare_multisig", json!({})).await?;
        non_empty_trimmed(res.get("multisig_info")).ok_or(WalletRpcError::InvalidResult {
            method: "prepare_multisig",
        })
    }

    pub async fn make_multisig(
        &self,
        infos: &[String],
        threshold: usize,
    ) -> Result<MultisigRound, WalletRpcError> {
        let infos = clean_infos(infos, "make_multisig requires multisigInfo")?;
        if threshold < 2 {
            return Err(WalletRpcError::InvalidRequest(
                "make_multisig threshold must be >= 2".into(),
            ));
        }
        let res = self
            .call(
                "make_multisig",
                json!({ "multisig_info": infos, "threshold": threshold, "password": "" }),
            )
            .await?;
        Ok(multisig_round(&res))
    }

    pub async fn exchange_multisig_keys(
        &self,
        infos: &[String],
    ) -> Result<MultisigRound, WalletRpcError> {
        let infos = clean_infos(infos, "exchange_multisig_keys requires multisigInfo")?;
        let res = self
            .call(
                "exchange_multisig_keys",
                json!({ "multisig_info": infos, "password": "" }),
            )
            .await?;
        Ok(multisig_round(&res))
    }

    pub async fn export_multisig_info(&self) -> Result<String, WalletRpcError> {
        let res = self.call("export_multisig_info", json!({})).await?;
        non_empty_trimmed(res.get("info")).ok_or(WalletRpcError::InvalidResult {
            method: "export_multisig_info",
        })
    }

    /// Returns how many outputs the wallet imported.
    pub async fn import_multisig_info(&self, infos: &[String]) -> Result<u64, WalletRpcError> {
        let infos = clean_infos(infos, "import_multisig_info requires infos")?;
        let res = self
            .call("import_multisig_info", json!({ "info": infos }))
            .await?;
        Ok(res
            .get("n_outputs")
            .and_then(parse_count)
            .or_else(|| res.get("n_outputs_imported").and_then(parse_count))
            .unwrap_or(0))
    }

    pub async fn sign_multisig(&self, tx_data_hex: &str) -> Result<SignedMultisig, WalletRpcError> {
        let tx_data_hex = require_tx_hex(tx_data_hex, "sign_multisig requires txDataHex")?;
        let res = self
            .call("sign_multisig", json!({ "tx_data_hex": tx_data_hex }))
            .await?;
        let signed = non_empty_trimmed(res.get("tx_data_hex")).ok_or(
            WalletRpcError::InvalidResult {
                method: "sign_multisig",
            },
        )?;
        Ok(SignedMultisig {
            tx_data_hex: signed,
            txids: string_list(res.get("tx_hash_list")),
        })
    }

    pub async fn submit_multisig(&self, tx_data_hex: &str) -> Result<Vec<String>, WalletRpcError> {
        let tx_data_hex = require_tx_hex(tx_data_hex, "submit_multisig requires txDataHex")?;
        let res = self
            .call("submit_multisig", json!({ "tx_data_hex": tx_data_hex }))
            .await?;
        Ok(string_list(res.get("tx_hash_list")))
    }

    // -----------------------------------------------------------------------
    // Capability probing
    // -----------------------------------------------------------------------

    /// Probes each method once, in order, deduplicated.
    ///
    /// A JSON-RPC error other than "method not found" still proves the
    /// method exists (the probe params are deliberately bogus). Transport
    /// failures prove nothing, so they count as unsupported.
    pub async fn probe_methods(&self, methods: &[&str], mode: ProbeMode) -> Vec<MethodProbe> {
        let mut seen = BTreeSet::new();
        let mut probes = Vec::new();

        for method in methods.iter().map(|m| m.trim()).filter(|m| !m.is_empty()) {
            if !seen.insert(method) {
                continue;
            }
            if mode == ProbeMode::Passive && PASSIVE_SKIP_METHODS.contains(&method) {
                probes.push(MethodProbe {
                    method: method.to_string(),
                    supported: true,
                    code: None,
                    message: "skipped in passive mode (assumed supported)".into(),
                });
                continue;
            }

            let (supported, code, message) = match self.call(method, probe_params_for(method)).await {
                Ok(_) => (true, None, "ok".to_string()),
                Err(err) => match err.rpc_code() {
                    Some(code) => (!err.is_method_not_found(), Some(code), err.to_string()),
                    None => (false, None, err.to_string()),
                },
            };
            probes.push(MethodProbe {
                method: method.to_string(),
                supported,
                code,
                message,
            });
        }
        probes
    }

    // -----------------------------------------------------------------------
    // Dev wallet helpers
    // -----------------------------------------------------------------------

    /// Adds a fake incoming transfer. Only dev wallets answer this.
    pub async fn inject_transfer(&self, t: &InjectTransfer) -> Result<(), WalletRpcError> {
        let mut params = json!({
            "account_index": t.account_index,
            "address_index": t.address_index,
            "amount": t.amount_atomic.to_string(),
            "confirmations": t.confirmations,
        });
        if let Some(txid) = &t.txid {
            params["txid"] = json!(txid);
        }
        if let Some(ts) = t.timestamp_sec {
            params["timestamp"] = json!(ts);
        }
        let res = self.call("dstream_inject_transfer", params).await?;
        expect_ok(&res, "dstream_inject_transfer")
    }

    /// Wipes all dev wallet state.
    pub async fn reset(&self) -> Result<(), WalletRpcError> {
        let res = self.call("dstream_reset", json!({})).await?;
        expect_ok(&res, "dstream_reset")
    }
}

fn clean_infos(infos: &[String], empty_msg: &str) -> Result<Vec<String>, WalletRpcError> {
    let cleaned: Vec<String> = infos
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    if cleaned.is_empty() {
        return Err(WalletRpcError::InvalidRequest(empty_msg.into()));
    }
    Ok(cleaned)
}

fn require_tx_hex<'a>(tx_data_hex: &'a str, empty_msg: &str) -> Result<&'a str, WalletRpcError> {
    let trimmed = tx_data_hex.trim();
    if trimmed.is_empty() {
        return Err(WalletRpcError::InvalidRequest(empty_msg.into()));
    }
    Ok(trimmed)
}

fn multisig_round(res: &Value) -> MultisigRound {
    MultisigRound {
        address: non_empty_trimmed(res.get("address")),
        multisig_info: non_empty_trimmed(res.get("multisig_info")),
    }
}

fn expect_ok(res: &Value, method: &'static str) -> Result<(), WalletRpcError> {
    if res.get("ok").and_then(Value::as_bool) == Some(true) {
        Ok(())
    } else {
        Err(WalletRpcError::InvalidResult { method })
    }
}

/// Harmless (usually invalid) parameters for active probing.
fn probe_params_for(method: &str) -> Value {
    match method {
        "create_address" => json!({ "account_index": 0, "label": "dstream_probe" }),
        "get_transfers" => json!({ "in": true }),
        "get_balance" => json!({ "account_index": 0 }),
        "sweep_all" => json!({ "account_index": 0, "subaddr_indices": [0], "address": "invalid" }),
        "make_multisig" => json!({ "multisig_info": ["probe_info"], "threshold": 2, "password": "" }),
        "exchange_multisig_keys" => json!({ "multisig_info": ["probe_exchange"], "password": "" }),
        "import_multisig_info" => json!({ "info": ["probe_import"] }),
        "sign_multisig" | "submit_multisig" => json!({ "tx_data_hex": "00" }),
        _ => json!({}),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::wallet::MemoryWallet;
    use async_trait::async_trait;

    fn client() -> (Arc<MemoryWallet>, WalletRpcClient) {
        let wallet = Arc::new(MemoryWallet::new(Arc::new(ManualClock::at_secs(1_700_000_000))));
        (wallet.clone(), WalletRpcClient::new(wallet))
    }

    /// Transport that fails every call at the network level.
    struct Unreachable;

    #[async_trait]
    impl RpcTransport for Unreachable {
        async fn call(&self, _: &str, _: Value) -> Result<Value, WalletRpcError> {
            Err(WalletRpcError::Transport("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn create_and_list_addresses() {
        let (_, c) = client();
        let a = c.create_address(0, "dstream_tip:x").await.unwrap();
        assert_eq!(a.address_index, 1);
        let listing = c.get_address(0).await.unwrap();
        assert_eq!(listing.addresses.len(), 2);
        // Index 0 has an empty label, which normalizes to None.
        let labels: Vec<_> = listing.labels().collect();
        assert_eq!(labels, vec![(1, "dstream_tip:x")]);
    }

    #[tokio::test]
    async fn transfers_include_pool() {
        let (_, c) = client();
        let a = c.create_address(0, "l").await.unwrap();
        for conf in [0, 5] {
            c.inject_transfer(&InjectTransfer {
                account_index: 0,
                address_index: a.address_index,
                amount_atomic: 10,
                confirmations: conf,
                txid: None,
                timestamp_sec: None,
            })
            .await
            .unwrap();
        }
        let transfers = c.get_incoming_transfers().await.unwrap();
        assert_eq!(transfers.len(), 2);
    }

    #[tokio::test]
    async fn sweep_requires_destination() {
        let (_, c) = client();
        assert!(matches!(
            c.sweep_all(0, 1, "  ").await,
            Err(WalletRpcError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn make_multisig_rejects_low_threshold_locally() {
        let (_, c) = client();
        assert!(matches!(
            c.make_multisig(&["x".into()], 1).await,
            Err(WalletRpcError::InvalidRequest(_))
        ));
        assert!(matches!(
            c.make_multisig(&["  ".into()], 2).await,
            Err(WalletRpcError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn passive_probe_skips_side_effects() {
        let (_, c) = client();
        let probes = c
            .probe_methods(&["get_version", "sweep_all", "get_version", "nope"], ProbeMode::Passive)
            .await;
        assert_eq!(probes.len(), 3);
        assert!(probes[0].supported);
        assert_eq!(probes[1].message, "skipped in passive mode (assumed supported)");
        assert!(!probes[2].supported);
        assert_eq!(probes[2].code, Some(-32601));
    }

    #[tokio::test]
    async fn active_probe_counts_rpc_errors_as_supported() {
        let (_, c) = client();
        // The dev wallet rejects the bogus sweep address with -32602.
        let probes = c.probe_methods(&["sweep_all"], ProbeMode::Active).await;
        assert!(probes[0].supported);
        assert_eq!(probes[0].code, Some(-32602));
    }

    #[tokio::test]
    async fn transport_failure_is_unsupported() {
        let c = WalletRpcClient::new(Arc::new(Unreachable));
        let probes = c.probe_methods(&["get_version"], ProbeMode::Active).await;
        assert!(!probes[0].supported);
        assert_eq!(probes[0].code, None);
        assert!(c.get_version().await.is_err());
    }
}
