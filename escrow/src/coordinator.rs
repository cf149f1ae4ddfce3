//! Escrow-v3 operations: authorization, validation, wallet calls and
//! store transitions, in that order.
//!
//! Wallet calls are made with no lock held. Each operation reads a
//! snapshot, calls the wallet, then re-applies its transition through
//! [`EscrowStore::update`], which re-checks the phase. `make` and
//! `exchange` also require the session to still match their snapshot
//! (same phase, round and participant infos), so when two coordinator
//! requests overlap the later commit gets an invalid phase transition
//! instead of clobbering the first. Import, sign and submit are
//! repeatable in their phases and only need the phase check.

use std::sync::Arc;

use dstream_protocol::config::{KEX_COMPLETE_MARKER, MIN_MULTISIG_THRESHOLD};
use dstream_protocol::crypto::is_hex64;
use dstream_protocol::nostr::StreamIdentity;
use dstream_protocol::wallet::{WalletRpcClient, WalletRpcError};

use crate::error::EscrowError;
use crate::session::{
    ContributionRound, EscrowPhase, EscrowSession, EscrowSessionView, NewEscrowSession,
};
use crate::store::EscrowStore;

/// Input to [`EscrowCoordinator::create`]. Participant keys arrive raw.
#[derive(Debug, Clone)]
pub struct CreateEscrow {
    pub stream: StreamIdentity,
    pub participant_pubkeys: Vec<String>,
    /// Values below the 2-of-N minimum fall back to the all-signers default.
    pub threshold: Option<u64>,
}

#[derive(Clone)]
pub struct EscrowCoordinator {
    store: Arc<EscrowStore>,
    wallet: Option<WalletRpcClient>,
}

impl EscrowCoordinator {
    pub fn new(store: Arc<EscrowStore>, wallet: Option<WalletRpcClient>) -> Self {
        Self { store, wallet }
    }

    pub fn store(&self) -> &EscrowStore {
        &self.store
    }

    fn wallet(&self) -> Result<&WalletRpcClient, EscrowError> {
        self.wallet.as_ref().ok_or(EscrowError::WalletNotConfigured)
    }

    fn coordinator_snapshot(&self, caller: &str, id: &str) -> Result<EscrowSession, EscrowError> {
        let session = self.store.get(id)?;
        if !session.is_coordinator(caller) {
            return Err(EscrowError::Forbidden("not authorized for coordinator action"));
        }
        Ok(session)
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Opens a session. Only the stream owner may coordinate escrow for it.
    pub async fn create(
        &self,
        caller: &str,
        req: CreateEscrow,
    ) -> Result<EscrowSessionView, EscrowError> {
        let wallet = self.wallet()?;
        if !req.stream.is_owner(caller) {
            return Err(EscrowError::Forbidden("not authorized for stream"));
        }
        let coordinator = caller.to_lowercase();

        let parsed = normalize_pubkeys(&req.participant_pubkeys).ok_or_else(|| {
            EscrowError::validation("participantPubkeys must contain at least one valid hex pubkey")
        })?;
        let participants: Vec<String> = parsed.into_iter().filter(|p| *p != coordinator).collect();
        if participants.is_empty() {
            return Err(EscrowError::validation(
                "participantPubkeys must include at least one non-coordinator pubkey",
            ));
        }

        let total_signers = participants.len() + 1;
        let threshold = req
            .threshold
            .and_then(|t| usize::try_from(t).ok())
            .filter(|t| *t >= MIN_MULTISIG_THRESHOLD)
            .unwrap_or(total_signers);
        if threshold > total_signers {
            return Err(EscrowError::validation(format!(
                "threshold must be <= {total_signers}"
            )));
        }

        let prepare_info = wallet
            .prepare_multisig()
            .await
            .map_err(|source| EscrowError::Wallet {
                action: "create",
                source,
            })?;

        let session = self.store.create(NewEscrowSession {
            stream: req.stream,
            coordinator_pubkey: coordinator,
            participant_pubkeys: participants,
            threshold,
            coordinator_prepare_info: prepare_info,
        });
        tracing::info!(
            session_id = %session.id,
            stream = %session.stream,
            threshold,
            signers = total_signers,
            "escrow session opened"
        );
        Ok(session.view())
    }

    /// Coordinator or participant view. Reading a session keeps it alive.
    pub fn get(&self, caller: &str, id: &str) -> Result<EscrowSessionView, EscrowError> {
        let session = self.store.get(id)?;
        if !session.is_coordinator(caller) && !session.is_participant(caller) {
            return Err(EscrowError::Forbidden("not authorized for session"));
        }
        Ok(self.store.touch(id)?.view())
    }

    /// A participant submits their prepare or exchange info.
    pub fn contribute(
        &self,
        caller: &str,
        id: &str,
        round: &str,
        multisig_info: &str,
    ) -> Result<EscrowSessionView, EscrowError> {
        let session = self.store.get(id)?;
        if !session.is_participant(caller) {
            return Err(EscrowError::Forbidden("not authorized for participant action"));
        }
        let round = ContributionRound::parse(round)
            .ok_or_else(|| EscrowError::validation("phase must be 'prepare' or 'exchange'"))?;
        let info = multisig_info.trim();
        if info.is_empty() {
            return Err(EscrowError::validation("invalid multisigInfo"));
        }

        let ((), updated) = self.store.update(id, |s| {
            s.record_contribution(caller, round, info.to_string())
        })?;
        tracing::debug!(session_id = %id, round = round.as_str(), phase = %updated.phase, "escrow contribution recorded");
        Ok(updated.view())
    }

    /// Coordinator runs `make_multisig` once every prepare info is in.
    pub async fn make(&self, caller: &str, id: &str) -> Result<EscrowSessionView, EscrowError> {
        let wallet = self.wallet()?;
        let session = self.coordinator_snapshot(caller, id)?;
        session.require_phase(&[EscrowPhase::CollectingPrepare, EscrowPhase::MakeReady], "make")?;
        if !session.pending_prepare().is_empty() {
            return Err(EscrowError::MissingInfos("participants still pending prepare info"));
        }

        let out = wallet
            .make_multisig(&session.ordered_prepare_infos(), session.threshold)
            .await
            .map_err(|source| EscrowError::Wallet {
                action: "make",
                source,
            })?;
        let ((), updated) = self.store.update(id, |s| {
            s.require_unchanged(&session, "make")?;
            s.apply_make(out)
        })?;
        log_transition(&updated, "make");
        Ok(updated.view())
    }

    /// Coordinator runs one key-exchange round.
    pub async fn exchange(&self, caller: &str, id: &str) -> Result<EscrowSessionView, EscrowError> {
        let wallet = self.wallet()?;
        let session = self.coordinator_snapshot(caller, id)?;
        session.require_phase(
            &[EscrowPhase::CollectingExchange, EscrowPhase::ExchangeReady],
            "exchange",
        )?;
        if !session.pending_exchange().is_empty() {
            return Err(EscrowError::MissingInfos("participants still pending exchange info"));
        }

        let result = wallet
            .exchange_multisig_keys(&session.ordered_exchange_infos())
            .await;
        let ((), updated) = match result {
            Ok(out) => self.store.update(id, |s| {
                s.require_unchanged(&session, "exchange")?;
                s.apply_exchange(out)
            })?,
            Err(err) if is_kex_complete(&err) => self.store.update(id, |s| {
                s.require_unchanged(&session, "exchange")?;
                s.finish_exchange();
                Ok(())
            })?,
            Err(source) => {
                return Err(EscrowError::Wallet {
                    action: "exchange",
                    source,
                })
            }
        };
        log_transition(&updated, "exchange");
        Ok(updated.view())
    }

    /// Imports peers' exported multisig info. Repeatable.
    pub async fn import(
        &self,
        caller: &str,
        id: &str,
        infos: &[String],
    ) -> Result<EscrowSessionView, EscrowError> {
        let wallet = self.wallet()?;
        let session = self.coordinator_snapshot(caller, id)?;
        session.require_phase(&[EscrowPhase::Exchanged, EscrowPhase::Signed], "import")?;
        let infos: Vec<String> = infos
            .iter()
            .map(|i| i.trim())
            .filter(|i| !i.is_empty())
            .map(str::to_string)
            .collect();
        if infos.is_empty() {
            return Err(EscrowError::validation("infos must include at least one entry"));
        }

        let imported = wallet
            .import_multisig_info(&infos)
            .await
            .map_err(|source| EscrowError::Wallet {
                action: "import",
                source,
            })?;
        let ((), updated) = self.store.update(id, |s| s.apply_import(imported))?;
        tracing::info!(session_id = %id, imported, total = updated.imported_outputs, "escrow outputs imported");

        let mut view = updated.view();
        view.imported_now = Some(imported);
        Ok(view)
    }

    /// Signs a multisig transaction set.
    pub async fn sign(
        &self,
        caller: &str,
        id: &str,
        tx_data_hex: &str,
    ) -> Result<EscrowSessionView, EscrowError> {
        let wallet = self.wallet()?;
        let session = self.coordinator_snapshot(caller, id)?;
        session.require_phase(&[EscrowPhase::Exchanged, EscrowPhase::Signed], "sign")?;
        let tx_data_hex =
            normalize_tx_hex(tx_data_hex).ok_or_else(|| EscrowError::validation("invalid txDataHex"))?;

        let signed = wallet
            .sign_multisig(&tx_data_hex)
            .await
            .map_err(|source| EscrowError::Wallet {
                action: "sign",
                source,
            })?;
        let signed_hex = signed.tx_data_hex.clone();
        let ((), updated) = self.store.update(id, |s| s.apply_sign(signed))?;
        log_transition(&updated, "sign");

        let mut view = updated.view();
        view.signed_tx_data_hex = Some(signed_hex);
        Ok(view)
    }

    /// Submits the signed set. An explicit hex wins over the stored one.
    pub async fn submit(
        &self,
        caller: &str,
        id: &str,
        tx_data_hex: Option<&str>,
    ) -> Result<EscrowSessionView, EscrowError> {
        let wallet = self.wallet()?;
        let session = self.coordinator_snapshot(caller, id)?;
        session.require_phase(&[EscrowPhase::Signed, EscrowPhase::Submitted], "submit")?;
        let tx_data_hex = tx_data_hex
            .and_then(normalize_tx_hex)
            .or(session.signed_tx_data_hex)
            .ok_or_else(|| {
                EscrowError::validation("txDataHex missing (provide body.txDataHex or sign first)")
            })?;

        let txids = wallet
            .submit_multisig(&tx_data_hex)
            .await
            .map_err(|source| EscrowError::Wallet {
                action: "submit",
                source,
            })?;
        let ((), updated) = self.store.update(id, |s| s.apply_submit(txids))?;
        log_transition(&updated, "submit");
        Ok(updated.view())
    }
}

fn log_transition(session: &EscrowSession, action: &str) {
    tracing::info!(
        session_id = %session.id,
        action,
        phase = %session.phase,
        round = session.exchange_round,
        "escrow session advanced"
    );
}

fn is_kex_complete(err: &WalletRpcError) -> bool {
    err.to_string().to_lowercase().contains(KEX_COMPLETE_MARKER)
}

/// Trimmed, lowercased, first occurrence wins. Blank entries are skipped;
/// one malformed key rejects the whole list, as does a list with no keys.
fn normalize_pubkeys(raw: &[String]) -> Option<Vec<String>> {
    let mut out: Vec<String> = Vec::new();
    for key in raw.iter().map(|k| k.trim().to_lowercase()) {
        if key.is_empty() {
            continue;
        }
        if !is_hex64(&key) {
            return None;
        }
        if !out.contains(&key) {
            out.push(key);
        }
    }
    (!out.is_empty()).then_some(out)
}

fn normalize_tx_hex(raw: &str) -> Option<String> {
    let hex = raw.trim().to_lowercase();
    (!hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit())).then_some(hex)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pubkeys_are_normalized() {
        let a = "A".repeat(64);
        let raw = vec![a.clone(), " ".into(), a.to_lowercase(), format!(" {} ", "b".repeat(64))];
        assert_eq!(
            normalize_pubkeys(&raw),
            Some(vec!["a".repeat(64), "b".repeat(64)])
        );
    }

    #[test]
    fn one_bad_pubkey_rejects_the_list() {
        assert_eq!(normalize_pubkeys(&["b".repeat(64), "nope".into()]), None);
        assert_eq!(normalize_pubkeys(&["  ".into()]), None);
        assert_eq!(normalize_pubkeys(&[]), None);
    }

    #[test]
    fn tx_hex_validation() {
        assert_eq!(normalize_tx_hex(" DEADbeef "), Some("deadbeef".into()));
        assert_eq!(normalize_tx_hex("xyz"), None);
        assert_eq!(normalize_tx_hex("  "), None);
    }

    #[test]
    fn kex_marker_matches_any_case() {
        let err = WalletRpcError::Rpc {
            code: -1,
            message: "Kex is already complete".into(),
        };
        assert!(is_kex_complete(&err));
        assert!(!is_kex_complete(&WalletRpcError::Transport("timeout".into())));
    }
}
