//! Escrow session state and its phase machine.
//!
//! ```text
//! collecting_prepare ─▶ make_ready ─▶ collecting_exchange ⇄ exchange_ready ─▶ exchanged ─▶ signed ─▶ submitted
//!                                   (round + 1 on each exchange)
//! ```
//!
//! The pair `(exchange round, phase rank)` never decreases. Stepping back
//! from `exchange_ready` to `collecting_exchange` always opens a new round.
//! Write-once fields (wallet address, signed data, txids) are never
//! cleared; a later step may only replace them with something non-empty.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use dstream_protocol::nostr::StreamIdentity;
use dstream_protocol::wallet::{MultisigRound, SignedMultisig};

use crate::error::EscrowError;

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowPhase {
    CollectingPrepare,
    MakeReady,
    CollectingExchange,
    ExchangeReady,
    Exchanged,
    Signed,
    Submitted,
}

impl EscrowPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CollectingPrepare => "collecting_prepare",
            Self::MakeReady => "make_ready",
            Self::CollectingExchange => "collecting_exchange",
            Self::ExchangeReady => "exchange_ready",
            Self::Exchanged => "exchanged",
            Self::Signed => "signed",
            Self::Submitted => "submitted",
        }
    }

    /// Position in the lifecycle. Later phases rank higher.
    pub fn rank(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for EscrowPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which multisig round a participant is contributing to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContributionRound {
    Prepare,
    Exchange,
}

impl ContributionRound {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "prepare" => Some(Self::Prepare),
            "exchange" => Some(Self::Exchange),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Exchange => "exchange",
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscrowSession {
    pub id: String,
    pub stream: StreamIdentity,
    pub coordinator_pubkey: String,
    /// Ordered, deduplicated, never contains the coordinator.
    pub participant_pubkeys: Vec<String>,
    pub threshold: usize,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    pub expires_at_ms: u64,
    pub phase: EscrowPhase,
    pub coordinator_prepare_info: String,
    pub participant_prepare_infos: BTreeMap<String, String>,
    pub coordinator_exchange_info: Option<String>,
    pub participant_exchange_infos: BTreeMap<String, String>,
    pub exchange_round: u32,
    pub wallet_address: Option<String>,
    pub imported_outputs: u64,
    pub signed_tx_data_hex: Option<String>,
    pub signed_txids: Vec<String>,
    pub submitted_txids: Vec<String>,
}

/// What a new session is created from. Timestamps and the id are the
/// store's job.
#[derive(Debug, Clone)]
pub struct NewEscrowSession {
    pub stream: StreamIdentity,
    pub coordinator_pubkey: String,
    pub participant_pubkeys: Vec<String>,
    pub threshold: usize,
    pub coordinator_prepare_info: String,
}

impl EscrowSession {
    pub(crate) fn from_new(id: String, new: NewEscrowSession, now_ms: u64, ttl_ms: u64) -> Self {
        let mut session = Self {
            id,
            stream: new.stream,
            coordinator_pubkey: new.coordinator_pubkey,
            participant_pubkeys: new.participant_pubkeys,
            threshold: new.threshold,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
            expires_at_ms: now_ms.saturating_add(ttl_ms),
            phase: EscrowPhase::CollectingPrepare,
            coordinator_prepare_info: new.coordinator_prepare_info,
            participant_prepare_infos: BTreeMap::new(),
            coordinator_exchange_info: None,
            participant_exchange_infos: BTreeMap::new(),
            exchange_round: 0,
            wallet_address: None,
            imported_outputs: 0,
            signed_tx_data_hex: None,
            signed_txids: Vec::new(),
            submitted_txids: Vec::new(),
        };
        if session.pending_prepare().is_empty() {
            session.phase = EscrowPhase::MakeReady;
        }
        session
    }

    pub fn is_coordinator(&self, pubkey: &str) -> bool {
        self.coordinator_pubkey == pubkey
    }

    pub fn is_participant(&self, pubkey: &str) -> bool {
        self.participant_pubkeys.iter().any(|p| p == pubkey)
    }

    pub fn pending_prepare(&self) -> Vec<String> {
        pending(&self.participant_pubkeys, &self.participant_prepare_infos)
    }

    pub fn pending_exchange(&self) -> Vec<String> {
        pending(&self.participant_pubkeys, &self.participant_exchange_infos)
    }

    /// Participant prepare infos in participant order.
    pub fn ordered_prepare_infos(&self) -> Vec<String> {
        ordered(&self.participant_pubkeys, &self.participant_prepare_infos)
    }

    /// Participant exchange infos for the current round, in participant order.
    pub fn ordered_exchange_infos(&self) -> Vec<String> {
        ordered(&self.participant_pubkeys, &self.participant_exchange_infos)
    }

    pub fn require_phase(
        &self,
        allowed: &[EscrowPhase],
        action: &'static str,
    ) -> Result<(), EscrowError> {
        if allowed.contains(&self.phase) {
            Ok(())
        } else {
            Err(EscrowError::InvalidPhase {
                from: self.phase,
                to: action,
            })
        }
    }

    /// Fails when the session has moved since `snapshot` was read: another
    /// phase, another exchange round, or different participant infos than
    /// the ones a wallet call was made with.
    pub fn require_unchanged(
        &self,
        snapshot: &EscrowSession,
        action: &'static str,
    ) -> Result<(), EscrowError> {
        let unchanged = self.phase == snapshot.phase
            && self.exchange_round == snapshot.exchange_round
            && self.participant_prepare_infos == snapshot.participant_prepare_infos
            && self.participant_exchange_infos == snapshot.participant_exchange_infos;
        if unchanged {
            Ok(())
        } else {
            Err(EscrowError::InvalidPhase {
                from: self.phase,
                to: action,
            })
        }
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Records a participant's multisig info for `round`.
    pub fn record_contribution(
        &mut self,
        pubkey: &str,
        round: ContributionRound,
        info: String,
    ) -> Result<(), EscrowError> {
        match round {
            ContributionRound::Prepare => {
                self.require_phase(
                    &[EscrowPhase::CollectingPrepare, EscrowPhase::MakeReady],
                    round.as_str(),
                )?;
                self.participant_prepare_infos.insert(pubkey.to_string(), info);
                self.phase = if self.pending_prepare().is_empty() {
                    EscrowPhase::MakeReady
                } else {
                    EscrowPhase::CollectingPrepare
                };
            }
            ContributionRound::Exchange => {
                self.require_phase(
                    &[EscrowPhase::CollectingExchange, EscrowPhase::ExchangeReady],
                    round.as_str(),
                )?;
                self.participant_exchange_infos.insert(pubkey.to_string(), info);
                self.phase = if self.pending_exchange().is_empty() {
                    EscrowPhase::ExchangeReady
                } else {
                    EscrowPhase::CollectingExchange
                };
            }
        }
        Ok(())
    }

    /// Applies the wallet's `make_multisig` result.
    pub fn apply_make(&mut self, out: MultisigRound) -> Result<(), EscrowError> {
        self.require_phase(&[EscrowPhase::CollectingPrepare, EscrowPhase::MakeReady], "make")?;
        self.set_wallet_address(out.address);
        self.participant_exchange_infos.clear();
        match out.multisig_info {
            Some(info) => {
                self.coordinator_exchange_info = Some(info);
                self.exchange_round = 1;
                self.phase = EscrowPhase::CollectingExchange;
            }
            None => {
                self.coordinator_exchange_info = None;
                self.phase = EscrowPhase::Exchanged;
            }
        }
        Ok(())
    }

    /// Applies one `exchange_multisig_keys` round. Another info means
    /// another round; none means key exchange is done.
    pub fn apply_exchange(&mut self, out: MultisigRound) -> Result<(), EscrowError> {
        self.require_phase(
            &[EscrowPhase::CollectingExchange, EscrowPhase::ExchangeReady],
            "exchange",
        )?;
        self.set_wallet_address(out.address);
        self.participant_exchange_infos.clear();
        match out.multisig_info {
            Some(info) => {
                self.coordinator_exchange_info = Some(info);
                self.exchange_round = self.exchange_round.saturating_add(1);
                self.phase = EscrowPhase::CollectingExchange;
            }
            None => self.finish_exchange(),
        }
        Ok(())
    }

    /// The wallet says key exchange already finished.
    pub fn finish_exchange(&mut self) {
        self.coordinator_exchange_info = None;
        self.participant_exchange_infos.clear();
        self.phase = EscrowPhase::Exchanged;
    }

    pub fn apply_import(&mut self, imported: u64) -> Result<(), EscrowError> {
        self.require_phase(&[EscrowPhase::Exchanged, EscrowPhase::Signed], "import")?;
        self.imported_outputs = self.imported_outputs.saturating_add(imported);
        Ok(())
    }

    pub fn apply_sign(&mut self, signed: SignedMultisig) -> Result<(), EscrowError> {
        self.require_phase(&[EscrowPhase::Exchanged, EscrowPhase::Signed], "sign")?;
        if !signed.tx_data_hex.is_empty() {
            self.signed_tx_data_hex = Some(signed.tx_data_hex);
        }
        if !signed.txids.is_empty() {
            self.signed_txids = signed.txids;
        }
        self.phase = EscrowPhase::Signed;
        Ok(())
    }

    pub fn apply_submit(&mut self, txids: Vec<String>) -> Result<(), EscrowError> {
        self.require_phase(&[EscrowPhase::Signed, EscrowPhase::Submitted], "submit")?;
        if !txids.is_empty() {
            self.submitted_txids = txids;
        }
        self.phase = EscrowPhase::Submitted;
        Ok(())
    }

    fn set_wallet_address(&mut self, address: Option<String>) {
        if let Some(address) = address.filter(|a| !a.is_empty()) {
            self.wallet_address = Some(address);
        }
    }

    /// Renders the public response shape.
    pub fn view(&self) -> EscrowSessionView {
        let pending_prepare = self.pending_prepare();
        let pending_exchange = self.pending_exchange();
        EscrowSessionView {
            ok: true,
            session_id: self.id.clone(),
            stream_pubkey: self.stream.stream_pubkey.clone(),
            stream_id: self.stream.stream_id.clone(),
            coordinator_pubkey: self.coordinator_pubkey.clone(),
            participant_pubkeys: self.participant_pubkeys.clone(),
            threshold: self.threshold,
            created_at_ms: self.created_at_ms,
            updated_at_ms: self.updated_at_ms,
            expires_at_ms: self.expires_at_ms,
            phase: self.phase,
            prepare: PrepareView {
                coordinator_multisig_info: self.coordinator_prepare_info.clone(),
                participant_count: self.participant_pubkeys.len(),
                joined_pubkeys: joined(&self.participant_pubkeys, &pending_prepare),
                ready: pending_prepare.is_empty(),
                pending_pubkeys: pending_prepare,
            },
            exchange: ExchangeView {
                round: self.exchange_round,
                coordinator_multisig_info: self.coordinator_exchange_info.clone(),
                joined_pubkeys: joined(&self.participant_pubkeys, &pending_exchange),
                ready: pending_exchange.is_empty(),
                pending_pubkeys: pending_exchange,
            },
            wallet_address: self.wallet_address.clone(),
            imported_outputs: self.imported_outputs,
            signed_txids: self.signed_txids.clone(),
            submitted_txids: self.submitted_txids.clone(),
            imported_now: None,
            signed_tx_data_hex: None,
        }
    }
}

fn has_info(infos: &BTreeMap<String, String>, pubkey: &str) -> bool {
    infos.get(pubkey).is_some_and(|v| !v.trim().is_empty())
}

fn pending(participants: &[String], infos: &BTreeMap<String, String>) -> Vec<String> {
    participants
        .iter()
        .filter(|p| !has_info(infos, p))
        .cloned()
        .collect()
}

fn ordered(participants: &[String], infos: &BTreeMap<String, String>) -> Vec<String> {
    participants
        .iter()
        .filter_map(|p| infos.get(p))
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .collect()
}

fn joined(participants: &[String], pending: &[String]) -> Vec<String> {
    participants
        .iter()
        .filter(|p| !pending.contains(p))
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Response view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrepareView {
    pub coordinator_multisig_info: String,
    pub participant_count: usize,
    pub joined_pubkeys: Vec<String>,
    pub pending_pubkeys: Vec<String>,
    pub ready: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeView {
    pub round: u32,
    pub coordinator_multisig_info: Option<String>,
    pub joined_pubkeys: Vec<String>,
    pub pending_pubkeys: Vec<String>,
    pub ready: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowSessionView {
    pub ok: bool,
    pub session_id: String,
    pub stream_pubkey: String,
    pub stream_id: String,
    pub coordinator_pubkey: String,
    pub participant_pubkeys: Vec<String>,
    pub threshold: usize,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
    pub expires_at_ms: u64,
    pub phase: EscrowPhase,
    pub prepare: PrepareView,
    pub exchange: ExchangeView,
    pub wallet_address: Option<String>,
    pub imported_outputs: u64,
    pub signed_txids: Vec<String>,
    pub submitted_txids: Vec<String>,
    /// Set only on import responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub imported_now: Option<u64>,
    /// Set only on sign responses.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_tx_data_hex: Option<String>,
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    fn session(participants: &[&str]) -> EscrowSession {
        EscrowSession::from_new(
            "id".into(),
            NewEscrowSession {
                stream: StreamIdentity::parse(&"c".repeat(64), "s").unwrap(),
                coordinator_pubkey: "c".repeat(64),
                participant_pubkeys: participants.iter().map(|p| p.to_string()).collect(),
                threshold: participants.len() + 1,
                coordinator_prepare_info: "coord-prepare".into(),
            },
            1_000,
            60_000,
        )
    }

    fn round(info: Option<&str>) -> MultisigRound {
        MultisigRound {
            address: Some("msig-addr".into()),
            multisig_info: info.map(str::to_string),
        }
    }

    #[test]
    fn phase_order_matches_rank() {
        assert!(EscrowPhase::CollectingPrepare.rank() < EscrowPhase::MakeReady.rank());
        assert!(EscrowPhase::Signed < EscrowPhase::Submitted);
        assert_eq!(
            serde_json::to_value(EscrowPhase::ExchangeReady).unwrap(),
            "exchange_ready"
        );
    }

    #[test]
    fn prepare_fills_then_ready() {
        let mut s = session(&["p1", "p2"]);
        assert_eq!(s.phase, EscrowPhase::CollectingPrepare);
        assert_eq!(s.expires_at_ms, 61_000);

        s.record_contribution("p1", ContributionRound::Prepare, "i1".into()).unwrap();
        assert_eq!(s.phase, EscrowPhase::CollectingPrepare);
        assert_eq!(s.pending_prepare(), vec!["p2".to_string()]);

        s.record_contribution("p2", ContributionRound::Prepare, "i2".into()).unwrap();
        assert_eq!(s.phase, EscrowPhase::MakeReady);
        assert_eq!(s.ordered_prepare_infos(), vec!["i1", "i2"]);

        let err = s
            .record_contribution("p1", ContributionRound::Exchange, "x".into())
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid phase transition (make_ready -> exchange)");
    }

    #[test]
    fn exchange_rounds_then_done() {
        let mut s = session(&["p1"]);
        s.record_contribution("p1", ContributionRound::Prepare, "i1".into()).unwrap();
        s.apply_make(round(Some("r1"))).unwrap();
        assert_eq!((s.phase, s.exchange_round), (EscrowPhase::CollectingExchange, 1));
        assert_eq!(s.wallet_address.as_deref(), Some("msig-addr"));

        s.record_contribution("p1", ContributionRound::Exchange, "e1".into()).unwrap();
        assert_eq!(s.phase, EscrowPhase::ExchangeReady);
        s.apply_exchange(round(Some("r2"))).unwrap();
        assert_eq!((s.phase, s.exchange_round), (EscrowPhase::CollectingExchange, 2));
        assert!(s.participant_exchange_infos.is_empty());

        s.record_contribution("p1", ContributionRound::Exchange, "e2".into()).unwrap();
        s.apply_exchange(MultisigRound {
            address: None,
            multisig_info: None,
        })
        .unwrap();
        assert_eq!(s.phase, EscrowPhase::Exchanged);
        assert_eq!(s.exchange_round, 2);
        assert_eq!(s.wallet_address.as_deref(), Some("msig-addr"));
    }

    #[test]
    fn make_without_exchange_info_skips_to_exchanged() {
        let mut s = session(&["p1"]);
        s.record_contribution("p1", ContributionRound::Prepare, "i1".into()).unwrap();
        s.apply_make(round(None)).unwrap();
        assert_eq!(s.phase, EscrowPhase::Exchanged);
        assert_eq!(s.exchange_round, 0);
    }

    #[test]
    fn write_once_fields_survive_empty_results() {
        let mut s = session(&["p1"]);
        s.phase = EscrowPhase::Exchanged;
        s.apply_sign(SignedMultisig {
            tx_data_hex: "abcd".into(),
            txids: vec!["t1".into()],
        })
        .unwrap();
        s.apply_sign(SignedMultisig {
            tx_data_hex: String::new(),
            txids: Vec::new(),
        })
        .unwrap();
        assert_eq!(s.signed_tx_data_hex.as_deref(), Some("abcd"));
        assert_eq!(s.signed_txids, vec!["t1"]);

        s.apply_submit(vec!["t1".into()]).unwrap();
        s.apply_submit(Vec::new()).unwrap();
        assert_eq!(s.submitted_txids, vec!["t1"]);
        assert!(s.apply_import(1).is_err());
    }

    #[test]
    fn view_shape() {
        let mut s = session(&["p1", "p2"]);
        s.record_contribution("p2", ContributionRound::Prepare, "i2".into()).unwrap();
        let json = serde_json::to_value(s.view()).unwrap();
        assert_eq!(json["ok"], true);
        assert_eq!(json["phase"], "collecting_prepare");
        assert_eq!(json["prepare"]["participantCount"], 2);
        assert_eq!(json["prepare"]["joinedPubkeys"], serde_json::json!(["p2"]));
        assert_eq!(json["prepare"]["pendingPubkeys"], serde_json::json!(["p1"]));
        assert_eq!(json["exchange"]["coordinatorMultisigInfo"], serde_json::Value::Null);
        assert!(json.get("importedNow").is_none());
        assert!(json.get("signedTxDataHex").is_none());
    }

    #[test]
    fn random_operations_never_step_back() {
        let mut rng = StdRng::seed_from_u64(0xe5c0);
        let everyone = ["p1", "p2", "p3"];
        for _ in 0..300 {
            let participants = &everyone[..rng.gen_range(1..=everyone.len())];
            let mut s = session(participants);
            let mut last = (s.exchange_round, s.phase.rank());

            for step in 0..60 {
                let who = participants[rng.gen_range(0..participants.len())];
                let info = rng.gen_bool(0.7).then(|| format!("info-{step}"));
                let before = s.clone();
                let result = match rng.gen_range(0..8) {
                    0 => s.record_contribution(who, ContributionRound::Prepare, format!("p-{step}")),
                    1 => s.record_contribution(who, ContributionRound::Exchange, format!("e-{step}")),
                    2 => s.apply_make(round(info.as_deref())),
                    3 => s.apply_exchange(round(info.as_deref())),
                    4 => s.apply_import(rng.gen_range(0..3)),
                    5 => s.apply_sign(SignedMultisig {
                        tx_data_hex: info.unwrap_or_default(),
                        txids: Vec::new(),
                    }),
                    6 => s.apply_submit(vec![format!("tx-{step}")]),
                    _ => s
                        .require_phase(
                            &[EscrowPhase::CollectingExchange, EscrowPhase::ExchangeReady],
                            "exchange",
                        )
                        .map(|()| s.finish_exchange()),
                };

                let now = (s.exchange_round, s.phase.rank());
                assert!(now >= last, "{last:?} -> {now:?} at step {step}");
                if result.is_ok() {
                    last = now;
                } else {
                    assert_eq!(now, last, "a rejected transition moved the session");
                }
                if s.wallet_address.is_none() {
                    assert!(before.wallet_address.is_none());
                }
                if s.phase == EscrowPhase::MakeReady {
                    assert!(s.pending_prepare().is_empty());
                }
                if s.phase == EscrowPhase::ExchangeReady {
                    assert!(s.pending_exchange().is_empty());
                }
            }
        }
    }
}
