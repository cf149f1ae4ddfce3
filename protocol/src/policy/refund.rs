//! # Refund Policy
//!
//! A viewer who staked can get the stake back by proving they pulled
//! their weight in the swarm: signed receipts from peers saying "this
//! viewer served me N bytes". This module decides whether the evidence is
//! good enough and how much credit it earns.
//!
//! ## Pipeline
//!
//! ```text
//! session gates ──▶ per-receipt admissibility ──▶ keep top maxReceipts ──▶ sum ──▶ threshold
//!  (inputs, age)     (dedup, authorship, scope,     by servedBytes;
//!                     time windows, byte cap)        rest: limit_exceeded
//! ```
//!
//! Every receipt gets a [`ReceiptDecision`], accepted or not, so a denial
//! can be explained to the caller. The evaluator is a pure function: no
//! wallet, no clock, no I/O.

use std::collections::{BTreeSet, HashSet};

use serde::Serialize;

use crate::config::{
    DEFAULT_REFUND_MAX_FUTURE_SKEW_SECS, DEFAULT_REFUND_MAX_RECEIPTS,
    DEFAULT_REFUND_MAX_RECEIPT_AGE_SECS, DEFAULT_REFUND_MAX_SERVED_BYTES_PER_RECEIPT,
    DEFAULT_REFUND_MIN_SERVED_BYTES, DEFAULT_REFUND_MIN_SESSION_AGE_SECS, FULL_CREDIT_BPS,
};
use crate::crypto::hash::{is_hex64, sha256_parts};
use crate::nostr::{BytesReceipt, StreamIdentity};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundPolicyConfig {
    pub min_served_bytes: u64,
    pub full_served_bytes: u64,
    pub max_receipts: usize,
    pub max_receipt_age_secs: u64,
    pub max_served_bytes_per_receipt: u64,
    pub min_session_age_secs: u64,
    pub max_future_skew_secs: u64,
    /// Lowercase hex pubkeys allowed to author receipts for someone else.
    pub recognized_peers: BTreeSet<String>,
}

impl Default for RefundPolicyConfig {
    fn default() -> Self {
        Self {
            min_served_bytes: DEFAULT_REFUND_MIN_SERVED_BYTES,
            full_served_bytes: DEFAULT_REFUND_MIN_SERVED_BYTES,
            max_receipts: DEFAULT_REFUND_MAX_RECEIPTS,
            max_receipt_age_secs: DEFAULT_REFUND_MAX_RECEIPT_AGE_SECS,
            max_served_bytes_per_receipt: DEFAULT_REFUND_MAX_SERVED_BYTES_PER_RECEIPT,
            min_session_age_secs: DEFAULT_REFUND_MIN_SESSION_AGE_SECS,
            max_future_skew_secs: DEFAULT_REFUND_MAX_FUTURE_SKEW_SECS,
            recognized_peers: BTreeSet::new(),
        }
    }
}

impl RefundPolicyConfig {
    /// Clamps values into range: `full >= min`, at least one receipt, a
    /// non-zero byte cap, and lowercase peer keys (non-hex entries dropped).
    pub fn normalized(mut self) -> Self {
        self.full_served_bytes = self.full_served_bytes.max(self.min_served_bytes);
        self.max_receipts = self.max_receipts.max(1);
        self.max_served_bytes_per_receipt = self.max_served_bytes_per_receipt.max(1);
        self.recognized_peers = self
            .recognized_peers
            .iter()
            .map(|p| p.trim().to_lowercase())
            .filter(|p| is_hex64(p))
            .collect();
        self
    }
}

// ---------------------------------------------------------------------------
// Inputs & outputs
// ---------------------------------------------------------------------------

/// One receipt as the policy sees it. Built from a parsed
/// [`BytesReceipt`] whose signature was already checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefundContributionReceipt {
    pub id: Option<String>,
    /// Receipt author.
    pub pubkey: String,
    /// Peer credited with serving the bytes.
    pub from_pubkey: String,
    /// Stream the receipt declares. `None` skips the scope check.
    pub stream: Option<StreamIdentity>,
    pub served_bytes: u64,
    pub observed_at_ms: u64,
    pub created_at_sec: u64,
    pub session_id: Option<String>,
}

impl From<&BytesReceipt> for RefundContributionReceipt {
    fn from(r: &BytesReceipt) -> Self {
        Self {
            id: Some(r.id.clone()),
            pubkey: r.pubkey.clone(),
            from_pubkey: r.from_pubkey.clone(),
            stream: Some(r.stream.clone()),
            served_bytes: r.served_bytes,
            observed_at_ms: r.observed_at_ms,
            created_at_sec: r.created_at,
            session_id: r.session_id.clone(),
        }
    }
}

impl RefundContributionReceipt {
    /// Explicit id when present, otherwise a hash over every field.
    fn dedup_key(&self) -> String {
        if let Some(id) = self.id.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            return format!("id:{id}");
        }
        let hash = sha256_parts(&[
            self.pubkey.as_bytes(),
            self.from_pubkey.as_bytes(),
            self.session_id.as_deref().unwrap_or("").as_bytes(),
            &self.created_at_sec.to_be_bytes(),
            &self.observed_at_ms.to_be_bytes(),
            &self.served_bytes.to_be_bytes(),
        ]);
        format!("raw:{}", hex::encode(hash))
    }
}

/// Everything the evaluator needs besides config.
#[derive(Debug, Clone)]
pub struct RefundRequest<'a> {
    pub receipts: &'a [RefundContributionReceipt],
    pub viewer_pubkey: &'a str,
    pub session_token: &'a str,
    pub stream: &'a StreamIdentity,
    pub session_created_at_ms: u64,
    pub now_ms: u64,
}

/// Why a single receipt was not counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    DuplicateReceipt,
    InvalidReceiptPubkey,
    UnrecognizedReceiptAuthor,
    FromPubkeyMismatch,
    SessionMismatch,
    StreamMismatch,
    ReceiptTooOld,
    ReceiptInFuture,
    ObservedOutOfWindow,
    ServedBytesZero,
    ServedBytesExceedsCap,
    LimitExceeded,
}

/// Why the refund as a whole was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundDenial {
    InvalidSessionInputs,
    SessionTooNew,
    NoValidReceipts,
    ServedBytesBelowMinimum,
}

impl RefundDenial {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidSessionInputs => "invalid_session_inputs",
            Self::SessionTooNew => "session_too_new",
            Self::NoValidReceipts => "no_valid_receipts",
            Self::ServedBytesBelowMinimum => "served_bytes_below_minimum",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptDecision {
    /// Position in the submitted list.
    pub index: usize,
    pub id: Option<String>,
    pub served_bytes: u64,
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundDecision {
    pub ok: bool,
    pub served_bytes: u64,
    pub credit_percent_bps: u32,
    pub accepted_receipts: usize,
    pub rejected_receipts: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RefundDenial>,
    pub decisions: Vec<ReceiptDecision>,
}

impl RefundDecision {
    fn denied_early(reason: RefundDenial, rejected: usize) -> Self {
        Self {
            ok: false,
            served_bytes: 0,
            credit_percent_bps: 0,
            accepted_receipts: 0,
            rejected_receipts: rejected,
            reason: Some(reason),
            decisions: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Runs the full refund policy. `cfg` should already be normalized.
pub fn evaluate_refund(req: &RefundRequest<'_>, cfg: &RefundPolicyConfig) -> RefundDecision {
    let viewer = req.viewer_pubkey.trim().to_lowercase();
    let token = req.session_token.trim();
    if viewer.is_empty() || token.is_empty() {
        return RefundDecision::denied_early(RefundDenial::InvalidSessionInputs, 0);
    }

    let session_age_ms = req.now_ms.saturating_sub(req.session_created_at_ms);
    if session_age_ms < cfg.min_session_age_secs.saturating_mul(1000) {
        return RefundDecision::denied_early(RefundDenial::SessionTooNew, req.receipts.len());
    }

    let mut seen = HashSet::new();
    let mut decisions: Vec<ReceiptDecision> = req
        .receipts
        .iter()
        .enumerate()
        .map(|(index, r)| {
            let reason = if seen.insert(r.dedup_key()) {
                admissibility(r, &viewer, token, req, cfg).err()
            } else {
                Some(RejectReason::DuplicateReceipt)
            };
            ReceiptDecision {
                index,
                id: r.id.clone(),
                served_bytes: r.served_bytes,
                accepted: reason.is_none(),
                reason,
            }
        })
        .collect();

    // Keep the largest admissible receipts. Stable sort, so equal sizes
    // keep submission order.
    let mut admissible: Vec<usize> = decisions
        .iter()
        .filter(|d| d.accepted)
        .map(|d| d.index)
        .collect();
    admissible.sort_by(|&a, &b| decisions[b].served_bytes.cmp(&decisions[a].served_bytes));
    for &i in admissible.iter().skip(cfg.max_receipts) {
        decisions[i].accepted = false;
        decisions[i].reason = Some(RejectReason::LimitExceeded);
    }

    let served_bytes = decisions
        .iter()
        .filter(|d| d.accepted)
        .fold(0u64, |acc, d| acc.saturating_add(d.served_bytes));
    let accepted_receipts = decisions.iter().filter(|d| d.accepted).count();
    let rejected_receipts = decisions.len() - accepted_receipts;

    let reason = if served_bytes >= cfg.min_served_bytes {
        None
    } else if accepted_receipts == 0 {
        Some(RefundDenial::NoValidReceipts)
    } else {
        Some(RefundDenial::ServedBytesBelowMinimum)
    };

    RefundDecision {
        ok: reason.is_none(),
        served_bytes,
        credit_percent_bps: credit_percent_bps(
            served_bytes,
            cfg.min_served_bytes,
            cfg.full_served_bytes,
        ),
        accepted_receipts,
        rejected_receipts,
        reason,
        decisions,
    }
}

fn admissibility(
    r: &RefundContributionReceipt,
    viewer: &str,
    token: &str,
    req: &RefundRequest<'_>,
    cfg: &RefundPolicyConfig,
) -> Result<(), RejectReason> {
    let author = r.pubkey.trim().to_lowercase();
    let from = r.from_pubkey.trim().to_lowercase();
    if !is_hex64(&author) || !is_hex64(&from) {
        return Err(RejectReason::InvalidReceiptPubkey);
    }
    if author != viewer && !cfg.recognized_peers.contains(&author) {
        return Err(RejectReason::UnrecognizedReceiptAuthor);
    }
    if from != viewer {
        return Err(RejectReason::FromPubkeyMismatch);
    }
    if r.session_id.as_deref().map(str::trim) != Some(token) {
        return Err(RejectReason::SessionMismatch);
    }
    if r.stream.as_ref().is_some_and(|s| s != req.stream) {
        return Err(RejectReason::StreamMismatch);
    }

    let now_sec = req.now_ms / 1000;
    if r.created_at_sec.saturating_add(cfg.max_receipt_age_secs) < now_sec {
        return Err(RejectReason::ReceiptTooOld);
    }
    if r.created_at_sec > now_sec.saturating_add(cfg.max_future_skew_secs) {
        return Err(RejectReason::ReceiptInFuture);
    }

    let skew_ms = cfg.max_future_skew_secs.saturating_mul(1000);
    let earliest = req
        .now_ms
        .saturating_sub(cfg.max_receipt_age_secs.saturating_mul(1000))
        .max(req.session_created_at_ms.saturating_sub(skew_ms));
    let latest = req.now_ms.saturating_add(skew_ms);
    if r.observed_at_ms == 0 || r.observed_at_ms < earliest || r.observed_at_ms > latest {
        return Err(RejectReason::ObservedOutOfWindow);
    }

    if r.served_bytes == 0 {
        return Err(RejectReason::ServedBytesZero);
    }
    if r.served_bytes > cfg.max_served_bytes_per_receipt {
        return Err(RejectReason::ServedBytesExceedsCap);
    }
    Ok(())
}

/// Linear credit from 0 at `min` to 10000 at `full`, rounded half up.
pub fn credit_percent_bps(served: u64, min: u64, full: u64) -> u32 {
    if full <= min {
        return if served >= min { FULL_CREDIT_BPS } else { 0 };
    }
    if served <= min {
        return 0;
    }
    if served >= full {
        return FULL_CREDIT_BPS;
    }
    let num = (served - min) as u128 * FULL_CREDIT_BPS as u128;
    let den = (full - min) as u128;
    ((num + den / 2) / den).min(FULL_CREDIT_BPS as u128) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW_MS: u64 = 1_700_000_000_000;
    const TOKEN: &str = "session-token";

    fn viewer() -> String {
        "a".repeat(64)
    }

    fn stream() -> StreamIdentity {
        StreamIdentity::parse(&"f".repeat(64), "live").unwrap()
    }

    fn receipt(id: &str, served: u64) -> RefundContributionReceipt {
        RefundContributionReceipt {
            id: Some(id.into()),
            pubkey: viewer(),
            from_pubkey: viewer(),
            stream: Some(stream()),
            served_bytes: served,
            observed_at_ms: NOW_MS - 5_000,
            created_at_sec: NOW_MS / 1000 - 5,
            session_id: Some(TOKEN.into()),
        }
    }

    fn cfg() -> RefundPolicyConfig {
        RefundPolicyConfig {
            min_served_bytes: 1024,
            full_served_bytes: 4096,
            max_receipts: 8,
            max_receipt_age_secs: 300,
            max_served_bytes_per_receipt: 1_000_000,
            min_session_age_secs: 30,
            ..Default::default()
        }
        .normalized()
    }

    fn run(receipts: &[RefundContributionReceipt], cfg: &RefundPolicyConfig) -> RefundDecision {
        let s = stream();
        let v = viewer();
        evaluate_refund(
            &RefundRequest {
                receipts,
                viewer_pubkey: &v,
                session_token: TOKEN,
                stream: &s,
                session_created_at_ms: NOW_MS - 120_000,
                now_ms: NOW_MS,
            },
            cfg,
        )
    }

    fn reason_of(d: &RefundDecision, i: usize) -> Option<RejectReason> {
        d.decisions[i].reason
    }

    #[test]
    fn accepts_valid_receipts() {
        let d = run(&[receipt("r1", 2048), receipt("r2", 1024)], &cfg());
        assert!(d.ok);
        assert_eq!(d.served_bytes, 3072);
        assert_eq!(d.accepted_receipts, 2);
        assert_eq!(d.rejected_receipts, 0);
        // (3072 - 1024) / (4096 - 1024) = 0.6667
        assert_eq!(d.credit_percent_bps, 6667);
    }

    #[test]
    fn credit_scenario_from_nine_megabytes() {
        assert_eq!(credit_percent_bps(9_000_000, 5_000_000, 20_000_000), 2667);
    }

    #[test]
    fn credit_is_monotone_and_bounded() {
        assert_eq!(credit_percent_bps(5_000_000, 5_000_000, 20_000_000), 0);
        assert_eq!(credit_percent_bps(20_000_000, 5_000_000, 20_000_000), 10_000);
        assert_eq!(credit_percent_bps(u64::MAX, 5_000_000, 20_000_000), 10_000);
        let mut last = 0;
        for served in (5_000_000..=20_000_000).step_by(250_000) {
            let bps = credit_percent_bps(served, 5_000_000, 20_000_000);
            assert!(bps >= last);
            last = bps;
        }
        // Degenerate range: all or nothing.
        assert_eq!(credit_percent_bps(10, 10, 10), 10_000);
        assert_eq!(credit_percent_bps(9, 10, 10), 0);
    }

    #[test]
    fn session_gates() {
        let v = viewer();
        let s = stream();
        let receipts = [receipt("r1", 2048)];
        let too_new = evaluate_refund(
            &RefundRequest {
                receipts: &receipts,
                viewer_pubkey: &v,
                session_token: TOKEN,
                stream: &s,
                session_created_at_ms: NOW_MS - 10_000,
                now_ms: NOW_MS,
            },
            &cfg(),
        );
        assert_eq!(too_new.reason, Some(RefundDenial::SessionTooNew));
        assert_eq!(too_new.rejected_receipts, 1);

        let empty = evaluate_refund(
            &RefundRequest {
                receipts: &receipts,
                viewer_pubkey: "  ",
                session_token: TOKEN,
                stream: &s,
                session_created_at_ms: NOW_MS - 120_000,
                now_ms: NOW_MS,
            },
            &cfg(),
        );
        assert_eq!(empty.reason, Some(RefundDenial::InvalidSessionInputs));
    }

    #[test]
    fn per_receipt_rejections() {
        let mut wrong_session = receipt("s", 2048);
        wrong_session.session_id = Some("other".into());
        let mut stranger = receipt("a", 2048);
        stranger.pubkey = "b".repeat(64);
        let mut credited_other = receipt("f", 2048);
        credited_other.from_pubkey = "c".repeat(64);
        let mut bad_key = receipt("k", 2048);
        bad_key.pubkey = "nothex".into();
        let mut other_stream = receipt("o", 2048);
        other_stream.stream = Some(StreamIdentity::parse(&"f".repeat(64), "other").unwrap());
        let mut old = receipt("old", 2048);
        old.created_at_sec = NOW_MS / 1000 - 301;
        let mut future = receipt("fut", 2048);
        future.created_at_sec = NOW_MS / 1000 + 46;
        let mut before_session = receipt("pre", 2048);
        before_session.observed_at_ms = NOW_MS - 120_000 - 46_000;
        let zero = receipt("zero", 0);
        let huge = receipt("huge", 1_000_001);

        let d = run(
            &[
                wrong_session,
                stranger,
                credited_other,
                bad_key,
                other_stream,
                old,
                future,
                before_session,
                zero,
                huge,
            ],
            &cfg(),
        );
        use RejectReason::*;
        let expected = [
            SessionMismatch,
            UnrecognizedReceiptAuthor,
            FromPubkeyMismatch,
            InvalidReceiptPubkey,
            StreamMismatch,
            ReceiptTooOld,
            ReceiptInFuture,
            ObservedOutOfWindow,
            ServedBytesZero,
            ServedBytesExceedsCap,
        ];
        for (i, want) in expected.iter().enumerate() {
            assert_eq!(reason_of(&d, i), Some(*want), "receipt {i}");
        }
        assert!(!d.ok);
        assert_eq!(d.reason, Some(RefundDenial::NoValidReceipts));
        assert_eq!(d.rejected_receipts, expected.len());
    }

    #[test]
    fn recognized_peer_may_author() {
        let peer = "d".repeat(64);
        let mut cfg = cfg();
        cfg.recognized_peers.insert(peer.to_uppercase());
        let cfg = cfg.normalized();

        let mut r = receipt("peer", 2048);
        r.pubkey = peer;
        let d = run(&[r], &cfg);
        assert!(d.ok, "{d:?}");
    }

    #[test]
    fn duplicates_by_id_and_by_content() {
        let mut anon_a = receipt("", 600);
        anon_a.id = None;
        let anon_b = anon_a.clone();
        let d = run(
            &[receipt("dup", 600), receipt("dup", 600), anon_a, anon_b],
            &cfg(),
        );
        assert_eq!(reason_of(&d, 1), Some(RejectReason::DuplicateReceipt));
        assert_eq!(reason_of(&d, 3), Some(RejectReason::DuplicateReceipt));
        assert_eq!(d.accepted_receipts, 2);
        assert_eq!(d.served_bytes, 1200);
        assert!(d.ok);
    }

    #[test]
    fn limit_keeps_largest_receipts() {
        let mut cfg = cfg();
        cfg.max_receipts = 2;
        let d = run(
            &[
                receipt("tiny1", 10),
                receipt("big", 3000),
                receipt("tiny2", 10),
                receipt("mid", 500),
            ],
            &cfg,
        );
        assert_eq!(d.accepted_receipts, 2);
        assert_eq!(d.served_bytes, 3500);
        assert_eq!(reason_of(&d, 0), Some(RejectReason::LimitExceeded));
        assert_eq!(reason_of(&d, 2), Some(RejectReason::LimitExceeded));
        assert!(d.decisions[1].accepted && d.decisions[3].accepted);
    }

    #[test]
    fn below_minimum_with_some_accepted() {
        let d = run(&[receipt("small", 100)], &cfg());
        assert!(!d.ok);
        assert_eq!(d.reason, Some(RefundDenial::ServedBytesBelowMinimum));
        assert_eq!(d.credit_percent_bps, 0);
    }

    #[test]
    fn normalization_clamps() {
        let c = RefundPolicyConfig {
            min_served_bytes: 100,
            full_served_bytes: 10,
            max_receipts: 0,
            max_served_bytes_per_receipt: 0,
            recognized_peers: ["x".to_string(), "E".repeat(64)].into_iter().collect(),
            ..Default::default()
        }
        .normalized();
        assert_eq!(c.full_served_bytes, 100);
        assert_eq!(c.max_receipts, 1);
        assert_eq!(c.max_served_bytes_per_receipt, 1);
        assert_eq!(
            c.recognized_peers.into_iter().collect::<Vec<_>>(),
            vec!["e".repeat(64)]
        );
    }

    #[test]
    fn decisions_serialize_snake_case_reasons() {
        let mut r = receipt("s", 2048);
        r.session_id = None;
        let d = run(&[r], &cfg());
        let json = serde_json::to_value(&d).unwrap();
        assert_eq!(json["decisions"][0]["reason"], "session_mismatch");
        assert_eq!(json["reason"], "no_valid_receipts");
        assert_eq!(json["creditPercentBps"], 0);
    }
}
