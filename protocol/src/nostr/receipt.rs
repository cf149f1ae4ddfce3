//! # P2P Bytes Receipts
//!
//! When a viewer relays stream segments to other peers, each recipient can
//! sign a receipt saying "peer X served me N bytes of stream S". Receipts
//! are the evidence the refund policy weighs.
//!
//! Wire shape (kind 30316):
//!
//! ```text
//! tags:    [["a", "30311:<streamPubkey>:<streamId>"], ["p", <fromPubkey>]]
//! content: {"v":1,"t":"p2p_bytes_receipt","streamPubkey":..,"streamId":..,
//!           "fromPubkey":..,"servedBytes":N,"observedAtMs":T,"sessionId":?}
//! ```
//!
//! The event `pubkey` is the receipt's author (the peer that received the
//! bytes); `fromPubkey` is the peer being credited.
//!
//! Parsing here assumes the signature was already checked with
//! [`NostrEvent::verify`](super::NostrEvent::verify).

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::event::{tag, EventError, NostrEvent};
use super::stream::StreamIdentity;
use crate::config::BYTES_RECEIPT_KIND;
use crate::crypto::hash::is_hex64;
use crate::crypto::schnorr::EventSigner;

const RECEIPT_TYPE: &str = "p2p_bytes_receipt";
const RECEIPT_VERSION: u64 = 1;

#[derive(Debug, Error)]
pub enum ReceiptError {
    #[error("not a bytes receipt (kind {0})")]
    WrongKind(u64),

    #[error("receipt is not scoped to this stream")]
    StreamMismatch,

    #[error("receipt content is not valid JSON: {0}")]
    MalformedContent(#[from] serde_json::Error),

    #[error("unsupported receipt version or type")]
    UnsupportedVersion,

    #[error("receipt pubkey must be 64-hex")]
    InvalidPubkey,

    #[error("observedAtMs must be positive")]
    InvalidObservedAt,

    #[error("receipt p tag does not match fromPubkey")]
    FromTagMismatch,

    #[error(transparent)]
    Event(#[from] EventError),
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceiptContent {
    v: u64,
    t: String,
    stream_pubkey: String,
    stream_id: String,
    from_pubkey: String,
    served_bytes: u64,
    observed_at_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    session_id: Option<String>,
}

/// A receipt that parsed cleanly within a stream scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytesReceipt {
    pub id: String,
    /// Author of the receipt event, lowercase.
    pub pubkey: String,
    /// Peer credited with serving the bytes, lowercase.
    pub from_pubkey: String,
    pub stream: StreamIdentity,
    pub served_bytes: u64,
    pub observed_at_ms: u64,
    pub session_id: Option<String>,
    pub created_at: u64,
}

/// Everything needed to author a receipt.
#[derive(Debug, Clone)]
pub struct ReceiptDraft {
    pub stream: StreamIdentity,
    pub from_pubkey: String,
    pub served_bytes: u64,
    pub observed_at_ms: u64,
    pub session_id: Option<String>,
    pub created_at: u64,
}

/// Parses a receipt event within `scope`. Every mismatch is a specific error
/// rather than a silent `None`, so the refund endpoint can say why.
pub fn parse_bytes_receipt(
    event: &NostrEvent,
    scope: &StreamIdentity,
) -> Result<BytesReceipt, ReceiptError> {
    if event.kind != BYTES_RECEIPT_KIND {
        return Err(ReceiptError::WrongKind(event.kind));
    }
    if !is_hex64(&event.pubkey) {
        return Err(ReceiptError::InvalidPubkey);
    }
    if event.first_tag("a") != Some(scope.address_tag().as_str()) {
        return Err(ReceiptError::StreamMismatch);
    }

    let content: ReceiptContent = serde_json::from_str(&event.content)?;
    if content.v != RECEIPT_VERSION || content.t != RECEIPT_TYPE {
        return Err(ReceiptError::UnsupportedVersion);
    }
    if content.stream_pubkey != scope.stream_pubkey || content.stream_id != scope.stream_id {
        return Err(ReceiptError::StreamMismatch);
    }
    if !is_hex64(&content.from_pubkey) {
        return Err(ReceiptError::InvalidPubkey);
    }
    if content.observed_at_ms == 0 {
        return Err(ReceiptError::InvalidObservedAt);
    }
    if event.first_tag("p") != Some(content.from_pubkey.as_str()) {
        return Err(ReceiptError::FromTagMismatch);
    }

    Ok(BytesReceipt {
        id: event.id.clone(),
        pubkey: event.pubkey.to_lowercase(),
        from_pubkey: content.from_pubkey.to_lowercase(),
        stream: scope.clone(),
        served_bytes: content.served_bytes,
        observed_at_ms: content.observed_at_ms,
        session_id: content.session_id,
        created_at: event.created_at,
    })
}

/// Builds and signs a receipt event.
pub fn build_bytes_receipt(
    signer: &EventSigner,
    draft: &ReceiptDraft,
) -> Result<NostrEvent, ReceiptError> {
    if !is_hex64(&draft.from_pubkey) {
        return Err(ReceiptError::InvalidPubkey);
    }
    if draft.observed_at_ms == 0 {
        return Err(ReceiptError::InvalidObservedAt);
    }
    let content = serde_json::to_string(&ReceiptContent {
        v: RECEIPT_VERSION,
        t: RECEIPT_TYPE.to_string(),
        stream_pubkey: draft.stream.stream_pubkey.clone(),
        stream_id: draft.stream.stream_id.clone(),
        from_pubkey: draft.from_pubkey.clone(),
        served_bytes: draft.served_bytes,
        observed_at_ms: draft.observed_at_ms,
        session_id: draft.session_id.clone(),
    })?;
    let tags = vec![
        tag("a", draft.stream.address_tag()),
        tag("p", draft.from_pubkey.clone()),
    ];
    Ok(NostrEvent::sign(
        signer,
        draft.created_at,
        BYTES_RECEIPT_KIND,
        tags,
        content,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scope() -> StreamIdentity {
        StreamIdentity::parse(&"b".repeat(64), "stream-1").unwrap()
    }

    fn draft(from: &str) -> ReceiptDraft {
        ReceiptDraft {
            stream: scope(),
            from_pubkey: from.to_string(),
            served_bytes: 4_096,
            observed_at_ms: 1_700_000_000_000,
            session_id: Some("tok".into()),
            created_at: 1_700_000_000,
        }
    }

    #[test]
    fn build_then_parse() {
        let author = EventSigner::generate();
        let viewer = EventSigner::generate();
        let ev = build_bytes_receipt(&author, &draft(&viewer.public_key_hex())).unwrap();
        ev.verify().unwrap();

        let r = parse_bytes_receipt(&ev, &scope()).unwrap();
        assert_eq!(r.pubkey, author.public_key_hex());
        assert_eq!(r.from_pubkey, viewer.public_key_hex());
        assert_eq!(r.served_bytes, 4_096);
        assert_eq!(r.session_id.as_deref(), Some("tok"));
    }

    #[test]
    fn other_stream_scope_rejected() {
        let signer = EventSigner::generate();
        let ev = build_bytes_receipt(&signer, &draft(&signer.public_key_hex())).unwrap();
        let other = StreamIdentity::parse(&"b".repeat(64), "stream-2").unwrap();
        assert!(matches!(
            parse_bytes_receipt(&ev, &other),
            Err(ReceiptError::StreamMismatch)
        ));
    }

    #[test]
    fn p_tag_must_match_from_pubkey() {
        let signer = EventSigner::generate();
        let d = draft(&signer.public_key_hex());
        let content = serde_json::to_string(&ReceiptContent {
            v: 1,
            t: RECEIPT_TYPE.into(),
            stream_pubkey: d.stream.stream_pubkey.clone(),
            stream_id: d.stream.stream_id.clone(),
            from_pubkey: signer.public_key_hex(),
            served_bytes: 1,
            observed_at_ms: 1,
            session_id: None,
        })
        .unwrap();
        let ev = NostrEvent::sign(
            &signer,
            1,
            BYTES_RECEIPT_KIND,
            vec![tag("a", d.stream.address_tag()), tag("p", "c".repeat(64))],
            content,
        )
        .unwrap();
        assert!(matches!(
            parse_bytes_receipt(&ev, &scope()),
            Err(ReceiptError::FromTagMismatch)
        ));
    }

    #[test]
    fn negative_served_bytes_is_malformed() {
        let signer = EventSigner::generate();
        let pk = signer.public_key_hex();
        let s = scope();
        let content = format!(
            r#"{{"v":1,"t":"p2p_bytes_receipt","streamPubkey":"{}","streamId":"{}","fromPubkey":"{pk}","servedBytes":-5,"observedAtMs":1}}"#,
            s.stream_pubkey, s.stream_id
        );
        let ev = NostrEvent::sign(
            &signer,
            1,
            BYTES_RECEIPT_KIND,
            vec![tag("a", s.address_tag()), tag("p", pk.clone())],
            content,
        )
        .unwrap();
        assert!(matches!(
            parse_bytes_receipt(&ev, &s),
            Err(ReceiptError::MalformedContent(_))
        ));
    }

    #[test]
    fn wrong_kind_rejected() {
        let signer = EventSigner::generate();
        let ev = NostrEvent::sign(&signer, 1, 1, vec![], "{}").unwrap();
        assert!(matches!(
            parse_bytes_receipt(&ev, &scope()),
            Err(ReceiptError::WrongKind(1))
        ));
    }
}
