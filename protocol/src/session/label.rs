//! Subaddress labels and the label index.
//!
//! The wallet has no idea what a stream is. The only link between a
//! session and its subaddress is the label written at creation time:
//!
//! ```text
//! dstream_tip:<streamPubkey>:<streamId>:<nonce>
//! dstream_stake:<streamPubkey>:<streamId>:<nonce>
//! ```
//!
//! [`LabelIndex`] turns a wallet's address list into an explicit
//! `(kind, stream) -> address indices` lookup. Matching is exact on the
//! stream: the nonce is split off the right (it never contains `:`) and
//! the pubkey off the left (it is fixed-width hex), so a stream id like
//! `live:1` can never be confused with `live` or `live:10`.

use std::collections::{BTreeSet, HashMap};

use crate::config::{STAKE_LABEL_PREFIX, TIP_LABEL_PREFIX};
use crate::crypto::hash::is_hex64;
use crate::nostr::StreamIdentity;

/// Which kind of session a subaddress belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionKind {
    Tip,
    Stake,
}

impl SessionKind {
    pub fn label_prefix(self) -> &'static str {
        match self {
            Self::Tip => TIP_LABEL_PREFIX,
            Self::Stake => STAKE_LABEL_PREFIX,
        }
    }
}

/// Set of `minor` subaddress indices, ordered for stable output.
pub type SubaddrIndex = BTreeSet<u32>;

/// Label for a new session subaddress.
pub fn session_label(kind: SessionKind, stream: &StreamIdentity, nonce: &str) -> String {
    format!(
        "{}:{}:{}:{}",
        kind.label_prefix(),
        stream.stream_pubkey,
        stream.stream_id,
        nonce
    )
}

/// Inverse of [`session_label`]. `None` for foreign or malformed labels.
pub fn parse_session_label(label: &str) -> Option<(SessionKind, StreamIdentity)> {
    let (kind, rest) = [SessionKind::Tip, SessionKind::Stake]
        .into_iter()
        .find_map(|k| {
            label
                .strip_prefix(k.label_prefix())
                .and_then(|r| r.strip_prefix(':'))
                .map(|r| (k, r))
        })?;
    let (scope, nonce) = rest.rsplit_once(':')?;
    if nonce.is_empty() {
        return None;
    }
    let (pubkey, stream_id) = scope.split_once(':')?;
    if !is_hex64(pubkey) || stream_id.is_empty() {
        return None;
    }
    Some((
        kind,
        StreamIdentity {
            stream_pubkey: pubkey.to_lowercase(),
            stream_id: stream_id.to_string(),
        },
    ))
}

/// `(kind, stream) -> subaddress indices`, built from one address listing.
#[derive(Debug, Default, Clone)]
pub struct LabelIndex {
    entries: HashMap<(SessionKind, StreamIdentity), SubaddrIndex>,
}

impl LabelIndex {
    /// Builds the index from `(address_index, label)` pairs. Unlabelled and
    /// foreign addresses are skipped.
    pub fn build<'a>(addresses: impl IntoIterator<Item = (u32, &'a str)>) -> Self {
        let mut entries: HashMap<_, SubaddrIndex> = HashMap::new();
        for (index, label) in addresses {
            if let Some(key) = parse_session_label(label) {
                entries.entry(key).or_default().insert(index);
            }
        }
        Self { entries }
    }

    /// All indices labelled for `kind` sessions on `stream`.
    pub fn indices_for(&self, kind: SessionKind, stream: &StreamIdentity) -> SubaddrIndex {
        self.entries
            .get(&(kind, stream.clone()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(id: &str) -> StreamIdentity {
        StreamIdentity::parse(&"a".repeat(64), id).unwrap()
    }

    #[test]
    fn label_roundtrip_with_colons_in_stream_id() {
        let label = session_label(SessionKind::Stake, &s("live:1"), "nonce_x");
        assert_eq!(
            label,
            format!("dstream_stake:{}:live:1:nonce_x", "a".repeat(64))
        );
        let (kind, stream) = parse_session_label(&label).unwrap();
        assert_eq!(kind, SessionKind::Stake);
        assert_eq!(stream, s("live:1"));
    }

    #[test]
    fn index_does_not_confuse_prefix_stream_ids() {
        let labels = [
            (1, session_label(SessionKind::Tip, &s("live"), "n1")),
            (2, session_label(SessionKind::Tip, &s("live:1"), "n2")),
            (3, session_label(SessionKind::Tip, &s("live:10"), "n3")),
            (4, session_label(SessionKind::Stake, &s("live"), "n4")),
            (5, session_label(SessionKind::Tip, &s("live"), "n5")),
        ];
        let index = LabelIndex::build(labels.iter().map(|(i, l)| (*i, l.as_str())));

        let tips_live: Vec<_> = index.indices_for(SessionKind::Tip, &s("live")).into_iter().collect();
        assert_eq!(tips_live, vec![1, 5]);
        assert_eq!(index.indices_for(SessionKind::Tip, &s("live:1")).len(), 1);
        assert_eq!(index.indices_for(SessionKind::Stake, &s("live")).len(), 1);
        assert!(index.indices_for(SessionKind::Stake, &s("other")).is_empty());
        assert_eq!(index.len(), 5);
    }

    #[test]
    fn foreign_labels_are_ignored() {
        let pk = "a".repeat(64);
        let foreign = [
            (0, "Primary account".to_string()),
            (1, String::new()),
            (2, format!("dstream_tipx:{pk}:live:n")),
            (3, format!("dstream_tip:{pk}:live:")),
            (4, "dstream_tip:nothex:live:n".to_string()),
            (5, format!("dstream_tip:{pk}:n")),
        ];
        let index = LabelIndex::build(foreign.iter().map(|(i, l)| (*i, l.as_str())));
        assert!(index.is_empty());
    }
}
