//! # Request Authenticator
//!
//! Verifies NIP-98 HTTP attestations: a signed Nostr event (kind 27235)
//! proving "pubkey P made this call, for method M, against URL U, at time T".
//! Clients send it as `Authorization: Nostr <base64 JSON event>`.
//!
//! ## Check order
//!
//! 1. Header present and decodable, else [`AuthError::Missing`].
//! 2. Hex pubkey, else [`AuthError::InvalidPubkey`].
//! 3. Event structure, id and Schnorr signature, else [`AuthError::Invalid`].
//! 4. Kind is 27235, else [`AuthError::WrongKind`].
//! 5. `|now - created_at| <= 60s`, else [`AuthError::Stale`].
//! 6. `u` tag byte-equal to the full request URL (query included), else
//!    [`AuthError::UrlMismatch`].
//! 7. `method` tag equal to the HTTP verb ignoring case, else
//!    [`AuthError::MethodMismatch`].
//!
//! Every failure is terminal for the request (401). Attestations are bound
//! to one URL and one minute, so there is nothing to retry.
//!
//! ## Replay
//!
//! Within the skew window an attestation can be replayed against the *same*
//! URL and method. That is accepted: every authenticated endpoint is either
//! idempotent or gated by server-side state (phase checks, sweeps of an
//! already-empty subaddress).

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use thiserror::Error;

use crate::clock::SharedClock;
use crate::config::{AUTH_EVENT_KIND, AUTH_MAX_SKEW_SECS, AUTH_SCHEME};
use crate::crypto::hash::is_hex64;
use crate::crypto::schnorr::EventSigner;
use crate::nostr::{tag, EventError, NostrEvent};

/// Why an attestation was refused. The `Display` strings are the exact
/// response bodies clients already match on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing NIP-98 auth")]
    Missing,

    #[error("invalid NIP-98 auth")]
    Invalid,

    #[error("invalid NIP-98 kind")]
    WrongKind,

    #[error("stale NIP-98 auth")]
    Stale,

    #[error("NIP-98 url mismatch")]
    UrlMismatch,

    #[error("NIP-98 method mismatch")]
    MethodMismatch,

    #[error("invalid auth pubkey")]
    InvalidPubkey,
}

/// The identity proven by a valid attestation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedCaller {
    /// Lowercase hex x-only pubkey.
    pub pubkey: String,
    pub created_at: u64,
}

/// Stateless verifier. Cheap to clone and share across handlers.
#[derive(Clone)]
pub struct Authenticator {
    clock: SharedClock,
    max_skew_secs: u64,
}

impl Authenticator {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            max_skew_secs: AUTH_MAX_SKEW_SECS,
        }
    }

    /// Verifies a raw `Authorization` header value.
    pub fn verify_header(
        &self,
        header: Option<&str>,
        expected_url: &str,
        expected_method: &str,
    ) -> Result<AuthenticatedCaller, AuthError> {
        let event = parse_authorization_header(header.ok_or(AuthError::Missing)?)?;
        self.verify(&event, expected_url, expected_method)
    }

    /// Verifies an already-decoded attestation event.
    pub fn verify(
        &self,
        attestation: &NostrEvent,
        expected_url: &str,
        expected_method: &str,
    ) -> Result<AuthenticatedCaller, AuthError> {
        if !is_hex64(&attestation.pubkey) {
            return Err(AuthError::InvalidPubkey);
        }
        attestation.verify().map_err(|e| {
            tracing::debug!(error = %e, "attestation failed verification");
            AuthError::Invalid
        })?;

        if attestation.kind != AUTH_EVENT_KIND {
            return Err(AuthError::WrongKind);
        }

        let now = self.clock.now_secs();
        if now.abs_diff(attestation.created_at) > self.max_skew_secs {
            return Err(AuthError::Stale);
        }

        if attestation.first_tag("u") != Some(expected_url) {
            return Err(AuthError::UrlMismatch);
        }

        let method = attestation.first_tag("method").unwrap_or("");
        if !method.eq_ignore_ascii_case(expected_method) {
            return Err(AuthError::MethodMismatch);
        }

        Ok(AuthenticatedCaller {
            pubkey: attestation.pubkey.to_lowercase(),
            created_at: attestation.created_at,
        })
    }
}

/// Decodes `Nostr <base64>` into an event. Anything undecodable counts as
/// no auth at all.
pub fn parse_authorization_header(value: &str) -> Result<NostrEvent, AuthError> {
    let (scheme, payload) = value
        .trim()
        .split_once(char::is_whitespace)
        .ok_or(AuthError::Missing)?;
    if !scheme.eq_ignore_ascii_case(AUTH_SCHEME) {
        return Err(AuthError::Missing);
    }
    let payload = payload.trim();
    if payload.is_empty() {
        return Err(AuthError::Missing);
    }

    let json = [&STANDARD, &STANDARD_NO_PAD, &URL_SAFE, &URL_SAFE_NO_PAD]
        .iter()
        .find_map(|engine| engine.decode(payload).ok())
        .ok_or(AuthError::Missing)?;

    serde_json::from_slice(&json).map_err(|_| AuthError::Missing)
}

/// Builds a signed attestation for `method url` at `created_at`.
pub fn sign_request(
    signer: &EventSigner,
    url: &str,
    method: &str,
    created_at: u64,
) -> Result<NostrEvent, EventError> {
    NostrEvent::sign(
        signer,
        created_at,
        AUTH_EVENT_KIND,
        vec![tag("u", url), tag("method", method.to_uppercase())],
        "",
    )
}

/// Encodes an attestation as an `Authorization` header value.
pub fn authorization_header(attestation: &NostrEvent) -> Result<String, EventError> {
    let json = serde_json::to_vec(attestation)?;
    Ok(format!("{} {}", AUTH_SCHEME, STANDARD.encode(json)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    const NOW: u64 = 1_700_000_000;
    const URL: &str = "https://dstream.example/api/xmr/stake/session?x=1";

    fn authenticator() -> Authenticator {
        Authenticator::new(Arc::new(ManualClock::at_secs(NOW)))
    }

    fn header_for(signer: &EventSigner, url: &str, method: &str, at: u64) -> String {
        let ev = sign_request(signer, url, method, at).unwrap();
        authorization_header(&ev).unwrap()
    }

    #[test]
    fn valid_attestation_yields_pubkey() {
        let signer = EventSigner::generate();
        let h = header_for(&signer, URL, "post", NOW - 10);
        let caller = authenticator().verify_header(Some(&h), URL, "POST").unwrap();
        assert_eq!(caller.pubkey, signer.public_key_hex());
    }

    #[test]
    fn missing_and_garbage_headers() {
        let a = authenticator();
        assert_eq!(a.verify_header(None, URL, "GET"), Err(AuthError::Missing));
        assert_eq!(
            a.verify_header(Some("Bearer abc"), URL, "GET"),
            Err(AuthError::Missing)
        );
        assert_eq!(
            a.verify_header(Some("Nostr !!!notbase64"), URL, "GET"),
            Err(AuthError::Missing)
        );
        assert_eq!(
            a.verify_header(Some("Nostr "), URL, "GET"),
            Err(AuthError::Missing)
        );
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let signer = EventSigner::generate();
        let h = header_for(&signer, URL, "GET", NOW).replacen("Nostr", "nOsTr", 1);
        assert!(authenticator().verify_header(Some(&h), URL, "GET").is_ok());
    }

    #[test]
    fn replay_against_other_url_rejected() {
        let signer = EventSigner::generate();
        let h = header_for(&signer, URL, "POST", NOW);
        let other = "https://dstream.example/api/xmr/stake/slash";
        assert_eq!(
            authenticator().verify_header(Some(&h), other, "POST"),
            Err(AuthError::UrlMismatch)
        );
    }

    #[test]
    fn query_string_is_part_of_the_binding() {
        let signer = EventSigner::generate();
        let h = header_for(&signer, URL, "POST", NOW);
        let without_query = URL.split('?').next().unwrap();
        assert_eq!(
            authenticator().verify_header(Some(&h), without_query, "POST"),
            Err(AuthError::UrlMismatch)
        );
    }

    #[test]
    fn method_mismatch_rejected() {
        let signer = EventSigner::generate();
        let h = header_for(&signer, URL, "GET", NOW);
        assert_eq!(
            authenticator().verify_header(Some(&h), URL, "POST"),
            Err(AuthError::MethodMismatch)
        );
    }

    #[test]
    fn stale_in_either_direction() {
        let signer = EventSigner::generate();
        let a = authenticator();
        let past = header_for(&signer, URL, "GET", NOW - 61);
        let future = header_for(&signer, URL, "GET", NOW + 61);
        let edge = header_for(&signer, URL, "GET", NOW - 60);
        assert_eq!(a.verify_header(Some(&past), URL, "GET"), Err(AuthError::Stale));
        assert_eq!(a.verify_header(Some(&future), URL, "GET"), Err(AuthError::Stale));
        assert!(a.verify_header(Some(&edge), URL, "GET").is_ok());
    }

    #[test]
    fn wrong_kind_rejected() {
        let signer = EventSigner::generate();
        let ev = NostrEvent::sign(
            &signer,
            NOW,
            1,
            vec![tag("u", URL), tag("method", "GET")],
            "",
        )
        .unwrap();
        assert_eq!(authenticator().verify(&ev, URL, "GET"), Err(AuthError::WrongKind));
    }

    #[test]
    fn tampered_tag_breaks_signature() {
        let signer = EventSigner::generate();
        let mut ev = sign_request(&signer, URL, "GET", NOW).unwrap();
        ev.tags[0][1] = "https://evil.example/".into();
        assert_eq!(
            authenticator().verify(&ev, "https://evil.example/", "GET"),
            Err(AuthError::Invalid)
        );
    }

    #[test]
    fn non_hex_pubkey_rejected() {
        let signer = EventSigner::generate();
        let mut ev = sign_request(&signer, URL, "GET", NOW).unwrap();
        ev.pubkey = "npub1notahexkey".into();
        assert_eq!(
            authenticator().verify(&ev, URL, "GET"),
            Err(AuthError::InvalidPubkey)
        );
    }

    #[test]
    fn url_safe_base64_accepted() {
        let signer = EventSigner::generate();
        let ev = sign_request(&signer, URL, "GET", NOW).unwrap();
        let h = format!("Nostr {}", URL_SAFE_NO_PAD.encode(serde_json::to_vec(&ev).unwrap()));
        assert!(authenticator().verify_header(Some(&h), URL, "GET").is_ok());
    }
}
