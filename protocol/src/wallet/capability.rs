//! Capability profiles: named sets of wallet methods a feature needs.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use super::types::MethodProbe;

/// A feature tier and the wallet methods it depends on.
#[derive(Debug, Clone, Copy)]
pub struct CapabilityProfile {
    pub name: &'static str,
    pub required: &'static [&'static str],
}

pub const TIP_V1: CapabilityProfile = CapabilityProfile {
    name: "tip_v1",
    required: &["get_version", "create_address", "get_transfers"],
};

pub const STAKE_V2: CapabilityProfile = CapabilityProfile {
    name: "stake_v2",
    required: &[
        "get_version",
        "create_address",
        "get_transfers",
        "get_balance",
        "sweep_all",
    ],
};

pub const ESCROW_V3_MULTISIG: CapabilityProfile = CapabilityProfile {
    name: "escrow_v3_multisig",
    required: &[
        "get_version",
        "create_address",
        "get_transfers",
        "get_balance",
        "sweep_all",
        "prepare_multisig",
        "make_multisig",
        "exchange_multisig_keys",
        "export_multisig_info",
        "import_multisig_info",
        "sign_multisig",
        "submit_multisig",
    ],
};

pub const PROFILES: [CapabilityProfile; 3] = [TIP_V1, STAKE_V2, ESCROW_V3_MULTISIG];

/// Every method any profile needs, first-seen order, no duplicates.
pub fn all_profile_methods() -> Vec<&'static str> {
    let mut out: Vec<&'static str> = Vec::new();
    for m in PROFILES.iter().flat_map(|p| p.required.iter()) {
        if !out.contains(m) {
            out.push(m);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileReadiness {
    pub ready: bool,
    pub required: Vec<&'static str>,
    pub missing: Vec<&'static str>,
}

/// Readiness of every profile given a set of probe results. A method that
/// was never probed counts as missing.
pub fn evaluate_profiles(probes: &[MethodProbe]) -> BTreeMap<&'static str, ProfileReadiness> {
    let supported: HashMap<&str, bool> = probes
        .iter()
        .map(|p| (p.method.as_str(), p.supported))
        .collect();

    PROFILES
        .iter()
        .map(|profile| {
            let missing: Vec<&'static str> = profile
                .required
                .iter()
                .copied()
                .filter(|m| !supported.get(m).copied().unwrap_or(false))
                .collect();
            (
                profile.name,
                ProfileReadiness {
                    ready: missing.is_empty(),
                    required: profile.required.to_vec(),
                    missing,
                },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(method: &str, supported: bool) -> MethodProbe {
        MethodProbe {
            method: method.into(),
            supported,
            code: None,
            message: String::new(),
        }
    }

    #[test]
    fn profiles_nest() {
        for m in TIP_V1.required {
            assert!(STAKE_V2.required.contains(m));
        }
        for m in STAKE_V2.required {
            assert!(ESCROW_V3_MULTISIG.required.contains(m));
        }
        assert_eq!(all_profile_methods().len(), ESCROW_V3_MULTISIG.required.len());
    }

    #[test]
    fn missing_methods_reported_per_profile() {
        let probes: Vec<_> = STAKE_V2
            .required
            .iter()
            .map(|m| probe(m, *m != "sweep_all"))
            .collect();
        let r = evaluate_profiles(&probes);
        assert!(r["tip_v1"].ready);
        assert!(!r["stake_v2"].ready);
        assert_eq!(r["stake_v2"].missing, vec!["sweep_all"]);
        // Multisig methods were never probed.
        assert_eq!(r["escrow_v3_multisig"].missing.len(), 8);
    }
}
