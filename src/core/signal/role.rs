//! Symmetric ICE role negotiation.
//!
//! Both peers run the same comparison over the exchanged parameters and
//! land on opposite roles, so either side can start first — no offer/answer
//! asymmetry. The peer with the lexicographically greater ufrag becomes
//! Controlling; a ufrag tie falls through to the DTLS fingerprint; a full
//! tie (identical peers) resolves to Controlled on both sides so that no
//! two peers ever both claim Controlling.

use super::{DtlsParameters, IceParameters};
use std::cmp::Ordering;

/// ICE role: the controlling peer drives candidate nomination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceRole {
    Controlling,
    Controlled,
}

/// Role from ufrag comparison alone. Ties resolve to Controlled.
pub fn determine_role(local: &IceParameters, remote: &IceParameters) -> IceRole {
    match compare(&local.username_fragment, &remote.username_fragment) {
        Ordering::Greater => IceRole::Controlling,
        _ => IceRole::Controlled,
    }
}

/// Role from ufrag comparison with a DTLS-fingerprint tiebreak.
///
/// Deterministic and anti-symmetric: for distinct parameter sets, the two
/// peers always compute opposite roles.
pub fn determine_role_with_dtls(
    local: &IceParameters,
    remote: &IceParameters,
    local_dtls: &DtlsParameters,
    remote_dtls: &DtlsParameters,
) -> IceRole {
    match compare(&local.username_fragment, &remote.username_fragment) {
        Ordering::Greater => return IceRole::Controlling,
        Ordering::Less => return IceRole::Controlled,
        Ordering::Equal => {}
    }

    // Identical ufrags are rare; fall back to the first fingerprint.
    if let (Some(local_fp), Some(remote_fp)) = (
        local_dtls.fingerprints.first(),
        remote_dtls.fingerprints.first(),
    ) {
        if compare(&local_fp.value, &remote_fp.value) == Ordering::Greater {
            return IceRole::Controlling;
        }
    }

    IceRole::Controlled
}

fn compare(a: &str, b: &str) -> Ordering {
    a.as_bytes().cmp(b.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::signal::DtlsFingerprint;

    fn params(ufrag: &str) -> IceParameters {
        IceParameters {
            username_fragment: ufrag.into(),
            password: "pw".into(),
            ice_lite: false,
        }
    }

    fn dtls(fp: &str) -> DtlsParameters {
        DtlsParameters {
            role: Default::default(),
            fingerprints: vec![DtlsFingerprint {
                algorithm: "sha-256".into(),
                value: fp.into(),
            }],
        }
    }

    #[test]
    fn test_greater_ufrag_controls() {
        assert_eq!(
            determine_role(&params("z-local"), &params("a-remote")),
            IceRole::Controlling
        );
        assert_eq!(
            determine_role(&params("a-remote"), &params("z-local")),
            IceRole::Controlled
        );
    }

    #[test]
    fn test_antisymmetric_over_distinct_pairs() {
        let pairs = [("abc", "abd"), ("A", "a"), ("longer-ufrag", "long"), ("0", "~")];
        for (a, b) in pairs {
            let ab = determine_role_with_dtls(&params(a), &params(b), &dtls("11"), &dtls("22"));
            let ba = determine_role_with_dtls(&params(b), &params(a), &dtls("22"), &dtls("11"));
            assert_ne!(ab, ba, "{a} vs {b}");
            assert!(
                ab == IceRole::Controlling || ba == IceRole::Controlling,
                "{a} vs {b}"
            );
        }
    }

    #[test]
    fn test_fingerprint_tiebreak() {
        let local = params("same");
        let remote = params("same");
        assert_eq!(
            determine_role_with_dtls(&local, &remote, &dtls("ff:00"), &dtls("aa:00")),
            IceRole::Controlling
        );
        assert_eq!(
            determine_role_with_dtls(&local, &remote, &dtls("aa:00"), &dtls("ff:00")),
            IceRole::Controlled
        );
    }

    #[test]
    fn test_full_tie_resolves_controlled() {
        // Two identical peers must not both claim Controlling.
        let role = determine_role_with_dtls(
            &params("same"),
            &params("same"),
            &dtls("ab:cd"),
            &dtls("ab:cd"),
        );
        assert_eq!(role, IceRole::Controlled);
    }

    #[test]
    fn test_missing_fingerprints_resolve_controlled() {
        let empty = DtlsParameters::default();
        assert_eq!(
            determine_role_with_dtls(&params("x"), &params("x"), &empty, &empty),
            IceRole::Controlled
        );
    }

    #[test]
    fn test_determinism() {
        for _ in 0..10 {
            assert_eq!(
                determine_role(&params("peer-b"), &params("peer-a")),
                IceRole::Controlling
            );
        }
    }
}
