//! DLMS/COSEM security constants
//!
//! Application context names and authentication mechanism names from the
//! DLMS UA arc {2 16 756 5 8}.

use cosem_core::{CosemError, CosemResult};

/// Logical-name referencing without ciphering: {2 16 756 5 8 1 1}.
pub const CONTEXT_LN_NO_CIPHER: &[u32] = &[2, 16, 756, 5, 8, 1, 1];

/// Logical-name referencing with ciphering: {2 16 756 5 8 1 3}.
pub const CONTEXT_LN_CIPHER: &[u32] = &[2, 16, 756, 5, 8, 1, 3];

const MECHANISM_ARC: [u32; 6] = [2, 16, 756, 5, 8, 2];

/// Authentication mechanism negotiated in the AARQ/AARE exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthenticationMechanism {
    /// No authentication; APDUs pass the security layer untouched.
    #[default]
    Lowest,
    /// Password authentication (low level security).
    Low,
    /// Mutual GMAC authentication with APDU ciphering (HLS-5).
    Hls5Gmac,
}

impl AuthenticationMechanism {
    /// Mechanism id, the last arc of the mechanism name.
    pub fn id(&self) -> u32 {
        match self {
            AuthenticationMechanism::Lowest => 0,
            AuthenticationMechanism::Low => 1,
            AuthenticationMechanism::Hls5Gmac => 5,
        }
    }

    /// Full mechanism name OID.
    pub fn oid(&self) -> Vec<u32> {
        let mut oid = MECHANISM_ARC.to_vec();
        oid.push(self.id());
        oid
    }

    /// Match a received mechanism name OID.
    pub fn from_oid(oid: &[u32]) -> CosemResult<Self> {
        if oid.len() == 7 && oid[..6] == MECHANISM_ARC {
            match oid[6] {
                0 => return Ok(AuthenticationMechanism::Lowest),
                1 => return Ok(AuthenticationMechanism::Low),
                5 => return Ok(AuthenticationMechanism::Hls5Gmac),
                _ => {}
            }
        }
        Err(CosemError::Security(format!(
            "unsupported authentication mechanism {:?}",
            oid
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mechanism_oid_roundtrip() {
        for mechanism in [
            AuthenticationMechanism::Lowest,
            AuthenticationMechanism::Low,
            AuthenticationMechanism::Hls5Gmac,
        ] {
            assert_eq!(
                AuthenticationMechanism::from_oid(&mechanism.oid()).unwrap(),
                mechanism
            );
        }
    }

    #[test]
    fn hls5_oid_value() {
        assert_eq!(
            AuthenticationMechanism::Hls5Gmac.oid(),
            vec![2, 16, 756, 5, 8, 2, 5]
        );
    }

    #[test]
    fn foreign_oid_is_rejected() {
        assert!(AuthenticationMechanism::from_oid(&[2, 16, 756, 5, 8, 2, 3]).is_err());
        assert!(AuthenticationMechanism::from_oid(&[1, 2, 3]).is_err());
    }
}
