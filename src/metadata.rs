//! Slot metadata (`GET_METADATA`, YubicoPIV >= 5.3.0) and its attestation-
//! extension fallback for older firmware.

use der::{asn1::OctetString, Decode};
use x509_cert::Certificate;

use crate::{
    apdu::Apdu,
    consts::{
        INS_GET_METADATA, SW_SUCCESS, TAG_METADATA_ALGO, TAG_METADATA_POLICY,
        YUBICO_POLICY_EXTENSION_OID,
    },
    error::{ctor::*, Result},
    piv::{AlgorithmId, PinPolicy, SlotId, TouchPolicy},
    serialization::Tlv,
    transaction::transmit_chained,
};

/// An auth requirement, fused from metadata or attestation extension bits
/// into the slot's cumulative {pin, touch} mask.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct AuthMask {
    pub pin: bool,
    pub touch: bool,
}

impl AuthMask {
    pub fn fuse_policy(&mut self, pin_policy: PinPolicy, touch_policy: TouchPolicy) {
        match pin_policy {
            PinPolicy::Never => self.pin = false,
            PinPolicy::Once | PinPolicy::Always => self.pin = true,
            PinPolicy::Default => {}
        }
        match touch_policy {
            TouchPolicy::Always | TouchPolicy::Cached => self.touch = true,
            TouchPolicy::Never => self.touch = false,
            TouchPolicy::Default => {}
        }
    }
}

/// Fetch and parse `GET_METADATA` for `slot`, fusing the result into `mask`.
/// Returns the slot's algorithm if present. Swallows any failure by
/// returning `Ok(None)` without mutating `mask` — the caller treats a
/// missing/unsupported response as "nothing learned".
pub fn fetch_and_fuse(
    card: &pcsc::Card,
    slot: SlotId,
    mask: &mut AuthMask,
) -> Result<Option<AlgorithmId>> {
    let apdu = Apdu::new(INS_GET_METADATA, 0x00, slot.to_byte(), Vec::new());
    let (reply, sw) = match transmit_chained(card, &apdu) {
        Ok(r) => r,
        Err(_) => return Ok(None),
    };
    if sw.0 != SW_SUCCESS {
        return Ok(None);
    }

    let entries = match Tlv::parse_all(&reply) {
        Ok(e) => e,
        Err(_) => return Ok(None),
    };

    let algorithm = entries
        .iter()
        .find(|(t, _)| *t == TAG_METADATA_ALGO as u32)
        .and_then(|(_, v)| v.first().copied())
        .and_then(|b| AlgorithmId::from_byte(b).ok());

    if let Some((_, policy)) = entries.iter().find(|(t, _)| *t == TAG_METADATA_POLICY as u32) {
        if policy.len() >= 2 {
            mask.fuse_policy(
                PinPolicy::from_byte(policy[0]),
                TouchPolicy::from_byte(policy[1]),
            );
        }
    }

    Ok(algorithm)
}

/// Parse the Yubico PIV attestation extension (OID `1.3.6.1.4.1.41482.3.8`)
/// out of an attestation certificate's DER, fusing pin/touch policy into
/// `mask`. Used when `GET_METADATA` is unavailable (firmware < 5.3.0) but
/// `ATTEST` is (firmware >= 4.0.0).
pub fn fuse_from_attestation_cert(cert_der: &[u8], mask: &mut AuthMask) -> Result<()> {
    let cert = Certificate::from_der(cert_der).map_err(|_| invalid_data_error())?;
    let extensions = cert
        .tbs_certificate
        .extensions
        .as_ref()
        .ok_or_else(extension_missing)?;

    let oid_str = YUBICO_POLICY_EXTENSION_OID
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(".");

    let ext = extensions
        .iter()
        .find(|e| e.extn_id.to_string() == oid_str)
        .ok_or_else(extension_missing)?;

    let value = OctetString::from_der(ext.extn_value.as_bytes())
        .map(|os| os.as_bytes().to_vec())
        .unwrap_or_else(|_| ext.extn_value.as_bytes().to_vec());

    if value.len() < 2 {
        return Err(extension_invalid());
    }
    mask.fuse_policy(PinPolicy::from_byte(value[0]), TouchPolicy::from_byte(value[1]));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuse_policy_never_clears_pin() {
        let mut mask = AuthMask { pin: true, touch: false };
        mask.fuse_policy(PinPolicy::Never, TouchPolicy::Default);
        assert!(!mask.pin);
    }

    #[test]
    fn fuse_policy_always_sets_touch() {
        let mut mask = AuthMask::default();
        mask.fuse_policy(PinPolicy::Once, TouchPolicy::Always);
        assert!(mask.pin);
        assert!(mask.touch);
    }

    #[test]
    fn fuse_policy_default_is_noop() {
        let mut mask = AuthMask { pin: true, touch: true };
        mask.fuse_policy(PinPolicy::Default, TouchPolicy::Default);
        assert!(mask.pin);
        assert!(mask.touch);
    }
}
