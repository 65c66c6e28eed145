//! Slot catalog: reading certificates off the card, deriving each
//! slot's algorithm and public key, and fusing PIN/touch requirements from
//! metadata or the attestation certificate extension.

use log::warn;

use crate::{
    certificate::{read_certificate, subject_name, subject_public_key},
    error::{Error, ErrorKind, Result},
    metadata::{self, AuthMask},
    piv::{self, AlgorithmId, PublicKeyMaterial, SlotId},
    transaction::Transaction,
    types::Version,
};

/// One key/certificate position on a token.
#[derive(Clone, Debug)]
pub struct Slot {
    pub id: SlotId,
    pub algorithm: Option<AlgorithmId>,
    pub certificate: Vec<u8>,
    pub subject: Option<String>,
    pub public_key: Option<PublicKeyMaterial>,
    pub auth: AuthMask,
    pub metadata_fetched: bool,
}

impl Slot {
    fn empty(id: SlotId) -> Self {
        Slot {
            id,
            algorithm: None,
            certificate: Vec::new(),
            subject: None,
            public_key: None,
            auth: AuthMask {
                pin: id.default_requires_pin(),
                touch: false,
            },
            metadata_fetched: false,
        }
    }
}

fn algorithm_from_public_key(pk: &PublicKeyMaterial) -> Result<AlgorithmId> {
    match pk {
        PublicKeyMaterial::Rsa { modulus, .. } => match modulus.len() {
            128 => Ok(AlgorithmId::Rsa1024),
            256 => Ok(AlgorithmId::Rsa2048),
            _ => Err(Error::new(ErrorKind::BadAlgorithmError)),
        },
        PublicKeyMaterial::Ec { algorithm, .. } => Ok(*algorithm),
    }
}

/// Read and parse the certificate for `slot`, replacing any existing catalog
/// entry. Fuses PIN/touch policy from `GET_METADATA` (firmware >= 5.3.0) or,
/// failing that, the attestation extension (firmware >= 4.0.0); failures of
/// either fusion path are swallowed.
pub fn read_cert(
    txn: &Transaction<'_>,
    card: &pcsc::Card,
    slot: SlotId,
    is_ykpiv: bool,
    firmware: Version,
) -> Result<Slot> {
    let (cert_der, _cert_info) = read_certificate(card, slot)?;

    let mut entry = Slot::empty(slot);
    entry.certificate = cert_der.clone();

    let pk = subject_public_key(&cert_der)?;
    entry.algorithm = Some(algorithm_from_public_key(&pk)?);
    entry.public_key = Some(pk);
    entry.subject = subject_name(&cert_der).ok();

    if is_ykpiv && firmware >= Version::new(5, 3, 0) {
        match metadata::fetch_and_fuse(card, slot, &mut entry.auth) {
            Ok(Some(alg)) => {
                entry.algorithm = Some(alg);
                entry.metadata_fetched = true;
            }
            Ok(None) => {}
            Err(e) => warn!("metadata fetch failed for slot: {e}"),
        }
    } else if is_ykpiv && firmware >= Version::new(4, 0, 0) {
        if let Ok(attest_der) = piv::attest(txn, card, slot) {
            if let Err(e) = metadata::fuse_from_attestation_cert(&attest_der, &mut entry.auth) {
                warn!("attestation-extension fusion failed: {e}");
            }
        }
    }

    Ok(entry)
}

/// Iterate 9E, 9A, 9C, 9D, then the on-card retired slots, reading every
/// certificate found. Tolerates `NotFound`/`Permission`/`NotSupported` per
/// slot (that slot is simply absent from the result); any other error
/// aborts the whole scan.
pub fn read_all_certs(
    txn: &Transaction<'_>,
    card: &pcsc::Card,
    is_ykpiv: bool,
    firmware: Version,
    oncard_retired_count: u8,
) -> Result<Vec<Slot>> {
    let mut slots = vec![
        SlotId::CardAuthentication,
        SlotId::Authentication,
        SlotId::Signature,
        SlotId::KeyManagement,
    ];
    for i in 1..=oncard_retired_count {
        slots.push(SlotId::Retired(piv::RetiredSlotId::from_index(i)?));
    }

    let mut out = Vec::with_capacity(slots.len());
    for slot in slots {
        match read_cert(txn, card, slot, is_ykpiv, firmware) {
            Ok(entry) => out.push(entry),
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::NotFoundError | ErrorKind::PermissionError | ErrorKind::NotSupportedError
                ) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_slot_pin_default_follows_slot_id() {
        let card_auth = Slot::empty(SlotId::CardAuthentication);
        assert!(!card_auth.auth.pin);
        let auth = Slot::empty(SlotId::Authentication);
        assert!(auth.auth.pin);
        let attest = Slot::empty(SlotId::Attestation);
        assert!(!attest.auth.pin);
    }

    #[test]
    fn algorithm_from_rsa_modulus_length() {
        let pk = PublicKeyMaterial::Rsa {
            modulus: vec![0u8; 256],
            exponent: vec![1, 0, 1],
        };
        assert_eq!(algorithm_from_public_key(&pk).unwrap(), AlgorithmId::Rsa2048);
    }
}
