//! `signature::Signer` adapter so a PIV slot can back an `x509_cert`
//! certificate builder (see [`crate::certificate::generate_self_signed`]).

use std::marker::PhantomData;

use der::{
    asn1::{BitString, ObjectIdentifier, OctetString},
    oid::db::rfc5912::{
        ECDSA_WITH_SHA_256, ID_EC_PUBLIC_KEY, ID_SHA_256, RSA_ENCRYPTION, SECP_256_R_1,
        SECP_384_R_1, SHA_256_WITH_RSA_ENCRYPTION,
    },
    Any, Decode, Encode,
};
use rsa::pkcs1::RsaPublicKey;
use signature::{digest::Digest, Keypair, Signer};
use spki::{
    AlgorithmIdentifierOwned, Document, DynSignatureAlgorithmIdentifier, EncodePublicKey,
    SignatureBitStringEncoding, SubjectPublicKeyInfoOwned,
};

use crate::{
    certificate::DigestInfo,
    piv::{sign_prehash, AlgorithmId, SlotId},
    transaction::Transaction,
};

/// Signs through a PIV slot. Borrows the open card and transaction for its
/// whole lifetime; `spki` is supplied by the caller since this type has no
/// way to read it back from the card itself.
#[derive(Debug)]
pub struct YubiKeySigningKey<'a, D>
where
    D: Digest,
{
    card: &'a pcsc::Card,
    txn: &'a Transaction<'a>,
    slot: SlotId,
    spki: SubjectPublicKeyInfoOwned,
    phantom: PhantomData<D>,
}

impl<'a, D> YubiKeySigningKey<'a, D>
where
    D: Digest,
{
    pub fn new(
        card: &'a pcsc::Card,
        txn: &'a Transaction<'a>,
        slot: SlotId,
        spki: SubjectPublicKeyInfoOwned,
    ) -> Self {
        YubiKeySigningKey {
            card,
            txn,
            slot,
            spki,
            phantom: PhantomData,
        }
    }
}

pub struct Signature(Vec<u8>);

impl SignatureBitStringEncoding for Signature {
    fn to_bitstring(&self) -> der::Result<BitString> {
        BitString::new(0, self.0.clone())
    }
}

/// Verifying-key half, derived from the SPKI passed to [`YubiKeySigningKey::new`].
#[derive(Debug, Clone)]
pub struct YubiKeyVerifyingKey<D>
where
    D: Digest,
{
    pub(super) spki: SubjectPublicKeyInfoOwned,
    pub(super) phantom: PhantomData<D>,
}

impl<D> EncodePublicKey for YubiKeyVerifyingKey<D>
where
    D: Digest,
{
    fn to_public_key_der(&self) -> Result<Document, spki::Error> {
        match self.spki.to_der() {
            Ok(s) => Ok(Document::try_from(s)?),
            Err(e) => Err(spki::Error::Asn1(e)),
        }
    }
}

impl<D> DynSignatureAlgorithmIdentifier for YubiKeySigningKey<'_, D>
where
    D: Digest + Clone,
{
    fn signature_algorithm_identifier(&self) -> Result<AlgorithmIdentifierOwned, spki::Error> {
        Ok(AlgorithmIdentifierOwned {
            oid: sig_alg_from_spki(&self.spki),
            parameters: Some(Any::new(der::Tag::Null, vec![]).map_err(spki::Error::Asn1)?),
        })
    }
}

fn sig_alg_from_spki(spki: &SubjectPublicKeyInfoOwned) -> ObjectIdentifier {
    if ID_EC_PUBLIC_KEY == spki.algorithm.oid {
        ECDSA_WITH_SHA_256
    } else {
        SHA_256_WITH_RSA_ENCRYPTION
    }
}

fn rsa_modulus_len(spki: &SubjectPublicKeyInfoOwned) -> Result<usize, signature::Error> {
    let raw = spki
        .subject_public_key
        .as_bytes()
        .ok_or_else(signature::Error::new)?;
    let rsa = RsaPublicKey::from_der(raw).map_err(|_| signature::Error::new())?;
    Ok(rsa.modulus.len())
}

fn named_curve(alg_id: &AlgorithmIdentifierOwned) -> Result<ObjectIdentifier, signature::Error> {
    alg_id
        .parameters
        .as_ref()
        .and_then(|p| ObjectIdentifier::try_from(p.value()).ok())
        .ok_or_else(signature::Error::new)
}

fn algorithm_id(spki: &SubjectPublicKeyInfoOwned) -> Result<AlgorithmId, signature::Error> {
    if RSA_ENCRYPTION == spki.algorithm.oid {
        match rsa_modulus_len(spki)? {
            128 => Ok(AlgorithmId::Rsa1024),
            256 => Ok(AlgorithmId::Rsa2048),
            _ => Err(signature::Error::new()),
        }
    } else if ID_EC_PUBLIC_KEY == spki.algorithm.oid {
        match named_curve(&spki.algorithm)? {
            SECP_256_R_1 => Ok(AlgorithmId::EccP256),
            SECP_384_R_1 => Ok(AlgorithmId::EccP384),
            _ => Err(signature::Error::new()),
        }
    } else {
        Err(signature::Error::new())
    }
}

impl<D> Signer<Signature> for YubiKeySigningKey<'_, D>
where
    D: Digest,
{
    fn try_sign(&self, msg: &[u8]) -> Result<Signature, signature::Error> {
        let oid = sig_alg_from_spki(&self.spki);
        let alg = algorithm_id(&self.spki)?;

        let block = if oid == SHA_256_WITH_RSA_ENCRYPTION {
            let digest =
                OctetString::new(D::digest(msg).to_vec()).map_err(|_| signature::Error::new())?;
            let digest_info = DigestInfo {
                digest_algorithm: AlgorithmIdentifierOwned {
                    oid: ID_SHA_256,
                    parameters: Some(
                        Any::new(der::Tag::Null, vec![]).map_err(|_| signature::Error::new())?,
                    ),
                },
                digest,
            };
            let em_len = rsa_modulus_len(&self.spki)?;
            let mut t = digest_info.to_der().map_err(|_| signature::Error::new())?;
            let tlen = t.len();
            if tlen + 3 > em_len {
                return Err(signature::Error::new());
            }
            let mut em = Vec::with_capacity(em_len);
            em.push(0x00);
            em.push(0x01);
            em.extend(std::iter::repeat(0xFFu8).take(em_len - tlen - 3));
            em.push(0x00);
            em.append(&mut t);
            em
        } else {
            D::digest(msg).to_vec()
        };

        sign_prehash(self.txn, self.card, self.slot, alg, &block)
            .map(Signature)
            .map_err(|_| signature::Error::new())
    }
}

impl<D> Keypair for YubiKeySigningKey<'_, D>
where
    D: Digest + Clone,
{
    type VerifyingKey = YubiKeyVerifyingKey<D>;

    fn verifying_key(&self) -> Self::VerifyingKey {
        YubiKeyVerifyingKey {
            spki: self.spki.clone(),
            phantom: PhantomData,
        }
    }
}
