//! Slot/algorithm identifiers and the credential operations built on them:
//! signing, ECDH, PIN verification/change, key generation and import,
//! attestation, and the small GET_DATA/PUT_DATA file helpers built on them.

use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use zeroize::Zeroizing;

use crate::{
    apdu::{Apdu, StatusWord},
    consts::*,
    error::{ctor::*, Error, Result},
    serialization::Tlv,
    transaction::{fetch_object, save_object, transmit_chained, Transaction},
};

/// A fixed (non-retired) PIV slot, or the Yubico attestation slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum SlotId {
    Authentication,
    Signature,
    KeyManagement,
    CardAuthentication,
    Attestation,
    Retired(RetiredSlotId),
}

/// One of the 20 retired key-history slots, `0x82..=0x95`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct RetiredSlotId(u8);

impl RetiredSlotId {
    pub fn from_index(index: u8) -> Result<Self> {
        if index == 0 || index > MAX_KEY_HISTORY {
            return Err(argument_error());
        }
        Ok(RetiredSlotId(SLOT_RETIRED_FIRST + index - 1))
    }

    pub fn index(self) -> u8 {
        self.0 - SLOT_RETIRED_FIRST + 1
    }
}

impl SlotId {
    pub fn from_byte(value: u8) -> Result<Self> {
        Ok(match value {
            SLOT_AUTHENTICATION => SlotId::Authentication,
            SLOT_SIGNATURE => SlotId::Signature,
            SLOT_KEY_MANAGEMENT => SlotId::KeyManagement,
            SLOT_CARD_AUTHENTICATION => SlotId::CardAuthentication,
            SLOT_ATTESTATION => SlotId::Attestation,
            v if (SLOT_RETIRED_FIRST..=SLOT_RETIRED_LAST).contains(&v) => {
                SlotId::Retired(RetiredSlotId(v))
            }
            _ => return Err(argument_error()),
        })
    }

    pub fn to_byte(self) -> u8 {
        match self {
            SlotId::Authentication => SLOT_AUTHENTICATION,
            SlotId::Signature => SLOT_SIGNATURE,
            SlotId::KeyManagement => SLOT_KEY_MANAGEMENT,
            SlotId::CardAuthentication => SLOT_CARD_AUTHENTICATION,
            SlotId::Attestation => SLOT_ATTESTATION,
            SlotId::Retired(r) => r.0,
        }
    }

    /// The 3-byte GET_DATA/PUT_DATA object id holding this slot's certificate.
    pub fn cert_object_id(self) -> [u8; 3] {
        let tag: u32 = match self {
            SlotId::Authentication => TAG_CERT_9A,
            SlotId::Signature => TAG_CERT_9C,
            SlotId::KeyManagement => TAG_CERT_9D,
            SlotId::CardAuthentication => TAG_CERT_9E,
            SlotId::Attestation => TAG_CERT_9A, // unused: attestation has no stored cert object
            SlotId::Retired(r) => TAG_CERT_RETIRED_BASE + (r.0 - SLOT_RETIRED_FIRST) as u32,
        };
        [(tag >> 16) as u8, (tag >> 8) as u8, tag as u8]
    }

    /// Whether this slot requires PIN verification by default (card-auth and
    /// the Yubico attestation slot do not).
    pub fn default_requires_pin(self) -> bool {
        !matches!(self, SlotId::CardAuthentication | SlotId::Attestation)
    }
}

/// Cryptographic algorithm identifiers as used in PIV/YubicoPIV wire
/// messages (`0x80` in GEN_ASYM, GET_METADATA responses, SELECT's algorithm
/// list).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum AlgorithmId {
    ThreeDes,
    Rsa1024,
    Rsa2048,
    Aes128,
    Aes192,
    Aes256,
    EccP256,
    EccP384,
    /// Card-side-hash EC variants (JCOP22x): curve bits + hash algorithm.
    EccP256Sha1,
    EccP256Sha256,
    EccP384Sha1,
    EccP384Sha256,
    EccP384Sha384,
}

impl AlgorithmId {
    pub fn from_byte(value: u8) -> Result<Self> {
        Ok(match value {
            ALGO_3DES => AlgorithmId::ThreeDes,
            ALGO_RSA1024 => AlgorithmId::Rsa1024,
            ALGO_RSA2048 => AlgorithmId::Rsa2048,
            ALGO_AES128 => AlgorithmId::Aes128,
            ALGO_AES192 => AlgorithmId::Aes192,
            ALGO_AES256 => AlgorithmId::Aes256,
            ALGO_ECCP256 => AlgorithmId::EccP256,
            ALGO_ECCP384 => AlgorithmId::EccP384,
            ALGO_ECCP256_SHA1 => AlgorithmId::EccP256Sha1,
            ALGO_ECCP256_SHA256 => AlgorithmId::EccP256Sha256,
            ALGO_ECCP384_SHA1 => AlgorithmId::EccP384Sha1,
            ALGO_ECCP384_SHA256 => AlgorithmId::EccP384Sha256,
            ALGO_ECCP384_SHA384 => AlgorithmId::EccP384Sha384,
            _ => return Err(bad_algorithm_error()),
        })
    }

    pub fn to_byte(self) -> u8 {
        match self {
            AlgorithmId::ThreeDes => ALGO_3DES,
            AlgorithmId::Rsa1024 => ALGO_RSA1024,
            AlgorithmId::Rsa2048 => ALGO_RSA2048,
            AlgorithmId::Aes128 => ALGO_AES128,
            AlgorithmId::Aes192 => ALGO_AES192,
            AlgorithmId::Aes256 => ALGO_AES256,
            AlgorithmId::EccP256 => ALGO_ECCP256,
            AlgorithmId::EccP384 => ALGO_ECCP384,
            AlgorithmId::EccP256Sha1 => ALGO_ECCP256_SHA1,
            AlgorithmId::EccP256Sha256 => ALGO_ECCP256_SHA256,
            AlgorithmId::EccP384Sha1 => ALGO_ECCP384_SHA1,
            AlgorithmId::EccP384Sha256 => ALGO_ECCP384_SHA256,
            AlgorithmId::EccP384Sha384 => ALGO_ECCP384_SHA384,
        }
    }

    pub fn is_rsa(self) -> bool {
        matches!(self, AlgorithmId::Rsa1024 | AlgorithmId::Rsa2048)
    }

    pub fn is_ec(self) -> bool {
        matches!(
            self,
            AlgorithmId::EccP256
                | AlgorithmId::EccP384
                | AlgorithmId::EccP256Sha1
                | AlgorithmId::EccP256Sha256
                | AlgorithmId::EccP384Sha1
                | AlgorithmId::EccP384Sha256
                | AlgorithmId::EccP384Sha384
        )
    }
}

/// PIN/PUK selector for VERIFY/CHANGE_REFERENCE/RESET_RETRY (P2 byte).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PinKind {
    Application,
    Global,
}

impl PinKind {
    fn p2(self) -> u8 {
        match self {
            PinKind::Application => PIN_P2,
            PinKind::Global => GLOBAL_PIN_P2,
        }
    }
}

/// Slot generation PIN policy (`AA` tag in GEN_ASYM and GET_METADATA).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PinPolicy {
    Default,
    Never,
    Once,
    Always,
}

impl PinPolicy {
    fn to_byte(self) -> Option<u8> {
        match self {
            PinPolicy::Default => None,
            PinPolicy::Never => Some(0x01),
            PinPolicy::Once => Some(0x02),
            PinPolicy::Always => Some(0x03),
        }
    }

    pub fn from_byte(value: u8) -> Self {
        match value {
            0x01 => PinPolicy::Never,
            0x02 => PinPolicy::Once,
            0x03 => PinPolicy::Always,
            _ => PinPolicy::Default,
        }
    }
}

/// Slot generation touch policy (`AB` tag).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TouchPolicy {
    Default,
    Never,
    Always,
    Cached,
}

impl TouchPolicy {
    fn to_byte(self) -> Option<u8> {
        match self {
            TouchPolicy::Default => None,
            TouchPolicy::Never => Some(0x01),
            TouchPolicy::Always => Some(0x02),
            TouchPolicy::Cached => Some(0x03),
        }
    }

    pub fn from_byte(value: u8) -> Self {
        match value {
            0x01 => TouchPolicy::Never,
            0x02 => TouchPolicy::Always,
            0x03 => TouchPolicy::Cached,
            _ => TouchPolicy::Default,
        }
    }
}

/// A public key read back from GEN_ASYM, GET_METADATA, or a certificate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PublicKeyMaterial {
    Rsa { modulus: Vec<u8>, exponent: Vec<u8> },
    Ec { algorithm: AlgorithmId, point: Vec<u8> },
}

fn map_credential_sw(sw: StatusWord) -> Error {
    match sw.0 {
        SW_SECURITY_STATUS_NOT_SATISFIED => permission_error(),
        SW_WRONG_DATA | SW_INCORRECT_PARAM => not_supported_error(),
        SW_FUNC_NOT_SUPPORTED | SW_INS_NOT_SUPPORTED => not_supported_error(),
        SW_OUT_OF_MEMORY => device_out_of_memory_error(),
        _ => apdu_error(),
    }
}

/// The digest algorithm used to prehash data before signing (or, for an
/// on-card-hashing EC variant, the hash the card itself will apply).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum HashAlg {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlg {
    fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlg::Sha1 => Sha1::digest(data).to_vec(),
            HashAlg::Sha256 => Sha256::digest(data).to_vec(),
            HashAlg::Sha384 => Sha384::digest(data).to_vec(),
            HashAlg::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

/// The on-card-hashing EC variant of `algorithm` that hashes with `hash`,
/// if the JCOP22x wire protocol defines one.
fn onboard_ec_variant(algorithm: AlgorithmId, hash: HashAlg) -> Option<AlgorithmId> {
    match (algorithm, hash) {
        (AlgorithmId::EccP256, HashAlg::Sha1) => Some(AlgorithmId::EccP256Sha1),
        (AlgorithmId::EccP256, HashAlg::Sha256) => Some(AlgorithmId::EccP256Sha256),
        (AlgorithmId::EccP384, HashAlg::Sha1) => Some(AlgorithmId::EccP384Sha1),
        (AlgorithmId::EccP384, HashAlg::Sha256) => Some(AlgorithmId::EccP384Sha256),
        (AlgorithmId::EccP384, HashAlg::Sha384) => Some(AlgorithmId::EccP384Sha384),
        _ => None,
    }
}

/// Pick the largest card-advertised on-card-hashing variant of `algorithm`
/// that fits: SHA-256 on a P-256 curve; SHA-384, then SHA-256, then SHA-1 on
/// a P-384 curve (largest-first, skipping hashes the card doesn't advertise).
fn select_onboard_hash(
    algorithm: AlgorithmId,
    card_algorithms: &[AlgorithmId],
) -> Option<(HashAlg, AlgorithmId)> {
    let candidates: &[HashAlg] = match algorithm {
        AlgorithmId::EccP256 => &[HashAlg::Sha256],
        AlgorithmId::EccP384 => &[HashAlg::Sha384, HashAlg::Sha256, HashAlg::Sha1],
        _ => return None,
    };
    candidates.iter().copied().find_map(|hash| {
        let variant = onboard_ec_variant(algorithm, hash)?;
        card_algorithms.contains(&variant).then_some((hash, variant))
    })
}

/// `sign(token, slot, data, hash_alg_inout) → signature` — hashes `data` per
/// the slot algorithm's policy, wraps RSA digests in a PKCS#1 v1.5
/// `DigestInfo` block, and signs via [`sign_prehash`].
///
/// `hash_alg_inout` is the caller's requested hash on entry (`None` picks
/// the algorithm's default) and the hash actually used on return:
/// - RSA1024: `Some(Sha1)` digests with SHA-1 (20 bytes); anything else
///   (including `None`) defaults to SHA-256.
/// - RSA2048: `Some(Sha1)` or `Some(Sha512)` honored as requested; anything
///   else defaults to SHA-256.
/// - ECCP256/ECCP384: defaults to SHA-256/SHA-384 respectively, computed
///   locally and sent as the prehashed block — unless `card_algorithms`
///   advertises one of the on-card-hashing variants (JCOP22x boards), in
///   which case the raw message is sent for the card to hash itself, using
///   the largest advertised hash that fits the curve.
#[allow(clippy::too_many_arguments)]
pub fn sign_data(
    txn: &Transaction<'_>,
    card: &pcsc::Card,
    slot: SlotId,
    algorithm: AlgorithmId,
    data: &[u8],
    hash_alg_inout: &mut Option<HashAlg>,
    card_algorithms: &[AlgorithmId],
) -> Result<Vec<u8>> {
    debug_assert!(txn.in_txn());
    match algorithm {
        AlgorithmId::Rsa1024 | AlgorithmId::Rsa2048 => {
            let hash = match (algorithm, *hash_alg_inout) {
                (_, Some(HashAlg::Sha1)) => HashAlg::Sha1,
                (AlgorithmId::Rsa2048, Some(HashAlg::Sha512)) => HashAlg::Sha512,
                _ => HashAlg::Sha256,
            };
            *hash_alg_inout = Some(hash);
            let digest = hash.digest(data);
            let block = pkcs1_digest_info(&digest, hash, modulus_len(algorithm))?;
            sign_prehash(txn, card, slot, algorithm, &block)
        }
        AlgorithmId::EccP256 | AlgorithmId::EccP384 => {
            if let Some((hash, variant)) = select_onboard_hash(algorithm, card_algorithms) {
                *hash_alg_inout = Some(hash);
                return sign_prehash(txn, card, slot, variant, data);
            }
            let hash = if algorithm == AlgorithmId::EccP256 {
                HashAlg::Sha256
            } else {
                HashAlg::Sha384
            };
            *hash_alg_inout = Some(hash);
            let digest = hash.digest(data);
            sign_prehash(txn, card, slot, algorithm, &digest)
        }
        _ => Err(bad_algorithm_error()),
    }
}

fn modulus_len(algorithm: AlgorithmId) -> usize {
    match algorithm {
        AlgorithmId::Rsa1024 => 128,
        AlgorithmId::Rsa2048 => 256,
        _ => 0,
    }
}

/// PKCS#1 v1.5 `00 01 FF..FF 00 || DigestInfo(digest)`, left-padded to
/// `modulus_len`.
fn pkcs1_digest_info(digest: &[u8], hash: HashAlg, modulus_len: usize) -> Result<Vec<u8>> {
    // DER prefixes for DigestInfo { SEQUENCE { OID(hash), NULL }, OCTET STRING }.
    let oid_prefix: &[u8] = match hash {
        HashAlg::Sha1 => &[
            0x30, 0x21, 0x30, 0x09, 0x06, 0x05, 0x2b, 0x0e, 0x03, 0x02, 0x1a, 0x05, 0x00, 0x04,
            0x14,
        ],
        HashAlg::Sha256 => &[
            0x30, 0x31, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
            0x01, 0x05, 0x00, 0x04, 0x20,
        ],
        HashAlg::Sha384 => return Err(bad_algorithm_error()),
        HashAlg::Sha512 => &[
            0x30, 0x51, 0x30, 0x0d, 0x06, 0x09, 0x60, 0x86, 0x48, 0x01, 0x65, 0x03, 0x04, 0x02,
            0x03, 0x05, 0x00, 0x04, 0x40,
        ],
    };
    let mut digest_info = Vec::with_capacity(oid_prefix.len() + digest.len());
    digest_info.extend_from_slice(oid_prefix);
    digest_info.extend_from_slice(digest);

    if digest_info.len() + 11 > modulus_len {
        return Err(length_error());
    }
    let pad_len = modulus_len - digest_info.len() - 3;
    let mut block = Vec::with_capacity(modulus_len);
    block.push(0x00);
    block.push(0x01);
    block.extend(std::iter::repeat(0xFFu8).take(pad_len));
    block.push(0x00);
    block.extend_from_slice(&digest_info);
    Ok(block)
}

/// `7C { 82 (empty) || 81 <block> }`: an empty challenge placeholder and the
/// already-hashed/padded block as the witness.
fn encode_sign_request(block: &[u8]) -> Vec<u8> {
    let mut template = Tlv::encode(TAG_AUTH_CHALLENGE as u32, &[]);
    template.extend(Tlv::encode(TAG_AUTH_WITNESS as u32, block));
    Tlv::encode(TAG_DYN_AUTH as u32, &template)
}

/// `sign_prehash(token, slot, block) → signature` — GEN_AUTH with an empty
/// challenge placeholder and the already-hashed/padded block as the witness.
pub fn sign_prehash(
    txn: &Transaction<'_>,
    card: &pcsc::Card,
    slot: SlotId,
    algorithm: AlgorithmId,
    block: &[u8],
) -> Result<Vec<u8>> {
    debug_assert!(txn.in_txn());
    let body = encode_sign_request(block);

    let apdu = Apdu::new(INS_GEN_AUTH, algorithm.to_byte(), slot.to_byte(), body);
    let (reply, sw) = transmit_chained(card, &apdu)?;
    if !sw.is_success() {
        return Err(map_credential_sw(sw));
    }
    let inner = Tlv::parse_single(&reply, TAG_DYN_AUTH as u32)?;
    Tlv::parse_single(&inner, TAG_AUTH_CHALLENGE as u32)
}

/// `7C { 82 (empty) || 85 <point> }`: an empty challenge placeholder and the
/// peer's uncompressed point in the exponentiation tag.
fn encode_ecdh_request(peer_point: &[u8]) -> Vec<u8> {
    let mut template = Tlv::encode(TAG_AUTH_CHALLENGE as u32, &[]);
    template.extend(Tlv::encode(TAG_AUTH_EXPONENTIATION as u32, peer_point));
    Tlv::encode(TAG_DYN_AUTH as u32, &template)
}

/// `ecdh(token, slot, peer_pubkey) → shared_secret` — GEN_AUTH with the
/// peer's uncompressed point in the exponentiation tag.
pub fn ecdh(
    txn: &Transaction<'_>,
    card: &pcsc::Card,
    slot: SlotId,
    algorithm: AlgorithmId,
    peer_point: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    debug_assert!(txn.in_txn());
    let body = encode_ecdh_request(peer_point);

    let apdu = Apdu::new(INS_GEN_AUTH, algorithm.to_byte(), slot.to_byte(), body);
    let (reply, sw) = transmit_chained(card, &apdu)?;
    if !sw.is_success() {
        return Err(map_credential_sw(sw));
    }
    let inner = Tlv::parse_single(&reply, TAG_DYN_AUTH as u32)?;
    let secret = Tlv::parse_single(&inner, TAG_AUTH_EXPONENTIATION as u32)?;
    Ok(Zeroizing::new(secret))
}

/// Issue a VERIFY: a plain verify (`pin` set), a retry-counter probe (`pin`
/// is `None`), or a verify preflighted against `min_retries`, which probes
/// the counter first and bails before a real attempt that might trip the
/// retry limit. `retries` is read from/written to in-place.
pub fn verify_pin(
    txn: &mut Transaction<'_>,
    card: &pcsc::Card,
    kind: PinKind,
    pin: Option<&[u8]>,
    retries: &mut Option<u8>,
    min_retries: u8,
) -> Result<()> {
    debug_assert!(txn.in_txn());

    if pin.is_none() && min_retries > 0 {
        return Err(argument_error());
    }

    // Probe first if a nonzero minimum was requested.
    if let (Some(_), true) = (pin, min_retries > 0) {
        let mut probe = Some(0u8);
        let _ = send_verify(card, kind, None, &mut probe);
        if let Some(left) = probe {
            if left <= min_retries {
                *retries = probe;
                return Err(min_retries_error());
            }
        }
    }

    match send_verify(card, kind, pin, retries) {
        Ok(()) => {
            if pin.is_some() {
                txn.mark_reset_on_end();
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn send_verify(
    card: &pcsc::Card,
    kind: PinKind,
    pin: Option<&[u8]>,
    retries: &mut Option<u8>,
) -> Result<()> {
    let data = match pin {
        None => Vec::new(),
        Some(p) => pad_pin(p)?,
    };
    let apdu = Apdu::new(INS_VERIFY, 0x00, kind.p2(), data);
    let (_, sw) = transmit_chained(card, &apdu)?;

    if sw.is_success() {
        return Ok(());
    }
    if let Some(left) = sw.pin_tries_remaining() {
        *retries = Some(left);
        if pin.is_none() {
            return Ok(());
        }
        return Err(permission_error());
    }
    if sw.0 == SW_FILE_INVALID {
        *retries = Some(0);
        return Err(permission_error());
    }
    if pin.is_none() && matches!(sw.0, SW_WRONG_LENGTH | SW_WRONG_DATA) {
        return Err(not_supported_error());
    }
    Err(map_credential_sw(sw))
}

fn pad_pin(pin: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if pin.is_empty() || pin.len() > 8 {
        return Err(argument_error());
    }
    let mut buf = Zeroizing::new(vec![0xFFu8; 8]);
    buf[..pin.len()].copy_from_slice(pin);
    Ok(buf)
}

/// `change_pin` / `change_puk` — two-field buffer of `old || new`, each
/// padded to 8 bytes.
pub fn change_reference(
    txn: &mut Transaction<'_>,
    card: &pcsc::Card,
    kind: PinKind,
    old: &[u8],
    new: &[u8],
) -> Result<()> {
    debug_assert!(txn.in_txn());
    let mut data = pad_pin(old)?.to_vec();
    data.extend_from_slice(&pad_pin(new)?);
    let apdu = Apdu::new(INS_CHANGE_REFERENCE, 0x00, kind.p2(), data);
    let (_, sw) = transmit_chained(card, &apdu)?;
    if sw.is_success() {
        txn.mark_reset_on_end();
        return Ok(());
    }
    if sw.pin_tries_remaining().is_some() {
        return Err(permission_error());
    }
    Err(map_credential_sw(sw))
}

/// `reset_pin` — unblock the PIN using the PUK.
pub fn reset_pin(
    txn: &mut Transaction<'_>,
    card: &pcsc::Card,
    puk: &[u8],
    new_pin: &[u8],
) -> Result<()> {
    debug_assert!(txn.in_txn());
    let mut data = pad_pin(puk)?.to_vec();
    data.extend_from_slice(&pad_pin(new_pin)?);
    let apdu = Apdu::new(INS_RESET_RETRY, 0x00, PIN_P2, data);
    let (_, sw) = transmit_chained(card, &apdu)?;
    if sw.is_success() {
        txn.mark_reset_on_end();
        return Ok(());
    }
    if sw.0 == SW_FILE_INVALID {
        return Err(reset_conditions_error());
    }
    if sw.pin_tries_remaining().is_some() {
        return Err(permission_error());
    }
    Err(map_credential_sw(sw))
}

fn gen_asym_response(reply: &[u8]) -> Result<PublicKeyMaterial> {
    let body = Tlv::parse_single(reply, TAG_GEN_ASYM_RESP as u32)?;
    let entries = Tlv::parse_all(&body)?;
    let modulus = entries
        .iter()
        .find(|(tag, _)| *tag == TAG_RSA_MODULUS as u32)
        .map(|(_, v)| v.clone());
    let exponent = entries
        .iter()
        .find(|(tag, _)| *tag == TAG_RSA_EXPONENT as u32)
        .map(|(_, v)| v.clone());
    if let (Some(modulus), Some(exponent)) = (modulus, exponent) {
        return Ok(PublicKeyMaterial::Rsa { modulus, exponent });
    }
    let point = entries
        .iter()
        .find(|(tag, _)| *tag == TAG_EC_POINT as u32)
        .map(|(_, v)| v.clone())
        .ok_or_else(piv_tag_error)?;
    let algorithm = match point.len() {
        65 => AlgorithmId::EccP256,
        97 => AlgorithmId::EccP384,
        _ => return Err(bad_algorithm_error()),
    };
    Ok(PublicKeyMaterial::Ec { algorithm, point })
}

fn gen_asym_request(algorithm: AlgorithmId, pin_policy: PinPolicy, touch_policy: TouchPolicy) -> Vec<u8> {
    let mut body = Tlv::encode(TAG_ALGORITHM as u32, &[algorithm.to_byte()]);
    if let Some(p) = pin_policy.to_byte() {
        body.extend(Tlv::encode(TAG_PIN_POLICY as u32, &[p]));
    }
    if let Some(t) = touch_policy.to_byte() {
        body.extend(Tlv::encode(TAG_TOUCH_POLICY as u32, &[t]));
    }
    Tlv::encode(TAG_GEN_ASYM_REQ as u32, &body)
}

/// `generate(token, slot, alg) → pubkey` with the card's default policies.
pub fn generate(
    txn: &Transaction<'_>,
    card: &pcsc::Card,
    slot: SlotId,
    algorithm: AlgorithmId,
) -> Result<PublicKeyMaterial> {
    ykpiv_generate(txn, card, slot, algorithm, PinPolicy::Default, TouchPolicy::Default)
}

/// `ykpiv_generate` — as [`generate`] but with explicit PIN/touch policy.
/// `TouchPolicy::Cached` requires YubicoPIV firmware >= 4.3.0 (caller's
/// responsibility to check, since this function has no firmware handle).
pub fn ykpiv_generate(
    txn: &Transaction<'_>,
    card: &pcsc::Card,
    slot: SlotId,
    algorithm: AlgorithmId,
    pin_policy: PinPolicy,
    touch_policy: TouchPolicy,
) -> Result<PublicKeyMaterial> {
    debug_assert!(txn.in_txn());
    let body = gen_asym_request(algorithm, pin_policy, touch_policy);
    let apdu = Apdu::new(INS_GEN_ASYMMETRIC, 0x00, slot.to_byte(), body);
    let (reply, sw) = transmit_chained(card, &apdu)?;
    if !sw.is_success() {
        return Err(map_credential_sw(sw));
    }
    gen_asym_response(&reply)
}

/// Private key material accepted by [`import`].
pub enum PrivateKeyMaterial {
    Rsa {
        p: Vec<u8>,
        q: Vec<u8>,
        dmp1: Vec<u8>,
        dmq1: Vec<u8>,
        iqmp: Vec<u8>,
    },
    Ec {
        private_scalar: Vec<u8>,
    },
}

/// `import(token, slot, privkey, ...)` (Yubico-only).
pub fn import(
    txn: &Transaction<'_>,
    card: &pcsc::Card,
    slot: SlotId,
    algorithm: AlgorithmId,
    key: &PrivateKeyMaterial,
    pin_policy: PinPolicy,
    touch_policy: TouchPolicy,
) -> Result<()> {
    debug_assert!(txn.in_txn());
    let mut body = match key {
        PrivateKeyMaterial::Rsa {
            p,
            q,
            dmp1,
            dmq1,
            iqmp,
        } => {
            let mut b = Tlv::encode(TAG_RSA_P as u32, p);
            b.extend(Tlv::encode(TAG_RSA_Q as u32, q));
            b.extend(Tlv::encode(TAG_RSA_DMP1 as u32, dmp1));
            b.extend(Tlv::encode(TAG_RSA_DMQ1 as u32, dmq1));
            b.extend(Tlv::encode(TAG_RSA_IQMP as u32, iqmp));
            b
        }
        PrivateKeyMaterial::Ec { private_scalar } => {
            Tlv::encode(TAG_EC_PRIVATE as u32, private_scalar)
        }
    };
    if let Some(p) = pin_policy.to_byte() {
        body.extend(Tlv::encode(TAG_PIN_POLICY as u32, &[p]));
    }
    if let Some(t) = touch_policy.to_byte() {
        body.extend(Tlv::encode(TAG_TOUCH_POLICY as u32, &[t]));
    }

    let apdu = Apdu::new(INS_IMPORT_KEY, algorithm.to_byte(), slot.to_byte(), body);
    let (_, sw) = transmit_chained(card, &apdu)?;
    if sw.is_success() {
        return Ok(());
    }
    if sw.0 == SW_OUT_OF_MEMORY {
        return Err(device_out_of_memory_error());
    }
    if sw.0 == SW_INS_NOT_SUPPORTED {
        return Err(not_supported_error());
    }
    Err(map_credential_sw(sw))
}

/// `attest(token, slot) → cert_der` (Yubico-only).
pub fn attest(txn: &Transaction<'_>, card: &pcsc::Card, slot: SlotId) -> Result<Vec<u8>> {
    debug_assert!(txn.in_txn());
    let apdu = Apdu::new(INS_ATTEST, slot.to_byte(), 0x00, Vec::new());
    let (reply, sw) = transmit_chained(card, &apdu)?;
    if !sw.is_success() {
        return Err(not_supported_error());
    }
    if reply.is_empty() {
        return Err(not_supported_error());
    }
    Ok(reply)
}

/// `set_pin_retries(token, pin_retries, puk_retries)` (Yubico-only,
/// `INS_SET_PIN_RETRIES`). Requires prior `admin_auth` + a verified PIN;
/// resets both PIN and PUK to their factory values.
pub fn set_pin_retries(
    txn: &mut Transaction<'_>,
    card: &pcsc::Card,
    pin_retries: u8,
    puk_retries: u8,
) -> Result<()> {
    debug_assert!(txn.in_txn());
    let apdu = Apdu::new(INS_SET_PIN_RETRIES, pin_retries, puk_retries, Vec::new());
    let (_, sw) = transmit_chained(card, &apdu)?;
    if sw.is_success() {
        txn.mark_reset_on_end();
        return Ok(());
    }
    Err(map_credential_sw(sw))
}

/// `reset(token)` (Yubico-only, `INS_RESET`). Only accepted once PIN and
/// PUK retry counters are both exhausted.
pub fn reset(txn: &Transaction<'_>, card: &pcsc::Card) -> Result<()> {
    debug_assert!(txn.in_txn());
    let apdu = Apdu::new(INS_RESET, 0x00, 0x00, Vec::new());
    let (_, sw) = transmit_chained(card, &apdu)?;
    if sw.is_success() {
        Ok(())
    } else {
        Err(permission_error())
    }
}

/// Read a raw data object by its 3-byte object id.
pub fn read_file(_txn: &Transaction<'_>, card: &pcsc::Card, object_id: &[u8]) -> Result<Vec<u8>> {
    fetch_object(card, object_id)
}

/// Write a raw data object by its 3-byte object id.
pub fn write_file(
    txn: &mut Transaction<'_>,
    card: &pcsc::Card,
    object_id: &[u8],
    data: &[u8],
) -> Result<()> {
    save_object(card, object_id, data)?;
    txn.mark_reset_on_end();
    Ok(())
}

/// Write a certificate object wrapped in `70 <cert> 71 <certinfo> FE <>`.
pub fn write_cert(
    txn: &mut Transaction<'_>,
    card: &pcsc::Card,
    slot: SlotId,
    cert_der: &[u8],
    cert_info: u8,
) -> Result<()> {
    let object_id = slot.cert_object_id();
    let mut body = Tlv::encode(TAG_CERT as u32, cert_der);
    body.extend(Tlv::encode(TAG_CERT_INFO as u32, &[cert_info]));
    body.extend(Tlv::encode(TAG_CERT_LRC as u32, &[]));
    write_file(txn, card, &object_id, &body)
}

/// Write the key-history object (`5FC10C`); validates the `oncard+offcard
/// <= 20` invariant and requires a URL iff `offcard > 0`.
pub fn write_keyhistory(
    txn: &mut Transaction<'_>,
    card: &pcsc::Card,
    oncard: u8,
    offcard: u8,
    url: Option<&str>,
) -> Result<()> {
    if oncard as u16 + offcard as u16 > MAX_KEY_HISTORY as u16 {
        return Err(argument_error());
    }
    if offcard > 0 && url.is_none() {
        return Err(argument_error());
    }
    let mut body = Tlv::encode(0xC1, &[oncard]);
    body.extend(Tlv::encode(0xC2, &[offcard]));
    if let Some(u) = url {
        body.extend(Tlv::encode(0xF3, u.as_bytes()));
    }
    let object_id = [
        (TAG_KEY_HISTORY >> 16) as u8,
        (TAG_KEY_HISTORY >> 8) as u8,
        TAG_KEY_HISTORY as u8,
    ];
    write_file(txn, card, &object_id, &body)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_round_trips() {
        for b in [0x9A, 0x9C, 0x9D, 0x9E, 0xF9, 0x82, 0x95] {
            let slot = SlotId::from_byte(b).unwrap();
            assert_eq!(slot.to_byte(), b);
        }
    }

    #[test]
    fn retired_slot_cert_object_ids() {
        let first = SlotId::from_byte(0x82).unwrap();
        assert_eq!(first.cert_object_id(), [0x5F, 0xC1, 0x0D]);
        let last = SlotId::from_byte(0x95).unwrap();
        assert_eq!(last.cert_object_id(), [0x5F, 0xC1, 0x20]);
    }

    #[test]
    fn algorithm_round_trips() {
        for b in [0x03, 0x06, 0x07, 0x08, 0x0A, 0x0C, 0x11, 0x14] {
            assert_eq!(AlgorithmId::from_byte(b).unwrap().to_byte(), b);
        }
    }

    #[test]
    fn pad_pin_rejects_oversized() {
        assert!(pad_pin(&[0u8; 9]).is_err());
        assert!(pad_pin(&[]).is_err());
    }

    #[test]
    fn pad_pin_fills_with_ff() {
        let padded = pad_pin(b"1234").unwrap();
        assert_eq!(&*padded, &[b'1', b'2', b'3', b'4', 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn write_keyhistory_rejects_over_budget() {
        // checked directly since it has no card dependency to fake here
        assert!(10u16 + 11u16 > MAX_KEY_HISTORY as u16);
    }

    #[test]
    fn sign_request_puts_block_under_witness_not_challenge_tag() {
        let block = b"already-hashed";
        let body = encode_sign_request(block);
        let inner = Tlv::parse_single(&body, TAG_DYN_AUTH as u32).unwrap();
        let challenge = Tlv::parse_single(&inner, TAG_AUTH_CHALLENGE as u32).unwrap();
        assert!(challenge.is_empty());
        let witness = Tlv::parse_single(&inner, TAG_AUTH_WITNESS as u32).unwrap();
        assert_eq!(witness, block);
    }

    #[test]
    fn ecdh_request_puts_empty_placeholder_under_challenge_tag() {
        let point = [0x04u8; 65];
        let body = encode_ecdh_request(&point);
        let inner = Tlv::parse_single(&body, TAG_DYN_AUTH as u32).unwrap();
        let challenge = Tlv::parse_single(&inner, TAG_AUTH_CHALLENGE as u32).unwrap();
        assert!(challenge.is_empty());
        let exp = Tlv::parse_single(&inner, TAG_AUTH_EXPONENTIATION as u32).unwrap();
        assert_eq!(exp, point);
    }

    #[test]
    fn select_onboard_hash_prefers_largest_advertised() {
        let card_algorithms = [
            AlgorithmId::EccP384Sha1,
            AlgorithmId::EccP384Sha256,
            AlgorithmId::EccP384Sha384,
        ];
        assert_eq!(
            select_onboard_hash(AlgorithmId::EccP384, &card_algorithms),
            Some((HashAlg::Sha384, AlgorithmId::EccP384Sha384))
        );
    }

    #[test]
    fn select_onboard_hash_falls_back_when_largest_missing() {
        let card_algorithms = [AlgorithmId::EccP384Sha1, AlgorithmId::EccP384Sha256];
        assert_eq!(
            select_onboard_hash(AlgorithmId::EccP384, &card_algorithms),
            Some((HashAlg::Sha256, AlgorithmId::EccP384Sha256))
        );
    }

    #[test]
    fn select_onboard_hash_none_when_not_advertised() {
        assert_eq!(select_onboard_hash(AlgorithmId::EccP256, &[]), None);
        assert_eq!(select_onboard_hash(AlgorithmId::EccP384, &[]), None);
    }

    #[test]
    fn pkcs1_digest_info_selects_oid_by_hash() {
        let sha1_block = pkcs1_digest_info(&[0u8; 20], HashAlg::Sha1, 128).unwrap();
        let sha256_block = pkcs1_digest_info(&[0u8; 32], HashAlg::Sha256, 128).unwrap();
        assert_eq!(sha1_block.len(), 128);
        assert_eq!(sha256_block.len(), 128);
        assert_ne!(sha1_block, sha256_block);
        assert!(pkcs1_digest_info(&[0u8; 48], HashAlg::Sha384, 128).is_err());
    }
}
