//! Self-describing ECDH "box": seals data to the public key of a PIV slot
//! (or any EC public key) using ephemeral-static ECDH plus an AEAD cipher,
//! and unseals it either through the holding token or offline with the raw
//! private key.
//!
//! Binary layout is a flat field sequence, not BER-TLV, so it is framed by
//! hand with [`Reader`]/[`Writer`] rather than [`crate::serialization::Tlv`].

use elliptic_curve::sec1::ToEncodedPoint;
use rand_core::{OsRng, RngCore};
use zeroize::Zeroizing;

use crate::{
    error::{ctor::*, Result},
    piv::{AlgorithmId, SlotId},
    YubiKey,
};

const MAGIC: [u8; 2] = [0xB0, 0xC5];
const LEGACY_TAG: u8 = 0x01;
const MIN_VERSION: u8 = 1;
const MAX_VERSION: u8 = 3;

/// The two curves this box format supports.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Curve {
    P256,
    P384,
}

impl Curve {
    pub fn field_size(self) -> usize {
        match self {
            Curve::P256 => 32,
            Curve::P384 => 48,
        }
    }

    /// Length of an uncompressed SEC1 point: `1 + 2 * field_size`.
    pub fn point_len(self) -> usize {
        1 + 2 * self.field_size()
    }

    pub fn name(self) -> &'static str {
        match self {
            Curve::P256 => "P-256",
            Curve::P384 => "P-384",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "P-256" => Ok(Curve::P256),
            "P-384" => Ok(Curve::P384),
            _ => Err(curve_error()),
        }
    }

    pub fn from_point_len(len: usize) -> Result<Self> {
        match len {
            65 => Ok(Curve::P256),
            97 => Ok(Curve::P384),
            _ => Err(curve_error()),
        }
    }

    fn from_algorithm(algorithm: AlgorithmId) -> Result<Self> {
        match algorithm {
            AlgorithmId::EccP256 => Ok(Curve::P256),
            AlgorithmId::EccP384 => Ok(Curve::P384),
            _ => Err(bad_algorithm_error()),
        }
    }
}

/// An uncompressed EC public key, tagged with its curve.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EcPublicKey {
    pub curve: Curve,
    pub point: Vec<u8>,
}

impl EcPublicKey {
    pub fn new(curve: Curve, point: Vec<u8>) -> Result<Self> {
        let key = EcPublicKey { curve, point };
        key.validate()?;
        Ok(key)
    }

    fn validate(&self) -> Result<()> {
        if self.point.len() != self.curve.point_len() || self.point.first() != Some(&0x04) {
            return Err(curve_error());
        }
        Ok(())
    }
}

/// An EC private scalar, tagged with its curve. Zeroized on drop.
#[derive(Clone, Debug)]
pub struct EcPrivateKey {
    pub curve: Curve,
    pub scalar: Zeroizing<Vec<u8>>,
}

impl EcPrivateKey {
    pub fn new(curve: Curve, scalar: Vec<u8>) -> Self {
        EcPrivateKey {
            curve,
            scalar: Zeroizing::new(scalar),
        }
    }

    pub fn public_key(&self) -> Result<EcPublicKey> {
        match self.curve {
            Curve::P256 => {
                let sk = p256::SecretKey::from_slice(&self.scalar).map_err(|_| curve_error())?;
                let point = sk.public_key().to_encoded_point(false);
                EcPublicKey::new(Curve::P256, point.as_bytes().to_vec())
            }
            Curve::P384 => {
                let sk = p384::SecretKey::from_slice(&self.scalar).map_err(|_| curve_error())?;
                let point = sk.public_key().to_encoded_point(false);
                EcPublicKey::new(Curve::P384, point.as_bytes().to_vec())
            }
        }
    }
}

fn ephemeral_keypair(curve: Curve) -> Result<(EcPrivateKey, EcPublicKey)> {
    match curve {
        Curve::P256 => {
            let sk = p256::SecretKey::random(&mut OsRng);
            let point = sk.public_key().to_encoded_point(false);
            let privkey = EcPrivateKey::new(Curve::P256, sk.to_bytes().to_vec());
            let pubkey = EcPublicKey::new(Curve::P256, point.as_bytes().to_vec())?;
            Ok((privkey, pubkey))
        }
        Curve::P384 => {
            let sk = p384::SecretKey::random(&mut OsRng);
            let point = sk.public_key().to_encoded_point(false);
            let privkey = EcPrivateKey::new(Curve::P384, sk.to_bytes().to_vec());
            let pubkey = EcPublicKey::new(Curve::P384, point.as_bytes().to_vec())?;
            Ok((privkey, pubkey))
        }
    }
}

/// Raw ECDH: `priv.curve` and `peer.curve` must match.
fn ecdh_raw(private: &EcPrivateKey, peer: &EcPublicKey) -> Result<Zeroizing<Vec<u8>>> {
    if private.curve != peer.curve {
        return Err(curve_error());
    }
    match private.curve {
        Curve::P256 => {
            let sk = p256::SecretKey::from_slice(&private.scalar).map_err(|_| curve_error())?;
            let pk = p256::PublicKey::from_sec1_bytes(&peer.point).map_err(|_| curve_error())?;
            let shared = p256::elliptic_curve::ecdh::diffie_hellman(
                sk.to_nonzero_scalar(),
                pk.as_affine(),
            );
            Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
        }
        Curve::P384 => {
            let sk = p384::SecretKey::from_slice(&private.scalar).map_err(|_| curve_error())?;
            let pk = p384::PublicKey::from_sec1_bytes(&peer.point).map_err(|_| curve_error())?;
            let shared = p384::elliptic_curve::ecdh::diffie_hellman(
                sk.to_nonzero_scalar(),
                pk.as_affine(),
            );
            Ok(Zeroizing::new(shared.raw_secret_bytes().to_vec()))
        }
    }
}

/// An AEAD cipher's parameters.
#[derive(Copy, Clone, Debug)]
pub struct CipherSuite {
    pub name: &'static str,
    pub key_len: usize,
    pub iv_len: usize,
    pub auth_len: usize,
    pub block_len: usize,
}

const CIPHER_SUITES: &[CipherSuite] = &[
    CipherSuite { name: "chacha20-poly1305", key_len: 32, iv_len: 12, auth_len: 16, block_len: 8 },
    CipherSuite { name: "aes128-gcm", key_len: 16, iv_len: 12, auth_len: 16, block_len: 16 },
    CipherSuite { name: "aes192-gcm", key_len: 24, iv_len: 12, auth_len: 16, block_len: 16 },
    CipherSuite { name: "aes256-gcm", key_len: 32, iv_len: 12, auth_len: 16, block_len: 16 },
];

impl CipherSuite {
    pub fn lookup(name: &str) -> Result<Self> {
        CIPHER_SUITES
            .iter()
            .find(|c| c.name == name)
            .copied()
            .ok_or_else(bad_algorithm_error)
    }
}

/// A KDF's digest length, used to truncate the derived key.
#[derive(Copy, Clone, Debug)]
pub struct KdfSuite {
    pub name: &'static str,
    pub digest_len: usize,
}

const KDF_SUITES: &[KdfSuite] = &[
    KdfSuite { name: "sha256", digest_len: 32 },
    KdfSuite { name: "sha384", digest_len: 48 },
    KdfSuite { name: "sha512", digest_len: 64 },
];

impl KdfSuite {
    pub fn lookup(name: &str) -> Result<Self> {
        KDF_SUITES
            .iter()
            .find(|k| k.name == name)
            .copied()
            .ok_or_else(bad_algorithm_error)
    }
}

fn kdf_derive(kdf: KdfSuite, cipher: CipherSuite, shared: &[u8], nonce: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    use sha2::{Digest, Sha256, Sha384, Sha512};

    if kdf.digest_len < cipher.key_len {
        return Err(bad_algorithm_error());
    }
    let mut input = Vec::with_capacity(shared.len() + nonce.len());
    input.extend_from_slice(shared);
    input.extend_from_slice(nonce);

    let digest = match kdf.name {
        "sha256" => Sha256::digest(&input).to_vec(),
        "sha384" => Sha384::digest(&input).to_vec(),
        "sha512" => Sha512::digest(&input).to_vec(),
        _ => return Err(bad_algorithm_error()),
    };
    Ok(Zeroizing::new(digest[..cipher.key_len].to_vec()))
}

/// PKCS#7-pad `data` to a multiple of `block_len` (`block_len` itself if
/// `data.len()` is already a multiple).
pub fn pkcs7_pad(data: &[u8], block_len: usize) -> Vec<u8> {
    let pad = block_len - (data.len() % block_len);
    let mut out = Vec::with_capacity(data.len() + pad);
    out.extend_from_slice(data);
    out.extend(std::iter::repeat(pad as u8).take(pad));
    out
}

/// Strip PKCS#7 padding, validating the pad length and every pad byte.
pub fn pkcs7_unpad(data: &[u8], block_len: usize) -> Result<Zeroizing<Vec<u8>>> {
    let pad = match data.last() {
        Some(&b) => b as usize,
        None => return Err(padding_error()),
    };
    if pad == 0 || pad > block_len || pad > data.len() {
        return Err(padding_error());
    }
    if !data[data.len() - pad..].iter().all(|&b| b as usize == pad) {
        return Err(padding_error());
    }
    Ok(Zeroizing::new(data[..data.len() - pad].to_vec()))
}

fn aead_encrypt(cipher: CipherSuite, key: &[u8], iv: &[u8], padded: &[u8]) -> Result<Vec<u8>> {
    match cipher.name {
        "chacha20-poly1305" => {
            use chacha20poly1305::{
                aead::{Aead, KeyInit},
                ChaCha20Poly1305, Key, Nonce,
            };
            let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
            cipher
                .encrypt(Nonce::from_slice(iv), padded)
                .map_err(|_| invalid_data_error())
        }
        "aes128-gcm" | "aes256-gcm" => {
            use aes_gcm::{
                aead::{Aead, KeyInit},
                Aes128Gcm, Aes256Gcm, Nonce,
            };
            let nonce = Nonce::from_slice(iv);
            match cipher.name {
                "aes128-gcm" => Aes128Gcm::new_from_slice(key)
                    .map_err(|_| invalid_data_error())?
                    .encrypt(nonce, padded)
                    .map_err(|_| invalid_data_error()),
                _ => Aes256Gcm::new_from_slice(key)
                    .map_err(|_| invalid_data_error())?
                    .encrypt(nonce, padded)
                    .map_err(|_| invalid_data_error()),
            }
        }
        "aes192-gcm" => {
            use aes_gcm::{
                aead::{generic_array::typenum::U12, Aead, KeyInit},
                aes::Aes192,
                AesGcm, Nonce,
            };
            type Aes192Gcm = AesGcm<Aes192, U12>;
            Aes192Gcm::new_from_slice(key)
                .map_err(|_| invalid_data_error())?
                .encrypt(Nonce::from_slice(iv), padded)
                .map_err(|_| invalid_data_error())
        }
        _ => Err(bad_algorithm_error()),
    }
}

/// AEAD-decrypt, mapping authentication-tag failure to `ErrorKind`'s
/// `PaddingError` variant: there is no dedicated "authentication failed"
/// kind, so ciphertext that doesn't authenticate is folded into the same
/// structural-check surface as a bad pad.
fn aead_decrypt(cipher: CipherSuite, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let padded = match cipher.name {
        "chacha20-poly1305" => {
            use chacha20poly1305::{
                aead::{Aead, KeyInit},
                ChaCha20Poly1305, Key, Nonce,
            };
            let cipher = ChaCha20Poly1305::new(Key::from_slice(key));
            cipher
                .decrypt(Nonce::from_slice(iv), ciphertext)
                .map_err(|_| padding_error())?
        }
        "aes128-gcm" | "aes256-gcm" => {
            use aes_gcm::{
                aead::{Aead, KeyInit},
                Aes128Gcm, Aes256Gcm, Nonce,
            };
            let nonce = Nonce::from_slice(iv);
            match cipher.name {
                "aes128-gcm" => Aes128Gcm::new_from_slice(key)
                    .map_err(|_| invalid_data_error())?
                    .decrypt(nonce, ciphertext)
                    .map_err(|_| padding_error())?,
                _ => Aes256Gcm::new_from_slice(key)
                    .map_err(|_| invalid_data_error())?
                    .decrypt(nonce, ciphertext)
                    .map_err(|_| padding_error())?,
            }
        }
        "aes192-gcm" => {
            use aes_gcm::{
                aead::{generic_array::typenum::U12, Aead, KeyInit},
                aes::Aes192,
                AesGcm, Nonce,
            };
            type Aes192Gcm = AesGcm<Aes192, U12>;
            Aes192Gcm::new_from_slice(key)
                .map_err(|_| invalid_data_error())?
                .decrypt(Nonce::from_slice(iv), ciphertext)
                .map_err(|_| padding_error())?
        }
        _ => return Err(bad_algorithm_error()),
    };
    Ok(Zeroizing::new(padded))
}

/// A sealed (or, once opened, unsealed) envelope. All fields are populated
/// by [`seal`]; `plaintext` is filled in by `open_*`.
#[derive(Clone, Debug)]
pub struct SealedBox {
    pub version: u8,
    pub guid: Option<[u8; 16]>,
    pub slot: Option<SlotId>,
    pub recipient: EcPublicKey,
    pub ephemeral: EcPublicKey,
    pub cipher_name: String,
    pub kdf_name: String,
    pub nonce: Option<Vec<u8>>,
    pub iv: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub plaintext: Option<Zeroizing<Vec<u8>>>,
}

impl SealedBox {
    /// True once [`open_offline`]/[`open_online`] has filled `plaintext`.
    pub fn is_open(&self) -> bool {
        self.plaintext.is_some()
    }

    fn require_open(&self) -> Result<&Zeroizing<Vec<u8>>> {
        self.plaintext.as_ref().ok_or_else(box_sealed)
    }
}

/// Parameters controlling [`seal`]; `Default` is `chacha20-poly1305` /
/// `sha512` at the latest format version.
#[derive(Clone, Debug)]
pub struct SealOptions {
    pub version: u8,
    pub cipher_name: String,
    pub kdf_name: String,
}

impl Default for SealOptions {
    fn default() -> Self {
        SealOptions {
            version: MAX_VERSION,
            cipher_name: "chacha20-poly1305".to_owned(),
            kdf_name: "sha512".to_owned(),
        }
    }
}

/// Seal `plaintext` to `recipient`, generating a fresh ephemeral keypair.
/// This never touches a smartcard; see [`seal_to_token`] for attaching the
/// recipient token's GUID/slot so [`find_recipient_token`] can locate it
/// again later.
pub fn seal(recipient: &EcPublicKey, plaintext: &[u8], opts: &SealOptions) -> Result<SealedBox> {
    if !(MIN_VERSION..=MAX_VERSION).contains(&opts.version) {
        return Err(version_error());
    }
    let cipher = CipherSuite::lookup(&opts.cipher_name)?;
    let kdf = KdfSuite::lookup(&opts.kdf_name)?;
    if cipher.auth_len == 0 {
        return Err(bad_algorithm_error());
    }

    let (ephemeral_priv, ephemeral_pub) = ephemeral_keypair(recipient.curve)?;
    let shared = ecdh_raw(&ephemeral_priv, recipient)?;

    let nonce = if opts.version >= 2 {
        let mut n = vec![0u8; 16];
        OsRng.fill_bytes(&mut n);
        Some(n)
    } else {
        None
    };
    let nonce_bytes = nonce.as_deref().unwrap_or(&[]);

    let key = kdf_derive(kdf, cipher, &shared, nonce_bytes)?;

    let mut iv = vec![0u8; cipher.iv_len];
    OsRng.fill_bytes(&mut iv);

    let mut padded = pkcs7_pad(plaintext, cipher.block_len);
    let ciphertext = aead_encrypt(cipher, &key, &iv, &padded)?;
    zeroize::Zeroize::zeroize(&mut padded);

    Ok(SealedBox {
        version: opts.version,
        guid: None,
        slot: None,
        recipient: recipient.clone(),
        ephemeral: ephemeral_pub,
        cipher_name: opts.cipher_name.clone(),
        kdf_name: opts.kdf_name.clone(),
        nonce,
        iv,
        ciphertext,
        plaintext: None,
    })
}

/// Seal to the public key held by `slot` on `token`, tagging the box with
/// the token's GUID and the slot id so [`find_recipient_token`] can find it
/// again. Requires the slot to already carry a certificate.
pub fn seal_to_token(
    token: &mut YubiKey,
    slot: SlotId,
    plaintext: &[u8],
    opts: &SealOptions,
) -> Result<SealedBox> {
    let entry = token.read_cert(slot)?;
    let pk = entry.public_key.as_ref().ok_or_else(not_found_error)?;
    let recipient = match pk {
        crate::piv::PublicKeyMaterial::Ec { algorithm, point } => {
            EcPublicKey::new(Curve::from_algorithm(*algorithm)?, point.clone())?
        }
        crate::piv::PublicKeyMaterial::Rsa { .. } => return Err(bad_algorithm_error()),
    };

    let mut sealed = seal(&recipient, plaintext, opts)?;
    sealed.guid = token.guid();
    sealed.slot = Some(slot);
    Ok(sealed)
}

fn reconstruct(cipher: CipherSuite, kdf: KdfSuite, box_: &SealedBox, shared: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if box_.iv.len() != cipher.iv_len {
        return Err(length_error());
    }
    if box_.ciphertext.len() < cipher.block_len + cipher.auth_len {
        return Err(length_error());
    }
    let nonce_bytes = box_.nonce.as_deref().unwrap_or(&[]);
    let key = kdf_derive(kdf, cipher, shared, nonce_bytes)?;
    let padded = aead_decrypt(cipher, &key, &box_.iv, &box_.ciphertext)?;
    pkcs7_unpad(&padded, cipher.block_len)
}

/// Open `box_` with the raw recipient private key; does not touch a
/// smartcard.
pub fn open_offline(box_: &SealedBox, recipient: &EcPrivateKey) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = CipherSuite::lookup(&box_.cipher_name)?;
    let kdf = KdfSuite::lookup(&box_.kdf_name)?;
    let shared = ecdh_raw(recipient, &box_.ephemeral)?;
    reconstruct(cipher, kdf, box_, &shared)
}

/// Open `box_` through the token holding `slot`'s private key, via
/// [`YubiKey::ecdh`].
pub fn open_online(token: &mut YubiKey, box_: &SealedBox, slot: SlotId, algorithm: AlgorithmId) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = CipherSuite::lookup(&box_.cipher_name)?;
    let kdf = KdfSuite::lookup(&box_.kdf_name)?;
    let shared = token.ecdh(slot, algorithm, &box_.ephemeral.point)?;
    reconstruct(cipher, kdf, box_, &shared)
}

/// Record `plaintext` (as produced by [`open_offline`]/[`open_online`]) onto
/// `box_`, so [`SealedBox::is_open`] and [`opened_plaintext`] reflect it.
pub fn unseal(box_: &mut SealedBox, plaintext: Zeroizing<Vec<u8>>) {
    box_.plaintext = Some(plaintext);
}

/// Read the opened plaintext, or `BoxSealed` if `open_*` hasn't run yet.
pub fn opened_plaintext(box_: &SealedBox) -> Result<&Zeroizing<Vec<u8>>> {
    box_.require_open()
}

/// The slot algorithm that would hold a key on `curve`, for callers of
/// [`open_online`] that only have a [`SealedBox`] (and so a curve) in hand.
pub fn algorithm_for_curve(curve: Curve) -> AlgorithmId {
    match curve {
        Curve::P256 => AlgorithmId::EccP256,
        Curve::P384 => AlgorithmId::EccP384,
    }
}

/// Search policy for locating the holding token: GUID match (with a hard pubkey cross-check),
/// then a slot-9D/named-slot probe across every token, then a full catalog
/// scan of whichever tokens haven't had one yet. Returns the index into
/// `tokens` of the first match.
pub fn find_recipient_token(tokens: &mut [YubiKey], box_: &SealedBox) -> Result<usize> {
    let target_slot = box_.slot.unwrap_or(SlotId::KeyManagement);

    if let Some(guid) = box_.guid {
        if let Some(idx) = tokens.iter().position(|t| t.guid() == Some(guid)) {
            let entry = tokens[idx].read_cert(target_slot)?;
            let matches = entry
                .public_key
                .as_ref()
                .is_some_and(|pk| matches!(pk, crate::piv::PublicKeyMaterial::Ec { point, .. } if *point == box_.recipient.point));
            if !matches {
                return Err(keys_not_equal_error());
            }
            return Ok(idx);
        }
    }

    for (idx, token) in tokens.iter_mut().enumerate() {
        if let Ok(entry) = token.read_cert(target_slot) {
            if entry
                .public_key
                .as_ref()
                .is_some_and(|pk| matches!(pk, crate::piv::PublicKeyMaterial::Ec { point, .. } if *point == box_.recipient.point))
            {
                return Ok(idx);
            }
        }
    }

    for (idx, token) in tokens.iter_mut().enumerate() {
        if token.did_read_all_certs() {
            continue;
        }
        let slots = token.read_all_certs()?;
        let found = slots.iter().any(|s| {
            s.public_key
                .as_ref()
                .is_some_and(|pk| matches!(pk, crate::piv::PublicKeyMaterial::Ec { point, .. } if *point == box_.recipient.point))
        });
        if found {
            return Ok(idx);
        }
    }

    Err(not_found_error())
}

// --- binary format ---------------------------------------------------

/// A cursor over a decode buffer. All multi-byte integers are big-endian.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or_else(length_error)?;
        let slice = self.buf.get(self.pos..end).ok_or_else(length_error)?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// `u8`-length-prefixed byte string.
    fn string8(&mut self) -> Result<&'a [u8]> {
        let len = self.u8()? as usize;
        self.take(len)
    }

    /// `u32`-length-prefixed byte string.
    fn string32(&mut self) -> Result<&'a [u8]> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn cstring8(&mut self) -> Result<String> {
        String::from_utf8(self.string8()?.to_vec()).map_err(|_| invalid_data_error())
    }

    fn cstring32(&mut self) -> Result<String> {
        String::from_utf8(self.string32()?.to_vec()).map_err(|_| invalid_data_error())
    }
}

fn write_string8(out: &mut Vec<u8>, data: &[u8]) -> Result<()> {
    if data.len() > u8::MAX as usize {
        return Err(length_error());
    }
    out.push(data.len() as u8);
    out.extend_from_slice(data);
    Ok(())
}

fn write_string32(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
}

/// Encode as the current-generation (`v2`/`v3`) binary format.
pub fn encode(box_: &SealedBox) -> Result<Vec<u8>> {
    if !(MIN_VERSION..=MAX_VERSION).contains(&box_.version) {
        return Err(version_error());
    }
    if box_.recipient.curve != box_.ephemeral.curve {
        return Err(curve_error());
    }

    let mut out = Vec::new();
    out.extend_from_slice(&MAGIC);
    out.push(box_.version);

    match (box_.guid, box_.slot) {
        (Some(guid), Some(slot)) => {
            out.push(1);
            write_string8(&mut out, &guid)?;
            out.push(slot.to_byte());
        }
        _ => {
            out.push(0);
            write_string8(&mut out, &[])?;
            out.push(0);
        }
    }

    write_string8(&mut out, box_.cipher_name.as_bytes())?;
    write_string8(&mut out, box_.kdf_name.as_bytes())?;

    if box_.version >= 2 {
        write_string8(&mut out, box_.nonce.as_deref().unwrap_or(&[]))?;
    }

    write_string8(&mut out, box_.recipient.curve.name().as_bytes())?;
    write_string8(&mut out, &box_.recipient.point)?;
    write_string8(&mut out, &box_.ephemeral.point)?;
    write_string8(&mut out, &box_.iv)?;
    write_string32(&mut out, &box_.ciphertext);

    Ok(out)
}

fn decode_current(mut r: Reader<'_>) -> Result<SealedBox> {
    let version = r.u8()?;
    if !(MIN_VERSION..=MAX_VERSION).contains(&version) {
        return Err(version_error());
    }

    let guidslot_flag = r.u8()?;
    let guid_bytes = r.string8()?;
    let slot_byte = r.u8()?;
    let (guid, slot) = if guidslot_flag != 0 {
        if guid_bytes.len() != 16 {
            return Err(length_error());
        }
        let mut g = [0u8; 16];
        g.copy_from_slice(guid_bytes);
        (Some(g), Some(SlotId::from_byte(slot_byte)?))
    } else {
        (None, None)
    };

    let cipher_name = r.cstring8()?;
    let kdf_name = r.cstring8()?;
    let nonce = if version >= 2 {
        Some(r.string8()?.to_vec())
    } else {
        None
    };

    let curve = Curve::from_name(&r.cstring8()?)?;
    let recipient = EcPublicKey::new(curve, r.string8()?.to_vec())?;
    let ephemeral = EcPublicKey::new(curve, r.string8()?.to_vec())?;
    let iv = r.string8()?.to_vec();
    let ciphertext = r.string32()?.to_vec();

    Ok(SealedBox {
        version,
        guid,
        slot,
        recipient,
        ephemeral,
        cipher_name,
        kdf_name,
        nonce,
        iv,
        ciphertext,
        plaintext: None,
    })
}

/// SSH-wire key blob: `cstring32(algo_name) || cstring32(curve_name) ||
/// string32(point)`. Hand-framed rather than built on the `ssh_key` crate,
/// since the legacy box only ever stores these three raw fields.
fn decode_ssh_ec_point(r: &mut Reader<'_>) -> Result<EcPublicKey> {
    let _algo_name = r.cstring32()?;
    let curve_name = r.cstring32()?;
    let curve = match curve_name.as_str() {
        "nistp256" => Curve::P256,
        "nistp384" => Curve::P384,
        _ => return Err(curve_error()),
    };
    let point = r.string32()?.to_vec();
    EcPublicKey::new(curve, point)
}

fn write_ssh_ec_point(out: &mut Vec<u8>, key: &EcPublicKey) {
    let algo_name = match key.curve {
        Curve::P256 => "ecdsa-sha2-nistp256",
        Curve::P384 => "ecdsa-sha2-nistp384",
    };
    let curve_name = match key.curve {
        Curve::P256 => "nistp256",
        Curve::P384 => "nistp384",
    };
    write_string32(out, algo_name.as_bytes());
    write_string32(out, curve_name.as_bytes());
    write_string32(out, &key.point);
}

fn decode_legacy(mut r: Reader<'_>) -> Result<SealedBox> {
    let guid_bytes = r.string32()?;
    let (guid, slot) = if guid_bytes.len() == 16 {
        let mut g = [0u8; 16];
        g.copy_from_slice(guid_bytes);
        let slot_byte = r.u8()?;
        (Some(g), Some(SlotId::from_byte(slot_byte)?))
    } else if guid_bytes.is_empty() {
        let slot_byte = r.u8()?;
        let _ = slot_byte;
        (None, None)
    } else {
        return Err(length_error());
    };

    let ephemeral = decode_ssh_ec_point(&mut r)?;
    let recipient = decode_ssh_ec_point(&mut r)?;
    if ephemeral.curve != recipient.curve {
        return Err(curve_error());
    }

    let cipher_name = r.cstring32()?;
    let kdf_name = r.cstring32()?;
    let iv = r.string32()?.to_vec();
    let ciphertext = r.string32()?.to_vec();

    Ok(SealedBox {
        version: 1,
        guid,
        slot,
        recipient,
        ephemeral,
        cipher_name,
        kdf_name,
        nonce: None,
        iv,
        ciphertext,
        plaintext: None,
    })
}

fn encode_legacy(box_: &SealedBox) -> Result<Vec<u8>> {
    if box_.recipient.curve != box_.ephemeral.curve {
        return Err(curve_error());
    }
    let mut out = vec![LEGACY_TAG];
    match box_.guid {
        Some(guid) => write_string32(&mut out, &guid),
        None => write_string32(&mut out, &[]),
    }
    out.push(box_.slot.map(SlotId::to_byte).unwrap_or(0));
    write_ssh_ec_point(&mut out, &box_.ephemeral);
    write_ssh_ec_point(&mut out, &box_.recipient);

    if box_.cipher_name.len() > u32::MAX as usize || box_.kdf_name.len() > u32::MAX as usize {
        return Err(length_error());
    }
    write_string32(&mut out, box_.cipher_name.as_bytes());
    write_string32(&mut out, box_.kdf_name.as_bytes());
    write_string32(&mut out, &box_.iv);
    write_string32(&mut out, &box_.ciphertext);
    Ok(out)
}

/// Decode either binary variant: `0xB0 0xC5`-prefixed current format, or
/// the legacy `0x01`-prefixed SSH-blob format.
pub fn decode(buf: &[u8]) -> Result<SealedBox> {
    if buf.len() >= 2 && buf[0..2] == MAGIC {
        decode_current(Reader::new(&buf[2..]))
    } else if buf.first() == Some(&LEGACY_TAG) {
        decode_legacy(Reader::new(&buf[1..]))
    } else {
        Err(magic_error())
    }
}

/// Encode `box_` as the current (v2/v3) format if `box_.version >= 2`,
/// else the legacy v1 format.
pub fn encode_auto(box_: &SealedBox) -> Result<Vec<u8>> {
    if box_.version == 1 {
        encode_legacy(box_)
    } else {
        encode(box_)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_box(version: u8) -> SealedBox {
        let recipient = EcPublicKey::new(Curve::P256, vec![0x04u8; 65]).unwrap();
        let ephemeral = EcPublicKey::new(Curve::P256, vec![0x04u8; 65]).unwrap();
        SealedBox {
            version,
            guid: Some([0x11; 16]),
            slot: Some(SlotId::KeyManagement),
            recipient,
            ephemeral,
            cipher_name: "chacha20-poly1305".to_owned(),
            kdf_name: "sha512".to_owned(),
            nonce: if version >= 2 { Some(vec![0x22; 16]) } else { None },
            iv: vec![0x33; 12],
            ciphertext: vec![0x44; 24],
            plaintext: None,
        }
    }

    #[test]
    fn pkcs7_pad_and_unpad_round_trip() {
        for len in 0..20 {
            let data = vec![0xAAu8; len];
            let padded = pkcs7_pad(&data, 8);
            assert_eq!(padded.len() % 8, 0);
            let unpadded = pkcs7_unpad(&padded, 8).unwrap();
            assert_eq!(&*unpadded, &data);
        }
    }

    #[test]
    fn pkcs7_unpad_rejects_bad_pad_byte() {
        let mut padded = pkcs7_pad(b"hello", 8);
        let last = padded.len() - 1;
        padded[last] = 0;
        assert!(pkcs7_unpad(&padded, 8).is_err());
    }

    #[test]
    fn pkcs7_unpad_rejects_inconsistent_pad_bytes() {
        let mut padded = pkcs7_pad(b"hello world", 8);
        let last = padded.len() - 1;
        padded[last - 1] ^= 0xFF;
        assert!(pkcs7_unpad(&padded, 8).is_err());
    }

    #[test]
    fn cipher_suite_lookup_known_and_unknown() {
        assert_eq!(CipherSuite::lookup("chacha20-poly1305").unwrap().key_len, 32);
        assert_eq!(CipherSuite::lookup("aes256-gcm").unwrap().key_len, 32);
        assert!(CipherSuite::lookup("rot13").is_err());
    }

    #[test]
    fn kdf_suite_lookup_known_and_unknown() {
        assert_eq!(KdfSuite::lookup("sha256").unwrap().digest_len, 32);
        assert!(KdfSuite::lookup("md5").is_err());
    }

    #[test]
    fn curve_from_point_len() {
        assert_eq!(Curve::from_point_len(65).unwrap(), Curve::P256);
        assert_eq!(Curve::from_point_len(97).unwrap(), Curve::P384);
        assert!(Curve::from_point_len(33).is_err());
    }

    #[test]
    fn encode_decode_round_trips_v3() {
        let box_ = sample_box(3);
        let encoded = encode(&box_).unwrap();
        assert_eq!(&encoded[0..2], &MAGIC);
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.version, 3);
        assert_eq!(decoded.guid, box_.guid);
        assert_eq!(decoded.slot, box_.slot);
        assert_eq!(decoded.nonce, box_.nonce);
        assert_eq!(decoded.ciphertext, box_.ciphertext);
    }

    #[test]
    fn encode_decode_round_trips_v1_no_nonce_field() {
        let box_ = sample_box(1);
        let encoded = encode(&box_).unwrap();
        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.version, 1);
        assert!(decoded.nonce.is_none());
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut encoded = encode(&sample_box(2)).unwrap();
        encoded[0] = 0x00;
        assert!(decode(&encoded).is_err());
    }

    #[test]
    fn legacy_format_round_trips_and_is_distinguished_by_first_byte() {
        let box_ = sample_box(1);
        let encoded = encode_legacy(&box_).unwrap();
        assert_eq!(encoded[0], LEGACY_TAG);
        assert_ne!(&encoded[0..2], &MAGIC);

        let decoded = decode(&encoded).unwrap();
        assert_eq!(decoded.version, 1);
        assert_eq!(decoded.guid, box_.guid);
        assert_eq!(decoded.slot, box_.slot);
        assert_eq!(decoded.cipher_name, box_.cipher_name);
        assert_eq!(decoded.ciphertext, box_.ciphertext);
    }

    #[test]
    fn seal_open_round_trip_chacha20_p256() {
        let (priv_key, pub_key) = ephemeral_keypair(Curve::P256).unwrap();
        let plaintext = b"attack at dawn, bring the whole fleet".to_vec();
        let opts = SealOptions::default();
        let sealed = seal(&pub_key, &plaintext, &opts).unwrap();
        assert!(!sealed.is_open());

        let opened = open_offline(&sealed, &priv_key).unwrap();
        assert_eq!(&*opened, &plaintext);
    }

    #[test]
    fn seal_open_round_trip_aes256_gcm_p384() {
        let (priv_key, pub_key) = ephemeral_keypair(Curve::P384).unwrap();
        let plaintext = vec![0x7Au8; 513];
        let opts = SealOptions {
            version: 2,
            cipher_name: "aes256-gcm".to_owned(),
            kdf_name: "sha256".to_owned(),
        };
        let sealed = seal(&pub_key, &plaintext, &opts).unwrap();
        let opened = open_offline(&sealed, &priv_key).unwrap();
        assert_eq!(&*opened, &plaintext);
    }

    #[test]
    fn opened_plaintext_requires_open_first() {
        let sealed = sample_box(2);
        assert!(matches!(opened_plaintext(&sealed).unwrap_err().kind(), crate::ErrorKind::BoxSealed));
    }

    #[test]
    fn box_v1_with_wrong_guid_length_errors() {
        let mut buf = vec![LEGACY_TAG];
        write_string32(&mut buf, &[0u8; 15]);
        assert!(decode(&buf).is_err());
    }
}
