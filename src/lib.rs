//! Pure Rust host-side driver for PIV smartcards (NIST SP 800-73-4) and the
//! YubicoPIV vendor extension, plus a self-describing ECDH "box" envelope
//! format for sealing data to a PIV slot's public key.
//!
//! Adapted from yubico-piv-tool:
//! <https://github.com/Yubico/yubico-piv-tool/>

pub mod apdu;
pub mod certificate;
pub mod chuid;
pub mod config;
pub mod consts;
pub mod ecdh_box;
pub mod error;
pub mod key;
pub mod metadata;
pub mod mgm;
pub mod piv;
pub mod reader;
pub mod serialization;
pub mod setting;
pub mod transaction;
pub mod types;
pub mod yubikey_signer;

use zeroize::Zeroizing;

pub use crate::{
    chuid::PreferredAuth,
    error::{Error, ErrorKind, Result},
    key::Slot,
    mgm::{AdminAlgorithm, MgmKey},
    piv::{AlgorithmId, HashAlg, PinKind, PinPolicy, RetiredSlotId, SlotId, TouchPolicy},
    types::{Serial, Version},
};

use crate::transaction::{Transaction, TokenState};

/// A buffer of sensitive bytes, zeroed on drop.
pub type Buffer = Zeroizing<Vec<u8>>;

/// A connected PIV token. See the crate-level module docs and
/// [`reader::enumerate`] / [`reader::find_by_guid`] for how these are
/// constructed.
pub struct YubiKey {
    card: pcsc::Card,
    reader_name: String,
    state: TokenState,

    guid: Option<[u8; 16]>,
    cardholder_uuid: Option<[u8; 16]>,
    fascn: Vec<u8>,
    expiry: Option<[u8; 8]>,
    has_chuid: bool,
    signed_chuid: bool,

    pin_app: bool,
    pin_global: bool,
    occ: bool,
    vci: bool,
    preferred_auth: PreferredAuth,

    oncard_count: u8,
    offcard_count: u8,
    offcard_url: Option<String>,

    label: Option<String>,
    uri: Option<String>,
    algorithms: Vec<AlgorithmId>,

    is_ykpiv: bool,
    firmware: Version,
    serial: Option<Serial>,

    slots: Vec<Slot>,
    did_read_all_certs: bool,
}

impl YubiKey {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        card: pcsc::Card,
        reader_name: String,
        state: TokenState,
        guid: Option<[u8; 16]>,
        cardholder_uuid: Option<[u8; 16]>,
        fascn: Vec<u8>,
        expiry: Option<[u8; 8]>,
        has_chuid: bool,
        signed_chuid: bool,
        pin_app: bool,
        pin_global: bool,
        occ: bool,
        vci: bool,
        preferred_auth: PreferredAuth,
        oncard_count: u8,
        offcard_count: u8,
        offcard_url: Option<String>,
        label: Option<String>,
        uri: Option<String>,
        algorithms: Vec<AlgorithmId>,
        is_ykpiv: bool,
        firmware: Version,
        serial: Option<Serial>,
    ) -> Self {
        YubiKey {
            card,
            reader_name,
            state,
            guid,
            cardholder_uuid,
            fascn,
            expiry,
            has_chuid,
            signed_chuid,
            pin_app,
            pin_global,
            occ,
            vci,
            preferred_auth,
            oncard_count,
            offcard_count,
            offcard_url,
            label,
            uri,
            algorithms,
            is_ykpiv,
            firmware,
            serial,
            slots: Vec::new(),
            did_read_all_certs: false,
        }
    }

    pub(crate) fn reset_catalog(&mut self) {
        self.slots.clear();
        self.did_read_all_certs = false;
    }

    pub fn reader_name(&self) -> &str {
        &self.reader_name
    }

    pub fn guid(&self) -> Option<[u8; 16]> {
        self.guid
    }

    pub fn cardholder_uuid(&self) -> Option<[u8; 16]> {
        self.cardholder_uuid
    }

    pub fn has_chuid(&self) -> bool {
        self.has_chuid
    }

    pub fn signed_chuid(&self) -> bool {
        self.signed_chuid
    }

    pub fn preferred_auth(&self) -> PreferredAuth {
        self.preferred_auth
    }

    pub fn key_history(&self) -> (u8, u8, Option<&str>) {
        (self.oncard_count, self.offcard_count, self.offcard_url.as_deref())
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    /// Algorithm identifiers advertised in `SELECT`'s Application Property
    /// Template (tag `AC`, sub-entries `80`). Includes on-card-hashing EC
    /// variants when the token advertises them.
    pub fn algorithms(&self) -> &[AlgorithmId] {
        &self.algorithms
    }

    pub fn is_ykpiv(&self) -> bool {
        self.is_ykpiv
    }

    pub fn firmware(&self) -> Option<Version> {
        self.is_ykpiv.then_some(self.firmware)
    }

    pub fn serial(&self) -> Option<Serial> {
        if self.is_ykpiv {
            self.serial
        } else {
            None
        }
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn card(&self) -> &pcsc::Card {
        &self.card
    }

    /// Run `f` inside a freshly opened exclusive transaction, ending it
    /// (applying `must_reset_on_end` if anything inside `f` asked for it)
    /// before returning. `f` sees the card and transaction as two
    /// independent borrows, so it may call any of the `piv`/`key`/`mgm`
    /// free functions as many times as it needs — this is the "begin
    /// transaction, issue one or more operations, end transaction" shape.
    pub fn with_transaction<F, T>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Transaction<'_>, &pcsc::Card) -> Result<T>,
    {
        let mut txn = Transaction::begin(&self.card, &mut self.state)?;
        let result = f(&mut txn, &self.card);
        txn.end();
        result
    }

    /// Re-run `SELECT`. Idempotent: it never duplicates discovered state —
    /// `label`/`uri`/`algorithms` are replaced, not appended to.
    pub fn piv_select(&mut self) -> Result<()> {
        let (_aid, label, uri, algorithms) =
            self.with_transaction(|_txn, card| reader::piv_select(card))?;
        self.label = label;
        self.uri = uri;
        self.algorithms = algorithms;
        Ok(())
    }

    /// Read one slot's certificate, inserting or replacing its catalog
    /// entry.
    pub fn read_cert(&mut self, slot: SlotId) -> Result<&Slot> {
        let is_ykpiv = self.is_ykpiv;
        let firmware = self.firmware;
        let entry = self.with_transaction(|txn, card| key::read_cert(txn, card, slot, is_ykpiv, firmware))?;
        let pos = match self.slots.iter().position(|s| s.id == slot) {
            Some(pos) => {
                self.slots[pos] = entry;
                pos
            }
            None => {
                self.slots.push(entry);
                self.slots.len() - 1
            }
        };
        Ok(&self.slots[pos])
    }

    /// Read every populated slot (9E, 9A, 9C, 9D, then on-card retired
    /// slots), replacing the whole catalog.
    pub fn read_all_certs(&mut self) -> Result<&[Slot]> {
        let is_ykpiv = self.is_ykpiv;
        let firmware = self.firmware;
        let oncard_count = self.oncard_count;
        self.slots = self.with_transaction(|txn, card| {
            key::read_all_certs(txn, card, is_ykpiv, firmware, oncard_count)
        })?;
        self.did_read_all_certs = true;
        Ok(&self.slots)
    }

    pub fn did_read_all_certs(&self) -> bool {
        self.did_read_all_certs
    }

    /// `sign(slot, data, hash_alg_inout)` — hashes and signs per the slot
    /// algorithm's policy. `hash_alg_inout` is the caller's requested hash
    /// on entry (`None` for the algorithm's default) and the hash actually
    /// used on return; see [`piv::sign_data`] for the full per-algorithm
    /// table, including when an EC signature is sent unhashed for the card
    /// to hash itself.
    pub fn sign(
        &mut self,
        slot: SlotId,
        algorithm: AlgorithmId,
        data: &[u8],
        hash_alg_inout: &mut Option<HashAlg>,
    ) -> Result<Vec<u8>> {
        let card_algorithms = self.algorithms.clone();
        self.with_transaction(|txn, card| {
            piv::sign_data(txn, card, slot, algorithm, data, hash_alg_inout, &card_algorithms)
        })
    }

    /// `sign_prehash(slot, block)` — the already-hashed/padded block path.
    pub fn sign_prehash(&mut self, slot: SlotId, algorithm: AlgorithmId, block: &[u8]) -> Result<Vec<u8>> {
        self.with_transaction(|txn, card| piv::sign_prehash(txn, card, slot, algorithm, block))
    }

    /// `ecdh(slot, peer_pubkey)`.
    pub fn ecdh(&mut self, slot: SlotId, algorithm: AlgorithmId, peer_point: &[u8]) -> Result<Buffer> {
        self.with_transaction(|txn, card| piv::ecdh(txn, card, slot, algorithm, peer_point))
    }

    /// `verify_pin` — a plain verify, a retry-counter probe (`pin` is
    /// `None`), or a verify preflighted against `min_retries`.
    pub fn verify_pin(
        &mut self,
        kind: PinKind,
        pin: Option<&[u8]>,
        retries: &mut Option<u8>,
        min_retries: u8,
    ) -> Result<()> {
        self.with_transaction(|txn, card| piv::verify_pin(txn, card, kind, pin, retries, min_retries))
    }

    pub fn change_pin(&mut self, kind: PinKind, old: &[u8], new: &[u8]) -> Result<()> {
        self.with_transaction(|txn, card| piv::change_reference(txn, card, kind, old, new))
    }

    pub fn reset_pin(&mut self, puk: &[u8], new_pin: &[u8]) -> Result<()> {
        self.with_transaction(|txn, card| piv::reset_pin(txn, card, puk, new_pin))
    }

    pub fn admin_auth(&mut self, key: &MgmKey) -> Result<()> {
        self.with_transaction(|txn, card| mgm::admin_auth(txn, card, key))
    }

    pub fn generate(&mut self, slot: SlotId, algorithm: AlgorithmId) -> Result<piv::PublicKeyMaterial> {
        self.with_transaction(|txn, card| piv::generate(txn, card, slot, algorithm))
    }

    pub fn ykpiv_generate(
        &mut self,
        slot: SlotId,
        algorithm: AlgorithmId,
        pin_policy: PinPolicy,
        touch_policy: TouchPolicy,
    ) -> Result<piv::PublicKeyMaterial> {
        self.with_transaction(|txn, card| {
            piv::ykpiv_generate(txn, card, slot, algorithm, pin_policy, touch_policy)
        })
    }

    pub fn import(
        &mut self,
        slot: SlotId,
        algorithm: AlgorithmId,
        key_material: &piv::PrivateKeyMaterial,
        pin_policy: PinPolicy,
        touch_policy: TouchPolicy,
    ) -> Result<()> {
        self.with_transaction(|txn, card| {
            piv::import(txn, card, slot, algorithm, key_material, pin_policy, touch_policy)
        })
    }

    pub fn attest(&mut self, slot: SlotId) -> Result<Vec<u8>> {
        self.with_transaction(|txn, card| piv::attest(txn, card, slot))
    }

    pub fn set_pin_retries(&mut self, pin_retries: u8, puk_retries: u8) -> Result<()> {
        self.with_transaction(|txn, card| piv::set_pin_retries(txn, card, pin_retries, puk_retries))
    }

    pub fn reset(&mut self) -> Result<()> {
        self.with_transaction(|txn, card| piv::reset(txn, card))
    }

    pub fn write_cert(&mut self, slot: SlotId, cert_der: &[u8], cert_info: u8) -> Result<()> {
        self.with_transaction(|txn, card| piv::write_cert(txn, card, slot, cert_der, cert_info))
    }

    pub fn write_keyhistory(&mut self, oncard: u8, offcard: u8, url: Option<&str>) -> Result<()> {
        self.with_transaction(|txn, card| piv::write_keyhistory(txn, card, oncard, offcard, url))?;
        self.oncard_count = oncard;
        self.offcard_count = offcard;
        self.offcard_url = url.map(str::to_owned);
        Ok(())
    }

    pub fn read_config(&self) -> Result<config::Config> {
        config::Config::read(&self.card)
    }

    pub fn write_config(&mut self, cfg: &config::Config) -> Result<()> {
        cfg.write(&self.card)
    }
}

pub use reader::{enumerate, find_by_guid};
