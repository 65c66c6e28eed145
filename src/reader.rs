//! Reader enumeration, `SELECT`, and find-by-GUID.

use log::warn;

use crate::{
    apdu::Apdu,
    chuid::{Chuid, Discovery, KeyHistory, PreferredAuth},
    consts::{INS_GET_SERIAL, INS_GET_VERSION, INS_SELECT, PIV_AID, TAG_CHUID, TAG_DISCOVERY, TAG_KEY_HISTORY},
    error::{ctor::*, Result},
    piv::AlgorithmId,
    serialization::Tlv,
    transaction::{fetch_object, TokenState, Transaction},
    types::{Serial, Version},
    YubiKey,
};

const TAG_APT: u32 = 0x61;
const TAG_APT_AID: u32 = 0x4F;
const TAG_ALGO_LIST: u32 = 0xAC;
const TAG_ALGO_ID: u32 = 0x80;

/// Parse the `80` (algorithm id) sub-entries of an `AC` algorithm list,
/// tolerating unrecognized ids (vendor/reserved values not in
/// [`AlgorithmId`]) rather than failing the whole `SELECT`.
fn parse_algorithm_list(value: &[u8]) -> Vec<AlgorithmId> {
    let entries = match Tlv::parse_all(value) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    entries
        .into_iter()
        .filter(|(tag, _)| *tag == TAG_ALGO_ID)
        .filter_map(|(_, v)| v.first().copied())
        .filter_map(|b| AlgorithmId::from_byte(b).ok())
        .collect()
}

fn object_id(tag: u32) -> Vec<u8> {
    if tag <= 0xFF {
        vec![tag as u8]
    } else if tag <= 0xFFFF {
        vec![(tag >> 8) as u8, tag as u8]
    } else {
        vec![(tag >> 16) as u8, (tag >> 8) as u8, tag as u8]
    }
}

/// `SELECT` the PIV application, parsing (and tolerating missing fields of)
/// the Application Property Template.
#[allow(clippy::type_complexity)]
pub(crate) fn piv_select(
    card: &pcsc::Card,
) -> Result<(Vec<u8>, Option<String>, Option<String>, Vec<AlgorithmId>)> {
    let apdu = Apdu::new(INS_SELECT, 0x04, 0x00, PIV_AID.to_vec());
    let (reply, sw) = crate::transaction::transmit_chained(card, &apdu)?;
    if !sw.is_success() {
        return Err(apdu_error());
    }

    let apt = Tlv::parse_single(&reply, TAG_APT)?;
    let entries = Tlv::parse_all(&apt)?;

    let mut aid = Vec::new();
    let mut label = None;
    let mut uri = None;
    let mut algorithms = Vec::new();
    for (tag, value) in entries {
        match tag {
            TAG_APT_AID => aid = value,
            0x50 => label = String::from_utf8(value).ok(),
            0x5F50 => uri = String::from_utf8(value).ok(),
            TAG_ALGO_LIST => algorithms = parse_algorithm_list(&value),
            0x79 => {}
            _ => return Err(piv_tag_error()),
        }
    }
    Ok((aid, label, uri, algorithms))
}

/// Probe for the YubicoPIV vendor extension: 3-byte firmware version, and
/// (if >= 5.0.0) the 32-bit serial. Any failure means "not a YubicoPIV
/// card" and is swallowed.
fn probe_vendor(card: &pcsc::Card) -> (bool, Version, Option<Serial>) {
    let apdu = Apdu::new(INS_GET_VERSION, 0x00, 0x00, Vec::new());
    let (reply, sw) = match crate::transaction::transmit_chained(card, &apdu) {
        Ok(r) => r,
        Err(_) => return (false, Version::default(), None),
    };
    if !sw.is_success() || reply.len() != 3 {
        return (false, Version::default(), None);
    }
    let firmware = Version::from_bytes([reply[0], reply[1], reply[2]]);

    let serial = if firmware >= Version::new(5, 0, 0) {
        let apdu = Apdu::new(INS_GET_SERIAL, 0x00, 0x00, Vec::new());
        match crate::transaction::transmit_chained(card, &apdu) {
            Ok((reply, sw)) if sw.is_success() && reply.len() == 4 => {
                Some(Serial::from_be_bytes([reply[0], reply[1], reply[2], reply[3]]))
            }
            _ => None,
        }
    } else {
        None
    };

    (true, firmware, serial)
}

fn read_chuid(card: &pcsc::Card) -> Option<Chuid> {
    match fetch_object(card, &object_id(TAG_CHUID)) {
        Ok(buf) => Chuid::parse(&buf).ok(),
        Err(_) => None,
    }
}

fn read_discovery(card: &pcsc::Card) -> Option<Discovery> {
    match fetch_object(card, &object_id(TAG_DISCOVERY)) {
        Ok(buf) => Discovery::parse(&buf, PIV_AID).ok(),
        Err(_) => None,
    }
}

fn read_key_history(card: &pcsc::Card) -> Option<KeyHistory> {
    match fetch_object(card, &object_id(TAG_KEY_HISTORY)) {
        Ok(buf) => KeyHistory::parse(&buf).ok(),
        Err(_) => None,
    }
}

/// Connect to `reader_name`, select PIV, and populate the token's
/// enumeration-time metadata. `SELECT` failing is the only fatal step; every
/// other probe is tolerated.
pub(crate) fn open_and_probe(ctx: &pcsc::Context, reader_name: &std::ffi::CStr) -> Result<YubiKey> {
    let card = ctx
        .connect(reader_name, pcsc::ShareMode::Shared, pcsc::Protocols::ANY)
        .map_err(|e| io_error().with_cause(e))?;

    let mut state = TokenState::default();
    let mut yk = {
        let txn = Transaction::begin(&card, &mut state)?;
        let (_aid, label, uri, algorithms) = piv_select(&card)?;

        let chuid = read_chuid(&card);
        let discovery = read_discovery(&card);
        let key_history = read_key_history(&card);
        let (is_ykpiv, firmware, serial) = probe_vendor(&card);

        let has_chuid = chuid.is_some();
        let signed_chuid = chuid.as_ref().is_some_and(|c| c.signed);
        let guid = chuid.as_ref().and_then(|c| c.resolve_guid());
        let cardholder_uuid = chuid.as_ref().and_then(|c| c.cardholder_uuid);
        let fascn = chuid.as_ref().map(|c| c.fascn.clone()).unwrap_or_default();
        let expiry = chuid.as_ref().and_then(|c| c.expiry);

        let (pin_app, pin_global, occ, vci, preferred_auth) = match discovery {
            Some(d) => (d.pin_app, d.pin_global, d.occ, d.vci, d.preferred_auth),
            None => (true, false, false, false, PreferredAuth::ApplicationPin),
        };

        let (oncard_count, offcard_count, offcard_url) = match key_history {
            Some(h) => (h.oncard_count, h.offcard_count, h.offcard_url),
            None => (0, 0, None),
        };

        drop(txn);

        YubiKey::from_parts(
            card,
            reader_name.to_string_lossy().into_owned(),
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
        )
    };
    yk.reset_catalog();
    Ok(yk)
}

/// List readers and probe each one, dropping (and logging) any that error.
pub fn enumerate() -> Result<Vec<YubiKey>> {
    let ctx = pcsc::Context::establish(pcsc::Scope::User)
        .map_err(|e| pcsc_context_error().with_cause(e))?;

    let mut buf = vec![0u8; 2048];
    let readers = ctx
        .list_readers(&mut buf)
        .map_err(|e| pcsc_context_error().with_cause(e))?
        .map(|r| r.to_owned())
        .collect::<Vec<_>>();

    let mut out = Vec::new();
    for reader in readers {
        match open_and_probe(&ctx, &reader) {
            Ok(tok) => out.push(tok),
            Err(e) => warn!("dropping reader during enumeration: {e}"),
        }
    }
    Ok(out)
}

/// Find a token by CHUID GUID prefix: an empty prefix matches a CHUID-less
/// token only if exactly one exists; a non-empty prefix uses first-match-wins
/// among CHUID-bearing tokens.
pub fn find_by_guid(guid_prefix: &[u8]) -> Result<YubiKey> {
    let mut tokens = enumerate()?;

    if guid_prefix.is_empty() {
        let mut matches: Vec<usize> = tokens
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.has_chuid())
            .map(|(i, _)| i)
            .collect();
        return match matches.len() {
            0 => Err(not_found_error()),
            1 => Ok(tokens.remove(matches.remove(0))),
            _ => Err(duplicate_error()),
        };
    }

    if guid_prefix.len() > 16 {
        return Err(argument_error());
    }

    let index = tokens
        .iter()
        .position(|t| t.guid().is_some_and(|g| g.starts_with(guid_prefix)));

    match index {
        Some(i) => Ok(tokens.remove(i)),
        None => Err(not_found_error()),
    }
}
