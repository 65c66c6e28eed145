//! Transaction lifetime (C4) and the command/response chain engine (C3).

use log::{trace, warn};
use pcsc::Disposition;

use crate::{
    apdu::{split_trailer, Apdu, StatusWord},
    consts::{
        APDU_CHAIN_SEGMENT, INS_CONTINUE, INS_GET_DATA, INS_PUT_DATA, MAX_APDU_SIZE,
        SW_FILE_INVALID, SW_FILE_NOT_FOUND, SW_FUNC_NOT_SUPPORTED, SW_INS_NOT_SUPPORTED,
        SW_SECURITY_STATUS_NOT_SATISFIED, TAG_OBJ_DATA, TAG_OBJ_ID,
    },
    error::{ctor::*, Error, Result},
    serialization::Tlv,
    setting::Setting,
};

/// Metadata tracked alongside the open PC/SC card handle.
///
/// Kept separate from the card handle itself so a [`Transaction`] can hold
/// a `pcsc::Transaction` borrowing the card and a `&mut TokenState`
/// simultaneously — two disjoint fields of the same `Token`, rather than
/// two borrows of one.
#[derive(Debug, Default)]
pub struct TokenState {
    pub in_txn: bool,
    pub must_reset_on_end: bool,
}

/// An open exclusive transaction on a reader, scoped to `'a`.
///
/// Built only by [`Transaction::begin`]. Dropping (or calling [`Transaction::end`])
/// releases the transaction, resetting the card iff an operation performed
/// under it set [`TokenState::must_reset_on_end`]. Release failures are
/// logged and never propagated — the transaction is considered closed
/// either way.
pub struct Transaction<'a> {
    pcsc_txn: Option<pcsc::Transaction<'a>>,
    state: &'a mut TokenState,
}

impl<'a> Transaction<'a> {
    /// Begin an exclusive transaction on `card`. If the reader reports the
    /// card was reset, reconnects (requesting T=0/T=1) and retries once.
    pub fn begin(card: &'a pcsc::Card, state: &'a mut TokenState) -> Result<Self> {
        let pcsc_txn = match card.transaction() {
            Ok(t) => t,
            Err(pcsc::Error::ResetCard) => {
                card.reconnect(
                    pcsc::ShareMode::Shared,
                    pcsc::Protocols::T0 | pcsc::Protocols::T1,
                    Disposition::LeaveCard,
                )
                .map_err(|e| io_error().with_cause(e))?;
                card.transaction().map_err(|e| io_error().with_cause(e))?
            }
            Err(e) => return Err(io_error().with_cause(e)),
        };
        state.in_txn = true;
        state.must_reset_on_end = false;
        Ok(Transaction {
            pcsc_txn: Some(pcsc_txn),
            state,
        })
    }

    /// Whether this transaction is (still) open.
    pub fn in_txn(&self) -> bool {
        self.state.in_txn
    }

    /// Mark that the card should be reset when this transaction ends, e.g.
    /// after a successful PIN verify or key admin operation so
    /// authentication state doesn't leak to the next caller.
    pub fn mark_reset_on_end(&mut self) {
        self.state.must_reset_on_end = true;
    }

    /// Release the transaction now, rather than waiting for drop.
    pub fn end(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(txn) = self.pcsc_txn.take() {
            let disposition = if self.state.must_reset_on_end {
                Disposition::ResetCard
            } else {
                Disposition::LeaveCard
            };
            if let Err((_, e)) = txn.end(disposition) {
                warn!("failed to end transaction cleanly: {e}");
            }
        }
        self.state.in_txn = false;
        self.state.must_reset_on_end = false;
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Transmit `apdu` through the command/response chain engine, fragmenting
/// `apdu.data` into 255-byte segments (setting the CLA chaining bit on all
/// but the last) and following response continuation via `INS_CONTINUE`.
///
/// Returns the concatenated reply body and the final status word. Any
/// status word on a non-final *send* segment other than one of the
/// "advance" codes stops the chain early and is returned as-is, without
/// becoming an error here — callers interpret status words themselves.
pub fn transmit_chained(card: &pcsc::Card, apdu: &Apdu) -> Result<(Vec<u8>, StatusWord)> {
    let mut reply = Vec::with_capacity(MAX_APDU_SIZE);
    let mut buf = [0u8; MAX_APDU_SIZE];

    let segments: Vec<&[u8]> = if apdu.data.is_empty() {
        vec![&[][..]]
    } else {
        apdu.data.chunks(APDU_CHAIN_SEGMENT).collect()
    };

    let mut last_sw = StatusWord(0x9000);
    let mut last_body_full_segment = false;
    let mut any_intermediate_success = false;

    for (i, seg) in segments.iter().enumerate() {
        let is_last = i + 1 == segments.len();
        let mut le = apdu.le;

        loop {
            let cmd = Apdu {
                cla: apdu.cla,
                ins: apdu.ins,
                p1: apdu.p1,
                p2: apdu.p2,
                data: seg.to_vec(),
                le: if is_last { le } else { None },
            }
            .with_chain_bit(!is_last);

            let wire = cmd.serialize()?;
            trace!(
                "apdu> {:02X} {:02X} {:02X} {:02X} lc={}",
                wire[0],
                wire[1],
                wire[2],
                wire[3],
                seg.len()
            );
            if Setting::ApduTrace.enabled() {
                trace!("apdu> full {wire:02X?}");
            }

            let resp = card
                .transmit(&wire, &mut buf)
                .map_err(|e| io_error().with_cause(e))?;
            let (body, sw) = split_trailer(resp)?;

            if let Some(corrected) = sw.correct_le() {
                le = Some(corrected);
                continue;
            }

            if is_last {
                reply.extend_from_slice(body);
                last_body_full_segment = body.len() == APDU_CHAIN_SEGMENT;
                last_sw = sw;
            } else if sw.advances_chain() {
                if sw.is_success() {
                    any_intermediate_success = true;
                }
                last_sw = sw;
            } else {
                // Unexpected SW mid-chain: stop immediately, let the caller judge.
                reply.extend_from_slice(body);
                return Ok((reply, sw));
            }
            break;
        }
    }

    // Receive phase.
    loop {
        let more = last_sw.bytes_remaining();
        let workaround_continue =
            more.is_none() && last_sw.is_success() && last_body_full_segment;
        if more.is_none() && !workaround_continue {
            break;
        }

        let le = more.unwrap_or(0);
        let cont = Apdu {
            cla: 0x00,
            ins: INS_CONTINUE,
            p1: 0x00,
            p2: 0x00,
            data: Vec::new(),
            le: Some(le),
        };
        let wire = cont.serialize()?;
        let resp = card
            .transmit(&wire, &mut buf)
            .map_err(|e| io_error().with_cause(e))?;
        let (body, sw) = split_trailer(resp)?;
        last_body_full_segment = body.len() == APDU_CHAIN_SEGMENT;
        reply.extend_from_slice(body);
        last_sw = sw;
    }

    if any_intermediate_success
        && last_sw.0 == 0x6A80
        && Setting::ChainFixup6A80.enabled()
    {
        last_sw = StatusWord(0x9000);
    }

    Ok((reply, last_sw))
}

fn map_data_object_sw(sw: StatusWord) -> Error {
    match sw.0 {
        SW_FILE_NOT_FOUND | SW_FILE_INVALID => not_found_error(),
        SW_SECURITY_STATUS_NOT_SATISFIED => permission_error(),
        SW_INS_NOT_SUPPORTED | SW_FUNC_NOT_SUPPORTED => not_supported_error(),
        _ => apdu_error(),
    }
}

/// `GET_DATA` a PIV object by its BER-TLV object id, returning the raw
/// payload from inside the `53` wrapper.
pub fn fetch_object(card: &pcsc::Card, object_id: &[u8]) -> Result<Vec<u8>> {
    let req = Tlv::encode(TAG_OBJ_ID as u32, object_id);
    let apdu = Apdu::new(INS_GET_DATA, 0x3F, 0xFF, req);
    let (reply, sw) = transmit_chained(card, &apdu)?;
    if !sw.is_success() {
        return Err(map_data_object_sw(sw));
    }
    Tlv::parse_single(&reply, TAG_OBJ_DATA as u32)
}

/// `PUT_DATA` a PIV object by its BER-TLV object id, wrapping `data` in a
/// `53` container.
pub fn save_object(card: &pcsc::Card, object_id: &[u8], data: &[u8]) -> Result<()> {
    let mut body = Tlv::encode(TAG_OBJ_ID as u32, object_id);
    body.extend(Tlv::encode(TAG_OBJ_DATA as u32, data));
    let apdu = Apdu::new(INS_PUT_DATA, 0x3F, 0xFF, body);
    let (_, sw) = transmit_chained(card, &apdu)?;
    if !sw.is_success() {
        return Err(map_data_object_sw(sw));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_state_defaults_closed() {
        let state = TokenState::default();
        assert!(!state.in_txn);
        assert!(!state.must_reset_on_end);
    }
}
