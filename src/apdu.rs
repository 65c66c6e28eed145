//! ISO 7816-4 APDU framing (short form only).

use crate::{
    consts::CLA_CHAIN,
    error::{ctor::*, Result},
};

/// A command APDU: `CLA || INS || P1 || P2 || [Lc || data] || [LE]`.
///
/// Short form only: `Lc` and `LE` are each one byte, so `data.len()` must be
/// less than 256.
#[derive(Clone, Debug)]
pub struct Apdu {
    pub cla: u8,
    pub ins: u8,
    pub p1: u8,
    pub p2: u8,
    pub data: Vec<u8>,
    /// Expected response length. `None` means "omit LE" (used for chained
    /// non-final segments); `Some(0)` requests up to 256 bytes.
    pub le: Option<u8>,
}

impl Apdu {
    /// Build a new command APDU.
    pub fn new(ins: u8, p1: u8, p2: u8, data: impl Into<Vec<u8>>) -> Self {
        Apdu {
            cla: 0x00,
            ins,
            p1,
            p2,
            data: data.into(),
            le: Some(0),
        }
    }

    /// Set the chaining bit on `CLA`, used for all but the last fragment of
    /// a chained command.
    pub fn with_chain_bit(mut self, set: bool) -> Self {
        if set {
            self.cla |= CLA_CHAIN;
        } else {
            self.cla &= !CLA_CHAIN;
        }
        self
    }

    /// Serialize this APDU to its on-wire short-form bytes.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        if self.data.len() >= 256 {
            return Err(length_error());
        }

        let mut out = Vec::with_capacity(5 + self.data.len());
        out.push(self.cla);
        out.push(self.ins);
        out.push(self.p1);
        out.push(self.p2);

        if self.data.is_empty() {
            if let Some(le) = self.le {
                out.push(le);
            }
        } else {
            out.push(self.data.len() as u8);
            out.extend_from_slice(&self.data);
            // A chained (non-final) fragment omits LE entirely.
            if self.cla & CLA_CHAIN == 0 {
                if let Some(le) = self.le {
                    out.push(le);
                }
            }
        }

        Ok(out)
    }
}

/// A two-byte card status word, and the slice of `reply` that precedes it.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StatusWord(pub u16);

impl StatusWord {
    pub fn sw1(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn sw2(self) -> u8 {
        self.0 as u8
    }

    pub fn is_success(self) -> bool {
        self.0 == 0x9000
    }

    /// `0x61xx` — more response bytes are available via INS_CONTINUE.
    pub fn bytes_remaining(self) -> Option<u8> {
        if self.sw1() == 0x61 {
            Some(self.sw2())
        } else {
            None
        }
    }

    /// `0x6Cxx` — resend with the corrected LE.
    pub fn correct_le(self) -> Option<u8> {
        if self.sw1() == 0x6C {
            Some(self.sw2())
        } else {
            None
        }
    }

    /// `0x63Cx` — wrong PIN, `x` tries remaining.
    pub fn pin_tries_remaining(self) -> Option<u8> {
        if self.sw1() == 0x63 && (self.sw2() & 0xF0) == 0xC0 {
            Some(self.sw2() & 0x0F)
        } else {
            None
        }
    }

    /// True for any SW the chain engine treats as "advance past this
    /// segment" during command chaining: success, bytes-remaining,
    /// warning-no-change, or warning.
    pub fn advances_chain(self) -> bool {
        matches!(self.sw1(), 0x90 | 0x61 | 0x62 | 0x63)
    }
}

/// Split a raw reader reply into `(body, status word)`.
pub fn split_trailer(reply: &[u8]) -> Result<(&[u8], StatusWord)> {
    if reply.len() < 2 {
        return Err(apdu_error());
    }
    let split_at = reply.len() - 2;
    let sw = ((reply[split_at] as u16) << 8) | reply[split_at + 1] as u16;
    Ok((&reply[..split_at], StatusWord(sw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_case1_no_data_no_le() {
        let apdu = Apdu {
            le: None,
            ..Apdu::new(0xA4, 0x04, 0x00, vec![])
        };
        assert_eq!(apdu.serialize().unwrap(), vec![0x00, 0xA4, 0x04, 0x00]);
    }

    #[test]
    fn serializes_case2_read_with_le() {
        let apdu = Apdu::new(0xCB, 0x3F, 0xFF, vec![]);
        assert_eq!(
            apdu.serialize().unwrap(),
            vec![0x00, 0xCB, 0x3F, 0xFF, 0x00]
        );
    }

    #[test]
    fn serializes_case4_with_data_and_le() {
        let apdu = Apdu::new(0x20, 0x00, 0x80, vec![1, 2, 3]);
        assert_eq!(
            apdu.serialize().unwrap(),
            vec![0x00, 0x20, 0x00, 0x80, 0x03, 1, 2, 3, 0x00]
        );
    }

    #[test]
    fn chained_segment_omits_le() {
        let apdu = Apdu::new(0x87, 0x11, 0x9A, vec![1, 2, 3]).with_chain_bit(true);
        assert_eq!(
            apdu.serialize().unwrap(),
            vec![0x10, 0x87, 0x11, 0x9A, 0x03, 1, 2, 3]
        );
    }

    #[test]
    fn rejects_oversized_data() {
        let apdu = Apdu::new(0xDB, 0x3F, 0xFF, vec![0u8; 256]);
        assert!(apdu.serialize().is_err());
    }

    #[test]
    fn status_word_helpers() {
        assert!(StatusWord(0x9000).is_success());
        assert_eq!(StatusWord(0x61A0).bytes_remaining(), Some(0xA0));
        assert_eq!(StatusWord(0x6C05).correct_le(), Some(0x05));
        assert_eq!(StatusWord(0x63C3).pin_tries_remaining(), Some(3));
        assert!(StatusWord(0x9000).advances_chain());
        assert!(StatusWord(0x6283).advances_chain());
        assert!(!StatusWord(0x6A80).advances_chain());
    }

    #[test]
    fn split_trailer_splits_last_two_bytes() {
        let (body, sw) = split_trailer(&[1, 2, 3, 0x90, 0x00]).unwrap();
        assert_eq!(body, &[1, 2, 3]);
        assert_eq!(sw, StatusWord(0x9000));
    }
}
