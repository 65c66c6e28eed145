//! CHUID, Discovery, and Key History data object parsing.

use sha2::{Digest, Sha256};

use crate::{
    error::{ctor::*, Result},
    serialization::Tlv,
};

const TAG_FASCN: u32 = 0x30;
const TAG_EXPIRY: u32 = 0x35;
const TAG_GUID: u32 = 0x34;
const TAG_CHUUID: u32 = 0x36;
const TAG_SIGNATURE: u32 = 0x3E;

const TAG_DISCOVERY_AID: u32 = 0x4F;
const TAG_DISCOVERY_POLICY: u32 = 0x5F2F;

const TAG_KEYHIST_ONCARD: u32 = 0xC1;
const TAG_KEYHIST_OFFCARD: u32 = 0xC2;
const TAG_KEYHIST_URL: u32 = 0xF3;

/// Preferred authentication mechanism, in priority order when more than one
/// is supported.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PreferredAuth {
    ApplicationPin,
    GlobalPin,
    Occ,
}

/// Parsed contents of the CHUID data object (tag `5FC102`).
#[derive(Clone, Debug, Default)]
pub struct Chuid {
    pub fascn: Vec<u8>,
    pub expiry: Option<[u8; 8]>,
    pub guid: Option<[u8; 16]>,
    pub cardholder_uuid: Option<[u8; 16]>,
    pub signed: bool,
}

impl Chuid {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let entries = Tlv::parse_all(buf)?;
        let mut chuid = Chuid::default();

        for (tag, value) in &entries {
            match *tag {
                TAG_FASCN => chuid.fascn = value.clone(),
                TAG_EXPIRY if value.len() == 8 => {
                    let mut b = [0u8; 8];
                    b.copy_from_slice(value);
                    chuid.expiry = Some(b);
                }
                TAG_GUID if value.len() == 16 => {
                    let mut b = [0u8; 16];
                    b.copy_from_slice(value);
                    if b != [0u8; 16] {
                        chuid.guid = Some(b);
                    }
                }
                TAG_CHUUID if value.len() == 16 => {
                    let mut b = [0u8; 16];
                    b.copy_from_slice(value);
                    if b != [0u8; 16] {
                        chuid.cardholder_uuid = Some(b);
                    }
                }
                TAG_SIGNATURE => chuid.signed = !value.is_empty(),
                _ => {}
            }
        }
        Ok(chuid)
    }

    /// Resolve a usable GUID: the card GUID field, falling back to the
    /// cardholder UUID, falling back to `SHA-256(FASC-N)[..16]` when
    /// FASC-N is non-empty.
    pub fn resolve_guid(&self) -> Option<[u8; 16]> {
        if let Some(g) = self.guid {
            return Some(g);
        }
        if let Some(u) = self.cardholder_uuid {
            return Some(u);
        }
        if self.fascn.is_empty() {
            return None;
        }
        let digest = Sha256::digest(&self.fascn);
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest[..16]);
        Some(out)
    }
}

/// Parsed contents of the Discovery data object (tag `7E`).
#[derive(Clone, Debug)]
pub struct Discovery {
    pub pin_app: bool,
    pub pin_global: bool,
    pub occ: bool,
    pub vci: bool,
    pub preferred_auth: PreferredAuth,
}

impl Default for Discovery {
    fn default() -> Self {
        Discovery {
            pin_app: true,
            pin_global: false,
            occ: false,
            vci: false,
            preferred_auth: PreferredAuth::ApplicationPin,
        }
    }
}

impl Discovery {
    pub fn parse(buf: &[u8], piv_aid: &[u8]) -> Result<Self> {
        let entries = Tlv::parse_all(buf)?;
        let mut disc = Discovery {
            pin_app: false,
            pin_global: false,
            occ: false,
            vci: false,
            preferred_auth: PreferredAuth::ApplicationPin,
        };

        if let Some((_, aid)) = entries.iter().find(|(t, _)| *t == TAG_DISCOVERY_AID) {
            if aid.as_slice() != piv_aid {
                return Err(piv_tag_error());
            }
        }

        let policy = entries
            .iter()
            .find(|(t, _)| *t == TAG_DISCOVERY_POLICY)
            .map(|(_, v)| v.clone())
            .unwrap_or_default();

        if policy.len() >= 2 {
            let word = ((policy[0] as u16) << 8) | policy[1] as u16;
            disc.pin_app = word & 0x4000 != 0;
            disc.pin_global = word & 0x2000 != 0;
            disc.occ = word & 0x1000 != 0;
            disc.vci = word & 0x0800 != 0;

            let low = policy[1];
            disc.preferred_auth = if low & 0x10 != 0 {
                PreferredAuth::ApplicationPin
            } else if low & 0x20 != 0 && disc.pin_global {
                PreferredAuth::GlobalPin
            } else if disc.pin_app {
                PreferredAuth::ApplicationPin
            } else if disc.pin_global {
                PreferredAuth::GlobalPin
            } else {
                PreferredAuth::Occ
            };
        } else {
            disc.pin_app = true;
            disc.preferred_auth = PreferredAuth::ApplicationPin;
        }

        Ok(disc)
    }
}

/// Parsed contents of the Key History data object (tag `5FC10C`).
#[derive(Clone, Debug, Default)]
pub struct KeyHistory {
    pub oncard_count: u8,
    pub offcard_count: u8,
    pub offcard_url: Option<String>,
}

impl KeyHistory {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        let entries = Tlv::parse_all(buf)?;
        let mut hist = KeyHistory::default();
        for (tag, value) in &entries {
            match *tag {
                TAG_KEYHIST_ONCARD if !value.is_empty() => hist.oncard_count = value[0],
                TAG_KEYHIST_OFFCARD if !value.is_empty() => hist.offcard_count = value[0],
                TAG_KEYHIST_URL => {
                    hist.offcard_url = String::from_utf8(value.clone()).ok();
                }
                _ => {}
            }
        }
        Ok(hist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthesizes_guid_from_fascn_when_guid_and_uuid_absent() {
        let mut buf = Tlv::encode(TAG_FASCN, b"fascn-bytes");
        buf.extend(Tlv::encode(TAG_GUID, &[0u8; 16]));
        let chuid = Chuid::parse(&buf).unwrap();
        let expect = Sha256::digest(b"fascn-bytes");
        assert_eq!(&chuid.resolve_guid().unwrap(), &expect[..16]);
    }

    #[test]
    fn all_zero_guid_missing_uuid_empty_fascn_has_no_guid() {
        let buf = Tlv::encode(TAG_GUID, &[0u8; 16]);
        let chuid = Chuid::parse(&buf).unwrap();
        assert!(chuid.resolve_guid().is_none());
    }

    #[test]
    fn signed_flag_set_from_nonempty_signature() {
        let buf = Tlv::encode(TAG_SIGNATURE, &[0x30, 0x03, 0x02, 0x01, 0x00]);
        let chuid = Chuid::parse(&buf).unwrap();
        assert!(chuid.signed);
    }

    #[test]
    fn discovery_policy_app_pin() {
        let mut buf = Tlv::encode(TAG_DISCOVERY_AID, &[0xA0, 0x00, 0x00, 0x03, 0x08]);
        buf.extend(Tlv::encode(TAG_DISCOVERY_POLICY, &[0x40, 0x10]));
        let disc = Discovery::parse(&buf, &[0xA0, 0x00, 0x00, 0x03, 0x08]).unwrap();
        assert!(disc.pin_app);
        assert_eq!(disc.preferred_auth, PreferredAuth::ApplicationPin);
    }

    #[test]
    fn discovery_policy_global_pin() {
        let buf = Tlv::encode(TAG_DISCOVERY_POLICY, &[0x20, 0x20]);
        let disc = Discovery::parse(&buf, &[]).unwrap();
        assert!(disc.pin_global);
        assert_eq!(disc.preferred_auth, PreferredAuth::GlobalPin);
    }

    #[test]
    fn key_history_parses_counts_and_url() {
        let mut buf = Tlv::encode(TAG_KEYHIST_ONCARD, &[5]);
        buf.extend(Tlv::encode(TAG_KEYHIST_OFFCARD, &[2]));
        buf.extend(Tlv::encode(TAG_KEYHIST_URL, b"https://example.test/keys"));
        let hist = KeyHistory::parse(&buf).unwrap();
        assert_eq!(hist.oncard_count, 5);
        assert_eq!(hist.offcard_count, 2);
        assert_eq!(hist.offcard_url.as_deref(), Some("https://example.test/keys"));
    }
}
