//! Parsed Yubico admin data object (`5FFF00`): operational metadata such
//! as PUK-blocked state, rather than key material.

use crate::{
    consts::TAG_ADMIN_DATA,
    error::Result,
    serialization::Tlv,
    transaction::{fetch_object, save_object},
};

const TAG_PUK_BLOCKED: u32 = 0x02;
const TAG_PIN_LAST_CHANGED: u32 = 0x03;
const TAG_MGM_KEY_PROTECTED: u32 = 0x04;

fn admin_object_id() -> [u8; 3] {
    [
        (TAG_ADMIN_DATA >> 16) as u8,
        (TAG_ADMIN_DATA >> 8) as u8,
        TAG_ADMIN_DATA as u8,
    ]
}

/// Read-only view over the admin data object.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub puk_blocked: bool,
    pub pin_last_changed: Option<u32>,
    pub mgm_key_protected: bool,
}

impl Config {
    /// Read and parse the admin data object. Absence of the object is not
    /// an error: it simply yields the default (all-`false`/`None`) config.
    pub fn read(card: &pcsc::Card) -> Result<Self> {
        let buf = match fetch_object(card, &admin_object_id()) {
            Ok(b) => b,
            Err(_) => return Ok(Config::default()),
        };
        Self::parse(&buf)
    }

    fn parse(buf: &[u8]) -> Result<Self> {
        let entries = Tlv::parse_all(buf)?;
        let mut cfg = Config::default();
        for (tag, value) in &entries {
            match *tag {
                TAG_PUK_BLOCKED => cfg.puk_blocked = value.first().copied().unwrap_or(0) != 0,
                TAG_PIN_LAST_CHANGED if value.len() == 4 => {
                    let mut b = [0u8; 4];
                    b.copy_from_slice(value);
                    cfg.pin_last_changed = Some(u32::from_be_bytes(b));
                }
                TAG_MGM_KEY_PROTECTED => {
                    cfg.mgm_key_protected = value.first().copied().unwrap_or(0) != 0
                }
                _ => {}
            }
        }
        Ok(cfg)
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Tlv::encode(TAG_PUK_BLOCKED, &[self.puk_blocked as u8]);
        if let Some(t) = self.pin_last_changed {
            out.extend(Tlv::encode(TAG_PIN_LAST_CHANGED, &t.to_be_bytes()));
        }
        out.extend(Tlv::encode(
            TAG_MGM_KEY_PROTECTED,
            &[self.mgm_key_protected as u8],
        ));
        out
    }

    /// Write this config back to the admin data object.
    pub fn write(&self, card: &pcsc::Card) -> Result<()> {
        save_object(card, &admin_object_id(), &self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_parse() {
        let cfg = Config {
            puk_blocked: true,
            pin_last_changed: Some(0x6512_3400),
            mgm_key_protected: true,
        };
        let parsed = Config::parse(&cfg.encode()).unwrap();
        assert_eq!(parsed.puk_blocked, cfg.puk_blocked);
        assert_eq!(parsed.pin_last_changed, cfg.pin_last_changed);
        assert_eq!(parsed.mgm_key_protected, cfg.mgm_key_protected);
    }

    #[test]
    fn default_config_is_all_clear() {
        let cfg = Config::default();
        assert!(!cfg.puk_blocked);
        assert!(cfg.pin_last_changed.is_none());
    }
}
