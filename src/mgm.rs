//! The card management (admin) key: its algorithm, factory default, random
//! generation, and the challenge/response `admin_auth`.

use aes::{Aes128, Aes192, Aes256};
use cipher::{generic_array::GenericArray, BlockEncrypt, KeyInit};
use des::TdesEde3;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::{
    apdu::Apdu,
    consts::*,
    error::{ctor::*, Result},
    serialization::Tlv,
    transaction::{transmit_chained, Transaction},
};

/// Algorithm the management key was generated under.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AdminAlgorithm {
    ThreeDes,
    Aes128,
    Aes192,
    Aes256,
}

impl AdminAlgorithm {
    fn wire_id(self) -> u8 {
        match self {
            AdminAlgorithm::ThreeDes => ALGO_3DES,
            AdminAlgorithm::Aes128 => ALGO_AES128,
            AdminAlgorithm::Aes192 => ALGO_AES192,
            AdminAlgorithm::Aes256 => ALGO_AES256,
        }
    }

    fn key_len(self) -> usize {
        match self {
            AdminAlgorithm::ThreeDes => 24,
            AdminAlgorithm::Aes128 => 16,
            AdminAlgorithm::Aes192 => 24,
            AdminAlgorithm::Aes256 => 32,
        }
    }

    /// Block size; all four ciphers used here happen to share it.
    fn block_len(self) -> usize {
        8_usize.max(match self {
            AdminAlgorithm::ThreeDes => 8,
            _ => 16,
        })
    }

    fn encrypt_block(self, key: &[u8], block: &mut [u8]) -> Result<()> {
        match self {
            AdminAlgorithm::ThreeDes => {
                let cipher = TdesEde3::new_from_slice(key).map_err(|_| argument_error())?;
                let mut ga = GenericArray::clone_from_slice(block);
                cipher.encrypt_block(&mut ga);
                block.copy_from_slice(&ga);
            }
            AdminAlgorithm::Aes128 => {
                let cipher = Aes128::new_from_slice(key).map_err(|_| argument_error())?;
                let mut ga = GenericArray::clone_from_slice(block);
                cipher.encrypt_block(&mut ga);
                block.copy_from_slice(&ga);
            }
            AdminAlgorithm::Aes192 => {
                let cipher = Aes192::new_from_slice(key).map_err(|_| argument_error())?;
                let mut ga = GenericArray::clone_from_slice(block);
                cipher.encrypt_block(&mut ga);
                block.copy_from_slice(&ga);
            }
            AdminAlgorithm::Aes256 => {
                let cipher = Aes256::new_from_slice(key).map_err(|_| argument_error())?;
                let mut ga = GenericArray::clone_from_slice(block);
                cipher.encrypt_block(&mut ga);
                block.copy_from_slice(&ga);
            }
        }
        Ok(())
    }
}

/// The slot-9B management key.
pub struct MgmKey {
    pub algorithm: AdminAlgorithm,
    bytes: Zeroizing<Vec<u8>>,
}

impl MgmKey {
    pub fn new(algorithm: AdminAlgorithm, bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() != algorithm.key_len() {
            return Err(argument_error());
        }
        Ok(MgmKey {
            algorithm,
            bytes: Zeroizing::new(bytes),
        })
    }

    /// The YubicoPIV factory-default 3DES management key.
    pub fn default_3des() -> Self {
        MgmKey {
            algorithm: AdminAlgorithm::ThreeDes,
            bytes: Zeroizing::new(vec![
                0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x01, 0x02, 0x03, 0x04, 0x05,
                0x06, 0x07, 0x08, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08,
            ]),
        }
    }

    /// A freshly generated random key of `algorithm`'s length.
    pub fn generate(algorithm: AdminAlgorithm) -> Self {
        let mut bytes = vec![0u8; algorithm.key_len()];
        rand::rng().fill_bytes(&mut bytes);
        MgmKey {
            algorithm,
            bytes: Zeroizing::new(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Default for MgmKey {
    fn default() -> Self {
        MgmKey::default_3des()
    }
}

/// Step 1 request body: `7C { 81 (empty) }`, asking the card for a challenge.
fn encode_challenge_request() -> Vec<u8> {
    Tlv::encode(TAG_DYN_AUTH as u32, &Tlv::encode(TAG_AUTH_WITNESS as u32, &[]))
}

/// Step 3 request body: `7C { 82 <ciphertext> }`, the encrypted challenge.
fn encode_response_body(ciphertext: &[u8]) -> Vec<u8> {
    Tlv::encode(TAG_DYN_AUTH as u32, &Tlv::encode(TAG_AUTH_CHALLENGE as u32, ciphertext))
}

/// `admin_auth(token, key, algorithm)` — single-step challenge/response
/// against the card management key.
pub fn admin_auth(txn: &mut Transaction<'_>, card: &pcsc::Card, key: &MgmKey) -> Result<()> {
    debug_assert!(txn.in_txn());
    if key.bytes.len() != key.algorithm.key_len() {
        return Err(argument_error());
    }

    let request = encode_challenge_request();
    let apdu = Apdu::new(INS_GEN_AUTH, key.algorithm.wire_id(), SLOT_ADMIN, request);
    let (reply, sw) = transmit_chained(card, &apdu)?;
    if sw.0 == SW_WRONG_DATA {
        return Err(not_found_error());
    }
    if !sw.is_success() {
        return Err(permission_error());
    }

    let inner = Tlv::parse_single(&reply, TAG_DYN_AUTH as u32)?;
    let challenge = Tlv::parse_single(&inner, TAG_AUTH_WITNESS as u32)?;
    if challenge.len() != key.algorithm.block_len() {
        return Err(invalid_data_error());
    }

    let mut block = challenge.clone();
    key.algorithm.encrypt_block(&key.bytes, &mut block)?;

    let response = encode_response_body(&block);
    let apdu2 = Apdu::new(INS_GEN_AUTH, key.algorithm.wire_id(), SLOT_ADMIN, response);
    let (_, sw2) = transmit_chained(card, &apdu2)?;

    if sw2.is_success() {
        txn.mark_reset_on_end();
        return Ok(());
    }
    if sw2.0 == SW_WRONG_DATA || sw2.0 == SW_SECURITY_STATUS_NOT_SATISFIED {
        return Err(permission_error());
    }
    if sw2.0 == SW_INS_NOT_SUPPORTED {
        return Err(not_supported_error());
    }
    Err(apdu_error())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_key_is_3des_factory() {
        let key = MgmKey::default();
        assert_eq!(key.algorithm, AdminAlgorithm::ThreeDes);
        assert_eq!(key.as_bytes().len(), 24);
    }

    #[test]
    fn new_rejects_wrong_length() {
        assert!(MgmKey::new(AdminAlgorithm::Aes128, vec![0u8; 10]).is_err());
    }

    #[test]
    fn generate_produces_correct_length() {
        for (alg, len) in [
            (AdminAlgorithm::ThreeDes, 24),
            (AdminAlgorithm::Aes128, 16),
            (AdminAlgorithm::Aes192, 24),
            (AdminAlgorithm::Aes256, 32),
        ] {
            assert_eq!(MgmKey::generate(alg).as_bytes().len(), len);
        }
    }

    #[test]
    fn challenge_request_carries_empty_witness() {
        let body = encode_challenge_request();
        let inner = Tlv::parse_single(&body, TAG_DYN_AUTH as u32).unwrap();
        let witness = Tlv::parse_single(&inner, TAG_AUTH_WITNESS as u32).unwrap();
        assert!(witness.is_empty());
    }

    #[test]
    fn response_body_carries_ciphertext_under_challenge_tag() {
        let ciphertext = [0xAAu8; 16];
        let body = encode_response_body(&ciphertext);
        let inner = Tlv::parse_single(&body, TAG_DYN_AUTH as u32).unwrap();
        let parsed = Tlv::parse_single(&inner, TAG_AUTH_CHALLENGE as u32).unwrap();
        assert_eq!(parsed, ciphertext);
        assert!(Tlv::parse_single(&inner, TAG_AUTH_WITNESS as u32).is_err());
    }
}
