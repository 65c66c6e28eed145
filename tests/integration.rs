//! Hardware-gated integration tests. These require a PIV token attached to
//! a live reader and are skipped by default (`cargo test -- --ignored` to
//! run them); `RUST_LOG=trace` shows the underlying APDU traffic.

#![forbid(unsafe_code)]

use std::{env, sync::Mutex};

use once_cell::sync::Lazy;
use p256::ecdsa::{signature::Verifier, Signature as EcdsaSignature, VerifyingKey};
use pivcard::{
    ecdh_box::{self, SealOptions},
    piv::{AlgorithmId, PinKind, PinPolicy, PublicKeyMaterial, RetiredSlotId, SlotId, TouchPolicy},
    reader, YubiKey,
};
use rsa::{BigUint, Pkcs1v15Sign, RsaPublicKey};
use sha2::{Digest, Sha256};

static TOKEN: Lazy<Mutex<YubiKey>> = Lazy::new(|| {
    if env::var("RUST_LOG").is_ok() {
        env_logger::builder().format_timestamp(None).init();
    }
    let prefix = env::var("PIVCARD_GUID").unwrap_or_default();
    let guid: Vec<u8> = (0..prefix.len())
        .step_by(2)
        .filter_map(|i| u8::from_str_radix(&prefix[i..i + 2], 16).ok())
        .collect();
    let token = if guid.is_empty() {
        reader::enumerate().unwrap().into_iter().next().expect("no PIV reader attached")
    } else {
        reader::find_by_guid(&guid).unwrap()
    };
    Mutex::new(token)
});

fn verified(pin_ok: bool) -> impl Fn(&mut YubiKey) {
    move |token: &mut YubiKey| {
        let mut retries = None;
        let result = token.verify_pin(PinKind::Application, Some(b"123456"), &mut retries, 0);
        assert_eq!(result.is_ok(), pin_ok);
    }
}

#[test]
#[ignore]
fn select_is_idempotent() {
    let mut token = TOKEN.lock().unwrap();
    token.piv_select().unwrap();
    assert!(token.piv_select().is_ok());
}

#[test]
#[ignore]
fn read_all_certs_does_not_error() {
    let mut token = TOKEN.lock().unwrap();
    assert!(token.read_all_certs().is_ok());
}

#[test]
#[ignore]
fn verify_pin_rejects_wrong_then_accepts_right() {
    let mut token = TOKEN.lock().unwrap();
    let mut retries = Some(0u8);
    assert!(token.verify_pin(PinKind::Application, Some(b"000000"), &mut retries, 0).is_err());
    verified(true)(&mut token);
}

#[test]
#[ignore]
fn eccp256_sign_prehash_round_trip() {
    let mut token = TOKEN.lock().unwrap();
    verified(true)(&mut token);

    let slot = SlotId::Retired(RetiredSlotId::from_index(1).unwrap());
    let pubkey = token
        .ykpiv_generate(slot, AlgorithmId::EccP256, PinPolicy::Default, TouchPolicy::Default)
        .unwrap();
    let PublicKeyMaterial::Ec { point, .. } = pubkey else {
        panic!("expected an EC public key");
    };

    let message = b"attack at dawn";
    let digest = Sha256::digest(message);
    let signature = token.sign_prehash(slot, AlgorithmId::EccP256, &digest).unwrap();

    let verifying_key = VerifyingKey::from_sec1_bytes(&point).unwrap();
    let sig = EcdsaSignature::from_der(&signature).unwrap();
    verifying_key.verify(message, &sig).unwrap();
}

#[test]
#[ignore]
fn rsa2048_sign_round_trip() {
    let mut token = TOKEN.lock().unwrap();
    verified(true)(&mut token);

    let slot = SlotId::Retired(RetiredSlotId::from_index(2).unwrap());
    let pubkey = token
        .ykpiv_generate(slot, AlgorithmId::Rsa2048, PinPolicy::Default, TouchPolicy::Default)
        .unwrap();
    let PublicKeyMaterial::Rsa { modulus, exponent } = pubkey else {
        panic!("expected an RSA public key");
    };
    let rsa = RsaPublicKey::new(BigUint::from_bytes_be(&modulus), BigUint::from_bytes_be(&exponent)).unwrap();

    let message = b"attack at dawn";
    let mut hash_alg = None;
    let signature = token.sign(slot, AlgorithmId::Rsa2048, message, &mut hash_alg).unwrap();
    let digest = Sha256::digest(message);
    rsa.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, &signature).unwrap();
}

#[test]
#[ignore]
fn ecdh_box_round_trips_through_token() {
    let mut token = TOKEN.lock().unwrap();
    verified(true)(&mut token);

    let slot = SlotId::KeyManagement;
    token
        .ykpiv_generate(slot, AlgorithmId::EccP256, PinPolicy::Default, TouchPolicy::Default)
        .unwrap();

    let plaintext = b"sealed through hardware".to_vec();
    let sealed = ecdh_box::seal_to_token(&mut token, slot, &plaintext, &SealOptions::default()).unwrap();
    let opened = ecdh_box::open_online(&mut token, &sealed, slot, AlgorithmId::EccP256).unwrap();
    assert_eq!(&*opened, &plaintext);
}
