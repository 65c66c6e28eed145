//! X.509 certificate support.
//!
//! Adapted from yubico-piv-tool:
//! <https://github.com/Yubico/yubico-piv-tool/>
//
// Copyright (c) 2014-2016 Yubico AB
// All rights reserved.
//
// Redistribution and use in source and binary forms, with or without
// modification, are permitted provided that the following conditions are
// met:
//
//   * Redistributions of source code must retain the above copyright
//     notice, this list of conditions and the following disclaimer.
//
//   * Redistributions in binary form must reproduce the above
//     copyright notice, this list of conditions and the following
//     disclaimer in the documentation and/or other materials provided
//     with the distribution.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS
// "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT
// LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR
// A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT
// OWNER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT
// LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE,
// DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY
// THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT
// (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE
// OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use std::{
    io::Read,
    str::FromStr,
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use der::{
    asn1::{OctetString, UtcTime},
    Decode, Encode, Sequence,
};
use flate2::read::GzDecoder;
use rsa::pkcs1::RsaPublicKey;
use signature::{digest::Digest, Keypair};
use spki::{
    AlgorithmIdentifierOwned, DynSignatureAlgorithmIdentifier, EncodePublicKey,
    SubjectPublicKeyInfoOwned,
};
use x509_cert::{
    builder::{Builder, CertificateBuilder, Profile},
    name::Name,
    serial_number::SerialNumber,
    time::{Time, Validity},
    Certificate,
};

use crate::{
    consts::{CB_OBJ_MAX, CERTINFO_GZIP, CERTINFO_X509_COMPRESS, TAG_CERT, TAG_CERT_INFO, TAG_CERT_LRC},
    error::{ctor::*, Result},
    piv::{AlgorithmId, PublicKeyMaterial, SlotId},
    serialization::Tlv,
    transaction::{fetch_object, save_object},
    yubikey_signer::YubiKeySigningKey,
};

/// from RFC8017
///    DigestInfo ::= SEQUENCE {
///      digestAlgorithm DigestAlgorithmIdentifier,
///      digest Digest }
#[derive(Clone, Debug, Eq, PartialEq, Sequence)]
pub struct DigestInfo {
    /// algorithm ID for the hash function
    pub digest_algorithm: AlgorithmIdentifierOwned,
    /// hash value
    pub digest: OctetString,
}

/// Creates a new self-signed certificate for the given key. Does not write
/// it to the card; callers pass the DER through [`crate::piv::write_cert`].
#[allow(clippy::too_many_arguments)]
pub fn generate_self_signed<'a, D>(
    signer: YubiKeySigningKey<'a, D>,
    serial: &[u8],
    opt_not_after: Option<Time>,
    subject: &str,
) -> Result<Certificate>
where
    D: Digest,
    YubiKeySigningKey<'a, D>: Keypair,
    YubiKeySigningKey<'a, D>: DynSignatureAlgorithmIdentifier,
    <YubiKeySigningKey<'a, D> as Keypair>::VerifyingKey: EncodePublicKey,
{
    let vk = signer.verifying_key();
    let serial_number = SerialNumber::new(serial).map_err(|_| invalid_data_error())?;
    let ten_years = Duration::from_secs(365 * 24 * 60 * 60 * 10);
    let not_after_time = SystemTime::now()
        .checked_add(ten_years)
        .ok_or_else(invalid_data_error)?;
    let not_after = match opt_not_after {
        Some(na) => na,
        None => Time::UtcTime(
            UtcTime::from_unix_duration(
                not_after_time
                    .duration_since(UNIX_EPOCH)
                    .map_err(|_| invalid_data_error())?,
            )
            .map_err(|_| invalid_data_error())?,
        ),
    };

    let validity = Validity {
        not_before: Time::UtcTime(
            UtcTime::from_unix_duration(
                SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_err(|_| invalid_data_error())?,
            )
            .map_err(|_| invalid_data_error())?,
        ),
        not_after,
    };

    let subject_der = Name::from_str(subject)
        .map_err(|_| invalid_data_error())?
        .to_der()
        .map_err(|_| invalid_data_error())?;
    let subject_name = Name::from_der(&subject_der).map_err(|_| invalid_data_error())?;

    let spki_buf = vk.to_public_key_der().map_err(|_| invalid_data_error())?;
    let spki =
        SubjectPublicKeyInfoOwned::from_der(spki_buf.as_bytes()).map_err(|_| invalid_data_error())?;

    let builder = CertificateBuilder::new(
        Profile::Root,
        serial_number,
        validity,
        subject_name,
        spki,
        &signer,
    )
    .map_err(|_| invalid_data_error())?;

    builder.build().map_err(|_| invalid_data_error())
}

/// Read the raw certificate object for `slot`, inflating it if the card
/// marked it GZIP-compressed. Returns `(cert_der, cert_info_byte)`.
pub fn read_certificate(card: &pcsc::Card, slot: SlotId) -> Result<(Vec<u8>, u8)> {
    let object_id = slot.cert_object_id();
    let buf = fetch_object(card, &object_id)?;
    if buf.is_empty() {
        return Err(not_found_error());
    }

    let (tag, value, rest) = Tlv::parse(&buf)?;
    if tag != TAG_CERT as u32 {
        return Err(piv_tag_error());
    }

    let cert_info = Tlv::parse_all(rest)
        .ok()
        .and_then(|entries| {
            entries
                .into_iter()
                .find(|(t, _)| *t == TAG_CERT_INFO as u32)
                .map(|(_, v)| v)
        })
        .and_then(|v| v.first().copied())
        .unwrap_or(0);

    if cert_info & CERTINFO_X509_COMPRESS != 0 {
        return Err(cert_flag_error());
    }

    let der = if cert_info & CERTINFO_GZIP != 0 {
        inflate_capped(value, CB_OBJ_MAX)?
    } else {
        value.to_vec()
    };

    Ok((der, cert_info))
}

fn inflate_capped(compressed: &[u8], cap: usize) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(compressed);
    let mut out = Vec::new();
    let mut limiter = (&mut decoder).take(cap as u64 + 1);
    limiter
        .read_to_end(&mut out)
        .map_err(|_| decompression_error())?;
    if out.len() > cap {
        return Err(decompression_error());
    }
    Ok(out)
}

/// Write `cert_der` into `slot`'s certificate object, wrapped in the
/// `70/71/FE` container. `data = None` clears the slot.
pub fn write_certificate(
    card: &pcsc::Card,
    slot: SlotId,
    data: Option<&[u8]>,
    cert_info: u8,
) -> Result<()> {
    let object_id = slot.cert_object_id();

    let Some(data) = data else {
        return save_object(card, &object_id, &[]);
    };

    let mut body = Tlv::encode(TAG_CERT as u32, data);
    body.extend(Tlv::encode(TAG_CERT_INFO as u32, &[cert_info]));
    body.extend(Tlv::encode(TAG_CERT_LRC as u32, &[]));
    save_object(card, &object_id, &body)
}

/// Extract the subject public key from a DER certificate, as
/// [`PublicKeyMaterial`], determining RSA vs EC and the curve/modulus size
/// from the SPKI itself.
pub fn subject_public_key(cert_der: &[u8]) -> Result<PublicKeyMaterial> {
    let cert = Certificate::from_der(cert_der).map_err(|_| invalid_data_error())?;
    let spki = &cert.tbs_certificate.subject_public_key_info;
    let raw = spki
        .subject_public_key
        .as_bytes()
        .ok_or_else(invalid_data_error)?;

    // rsaEncryption: 1.2.840.113549.1.1.1
    if spki.algorithm.oid.to_string() == "1.2.840.113549.1.1.1" {
        let pk = RsaPublicKey::from_der(raw).map_err(|_| invalid_data_error())?;
        return Ok(PublicKeyMaterial::Rsa {
            modulus: pk.modulus.as_bytes().to_vec(),
            exponent: pk.public_exponent.as_bytes().to_vec(),
        });
    }

    // id-ecPublicKey: 1.2.840.10045.2.1; point is the raw SPKI bit string.
    let algorithm = match raw.len() {
        65 => AlgorithmId::EccP256,
        97 => AlgorithmId::EccP384,
        _ => return Err(bad_algorithm_error()),
    };
    Ok(PublicKeyMaterial::Ec {
        algorithm,
        point: raw.to_vec(),
    })
}

/// Extract the subject distinguished name from a DER certificate, formatted
/// the way [`x509_cert::name::Name`]'s `Display` renders it (RFC 4514).
pub fn subject_name(cert_der: &[u8]) -> Result<String> {
    let cert = Certificate::from_der(cert_der).map_err(|_| invalid_data_error())?;
    Ok(cert.tbs_certificate.subject.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inflate_capped_rejects_oversized_output() {
        use flate2::{write::GzEncoder, Compression};
        use std::io::Write;

        let big = vec![0x41u8; CB_OBJ_MAX + 1];
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&big).unwrap();
        let compressed = enc.finish().unwrap();

        assert!(inflate_capped(&compressed, CB_OBJ_MAX).is_err());
    }

    #[test]
    fn inflate_capped_allows_exact_cap() {
        use flate2::{write::GzEncoder, Compression};
        use std::io::Write;

        let exact = vec![0x41u8; CB_OBJ_MAX];
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(&exact).unwrap();
        let compressed = enc.finish().unwrap();

        let out = inflate_capped(&compressed, CB_OBJ_MAX).unwrap();
        assert_eq!(out.len(), CB_OBJ_MAX);
    }
}
