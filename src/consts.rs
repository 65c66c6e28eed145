//! Wire-level constants: instruction bytes, tags, and sizes from NIST
//! SP 800-73-4 and the YubicoPIV vendor extension.

/// The PIV application identifier.
pub const PIV_AID: &[u8] = &[
    0xA0, 0x00, 0x00, 0x03, 0x08, 0x00, 0x00, 0x10, 0x00, 0x01, 0x00,
];

/// Maximum size of a short-form APDU reply, including a generous margin
/// for certificate objects.
pub const MAX_APDU_SIZE: usize = 3072;

/// Maximum number of data bytes in a single chained command segment.
pub const APDU_CHAIN_SEGMENT: usize = 255;

/// Cap on decompressed certificate payloads (post-GZIP-inflate).
pub const CB_OBJ_MAX: usize = 16384;

// Instruction bytes.
pub const INS_SELECT: u8 = 0xA4;
pub const INS_VERIFY: u8 = 0x20;
pub const INS_CHANGE_REFERENCE: u8 = 0x24;
pub const INS_RESET_RETRY: u8 = 0x2C;
pub const INS_GEN_AUTH: u8 = 0x87;
pub const INS_GET_DATA: u8 = 0xCB;
pub const INS_PUT_DATA: u8 = 0xDB;
pub const INS_GEN_ASYMMETRIC: u8 = 0x47;
pub const INS_CONTINUE: u8 = 0xC0;
pub const INS_SET_MGMKEY: u8 = 0xFF;
pub const INS_IMPORT_KEY: u8 = 0xFE;
pub const INS_GET_VERSION: u8 = 0xFD;
pub const INS_SET_PIN_RETRIES: u8 = 0xFA;
pub const INS_ATTEST: u8 = 0xF9;
pub const INS_GET_SERIAL: u8 = 0xF8;
pub const INS_RESET: u8 = 0xFB;
pub const INS_GET_METADATA: u8 = 0xF7;

// CLA chaining bit (ISO 7816-4 §10.1.1).
pub const CLA_CHAIN: u8 = 0x10;

// PIN kinds (P2 for VERIFY/CHANGE/RESET).
pub const PIN_P2: u8 = 0x80;
pub const GLOBAL_PIN_P2: u8 = 0x00;

// Algorithm identifiers.
pub const ALGO_3DES: u8 = 0x03;
pub const ALGO_RSA1024: u8 = 0x06;
pub const ALGO_RSA2048: u8 = 0x07;
pub const ALGO_AES128: u8 = 0x08;
pub const ALGO_AES192: u8 = 0x0A;
pub const ALGO_AES256: u8 = 0x0C;
pub const ALGO_ECCP256: u8 = 0x11;
pub const ALGO_ECCP384: u8 = 0x14;
pub const ALGO_ECCP256_SHA1: u8 = 0xF0;
pub const ALGO_ECCP256_SHA256: u8 = 0xF1;
pub const ALGO_ECCP384_SHA1: u8 = 0xF2;
pub const ALGO_ECCP384_SHA256: u8 = 0xF3;
pub const ALGO_ECCP384_SHA384: u8 = 0xF4;

// File/object tags.
pub const TAG_CHUID: u32 = 0x5FC102;
pub const TAG_DISCOVERY: u32 = 0x7E;
pub const TAG_KEY_HISTORY: u32 = 0x5FC10C;
pub const TAG_ADMIN_DATA: u32 = 0x5FFF00;

// GEN_AUTH dynamic authentication template tags.
pub const TAG_DYN_AUTH: u8 = 0x7C;
pub const TAG_AUTH_WITNESS: u8 = 0x81;
pub const TAG_AUTH_CHALLENGE: u8 = 0x82;
pub const TAG_AUTH_EXPONENTIATION: u8 = 0x85;

// GET_DATA/PUT_DATA wrapper tags.
pub const TAG_OBJ_ID: u8 = 0x5C;
pub const TAG_OBJ_DATA: u8 = 0x53;

// Certificate container tags.
pub const TAG_CERT: u8 = 0x70;
pub const TAG_CERT_INFO: u8 = 0x71;
pub const TAG_CERT_LRC: u8 = 0xFE;

// Per-slot certificate object ids (GET_DATA/PUT_DATA tag).
pub const TAG_CERT_9A: u32 = 0x5FC105;
pub const TAG_CERT_9C: u32 = 0x5FC10A;
pub const TAG_CERT_9D: u32 = 0x5FC10B;
pub const TAG_CERT_9E: u32 = 0x5FC101;
/// Retired slot `0x82` maps here; slot `n` maps to `TAG_CERT_RETIRED_BASE + (n - 0x82)`.
pub const TAG_CERT_RETIRED_BASE: u32 = 0x5FC10D;

/// `CertInfo` bit selecting GZIP compression.
pub const CERTINFO_GZIP: u8 = 0x01;
/// `CertInfo` bit for the (unsupported) X.509-certificate compression scheme.
pub const CERTINFO_X509_COMPRESS: u8 = 0x04;

// GEN_ASYM response container.
pub const TAG_GEN_ASYM_RESP: u8 = 0x7F49;
pub const TAG_RSA_MODULUS: u8 = 0x81;
pub const TAG_RSA_EXPONENT: u8 = 0x82;
pub const TAG_EC_POINT: u8 = 0x86;

// GEN_ASYM request container.
pub const TAG_GEN_ASYM_REQ: u8 = 0xAC;
pub const TAG_ALGORITHM: u8 = 0x80;
pub const TAG_PIN_POLICY: u8 = 0xAA;
pub const TAG_TOUCH_POLICY: u8 = 0xAB;

// Slot metadata (GET_METADATA) response tags.
pub const TAG_METADATA_ALGO: u8 = 0x01;
pub const TAG_METADATA_POLICY: u8 = 0x02;
pub const TAG_METADATA_PUBLIC_KEY: u8 = 0x03;

// Private-key import component tags.
pub const TAG_RSA_P: u8 = 0x01;
pub const TAG_RSA_Q: u8 = 0x02;
pub const TAG_RSA_DMP1: u8 = 0x03;
pub const TAG_RSA_DMQ1: u8 = 0x04;
pub const TAG_RSA_IQMP: u8 = 0x05;
pub const TAG_EC_PRIVATE: u8 = 0x06;

// Yubico PIV attestation extension.
/// `1.3.6.1.4.1.41482.3.8` — pin/touch policy embedded in attestation certs.
pub const YUBICO_POLICY_EXTENSION_OID: &[u64] = &[1, 3, 6, 1, 4, 1, 41482, 3, 8];

// Slot ids.
pub const SLOT_AUTHENTICATION: u8 = 0x9A;
pub const SLOT_SIGNATURE: u8 = 0x9C;
pub const SLOT_KEY_MANAGEMENT: u8 = 0x9D;
pub const SLOT_CARD_AUTHENTICATION: u8 = 0x9E;
pub const SLOT_ATTESTATION: u8 = 0xF9;
pub const SLOT_ADMIN: u8 = 0x9B;
pub const SLOT_RETIRED_FIRST: u8 = 0x82;
pub const SLOT_RETIRED_LAST: u8 = 0x95;

/// Maximum on-card + off-card retired key history entries.
pub const MAX_KEY_HISTORY: u8 = 20;

// Status words (or prefixes, where the low byte is data-dependent).
pub const SW_SUCCESS: u16 = 0x9000;
pub const SW_FILE_INVALID: u16 = 0x6983;
pub const SW_SECURITY_STATUS_NOT_SATISFIED: u16 = 0x6982;
pub const SW_WRONG_LENGTH: u16 = 0x6700;
pub const SW_WRONG_DATA: u16 = 0x6A80;
pub const SW_FUNC_NOT_SUPPORTED: u16 = 0x6A81;
pub const SW_FILE_NOT_FOUND: u16 = 0x6A82;
pub const SW_OUT_OF_MEMORY: u16 = 0x6A84;
pub const SW_INCORRECT_PARAM: u16 = 0x6A86;
pub const SW_INS_NOT_SUPPORTED: u16 = 0x6D00;
