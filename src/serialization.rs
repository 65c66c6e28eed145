//! Thin adapters over BER-TLV for the shapes PIV data objects actually use.
//!
//! PIV tags are either a single byte (`0x70`) or a multi-byte "application"
//! tag such as `0x5FC102` (CHUID) or `0x7F49` (the GEN_ASYM response). This
//! module treats a multi-byte tag's *encoded bytes* as its identity — the
//! same simplification the PIV tooling ecosystem uses, since the small,
//! fixed set of tags this crate cares about never collide under it.

use crate::error::{ctor::*, Result};
use nom::{bytes::complete::take, number::complete::be_u8, IResult};

/// BER-TLV helpers scoped to the tag shapes PIV uses.
pub struct Tlv;

fn parse_tag(input: &[u8]) -> IResult<&[u8], u32> {
    let (input, b0) = be_u8(input)?;
    let mut tag = b0 as u32;
    if b0 & 0x1F != 0x1F {
        return Ok((input, tag));
    }
    let mut rest = input;
    loop {
        let (next, b) = be_u8(rest)?;
        tag = (tag << 8) | (b as u32);
        rest = next;
        if b & 0x80 == 0 {
            break;
        }
    }
    Ok((rest, tag))
}

fn parse_len(input: &[u8]) -> IResult<&[u8], usize> {
    let (input, b0) = be_u8(input)?;
    if b0 & 0x80 == 0 {
        return Ok((input, b0 as usize));
    }
    let nbytes = (b0 & 0x7F) as usize;
    let (input, bytes) = take(nbytes)(input)?;
    let mut len = 0usize;
    for b in bytes {
        len = (len << 8) | (*b as usize);
    }
    Ok((input, len))
}

fn parse_tlv(input: &[u8]) -> IResult<&[u8], (u32, &[u8])> {
    let (input, tag) = parse_tag(input)?;
    let (input, len) = parse_len(input)?;
    let (input, value) = take(len)(input)?;
    Ok((input, (tag, value)))
}

fn tag_width(tag: u32) -> usize {
    if tag <= 0xFF {
        1
    } else if tag <= 0xFFFF {
        2
    } else if tag <= 0xFF_FFFF {
        3
    } else {
        4
    }
}

fn write_len(out: &mut Vec<u8>, len: usize) {
    if len < 0x80 {
        out.push(len as u8);
    } else if len <= 0xFF {
        out.push(0x81);
        out.push(len as u8);
    } else {
        out.push(0x82);
        out.push((len >> 8) as u8);
        out.push(len as u8);
    }
}

impl Tlv {
    /// Parse exactly one `(tag, value)` pair, returning the value and the
    /// unconsumed remainder.
    pub fn parse(buf: &[u8]) -> Result<(u32, &[u8], &[u8])> {
        let (rest, (tag, value)) = parse_tlv(buf).map_err(|_| invalid_data_error())?;
        Ok((tag, value, rest))
    }

    /// Parse a single `(tag, value)` entry and require that it matches
    /// `expected_tag`, returning just the value.
    pub fn parse_single(buf: &[u8], expected_tag: u32) -> Result<Vec<u8>> {
        let (tag, value, _rest) = Tlv::parse(buf)?;
        if tag != expected_tag {
            return Err(piv_tag_error());
        }
        Ok(value.to_vec())
    }

    /// Parse a buffer as a flat sequence of `(tag, value)` entries (no
    /// nesting), e.g. the entries inside an `AC` or `7C` container.
    pub fn parse_all(mut buf: &[u8]) -> Result<Vec<(u32, Vec<u8>)>> {
        let mut out = Vec::new();
        while !buf.is_empty() {
            let (tag, value, rest) = Tlv::parse(buf)?;
            out.push((tag, value.to_vec()));
            buf = rest;
        }
        Ok(out)
    }

    /// Encode `tag || len || data` into a freshly allocated buffer.
    pub fn encode(tag: u32, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(tag_width(tag) + 3 + data.len());
        let width = tag_width(tag);
        for i in (0..width).rev() {
            out.push((tag >> (8 * i)) as u8);
        }
        write_len(&mut out, data.len());
        out.extend_from_slice(data);
        out
    }

    /// Write `tag || len || data` into `buf`, returning the number of bytes
    /// written.
    pub fn write(buf: &mut [u8], tag: u32, data: &[u8]) -> Result<usize> {
        let encoded = Tlv::encode(tag, data);
        if encoded.len() > buf.len() {
            return Err(length_error());
        }
        buf[..encoded.len()].copy_from_slice(&encoded);
        Ok(encoded.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_single_byte_tag() {
        let encoded = Tlv::encode(0x70, b"hello");
        let (tag, value, rest) = Tlv::parse(&encoded).unwrap();
        assert_eq!(tag, 0x70);
        assert_eq!(value, b"hello");
        assert!(rest.is_empty());
    }

    #[test]
    fn round_trips_multi_byte_tag() {
        let encoded = Tlv::encode(0x5FC102, b"chuid-body");
        let (tag, value, _) = Tlv::parse(&encoded).unwrap();
        assert_eq!(tag, 0x5FC102);
        assert_eq!(value, b"chuid-body");
    }

    #[test]
    fn long_form_length() {
        let data = vec![0x42u8; 300];
        let encoded = Tlv::encode(0x53, &data);
        let (tag, value, _) = Tlv::parse(&encoded).unwrap();
        assert_eq!(tag, 0x53);
        assert_eq!(value.len(), 300);
    }

    #[test]
    fn parse_all_walks_flat_sequence() {
        let mut buf = Tlv::encode(0x80, &[0x11]);
        buf.extend(Tlv::encode(0x06, &[0x01, 0x02]));
        let entries = Tlv::parse_all(&buf).unwrap();
        assert_eq!(entries, vec![(0x80, vec![0x11]), (0x06, vec![0x01, 0x02])]);
    }

    #[test]
    fn parse_single_rejects_wrong_tag() {
        let encoded = Tlv::encode(0x70, b"x");
        assert!(Tlv::parse_single(&encoded, 0x71).is_err());
    }

    #[test]
    fn write_rejects_buffer_too_small() {
        let mut buf = [0u8; 2];
        assert!(Tlv::write(&mut buf, 0x70, b"too long").is_err());
    }
}
