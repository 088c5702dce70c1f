//! Variable-length integers used by the pack format.
//!
//! Three encodings share the 7-bits-per-byte, high-bit-continues scheme:
//! - entry headers: 3-bit type and 4 size bits in the first byte, further
//!   size bits little-endian;
//! - OFS-delta distances: big-endian, with a +1 bias on every continuation
//!   byte so that each length has a distinct value range;
//! - delta size prefixes: plain little-endian base-128.

use std::io::Read;

use super::{ObjectType, Result};
use crate::error::PackError;

const CONTINUE: u8 = 0x80;
const LOW7: u8 = 0x7f;
const FIRST_SIZE_BITS: u32 = 4;
const FIRST_SIZE_MASK: u8 = 0x0f;

/// Longest valid header: 4 bits + 9 * 7 bits covers a `u64` size.
const MAX_HEADER_BYTES: usize = 10;

/// Append the type+size header of an entry to `out`.
pub fn encode_entry_header(object_type: ObjectType, size: u64, out: &mut Vec<u8>) {
    let mut byte = (object_type.code() << FIRST_SIZE_BITS) | (size as u8 & FIRST_SIZE_MASK);
    let mut rest = size >> FIRST_SIZE_BITS;
    while rest != 0 {
        out.push(byte | CONTINUE);
        byte = rest as u8 & LOW7;
        rest >>= 7;
    }
    out.push(byte);
}

/// Read a type+size header. Returns the raw 3-bit type code, the size and
/// the number of bytes consumed.
pub fn decode_entry_header<R: Read>(reader: &mut R) -> Result<(u8, u64, usize)> {
    let mut byte = read_byte(reader)?;
    let code = (byte >> FIRST_SIZE_BITS) & 0x07;
    let mut size = u64::from(byte & FIRST_SIZE_MASK);
    let mut shift = FIRST_SIZE_BITS;
    let mut consumed = 1;

    while byte & CONTINUE != 0 {
        if consumed == MAX_HEADER_BYTES {
            return Err(PackError::MalformedHeader(
                "entry size does not fit in 64 bits".to_string(),
            ));
        }
        byte = read_byte(reader)?;
        consumed += 1;
        let bits = u64::from(byte & LOW7);
        if shift == 60 && bits > 0x0f {
            return Err(PackError::MalformedHeader(
                "entry size does not fit in 64 bits".to_string(),
            ));
        }
        size |= bits << shift;
        shift += 7;
    }

    Ok((code, size, consumed))
}

/// Append the OFS-delta distance (entry offset minus base offset).
pub fn encode_offset(distance: u64, out: &mut Vec<u8>) {
    let mut buf = [0u8; MAX_HEADER_BYTES];
    let mut pos = buf.len() - 1;
    let mut value = distance;
    buf[pos] = value as u8 & LOW7;
    value >>= 7;
    while value != 0 {
        value -= 1;
        pos -= 1;
        buf[pos] = CONTINUE | (value as u8 & LOW7);
        value >>= 7;
    }
    out.extend_from_slice(&buf[pos..]);
}

/// Read an OFS-delta distance. Returns the distance and bytes consumed.
pub fn decode_offset<R: Read>(reader: &mut R) -> Result<(u64, usize)> {
    let mut byte = read_byte(reader)?;
    let mut value = u64::from(byte & LOW7);
    let mut consumed = 1;

    while byte & CONTINUE != 0 {
        if consumed == MAX_HEADER_BYTES {
            return Err(PackError::MalformedHeader(
                "delta base offset does not fit in 64 bits".to_string(),
            ));
        }
        byte = read_byte(reader)?;
        consumed += 1;
        value = value
            .checked_add(1)
            .and_then(|v| v.checked_mul(128))
            .map(|v| v | u64::from(byte & LOW7))
            .ok_or_else(|| {
                PackError::MalformedHeader("delta base offset does not fit in 64 bits".to_string())
            })?;
    }

    Ok((value, consumed))
}

/// Append a little-endian base-128 size, as used by delta prefixes.
pub fn encode_size(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = value as u8 & LOW7;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | CONTINUE);
    }
}

/// Read a little-endian base-128 size from `data` starting at `*pos`.
pub fn decode_size(data: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *data
            .get(*pos)
            .ok_or_else(|| PackError::InvalidDelta("truncated size prefix".to_string()))?;
        *pos += 1;
        if shift > 63 || (shift == 63 && byte & LOW7 > 1) {
            return Err(PackError::InvalidDelta(
                "size prefix does not fit in 64 bits".to_string(),
            ));
        }
        value |= u64::from(byte & LOW7) << shift;
        if byte & CONTINUE == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

fn read_byte<R: Read>(reader: &mut R) -> Result<u8> {
    let mut byte = [0u8; 1];
    reader.read_exact(&mut byte)?;
    Ok(byte[0])
}
