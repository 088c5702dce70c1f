//! Git delta instruction streams.
//!
//! A delta payload starts with two size prefixes, the exact length of the
//! base and of the result, followed by instructions:
//! - `1xxxxxxx`: copy from the base. Bits 0-3 select which little-endian
//!   offset bytes follow, bits 4-6 which size bytes follow. A size of zero
//!   means 0x10000.
//! - `0xxxxxxx` (non-zero): insert the next `x` literal bytes.
//! - `0x00` is reserved and rejected.

use super::varint::{decode_size, encode_size};
use super::Result;
use crate::error::PackError;

const COPY: u8 = 0x80;
const MAX_INSERT: usize = 0x7f;
const MAX_COPY: u64 = 0x00ff_ffff;
const DEFAULT_COPY_LEN: u64 = 0x1_0000;

/// One delta instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaInstruction<'a> {
    /// Copy `len` bytes of the base starting at `offset`.
    Copy { offset: u64, len: u64 },
    /// Append literal bytes.
    Insert(&'a [u8]),
}

/// A parsed delta payload: declared sizes plus the instruction bytes.
#[derive(Debug, Clone, Copy)]
pub struct Delta<'a> {
    pub base_size: u64,
    pub target_size: u64,
    instructions: &'a [u8],
}

impl<'a> Delta<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let mut pos = 0;
        let base_size = decode_size(payload, &mut pos)?;
        let target_size = decode_size(payload, &mut pos)?;
        Ok(Self {
            base_size,
            target_size,
            instructions: &payload[pos..],
        })
    }

    pub fn instructions(&self) -> Instructions<'a> {
        Instructions {
            data: self.instructions,
            pos: 0,
        }
    }
}

/// Iterator over the instructions of a delta payload.
pub struct Instructions<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Instructions<'a> {
    fn next_byte(&mut self) -> Result<u8> {
        let byte = *self.data.get(self.pos).ok_or_else(|| {
            PackError::InvalidDelta(format!("copy instruction truncated at {}", self.pos))
        })?;
        self.pos += 1;
        Ok(byte)
    }

    fn decode(&mut self, cmd: u8) -> Result<DeltaInstruction<'a>> {
        if cmd & COPY != 0 {
            let mut offset: u64 = 0;
            for i in 0..4 {
                if cmd & (1 << i) != 0 {
                    offset |= u64::from(self.next_byte()?) << (8 * i);
                }
            }
            let mut len: u64 = 0;
            for i in 0..3 {
                if cmd & (0x10 << i) != 0 {
                    len |= u64::from(self.next_byte()?) << (8 * i);
                }
            }
            if len == 0 {
                len = DEFAULT_COPY_LEN;
            }
            return Ok(DeltaInstruction::Copy { offset, len });
        }

        if cmd == 0 {
            return Err(PackError::InvalidDelta(format!(
                "reserved opcode 0 at {}",
                self.pos - 1
            )));
        }

        let len = usize::from(cmd);
        let start = self.pos;
        let literal = self
            .data
            .get(start..start + len)
            .ok_or_else(|| PackError::InvalidDelta(format!("insert truncated at {start}")))?;
        self.pos += len;
        Ok(DeltaInstruction::Insert(literal))
    }
}

impl<'a> Iterator for Instructions<'a> {
    type Item = Result<DeltaInstruction<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        let cmd = *self.data.get(self.pos)?;
        self.pos += 1;
        let item = self.decode(cmd);
        if item.is_err() {
            self.pos = self.data.len();
        }
        Some(item)
    }
}

/// Apply a delta payload to `base`.
pub fn apply(base: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
    let delta = Delta::parse(payload)?;
    apply_instructions(base, delta.base_size, delta.target_size, delta.instructions())
}

/// Apply already-decoded instructions, checking every declared size.
pub fn apply_instructions<'a, I>(
    base: &[u8],
    base_size: u64,
    target_size: u64,
    instructions: I,
) -> Result<Vec<u8>>
where
    I: IntoIterator<Item = Result<DeltaInstruction<'a>>>,
{
    if base_size != base.len() as u64 {
        return Err(PackError::DeltaBaseSizeMismatch {
            expected: base_size,
            actual: base.len() as u64,
        });
    }

    // The declared target size comes from untrusted input.
    let mut out = Vec::with_capacity(target_size.min(1 << 24) as usize);
    for instruction in instructions {
        let chunk = match instruction? {
            DeltaInstruction::Copy { offset, len } => {
                let end = offset
                    .checked_add(len)
                    .filter(|end| *end <= base_size)
                    .ok_or(PackError::DeltaCopyOutOfRange {
                        offset,
                        len,
                        base_size,
                    })?;
                &base[offset as usize..end as usize]
            }
            DeltaInstruction::Insert(literal) => literal,
        };

        let produced = out.len() as u64 + chunk.len() as u64;
        if produced > target_size {
            return Err(PackError::DeltaLengthMismatch {
                expected: target_size,
                actual: produced,
            });
        }
        out.extend_from_slice(chunk);
    }

    if out.len() as u64 != target_size {
        return Err(PackError::DeltaLengthMismatch {
            expected: target_size,
            actual: out.len() as u64,
        });
    }
    Ok(out)
}

/// Serialize instructions into a delta payload. Long inserts and copies are
/// split to fit the instruction encoding.
pub fn encode_instructions(
    base_size: u64,
    target_size: u64,
    instructions: &[DeltaInstruction<'_>],
) -> Vec<u8> {
    let mut out = Vec::new();
    encode_size(base_size, &mut out);
    encode_size(target_size, &mut out);

    for instruction in instructions {
        match *instruction {
            DeltaInstruction::Copy { mut offset, mut len } => {
                while len > 0 {
                    let step = len.min(MAX_COPY);
                    encode_copy(offset, step, &mut out);
                    offset += step;
                    len -= step;
                }
            }
            DeltaInstruction::Insert(literal) => {
                for chunk in literal.chunks(MAX_INSERT) {
                    out.push(chunk.len() as u8);
                    out.extend_from_slice(chunk);
                }
            }
        }
    }
    out
}

fn encode_copy(offset: u64, len: u64, out: &mut Vec<u8>) {
    let cmd_pos = out.len();
    out.push(COPY);
    let mut cmd = COPY;
    for i in 0..4 {
        let byte = (offset >> (8 * i)) as u8;
        if byte != 0 {
            cmd |= 1 << i;
            out.push(byte);
        }
    }
    if len != DEFAULT_COPY_LEN {
        for i in 0..3 {
            let byte = (len >> (8 * i)) as u8;
            if byte != 0 {
                cmd |= 0x10 << i;
                out.push(byte);
            }
        }
    }
    out[cmd_pos] = cmd;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_instructions<'a>(
        instructions: &'a [DeltaInstruction<'a>],
    ) -> impl Iterator<Item = Result<DeltaInstruction<'a>>> + 'a {
        instructions.iter().copied().map(Ok)
    }

    #[test]
    fn test_copy_insert_copy() {
        let instructions = [
            DeltaInstruction::Copy { offset: 0, len: 3 },
            DeltaInstruction::Insert(b"X"),
            DeltaInstruction::Copy { offset: 3, len: 2 },
        ];
        let out = apply_instructions(b"abcde", 5, 6, ok_instructions(&instructions)).unwrap();
        assert_eq!(out, b"abcXde");

        let payload = encode_instructions(5, 6, &instructions);
        assert_eq!(apply(b"abcde", &payload).unwrap(), b"abcXde");
    }

    #[test]
    fn test_wrong_target_size() {
        let instructions = [
            DeltaInstruction::Copy { offset: 0, len: 3 },
            DeltaInstruction::Insert(b"X"),
            DeltaInstruction::Copy { offset: 3, len: 2 },
        ];
        let err = apply_instructions(b"abcde", 5, 7, ok_instructions(&instructions)).unwrap_err();
        assert!(matches!(
            err,
            PackError::DeltaLengthMismatch {
                expected: 7,
                actual: 6
            }
        ));

        let err = apply_instructions(b"abcde", 5, 5, ok_instructions(&instructions)).unwrap_err();
        assert!(matches!(err, PackError::DeltaLengthMismatch { expected: 5, .. }));
    }

    #[test]
    fn test_base_size_mismatch() {
        let payload = encode_instructions(4, 1, &[DeltaInstruction::Insert(b"a")]);
        assert!(matches!(
            apply(b"abcde", &payload),
            Err(PackError::DeltaBaseSizeMismatch {
                expected: 4,
                actual: 5
            })
        ));
    }

    #[test]
    fn test_copy_out_of_range() {
        let payload = encode_instructions(5, 4, &[DeltaInstruction::Copy { offset: 2, len: 4 }]);
        assert!(matches!(
            apply(b"abcde", &payload),
            Err(PackError::DeltaCopyOutOfRange {
                offset: 2,
                len: 4,
                base_size: 5
            })
        ));
    }

    #[test]
    fn test_reserved_opcode() {
        let mut payload = encode_instructions(5, 1, &[]);
        payload.push(0x00);
        assert!(matches!(
            apply(b"abcde", &payload),
            Err(PackError::InvalidDelta(_))
        ));
    }

    #[test]
    fn test_truncated_insert() {
        let mut payload = encode_instructions(0, 4, &[]);
        payload.extend_from_slice(&[0x04, b'a', b'b']);
        assert!(matches!(apply(b"", &payload), Err(PackError::InvalidDelta(_))));
    }

    #[test]
    fn test_copy_encoding() {
        // offset 0x0100, len 0x10000 encodes as only the second offset byte.
        let payload = encode_instructions(
            0x20000,
            0x10000,
            &[DeltaInstruction::Copy {
                offset: 0x0100,
                len: 0x10000,
            }],
        );
        let delta = Delta::parse(&payload).unwrap();
        let instructions: Vec<_> = delta.instructions().collect::<Result<_>>().unwrap();
        assert_eq!(
            instructions,
            vec![DeltaInstruction::Copy {
                offset: 0x0100,
                len: 0x10000
            }]
        );
        assert_eq!(&payload[payload.len() - 2..], &[0x82, 0x01]);
    }

    #[test]
    fn test_long_insert_is_split() {
        let literal = vec![b'z'; 300];
        let payload = encode_instructions(0, 300, &[DeltaInstruction::Insert(&literal)]);
        let delta = Delta::parse(&payload).unwrap();
        assert_eq!(delta.instructions().count(), 3);
        assert_eq!(apply(b"", &payload).unwrap(), literal);
    }
}
