//! Primitive value encoding shared by every SIMP subject.
//!
//! Numbers are fixed width and big-endian. Strings are terminated by
//! [`DELIMITER`]; a delimiter or escape byte inside a string is prefixed
//! with [`ESCAPE`]. Colors are `[` + four packed floats + `]`.

use glam::Vec4;

pub const DELIMITER: u8 = b';';
pub const ESCAPE: u8 = b'\\';
pub const COLOR_OPEN: u8 = b'[';
pub const COLOR_CLOSE: u8 = b']';
pub const COLOR_WIDTH: usize = 2 + 4 * 4;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("need {needed} bytes at offset {offset}, only {available} remain")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },
    #[error("invalid bool byte {0:#04x}")]
    InvalidBool(u8),
    #[error("no delimiter found after offset {offset}")]
    MissingDelimiter { offset: usize },
    #[error("offset {offset} is at or past the end of a {len} byte buffer")]
    UnexpectedEnd { offset: usize, len: usize },
    #[error("malformed color at offset {offset}")]
    MalformedColor { offset: usize },
    #[error("string at offset {offset} is not valid utf-8")]
    InvalidUtf8 { offset: usize },
}

fn take<const N: usize>(bytes: &[u8], offset: usize) -> Result<[u8; N], CodecError> {
    let available = bytes.len().saturating_sub(offset);
    if available < N {
        return Err(CodecError::Truncated {
            offset,
            needed: N,
            available,
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[offset..offset + N]);
    Ok(out)
}

#[inline]
pub fn encode_f32(value: f32) -> [u8; 4] {
    value.to_be_bytes()
}

pub fn decode_f32(bytes: &[u8], offset: usize) -> Result<(f32, usize), CodecError> {
    let raw = take::<4>(bytes, offset)?;
    Ok((f32::from_be_bytes(raw), offset + 4))
}

#[inline]
pub fn encode_i32(value: i32) -> [u8; 4] {
    value.to_be_bytes()
}

pub fn decode_i32(bytes: &[u8], offset: usize) -> Result<(i32, usize), CodecError> {
    let raw = take::<4>(bytes, offset)?;
    Ok((i32::from_be_bytes(raw), offset + 4))
}

#[inline]
pub fn encode_u32(value: u32) -> [u8; 4] {
    value.to_be_bytes()
}

pub fn decode_u32(bytes: &[u8], offset: usize) -> Result<(u32, usize), CodecError> {
    let raw = take::<4>(bytes, offset)?;
    Ok((u32::from_be_bytes(raw), offset + 4))
}

#[inline]
pub fn encode_bool(value: bool) -> [u8; 1] {
    [value as u8]
}

pub fn decode_bool(bytes: &[u8], offset: usize) -> Result<(bool, usize), CodecError> {
    let [raw] = take::<1>(bytes, offset)?;
    match raw {
        0x00 => Ok((false, offset + 1)),
        0x01 => Ok((true, offset + 1)),
        other => Err(CodecError::InvalidBool(other)),
    }
}

/// Appends `value` escaped, followed by the delimiter. A backslash is only
/// doubled where the decoder would otherwise read it as an escape: before
/// `;`, before another backslash, or at the end.
pub fn write_string(out: &mut Vec<u8>, value: &str) {
    let bytes = value.as_bytes();
    out.reserve(bytes.len() + 1);
    for (i, &byte) in bytes.iter().enumerate() {
        let escaped = match byte {
            DELIMITER => true,
            ESCAPE => matches!(bytes.get(i + 1), None | Some(&DELIMITER) | Some(&ESCAPE)),
            _ => false,
        };
        if escaped {
            out.push(ESCAPE);
        }
        out.push(byte);
    }
    out.push(DELIMITER);
}

pub fn encode_string(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len() + 1);
    write_string(&mut out, value);
    out
}

/// Reads up to the first unescaped delimiter and returns the offset just
/// past it. `\;` and `\\` collapse to a single byte; any other escaped byte
/// is kept as written.
pub fn decode_string(bytes: &[u8], offset: usize) -> Result<(String, usize), CodecError> {
    if offset >= bytes.len() {
        return Err(CodecError::UnexpectedEnd {
            offset,
            len: bytes.len(),
        });
    }

    let mut value = Vec::new();
    let mut i = offset;
    while i < bytes.len() {
        match bytes[i] {
            ESCAPE => match bytes.get(i + 1) {
                Some(&next) if next == DELIMITER || next == ESCAPE => {
                    value.push(next);
                    i += 2;
                }
                Some(&next) => {
                    value.push(ESCAPE);
                    value.push(next);
                    i += 2;
                }
                None => break,
            },
            DELIMITER => {
                let value =
                    String::from_utf8(value).map_err(|_| CodecError::InvalidUtf8 { offset })?;
                return Ok((value, i + 1));
            }
            byte => {
                value.push(byte);
                i += 1;
            }
        }
    }

    Err(CodecError::MissingDelimiter { offset })
}

pub fn encode_color(color: Vec4) -> [u8; COLOR_WIDTH] {
    let mut out = [0u8; COLOR_WIDTH];
    out[0] = COLOR_OPEN;
    for (i, channel) in color.to_array().into_iter().enumerate() {
        out[1 + i * 4..5 + i * 4].copy_from_slice(&encode_f32(channel));
    }
    out[COLOR_WIDTH - 1] = COLOR_CLOSE;
    out
}

pub fn decode_color(bytes: &[u8], offset: usize) -> Result<(Vec4, usize), CodecError> {
    let raw = take::<COLOR_WIDTH>(bytes, offset)?;
    if raw[0] != COLOR_OPEN {
        return Err(CodecError::MalformedColor { offset });
    }
    if raw[COLOR_WIDTH - 1] != COLOR_CLOSE {
        return Err(CodecError::MalformedColor {
            offset: offset + COLOR_WIDTH - 1,
        });
    }

    let mut channels = [0.0f32; 4];
    for (i, channel) in channels.iter_mut().enumerate() {
        (*channel, _) = decode_f32(&raw, 1 + i * 4)?;
    }
    Ok((Vec4::from_array(channels), offset + COLOR_WIDTH))
}

/// Bounds-checked cursor over exactly one subject.
///
/// The cursor never looks past the slice it was created with, so a larger
/// socket buffer behind the subject can not leak into decoding.
#[derive(Debug, Clone)]
pub struct SubjectReader<'a> {
    subject: &'a [u8],
    offset: usize,
}

impl<'a> SubjectReader<'a> {
    pub fn new(subject: &'a [u8]) -> Self {
        Self { subject, offset: 0 }
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.subject.len().saturating_sub(self.offset)
    }

    pub fn is_at_end(&self) -> bool {
        self.offset >= self.subject.len()
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        let (value, offset) = decode_f32(self.subject, self.offset)?;
        self.offset = offset;
        Ok(value)
    }

    pub fn read_i32(&mut self) -> Result<i32, CodecError> {
        let (value, offset) = decode_i32(self.subject, self.offset)?;
        self.offset = offset;
        Ok(value)
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let (value, offset) = decode_u32(self.subject, self.offset)?;
        self.offset = offset;
        Ok(value)
    }

    pub fn read_bool(&mut self) -> Result<bool, CodecError> {
        let (value, offset) = decode_bool(self.subject, self.offset)?;
        self.offset = offset;
        Ok(value)
    }

    pub fn read_string(&mut self) -> Result<String, CodecError> {
        let (value, offset) = decode_string(self.subject, self.offset)?;
        self.offset = offset;
        Ok(value)
    }

    pub fn read_color(&mut self) -> Result<Vec4, CodecError> {
        let (value, offset) = decode_color(self.subject, self.offset)?;
        self.offset = offset;
        Ok(value)
    }

    /// Reads `count` packed floats, rejecting counts the subject can not hold
    /// before allocating.
    pub fn read_f32_array(&mut self, count: u32) -> Result<Vec<f32>, CodecError> {
        let available = self.remaining();
        let needed = (count as usize).checked_mul(4).unwrap_or(usize::MAX);
        if needed > available {
            return Err(CodecError::Truncated {
                offset: self.offset,
                needed,
                available,
            });
        }

        let mut values = Vec::with_capacity(count as usize);
        for _ in 0..count {
            values.push(self.read_f32()?);
        }
        Ok(values)
    }
}
