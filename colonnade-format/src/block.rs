//! Column block encode/decode, grounded in
//! `examples/original_source/src/sframe/sarray_v2_encoded_block.{hpp,cpp}`
//! for the header shape and the compress-or-store decision.
//!
//! A block is the atomic unit of decompression and cache residency: a fixed
//! header followed by a (possibly gzip-compressed) payload encoding
//! `element_count` flexible values of one declared `ValueType` (`Undefined`
//! cells are permitted within a typed block).

use colonnade_core::{ColonnadeError, ColonnadeResult, DateTimeValue, ImageData, ImageFormat, Value, ValueType};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};

pub const FLAG_COMPRESSED: u8 = 0x1;

/// Fixed-size little-endian header preceding every block's payload.
#[derive(Debug, Clone, Copy)]
pub struct BlockHeader {
    pub uncompressed_size: u32,
    pub compressed_size: u32,
    pub element_count: u32,
    pub flags: u8,
    pub element_type: u8,
}

impl BlockHeader {
    pub const ENCODED_LEN: usize = 4 + 4 + 4 + 1 + 1;

    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESSED != 0
    }

    pub fn write_to(&self, w: &mut impl Write) -> ColonnadeResult<()> {
        w.write_all(&self.uncompressed_size.to_le_bytes())
            .and_then(|_| w.write_all(&self.compressed_size.to_le_bytes()))
            .and_then(|_| w.write_all(&self.element_count.to_le_bytes()))
            .and_then(|_| w.write_all(&[self.flags]))
            .and_then(|_| w.write_all(&[self.element_type]))
            .map_err(|e| ColonnadeError::io("write block header", e))
    }

    pub fn read_from(r: &mut impl Read) -> ColonnadeResult<Self> {
        let mut buf = [0u8; Self::ENCODED_LEN];
        r.read_exact(&mut buf).map_err(|e| ColonnadeError::io("read block header", e))?;
        Ok(Self {
            uncompressed_size: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            compressed_size: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            element_count: u32::from_le_bytes(buf[8..12].try_into().unwrap()),
            flags: buf[12],
            element_type: buf[13],
        })
    }
}

fn value_type_from_tag(tag: u8) -> ColonnadeResult<ValueType> {
    Ok(match tag {
        0 => ValueType::Integer,
        1 => ValueType::Float,
        2 => ValueType::String,
        3 => ValueType::Vector,
        4 => ValueType::List,
        5 => ValueType::Dict,
        6 => ValueType::Image,
        7 => ValueType::DateTime,
        8 => ValueType::Undefined,
        other => return Err(ColonnadeError::format("block", format!("unknown element type tag {other}"))),
    })
}

fn encode_value(v: &Value, out: &mut Vec<u8>) {
    out.push(v.dtype().tag_byte());
    match v {
        Value::Integer(i) => out.extend_from_slice(&i.to_le_bytes()),
        Value::Float(f) => out.extend_from_slice(&f.to_le_bytes()),
        Value::String(s) => {
            out.extend_from_slice(&(s.len() as u32).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
        }
        Value::Vector(vec) => {
            out.extend_from_slice(&(vec.len() as u32).to_le_bytes());
            for x in vec {
                out.extend_from_slice(&x.to_le_bytes());
            }
        }
        Value::List(items) => {
            out.extend_from_slice(&(items.len() as u32).to_le_bytes());
            for item in items {
                encode_value(item, out);
            }
        }
        Value::Dict(entries) => {
            out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
            for (k, val) in entries {
                encode_value(k, out);
                encode_value(val, out);
            }
        }
        Value::Image(img) => {
            out.extend_from_slice(&img.width.to_le_bytes());
            out.extend_from_slice(&img.height.to_le_bytes());
            out.push(img.channels);
            out.push(match img.format {
                ImageFormat::Raw => 0,
                ImageFormat::Png => 1,
                ImageFormat::Jpeg => 2,
            });
            out.extend_from_slice(&(img.data.len() as u32).to_le_bytes());
            out.extend_from_slice(&img.data);
        }
        Value::DateTime(dt) => {
            out.extend_from_slice(&dt.seconds_since_epoch.to_le_bytes());
            out.extend_from_slice(&dt.half_hour_offset.to_le_bytes());
        }
        Value::Undefined => {}
    }
}

fn decode_value(buf: &[u8], pos: &mut usize) -> ColonnadeResult<Value> {
    let read_u8 = |buf: &[u8], pos: &mut usize| -> ColonnadeResult<u8> {
        let b = *buf.get(*pos).ok_or_else(|| ColonnadeError::format("block", "truncated value tag"))?;
        *pos += 1;
        Ok(b)
    };
    let read_bytes = |buf: &[u8], pos: &mut usize, n: usize| -> ColonnadeResult<&[u8]> {
        let end = *pos + n;
        let slice = buf
            .get(*pos..end)
            .ok_or_else(|| ColonnadeError::format("block", "truncated value payload"))?;
        *pos = end;
        Ok(slice)
    };
    let read_u32 = |buf: &[u8], pos: &mut usize| -> ColonnadeResult<u32> {
        Ok(u32::from_le_bytes(read_bytes(buf, pos, 4)?.try_into().unwrap()))
    };

    let tag = value_type_from_tag(read_u8(buf, pos)?)?;
    Ok(match tag {
        ValueType::Integer => Value::Integer(i64::from_le_bytes(read_bytes(buf, pos, 8)?.try_into().unwrap())),
        ValueType::Float => Value::Float(f64::from_le_bytes(read_bytes(buf, pos, 8)?.try_into().unwrap())),
        ValueType::String => {
            let len = read_u32(buf, pos)? as usize;
            let bytes = read_bytes(buf, pos, len)?;
            Value::String(
                String::from_utf8(bytes.to_vec())
                    .map_err(|_| ColonnadeError::format("block", "invalid utf8 string cell"))?,
            )
        }
        ValueType::Vector => {
            let len = read_u32(buf, pos)? as usize;
            let mut vec = Vec::with_capacity(len);
            for _ in 0..len {
                vec.push(f64::from_le_bytes(read_bytes(buf, pos, 8)?.try_into().unwrap()));
            }
            Value::Vector(vec)
        }
        ValueType::List => {
            let len = read_u32(buf, pos)? as usize;
            let mut items = Vec::with_capacity(len);
            for _ in 0..len {
                items.push(decode_value(buf, pos)?);
            }
            Value::List(items)
        }
        ValueType::Dict => {
            let len = read_u32(buf, pos)? as usize;
            let mut entries = Vec::with_capacity(len);
            for _ in 0..len {
                let k = decode_value(buf, pos)?;
                let v = decode_value(buf, pos)?;
                entries.push((k, v));
            }
            Value::Dict(entries)
        }
        ValueType::Image => {
            let width = read_u32(buf, pos)?;
            let height = read_u32(buf, pos)?;
            let channels = read_u8(buf, pos)?;
            let format = match read_u8(buf, pos)? {
                0 => ImageFormat::Raw,
                1 => ImageFormat::Png,
                2 => ImageFormat::Jpeg,
                other => return Err(ColonnadeError::format("block", format!("unknown image format tag {other}"))),
            };
            let len = read_u32(buf, pos)? as usize;
            let data = read_bytes(buf, pos, len)?.to_vec();
            Value::Image(ImageData { width, height, channels, format, data })
        }
        ValueType::DateTime => {
            let seconds_since_epoch = i64::from_le_bytes(read_bytes(buf, pos, 8)?.try_into().unwrap());
            let half_hour_offset = i32::from_le_bytes(read_bytes(buf, pos, 4)?.try_into().unwrap());
            Value::DateTime(DateTimeValue::new(seconds_since_epoch, half_hour_offset))
        }
        ValueType::Undefined => Value::Undefined,
    })
}

/// Encodes `values` into a header plus payload, compressing if the
/// compressed/uncompressed ratio beats `disable_threshold`.
pub fn encode_block(values: &[Value], element_type: ValueType, disable_threshold: f64) -> ColonnadeResult<(BlockHeader, Vec<u8>)> {
    if values.is_empty() {
        let header = BlockHeader { uncompressed_size: 0, compressed_size: 0, element_count: 0, flags: 0, element_type: element_type.tag_byte() };
        return Ok((header, Vec::new()));
    }

    let mut raw = Vec::new();
    for v in values {
        encode_value(v, &mut raw);
    }
    let uncompressed_size = raw.len() as u32;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&raw).map_err(|e| ColonnadeError::io("compress block", e))?;
    let compressed = encoder.finish().map_err(|e| ColonnadeError::io("compress block", e))?;

    let ratio = compressed.len() as f64 / raw.len().max(1) as f64;
    let (payload, flags) = if ratio <= disable_threshold {
        (compressed, FLAG_COMPRESSED)
    } else {
        (raw, 0)
    };

    let header = BlockHeader {
        uncompressed_size,
        compressed_size: payload.len() as u32,
        element_count: values.len() as u32,
        flags,
        element_type: element_type.tag_byte(),
    };
    Ok((header, payload))
}

/// Iterator-with-state decoder: partial consumption never decodes the rest
/// of the block.
pub struct BlockDecoder {
    raw: Vec<u8>,
    pos: usize,
    remaining: u32,
}

impl BlockDecoder {
    pub fn new(header: &BlockHeader, payload: &[u8]) -> ColonnadeResult<Self> {
        if payload.len() != header.compressed_size as usize {
            return Err(ColonnadeError::format(
                "block",
                format!("declared compressed size {} disagrees with {} bytes read", header.compressed_size, payload.len()),
            ));
        }
        let raw = if header.is_compressed() {
            let mut decoder = GzDecoder::new(payload);
            let mut out = Vec::with_capacity(header.uncompressed_size as usize);
            decoder.read_to_end(&mut out).map_err(|e| ColonnadeError::io("decompress block", e))?;
            out
        } else {
            payload.to_vec()
        };
        if raw.len() != header.uncompressed_size as usize {
            return Err(ColonnadeError::format(
                "block",
                format!("declared uncompressed size {} disagrees with {} bytes decoded", header.uncompressed_size, raw.len()),
            ));
        }
        Ok(Self { raw, pos: 0, remaining: header.element_count })
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn next(&mut self) -> Option<ColonnadeResult<Value>> {
        if self.remaining == 0 {
            return None;
        }
        let value = decode_value(&self.raw, &mut self.pos);
        self.remaining -= 1;
        Some(value)
    }

    /// Advances `n` elements without materializing them.
    pub fn skip(&mut self, n: u32) -> ColonnadeResult<()> {
        for _ in 0..n.min(self.remaining) {
            match self.next() {
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }
        Ok(())
    }
}
