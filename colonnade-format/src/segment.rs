//! Segment file writer/reader: a sequence of blocks terminated by a footer,
//! grounded in
//! `examples/original_source/src/sframe/sarray_v2_block_writer.hpp` and
//! `sframe_index_file.{hpp,cpp}` for the adaptive block-size policy and the
//! footer-at-end-of-file layout.

use colonnade_core::{ColonnadeError, ColonnadeResult, Value, ValueType};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::block::{encode_block, BlockDecoder, BlockHeader};

const FOOTER_MAGIC: &[u8; 8] = b"CLNDFTR\0";
/// The first block for a column uses this bootstrap element count; later
/// blocks are sized from observed bytes-per-element.
const BOOTSTRAP_BLOCK_ELEMENTS: usize = 256;
/// Default byte-size target per block.
pub const DEFAULT_BLOCK_SIZE_TARGET: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct BlockInfo {
    pub offset: u64,
    pub header: BlockHeader,
    pub row_start: u64,
}

pub struct SegmentWriter {
    file: File,
    offset: u64,
    infos: Vec<BlockInfo>,
    rows: u64,
    element_type: ValueType,
    disable_threshold: f64,
    block_size_target: u64,
    pending: Vec<Value>,
    bytes_per_element_estimate: Option<f64>,
}

impl SegmentWriter {
    pub fn create(path: &Path, element_type: ValueType, disable_threshold: f64, block_size_target: u64) -> ColonnadeResult<Self> {
        let file = File::create(path).map_err(|e| ColonnadeError::io(format!("create segment {}", path.display()), e))?;
        Ok(Self {
            file,
            offset: 0,
            infos: Vec::new(),
            rows: 0,
            element_type,
            disable_threshold,
            block_size_target,
            pending: Vec::new(),
            bytes_per_element_estimate: None,
        })
    }

    /// Buffers `value`, flushing a block once the adaptive element or byte
    /// target is reached.
    pub fn append(&mut self, value: Value) -> ColonnadeResult<()> {
        self.pending.push(value);
        let target_elements = match self.bytes_per_element_estimate {
            None => BOOTSTRAP_BLOCK_ELEMENTS,
            Some(bpe) if bpe > 0.0 => ((self.block_size_target as f64 / bpe) as usize).max(1),
            Some(_) => BOOTSTRAP_BLOCK_ELEMENTS,
        };
        if self.pending.len() >= target_elements {
            self.flush_block()?;
        }
        Ok(())
    }

    /// Flushes any buffered values and writes the footer, returning total
    /// rows written.
    pub fn finish(mut self) -> ColonnadeResult<u64> {
        if !self.pending.is_empty() {
            self.flush_block()?;
        }
        self.write_footer()?;
        Ok(self.rows)
    }

    fn flush_block(&mut self) -> ColonnadeResult<()> {
        let values = std::mem::take(&mut self.pending);
        let (header, payload) = encode_block(&values, self.element_type, self.disable_threshold)?;

        let raw_bytes: u32 = header.uncompressed_size;
        if header.element_count > 0 {
            self.bytes_per_element_estimate = Some(raw_bytes as f64 / header.element_count as f64);
        }

        header.write_to(&mut self.file)?;
        self.file.write_all(&payload).map_err(|e| ColonnadeError::io("write block payload", e))?;

        self.infos.push(BlockInfo { offset: self.offset, header, row_start: self.rows });
        self.offset += BlockHeader::ENCODED_LEN as u64 + payload.len() as u64;
        self.rows += header.element_count as u64;
        Ok(())
    }

    fn write_footer(&mut self) -> ColonnadeResult<()> {
        let mut footer = Vec::new();
        footer.extend_from_slice(&(self.infos.len() as u32).to_le_bytes());
        footer.extend_from_slice(&self.rows.to_le_bytes());
        footer.extend_from_slice(&[self.element_type.tag_byte()]);
        for info in &self.infos {
            footer.extend_from_slice(&info.offset.to_le_bytes());
            footer.extend_from_slice(&info.row_start.to_le_bytes());
            info.header.write_to(&mut footer)?;
        }

        self.file.write_all(&footer).map_err(|e| ColonnadeError::io("write footer", e))?;
        self.file
            .write_all(&(footer.len() as u64).to_le_bytes())
            .map_err(|e| ColonnadeError::io("write footer length", e))?;
        self.file.write_all(FOOTER_MAGIC).map_err(|e| ColonnadeError::io("write footer magic", e))?;
        self.file.flush().map_err(|e| ColonnadeError::io("flush segment", e))
    }
}

pub struct SegmentReader {
    path: PathBuf,
    infos: Vec<BlockInfo>,
    total_rows: u64,
    element_type: ValueType,
}

impl SegmentReader {
    pub fn open(path: &Path) -> ColonnadeResult<Self> {
        let mut file = File::open(path).map_err(|e| ColonnadeError::io(format!("open segment {}", path.display()), e))?;
        let file_len = file.metadata().map_err(|e| ColonnadeError::io("stat segment", e))?.len();
        if file_len < 16 {
            return Err(ColonnadeError::format("segment", "file too short to contain a footer"));
        }

        file.seek(SeekFrom::End(-16)).map_err(|e| ColonnadeError::io("seek to footer tail", e))?;
        let mut tail = [0u8; 16];
        file.read_exact(&mut tail).map_err(|e| ColonnadeError::io("read footer tail", e))?;
        let footer_len = u64::from_le_bytes(tail[0..8].try_into().unwrap());
        let magic = &tail[8..16];
        if magic != FOOTER_MAGIC {
            return Err(ColonnadeError::format("segment", "footer magic mismatch"));
        }
        if footer_len + 16 > file_len {
            return Err(ColonnadeError::format("segment", "footer length exceeds file size"));
        }

        file.seek(SeekFrom::End(-(16 + footer_len as i64)))
            .map_err(|e| ColonnadeError::io("seek to footer", e))?;
        let mut footer = vec![0u8; footer_len as usize];
        file.read_exact(&mut footer).map_err(|e| ColonnadeError::io("read footer", e))?;

        let mut pos = 0usize;
        let block_count = read_u32(&footer, &mut pos)?;
        let total_rows = read_u64(&footer, &mut pos)?;
        let element_type = value_type_from_tag(read_u8(&footer, &mut pos)?)?;

        let mut infos = Vec::with_capacity(block_count as usize);
        for _ in 0..block_count {
            let offset = read_u64(&footer, &mut pos)?;
            let row_start = read_u64(&footer, &mut pos)?;
            let header = BlockHeader::read_from(&mut &footer[pos..])?;
            pos += BlockHeader::ENCODED_LEN;
            infos.push(BlockInfo { offset, header, row_start });
        }

        Ok(Self { path: path.to_path_buf(), infos, total_rows, element_type })
    }

    pub fn total_rows(&self) -> u64 {
        self.total_rows
    }

    pub fn element_type(&self) -> ValueType {
        self.element_type
    }

    /// Reads `[row_start, row_end)`, decoding only the covering blocks and
    /// skipping within the first/last block rather than materializing
    /// whole blocks.
    pub fn read_rows(&self, row_start: u64, row_end: u64) -> ColonnadeResult<Vec<Value>> {
        if row_end < row_start || row_end > self.total_rows {
            return Err(ColonnadeError::RangeError(format!(
                "requested rows [{row_start},{row_end}) out of bounds for {} rows",
                self.total_rows
            )));
        }
        let mut file = File::open(&self.path).map_err(|e| ColonnadeError::io("reopen segment", e))?;
        let mut out = Vec::with_capacity((row_end - row_start) as usize);

        for info in &self.infos {
            let block_rows = info.header.element_count as u64;
            let block_end = info.row_start + block_rows;
            if block_end <= row_start || info.row_start >= row_end {
                continue;
            }
            file.seek(SeekFrom::Start(info.offset + BlockHeader::ENCODED_LEN as u64))
                .map_err(|e| ColonnadeError::io("seek to block", e))?;
            let mut payload = vec![0u8; info.header.compressed_size as usize];
            file.read_exact(&mut payload).map_err(|e| ColonnadeError::io("read block payload", e))?;
            let mut decoder = BlockDecoder::new(&info.header, &payload)?;

            let skip_front = row_start.saturating_sub(info.row_start);
            decoder.skip(skip_front as u32)?;
            let take = (block_end.min(row_end)) - info.row_start.max(row_start);
            for _ in 0..take {
                match decoder.next() {
                    Some(v) => out.push(v?),
                    None => break,
                }
            }
        }
        Ok(out)
    }
}

fn read_u8(buf: &[u8], pos: &mut usize) -> ColonnadeResult<u8> {
    let b = *buf.get(*pos).ok_or_else(|| ColonnadeError::format("segment", "truncated footer"))?;
    *pos += 1;
    Ok(b)
}

fn read_u32(buf: &[u8], pos: &mut usize) -> ColonnadeResult<u32> {
    let end = *pos + 4;
    let slice = buf.get(*pos..end).ok_or_else(|| ColonnadeError::format("segment", "truncated footer"))?;
    *pos = end;
    Ok(u32::from_le_bytes(slice.try_into().unwrap()))
}

fn read_u64(buf: &[u8], pos: &mut usize) -> ColonnadeResult<u64> {
    let end = *pos + 8;
    let slice = buf.get(*pos..end).ok_or_else(|| ColonnadeError::format("segment", "truncated footer"))?;
    *pos = end;
    Ok(u64::from_le_bytes(slice.try_into().unwrap()))
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
        other => return Err(ColonnadeError::format("segment", format!("unknown element type tag {other}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_and_reads_back_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("col.seg");

        let mut writer = SegmentWriter::create(&path, ValueType::Integer, 0.9, 64).unwrap();
        for i in 0..20 {
            writer.append(Value::Integer(i)).unwrap();
        }
        let rows = writer.finish().unwrap();
        assert_eq!(rows, 20);

        let reader = SegmentReader::open(&path).unwrap();
        assert_eq!(reader.total_rows(), 20);
        let values = reader.read_rows(5, 15).unwrap();
        let expected: Vec<_> = (5..15).map(Value::Integer).collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn rejects_out_of_range_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("col.seg");
        let mut writer = SegmentWriter::create(&path, ValueType::Integer, 0.9, 1024).unwrap();
        writer.append(Value::Integer(1)).unwrap();
        writer.finish().unwrap();

        let reader = SegmentReader::open(&path).unwrap();
        assert!(matches!(reader.read_rows(0, 5), Err(ColonnadeError::RangeError(_))));
    }

    #[test]
    fn corrupted_footer_magic_is_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("col.seg");
        let mut writer = SegmentWriter::create(&path, ValueType::Integer, 0.9, 1024).unwrap();
        writer.append(Value::Integer(1)).unwrap();
        writer.finish().unwrap();

        let mut bytes = std::fs::read(&path).unwrap();
        let len = bytes.len();
        bytes[len - 1] = 0;
        std::fs::write(&path, bytes).unwrap();

        assert!(matches!(SegmentReader::open(&path), Err(ColonnadeError::FormatError { .. })));
    }
}
