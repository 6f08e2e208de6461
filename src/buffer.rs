//! [`Buffer`] — the per-column, append-only delta encoder.
//!
//! A `Buffer` packs typed writes against a monotonically advancing row
//! index into one contiguous byte array: a header byte per record encodes
//! the op tag, payload size class, and whether a value is a string/bytes
//! blob, followed by the payload itself and (unless the row index is
//! exactly one past the previous record's) a varint delta against the
//! previous row index.

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};

use crate::chunk::Chunk;
use crate::error::EncodeError;
use crate::value::ColumnValue;
use crate::varint;

/// Maximum length of a string/bytes payload: the 16-bit length prefix's
/// range.
pub const MAX_VALUE_LEN: usize = u16::MAX as usize;

/// Named op tags, the low 4 bits of every record header. `DELETE`/
/// `PUT_FALSE` and `PUT`/`PUT_TRUE` are intentional aliases: boolean
/// columns reinterpret the tag itself as the value.
pub mod op {
    pub const DELETE: u8 = 0;
    pub const PUT_FALSE: u8 = 0;
    pub const INSERT: u8 = 1;
    pub const PUT: u8 = 2;
    pub const PUT_TRUE: u8 = 2;
    pub const ADD: u8 = 3;
}

const FLAG_IS_STRING: u8 = 0x40;
const FLAG_IS_NEXT: u8 = 0x80;

/// One contiguous run of records belonging to the same [`Chunk`], recording
/// where the run starts in [`Buffer::buffer`] and what `last` was when the
/// run began (so delta decoding resets cleanly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub chunk: u32,
    pub start: u32,
    pub value: i32,
}

/// A column-scoped, single-writer, append-only delta encoder.
///
/// Kept small and `Copy`-free so that per-column buffers stay cheap to hold
/// many of at once, one per touched column in a transaction.
#[derive(Debug, Clone, Default)]
pub struct Buffer {
    column: String,
    buffer: Vec<u8>,
    chunks: Vec<ChunkHeader>,
    last: i32,
    chunk: u32,
}

impl Buffer {
    /// Creates an empty buffer targeting `column`.
    pub fn new(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            buffer: Vec::new(),
            chunks: Vec::new(),
            last: 0,
            chunk: u32::MAX,
        }
    }

    /// The column name this buffer targets.
    pub fn column(&self) -> &str {
        &self.column
    }

    /// The raw packed record stream.
    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// The chunk header runs recorded so far, in order.
    pub fn chunk_headers(&self) -> &[ChunkHeader] {
        &self.chunks
    }

    /// The last absolute row index written.
    pub fn last(&self) -> i32 {
        self.last
    }

    /// Returns `true` iff no records have been written.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Invokes `f` once per chunk header, in order.
    pub fn range_chunks(&self, mut f: impl FnMut(&ChunkHeader)) {
        for header in &self.chunks {
            f(header);
        }
    }

    /// Returns this buffer to empty state, preserving backing capacity, and
    /// retargets it at `column`.
    pub fn reset(&mut self, column: impl Into<String>) {
        self.column = column.into();
        self.buffer.clear();
        self.chunks.clear();
        self.last = 0;
        self.chunk = u32::MAX;
    }

    /// Opens a new chunk header if `index` falls outside the current run,
    /// and returns the signed delta against `self.last` (updating it).
    fn advance(&mut self, index: u32) -> i32 {
        let chunk = Chunk::at(index).0;
        if chunk != self.chunk {
            self.chunks.push(ChunkHeader {
                chunk,
                start: self.buffer.len() as u32,
                value: self.last,
            });
            self.chunk = chunk;
            log::trace!("buffer {:?}: opened chunk header for chunk {chunk}", self.column);
        }
        let delta = (index as i64) - (self.last as i64);
        self.last = index as i32;
        delta as i32
    }

    fn put_header(&mut self, op: u8, size_bits: u8, is_string: bool, is_next: bool) {
        let mut header = op | (size_bits << 4);
        if is_string {
            header |= FLAG_IS_STRING;
        }
        if is_next {
            header |= FLAG_IS_NEXT;
        }
        self.buffer.push(header);
    }

    fn put_delta(&mut self, delta: i32, is_next: bool) {
        if !is_next {
            varint::encode_u32(delta as u32, &mut self.buffer);
        }
    }

    fn put_fixed(&mut self, op: u8, index: u32, size_bits: u8, payload: &[u8]) {
        let delta = self.advance(index);
        let is_next = delta == 1;
        self.put_header(op, size_bits, false, is_next);
        self.buffer.extend_from_slice(payload);
        self.put_delta(delta, is_next);
    }

    /// Writes a zero-payload record (a `Delete`, `Insert`, or boolean op
    /// whose value lives entirely in the tag).
    pub fn put_operation(&mut self, op: u8, index: u32) {
        self.put_fixed(op, index, 0, &[]);
    }

    /// Writes a boolean by rewriting `op` to [`op::PUT_TRUE`] or
    /// [`op::PUT_FALSE`]: boolean columns have no payload, only a tag.
    pub fn put_bool(&mut self, index: u32, value: bool) {
        let op = if value { op::PUT_TRUE } else { op::PUT_FALSE };
        self.put_operation(op, index);
    }

    pub fn put_i16(&mut self, op: u8, index: u32, value: i16) {
        let mut buf = [0u8; 2];
        BigEndian::write_i16(&mut buf, value);
        self.put_fixed(op, index, 1, &buf);
    }

    pub fn put_i32(&mut self, op: u8, index: u32, value: i32) {
        let mut buf = [0u8; 4];
        BigEndian::write_i32(&mut buf, value);
        self.put_fixed(op, index, 2, &buf);
    }

    pub fn put_i64(&mut self, op: u8, index: u32, value: i64) {
        let mut buf = [0u8; 8];
        BigEndian::write_i64(&mut buf, value);
        self.put_fixed(op, index, 3, &buf);
    }

    pub fn put_u16(&mut self, op: u8, index: u32, value: u16) {
        let mut buf = [0u8; 2];
        BigEndian::write_u16(&mut buf, value);
        self.put_fixed(op, index, 1, &buf);
    }

    pub fn put_u32(&mut self, op: u8, index: u32, value: u32) {
        let mut buf = [0u8; 4];
        BigEndian::write_u32(&mut buf, value);
        self.put_fixed(op, index, 2, &buf);
    }

    pub fn put_u64(&mut self, op: u8, index: u32, value: u64) {
        let mut buf = [0u8; 8];
        BigEndian::write_u64(&mut buf, value);
        self.put_fixed(op, index, 3, &buf);
    }

    /// Writes `value`'s IEEE-754 bit pattern via the `u32` path.
    pub fn put_f32(&mut self, op: u8, index: u32, value: f32) {
        self.put_u32(op, index, value.to_bits());
    }

    /// Writes `value`'s IEEE-754 bit pattern via the `u64` path.
    pub fn put_f64(&mut self, op: u8, index: u32, value: f64) {
        self.put_u64(op, index, value.to_bits());
    }

    /// Writes a variable-length byte payload with a 16-bit length prefix.
    ///
    /// Returns [`EncodeError::ValueTooLarge`] if `bytes` exceeds
    /// [`MAX_VALUE_LEN`].
    pub fn put_bytes(&mut self, op: u8, index: u32, bytes: &[u8]) -> Result<(), EncodeError> {
        if bytes.len() > MAX_VALUE_LEN {
            return Err(EncodeError::ValueTooLarge(bytes.len()));
        }
        let delta = self.advance(index);
        let is_next = delta == 1;
        self.put_header(op, 2, true, is_next);
        let mut len_buf = [0u8; 2];
        BigEndian::write_u16(&mut len_buf, bytes.len() as u16);
        self.buffer.extend_from_slice(&len_buf);
        self.buffer.extend_from_slice(bytes);
        self.put_delta(delta, is_next);
        Ok(())
    }

    /// Writes a UTF-8 string payload; see [`Buffer::put_bytes`].
    pub fn put_string(&mut self, op: u8, index: u32, value: &str) -> Result<(), EncodeError> {
        self.put_bytes(op, index, value.as_bytes())
    }

    /// Expands `bitmap`'s set bits within `chunk` into one zero-payload
    /// record per bit.
    pub fn put_bitmap(&mut self, op: u8, chunk: Chunk, bitmap: &[u64]) {
        let mut indices = Vec::new();
        chunk.range(bitmap, |i| indices.push(i));
        for index in indices {
            self.put_operation(op, index);
        }
    }

    /// Dispatches on `value`'s runtime variant to the matching typed
    /// entry point.
    pub fn put_any(&mut self, op: u8, index: u32, value: ColumnValue) -> Result<(), EncodeError> {
        match value {
            ColumnValue::Null => Ok(()),
            ColumnValue::Bool(v) => {
                self.put_bool(index, v);
                Ok(())
            }
            ColumnValue::I16(v) => {
                self.put_i16(op, index, v);
                Ok(())
            }
            ColumnValue::I32(v) => {
                self.put_i32(op, index, v);
                Ok(())
            }
            ColumnValue::I64(v) => {
                self.put_i64(op, index, v);
                Ok(())
            }
            ColumnValue::U16(v) => {
                self.put_u16(op, index, v);
                Ok(())
            }
            ColumnValue::U32(v) => {
                self.put_u32(op, index, v);
                Ok(())
            }
            ColumnValue::U64(v) => {
                self.put_u64(op, index, v);
                Ok(())
            }
            ColumnValue::F32(v) => {
                self.put_f32(op, index, v);
                Ok(())
            }
            ColumnValue::F64(v) => {
                self.put_f64(op, index, v);
                Ok(())
            }
            ColumnValue::Bytes(v) => self.put_bytes(op, index, &v),
            ColumnValue::String(v) => self.put_string(op, index, &v),
        }
    }

    /// Serializes this buffer: length-prefixed column name, `last`, the
    /// chunk header array, then the packed record stream.
    pub fn write_to<W: std::io::Write>(&self, w: &mut W) -> std::io::Result<()> {
        write_string(w, &self.column)?;
        w.write_i32::<BigEndian>(self.last)?;

        varint_write(w, self.chunks.len() as u32)?;
        for header in &self.chunks {
            w.write_u32::<BigEndian>(header.chunk)?;
            w.write_u32::<BigEndian>(header.start)?;
            w.write_u32::<BigEndian>(header.value as u32)?;
        }

        w.write_u32::<BigEndian>(self.buffer.len() as u32)?;
        w.write_all(&self.buffer)?;
        Ok(())
    }

    /// Deserializes a buffer written by [`Buffer::write_to`].
    ///
    /// Restores `chunk` from the last chunk header so subsequent writes
    /// continue correctly.
    pub fn read_from<R: std::io::Read>(r: &mut R) -> std::io::Result<Self> {
        let column = read_string(r)?;
        let last = r.read_i32::<BigEndian>()?;

        let count = varint_read(r)?;
        let mut chunks = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let chunk = r.read_u32::<BigEndian>()?;
            let start = r.read_u32::<BigEndian>()?;
            let value = r.read_u32::<BigEndian>()? as i32;
            chunks.push(ChunkHeader {
                chunk,
                start,
                value,
            });
        }

        let buf_len = r.read_u32::<BigEndian>()? as usize;
        let mut buffer = vec![0u8; buf_len];
        r.read_exact(&mut buffer)?;

        let chunk = chunks.last().map(|h| h.chunk).unwrap_or(u32::MAX);

        Ok(Self {
            column,
            buffer,
            chunks,
            last,
            chunk,
        })
    }

    /// Direct mutable access to the packed record stream, for
    /// [`crate::Reader::seek`].
    pub(crate) fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }

    /// Reconstructs a buffer from a [`crate::Commit`]'s chunk-scoped
    /// projection: one [`ChunkHeader`] per shard, each `start` taken from
    /// the shard table's recorded offset into the already-reassembled
    /// `bytes`.
    pub(crate) fn from_projection(
        column: String,
        chunk: Chunk,
        shards: Vec<(u32, u32)>,
        bytes: Vec<u8>,
    ) -> Self {
        let chunks: Vec<ChunkHeader> = shards
            .into_iter()
            .map(|(value, offset)| ChunkHeader {
                chunk: chunk.0,
                start: offset,
                value: value as i32,
            })
            .collect();
        let last = chunks.last().map(|h| h.value).unwrap_or(0);
        let current_chunk = if chunks.is_empty() { u32::MAX } else { chunk.0 };
        Self {
            column,
            buffer: bytes,
            chunks,
            last,
            chunk: current_chunk,
        }
    }

    /// The byte ranges and baseline `last` values of every run recorded
    /// under `chunk`, in order, for [`crate::reader::range`].
    pub(crate) fn matching_chunk_runs(&self, chunk: Chunk) -> Vec<(usize, usize, i32)> {
        let mut runs = Vec::new();
        for (i, header) in self.chunks.iter().enumerate() {
            if header.chunk != chunk.0 {
                continue;
            }
            let end = self
                .chunks
                .get(i + 1)
                .map(|h| h.start as usize)
                .unwrap_or(self.buffer.len());
            runs.push((header.start as usize, end, header.value));
        }
        runs
    }
}

fn write_string<W: std::io::Write>(w: &mut W, s: &str) -> std::io::Result<()> {
    w.write_u32::<BigEndian>(s.len() as u32)?;
    w.write_all(s.as_bytes())
}

fn read_string<R: std::io::Read>(r: &mut R) -> std::io::Result<String> {
    let len = r.read_u32::<BigEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
}

fn varint_write<W: std::io::Write>(w: &mut W, value: u32) -> std::io::Result<()> {
    let mut buf = Vec::new();
    varint::encode_u32(value, &mut buf);
    w.write_all(&buf)
}

fn varint_read<R: std::io::Read>(r: &mut R) -> std::io::Result<u32> {
    // Varints are self-delimiting: read one byte at a time until the
    // continuation bit clears, mirroring `varint::decode_u32` without
    // requiring the whole remainder of the stream up front.
    let mut buf = Vec::with_capacity(5);
    loop {
        let mut byte = [0u8; 1];
        r.read_exact(&mut byte)?;
        let cont = byte[0] & 0x80 != 0;
        buf.push(byte[0]);
        if !cont || buf.len() == 5 {
            break;
        }
    }
    let (value, _) = varint::decode_u32(&buf)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
    Ok(value)
}
