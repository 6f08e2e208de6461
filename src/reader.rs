//! [`Reader`] — the zero-copy, rewindable decoder bound to one [`Buffer`]'s
//! byte array at a time.

use byteorder::{BigEndian, ByteOrder};

use crate::buffer::{op, Buffer};
use crate::chunk::{Chunk, CHUNK_SIZE};
use crate::error::DecodeError;
use crate::value::ColumnValue;
use crate::varint;

const FLAG_IS_STRING: u8 = 0x40;
const FLAG_IS_NEXT: u8 = 0x80;

/// A cursor over one [`Buffer`]'s packed record stream (or one chunk-scoped
/// sub-slice of it, see [`Reader::range`]).
///
/// Bound to exactly one byte slice at a time; rebinding via
/// [`Reader::seek`]/[`Reader::range`] is cheap and expected.
pub struct Reader<'a> {
    buf: &'a mut [u8],
    head: usize,
    header_pos: usize,
    i0: usize,
    i1: usize,
    offset: i64,
    op: u8,
    start: i64,
}

impl<'a> Reader<'a> {
    /// Binds a fresh reader to `buf`'s entire record stream, starting at
    /// offset 0.
    pub fn seek(buf: &'a mut Buffer) -> Self {
        Self::bind(buf.buffer_mut(), 0)
    }

    pub(crate) fn bind(buf: &'a mut [u8], start: i64) -> Self {
        Self {
            buf,
            head: 0,
            header_pos: 0,
            i0: 0,
            i1: 0,
            offset: start,
            op: op::PUT,
            start,
        }
    }

    /// Re-binds to the currently-bound slice from the start, restoring
    /// `Offset` to the baseline it had when this reader was created.
    pub fn rewind(&mut self) {
        self.head = 0;
        self.header_pos = 0;
        self.i0 = 0;
        self.i1 = 0;
        self.offset = self.start;
        self.op = op::PUT;
    }

    /// Advances to the next record. Returns `false` once the bound slice is
    /// exhausted. Performs bounded work: at most a constant number of byte
    /// loads and one bounded loop over the delta varint.
    pub fn next(&mut self) -> bool {
        if self.head >= self.buf.len() {
            return false;
        }
        self.header_pos = self.head;
        let h = self.buf[self.head];
        self.head += 1;
        self.op = h & 0x0F;
        let is_string = h & FLAG_IS_STRING != 0;
        let is_next = h & FLAG_IS_NEXT != 0;

        let (i0, i1) = if is_string {
            let Some(len_bytes) = self.buf.get(self.head..self.head + 2) else {
                return false;
            };
            let len = BigEndian::read_u16(len_bytes) as usize;
            self.head += 2;
            let i0 = self.head;
            let i1 = i0 + len;
            if i1 > self.buf.len() {
                return false;
            }
            self.head = i1;
            (i0, i1)
        } else {
            let size = (1usize << ((h >> 4) & 0b11)) & 0b1110;
            let i0 = self.head;
            let i1 = i0 + size;
            if i1 > self.buf.len() {
                return false;
            }
            self.head = i1;
            (i0, i1)
        };
        self.i0 = i0;
        self.i1 = i1;

        if is_next {
            self.offset += 1;
        } else {
            let Some(rest) = self.buf.get(self.head..) else {
                return false;
            };
            let Ok((delta, remaining)) = varint::decode_u32(rest) else {
                return false;
            };
            let consumed = rest.len() - remaining.len();
            self.head += consumed;
            self.offset += (delta as i32) as i64;
        }
        true
    }

    /// The absolute row index of the current record.
    pub fn index(&self) -> u32 {
        self.offset as u32
    }

    /// The current record's row index relative to its chunk's start.
    pub fn index_at_chunk(&self) -> u32 {
        self.index() & (CHUNK_SIZE - 1)
    }

    /// The current record's op tag (the low 4 bits of its header byte).
    pub fn op_type(&self) -> u8 {
        self.op
    }

    /// `true` iff the current record's op tag is [`op::PUT_TRUE`].
    pub fn bool(&self) -> bool {
        self.op == op::PUT_TRUE
    }

    fn payload(&self) -> &[u8] {
        &self.buf[self.i0..self.i1]
    }

    pub fn int16(&self) -> i16 {
        BigEndian::read_i16(self.payload())
    }
    pub fn int32(&self) -> i32 {
        BigEndian::read_i32(self.payload())
    }
    pub fn int64(&self) -> i64 {
        BigEndian::read_i64(self.payload())
    }
    pub fn uint16(&self) -> u16 {
        BigEndian::read_u16(self.payload())
    }
    pub fn uint32(&self) -> u32 {
        BigEndian::read_u32(self.payload())
    }
    pub fn uint64(&self) -> u64 {
        BigEndian::read_u64(self.payload())
    }
    pub fn float32(&self) -> f32 {
        f32::from_bits(self.uint32())
    }
    pub fn float64(&self) -> f64 {
        f64::from_bits(self.uint64())
    }
    pub fn bytes(&self) -> &[u8] {
        self.payload()
    }
    pub fn string(&self) -> Result<&str, DecodeError> {
        Ok(std::str::from_utf8(self.payload())?)
    }

    /// The current record's payload reinterpreted as a sign-extended
    /// integer of whatever width it was written with.
    pub fn int(&self) -> i64 {
        match self.i1 - self.i0 {
            2 => self.int16() as i64,
            4 => self.int32() as i64,
            8 => self.int64(),
            _ => 0,
        }
    }

    /// The current record's payload reinterpreted as a zero-extended
    /// unsigned integer of whatever width it was written with.
    pub fn uint(&self) -> u64 {
        match self.i1 - self.i0 {
            2 => self.uint16() as u64,
            4 => self.uint32() as u64,
            8 => self.uint64(),
            _ => 0,
        }
    }

    /// The current record's payload reinterpreted as a float of whatever
    /// width it was written with.
    pub fn float(&self) -> f64 {
        match self.i1 - self.i0 {
            4 => self.float32() as f64,
            8 => self.float64(),
            _ => 0.0,
        }
    }

    /// The current record's raw numeric payload, width-polymorphic. Callers
    /// needing signed or float semantics should use [`Reader::int`] /
    /// [`Reader::float`] instead.
    pub fn number(&self) -> u64 {
        self.uint()
    }

    fn rewrite_header_op(&mut self, new_op: u8) {
        self.buf[self.header_pos] = (self.buf[self.header_pos] & 0xF0) | new_op;
        self.op = new_op;
    }

    /// Overwrites the current record's payload in place, coercing its op
    /// tag to [`op::PUT`] — a swap always lands as a plain store,
    /// regardless of what op (e.g. `Add`) produced the prior value.
    pub fn swap_int16(&mut self, value: i16) {
        BigEndian::write_i16(&mut self.buf[self.i0..self.i1], value);
        self.rewrite_header_op(op::PUT);
    }
    pub fn swap_int32(&mut self, value: i32) {
        BigEndian::write_i32(&mut self.buf[self.i0..self.i1], value);
        self.rewrite_header_op(op::PUT);
    }
    pub fn swap_int64(&mut self, value: i64) {
        BigEndian::write_i64(&mut self.buf[self.i0..self.i1], value);
        self.rewrite_header_op(op::PUT);
    }
    pub fn swap_uint16(&mut self, value: u16) {
        BigEndian::write_u16(&mut self.buf[self.i0..self.i1], value);
        self.rewrite_header_op(op::PUT);
    }
    pub fn swap_uint32(&mut self, value: u32) {
        BigEndian::write_u32(&mut self.buf[self.i0..self.i1], value);
        self.rewrite_header_op(op::PUT);
    }
    pub fn swap_uint64(&mut self, value: u64) {
        BigEndian::write_u64(&mut self.buf[self.i0..self.i1], value);
        self.rewrite_header_op(op::PUT);
    }
    pub fn swap_float32(&mut self, value: f32) {
        self.swap_uint32(value.to_bits());
    }
    pub fn swap_float64(&mut self, value: f64) {
        self.swap_uint64(value.to_bits());
    }

    /// Rewrites the current record's op tag to [`op::PUT_TRUE`] or
    /// [`op::PUT_FALSE`].
    pub fn swap_bool(&mut self, value: bool) {
        let new_op = if value { op::PUT_TRUE } else { op::PUT_FALSE };
        self.rewrite_header_op(new_op);
    }

    /// Overwrites the current record's bytes payload in place. The
    /// replacement must be exactly as long as the existing payload: this
    /// crate rejects length-changing swaps rather than re-encoding the
    /// tail.
    pub fn swap_bytes(&mut self, value: &[u8]) -> Result<(), DecodeError> {
        let expected = self.i1 - self.i0;
        if value.len() != expected {
            return Err(DecodeError::LengthMismatch {
                expected,
                found: value.len(),
            });
        }
        self.buf[self.i0..self.i1].copy_from_slice(value);
        Ok(())
    }

    /// Overwrites the current record's string payload in place; see
    /// [`Reader::swap_bytes`].
    pub fn swap_string(&mut self, value: &str) -> Result<(), DecodeError> {
        self.swap_bytes(value.as_bytes())
    }

    /// Overwrites the current record's numeric payload in place, dispatching
    /// on `value`'s variant the way [`Buffer::put_any`] does for encoding.
    pub fn swap_number(&mut self, value: ColumnValue) -> Result<(), DecodeError> {
        let width = self.i1 - self.i0;
        macro_rules! check_width {
            ($expected:expr) => {
                if width != $expected {
                    return Err(DecodeError::LengthMismatch {
                        expected: width,
                        found: $expected,
                    });
                }
            };
        }
        match value {
            ColumnValue::Null => {}
            ColumnValue::Bool(v) => self.swap_bool(v),
            ColumnValue::I16(v) => {
                check_width!(2);
                self.swap_int16(v)
            }
            ColumnValue::I32(v) => {
                check_width!(4);
                self.swap_int32(v)
            }
            ColumnValue::I64(v) => {
                check_width!(8);
                self.swap_int64(v)
            }
            ColumnValue::U16(v) => {
                check_width!(2);
                self.swap_uint16(v)
            }
            ColumnValue::U32(v) => {
                check_width!(4);
                self.swap_uint32(v)
            }
            ColumnValue::U64(v) => {
                check_width!(8);
                self.swap_uint64(v)
            }
            ColumnValue::F32(v) => {
                check_width!(4);
                self.swap_float32(v)
            }
            ColumnValue::F64(v) => {
                check_width!(8);
                self.swap_float64(v)
            }
            ColumnValue::Bytes(v) => self.swap_bytes(&v)?,
            ColumnValue::String(v) => self.swap_string(&v)?,
        }
        Ok(())
    }
}

/// Invokes `f` once per contiguous run of records belonging to `chunk`,
/// binding `f`'s [`Reader`] argument to that run's sub-slice with its
/// baseline offset restored from the chunk header's recorded `value`.
pub fn range(buf: &mut Buffer, chunk: Chunk, mut f: impl FnMut(&mut Reader)) {
    let runs = buf.matching_chunk_runs(chunk);
    if runs.is_empty() {
        log::warn!("range: no chunk header for chunk {chunk} in buffer {:?}", buf.column());
        return;
    }
    let raw = buf.buffer_mut();
    for (start, end, value) in runs {
        let mut r = Reader::bind(&mut raw[start..end], value as i64);
        f(&mut r);
    }
}

/// The largest [`Reader::index`] observed while scanning `chunk` via
/// [`range`]; `0` for a buffer with no records in that chunk.
pub fn max_offset(buf: &mut Buffer, chunk: Chunk) -> u32 {
    let mut max = 0u32;
    range(buf, chunk, |r| {
        while r.next() {
            max = max.max(r.index());
        }
        r.rewind();
    });
    max
}
