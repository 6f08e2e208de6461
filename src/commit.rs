//! [`Commit`] — the chunk-scoped envelope grouping one or more column
//! [`Buffer`]s for a single transaction step, and the monotonic
//! [`CommitIdGenerator`] that stamps them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::buffer::Buffer;
use crate::chunk::Chunk;
use crate::error::CommitError;
use crate::varint;

/// A chunk-scoped group of column buffers produced by one transaction step.
///
/// All of `updates` are understood to target `chunk`; a buffer may carry
/// records for other chunks too (a transaction can touch several chunks
/// before committing), but only the run matching `chunk` crosses the wire
/// ([`Commit::write_to`]).
#[derive(Debug, Clone)]
pub struct Commit {
    pub id: u64,
    pub chunk: Chunk,
    pub updates: Vec<Buffer>,
}

impl Commit {
    pub fn new(id: u64, chunk: Chunk, updates: Vec<Buffer>) -> Self {
        Self { id, chunk, updates }
    }

    /// Returns [`CommitError::ChunkMismatch`] for the first non-empty
    /// update buffer that carries no run for `self.chunk`.
    pub fn validate(&self) -> Result<(), CommitError> {
        for buf in &self.updates {
            if buf.is_empty() {
                continue;
            }
            if buf.matching_chunk_runs(self.chunk).is_empty() {
                return Err(CommitError::ChunkMismatch(buf.column().to_string()));
            }
        }
        Ok(())
    }

    /// Serializes this commit: `chunk` and `id` as unsigned varints,
    /// followed by a varint-counted array of per-buffer projections onto
    /// `self.chunk` — each a column name, a shard table of `{value,
    /// offset}` pairs locating that buffer's matching runs inside the
    /// flattened byte array that follows, and the concatenated run bytes
    /// themselves.
    pub fn write_to<W: std::io::Write>(&self, w: &mut W) -> Result<(), CommitError> {
        varint_write_u32(w, self.chunk.0)?;
        varint_write_u64(w, self.id)?;
        varint_write_u32(w, self.updates.len() as u32)?;

        for buf in &self.updates {
            write_string(w, buf.column())?;
            let runs = buf.matching_chunk_runs(self.chunk);

            varint_write_u32(w, runs.len() as u32)?;
            let mut offset = 0u32;
            let mut spans = Vec::with_capacity(runs.len());
            for (start, end, value) in &runs {
                w.write_u32::<BigEndian>(*value as u32)?;
                w.write_u32::<BigEndian>(offset)?;
                spans.push((*start, *end));
                offset += (*end - *start) as u32;
            }

            varint_write_u32(w, offset)?;
            for (start, end) in spans {
                w.write_all(&buf.bytes()[start..end])?;
            }
        }
        Ok(())
    }

    /// Deserializes a commit written by [`Commit::write_to`]. Each
    /// projected buffer is reconstructed with exactly one [`crate::buffer::ChunkHeader`]
    /// per shard, `start` taken from the shard table's recorded offset
    /// into the reassembled byte array.
    pub fn read_from<R: std::io::Read>(r: &mut R) -> Result<Self, CommitError> {
        let chunk = Chunk(varint_read_u32(r)?);
        let id = varint_read_u64(r)?;

        let update_count = varint_read_u32(r)?;
        let mut updates = Vec::with_capacity(update_count as usize);

        for _ in 0..update_count {
            let column = read_string(r)?;
            let shard_count = varint_read_u32(r)?;

            let mut shards = Vec::with_capacity(shard_count as usize);
            for _ in 0..shard_count {
                let value = r.read_u32::<BigEndian>()?;
                let offset = r.read_u32::<BigEndian>()?;
                shards.push((value, offset));
            }

            let total_bytes = varint_read_u32(r)?;
            let mut bytes = vec![0u8; total_bytes as usize];
            r.read_exact(&mut bytes)?;

            updates.push(Buffer::from_projection(column, chunk, shards, bytes));
        }

        Ok(Self {
            id,
            chunk,
            updates,
        })
    }

    /// Deep-copies `chunk` and every non-empty update buffer, the way a
    /// commit crossing an ownership boundary (e.g. a [`crate::Log::Channel`]
    /// send) must, so the sender's buffers remain independently mutable.
    pub fn deep_clone(&self) -> Self {
        Self {
            id: self.id,
            chunk: self.chunk,
            updates: self
                .updates
                .iter()
                .filter(|b| !b.is_empty())
                .cloned()
                .collect(),
        }
    }
}

/// Stamps monotonically increasing commit IDs from an atomic counter
/// seeded at construction from wall-clock nanoseconds.
pub struct CommitIdGenerator {
    next: AtomicU64,
}

impl CommitIdGenerator {
    /// Seeds a fresh generator from `SystemTime::now()`.
    pub fn new() -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self::seeded(seed)
    }

    /// Seeds a generator deterministically, for tests that need
    /// reproducible commit IDs.
    pub fn seeded(seed: u64) -> Self {
        Self {
            next: AtomicU64::new(seed),
        }
    }

    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// The process-wide default generator.
    pub fn global() -> &'static CommitIdGenerator {
        static DEFAULT: OnceLock<CommitIdGenerator> = OnceLock::new();
        DEFAULT.get_or_init(CommitIdGenerator::new)
    }
}

impl Default for CommitIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn write_string<W: std::io::Write>(w: &mut W, s: &str) -> Result<(), CommitError> {
    w.write_u32::<BigEndian>(s.len() as u32)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn read_string<R: std::io::Read>(r: &mut R) -> Result<String, CommitError> {
    let len = r.read_u32::<BigEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err).into())
}

fn varint_write_u32<W: std::io::Write>(w: &mut W, value: u32) -> Result<(), CommitError> {
    let mut buf = Vec::new();
    varint::encode_u32(value, &mut buf);
    w.write_all(&buf)?;
    Ok(())
}

fn varint_write_u64<W: std::io::Write>(w: &mut W, value: u64) -> Result<(), CommitError> {
    let mut buf = Vec::new();
    varint::encode_u64(value, &mut buf);
    w.write_all(&buf)?;
    Ok(())
}

fn read_one_varint<R: std::io::Read>(r: &mut R, max_len: usize) -> Result<Vec<u8>, CommitError> {
    let mut buf = Vec::with_capacity(max_len);
    loop {
        let mut byte = [0u8; 1];
        r.read_exact(&mut byte)?;
        let cont = byte[0] & 0x80 != 0;
        buf.push(byte[0]);
        if !cont || buf.len() == max_len {
            break;
        }
    }
    Ok(buf)
}

fn varint_read_u32<R: std::io::Read>(r: &mut R) -> Result<u32, CommitError> {
    let buf = read_one_varint(r, 5)?;
    let (value, _) = varint::decode_u32(&buf)?;
    Ok(value)
}

fn varint_read_u64<R: std::io::Read>(r: &mut R) -> Result<u64, CommitError> {
    let buf = read_one_varint(r, 10)?;
    let (value, _) = varint::decode_u64(&buf)?;
    Ok(value)
}
