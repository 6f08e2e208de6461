//! [`Log`] — a mutex-guarded, compressed, seekable stream of [`Commit`]s,
//! and [`Channel`], a second implementation of the same append contract
//! over a bounded in-process queue.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::mpsc::SyncSender;
use std::sync::Mutex;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::commit::Commit;
use crate::error::LogError;

/// Four-byte preamble identifying a commit log file.
const MAGIC: &[u8; 4] = b"CLG1";

/// The streaming block compressor a [`Log`] uses for its commit blocks,
/// mirroring the teacher's own `Compression` selector
/// (`write::Compressor`/`record_iterator::decompress`): each variant names
/// one whole-block codec, tagged by a single byte ahead of each block so a
/// reader can dispatch without out-of-band knowledge of how the log was
/// written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    #[cfg(feature = "zstd")]
    Zstd,
    #[cfg(feature = "lz4")]
    Lz4,
}

impl Compression {
    fn tag(self) -> u8 {
        match self {
            #[cfg(feature = "zstd")]
            Self::Zstd => 1,
            #[cfg(feature = "lz4")]
            Self::Lz4 => 2,
        }
    }

    fn from_tag(tag: u8) -> Result<Self, LogError> {
        match tag {
            #[cfg(feature = "zstd")]
            1 => Ok(Self::Zstd),
            #[cfg(feature = "lz4")]
            2 => Ok(Self::Lz4),
            other => Err(LogError::UnrecognizedCompression(format!(
                "codec tag {other}"
            ))),
        }
    }

    /// The default codec: zstd when available (matches the teacher's own
    /// default-on `zstd` feature), otherwise lz4.
    fn default_codec() -> Self {
        #[cfg(feature = "zstd")]
        {
            Self::Zstd
        }
        #[cfg(all(not(feature = "zstd"), feature = "lz4"))]
        {
            Self::Lz4
        }
    }

    fn compress(self, plain: &[u8]) -> Result<Vec<u8>, LogError> {
        match self {
            #[cfg(feature = "zstd")]
            Self::Zstd => Ok(zstd::encode_all(plain, 0)?),
            #[cfg(feature = "lz4")]
            Self::Lz4 => {
                let mut encoder = lz4::EncoderBuilder::new().build(Vec::new())?;
                encoder.write_all(plain)?;
                let (buf, result) = encoder.finish();
                result?;
                Ok(buf)
            }
        }
    }

    fn decompress(self, compressed: &[u8]) -> Result<Vec<u8>, LogError> {
        match self {
            #[cfg(feature = "zstd")]
            Self::Zstd => Ok(zstd::decode_all(compressed)?),
            #[cfg(feature = "lz4")]
            Self::Lz4 => {
                let mut decoder = lz4::Decoder::new(compressed)?;
                let mut out = Vec::new();
                decoder.read_to_end(&mut out)?;
                Ok(out)
            }
        }
    }
}

/// An append-only, compressed, seekable sequence of commits.
///
/// `S` is the underlying stream — a `File` for [`Log::open_file`]/
/// [`Log::open_temp`], or any `Read + Write + Seek` for [`Log::open`] (an
/// in-memory `Cursor<Vec<u8>>` in tests). A single [`Mutex`] serializes
/// [`Log::append`], [`Log::range`], and [`Log::copy`] against each other,
/// since they share one read/write cursor over `S`.
pub struct Log<S> {
    stream: Mutex<S>,
    compression: Compression,
}

impl<S: Read + Write + Seek> Log<S> {
    /// Wraps `stream`, writing the magic preamble if it is empty or
    /// verifying it otherwise. New blocks are written with the default
    /// codec (see [`Compression::default_codec`]); see
    /// [`Log::open_with_compression`] to pick explicitly.
    pub fn open(stream: S) -> Result<Self, LogError> {
        Self::open_with_compression(stream, Compression::default_codec())
    }

    /// As [`Log::open`], but writes new blocks with `compression` instead
    /// of the default codec. Each block records its own codec tag, so a
    /// log can mix blocks written under different calls to `open_with_compression`
    /// (e.g. across a process restart with a different default feature set).
    pub fn open_with_compression(mut stream: S, compression: Compression) -> Result<Self, LogError> {
        let len = stream.seek(SeekFrom::End(0))?;
        if len == 0 {
            stream.write_all(MAGIC)?;
            stream.flush()?;
        } else {
            stream.seek(SeekFrom::Start(0))?;
            let mut magic = [0u8; 4];
            stream.read_exact(&mut magic)?;
            if &magic != MAGIC {
                return Err(LogError::BadMagic(magic));
            }
            stream.seek(SeekFrom::End(0))?;
        }
        Ok(Self {
            stream: Mutex::new(stream),
            compression,
        })
    }

    /// Appends `commit`'s chunk-scoped wire form as one compressed,
    /// checksummed block, flushing once the block is fully written.
    pub fn append(&self, commit: &Commit) -> Result<(), LogError> {
        let mut plain = Vec::new();
        commit.write_to(&mut plain)?;
        let compressed = self.compression.compress(&plain)?;
        let crc = crc32fast::hash(&compressed);

        let mut guard = self.stream.lock().unwrap();
        guard.seek(SeekFrom::End(0))?;
        guard.write_u8(self.compression.tag())?;
        guard.write_u32::<BigEndian>(compressed.len() as u32)?;
        guard.write_all(&compressed)?;
        guard.write_u32::<BigEndian>(crc)?;
        guard.flush()?;
        log::debug!("log: appended commit {} ({} compressed bytes)", commit.id, compressed.len());
        Ok(())
    }

    /// Rewinds to the first block and invokes `f` with each decoded
    /// commit in append order. A clean end-of-stream (the next block's
    /// codec tag is entirely absent) ends iteration successfully; a
    /// truncated block, checksum mismatch, or callback error stops it with
    /// that error.
    pub fn range(
        &self,
        mut f: impl FnMut(Commit) -> Result<(), Box<dyn std::error::Error + Send + Sync>>,
    ) -> Result<(), LogError> {
        let mut guard = self.stream.lock().unwrap();
        guard.seek(SeekFrom::Start(MAGIC.len() as u64))?;

        loop {
            let mut tag_buf = [0u8; 1];
            match guard.read_exact(&mut tag_buf) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(err.into()),
            }
            let codec = Compression::from_tag(tag_buf[0])?;

            let compressed_len = guard.read_u32::<BigEndian>()? as usize;
            let mut compressed = vec![0u8; compressed_len];
            guard.read_exact(&mut compressed)?;
            let expected_crc = guard.read_u32::<BigEndian>()?;

            if crc32fast::hash(&compressed) != expected_crc {
                return Err(LogError::Io(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "commit log block failed its checksum",
                )));
            }

            let plain = codec.decompress(&compressed)?;
            let commit = Commit::read_from(&mut plain.as_slice())?;
            log::debug!("log: replaying commit {}", commit.id);
            f(commit).map_err(LogError::Callback)?;
        }
        Ok(())
    }

    /// Streams every byte of the underlying source, from the start, to
    /// `dst`.
    pub fn copy<W: Write>(&self, dst: &mut W) -> Result<(), LogError> {
        let mut guard = self.stream.lock().unwrap();
        guard.seek(SeekFrom::Start(0))?;
        io::copy(&mut *guard, dst)?;
        Ok(())
    }

    /// Consumes the log, dropping (and so closing, for a `File`) the
    /// underlying stream.
    pub fn close(self) -> Result<(), LogError> {
        Ok(())
    }
}

impl Log<std::fs::File> {
    /// Opens or creates `path` read/write and wraps it as a [`Log`].
    pub fn open_file(path: impl AsRef<std::path::Path>) -> Result<Self, LogError> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        Self::open(file)
    }

    /// Wraps a fresh anonymous temporary file.
    pub fn open_temp() -> Result<Self, LogError> {
        Self::open(tempfile::tempfile()?)
    }
}

/// A bounded-queue writer contract that satisfies the same append
/// contract as [`Log`] without any compression or persistence: each
/// `append` deep-clones `commit` before handing it to a
/// [`std::sync::mpsc::SyncSender`], decoupling the sender's commit
/// lifetime from the receiver's.
pub struct Channel {
    sender: SyncSender<Commit>,
}

impl Channel {
    pub fn new(sender: SyncSender<Commit>) -> Self {
        Self { sender }
    }

    pub fn append(&self, commit: &Commit) -> Result<(), LogError> {
        self.sender.send(commit.deep_clone()).map_err(|_| {
            LogError::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "channel receiver disconnected",
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{op, Buffer};
    use crate::chunk::Chunk;
    use std::io::Cursor;
    use std::sync::mpsc::sync_channel;

    fn commit_with(id: u64, value: i32) -> Commit {
        let mut buf = Buffer::new("col");
        buf.put_i32(op::PUT, 0, value);
        Commit::new(id, Chunk(0), vec![buf])
    }

    #[test]
    fn scenario_s6_append_then_replay() {
        let log = Log::open(Cursor::new(Vec::new())).unwrap();
        log.append(&commit_with(1, 100)).unwrap();
        log.append(&commit_with(2, 200)).unwrap();

        let mut ids = Vec::new();
        log.range(|c| {
            ids.push(c.id);
            Ok(())
        })
        .unwrap();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn reopen_over_existing_stream_validates_magic() {
        let mut backing = Vec::new();
        {
            let log = Log::open(Cursor::new(&mut backing)).unwrap();
            log.append(&commit_with(1, 1)).unwrap();
        }

        let log2 = Log::open(Cursor::new(&mut backing)).unwrap();
        let mut ids = Vec::new();
        log2.range(|c| {
            ids.push(c.id);
            Ok(())
        })
        .unwrap();
        assert_eq!(ids, vec![1]);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let backing = vec![b'X', b'X', b'X', b'X', 0, 0, 0, 0];
        let err = Log::open(Cursor::new(backing)).unwrap_err();
        assert!(matches!(err, LogError::BadMagic(_)));
    }

    #[test]
    fn copy_streams_entire_backing_store() {
        let log = Log::open(Cursor::new(Vec::new())).unwrap();
        log.append(&commit_with(1, 1)).unwrap();

        let mut out = Vec::new();
        log.copy(&mut out).unwrap();
        assert_eq!(&out[..4], MAGIC);
        assert!(out.len() > 4);
    }

    #[test]
    fn channel_append_deep_clones_before_send() {
        let (tx, rx) = sync_channel(4);
        let channel = Channel::new(tx);
        let mut commit = commit_with(1, 42);
        channel.append(&commit).unwrap();

        commit.updates[0].put_i32(op::PUT, 1, 99);

        let received = rx.recv().unwrap();
        assert_eq!(received.updates[0].chunk_headers().len(), 1);
        assert_eq!(received.id, 1);
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn lz4_codec_round_trips_and_tags_its_blocks() {
        let log = Log::open_with_compression(Cursor::new(Vec::new()), Compression::Lz4).unwrap();
        log.append(&commit_with(1, 7)).unwrap();
        log.append(&commit_with(2, 8)).unwrap();

        let mut ids = Vec::new();
        log.range(|c| {
            ids.push(c.id);
            Ok(())
        })
        .unwrap();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn unrecognized_codec_tag_is_rejected() {
        let mut backing = Vec::new();
        {
            let log = Log::open(Cursor::new(&mut backing)).unwrap();
            log.append(&commit_with(1, 1)).unwrap();
        }
        // The codec tag is the first byte after the 4-byte magic preamble.
        backing[MAGIC.len()] = 0xEE;

        let log = Log::open(Cursor::new(&mut backing)).unwrap();
        let err = log.range(|_| Ok(())).unwrap_err();
        assert!(matches!(err, LogError::UnrecognizedCompression(_)));
    }

    #[test]
    fn range_detects_corrupted_block() {
        let mut backing = Vec::new();
        {
            let log = Log::open(Cursor::new(&mut backing)).unwrap();
            log.append(&commit_with(1, 1)).unwrap();
        }
        // Flip a byte inside the compressed block to break its checksum.
        let flip_at = backing.len() - 5;
        backing[flip_at] ^= 0xFF;

        let log = Log::open(Cursor::new(&mut backing)).unwrap();
        let err = log.range(|_| Ok(())).unwrap_err();
        assert!(matches!(err, LogError::Io(_)));
    }
}
