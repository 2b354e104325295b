//! Incremental file reading

use std::fs::Metadata;
use std::io::{self, SeekFrom};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::bytes::BytesMut;
use tokio_util::codec::{AnyDelimiterCodec, Decoder};

/// Device and inode of a file, where the platform exposes them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    pub device: u64,
    pub inode: u64,
}

impl FileIdentity {
    #[cfg(unix)]
    fn of(meta: &Metadata) -> Option<Self> {
        use std::os::unix::fs::MetadataExt;
        Some(Self {
            device: meta.dev(),
            inode: meta.ino(),
        })
    }

    #[cfg(not(unix))]
    fn of(_meta: &Metadata) -> Option<Self> {
        None
    }
}

/// Bytes read by one poll
#[derive(Debug, Default)]
pub struct Chunk {
    pub bytes: Vec<u8>,
    /// The file was rotated or truncated since the previous read
    pub rotated: bool,
    /// More unread bytes remain after this chunk
    pub more: bool,
}

/// Bytes before the offset that must still match for the offset to stay valid
const TAIL_BYTES: usize = 64;

/// Read position in a log file
///
/// The offset only moves forward, except on rotation where it returns to
/// zero so the new file is read from its first byte. Rotation is a new inode,
/// a file shorter than the offset, or a file whose bytes just before the
/// offset changed (truncated in place and refilled past the old length).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogCursor {
    offset: u64,
    identity: Option<FileIdentity>,
    tail: Vec<u8>,
}

impl LogCursor {
    /// Cursor at the current end of `path`; at the start if it does not exist
    pub async fn at_end(path: &Path) -> io::Result<Self> {
        let mut file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e),
        };
        let meta = file.metadata().await?;
        let tail = read_tail(&mut file, meta.len()).await?;
        Ok(Self {
            offset: meta.len(),
            identity: FileIdentity::of(&meta),
            tail,
        })
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read up to `limit` new bytes
    ///
    /// Returns `Ok(None)` when the file does not exist.
    pub async fn read_new(&mut self, path: &Path, limit: u64) -> io::Result<Option<Chunk>> {
        let mut file = match File::open(path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let meta = file.metadata().await?;

        let identity = FileIdentity::of(&meta);
        let replaced = self.identity.is_some() && identity.is_some() && identity != self.identity;
        let truncated = meta.len() < self.offset;
        let rewritten = !replaced
            && !truncated
            && !self.tail.is_empty()
            && read_tail(&mut file, self.offset).await? != self.tail;
        let rotated = replaced || truncated || rewritten;
        if rotated {
            self.offset = 0;
            self.tail.clear();
        }
        self.identity = identity;

        let available = meta.len().saturating_sub(self.offset);
        if available == 0 {
            return Ok(Some(Chunk {
                rotated,
                ..Chunk::default()
            }));
        }

        file.seek(SeekFrom::Start(self.offset)).await?;
        let want = available.min(limit.max(1));
        let mut bytes = Vec::with_capacity(usize::try_from(want).unwrap_or(0));
        (&mut file).take(want).read_to_end(&mut bytes).await?;
        self.offset += bytes.len() as u64;
        self.remember(&bytes);

        Ok(Some(Chunk {
            more: (bytes.len() as u64) < available,
            bytes,
            rotated,
        }))
    }

    fn remember(&mut self, bytes: &[u8]) {
        self.tail
            .extend_from_slice(&bytes[bytes.len().saturating_sub(TAIL_BYTES)..]);
        let excess = self.tail.len().saturating_sub(TAIL_BYTES);
        self.tail.drain(..excess);
    }
}

/// The up to `TAIL_BYTES` bytes of `file` that end at `end`
async fn read_tail(file: &mut File, end: u64) -> io::Result<Vec<u8>> {
    let start = end.saturating_sub(TAIL_BYTES as u64);
    file.seek(SeekFrom::Start(start)).await?;
    let mut tail = Vec::with_capacity(TAIL_BYTES);
    file.take(end - start).read_to_end(&mut tail).await?;
    Ok(tail)
}

/// Longest line kept whole; longer lines are skipped up to their newline
pub const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Splits a byte stream into lines, holding back an unterminated tail
///
/// Invalid UTF-8 is replaced rather than rejected, since log files mix
/// encodings.
#[derive(Debug)]
pub struct LineSplitter {
    codec: AnyDelimiterCodec,
    buffer: BytesMut,
    max_line: usize,
    skipped: u64,
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::with_max_line(MAX_LINE_BYTES)
    }
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line_bytes: usize) -> Self {
        Self {
            codec: newline_codec(max_line_bytes),
            buffer: BytesMut::new(),
            max_line: max_line_bytes,
            skipped: 0,
        }
    }

    /// Lines dropped for exceeding the maximum length
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Append bytes; returns every line completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        loop {
            match self.codec.decode(&mut self.buffer) {
                Ok(Some(line)) => lines.push(to_line(&line)),
                Ok(None) => return lines,
                Err(_) => self.skipped += 1,
            }
        }
    }

    /// Take the unterminated tail as a final line
    ///
    /// The splitter starts afresh afterwards, so a line being skipped for
    /// its length does not swallow the first line of a rotated file.
    pub fn take_partial(&mut self) -> Option<String> {
        let tail = self.codec.decode_eof(&mut self.buffer);
        self.codec = newline_codec(self.max_line);
        self.buffer.clear();
        match tail {
            Ok(Some(line)) if !line.is_empty() => Some(to_line(&line)),
            Ok(_) => None,
            Err(_) => {
                self.skipped += 1;
                None
            }
        }
    }
}

fn newline_codec(max_line_bytes: usize) -> AnyDelimiterCodec {
    AnyDelimiterCodec::new_with_max_length(b"\n".to_vec(), b"\n".to_vec(), max_line_bytes)
}

fn to_line(bytes: &[u8]) -> String {
    let line = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(line).into_owned()
}
