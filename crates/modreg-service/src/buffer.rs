//! Hashing upload buffer
//!
//! Uploads are read exactly once from the client. While reading, the bytes
//! are counted and fed to every digest algorithm, and stored either in memory
//! or, above a threshold, in an anonymous temporary file. The buffer can then
//! be parsed in place (it implements `Read + Seek`) and finally consumed into
//! a [`ReplayBuffer`] for persistence.

use futures::{Stream, StreamExt};
use modreg_core::{Checksum, ContentDigests, HashAlgorithm};
use sha2::{Digest, Sha256};
use sha3::Sha3_256;
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Payloads above this size are spilled to a temporary file
pub const DEFAULT_MEMORY_THRESHOLD: usize = 32 * 1024 * 1024;

const READ_CHUNK_SIZE: usize = 64 * 1024;

/// Errors raised while buffering an upload
#[derive(Debug, Error)]
pub enum BufferError {
    /// Reading from the client failed
    #[error("Upload transport error: {0}")]
    Transport(String),

    /// Local buffering failed
    #[error("Buffer I/O error: {0}")]
    Io(#[from] io::Error),
}

struct MultiHasher {
    sha256: Sha256,
    sha3_256: Sha3_256,
    blake3: blake3::Hasher,
}

impl MultiHasher {
    fn new() -> Self {
        Self {
            sha256: Sha256::new(),
            sha3_256: Sha3_256::new(),
            blake3: blake3::Hasher::new(),
        }
    }

    fn update(&mut self, data: &[u8]) {
        self.sha256.update(data);
        self.sha3_256.update(data);
        self.blake3.update(data);
    }

    fn finalize(self) -> ContentDigests {
        ContentDigests {
            sha256: Checksum::from_bytes(HashAlgorithm::SHA256, &self.sha256.finalize()),
            sha3_256: Checksum::from_bytes(HashAlgorithm::SHA3_256, &self.sha3_256.finalize()),
            blake3: Checksum::from_bytes(HashAlgorithm::BLAKE3, self.blake3.finalize().as_bytes()),
        }
    }
}

enum Storage {
    Memory(Cursor<Vec<u8>>),
    File(File),
}

impl Read for Storage {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Storage::Memory(cursor) => cursor.read(buf),
            Storage::File(file) => file.read(buf),
        }
    }
}

impl Seek for Storage {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self {
            Storage::Memory(cursor) => cursor.seek(pos),
            Storage::File(file) => file.seek(pos),
        }
    }
}

/// Sink used while reading a blocking source
enum SyncSink {
    Memory(Vec<u8>),
    File(File),
}

impl SyncSink {
    fn write(&mut self, data: &[u8], threshold: usize) -> io::Result<()> {
        if let SyncSink::Memory(buf) = self {
            if buf.len() + data.len() <= threshold {
                buf.extend_from_slice(data);
                return Ok(());
            }
            let mut file = tempfile::tempfile()?;
            file.write_all(buf)?;
            debug!(buffered = buf.len(), "Upload exceeds memory threshold, spilling to disk");
            *self = SyncSink::File(file);
        }
        if let SyncSink::File(file) = self {
            file.write_all(data)?;
        }
        Ok(())
    }

    fn finish(self) -> io::Result<Storage> {
        match self {
            SyncSink::Memory(buf) => Ok(Storage::Memory(Cursor::new(buf))),
            SyncSink::File(mut file) => {
                file.flush()?;
                Ok(Storage::File(file))
            }
        }
    }
}

/// Sink used while reading an async stream
enum AsyncSink {
    Memory(Vec<u8>),
    File(tokio::fs::File),
}

impl AsyncSink {
    async fn write(&mut self, data: &[u8], threshold: usize) -> io::Result<()> {
        if let AsyncSink::Memory(buf) = self {
            if buf.len() + data.len() <= threshold {
                buf.extend_from_slice(data);
                return Ok(());
            }
            let std_file = tokio::task::spawn_blocking(tempfile::tempfile)
                .await
                .map_err(io::Error::other)??;
            let mut file = tokio::fs::File::from_std(std_file);
            file.write_all(buf).await?;
            debug!(buffered = buf.len(), "Upload exceeds memory threshold, spilling to disk");
            *self = AsyncSink::File(file);
        }
        if let AsyncSink::File(file) = self {
            file.write_all(data).await?;
        }
        Ok(())
    }

    async fn finish(self) -> io::Result<Storage> {
        match self {
            AsyncSink::Memory(buf) => Ok(Storage::Memory(Cursor::new(buf))),
            AsyncSink::File(mut file) => {
                file.flush().await?;
                Ok(Storage::File(file.into_std().await))
            }
        }
    }
}

/// A fully read upload with its size and digests
pub struct HashedBuffer {
    storage: Storage,
    size: u64,
    digests: ContentDigests,
}

impl HashedBuffer {
    /// Buffer an async byte stream such as an HTTP request body
    ///
    /// Any stream error aborts buffering with [`BufferError::Transport`].
    pub async fn from_stream<S, B, E>(
        stream: S,
        memory_threshold: usize,
    ) -> Result<Self, BufferError>
    where
        S: Stream<Item = Result<B, E>>,
        B: AsRef<[u8]>,
        E: fmt::Display,
    {
        futures::pin_mut!(stream);

        let mut hasher = MultiHasher::new();
        let mut sink = AsyncSink::Memory(Vec::new());
        let mut size = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| BufferError::Transport(e.to_string()))?;
            let data = chunk.as_ref();
            hasher.update(data);
            size += data.len() as u64;
            sink.write(data, memory_threshold).await?;
        }

        Ok(Self {
            storage: sink.finish().await?,
            size,
            digests: hasher.finalize(),
        })
    }

    /// Buffer a blocking reader
    pub fn from_reader<R: Read>(
        mut reader: R,
        memory_threshold: usize,
    ) -> Result<Self, BufferError> {
        let mut hasher = MultiHasher::new();
        let mut sink = SyncSink::Memory(Vec::new());
        let mut size = 0u64;
        let mut chunk = vec![0u8; READ_CHUNK_SIZE];

        loop {
            let n = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(BufferError::Transport(e.to_string())),
            };
            let data = &chunk[..n];
            hasher.update(data);
            size += n as u64;
            sink.write(data, memory_threshold)?;
        }

        Ok(Self {
            storage: sink.finish()?,
            size,
            digests: hasher.finalize(),
        })
    }

    /// Total number of bytes read
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn digests(&self) -> &ContentDigests {
        &self.digests
    }

    /// Whether the content was spilled to a temporary file
    pub fn is_spilled(&self) -> bool {
        matches!(self.storage, Storage::File(_))
    }

    /// Rewind and consume the buffer for its single replay
    pub fn into_replay(mut self) -> Result<ReplayBuffer, BufferError> {
        self.storage.rewind()?;
        Ok(ReplayBuffer {
            storage: self.storage,
            size: self.size,
            digests: self.digests,
        })
    }
}

impl Read for HashedBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.storage.read(buf)
    }
}

impl Seek for HashedBuffer {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.storage.seek(pos)
    }
}

impl fmt::Debug for HashedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashedBuffer")
            .field("size", &self.size)
            .field("spilled", &self.is_spilled())
            .field("sha256", &self.digests.sha256.value())
            .finish()
    }
}

/// The rewound content of a [`HashedBuffer`], readable once from the start
pub struct ReplayBuffer {
    storage: Storage,
    size: u64,
    digests: ContentDigests,
}

impl ReplayBuffer {
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn digests(&self) -> &ContentDigests {
        &self.digests
    }
}

impl Read for ReplayBuffer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.storage.read(buf)
    }
}
