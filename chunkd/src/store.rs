//! The on-disk chunk store.
//!
//! Chunk `c` lives at `chunks/<c[0..2]>/<c>` under the data directory,
//! keeping directory fanout bounded. A write lands on a `.tmp` sibling
//! while the digest is folded over the bytes; only when the digest
//! matches the expected value is the file fsynced and renamed into
//! place. The verified digest is persisted in a `.sum` sidecar,
//! committed before the data file, so reads can re-verify the bytes
//! against it before serving anything.

use std::io;
use std::path::{Path, PathBuf};

use displaydoc::Display;
use nix::sys::statvfs::statvfs;
use tokio::fs;
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use uuid::Uuid;

use hexad::hash::Checksum;
use hexad::proto::{HealthReport, Status};
use hexad::stream::{DigestReader, DigestWriter};

/// A chunk store error.
#[derive(Debug, Display)]
pub enum StoreError {
    /// The chunk does not exist.
    NotFound,

    /// Checksum mismatch: expected {expected}, got {actual}
    ChecksumMismatch { expected: String, actual: String },

    /// The digest record for the chunk is missing.
    MissingDigest,

    /// No space left on the data volume.
    DiskFull,

    /// I/O error: {0}
    Io(io::Error),
}

impl std::error::Error for StoreError {}

impl StoreError {
    /// The wire status this error maps to.
    pub fn status(&self) -> Status {
        match self {
            Self::NotFound => Status::NotFound,
            Self::ChecksumMismatch { .. } => Status::DataLoss,
            Self::MissingDigest => Status::DataLoss,
            Self::DiskFull => Status::ResourceExhausted,
            Self::Io(_) => Status::Internal,
        }
    }
}

fn map_io(error: io::Error) -> StoreError {
    if error.raw_os_error() == Some(libc::ENOSPC) {
        StoreError::DiskFull
    } else if error.kind() == io::ErrorKind::NotFound {
        StoreError::NotFound
    } else {
        StoreError::Io(error)
    }
}

/// The chunk store rooted at one data directory.
#[derive(Debug)]
pub struct ChunkStore {
    data_dir: PathBuf,
}

impl ChunkStore {
    pub async fn new(data_dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let data_dir = data_dir.into();

        fs::create_dir_all(data_dir.join("chunks"))
            .await
            .map_err(map_io)?;

        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn chunk_path(&self, chunk_id: Uuid) -> PathBuf {
        let name = chunk_id.to_string();
        self.data_dir.join("chunks").join(&name[..2]).join(&name)
    }

    fn digest_path(&self, chunk_id: Uuid) -> PathBuf {
        let name = chunk_id.to_string();
        self.data_dir
            .join("chunks")
            .join(&name[..2])
            .join(format!("{}.sum", name))
    }

    /// Starts a streamed write for a chunk.
    pub async fn begin_put(&self, chunk_id: Uuid) -> Result<ChunkWriter, StoreError> {
        let final_path = self.chunk_path(chunk_id);
        let parent = final_path.parent().expect("chunk path has a parent");

        fs::create_dir_all(parent).await.map_err(map_io)?;

        let temp_path = final_path.with_extension("tmp");
        let file = fs::File::create(&temp_path).await.map_err(map_io)?;

        Ok(ChunkWriter {
            out: DigestWriter::new(file),
            temp_path,
            final_path,
            digest_path: self.digest_path(chunk_id),
        })
    }

    /// Opens a chunk for reading after verifying its digest.
    ///
    /// Every byte is rehashed against the recorded digest before
    /// anything is served; a chunk that rotted on disk is refused, not
    /// silently returned.
    pub async fn open(&self, chunk_id: Uuid) -> Result<(fs::File, u64), StoreError> {
        let path = self.chunk_path(chunk_id);
        let metadata = fs::metadata(&path).await.map_err(map_io)?;

        let expected = match fs::read_to_string(self.digest_path(chunk_id)).await {
            Ok(recorded) => {
                Checksum::from_hex(recorded.trim()).map_err(|_| StoreError::MissingDigest)?
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::MissingDigest);
            }
            Err(error) => return Err(map_io(error)),
        };

        let mut reader = DigestReader::new(fs::File::open(&path).await.map_err(map_io)?);
        tokio::io::copy(&mut reader, &mut tokio::io::sink())
            .await
            .map_err(map_io)?;

        let (mut file, actual, _) = reader.finish();
        if actual != expected {
            return Err(StoreError::ChecksumMismatch {
                expected: expected.to_hex(),
                actual: actual.to_hex(),
            });
        }

        file.rewind().await.map_err(map_io)?;

        Ok((file, metadata.len()))
    }

    /// Removes a chunk file and its digest record.
    pub async fn delete(&self, chunk_id: Uuid) -> Result<(), StoreError> {
        fs::remove_file(self.chunk_path(chunk_id))
            .await
            .map_err(map_io)?;

        // The chunk is gone either way.
        let _ = fs::remove_file(self.digest_path(chunk_id)).await;

        Ok(())
    }

    /// Disk usage of the data directory's volume.
    pub fn usage(&self) -> Result<HealthReport, StoreError> {
        let stat = statvfs(self.data_dir.as_path())
            .map_err(|errno| StoreError::Io(io::Error::from(errno)))?;

        let fragment = stat.fragment_size() as u64;
        let total = stat.blocks() as u64 * fragment;
        let available = stat.blocks_available() as u64 * fragment;

        Ok(HealthReport {
            healthy: true,
            available,
            used: total - available,
            total,
        })
    }
}

/// An in-progress chunk write.
pub struct ChunkWriter {
    out: DigestWriter<fs::File>,
    temp_path: PathBuf,
    final_path: PathBuf,
    digest_path: PathBuf,
}

impl ChunkWriter {
    /// Appends one span of bytes, folding it into the digest.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), StoreError> {
        self.out.write_all(data).await.map_err(map_io)
    }

    pub fn bytes_written(&self) -> u64 {
        self.out.bytes_written()
    }

    /// Verifies the digest and publishes the chunk atomically.
    ///
    /// The digest sidecar is committed first: a visible chunk file
    /// always has its digest record.
    pub async fn commit(self, expected: &Checksum) -> Result<u64, StoreError> {
        let ChunkWriter {
            out,
            temp_path,
            final_path,
            digest_path,
        } = self;

        let (mut file, actual, bytes) = out.finish();
        if actual != *expected {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::ChecksumMismatch {
                expected: expected.to_hex(),
                actual: actual.to_hex(),
            });
        }

        let sealed = async {
            file.flush().await.map_err(map_io)?;
            file.sync_all().await.map_err(map_io)?;
            drop(file);

            let mut digest_temp = digest_path.clone().into_os_string();
            digest_temp.push(".tmp");
            let digest_temp = PathBuf::from(digest_temp);

            let seal = async {
                let mut sum = fs::File::create(&digest_temp).await.map_err(map_io)?;
                sum.write_all(actual.to_hex().as_bytes())
                    .await
                    .map_err(map_io)?;
                sum.sync_all().await.map_err(map_io)?;
                drop(sum);

                fs::rename(&digest_temp, &digest_path)
                    .await
                    .map_err(map_io)?;
                fs::rename(&temp_path, &final_path).await.map_err(map_io)
            }
            .await;

            if seal.is_err() {
                let _ = fs::remove_file(&digest_temp).await;
            }
            seal
        }
        .await;

        match sealed {
            Ok(()) => Ok(bytes),
            Err(error) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(error)
            }
        }
    }

    /// Abandons the write and removes the partial file.
    pub async fn abort(self) {
        let _ = fs::remove_file(&self.temp_path).await;
    }
}
