//! Response sinks: byte destinations for streamed bodies.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

/// A byte-accepting destination for a response body.
///
/// Writes are awaited in chunk order on the fetch's execution context.
#[async_trait]
pub trait ResponseSink: Send {
    /// Short description used in errors and logs (for files, the path).
    fn describe(&self) -> String;

    /// Appends one chunk.
    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Flushes buffered bytes once the body is complete.
    async fn close(&mut self) -> io::Result<()>;
}

/// Buffered file sink.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl FileSink {
    /// Creates (or truncates) `path`.
    ///
    /// # Errors
    ///
    /// Returns the IO error from opening the file.
    pub async fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = File::create(&path).await?;
        Ok(Self::from_file(path, file))
    }

    /// Creates `path`, failing with [`io::ErrorKind::AlreadyExists`] if it exists.
    ///
    /// # Errors
    ///
    /// Returns the IO error from opening the file.
    pub async fn create_new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        Ok(Self::from_file(path, file))
    }

    /// Wraps an already opened file.
    #[must_use]
    pub fn from_file(path: PathBuf, file: File) -> Self {
        Self {
            path,
            writer: BufWriter::new(file),
        }
    }

    /// Returns the file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ResponseSink for FileSink {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.writer.write_all(chunk).await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.writer.flush().await?;
        self.writer.get_mut().sync_all().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_sink_writes_chunks_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.bin");
        let mut sink = FileSink::create(&path).await.unwrap();
        sink.write_chunk(b"hello ").await.unwrap();
        sink.write_chunk(b"world").await.unwrap();
        sink.close().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
        assert_eq!(sink.describe(), path.display().to_string());
    }

    #[tokio::test]
    async fn test_create_new_refuses_existing_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("taken.png");
        std::fs::write(&path, b"x").unwrap();

        let error = FileSink::create_new(&path).await.unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(std::fs::read(&path).unwrap(), b"x");
    }
}
