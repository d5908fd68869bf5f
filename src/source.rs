//! File blobs and the range-read primitive the viewer and worker read through.

use std::{
    io::SeekFrom,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
    sync::Mutex,
};

/// Random-access reads over a file without loading all of it.
#[async_trait]
pub trait RangeSource: Send + Sync {
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read up to `len` bytes at `offset`. Short only at end of input.
    async fn read_range(&self, offset: u64, len: usize) -> std::io::Result<Bytes>;
}

pub struct FileSource {
    path: PathBuf,
    len: u64,
    file: Mutex<File>,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await?;
        let len = file.metadata().await?.len();
        Ok(Self {
            path,
            len,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RangeSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_range(&self, offset: u64, len: usize) -> std::io::Result<Bytes> {
        if offset >= self.len {
            return Ok(Bytes::new());
        }
        let want = len.min((self.len - offset) as usize);
        let mut buf = vec![0u8; want];
        let mut file = self.file.lock().await;
        file.seek(SeekFrom::Start(offset)).await?;
        let mut filled = 0;
        while filled < want {
            let n = file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf.truncate(filled);
        Ok(Bytes::from(buf))
    }
}

pub struct MemorySource(pub Bytes);

#[async_trait]
impl RangeSource for MemorySource {
    fn len(&self) -> u64 {
        self.0.len() as u64
    }

    async fn read_range(&self, offset: u64, len: usize) -> std::io::Result<Bytes> {
        let total = self.0.len();
        let start = (offset.min(total as u64)) as usize;
        let end = start.saturating_add(len).min(total);
        Ok(self.0.slice(start..end))
    }
}

/// A named file handed to the worker or the viewer.
#[derive(Clone)]
pub struct FileBlob {
    pub name: String,
    pub mime: String,
    pub source: Arc<dyn RangeSource>,
}

impl std::fmt::Debug for FileBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBlob")
            .field("name", &self.name)
            .field("mime", &self.mime)
            .field("size", &self.size())
            .finish()
    }
}

impl FileBlob {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, source: Arc<dyn RangeSource>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            source,
        }
    }

    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        let name = name.into();
        let mime = guess_mime(&name).to_string();
        Self::new(name, mime, Arc::new(MemorySource(bytes.into())))
    }

    pub async fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let mime = guess_mime(&name).to_string();
        let source = FileSource::open(path).await?;
        Ok(Self::new(name, mime, Arc::new(source)))
    }

    pub fn size(&self) -> u64 {
        self.source.len()
    }

    /// Whole content, for plugins that need the full input.
    pub async fn read_all(&self) -> std::io::Result<Bytes> {
        let size = usize::try_from(self.size()).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "file too large for memory")
        })?;
        self.source.read_range(0, size).await
    }
}

/// Best-effort MIME type from the file extension.
pub fn guess_mime(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        Some("svg") => "image/svg+xml",
        Some("txt") | Some("log") => "text/plain",
        Some("md") => "text/markdown",
        Some("csv") => "text/csv",
        Some("json") => "application/json",
        Some("js") => "text/javascript",
        Some("zip") => "application/zip",
        _ => "application/octet-stream",
    }
}
