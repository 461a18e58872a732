//! Streaming `multipart/form-data` body.
//!
//! [`MultipartForm`] describes the body (ordered text fields plus at most one
//! file); [`MultipartEncoder`] produces its exact byte sequence one chunk per
//! pull, reading the file in fixed-size blocks so the body is never held in
//! memory as a whole.
//!
//! ```text
//! --B\r\nContent-Disposition: form-data; name="a"\r\n\r\nupload\r\n
//! --B\r\nContent-Disposition: form-data; name="filename"; filename="f.gcode"\r\n\r\n
//! <file bytes>
//! \r\n--B--\r\n
//! ```

use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures_util::Stream;
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::Error;

/// File bytes emitted per pull.
pub const BLOCK_SIZE: usize = 8192;

// ── Form description ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct FilePart {
    path: PathBuf,
    filename: String,
    content_type: Option<String>,
}

/// Fields and file of one multipart body. Read-only once encoding starts.
#[derive(Debug, Clone)]
pub struct MultipartForm {
    boundary: String,
    fields: Vec<(String, Vec<u8>)>,
    file: Option<FilePart>,
}

impl Default for MultipartForm {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartForm {
    /// Empty form with a random boundary.
    pub fn new() -> Self {
        Self::with_boundary(format!("replink-{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            fields: Vec::new(),
            file: None,
        }
    }

    /// Append a text field; the value is written as-is (UTF-8).
    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into().into_bytes()));
        self
    }

    /// Append a text field given in Latin-1; each byte is transcoded to UTF-8.
    pub fn text_latin1(mut self, name: impl Into<String>, value: &[u8]) -> Self {
        let utf8: String = value.iter().copied().map(char::from).collect();
        self.fields.push((name.into(), utf8.into_bytes()));
        self
    }

    /// Attach the file at `path` as the part named `filename`, sent under
    /// `filename` as its file name. No `Content-Type` line is written.
    pub fn file(self, path: impl Into<PathBuf>, filename: impl Into<String>) -> Self {
        self.attach(path.into(), filename.into(), None)
    }

    /// Like [`file`](Self::file) with an explicit part `Content-Type`.
    pub fn file_with_type(
        self,
        path: impl Into<PathBuf>,
        filename: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        self.attach(path.into(), filename.into(), Some(content_type.into()))
    }

    fn attach(mut self, path: PathBuf, filename: String, content_type: Option<String>) -> Self {
        self.file = Some(FilePart {
            path,
            filename,
            content_type,
        });
        self
    }

    pub fn boundary(&self) -> &str {
        &self.boundary
    }

    /// Value for the request's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path.as_path())
    }

    fn field_part(&self, name: &str, value: &[u8]) -> Vec<u8> {
        let mut part = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n",
            self.boundary
        )
        .into_bytes();
        part.extend_from_slice(value);
        part.extend_from_slice(b"\r\n");
        part
    }

    fn file_header(&self, file: &FilePart) -> String {
        let mut header = format!(
            "--{}\r\nContent-Disposition: form-data; name=\"filename\"; filename=\"{}\"\r\n",
            self.boundary, file.filename
        );
        if let Some(content_type) = &file.content_type {
            header.push_str("Content-Type: ");
            header.push_str(content_type);
            header.push_str("\r\n");
        }
        header.push_str("\r\n");
        header
    }

    fn trailer(&self) -> String {
        if self.file.is_some() {
            format!("\r\n--{}--\r\n", self.boundary)
        } else {
            format!("--{}--\r\n", self.boundary)
        }
    }
}

// ── Encoder ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Fields,
    FileHeader,
    FileBody,
    Trailer,
    Done,
}

/// One pull's worth of body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub bytes: Bytes,
    /// `false` on the final chunk (the trailer) and on every pull after it.
    pub more: bool,
}

impl Chunk {
    fn more(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            more: true,
        }
    }

    fn last(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            more: false,
        }
    }
}

/// Pull-based producer of a [`MultipartForm`]'s bytes.
#[derive(Debug)]
pub struct MultipartEncoder {
    form: MultipartForm,
    stage: Stage,
    next_field: usize,
    file: Option<File>,
    content_length: u64,
}

impl MultipartEncoder {
    /// Open the attached file (if any) and prepare to encode.
    pub async fn open(form: MultipartForm) -> Result<Self, Error> {
        let mut content_length = form
            .fields
            .iter()
            .map(|(name, value)| form.field_part(name, value).len())
            .chain(std::iter::once(form.trailer().len()))
            .map(|len| u64::try_from(len).unwrap_or(u64::MAX))
            .sum::<u64>();

        let file = match &form.file {
            Some(part) => {
                let file = File::open(&part.path).await?;
                content_length += u64::try_from(form.file_header(part).len()).unwrap_or(u64::MAX);
                content_length += file.metadata().await?.len();
                Some(file)
            }
            None => None,
        };

        Ok(Self {
            form,
            stage: Stage::Fields,
            next_field: 0,
            file,
            content_length,
        })
    }

    /// Total body size, assuming the file does not change while encoding.
    pub fn content_length(&self) -> u64 {
        self.content_length
    }

    pub fn content_type(&self) -> String {
        self.form.content_type()
    }

    /// Produce the next chunk of the body.
    pub async fn next_chunk(&mut self) -> Result<Chunk, Error> {
        loop {
            match self.stage {
                Stage::Fields => {
                    if let Some((name, value)) = self.form.fields.get(self.next_field) {
                        let part = self.form.field_part(name, value);
                        self.next_field += 1;
                        return Ok(Chunk::more(part));
                    }
                    self.stage = Stage::FileHeader;
                }
                Stage::FileHeader => {
                    self.stage = Stage::FileBody;
                    if let Some(part) = &self.form.file {
                        return Ok(Chunk::more(self.form.file_header(part)));
                    }
                }
                Stage::FileBody => {
                    if let Some(file) = &mut self.file {
                        let mut block = vec![0; BLOCK_SIZE];
                        let n = file.read(&mut block).await?;
                        if n > 0 {
                            block.truncate(n);
                            return Ok(Chunk::more(block));
                        }
                    }
                    self.stage = Stage::Trailer;
                }
                Stage::Trailer => {
                    self.stage = Stage::Done;
                    self.file = None;
                    return Ok(Chunk::last(self.form.trailer()));
                }
                Stage::Done => return Ok(Chunk::last(Bytes::new())),
            }
        }
    }

    /// Adapt into a byte stream for an HTTP client body.
    pub fn into_stream(mut self) -> impl Stream<Item = Result<Bytes, Error>> + Send + 'static {
        async_stream::try_stream! {
            loop {
                let chunk = self.next_chunk().await?;
                if !chunk.bytes.is_empty() {
                    yield chunk.bytes;
                }
                if !chunk.more {
                    break;
                }
            }
        }
    }
}
