// Model upload over a one-off HTTP exchange
//
// `POST /printer/model/<slug>` with a streamed multipart body. Independent
// of any session: failures are returned to the caller only.

use std::path::Path;

use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use tracing::{debug, info, warn};

use crate::endpoint::Endpoint;
use crate::error::Error;
use crate::multipart::{MultipartEncoder, MultipartForm};
use crate::transport::TransportConfig;

/// Where an uploaded model lands on the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelIdent {
    /// Printer slug.
    pub printer: String,
    /// Model group; empty for the default group.
    pub group: String,
    /// Display name of the model.
    pub name: String,
}

impl ModelIdent {
    pub fn new(printer: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            printer: printer.into(),
            group: String::new(),
            name: name.into(),
        }
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Form fields and file part for uploading `path` as this model.
    pub fn form(&self, path: &Path) -> MultipartForm {
        let mut form = MultipartForm::new()
            .text("a", "upload")
            .text("name", self.name.as_str());
        if !self.group.is_empty() {
            form = form.text("group", self.group.as_str());
        }

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone());
        form.file_with_type(path, filename, "application/octet-stream")
    }
}

/// Upload the file at `path` with the default transport settings.
pub async fn upload_model(endpoint: &Endpoint, model: &ModelIdent, path: &Path) -> Result<(), Error> {
    upload_model_with(&TransportConfig::default(), endpoint, model, path).await
}

/// Upload the file at `path`; success is HTTP 200 or 204.
pub async fn upload_model_with(
    transport: &TransportConfig,
    endpoint: &Endpoint,
    model: &ModelIdent,
    path: &Path,
) -> Result<(), Error> {
    let url = endpoint.upload_url(&model.printer)?;
    let client = transport.build_client_for(endpoint)?;
    let encoder = MultipartEncoder::open(model.form(path)).await?;

    info!(
        printer = %model.printer,
        name = %model.name,
        bytes = encoder.content_length(),
        "uploading model"
    );

    let response = client
        .post(url)
        .header(CONTENT_TYPE, encoder.content_type())
        .header(CONTENT_LENGTH, encoder.content_length())
        .body(reqwest::Body::wrap_stream(encoder.into_stream()))
        .send()
        .await?;

    let status = response.status();
    debug!(status = status.as_u16(), "upload response");

    match status.as_u16() {
        200 | 204 => Ok(()),
        code => {
            warn!(status = code, "upload rejected");
            Err(Error::ServerError { status: code })
        }
    }
}
