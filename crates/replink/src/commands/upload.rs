//! `replink upload`

use replink_api::{Endpoint, ModelIdent, upload_model};

use crate::cli::UploadArgs;
use crate::error::CliError;

pub async fn handle(args: &UploadArgs, endpoint: &Endpoint) -> Result<(), CliError> {
    let name = match args.name {
        Some(ref name) => name.clone(),
        None => args
            .file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .ok_or_else(|| CliError::Validation {
                field: "file".into(),
                reason: format!("'{}' has no file name", args.file.display()),
            })?,
    };

    let model = ModelIdent::new(args.printer.as_str(), name).in_group(args.group.as_str());
    upload_model(endpoint, &model, &args.file).await?;

    eprintln!("Uploaded {} to {}", args.file.display(), args.printer);
    Ok(())
}
