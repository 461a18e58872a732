//! `replink printers`

use replink_api::Session;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

pub async fn handle(session: &Session, global: &GlobalOpts) -> Result<(), CliError> {
    let printers = session.list_printers().await?;
    output::print(&printers, global.output);
    Ok(())
}
