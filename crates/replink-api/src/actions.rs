// Named server actions
//
// Thin builders over `Session::request`: each constructs a `Request` with a
// known action name and payload. All but `listPrinter` are scoped to a
// printer slug. An `ok: false` answer is returned to the caller as
// `Error::NotOk` and does not affect the session.

use serde_json::Value;
use tracing::debug;

use crate::error::Error;
use crate::protocol::{Request, check_ok};
use crate::session::Session;

impl Session {
    /// List all printers known to the server.
    ///
    /// `listPrinter`
    pub async fn list_printers(&self) -> Result<Value, Error> {
        debug!("listing printers");
        self.request(Request::new("listPrinter")).await
    }

    /// Full configuration of one printer.
    ///
    /// `getPrinterConfig`
    pub async fn printer_config(&self, printer: &str) -> Result<Value, Error> {
        self.request(Request::for_printer("getPrinterConfig", printer))
            .await
    }

    /// Names of the model groups of a printer.
    ///
    /// `listModelGroups`, answer `{ ok, groupNames: [..] }`
    pub async fn model_groups(&self, printer: &str) -> Result<Vec<String>, Error> {
        let action = "listModelGroups";
        let mut data = self.request(Request::for_printer(action, printer)).await?;
        check_ok(action, &data)?;

        let names = data.get_mut("groupNames").map(Value::take).unwrap_or_default();
        serde_json::from_value(names)
            .map_err(|e| Error::protocol(format!("'{action}' groupNames: {e}")))
    }

    /// Stored models of a printer.
    ///
    /// `listModels`, answer `{ data: [..] }`
    pub async fn models(&self, printer: &str) -> Result<Value, Error> {
        let mut data = self
            .request(Request::for_printer("listModels", printer))
            .await?;
        Ok(data.get_mut("data").map(Value::take).unwrap_or_default())
    }

    /// `addModelGroup` with `{ groupName }`
    pub async fn add_model_group(&self, printer: &str, group: &str) -> Result<(), Error> {
        debug!(printer, group, "adding model group");
        let request = Request::for_printer("addModelGroup", printer).with("groupName", group);
        self.request_ok(request).await
    }

    /// Delete a model group, optionally together with the models in it.
    ///
    /// `delModelGroup` with `{ groupName, delFiles }`
    pub async fn delete_model_group(
        &self,
        printer: &str,
        group: &str,
        delete_models: bool,
    ) -> Result<(), Error> {
        debug!(printer, group, delete_models, "deleting model group");
        let request = Request::for_printer("delModelGroup", printer)
            .with("groupName", group)
            .with("delFiles", delete_models);
        self.request_ok(request).await
    }

    /// `removeModel` with `{ id }`
    pub async fn remove_model(&self, printer: &str, id: u64) -> Result<Value, Error> {
        debug!(printer, id, "removing model");
        self.request(Request::for_printer("removeModel", printer).with("id", id))
            .await
    }

    /// `moveModelFileToGroup` with `{ id, groupName }`
    pub async fn move_model_to_group(&self, printer: &str, id: u64, group: &str) -> Result<(), Error> {
        debug!(printer, id, group, "moving model to group");
        let request = Request::for_printer("moveModelFileToGroup", printer)
            .with("id", id)
            .with("groupName", group);
        self.request_ok(request).await
    }

    /// Queue a G-code line on the printer.
    ///
    /// `send` with `{ cmd }`
    pub async fn send_command(&self, printer: &str, gcode: &str) -> Result<Value, Error> {
        debug!(printer, gcode, "sending command");
        self.request(Request::for_printer("send", printer).with("cmd", gcode))
            .await
    }

    async fn request_ok(&self, request: Request) -> Result<(), Error> {
        let action = request.action().to_owned();
        let data = self.request(request).await?;
        check_ok(&action, &data)
    }
}
