//! Config subcommand handlers.

use std::fmt::Write;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config::{self, Config};
use crate::error::CliError;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            println!("{}", config::config_path().display());
            Ok(())
        }
        ConfigCommand::Show => {
            let cfg = config::load_config()?;
            let active = config::active_profile_name(global, &cfg);
            print!("{}", format_config_redacted(&cfg, &active));
            Ok(())
        }
    }
}

/// Format config for display, masking sensitive fields.
fn format_config_redacted(cfg: &Config, active: &str) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "# active profile: {active}");
    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "request_timeout_secs = {}", cfg.defaults.request_timeout_secs);
    let _ = writeln!(out, "backoff_secs = {:?}", cfg.defaults.backoff_secs);

    let mut names: Vec<_> = cfg.profiles.keys().collect();
    names.sort();
    for name in names {
        let p = &cfg.profiles[name];
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "host = \"{}\"", p.host);
        let _ = writeln!(out, "port = {}", p.port);
        if p.api_key.is_some() {
            let _ = writeln!(out, "api_key = \"****\"");
        }
        if let Some(ref env) = p.api_key_env {
            let _ = writeln!(out, "api_key_env = \"{env}\"");
        }
        if let Some(timeout) = p.request_timeout_secs {
            let _ = writeln!(out, "request_timeout_secs = {timeout}");
        }
    }
    out
}
