use concierge_core::ErrorClass;

use super::{load_config, CliError, CommandResult};
use crate::GlobalOptions;

const COMMAND: &str = "config";

/// Prints the effective configuration (env > file > default) with every
/// secret replaced by a marker.
pub fn run(global: &GlobalOptions) -> CommandResult {
    match render(global) {
        Ok(body) => CommandResult::success_with_body(COMMAND, &body, "effective configuration"),
        Err(error) => error.into_result(COMMAND),
    }
}

fn render(global: &GlobalOptions) -> Result<String, CliError> {
    let config = load_config(global)?;
    serde_json::to_string_pretty(&config.redacted()).map_err(|error| {
        CliError::new(ErrorClass::Internal, format!("could not render configuration: {error}"))
    })
}
