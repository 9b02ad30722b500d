//! configure_logging tool
//!
//! Updates levels on the live logger and persists them to the user env file.

use serde::Deserialize;
use serde_json::Value;

use durandal_core::Result;

use super::parse_args;
use crate::server::McpServer;

pub fn schema() -> Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "console_level": {
                "type": "string",
                "enum": ["error", "warn", "info", "debug"],
                "description": "New console (stderr) log level"
            },
            "file_level": {
                "type": "string",
                "enum": ["error", "warn", "info", "debug"],
                "description": "New log-file level"
            }
        }
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ConfigureArgs {
    console_level: Option<String>,
    file_level: Option<String>,
}

pub async fn execute(server: &McpServer, args: Option<Value>) -> Result<String> {
    let args: ConfigureArgs = parse_args(args)?;

    let (console, file) = server
        .logging
        .set_levels(args.console_level.as_deref(), args.file_level.as_deref())?;

    Ok(format!(
        "🔧 Logging updated\nConsole level: {}\nFile level: {}\nPersisted to {}",
        console,
        file,
        server.logging.config().env_file.display()
    ))
}
