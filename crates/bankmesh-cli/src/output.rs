use std::io::{self, Write};

use serde_json::Value;

use crate::error::CliError;

pub fn render(value: &Value, pretty: bool) -> Result<(), CliError> {
    let encoded = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{encoded}")?;
    stdout.flush()?;
    Ok(())
}
