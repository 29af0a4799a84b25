use crate::error::{CliError, CliResult};
use std::io::{self, IsTerminal, Read};
use std::path::Path;

/// Read a file, or stdin when `path` is `-`.
pub fn read_input(path: &Path) -> CliResult<String> {
    if path == Path::new("-") {
        if io::stdin().is_terminal() {
            return Err(CliError::Usage(format!(
                "'-' reads the request from stdin, but nothing is piped\n  {} pass a file path instead",
                colored::Colorize::bold(colored::Colorize::cyan("help:"))
            )));
        }
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        return Ok(buf);
    }
    std::fs::read_to_string(path)
        .map_err(|e| CliError::Input(format!("failed to read {}: {e}", path.display())))
}

/// Read and parse a JSON file.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> CliResult<T> {
    let content = read_input(path)?;
    serde_json::from_str(&content)
        .map_err(|e| CliError::Input(format!("{} is not valid: {e}", path.display())))
}
