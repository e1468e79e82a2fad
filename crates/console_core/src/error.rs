use thiserror::Error;

/// Error taxonomy for the console. Script errors are recoverable (the engine
/// keeps running the last good script state); config, GPU and exhaustion
/// errors are fatal at startup.
#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("script error in {script}:{line}: {message}")]
    Script {
        script: String,
        line: u32,
        source_line: String,
        message: String,
    },

    #[error("invalid game configuration: {0}")]
    Config(String),

    #[error("resource '{name}' failed to load: {reason}")]
    Resource { name: String, reason: String },

    #[error("GPU initialization failed: {0}")]
    Gpu(String),

    #[error("texture unit overflow: all {max} units are in use")]
    TextureUnitOverflow { max: usize },
}

impl ConsoleError {
    /// Parse an mlua-style "[string \"name\"]:12: message" prefix out of a
    /// script runtime error so popups can show file and line.
    pub fn from_script_failure(script: &str, source: &str, message: &str) -> Self {
        let mut line = 0u32;
        // Errors are formatted as `name:line: message`; take the first number
        // between colons after the script name.
        if let Some(pos) = message.find(script) {
            let rest = &message[pos + script.len()..];
            let digits: String = rest
                .chars()
                .skip_while(|c| !c.is_ascii_digit())
                .take_while(|c| c.is_ascii_digit())
                .collect();
            line = digits.parse().unwrap_or(0);
        }
        let source_line = source
            .lines()
            .nth(line.saturating_sub(1) as usize)
            .unwrap_or("")
            .trim()
            .to_string();
        ConsoleError::Script {
            script: script.to_string(),
            line,
            source_line,
            message: message.to_string(),
        }
    }
}
