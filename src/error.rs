use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BloomError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Log parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, BloomError>;

/// Coarse failure classes used to decide whether reconfiguring can help.
///
/// Classification works on the error text, matching the phrases that step
/// implementations and the validator emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Unsupported platform or OS version.
    Os,
    /// Memory, CPU or disk below the minimum.
    System,
    /// Malformed or missing configuration values.
    Config,
    #[default]
    General,
}

impl ErrorCategory {
    pub fn classify(message: &str) -> Self {
        let message = message.to_lowercase();

        if message.contains("ubuntu") && (message.contains("version") || message.contains("requires"))
        {
            return Self::Os;
        }
        if message.contains("os-release") || message.contains("operating system") {
            return Self::Os;
        }

        if message.contains("memory") || message.contains("cpu") || message.contains("disk space")
        {
            return Self::System;
        }

        if message.contains("config") || message.contains("invalid") || message.contains("required")
        {
            return Self::Config;
        }

        Self::General
    }

    /// Only configuration problems are plausibly fixed by submitting new values.
    pub fn is_recoverable_by_reconfigure(self) -> bool {
        matches!(self, Self::Config)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Os => "os",
            Self::System => "system",
            Self::Config => "config",
            Self::General => "general",
        }
    }

    pub fn guidance(self) -> &'static str {
        match self {
            Self::Os => "This server is not supported due to OS compatibility issues. Please use a supported Ubuntu version (20.04, 22.04, or 24.04)",
            Self::System => "This server does not meet minimum system requirements. Please upgrade hardware or use a different server",
            Self::Config => "Review the configuration values and submit them again",
            Self::General => "Inspect the logs for details before reconfiguring",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
