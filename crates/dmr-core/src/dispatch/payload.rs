use std::{
    fs,
    path::{Path, PathBuf},
};

use crate::{errors::Error, Result};

/// How a payload file or text is split into messages.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PayloadMode {
    /// Every non-blank line is its own message.
    Lines,
    /// The whole text is one message.
    #[default]
    Single,
}

impl std::str::FromStr for PayloadMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1" | "line" | "lines" => Ok(Self::Lines),
            "2" | "single" | "whole" | "all" => Ok(Self::Single),
            other => Err(Error::Validation(format!("unknown payload mode: {other}"))),
        }
    }
}

/// Message content, resolved once before the send loop starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Single(String),
    Lines(Vec<String>),
}

impl Payload {
    /// Split `text` per `mode`. Surrounding whitespace is trimmed; in line mode
    /// blank lines are dropped.
    pub fn from_text(text: &str, mode: PayloadMode) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Validation("message payload is empty".to_string()));
        }
        Ok(match mode {
            PayloadMode::Single => Payload::Single(text.to_string()),
            PayloadMode::Lines => Payload::Lines(
                text.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
        })
    }

    pub fn from_file(path: &Path, mode: PayloadMode) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::InvalidPath {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_text(&text, mode).map_err(|_| Error::Validation(format!(
            "payload file {} is empty",
            path.display()
        )))
    }

    /// Operator input: an existing file path is read, anything else is literal text.
    pub fn from_input(input: &str, mode: PayloadMode) -> Result<Self> {
        let candidate = PathBuf::from(input.trim());
        if !input.trim().is_empty() && candidate.is_file() {
            Self::from_file(&candidate, mode)
        } else {
            Self::from_text(input, mode)
        }
    }

    /// Messages sent to each destination per round, in order.
    pub fn messages(&self) -> &[String] {
        match self {
            Payload::Single(t) => std::slice::from_ref(t),
            Payload::Lines(ls) => ls,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.messages().iter().all(|m| m.trim().is_empty())
    }
}
