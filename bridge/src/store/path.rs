//! Store paths

use std::fmt;
use std::str::FromStr;

use crate::error::{BridgeError, BridgeResult};

/// Separator between path segments
pub const PATH_DELIMITER: char = '.';

/// A validated, delimited segment sequence addressing a store location
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StorePath {
    raw: String,
    segments: Vec<String>,
}

impl StorePath {
    /// Parse `path`, rejecting empty paths and empty segments
    pub fn parse(path: &str) -> BridgeResult<Self> {
        if path.is_empty() {
            return Err(BridgeError::invalid_path(path, "path is empty"));
        }
        let segments: Vec<String> = path.split(PATH_DELIMITER).map(str::to_string).collect();
        if let Some(pos) = segments.iter().position(|s| s.is_empty()) {
            return Err(BridgeError::invalid_path(path, format!("segment {} is empty", pos)));
        }
        if let Some(seg) = segments.iter().find(|s| s.trim() != s.as_str()) {
            return Err(BridgeError::invalid_path(
                path,
                format!("segment '{}' has surrounding whitespace", seg),
            ));
        }
        Ok(Self {
            raw: path.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Final segment
    pub fn leaf(&self) -> &str {
        // parse guarantees at least one segment
        self.segments.last().map(String::as_str).unwrap_or_default()
    }

    /// Segments above the leaf
    pub fn parent_segments(&self) -> &[String] {
        &self.segments[..self.segments.len() - 1]
    }

    /// Joined prefixes from the top: `a`, `a.b`, `a.b.c`
    pub fn ancestors_and_self(&self) -> impl Iterator<Item = &str> + '_ {
        let raw = self.raw.as_str();
        raw.match_indices(PATH_DELIMITER)
            .map(move |(i, _)| &raw[..i])
            .chain(std::iter::once(raw))
    }
}

impl fmt::Display for StorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for StorePath {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
