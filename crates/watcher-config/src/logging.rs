//! Log output formats for the daemon.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// How `watcherd` renders its log records on stderr.
///
/// Plugins share the daemon's terminal, so the format only governs the
/// daemon's own records.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum LogFormat {
    /// One JSON object per record with event fields flattened.
    #[default]
    Json,
    /// One human-readable line per record.
    Compact,
}

impl LogFormat {
    /// Whether records should carry ANSI colour codes.
    ///
    /// JSON output is never coloured; compact output is coloured only when
    /// written to a terminal.
    #[must_use]
    pub const fn uses_ansi(self, writing_to_terminal: bool) -> bool {
        match self {
            Self::Json => false,
            Self::Compact => writing_to_terminal,
        }
    }
}

/// Error returned when text names no [`LogFormat`].
pub type LogFormatParseError = strum::ParseError;
