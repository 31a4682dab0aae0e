//! Discovery modes controlling what happens to a plugin after `Init`.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Selects whether discovered plugins stay resident after initialisation.
///
/// In [`DiscoveryMode::Catalog`] each plugin is launched, initialised and
/// released straight away so only its metadata remains. In
/// [`DiscoveryMode::Active`] the plugin keeps its process and control
/// channel and is entered into service.
#[derive(
    Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum DiscoveryMode {
    /// Launch, initialise, then release the plugin, keeping metadata only.
    Catalog,
    /// Keep the plugin running with its control channel open.
    #[default]
    Active,
}

impl DiscoveryMode {
    /// Returns `true` when plugins are kept running after discovery.
    #[must_use]
    pub const fn keeps_plugins_running(self) -> bool {
        matches!(self, Self::Active)
    }
}

/// Errors encountered while parsing a [`DiscoveryMode`] from text.
pub type DiscoveryModeParseError = strum::ParseError;
