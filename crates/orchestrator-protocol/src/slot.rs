use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginSlot {
    Runtime,
    Agent,
    Workspace,
    Tracker,
    Scm,
    Notifier,
}

pub const ALL_PLUGIN_SLOTS: [PluginSlot; 6] = [
    PluginSlot::Runtime,
    PluginSlot::Agent,
    PluginSlot::Workspace,
    PluginSlot::Tracker,
    PluginSlot::Scm,
    PluginSlot::Notifier,
];

impl PluginSlot {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Runtime => "runtime",
            Self::Agent => "agent",
            Self::Workspace => "workspace",
            Self::Tracker => "tracker",
            Self::Scm => "scm",
            Self::Notifier => "notifier",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        ALL_PLUGIN_SLOTS
            .iter()
            .copied()
            .find(|slot| slot.as_str() == value)
    }
}

impl fmt::Display for PluginSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Namespaced `<slot>.<name>` key addressing one registered plugin.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PluginKey {
    pub slot: PluginSlot,
    pub name: String,
}

impl PluginKey {
    pub fn new(slot: PluginSlot, name: impl Into<String>) -> Self {
        Self {
            slot,
            name: name.into(),
        }
    }

    pub fn as_key(&self) -> String {
        format!("{}.{}", self.slot.as_str(), self.name)
    }

    pub fn from_key(value: &str) -> Option<Self> {
        let (slot, name) = value.trim().split_once('.')?;
        let slot = PluginSlot::from_name(slot)?;
        if !is_valid_plugin_name(name) {
            return None;
        }
        Some(Self::new(slot, name))
    }
}

impl fmt::Display for PluginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.slot.as_str(), self.name)
    }
}

pub fn is_valid_plugin_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '_' || ch == '-')
}
