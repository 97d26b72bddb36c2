//! Presence value types
//!
//! Online status and activities advertised by a client in Identify and
//! Presence Update frames.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Online status of the connected user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OnlineStatus {
    #[default]
    Online,
    /// Do not disturb
    Dnd,
    Idle,
    Invisible,
    Offline,
}

impl OnlineStatus {
    /// Wire name of the status
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Dnd => "dnd",
            Self::Idle => "idle",
            Self::Invisible => "invisible",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for OnlineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of activity, serialized as its numeric value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ActivityType {
    /// "Playing {name}"
    Game = 0,
    /// "Streaming {name}"
    Streaming = 1,
    /// "Listening to {name}"
    Listening = 2,
    /// "Watching {name}"
    Watching = 3,
    /// "{state}"
    Custom = 4,
    /// "Competing in {name}"
    Competing = 5,
}

impl ActivityType {
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Game),
            1 => Some(Self::Streaming),
            2 => Some(Self::Listening),
            3 => Some(Self::Watching),
            4 => Some(Self::Custom),
            5 => Some(Self::Competing),
            _ => None,
        }
    }

    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl Serialize for ActivityType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u8(self.as_u8())
    }
}

impl<'de> Deserialize<'de> for ActivityType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = u8::deserialize(deserializer)?;
        ActivityType::from_u8(value)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown activity type: {value}")))
    }
}

/// A single activity shown on the user's presence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: ActivityType,

    /// Stream URL, only meaningful for [`ActivityType::Streaming`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl Activity {
    fn new(name: impl Into<String>, kind: ActivityType) -> Self {
        Self {
            name: name.into(),
            kind,
            url: None,
            state: None,
        }
    }

    /// "Playing {name}"
    pub fn playing(name: impl Into<String>) -> Self {
        Self::new(name, ActivityType::Game)
    }

    /// "Streaming {name}"; an empty URL is omitted
    pub fn streaming(name: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        let mut activity = Self::new(name, ActivityType::Streaming);
        if !url.is_empty() {
            activity.url = Some(url);
        }
        activity
    }

    pub fn listening(name: impl Into<String>) -> Self {
        Self::new(name, ActivityType::Listening)
    }

    pub fn watching(name: impl Into<String>) -> Self {
        Self::new(name, ActivityType::Watching)
    }

    pub fn competing(name: impl Into<String>) -> Self {
        Self::new(name, ActivityType::Competing)
    }

    /// Custom status text, shown without a verb
    pub fn custom(status: impl Into<String>) -> Self {
        let mut activity = Self::new("Custom Status", ActivityType::Custom);
        activity.state = Some(status.into());
        activity
    }

    #[must_use]
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }
}
