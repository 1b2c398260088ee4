use serde::{Deserialize, Serialize};
use std::fmt;

/// External services that emit trigger events or host reactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Github,
    Slack,
    Discord,
    Google,
    Notion,
    Spotify,
    /// Internal scheduler ticks
    Timer,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Github => "github",
            Self::Slack => "slack",
            Self::Discord => "discord",
            Self::Google => "google",
            Self::Notion => "notion",
            Self::Spotify => "spotify",
            Self::Timer => "timer",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "github" => Ok(Self::Github),
            "slack" => Ok(Self::Slack),
            "discord" => Ok(Self::Discord),
            "google" => Ok(Self::Google),
            "notion" => Ok(Self::Notion),
            "spotify" => Ok(Self::Spotify),
            "timer" => Ok(Self::Timer),
            _ => Err(format!("Unknown provider: {s}")),
        }
    }
}
