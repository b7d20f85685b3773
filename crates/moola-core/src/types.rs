use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// External chat identity of a member.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MemberId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Role identifier on the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(pub String);

impl RoleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for RoleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoleId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// One of the two competing teams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    Bullas,
    Beras,
}

impl Team {
    pub const ALL: [Team; 2] = [Team::Bullas, Team::Beras];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bullas => "bullas",
            Self::Beras => "beras",
        }
    }

    pub fn glyph(&self) -> &'static str {
        match self {
            Self::Bullas => "🐂",
            Self::Beras => "🐻",
        }
    }

    pub fn opposite(&self) -> Team {
        match self {
            Self::Bullas => Self::Beras,
            Self::Beras => Self::Bullas,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Team {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "bullas" => Ok(Self::Bullas),
            "beras" => Ok(Self::Beras),
            other => Err(format!(
                "unknown team '{other}'; expected one of: bullas, beras"
            )),
        }
    }
}

/// Glyph rendered next to a member without a team.
pub const NO_TEAM_GLYPH: &str = "·";

pub fn team_glyph(team: Option<Team>) -> &'static str {
    team.map(|team| team.glyph()).unwrap_or(NO_TEAM_GLYPH)
}

/// Authoritative member record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub external_id: MemberId,
    pub address: Option<String>,
    pub points: u64,
    pub team: Option<Team>,
}

impl Member {
    pub fn new(external_id: impl Into<MemberId>) -> Self {
        Self {
            external_id: external_id.into(),
            address: None,
            points: 0,
            team: None,
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_points(mut self, points: u64) -> Self {
        self.points = points;
        self
    }

    pub fn with_team(mut self, team: Team) -> Self {
        self.team = Some(team);
        self
    }

    pub fn is_linked(&self) -> bool {
        self.address.is_some()
    }
}

impl From<String> for MemberId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One-time token handed to the web claim flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkToken {
    pub token: String,
    pub external_id: MemberId,
    pub consumed: bool,
    pub issued_at: DateTime<Utc>,
}

/// Result of a committed transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub from: MemberId,
    pub to: MemberId,
    pub amount: u64,
    pub from_balance: u64,
    pub to_balance: u64,
}

/// Result of a committed fine or credit on a single member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceReceipt {
    pub member: MemberId,
    pub amount: u64,
    pub new_balance: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn team_parses_case_insensitively() {
        assert_eq!("Bullas".parse::<Team>().unwrap(), Team::Bullas);
        assert_eq!("beras".parse::<Team>().unwrap(), Team::Beras);
        assert!("wolves".parse::<Team>().is_err());
        assert_eq!(Team::Bullas.opposite(), Team::Beras);
    }

    #[test]
    fn team_serializes_as_snake_case() {
        let value = serde_json::to_value(Team::Beras).unwrap();
        assert_eq!(value, serde_json::json!("beras"));
        assert_eq!(team_glyph(None), NO_TEAM_GLYPH);
        assert_eq!(team_glyph(Some(Team::Bullas)), "🐂");
    }
}
