use std::{
    fmt::{Display, Formatter},
    str::FromStr,
};

use anyhow::bail;

use super::*;

impl Display for MarketState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Open => "Open".into(),
            Self::Ended => "Ended".into(),
            Self::Resolved(outcome) => format!("Resolved({})", if *outcome { "YES" } else { "NO" }),
        };
        write!(f, "{}", output)
    }
}
impl MarketEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MarketCreated { .. } => "MarketCreated",
            Self::BetPlaced { .. } => "BetPlaced",
            Self::MarketResolved { .. } => "MarketResolved",
            Self::WinningsClaimed { .. } => "WinningsClaimed",
        }
    }
    pub fn market(&self) -> RowId {
        match self {
            Self::MarketCreated { market, .. }
            | Self::BetPlaced { market, .. }
            | Self::MarketResolved { market, .. }
            | Self::WinningsClaimed { market, .. } => *market,
        }
    }
    pub fn user(&self) -> Option<&UserPubKey> {
        match self {
            Self::MarketCreated { creator, .. } => Some(creator),
            Self::BetPlaced { bettor, .. } => Some(bettor),
            Self::MarketResolved { .. } => None,
            Self::WinningsClaimed { winner, .. } => Some(winner),
        }
    }
}
impl Display for UserRole {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::User => "User",
            Self::Admin => "Admin",
            Self::Root => "Root",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for UserRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "User" => Ok(Self::User),
            "Admin" => Ok(Self::Admin),
            "Root" => Ok(Self::Root),
            e => bail!("Couldn't deserialize to UserRole: {}", e),
        }
    }
}
impl Display for FundingMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let output = match self {
            Self::Allowance => "allowance",
            Self::Attached => "attached",
        };
        write!(f, "{}", output)
    }
}
impl FromStr for FundingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "allowance" => Ok(Self::Allowance),
            "attached" => Ok(Self::Attached),
            e => bail!("Unknown funding mode: {}", e),
        }
    }
}
