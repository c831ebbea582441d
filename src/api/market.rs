use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub type Amount = u64;
pub type UserPubKey = secp256k1::PublicKey;
pub type RowId = i64;

/// Largest amount a pool, stake or balance may hold. SQLite stores integers as i64.
pub const MAX_AMOUNT: Amount = i64::MAX as Amount;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Market {
    pub id: RowId,
    pub question: String,
    pub creator: UserPubKey,
    pub created_at: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub resolved: bool,
    /// Only set once the market is resolved
    pub outcome: Option<bool>,
    pub yes_votes: Amount,
    pub no_votes: Amount,
    pub total_staked: Amount,
}
impl Market {
    pub fn state(&self, now: DateTime<Utc>) -> MarketState {
        match (self.resolved, self.outcome) {
            (true, Some(outcome)) => MarketState::Resolved(outcome),
            _ if now >= self.end_time => MarketState::Ended,
            _ => MarketState::Open,
        }
    }
    /// Returns (winning pool, losing pool) for the given outcome
    pub fn pools(&self, outcome: bool) -> (Amount, Amount) {
        if outcome {
            (self.yes_votes, self.no_votes)
        } else {
            (self.no_votes, self.yes_votes)
        }
    }
}
#[derive(PartialEq, Eq, Debug, Clone, Copy, Serialize, Deserialize)]
pub enum MarketState {
    Open,
    Ended,
    Resolved(bool),
}
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserBet {
    pub market: RowId,
    pub user: UserPubKey,
    pub yes_bet: Amount,
    pub no_bet: Amount,
    pub claimed: bool,
    pub payout: Option<Amount>,
}
impl UserBet {
    pub fn empty(market: RowId, user: UserPubKey) -> Self {
        Self {
            market,
            user,
            yes_bet: 0,
            no_bet: 0,
            claimed: false,
            payout: None,
        }
    }
    pub fn stake(&self, side: bool) -> Amount {
        if side {
            self.yes_bet
        } else {
            self.no_bet
        }
    }
}
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum MarketEvent {
    MarketCreated {
        market: RowId,
        question: String,
        end_time: DateTime<Utc>,
        creator: UserPubKey,
    },
    BetPlaced {
        market: RowId,
        bettor: UserPubKey,
        side: bool,
        amount: Amount,
    },
    MarketResolved {
        market: RowId,
        outcome: bool,
    },
    WinningsClaimed {
        market: RowId,
        winner: UserPubKey,
        amount: Amount,
    },
}
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventRecord {
    pub id: RowId,
    pub timestamp: DateTime<Utc>,
    pub event: MarketEvent,
}
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeaderboardEntry {
    pub user: UserPubKey,
    pub total_won: Amount,
    pub markets_won: u32,
    pub claim_count: u32,
}
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DailyVolume {
    pub date: NaiveDate,
    pub yes: Amount,
    pub no: Amount,
}
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolutionPoint {
    pub date: NaiveDate,
    pub yes_wins: u32,
    pub no_wins: u32,
}
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserRole {
    #[default]
    User,
    Admin,
    Root,
}
/// How stakes reach the escrow
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FundingMode {
    /// Pulled from the bettor's token balance against a prior approval
    #[default]
    Allowance,
    /// Attached to the bet request as a value that has to match the amount
    Attached,
}
