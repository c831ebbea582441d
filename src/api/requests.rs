use secp256k1::ecdsa::Signature;
use serde::{Deserialize, Serialize};

use super::*;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AccessRequest {
    pub user: UserPubKey,
    pub challenge: String,
    pub sig: Signature,
}
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PostRequest<T> {
    pub access: AccessRequest,
    pub data: T,
}
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoginRequest {
    pub user: UserPubKey,
    pub challenge: String,
    pub sig: Signature,
}
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct UpdateUserRequest {
    pub user: UserPubKey,
    pub username: Option<String>,
}
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CreateMarketRequest {
    pub question: String,
    pub duration_days: u32,
    pub creator: UserPubKey,
}
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PlaceBetRequest {
    pub market: RowId,
    pub user: UserPubKey,
    /// true bets on YES
    pub side: bool,
    pub amount: Amount,
    /// Value attached to the bet, only used when stakes are attached
    #[serde(default)]
    pub value: Option<Amount>,
}
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ResolveMarketRequest {
    pub market: RowId,
    pub user: UserPubKey,
    pub outcome: bool,
}
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ClaimWinningsRequest {
    pub market: RowId,
    pub user: UserPubKey,
}
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct MarketRequest {
    pub market: RowId,
}
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct UserBetRequest {
    pub market: RowId,
    pub user: UserPubKey,
}
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EventsRequest {
    pub market: Option<RowId>,
}
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LeaderboardRequest {
    pub limit: Option<u32>,
}
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HistoryRequest {
    pub days: Option<u32>,
}
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TokenRequest {
    pub user: UserPubKey,
    pub amount: Amount,
}
