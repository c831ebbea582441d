use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use super::*;

#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct MarketResponse {
    pub market: Market,
    pub state: MarketState,
    pub yes_percentage: Decimal,
    pub no_percentage: Decimal,
}
impl MarketResponse {
    pub fn new(market: Market, state: MarketState) -> Self {
        let yes_percentage = if market.total_staked > 0 {
            (Decimal::from(market.yes_votes) * dec!(100) / Decimal::from(market.total_staked))
                .round_dp(2)
        } else {
            dec!(50)
        };
        Self {
            market,
            state,
            yes_percentage,
            no_percentage: dec!(100) - yes_percentage,
        }
    }
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct UserResponse {
    pub user: UserPubKey,
    pub username: Option<String>,
    pub role: UserRole,
}
#[derive(PartialEq, Debug, Serialize, Deserialize, Clone)]
pub struct BalanceResponse {
    pub user: UserPubKey,
    pub balance: Amount,
    pub allowance: Amount,
}
