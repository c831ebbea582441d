use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::*;

/// Reasons a market operation is rejected. Nothing changes when one is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketError {
    #[error("Question cannot be empty")]
    EmptyQuestion,
    #[error("Market {0} does not exist")]
    MarketNotFound(RowId),
    #[error("Market is already resolved")]
    AlreadyResolved,
    #[error("Market has ended")]
    MarketEnded,
    #[error("Market has not ended yet")]
    MarketNotEnded,
    #[error("Only the market creator can resolve the market")]
    NotCreator,
    #[error("Bet amount must be greater than zero")]
    InvalidAmount,
    #[error("Insufficient allowance: {available} approved but {required} required")]
    InsufficientAllowance { available: Amount, required: Amount },
    #[error("Insufficient balance: {available} available but {required} required")]
    InsufficientBalance { available: Amount, required: Amount },
    #[error("Attached value {value} does not match bet amount {amount}")]
    ValueMismatch { value: Amount, amount: Amount },
    #[error("Market is not resolved yet")]
    NotResolved,
    #[error("Nothing to claim")]
    NothingToClaim,
    #[error("Winnings already claimed")]
    AlreadyClaimed,
    #[error("Amount exceeds the supported range")]
    Overflow,
}
impl MarketError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MarketNotFound(_) => StatusCode::NOT_FOUND,
            Self::NotCreator => StatusCode::FORBIDDEN,
            Self::InsufficientAllowance { .. } | Self::InsufficientBalance { .. } => {
                StatusCode::PAYMENT_REQUIRED
            }
            Self::AlreadyResolved
            | Self::MarketEnded
            | Self::MarketNotEnded
            | Self::NotResolved
            | Self::AlreadyClaimed => StatusCode::CONFLICT,
            Self::EmptyQuestion
            | Self::InvalidAmount
            | Self::ValueMismatch { .. }
            | Self::NothingToClaim
            | Self::Overflow => StatusCode::BAD_REQUEST,
        }
    }
}

/// Raised when a request carries no valid session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Access Denied: {0}")]
pub struct AccessDenied(pub String);
