use log::debug;
use reqwest::StatusCode;

use super::{AccessDenied, MarketError};

pub fn map_any_err_and_code(e: anyhow::Error) -> (StatusCode, String) {
    debug!("Error: {:#}", e);
    let code = if let Some(rejection) = e.downcast_ref::<MarketError>() {
        rejection.status_code()
    } else if e.downcast_ref::<AccessDenied>().is_some() {
        StatusCode::UNAUTHORIZED
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (code, format!("{:#}", e))
}
pub fn map_any_err(e: anyhow::Error) -> String {
    debug!("Error: {:#}", e);
    format!("{:#}", e)
}
