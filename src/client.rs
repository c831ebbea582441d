use anyhow::{bail, Result};
use reqwest::{Response, StatusCode};
use serde::Serialize;

use crate::api::*;

#[derive(Debug, Clone)]
pub struct Client {
    url: String,
    client: reqwest::Client,
}
impl Client {
    pub fn new(url: String) -> Self {
        let client = reqwest::Client::new();
        Self { url, client }
    }
    async fn post(
        &self,
        path: &'static str,
        request: impl Serialize,
        expected_code: StatusCode,
    ) -> Result<Response> {
        let response = self
            .client
            .post(self.url.clone() + path)
            .json(&request)
            .send()
            .await?;
        bail_if_err(response, expected_code).await
    }
    async fn get(&self, path: &'static str, expected_code: StatusCode) -> Result<Response> {
        let response = self.client.get(self.url.clone() + path).send().await?;
        bail_if_err(response, expected_code).await
    }
    pub async fn create_market(
        &self,
        request: CreateMarketRequest,
        access: AccessRequest,
    ) -> Result<RowId> {
        let response = self
            .post(
                "/create_market",
                PostRequest {
                    data: request,
                    access,
                },
                StatusCode::CREATED,
            )
            .await?;
        Ok(response.json::<RowId>().await?)
    }
    pub async fn place_bet(&self, request: PlaceBetRequest, access: AccessRequest) -> Result<()> {
        self.post(
            "/place_bet",
            PostRequest {
                data: request,
                access,
            },
            StatusCode::CREATED,
        )
        .await?;
        Ok(())
    }
    pub async fn resolve_market(
        &self,
        request: ResolveMarketRequest,
        access: AccessRequest,
    ) -> Result<()> {
        self.post(
            "/resolve_market",
            PostRequest {
                data: request,
                access,
            },
            StatusCode::OK,
        )
        .await?;
        Ok(())
    }
    pub async fn claim_winnings(
        &self,
        request: ClaimWinningsRequest,
        access: AccessRequest,
    ) -> Result<Amount> {
        let response = self
            .post(
                "/claim_winnings",
                PostRequest {
                    data: request,
                    access,
                },
                StatusCode::OK,
            )
            .await?;
        Ok(response.json::<Amount>().await?)
    }
    pub async fn get_market(&self, market: RowId) -> Result<MarketResponse> {
        let response = self
            .post("/get_market", MarketRequest { market }, StatusCode::OK)
            .await?;
        Ok(response.json().await?)
    }
    pub async fn get_markets(&self) -> Result<Vec<MarketResponse>> {
        let response = self.get("/get_markets", StatusCode::OK).await?;
        Ok(response.json().await?)
    }
    pub async fn market_count(&self) -> Result<u64> {
        let response = self.get("/market_count", StatusCode::OK).await?;
        Ok(response.json().await?)
    }
    pub async fn get_user_bet(&self, market: RowId, user: UserPubKey) -> Result<UserBet> {
        let response = self
            .post(
                "/get_user_bet",
                UserBetRequest { market, user },
                StatusCode::OK,
            )
            .await?;
        Ok(response.json().await?)
    }
    pub async fn get_user_bets(
        &self,
        user: UserPubKey,
        access: AccessRequest,
    ) -> Result<Vec<UserBet>> {
        let response = self
            .post(
                "/get_user_bets",
                PostRequest { data: user, access },
                StatusCode::OK,
            )
            .await?;
        Ok(response.json().await?)
    }
    pub async fn get_claimable(&self, market: RowId, user: UserPubKey) -> Result<Amount> {
        let response = self
            .post(
                "/get_claimable",
                UserBetRequest { market, user },
                StatusCode::OK,
            )
            .await?;
        Ok(response.json().await?)
    }
    pub async fn get_events(&self, market: Option<RowId>) -> Result<Vec<EventRecord>> {
        let response = self
            .post("/get_events", EventsRequest { market }, StatusCode::OK)
            .await?;
        Ok(response.json().await?)
    }
    pub async fn leaderboard(&self, limit: Option<u32>) -> Result<Vec<LeaderboardEntry>> {
        let response = self
            .post("/leaderboard", LeaderboardRequest { limit }, StatusCode::OK)
            .await?;
        Ok(response.json().await?)
    }
    pub async fn daily_volumes(&self, days: Option<u32>) -> Result<Vec<DailyVolume>> {
        let response = self
            .post("/daily_volumes", HistoryRequest { days }, StatusCode::OK)
            .await?;
        Ok(response.json().await?)
    }
    pub async fn resolution_history(&self, days: Option<u32>) -> Result<Vec<ResolutionPoint>> {
        let response = self
            .post("/resolution_history", HistoryRequest { days }, StatusCode::OK)
            .await?;
        Ok(response.json().await?)
    }
    pub async fn force_market_end(&self, market: RowId, access: AccessRequest) -> Result<()> {
        self.post(
            "/force_market_end",
            PostRequest {
                data: market,
                access,
            },
            StatusCode::OK,
        )
        .await?;
        Ok(())
    }
    pub async fn approve(&self, request: TokenRequest, access: AccessRequest) -> Result<()> {
        self.post(
            "/approve",
            PostRequest {
                data: request,
                access,
            },
            StatusCode::OK,
        )
        .await?;
        Ok(())
    }
    pub async fn mint(&self, request: TokenRequest, access: AccessRequest) -> Result<()> {
        self.post(
            "/mint",
            PostRequest {
                data: request,
                access,
            },
            StatusCode::OK,
        )
        .await?;
        Ok(())
    }
    pub async fn balance(&self, user: UserPubKey) -> Result<BalanceResponse> {
        let response = self.post("/balance", user, StatusCode::OK).await?;
        Ok(response.json().await?)
    }
    pub async fn get_login_challenge(&self, user: UserPubKey) -> Result<String> {
        let response = self
            .post("/get_login_challenge", user, StatusCode::OK)
            .await?;
        Ok(response.text().await?)
    }
    pub async fn try_login(&self, request: LoginRequest) -> Result<()> {
        self.post("/try_login", request, StatusCode::OK).await?;
        Ok(())
    }
    pub async fn check_login(&self, access: AccessRequest) -> Result<()> {
        self.post("/check_login", access, StatusCode::OK).await?;
        Ok(())
    }
    pub async fn update_user(
        &self,
        request: UpdateUserRequest,
        access: AccessRequest,
    ) -> Result<()> {
        self.post(
            "/update_user",
            PostRequest {
                data: request,
                access,
            },
            StatusCode::OK,
        )
        .await?;
        Ok(())
    }
    pub async fn get_username(&self, user: UserPubKey) -> Result<String> {
        let response = self.post("/get_username", user, StatusCode::OK).await?;
        Ok(response.text().await?)
    }
    pub async fn get_user(&self, user: UserPubKey, access: AccessRequest) -> Result<UserResponse> {
        let response = self
            .post(
                "/get_user",
                PostRequest { data: user, access },
                StatusCode::OK,
            )
            .await?;
        Ok(response.json().await?)
    }
}
async fn bail_if_err(response: Response, expected_code: StatusCode) -> Result<Response> {
    if response.status() != expected_code {
        bail!("{}: {}", response.status(), response.text().await?)
    }
    Ok(response)
}
