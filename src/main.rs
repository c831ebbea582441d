#![allow(unused)]
use crate::api::*;
use crate::db::SQLite;
use crate::predicta::Predicta;
use crate::settings::{Args, Settings};
use crate::token::TestToken;
use anyhow::{Context, Result};
use axum::extract::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use axum_macros::debug_handler;
use clap::Parser;
use env_logger::{Builder, WriteStyle};
use log::{debug, error, info, trace, LevelFilter};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

mod api;
mod client;
mod db;
mod predicta;
mod settings;
mod token;

#[debug_handler]
async fn create_market(
    State(state): State<Arc<RwLock<Predicta>>>,
    Json(request): Json<PostRequest<CreateMarketRequest>>,
) -> Result<(StatusCode, Json<RowId>), (StatusCode, String)> {
    let mut backend = state.write().await;
    let (request, access) = (request.data, request.access);
    let id = backend
        .create_market(
            request.question.clone(),
            request.duration_days,
            &request.creator,
            access,
        )
        .await
        .map_err(map_any_err_and_code)?;
    debug!("Created market {}: {}", id, request.question);
    Ok((StatusCode::CREATED, id.into()))
}
#[debug_handler]
async fn place_bet(
    State(state): State<Arc<RwLock<Predicta>>>,
    Json(request): Json<PostRequest<PlaceBetRequest>>,
) -> Result<StatusCode, (StatusCode, String)> {
    let mut backend = state.write().await;
    let (request, access) = (request.data, request.access);
    backend
        .place_bet(
            request.market,
            &request.user,
            request.side,
            request.amount,
            request.value,
            access,
        )
        .await
        .map_err(map_any_err_and_code)?;
    debug!(
        "User {} bet {} on {} in market {}",
        request.user,
        request.amount,
        if request.side { "YES" } else { "NO" },
        request.market
    );
    Ok(StatusCode::CREATED)
}
async fn resolve_market(
    State(state): State<Arc<RwLock<Predicta>>>,
    Json(request): Json<PostRequest<ResolveMarketRequest>>,
) -> Result<(), (StatusCode, String)> {
    let mut backend = state.write().await;
    let (request, access) = (request.data, request.access);
    backend
        .resolve_market(request.market, &request.user, request.outcome, access)
        .await
        .map_err(map_any_err_and_code)?;
    debug!(
        "Resolved market {} to {}",
        request.market,
        if request.outcome { "YES" } else { "NO" }
    );
    Ok(())
}
async fn claim_winnings(
    State(state): State<Arc<RwLock<Predicta>>>,
    Json(request): Json<PostRequest<ClaimWinningsRequest>>,
) -> Result<Json<Amount>, (StatusCode, String)> {
    let mut backend = state.write().await;
    let (request, access) = (request.data, request.access);
    let payout = backend
        .claim_winnings(request.market, &request.user, access)
        .await
        .map_err(map_any_err_and_code)?;
    debug!(
        "Paid out {} to user {} on market {}",
        payout, request.user, request.market
    );
    Ok(Json(payout))
}
async fn get_market(
    State(state): State<Arc<RwLock<Predicta>>>,
    Json(request): Json<MarketRequest>,
) -> Result<Json<MarketResponse>, (StatusCode, String)> {
    let backend = state.read().await;
    let market = backend
        .get_market(request.market)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(market))
}
async fn get_markets(
    State(state): State<Arc<RwLock<Predicta>>>,
) -> Result<Json<Vec<MarketResponse>>, (StatusCode, String)> {
    let backend = state.read().await;
    let markets = backend.get_markets().await.map_err(map_any_err_and_code)?;
    Ok(Json(markets))
}
async fn market_count(State(state): State<Arc<RwLock<Predicta>>>) -> Result<Json<u64>, (StatusCode, String)> {
    let backend = state.read().await;
    let count = backend.market_count().await.map_err(map_any_err_and_code)?;
    Ok(Json(count))
}
async fn get_user_bet(
    State(state): State<Arc<RwLock<Predicta>>>,
    Json(request): Json<UserBetRequest>,
) -> Result<Json<UserBet>, (StatusCode, String)> {
    let backend = state.read().await;
    let bet = backend
        .get_user_bet(request.market, &request.user)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(bet))
}
async fn get_user_bets(
    State(state): State<Arc<RwLock<Predicta>>>,
    Json(request): Json<PostRequest<UserPubKey>>,
) -> Result<Json<Vec<UserBet>>, (StatusCode, String)> {
    let backend = state.read().await;
    let bets = backend
        .get_user_bets(&request.data, request.access)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(bets))
}
async fn get_claimable(
    State(state): State<Arc<RwLock<Predicta>>>,
    Json(request): Json<UserBetRequest>,
) -> Result<Json<Amount>, (StatusCode, String)> {
    let backend = state.read().await;
    let claimable = backend
        .get_claimable(request.market, &request.user)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(claimable))
}
async fn get_events(
    State(state): State<Arc<RwLock<Predicta>>>,
    Json(request): Json<EventsRequest>,
) -> Result<Json<Vec<EventRecord>>, (StatusCode, String)> {
    let backend = state.read().await;
    let events = backend
        .get_events(request.market)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(events))
}
async fn leaderboard(
    State(state): State<Arc<RwLock<Predicta>>>,
    Json(request): Json<LeaderboardRequest>,
) -> Result<Json<Vec<LeaderboardEntry>>, (StatusCode, String)> {
    let backend = state.read().await;
    let leaderboard = backend
        .leaderboard(request.limit)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(leaderboard))
}
async fn daily_volumes(
    State(state): State<Arc<RwLock<Predicta>>>,
    Json(request): Json<HistoryRequest>,
) -> Result<Json<Vec<DailyVolume>>, (StatusCode, String)> {
    let backend = state.read().await;
    let volumes = backend
        .daily_volumes(request.days)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(volumes))
}
async fn resolution_history(
    State(state): State<Arc<RwLock<Predicta>>>,
    Json(request): Json<HistoryRequest>,
) -> Result<Json<Vec<ResolutionPoint>>, (StatusCode, String)> {
    let backend = state.read().await;
    let history = backend
        .resolution_history(request.days)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(history))
}
async fn force_market_end(
    State(state): State<Arc<RwLock<Predicta>>>,
    Json(request): Json<PostRequest<RowId>>,
) -> Result<(), (StatusCode, String)> {
    let backend = state.write().await;
    debug!("Forcing the end of market {}", request.data);
    backend
        .force_market_end(request.data, request.access)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(())
}
async fn approve(
    State(state): State<Arc<RwLock<Predicta>>>,
    Json(request): Json<PostRequest<TokenRequest>>,
) -> Result<(), (StatusCode, String)> {
    let backend = state.write().await;
    let (request, access) = (request.data, request.access);
    backend
        .approve(&request.user, request.amount, access)
        .await
        .map_err(map_any_err_and_code)?;
    debug!("User {} approved {}", request.user, request.amount);
    Ok(())
}
async fn mint(
    State(state): State<Arc<RwLock<Predicta>>>,
    Json(request): Json<PostRequest<TokenRequest>>,
) -> Result<(), (StatusCode, String)> {
    let backend = state.write().await;
    let (request, access) = (request.data, request.access);
    backend
        .mint(&request.user, request.amount, access)
        .await
        .map_err(map_any_err_and_code)?;
    debug!("Minted {} for user {}", request.amount, request.user);
    Ok(())
}
async fn balance(
    State(state): State<Arc<RwLock<Predicta>>>,
    Json(user): Json<UserPubKey>,
) -> Result<Json<BalanceResponse>, (StatusCode, String)> {
    let backend = state.read().await;
    let balance = backend
        .get_balance(&user)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(balance))
}
async fn get_login_challenge(
    State(state): State<Arc<RwLock<Predicta>>>,
    Json(user): Json<UserPubKey>,
) -> Result<String, (StatusCode, String)> {
    let mut backend = state.write().await;
    trace!("Getting login challenge for {}", user);
    let challenge = backend
        .create_login_challenge(user)
        .await
        .map_err(map_any_err_and_code)?;
    trace!("Login challenge for user {}: {}", user, challenge);
    Ok(challenge)
}
async fn try_login(
    State(state): State<Arc<RwLock<Predicta>>>,
    Json(request): Json<LoginRequest>,
) -> Result<(), (StatusCode, String)> {
    let mut backend = state.write().await;
    backend
        .try_login(request.user, request.sig, request.challenge)
        .await
        .map_err(map_any_err_and_code)?;
    debug!("User {} successfully logged in", request.user);
    Ok(())
}
async fn check_login(
    State(state): State<Arc<RwLock<Predicta>>>,
    Json(request): Json<AccessRequest>,
) -> Result<(), (StatusCode, String)> {
    let backend = state.read().await;
    backend
        .check_access(request)
        .await
        .map_err(|e| (StatusCode::UNAUTHORIZED, map_any_err(e)))?;
    Ok(())
}
async fn update_user(
    State(state): State<Arc<RwLock<Predicta>>>,
    Json(request): Json<PostRequest<UpdateUserRequest>>,
) -> Result<(), (StatusCode, String)> {
    let backend = state.write().await;
    backend
        .update_user(request.data.user, request.data.username, request.access)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(())
}
async fn get_username(
    State(state): State<Arc<RwLock<Predicta>>>,
    Json(request): Json<UserPubKey>,
) -> Result<String, (StatusCode, String)> {
    let backend = state.read().await;
    let username = backend
        .get_username(request)
        .await
        .map_err(map_any_err_and_code)?;
    if let Some(username) = username {
        Ok(username)
    } else {
        Err((
            StatusCode::NOT_FOUND,
            "No username set for user".to_string(),
        ))
    }
}
async fn get_user(
    State(state): State<Arc<RwLock<Predicta>>>,
    Json(request): Json<PostRequest<UserPubKey>>,
) -> Result<Json<UserResponse>, (StatusCode, String)> {
    let backend = state.read().await;
    let user = backend
        .get_user(request.data, request.access)
        .await
        .map_err(map_any_err_and_code)?;
    Ok(Json(user))
}

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new(&Args::parse())?;
    Builder::default()
        .filter_level(LevelFilter::from_str(&settings.log_level).unwrap_or(LevelFilter::Debug))
        .write_style(WriteStyle::Always)
        .init();
    let (_port, handle) = run_server(settings).await?;
    handle.await?;
    Ok(())
}
async fn run_server(settings: Settings) -> Result<(u16, JoinHandle<()>)> {
    let backend = Predicta::new(
        Box::new(SQLite::new(settings.db.clone()).await?),
        Box::new(TestToken::default()),
        settings.funding,
        settings.admin.clone(),
        settings.test,
    )
    .await?;
    let state = Arc::new(RwLock::new(backend));
    let app = Router::new()
        .route("/create_market", post(create_market))
        .route("/place_bet", post(place_bet))
        .route("/resolve_market", post(resolve_market))
        .route("/claim_winnings", post(claim_winnings))
        .route("/get_market", post(get_market))
        .route("/get_markets", get(get_markets))
        .route("/market_count", get(market_count))
        .route("/get_user_bet", post(get_user_bet))
        .route("/get_user_bets", post(get_user_bets))
        .route("/get_claimable", post(get_claimable))
        .route("/get_events", post(get_events))
        .route("/leaderboard", post(leaderboard))
        .route("/daily_volumes", post(daily_volumes))
        .route("/resolution_history", post(resolution_history))
        .route("/force_market_end", post(force_market_end))
        .route("/approve", post(approve))
        .route("/mint", post(mint))
        .route("/balance", post(balance))
        .route("/get_login_challenge", post(get_login_challenge))
        .route("/try_login", post(try_login))
        .route("/check_login", post(check_login))
        .route("/update_user", post(update_user))
        .route("/get_username", post(get_username))
        .route("/get_user", post(get_user))
        .with_state(state);
    let addr: SocketAddr = format!("127.0.0.1:{}", settings.port)
        .parse()
        .context("invalid listen address")?;
    let server = axum::Server::try_bind(&addr)
        .with_context(|| format!("couldn't bind {}", addr))?
        .serve(app.into_make_service());
    let port = server.local_addr().port();
    info!(
        "Listening on {} with {} funding{}",
        server.local_addr(),
        settings.funding,
        if settings.test { " in test mode" } else { "" }
    );
    let handle = tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Server stopped: {}", e);
        }
    });
    Ok((port, handle))
}
