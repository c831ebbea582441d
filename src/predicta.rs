use crate::api::*;
use crate::db::{DB, SESSION_LIFETIME_DAYS};
use crate::token::Token;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, SubsecRound, Utc};
use log::{debug, error, trace};
use secp256k1::ecdsa::Signature;
use secp256k1::hashes::sha256::Hash;
use secp256k1::rand::distributions::Alphanumeric;
use secp256k1::rand::Rng;
use secp256k1::{rand, Message};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::str::FromStr;
use std::sync::Arc;

/// Number of dated entries the analytics views return by default
pub const DEFAULT_HISTORY_DAYS: u32 = 14;

#[derive(Debug)]
pub struct NewMarket {
    pub question: String,
    pub creator: UserPubKey,
    pub created_at: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}
pub struct Predicta {
    db: Arc<Box<dyn DB + Send + Sync>>,
    token: Arc<Box<dyn Token + Send + Sync>>,
    funding: FundingMode,
    test: bool,
}

impl Predicta {
    pub async fn new(
        db: Box<dyn DB + Send + Sync>,
        token: Box<dyn Token + Send + Sync>,
        funding: FundingMode,
        admins: Vec<String>,
        test: bool,
    ) -> Result<Self> {
        let me = Self {
            db: Arc::new(db),
            token: Arc::new(token),
            funding,
            test,
        };
        for admin in admins {
            let admin = UserPubKey::from_str(admin.as_str())
                .with_context(|| format!("invalid admin key {}", admin))?;
            me.db.update_user_role(admin, UserRole::Root).await?;
        }
        Ok(me)
    }
    pub async fn create_market(
        &mut self,
        question: String,
        duration_days: u32,
        creator: &UserPubKey,
        access: AccessRequest,
    ) -> Result<RowId> {
        self.check_access_for_user(*creator, access).await?;
        if question.trim().is_empty() {
            bail!(MarketError::EmptyQuestion);
        }
        // Stored with second precision
        let created_at = Utc::now().trunc_subsecs(0);
        let end_time = created_at
            .checked_add_signed(Duration::days(duration_days.into()))
            .ok_or(MarketError::Overflow)?;
        let id = self
            .db
            .add_market(NewMarket {
                question,
                creator: *creator,
                created_at,
                end_time,
            })
            .await?;
        Ok(id)
    }
    pub async fn place_bet(
        &mut self,
        market: RowId,
        user: &UserPubKey,
        side: bool,
        amount: Amount,
        value: Option<Amount>,
        access: AccessRequest,
    ) -> Result<()> {
        self.check_access_for_user(*user, access).await?;
        let state = self.db.get_market(market).await?;
        match state.state(Utc::now()) {
            MarketState::Open => {}
            MarketState::Ended => bail!(MarketError::MarketEnded),
            MarketState::Resolved(_) => bail!(MarketError::AlreadyResolved),
        }
        if amount == 0 {
            bail!(MarketError::InvalidAmount);
        }
        state
            .total_staked
            .checked_add(amount)
            .filter(|total| *total <= MAX_AMOUNT)
            .ok_or(MarketError::Overflow)?;

        let allowance = self.token.allowance(user).await?;
        match self.funding {
            FundingMode::Allowance => self.token.transfer_from(user, amount).await?,
            FundingMode::Attached => {
                let value = value.unwrap_or_default();
                if value != amount {
                    bail!(MarketError::ValueMismatch { value, amount });
                }
                self.token.deposit(user, amount).await?
            }
        }
        if let Err(e) = self
            .db
            .add_stake(market, user, side, amount, Utc::now())
            .await
        {
            error!(
                "Recording a bet of {} on market {} failed after the stake was escrowed, refunding {}: {:#}",
                amount, market, user, e
            );
            self.token
                .transfer(user, amount)
                .await
                .context("couldn't refund escrowed stake")?;
            if self.funding == FundingMode::Allowance {
                self.token.approve(user, allowance).await?;
            }
            return Err(e);
        }
        Ok(())
    }
    pub async fn resolve_market(
        &mut self,
        market: RowId,
        user: &UserPubKey,
        outcome: bool,
        access: AccessRequest,
    ) -> Result<()> {
        self.check_access_for_user(*user, access).await?;
        let state = self.db.get_market(market).await?;
        let now = Utc::now();
        if state.resolved {
            bail!(MarketError::AlreadyResolved);
        }
        if state.creator != *user {
            bail!(MarketError::NotCreator);
        }
        if now < state.end_time {
            bail!(MarketError::MarketNotEnded);
        }
        self.db.set_resolved(market, outcome, now).await
    }
    pub async fn claim_winnings(
        &mut self,
        market: RowId,
        user: &UserPubKey,
        access: AccessRequest,
    ) -> Result<Amount> {
        self.check_access_for_user(*user, access).await?;
        let state = self.db.get_market(market).await?;
        let outcome = match state.state(Utc::now()) {
            MarketState::Resolved(outcome) => outcome,
            _ => bail!(MarketError::NotResolved),
        };
        let bet = self.db.get_user_bet(market, user).await?;
        if bet.claimed {
            bail!(MarketError::AlreadyClaimed);
        }
        let stake = bet.stake(outcome);
        if stake == 0 {
            bail!(MarketError::NothingToClaim);
        }
        let (winning_pool, losing_pool) = state.pools(outcome);
        let payout = Self::calculate_payout(stake, winning_pool, losing_pool)?;

        let escrow = self.token.escrow_balance().await?;
        if escrow < payout {
            error!(
                "Escrow holds {} but the payout of {} to {} on market {} requires more",
                escrow, payout, user, market
            );
            bail!(
                "Escrow can't cover the payout of {} on market {}",
                payout,
                market
            );
        }
        self.db
            .set_claimed(market, user, payout, Utc::now())
            .await?;
        if let Err(e) = self.token.transfer(user, payout).await {
            error!(
                "Paying out {} to {} on market {} failed, reverting the claim: {:#}",
                payout, user, market, e
            );
            self.db
                .unset_claimed(market, user)
                .await
                .context("couldn't revert claim")?;
            return Err(e);
        }
        Ok(payout)
    }
    /// Principal plus the stake's proportional share of the losing pool.
    ///
    /// The share is floored so the sum of all payouts never exceeds what
    /// was staked on the market. What is left over stays in escrow.
    pub fn calculate_payout(
        stake: Amount,
        winning_pool: Amount,
        losing_pool: Amount,
    ) -> Result<Amount> {
        if winning_pool == 0 || stake > winning_pool {
            bail!(
                "Stake of {} is not covered by the winning pool of {}",
                stake,
                winning_pool
            );
        }
        let share = u128::from(stake) * u128::from(losing_pool) / u128::from(winning_pool);
        let payout = u128::from(stake) + share;
        Ok(Amount::try_from(payout)
            .ok()
            .filter(|payout| *payout <= MAX_AMOUNT)
            .ok_or(MarketError::Overflow)?)
    }
    pub async fn get_claimable(&self, market: RowId, user: &UserPubKey) -> Result<Amount> {
        let state = self.db.get_market(market).await?;
        let MarketState::Resolved(outcome) = state.state(Utc::now()) else {
            return Ok(0);
        };
        let bet = self.db.get_user_bet(market, user).await?;
        let stake = bet.stake(outcome);
        if bet.claimed || stake == 0 {
            return Ok(0);
        }
        let (winning_pool, losing_pool) = state.pools(outcome);
        Self::calculate_payout(stake, winning_pool, losing_pool)
    }
    pub async fn get_market(&self, market: RowId) -> Result<MarketResponse> {
        let market = self.db.get_market(market).await?;
        let state = market.state(Utc::now());
        Ok(MarketResponse::new(market, state))
    }
    pub async fn get_markets(&self) -> Result<Vec<MarketResponse>> {
        let now = Utc::now();
        Ok(self
            .db
            .get_markets()
            .await?
            .into_iter()
            .map(|market| {
                let state = market.state(now);
                MarketResponse::new(market, state)
            })
            .collect())
    }
    pub async fn market_count(&self) -> Result<u64> {
        self.db.get_market_count().await
    }
    pub async fn get_user_bet(&self, market: RowId, user: &UserPubKey) -> Result<UserBet> {
        // Unknown markets are an error rather than an empty bet
        self.db.get_market(market).await?;
        self.db.get_user_bet(market, user).await
    }
    pub async fn get_user_bets(
        &self,
        user: &UserPubKey,
        access: AccessRequest,
    ) -> Result<Vec<UserBet>> {
        self.check_access_for_user(*user, access).await?;
        self.db.get_user_bets(user).await
    }
    pub async fn get_events(&self, market: Option<RowId>) -> Result<Vec<EventRecord>> {
        self.db.get_events(market, None).await
    }
    pub async fn leaderboard(&self, limit: Option<u32>) -> Result<Vec<LeaderboardEntry>> {
        let mut stats: HashMap<UserPubKey, (Amount, HashSet<RowId>, u32)> = HashMap::new();
        for record in self.db.get_events(None, Some("WinningsClaimed")).await? {
            if let MarketEvent::WinningsClaimed {
                market,
                winner,
                amount,
            } = record.event
            {
                let entry = stats.entry(winner).or_default();
                entry.0 = entry.0.saturating_add(amount);
                entry.1.insert(market);
                entry.2 += 1;
            }
        }
        let mut leaderboard: Vec<LeaderboardEntry> = stats
            .into_iter()
            .map(|(user, (total_won, markets, claim_count))| LeaderboardEntry {
                user,
                total_won,
                markets_won: markets.len() as u32,
                claim_count,
            })
            .collect();
        leaderboard.sort_by(|a, b| match b.total_won.cmp(&a.total_won) {
            Ordering::Equal => b
                .markets_won
                .cmp(&a.markets_won)
                .then_with(|| a.user.serialize().cmp(&b.user.serialize())),
            ordering => ordering,
        });
        if let Some(limit) = limit {
            leaderboard.truncate(limit as usize);
        }
        Ok(leaderboard)
    }
    pub async fn daily_volumes(&self, days: Option<u32>) -> Result<Vec<DailyVolume>> {
        let mut volumes: BTreeMap<NaiveDate, DailyVolume> = BTreeMap::new();
        for record in self.db.get_events(None, Some("BetPlaced")).await? {
            if let MarketEvent::BetPlaced { side, amount, .. } = record.event {
                let date = record.timestamp.date_naive();
                let volume = volumes.entry(date).or_insert(DailyVolume {
                    date,
                    yes: 0,
                    no: 0,
                });
                if side {
                    volume.yes = volume.yes.saturating_add(amount);
                } else {
                    volume.no = volume.no.saturating_add(amount);
                }
            }
        }
        Ok(most_recent(volumes, days))
    }
    pub async fn resolution_history(&self, days: Option<u32>) -> Result<Vec<ResolutionPoint>> {
        let mut history: BTreeMap<NaiveDate, ResolutionPoint> = BTreeMap::new();
        for record in self.db.get_events(None, Some("MarketResolved")).await? {
            if let MarketEvent::MarketResolved { outcome, .. } = record.event {
                let date = record.timestamp.date_naive();
                let point = history.entry(date).or_insert(ResolutionPoint {
                    date,
                    yes_wins: 0,
                    no_wins: 0,
                });
                if outcome {
                    point.yes_wins += 1;
                } else {
                    point.no_wins += 1;
                }
            }
        }
        Ok(most_recent(history, days))
    }
    pub async fn force_market_end(&self, market: RowId, access: AccessRequest) -> Result<()> {
        if let UserRole::User = self.check_access(access).await? {
            bail!(AccessDenied("Admin only API".into()));
        }
        let state = self.db.get_market(market).await?;
        if state.resolved {
            bail!(MarketError::AlreadyResolved);
        }
        let now = Utc::now();
        if state.end_time > now {
            self.db.set_end_time(market, now).await?;
        }
        Ok(())
    }
    pub async fn approve(
        &self,
        user: &UserPubKey,
        amount: Amount,
        access: AccessRequest,
    ) -> Result<()> {
        self.check_access_for_user(*user, access).await?;
        self.token.approve(user, amount).await
    }
    pub async fn mint(&self, user: &UserPubKey, amount: Amount, access: AccessRequest) -> Result<()> {
        if let UserRole::User = self.check_access(access).await? {
            bail!(AccessDenied("Admin only API".into()));
        }
        self.token.mint(user, amount).await
    }
    pub async fn get_balance(&self, user: &UserPubKey) -> Result<BalanceResponse> {
        Ok(BalanceResponse {
            user: *user,
            balance: self.token.balance_of(user).await?,
            allowance: self.token.allowance(user).await?,
        })
    }
    pub async fn check_access(&self, access: AccessRequest) -> Result<UserRole> {
        if self.test {
            return Ok(UserRole::Root);
        }
        let (db_sig, last_access) = self
            .db
            .get_last_access(access.user, access.challenge)
            .await
            .map_err(|e| AccessDenied(format!("no session for user {}: {:#}", access.user, e)))?;
        if access.sig != db_sig {
            debug!(
                "User {} tried to access with invalid access token",
                access.user
            );
            bail!(AccessDenied(format!(
                "access token for user {} is invalid",
                access.user
            )));
        }
        if last_access < Utc::now() - Duration::days(SESSION_LIFETIME_DAYS) {
            debug!(
                "User {} tried to access after more than 7 days",
                access.user
            );
            bail!(AccessDenied("last access was more than 7 days ago".into()));
        }
        self.db.get_user_role(access.user).await
    }
    pub async fn check_access_for_user(
        &self,
        user: UserPubKey,
        access: AccessRequest,
    ) -> Result<()> {
        let caller = access.user;
        if let UserRole::User = self.check_access(access).await? {
            if user != caller {
                bail!(AccessDenied(
                    "cannot issue request on behalf of other users".into()
                ));
            }
        }
        Ok(())
    }
    pub async fn create_login_challenge(&mut self, user: UserPubKey) -> Result<String> {
        let challenge: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(30)
            .map(char::from)
            .collect();
        trace!("Generated login challenge {}", challenge);
        self.db
            .create_session(user, challenge.clone(), Utc::now())
            .await?;
        Ok(challenge)
    }
    pub async fn try_login(
        &mut self,
        user: UserPubKey,
        sig: Signature,
        challenge: String,
    ) -> Result<()> {
        sig.verify(
            &Message::from_hashed_data::<Hash>(challenge.as_bytes()),
            &user,
        )
        .map_err(|e| AccessDenied(format!("invalid signature: {}", e)))?;
        self.db
            .update_access_token(user, sig, challenge)
            .await
            .map_err(|e| AccessDenied(format!("{:#}", e)))?;
        Ok(())
    }
    pub async fn update_user(
        &self,
        user: UserPubKey,
        name: Option<String>,
        access: AccessRequest,
    ) -> Result<()> {
        self.check_access_for_user(user, access).await?;
        if let Some(name) = name {
            self.db.update_username(user, name).await?;
        }
        Ok(())
    }
    pub async fn get_username(&self, user: UserPubKey) -> Result<Option<String>> {
        self.db.get_username(user).await
    }
    pub async fn get_user(&self, user: UserPubKey, access: AccessRequest) -> Result<UserResponse> {
        self.check_access_for_user(user, access).await?;
        self.db.get_user(user).await
    }
}

fn most_recent<T>(entries: BTreeMap<NaiveDate, T>, days: Option<u32>) -> Vec<T> {
    let days = days.unwrap_or(DEFAULT_HISTORY_DAYS) as usize;
    let skip = entries.len().saturating_sub(days);
    entries.into_values().skip(skip).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::SQLite;
    use crate::token::TestToken;
    use async_trait::async_trait;
    use secp256k1::{generate_keypair, rand, SecretKey};
    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

    /// Token whose payouts fail while `fail_transfers` is set
    #[derive(Clone, Default)]
    struct UnreliableToken {
        inner: TestToken,
        fail_transfers: Arc<AtomicBool>,
    }
    #[async_trait]
    impl Token for UnreliableToken {
        async fn balance_of(&self, owner: &UserPubKey) -> Result<Amount> {
            self.inner.balance_of(owner).await
        }
        async fn allowance(&self, owner: &UserPubKey) -> Result<Amount> {
            self.inner.allowance(owner).await
        }
        async fn approve(&self, owner: &UserPubKey, amount: Amount) -> Result<()> {
            self.inner.approve(owner, amount).await
        }
        async fn mint(&self, to: &UserPubKey, amount: Amount) -> Result<()> {
            self.inner.mint(to, amount).await
        }
        async fn transfer_from(&self, from: &UserPubKey, amount: Amount) -> Result<()> {
            self.inner.transfer_from(from, amount).await
        }
        async fn deposit(&self, from: &UserPubKey, amount: Amount) -> Result<()> {
            self.inner.deposit(from, amount).await
        }
        async fn transfer(&self, to: &UserPubKey, amount: Amount) -> Result<()> {
            if self.fail_transfers.load(AtomicOrdering::SeqCst) {
                bail!("token node unreachable");
            }
            self.inner.transfer(to, amount).await
        }
        async fn escrow_balance(&self) -> Result<Amount> {
            self.inner.escrow_balance().await
        }
    }

    /// Store that refuses to record stakes
    struct StakeRejectingDB {
        inner: SQLite,
    }
    #[async_trait]
    impl DB for StakeRejectingDB {
        async fn add_market(&self, market: NewMarket) -> Result<RowId> {
            self.inner.add_market(market).await
        }
        async fn get_market(&self, market: RowId) -> Result<Market> {
            self.inner.get_market(market).await
        }
        async fn get_markets(&self) -> Result<Vec<Market>> {
            self.inner.get_markets().await
        }
        async fn get_market_count(&self) -> Result<u64> {
            self.inner.get_market_count().await
        }
        async fn add_stake(
            &self,
            _market: RowId,
            _user: &UserPubKey,
            _side: bool,
            _amount: Amount,
            _at: DateTime<Utc>,
        ) -> Result<()> {
            bail!("disk full")
        }
        async fn set_resolved(&self, market: RowId, outcome: bool, at: DateTime<Utc>) -> Result<()> {
            self.inner.set_resolved(market, outcome, at).await
        }
        async fn set_end_time(&self, market: RowId, end_time: DateTime<Utc>) -> Result<()> {
            self.inner.set_end_time(market, end_time).await
        }
        async fn get_user_bet(&self, market: RowId, user: &UserPubKey) -> Result<UserBet> {
            self.inner.get_user_bet(market, user).await
        }
        async fn get_user_bets(&self, user: &UserPubKey) -> Result<Vec<UserBet>> {
            self.inner.get_user_bets(user).await
        }
        async fn set_claimed(
            &self,
            market: RowId,
            user: &UserPubKey,
            payout: Amount,
            at: DateTime<Utc>,
        ) -> Result<()> {
            self.inner.set_claimed(market, user, payout, at).await
        }
        async fn unset_claimed(&self, market: RowId, user: &UserPubKey) -> Result<()> {
            self.inner.unset_claimed(market, user).await
        }
        async fn get_events(
            &self,
            market: Option<RowId>,
            kind: Option<&str>,
        ) -> Result<Vec<EventRecord>> {
            self.inner.get_events(market, kind).await
        }
        async fn update_user_role(&self, user: UserPubKey, role: UserRole) -> Result<()> {
            self.inner.update_user_role(user, role).await
        }
        async fn get_user_role(&self, user: UserPubKey) -> Result<UserRole> {
            self.inner.get_user_role(user).await
        }
        async fn create_session(
            &self,
            user: UserPubKey,
            challenge: String,
            at: DateTime<Utc>,
        ) -> Result<()> {
            self.inner.create_session(user, challenge, at).await
        }
        async fn update_access_token(
            &self,
            user: UserPubKey,
            sig: Signature,
            challenge: String,
        ) -> Result<()> {
            self.inner.update_access_token(user, sig, challenge).await
        }
        async fn get_last_access(
            &self,
            user: UserPubKey,
            challenge: String,
        ) -> Result<(Signature, DateTime<Utc>)> {
            self.inner.get_last_access(user, challenge).await
        }
        async fn update_username(&self, user: UserPubKey, username: String) -> Result<()> {
            self.inner.update_username(user, username).await
        }
        async fn get_username(&self, user: UserPubKey) -> Result<Option<String>> {
            self.inner.get_username(user).await
        }
        async fn get_user(&self, user: UserPubKey) -> Result<UserResponse> {
            self.inner.get_user(user).await
        }
        async fn create_user(&self, user: UserPubKey) -> Result<()> {
            self.inner.create_user(user).await
        }
    }

    fn get_test_access() -> AccessRequest {
        let (secret, user) = generate_keypair(&mut rand::thread_rng());
        sign_access(&secret, user, "test".to_string())
    }
    fn sign_access(secret: &SecretKey, user: UserPubKey, challenge: String) -> AccessRequest {
        let sig = secret.sign_ecdsa(Message::from_hashed_data::<Hash>(challenge.as_bytes()));
        AccessRequest {
            user,
            challenge,
            sig,
        }
    }
    async fn new_market(
        funding: FundingMode,
        test: bool,
    ) -> (Predicta, TestToken) {
        let token = TestToken::default();
        let market = Predicta::new(
            Box::new(SQLite::new(None).await.unwrap()),
            Box::new(token.clone()),
            funding,
            vec![],
            test,
        )
        .await
        .unwrap();
        (market, token)
    }
    async fn fund(token: &TestToken, user: &UserPubKey, amount: Amount) {
        token.mint(user, amount).await.unwrap();
        token.approve(user, amount).await.unwrap();
    }
    fn forged_sig(secret: &SecretKey) -> Signature {
        secret.sign_ecdsa(Message::from_hashed_data::<Hash>("never issued".as_bytes()))
    }
    fn rejection(e: &anyhow::Error) -> Option<&MarketError> {
        e.downcast_ref::<MarketError>()
    }

    #[test]
    fn payout_is_principal_plus_share_of_losing_pool() {
        assert_eq!(Predicta::calculate_payout(100, 300, 150).unwrap(), 150);
        assert_eq!(Predicta::calculate_payout(300, 300, 0).unwrap(), 300);
        // floor(1 * 10 / 3) = 3
        assert_eq!(Predicta::calculate_payout(1, 3, 10).unwrap(), 4);
        assert_eq!(
            Predicta::calculate_payout(MAX_AMOUNT / 2, MAX_AMOUNT / 2, MAX_AMOUNT / 2).unwrap(),
            MAX_AMOUNT - 1
        );
        Predicta::calculate_payout(1, 0, 10).unwrap_err();
        Predicta::calculate_payout(5, 4, 10).unwrap_err();
    }

    #[test]
    fn payouts_never_exceed_the_pool() {
        let stakes = [7, 11, 13];
        let winning_pool: Amount = stakes.iter().sum();
        let losing_pool = 101;
        let paid: Amount = stakes
            .iter()
            .map(|stake| Predicta::calculate_payout(*stake, winning_pool, losing_pool).unwrap())
            .sum();
        assert!(paid <= winning_pool + losing_pool);
        assert!(winning_pool + losing_pool - paid < stakes.len() as Amount);
    }

    #[tokio::test]
    async fn create_market_rejects_empty_question() {
        let (mut market, _) = new_market(FundingMode::Allowance, true).await;
        let access = get_test_access();
        let creator = access.user;
        for question in ["", "   "] {
            let err = market
                .create_market(question.to_string(), 1, &creator, access.clone())
                .await
                .unwrap_err();
            assert_eq!(rejection(&err), Some(&MarketError::EmptyQuestion));
        }
        assert_eq!(market.market_count().await.unwrap(), 0);

        let id = market
            .create_market("Will it rain?".into(), 1, &creator, access)
            .await
            .unwrap();
        assert_eq!(id, 1);
        let created = market.get_market(id).await.unwrap();
        assert_eq!(created.market.question, "Will it rain?");
        assert_eq!(created.market.creator, creator);
        assert_eq!(created.state, MarketState::Open);
        assert_eq!(
            created.market.end_time - created.market.created_at,
            Duration::days(1)
        );
        assert_eq!(created.yes_percentage, created.no_percentage);
    }

    #[tokio::test]
    async fn full_lifecycle() {
        let (mut market, token) = new_market(FundingMode::Allowance, true).await;
        let access = get_test_access();
        let (_, creator) = generate_keypair(&mut rand::thread_rng());
        let (_, u1) = generate_keypair(&mut rand::thread_rng());
        let (_, u2) = generate_keypair(&mut rand::thread_rng());
        let (_, u3) = generate_keypair(&mut rand::thread_rng());
        for user in [u1, u2, u3] {
            fund(&token, &user, 1000).await;
        }

        let id = market
            .create_market("It works".into(), 3, &creator, access.clone())
            .await
            .unwrap();
        market
            .place_bet(id, &u1, true, 100, None, access.clone())
            .await
            .unwrap();
        market
            .place_bet(id, &u2, true, 300, None, access.clone())
            .await
            .unwrap();
        market
            .place_bet(id, &u3, false, 200, None, access.clone())
            .await
            .unwrap();

        let state = market.get_market(id).await.unwrap();
        assert_eq!(state.market.yes_votes, 400);
        assert_eq!(state.market.no_votes, 200);
        assert_eq!(state.market.total_staked, 600);
        assert_eq!(state.yes_percentage.to_string(), "66.67");
        assert_eq!(token.escrow_balance().await.unwrap(), 600);

        let err = market
            .resolve_market(id, &creator, true, access.clone())
            .await
            .unwrap_err();
        assert_eq!(rejection(&err), Some(&MarketError::MarketNotEnded));
        let err = market.claim_winnings(id, &u1, access.clone()).await.unwrap_err();
        assert_eq!(rejection(&err), Some(&MarketError::NotResolved));

        market.force_market_end(id, access.clone()).await.unwrap();
        let err = market
            .place_bet(id, &u1, true, 100, None, access.clone())
            .await
            .unwrap_err();
        assert_eq!(rejection(&err), Some(&MarketError::MarketEnded));

        let err = market
            .resolve_market(id, &u1, false, access.clone())
            .await
            .unwrap_err();
        assert_eq!(rejection(&err), Some(&MarketError::NotCreator));
        market
            .resolve_market(id, &creator, true, access.clone())
            .await
            .unwrap();
        let err = market
            .resolve_market(id, &creator, false, access.clone())
            .await
            .unwrap_err();
        assert_eq!(rejection(&err), Some(&MarketError::AlreadyResolved));
        assert_eq!(
            market.get_market(id).await.unwrap().state,
            MarketState::Resolved(true)
        );

        assert_eq!(market.get_claimable(id, &u1).await.unwrap(), 150);
        assert_eq!(market.get_claimable(id, &u3).await.unwrap(), 0);
        assert_eq!(
            market.claim_winnings(id, &u1, access.clone()).await.unwrap(),
            150
        );
        assert_eq!(
            market.claim_winnings(id, &u2, access.clone()).await.unwrap(),
            450
        );
        let err = market.claim_winnings(id, &u1, access.clone()).await.unwrap_err();
        assert_eq!(rejection(&err), Some(&MarketError::AlreadyClaimed));
        let err = market.claim_winnings(id, &u3, access.clone()).await.unwrap_err();
        assert_eq!(rejection(&err), Some(&MarketError::NothingToClaim));

        assert_eq!(token.balance_of(&u1).await.unwrap(), 1050);
        assert_eq!(token.balance_of(&u2).await.unwrap(), 1150);
        assert_eq!(token.balance_of(&u3).await.unwrap(), 800);
        assert_eq!(token.escrow_balance().await.unwrap(), 0);
        assert_eq!(market.get_claimable(id, &u1).await.unwrap(), 0);

        let bet = market.get_user_bet(id, &u2).await.unwrap();
        assert!(bet.claimed);
        assert_eq!(bet.payout, Some(450));

        let kinds: Vec<&str> = market
            .get_events(Some(id))
            .await
            .unwrap()
            .iter()
            .map(|record| record.event.kind())
            .collect();
        assert_eq!(
            kinds,
            vec![
                "MarketCreated",
                "BetPlaced",
                "BetPlaced",
                "BetPlaced",
                "MarketResolved",
                "WinningsClaimed",
                "WinningsClaimed"
            ]
        );
    }

    #[tokio::test]
    async fn bets_on_both_sides() {
        let (mut market, token) = new_market(FundingMode::Allowance, true).await;
        let access = get_test_access();
        let (_, creator) = generate_keypair(&mut rand::thread_rng());
        let (_, hedger) = generate_keypair(&mut rand::thread_rng());
        let (_, other) = generate_keypair(&mut rand::thread_rng());
        fund(&token, &hedger, 100).await;
        fund(&token, &other, 100).await;

        let id = market
            .create_market("Hedge".into(), 1, &creator, access.clone())
            .await
            .unwrap();
        market
            .place_bet(id, &hedger, true, 30, None, access.clone())
            .await
            .unwrap();
        market
            .place_bet(id, &hedger, false, 20, None, access.clone())
            .await
            .unwrap();
        market
            .place_bet(id, &other, false, 60, None, access.clone())
            .await
            .unwrap();
        let bet = market.get_user_bet(id, &hedger).await.unwrap();
        assert_eq!((bet.yes_bet, bet.no_bet), (30, 20));

        market.force_market_end(id, access.clone()).await.unwrap();
        market
            .resolve_market(id, &creator, false, access.clone())
            .await
            .unwrap();
        // 20 + floor(20 * 30 / 80)
        assert_eq!(
            market.claim_winnings(id, &hedger, access.clone()).await.unwrap(),
            27
        );
        // 60 + floor(60 * 30 / 80)
        assert_eq!(
            market.claim_winnings(id, &other, access.clone()).await.unwrap(),
            82
        );
        assert_eq!(token.escrow_balance().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn place_bet_rejections() {
        let (mut market, token) = new_market(FundingMode::Allowance, true).await;
        let access = get_test_access();
        let (_, creator) = generate_keypair(&mut rand::thread_rng());
        let (_, user) = generate_keypair(&mut rand::thread_rng());
        token.mint(&user, 100).await.unwrap();

        let err = market
            .place_bet(7, &user, true, 10, None, access.clone())
            .await
            .unwrap_err();
        assert_eq!(rejection(&err), Some(&MarketError::MarketNotFound(7)));

        let id = market
            .create_market("Rejections".into(), 1, &creator, access.clone())
            .await
            .unwrap();
        let err = market
            .place_bet(id, &user, true, 0, None, access.clone())
            .await
            .unwrap_err();
        assert_eq!(rejection(&err), Some(&MarketError::InvalidAmount));

        let err = market
            .place_bet(id, &user, true, 10, None, access.clone())
            .await
            .unwrap_err();
        assert_eq!(
            rejection(&err),
            Some(&MarketError::InsufficientAllowance {
                available: 0,
                required: 10
            })
        );

        token.approve(&user, 500).await.unwrap();
        let err = market
            .place_bet(id, &user, true, 200, None, access.clone())
            .await
            .unwrap_err();
        assert_eq!(
            rejection(&err),
            Some(&MarketError::InsufficientBalance {
                available: 100,
                required: 200
            })
        );
        let state = market.get_market(id).await.unwrap();
        assert_eq!(state.market.total_staked, 0);
        assert_eq!(token.balance_of(&user).await.unwrap(), 100);

        market.force_market_end(id, access.clone()).await.unwrap();
        market
            .resolve_market(id, &creator, true, access.clone())
            .await
            .unwrap();
        let err = market
            .place_bet(id, &user, true, 10, None, access.clone())
            .await
            .unwrap_err();
        assert_eq!(rejection(&err), Some(&MarketError::AlreadyResolved));
    }

    #[tokio::test]
    async fn zero_duration_market_is_closed_immediately() {
        let (mut market, token) = new_market(FundingMode::Allowance, true).await;
        let access = get_test_access();
        let (_, creator) = generate_keypair(&mut rand::thread_rng());
        fund(&token, &creator, 10).await;
        let id = market
            .create_market("Instant".into(), 0, &creator, access.clone())
            .await
            .unwrap();
        assert_eq!(market.get_market(id).await.unwrap().state, MarketState::Ended);
        let err = market
            .place_bet(id, &creator, true, 10, None, access.clone())
            .await
            .unwrap_err();
        assert_eq!(rejection(&err), Some(&MarketError::MarketEnded));
        market
            .resolve_market(id, &creator, false, access)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn attached_value_has_to_match() {
        let (mut market, token) = new_market(FundingMode::Attached, true).await;
        let access = get_test_access();
        let (_, creator) = generate_keypair(&mut rand::thread_rng());
        let (_, user) = generate_keypair(&mut rand::thread_rng());
        token.mint(&user, 100).await.unwrap();
        let id = market
            .create_market("Native".into(), 1, &creator, access.clone())
            .await
            .unwrap();

        let err = market
            .place_bet(id, &user, true, 50, Some(40), access.clone())
            .await
            .unwrap_err();
        assert_eq!(
            rejection(&err),
            Some(&MarketError::ValueMismatch {
                value: 40,
                amount: 50
            })
        );
        let err = market
            .place_bet(id, &user, true, 50, None, access.clone())
            .await
            .unwrap_err();
        assert!(matches!(
            rejection(&err),
            Some(MarketError::ValueMismatch { .. })
        ));
        market
            .place_bet(id, &user, true, 50, Some(50), access.clone())
            .await
            .unwrap();
        assert_eq!(token.balance_of(&user).await.unwrap(), 50);
        assert_eq!(token.escrow_balance().await.unwrap(), 50);
    }

    #[tokio::test]
    async fn analytics_from_events() {
        let (mut market, token) = new_market(FundingMode::Allowance, true).await;
        let access = get_test_access();
        let (_, creator) = generate_keypair(&mut rand::thread_rng());
        let (_, u1) = generate_keypair(&mut rand::thread_rng());
        let (_, u2) = generate_keypair(&mut rand::thread_rng());
        fund(&token, &u1, 1000).await;
        fund(&token, &u2, 1000).await;

        for (outcome, question) in [(true, "First"), (false, "Second")] {
            let id = market
                .create_market(question.into(), 1, &creator, access.clone())
                .await
                .unwrap();
            market
                .place_bet(id, &u1, true, 100, None, access.clone())
                .await
                .unwrap();
            market
                .place_bet(id, &u2, false, 100, None, access.clone())
                .await
                .unwrap();
            market.force_market_end(id, access.clone()).await.unwrap();
            market
                .resolve_market(id, &creator, outcome, access.clone())
                .await
                .unwrap();
            let winner = if outcome { u1 } else { u2 };
            market
                .claim_winnings(id, &winner, access.clone())
                .await
                .unwrap();
        }
        // u2 adds a second stake on a third market to break the tie
        let id = market
            .create_market("Third".into(), 1, &creator, access.clone())
            .await
            .unwrap();
        market
            .place_bet(id, &u2, false, 50, None, access.clone())
            .await
            .unwrap();
        market
            .place_bet(id, &u1, true, 10, None, access.clone())
            .await
            .unwrap();
        market.force_market_end(id, access.clone()).await.unwrap();
        market
            .resolve_market(id, &creator, false, access.clone())
            .await
            .unwrap();
        market.claim_winnings(id, &u2, access.clone()).await.unwrap();

        let leaderboard = market.leaderboard(None).await.unwrap();
        assert_eq!(leaderboard.len(), 2);
        assert_eq!(leaderboard[0].user, u2);
        assert_eq!(leaderboard[0].total_won, 260);
        assert_eq!(leaderboard[0].markets_won, 2);
        assert_eq!(leaderboard[0].claim_count, 2);
        assert_eq!(leaderboard[1].user, u1);
        assert_eq!(leaderboard[1].total_won, 200);
        assert_eq!(market.leaderboard(Some(1)).await.unwrap().len(), 1);

        let volumes = market.daily_volumes(None).await.unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].yes, 210);
        assert_eq!(volumes[0].no, 250);

        let history = market.resolution_history(Some(14)).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!((history[0].yes_wins, history[0].no_wins), (1, 2));
    }

    #[test]
    fn most_recent_keeps_latest_dates() {
        let mut entries = BTreeMap::new();
        for day in 1..=20 {
            let date = NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
            entries.insert(date, day);
        }
        let recent = most_recent(entries, None);
        assert_eq!(recent.len(), 14);
        assert_eq!(recent.first(), Some(&7));
        assert_eq!(recent.last(), Some(&20));
    }

    #[tokio::test]
    async fn access_control() {
        let (mut market, token) = new_market(FundingMode::Allowance, false).await;
        let (secret, user) = generate_keypair(&mut rand::thread_rng());
        let (_, other) = generate_keypair(&mut rand::thread_rng());

        let forged = sign_access(&secret, user, "never issued".into());
        let err = market
            .create_market("Forged".into(), 1, &user, forged)
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<AccessDenied>().is_some());
        let err = market
            .try_login(user, forged_sig(&secret), "never issued".into())
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<AccessDenied>().is_some());

        let challenge = market.create_login_challenge(user).await.unwrap();
        assert_eq!(challenge.len(), 30);
        let access = sign_access(&secret, user, challenge);
        let (other_secret, _) = generate_keypair(&mut rand::thread_rng());
        let bad = sign_access(&other_secret, user, access.challenge.clone());
        market
            .try_login(user, bad.sig, bad.challenge)
            .await
            .unwrap_err();
        market
            .try_login(user, access.sig, access.challenge.clone())
            .await
            .unwrap();
        assert_eq!(market.check_access(access.clone()).await.unwrap(), UserRole::User);

        let id = market
            .create_market("Signed in".into(), 1, &user, access.clone())
            .await
            .unwrap();
        let err = market
            .place_bet(id, &other, true, 10, None, access.clone())
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<AccessDenied>().is_some());
        let err = market.force_market_end(id, access.clone()).await.unwrap_err();
        assert!(err.downcast_ref::<AccessDenied>().is_some());
        market.mint(&user, 10, access.clone()).await.unwrap_err();
        assert_eq!(token.balance_of(&user).await.unwrap(), 0);

        market
            .update_user(user, Some("satoshi".into()), access.clone())
            .await
            .unwrap();
        assert_eq!(
            market.get_username(user).await.unwrap(),
            Some("satoshi".to_string())
        );
        let profile = market.get_user(user, access).await.unwrap();
        assert_eq!(profile.role, UserRole::User);
    }

    #[tokio::test]
    async fn failed_payout_reverts_the_claim() {
        let token = UnreliableToken::default();
        let mut market = Predicta::new(
            Box::new(SQLite::new(None).await.unwrap()),
            Box::new(token.clone()),
            FundingMode::Allowance,
            vec![],
            true,
        )
        .await
        .unwrap();
        let access = get_test_access();
        let (_, creator) = generate_keypair(&mut rand::thread_rng());
        let (_, winner) = generate_keypair(&mut rand::thread_rng());
        token.mint(&winner, 10).await.unwrap();
        token.approve(&winner, 10).await.unwrap();
        let id = market
            .create_market("Payout".into(), 1, &creator, access.clone())
            .await
            .unwrap();
        market
            .place_bet(id, &winner, true, 10, None, access.clone())
            .await
            .unwrap();
        market.force_market_end(id, access.clone()).await.unwrap();
        market
            .resolve_market(id, &creator, true, access.clone())
            .await
            .unwrap();

        token.fail_transfers.store(true, AtomicOrdering::SeqCst);
        market
            .claim_winnings(id, &winner, access.clone())
            .await
            .unwrap_err();
        let bet = market.get_user_bet(id, &winner).await.unwrap();
        assert!(!bet.claimed);
        assert_eq!(bet.payout, None);
        assert_eq!(market.get_events(Some(id)).await.unwrap().len(), 3);
        assert_eq!(market.get_claimable(id, &winner).await.unwrap(), 10);
        assert_eq!(token.escrow_balance().await.unwrap(), 10);
        assert!(market.leaderboard(None).await.unwrap().is_empty());

        token.fail_transfers.store(false, AtomicOrdering::SeqCst);
        assert_eq!(
            market.claim_winnings(id, &winner, access).await.unwrap(),
            10
        );
        assert_eq!(token.balance_of(&winner).await.unwrap(), 10);
    }

    #[tokio::test]
    async fn unrecorded_bet_is_refunded() {
        let token = TestToken::default();
        let mut market = Predicta::new(
            Box::new(StakeRejectingDB {
                inner: SQLite::new(None).await.unwrap(),
            }),
            Box::new(token.clone()),
            FundingMode::Allowance,
            vec![],
            true,
        )
        .await
        .unwrap();
        let access = get_test_access();
        let (_, user) = generate_keypair(&mut rand::thread_rng());
        token.mint(&user, 100).await.unwrap();
        token.approve(&user, 80).await.unwrap();
        let id = market
            .create_market("Refund".into(), 1, &user, access.clone())
            .await
            .unwrap();

        market
            .place_bet(id, &user, false, 50, None, access)
            .await
            .unwrap_err();
        assert_eq!(token.balance_of(&user).await.unwrap(), 100);
        assert_eq!(token.allowance(&user).await.unwrap(), 80);
        assert_eq!(token.escrow_balance().await.unwrap(), 0);
        let state = market.get_market(id).await.unwrap();
        assert_eq!(state.market.total_staked, 0);
        assert_eq!(market.get_events(Some(id)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn amounts_past_the_supported_range() {
        let (mut market, token) = new_market(FundingMode::Allowance, true).await;
        let access = get_test_access();
        let (_, whale) = generate_keypair(&mut rand::thread_rng());
        let (_, user) = generate_keypair(&mut rand::thread_rng());

        let err = market
            .create_market("Forever".into(), u32::MAX, &whale, access.clone())
            .await
            .unwrap_err();
        assert_eq!(rejection(&err), Some(&MarketError::Overflow));
        assert_eq!(market.market_count().await.unwrap(), 0);

        fund(&token, &whale, MAX_AMOUNT).await;
        fund(&token, &user, 1).await;
        let id = market
            .create_market("Whale".into(), 1, &whale, access.clone())
            .await
            .unwrap();
        market
            .place_bet(id, &whale, true, MAX_AMOUNT, None, access.clone())
            .await
            .unwrap();
        let err = market
            .place_bet(id, &user, false, 1, None, access)
            .await
            .unwrap_err();
        assert_eq!(rejection(&err), Some(&MarketError::Overflow));
        assert_eq!(token.balance_of(&user).await.unwrap(), 1);
        assert_eq!(token.allowance(&user).await.unwrap(), 1);
        assert_eq!(
            market.get_market(id).await.unwrap().market.total_staked,
            MAX_AMOUNT
        );
    }

    #[tokio::test]
    async fn created_event_matches_stored_market() {
        let (mut market, _) = new_market(FundingMode::Allowance, true).await;
        let access = get_test_access();
        let creator = access.user;
        let id = market
            .create_market("Seconds".into(), 2, &creator, access)
            .await
            .unwrap();
        let stored = market.get_market(id).await.unwrap().market;
        let events = market.get_events(Some(id)).await.unwrap();
        let MarketEvent::MarketCreated { end_time, .. } = events[0].event else {
            panic!("first event is {}", events[0].event.kind());
        };
        assert_eq!(end_time, stored.end_time);
        assert_eq!(events[0].timestamp, stored.created_at);
    }
}
