use crate::api::*;
use crate::predicta::NewMarket;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use secp256k1::ecdsa::Signature;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{query, Row, Sqlite, SqlitePool, Transaction};
use std::str::FromStr;

#[async_trait]
pub trait DB {
    async fn add_market(&self, market: NewMarket) -> Result<RowId>;
    async fn get_market(&self, market: RowId) -> Result<Market>;
    async fn get_markets(&self) -> Result<Vec<Market>>;
    async fn get_market_count(&self) -> Result<u64>;
    async fn add_stake(
        &self,
        market: RowId,
        user: &UserPubKey,
        side: bool,
        amount: Amount,
        at: DateTime<Utc>,
    ) -> Result<()>;
    async fn set_resolved(&self, market: RowId, outcome: bool, at: DateTime<Utc>) -> Result<()>;
    async fn set_end_time(&self, market: RowId, end_time: DateTime<Utc>) -> Result<()>;
    async fn get_user_bet(&self, market: RowId, user: &UserPubKey) -> Result<UserBet>;
    async fn get_user_bets(&self, user: &UserPubKey) -> Result<Vec<UserBet>>;
    async fn set_claimed(
        &self,
        market: RowId,
        user: &UserPubKey,
        payout: Amount,
        at: DateTime<Utc>,
    ) -> Result<()>;
    async fn unset_claimed(&self, market: RowId, user: &UserPubKey) -> Result<()>;
    async fn get_events(&self, market: Option<RowId>, kind: Option<&str>)
        -> Result<Vec<EventRecord>>;

    async fn update_user_role(&self, user: UserPubKey, role: UserRole) -> Result<()>;
    async fn get_user_role(&self, user: UserPubKey) -> Result<UserRole>;
    /// Also drops sessions that expired before `at`
    async fn create_session(
        &self,
        user: UserPubKey,
        challenge: String,
        at: DateTime<Utc>,
    ) -> Result<()>;
    async fn update_access_token(
        &self,
        user: UserPubKey,
        sig: Signature,
        challenge: String,
    ) -> Result<()>;
    async fn get_last_access(
        &self,
        user: UserPubKey,
        challenge: String,
    ) -> Result<(Signature, DateTime<Utc>)>;
    async fn update_username(&self, user: UserPubKey, username: String) -> Result<()>;
    async fn get_username(&self, user: UserPubKey) -> Result<Option<String>>;
    async fn get_user(&self, user: UserPubKey) -> Result<UserResponse>;
    async fn create_user(&self, user: UserPubKey) -> Result<()>;
}

/// Sessions unused for longer than this are rejected and eventually pruned
pub const SESSION_LIFETIME_DAYS: i64 = 7;

const DB_MEMORY: &str = "sqlite::memory:";
const SCHEMA: [&str; 5] = [
    "CREATE TABLE IF NOT EXISTS markets (\
        id INTEGER PRIMARY KEY AUTOINCREMENT,\
        question TEXT NOT NULL,\
        creator TEXT NOT NULL,\
        created_at INTEGER NOT NULL,\
        end_time INTEGER NOT NULL,\
        resolved BOOLEAN NOT NULL DEFAULT 0,\
        outcome BOOLEAN,\
        resolved_at INTEGER,\
        yes_votes INTEGER NOT NULL DEFAULT 0,\
        no_votes INTEGER NOT NULL DEFAULT 0,\
        total_staked INTEGER NOT NULL DEFAULT 0\
        )",
    "CREATE TABLE IF NOT EXISTS bets (\
        market INTEGER NOT NULL,\
        user TEXT NOT NULL,\
        yes_bet INTEGER NOT NULL DEFAULT 0,\
        no_bet INTEGER NOT NULL DEFAULT 0,\
        claimed BOOLEAN NOT NULL DEFAULT 0,\
        payout INTEGER,\
        PRIMARY KEY (market, user)\
        )",
    "CREATE TABLE IF NOT EXISTS events (\
        id INTEGER PRIMARY KEY AUTOINCREMENT,\
        market INTEGER NOT NULL,\
        kind TEXT NOT NULL,\
        user TEXT,\
        data TEXT NOT NULL,\
        timestamp INTEGER NOT NULL\
        )",
    "CREATE TABLE IF NOT EXISTS users (\
        pubkey TEXT NOT NULL,\
        role TEXT NOT NULL DEFAULT 'User',\
        username TEXT UNIQUE,\
        PRIMARY KEY (pubkey)\
        )",
    "CREATE TABLE IF NOT EXISTS sessions (\
        pubkey TEXT NOT NULL,\
        challenge TEXT NOT NULL,\
        issued_at INTEGER NOT NULL,\
        access_token TEXT,\
        last_access INTEGER,\
        PRIMARY KEY (pubkey, challenge)\
        )",
];

pub struct SQLite {
    connection: SqlitePool,
}
impl SQLite {
    pub async fn new(db_conn: Option<String>) -> Result<Self> {
        let conn = db_conn.as_deref().unwrap_or(DB_MEMORY);
        let options = SqliteConnectOptions::from_str(conn)
            .with_context(|| format!("invalid database connection string {}", conn))?
            .create_if_missing(true);
        // A single long lived connection keeps in-memory databases alive
        let connection = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .with_context(|| format!("couldn't connect to {}", conn))?;
        for statement in SCHEMA {
            query(statement)
                .execute(&connection)
                .await
                .context("couldn't create schema")?;
        }
        Ok(Self { connection })
    }
}

fn amount_to_db(amount: Amount) -> Result<i64> {
    Ok(i64::try_from(amount).map_err(|_| MarketError::Overflow)?)
}
fn amount_from_db(amount: i64) -> Result<Amount> {
    Amount::try_from(amount).with_context(|| format!("negative amount {} in db", amount))
}
fn timestamp_from_db(timestamp: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(timestamp, 0)
        .single()
        .ok_or_else(|| anyhow!("invalid timestamp {} in db", timestamp))
}
fn pubkey_from_db(row: &SqliteRow, column: &str) -> Result<UserPubKey> {
    let key: &str = row.get(column);
    UserPubKey::from_str(key).with_context(|| format!("invalid public key {} in db", key))
}
fn market_from_row(row: &SqliteRow) -> Result<Market> {
    let resolved = row.get("resolved");
    Ok(Market {
        id: row.get("id"),
        question: row.get("question"),
        creator: pubkey_from_db(row, "creator")?,
        created_at: timestamp_from_db(row.get("created_at"))?,
        end_time: timestamp_from_db(row.get("end_time"))?,
        resolved,
        outcome: if resolved { row.get("outcome") } else { None },
        yes_votes: amount_from_db(row.get("yes_votes"))?,
        no_votes: amount_from_db(row.get("no_votes"))?,
        total_staked: amount_from_db(row.get("total_staked"))?,
    })
}
fn bet_from_row(row: &SqliteRow) -> Result<UserBet> {
    let payout: Option<i64> = row.get("payout");
    Ok(UserBet {
        market: row.get("market"),
        user: pubkey_from_db(row, "user")?,
        yes_bet: amount_from_db(row.get("yes_bet"))?,
        no_bet: amount_from_db(row.get("no_bet"))?,
        claimed: row.get("claimed"),
        payout: payout.map(amount_from_db).transpose()?,
    })
}
async fn insert_event(
    tx: &mut Transaction<'_, Sqlite>,
    event: &MarketEvent,
    at: DateTime<Utc>,
) -> Result<()> {
    let data = serde_json::to_string(event).context("couldn't serialize event")?;
    query(
        "INSERT INTO events (market, kind, user, data, timestamp) \
        VALUES (?,?,?,?,?)",
    )
    .bind(event.market())
    .bind(event.kind())
    .bind(event.user().map(|user| user.to_string()))
    .bind(data)
    .bind(at.timestamp())
    .execute(&mut **tx)
    .await
    .with_context(|| format!("couldn't record {} event", event.kind()))?;
    Ok(())
}

const MARKET_COLUMNS: &str = "SELECT id, question, creator, created_at, end_time, resolved, \
    outcome, yes_votes, no_votes, total_staked FROM markets";

#[async_trait]
impl DB for SQLite {
    async fn add_market(&self, market: NewMarket) -> Result<RowId> {
        let mut tx = self.connection.begin().await?;
        let id = query(
            "INSERT INTO markets (\
            question,\
            creator,\
            created_at,\
            end_time)\
            VALUES (?,?,?,?)",
        )
        .bind(&market.question)
        .bind(market.creator.to_string())
        .bind(market.created_at.timestamp())
        .bind(market.end_time.timestamp())
        .execute(&mut *tx)
        .await
        .context("couldn't insert market")?
        .last_insert_rowid();
        insert_event(
            &mut tx,
            &MarketEvent::MarketCreated {
                market: id,
                question: market.question,
                end_time: market.end_time,
                creator: market.creator,
            },
            market.created_at,
        )
        .await?;
        tx.commit().await?;
        Ok(id)
    }
    async fn get_market(&self, market: RowId) -> Result<Market> {
        let row = query(&format!("{} WHERE id = ?", MARKET_COLUMNS))
            .bind(market)
            .fetch_optional(&self.connection)
            .await
            .with_context(|| format!("couldn't get market {}", market))?
            .ok_or(MarketError::MarketNotFound(market))?;
        market_from_row(&row)
    }
    async fn get_markets(&self) -> Result<Vec<Market>> {
        let rows = query(&format!("{} ORDER BY id", MARKET_COLUMNS))
            .fetch_all(&self.connection)
            .await
            .context("couldn't get markets")?;
        rows.iter().map(market_from_row).collect()
    }
    async fn get_market_count(&self) -> Result<u64> {
        let count: i64 = query("SELECT COUNT(*) AS count FROM markets")
            .fetch_one(&self.connection)
            .await?
            .get("count");
        Ok(count.try_into()?)
    }
    async fn add_stake(
        &self,
        market: RowId,
        user: &UserPubKey,
        side: bool,
        amount: Amount,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let amount_db = amount_to_db(amount)?;
        let (yes, no) = if side { (amount_db, 0) } else { (0, amount_db) };
        let mut tx = self.connection.begin().await?;
        let updated = query(
            "UPDATE markets SET \
            yes_votes = yes_votes + ?, \
            no_votes = no_votes + ?, \
            total_staked = total_staked + ? \
            WHERE id = ? AND resolved = 0",
        )
        .bind(yes)
        .bind(no)
        .bind(amount_db)
        .bind(market)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("couldn't update pools of market {}", market))?
        .rows_affected();
        if updated != 1 {
            bail!(MarketError::AlreadyResolved);
        }
        query(
            "INSERT INTO bets (market, user, yes_bet, no_bet) \
            VALUES (?,?,?,?) \
            ON CONFLICT (market, user) DO UPDATE SET \
            yes_bet = yes_bet + excluded.yes_bet, \
            no_bet = no_bet + excluded.no_bet",
        )
        .bind(market)
        .bind(user.to_string())
        .bind(yes)
        .bind(no)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("couldn't record stake of {} on market {}", user, market))?;
        insert_event(
            &mut tx,
            &MarketEvent::BetPlaced {
                market,
                bettor: *user,
                side,
                amount,
            },
            at,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }
    async fn set_resolved(&self, market: RowId, outcome: bool, at: DateTime<Utc>) -> Result<()> {
        let mut tx = self.connection.begin().await?;
        let updated = query(
            "UPDATE markets SET \
            resolved = 1, \
            outcome = ?, \
            resolved_at = ? \
            WHERE id = ? AND resolved = 0",
        )
        .bind(outcome)
        .bind(at.timestamp())
        .bind(market)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("couldn't resolve market {}", market))?
        .rows_affected();
        if updated != 1 {
            bail!(MarketError::AlreadyResolved);
        }
        insert_event(&mut tx, &MarketEvent::MarketResolved { market, outcome }, at).await?;
        tx.commit().await?;
        Ok(())
    }
    async fn set_end_time(&self, market: RowId, end_time: DateTime<Utc>) -> Result<()> {
        query("UPDATE markets SET end_time = ? WHERE id = ?")
            .bind(end_time.timestamp())
            .bind(market)
            .execute(&self.connection)
            .await
            .with_context(|| format!("couldn't set end time of market {}", market))?;
        Ok(())
    }
    async fn get_user_bet(&self, market: RowId, user: &UserPubKey) -> Result<UserBet> {
        let row = query(
            "SELECT market, user, yes_bet, no_bet, claimed, payout \
            FROM bets WHERE market = ? AND user = ?",
        )
        .bind(market)
        .bind(user.to_string())
        .fetch_optional(&self.connection)
        .await
        .with_context(|| format!("couldn't get bet of {} on market {}", user, market))?;
        match row {
            Some(row) => bet_from_row(&row),
            None => Ok(UserBet::empty(market, *user)),
        }
    }
    async fn get_user_bets(&self, user: &UserPubKey) -> Result<Vec<UserBet>> {
        let rows = query(
            "SELECT market, user, yes_bet, no_bet, claimed, payout \
            FROM bets WHERE user = ? ORDER BY market",
        )
        .bind(user.to_string())
        .fetch_all(&self.connection)
        .await
        .with_context(|| format!("couldn't get bets of {}", user))?;
        rows.iter().map(bet_from_row).collect()
    }
    async fn set_claimed(
        &self,
        market: RowId,
        user: &UserPubKey,
        payout: Amount,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.connection.begin().await?;
        let updated = query(
            "UPDATE bets SET \
            claimed = 1, \
            payout = ? \
            WHERE market = ? AND user = ? AND claimed = 0",
        )
        .bind(amount_to_db(payout)?)
        .bind(market)
        .bind(user.to_string())
        .execute(&mut *tx)
        .await
        .with_context(|| format!("couldn't mark claim of {} on market {}", user, market))?
        .rows_affected();
        if updated != 1 {
            bail!(MarketError::AlreadyClaimed);
        }
        insert_event(
            &mut tx,
            &MarketEvent::WinningsClaimed {
                market,
                winner: *user,
                amount: payout,
            },
            at,
        )
        .await?;
        tx.commit().await?;
        Ok(())
    }
    async fn unset_claimed(&self, market: RowId, user: &UserPubKey) -> Result<()> {
        let mut tx = self.connection.begin().await?;
        query(
            "UPDATE bets SET \
            claimed = 0, \
            payout = NULL \
            WHERE market = ? AND user = ?",
        )
        .bind(market)
        .bind(user.to_string())
        .execute(&mut *tx)
        .await?;
        query("DELETE FROM events WHERE market = ? AND user = ? AND kind = 'WinningsClaimed'")
            .bind(market)
            .bind(user.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
    async fn get_events(
        &self,
        market: Option<RowId>,
        kind: Option<&str>,
    ) -> Result<Vec<EventRecord>> {
        let rows = query(
            "SELECT id, data, timestamp FROM events \
            WHERE (?1 IS NULL OR market = ?1) AND (?2 IS NULL OR kind = ?2) \
            ORDER BY id",
        )
        .bind(market)
        .bind(kind)
        .fetch_all(&self.connection)
        .await
        .context("couldn't get events")?;
        rows.iter()
            .map(|row| {
                let data: &str = row.get("data");
                Ok(EventRecord {
                    id: row.get("id"),
                    timestamp: timestamp_from_db(row.get("timestamp"))?,
                    event: serde_json::from_str(data)
                        .with_context(|| format!("couldn't deserialize event {}", data))?,
                })
            })
            .collect()
    }
    async fn update_user_role(&self, user: UserPubKey, role: UserRole) -> Result<()> {
        self.create_user(user).await?;
        query("UPDATE users SET role = ? WHERE pubkey = ?")
            .bind(role.to_string())
            .bind(user.to_string())
            .execute(&self.connection)
            .await?;
        Ok(())
    }
    async fn get_user_role(&self, user: UserPubKey) -> Result<UserRole> {
        let row = query("SELECT role FROM users WHERE pubkey = ?")
            .bind(user.to_string())
            .fetch_optional(&self.connection)
            .await?;
        match row {
            Some(row) => UserRole::from_str(row.get("role")),
            None => Ok(UserRole::User),
        }
    }
    async fn create_session(
        &self,
        user: UserPubKey,
        challenge: String,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let expired = (at - Duration::days(SESSION_LIFETIME_DAYS)).timestamp();
        let mut tx = self.connection.begin().await?;
        query("DELETE FROM sessions WHERE COALESCE(last_access, issued_at) < ?")
            .bind(expired)
            .execute(&mut *tx)
            .await
            .context("couldn't prune sessions")?;
        // Users that never finished a login and carry no profile
        query(
            "DELETE FROM users WHERE role = 'User' AND username IS NULL \
            AND pubkey NOT IN (SELECT pubkey FROM sessions)",
        )
        .execute(&mut *tx)
        .await
        .context("couldn't prune users")?;
        query("INSERT OR IGNORE INTO users (pubkey) VALUES (?)")
            .bind(user.to_string())
            .execute(&mut *tx)
            .await?;
        query("INSERT OR REPLACE INTO sessions (pubkey, challenge, issued_at) VALUES (?,?,?)")
            .bind(user.to_string())
            .bind(challenge)
            .bind(at.timestamp())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
    async fn update_access_token(
        &self,
        user: UserPubKey,
        sig: Signature,
        challenge: String,
    ) -> Result<()> {
        let updated = query(
            "UPDATE sessions SET \
            access_token = ?, \
            last_access = ? \
            WHERE pubkey = ? AND challenge = ?",
        )
        .bind(sig.to_string())
        .bind(Utc::now().timestamp())
        .bind(user.to_string())
        .bind(challenge)
        .execute(&self.connection)
        .await?
        .rows_affected();
        if updated != 1 {
            bail!("No login challenge was issued for user {}", user);
        }
        Ok(())
    }
    async fn get_last_access(
        &self,
        user: UserPubKey,
        challenge: String,
    ) -> Result<(Signature, DateTime<Utc>)> {
        let row = query(
            "SELECT access_token, last_access \
            FROM sessions \
            WHERE pubkey = ? AND challenge = ?",
        )
        .bind(user.to_string())
        .bind(challenge)
        .fetch_one(&self.connection)
        .await?;
        let token: Option<String> = row.get("access_token");
        let last_access: Option<i64> = row.get("last_access");
        match (token, last_access) {
            (Some(token), Some(last_access)) => Ok((
                Signature::from_str(token.as_str())?,
                timestamp_from_db(last_access)?,
            )),
            _ => bail!("Login for user {} was never completed", user),
        }
    }
    async fn update_username(&self, user: UserPubKey, username: String) -> Result<()> {
        self.create_user(user).await?;
        query("UPDATE users SET username = ? WHERE pubkey = ?")
            .bind(username.clone())
            .bind(user.to_string())
            .execute(&self.connection)
            .await
            .with_context(|| format!("couldn't set username {}", username))?;
        Ok(())
    }
    async fn get_username(&self, user: UserPubKey) -> Result<Option<String>> {
        let row = query("SELECT username FROM users WHERE pubkey = ?")
            .bind(user.to_string())
            .fetch_optional(&self.connection)
            .await?;
        Ok(row.and_then(|row| row.get("username")))
    }
    async fn get_user(&self, user: UserPubKey) -> Result<UserResponse> {
        let row = query("SELECT username, role FROM users WHERE pubkey = ?")
            .bind(user.to_string())
            .fetch_optional(&self.connection)
            .await?;
        match row {
            Some(row) => Ok(UserResponse {
                user,
                username: row.get("username"),
                role: UserRole::from_str(row.get("role"))?,
            }),
            None => Ok(UserResponse {
                user,
                username: None,
                role: UserRole::User,
            }),
        }
    }
    async fn create_user(&self, user: UserPubKey) -> Result<()> {
        query("INSERT OR IGNORE INTO users (pubkey) VALUES (?)")
            .bind(user.to_string())
            .execute(&self.connection)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use secp256k1::{generate_keypair, rand};

    fn new_market(creator: UserPubKey, question: &str) -> NewMarket {
        let created_at = Utc::now();
        NewMarket {
            question: question.to_string(),
            creator,
            created_at,
            end_time: created_at + Duration::days(1),
        }
    }

    #[tokio::test]
    async fn market_ids_are_sequential() {
        let db = SQLite::new(None).await.unwrap();
        let (_, creator) = generate_keypair(&mut rand::thread_rng());
        let first = db.add_market(new_market(creator, "First")).await.unwrap();
        let second = db.add_market(new_market(creator, "Second")).await.unwrap();
        assert_eq!((first, second), (1, 2));
        assert_eq!(db.get_market_count().await.unwrap(), 2);

        let err = db.get_market(3).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<MarketError>(),
            Some(&MarketError::MarketNotFound(3))
        );
    }

    #[tokio::test]
    async fn stakes_accumulate_per_side() {
        let db = SQLite::new(None).await.unwrap();
        let (_, creator) = generate_keypair(&mut rand::thread_rng());
        let (_, user) = generate_keypair(&mut rand::thread_rng());
        let market = db.add_market(new_market(creator, "Stakes")).await.unwrap();

        db.add_stake(market, &user, true, 10, Utc::now()).await.unwrap();
        db.add_stake(market, &user, true, 5, Utc::now()).await.unwrap();
        db.add_stake(market, &user, false, 7, Utc::now()).await.unwrap();

        let bet = db.get_user_bet(market, &user).await.unwrap();
        assert_eq!((bet.yes_bet, bet.no_bet), (15, 7));
        let state = db.get_market(market).await.unwrap();
        assert_eq!(state.yes_votes, 15);
        assert_eq!(state.no_votes, 7);
        assert_eq!(state.total_staked, state.yes_votes + state.no_votes);

        let events = db.get_events(Some(market), Some("BetPlaced")).await.unwrap();
        assert_eq!(events.len(), 3);
    }

    #[tokio::test]
    async fn resolution_and_claim_are_guarded() {
        let db = SQLite::new(None).await.unwrap();
        let (_, creator) = generate_keypair(&mut rand::thread_rng());
        let (_, user) = generate_keypair(&mut rand::thread_rng());
        let market = db.add_market(new_market(creator, "Guards")).await.unwrap();
        db.add_stake(market, &user, false, 10, Utc::now()).await.unwrap();

        db.set_resolved(market, false, Utc::now()).await.unwrap();
        let err = db.set_resolved(market, true, Utc::now()).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<MarketError>(),
            Some(&MarketError::AlreadyResolved)
        );
        assert_eq!(db.get_market(market).await.unwrap().outcome, Some(false));
        db.add_stake(market, &user, true, 1, Utc::now())
            .await
            .unwrap_err();

        db.set_claimed(market, &user, 10, Utc::now()).await.unwrap();
        db.set_claimed(market, &user, 10, Utc::now())
            .await
            .unwrap_err();
        db.unset_claimed(market, &user).await.unwrap();
        let bet = db.get_user_bet(market, &user).await.unwrap();
        assert!(!bet.claimed);
        assert_eq!(bet.payout, None);
        assert!(db
            .get_events(Some(market), Some("WinningsClaimed"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn stale_sessions_are_pruned() {
        let db = SQLite::new(None).await.unwrap();
        let (_, stale) = generate_keypair(&mut rand::thread_rng());
        let (_, named) = generate_keypair(&mut rand::thread_rng());
        let (_, fresh) = generate_keypair(&mut rand::thread_rng());
        let long_ago = Utc::now() - Duration::days(SESSION_LIFETIME_DAYS + 1);
        db.create_session(stale, "old".into(), long_ago).await.unwrap();
        db.create_session(named, "old".into(), long_ago).await.unwrap();
        db.update_username(named, "kept".into()).await.unwrap();

        db.create_session(fresh, "new".into(), Utc::now())
            .await
            .unwrap();
        let sessions: i64 = query("SELECT COUNT(*) AS count FROM sessions")
            .fetch_one(&db.connection)
            .await
            .unwrap()
            .get("count");
        assert_eq!(sessions, 1);
        let users: Vec<String> = query("SELECT pubkey FROM users ORDER BY pubkey")
            .fetch_all(&db.connection)
            .await
            .unwrap()
            .iter()
            .map(|row| row.get("pubkey"))
            .collect();
        let mut expected = vec![named.to_string(), fresh.to_string()];
        expected.sort();
        assert_eq!(users, expected);
        assert_eq!(db.get_username(named).await.unwrap(), Some("kept".into()));
    }
}
