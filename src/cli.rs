#![allow(unused)]
use std::str::FromStr;

use anyhow::{Context, Result};
use api::*;
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use secp256k1::{
    ecdsa::Signature, generate_keypair, hashes::sha256::Hash, rand, Message, SecretKey,
};
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncWriteExt},
};

use crate::client::Client;

mod api;
mod client;

#[derive(Parser)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    #[arg(short, long, default_value = "http://127.0.0.1:8081")]
    url: String,
    /// Decimals of the staking token, only used for display
    #[arg(long, default_value_t = 18)]
    decimals: u32,
}
#[derive(Subcommand)]
enum Commands {
    CreateMarket {
        #[arg(short, long)]
        question: String,
        #[arg(short, long, default_value_t = 7)]
        days: u32,
    },
    PlaceBet {
        #[arg(short, long)]
        market: RowId,
        /// Bet on YES, NO otherwise
        #[arg(short, long)]
        yes: bool,
        #[arg(short, long)]
        amount: Amount,
        /// Value attached to the bet when stakes are attached
        #[arg(short, long)]
        value: Option<Amount>,
    },
    ResolveMarket {
        #[arg(short, long)]
        market: RowId,
        #[arg(short, long)]
        yes: bool,
    },
    ClaimWinnings {
        #[arg(short, long)]
        market: RowId,
    },
    GetMarkets,
    GetMarket {
        #[arg(short, long)]
        market: RowId,
    },
    GetBet {
        #[arg(short, long)]
        market: RowId,
        /// Defaults to the logged in user
        #[arg(short, long)]
        user: Option<UserPubKey>,
    },
    Approve {
        #[arg(short, long)]
        amount: Amount,
    },
    Mint {
        #[arg(short, long)]
        user: UserPubKey,
        #[arg(short, long)]
        amount: Amount,
    },
    Balance {
        #[arg(short, long)]
        user: Option<UserPubKey>,
    },
    Leaderboard {
        #[arg(short, long)]
        limit: Option<u32>,
    },
    DailyVolumes {
        #[arg(short, long)]
        days: Option<u32>,
    },
    History {
        #[arg(short, long)]
        days: Option<u32>,
    },
    GenerateKeys,
    Login,
    SignEcdsa {
        #[arg(short, long)]
        message: String,
    },
    UpdateUser {
        #[arg(short, long)]
        user: UserPubKey,
        #[arg(long)]
        username: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Args::parse();
    let client = Client::new(cli.url);
    let decimals = cli.decimals;

    match cli.command {
        Commands::CreateMarket { question, days } => {
            let access = get_access().await?;
            let request = CreateMarketRequest {
                question,
                duration_days: days,
                creator: access.user,
            };
            let id = client.create_market(request, access).await?;
            println!("Created market {}", id);
        }
        Commands::PlaceBet {
            market,
            yes,
            amount,
            value,
        } => {
            let access = get_access().await?;
            let request = PlaceBetRequest {
                market,
                user: access.user,
                side: yes,
                amount,
                value,
            };
            client.place_bet(request, access).await?;
            println!(
                "Bet {} on {}",
                format_amount(amount, decimals)?,
                if yes { "YES" } else { "NO" }
            );
        }
        Commands::ResolveMarket { market, yes } => {
            let access = get_access().await?;
            let request = ResolveMarketRequest {
                market,
                user: access.user,
                outcome: yes,
            };
            client.resolve_market(request, access).await?;
        }
        Commands::ClaimWinnings { market } => {
            let access = get_access().await?;
            let request = ClaimWinningsRequest {
                market,
                user: access.user,
            };
            let payout = client.claim_winnings(request, access).await?;
            println!("Claimed {}", format_amount(payout, decimals)?);
        }
        Commands::GetMarkets => {
            for market in client.get_markets().await? {
                print_market(&market, decimals)?;
            }
        }
        Commands::GetMarket { market } => {
            let market = client.get_market(market).await?;
            print_market(&market, decimals)?;
            let events = client.get_events(Some(market.market.id)).await?;
            println!("Events: {:#?}", events);
        }
        Commands::GetBet { market, user } => {
            let user = match user {
                Some(user) => user,
                None => read_public().await?,
            };
            let bet = client.get_user_bet(market, user).await?;
            println!(
                "YES {} | NO {} | claimed {}",
                format_amount(bet.yes_bet, decimals)?,
                format_amount(bet.no_bet, decimals)?,
                bet.claimed
            );
            let claimable = client.get_claimable(market, user).await?;
            println!("Claimable: {}", format_amount(claimable, decimals)?);
        }
        Commands::Approve { amount } => {
            let access = get_access().await?;
            let request = TokenRequest {
                user: access.user,
                amount,
            };
            client.approve(request, access).await?;
        }
        Commands::Mint { user, amount } => {
            let access = get_access().await?;
            client.mint(TokenRequest { user, amount }, access).await?;
        }
        Commands::Balance { user } => {
            let user = match user {
                Some(user) => user,
                None => read_public().await?,
            };
            let balance = client.balance(user).await?;
            println!(
                "Balance: {} | Allowance: {}",
                format_amount(balance.balance, decimals)?,
                format_amount(balance.allowance, decimals)?
            );
        }
        Commands::Leaderboard { limit } => {
            for (rank, entry) in client.leaderboard(limit).await?.iter().enumerate() {
                println!(
                    "{}. {} won {} in {} markets",
                    rank + 1,
                    entry.user,
                    format_amount(entry.total_won, decimals)?,
                    entry.markets_won
                );
            }
        }
        Commands::DailyVolumes { days } => {
            for volume in client.daily_volumes(days).await? {
                println!(
                    "{} YES {} | NO {}",
                    volume.date,
                    format_amount(volume.yes, decimals)?,
                    format_amount(volume.no, decimals)?
                );
            }
        }
        Commands::History { days } => {
            for point in client.resolution_history(days).await? {
                println!(
                    "{} YES {} | NO {}",
                    point.date, point.yes_wins, point.no_wins
                );
            }
        }
        Commands::GenerateKeys => {
            let keys = generate_keypair(&mut rand::thread_rng());
            println!("Pubkey: {}", keys.1);
            let mut private = File::create("ecdsa.key").await?;
            let mut public = File::create("ecdsa.pub").await?;
            private
                .write_all(format!("{}", keys.0.display_secret()).as_bytes())
                .await?;
            public.write_all(keys.1.to_string().as_bytes()).await?;
        }
        Commands::Login => {
            let secret_key = read_secret().await?;
            let user = UserPubKey::from_secret_key_global(&secret_key);
            let challenge = client.get_login_challenge(user).await?;
            let message = Message::from_hashed_data::<Hash>(challenge.as_bytes());
            let signature = secret_key.sign_ecdsa(message);
            let mut file = File::create("access_token").await?;
            file.write_all(signature.to_string().as_bytes()).await?;
            let mut file = File::create("challenge").await?;
            file.write_all(challenge.as_bytes()).await?;
            println!("Signed Challenge \"{}\"", challenge);
            let request = LoginRequest {
                user,
                challenge,
                sig: signature,
            };
            client.try_login(request).await?;
            println!("Logged in as {}", user);
        }
        Commands::SignEcdsa { message } => {
            let message = Message::from_hashed_data::<Hash>(message.as_bytes());
            let secret_key = read_secret().await?;
            let signature = secret_key.sign_ecdsa(message);
            println!("{}", signature);
        }
        Commands::UpdateUser { user, username } => {
            let access = get_access().await?;
            let data = UpdateUserRequest { user, username };
            client.update_user(data, access).await?;
        }
    }
    Ok(())
}
fn print_market(market: &MarketResponse, decimals: u32) -> Result<()> {
    println!(
        "#{} {} [{}] ends {}",
        market.market.id, market.market.question, market.state, market.market.end_time
    );
    println!(
        "  YES {} ({}%) | NO {} ({}%)",
        format_amount(market.market.yes_votes, decimals)?,
        market.yes_percentage,
        format_amount(market.market.no_votes, decimals)?,
        market.no_percentage
    );
    Ok(())
}
fn format_amount(amount: Amount, decimals: u32) -> Result<String> {
    let amount = Decimal::try_from_i128_with_scale(amount.into(), decimals)
        .with_context(|| format!("can't display {} decimals", decimals))?;
    Ok(amount.normalize().to_string())
}
async fn get_access() -> Result<AccessRequest> {
    let user = read_public().await?;
    let sig = read_token().await?;
    let challenge = read_challenge().await?;
    Ok(AccessRequest {
        user,
        sig,
        challenge,
    })
}
async fn read_file(name: &str) -> Result<String> {
    let mut file = File::open(name)
        .await
        .with_context(|| format!("couldn't open {}", name))?;
    let mut contents = vec![];
    file.read_to_end(&mut contents).await?;
    Ok(String::from_utf8(contents)?)
}
async fn read_secret() -> Result<SecretKey> {
    Ok(SecretKey::from_str(read_file("ecdsa.key").await?.as_str())?)
}
async fn read_public() -> Result<UserPubKey> {
    Ok(UserPubKey::from_str(read_file("ecdsa.pub").await?.as_str())?)
}
async fn read_token() -> Result<Signature> {
    Ok(Signature::from_str(read_file("access_token").await?.as_str())?)
}
async fn read_challenge() -> Result<String> {
    read_file("challenge").await
}
