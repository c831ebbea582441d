use anyhow::{Context, Result};
use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::api::FundingMode;

const DEFAULT_CONFIG: &str = "predicta";

#[derive(Parser, Debug, Default)]
#[command(about = "Binary prediction market server")]
pub struct Args {
    /// Settings file, defaults to predicta.toml in the working directory
    #[arg(short, long)]
    pub config: Option<String>,
    /// Public keys granted the root role
    #[arg(short, long)]
    pub admin: Vec<String>,
    #[arg(short, long)]
    pub port: Option<u16>,
    /// Skip signature checks on every request
    #[arg(short, long)]
    pub test: bool,
    #[arg(short, long)]
    pub db: Option<String>,
    /// How stakes reach the escrow: allowance or attached
    #[arg(short, long)]
    pub funding: Option<String>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub port: u16,
    pub db: Option<String>,
    pub admin: Vec<String>,
    pub test: bool,
    pub funding: FundingMode,
    pub log_level: String,
}
impl Settings {
    pub fn new(args: &Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => File::with_name(path).required(true),
            None => File::with_name(DEFAULT_CONFIG).required(false),
        };
        let mut builder = Config::builder()
            .set_default("port", 8081_i64)?
            .set_default("admin", Vec::<String>::new())?
            .set_default("test", false)?
            .set_default("funding", FundingMode::default().to_string())?
            .set_default("log_level", "debug")?
            .add_source(file)
            .add_source(
                Environment::with_prefix("PREDICTA")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("admin"),
            )
            .set_override_option("port", args.port.map(i64::from))?
            .set_override_option("db", args.db.clone())?
            .set_override_option("funding", args.funding.clone())?;
        if !args.admin.is_empty() {
            builder = builder.set_override("admin", args.admin.clone())?;
        }
        if args.test {
            builder = builder.set_override("test", true)?;
        }
        builder
            .build()
            .context("couldn't load settings")?
            .try_deserialize()
            .context("invalid settings")
    }
    /// In-memory database on a random port with signature checks disabled
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            port: 0,
            db: None,
            admin: vec![],
            test: true,
            funding: FundingMode::Allowance,
            log_level: "debug".into(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let settings = Settings::new(&Args {
            config: None,
            admin: vec!["02aa".into()],
            port: Some(9000),
            test: true,
            db: Some("sqlite://markets.db".into()),
            funding: Some("attached".into()),
        })
        .unwrap();
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.admin, vec!["02aa".to_string()]);
        assert!(settings.test);
        assert_eq!(settings.db.as_deref(), Some("sqlite://markets.db"));
        assert_eq!(settings.funding, FundingMode::Attached);
    }

    #[test]
    fn missing_config_file_is_an_error_only_when_named() {
        Settings::new(&Args {
            config: Some("does/not/exist.toml".into()),
            ..Default::default()
        })
        .unwrap_err();
    }
}
