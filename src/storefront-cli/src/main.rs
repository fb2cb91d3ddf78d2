//! Storefront loyalty engine: replays order events against a configured
//! engine and reports account, referral and promotion state.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use storefront_core::config::AppConfig;
use storefront_core::customer::{Customer, InMemoryCustomerDirectory};
use storefront_core::event_bus::noop_sink;
use storefront_core::events::OrderEvent;
use storefront_core::loyalty::PointsBalance;
use storefront_core::promotion::SessionHistory;
use storefront_core::referral::ReferralEarnings;
use storefront_engine::StorefrontEngine;

#[derive(Parser, Debug)]
#[command(name = "storefront")]
#[command(about = "Loyalty, referral and commission engine for the storefront")]
#[command(version)]
struct Cli {
    /// Config file (TOML/JSON); environment `STOREFRONT__*` overrides it
    #[arg(long, env = "STOREFRONT_CONFIG")]
    config: Option<String>,

    /// Node identifier (overrides config)
    #[arg(long, env = "STOREFRONT__NODE_ID")]
    node_id: Option<String>,

    /// Referral expiry window in days (overrides config)
    #[arg(long, env = "STOREFRONT__REFERRAL__EXPIRY_DAYS")]
    referral_expiry_days: Option<i64>,

    /// Print Prometheus metrics after the command finishes
    #[arg(long, default_value_t = false)]
    metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register customers, sign them up, and apply an order event stream
    Replay {
        /// JSON array of customers
        #[arg(long)]
        customers: PathBuf,
        /// Newline-delimited JSON order events
        #[arg(long)]
        events: PathBuf,
        /// Sign-ups as `customer_id[:referral_code]`, applied before events
        #[arg(long = "signup")]
        signups: Vec<String>,
        /// Clock used for the run (RFC 3339); defaults to now
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Pick the promotion to show on a page for a fresh session
    Promote {
        #[arg(long)]
        page: String,
        #[arg(long, default_value = "cli")]
        session: String,
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Serialize)]
struct CustomerReport {
    customer_id: Uuid,
    email: String,
    level: Option<u32>,
    tier: Option<String>,
    balance: Option<PointsBalance>,
    referrals: ReferralEarnings,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "storefront=info".into()),
        )
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();

    let metrics_handle = if cli.metrics {
        Some(
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .context("installing metrics recorder")?,
        )
    } else {
        None
    };

    let mut config = match AppConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) if cli.config.is_some() => {
            return Err(e).with_context(|| format!("loading config {:?}", cli.config));
        }
        Err(e) => {
            warn!(error = %e, "Failed to load config, using defaults");
            AppConfig::default()
        }
    };
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(days) = cli.referral_expiry_days {
        config.referral.expiry_days = days;
    }

    info!(
        node_id = %config.node_id,
        tiers = config.loyalty.tiers.len(),
        commission_tiers = config.commission.tiers.len(),
        promotions = config.promotions.catalog.len(),
        "Configuration loaded"
    );

    match cli.command {
        Command::Replay {
            customers,
            events,
            signups,
            now,
        } => replay(config, &customers, &events, &signups, now.unwrap_or_else(Utc::now))?,
        Command::Promote { page, session, now } => {
            let engine = StorefrontEngine::new(
                config,
                Arc::new(InMemoryCustomerDirectory::new()),
                noop_sink(),
            )?;
            let history = SessionHistory::new(session);
            let selection = engine
                .promotions()
                .select(&page, &history, now.unwrap_or_else(Utc::now));
            println!("{}", serde_json::to_string_pretty(&selection)?);
        }
    }

    if let Some(handle) = metrics_handle {
        eprintln!("{}", handle.render());
    }
    Ok(())
}

fn replay(
    config: AppConfig,
    customers_path: &PathBuf,
    events_path: &PathBuf,
    signups: &[String],
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let customers: Vec<Customer> = serde_json::from_str(
        &fs::read_to_string(customers_path)
            .with_context(|| format!("reading {}", customers_path.display()))?,
    )
    .context("parsing customers")?;

    let directory = Arc::new(InMemoryCustomerDirectory::new());
    for customer in &customers {
        directory.insert(customer.clone())?;
    }
    let engine = StorefrontEngine::new(config, directory, noop_sink())?;

    for signup in signups {
        let (id, code) = match signup.split_once(':') {
            Some((id, code)) => (id, Some(code)),
            None => (signup.as_str(), None),
        };
        let id: Uuid = id.parse().with_context(|| format!("bad customer id {id}"))?;
        if let Err(e) = engine.signup(id, code, now) {
            error!(customer_id = %id, error = %e, "Signup rejected");
        }
    }

    let reader = BufReader::new(
        fs::File::open(events_path).with_context(|| format!("opening {}", events_path.display()))?,
    );
    let (mut applied, mut rejected) = (0usize, 0usize);
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event: OrderEvent = serde_json::from_str(&line)
            .with_context(|| format!("line {}: invalid event", line_no + 1))?;
        match engine.handle(&event, now) {
            Ok(outcome) => {
                applied += 1;
                println!("{}", serde_json::to_string(&outcome)?);
            }
            Err(e) if e.is_fatal() => {
                return Err(e).with_context(|| format!("event {}", event.event_id()));
            }
            Err(e) => {
                rejected += 1;
                warn!(event_id = %event.event_id(), error = %e, "Event rejected");
            }
        }
    }

    let expired = engine.expire_referrals(now);
    info!(applied, rejected, expired = expired.len(), "Replay finished");

    let reports: Vec<CustomerReport> = customers
        .iter()
        .map(|c| {
            let account = engine.ledger().account_for_customer(c.id);
            CustomerReport {
                customer_id: c.id,
                email: c.email.clone(),
                level: account.as_ref().map(|a| a.level),
                tier: account
                    .as_ref()
                    .and_then(|a| engine.ledger().tiers().get(a.level))
                    .map(|t| t.name.clone()),
                balance: account.and_then(|a| engine.ledger().balance(a.id).ok()),
                referrals: engine.referrals().earnings(c.id),
            }
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}
