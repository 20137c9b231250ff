use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use strum_macros::Display;
use tokio::select;
use tokio::sync::{watch, RwLock};
use tokio_tungstenite::connect_async;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use tungstenite::Message;

use portfolio_dashboard::commands::run_commands;
use portfolio_dashboard::config::{Config, PositionSeed};
use portfolio_dashboard::price::{
    exchange, ExchangePriceProvider, PriceProvider, SimulatedPriceProvider,
};
use portfolio_dashboard::scheduler::RefreshScheduler;
use portfolio_dashboard::state::State;
use portfolio_dashboard::ticker::Ticker;
use portfolio_dashboard::tui::app::App;
use portfolio_dashboard::*;

#[derive(Parser, Debug)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(ValueEnum, Display, Clone, Copy, Debug)]
#[strum(serialize_all = "lowercase")]
enum ProviderKind {
    Exchange,
    Simulated,
}

#[derive(clap::Args, Debug)]
struct ProviderArgs {
    #[arg(long, env = "DASHBOARD_PROVIDER", default_value_t = ProviderKind::Simulated)]
    provider: ProviderKind,
    #[arg(long, env = "DASHBOARD_ENDPOINT", default_value = exchange::ENDPOINT)]
    endpoint: String,
    #[arg(long, env = "DASHBOARD_QUOTE", default_value = "USDT")]
    quote: String,
    /// Seed of the simulated market
    #[arg(long, env = "DASHBOARD_SEED")]
    seed: Option<u64>,
}

impl ProviderArgs {
    fn simulated(&self, seeds: &[PositionSeed]) -> SimulatedPriceProvider {
        seeds.iter().fold(
            SimulatedPriceProvider::new(self.seed.unwrap_or_else(rand::random)),
            |provider, seed| match Ticker::try_from(&seed.ticker) {
                Ok(ticker) => provider.with_price(ticker, seed.buy_price),
                Err(_) => provider,
            },
        )
    }

    fn exchange(&self) -> Result<ExchangePriceProvider> {
        ExchangePriceProvider::new(&self.endpoint, &self.quote)
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the refresh engine and the dashboard server
    Start {
        /// Seconds between two refreshes
        #[arg(long, env = "DASHBOARD_INTERVAL", default_value = "10")]
        interval: u64,
        /// TICKER:SHARES:BUY_PRICE
        #[arg(long = "position", env = "DASHBOARD_POSITIONS", value_delimiter = ',')]
        positions: Vec<PositionSeed>,
        #[arg(long, env = "DASHBOARD_FETCH_TIMEOUT", default_value = "5")]
        fetch_timeout: u64,
        #[arg(long, env = "DASHBOARD_SERVER_ADDRESS", default_value = "127.0.0.1:5555")]
        server_address: String,
        #[command(flatten)]
        provider: ProviderArgs,
    },
    /// Terminal dashboard connected to a running engine
    Tui {
        #[arg(long, env = "DASHBOARD_SERVER_ADDRESS", default_value = "127.0.0.1:5555")]
        server_address: String,
    },
    /// Print current prices once
    Quote {
        #[arg(required = true)]
        tickers: Vec<String>,
        #[command(flatten)]
        provider: ProviderArgs,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // the terminal belongs to the dashboard while it runs
    let default_filter = match args.command {
        Some(Commands::Tui { .. }) => String::from("off"),
        _ => format!(
            "{}=debug,portfolio_dashboard=debug,tower_http=debug,reqwest=debug",
            env!("CARGO_CRATE_NAME")
        ),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(fmt::layer())
        .init();

    let res = match args.command {
        Some(Commands::Start {
            interval,
            positions,
            fetch_timeout,
            server_address,
            provider,
        }) => {
            let config = Config::default()
                .refresh_interval(Duration::from_secs(interval.max(1)))
                .fetch_timeout(Duration::from_secs(fetch_timeout.max(1)))
                .seed_positions(positions);
            match provider.provider {
                ProviderKind::Exchange => match provider.exchange() {
                    Ok(exchange) => run_start(exchange, config, server_address).await,
                    Err(err) => Err(err),
                },
                ProviderKind::Simulated => {
                    let simulated = provider.simulated(&config.seed_positions);
                    run_start(simulated, config, server_address).await
                }
            }
        }
        Some(Commands::Tui { server_address }) => run_tui(server_address).await,
        Some(Commands::Quote { tickers, provider }) => match provider.provider {
            ProviderKind::Exchange => match provider.exchange() {
                Ok(exchange) => run_quote(exchange, tickers).await,
                Err(err) => Err(err),
            },
            ProviderKind::Simulated => run_quote(provider.simulated(&[]), tickers).await,
        },
        None => Ok(()),
    };

    if let Err(err) = res {
        error!("{:#}", err);
    }
}

async fn run_quote<P: PriceProvider>(provider: P, tickers: Vec<String>) -> Result<()> {
    for ticker in tickers {
        let ticker = Ticker::try_from(&ticker)?;
        match provider.fetch(&ticker).await {
            Ok(price) => info!("{} : {}", ticker, price.to_string().yellow()),
            Err(err) => warn!("{}", err),
        }
    }
    Ok(())
}

async fn run_start<P>(provider: P, config: Config, server_address: String) -> Result<()>
where
    P: PriceProvider + Send + Sync + 'static,
{
    let state = Arc::from(RwLock::from(State::with_seeds(&config.seed_positions)?));

    let (tx_app, _) = tokio::sync::broadcast::channel::<AppEvent>(1000);
    let (tx_cmd, rx_cmd) = tokio::sync::mpsc::channel::<AppCommandEvent>(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let scheduler = RefreshScheduler::new(state.clone(), provider, tx_app.clone(), &config);

    tokio::task::spawn(run_commands(
        state.clone(),
        scheduler.trigger(),
        tx_app.clone(),
        rx_cmd,
    ));

    tokio::task::spawn({
        let state = state.clone();
        async move { print_overview(state).await }
    });

    let scheduler_task = tokio::task::spawn(scheduler.run(shutdown_rx));

    let server_task = tokio::task::spawn({
        let state = state.clone();
        let tx_app = tx_app.clone();
        async move { server::start(server_address, state, tx_app, tx_cmd).await }
    });

    info!("{}", "STARTING DASHBOARD ENGINE".green());

    let res = select! {
        res = server_task => match res {
            Ok(res) => res,
            Err(err) => Err(err.into()),
        },
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    };

    let _ = shutdown_tx.send(true);
    let _ = scheduler_task.await;

    res
}

async fn print_overview(state: Arc<RwLock<State>>) {
    loop {
        {
            let state = state.read().await;
            info!("{}", state.portfolio);
            if let Some(snapshot) = &state.last_snapshot {
                let gain = snapshot.total_gain_loss().round_dp(2);
                info!(
                    "total {} ({}) over {} refreshes",
                    snapshot.total_value.round_dp(2).to_string().yellow(),
                    if gain < Decimal::ZERO {
                        gain.to_string().red()
                    } else {
                        gain.to_string().green()
                    },
                    state.history.len()
                );
            }
        }
        tokio::time::sleep(Duration::from_secs(60)).await;
    }
}

async fn run_tui(server_address: String) -> Result<()> {
    let (tx, rx) = tokio::sync::mpsc::channel::<AppEvent>(100);
    let (tx_cmd, mut rx_cmd) = tokio::sync::mpsc::channel::<AppCommandEvent>(100);
    let mut app = App::new(rx, tx_cmd);

    let ws_client_task = tokio::task::spawn(async move {
        // (re)connect loop
        loop {
            let stream;
            // wait for server
            loop {
                let url = format!("ws://{}/ws", server_address);
                if let Ok(res) = connect_async(url).await {
                    stream = res.0;
                    break;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }

            let tx = tx.clone();

            let (mut write, mut read) = stream.split();

            loop {
                select! {
                    msg = read.next() => {
                        match msg {
                            Some(Ok(Message::Text(msg))) => {
                                if let Ok(event) = serde_json::de::from_slice::<AppEvent>(msg.as_bytes()) {
                                    let _ = tx.send(event).await;
                                }
                            },
                            Some(Ok(Message::Close(_))) | None => {
                                break;
                            }
                            _ => {}
                        }
                    }
                    Some(cmd) = rx_cmd.recv() => {
                        if let Ok(cmd) = serde_json::ser::to_string(&cmd) {
                            let _ = write.send(Message::Text(cmd.into())).await;
                        }
                    }
                }
            }

            // connection closed by server, wait before reconnecting
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    });

    let app_task = tokio::task::spawn(async move { app.run().await });

    let res = select! {
        res = app_task => res.map_err(anyhow::Error::from).and_then(|res| res),
        _ = ws_client_task => Ok(()),
    };

    ratatui::restore();

    res
}
