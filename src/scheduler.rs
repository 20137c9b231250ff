use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::Utc;
use colored::Colorize;
use futures::{future::join_all, FutureExt};
use itertools::Itertools;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum_macros::Display;
use tokio::{
    sync::{broadcast::Sender, watch, Notify, RwLock},
    task::JoinHandle,
    time::{timeout, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};

use crate::{
    config::Config,
    error::{PriceUnavailable, UnavailableReason},
    price::PriceProvider,
    state::{State, StateEvent},
    ticker::Ticker,
    valuation::{value_portfolio, PortfolioSnapshot},
    AppEvent,
};

#[derive(Display, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Refreshing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RefreshOutcome {
    Completed(PortfolioSnapshot),
    /// Another refresh was already in flight.
    Coalesced,
}

/// Holds the in-flight flag for the lifetime of one refresh, including when
/// the refresh future is dropped half way.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Wakes the scheduler outside of its interval. Triggers issued while a
/// wake-up is pending collapse into one.
#[derive(Clone, Debug, Default)]
pub struct RefreshTrigger(Arc<Notify>);

impl RefreshTrigger {
    pub fn trigger(&self) {
        self.0.notify_one();
    }

    async fn notified(&self) {
        self.0.notified().await
    }
}

pub struct RefreshScheduler<P> {
    state: Arc<RwLock<State>>,
    provider: Arc<P>,
    tx_app: Sender<AppEvent>,
    refresh_interval: Duration,
    fetch_timeout: Duration,
    in_flight: Arc<AtomicBool>,
    trigger: RefreshTrigger,
}

impl<P> Clone for RefreshScheduler<P> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            provider: self.provider.clone(),
            tx_app: self.tx_app.clone(),
            refresh_interval: self.refresh_interval,
            fetch_timeout: self.fetch_timeout,
            in_flight: self.in_flight.clone(),
            trigger: self.trigger.clone(),
        }
    }
}

impl<P> RefreshScheduler<P>
where
    P: PriceProvider + Send + Sync + 'static,
{
    pub fn new(
        state: Arc<RwLock<State>>,
        provider: P,
        tx_app: Sender<AppEvent>,
        config: &Config,
    ) -> Self {
        Self {
            state,
            provider: Arc::new(provider),
            tx_app,
            refresh_interval: config.refresh_interval,
            fetch_timeout: config.fetch_timeout,
            in_flight: Arc::new(AtomicBool::new(false)),
            trigger: RefreshTrigger::default(),
        }
    }

    pub fn status(&self) -> SchedulerState {
        if self.in_flight.load(Ordering::Acquire) {
            SchedulerState::Refreshing
        } else {
            SchedulerState::Idle
        }
    }

    pub fn trigger(&self) -> RefreshTrigger {
        self.trigger.clone()
    }

    /// Runs one refresh cycle unless one is already in flight.
    ///
    /// The store is copied under a read lock, prices for its distinct
    /// tickers are fetched concurrently, and the snapshot and its history
    /// entry are recorded together once every fetch has settled. Dropping
    /// the returned future before that point records nothing.
    pub async fn refresh(&self) -> RefreshOutcome {
        let Some(_in_flight) = InFlight::acquire(&self.in_flight) else {
            warn!("refresh already in flight, coalescing");
            return RefreshOutcome::Coalesced;
        };

        let positions = { self.state.read().await.portfolio.list() };
        let tickers: Vec<Ticker> = positions
            .iter()
            .map(|position| position.ticker.clone())
            .unique()
            .collect();

        let quotes = self.fetch_prices(&tickers).await;

        let snapshot = value_portfolio(
            &positions,
            |ticker| {
                quotes.get(ticker).cloned().unwrap_or_else(|| {
                    Err(PriceUnavailable::new(
                        ticker,
                        UnavailableReason::Request,
                        "not fetched",
                    ))
                })
            },
            Utc::now(),
        );

        let history = {
            let mut state = self.state.write().await;
            state.record_snapshot(snapshot.clone());
            state.history.as_sequence()
        };

        info!(
            "refreshed {} rows ({} stale) : total {}",
            snapshot.rows.len(),
            snapshot.stale_count(),
            snapshot.total_value.round_dp(2).to_string().yellow()
        );

        let _ = self.tx_app.send(AppEvent::State(StateEvent::Refreshed {
            snapshot: snapshot.clone(),
            history,
        }));

        RefreshOutcome::Completed(snapshot)
    }

    async fn fetch_prices(
        &self,
        tickers: &[Ticker],
    ) -> HashMap<Ticker, Result<Decimal, PriceUnavailable>> {
        let fetches: Vec<_> = tickers
            .iter()
            .map(|ticker| async move {
                let result = match timeout(self.fetch_timeout, self.provider.fetch(ticker)).await
                {
                    Ok(result) => result,
                    Err(_) => Err(PriceUnavailable::new(
                        ticker,
                        UnavailableReason::Timeout,
                        format!("no price after {:?}", self.fetch_timeout),
                    )),
                };
                match &result {
                    Ok(price) => debug!("{} : {}", ticker, price),
                    Err(err) => warn!("{}", err),
                }
                (ticker.clone(), result)
            })
            .collect();

        join_all(fetches).await.into_iter().collect()
    }

    /// Refreshes on every interval tick and trigger until `shutdown` turns
    /// true. Ticks arriving while a refresh runs are skipped. Triggers
    /// arriving while a refresh runs collapse into a single follow-up refresh
    /// once it finishes, since they usually follow a store change the running
    /// cycle did not see. An in-flight refresh is aborted on shutdown.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.refresh_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut task: Option<JoinHandle<RefreshOutcome>> = None;
        let mut pending = false;

        info!("scheduler started, refreshing every {:?}", self.refresh_interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.spawn_refresh(&mut task, "tick");
                }
                _ = self.trigger.notified() => {
                    if !self.spawn_refresh(&mut task, "trigger") {
                        pending = true;
                    }
                }
                finished = async {
                    match task.as_mut() {
                        Some(running) => running.await,
                        None => std::future::pending().await,
                    }
                }, if task.is_some() => {
                    task = None;
                    if let Err(err) = finished {
                        error!("refresh cycle failed : {}", err);
                    }
                    if pending {
                        pending = false;
                        self.spawn_refresh(&mut task, "coalesced trigger");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Some(task) = task.take() {
            if !task.is_finished() {
                info!("abandoning in-flight refresh");
            }
            task.abort();
        }
        info!("scheduler stopped");
    }

    /// Spawns a refresh unless one is still running. Returns whether it did.
    fn spawn_refresh(&self, task: &mut Option<JoinHandle<RefreshOutcome>>, cause: &str) -> bool {
        if let Some(running) = task.take() {
            if !running.is_finished() {
                warn!("refresh still in flight, {} coalesced", cause);
                *task = Some(running);
                return false;
            }
            if let Some(Err(err)) = running.now_or_never() {
                error!("refresh cycle failed : {}", err);
            }
        }

        debug!("refresh on {}", cause);
        let scheduler = self.clone();
        *task = Some(tokio::task::spawn(async move { scheduler.refresh().await }));
        true
    }
}
