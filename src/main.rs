//! Intraday trading engine entry point.
//!
//! `scan` runs one scanner cycle and reports candidates; `run` drives the
//! full pipeline in paper or live mode; `status` prints the journaled risk
//! state for today.

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use orb_trader::config::Config;
use orb_trader::exchange::{ExchangeClient, ExecutionClient, MarketData, PaperExchange};
use orb_trader::execution::{ExecutionOutcome, OrderExecutor};
use orb_trader::notify::{Notifier, NotifyEvent};
use orb_trader::persistence::RiskJournal;
use orb_trader::risk::{RiskManager, RiskVerdict};
use orb_trader::scanner::Scanner;
use orb_trader::session::SessionClock;
use orb_trader::signals::SignalEngine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Intraday trading engine CLI
#[derive(Parser)]
#[command(name = "orb-trader")]
#[command(version, about = "Rule-based intraday momentum trading engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scan cycle and report candidates without trading
    Scan,

    /// Run the full trading loop
    Run {
        /// Trading mode
        #[arg(long, value_enum, default_value = "paper")]
        mode: TradingMode,
    },

    /// Show journaled risk state for today
    Status {
        /// Path to the SQLite risk journal
        #[arg(short, long, default_value = "data/risk_journal.db")]
        db: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TradingMode {
    Paper,
    Live,
}

/// Per-process counters for the status log.
#[derive(Debug, Default)]
struct AppMetrics {
    scan_count: u64,
    candidates_seen: u64,
    intents: u64,
    risk_rejections: u64,
    entries: u64,
    exits: u64,
    errors: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_logging()?;

    match cli.command {
        Commands::Scan => run_scan().await,
        Commands::Run { mode } => run_trading(mode).await,
        Commands::Status { db } => show_status(&db),
    }
}

fn init_logging() -> Result<tracing_appender::non_blocking::WorkerGuard> {
    let file_appender = tracing_appender::rolling::daily("logs", "orb-trader.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    Ok(guard)
}

/// Scan-only mode: one cycle, candidates reported, nothing else constructed.
async fn run_scan() -> Result<()> {
    let config = Config::load()?;
    config.validate()?;

    let clock = SessionClock::new(&config.session)?;
    let client: Arc<dyn MarketData> = Arc::new(ExchangeClient::new(&config.exchange)?);
    let scanner = Scanner::new(
        client,
        config.scanner.clone(),
        config.exchange.max_concurrent_requests,
    );

    let report = scanner
        .scan(clock.session_open(Utc::now()))
        .await
        .map_err(|e| anyhow::anyhow!("scan failed: {e}"))?;

    info!(
        scanned = report.scanned,
        qualified = report.candidates.len(),
        "Scan cycle complete"
    );
    for (rank, candidate) in report.candidates.iter().enumerate() {
        let f = &candidate.features;
        info!(
            rank = rank + 1,
            symbol = %candidate.symbol,
            score = %f.score,
            rvol = %f.rvol,
            rs = %f.rs,
            trend = f.trend,
            spread_bp = %f.spread_bp,
            "Candidate"
        );
    }

    Ok(())
}

fn show_status(db: &str) -> Result<()> {
    let journal = RiskJournal::new(db)?;
    let today = Utc::now().date_naive();

    match journal.load_state(today)? {
        Some(state) => {
            info!(
                date = %state.session_date,
                equity = %state.equity,
                daily_pnl = %state.daily_realized_pnl,
                halted = state.trading_halted,
                trades = state.trades_today,
                losing = state.losing_trades_today,
                journaled_trades = journal.trade_count(today)?,
                "Risk state"
            );
            for (symbol, losses) in &state.consecutive_losses {
                if *losses > 0 {
                    info!(%symbol, consecutive_losses = losses, "Loss streak");
                }
            }
        }
        None => info!(date = %today, "No journaled state for today"),
    }

    Ok(())
}

async fn run_trading(mode: TradingMode) -> Result<()> {
    // Fatal configuration errors abort here, before the loop begins
    let config = Config::load()?;
    config.validate()?;

    info!(?mode, "Starting trading engine");
    if mode == TradingMode::Live {
        warn!("LIVE TRADING MODE - real money at risk");
        anyhow::ensure!(
            !config.exchange.api_key.is_empty() && !config.exchange.secret_key.is_empty(),
            "live mode requires API credentials"
        );
    }

    let clock = SessionClock::new(&config.session)?;
    let rest_client = Arc::new(ExchangeClient::new(&config.exchange)?);
    let market_data: Arc<dyn MarketData> = rest_client.clone();

    // Paper mode swaps only the execution capability; everything downstream
    // of the risk gate is identical.
    let paper = Arc::new(PaperExchange::new(
        config.execution.slippage_bp,
        config.execution.fee_rate,
    ));
    let execution: Arc<dyn ExecutionClient> = match mode {
        TradingMode::Paper => paper.clone(),
        TradingMode::Live => rest_client.clone(),
    };

    let scanner = Scanner::new(
        market_data.clone(),
        config.scanner.clone(),
        config.exchange.max_concurrent_requests,
    );
    let mut signal_engine = SignalEngine::new(config.signals.clone())?;
    let mut executor = OrderExecutor::new(execution, config.execution.clone());

    let journal = RiskJournal::new(&config.database_path)?;
    let mut risk = RiskManager::new(
        config.risk.clone(),
        clock.session_date(Utc::now()),
        config.risk.starting_equity,
        Some(journal),
    );

    let notifier = Notifier::new(&config.notify);
    let mut metrics = AppMetrics::default();

    // Cooperative shutdown: finish the current cycle, leave open orders as-is
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = shutdown.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        shutdown_flag.store(true, Ordering::SeqCst);
    });

    let scan_interval = Duration::from_secs(config.session.scan_interval_secs);
    let idle_interval = Duration::from_secs(config.session.idle_interval_secs);
    let mut in_window = false;

    info!("Entering control loop");
    while !shutdown.load(Ordering::SeqCst) {
        let now = Utc::now();
        risk.start_session(clock.session_date(now));

        if !clock.in_window(now) {
            if in_window {
                in_window = false;
                signal_engine.on_session_end();
                let state = risk.state();
                info!(
                    daily_pnl = %state.daily_realized_pnl,
                    trades = state.trades_today,
                    "Session window closed"
                );
                notifier.notify(NotifyEvent::SessionStop {
                    date: state.session_date.to_string(),
                    daily_pnl: state.daily_realized_pnl,
                    trades: state.trades_today,
                });
            }
            sleep_unless_shutdown(idle_interval, &shutdown).await;
            continue;
        }

        if !in_window {
            in_window = true;
            let state = risk.state();
            info!(date = %state.session_date, equity = %state.equity, "Session window open");
            notifier.notify(NotifyEvent::SessionStart {
                date: state.session_date.to_string(),
                equity: state.equity,
            });
        }

        run_cycle(
            &scanner,
            &mut signal_engine,
            &mut risk,
            &mut executor,
            &clock,
            &notifier,
            &market_data,
            mode,
            &paper,
            &config,
            &mut metrics,
        )
        .await;

        if metrics.scan_count % 10 == 0 {
            let state = risk.state();
            info!(
                scans = metrics.scan_count,
                candidates = metrics.candidates_seen,
                intents = metrics.intents,
                entries = metrics.entries,
                exits = metrics.exits,
                risk_rejections = metrics.risk_rejections,
                errors = metrics.errors,
                equity = %state.equity,
                daily_pnl = %state.daily_realized_pnl,
                halted = state.trading_halted,
                "Status"
            );
        }

        sleep_unless_shutdown(scan_interval, &shutdown).await;
    }

    info!(
        scans = metrics.scan_count,
        entries = metrics.entries,
        exits = metrics.exits,
        open_positions = executor.open_positions(),
        "Stopped; open orders left untouched"
    );

    Ok(())
}

/// One full pipeline cycle: scan, manage exits, evaluate signals, gate,
/// execute. Feature computation through risk decisions run single-threaded
/// and in order; only the snapshot fetches inside the scanner are parallel.
#[allow(clippy::too_many_arguments)]
async fn run_cycle(
    scanner: &Scanner,
    signal_engine: &mut SignalEngine,
    risk: &mut RiskManager,
    executor: &mut OrderExecutor,
    clock: &SessionClock,
    notifier: &Notifier,
    market_data: &Arc<dyn MarketData>,
    mode: TradingMode,
    paper: &Arc<PaperExchange>,
    config: &Config,
    metrics: &mut AppMetrics,
) {
    let now = Utc::now();
    metrics.scan_count += 1;

    let report = match scanner.scan(clock.session_open(now)).await {
        Ok(report) => report,
        Err(e) => {
            // A failed cycle is skipped, never fatal
            error!(error = %e, "Scan cycle failed");
            metrics.errors += 1;
            return;
        }
    };
    metrics.candidates_seen += report.candidates.len() as u64;

    if mode == TradingMode::Paper {
        for candidate in &report.candidates {
            paper
                .update_price(&candidate.symbol, candidate.snapshot.price)
                .await;
        }
        // Markets holding positions still need price marks after they drop
        // off the shortlist, or their brackets would never trigger.
        for symbol in executor.position_symbols() {
            if report.candidates.iter().any(|c| c.symbol == symbol) {
                continue;
            }
            match market_data
                .get_candles(&symbol, config.scanner.candle_unit_minutes, 2)
                .await
            {
                Ok(candles) => {
                    if let Some(last) = candles.last() {
                        paper.update_price(&symbol, last.close).await;
                    }
                }
                Err(e) => warn!(%symbol, error = %e, "Price refresh for open position failed"),
            }
        }
    }

    // Exits first: fill accounting is atomic per fill and strictly ordered
    for event in executor.manage_positions().await {
        metrics.exits += 1;
        let halted_now = risk.on_position_closed(&event);
        signal_engine.on_position_closed(&event.symbol);
        notifier.notify(NotifyEvent::TradeClosed {
            symbol: event.symbol.clone(),
            strategy: event.strategy.to_string(),
            exit_price: event.exit_price,
            pnl: event.pnl,
            reason: format!("{:?}", event.reason),
        });
        if halted_now {
            notifier.notify(NotifyEvent::RiskHalt {
                daily_pnl: risk.state().daily_realized_pnl,
            });
        }
    }

    signal_engine.sync_candidates(&report.candidates);

    if risk.state().trading_halted {
        return;
    }

    let now_local = clock.to_local(now);
    for candidate in &report.candidates {
        if executor.has_position(&candidate.symbol) {
            continue;
        }

        let Some(intent) = signal_engine.evaluate(candidate, now_local) else {
            continue;
        };
        metrics.intents += 1;

        match risk.assess(&intent) {
            RiskVerdict::Rejected(reason) => {
                // A risk rejection is a decision, not an error
                info!(symbol = %intent.symbol, %reason, "Intent rejected by risk gate");
                metrics.risk_rejections += 1;
                signal_engine.mark_invalidated(&intent.symbol);
            }
            RiskVerdict::Approved(order) => match executor.execute(&order).await {
                ExecutionOutcome::Entered {
                    symbol,
                    fill_price,
                    quantity,
                    ..
                } => {
                    metrics.entries += 1;
                    signal_engine.mark_active(&symbol);
                    notifier.notify(NotifyEvent::TradeOpened {
                        symbol,
                        strategy: order.intent.strategy.to_string(),
                        direction: format!("{:?}", order.intent.direction),
                        entry_price: fill_price,
                        quantity,
                    });
                }
                ExecutionOutcome::Failed {
                    symbol,
                    reason,
                    retryable,
                } => {
                    error!(%symbol, %reason, retryable, "Intent execution failed");
                    metrics.errors += 1;
                    signal_engine.mark_invalidated(&symbol);
                }
            },
        }
    }
}

/// Sleep in short slices so a shutdown request is honored promptly.
async fn sleep_unless_shutdown(total: Duration, shutdown: &Arc<AtomicBool>) {
    let slice = Duration::from_millis(500);
    let mut remaining = total;
    while remaining > Duration::ZERO && !shutdown.load(Ordering::SeqCst) {
        let step = remaining.min(slice);
        tokio::time::sleep(step).await;
        remaining = remaining.saturating_sub(step);
    }
}
