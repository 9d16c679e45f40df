//! StratLab CLI.
//!
//! Commands:
//! - `backtest`: run one configuration and print its statistics
//! - `optimize`: grid search over one symbol/timeframe
//! - `walk-forward`: rolling train/test validation of one configuration
//! - `batch`: optimizer over symbols × timeframes
//! - `autopilot start|resume|stop|show|promote`: research sessions
//!
//! Settings come from an optional `stratlab.toml` (`--config`), then
//! `STRATLAB_WORKERS` / `STRATLAB_BRIDGE_URL`, then command-line flags.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{info, Level};

use stratlab_core::domain::Timeframe;
use stratlab_core::{StrategyConfig, StrategyFamily};
use stratlab_runner::batch::BatchPhase;
use stratlab_runner::config::{strategy_from_params, DataSource};
use stratlab_runner::export::{
    export_batch_csv, export_batch_json, export_notes_csv, export_optimizer_csv,
    export_optimizer_json, write_artifact,
};
use stratlab_runner::metrics::{compute_equity, compute_stats};
use stratlab_runner::{
    run_batch, run_optimizer, run_walk_forward, Autopilot, AutopilotConfig, BarProvider,
    BatchProgress, BatchRequest, BridgeProvider, CancelToken, CsvProvider, JsonFileStore,
    OptimizerOptions, ParamGrid, PromotionTarget, SessionStore, SortKey, StratlabConfig,
    SyntheticProvider,
};

#[derive(Parser)]
#[command(name = "stratlab", about = "StratLab strategy research engine")]
struct Cli {
    /// Path to a stratlab.toml config file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,

    #[command(flatten)]
    data: DataArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct DataArgs {
    /// Bar source: synthetic, csv or bridge.
    #[arg(long, global = true)]
    source: Option<String>,

    /// Directory of {SYMBOL}_{tf}.csv files.
    #[arg(long, global = true)]
    csv_dir: Option<PathBuf>,

    /// Base URL of the history bridge.
    #[arg(long, global = true)]
    bridge_url: Option<String>,

    /// Trailing calendar days of history.
    #[arg(long, global = true)]
    range_days: Option<u32>,
}

#[derive(Args, Clone)]
struct StrategyArgs {
    /// Strategy family, e.g. RANGE_BREAKOUT.
    #[arg(long)]
    family: Option<String>,

    /// Fixed parameter, name=value (repeatable).
    #[arg(long = "param")]
    params: Vec<String>,
}

#[derive(Args, Clone)]
struct GridArgs {
    /// Grid axis, name=values or name=start..end:step (repeatable).
    #[arg(long = "grid")]
    axes: Vec<String>,

    #[arg(long)]
    max_combos: Option<u64>,

    #[arg(long)]
    top_n: Option<usize>,

    /// net_r, expectancy, profit_factor, win_rate or max_drawdown.
    #[arg(long)]
    sort: Option<String>,

    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one configuration over one series.
    Backtest {
        #[arg(long, default_value = "EURUSD")]
        symbol: String,
        #[arg(long, default_value = "1h")]
        timeframe: String,
        #[command(flatten)]
        strategy: StrategyArgs,
    },
    /// Grid search over one symbol and timeframe.
    Optimize {
        #[arg(long, default_value = "EURUSD")]
        symbol: String,
        #[arg(long, default_value = "1h")]
        timeframe: String,
        #[command(flatten)]
        strategy: StrategyArgs,
        #[command(flatten)]
        grid: GridArgs,
        /// Write results to this .csv or .json file.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Rolling train/test validation.
    WalkForward {
        #[arg(long, default_value = "EURUSD")]
        symbol: String,
        #[arg(long, default_value = "1h")]
        timeframe: String,
        #[command(flatten)]
        strategy: StrategyArgs,
        #[arg(long)]
        train_days: Option<u32>,
        #[arg(long)]
        test_days: Option<u32>,
        #[arg(long)]
        step_days: Option<u32>,
        #[arg(long)]
        min_trades: Option<usize>,
    },
    /// Optimizer over symbols × timeframes.
    Batch {
        /// Comma-separated symbols.
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        /// Comma-separated timeframes.
        #[arg(long, value_delimiter = ',')]
        timeframes: Vec<String>,
        #[command(flatten)]
        strategy: StrategyArgs,
        #[command(flatten)]
        grid: GridArgs,
        /// Print apply requests for the best N runs.
        #[arg(long)]
        apply_top: Option<usize>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Research autopilot sessions.
    Autopilot {
        /// Session snapshot directory.
        #[arg(long, global = true)]
        session_dir: Option<PathBuf>,
        #[command(subcommand)]
        action: AutopilotAction,
    },
}

#[derive(Subcommand)]
enum AutopilotAction {
    Start {
        #[arg(long)]
        session: String,
        #[arg(long, default_value = "EURUSD")]
        symbol: String,
        #[arg(long, default_value = "1h")]
        timeframe: String,
        #[command(flatten)]
        strategy: StrategyArgs,
        /// Parameter space axes (repeatable).
        #[arg(long = "grid")]
        axes: Vec<String>,
        #[arg(long)]
        max_experiments: Option<u64>,
        #[arg(long)]
        seed: Option<u64>,
    },
    Resume {
        #[arg(long)]
        session: String,
    },
    /// Ask a running session to stop after its current iteration.
    Stop {
        #[arg(long)]
        session: String,
    },
    Show {
        #[arg(long)]
        session: Option<String>,
        /// Write the session's experiment notes as CSV.
        #[arg(long)]
        notes_csv: Option<PathBuf>,
    },
    Promote {
        #[arg(long)]
        session: String,
        /// "global" or a regime key such as high_vol/up/london.
        #[arg(long, default_value = "global")]
        target: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(if cli.verbose { Level::DEBUG } else { Level::INFO })
        .with_writer(std::io::stderr)
        .init();

    let mut config = match &cli.config {
        Some(path) => StratlabConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => StratlabConfig::default(),
    };
    config.apply_env().context("environment overrides")?;
    apply_data_args(&mut config, &cli.data)?;
    let provider = build_provider(&config)?;

    match cli.command {
        Commands::Backtest {
            symbol,
            timeframe,
            strategy,
        } => run_backtest_cmd(&config, provider.as_ref(), &symbol, &timeframe, &strategy),
        Commands::Optimize {
            symbol,
            timeframe,
            strategy,
            grid,
            out,
        } => run_optimize_cmd(
            &config,
            provider.as_ref(),
            &symbol,
            &timeframe,
            &strategy,
            &grid,
            out.as_deref(),
        ),
        Commands::WalkForward {
            symbol,
            timeframe,
            strategy,
            train_days,
            test_days,
            step_days,
            min_trades,
        } => {
            let mut wf = config.walk_forward.clone();
            wf.train_days = train_days.unwrap_or(wf.train_days);
            wf.test_days = test_days.unwrap_or(wf.test_days);
            wf.step_days = step_days.unwrap_or(wf.step_days);
            wf.min_trades = min_trades.unwrap_or(wf.min_trades);
            let tf = parse_timeframe(&timeframe)?;
            let base = base_config(&config, &strategy)?;
            let report = run_walk_forward(
                provider.as_ref(),
                &symbol,
                tf,
                config.data.range_days,
                &base,
                &wf,
            )?;
            print_json(&report.summary)
        }
        Commands::Batch {
            symbols,
            timeframes,
            strategy,
            grid,
            apply_top,
            out,
        } => run_batch_cmd(
            &config,
            provider.as_ref(),
            symbols,
            timeframes,
            &strategy,
            &grid,
            apply_top,
            out.as_deref(),
        ),
        Commands::Autopilot {
            session_dir,
            action,
        } => {
            let dir = session_dir.unwrap_or_else(|| config.data.session_dir.clone());
            let store = JsonFileStore::new(&dir)
                .with_context(|| format!("opening session dir {}", dir.display()))?;
            run_autopilot_cmd(&config, provider.as_ref(), &store, action)
        }
    }
}

// ─── Setup ──────────────────────────────────────────────────────────

fn apply_data_args(config: &mut StratlabConfig, args: &DataArgs) -> Result<()> {
    if let Some(source) = &args.source {
        config.data.source = match source.trim().to_ascii_lowercase().as_str() {
            "synthetic" => DataSource::Synthetic,
            "csv" => DataSource::Csv,
            "bridge" => DataSource::Bridge,
            other => bail!("unknown data source '{other}'. Valid: synthetic, csv, bridge"),
        };
    }
    if let Some(dir) = &args.csv_dir {
        config.data.csv_dir = dir.clone();
    }
    if let Some(url) = &args.bridge_url {
        config.data.bridge_url = Some(url.clone());
    }
    if let Some(days) = args.range_days {
        config.data.range_days = days;
    }
    Ok(())
}

fn build_provider(config: &StratlabConfig) -> Result<Box<dyn BarProvider>> {
    Ok(match config.data.source {
        DataSource::Synthetic => Box::new(SyntheticProvider::new()),
        DataSource::Csv => Box::new(CsvProvider::new(config.data.csv_dir.clone())),
        DataSource::Bridge => {
            let url = config
                .data
                .bridge_url
                .as_deref()
                .context("bridge source needs --bridge-url or STRATLAB_BRIDGE_URL")?;
            Box::new(BridgeProvider::new(url)?.with_limit(config.data.bridge_limit))
        }
    })
}

fn parse_timeframe(raw: &str) -> Result<Timeframe> {
    raw.parse::<Timeframe>()
        .with_context(|| format!("timeframe '{raw}'"))
}

fn family_of(config: &StratlabConfig, args: &StrategyArgs) -> Result<StrategyFamily> {
    match &args.family {
        Some(raw) => Ok(raw.parse::<StrategyFamily>()?),
        None => Ok(config.strategy.family),
    }
}

/// Config-file params (when the family matches) overlaid with `--param`.
fn base_config(config: &StratlabConfig, args: &StrategyArgs) -> Result<StrategyConfig> {
    let family = family_of(config, args)?;
    let mut params: BTreeMap<String, String> = if family == config.strategy.family {
        config.strategy.params.clone()
    } else {
        BTreeMap::new()
    };
    for assignment in &args.params {
        let (name, value) = assignment
            .split_once('=')
            .with_context(|| format!("--param '{assignment}' must be name=value"))?;
        params.insert(name.trim().to_string(), value.trim().to_string());
    }
    let pairs: Vec<(&String, &String)> = params.iter().collect();
    Ok(strategy_from_params(family, &pairs)?)
}

/// `--grid` axes, or the config file's grid when none are given.
fn param_grid(config: &StratlabConfig, family: StrategyFamily, axes: &[String]) -> Result<ParamGrid> {
    if !axes.is_empty() {
        return Ok(ParamGrid::parse_assignments(family, axes)?);
    }
    if family == config.strategy.family {
        Ok(config.strategy.grid()?)
    } else {
        Ok(ParamGrid::empty())
    }
}

fn optimizer_options(config: &StratlabConfig, args: &GridArgs) -> Result<OptimizerOptions> {
    let mut opts = config.optimizer.clone();
    opts.max_combos = args.max_combos.unwrap_or(opts.max_combos);
    opts.top_n = args.top_n.or(opts.top_n);
    opts.workers = args.workers.unwrap_or(opts.workers);
    if let Some(sort) = &args.sort {
        opts.sort_key = sort.parse::<SortKey>().map_err(anyhow::Error::msg)?;
    }
    Ok(opts)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn write_out(path: &Path, csv: impl FnOnce() -> Result<String>, json: impl FnOnce() -> Result<String>) -> Result<()> {
    let contents = match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => csv()?,
        Some("json") => json()?,
        _ => bail!("--out must end in .csv or .json: {}", path.display()),
    };
    let written = write_artifact(path, &contents)?;
    println!("Written: {}", written.display());
    Ok(())
}

// ─── Commands ───────────────────────────────────────────────────────

fn run_backtest_cmd(
    config: &StratlabConfig,
    provider: &dyn BarProvider,
    symbol: &str,
    timeframe: &str,
    strategy: &StrategyArgs,
) -> Result<()> {
    let tf = parse_timeframe(timeframe)?;
    let base = base_config(config, strategy)?;
    let series = provider
        .get_bars(symbol, tf, config.data.range_days)
        .with_context(|| format!("loading {symbol} {tf}"))?;
    let trades = stratlab_core::run(&series, &base, None)?;
    let stats = compute_stats(&trades);
    let equity = compute_equity(&trades);

    println!();
    println!("=== Backtest ===");
    println!("Series:         {} {} ({} bars)", symbol, tf, series.len());
    println!("Strategy:       {}", base.label());
    println!("Trades:         {} closed, {} open", stats.trade_count, stats.open_count);
    println!("Net R:          {:.2}", stats.net_r);
    println!("Expectancy:     {:.3}", stats.expectancy);
    println!("Win Rate:       {:.1}%", stats.win_rate * 100.0);
    match stats.profit_factor {
        Some(pf) => println!("Profit Factor:  {pf:.2}"),
        None => println!("Profit Factor:  n/a"),
    }
    println!("Max Drawdown:   {:.2}R", equity.max_drawdown);
    println!("Streaks:        {} win / {} loss", equity.max_win_streak, equity.max_loss_streak);
    println!();
    Ok(())
}

fn run_optimize_cmd(
    config: &StratlabConfig,
    provider: &dyn BarProvider,
    symbol: &str,
    timeframe: &str,
    strategy: &StrategyArgs,
    grid_args: &GridArgs,
    out: Option<&Path>,
) -> Result<()> {
    let tf = parse_timeframe(timeframe)?;
    let base = base_config(config, strategy)?;
    let grid = param_grid(config, base.family(), &grid_args.axes)?;
    let opts = optimizer_options(config, grid_args)?;
    let report = run_optimizer(provider, symbol, tf, config.data.range_days, &base, &grid, &opts)?;

    println!(
        "{} of {} combinations evaluated{}, {} skipped",
        report.combos_evaluated,
        report.combos_total,
        if report.truncated { " (truncated)" } else { "" },
        report.skipped.len()
    );
    println!("{:>4} {:>8} {:>8} {:>7} {:>6}  params", "rank", "net_r", "win%", "pf", "trades");
    for r in report.results.iter().take(20) {
        println!(
            "{:>4} {:>8.2} {:>7.1}% {:>7} {:>6}  {}",
            r.rank,
            r.stats.net_r,
            r.stats.win_rate * 100.0,
            r.stats
                .profit_factor
                .map_or_else(|| "n/a".to_string(), |pf| format!("{pf:.2}")),
            r.stats.trade_count,
            r.config.params_string()
        );
    }

    if let Some(path) = out {
        write_out(
            path,
            || export_optimizer_csv(&report, symbol, tf),
            || export_optimizer_json(&report),
        )?;
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_batch_cmd(
    config: &StratlabConfig,
    provider: &dyn BarProvider,
    symbols: Vec<String>,
    timeframes: Vec<String>,
    strategy: &StrategyArgs,
    grid_args: &GridArgs,
    apply_top: Option<usize>,
    out: Option<&Path>,
) -> Result<()> {
    let symbols = if symbols.is_empty() {
        config.batch.symbols.clone()
    } else {
        symbols
    };
    let timeframes = if timeframes.is_empty() {
        config.batch.timeframes.clone()
    } else {
        timeframes
            .iter()
            .map(|t| parse_timeframe(t))
            .collect::<Result<Vec<_>>>()?
    };
    let base = base_config(config, strategy)?;
    let grid = param_grid(config, base.family(), &grid_args.axes)?;
    let opts = optimizer_options(config, grid_args)?;

    let request = BatchRequest {
        symbols,
        timeframes,
        base_config: base,
        grid,
        range_days: config.data.range_days,
        max_combos: opts.max_combos,
        top_n: opts.top_n,
        sort_key: opts.sort_key,
        workers: grid_args.workers.unwrap_or(config.batch.workers),
    };
    let progress: &dyn Fn(&BatchProgress) = &|p| {
        if p.phase == BatchPhase::Running {
            info!(done = p.done, total = p.total, pct = p.pct, "batch progress");
        }
    };
    let session = run_batch(provider, &request, Some(progress), &CancelToken::new())?;

    println!(
        "{} ok, {} failed of {} pairs in {} ms",
        session.ok_count, session.fail_count, session.total_pairs, session.duration_ms
    );
    for run in session.ranked_by_net_r() {
        if let Some(best) = run.best() {
            println!(
                "{:<10} {:<4} net_r {:>8.2}  {}",
                run.symbol,
                run.timeframe,
                best.stats.net_r,
                best.config.params_string()
            );
        }
    }
    if let Some(n) = apply_top {
        print_json(&session.apply_requests(n))?;
    }
    if let Some(path) = out {
        write_out(path, || export_batch_csv(&session), || export_batch_json(&session))?;
    }
    Ok(())
}

fn run_autopilot_cmd(
    config: &StratlabConfig,
    provider: &dyn BarProvider,
    store: &JsonFileStore,
    action: AutopilotAction,
) -> Result<()> {
    let autopilot = Autopilot::new(provider, store);
    match action {
        AutopilotAction::Start {
            session,
            symbol,
            timeframe,
            strategy,
            axes,
            max_experiments,
            seed,
        } => {
            let base = base_config(config, &strategy)?;
            let space = param_grid(config, base.family(), &axes)?;
            let mut ap = AutopilotConfig::new(session, symbol, parse_timeframe(&timeframe)?, base, space);
            ap.range_days = config.data.range_days;
            ap.walk_forward = config.walk_forward.clone();
            ap.regime = config.regime.clone();
            ap.settings = config.autopilot.clone();
            ap.settings.max_experiments = max_experiments.unwrap_or(ap.settings.max_experiments);
            ap.settings.seed = seed.unwrap_or(ap.settings.seed);
            let result = autopilot.start(ap)?;
            print_session_summary(&result);
        }
        AutopilotAction::Resume { session } => {
            let result = autopilot.resume(&session)?;
            print_session_summary(&result);
        }
        AutopilotAction::Stop { session } => {
            autopilot.stop(&session)?;
            println!("Stop requested for {session}");
        }
        AutopilotAction::Show { session, notes_csv } => match session {
            None => {
                for id in store.list()? {
                    println!("{id}");
                }
            }
            Some(id) => {
                let s = store
                    .load(&id)?
                    .with_context(|| format!("no session {id}"))?;
                print_session_summary(&s);
                if let Some(path) = notes_csv {
                    let written = write_artifact(&path, &export_notes_csv(&s.notes)?)?;
                    println!("Written: {}", written.display());
                }
            }
        },
        AutopilotAction::Promote { session, target } => {
            let target: PromotionTarget = target.parse()?;
            let request = autopilot.promote(&session, target)?;
            print_json(&request)?;
        }
    }
    Ok(())
}

fn print_session_summary(s: &stratlab_runner::ResearchSession) {
    println!();
    println!("=== Session {} ===", s.session_id);
    println!(
        "Status:         {:?}{}",
        s.status,
        s.stop_reason.map(|r| format!(" ({r})")).unwrap_or_default()
    );
    println!(
        "Experiments:    {} of {} ({} duplicates skipped)",
        s.counters.experiments_run, s.counters.experiments_planned, s.counters.duplicates_skipped
    );
    if let Some(best) = &s.global_best {
        println!(
            "Global best:    {} score {:.3} [{}] {}",
            best.experiment_id,
            best.score,
            best.decision,
            best.config.params_string()
        );
    }
    for (regime, champ) in &s.champions {
        println!(
            "  {:<28} {} edge {:.3} n={} [{}]",
            regime.to_string(),
            champ.experiment_id,
            champ.score,
            champ.sample_count,
            champ.decision
        );
    }
    println!();
}
