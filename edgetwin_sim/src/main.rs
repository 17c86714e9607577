//! EdgeTwin edge node CLI
//!
//! Runs the node in one of three modes:
//! - `demo`: real-time node, physical twin and drug twin on an in-process bus
//! - `serve`: real-time node on ZeroMQ sockets (feature `zmq`)
//! - `scenarios`: deterministic simulation scenarios on a virtual clock

use anyhow::Context as _;
use clap::{Parser, ValueEnum};
use edgetwin_core::{BootstrapListener, DrugCommand, EdgeConfig, SessionController, TickMessage};
use edgetwin_env::{Subscriber, TokioContext, TwinContext};
use edgetwin_sim::scenarios::ScenarioId;
use edgetwin_sim::{sample_bootstrap, DrugTwin, LocalBus, PhysicalTwin, ScenarioResult, ScenarioRunner};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Demo,
    Serve,
    Scenarios,
}

/// EdgeTwin tumor digital-twin edge node
#[derive(Parser, Debug)]
#[command(name = "edgetwin")]
#[command(about = "Run the EdgeTwin edge node or its simulation scenarios", long_about = None)]
struct Args {
    /// What to run
    #[arg(short, long, value_enum, default_value = "demo")]
    mode: Mode,

    /// Master seed (scenarios default to 42; demo/serve use entropy when unset)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Number of consecutive seeds to run scenarios with
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Tick rate in Hz (overrides the config file)
    #[arg(short, long)]
    tick_rate: Option<f64>,

    /// Run time in seconds (demo default 10, scenarios default 3, serve runs until Ctrl-C)
    #[arg(short, long)]
    duration: Option<f64>,

    /// JSON config file
    #[arg(short, long)]
    config: Option<String>,

    /// Scenario to run (handshake, late_joiner, duplicate_bootstrap, malformed_bootstrap,
    /// drug_response, transport_outage, cadence, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// ZeroMQ XPUB endpoint for ticks and status (serve mode)
    #[arg(long, default_value = "tcp://*:5556")]
    pub_endpoint: String,

    /// ZeroMQ SUB endpoint for bootstrap and drug commands (serve mode)
    #[arg(long, default_value = "tcp://127.0.0.1:5557")]
    sub_endpoint: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging (stderr, so --json output stays parseable)
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("failed to set tracing subscriber")?;

    let mut config = match &args.config {
        Some(path) => EdgeConfig::load(path).with_context(|| format!("loading config {}", path))?,
        None => EdgeConfig::default(),
    };
    if let Some(hz) = args.tick_rate {
        config = config.with_tick_rate(hz);
    }
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    config.validate()?;

    if !args.json {
        info!("EdgeTwin edge node v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    match args.mode {
        Mode::Scenarios => run_scenarios(&args, config),
        Mode::Demo => {
            let duration = Duration::from_secs_f64(args.duration.unwrap_or(10.0).max(0.0));
            tokio::runtime::Runtime::new()?.block_on(run_demo(config, duration))
        }
        Mode::Serve => {
            let duration = args.duration.map(|d| Duration::from_secs_f64(d.max(0.0)));
            tokio::runtime::Runtime::new()?.block_on(run_serve(
                config,
                duration,
                &args.pub_endpoint,
                &args.sub_endpoint,
            ))
        }
    }
}

// =============================================================================
// SCENARIOS
// =============================================================================

fn run_scenarios(args: &Args, config: EdgeConfig) -> anyhow::Result<()> {
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            eprintln!(
                "Available scenarios: {}, all",
                ScenarioId::all().iter().map(|s| s.name()).collect::<Vec<_>>().join(", ")
            );
            std::process::exit(1);
        })]
    };

    let base_seed = config.seed.unwrap_or(42);
    let tick_rate = config.tick_rate_hz;
    let duration = args.duration.unwrap_or(3.0);

    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = ScenarioRunner::new(seed)
            .with_config(config.clone())
            .with_tick_rate(tick_rate)
            .with_duration(duration);

        for scenario in &scenarios {
            let result = runner.run(*scenario);

            if !args.json {
                if result.passed {
                    info!("✓ {} (seed={}) PASSED - {}", scenario.name(), seed, scenario.description());
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            if !result.passed {
                failed_count += 1;
            }
            all_results.push(result);
        }
    }

    let total = all_results.len();
    let passed = total - failed_count;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "ticks": r.total_ticks,
                    "time_secs": r.final_time_secs,
                    "metrics": r.metrics,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
    Ok(())
}

// =============================================================================
// DEMO
// =============================================================================

async fn run_demo(config: EdgeConfig, duration: Duration) -> anyhow::Result<()> {
    let context = TokioContext::shared(config.seed);
    let bus = LocalBus::new();

    let observer = bus.endpoint();
    observer.subscribe(&config.channels.ticks).await?;

    let endpoint = Arc::new(bus.endpoint());
    let controller = Arc::new(SessionController::new(
        Arc::clone(&context),
        Arc::clone(&endpoint),
        config.clone(),
    )?);
    let listener = Arc::new(BootstrapListener::new(Arc::clone(&controller)));
    let listener_task = {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move { listener.run(endpoint.as_ref()).await })
    };

    let twin = PhysicalTwin::new(Arc::clone(&context), bus.endpoint(), config.channels.clone());
    twin.handshake(Duration::from_secs(5), sample_bootstrap("DEMO-001", 0.05))
        .await?;

    let drug = DrugTwin::new(Arc::clone(&context), bus.endpoint(), config.channels.drug.clone())
        .with_dose(context.now() + duration / 2, DrugCommand::all_sites(0.5));
    let drug_task = tokio::spawn(async move { drug.run().await });

    let report_every = config.tick_rate_hz.round().max(1.0) as u64;
    let mut received = 0u64;
    let deadline = tokio::time::sleep(duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received");
                break;
            }
            message = observer.recv() => {
                let Some(message) = message else { break };
                received += 1;
                match TickMessage::from_slice(&message.payload) {
                    Ok(tick) if received % report_every == 0 => {
                        for (site, state) in &tick.sites {
                            info!(
                                "  {:<6} r={:.4} cm  n={:.4}  drug={:.4}  {:?}",
                                site, state.radius, state.cellularity, state.drug_level, state.status
                            );
                        }
                    }
                    Ok(_) => debug!("Tick {} received", received),
                    Err(e) => warn!("Undecodable tick: {}", e),
                }
            }
        }
    }

    controller.shutdown();
    listener.announce_offline().await?;
    listener_task.await??;
    drug_task.abort();

    let stats = controller.stats();
    info!(
        "Demo finished: {} cycles, {} published, {} failed, {} overruns",
        stats.cycles, stats.published, stats.publish_failures, stats.overruns
    );
    Ok(())
}

// =============================================================================
// SERVE
// =============================================================================

#[cfg(feature = "zmq")]
async fn run_serve(
    config: EdgeConfig,
    duration: Option<Duration>,
    pub_endpoint: &str,
    sub_endpoint: &str,
) -> anyhow::Result<()> {
    use edgetwin_core::{ZmqPublisher, ZmqSubscriber};

    let context = TokioContext::shared(config.seed);
    let publisher = Arc::new(ZmqPublisher::bind(pub_endpoint)?);
    let subscriber = ZmqSubscriber::connect(sub_endpoint)?;

    let controller = Arc::new(SessionController::new(context, publisher, config)?);
    let listener = BootstrapListener::new(Arc::clone(&controller));

    let limit = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = listener.run(&subscriber) => result?,
        _ = tokio::signal::ctrl_c() => info!("Ctrl-C received"),
        _ = limit => debug!("Run time elapsed"),
    }

    controller.shutdown();
    listener.announce_offline().await?;
    // Let the socket thread flush OFFLINE before the process exits
    tokio::time::sleep(Duration::from_millis(200)).await;

    let stats = controller.stats();
    info!(
        "Node stopped: {} cycles, {} published, {} failed",
        stats.cycles, stats.published, stats.publish_failures
    );
    Ok(())
}

#[cfg(not(feature = "zmq"))]
async fn run_serve(
    _config: EdgeConfig,
    _duration: Option<Duration>,
    _pub_endpoint: &str,
    _sub_endpoint: &str,
) -> anyhow::Result<()> {
    anyhow::bail!("serve mode needs a transport; rebuild with `--features zmq`")
}
