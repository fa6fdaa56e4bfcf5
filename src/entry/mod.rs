use std::ffi::OsString;
use std::path::Path;
use std::sync::Arc;

use clap::{CommandFactory, FromArgMatches};
use tracing::{info, warn};

use crate::args::{ChainArgs, Cli, Command, DEFAULT_CONFIG_FILES, RunArgs, SearchArgs};
use crate::config::{
    ConfigFile, RunLoad, TargetSettings, Workload, load_config, resolve_chain, resolve_run,
    resolve_search, resolve_target,
};
use crate::correlation::{ChainReport, CorrelationEngine, StepChain, StepDispatcher};
use crate::error::{AppError, AppResult, ExecError, ValidationError};
use crate::exec::{ConcurrentExecutor, TaskFactory};
use crate::http::{HttpDispatcher, HttpTaskFactory};
use crate::metrics::MetricsAggregator;
use crate::params::{ParameterStore, Session};
use crate::rate::RateLimiter;
use crate::search::PerformanceSearch;
use crate::shutdown::{ShutdownReceiver, request_shutdown, shutdown_channel, wait_for_shutdown};
use crate::system::shutdown_handlers::setup_signal_shutdown_handler;
use crate::system::summary_output::{
    RunReport, chain_lines, render, run_lines, search_lines,
};

pub(crate) fn run() -> AppResult<()> {
    let Some(cli) = parse_args()? else {
        return Ok(());
    };

    crate::system::logger::init_logging(cli.common.verbose, cli.common.no_color);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::validation(ValidationError::RuntimeBuildFailed { source: err }))?;

    runtime.block_on(run_async(cli))
}

fn parse_args() -> AppResult<Option<Cli>> {
    let mut cmd = Cli::command();
    let raw_args: Vec<OsString> = std::env::args_os().collect();

    if matches!(raw_args.as_slice(), [] | [_]) {
        cmd.print_help()?;
        println!();
        if !has_default_config() {
            println!("No {} found in the current directory.", DEFAULT_CONFIG_FILES.join(" or "));
        }
        return Ok(None);
    }

    let matches = cmd.get_matches_from(raw_args);
    Ok(Some(Cli::from_arg_matches(&matches)?))
}

fn has_default_config() -> bool {
    DEFAULT_CONFIG_FILES
        .iter()
        .any(|path| Path::new(path).exists())
}

async fn run_async(cli: Cli) -> AppResult<()> {
    let config = load_config(cli.common.config.as_deref())?;
    let target = resolve_target(&cli.common, config.as_ref())?;

    let (shutdown_tx, shutdown_rx) = shutdown_channel();
    let signal_handle = setup_signal_shutdown_handler(&shutdown_tx);

    let session = Session::start(Arc::new(ParameterStore::new()));
    session.store().seed(target.vars.clone());
    let dispatcher = Arc::new(HttpDispatcher::new(&target.client)?);

    let result = match &cli.command {
        Command::Search(args) => {
            run_search(args, config.as_ref(), &target, dispatcher, &session, shutdown_rx).await
        }
        Command::Run(args) => {
            run_load(args, config.as_ref(), &target, dispatcher, &session, shutdown_rx).await
        }
        Command::Chain(args) => {
            run_chain(args, config.as_ref(), &target, dispatcher, &session, shutdown_rx).await
        }
    };

    request_shutdown(&shutdown_tx);
    if let Err(err) = signal_handle.await {
        warn!("Signal handler task failed: {}", err);
    }
    result
}

fn build_factory(
    target: &TargetSettings,
    dispatcher: Arc<HttpDispatcher>,
    session: &Session,
) -> AppResult<Arc<dyn TaskFactory>> {
    match target.workload()? {
        Workload::Requests(mix) => {
            let engine =
                CorrelationEngine::new(Arc::clone(session.store())).with_mode(target.unresolved);
            Ok(Arc::new(
                HttpTaskFactory::new(dispatcher, mix.clone(), engine)
                    .with_expected_status(target.expected_status),
            ))
        }
        Workload::Scenario(steps) => {
            let dispatcher: Arc<dyn StepDispatcher> = dispatcher;
            let chain = StepChain::new(steps.clone(), dispatcher)
                .map_err(AppError::correlation)?
                .with_unresolved_mode(target.unresolved);
            Ok(Arc::new(
                Arc::new(chain).task_factory(session.store().get_all()),
            ))
        }
    }
}

async fn run_search(
    args: &SearchArgs,
    config: Option<&ConfigFile>,
    target: &TargetSettings,
    dispatcher: Arc<HttpDispatcher>,
    session: &Session,
    shutdown_rx: ShutdownReceiver,
) -> AppResult<()> {
    let search_config = resolve_search(args, config)?;
    let search = PerformanceSearch::new(search_config)?.with_shutdown(shutdown_rx);
    let factory = build_factory(target, dispatcher, session)?;
    info!(
        "Searching {:?} axis from level {} up to {}",
        search.config().axis,
        search.config().initial_level,
        search.config().max_level
    );
    let outcome = search.find_max_throughput(factory).await?;
    println!("{}", render(&outcome, target.output, search_lines)?);
    Ok(())
}

async fn run_load(
    args: &RunArgs,
    config: Option<&ConfigFile>,
    target: &TargetSettings,
    dispatcher: Arc<HttpDispatcher>,
    session: &Session,
    shutdown_rx: ShutdownReceiver,
) -> AppResult<()> {
    let settings = resolve_run(args, config)?;
    let factory = build_factory(target, dispatcher, session)?;
    let limiter = settings
        .rate
        .map(RateLimiter::new)
        .transpose()
        .map_err(AppError::validation)?
        .map(Arc::new);

    let mut executor = ConcurrentExecutor::new(settings.executor)
        .map_err(AppError::validation)?
        .with_shutdown(shutdown_rx);
    if let Some(limiter) = limiter.as_ref() {
        executor = executor.with_limiter(Arc::clone(limiter));
    }

    let mut aggregator = MetricsAggregator::new();
    let results = match settings.load {
        RunLoad::Requests(count) => executor.submit(factory.as_ref(), count).await,
        RunLoad::Duration(duration) => executor.run_for(factory, duration).await,
    };
    aggregator.record_all(&results);
    aggregator.close();

    let summary = aggregator.summarize();
    let executor_stats = executor.stats();
    let limiter_stats = limiter.as_ref().map(|limiter| limiter.stats());
    let report = RunReport {
        summary: &summary,
        executor: &executor_stats,
        limiter: limiter_stats.as_ref(),
    };
    println!("{}", render(&report, target.output, run_lines)?);
    Ok(())
}

async fn run_chain(
    args: &ChainArgs,
    config: Option<&ConfigFile>,
    target: &TargetSettings,
    dispatcher: Arc<HttpDispatcher>,
    session: &Session,
    mut shutdown_rx: ShutdownReceiver,
) -> AppResult<()> {
    let settings = resolve_chain(args, config)?;
    let steps = config
        .and_then(|config| config.scenario.as_ref())
        .map(|scenario| scenario.steps.clone())
        .unwrap_or_default();
    if steps.is_empty() {
        return Err(AppError::validation(ValidationError::ScenarioMissingSteps));
    }

    let dispatcher: Arc<dyn StepDispatcher> = dispatcher;
    let chain = Arc::new(
        StepChain::new(steps, dispatcher)
            .map_err(AppError::correlation)?
            .with_policy(settings.on_failure)
            .with_unresolved_mode(target.unresolved),
    );
    let store = Arc::clone(session.store());
    let iterations = settings.iterations.get();

    let reports: Vec<ChainReport> = tokio::select! {
        reports = async {
            if iterations == 1 {
                vec![chain.run(store).await]
            } else {
                chain.run_parallel(store, iterations, settings.isolation).await
            }
        } => reports,
        () = wait_for_shutdown(&mut shutdown_rx) => {
            return Err(AppError::exec(ExecError::Cancelled));
        }
    };

    println!("{}", render(&reports, target.output, |reports| chain_lines(reports))?);
    let failed = reports.iter().filter(|report| !report.success).count();
    if failed > 0 {
        return Err(AppError::exec(ExecError::ChainFailed {
            failed,
            total: reports.len(),
        }));
    }
    Ok(())
}
