//! Strata CLI entrypoint.
//!
//! This is the main entrypoint for the strata command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use strata::cli::{Cli, Commands, OutputFormatter, StateCommands};
use strata::config::{ConfigParser, ConfigValidator, StackConfig, StateBackend, find_config_file};
use strata::error::{Result, StrataError};
use strata::outputs::{OutputValue, outputs_to_json};
use strata::planner::{ExecutorOptions, Plan};
use strata::provider::build_provider;
use strata::reconciler::Reconciler;
use strata::state::{
    LocalStateStore, MemoryStateStore, S3StateStore, STATE_DIR, StateStore, generate_holder_id,
};

use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` takes precedence over the verbosity flag.
fn init_logging(verbose: bool, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<ExitCode> {
    let formatter = OutputFormatter::new(cli.output);
    let config = cli.config.as_ref();

    match cli.command {
        Commands::Init { path, force } => cmd_init(&path, force).map(|()| ExitCode::SUCCESS),
        Commands::Validate { warnings } => cmd_validate(config, warnings, &formatter),
        Commands::Plan { detailed } => cmd_plan(config, detailed, &formatter).await,
        Commands::Apply {
            yes,
            parallelism,
            outputs_file,
        } => cmd_apply(config, yes, parallelism, outputs_file.as_deref(), &formatter).await,
        Commands::Destroy { yes, parallelism } => cmd_destroy(config, yes, parallelism, &formatter).await,
        Commands::Outputs { name } => cmd_outputs(config, name.as_deref(), &formatter).await,
        Commands::State { command } => cmd_state(config, command, &formatter).await,
    }
}

/// Initialize a new stack.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing new Strata stack in: {}", path.display());

    let config_path = path.join("strata.yaml");
    let env_path = path.join(".env.example");
    let gitignore_path = path.join(".gitignore");

    // Check if files exist
    if !force && config_path.exists() {
        eprintln!("Stack file already exists: {}", config_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    // Create directory if needed
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }

    // Write stack template
    let config_template = include_str!("../templates/strata.yaml");
    std::fs::write(&config_path, config_template)?;
    eprintln!("Created: {}", config_path.display());

    // Write .env.example
    let env_template = include_str!("../templates/.env.example");
    std::fs::write(&env_path, env_template)?;
    eprintln!("Created: {}", env_path.display());

    // Write/update .gitignore
    let state_entry = format!("{STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        let has_env = existing.lines().any(|l| l.trim() == ".env");
        let has_state = existing.contains(STATE_DIR);
        if !has_env || !has_state {
            let mut file = std::fs::OpenOptions::new().append(true).open(&gitignore_path)?;
            writeln!(file, "\n# Strata")?;
            if !has_env {
                writeln!(file, ".env")?;
            }
            if !has_state {
                writeln!(file, "{state_entry}")?;
            }
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!(".env\n{state_entry}\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nStack initialized successfully!");
    eprintln!("Next steps:");
    eprintln!("  1. Copy .env.example to .env and set STRATA_SETTING_SSH_KEY_NAME");
    eprintln!("  2. Edit strata.yaml to describe your resources");
    eprintln!("  3. Run 'strata validate' to check the stack");
    eprintln!("  4. Run 'strata plan' to see what will change");
    eprintln!("  5. Run 'strata apply' to reconcile");

    Ok(())
}

/// Validate the stack file and build its graph.
fn cmd_validate(config_path: Option<&PathBuf>, show_warnings: bool, formatter: &OutputFormatter) -> Result<ExitCode> {
    let config_file = resolve_config_path(config_path)?;
    info!("Validating stack: {}", config_file.display());

    let config = load_config(&config_file)?;
    let result = ConfigValidator::new().check(&config);
    println!("{}", formatter.format_validation(&result, show_warnings));

    if !result.is_valid() {
        return Ok(ExitCode::FAILURE);
    }

    // References, settings and cycles are only checked by building the graph.
    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let provider = build_provider(&config.provider)?;
    let graph = Reconciler::new(&config, store, provider).build_graph()?;

    if !formatter.is_json() {
        eprintln!("Stack summary:");
        eprintln!("  Stack: {}", config.qualified_name());
        eprintln!("  Declared resources: {}", config.resources.len());
        eprintln!("  Graph nodes: {}", graph.len());
        eprintln!("  Outputs: {}", config.outputs.len());
    }

    Ok(ExitCode::SUCCESS)
}

/// Show the plan.
async fn cmd_plan(config_path: Option<&PathBuf>, detailed: bool, formatter: &OutputFormatter) -> Result<ExitCode> {
    let (config, store) = load_config_and_state(config_path).await?;
    let provider = build_provider(&config.provider)?;

    let reconciler = Reconciler::new(&config, store, provider);
    let plan = reconciler.plan().await?;

    println!("{}", formatter.format_plan(&plan, detailed));
    Ok(ExitCode::SUCCESS)
}

/// Apply the plan.
async fn cmd_apply(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    parallelism: Option<usize>,
    outputs_file: Option<&Path>,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (config, store) = load_config_and_state(config_path).await?;
    let provider = build_provider(&config.provider)?;

    let reconciler =
        Reconciler::new(&config, store, provider).with_options(executor_options(&config, parallelism));
    let plan = reconciler.plan().await?;

    if plan.is_empty() {
        eprintln!("No changes to apply.");
        print_outputs(&reconciler, outputs_file, formatter).await?;
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", formatter.format_plan(&plan, false));

    if !auto_approve && !confirm("Do you want to apply this plan? [y/N]: ", "y")? {
        eprintln!("Apply cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    run_plan(&reconciler, &plan, outputs_file, formatter).await
}

/// Destroy every resource recorded in state.
async fn cmd_destroy(
    config_path: Option<&PathBuf>,
    auto_approve: bool,
    parallelism: Option<usize>,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (config, store) = load_config_and_state(config_path).await?;
    let provider = build_provider(&config.provider)?;

    let reconciler =
        Reconciler::new(&config, store, provider).with_options(executor_options(&config, parallelism));
    let plan = reconciler.destroy_plan().await?;

    if plan.is_empty() {
        eprintln!("No resources to destroy.");
        return Ok(ExitCode::SUCCESS);
    }

    eprintln!("The following resources will be destroyed:");
    for action in &plan.actions {
        let id = action.resource_id.as_deref().unwrap_or("-");
        eprintln!("  - {} ({id})", action.resource_name);
    }

    if !auto_approve && !confirm("\nThis action is IRREVERSIBLE. Type 'destroy' to confirm: ", "destroy")? {
        eprintln!("Destruction cancelled.");
        return Ok(ExitCode::SUCCESS);
    }

    run_plan(&reconciler, &plan, None, formatter).await
}

/// Show outputs resolved from stored state.
async fn cmd_outputs(config_path: Option<&PathBuf>, name: Option<&str>, formatter: &OutputFormatter) -> Result<ExitCode> {
    let (config, store) = load_config_and_state(config_path).await?;
    let provider = build_provider(&config.provider)?;

    let mut outputs = Reconciler::new(&config, store, provider).outputs().await?;
    if let Some(name) = name {
        outputs.retain(|o| o.name == name);
        if outputs.is_empty() {
            return Err(StrataError::internal(format!("No output named '{name}'")));
        }
    }

    println!("{}", formatter.format_outputs(&outputs));
    Ok(ExitCode::SUCCESS)
}

/// State management commands.
async fn cmd_state(config_path: Option<&PathBuf>, command: StateCommands, formatter: &OutputFormatter) -> Result<ExitCode> {
    let (_config, store) = load_config_and_state(config_path).await?;

    match command {
        StateCommands::List => {
            let states = store.list().await?;
            println!("{}", formatter.format_state_list(&states));
        }
        StateCommands::Show { name } => match store.get(&name).await? {
            Some(state) => println!("{}", formatter.format_state_record(&state)),
            None => {
                eprintln!("No state recorded for '{name}'.");
                return Ok(ExitCode::FAILURE);
            }
        },
        StateCommands::Rm { name } => {
            if store.get(&name).await?.is_none() {
                eprintln!("No state recorded for '{name}'.");
                return Ok(ExitCode::FAILURE);
            }
            store.delete(&name).await?;
            eprintln!("Removed '{name}' from state. The resource itself was not deleted.");
        }
        StateCommands::Prune => {
            let mut pruned = 0_usize;
            for state in store.list().await? {
                if !state.is_live() {
                    debug!("Pruning tombstone {}", state.name);
                    store.delete(&state.name).await?;
                    pruned += 1;
                }
            }
            eprintln!("Pruned {pruned} record(s).");
        }
        StateCommands::Lock { holder } => {
            let holder = holder.unwrap_or_else(generate_holder_id);
            let lock = store.acquire_lock(&holder).await?;
            println!("{}", formatter.format_lock(Some(&lock)));
        }
        StateCommands::Unlock { lock_id, force } => {
            if force {
                match store.lock_info().await? {
                    Some(lock) => {
                        warn!("Force-releasing lock {} held by {}", lock.lock_id, lock.holder);
                        store.release_lock(&lock.lock_id).await?;
                        eprintln!("State forcefully unlocked.");
                    }
                    None => eprintln!("State is not locked."),
                }
            } else if let Some(id) = lock_id {
                store.release_lock(&id).await?;
                eprintln!("State unlocked.");
            } else {
                println!("{}", formatter.format_lock(store.lock_info().await?.as_ref()));
                eprintln!("Please provide --lock-id or use --force");
                return Ok(ExitCode::FAILURE);
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Executes a plan with Ctrl-C cancellation and prints the result.
async fn run_plan(
    reconciler: &Reconciler<'_>,
    plan: &Plan,
    outputs_file: Option<&Path>,
    formatter: &OutputFormatter,
) -> Result<ExitCode> {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight operations");
            let _ = cancel_tx.send(true);
        }
    });

    let result = reconciler.apply(plan, cancel_rx).await;
    signal.abort();
    let result = result?;

    println!("{}", formatter.format_report(&result.report));
    if !result.outputs.is_empty() {
        println!("{}", formatter.format_outputs(&result.outputs));
    }
    if let Some(path) = outputs_file {
        write_outputs_file(path, &result.outputs)?;
    }
    if !formatter.is_json() {
        eprintln!("{result}");
    }

    Ok(if result.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Prints current outputs and optionally writes them to a file.
async fn print_outputs(reconciler: &Reconciler<'_>, outputs_file: Option<&Path>, formatter: &OutputFormatter) -> Result<()> {
    let outputs = reconciler.outputs().await?;
    if !outputs.is_empty() {
        println!("{}", formatter.format_outputs(&outputs));
    }
    if let Some(path) = outputs_file {
        write_outputs_file(path, &outputs)?;
    }
    Ok(())
}

/// Writes outputs as a JSON object to `path`.
fn write_outputs_file(path: &Path, outputs: &[OutputValue]) -> Result<()> {
    let json = serde_json::to_string_pretty(&outputs_to_json(outputs))
        .map_err(|e| StrataError::internal(format!("Failed to serialize outputs: {e}")))?;
    std::fs::write(path, json)?;
    eprintln!("Wrote outputs to {}", path.display());
    Ok(())
}

/// Prompts on stderr and compares the answer with `expected`.
fn confirm(prompt: &str, expected: &str) -> Result<bool> {
    eprint!("{prompt}");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;

    Ok(input.trim().eq_ignore_ascii_case(expected))
}

/// Builds executor options, applying a command-line parallelism override.
fn executor_options(config: &StackConfig, parallelism: Option<usize>) -> ExecutorOptions {
    let options = ExecutorOptions::from_config(&config.execution);
    match parallelism {
        Some(n) => options.with_parallelism(n),
        None => options,
    }
}

/// Resolves the stack file path.
fn resolve_config_path(config_path: Option<&PathBuf>) -> Result<PathBuf> {
    config_path.map_or_else(|| find_config_file("."), |path| Ok(path.clone()))
}

/// Returns the directory holding the stack file.
fn config_dir(config_file: &Path) -> &Path {
    config_file.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."))
}

/// Loads `.env` next to the stack file, then the stack with overrides.
fn load_config(config_file: &Path) -> Result<StackConfig> {
    debug!("Loading stack from: {}", config_file.display());

    let parser = ConfigParser::new().with_base_path(config_dir(config_file));
    parser.load_dotenv()?;
    parser.load_with_env(config_file)
}

/// Loads and validates the stack and creates the configured state store.
async fn load_config_and_state(config_path: Option<&PathBuf>) -> Result<(StackConfig, Arc<dyn StateStore>)> {
    let config_file = resolve_config_path(config_path)?;
    let config = load_config(&config_file)?;

    ConfigValidator::new().validate(&config)?;

    let store: Arc<dyn StateStore> = match config.state.backend {
        StateBackend::Local => {
            let path = config
                .state
                .path
                .as_ref()
                .map_or_else(|| config_dir(&config_file).join(STATE_DIR), PathBuf::from);
            Arc::new(LocalStateStore::with_base_dir(path))
        }
        StateBackend::Memory => {
            warn!("Using in-memory state; nothing will persist after this run");
            Arc::new(MemoryStateStore::new())
        }
        StateBackend::S3 => {
            let bucket = config
                .state
                .bucket
                .as_deref()
                .ok_or_else(|| StrataError::internal("S3 bucket not configured"))?;
            let prefix = config.state.prefix.as_deref();
            let region = config.state.region.as_deref();
            Arc::new(S3StateStore::new(bucket, prefix, region).await?)
        }
    };

    debug!("Using {} state backend", store.backend_type());
    Ok((config, store))
}
