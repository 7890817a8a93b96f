//! selftool: on-demand tool synthesis runtime.
//!
//! Usage:
//!   selftool ask "<request>"     Run one request through the workflow
//!   selftool repl                Interactive session
//!   selftool tools               List registered tools
//!   selftool show <name>         Print a registered tool
//!   selftool check <file>        Run the safety policy over a script
//!   selftool exec <file>         Check then run a script in the sandbox
//!   selftool init                Write a default config file

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};

use selftool::config::{self, SelfToolConfig};
use selftool::directory::{Directory, ToolDirectory};
use selftool::inference::InferenceClient;
use selftool::policy::{self, PolicyAnalyzer};
use selftool::sandbox::{self, ConstrainedExecutor, SandboxLimits};
use selftool::workflow::{WorkflowConfig, WorkflowEngine, WorkflowState};

const CONFIG_FILE: &str = "selftool.toml";

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "selftool")]
#[command(version = "0.1.0")]
#[command(about = "Generate, vet, sandbox and reuse small tools on demand")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to selftool home directory (default: ~/.selftool).
    #[arg(long)]
    home: Option<String>,

    /// Log level (debug, info, warn, error); overrides the config file.
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Answer one request.
    Ask {
        /// The request, in natural language.
        request: String,
    },

    /// Interactive session.
    Repl,

    /// List registered tools and audit files.
    Tools,

    /// Print a registered tool.
    Show { name: String },

    /// Run the safety policy over a script file.
    Check { file: PathBuf },

    /// Check then run a script file in the sandbox.
    Exec {
        file: PathBuf,

        /// Function to call; defaults to the first one defined.
        #[arg(long)]
        entry: Option<String>,
    },

    /// Write a default config file into the home directory.
    Init,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let home_dir = match &cli.home {
        Some(home) => PathBuf::from(shellexpand::tilde(home).into_owned()),
        None => config::default_home_dir(),
    };

    let log_level = cli
        .log_level
        .clone()
        .or_else(|| load(&home_dir).ok().map(|cfg| cfg.log_level))
        .unwrap_or_else(|| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Ask { request } => cmd_ask(&home_dir, &request).await,
        Commands::Repl => cmd_repl(&home_dir).await,
        Commands::Tools => cmd_tools(&home_dir).await,
        Commands::Show { name } => cmd_show(&home_dir, &name).await,
        Commands::Check { file } => cmd_check(&home_dir, &file),
        Commands::Exec { file, entry } => cmd_exec(&home_dir, &file, entry).await,
        Commands::Init => cmd_init(&home_dir),
    }
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

async fn cmd_ask(home_dir: &Path, request: &str) -> Result<()> {
    let cfg = load(home_dir)?;
    let (engine, _directory) = build_engine(&cfg)?;
    let state = engine.run(request).await;
    print_outcome(&state);
    Ok(())
}

async fn cmd_repl(home_dir: &Path) -> Result<()> {
    let cfg = load(home_dir)?;
    let (engine, directory) = build_engine(&cfg)?;

    println!(
        "{} selftool ready (model: {}, {} attempt(s) per subtask). Type {} to list tools, {} to leave.",
        ">>>".green().bold(),
        cfg.model,
        engine.config().max_generation_attempts,
        "list".bold(),
        "exit".bold(),
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"\n> ").await?;
        stdout.flush().await?;

        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read from stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        match line.trim() {
            "" => continue,
            "exit" | "quit" => break,
            "list" => print_tools(&directory).await?,
            request => {
                let state = engine.run(request).await;
                print_outcome(&state);
            }
        }
    }

    println!("{} Bye.", "<<<".red().bold());
    Ok(())
}

async fn cmd_tools(home_dir: &Path) -> Result<()> {
    let cfg = load(home_dir)?;
    let directory = Directory::from_config(&cfg);
    print_tools(&directory).await
}

async fn cmd_show(home_dir: &Path, name: &str) -> Result<()> {
    let cfg = load(home_dir)?;
    let directory = Directory::from_config(&cfg);
    let Some(spec) = directory.get(name).await? else {
        bail!("No registered tool named '{}'", name);
    };

    println!();
    println!("  {}:        {}", "Name".bold(), spec.name);
    println!("  {}: {}", "Description".bold(), spec.description);
    println!("  {}:    {}", "Category".bold(), spec.category);
    println!("  {}:     {}", "Returns".bold(), spec.return_kind);
    println!("  {}:     {}", "Version".bold(), spec.version);
    println!();
    println!("{}", spec.code);
    Ok(())
}

fn cmd_check(home_dir: &Path, file: &Path) -> Result<()> {
    let cfg = load(home_dir)?;
    let code = read_script(file)?;
    let issues = PolicyAnalyzer::from_config(&cfg).check(&code);

    if issues.is_empty() {
        println!("{} {} passes the safety policy", "OK".green().bold(), file.display());
        return Ok(());
    }
    println!(
        "{} {} has {} issue(s):",
        "REJECTED".red().bold(),
        file.display(),
        issues.len()
    );
    println!("{}", policy::summarize(&issues));
    std::process::exit(1);
}

async fn cmd_exec(home_dir: &Path, file: &Path, entry: Option<String>) -> Result<()> {
    let cfg = load(home_dir)?;
    let code = read_script(file)?;

    let issues = PolicyAnalyzer::from_config(&cfg).check(&code);
    if !issues.is_empty() {
        println!("{}", "Refusing to run:".red().bold());
        println!("{}", policy::summarize(&issues));
        std::process::exit(1);
    }

    let entry = entry
        .or_else(|| sandbox::declared_functions(&code).into_iter().next())
        .unwrap_or_else(|| "main".to_string());
    let executor = ConstrainedExecutor::new(SandboxLimits::from_config(&cfg));

    let started = std::time::Instant::now();
    let outcome = tokio::task::spawn_blocking(move || executor.run(&code, &entry))
        .await
        .context("Sandbox task failed")?;
    let elapsed = started.elapsed();

    match outcome {
        Ok(output) => {
            println!("{}", output);
            info!("Finished in {:.3}ms", elapsed.as_secs_f64() * 1000.0);
            Ok(())
        }
        Err(fault) => {
            eprintln!("{} {}", "Error:".red().bold(), fault);
            std::process::exit(1);
        }
    }
}

fn cmd_init(home_dir: &Path) -> Result<()> {
    let path = home_dir.join(CONFIG_FILE);
    if path.exists() {
        println!("Config already exists at {}", path.display());
        return Ok(());
    }
    let cfg = defaults_for(home_dir);
    config::save_config(&cfg, &path)?;
    println!(
        "{} Wrote {}. Set {} or edit api_key there.",
        ">>>".green().bold(),
        path.display(),
        "SELFTOOL_API_KEY".bold()
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Load the config from the home directory; paths default into it.
fn load(home_dir: &Path) -> Result<SelfToolConfig> {
    let path = home_dir.join(CONFIG_FILE);
    if path.exists() {
        return config::load_config(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()));
    }
    let mut cfg = defaults_for(home_dir);
    cfg.apply_env_overrides();
    Ok(cfg)
}

fn defaults_for(home_dir: &Path) -> SelfToolConfig {
    SelfToolConfig {
        db_path: home_dir.join("tools.db").display().to_string(),
        tools_dir: home_dir.join("tools").display().to_string(),
        ..SelfToolConfig::default()
    }
}

fn build_engine(cfg: &SelfToolConfig) -> Result<(WorkflowEngine, Arc<Directory>)> {
    if cfg.api_key.is_empty() {
        warn!("No API key configured; model calls will likely fail");
    }

    let db_path = cfg.resolved_db_path();
    if let Some(parent) = Path::new(&db_path).parent() {
        std::fs::create_dir_all(parent).with_context(|| {
            format!("Failed to create DB parent directory: {}", parent.display())
        })?;
    }

    let directory = Arc::new(Directory::from_config(cfg));
    let llm = Arc::new(InferenceClient::from_config(cfg));
    let engine = WorkflowEngine::new(llm, directory.clone(), WorkflowConfig::from_config(cfg));
    Ok((engine, directory))
}

fn read_script(file: &Path) -> Result<String> {
    std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read script {}", file.display()))
}

async fn print_tools(directory: &Directory) -> Result<()> {
    let names = directory.list_names().await?;
    let files = directory.audit_files().await?;

    if !directory.is_persistent() {
        println!("{}", "(tool database unavailable, showing cached tools only)".dimmed());
    }
    if names.is_empty() {
        println!("No registered tools.");
    } else {
        println!("{}", "Registered tools:".bold());
        for name in &names {
            let marker = if files.contains(name) { "" } else { " (no audit file)" };
            println!("  - {}{}", name.cyan(), marker.dimmed());
        }
    }
    println!("Audit files in {}: {}", directory.tools_dir().display(), files.len());
    Ok(())
}

fn print_outcome(state: &WorkflowState) {
    println!();
    if let Some(error) = &state.error {
        println!("{} {}", "Error:".red().bold(), error);
        return;
    }

    println!("{}", state.response);

    if state.task_results.is_empty() {
        return;
    }
    println!();
    println!("{}", "Subtasks:".bold());
    for result in &state.task_results {
        match (&result.result, &result.error) {
            (_, Some(error)) => println!(
                "  [{}] {} {}: {}",
                result.task_id,
                "FAILED".red(),
                result.description,
                error
            ),
            (output, None) => println!(
                "  [{}] {} {}: {}",
                result.task_id,
                "OK".green(),
                result.description,
                output.as_deref().unwrap_or_default()
            ),
        }
        if let Some(file) = &result.tool_file {
            println!("      tool file: {}", file.dimmed());
        }
    }
    println!(
        "{}",
        format!(
            "last subtask: registered={} cached={} execution={:.3}ms",
            state.tool_registered, state.tool_cached, state.execution_time_ms
        )
        .dimmed()
    );
}
