use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use verigen::cli::CommandContext;
use verigen::cli::commands;

#[derive(Parser)]
#[command(name = "verigen")]
#[command(
    version,
    about = "Test-driven code generation with sandboxed verification"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use this config file instead of the global/project chain
    #[arg(long, short, global = true, env = "VERIGEN_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate code from a prompt, then test and repair it
    Run {
        /// What to build
        prompt: String,
        #[arg(long, short, help = "Project the run belongs to")]
        project: Option<String>,
        #[arg(long, help = "Stop after scaffolding")]
        skip_tests: bool,
        #[arg(long, help = "Override the repair budget")]
        max_repairs: Option<u32>,
        #[arg(long, short, help = "Write the final files to this directory")]
        out: Option<PathBuf>,
        #[arg(long, help = "Print events as NDJSON on stdout")]
        json: bool,
    },

    /// Inspect recorded runs
    Runs {
        #[command(subcommand)]
        action: RunsAction,
    },

    /// Browse and invoke tools
    Tools {
        #[command(subcommand)]
        action: ToolsAction,
    },

    /// Manage plugins
    Plugin {
        #[command(subcommand)]
        action: PluginAction,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum RunsAction {
    /// List recent runs
    List {
        #[arg(long, short)]
        project: Option<String>,
        #[arg(long, short, default_value = "20")]
        limit: usize,
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: String,
    },
    /// Show one run with its stage history
    Show {
        run_id: String,
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: String,
    },
}

#[derive(Subcommand)]
enum ToolsAction {
    /// List the tool catalog
    List {
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: String,
    },
    /// Find the best tool for a goal
    Find {
        goal: String,
        #[arg(long = "input", short, help = "Input kind, repeatable (e.g. typescript)")]
        inputs: Vec<String>,
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: String,
    },
    /// Execute a tool over files
    Exec {
        name: String,
        #[arg(required = true)]
        files: Vec<PathBuf>,
        #[arg(long, short, help = "Write output files to this directory")]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum PluginAction {
    /// Rescan plugin directories
    Scan,
    /// Install a plugin from a git repository
    Install { source: String },
    /// Remove an installed plugin
    Remove { name: String },
    /// Enable a plugin
    Enable { name: String },
    /// Disable a plugin
    Disable { name: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(short = 'g', long, help = "Show global config file only")]
        global: bool,
        #[arg(short = 'f', long, default_value = "toml", help = "Output format: toml, json")]
        format: String,
    },
    /// Show configuration file paths
    Path,
    /// Initialize configuration
    Init {
        #[arg(long, short, help = "Initialize global config")]
        global: bool,
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mverigen encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    // stdout is reserved for command output and NDJSON events
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Cli {
        command,
        config: config_path,
        ..
    } = cli;
    let config = config_path.as_deref();

    // Config commands never open storage or load plugins
    if let Commands::Config { action } = &command {
        match action {
            ConfigAction::Show { global, format } => commands::config::show(config, *global, format)?,
            ConfigAction::Path => commands::config::path()?,
            ConfigAction::Init { global, force } => {
                if *global {
                    commands::config::init_global(*force)?;
                } else {
                    commands::config::init_project(*force)?;
                }
            }
        }
        return Ok(ExitCode::SUCCESS);
    }

    let rt = Runtime::new()?;
    rt.block_on(async move {
        let ctx = CommandContext::load(config).await?;

        match command {
            Commands::Run {
                prompt,
                project,
                skip_tests,
                max_repairs,
                out,
                json,
            } => {
                let success = commands::run::run(
                    &ctx,
                    commands::run::RunOptions {
                        prompt,
                        project,
                        skip_tests,
                        max_repairs,
                        out,
                        json,
                    },
                )
                .await?;
                if !success {
                    return Ok(ExitCode::from(2));
                }
            }
            Commands::Runs { action } => match action {
                RunsAction::List {
                    project,
                    limit,
                    format,
                } => commands::runs::list(&ctx, project.as_deref(), limit, &format)?,
                RunsAction::Show { run_id, format } => commands::runs::show(&ctx, &run_id, &format)?,
            },
            Commands::Tools { action } => match action {
                ToolsAction::List { format } => commands::tools::list(&ctx, &format)?,
                ToolsAction::Find {
                    goal,
                    inputs,
                    format,
                } => commands::tools::find(&ctx, &goal, &inputs, &format)?,
                ToolsAction::Exec { name, files, out } => {
                    commands::tools::exec(&ctx, &name, &files, out.as_deref()).await?
                }
            },
            Commands::Plugin { action } => match action {
                PluginAction::Scan => commands::plugin::scan(&ctx).await?,
                PluginAction::Install { source } => commands::plugin::install(&ctx, &source).await?,
                PluginAction::Remove { name } => commands::plugin::remove(&ctx, &name).await?,
                PluginAction::Enable { name } => commands::plugin::set_enabled(&ctx, &name, true).await?,
                PluginAction::Disable { name } => {
                    commands::plugin::set_enabled(&ctx, &name, false).await?
                }
            },
            Commands::Config { .. } => {}
        }

        Ok::<_, anyhow::Error>(ExitCode::SUCCESS)
    })
}
