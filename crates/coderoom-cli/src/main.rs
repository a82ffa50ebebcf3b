use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use coderoom_config::CoderoomConfig;

mod commands;
mod logging;

#[derive(Parser)]
#[command(name = "coderoom", version, about = "Collaborative project rooms with an AI pair")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the REST and WebSocket server
    Serve {
        /// Override server.host
        #[arg(long)]
        host: Option<String>,
        /// Override server.port
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Show effective configuration (secrets redacted)
    Config,
    /// File tree utilities
    Tree {
        #[command(subcommand)]
        action: TreeAction,
    },
    /// Local sandbox operations
    Sandbox {
        #[command(subcommand)]
        action: SandboxAction,
    },
}

#[derive(Subcommand)]
enum TreeAction {
    /// Convert a flat tree into a nested one
    Nest {
        /// JSON file to read (stdin if omitted or `-`)
        input: Option<PathBuf>,
    },
    /// Convert a nested tree into a flat one
    Flatten {
        /// JSON file to read (stdin if omitted or `-`)
        input: Option<PathBuf>,
    },
    /// Normalize the keys of a flat tree and report dropped entries
    Normalize {
        /// JSON file to read (stdin if omitted or `-`)
        input: Option<PathBuf>,
    },
    /// Print a flat tree as a directory listing
    Show {
        /// JSON file to read (stdin if omitted or `-`)
        input: Option<PathBuf>,
        /// Maximum depth to recurse
        #[arg(short, long)]
        depth: Option<usize>,
    },
}

#[derive(Subcommand)]
enum SandboxAction {
    /// Write a flat tree into the sandbox directory
    Mount {
        /// Flat tree JSON file
        tree: PathBuf,
        /// Override sandbox.root
        #[arg(long)]
        root: Option<String>,
    },
    /// Run the build command, then the start command, streaming output
    Run {
        /// Override sandbox.root
        #[arg(long)]
        root: Option<String>,
    },
    /// Join a project room and mirror its tree into the sandbox
    Follow {
        /// Session channel URL (defaults to the configured server)
        #[arg(long)]
        url: Option<String>,
        /// Bearer token
        #[arg(long)]
        token: String,
        /// Project id to join
        #[arg(long)]
        project: String,
        /// Run build/start commands proposed by the assistant
        #[arg(long)]
        run: bool,
        /// Override sandbox.root
        #[arg(long)]
        root: Option<String>,
    },
}

fn find_config() -> Option<PathBuf> {
    find_config_in(
        std::env::var("CODEROOM_CONFIG").ok(),
        Path::new("."),
        dirs_next::home_dir(),
    )
}

fn find_config_in(env: Option<String>, cwd: &Path, home: Option<PathBuf>) -> Option<PathBuf> {
    // 1. CODEROOM_CONFIG environment variable
    if let Some(path) = env {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
    }

    // 2. coderoom.yaml in current directory
    let cwd_config = cwd.join("coderoom.yaml");
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    // 3. ~/.config/coderoom/config.yaml
    if let Some(home) = home {
        let home_config = home.join(".config/coderoom/config.yaml");
        if home_config.exists() {
            return Some(home_config);
        }
    }

    None
}

/// Load, validate and fill in defaults. Without any config file the built-in
/// defaults are used.
fn load_config(path: Option<PathBuf>) -> Result<CoderoomConfig, Box<dyn std::error::Error>> {
    let config = match path {
        Some(path) => CoderoomConfig::from_file(&path)
            .map_err(|e| format!("{}: {}", path.display(), e))?,
        None => CoderoomConfig::default(),
    };
    config.validate_or_err()?;
    Ok(config.effective())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_path = cli.config.or_else(find_config);
    let config = load_config(config_path.clone())?;
    logging::init(&config.logging)?;
    if let Some(path) = &config_path {
        tracing::debug!(path = %path.display(), "configuration loaded");
    }

    match cli.command {
        Commands::Serve { host, port } => {
            commands::serve::run(config, host, port).await?;
        }
        Commands::Config => {
            commands::config::run(&config)?;
        }
        Commands::Tree { action } => match action {
            TreeAction::Nest { input } => commands::tree::nest(input.as_deref())?,
            TreeAction::Flatten { input } => commands::tree::flatten(input.as_deref())?,
            TreeAction::Normalize { input } => commands::tree::normalize(input.as_deref())?,
            TreeAction::Show { input, depth } => commands::tree::show(input.as_deref(), depth)?,
        },
        Commands::Sandbox { action } => match action {
            SandboxAction::Mount { tree, root } => {
                commands::sandbox::mount(&config, &tree, root).await?;
            }
            SandboxAction::Run { root } => {
                commands::sandbox::run(&config, root).await?;
            }
            SandboxAction::Follow {
                url,
                token,
                project,
                run,
                root,
            } => {
                commands::sandbox::follow(&config, url, &token, &project, run, root).await?;
            }
        },
    }

    Ok(())
}
