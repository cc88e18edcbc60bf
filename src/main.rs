mod config;
mod detection;
mod discovery;
mod git;
mod model;
mod paths;
mod tmux;
mod tree;
mod ui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::{Config, ConfigStore};
use discovery::TracingObserver;
use git::GitWorktrees;
use paths::canonicalize;
use slug::slugify;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tmux::{Backend, TmuxBackend, HOME_OPTION};
use tracing_subscriber::EnvFilter;
use tree::Mode;
use ui::Services;

#[derive(Parser)]
#[command(name = "canopy")]
#[command(about = "Browse tmux agent sessions by project and worktree")]
struct Cli {
	/// Config file (default ~/.canopy/config.toml)
	#[arg(long, global = true)]
	config: Option<PathBuf>,
	#[command(subcommand)]
	command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
	/// Interactive project tree (the default)
	Browse {
		/// Start in the flat agent list
		#[arg(long, default_value_t = false)]
		agents: bool,
	},
	/// Print one discovery pass as JSON
	Status {
		/// Flat agent rows instead of the hierarchy
		#[arg(long, default_value_t = false)]
		agents: bool,
	},
	/// Print placed sessions, one per line
	List,
	/// Create a session pinned to a directory
	New {
		/// Session name (prefix is added if missing)
		name: String,
		/// Directory the session starts in and is pinned to
		#[arg(long, default_value = ".")]
		dir: String,
		/// Create a git worktree for the session under the project's worktree dir
		#[arg(long, default_value_t = false)]
		worktree: bool,
		/// Attach after creating
		#[arg(long, default_value_t = false)]
		attach: bool,
	},
	/// Pin an existing session to a directory
	Pin {
		session: String,
		#[arg(long, default_value = ".")]
		dir: String,
	},
	/// Kill a session
	Kill { session: String },
	/// Register a project root
	Add {
		path: String,
		/// Display name (defaults to the directory name)
		#[arg(long)]
		name: Option<String>,
	},
	/// Unregister a project by path or name
	Remove { target: String },
}

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	init_logging();

	let store = match cli.config {
		Some(path) => ConfigStore::new(path),
		None => ConfigStore::default_location()?,
	};
	let command = cli.command.unwrap_or(Commands::Browse { agents: false });
	let cfg = load_config(&store, &command)?;

	match command {
		Commands::Browse { agents } => browse(store, &cfg, agents),
		Commands::Status { agents } => {
			let services = services(store, &cfg);
			let discovery = services.discovery();
			let json = if agents {
				serde_json::to_string_pretty(&discovery.discover_agents()?)?
			} else {
				serde_json::to_string_pretty(&discovery.discover()?)?
			};
			println!("{json}");
			Ok(())
		}
		Commands::List => {
			let config_path = store.path().to_path_buf();
			let services = services(store, &cfg);
			let hierarchy = services.discovery().discover()?;
			if hierarchy.config_missing {
				eprintln!(
					"No configuration found at {}. Run `canopy add <path>` first.",
					config_path.display()
				);
			}
			for project in &hierarchy.projects {
				for workspace in &project.workspaces {
					for session in &workspace.sessions {
						println!(
							"{}\t{}\t{}/{}",
							session.name,
							session.status.label(),
							project.name,
							workspace.name
						);
					}
				}
			}
			Ok(())
		}
		Commands::New {
			name,
			dir,
			worktree,
			attach,
		} => handle_new(&cfg, &name, &dir, worktree, attach),
		Commands::Pin { session, dir } => {
			let backend = require_tmux(&cfg)?;
			let session = session_name(&cfg, &session);
			let home = canonicalize(Path::new(&dir))?;
			backend.set_session_option(&session, HOME_OPTION, &home.to_string_lossy())?;
			println!("Pinned {} to {}", session, home.display());
			Ok(())
		}
		Commands::Kill { session } => {
			let backend = require_tmux(&cfg)?;
			let session = session_name(&cfg, &session);
			backend.kill_session(&session)?;
			println!("Killed {session}");
			Ok(())
		}
		Commands::Add { path, name } => {
			let entry = store.add_project(Path::new(&path), name)?;
			println!("Added {} ({})", entry.display_name(), entry.path);
			Ok(())
		}
		Commands::Remove { target } => {
			match store.remove_project(&target)? {
				0 => anyhow::bail!("no project matches {target}"),
				n => println!("Removed {n} project(s)"),
			}
			Ok(())
		}
	}
}

/// Log to ~/.canopy/canopy.log; the TUI owns the terminal.
fn init_logging() {
	let filter = EnvFilter::try_from_env("CANOPY_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
	let file = config::base_dir().ok().and_then(|dir| {
		std::fs::create_dir_all(&dir).ok()?;
		OpenOptions::new()
			.create(true)
			.append(true)
			.open(dir.join("canopy.log"))
			.ok()
	});
	match file {
		Some(file) => {
			let _ = tracing_subscriber::fmt()
				.with_env_filter(filter)
				.with_ansi(false)
				.with_writer(Mutex::new(file))
				.try_init();
		}
		None => {
			let _ = tracing_subscriber::fmt()
				.with_env_filter(filter)
				.with_writer(std::io::sink)
				.try_init();
		}
	}
}

/// `pin` and `kill` only need the session prefix, so a broken config file
/// does not lock them out.
fn load_config(store: &ConfigStore, command: &Commands) -> Result<Config> {
	match store.load() {
		Ok(loaded) => Ok(loaded.config),
		Err(e) if matches!(command, Commands::Pin { .. } | Commands::Kill { .. }) => {
			tracing::warn!(error = %format!("{e:#}"), "using default config");
			eprintln!("Warning: {e:#}; using defaults");
			Ok(Config::default())
		}
		Err(e) => Err(e.context("failed to load config")),
	}
}

fn services(store: ConfigStore, cfg: &Config) -> Services {
	Services {
		store,
		backend: TmuxBackend::detect(&cfg.general.session_prefix),
		worktrees: GitWorktrees,
		observer: TracingObserver,
	}
}

fn require_tmux(cfg: &Config) -> Result<TmuxBackend> {
	TmuxBackend::detect(&cfg.general.session_prefix)
		.ok_or_else(|| anyhow::anyhow!("tmux not found. Install with: brew install tmux"))
}

/// Add the configured prefix unless the name already carries it.
fn session_name(cfg: &Config, name: &str) -> String {
	let prefix = &cfg.general.session_prefix;
	if name.starts_with(prefix.as_str()) {
		name.to_string()
	} else {
		format!("{prefix}{name}")
	}
}

fn browse(store: ConfigStore, cfg: &Config, agents: bool) -> Result<()> {
	let services = Arc::new(services(store, cfg));
	let mode = if agents { Mode::Agents } else { Mode::Tree };
	let selection = ui::run(
		Arc::clone(&services),
		mode,
		cfg.general.poll_interval(),
		&cfg.general.status_style,
	)?;

	let Some(selection) = selection else {
		return Ok(());
	};
	tracing::info!(session = %selection.target(), "attaching");
	let backend = services
		.backend
		.as_ref()
		.ok_or_else(|| anyhow::anyhow!("tmux not found"))?;
	backend.attach(&selection.target())
}

fn handle_new(cfg: &Config, name: &str, dir: &str, worktree: bool, attach: bool) -> Result<()> {
	let backend = require_tmux(cfg)?;
	let clean = slugify(name.trim_start_matches(cfg.general.session_prefix.as_str()));
	if clean.is_empty() {
		anyhow::bail!("session name {name:?} has no usable characters");
	}
	let session = session_name(cfg, &clean);
	let root = canonicalize(Path::new(dir))?;

	let home = if worktree {
		let path = root.join(&cfg.general.worktree_dir).join(&clean);
		git::add_worktree(&root, &path, &clean)?;
		canonicalize(&path)?
	} else {
		root
	};

	backend.new_session(&session, &home)?;
	backend
		.set_session_option(&session, HOME_OPTION, &home.to_string_lossy())
		.with_context(|| format!("created {session} but could not pin it"))?;
	tracing::info!(session = %session, home = %home.display(), "created session");
	println!("Started {} in {}", session, home.display());

	if attach {
		backend.attach(&session)?;
	}
	Ok(())
}
