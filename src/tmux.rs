use crate::detection::observe;
use crate::model::{AgentObservation, Window};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::OnceLock;

/// Session option recording the workspace a session belongs to.
pub const HOME_OPTION: &str = "@canopy_home";

/// Lines of scrollback inspected for agent status.
const CAPTURE_LINES: usize = 40;

/// Common tmux installation paths
const TMUX_PATHS: &[&str] = &[
	"/opt/homebrew/bin/tmux", // Apple Silicon Homebrew
	"/usr/local/bin/tmux",    // Intel Homebrew
	"/usr/bin/tmux",          // System
	"/bin/tmux",              // Fallback
];

/// The multiplexer as seen by discovery. Any call may fail independently.
pub trait Backend: Send + Sync {
	/// Names of sessions carrying the recognised prefix.
	fn list_sessions(&self) -> Result<Vec<String>>;
	fn list_windows(&self, session: &str) -> Result<Vec<Window>>;
	fn session_option(&self, session: &str, key: &str) -> Result<Option<String>>;
	fn set_session_option(&self, session: &str, key: &str, value: &str) -> Result<()>;
	fn window_agent(&self, session: &str, window_index: u32) -> Result<AgentObservation>;
	/// Working directory of the session's first pane.
	fn pane_path(&self, session: &str) -> Result<Option<PathBuf>>;
}

static TMUX_PATH: OnceLock<Option<String>> = OnceLock::new();

/// Find tmux binary, checking common locations if not in PATH
pub fn find_tmux() -> Option<&'static str> {
	TMUX_PATH
		.get_or_init(|| {
			if let Ok(output) = Command::new("which").arg("tmux").output() {
				if output.status.success() {
					let path = String::from_utf8_lossy(&output.stdout).trim().to_string();
					if !path.is_empty() && Path::new(&path).exists() {
						return Some(path);
					}
				}
			}
			TMUX_PATHS
				.iter()
				.find(|p| Path::new(p).exists())
				.map(|p| p.to_string())
		})
		.as_deref()
}

#[derive(Debug, Clone)]
pub struct TmuxBackend {
	bin: String,
	prefix: String,
}

impl TmuxBackend {
	/// `None` when no tmux binary can be found.
	pub fn detect(prefix: &str) -> Option<Self> {
		find_tmux().map(|bin| Self {
			bin: bin.to_string(),
			prefix: prefix.to_string(),
		})
	}

	fn cmd(&self) -> Command {
		Command::new(&self.bin)
	}

	fn run(&self, args: &[&str]) -> Result<Output> {
		self.cmd()
			.args(args)
			.output()
			.with_context(|| format!("failed to run {} {}", self.bin, args.join(" ")))
	}

	fn run_ok(&self, args: &[&str]) -> Result<String> {
		let output = self.run(args)?;
		if !output.status.success() {
			return Err(anyhow::anyhow!(
				"tmux {} failed: {}",
				args.first().copied().unwrap_or_default(),
				String::from_utf8_lossy(&output.stderr).trim()
			));
		}
		Ok(String::from_utf8_lossy(&output.stdout).into_owned())
	}

	pub fn new_session(&self, session: &str, dir: &Path) -> Result<()> {
		let status = self
			.cmd()
			.arg("new-session")
			.arg("-d")
			.arg("-s")
			.arg(session)
			.arg("-c")
			.arg(dir)
			.status()
			.with_context(|| format!("failed to start tmux session {} (using {})", session, self.bin))?;
		if !status.success() {
			return Err(anyhow::anyhow!(
				"tmux new-session failed for {} (status {})",
				session,
				status
			));
		}
		Ok(())
	}

	pub fn kill_session(&self, session: &str) -> Result<()> {
		self.run_ok(&["kill-session", "-t", session])
			.with_context(|| format!("failed to kill session {}", session))?;
		Ok(())
	}

	/// Attach to (or, from inside tmux, switch to) a session or window.
	pub fn attach(&self, target: &str) -> Result<()> {
		let verb = if std::env::var_os("TMUX").is_some() {
			"switch-client"
		} else {
			"attach-session"
		};
		let status = self
			.cmd()
			.arg(verb)
			.arg("-t")
			.arg(target)
			.status()
			.with_context(|| format!("failed to {verb} {target}"))?;
		if !status.success() {
			return Err(anyhow::anyhow!("tmux {} failed for {} ({})", verb, target, status));
		}
		Ok(())
	}

	fn capture_tail(&self, target: &str, lines: usize) -> Result<Vec<String>> {
		let start = format!("-{lines}");
		let stdout = self.run_ok(&["capture-pane", "-p", "-J", "-t", target, "-S", &start])?;
		Ok(stdout.lines().map(str::to_string).collect())
	}
}

impl Backend for TmuxBackend {
	fn list_sessions(&self) -> Result<Vec<String>> {
		let output = self.run(&["list-sessions", "-F", "#{session_name}"])?;
		// Non-zero here means no server is running, i.e. no sessions.
		if !output.status.success() {
			return Ok(vec![]);
		}
		let stdout = String::from_utf8_lossy(&output.stdout);
		Ok(parse_session_names(&stdout, &self.prefix))
	}

	fn list_windows(&self, session: &str) -> Result<Vec<Window>> {
		let stdout = self.run_ok(&[
			"list-windows",
			"-t",
			session,
			"-F",
			"#{window_index}\t#{window_name}\t#{window_active}",
		])?;
		Ok(parse_windows(&stdout))
	}

	fn session_option(&self, session: &str, key: &str) -> Result<Option<String>> {
		let stdout = self.run_ok(&["show-options", "-qv", "-t", session, key])?;
		let value = stdout.trim();
		Ok((!value.is_empty()).then(|| value.to_string()))
	}

	fn set_session_option(&self, session: &str, key: &str, value: &str) -> Result<()> {
		self.run_ok(&["set-option", "-t", session, key, value])
			.with_context(|| format!("failed to set {key} on {session}"))?;
		Ok(())
	}

	fn window_agent(&self, session: &str, window_index: u32) -> Result<AgentObservation> {
		let target = format!("{session}:{window_index}");
		let stdout = self.run_ok(&["list-panes", "-t", &target, "-F", "#{pane_current_command}"])?;
		let Some(command) = stdout.lines().map(str::trim).find(|c| !c.is_empty()) else {
			return Ok(AgentObservation::undetected());
		};
		let lines = self.capture_tail(&target, CAPTURE_LINES).unwrap_or_default();
		Ok(observe(command, &lines))
	}

	fn pane_path(&self, session: &str) -> Result<Option<PathBuf>> {
		let first_pane = format!("{session}:0.0");
		let output = self.run(&["display-message", "-p", "-t", &first_pane, "#{pane_current_path}"])?;
		// Windows may be renumbered from 1; fall back to whatever pane is current.
		let output = if output.status.success() {
			output
		} else {
			self.run(&["display-message", "-p", "-t", session, "#{pane_current_path}"])?
		};
		if !output.status.success() {
			return Ok(None);
		}
		let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
		Ok((!stdout.is_empty()).then(|| PathBuf::from(stdout)))
	}
}

fn parse_session_names(stdout: &str, prefix: &str) -> Vec<String> {
	stdout
		.lines()
		.map(str::trim)
		.filter(|line| line.starts_with(prefix))
		.map(str::to_string)
		.collect()
}

fn parse_windows(stdout: &str) -> Vec<Window> {
	stdout
		.lines()
		.filter_map(|line| {
			let mut parts = line.splitn(3, '\t');
			let index = parts.next()?.trim().parse::<u32>().ok()?;
			let name = parts.next()?.to_string();
			let active = parts.next().map(|a| a.trim() == "1").unwrap_or(false);
			Some(Window {
				index,
				name,
				active,
				agent: None,
			})
		})
		.collect()
}
