use crate::model::{AgentObservation, AgentStatus};
use regex::Regex;
use std::sync::OnceLock;

/// Pane commands recognised as coding agents.
const AGENT_COMMANDS: &[&str] = &["claude", "codex", "aider", "gemini", "opencode", "amp"];

pub struct DetectionConfig {
	pub waiting_patterns: Vec<Regex>,
	pub working_patterns: Vec<Regex>,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
	patterns
		.iter()
		.filter_map(|p| match Regex::new(p) {
			Ok(re) => Some(re),
			Err(e) => {
				tracing::warn!(pattern = %p, error = %e, "skipping invalid detection pattern");
				None
			}
		})
		.collect()
}

pub fn detection() -> &'static DetectionConfig {
	static DETECTION: OnceLock<DetectionConfig> = OnceLock::new();
	DETECTION.get_or_init(|| DetectionConfig {
		waiting_patterns: compile(&[
			// Permission prompts
			r"\[Y/n\]",
			r"\[y/N\]",
			r"\(y/N\)",
			r"\(Y/n\)",
			// Questions
			r"Do you want to proceed",
			r"Should I proceed",
			r"Would you like me to",
			r"Press enter to continue",
			r"waiting for.*input",
			r"^\? ",
			r"Enter to select.*Tab/Arrow",
			r"Type your answer",
		]),
		working_patterns: compile(&[
			r"(?i)esc to interrupt",
			r"(?i)ctrl\+c to interrupt",
			r"^[✻✽✶✢·*] \w+…",
			r"[⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏]",
		]),
	})
}

/// Map a pane's foreground command to an agent type.
pub fn agent_for_command(command: &str) -> Option<&'static str> {
	let base = command.rsplit('/').next().unwrap_or(command).trim();
	AGENT_COMMANDS.iter().copied().find(|agent| {
		base == *agent || base.starts_with(&format!("{agent}-"))
	})
}

pub fn detect_status(lines: &[String], detection: &DetectionConfig) -> AgentStatus {
	// Explicit markers first.
	if lines.iter().any(|l| l.contains("/canopy:done")) {
		return AgentStatus::Done;
	}
	if lines.iter().any(|l| l.contains("/canopy:needs_input")) {
		return AgentStatus::Waiting;
	}

	let matches = |patterns: &[Regex]| {
		lines
			.iter()
			.any(|l| patterns.iter().any(|re| re.is_match(l.trim_end())))
	};
	if matches(&detection.waiting_patterns) {
		return AgentStatus::Waiting;
	}
	if matches(&detection.working_patterns) {
		return AgentStatus::Working;
	}
	AgentStatus::Idle
}

/// Combine the pane command and captured tail into an observation.
pub fn observe(command: &str, lines: &[String]) -> AgentObservation {
	match agent_for_command(command) {
		Some(agent) => AgentObservation {
			agent: agent.to_string(),
			detected: true,
			status: detect_status(lines, detection()),
		},
		None => AgentObservation::undetected(),
	}
}
