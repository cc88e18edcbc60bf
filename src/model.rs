use serde::Serialize;
use std::path::PathBuf;

/// Agent activity, declared in rollup priority order (lowest first) so the
/// derived `Ord` is the aggregation order.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
	Done,
	Idle,
	Waiting,
	Working,
}

impl AgentStatus {
	/// WORKING > WAITING > IDLE > DONE. An empty set rolls up to DONE.
	pub fn rollup<I>(statuses: I) -> AgentStatus
	where
		I: IntoIterator<Item = AgentStatus>,
	{
		statuses.into_iter().max().unwrap_or(AgentStatus::Done)
	}

	pub fn label(self) -> &'static str {
		match self {
			AgentStatus::Working => "working",
			AgentStatus::Waiting => "waiting",
			AgentStatus::Idle => "idle",
			AgentStatus::Done => "done",
		}
	}
}

/// Per-window detection result reported by the backend.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AgentObservation {
	pub agent: String,
	pub detected: bool,
	pub status: AgentStatus,
}

impl AgentObservation {
	pub fn undetected() -> Self {
		Self {
			agent: String::new(),
			detected: false,
			status: AgentStatus::Done,
		}
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct Window {
	pub index: u32,
	pub name: String,
	pub active: bool,
	pub agent: Option<AgentObservation>,
}

impl Window {
	/// Status contributed to rollups; `None` when no agent was detected.
	pub fn agent_status(&self) -> Option<AgentStatus> {
		self.agent
			.as_ref()
			.filter(|a| a.detected)
			.map(|a| a.status)
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct Session {
	pub name: String,
	pub status: AgentStatus,
	pub windows: Vec<Window>,
	#[serde(skip)]
	pub expanded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct Workspace {
	pub name: String,
	pub path: PathBuf,
	pub is_main: bool,
	pub sessions: Vec<Session>,
	#[serde(skip)]
	pub expanded: bool,
}

impl Workspace {
	pub fn status(&self) -> AgentStatus {
		AgentStatus::rollup(self.sessions.iter().map(|s| s.status))
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct Project {
	pub name: String,
	/// Canonical root, or the configured path verbatim when it is invalid.
	pub path: PathBuf,
	pub invalid_error: Option<String>,
	pub workspaces: Vec<Workspace>,
	#[serde(skip)]
	pub expanded: bool,
}

impl Project {
	pub fn is_valid(&self) -> bool {
		self.invalid_error.is_none()
	}

	/// Stable identity across refreshes.
	pub fn key(&self) -> String {
		if self.is_valid() {
			self.path.display().to_string()
		} else {
			format!("name:{}", self.name)
		}
	}

	pub fn status(&self) -> AgentStatus {
		AgentStatus::rollup(self.workspaces.iter().map(Workspace::status))
	}
}

pub fn workspace_key(project_key: &str, workspace: &Workspace) -> String {
	format!("{project_key}\u{0}{}", workspace.path.display())
}

pub fn session_key(workspace_key: &str, session: &Session) -> String {
	format!("{workspace_key}\u{0}{}", session.name)
}

/// One discovery pass in hierarchical form.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Hierarchy {
	pub projects: Vec<Project>,
	pub config_missing: bool,
}

/// One detected agent window, for the flat view.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AgentRow {
	pub session: String,
	pub window_index: u32,
	pub window_name: String,
	pub agent: String,
	pub status: AgentStatus,
	pub project: String,
	pub workspace: String,
}

#[cfg(test)]
mod tests {
	use super::*;
	use AgentStatus::*;

	#[test]
	fn test_rollup_priority() {
		assert_eq!(AgentStatus::rollup([Idle, Working, Done]), Working);
		assert_eq!(AgentStatus::rollup([Working, Waiting]), Working);
		assert_eq!(AgentStatus::rollup([Waiting, Idle]), Waiting);
		assert_eq!(AgentStatus::rollup([Idle, Done]), Idle);
		assert_eq!(AgentStatus::rollup([Done]), Done);
		assert_eq!(AgentStatus::rollup(Vec::new()), Done);
	}

	#[test]
	fn test_undetected_windows_do_not_contribute() {
		let window = Window {
			index: 0,
			name: "zsh".into(),
			active: true,
			agent: Some(AgentObservation {
				agent: String::new(),
				detected: false,
				status: Working,
			}),
		};
		assert_eq!(window.agent_status(), None);
	}

	#[test]
	fn test_invalid_project_key_falls_back_to_name() {
		let project = Project {
			name: "demo".into(),
			path: PathBuf::from("/gone"),
			invalid_error: Some("missing".into()),
			workspaces: Vec::new(),
			expanded: true,
		};
		assert_eq!(project.key(), "name:demo");
	}
}
