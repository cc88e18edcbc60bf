//! Builds the project → workspace → session → window hierarchy from the
//! configured project list, git worktrees and live tmux sessions.
//!
//! Output ordering depends only on names and canonical paths, never on the
//! order the backend enumerates things in, so the navigation tree keeps its
//! shape across refreshes.

use crate::config::{Config, ConfigStore};
use crate::git::WorktreeLister;
use crate::model::{AgentRow, AgentStatus, Hierarchy, Project, Session, Workspace};
use crate::paths::{canonicalize, dir_name, expand_path, is_within, longest_prefix, relative_to};
use crate::tmux::{Backend, HOME_OPTION};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const MAIN_WORKSPACE: &str = "main";

/// Errors that make a whole pass meaningless. Everything else degrades the
/// affected entity and is reported to the observer.
#[derive(Debug, Error)]
pub enum DiscoveryError {
	#[error("failed to load configuration: {0:#}")]
	Config(anyhow::Error),
	#[error("cannot list sessions: {0:#}")]
	Sessions(anyhow::Error),
}

/// Where the project list comes from. `Ok(None)` means nothing is configured.
pub trait ProjectSource: Send + Sync {
	fn load(&self) -> anyhow::Result<Option<Config>>;
}

impl ProjectSource for ConfigStore {
	fn load(&self) -> anyhow::Result<Option<Config>> {
		let loaded = ConfigStore::load(self)?;
		Ok(loaded.exists.then_some(loaded.config))
	}
}

/// Receives degraded-data events during a pass.
pub trait DiscoveryObserver: Send + Sync {
	fn project_invalid(&self, _project: &str, _error: &anyhow::Error) {}
	fn worktrees_failed(&self, _project: &str, _error: &anyhow::Error) {}
	fn windows_failed(&self, _session: &str, _error: &anyhow::Error) {}
	fn session_dropped(&self, _session: &str) {}
}

/// Forwards observer events to `tracing`.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl DiscoveryObserver for TracingObserver {
	fn project_invalid(&self, project: &str, error: &anyhow::Error) {
		tracing::warn!(project, error = %format!("{error:#}"), "project path is invalid");
	}

	fn worktrees_failed(&self, project: &str, error: &anyhow::Error) {
		tracing::debug!(project, error = %format!("{error:#}"), "worktree listing failed");
	}

	fn windows_failed(&self, session: &str, error: &anyhow::Error) {
		tracing::warn!(session, error = %format!("{error:#}"), "window listing failed");
	}

	fn session_dropped(&self, session: &str) {
		tracing::debug!(session, "session matches no configured project");
	}
}

pub struct Discovery<'a> {
	pub source: &'a dyn ProjectSource,
	pub backend: Option<&'a dyn Backend>,
	pub worktrees: &'a dyn WorktreeLister,
	pub observer: &'a dyn DiscoveryObserver,
}

/// A pass before it is split into tree and flat views.
struct Pass {
	hierarchy: Hierarchy,
	unplaced: Vec<Session>,
}

impl<'a> Discovery<'a> {
	pub fn discover(&self) -> Result<Hierarchy, DiscoveryError> {
		Ok(self.run()?.hierarchy)
	}

	/// Every detected agent window, placed or not.
	pub fn discover_agents(&self) -> Result<Vec<AgentRow>, DiscoveryError> {
		let pass = self.run()?;
		let mut rows = Vec::new();
		for project in &pass.hierarchy.projects {
			for workspace in &project.workspaces {
				for session in &workspace.sessions {
					push_rows(&mut rows, session, &project.name, &workspace.name);
				}
			}
		}
		for session in &pass.unplaced {
			push_rows(&mut rows, session, "", "");
		}
		rows.sort_by(|a, b| {
			(a.project.is_empty(), &a.project, &a.workspace, &a.session, a.window_index).cmp(&(
				b.project.is_empty(),
				&b.project,
				&b.workspace,
				&b.session,
				b.window_index,
			))
		});
		Ok(rows)
	}

	fn run(&self) -> Result<Pass, DiscoveryError> {
		let Some(config) = self.source.load().map_err(DiscoveryError::Config)? else {
			return Ok(Pass {
				hierarchy: Hierarchy {
					projects: Vec::new(),
					config_missing: true,
				},
				unplaced: Vec::new(),
			});
		};

		let mut projects = self.build_projects(&config);
		let mut unplaced = Vec::new();
		if let Some(backend) = self.backend {
			let names = backend.list_sessions().map_err(DiscoveryError::Sessions)?;
			for name in names {
				let session = self.build_session(backend, &name);
				match place(backend, &name, &projects) {
					Some((p, w)) => projects[p].workspaces[w].sessions.push(session),
					None => {
						self.observer.session_dropped(&name);
						unplaced.push(session);
					}
				}
			}
		}
		for workspace in projects.iter_mut().flat_map(|p| p.workspaces.iter_mut()) {
			workspace.sessions.sort_by(|a, b| a.name.cmp(&b.name));
		}

		Ok(Pass {
			hierarchy: Hierarchy {
				projects,
				config_missing: false,
			},
			unplaced,
		})
	}

	fn build_projects(&self, config: &Config) -> Vec<Project> {
		let mut seen = HashSet::new();
		let mut projects = Vec::new();
		for entry in &config.projects {
			let name = entry.display_name();
			match canonicalize(Path::new(&entry.path)) {
				Ok(root) => {
					if !seen.insert(root.clone()) {
						continue;
					}
					let workspaces = self.build_workspaces(&name, &root, &config.general.worktree_dir);
					projects.push(Project {
						name,
						path: root,
						invalid_error: None,
						workspaces,
						expanded: true,
					});
				}
				Err(e) => {
					self.observer.project_invalid(&name, &e);
					projects.push(Project {
						name,
						path: expand_path(&entry.path),
						invalid_error: Some(format!("{e:#}")),
						workspaces: Vec::new(),
						expanded: true,
					});
				}
			}
		}
		projects.sort_by(|a, b| (&a.name, &a.path).cmp(&(&b.name, &b.path)));
		projects
	}

	fn build_workspaces(&self, project: &str, root: &Path, worktree_dir: &str) -> Vec<Workspace> {
		let owned = root.join(worktree_dir);
		let owned = canonicalize(&owned).unwrap_or(owned);

		let listed = self.worktrees.list(root).unwrap_or_else(|e| {
			self.observer.worktrees_failed(project, &e);
			Vec::new()
		});

		let mut seen: HashSet<PathBuf> = HashSet::from([root.to_path_buf()]);
		let mut secondary: Vec<Workspace> = listed
			.iter()
			.filter_map(|raw| canonicalize(raw).ok())
			.filter(|path| path != &owned && is_within(path, &owned))
			.filter(|path| seen.insert(path.clone()))
			.map(|path| Workspace {
				name: dir_name(&path),
				path,
				is_main: false,
				sessions: Vec::new(),
				expanded: true,
			})
			.collect();
		secondary.sort_by(|a, b| {
			(relative_to(&a.path, root), &a.path).cmp(&(relative_to(&b.path, root), &b.path))
		});

		let mut workspaces = Vec::with_capacity(secondary.len() + 1);
		workspaces.push(Workspace {
			name: MAIN_WORKSPACE.to_string(),
			path: root.to_path_buf(),
			is_main: true,
			sessions: Vec::new(),
			expanded: true,
		});
		workspaces.extend(secondary);
		workspaces
	}

	fn build_session(&self, backend: &dyn Backend, name: &str) -> Session {
		let mut windows = backend.list_windows(name).unwrap_or_else(|e| {
			self.observer.windows_failed(name, &e);
			Vec::new()
		});
		for window in &mut windows {
			window.agent = backend.window_agent(name, window.index).ok();
		}
		windows.sort_by_key(|w| w.index);
		let status = AgentStatus::rollup(windows.iter().filter_map(|w| w.agent_status()));
		Session {
			name: name.to_string(),
			status,
			windows,
			expanded: true,
		}
	}
}

/// Longest-prefix match among valid projects.
fn match_project(path: &Path, projects: &[Project]) -> Option<usize> {
	let valid: Vec<usize> = (0..projects.len()).filter(|&i| projects[i].is_valid()).collect();
	longest_prefix(path, valid.iter().map(|&i| projects[i].path.as_path())).map(|k| valid[k])
}

fn match_workspace(path: &Path, project: &Project) -> Option<usize> {
	longest_prefix(path, project.workspaces.iter().map(|w| w.path.as_path()))
}

/// (project, workspace) indices for a session, or `None` to drop it.
///
/// An explicit home pin may land in any workspace. Without one, the live
/// working directory only ever selects a project's main checkout.
fn place(backend: &dyn Backend, session: &str, projects: &[Project]) -> Option<(usize, usize)> {
	let pinned = backend
		.session_option(session, HOME_OPTION)
		.ok()
		.flatten()
		.and_then(|pin| canonicalize(Path::new(&pin)).ok());
	if let Some(pin) = pinned {
		if let Some(p) = match_project(&pin, projects) {
			if let Some(w) = match_workspace(&pin, &projects[p]) {
				return Some((p, w));
			}
		}
	}

	let cwd = backend
		.pane_path(session)
		.ok()
		.flatten()
		.and_then(|path| canonicalize(&path).ok())?;
	let p = match_project(&cwd, projects)?;
	let main = projects[p].workspaces.iter().position(|w| w.is_main)?;
	Some((p, main))
}

fn push_rows(rows: &mut Vec<AgentRow>, session: &Session, project: &str, workspace: &str) {
	for window in &session.windows {
		let Some(agent) = window.agent.as_ref().filter(|a| a.detected) else {
			continue;
		};
		rows.push(AgentRow {
			session: session.name.clone(),
			window_index: window.index,
			window_name: window.name.clone(),
			agent: agent.agent.clone(),
			status: agent.status,
			project: project.to_string(),
			workspace: workspace.to_string(),
		});
	}
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use crate::config::ProjectEntry;
	use crate::model::{AgentObservation, Window};
	use std::collections::HashMap;
	use std::fs;
	use std::sync::Mutex;
	use tempfile::TempDir;

	pub struct StaticProjects(pub Option<Config>);

	impl ProjectSource for StaticProjects {
		fn load(&self) -> anyhow::Result<Option<Config>> {
			Ok(self.0.clone())
		}
	}

	#[derive(Default)]
	pub struct FakeWorktrees(pub HashMap<PathBuf, Vec<PathBuf>>);

	impl WorktreeLister for FakeWorktrees {
		fn list(&self, root: &Path) -> anyhow::Result<Vec<PathBuf>> {
			self.0
				.get(root)
				.cloned()
				.ok_or_else(|| anyhow::anyhow!("not a git repository"))
		}
	}

	#[derive(Default)]
	pub struct FakeBackend {
		pub sessions: Vec<String>,
		pub fail_listing: bool,
		pub windows: HashMap<String, Vec<(u32, &'static str, AgentStatus)>>,
		pub broken_windows: HashSet<String>,
		pub pins: HashMap<String, PathBuf>,
		pub cwds: HashMap<String, PathBuf>,
	}

	impl FakeBackend {
		pub fn session(
			&mut self,
			name: &str,
			cwd: &Path,
			windows: Vec<(u32, &'static str, AgentStatus)>,
		) -> &mut Self {
			self.sessions.push(name.to_string());
			self.cwds.insert(name.to_string(), cwd.to_path_buf());
			self.windows.insert(name.to_string(), windows);
			self
		}

		pub fn pin(&mut self, name: &str, home: &Path) -> &mut Self {
			self.pins.insert(name.to_string(), home.to_path_buf());
			self
		}
	}

	impl Backend for FakeBackend {
		fn list_sessions(&self) -> anyhow::Result<Vec<String>> {
			if self.fail_listing {
				anyhow::bail!("no server");
			}
			Ok(self.sessions.clone())
		}

		fn list_windows(&self, session: &str) -> anyhow::Result<Vec<Window>> {
			if self.broken_windows.contains(session) {
				anyhow::bail!("window listing failed");
			}
			Ok(self
				.windows
				.get(session)
				.map(|ws| {
					ws.iter()
						.map(|(index, name, _)| Window {
							index: *index,
							name: name.to_string(),
							active: *index == 0,
							agent: None,
						})
						.collect()
				})
				.unwrap_or_default())
		}

		fn session_option(&self, session: &str, key: &str) -> anyhow::Result<Option<String>> {
			assert_eq!(key, HOME_OPTION);
			Ok(self.pins.get(session).map(|p| p.display().to_string()))
		}

		fn set_session_option(&self, _session: &str, _key: &str, _value: &str) -> anyhow::Result<()> {
			Ok(())
		}

		fn window_agent(&self, session: &str, window_index: u32) -> anyhow::Result<AgentObservation> {
			let (_, name, status) = self
				.windows
				.get(session)
				.and_then(|ws| ws.iter().find(|(i, _, _)| *i == window_index))
				.ok_or_else(|| anyhow::anyhow!("no such window"))?;
			if *name == "zsh" {
				return Ok(AgentObservation::undetected());
			}
			Ok(AgentObservation {
				agent: "claude".into(),
				detected: true,
				status: *status,
			})
		}

		fn pane_path(&self, session: &str) -> anyhow::Result<Option<PathBuf>> {
			Ok(self.cwds.get(session).cloned())
		}
	}

	#[derive(Default)]
	pub struct RecordingObserver(pub Mutex<Vec<String>>);

	impl DiscoveryObserver for RecordingObserver {
		fn project_invalid(&self, project: &str, _error: &anyhow::Error) {
			self.0.lock().unwrap().push(format!("invalid:{project}"));
		}
		fn windows_failed(&self, session: &str, _error: &anyhow::Error) {
			self.0.lock().unwrap().push(format!("windows:{session}"));
		}
		fn session_dropped(&self, session: &str) {
			self.0.lock().unwrap().push(format!("dropped:{session}"));
		}
	}

	pub fn config_for(projects: &[(&Path, Option<&str>)]) -> Config {
		Config {
			projects: projects
				.iter()
				.map(|(path, name)| ProjectEntry {
					path: path.display().to_string(),
					name: name.map(str::to_string),
				})
				.collect(),
			..Config::default()
		}
	}

	pub fn mkdir(path: &Path) -> PathBuf {
		fs::create_dir_all(path).unwrap();
		fs::canonicalize(path).unwrap()
	}

	/// `demo` at <tmp>/demo with worktree .worktrees/demo-feature.
	pub struct DemoLayout {
		pub _temp: TempDir,
		pub root: PathBuf,
		pub feature: PathBuf,
		pub worktrees: FakeWorktrees,
	}

	pub fn demo_layout() -> DemoLayout {
		let temp = TempDir::new().unwrap();
		let root = mkdir(&temp.path().join("demo"));
		let feature = mkdir(&root.join(".worktrees").join("demo-feature"));
		let mut worktrees = FakeWorktrees::default();
		worktrees
			.0
			.insert(root.clone(), vec![root.clone(), feature.clone()]);
		DemoLayout {
			_temp: temp,
			root,
			feature,
			worktrees,
		}
	}

	fn discover(
		config: Option<Config>,
		backend: Option<&FakeBackend>,
		worktrees: &FakeWorktrees,
	) -> (Result<Hierarchy, DiscoveryError>, Vec<String>) {
		let source = StaticProjects(config);
		let observer = RecordingObserver::default();
		let discovery = Discovery {
			source: &source,
			backend: backend.map(|b| b as &dyn Backend),
			worktrees,
			observer: &observer,
		};
		let result = discovery.discover();
		let events = observer.0.into_inner().unwrap();
		(result, events)
	}

	fn shape(h: &Hierarchy) -> Vec<String> {
		let mut out = Vec::new();
		for p in &h.projects {
			out.push(p.name.clone());
			for w in &p.workspaces {
				out.push(format!("  {}", w.name));
				for s in &w.sessions {
					out.push(format!("    {} {:?}", s.name, s.status));
				}
			}
		}
		out
	}

	#[test]
	fn test_demo_scenario_pinned_worktree_session() {
		let layout = demo_layout();
		let mut backend = FakeBackend::default();
		backend
			.session("canopy-feature", &layout.root, vec![(0, "claude", AgentStatus::Waiting)])
			.pin("canopy-feature", &layout.feature);

		let config = config_for(&[(&layout.root, Some("demo"))]);
		let (result, _) = discover(Some(config), Some(&backend), &layout.worktrees);
		let hierarchy = result.unwrap();

		assert_eq!(
			shape(&hierarchy),
			vec!["demo", "  main", "  demo-feature", "    canopy-feature Waiting"]
		);
		let project = &hierarchy.projects[0];
		assert!(project.workspaces[0].is_main);
		assert!(project.workspaces[0].sessions.is_empty());
		assert_eq!(project.workspaces[1].path, layout.feature);
		assert_eq!(project.workspaces[1].status(), AgentStatus::Waiting);
	}

	#[test]
	fn test_ordering_is_independent_of_backend_order() {
		let layout = demo_layout();
		let other = mkdir(&layout.root.parent().unwrap().join("alpha"));
		let config = config_for(&[(&layout.root, None), (&other, None)]);

		let mut forward = FakeBackend::default();
		forward
			.session("canopy-b", &layout.root, vec![])
			.session("canopy-a", &layout.root, vec![])
			.session("canopy-c", &other, vec![]);
		let mut reversed = FakeBackend::default();
		reversed
			.session("canopy-c", &other, vec![])
			.session("canopy-a", &layout.root, vec![])
			.session("canopy-b", &layout.root, vec![]);

		let (first, _) = discover(Some(config.clone()), Some(&forward), &layout.worktrees);
		let (second, _) = discover(Some(config), Some(&reversed), &layout.worktrees);
		let first = shape(&first.unwrap());
		assert_eq!(first, shape(&second.unwrap()));
		assert_eq!(
			first,
			vec![
				"alpha",
				"  main",
				"    canopy-c Done",
				"demo",
				"  main",
				"    canopy-a Done",
				"    canopy-b Done",
				"  demo-feature",
			]
		);
	}

	#[test]
	fn test_pin_overrides_working_directory_drift() {
		let layout = demo_layout();
		let elsewhere = mkdir(&layout.root.parent().unwrap().join("unrelated"));
		let mut backend = FakeBackend::default();
		backend
			.session("canopy-feature", &elsewhere, vec![(0, "claude", AgentStatus::Idle)])
			.pin("canopy-feature", &layout.feature);

		let config = config_for(&[(&layout.root, None)]);
		let (result, events) = discover(Some(config), Some(&backend), &layout.worktrees);
		let hierarchy = result.unwrap();
		assert_eq!(hierarchy.projects[0].workspaces[1].sessions[0].name, "canopy-feature");
		assert!(events.is_empty());
	}

	#[test]
	fn test_working_directory_places_under_main_only() {
		let layout = demo_layout();
		let sub = mkdir(&layout.root.join("sub"));
		let mut backend = FakeBackend::default();
		backend
			.session("canopy-sub", &sub, vec![])
			.session("canopy-in-worktree", &layout.feature, vec![]);

		let config = config_for(&[(&layout.root, None)]);
		let (result, _) = discover(Some(config), Some(&backend), &layout.worktrees);
		let project = &result.unwrap().projects[0];
		let main: Vec<_> = project.workspaces[0].sessions.iter().map(|s| s.name.as_str()).collect();
		assert_eq!(main, vec!["canopy-in-worktree", "canopy-sub"]);
		assert!(project.workspaces[1].sessions.is_empty());
	}

	#[test]
	fn test_stale_pin_falls_back_to_working_directory() {
		let layout = demo_layout();
		let gone = layout.root.join(".worktrees").join("gone");
		let mut backend = FakeBackend::default();
		backend
			.session("canopy-x", &layout.feature, vec![(0, "claude", AgentStatus::Working)])
			.pin("canopy-x", &gone);

		let config = config_for(&[(&layout.root, None)]);
		let (result, events) = discover(Some(config), Some(&backend), &layout.worktrees);
		let project = &result.unwrap().projects[0];
		let main: Vec<_> = project.workspaces[0].sessions.iter().map(|s| s.name.as_str()).collect();
		assert_eq!(main, vec!["canopy-x"]);
		assert_eq!(project.workspaces[1].path, layout.feature);
		assert!(project.workspaces[1].sessions.is_empty());
		assert!(events.is_empty());
	}

	#[test]
	fn test_invalid_project_never_matches_sessions() {
		let layout = demo_layout();
		let gone = layout.root.parent().unwrap().join("deleted");
		let mut backend = FakeBackend::default();
		backend.session("canopy-a", &layout.root, vec![]);

		let config = config_for(&[(&gone, Some("aaa")), (&layout.root, Some("demo"))]);
		let (result, _) = discover(Some(config), Some(&backend), &layout.worktrees);
		let hierarchy = result.unwrap();
		assert!(!hierarchy.projects[0].is_valid());
		assert_eq!(hierarchy.projects[1].workspaces[0].sessions[0].name, "canopy-a");
	}

	#[test]
	fn test_nested_projects_longest_prefix_wins() {
		let layout = demo_layout();
		let nested = mkdir(&layout.root.join("tools"));
		let mut backend = FakeBackend::default();
		backend
			.session("canopy-outer", &layout.root, vec![])
			.session("canopy-inner", &nested.join("."), vec![]);

		let config = config_for(&[(&layout.root, Some("demo")), (&nested, Some("tools"))]);
		let (result, _) = discover(Some(config), Some(&backend), &layout.worktrees);
		let hierarchy = result.unwrap();
		assert_eq!(
			shape(&hierarchy),
			vec![
				"demo",
				"  main",
				"    canopy-outer Done",
				"  demo-feature",
				"tools",
				"  main",
				"    canopy-inner Done",
			]
		);
	}

	#[test]
	fn test_unmatched_session_is_dropped() {
		let layout = demo_layout();
		let elsewhere = mkdir(&layout.root.parent().unwrap().join("unrelated"));
		let mut backend = FakeBackend::default();
		backend.session("canopy-stray", &elsewhere, vec![]);

		let config = config_for(&[(&layout.root, None)]);
		let (result, events) = discover(Some(config), Some(&backend), &layout.worktrees);
		let hierarchy = result.unwrap();
		assert!(hierarchy
			.projects
			.iter()
			.flat_map(|p| &p.workspaces)
			.all(|w| w.sessions.is_empty()));
		assert_eq!(events, vec!["dropped:canopy-stray"]);
	}

	#[test]
	fn test_missing_config_is_not_an_error() {
		let backend = FakeBackend::default();
		let (result, _) = discover(None, Some(&backend), &FakeWorktrees::default());
		let hierarchy = result.unwrap();
		assert!(hierarchy.config_missing);
		assert!(hierarchy.projects.is_empty());
	}

	struct BrokenSource;

	impl ProjectSource for BrokenSource {
		fn load(&self) -> anyhow::Result<Option<Config>> {
			anyhow::bail!("expected `=`, found newline")
		}
	}

	#[test]
	fn test_unparseable_config_aborts_pass_and_keeps_previous_tree() {
		use crate::tree::{Mode, TreeState, View};

		let layout = demo_layout();
		let mut backend = FakeBackend::default();
		backend.session("canopy-a", &layout.root, vec![]);
		let config = config_for(&[(&layout.root, Some("demo"))]);
		let (good, _) = discover(Some(config), Some(&backend), &layout.worktrees);

		let observer = RecordingObserver::default();
		let broken = Discovery {
			source: &BrokenSource,
			backend: Some(&backend),
			worktrees: &layout.worktrees,
			observer: &observer,
		};
		let result = broken.discover();
		assert!(matches!(result, Err(DiscoveryError::Config(_))));
		let message = result.unwrap_err().to_string();
		assert!(message.contains("failed to load configuration"));

		let mut state = TreeState::new(Mode::Tree);
		let gen = state.begin_refresh();
		assert!(state.apply_refresh(gen, Ok(View::Tree(good.unwrap()))));
		let before: Vec<String> = state.visible_nodes().iter().map(|n| state.label(*n)).collect();

		let gen = state.begin_refresh();
		assert!(state.apply_refresh(gen, Err(message)));
		let after: Vec<String> = state.visible_nodes().iter().map(|n| state.label(*n)).collect();
		assert_eq!(before, after);
		assert!(after.contains(&"canopy-a".to_string()));
		assert!(state
			.status_message()
			.is_some_and(|m| m.starts_with("Refresh failed:")));
	}

	#[test]
	fn test_invalid_project_is_kept_and_pass_continues() {
		let layout = demo_layout();
		let gone = layout.root.parent().unwrap().join("deleted");
		let config = config_for(&[(&gone, Some("broken")), (&layout.root, Some("demo"))]);
		let (result, events) = discover(Some(config), None, &layout.worktrees);
		let hierarchy = result.unwrap();

		assert_eq!(hierarchy.projects.len(), 2);
		let broken = &hierarchy.projects[0];
		assert_eq!(broken.name, "broken");
		assert!(broken.invalid_error.is_some());
		assert!(broken.workspaces.is_empty());
		assert_eq!(hierarchy.projects[1].workspaces.len(), 2);
		assert_eq!(events, vec!["invalid:broken"]);
	}

	#[test]
	fn test_session_listing_failure_aborts_pass() {
		let layout = demo_layout();
		let backend = FakeBackend {
			fail_listing: true,
			..FakeBackend::default()
		};
		let config = config_for(&[(&layout.root, None)]);
		let (result, _) = discover(Some(config), Some(&backend), &layout.worktrees);
		assert!(matches!(result, Err(DiscoveryError::Sessions(_))));
	}

	#[test]
	fn test_window_listing_failure_degrades_session() {
		let layout = demo_layout();
		let mut backend = FakeBackend::default();
		backend.session("canopy-x", &layout.root, vec![(0, "claude", AgentStatus::Working)]);
		backend.broken_windows.insert("canopy-x".into());

		let config = config_for(&[(&layout.root, None)]);
		let (result, events) = discover(Some(config), Some(&backend), &layout.worktrees);
		let session = &result.unwrap().projects[0].workspaces[0].sessions[0];
		assert!(session.windows.is_empty());
		assert_eq!(session.status, AgentStatus::Done);
		assert_eq!(events, vec!["windows:canopy-x"]);
	}

	#[test]
	fn test_worktrees_outside_owned_dir_are_ignored_and_deduplicated() {
		let layout = demo_layout();
		let stray = mkdir(&layout.root.parent().unwrap().join("stray-worktree"));
		let in_tree = mkdir(&layout.root.join("not-owned"));
		let second = mkdir(&layout.root.join(".worktrees").join("a-second"));
		let mut worktrees = FakeWorktrees::default();
		worktrees.0.insert(
			layout.root.clone(),
			vec![
				layout.feature.clone(),
				layout.root.clone(),
				stray,
				in_tree,
				layout.feature.join("."),
				second,
			],
		);

		let config = config_for(&[(&layout.root, None)]);
		let (result, _) = discover(Some(config), None, &worktrees);
		let names: Vec<_> = result.unwrap().projects[0]
			.workspaces
			.iter()
			.map(|w| w.name.clone())
			.collect();
		assert_eq!(names, vec!["main", "a-second", "demo-feature"]);
	}

	#[test]
	fn test_worktree_listing_failure_keeps_main() {
		let layout = demo_layout();
		let config = config_for(&[(&layout.root, None)]);
		let (result, _) = discover(Some(config), None, &FakeWorktrees::default());
		let project = &result.unwrap().projects[0];
		assert_eq!(project.workspaces.len(), 1);
		assert!(project.workspaces[0].is_main);
	}

	#[test]
	fn test_agent_rows_skip_undetected_and_list_unplaced_last() {
		let layout = demo_layout();
		let elsewhere = mkdir(&layout.root.parent().unwrap().join("unrelated"));
		let mut backend = FakeBackend::default();
		backend
			.session("canopy-stray", &elsewhere, vec![(0, "claude", AgentStatus::Idle)])
			.session(
				"canopy-main",
				&layout.root,
				vec![(1, "claude", AgentStatus::Working), (0, "zsh", AgentStatus::Idle)],
			);

		let source = StaticProjects(Some(config_for(&[(&layout.root, Some("demo"))])));
		let observer = RecordingObserver::default();
		let discovery = Discovery {
			source: &source,
			backend: Some(&backend),
			worktrees: &layout.worktrees,
			observer: &observer,
		};
		let rows = discovery.discover_agents().unwrap();
		assert_eq!(rows.len(), 2);
		assert_eq!(rows[0].session, "canopy-main");
		assert_eq!(rows[0].window_index, 1);
		assert_eq!(rows[0].project, "demo");
		assert_eq!(rows[0].workspace, MAIN_WORKSPACE);
		assert_eq!(rows[1].session, "canopy-stray");
		assert_eq!(rows[1].project, "");
	}
}
