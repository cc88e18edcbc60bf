//! Cursor-addressable view over a discovery snapshot.
//!
//! All mutation happens on the UI thread; refresh results arrive tagged with
//! the generation they were requested under and stale ones are discarded.

use crate::model::{session_key, workspace_key, AgentRow, AgentStatus, Hierarchy};
use std::collections::HashMap;
use std::time::{Duration, Instant};

const STATUS_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
	Tree,
	Agents,
}

impl Mode {
	pub fn toggled(self) -> Mode {
		match self {
			Mode::Tree => Mode::Agents,
			Mode::Agents => Mode::Tree,
		}
	}
}

/// Exactly one projection is populated at a time.
#[derive(Debug, Clone)]
pub enum View {
	Tree(Hierarchy),
	Agents(Vec<AgentRow>),
}

impl View {
	pub fn empty(mode: Mode) -> View {
		match mode {
			Mode::Tree => View::Tree(Hierarchy::default()),
			Mode::Agents => View::Agents(Vec::new()),
		}
	}

	pub fn mode(&self) -> Mode {
		match self {
			View::Tree(_) => Mode::Tree,
			View::Agents(_) => Mode::Agents,
		}
	}
}

/// A position in the current snapshot. Indices are only meaningful against
/// the snapshot the node was flattened from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
	Project {
		project: usize,
	},
	Workspace {
		project: usize,
		workspace: usize,
	},
	Session {
		project: usize,
		workspace: usize,
		session: usize,
	},
	Window {
		project: usize,
		workspace: usize,
		session: usize,
		window: usize,
	},
	AgentRow {
		row: usize,
	},
}

impl Node {
	pub fn depth(&self) -> usize {
		match self {
			Node::Project { .. } | Node::AgentRow { .. } => 0,
			Node::Workspace { .. } => 1,
			Node::Session { .. } => 2,
			Node::Window { .. } => 3,
		}
	}
}

/// What the caller should attach to once the loop exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
	pub session: String,
	pub window_name: Option<String>,
	pub window_index: Option<u32>,
}

impl Selection {
	/// tmux target string.
	pub fn target(&self) -> String {
		match self.window_index {
			Some(index) => format!("{}:{}", self.session, index),
			None => self.session.clone(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
	Continue,
	Exit(Option<Selection>),
}

#[derive(Debug, Clone, Default)]
struct Filter {
	query: String,
	matches: Vec<usize>,
	cursor: usize,
}

pub struct TreeState {
	view: View,
	nodes: Vec<Node>,
	cursor: usize,
	filter: Option<Filter>,
	scroll: usize,
	viewport: usize,
	status: Option<(String, Instant)>,
	requested: u64,
	applied: u64,
	loaded: bool,
	pub show_help: bool,
}

impl TreeState {
	pub fn new(mode: Mode) -> Self {
		Self {
			view: View::empty(mode),
			nodes: Vec::new(),
			cursor: 0,
			filter: None,
			scroll: 0,
			viewport: 0,
			status: None,
			requested: 0,
			applied: 0,
			loaded: false,
			show_help: false,
		}
	}

	pub fn mode(&self) -> Mode {
		self.view.mode()
	}

	pub fn view(&self) -> &View {
		&self.view
	}

	pub fn is_filtering(&self) -> bool {
		self.filter.is_some()
	}

	pub fn query(&self) -> Option<&str> {
		self.filter.as_ref().map(|f| f.query.as_str())
	}

	// --- refresh -----------------------------------------------------------

	/// Reserve a generation number for a refresh about to be dispatched.
	pub fn begin_refresh(&mut self) -> u64 {
		self.requested += 1;
		self.requested
	}

	/// Apply a finished refresh. Returns false when the result was stale
	/// (older than one already applied, or produced for the other mode).
	pub fn apply_refresh(&mut self, generation: u64, result: Result<View, String>) -> bool {
		if generation <= self.applied {
			return false;
		}
		match result {
			Ok(view) if view.mode() != self.mode() => return false,
			Ok(mut view) => {
				if let (View::Tree(old), View::Tree(new)) = (&self.view, &mut view) {
					restore_expanded(old, new);
				}
				self.view = view;
				self.loaded = true;
				self.rebuild();
			}
			Err(message) => self.set_status(format!("Refresh failed: {message}")),
		}
		self.applied = generation;
		true
	}

	/// Switch projections. Everything resets and any refresh already in
	/// flight is disowned; the caller must dispatch a new one.
	pub fn toggle_mode(&mut self) {
		self.view = View::empty(self.mode().toggled());
		self.nodes.clear();
		self.cursor = 0;
		self.scroll = 0;
		self.filter = None;
		self.loaded = false;
		self.applied = self.requested;
	}

	fn rebuild(&mut self) {
		self.nodes = flatten(&self.view);
		self.cursor = clamp(self.cursor, self.nodes.len());
		if self.filter.is_some() {
			self.refilter();
		}
	}

	// --- cursor ------------------------------------------------------------

	/// Nodes currently on screen: the filtered list while filtering.
	pub fn visible_nodes(&self) -> Vec<Node> {
		match &self.filter {
			Some(filter) => filter.matches.iter().map(|&i| self.nodes[i]).collect(),
			None => self.nodes.clone(),
		}
	}

	pub fn cursor(&self) -> usize {
		match &self.filter {
			Some(filter) => filter.cursor,
			None => self.cursor,
		}
	}

	pub fn selected_node(&self) -> Option<Node> {
		match &self.filter {
			Some(filter) => filter.matches.get(filter.cursor).map(|&i| self.nodes[i]),
			None => self.nodes.get(self.cursor).copied(),
		}
	}

	fn visible_len(&self) -> usize {
		match &self.filter {
			Some(filter) => filter.matches.len(),
			None => self.nodes.len(),
		}
	}

	fn set_cursor(&mut self, cursor: usize) {
		let cursor = clamp(cursor, self.visible_len());
		match &mut self.filter {
			Some(filter) => filter.cursor = cursor,
			None => self.cursor = cursor,
		}
	}

	pub fn move_down(&mut self) {
		self.set_cursor(self.cursor() + 1);
	}

	pub fn move_up(&mut self) {
		self.set_cursor(self.cursor().saturating_sub(1));
	}

	pub fn move_top(&mut self) {
		self.set_cursor(0);
	}

	pub fn move_bottom(&mut self) {
		self.set_cursor(self.visible_len().saturating_sub(1));
	}

	// --- expand / activate -------------------------------------------------

	/// Flip the expand flag of the node under the cursor, if it has one.
	pub fn toggle_expand(&mut self) {
		let Some(node) = self.selected_node() else {
			return;
		};
		let View::Tree(hierarchy) = &mut self.view else {
			return;
		};
		let flag = match node {
			Node::Project { project } => &mut hierarchy.projects[project].expanded,
			Node::Workspace { project, workspace } => {
				&mut hierarchy.projects[project].workspaces[workspace].expanded
			}
			Node::Session {
				project,
				workspace,
				session,
			} => &mut hierarchy.projects[project].workspaces[workspace].sessions[session].expanded,
			Node::Window { .. } | Node::AgentRow { .. } => return,
		};
		*flag = !*flag;
		// Collapsing only removes descendants, so the node keeps its index.
		self.rebuild();
	}

	/// Enter on the node under the cursor.
	pub fn activate(&mut self) -> Outcome {
		let Some(node) = self.selected_node() else {
			return Outcome::Continue;
		};
		match node {
			Node::Project { .. } | Node::Workspace { .. } => {
				if self.filter.is_some() {
					if let Some(index) = self.nodes.iter().position(|n| *n == node) {
						self.cursor = index;
					}
					self.filter = None;
				} else {
					self.toggle_expand();
				}
				Outcome::Continue
			}
			_ => Outcome::Exit(self.selection_for(node)),
		}
	}

	fn selection_for(&self, node: Node) -> Option<Selection> {
		match (&self.view, node) {
			(
				View::Tree(h),
				Node::Session {
					project,
					workspace,
					session,
				},
			) => {
				let s = &h.projects[project].workspaces[workspace].sessions[session];
				Some(Selection {
					session: s.name.clone(),
					window_name: None,
					window_index: None,
				})
			}
			(
				View::Tree(h),
				Node::Window {
					project,
					workspace,
					session,
					window,
				},
			) => {
				let s = &h.projects[project].workspaces[workspace].sessions[session];
				let w = &s.windows[window];
				Some(Selection {
					session: s.name.clone(),
					window_name: Some(w.name.clone()),
					window_index: Some(w.index),
				})
			}
			(View::Agents(rows), Node::AgentRow { row }) => rows.get(row).map(|r| Selection {
				session: r.session.clone(),
				window_name: Some(r.window_name.clone()),
				window_index: Some(r.window_index),
			}),
			_ => None,
		}
	}

	// --- filtering ---------------------------------------------------------

	pub fn enter_filter(&mut self) {
		if self.filter.is_none() {
			self.filter = Some(Filter::default());
			self.refilter();
		}
	}

	pub fn filter_push(&mut self, c: char) {
		if let Some(filter) = &mut self.filter {
			filter.query.push(c);
			self.refilter();
		}
	}

	pub fn filter_pop(&mut self) {
		if let Some(filter) = &mut self.filter {
			filter.query.pop();
			self.refilter();
		}
	}

	/// Leave filter mode, returning to the unfiltered cursor.
	pub fn cancel_filter(&mut self) {
		self.filter = None;
	}

	fn refilter(&mut self) {
		let Some(filter) = &self.filter else {
			return;
		};
		let needle = filter.query.to_lowercase();
		let matches: Vec<usize> = self
			.nodes
			.iter()
			.enumerate()
			.filter(|(_, node)| needle.is_empty() || self.search_text(**node).contains(&needle))
			.map(|(idx, _)| idx)
			.collect();
		if let Some(filter) = &mut self.filter {
			filter.cursor = clamp(filter.cursor, matches.len());
			filter.matches = matches;
		}
	}

	/// Lowercased labels of the node and all of its ancestors.
	fn search_text(&self, node: Node) -> String {
		let mut parts = Vec::with_capacity(4);
		match (&self.view, node) {
			(View::Agents(rows), Node::AgentRow { row }) => {
				if let Some(r) = rows.get(row) {
					parts.extend([
						r.project.clone(),
						r.workspace.clone(),
						r.session.clone(),
						r.window_name.clone(),
						r.agent.clone(),
					]);
				}
			}
			(View::Tree(_), node) => {
				let (p, w, s, win) = match node {
					Node::Project { project } => (project, None, None, None),
					Node::Workspace { project, workspace } => (project, Some(workspace), None, None),
					Node::Session {
						project,
						workspace,
						session,
					} => (project, Some(workspace), Some(session), None),
					Node::Window {
						project,
						workspace,
						session,
						window,
					} => (project, Some(workspace), Some(session), Some(window)),
					Node::AgentRow { .. } => return String::new(),
				};
				parts.push(self.label(Node::Project { project: p }));
				if let Some(w) = w {
					parts.push(self.label(Node::Workspace { project: p, workspace: w }));
				}
				if let (Some(w), Some(s)) = (w, s) {
					parts.push(self.label(Node::Session {
						project: p,
						workspace: w,
						session: s,
					}));
				}
				if let (Some(w), Some(s), Some(window)) = (w, s, win) {
					parts.push(self.label(Node::Window {
						project: p,
						workspace: w,
						session: s,
						window,
					}));
				}
			}
			_ => {}
		}
		parts.join(" ").to_lowercase()
	}

	/// The node's own text, without decoration.
	pub fn label(&self, node: Node) -> String {
		match (&self.view, node) {
			(View::Tree(h), Node::Project { project }) => h.projects[project].name.clone(),
			(View::Tree(h), Node::Workspace { project, workspace }) => {
				h.projects[project].workspaces[workspace].name.clone()
			}
			(
				View::Tree(h),
				Node::Session {
					project,
					workspace,
					session,
				},
			) => h.projects[project].workspaces[workspace].sessions[session].name.clone(),
			(
				View::Tree(h),
				Node::Window {
					project,
					workspace,
					session,
					window,
				},
			) => {
				let w = &h.projects[project].workspaces[workspace].sessions[session].windows[window];
				format!("{}:{}", w.index, w.name)
			}
			(View::Agents(rows), Node::AgentRow { row }) => rows
				.get(row)
				.map(|r| format!("{}:{} {}", r.session, r.window_index, r.window_name))
				.unwrap_or_default(),
			_ => String::new(),
		}
	}

	/// Rolled-up status shown next to a node.
	pub fn status_of(&self, node: Node) -> Option<AgentStatus> {
		match (&self.view, node) {
			(View::Tree(h), Node::Project { project }) => {
				let p = &h.projects[project];
				p.is_valid().then(|| p.status())
			}
			(View::Tree(h), Node::Workspace { project, workspace }) => {
				Some(h.projects[project].workspaces[workspace].status())
			}
			(
				View::Tree(h),
				Node::Session {
					project,
					workspace,
					session,
				},
			) => Some(h.projects[project].workspaces[workspace].sessions[session].status),
			(
				View::Tree(h),
				Node::Window {
					project,
					workspace,
					session,
					window,
				},
			) => h.projects[project].workspaces[workspace].sessions[session].windows[window].agent_status(),
			(View::Agents(rows), Node::AgentRow { row }) => rows.get(row).map(|r| r.status),
			_ => None,
		}
	}

	/// `Some(expanded)` for nodes that can be expanded.
	pub fn expanded(&self, node: Node) -> Option<bool> {
		let View::Tree(h) = &self.view else {
			return None;
		};
		match node {
			Node::Project { project } => Some(h.projects[project].expanded),
			Node::Workspace { project, workspace } => Some(h.projects[project].workspaces[workspace].expanded),
			Node::Session {
				project,
				workspace,
				session,
			} => Some(h.projects[project].workspaces[workspace].sessions[session].expanded),
			_ => None,
		}
	}

	pub fn empty_message(&self) -> Option<&'static str> {
		if self.visible_len() > 0 {
			return None;
		}
		if self.filter.is_some() {
			return Some("No matches");
		}
		if !self.loaded {
			return Some("Loading…");
		}
		Some(match &self.view {
			View::Tree(h) if h.config_missing => {
				"No configuration found. Run `canopy add <path>` to register a project."
			}
			View::Tree(_) => "No projects configured.",
			View::Agents(_) => "No active agent windows.",
		})
	}

	// --- viewport ----------------------------------------------------------

	pub fn set_viewport(&mut self, height: usize) {
		self.viewport = height;
	}

	/// Visible rows (`None` = blank separator) and the cursor's row within
	/// them. Scroll only moves when the cursor would leave the viewport.
	pub fn window(&mut self) -> (Vec<Option<Node>>, Option<usize>) {
		let lines = display_lines(&self.visible_nodes(), self.mode());
		let cursor_line = (self.visible_len() > 0)
			.then(|| display_line(&self.visible_nodes(), self.cursor(), self.mode()));
		self.scroll = adjust_scroll(self.scroll, cursor_line.unwrap_or(0), lines.len(), self.viewport);
		let end = (self.scroll + self.viewport.max(1)).min(lines.len());
		let visible = lines[self.scroll.min(end)..end].to_vec();
		(visible, cursor_line.map(|line| line - self.scroll))
	}

	// --- status line ---------------------------------------------------------

	pub fn set_status(&mut self, message: impl Into<String>) {
		self.status = Some((message.into(), Instant::now()));
	}

	pub fn status_message(&mut self) -> Option<&str> {
		if self
			.status
			.as_ref()
			.is_some_and(|(_, ts)| ts.elapsed() >= STATUS_TTL)
		{
			self.status = None;
		}
		self.status.as_ref().map(|(msg, _)| msg.as_str())
	}
}

fn clamp(cursor: usize, len: usize) -> usize {
	cursor.min(len.saturating_sub(1))
}

/// Depth-first walk, descending only into expanded nodes.
pub fn flatten(view: &View) -> Vec<Node> {
	match view {
		View::Agents(rows) => (0..rows.len()).map(|row| Node::AgentRow { row }).collect(),
		View::Tree(h) => {
			let mut nodes = Vec::new();
			for (project, p) in h.projects.iter().enumerate() {
				nodes.push(Node::Project { project });
				if !p.expanded {
					continue;
				}
				for (workspace, w) in p.workspaces.iter().enumerate() {
					nodes.push(Node::Workspace { project, workspace });
					if !w.expanded {
						continue;
					}
					for (session, s) in w.sessions.iter().enumerate() {
						nodes.push(Node::Session {
							project,
							workspace,
							session,
						});
						if !s.expanded {
							continue;
						}
						for window in 0..s.windows.len() {
							nodes.push(Node::Window {
								project,
								workspace,
								session,
								window,
							});
						}
					}
				}
			}
			nodes
		}
	}
}

/// Copy expand flags from the previous snapshot by stable key.
pub fn restore_expanded(old: &Hierarchy, new: &mut Hierarchy) {
	let mut flags: HashMap<String, bool> = HashMap::new();
	for p in &old.projects {
		let pk = p.key();
		flags.insert(pk.clone(), p.expanded);
		for w in &p.workspaces {
			let wk = workspace_key(&pk, w);
			flags.insert(wk.clone(), w.expanded);
			for s in &w.sessions {
				flags.insert(session_key(&wk, s), s.expanded);
			}
		}
	}
	for p in &mut new.projects {
		let pk = p.key();
		if let Some(&expanded) = flags.get(&pk) {
			p.expanded = expanded;
		}
		for w in &mut p.workspaces {
			let wk = workspace_key(&pk, w);
			if let Some(&expanded) = flags.get(&wk) {
				w.expanded = expanded;
			}
			for s in &mut w.sessions {
				if let Some(&expanded) = flags.get(&session_key(&wk, s)) {
					s.expanded = expanded;
				}
			}
		}
	}
}

fn is_separated(nodes: &[Node], index: usize, mode: Mode) -> bool {
	mode == Mode::Tree && index > 0 && matches!(nodes[index], Node::Project { .. })
}

/// Display line of a node: the tree view puts a blank line before every
/// project but the first.
pub fn display_line(nodes: &[Node], index: usize, mode: Mode) -> usize {
	let separators = (0..=index.min(nodes.len().saturating_sub(1)))
		.filter(|&i| is_separated(nodes, i, mode))
		.count();
	index + separators
}

fn display_lines(nodes: &[Node], mode: Mode) -> Vec<Option<Node>> {
	let mut lines = Vec::with_capacity(nodes.len());
	for (i, node) in nodes.iter().enumerate() {
		if is_separated(nodes, i, mode) {
			lines.push(None);
		}
		lines.push(Some(*node));
	}
	lines
}

/// Minimal-scroll offset keeping `cursor_line` inside `viewport` lines.
pub fn adjust_scroll(offset: usize, cursor_line: usize, total: usize, viewport: usize) -> usize {
	if viewport == 0 || total <= viewport {
		return 0;
	}
	let offset = if cursor_line < offset {
		cursor_line
	} else if cursor_line >= offset + viewport {
		cursor_line + 1 - viewport
	} else {
		offset
	};
	offset.min(total - viewport)
}
