use crate::config::ConfigStore;
use crate::discovery::{Discovery, TracingObserver};
use crate::git::GitWorktrees;
use crate::model::AgentStatus;
use crate::tmux::{Backend, TmuxBackend};
use crate::tree::{Mode, Node, Outcome, Selection, TreeState, View};
use anyhow::Result;
use crossterm::{
	event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
	execute,
	terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
	prelude::*,
	widgets::{Block, Borders, Clear, Paragraph, Wrap},
};
use std::io::stdout;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedSender};

/// Everything a refresh needs, shared with the blocking pool.
pub struct Services {
	pub store: ConfigStore,
	pub backend: Option<TmuxBackend>,
	pub worktrees: GitWorktrees,
	pub observer: TracingObserver,
}

impl Services {
	pub fn discovery(&self) -> Discovery<'_> {
		Discovery {
			source: &self.store,
			backend: self.backend.as_ref().map(|b| b as &dyn Backend),
			worktrees: &self.worktrees,
			observer: &self.observer,
		}
	}

	pub fn refresh(&self, mode: Mode) -> Result<View, String> {
		let discovery = self.discovery();
		let result = match mode {
			Mode::Tree => discovery.discover().map(View::Tree),
			Mode::Agents => discovery.discover_agents().map(View::Agents),
		};
		result.map_err(|e| {
			tracing::warn!(error = %e, "discovery pass failed");
			e.to_string()
		})
	}
}

enum Message {
	Refreshed {
		generation: u64,
		result: Result<View, String>,
	},
}

#[derive(Debug, PartialEq, Eq)]
enum Action {
	None,
	Refresh,
	Exit(Option<Selection>),
}

/// Run the interactive tree until the user picks a target or quits.
pub fn run(
	services: Arc<Services>,
	mode: Mode,
	poll_interval: Duration,
	status_style: &str,
) -> Result<Option<Selection>> {
	enable_raw_mode()?;
	let mut stdout_handle = stdout();
	execute!(stdout_handle, EnterAlternateScreen)?;
	let backend = ratatui::backend::CrosstermBackend::new(stdout_handle);
	let mut terminal = ratatui::Terminal::new(backend)?;

	let result = event_loop(&mut terminal, services, mode, poll_interval, status_style);
	teardown_terminal()?;
	result
}

fn teardown_terminal() -> Result<()> {
	disable_raw_mode()?;
	execute!(stdout(), LeaveAlternateScreen)?;
	Ok(())
}

fn event_loop(
	terminal: &mut ratatui::Terminal<ratatui::backend::CrosstermBackend<std::io::Stdout>>,
	services: Arc<Services>,
	mode: Mode,
	poll_interval: Duration,
	status_style: &str,
) -> Result<Option<Selection>> {
	let runtime = tokio::runtime::Handle::current();
	let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
	let mut state = TreeState::new(mode);
	dispatch_refresh(&runtime, &services, &mut state, &tx);
	let mut last_tick = Instant::now();

	loop {
		while let Ok(message) = rx.try_recv() {
			match message {
				Message::Refreshed { generation, result } => {
					if !state.apply_refresh(generation, result) {
						tracing::debug!(generation, "discarded stale refresh");
					}
				}
			}
		}

		terminal.draw(|f| draw(f, &mut state, status_style))?;

		if event::poll(Duration::from_millis(100))? {
			if let Event::Key(key) = event::read()? {
				if key.kind == KeyEventKind::Press {
					match handle_key(&mut state, key) {
						Action::None => {}
						Action::Refresh => dispatch_refresh(&runtime, &services, &mut state, &tx),
						Action::Exit(selection) => return Ok(selection),
					}
				}
			}
		}

		if last_tick.elapsed() >= poll_interval {
			dispatch_refresh(&runtime, &services, &mut state, &tx);
			last_tick = Instant::now();
		}
	}
}

/// Start a discovery pass on the blocking pool. Passes may overlap; the
/// generation number decides which result is kept.
fn dispatch_refresh(
	runtime: &tokio::runtime::Handle,
	services: &Arc<Services>,
	state: &mut TreeState,
	tx: &UnboundedSender<Message>,
) {
	let generation = state.begin_refresh();
	let mode = state.mode();
	let services = Arc::clone(services);
	let tx = tx.clone();
	runtime.spawn_blocking(move || {
		let result = services.refresh(mode);
		let _ = tx.send(Message::Refreshed { generation, result });
	});
}

fn handle_key(state: &mut TreeState, key: KeyEvent) -> Action {
	if key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c') {
		return Action::Exit(None);
	}
	if state.show_help {
		state.show_help = false;
		return Action::None;
	}

	if state.is_filtering() {
		match key.code {
			KeyCode::Esc => state.cancel_filter(),
			KeyCode::Enter => return outcome_action(state.activate()),
			KeyCode::Backspace => state.filter_pop(),
			KeyCode::Up => state.move_up(),
			KeyCode::Down => state.move_down(),
			KeyCode::Char(c) if !c.is_control() => state.filter_push(c),
			_ => {}
		}
		return Action::None;
	}

	match key.code {
		KeyCode::Char('q') | KeyCode::Esc => return Action::Exit(None),
		KeyCode::Char('j') | KeyCode::Down => state.move_down(),
		KeyCode::Char('k') | KeyCode::Up => state.move_up(),
		KeyCode::Char('g') | KeyCode::Home => state.move_top(),
		KeyCode::Char('G') | KeyCode::End => state.move_bottom(),
		KeyCode::Enter => return outcome_action(state.activate()),
		KeyCode::Char(' ') => state.toggle_expand(),
		KeyCode::Char('/') => state.enter_filter(),
		KeyCode::Char('r') => {
			state.set_status("Refreshing…");
			return Action::Refresh;
		}
		KeyCode::Tab => {
			state.toggle_mode();
			return Action::Refresh;
		}
		KeyCode::Char('?') => state.show_help = true,
		_ => {}
	}
	Action::None
}

fn outcome_action(outcome: Outcome) -> Action {
	match outcome {
		Outcome::Continue => Action::None,
		Outcome::Exit(selection) => Action::Exit(selection),
	}
}

fn draw(f: &mut Frame, state: &mut TreeState, status_style: &str) {
	let size = f.area();
	let footer_height: u16 = if state.is_filtering() { 3 } else { 2 };
	let vertical = Layout::default()
		.direction(Direction::Vertical)
		.constraints([Constraint::Min(3), Constraint::Length(footer_height)])
		.split(size);

	let title = list_title(state);
	let block = Block::default().borders(Borders::ALL).title(title);
	let inner = block.inner(vertical[0]);
	f.render_widget(block, vertical[0]);

	state.set_viewport(inner.height as usize);
	let (rows, cursor) = state.window();
	if rows.is_empty() {
		let message = state.empty_message().unwrap_or_default();
		let hint = Paragraph::new(vec![
			Line::from(""),
			Line::from(Span::styled(message, Style::default().add_modifier(Modifier::BOLD))),
		])
		.wrap(Wrap { trim: true });
		f.render_widget(hint, inner);
	} else {
		let lines: Vec<Line> = rows
			.iter()
			.enumerate()
			.map(|(i, row)| match row {
				None => Line::from(""),
				Some(node) => node_line(state, *node, status_style, cursor == Some(i)),
			})
			.collect();
		f.render_widget(Paragraph::new(lines), inner);
	}

	let mut footer_lines = Vec::new();
	if let Some(query) = state.query() {
		footer_lines.push(format!("/{query}█   Enter select · Esc cancel"));
	}
	let mut hint = footer_text(size.width, state.mode());
	if let Some(msg) = state.status_message() {
		hint = format!("{hint}  |  Status: {msg}");
	}
	footer_lines.push(hint);
	let footer_block = if state.is_filtering() {
		Block::default().borders(Borders::TOP)
	} else {
		Block::default()
	};
	let footer = Paragraph::new(footer_lines.join("\n"))
		.block(footer_block)
		.wrap(Wrap { trim: true });
	f.render_widget(footer, vertical[1]);

	if state.show_help {
		let area = centered_rect(60, 70, size);
		f.render_widget(Clear, area);
		let overlay = Paragraph::new(help_text())
			.block(Block::default().borders(Borders::ALL).title("Help"))
			.wrap(Wrap { trim: true });
		f.render_widget(overlay, area);
	}
}

fn list_title(state: &TreeState) -> String {
	match state.view() {
		View::Tree(h) => {
			let sessions: usize = h
				.projects
				.iter()
				.flat_map(|p| &p.workspaces)
				.map(|w| w.sessions.len())
				.sum();
			format!("Projects ({} projects, {} sessions)", h.projects.len(), sessions)
		}
		View::Agents(rows) => {
			let waiting = rows.iter().filter(|r| r.status == AgentStatus::Waiting).count();
			if waiting > 0 {
				format!("Agents ({} need input)", waiting)
			} else {
				format!("Agents ({})", rows.len())
			}
		}
	}
}

fn node_line<'a>(state: &TreeState, node: Node, status_style: &str, selected: bool) -> Line<'a> {
	let mut spans: Vec<Span> = Vec::new();
	spans.push(Span::raw("  ".repeat(node.depth())));
	spans.push(Span::raw(match state.expanded(node) {
		Some(true) => "▾ ",
		Some(false) => "▸ ",
		None => "  ",
	}));
	if let Some(status) = state.status_of(node) {
		let (text, style) = status_indicator(status, status_style);
		spans.push(Span::styled(text, style));
		spans.push(Span::raw(" "));
	}

	let label_style = match node {
		Node::Project { .. } => Style::default().add_modifier(Modifier::BOLD),
		Node::Workspace { .. } => Style::default().fg(Color::Cyan),
		_ => Style::default(),
	};
	spans.push(Span::styled(state.label(node), label_style));
	spans.extend(node_details(state, node));

	let line = Line::from(spans);
	if selected {
		line.style(
			Style::default()
				.add_modifier(Modifier::BOLD | Modifier::REVERSED)
				.fg(Color::White),
		)
	} else {
		line
	}
}

fn node_details<'a>(state: &TreeState, node: Node) -> Vec<Span<'a>> {
	let dim = Style::default().fg(Color::DarkGray);
	match (state.view(), node) {
		(View::Tree(h), Node::Project { project }) => {
			let p = &h.projects[project];
			match &p.invalid_error {
				Some(err) => vec![
					Span::styled(
						" [INVALID]",
						Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
					),
					Span::styled(format!(" {err}"), dim),
				],
				None => vec![Span::styled(format!(" · {}", p.path.display()), dim)],
			}
		}
		(View::Tree(h), Node::Workspace { project, workspace }) => {
			let w = &h.projects[project].workspaces[workspace];
			if w.sessions.is_empty() {
				vec![Span::styled(" · no sessions", dim)]
			} else {
				vec![Span::styled(format!(" · {} sessions", w.sessions.len()), dim)]
			}
		}
		(
			View::Tree(h),
			Node::Session {
				project,
				workspace,
				session,
			},
		) => {
			let s = &h.projects[project].workspaces[workspace].sessions[session];
			vec![Span::styled(format!(" · {} windows", s.windows.len()), dim)]
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
			let w = &h.projects[project].workspaces[workspace].sessions[session].windows[window];
			let mut spans = Vec::new();
			if let Some(agent) = w.agent.as_ref().filter(|a| a.detected) {
				spans.push(Span::styled(format!(" · {}", agent.agent), dim));
			}
			if w.active {
				spans.push(Span::styled(" *", dim));
			}
			spans
		}
		(View::Agents(rows), Node::AgentRow { row }) => rows
			.get(row)
			.map(|r| {
				let place = if r.project.is_empty() {
					"(unplaced)".to_string()
				} else {
					format!("{}/{}", r.project, r.workspace)
				};
				vec![Span::styled(format!(" · {} · {}", r.agent, place), dim)]
			})
			.unwrap_or_default(),
		_ => Vec::new(),
	}
}

fn status_indicator(status: AgentStatus, style: &str) -> (&'static str, Style) {
	match style {
		"emoji" => match status {
			AgentStatus::Waiting => ("🔴", Style::default()),
			AgentStatus::Working => ("🟢", Style::default()),
			AgentStatus::Idle => ("🟡", Style::default()),
			AgentStatus::Done => ("✓ ", Style::default().add_modifier(Modifier::DIM)),
		},
		"text" => match status {
			AgentStatus::Waiting => (
				"[WAIT]",
				Style::default()
					.fg(Color::White)
					.bg(Color::Red)
					.add_modifier(Modifier::BOLD),
			),
			AgentStatus::Working => (
				"[RUN] ",
				Style::default()
					.fg(Color::Green)
					.add_modifier(Modifier::BOLD),
			),
			AgentStatus::Idle => ("[idle]", Style::default().fg(Color::Yellow)),
			AgentStatus::Done => ("[done]", Style::default().fg(Color::Cyan)),
		},
		// Default to unicode style for unknown values
		_ => match status {
			AgentStatus::Waiting => (
				"●",
				Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
			),
			AgentStatus::Working => (
				"▶",
				Style::default()
					.fg(Color::Green)
					.add_modifier(Modifier::BOLD),
			),
			AgentStatus::Idle => ("○", Style::default().fg(Color::Yellow)),
			AgentStatus::Done => ("✓", Style::default().fg(Color::Cyan)),
		},
	}
}

fn footer_text(width: u16, mode: Mode) -> String {
	let view = match mode {
		Mode::Tree => "Tab agents",
		Mode::Agents => "Tab tree",
	};
	if width < 90 {
		format!("enter | space | / | r | {view} | ? | q")
	} else {
		format!(
			"enter attach/expand | space fold | / filter | r refresh | {view} | ? help | q quit"
		)
	}
}

fn help_text() -> String {
	format!(
		r#"canopy v{}

Browsing:
  j/k ↑/↓   move
  g/G       top / bottom
  enter     attach session or window; fold project/workspace
  space     fold / unfold
  /         filter
  r         refresh now
  Tab       switch tree / agent list
  q Esc     quit

Filtering:
  type      narrow (matches parents too)
  ↑/↓       move
  enter     select
  Esc       back to full tree

Config: ~/.canopy/config.toml"#,
		env!("CARGO_PKG_VERSION")
	)
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
	let popup_layout = Layout::default()
		.direction(Direction::Vertical)
		.constraints([
			Constraint::Percentage((100 - percent_y) / 2),
			Constraint::Percentage(percent_y),
			Constraint::Percentage((100 - percent_y) / 2),
		])
		.split(r);

	let horizontal = Layout::default()
		.direction(Direction::Horizontal)
		.constraints([
			Constraint::Percentage((100 - percent_x) / 2),
			Constraint::Percentage(percent_x),
			Constraint::Percentage((100 - percent_x) / 2),
		])
		.split(popup_layout[1]);

	horizontal[1]
}
