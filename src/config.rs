use crate::paths::{canonicalize, dir_name};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_SESSION_PREFIX: &str = "canopy-";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
	#[serde(default)]
	pub general: General,
	#[serde(default)]
	pub projects: Vec<ProjectEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct General {
	#[serde(default = "default_poll_interval_ms")]
	pub poll_interval_ms: u64,
	#[serde(default = "default_session_prefix")]
	pub session_prefix: String,
	#[serde(default = "default_worktree_dir")]
	pub worktree_dir: String,
	#[serde(default = "default_status_style")]
	pub status_style: String, // "unicode", "emoji", "text"
}

impl Default for General {
	fn default() -> Self {
		Self {
			poll_interval_ms: default_poll_interval_ms(),
			session_prefix: default_session_prefix(),
			worktree_dir: default_worktree_dir(),
			status_style: default_status_style(),
		}
	}
}

impl General {
	pub fn poll_interval(&self) -> std::time::Duration {
		std::time::Duration::from_millis(self.poll_interval_ms.clamp(250, 10_000))
	}
}

fn default_poll_interval_ms() -> u64 {
	2000
}

fn default_session_prefix() -> String {
	DEFAULT_SESSION_PREFIX.to_string()
}

fn default_worktree_dir() -> String {
	".worktrees".to_string()
}

fn default_status_style() -> String {
	"unicode".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectEntry {
	pub path: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
}

impl ProjectEntry {
	pub fn display_name(&self) -> String {
		match &self.name {
			Some(name) if !name.trim().is_empty() => name.clone(),
			_ => dir_name(Path::new(&self.path)),
		}
	}
}

/// A config file on disk. `config` is the default when `exists` is false.
#[derive(Debug, Clone)]
pub struct Loaded {
	pub config: Config,
	pub exists: bool,
}

#[derive(Debug, Clone)]
pub struct ConfigStore {
	path: PathBuf,
}

impl ConfigStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	/// `~/.canopy/config.toml`
	pub fn default_location() -> Result<Self> {
		Ok(Self::new(base_dir()?.join("config.toml")))
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn exists(&self) -> bool {
		self.path.is_file()
	}

	pub fn load(&self) -> Result<Loaded> {
		if !self.exists() {
			return Ok(Loaded {
				config: Config::default(),
				exists: false,
			});
		}
		let content = fs::read_to_string(&self.path)
			.with_context(|| format!("failed to read {}", self.path.display()))?;
		let config: Config = toml::from_str(&content)
			.with_context(|| format!("failed to parse {}", self.path.display()))?;
		Ok(Loaded {
			config,
			exists: true,
		})
	}

	/// Write via a sibling temp file and rename, so readers never see a
	/// half-written config.
	pub fn save(&self, config: &Config) -> Result<()> {
		if let Some(parent) = self.path.parent() {
			fs::create_dir_all(parent)?;
		}
		let content = toml::to_string_pretty(config)?;
		let tmp = self.path.with_extension("toml.tmp");
		fs::write(&tmp, content)
			.with_context(|| format!("failed to write {}", tmp.display()))?;
		fs::rename(&tmp, &self.path)
			.with_context(|| format!("failed to replace {}", self.path.display()))?;
		Ok(())
	}

	/// Append a project, stored by canonical path. Returns the entry added.
	pub fn add_project(&self, path: &Path, name: Option<String>) -> Result<ProjectEntry> {
		let canonical = canonicalize(path)?;
		let mut config = self.load()?.config;
		let duplicate = config.projects.iter().any(|p| {
			canonicalize(Path::new(&p.path))
				.map(|existing| existing == canonical)
				.unwrap_or(false)
		});
		if duplicate {
			anyhow::bail!("{} is already configured", canonical.display());
		}
		let entry = ProjectEntry {
			path: canonical.to_string_lossy().into_owned(),
			name,
		};
		config.projects.push(entry.clone());
		self.save(&config)?;
		Ok(entry)
	}

	/// Remove projects matching a display name or a path. Returns how many
	/// entries were dropped.
	pub fn remove_project(&self, target: &str) -> Result<usize> {
		let mut config = self.load()?.config;
		let canonical = canonicalize(Path::new(target)).ok();
		let before = config.projects.len();
		config.projects.retain(|p| {
			let same_path = p.path == target
				|| canonical.as_ref().is_some_and(|c| {
					canonicalize(Path::new(&p.path)).is_ok_and(|existing| &existing == c)
				});
			!(same_path || p.display_name() == target)
		});
		let removed = before - config.projects.len();
		if removed > 0 {
			self.save(&config)?;
		}
		Ok(removed)
	}
}

pub fn base_dir() -> Result<PathBuf> {
	dirs::home_dir()
		.map(|p| p.join(".canopy"))
		.ok_or_else(|| anyhow::anyhow!("Failed to resolve home directory"))
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	fn setup_store() -> (TempDir, ConfigStore) {
		let temp = TempDir::new().unwrap();
		let store = ConfigStore::new(temp.path().join("cfg").join("config.toml"));
		(temp, store)
	}

	#[test]
	fn test_missing_file_reports_not_exists() {
		let (_temp, store) = setup_store();
		let loaded = store.load().unwrap();
		assert!(!loaded.exists);
		assert!(loaded.config.projects.is_empty());
		assert_eq!(loaded.config.general.session_prefix, DEFAULT_SESSION_PREFIX);
	}

	#[test]
	fn test_partial_general_section_uses_defaults() {
		let (_temp, store) = setup_store();
		fs::create_dir_all(store.path().parent().unwrap()).unwrap();
		fs::write(
			store.path(),
			"[general]\npoll_interval_ms = 500\n\n[[projects]]\npath = \"/tmp\"\n",
		)
		.unwrap();

		let loaded = store.load().unwrap();
		assert!(loaded.exists);
		assert_eq!(loaded.config.general.poll_interval_ms, 500);
		assert_eq!(loaded.config.general.worktree_dir, ".worktrees");
		assert_eq!(loaded.config.projects.len(), 1);
		assert_eq!(loaded.config.projects[0].name, None);
	}

	#[test]
	fn test_poll_interval_is_clamped() {
		let general = General {
			poll_interval_ms: 1,
			..General::default()
		};
		assert_eq!(general.poll_interval().as_millis(), 250);
	}

	#[test]
	fn test_add_project_stores_canonical_path_and_rejects_duplicates() {
		let (temp, store) = setup_store();
		let project = temp.path().join("demo");
		fs::create_dir_all(&project).unwrap();

		let entry = store.add_project(&project, None).unwrap();
		assert_eq!(PathBuf::from(&entry.path), fs::canonicalize(&project).unwrap());
		assert_eq!(entry.display_name(), "demo");
		assert!(store.add_project(&project.join("."), Some("again".into())).is_err());

		let loaded = store.load().unwrap();
		assert_eq!(loaded.config.projects.len(), 1);
		assert!(!store.path().with_extension("toml.tmp").exists());
	}

	#[test]
	fn test_remove_project_by_name() {
		let (temp, store) = setup_store();
		let project = temp.path().join("demo");
		fs::create_dir_all(&project).unwrap();
		store.add_project(&project, Some("Demo".into())).unwrap();

		assert_eq!(store.remove_project("nope").unwrap(), 0);
		assert_eq!(store.remove_project("Demo").unwrap(), 1);
		assert!(store.load().unwrap().config.projects.is_empty());
	}
}
