use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;

/// Raw workspace paths for a repository root.
pub trait WorktreeLister: Send + Sync {
	fn list(&self, root: &Path) -> Result<Vec<PathBuf>>;
}

#[derive(Debug, Clone, Default)]
pub struct GitWorktrees;

impl WorktreeLister for GitWorktrees {
	fn list(&self, root: &Path) -> Result<Vec<PathBuf>> {
		let output = Command::new("git")
			.arg("-C")
			.arg(root)
			.args(["worktree", "list", "--porcelain"])
			.output()
			.context("failed to run git worktree list")?;
		if !output.status.success() {
			return Err(anyhow::anyhow!(
				"git worktree list failed in {}: {}",
				root.display(),
				String::from_utf8_lossy(&output.stderr).trim()
			));
		}
		Ok(parse_porcelain(&String::from_utf8_lossy(&output.stdout)))
	}
}

// Format: worktree /path\nHEAD <sha>\nbranch refs/heads/name\n\n
fn parse_porcelain(output: &str) -> Vec<PathBuf> {
	output
		.lines()
		.filter_map(|line| line.strip_prefix("worktree "))
		.map(|path| PathBuf::from(path.trim_end()))
		.collect()
}

pub fn add_worktree(root: &Path, path: &Path, branch: &str) -> Result<()> {
	let status = Command::new("git")
		.arg("-C")
		.arg(root)
		.args(["worktree", "add", "-b", branch])
		.arg(path)
		.status()
		.context("failed to run git worktree add")?;
	if !status.success() {
		return Err(anyhow::anyhow!(
			"git worktree add {} failed ({})",
			path.display(),
			status
		));
	}
	Ok(())
}
