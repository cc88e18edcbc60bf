use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Expand a leading `~/` to the home directory.
pub fn expand_path(input: &str) -> PathBuf {
	if let Some(rest) = input.strip_prefix("~/") {
		if let Some(home) = dirs::home_dir() {
			return home.join(rest);
		}
	}
	if input == "~" {
		if let Some(home) = dirs::home_dir() {
			return home;
		}
	}
	PathBuf::from(input)
}

/// Resolve a path to its absolute, symlink-free form.
///
/// Every equality and containment check during placement goes through this,
/// so two spellings of the same directory always compare equal.
pub fn canonicalize(path: &Path) -> Result<PathBuf> {
	let expanded = match path.to_str() {
		Some(s) => expand_path(s),
		None => path.to_path_buf(),
	};
	std::fs::canonicalize(&expanded)
		.with_context(|| format!("cannot resolve {}", expanded.display()))
}

/// True when `path` equals `root` or lies underneath it. Component-wise, so
/// `/r/subway` is not inside `/r/sub`.
pub fn is_within(path: &Path, root: &Path) -> bool {
	path.starts_with(root)
}

/// Index of the candidate that is the longest prefix of `path`.
pub fn longest_prefix<'a, I>(path: &Path, candidates: I) -> Option<usize>
where
	I: IntoIterator<Item = &'a Path>,
{
	candidates
		.into_iter()
		.enumerate()
		.filter(|(_, root)| is_within(path, root))
		.max_by_key(|(_, root)| root.components().count())
		.map(|(idx, _)| idx)
}

/// `path` relative to `root`, or `path` itself when it is not underneath.
pub fn relative_to(path: &Path, root: &Path) -> PathBuf {
	path.strip_prefix(root)
		.map(Path::to_path_buf)
		.unwrap_or_else(|_| path.to_path_buf())
}

/// Last path component as a display name.
pub fn dir_name(path: &Path) -> String {
	path.file_name()
		.map(|n| n.to_string_lossy().into_owned())
		.unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	#[test]
	fn test_canonicalize_resolves_dot_segments() {
		let temp = TempDir::new().unwrap();
		let nested = temp.path().join("a").join("b");
		std::fs::create_dir_all(&nested).unwrap();

		let messy = temp.path().join("a").join(".").join("b").join("..").join("b");
		let canonical = canonicalize(&messy).unwrap();
		assert_eq!(canonical, std::fs::canonicalize(&nested).unwrap());
	}

	#[cfg(unix)]
	#[test]
	fn test_canonicalize_resolves_symlinks() {
		let temp = TempDir::new().unwrap();
		let real = temp.path().join("real");
		std::fs::create_dir_all(&real).unwrap();
		let link = temp.path().join("link");
		std::os::unix::fs::symlink(&real, &link).unwrap();

		assert_eq!(canonicalize(&link).unwrap(), canonicalize(&real).unwrap());
	}

	#[test]
	fn test_canonicalize_missing_path_fails() {
		let temp = TempDir::new().unwrap();
		assert!(canonicalize(&temp.path().join("gone")).is_err());
	}

	#[test]
	fn test_is_within_is_component_wise() {
		assert!(is_within(Path::new("/r/sub"), Path::new("/r")));
		assert!(is_within(Path::new("/r"), Path::new("/r")));
		assert!(!is_within(Path::new("/rx"), Path::new("/r")));
		assert!(!is_within(Path::new("/r/subway"), Path::new("/r/sub")));
	}

	#[test]
	fn test_longest_prefix_prefers_nested_root() {
		let roots = [PathBuf::from("/r"), PathBuf::from("/r/nested"), PathBuf::from("/other")];
		let pick = |p: &str| longest_prefix(Path::new(p), roots.iter().map(PathBuf::as_path));
		assert_eq!(pick("/r/nested/src"), Some(1));
		assert_eq!(pick("/r/sub"), Some(0));
		assert_eq!(pick("/elsewhere"), None);
	}

	#[test]
	fn test_relative_to() {
		assert_eq!(
			relative_to(Path::new("/r/.worktrees/x"), Path::new("/r")),
			PathBuf::from(".worktrees/x")
		);
		assert_eq!(relative_to(Path::new("/r"), Path::new("/r")), PathBuf::new());
		assert_eq!(relative_to(Path::new("/q"), Path::new("/r")), PathBuf::from("/q"));
	}
}
