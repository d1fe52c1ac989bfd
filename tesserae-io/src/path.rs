//! Named base-directory registry and next-filename allocation.

use crate::error::{IoError, IoResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Zero-padding width applied to generated filenames.
pub const DIGITS: usize = 5;

/// A small registry of named base directories (`input`, `output`, `temp`,
/// `prompt`) with path-containment checks and next-free-filename allocation.
#[derive(Debug, Clone, Default)]
pub struct PathTable {
    bases: HashMap<String, PathBuf>,
}

impl PathTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates (if `create`) and registers `path` under `mode`.
    pub fn set_base(&mut self, mode: &str, path: impl AsRef<Path>, create: bool) -> IoResult<()> {
        let path = path.as_ref();
        if create {
            std::fs::create_dir_all(path)?;
        }
        let resolved = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.bases.insert(mode.to_string(), resolved);
        Ok(())
    }

    /// Creates the four standard modes (`input`, `output`, `temp`, `prompt`)
    /// under `root`, mirroring `set_default_base_paths`.
    pub fn with_defaults(root: impl AsRef<Path>) -> IoResult<Self> {
        let root = root.as_ref();
        let mut table = Self::new();
        for mode in ["input", "output", "temp", "prompt"] {
            table.set_base(mode, root.join(mode), true)?;
        }
        Ok(table)
    }

    fn base(&self, mode: &str) -> IoResult<&Path> {
        self.bases
            .get(mode)
            .map(PathBuf::as_path)
            .ok_or_else(|| IoError::UnknownMode(mode.to_string()))
    }

    /// Resolves `path` (relative or absolute) against `mode`'s base
    /// directory and rejects anything that would escape it, using
    /// canonicalized-path component comparison rather than a naive string
    /// prefix check.
    pub fn resolve(&self, mode: &str, path: impl AsRef<Path>) -> IoResult<PathBuf> {
        let base = self.base(mode)?;
        let candidate = if path.as_ref().is_absolute() {
            path.as_ref().to_path_buf()
        } else {
            base.join(path.as_ref())
        };
        let normalized = normalize(&candidate);
        if !normalized.starts_with(base) {
            return Err(IoError::PathEscape {
                path: normalized.display().to_string(),
                base: base.display().to_string(),
            });
        }
        Ok(normalized)
    }

    /// Largest numeric id found among files in `mode`'s directory named
    /// `<prefix><digits>.<anything>`.
    pub fn find_max_id(&self, mode: &str, prefix: &str) -> IoResult<u64> {
        let base = self.base(mode)?;
        let mut max_id = 0u64;
        if let Ok(entries) = std::fs::read_dir(base) {
            for entry in entries.flatten() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if let Some(rest) = name.strip_prefix(prefix) {
                    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
                    if !digits.is_empty() {
                        if let Ok(id) = digits.parse::<u64>() {
                            max_id = max_id.max(id);
                        }
                    }
                }
            }
        }
        Ok(max_id)
    }

    /// Next unused zero-padded filename under `mode`, skipping collisions.
    pub fn next_path(&self, mode: &str, ext: &str, prefix: &str) -> IoResult<PathBuf> {
        let base = self.base(mode)?;
        let mut id = self.find_max_id(mode, prefix)? + 1;
        loop {
            let name = format!("{prefix}{id:0width$}.{ext}", width = DIGITS);
            let candidate = base.join(&name);
            if !candidate.exists() {
                return Ok(candidate);
            }
            id += 1;
        }
    }
}

/// Lexically removes `.`/`..` components without touching the filesystem
/// (the path may not exist yet, e.g. a not-yet-written output file).
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        use std::path::Component::*;
        match component {
            ParentDir => {
                out.pop();
            }
            CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Checks that `path`'s extension is one of `allowed` (case-insensitive).
pub fn verify_extension(path: &Path, allowed: &[&str]) -> IoResult<()> {
    let ext = path.extension().map(|e| e.to_string_lossy().to_lowercase());
    let ok = ext
        .as_deref()
        .map(|e| allowed.iter().any(|a| a.eq_ignore_ascii_case(e)))
        .unwrap_or(false);
    if ok {
        Ok(())
    } else {
        Err(IoError::BadExtension {
            found: ext,
            allowed: allowed.iter().map(|s| s.to_string()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_path_increments_and_zero_pads() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = PathTable::new();
        table.set_base("output", dir.path(), true).unwrap();
        std::fs::write(dir.path().join("out_00003.png"), b"x").unwrap();
        let next = table.next_path("output", "png", "out_").unwrap();
        assert_eq!(next.file_name().unwrap().to_str().unwrap(), "out_00004.png");
    }

    #[test]
    fn resolve_rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = PathTable::new();
        table.set_base("input", dir.path(), true).unwrap();
        let escaped = table.resolve("input", "../../etc/passwd");
        assert!(escaped.is_err());
    }

    #[test]
    fn verify_extension_checks_allow_list() {
        assert!(verify_extension(Path::new("a.png"), &["png", "jpg"]).is_ok());
        assert!(verify_extension(Path::new("a.exe"), &["png", "jpg"]).is_err());
    }
}
