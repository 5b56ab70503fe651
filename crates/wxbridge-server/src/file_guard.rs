use std::path::{Path, PathBuf};

/// Checks that an outbound file exists, is a regular file, and sits inside
/// one of the allowed directories (any directory when the list is empty).
#[derive(Clone, Debug, Default)]
pub struct FileGuard {
    allowed_dirs: Vec<PathBuf>,
}

impl FileGuard {
    pub fn new(allowed_dirs: Vec<PathBuf>) -> Self {
        let allowed_dirs = allowed_dirs
            .into_iter()
            .map(|d| d.canonicalize().unwrap_or(d))
            .collect();
        Self { allowed_dirs }
    }

    /// Resolve `path` to a canonical file path or describe why it is refused.
    pub fn check(&self, path: &str) -> Result<PathBuf, String> {
        let candidate = Path::new(path);
        let resolved = candidate
            .canonicalize()
            .map_err(|_| format!("File not found: {path}"))?;

        if !resolved.is_file() {
            return Err(format!("Path is not a file: {path}"));
        }

        if !self.allowed_dirs.is_empty()
            && !self.allowed_dirs.iter().any(|dir| resolved.starts_with(dir))
        {
            tracing::warn!(path = %resolved.display(), "outbound file outside allowed directories");
            return Err(format!("File is outside the allowed directories: {path}"));
        }

        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("report.pdf");
        std::fs::write(&file, b"%PDF").unwrap();

        let guard = FileGuard::default();
        let resolved = guard.check(file.to_str().unwrap()).unwrap();
        assert!(resolved.ends_with("report.pdf"));
    }

    #[test]
    fn rejects_missing_file() {
        let guard = FileGuard::default();
        let err = guard.check("/definitely/not/here.txt").unwrap_err();
        assert_eq!(err, "File not found: /definitely/not/here.txt");
    }

    #[test]
    fn rejects_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_str().unwrap().to_string();
        let err = FileGuard::default().check(&path).unwrap_err();
        assert!(err.starts_with("Path is not a file"), "got: {err}");
    }

    #[test]
    fn enforces_allowed_dirs() {
        let allowed = tempfile::tempdir().unwrap();
        let other = tempfile::tempdir().unwrap();
        let inside = allowed.path().join("ok.txt");
        let outside = other.path().join("no.txt");
        std::fs::write(&inside, b"1").unwrap();
        std::fs::write(&outside, b"2").unwrap();

        let guard = FileGuard::new(vec![allowed.path().to_path_buf()]);
        assert!(guard.check(inside.to_str().unwrap()).is_ok());
        let err = guard.check(outside.to_str().unwrap()).unwrap_err();
        assert!(err.starts_with("File is outside the allowed directories"));
    }

    #[cfg(unix)]
    #[test]
    fn dot_dot_cannot_escape_allowed_dir() {
        let allowed = tempfile::tempdir().unwrap();
        let sub = allowed.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        let other = tempfile::tempdir().unwrap();
        let outside = other.path().join("secret.txt");
        std::fs::write(&outside, b"x").unwrap();

        let sneaky = format!(
            "{}/{}{}",
            sub.display(),
            "../".repeat(32),
            outside.strip_prefix("/").unwrap().display()
        );
        let guard = FileGuard::new(vec![allowed.path().to_path_buf()]);
        let err = guard.check(&sneaky).unwrap_err();
        assert!(err.starts_with("File is outside the allowed directories"), "got: {err}");
    }
}
