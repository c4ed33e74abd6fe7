use std::env;
use std::path::{Path, PathBuf};

use crate::error::{ChainError, Result};

/// Look up an executable by name in the directories listed in `PATH`
pub fn find_in_path(binary: &str) -> Option<PathBuf> {
    let path_var = env::var_os("PATH")?;
    find_in_dirs(binary, env::split_paths(&path_var))
}

fn find_in_dirs<I>(binary: &str, dirs: I) -> Option<PathBuf>
where
    I: IntoIterator<Item = PathBuf>,
{
    for dir in dirs {
        let full = dir.join(binary);
        if full.is_file() {
            return Some(full);
        }
        #[cfg(windows)]
        {
            let exe = dir.join(format!("{binary}.exe"));
            if exe.is_file() {
                return Some(exe);
            }
        }
    }
    None
}

/// Resolve a binary, preferring an explicitly configured path.
///
/// A configured path is used as-is without checking the filesystem, so
/// callers can point at wrappers or binaries outside `PATH`.
pub fn resolve(binary: &str, configured: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = configured {
        return Ok(path.to_path_buf());
    }
    find_in_path(binary).ok_or_else(|| ChainError::NotFound {
        binary: binary.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_find_in_dirs_returns_first_match() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        fs::write(second.path().join("ffmpeg"), "").unwrap();

        let found = find_in_dirs(
            "ffmpeg",
            vec![first.path().to_path_buf(), second.path().to_path_buf()],
        );
        assert_eq!(found, Some(second.path().join("ffmpeg")));
    }

    #[test]
    fn test_find_in_dirs_ignores_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("ffprobe")).unwrap();

        assert!(find_in_dirs("ffprobe", vec![dir.path().to_path_buf()]).is_none());
    }

    #[test]
    fn test_resolve_prefers_configured_path() {
        let path = resolve("definitely-not-a-real-binary", Some(Path::new("/opt/ffmpeg/bin/ffmpeg"))).unwrap();
        assert_eq!(path, PathBuf::from("/opt/ffmpeg/bin/ffmpeg"));
    }

    #[test]
    fn test_resolve_missing_binary() {
        let err = resolve("definitely-not-a-real-binary-4f1c", None).unwrap_err();
        assert!(matches!(err, ChainError::NotFound { ref binary } if binary == "definitely-not-a-real-binary-4f1c"));
    }
}
