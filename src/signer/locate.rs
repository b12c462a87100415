//! Locate signtool.exe

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{Result, SignitError};

/// signtool executable name
pub const SIGNTOOL_BINARY: &str = "signtool.exe";

/// Windows SDK folders that ship signtool.exe
pub const SIGNTOOL_SEARCH_PATHS: &[&str] = &[
    r"C:\Program Files (x86)\Windows Kits\10\bin",
    r"C:\Program Files (x86)\Windows Kits\8.1\bin",
    r"C:\Program Files (x86)\Windows Kits\8.0\bin",
    r"C:\Program Files\Windows Kits\10\bin",
    r"C:\Program Files (x86)\Microsoft SDKs\Windows\v10.0A\bin",
    r"C:\Program Files (x86)\Microsoft SDKs\ClickOnce\SignTool",
];

/// Installation instructions for a missing signtool
pub const SIGNTOOL_INSTALL_INSTRUCTIONS: &str = "\
signtool.exe not found in PATH or the Windows SDK folders.

Install the Windows SDK:
https://developer.microsoft.com/en-us/windows/downloads/windows-sdk/

Or install Visual Studio with the 'Desktop development with C++' workload.

Then pass --signtool <path> or set signtool_path in the config file.";

/// signtool.exe from `PATH`, canonicalized.
#[must_use]
pub fn find_signtool_in_path() -> Option<PathBuf> {
    let found = which::which(SIGNTOOL_BINARY).ok()?;
    Some(std::fs::canonicalize(&found).unwrap_or(found))
}

/// Every signtool.exe below `roots`, newest SDK first.
///
/// Paths are deduplicated case-insensitively and sorted descending, so higher
/// SDK version folders come first.
#[must_use]
pub fn find_signtool_under<P: AsRef<Path>>(roots: &[P]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for root in roots {
        let root = root.as_ref();
        if !root.is_dir() {
            continue;
        }
        found.extend(
            WalkDir::new(root)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .filter(|entry| {
                    entry
                        .file_name()
                        .to_string_lossy()
                        .eq_ignore_ascii_case(SIGNTOOL_BINARY)
                })
                .map(walkdir::DirEntry::into_path),
        );
    }

    found.sort_by(|a, b| b.cmp(a));

    let mut seen = HashSet::new();
    found.retain(|path| seen.insert(path.to_string_lossy().to_lowercase()));
    found
}

/// signtool.exe in the known Windows SDK folders.
#[must_use]
pub fn find_signtool_in_windows_kits() -> Vec<PathBuf> {
    find_signtool_under(SIGNTOOL_SEARCH_PATHS)
}

/// Prefer an x64 build, otherwise the newest hit.
fn pick_preferred(candidates: Vec<PathBuf>) -> Option<PathBuf> {
    candidates
        .iter()
        .find(|path| path.to_string_lossy().to_lowercase().contains("x64"))
        .cloned()
        .or_else(|| candidates.into_iter().next())
}

/// Find signtool.exe: `PATH` first, then the Windows SDK folders.
#[must_use]
pub fn find_signtool() -> Option<PathBuf> {
    find_signtool_in_path().or_else(|| pick_preferred(find_signtool_in_windows_kits()))
}

/// True for an existing regular file whose name contains "signtool".
#[must_use]
pub fn validate_signtool(path: &Path) -> bool {
    path.is_file()
        && path
            .file_name()
            .is_some_and(|name| name.to_string_lossy().to_lowercase().contains("signtool"))
}

/// Use `configured` if given (it must validate), otherwise search.
pub fn resolve_signtool(configured: Option<&Path>) -> Result<PathBuf> {
    match configured {
        Some(path) if validate_signtool(path) => Ok(path.to_path_buf()),
        Some(path) => Err(SignitError::InvalidConfig(format!(
            "Not a signtool executable: {}",
            path.display()
        ))),
        None => find_signtool()
            .ok_or_else(|| SignitError::MissingDependency(SIGNTOOL_INSTALL_INSTRUCTIONS.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"MZ").unwrap();
    }

    #[test]
    fn sdk_search_sorts_newest_first_and_skips_missing_roots() {
        let temp = TempDir::new().unwrap();
        let kits = temp.path().join("Windows Kits").join("10").join("bin");
        let old = kits.join("10.0.19041.0").join("x86").join("signtool.exe");
        let new = kits.join("10.0.22621.0").join("x64").join("signtool.exe");
        touch(&old);
        touch(&new);
        touch(&kits.join("10.0.22621.0").join("x64").join("makecert.exe"));

        let missing = temp.path().join("does-not-exist");
        let found = find_signtool_under(&[kits.as_path(), missing.as_path()]);

        assert_eq!(found, vec![new, old]);
    }

    #[test]
    fn duplicate_roots_are_deduplicated() {
        let temp = TempDir::new().unwrap();
        let tool = temp.path().join("bin").join("signtool.exe");
        touch(&tool);

        let root = temp.path().join("bin");
        let found = find_signtool_under(&[root.as_path(), root.as_path()]);

        assert_eq!(found, vec![tool]);
    }

    #[test]
    fn x64_build_is_preferred() {
        let picked = pick_preferred(vec![
            PathBuf::from(r"C:\Kits\bin\10.0.2\x86\signtool.exe"),
            PathBuf::from(r"C:\Kits\bin\10.0.1\x64\signtool.exe"),
        ]);
        assert_eq!(picked, Some(PathBuf::from(r"C:\Kits\bin\10.0.1\x64\signtool.exe")));

        let picked = pick_preferred(vec![PathBuf::from(r"C:\Kits\arm64\signtool.exe")]);
        assert_eq!(picked, Some(PathBuf::from(r"C:\Kits\arm64\signtool.exe")));
        assert_eq!(pick_preferred(Vec::new()), None);
    }

    #[test]
    fn validation_requires_existing_signtool_file() {
        let temp = TempDir::new().unwrap();
        let tool = temp.path().join("SignTool.exe");
        let other = temp.path().join("notepad.exe");
        touch(&tool);
        touch(&other);

        assert!(validate_signtool(&tool));
        assert!(!validate_signtool(&other));
        assert!(!validate_signtool(temp.path()));
        assert!(!validate_signtool(&temp.path().join("signtool-missing.exe")));
    }

    #[test]
    fn configured_path_must_validate() {
        let temp = TempDir::new().unwrap();
        let tool = temp.path().join("signtool.exe");
        touch(&tool);

        assert_eq!(resolve_signtool(Some(&tool)).unwrap(), tool);
        assert!(matches!(
            resolve_signtool(Some(&temp.path().join("nope.exe"))),
            Err(SignitError::InvalidConfig(_))
        ));
    }
}
