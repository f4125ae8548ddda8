use std::{
    io,
    path::{Path, PathBuf},
};

use rustix::fs::{access, Access};

/// Add extension to existing PathBuf
///
/// ## Example
///
/// ```rust
/// use std::path::PathBuf;
/// let original_path = "/var/log/mail.log".into();
/// let state_path = linetrack::path_utils::append_extension(original_path, "state");
/// assert_eq!(state_path, PathBuf::from("/var/log/mail.log.state"));
/// ```
pub fn append_extension(path: PathBuf, ext: impl AsRef<std::ffi::OsStr>) -> PathBuf {
    let mut os_string: std::ffi::OsString = path.into();
    os_string.push(".");
    os_string.push(ext.as_ref());
    os_string.into()
}

/// Make `path` absolute by joining it onto the current directory. Symlinks are left alone.
pub fn absolute(path: impl AsRef<Path>) -> io::Result<PathBuf> {
    let path = path.as_ref();
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Default location of the state file for `input`: its absolute path with `.state` appended.
///
/// ```rust
/// # use std::path::PathBuf;
/// let state = linetrack::path_utils::default_state_path("/data/access.log.gz")?;
/// assert_eq!(state, PathBuf::from("/data/access.log.gz.state"));
/// # Ok::<(), std::io::Error>(())
/// ```
pub fn default_state_path(input: impl AsRef<Path>) -> io::Result<PathBuf> {
    Ok(append_extension(absolute(input)?, "state"))
}

/// Check whether the current process may write `path`.
///
/// Files are replaced by writing a sibling and renaming it over the original, so the parent
/// directory has to be a writable directory in every case. An existing file must be writable
/// as well.
pub fn has_write_permission(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !parent.is_dir() || !is_writable(parent) {
        return false;
    }
    !path.exists() || is_writable(path)
}

fn is_writable(path: &Path) -> bool {
    access(path, Access::WRITE_OK).is_ok()
}

#[cfg(test)]
mod tests {
    use std::{fs, os::unix::fs::PermissionsExt, path::PathBuf};

    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("/var/log/mail.log", "/var/log/mail.log.state")]
    #[case("/data/dump.json.gz", "/data/dump.json.gz.state")]
    fn default_state_path_appends_suffix(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(default_state_path(input).unwrap(), PathBuf::from(expected));
    }

    #[test]
    fn default_state_path_is_absolute_for_relative_input() {
        let state = default_state_path("relative.log").unwrap();
        assert!(state.is_absolute());
        assert!(state.ends_with("relative.log.state"));
    }

    #[test]
    fn missing_file_in_writable_directory_is_writable() {
        let dir = tempfile::tempdir().unwrap();
        assert!(has_write_permission(dir.path().join("not-yet-created.state")));
    }

    #[test]
    fn existing_writable_file_is_writable() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(has_write_permission(file.path()));
    }

    #[test]
    fn missing_parent_directory_is_not_writable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("x.state");
        assert!(!has_write_permission(path));
    }

    #[test]
    fn parent_that_is_a_file_is_not_writable() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(!has_write_permission(file.path().join("x.state")));
    }

    #[test]
    fn writable_file_in_read_only_directory_is_not_writable() {
        // root ignores permission bits
        if rustix::process::geteuid().is_root() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.state");
        fs::write(&path, "6").unwrap();
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o555)).unwrap();

        let writable = has_write_permission(&path);
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755)).unwrap();

        assert!(!writable);
    }
}
