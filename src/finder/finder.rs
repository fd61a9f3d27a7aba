use is_executable::IsExecutable;
use std::path::{Path, PathBuf};
use std::{env, fs};

/// Resolves `program` the way spawning it would: names containing a path
/// separator are taken relative to `working_dir`, bare names are looked up
/// on `PATH`.
pub fn resolve_program(program: &str, working_dir: Option<&Path>) -> Option<PathBuf> {
    if program.contains(std::path::MAIN_SEPARATOR) || program.contains('/') {
        let path = match working_dir {
            Some(dir) => dir.join(program),
            None => PathBuf::from(program),
        };
        return is_executable_file(&path).then_some(path);
    }
    find_in_path(program)
}

pub fn find_in_path(executable: &str) -> Option<PathBuf> {
    env::var_os("PATH").and_then(|paths| {
        env::split_paths(&paths).find_map(|dir| {
            let full_path = dir.join(executable);
            if is_executable_file(&full_path) {
                fs::canonicalize(&full_path).ok()
            } else {
                None
            }
        })
    })
}

fn is_executable_file(path: &Path) -> bool {
    path.is_file() && path.is_executable()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_find_shell_on_path() {
        let path = find_in_path("sh").unwrap();
        assert!(path.is_absolute());
    }

    #[test]
    fn test_missing_program() {
        assert_eq!(resolve_program("no-such-tool-xyz", None), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_relative_program_uses_working_dir() {
        use std::fs;
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let script = dir.path().join("tool.sh");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        assert_eq!(resolve_program("./tool.sh", Some(dir.path())), None);

        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        assert_eq!(
            resolve_program("./tool.sh", Some(dir.path())),
            Some(dir.path().join("./tool.sh"))
        );
    }
}
