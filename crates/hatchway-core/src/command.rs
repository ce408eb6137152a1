use std::path::PathBuf;

use crate::package::{Ecosystem, ParsedPackage};

/// Node and Python package runners. Both resolve the requested package on
/// first use; neither needs a prior install step.
pub const NODE_RUNNER: &str = "npx";
pub const PYTHON_RUNNER: &str = "uvx";

/// A concrete command + argv for spawning a package as a child process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub command: String,
    pub args: Vec<String>,
}

pub fn build_command(
    ecosystem: Ecosystem,
    pkg: &ParsedPackage,
    extra_args: &[String],
) -> CommandSpec {
    let (command, mut args) = match ecosystem {
        Ecosystem::Node => {
            let token = if pkg.is_pinned() {
                format!("{}@{}", pkg.full_name, pkg.version)
            } else {
                pkg.full_name.clone()
            };
            (NODE_RUNNER, vec!["-y".to_string(), token])
        }
        Ecosystem::Python => {
            let token = if pkg.is_pinned() {
                format!("{}=={}", pkg.full_name, pkg.version)
            } else {
                pkg.full_name.clone()
            };
            (PYTHON_RUNNER, vec![token])
        }
    };
    args.extend(extra_args.iter().cloned());

    CommandSpec {
        command: command.to_string(),
        args,
    }
}

/// Explicit `PATH` walk instead of shelling out to `which`.
pub fn find_in_path(command: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path) {
        let candidate = dir.join(command);
        if is_executable(&candidate) {
            return Some(candidate);
        }
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &std::path::Path) -> bool {
    use std::os::unix::fs::PermissionsExt as _;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &std::path::Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::parse_package;

    #[test]
    fn node_command_pins_version_with_at() {
        let spec = build_command(Ecosystem::Node, &parse_package("@scope/pkg@1.2.3"), &[]);
        assert_eq!(spec.command, "npx");
        assert_eq!(spec.args, vec!["-y", "@scope/pkg@1.2.3"]);
    }

    #[test]
    fn node_command_latest_has_no_suffix() {
        let spec = build_command(Ecosystem::Node, &parse_package("pkg"), &[]);
        assert_eq!(spec.args, vec!["-y", "pkg"]);
    }

    #[test]
    fn python_command_pins_version_with_double_equals() {
        let spec = build_command(Ecosystem::Python, &parse_package("pkg@2.0"), &[]);
        assert_eq!(spec.command, "uvx");
        assert_eq!(spec.args, vec!["pkg==2.0"]);
    }

    #[test]
    fn extra_args_are_appended_verbatim() {
        let extra = vec!["--db".to_string(), "/tmp/x".to_string()];
        let spec = build_command(Ecosystem::Node, &parse_package("pkg"), &extra);
        assert_eq!(spec.args, vec!["-y", "pkg", "--db", "/tmp/x"]);
    }

    #[test]
    fn find_in_path_locates_a_common_binary() {
        // `sh` exists on every unix CI box this crate targets.
        #[cfg(unix)]
        assert!(find_in_path("sh").is_some());
        assert!(find_in_path("definitely-not-a-real-binary-xyz").is_none());
    }
}
