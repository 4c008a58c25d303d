//! Privileged access to the host
//!
//! Every file write and process spawn that may need root goes through
//! [`SystemOps`]. Components receive it explicitly instead of checking the
//! effective uid themselves; [`HostSystem`] decides once whether to escalate
//! through `sudo`.

use std::fmt;
use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::error::{ProvisionError, ProvisionResult};

//==============================================================================
// Types
//==============================================================================

/// Captured result of an external command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Human-readable failure description: exit status plus trimmed stderr
    pub fn failure_message(&self) -> String {
        let status = match self.code {
            Some(code) => format!("exit status {}", code),
            None => "terminated by signal".to_string(),
        };
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            status
        } else {
            format!("{}: {}", status, stderr)
        }
    }
}

/// Renders a program and its arguments for logs and error messages
pub fn display_command(program: &str, args: &[&str]) -> String {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

//==============================================================================
// Trait
//==============================================================================

/// Filesystem and process operations performed with the privileges they need
#[async_trait]
pub trait SystemOps: Send + Sync {
    /// Runs a program to completion and captures its output
    ///
    /// A non-zero exit is not an error here; see [`SystemOps::run_checked`].
    async fn run(&self, program: &str, args: &[&str]) -> ProvisionResult<CommandOutput>;

    /// Writes `contents` to `path`, replacing it, with permission bits `mode`
    async fn write_file(&self, path: &Path, contents: &str, mode: u32) -> ProvisionResult<()>;

    /// Appends `contents` to an existing file, keeping its owner and mode
    async fn append_file(&self, path: &Path, contents: &str) -> ProvisionResult<()>;

    /// Reads a file, `None` when it does not exist
    async fn read_file(&self, path: &Path) -> ProvisionResult<Option<String>>;

    async fn create_dir_all(&self, path: &Path) -> ProvisionResult<()>;

    /// Points `link` at `target`, replacing an existing link
    async fn symlink(&self, target: &Path, link: &Path) -> ProvisionResult<()>;

    /// Removes a file or link; an absent path is not an error
    async fn remove_file(&self, path: &Path) -> ProvisionResult<()>;

    /// Runs a program and fails with [`ProvisionError::Command`] on non-zero exit
    async fn run_checked(&self, program: &str, args: &[&str]) -> ProvisionResult<CommandOutput> {
        let output = self.run(program, args).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(ProvisionError::Command {
                command: display_command(program, args),
                message: output.failure_message(),
            })
        }
    }
}

//==============================================================================
// Host implementation
//==============================================================================

/// The local machine, escalating through `sudo` when not running as root
pub struct HostSystem {
    escalate: bool,
}

impl fmt::Debug for HostSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostSystem")
            .field("escalate", &self.escalate)
            .finish()
    }
}

impl HostSystem {
    /// Escalates when the effective uid is not 0
    pub fn detect() -> Self {
        // SAFETY: geteuid has no preconditions and cannot fail.
        let euid = unsafe { libc::geteuid() };
        Self::new(euid != 0)
    }

    pub fn new(escalate: bool) -> Self {
        Self { escalate }
    }

    pub fn escalates(&self) -> bool {
        self.escalate
    }

    fn command(&self, program: &str, args: &[&str]) -> Command {
        let mut cmd = if self.escalate {
            let mut cmd = Command::new("sudo");
            cmd.arg(program);
            cmd
        } else {
            Command::new(program)
        };
        cmd.args(args);
        cmd
    }

    /// Runs `tee [-a] path` with escalation, feeding `contents` on stdin
    async fn tee(&self, path: &Path, contents: &str, append: bool) -> ProvisionResult<()> {
        let path_str = path.display().to_string();
        let args: Vec<&str> = if append {
            vec!["-a", path_str.as_str()]
        } else {
            vec![path_str.as_str()]
        };
        let mut child = self
            .command("tee", &args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProvisionError::Command {
                command: format!("tee {}", path_str),
                message: e.to_string(),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(contents.as_bytes())
                .await
                .map_err(|e| ProvisionError::io(path, e))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ProvisionError::io(path, e))?;
        if !output.status.success() {
            return Err(ProvisionError::Command {
                command: format!("tee {}", path_str),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SystemOps for HostSystem {
    async fn run(&self, program: &str, args: &[&str]) -> ProvisionResult<CommandOutput> {
        let line = display_command(program, args);
        debug!(escalate = self.escalate, "Running {}", line);

        let output = self
            .command(program, args)
            .stdin(Stdio::inherit())
            .output()
            .await
            .map_err(|e| ProvisionError::Command {
                command: line,
                message: e.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn write_file(&self, path: &Path, contents: &str, mode: u32) -> ProvisionResult<()> {
        debug!(path = %path.display(), mode = format!("{:o}", mode), "Writing file");

        if self.escalate {
            // Create with the final mode first so the content is never exposed
            // through a more permissive default.
            let path_str = path.display().to_string();
            let mode_str = format!("{:o}", mode);
            self.run_checked("install", &["-m", &mode_str, "/dev/null", &path_str])
                .await?;
            return self.tee(path, contents, false).await;
        }

        use std::os::unix::fs::PermissionsExt;

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(path)
            .await
            .map_err(|e| ProvisionError::io(path, e))?;
        // mode() only applies on creation
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
            .await
            .map_err(|e| ProvisionError::io(path, e))?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(|e| ProvisionError::io(path, e))?;
        file.flush().await.map_err(|e| ProvisionError::io(path, e))?;
        Ok(())
    }

    async fn append_file(&self, path: &Path, contents: &str) -> ProvisionResult<()> {
        debug!(path = %path.display(), "Appending to file");

        if self.escalate {
            return self.tee(path, contents, true).await;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(path)
            .await
            .map_err(|e| ProvisionError::io(path, e))?;
        file.write_all(contents.as_bytes())
            .await
            .map_err(|e| ProvisionError::io(path, e))?;
        file.flush().await.map_err(|e| ProvisionError::io(path, e))?;
        Ok(())
    }

    async fn read_file(&self, path: &Path) -> ProvisionResult<Option<String>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied && self.escalate => {
                let path_str = path.display().to_string();
                let output = self.run("cat", &[&path_str]).await?;
                if output.success() {
                    Ok(Some(output.stdout))
                } else {
                    Err(ProvisionError::io(path, e))
                }
            }
            Err(e) => Err(ProvisionError::io(path, e)),
        }
    }

    async fn create_dir_all(&self, path: &Path) -> ProvisionResult<()> {
        if self.escalate {
            let path_str = path.display().to_string();
            self.run_checked("mkdir", &["-p", &path_str]).await?;
            return Ok(());
        }
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| ProvisionError::io(path, e))
    }

    async fn symlink(&self, target: &Path, link: &Path) -> ProvisionResult<()> {
        if self.escalate {
            let target_str = target.display().to_string();
            let link_str = link.display().to_string();
            self.run_checked("ln", &["-sfn", &target_str, &link_str])
                .await?;
            return Ok(());
        }
        self.remove_file(link).await?;
        tokio::fs::symlink(target, link)
            .await
            .map_err(|e| ProvisionError::io(link, e))
    }

    async fn remove_file(&self, path: &Path) -> ProvisionResult<()> {
        if self.escalate {
            let path_str = path.display().to_string();
            self.run_checked("rm", &["-f", &path_str]).await?;
            return Ok(());
        }
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ProvisionError::io(path, e)),
        }
    }
}

//==============================================================================
// Tests
//==============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    #[test]
    fn test_command_output_failure_message() {
        let output = CommandOutput {
            code: Some(1),
            stdout: String::new(),
            stderr: "nginx: [emerg] unknown directive\n".to_string(),
        };
        assert!(!output.success());
        assert_eq!(
            output.failure_message(),
            "exit status 1: nginx: [emerg] unknown directive"
        );

        let output = CommandOutput {
            code: None,
            ..Default::default()
        };
        assert_eq!(output.failure_message(), "terminated by signal");
    }

    #[test]
    fn test_display_command() {
        assert_eq!(display_command("nginx", &["-t"]), "nginx -t");
        assert_eq!(display_command("true", &[]), "true");
    }

    #[tokio::test]
    async fn test_write_and_read_file_with_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("token");
        let system = HostSystem::new(false);

        system.write_file(&path, "secret\n", 0o600).await.unwrap();
        assert_eq!(
            system.read_file(&path).await.unwrap().as_deref(),
            Some("secret\n")
        );
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);

        // rewriting an existing file tightens its mode as well
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        system.write_file(&path, "other\n", 0o600).await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "other\n");
    }

    #[tokio::test]
    async fn test_append_keeps_mode() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app.conf");
        std::fs::write(&path, "[options]\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o640)).unwrap();

        let system = HostSystem::new(false);
        system.append_file(&path, "proxy_mode = True\n").await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "[options]\nproxy_mode = True\n"
        );
        let mode = std::fs::metadata(&path).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o640);
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let dir = TempDir::new().unwrap();
        let system = HostSystem::new(false);
        assert_eq!(system.read_file(&dir.path().join("absent")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_symlink_replaces_existing_link() {
        let dir = TempDir::new().unwrap();
        let first = dir.path().join("first");
        let second = dir.path().join("second");
        let link = dir.path().join("link");
        std::fs::write(&first, "one").unwrap();
        std::fs::write(&second, "two").unwrap();

        let system = HostSystem::new(false);
        system.symlink(&first, &link).await.unwrap();
        system.symlink(&second, &link).await.unwrap();

        assert_eq!(std::fs::read_link(&link).unwrap(), second);
        assert_eq!(system.read_file(&link).await.unwrap().as_deref(), Some("two"));
    }

    #[tokio::test]
    async fn test_remove_missing_file_is_ok() {
        let dir = TempDir::new().unwrap();
        let system = HostSystem::new(false);
        system.remove_file(&dir.path().join("absent")).await.unwrap();
    }

    #[tokio::test]
    async fn test_run_captures_exit_status() {
        let system = HostSystem::new(false);
        let ok = system.run("sh", &["-c", "echo hello"]).await.unwrap();
        assert!(ok.success());
        assert_eq!(ok.stdout.trim(), "hello");

        let err = system
            .run_checked("sh", &["-c", "echo broken >&2; exit 3"])
            .await
            .unwrap_err();
        match err {
            ProvisionError::Command { command, message } => {
                assert!(command.starts_with("sh -c"));
                assert_eq!(message, "exit status 3: broken");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
