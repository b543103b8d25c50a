//! Docker collaborators: network provisioning and compose up/down.
//!
//! Both are traits so tests and alternative runtimes can stand in for the
//! `docker` binary. Network provisioning is a short blocking call made inside
//! `install`. Compose runs are async: dropping an `up`/`down` future stops
//! the underlying command, which is how launch timeouts cancel a slow `up`.

use std::path::Path;
use std::process::{Command, Output};

use async_trait::async_trait;
use thiserror::Error;

/// A failed external command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {code}: {stderr}")]
    Failed {
        command: String,
        code: String,
        stderr: String,
    },
}

pub trait NetworkProvisioner: Send + Sync {
    /// Create `name` unless it already exists.
    fn ensure_network(&self, name: &str) -> Result<(), CommandError>;
}

#[async_trait]
pub trait ComposeRunner: Send + Sync {
    /// `compose up -d` for the unit at `compose_file`. Dropping the future
    /// before it resolves must stop the command.
    async fn up(&self, compose_file: &Path) -> Result<(), CommandError>;
    /// `compose down` for the unit at `compose_file`.
    async fn down(&self, compose_file: &Path) -> Result<(), CommandError>;
}

/// Shells out to the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            program: "docker".to_string(),
        }
    }
}

impl DockerCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn run(&self, args: &[&str], cwd: Option<&Path>) -> Result<String, CommandError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(args);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }
        tracing::debug!(program = %self.program, ?args, "running");
        let output = cmd.output().map_err(|source| self.spawn_error(source))?;
        self.finish(args, output)
    }

    /// The child is killed if the returned future is dropped early.
    async fn compose(&self, compose_file: &Path, tail: &[&str]) -> Result<(), CommandError> {
        let file = compose_file.to_string_lossy();
        let mut args = vec!["compose", "-f", file.as_ref()];
        args.extend_from_slice(tail);

        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&args).kill_on_drop(true);
        if let Some(dir) = compose_file.parent() {
            cmd.current_dir(dir);
        }
        tracing::debug!(program = %self.program, ?args, "running");
        let output = cmd
            .output()
            .await
            .map_err(|source| self.spawn_error(source))?;
        self.finish(&args, output).map(|_| ())
    }

    fn spawn_error(&self, source: std::io::Error) -> CommandError {
        CommandError::Spawn {
            program: self.program.clone(),
            source,
        }
    }

    fn finish(&self, args: &[&str], output: Output) -> Result<String, CommandError> {
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        Err(CommandError::Failed {
            command: format!("{} {}", self.program, args.join(" ")),
            code: output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string()),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

impl NetworkProvisioner for DockerCli {
    fn ensure_network(&self, name: &str) -> Result<(), CommandError> {
        if self.run(&["network", "inspect", name], None).is_ok() {
            return Ok(());
        }
        tracing::info!(network = %name, "creating docker network");
        self.run(&["network", "create", name], None).map(|_| ())
    }
}

#[async_trait]
impl ComposeRunner for DockerCli {
    async fn up(&self, compose_file: &Path) -> Result<(), CommandError> {
        self.compose(compose_file, &["up", "-d"]).await
    }

    async fn down(&self, compose_file: &Path) -> Result<(), CommandError> {
        self.compose(compose_file, &["down", "--remove-orphans"]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let cli = DockerCli::new("appdock-test-no-such-binary");
        let err = cli.ensure_network("x").unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }

    #[tokio::test]
    async fn nonzero_exit_reports_command_and_code() {
        // `false` ignores its arguments and exits 1.
        let cli = DockerCli::new("false");
        let err = cli.up(Path::new("/tmp/docker-compose.yml")).await.unwrap_err();
        match err {
            CommandError::Failed { command, code, .. } => {
                assert!(command.starts_with("false compose -f"));
                assert_eq!(code, "1");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dropped_up_kills_the_compose_process() {
        use std::time::Duration;

        // `sh compose -f <file> up -d` runs the script named `compose` in the
        // unit directory, standing in for a slow `docker compose up`.
        let dir = tempfile::TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("compose"), "sleep 1\ntouch finished\n").expect("script");
        let compose_file = dir.path().join("docker-compose.yml");
        std::fs::write(&compose_file, "services: {}\n").expect("compose file");

        let cli = DockerCli::new("sh");
        let outcome = tokio::time::timeout(Duration::from_millis(200), cli.up(&compose_file)).await;
        assert!(outcome.is_err(), "up should still be running");

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(
            !dir.path().join("finished").exists(),
            "the compose process outlived its cancelled launch"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn completed_up_reports_success() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("compose"), "touch finished\n").expect("script");
        let compose_file = dir.path().join("docker-compose.yml");
        std::fs::write(&compose_file, "services: {}\n").expect("compose file");

        DockerCli::new("sh").up(&compose_file).await.expect("up");
        assert!(dir.path().join("finished").exists());
    }
}
