//! Container runtime for worker processes.
//!
//! Implements the [`ContainerRuntime`] trait by shelling out to the `docker`
//! CLI. The launch contract is fixed by the worker fleet:
//!
//! ```text
//! docker run --detach --publish {host_port}:8080 --env SEED={seed} --name {name} {image}:{tag}
//! ```
//!
//! Teardown is `docker stop {name}` followed by `docker rm {name}`.

use crate::worker::WorkerError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

/// Launches and terminates one worker container.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Launches the container in the background. Returns once the launch
    /// command is accepted.
    async fn run(&self) -> Result<(), WorkerError>;

    /// Terminates and removes the container.
    async fn stop(&self) -> Result<(), WorkerError>;
}

/// Container runtime using the `docker` command line.
pub struct DockerCli {
    image: String,
    tag: String,
    port: u16,
    name: String,
    env: Vec<(String, String)>,
}

impl DockerCli {
    /// Creates a new Docker CLI runtime for one container.
    pub fn new(
        image: impl Into<String>,
        tag: impl Into<String>,
        port: u16,
        name: impl Into<String>,
        env: Vec<(String, String)>,
    ) -> Self {
        Self {
            image: image.into(),
            tag: tag.into(),
            port,
            name: name.into(),
            env,
        }
    }

    /// Builds the `docker run` argument vector.
    fn run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--detach".to_string(),
            "--publish".to_string(),
            format!("{}:8080", self.port),
        ];
        for (key, value) in &self.env {
            args.push("--env".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push("--name".to_string());
        args.push(self.name.clone());
        args.push(format!("{}:{}", self.image, self.tag));
        args
    }

    /// Executes a docker command and returns its output.
    async fn exec(&self, args: &[String]) -> Result<std::process::Output, WorkerError> {
        debug!(?args, "executing docker command");

        Command::new("docker")
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| WorkerError::Launch(format!("cannot execute docker {:?}: {}", args, e)))
    }
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn run(&self) -> Result<(), WorkerError> {
        let output = self.exec(&self.run_args()).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(WorkerError::Launch(stderr.trim().to_string()));
        }

        info!(name = %self.name, port = self.port, "ran worker container");
        Ok(())
    }

    async fn stop(&self) -> Result<(), WorkerError> {
        for subcommand in ["stop", "rm"] {
            let args = vec![subcommand.to_string(), self.name.clone()];
            let output = self.exec(&args).await.map_err(|e| WorkerError::Stop {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;
            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(WorkerError::Stop {
                    name: self.name.clone(),
                    reason: format!("docker {}: {}", subcommand, stderr.trim()),
                });
            }
        }

        debug!(name = %self.name, "worker container stopped and removed");
        Ok(())
    }
}
