use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde_json::Value;
use tracing::{debug, info};

use super::process::{run_command, run_command_with_input, RunOutput};
use super::{BootError, BootRequest, ContainerInfo, ContainerLogs, ContainerRuntime, Mount, MountKind};
use crate::settings::Settings;

const BACKEND_CANDIDATES: [&str; 2] = ["docker", "podman"];

/// [`ContainerRuntime`] driving a docker-compatible CLI (`docker`, `podman`).
#[derive(Clone, Debug)]
pub struct DockerCli {
    program: PathBuf,
}

impl DockerCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// First backend found on `PATH`, falling back to plain `docker` so the
    /// failure surfaces when a container is actually needed.
    pub fn detect() -> Self {
        for name in BACKEND_CANDIDATES {
            if let Ok(path) = which::which(name) {
                debug!(backend = %path.display(), "container backend detected");
                return Self::new(path);
            }
        }
        debug!("no container backend on PATH; defaulting to docker");
        Self::new("docker")
    }

    pub fn from_settings(settings: &Settings) -> Self {
        settings
            .container_program
            .as_ref()
            .map_or_else(Self::detect, |program| Self::new(program.clone()))
    }

    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    fn run(&self, args: &[String]) -> Result<RunOutput> {
        let output = run_command(&self.program, args)?;
        if !output.success() {
            bail!(
                "`{} {}` failed with exit code {}: {}",
                self.program.display(),
                args.first().map_or("", String::as_str),
                output.code,
                output.stderr_text()
            );
        }
        Ok(output)
    }

    fn ensure_image(&self, image: &str) -> Result<(), BootError> {
        let present = run_command(&self.program, &strings(["image", "inspect", image]))
            .is_ok_and(|output| output.success());
        if present {
            debug!(%image, "image available locally");
            return Ok(());
        }
        info!(%image, "image not found locally, pulling it");
        match run_command(&self.program, &strings(["pull", image])) {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(BootError {
                image: image.to_string(),
                detail: output.stderr_text(),
            }),
            Err(err) => Err(BootError {
                image: image.to_string(),
                detail: format!("{err:#}"),
            }),
        }
    }

    // Mounting a fresh volume at the extraction root guarantees the directory
    // exists before any archive is copied in, without having to run anything
    // inside the container first.
    fn create_root_volume(&self, container_name: &str, tarball_root: &str) -> Result<Mount> {
        let volume = format!("{container_name}-root");
        info!(%volume, "creating volume");
        self.run(&strings(["volume", "create", &volume]))?;
        Ok(Mount::volume(volume, tarball_root))
    }

    fn create_container(&self, request: &BootRequest, mounts: &[Mount]) -> Result<String> {
        let mut args = strings([
            "create",
            "--name",
            &request.container_name,
            "--network",
            "bridge",
            "--workdir",
            &request.tarball_root,
        ]);
        for (key, value) in &request.labels {
            args.push("--label".to_string());
            args.push(format!("{key}={value}"));
        }
        for (key, value) in &request.environment_variables {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }
        for mount in mounts {
            args.push("--mount".to_string());
            args.push(mount_arg(mount));
        }
        args.push(request.image.clone());
        args.extend(request.command.iter().cloned());

        info!(container = %request.container_name, image = %request.image, "creating container");
        let output = self.run(&args)?;
        let stdout = output.stdout_text();
        stdout
            .lines()
            .map(str::trim)
            .rfind(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| anyhow!("container create printed no container id"))
    }

    fn inject_tarballs(&self, container: &str, root: &str, tarballs: &[PathBuf]) -> Result<bool> {
        if tarballs.is_empty() {
            return Ok(false);
        }
        let destination = format!("{container}:{root}");
        for tarball in tarballs {
            info!(tarball = %tarball.display(), %root, "injecting tarball");
            let input = File::open(tarball)
                .with_context(|| format!("failed to open tarball {}", tarball.display()))?;
            let output =
                run_command_with_input(&self.program, &strings(["cp", "-", &destination]), Some(input))?;
            if !output.success() {
                bail!(
                    "failed to inject {} into {destination}: {}",
                    tarball.display(),
                    output.stderr_text()
                );
            }
        }
        Ok(true)
    }
}

impl ContainerRuntime for DockerCli {
    fn boot_container(&self, request: &BootRequest) -> Result<ContainerInfo> {
        self.ensure_image(&request.image)?;
        let mut mounts = request.mounts.clone();
        mounts.push(self.create_root_volume(&request.container_name, &request.tarball_root)?);
        let container = self.create_container(request, &mounts)?;
        let injected = self.inject_tarballs(&container, &request.tarball_root, &request.tarball_files)?;

        info!(%container, "starting container");
        self.run(&strings(["start", &container]))?;
        if let Some(stanza) = request.chown_stanza.as_deref().filter(|_| injected) {
            info!(%container, %stanza, "running recursive chown");
            self.run(&strings([
                "exec",
                "--user",
                "root",
                &container,
                "chown",
                "-R",
                stanza,
                &request.tarball_root,
            ]))?;
        }
        self.inspect_container(&container)
    }

    fn inspect_container(&self, container: &str) -> Result<ContainerInfo> {
        let output = self.run(&strings(["container", "inspect", container]))?;
        let parsed: Value = serde_json::from_slice(&output.stdout)
            .with_context(|| format!("failed to decode inspect output for {container}"))?;
        let first = parsed
            .as_array()
            .and_then(|items| items.first())
            .ok_or_else(|| anyhow!("container {container} not reported by inspect"))?;
        ContainerInfo::from_inspect(first)
    }

    fn container_logs(&self, container: &str) -> Result<ContainerLogs> {
        let output = self.run(&strings(["logs", "--timestamps", container]))?;
        Ok(ContainerLogs {
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

fn strings<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.iter().map(|arg| (*arg).to_string()).collect()
}

fn mount_arg(mount: &Mount) -> String {
    let kind = match mount.kind {
        MountKind::Bind => "bind",
        MountKind::Volume => "volume",
    };
    let mut fields = vec![
        format!("type={kind}"),
        csv_field(&format!("source={}", mount.source)),
        csv_field(&format!("target={}", mount.target)),
    ];
    if mount.read_only {
        fields.push("readonly".to_string());
    }
    fields.join(",")
}

// `--mount` values are CSV records.
fn csv_field(field: &str) -> String {
    if field.contains([',', '"']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
