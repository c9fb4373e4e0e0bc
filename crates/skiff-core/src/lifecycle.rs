//! Execution lifecycle: booting containers and memoizing their outcome.
//!
//! An execution moves `queued → started → {complete | error}`. The state is
//! never stored; it is derived from metadata that this module writes:
//! `container_id` on start, `container_exit_code` and
//! `container_final_state` once the container has stopped, or
//! `error_message` when starting failed.

use std::{collections::BTreeMap, fs};

use anyhow::{Context as _, Result};
use serde_json::{json, Map, Value};
use skiff_domain::{format_log_event, ExecutionStatus, LogEvent, LogStream};
use tracing::{debug, info, warn};

use crate::context::Context;
use crate::models::Execution;
use crate::runtime::{get_container_logs, parse_container_logs, BootRequest, ContainerInfo, Mount};
use crate::store::{write_atomic, Model};

/// Directory the commit tarball is extracted into; also the working directory.
pub const REPOSITORY_ROOT: &str = "/skiff/repository/";
pub const OUTPUTS_MOUNT: &str = "/skiff/outputs";
pub const CONFIG_MOUNT: &str = "/skiff/config";
pub const INPUTS_MOUNT: &str = "/skiff/inputs";

const PARAMETERS_DESCRIPTOR: &str = "parameters.json";
const INPUTS_DESCRIPTOR: &str = "inputs.json";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("execution {id} already has a container")]
    AlreadyStarted { id: String },
    #[error("execution {id} has already finished with status {status}")]
    AlreadyFinished { id: String, status: ExecutionStatus },
}

/// Boot the container for a queued execution and record its id.
///
/// Fails with [`ExecutionError::AlreadyStarted`] when a container was already
/// recorded and with [`ExecutionError::AlreadyFinished`] once an outcome is
/// recorded, so each execution gets at most one boot attempt. Any other failure leaves the metadata untouched; see
/// [`start_and_record`] for the variant that records it.
pub fn start_execution(ctx: &Context, execution: &Execution) -> Result<ContainerInfo> {
    let metadata = execution.typed_metadata()?;
    if metadata.container_id.is_some() {
        return Err(ExecutionError::AlreadyStarted {
            id: execution.id().to_string(),
        }
        .into());
    }
    if metadata.error_message.is_some()
        || metadata.container_exit_code.is_some()
        || metadata.container_final_state.is_some()
    {
        return Err(ExecutionError::AlreadyFinished {
            id: execution.id().to_string(),
            status: metadata.status(),
        }
        .into());
    }
    let commit = ctx
        .commits()
        .load(&metadata.commit)
        .with_context(|| format!("execution {} references a missing commit", execution.id()))?;
    let config = commit.load_config()?;
    let step = config.step(&metadata.step)?;

    let mut environment_variables = step.default_environment();
    environment_variables.extend(metadata.environment_variables.clone());
    let command = step.build_command(&metadata.parameters)?.join(" && ");
    let image = if metadata.image.is_empty() {
        step.image.clone().unwrap_or_default()
    } else {
        metadata.image.clone()
    };

    let mounts = prepare_mounts(ctx, execution)?;
    let request = BootRequest {
        command: vec!["sh".into(), "-c".into(), command],
        container_name: execution.container_name(),
        environment_variables,
        image,
        labels: BTreeMap::from([("skiff.execution".to_string(), execution.id().to_string())]),
        tarball_files: vec![commit.tarball_path()],
        tarball_root: REPOSITORY_ROOT.to_string(),
        chown_stanza: None,
        mounts,
    };
    let container = ctx.runtime().boot_container(&request)?;

    let mut updates = Map::new();
    updates.insert("container_id".into(), Value::String(container.id.clone()));
    execution.entity().update_metadata(updates)?;
    info!(execution = %execution.id(), container = %container.id, "execution started");
    Ok(container)
}

/// Start an execution without letting a failed boot escape.
///
/// Boot failures are logged and stored as `error_message`, which makes the
/// execution terminal. Only a rejected restart and failures to record the
/// error are returned.
pub fn start_and_record(ctx: &Context, execution: &Execution) -> Result<()> {
    match start_execution(ctx, execution) {
        Ok(_) => Ok(()),
        Err(err) if err.downcast_ref::<ExecutionError>().is_some() => Err(err),
        Err(err) => {
            warn!(execution = %execution.id(), error = %format!("{err:#}"), "failed to start execution");
            let mut updates = Map::new();
            updates.insert("error_message".into(), Value::String(format!("{err:#}")));
            execution.entity().update_metadata(updates)?;
            Ok(())
        }
    }
}

/// Poll the runtime and memoize the container's outcome once it has stopped.
///
/// Each recorded effect (exit code and final state, each log file) is written
/// at most once; once everything is recorded the runtime is not queried.
pub fn check_container_status(ctx: &Context, execution: &Execution) -> Result<()> {
    let metadata = execution.typed_metadata()?;
    let Some(container_id) = metadata.container_id.as_deref() else {
        return Ok(());
    };
    let log_files = [
        execution.log_path(LogStream::Stdout),
        execution.log_path(LogStream::Stderr),
        execution.log_events_path(),
    ];
    let logs_captured = log_files.iter().all(|path| path.is_file());
    if metadata.container_final_state.is_some() && logs_captured {
        return Ok(());
    }

    let container = ctx.runtime().inspect_container(container_id)?;
    if !container.is_terminal() {
        debug!(execution = %execution.id(), status = container.status(), "container still active");
        return Ok(());
    }
    if metadata.container_final_state.is_none() {
        let mut updates = Map::new();
        updates.insert("container_exit_code".into(), json!(container.exit_code()));
        updates.insert("container_final_state".into(), container.state.clone());
        execution.entity().update_metadata(updates)?;
        info!(
            execution = %execution.id(),
            exit_code = ?container.exit_code(),
            "container finished"
        );
    }
    if !logs_captured {
        let logs = ctx.runtime().container_logs(container_id)?;
        let [stdout_path, stderr_path, events_path] = &log_files;
        if !stdout_path.is_file() {
            write_atomic(stdout_path, &logs.stdout)?;
        }
        if !stderr_path.is_file() {
            write_atomic(stderr_path, &logs.stderr)?;
        }
        if !events_path.is_file() {
            let events = parse_container_logs(&logs);
            write_atomic(events_path, &serde_json::to_vec(&events)?)?;
        }
    }
    Ok(())
}

/// Log events of an execution, from the most settled source available.
pub fn get_logs(ctx: &Context, execution: &Execution) -> Result<Vec<LogEvent>> {
    let metadata = execution.typed_metadata()?;
    if let Some(message) = metadata.error_message {
        return Ok(vec![format_log_event(LogStream::Stderr, message, None)]);
    }
    let events_path = execution.log_events_path();
    if events_path.is_file() {
        let raw = fs::read(&events_path)
            .with_context(|| format!("failed to read {}", events_path.display()))?;
        return serde_json::from_slice(&raw)
            .with_context(|| format!("failed to decode {}", events_path.display()));
    }
    if let Some(container_id) = metadata.container_id {
        return get_container_logs(ctx.runtime(), &container_id);
    }
    Ok(Vec::new())
}

fn prepare_mounts(ctx: &Context, execution: &Execution) -> Result<Vec<Mount>> {
    let outputs = execution.outputs_path();
    let config = execution.config_path();
    let inputs = execution.inputs_path();
    for dir in [&outputs, &config, &inputs] {
        fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;
    }
    // Parameter and input materialization is not implemented; the container
    // still gets well-formed descriptors.
    write_atomic(&config.join(PARAMETERS_DESCRIPTOR), b"{}")?;
    write_atomic(&inputs.join(INPUTS_DESCRIPTOR), b"{}")?;

    let mut mounts = vec![
        Mount::bind(host_path(&outputs)?, OUTPUTS_MOUNT, false),
        Mount::bind(host_path(&config)?, CONFIG_MOUNT, true),
        Mount::bind(host_path(&inputs)?, INPUTS_MOUNT, true),
    ];
    let settings = ctx.settings();
    for (source, target) in &settings.mounts {
        mounts.push(Mount::bind(source, target, false));
    }
    for (source, target) in &settings.read_only_mounts {
        mounts.push(Mount::bind(source, target, true));
    }
    Ok(mounts)
}

fn host_path(path: &std::path::Path) -> Result<String> {
    let absolute = fs::canonicalize(path)
        .with_context(|| format!("failed to resolve {}", path.display()))?;
    Ok(absolute.to_string_lossy().into_owned())
}
