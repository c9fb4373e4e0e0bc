//! Service functions behind the JSON API. Each returns the response body an
//! HTTP layer would serialize; errors classify through [`crate::classify`].

use std::io::Read;

use anyhow::{Context as _, Result};
use serde_json::{json, Map, Value};
use skiff_domain::{format_log_event, LogStream};
use url::Url;
use uuid::Uuid;

use crate::consts::{
    environment_data, expanded_user_data, project_data, ENVIRONMENT_ID, PROJECT_ID,
    SERVER_FLAVOR, VERSION,
};
use crate::context::Context;
use crate::error::UnsupportedRequest;
use crate::lifecycle::{check_container_status, get_logs, start_and_record};
use crate::models::{Commit, Execution, ExecutionCreationData, Output};
use crate::store::{EntityError, Model};
use crate::worker::StartPool;

/// Most events one events response carries.
pub const EVENTS_LIMIT: usize = 2000;

/// How [`create_execution`] starts the new execution.
#[derive(Clone, Copy, Debug)]
pub enum StartMode<'a> {
    /// Boot the container before answering.
    Inline,
    /// Hand the id to a worker pool and answer with the queued execution.
    Pool(&'a StartPool),
    /// Leave the execution queued until [`start_execution`] is called.
    Deferred,
}

/// `{count, next, previous, results}` with no paging.
pub fn list_response(results: Vec<Value>) -> Value {
    json!({
        "count": results.len(),
        "next": null,
        "previous": null,
        "results": results,
    })
}

pub fn server_info() -> Value {
    json!({"flavor": SERVER_FLAVOR, "version": VERSION})
}

pub fn current_user() -> Value {
    expanded_user_data()
}

pub fn list_projects() -> Value {
    list_response(vec![project_data()])
}

pub fn read_project(id: Uuid) -> Result<Value> {
    if id != PROJECT_ID {
        return Err(EntityError::DoesNotExist {
            kind: "project",
            id: id.to_string(),
        }
        .into());
    }
    Ok(project_data())
}

pub fn list_environments() -> Value {
    list_response(vec![environment_data()])
}

pub fn import_commit(
    ctx: &Context,
    project: Uuid,
    reader: impl Read,
    description: &str,
) -> Result<Value> {
    if project != PROJECT_ID {
        return Err(UnsupportedRequest(format!("commits for project {project}")).into());
    }
    let commit = Commit::create(&ctx.commits(), reader, description)?;
    Ok(Value::Object(commit.metadata()?))
}

pub fn read_commit(ctx: &Context, id: &str) -> Result<Value> {
    let commit = ctx.commits().load(id)?;
    Ok(Value::Object(commit.metadata()?))
}

/// Validate and persist a new execution, then start it per `mode`.
///
/// Boot failures never fail this call; they show up as an `error` status.
pub fn create_execution(
    ctx: &Context,
    body: &ExecutionCreationData,
    mode: StartMode<'_>,
) -> Result<Value> {
    if body.project != PROJECT_ID {
        return Err(UnsupportedRequest(format!("executions in project {}", body.project)).into());
    }
    if body.environment != ENVIRONMENT_ID {
        return Err(
            UnsupportedRequest(format!("executions in environment {}", body.environment)).into(),
        );
    }
    if !body.parameters.is_empty() {
        return Err(UnsupportedRequest("execution parameters".into()).into());
    }
    if !body.inputs.is_empty() {
        return Err(UnsupportedRequest("execution inputs".into()).into());
    }
    ctx.commits().load(&body.commit)?;

    let execution = Execution::create(&ctx.executions(), body)?;
    match mode {
        StartMode::Inline => start_and_record(ctx, &execution)?,
        StartMode::Pool(pool) => pool.submit(execution.id())?,
        StartMode::Deferred => {}
    }
    execution_detail(&execution)
}

/// Explicitly start a queued execution.
pub fn start_execution(ctx: &Context, id: &str) -> Result<Value> {
    let execution = ctx.executions().load(id)?;
    start_and_record(ctx, &execution)?;
    execution_detail(&execution)
}

/// Every execution, newest first, with `counter` renumbered by creation time.
pub fn list_executions(ctx: &Context) -> Result<Value> {
    let mut executions = ctx
        .executions()
        .iterate_instances()
        .map(|execution| {
            let mut data = execution_detail_map(&execution)?;
            data.insert("duration".into(), Value::Null);
            data.insert("events".into(), Value::Null);
            data.insert("urls".into(), json!({"display": null}));
            Ok(data)
        })
        .collect::<Result<Vec<_>>>()?;
    executions.sort_by(|a, b| ctime_of(a).cmp(ctime_of(b)));
    for (counter, data) in executions.iter_mut().enumerate() {
        data.insert("counter".into(), json!(counter + 1));
    }
    executions.reverse();
    Ok(list_response(executions.into_iter().map(Value::Object).collect()))
}

/// Execution metadata plus status, after refreshing the container outcome.
pub fn read_execution(ctx: &Context, id: &str) -> Result<Value> {
    let execution = ctx.executions().load(id)?;
    check_container_status(ctx, &execution)?;
    execution_detail(&execution)
}

pub fn execution_events(ctx: &Context, id: &str) -> Result<Value> {
    let execution = ctx.executions().load(id)?;
    check_container_status(ctx, &execution)?;
    let mut events = get_logs(ctx, &execution)?;
    if events.is_empty() {
        events.push(format_log_event(LogStream::Status, "no events available", None));
    }
    let total = events.len();
    let truncated = total > EVENTS_LIMIT;
    if truncated {
        events.drain(..total - EVENTS_LIMIT);
    }
    Ok(json!({
        "total": total,
        "limit": EVENTS_LIMIT,
        "truncated": truncated,
        "events": events,
    }))
}

/// Outputs of one execution; every listed output is cached for download.
pub fn list_outputs(ctx: &Context, execution_id: &str) -> Result<Value> {
    let execution = ctx.executions().load(execution_id)?;
    let outputs: Vec<Output> = execution.iterate_outputs().collect();
    let mut responses = Vec::with_capacity(outputs.len());
    let mut records = Vec::with_capacity(outputs.len());
    for output in &outputs {
        responses.push(output.as_api_response()?);
        records.push((output.id()?, output.to_cached()?));
    }
    ctx.output_cache()?.set_many(records)?;
    Ok(list_response(responses))
}

/// Absolute download location of a previously listed output.
pub fn output_download_url(ctx: &Context, id: &str, base_url: &str) -> Result<Value> {
    let cache = ctx.output_cache()?;
    let output = Output::from_cache(id, &cache, ctx.data_path())?.ok_or_else(|| {
        EntityError::DoesNotExist {
            kind: "output",
            id: id.to_string(),
        }
    })?;
    let base = Url::parse(base_url).with_context(|| format!("invalid base url {base_url:?}"))?;
    let url = base
        .join(&output.download_url())
        .with_context(|| format!("failed to build download url for output {id}"))?;
    Ok(json!({"url": url.as_str()}))
}

fn execution_detail(execution: &Execution) -> Result<Value> {
    execution_detail_map(execution).map(Value::Object)
}

fn execution_detail_map(execution: &Execution) -> Result<Map<String, Value>> {
    let mut data = execution.metadata()?;
    let status = execution.status()?;
    data.insert("status".into(), json!(status));
    Ok(data)
}

fn ctime_of(data: &Map<String, Value>) -> &str {
    data.get("ctime").and_then(Value::as_str).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{classify, ErrorKind};
    use crate::models::fixtures::{creation_data, tarball, MANIFEST};
    use crate::testing::{context, seed_commit, FakeRuntime};
    use std::fs;
    use tempfile::tempdir;

    fn body(commit: &str) -> ExecutionCreationData {
        let mut data = creation_data(commit);
        data.project = PROJECT_ID;
        data.environment = ENVIRONMENT_ID;
        data
    }

    #[test]
    fn fixed_descriptors() {
        assert_eq!(server_info()["flavor"], "skiff");
        assert_eq!(list_projects()["count"], 1);
        assert_eq!(list_environments()["results"][0]["id"], json!(ENVIRONMENT_ID));
        assert_eq!(current_user()["username"], "skiff-user");
        assert!(read_project(PROJECT_ID).is_ok());
        let err = read_project(Uuid::nil()).expect_err("unknown project");
        assert_eq!(classify(&err), ErrorKind::NotFound);
    }

    #[test]
    fn commits_import_and_read_back() -> Result<()> {
        let temp = tempdir()?;
        let ctx = context(temp.path(), FakeRuntime::new());
        let bytes = tarball("skiff.yaml", MANIFEST, true);
        let created = import_commit(&ctx, PROJECT_ID, bytes.as_slice(), "hello")?;
        let id = created["id"].as_str().expect("id").to_string();
        assert!(id.starts_with('~'));
        assert_eq!(read_commit(&ctx, &id)?, created);

        let err = read_commit(&ctx, "~missing").expect_err("missing");
        assert_eq!(classify(&err), ErrorKind::NotFound);
        let err = import_commit(&ctx, Uuid::nil(), bytes.as_slice(), "").expect_err("project");
        assert_eq!(classify(&err), ErrorKind::NotImplemented);
        Ok(())
    }

    #[test]
    fn creation_rejects_unsupported_requests() -> Result<()> {
        let temp = tempdir()?;
        let ctx = context(temp.path(), FakeRuntime::new());
        let commit = seed_commit(temp.path())?;

        let mut with_parameters = body(&commit);
        with_parameters.parameters.insert("epochs".into(), json!(3));
        let err = create_execution(&ctx, &with_parameters, StartMode::Inline).expect_err("params");
        assert_eq!(classify(&err), ErrorKind::NotImplemented);

        let mut with_inputs = body(&commit);
        with_inputs.inputs.insert("dataset".into(), json!(["s3://x"]));
        let err = create_execution(&ctx, &with_inputs, StartMode::Inline).expect_err("inputs");
        assert_eq!(classify(&err), ErrorKind::NotImplemented);

        let err = create_execution(&ctx, &body("~nope"), StartMode::Inline).expect_err("commit");
        assert_eq!(classify(&err), ErrorKind::NotFound);
        assert_eq!(ctx.executions().count(), 0);
        Ok(())
    }

    #[test]
    fn inline_boot_failure_still_answers() -> Result<()> {
        let temp = tempdir()?;
        let ctx = context(temp.path(), FakeRuntime::unpullable());
        let commit = seed_commit(temp.path())?;
        let created = create_execution(&ctx, &body(&commit), StartMode::Inline)?;
        assert_eq!(created["status"], "error");
        assert!(created.get("container_id").is_none());
        assert!(created["error_message"].is_string());
        Ok(())
    }

    #[test]
    fn failed_executions_cannot_be_restarted() -> Result<()> {
        let temp = tempdir()?;
        let failing = context(temp.path(), FakeRuntime::unpullable());
        let commit = seed_commit(temp.path())?;
        let created = create_execution(&failing, &body(&commit), StartMode::Inline)?;
        let id = created["id"].as_str().expect("id");

        let runtime = FakeRuntime::new();
        let healthy = context(temp.path(), runtime.clone());
        let err = start_execution(&healthy, id).expect_err("restart");
        assert_eq!(classify(&err), ErrorKind::Conflict);
        assert_eq!(runtime.boot_count(), 0);

        let current = read_execution(&healthy, id)?;
        assert_eq!(current["status"], "error");
        assert_eq!(current["error_message"], created["error_message"]);
        assert!(current.get("container_id").is_none());
        Ok(())
    }

    #[test]
    fn deferred_executions_start_on_request() -> Result<()> {
        let temp = tempdir()?;
        let runtime = FakeRuntime::new();
        let ctx = context(temp.path(), runtime.clone());
        let commit = seed_commit(temp.path())?;
        let created = create_execution(&ctx, &body(&commit), StartMode::Deferred)?;
        assert_eq!(created["status"], "queued");
        assert_eq!(runtime.boot_count(), 0);

        let id = created["id"].as_str().expect("id");
        let started = start_execution(&ctx, id)?;
        assert_eq!(started["status"], "started");
        assert_eq!(runtime.boot_count(), 1);
        Ok(())
    }

    #[test]
    fn listing_is_newest_first_with_renumbered_counters() -> Result<()> {
        let temp = tempdir()?;
        let ctx = context(temp.path(), FakeRuntime::new());
        let commit = seed_commit(temp.path())?;
        let mut ids = Vec::new();
        for _ in 0..3 {
            let created = create_execution(&ctx, &body(&commit), StartMode::Deferred)?;
            ids.push(created["id"].as_str().expect("id").to_string());
            std::thread::sleep(std::time::Duration::from_millis(2));
        }

        let listed = list_executions(&ctx)?;
        assert_eq!(listed["count"], 3);
        assert!(listed["next"].is_null());
        let results = listed["results"].as_array().expect("results");
        let order: Vec<_> = results
            .iter()
            .map(|item| item["id"].as_str().expect("id").to_string())
            .collect();
        ids.reverse();
        assert_eq!(order, ids);
        let counters: Vec<_> = results.iter().map(|item| item["counter"].clone()).collect();
        assert_eq!(counters, [json!(3), json!(2), json!(1)]);
        assert!(results.iter().all(|item| item["status"] == "queued"));
        Ok(())
    }

    #[test]
    fn events_have_a_placeholder_and_keep_the_tail() -> Result<()> {
        let temp = tempdir()?;
        let runtime = FakeRuntime::new();
        let ctx = context(temp.path(), runtime.clone());
        let commit = seed_commit(temp.path())?;
        let created = create_execution(&ctx, &body(&commit), StartMode::Deferred)?;
        let id = created["id"].as_str().expect("id");

        let events = execution_events(&ctx, id)?;
        assert_eq!(events["total"], 1);
        assert_eq!(events["limit"], 2000);
        assert_eq!(events["truncated"], false);
        assert_eq!(events["events"][0]["stream"], "status");
        assert_eq!(events["events"][0]["message"], "no events available");

        start_execution(&ctx, id)?;
        let stdout: String = (0..2005)
            .map(|n| format!("2024-01-01T00:00:00.{n:09}Z line {n}\n"))
            .collect();
        runtime.set_logs(&stdout, "");
        let events = execution_events(&ctx, id)?;
        assert_eq!(events["total"], 2005);
        assert_eq!(events["truncated"], true);
        let kept = events["events"].as_array().expect("events");
        assert_eq!(kept.len(), EVENTS_LIMIT);
        assert_eq!(kept[0]["message"], "line 5");
        assert_eq!(kept[EVENTS_LIMIT - 1]["message"], "line 2004");
        Ok(())
    }

    #[test]
    fn outputs_list_then_download() -> Result<()> {
        let temp = tempdir()?;
        let ctx = context(temp.path(), FakeRuntime::new());
        let commit = seed_commit(temp.path())?;
        let created = create_execution(&ctx, &body(&commit), StartMode::Inline)?;
        let id = created["id"].as_str().expect("id");
        let execution = ctx.executions().load(id)?;
        fs::write(execution.outputs_path().join("result.txt"), b"42")?;

        let listed = list_outputs(&ctx, id)?;
        assert_eq!(listed["count"], 1);
        let output_id = listed["results"][0]["id"].as_str().expect("id").to_string();

        let download = output_download_url(&ctx, &output_id, "http://localhost:8000/")?;
        let url = download["url"].as_str().expect("url");
        assert!(url.starts_with("http://localhost:8000/data/execution/"));
        assert!(url.ends_with("/outputs/result.txt"));

        let err = output_download_url(&ctx, "unknown", "http://localhost:8000/")
            .expect_err("cache miss");
        assert_eq!(classify(&err), ErrorKind::NotFound);
        Ok(())
    }
}
