use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, Read},
    sync::Arc,
};

use anyhow::{anyhow, Context as _};
use clap::Parser;
use color_eyre::Result;
use serde_json::{json, Map, Value};
use skiff_core::{
    api::{self, StartMode},
    auth,
    consts::{ENVIRONMENT_ID, PROJECT_ID},
    Context, DockerCli, ExecutionCreationData, Settings, StartPool,
};
use tracing::debug;

mod cli;
mod config;
mod output;

use cli::{
    CommandGroupCli, CommitCommand, DataCommand, ExecutionCommand, ExecutionCreateArgs,
    ExecutionStartArgs, SkiffCli, TokenCommand,
};
use config::EnvSnapshot;
use output::{emit_output, CommandOutcome, OutputOptions};

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = SkiffCli::parse();
    init_tracing(cli.trace, cli.verbose);

    let outcome = match run(&cli) {
        Ok(outcome) => outcome,
        Err(err) => CommandOutcome::from_error(&err),
    };
    let opts = OutputOptions {
        quiet: cli.quiet,
        json: cli.json,
        no_color: cli.no_color,
    };
    let code = emit_output(&opts, &outcome)?;

    if code == 0 {
        Ok(())
    } else {
        std::process::exit(code);
    }
}

fn init_tracing(trace: bool, verbose: u8) {
    let level = if trace {
        "trace"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let filter = format!("skiff={level},skiff_core={level},skiff_cli={level}");
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .with_level(true)
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn run(cli: &SkiffCli) -> anyhow::Result<CommandOutcome> {
    let snapshot = EnvSnapshot::capture();
    let mut settings = config::load_settings(&snapshot, cli.data_path.as_deref())?;
    config::initialize(&mut settings)?;
    debug!(data_path = %settings.data_path().display(), "settings loaded");

    let runtime = Arc::new(DockerCli::from_settings(&settings));
    let ctx = Arc::new(Context::new(settings, runtime));

    let (message, details) = match &cli.command {
        CommandGroupCli::Info => ("server info", info()),
        CommandGroupCli::Commit(command) => commit(&ctx, command)?,
        CommandGroupCli::Execution(command) => execution(&ctx, command)?,
        CommandGroupCli::Data(command) => data(&ctx, command)?,
        CommandGroupCli::Token(command) => token(ctx.settings(), command)?,
    };
    Ok(CommandOutcome::success(message, details))
}

fn info() -> Value {
    json!({
        "server": api::server_info(),
        "user": api::current_user(),
        "projects": api::list_projects(),
        "environments": api::list_environments(),
    })
}

fn commit(ctx: &Context, command: &CommitCommand) -> anyhow::Result<(&'static str, Value)> {
    match command {
        CommitCommand::Import(args) => {
            let reader: Box<dyn Read> = if args.tarball.as_os_str() == "-" {
                Box::new(io::stdin().lock())
            } else {
                let file = File::open(&args.tarball)
                    .with_context(|| format!("failed to open {}", args.tarball.display()))?;
                Box::new(file)
            };
            let created = api::import_commit(ctx, PROJECT_ID, reader, &args.description)?;
            Ok(("commit imported", created))
        }
        CommitCommand::Show(args) => Ok(("commit", api::read_commit(ctx, &args.id)?)),
    }
}

fn execution(ctx: &Arc<Context>, command: &ExecutionCommand) -> anyhow::Result<(&'static str, Value)> {
    match command {
        ExecutionCommand::Create(args) => {
            let body = creation_body(args)?;
            let mode = if args.no_start {
                StartMode::Deferred
            } else {
                StartMode::Inline
            };
            Ok(("execution created", api::create_execution(ctx, &body, mode)?))
        }
        ExecutionCommand::Start(args) => Ok(("executions started", start(ctx, args)?)),
        ExecutionCommand::List => Ok(("executions", api::list_executions(ctx)?)),
        ExecutionCommand::Show(args) => Ok(("execution", api::read_execution(ctx, &args.id)?)),
        ExecutionCommand::Events(args) => {
            Ok(("execution events", api::execution_events(ctx, &args.id)?))
        }
    }
}

fn creation_body(args: &ExecutionCreateArgs) -> anyhow::Result<ExecutionCreationData> {
    let environment_variables: BTreeMap<String, String> = args
        .environment
        .iter()
        .map(|pair| parse_pair(pair))
        .collect::<anyhow::Result<_>>()?;
    let parameters = args
        .parameters
        .iter()
        .map(|pair| parse_pair(pair).map(|(key, value)| (key, Value::String(value))))
        .collect::<anyhow::Result<Map<_, _>>>()?;
    Ok(ExecutionCreationData {
        commit: args.commit.clone(),
        project: PROJECT_ID,
        environment: ENVIRONMENT_ID,
        step: args.step.clone(),
        image: args.image.clone().unwrap_or_default(),
        title: args.title.clone(),
        inputs: Map::new(),
        parameters,
        environment_variables,
    })
}

fn parse_pair(raw: &str) -> anyhow::Result<(String, String)> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected KEY=VALUE, got {raw:?}"))?;
    Ok((key.to_string(), value.to_string()))
}

// One id starts inline; several go through a worker pool.
fn start(ctx: &Arc<Context>, args: &ExecutionStartArgs) -> anyhow::Result<Value> {
    if let [id] = args.ids.as_slice() {
        return Ok(api::list_response(vec![api::start_execution(ctx, id)?]));
    }
    for id in &args.ids {
        ctx.executions().load(id)?;
    }
    let pool = StartPool::new(Arc::clone(ctx), args.workers, args.ids.len())?;
    for id in &args.ids {
        pool.submit(id)?;
    }
    pool.shutdown();
    let results = args
        .ids
        .iter()
        .map(|id| api::read_execution(ctx, id))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(api::list_response(results))
}

fn data(ctx: &Context, command: &DataCommand) -> anyhow::Result<(&'static str, Value)> {
    match command {
        DataCommand::List(args) => Ok(("outputs", api::list_outputs(ctx, &args.execution)?)),
        DataCommand::Url(args) => Ok((
            "output url",
            api::output_download_url(ctx, &args.output, &args.base_url)?,
        )),
    }
}

fn token(settings: &Settings, command: &TokenCommand) -> anyhow::Result<(&'static str, Value)> {
    match command {
        TokenCommand::Issue(args) => {
            let token = auth::issue_token(
                settings,
                args.username.as_deref(),
                args.password.as_deref(),
            )?;
            Ok(("token issued", json!({ "token": token })))
        }
        TokenCommand::Verify(args) => {
            let user = auth::authorize(settings, Some(&args.header))?;
            Ok(("token accepted", json!({ "user": user })))
        }
    }
}
