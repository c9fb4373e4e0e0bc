use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

pub const SKIFF_BEFORE_HELP: &str = concat!(
    "skiff ",
    env!("CARGO_PKG_VERSION"),
    " – single-node job runner\n\n",
    "  commit      Upload a code bundle (tarball with skiff.yaml) or show one.\n",
    "  execution   Run a step of a commit in a container; inspect runs and logs.\n",
    "  data        List the files an execution produced and locate them.\n",
    "  token       Issue or verify API tokens.\n",
    "  info        Describe this server, its user, project and environment.\n",
);

#[derive(Parser, Debug)]
#[command(
    name = "skiff",
    author,
    version,
    disable_help_subcommand = true,
    before_help = SKIFF_BEFORE_HELP
)]
pub struct SkiffCli {
    #[arg(short, long, help = "Suppress human output (errors still print to stderr)", global = true)]
    pub quiet: bool,
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vv reaches trace)", global = true)]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(long, help = "Emit {status,message,details} JSON envelopes", global = true)]
    pub json: bool,
    #[arg(long, help = "Disable colored human output", global = true)]
    pub no_color: bool,
    #[arg(long, value_name = "PATH", help = "Data root (overrides SKIFF_DATA_PATH)", global = true)]
    pub data_path: Option<PathBuf>,
    #[command(subcommand)]
    pub command: CommandGroupCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandGroupCli {
    #[command(subcommand, about = "Upload and inspect commits")]
    Commit(CommitCommand),
    #[command(subcommand, about = "Create, start and inspect executions")]
    Execution(ExecutionCommand),
    #[command(subcommand, about = "List and locate execution outputs")]
    Data(DataCommand),
    #[command(subcommand, about = "Issue and verify API tokens")]
    Token(TokenCommand),
    #[command(about = "Describe the server and its fixed tenant")]
    Info,
}

#[derive(Subcommand, Debug)]
pub enum CommitCommand {
    #[command(about = "Store a tarball as a commit (use - for stdin)")]
    Import(CommitImportArgs),
    #[command(about = "Show a commit's metadata")]
    Show(IdArgs),
}

#[derive(Args, Debug)]
pub struct CommitImportArgs {
    #[arg(value_name = "TARBALL")]
    pub tarball: PathBuf,
    #[arg(short, long, default_value = "")]
    pub description: String,
}

#[derive(Args, Debug)]
pub struct IdArgs {
    #[arg(value_name = "ID")]
    pub id: String,
}

#[derive(Subcommand, Debug)]
pub enum ExecutionCommand {
    #[command(about = "Create an execution of a commit's step")]
    Create(ExecutionCreateArgs),
    #[command(about = "Start queued executions")]
    Start(ExecutionStartArgs),
    #[command(about = "List executions, newest first")]
    List,
    #[command(about = "Show an execution and refresh its status")]
    Show(IdArgs),
    #[command(about = "Show an execution's log events")]
    Events(IdArgs),
}

#[derive(Args, Debug)]
pub struct ExecutionCreateArgs {
    #[arg(long, value_name = "COMMIT")]
    pub commit: String,
    #[arg(long, value_name = "STEP")]
    pub step: String,
    #[arg(long, value_name = "IMAGE", help = "Image override (defaults to the step's image)")]
    pub image: Option<String>,
    #[arg(long, default_value = "")]
    pub title: String,
    #[arg(long = "env", value_name = "KEY=VALUE", help = "Extra environment variable")]
    pub environment: Vec<String>,
    #[arg(long = "parameter", value_name = "KEY=VALUE")]
    pub parameters: Vec<String>,
    #[arg(long, help = "Leave the execution queued")]
    pub no_start: bool,
}

#[derive(Args, Debug)]
pub struct ExecutionStartArgs {
    #[arg(value_name = "ID", required = true)]
    pub ids: Vec<String>,
    #[arg(long, default_value_t = 2, help = "Start workers used when several ids are given")]
    pub workers: usize,
}

#[derive(Subcommand, Debug)]
pub enum DataCommand {
    #[command(about = "List an execution's outputs")]
    List(DataListArgs),
    #[command(about = "Print the download URL of a listed output")]
    Url(DataUrlArgs),
}

#[derive(Args, Debug)]
pub struct DataListArgs {
    #[arg(value_name = "EXECUTION")]
    pub execution: String,
}

#[derive(Args, Debug)]
pub struct DataUrlArgs {
    #[arg(value_name = "OUTPUT")]
    pub output: String,
    #[arg(long, default_value = "http://localhost:8000/")]
    pub base_url: String,
}

#[derive(Subcommand, Debug)]
pub enum TokenCommand {
    #[command(about = "Exchange credentials for a token")]
    Issue(TokenIssueArgs),
    #[command(about = "Check an Authorization header value")]
    Verify(TokenVerifyArgs),
}

#[derive(Args, Debug)]
pub struct TokenIssueArgs {
    #[arg(long)]
    pub username: Option<String>,
    #[arg(long, env = "SKIFF_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

#[derive(Args, Debug)]
pub struct TokenVerifyArgs {
    #[arg(value_name = "HEADER", help = "For example: \"Token eyJ...\"")]
    pub header: String,
}
