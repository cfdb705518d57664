use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use lamb_domain::LayerPermissionAction;

pub const LAMB_BEFORE_HELP: &str = concat!(
    "lamb ",
    env!("CARGO_PKG_VERSION"),
    " – content-addressed Lambda layer and source deployment\n\n",
    "\x1b[1;36mDeploy\x1b[0m\n",
    "  deploy-layer     Build a layer, then upload and publish it only if its content changed.\n",
    "  deploy-source    Build a source artifact and store it under the next version.\n\n",
    "\x1b[1;36mSteps\x1b[0m\n",
    "  digest           Print the content digest of files and directories.\n",
    "  latest           Show the latest deployed layer version or source version.\n",
    "  build            Build an archive into the build directory.\n",
    "  upload           Store a built archive under its content-addressed key.\n",
    "  publish          Publish a layer version from an uploaded archive.\n",
    "  verify           Download an archive and check it against its recorded digest.\n\n",
    "\x1b[1;36mPermissions\x1b[0m\n",
    "  grant / revoke   Share a layer version with an account or organization.\n",
);

pub const LAMB_HELP_TEMPLATE: &str =
    "{before-help}\nUsage:\n    {usage}\n\nGlobal options:\n{options}\n";

#[derive(Parser, Debug)]
#[command(
    name = "lamb",
    author,
    version,
    disable_help_subcommand = true,
    before_help = LAMB_BEFORE_HELP,
    help_template = LAMB_HELP_TEMPLATE
)]
pub struct LambCli {
    #[arg(
        short,
        long,
        help = "Suppress human output (errors still set the exit code)",
        global = true
    )]
    pub quiet: bool,
    #[arg(short, long, action = ArgAction::Count, help = "Increase logging (-vv reaches trace)", global = true)]
    pub verbose: u8,
    #[arg(long, help = "Force trace logging regardless of -v/-q", global = true)]
    pub trace: bool,
    #[arg(long, help = "Emit {status,message,details} JSON envelopes", global = true)]
    pub json: bool,
    #[arg(long, help = "Disable colored human output", global = true)]
    pub no_color: bool,
    #[command(subcommand)]
    pub command: CommandGroupCli,
}

#[derive(Subcommand, Debug)]
pub enum CommandGroupCli {
    #[command(about = "Print the content digest of files and directories.")]
    Digest(DigestArgs),
    #[command(subcommand, about = "Show the latest deployed version.")]
    Latest(LatestCommand),
    #[command(about = "Build an archive into the build directory.")]
    Build(BuildCommandArgs),
    #[command(about = "Store a built archive under its content-addressed key.")]
    Upload(UploadArgs),
    #[command(about = "Publish a layer version from an uploaded archive.")]
    Publish(PublishArgs),
    #[command(about = "Build a layer and publish it when its content changed.")]
    DeployLayer(DeployLayerArgs),
    #[command(about = "Build a source artifact and store it under a new version.")]
    DeploySource(DeploySourceArgs),
    #[command(about = "Grant access to a layer version.")]
    Grant(PermissionArgs),
    #[command(about = "Revoke access to a layer version.")]
    Revoke(RevokeArgs),
    #[command(about = "Check a stored archive against its recorded digest.")]
    Verify(VerifyArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct SelectionArgs {
    #[arg(long = "include", value_name = "GLOB", help = "Only keep files matching a glob")]
    pub include: Vec<String>,
    #[arg(long = "exclude", value_name = "GLOB", help = "Drop files matching a glob")]
    pub exclude: Vec<String>,
    #[arg(long, help = "Keep VCS dirs, caches and bytecode")]
    pub no_default_ignores: bool,
}

#[derive(Args, Debug)]
pub struct DigestArgs {
    #[arg(value_name = "PATH", required = true)]
    pub paths: Vec<PathBuf>,
    #[command(flatten)]
    pub selection: SelectionArgs,
}

#[derive(Subcommand, Debug)]
pub enum LatestCommand {
    #[command(about = "Latest published version of a layer")]
    Layer { name: String },
    #[command(about = "Latest stored version of a source artifact")]
    Source { name: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum KindArg {
    Layer,
    Source,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    StageAndZip,
    PipRequirements,
    PipProject,
    PoetryWheel,
    PythonBuild,
}

#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    #[arg(long = "source", value_name = "PATH", help = "Source root to stage (repeatable)")]
    pub sources: Vec<PathBuf>,
    #[arg(long, value_name = "DIR", default_value = "build")]
    pub build_dir: PathBuf,
    #[arg(long, value_enum, default_value_t = StrategyArg::StageAndZip)]
    pub strategy: StrategyArg,
    #[arg(long, value_name = "FILE", help = "requirements.txt for pip-requirements")]
    pub requirements: Option<PathBuf>,
    #[arg(long, value_name = "DIR", help = "Project root for pip-project, poetry-wheel and python-build")]
    pub project_root: Option<PathBuf>,
    #[arg(long, value_name = "FILE", help = "Handler script copied to the archive root")]
    pub entry_point: Option<PathBuf>,
    #[arg(
        long = "runtime-package",
        value_name = "NAME",
        help = "Package provided by the runtime (replaces the default list)"
    )]
    pub runtime_packages: Vec<String>,
    #[arg(long, help = "Keep runtime-provided packages in the archive")]
    pub keep_runtime_packages: bool,
    #[arg(
        long = "extra-arg",
        value_name = "ARG",
        allow_hyphen_values = true,
        help = "Argument passed through to the build tool (repeatable)"
    )]
    pub extra_args: Vec<String>,
    #[arg(long, value_name = "PATH", help = "pip executable (default: $LAMB_PIP or pip)")]
    pub pip: Option<PathBuf>,
    #[arg(long, value_name = "PATH", help = "poetry executable (default: $LAMB_POETRY or poetry)")]
    pub poetry: Option<PathBuf>,
    #[arg(long, value_name = "PATH", help = "python executable (default: $LAMB_PYTHON or python3)")]
    pub python: Option<PathBuf>,
    #[command(flatten)]
    pub selection: SelectionArgs,
}

#[derive(Args, Debug)]
pub struct BuildCommandArgs {
    #[arg(long, value_enum, default_value_t = KindArg::Layer)]
    pub kind: KindArg,
    #[command(flatten)]
    pub build: BuildArgs,
}

#[derive(Args, Debug)]
pub struct UploadArgs {
    pub name: String,
    #[arg(value_name = "ARCHIVE")]
    pub archive: PathBuf,
    #[arg(long, value_enum, default_value_t = KindArg::Layer)]
    pub kind: KindArg,
    #[arg(long, help = "Version token (source artifacts only)")]
    pub version: Option<String>,
    #[arg(long = "metadata", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub metadata: Vec<(String, String)>,
}

#[derive(Args, Debug)]
pub struct PublishArgs {
    pub layer: String,
    #[arg(long, value_name = "KEY", help = "Storage key of the uploaded archive")]
    pub key: String,
    #[arg(long = "runtime", value_name = "RUNTIME", help = "Compatible runtime (repeatable)")]
    pub runtimes: Vec<String>,
}

#[derive(Args, Debug)]
pub struct DeployLayerArgs {
    pub name: String,
    #[arg(long = "runtime", value_name = "RUNTIME", help = "Compatible runtime (repeatable)")]
    pub runtimes: Vec<String>,
    #[arg(long = "metadata", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub metadata: Vec<(String, String)>,
    #[command(flatten)]
    pub build: BuildArgs,
}

#[derive(Args, Debug)]
pub struct DeploySourceArgs {
    pub name: String,
    #[arg(long, help = "Version token; defaults to the next zero-padded counter")]
    pub version: Option<String>,
    #[arg(long = "metadata", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub metadata: Vec<(String, String)>,
    #[command(flatten)]
    pub build: BuildArgs,
}

#[derive(Args, Debug)]
pub struct PermissionArgs {
    pub layer: String,
    pub version: u64,
    #[arg(long, help = "Account id, or * together with --organization")]
    pub principal: String,
    #[arg(long, default_value_t = LayerPermissionAction::GetLayerVersion)]
    pub action: LayerPermissionAction,
    #[arg(long, value_name = "ORG_ID")]
    pub organization: Option<String>,
    #[arg(long, help = "Statement id to use instead of the derived one")]
    pub statement_id: Option<String>,
}

#[derive(Args, Debug)]
pub struct RevokeArgs {
    pub layer: String,
    pub version: u64,
    #[arg(long, conflicts_with_all = ["principal", "organization"], help = "Remove this statement id directly")]
    pub statement_id: Option<String>,
    #[arg(long, required_unless_present = "statement_id")]
    pub principal: Option<String>,
    #[arg(long, default_value_t = LayerPermissionAction::GetLayerVersion)]
    pub action: LayerPermissionAction,
    #[arg(long, value_name = "ORG_ID")]
    pub organization: Option<String>,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    pub key: String,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}
