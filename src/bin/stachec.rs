//! `stachec`: compile template files into render modules.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, warn};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;

use stache_native::discovery::{
    common_base, compile_all, find_templates, BatchError, DEFAULT_TEMPLATE_EXTENSION,
};
use stache_native::{CompileOptions, InvertedPolicy, Target};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TargetArg {
    Flat,
    Structural,
}

impl From<TargetArg> for Target {
    fn from(arg: TargetArg) -> Self {
        match arg {
            TargetArg::Flat => Target::Flat,
            TargetArg::Structural => Target::Structural,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum InvertedPolicyArg {
    ArrayAware,
    LengthOnly,
}

impl From<InvertedPolicyArg> for InvertedPolicy {
    fn from(arg: InvertedPolicyArg) -> Self {
        match arg {
            InvertedPolicyArg::ArrayAware => InvertedPolicy::ArrayAware,
            InvertedPolicyArg::LengthOnly => InvertedPolicy::LengthOnly,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "stachec")]
#[command(about = "Compile mustache-style templates into JavaScript render modules")]
struct Cli {
    /// Template files or directories to search
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory to write the compiled modules into
    #[arg(short, long, default_value = ".")]
    outdir: PathBuf,

    /// Directory the output layout is relative to (default: common parent of all templates)
    #[arg(short, long)]
    base: Option<PathBuf>,

    /// Template file extension searched for inside directories
    #[arg(long, default_value = DEFAULT_TEMPLATE_EXTENSION)]
    ext: String,

    /// JSON file with compile options
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    target: Option<TargetArg>,

    #[arg(long, value_enum)]
    inverted_policy: Option<InvertedPolicyArg>,

    /// Parse every generated module before writing it
    #[arg(long)]
    verify: bool,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_filter(filter),
        )
        .init();
}

fn options_for(cli: &Cli) -> Result<CompileOptions, String> {
    let mut options = match &cli.config {
        Some(path) => CompileOptions::from_path(path).map_err(|e| e.to_string())?,
        None => CompileOptions::default(),
    };
    if let Some(target) = cli.target {
        options.target = target.into();
    }
    if let Some(policy) = cli.inverted_policy {
        options.inverted_policy = policy.into();
    }
    if cli.verify {
        options.verify_output = true;
    }
    Ok(options)
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let options = match options_for(&cli) {
        Ok(options) => options,
        Err(message) => {
            error!("{}", message);
            return ExitCode::FAILURE;
        }
    };

    let templates = find_templates(&cli.inputs, &cli.ext);
    if templates.is_empty() {
        warn!("no templates found");
        return ExitCode::SUCCESS;
    }
    let base = cli.base.clone().unwrap_or_else(|| common_base(&templates));

    match compile_all(&templates, &base, &cli.outdir, &options) {
        Ok(_) => ExitCode::SUCCESS,
        Err(BatchError::Compile { path, source }) => {
            error!(
                code = %source.code,
                line = source.line,
                "Failed {}: {}",
                path.display(),
                source
            );
            ExitCode::FAILURE
        }
        Err(err) => {
            error!("Failed {}", err);
            ExitCode::FAILURE
        }
    }
}
