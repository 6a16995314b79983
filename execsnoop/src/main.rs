use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use execsnoop::{
    ExecSnoopEngine,
    settings::{AncestorMode, DEFAULT_CONFIG_PATH, OutputFormat, Settings},
    telemetry,
};

/// Trace exec() syscalls and report who ran what, from where.
#[derive(Debug, Parser)]
#[command(name = "execsnoop", version)]
struct Opt {
    /// Verbose output (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Settings file (YAML); missing file is fine
    #[arg(short, long, env = "EXECSNOOP_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Output format
    #[arg(short, long, value_enum)]
    output: Option<OutputFormat>,

    /// Maximum argument records per exec, ellipsis included (2-20)
    #[arg(long)]
    max_args: Option<u32>,

    /// Ancestor process name to look for
    #[arg(long)]
    ancestor: Option<String>,

    /// How to compare ancestor names
    #[arg(long, value_enum)]
    ancestor_match: Option<AncestorMode>,

    /// Maximum ancestor chain length to inspect (1-20)
    #[arg(long)]
    max_ancestors: Option<u32>,

    /// Also trace execveat()
    #[arg(long)]
    execveat: bool,

    /// How often perf readers wake up to check for shutdown
    #[arg(long, value_name = "MILLISECONDS")]
    interval: Option<u64>,

    /// Only print execs descending from the ancestor
    #[arg(short = 'A', long)]
    only_ancestor: bool,

    /// Include failed exec()s; only successful ones are printed otherwise
    #[arg(short = 'x', long)]
    fails: bool,

    /// Include a timestamp column
    #[arg(short, long)]
    timestamp: bool,

    /// Add quotemarks around arguments
    #[arg(short, long)]
    quote: bool,

    /// Only print commands whose name matches this regex
    #[arg(short, long)]
    name: Option<String>,

    /// Only print commands whose arguments match this regex
    #[arg(short, long)]
    line: Option<String>,

    /// Print uid and gid instead of user and group names
    #[arg(short = 'N', long)]
    numeric: bool,

    /// Do not print a header line
    #[arg(long)]
    no_header: bool,

    /// Stop after this many seconds
    #[arg(short, long)]
    wait: Option<u64>,
}

impl Opt {
    /// Command line flags win over file and environment.
    fn apply(&self, settings: &mut Settings) {
        let probe = &mut settings.probe;
        if let Some(max_args) = self.max_args {
            probe.max_args = Some(max_args);
        }
        if let Some(ancestor) = &self.ancestor {
            probe.ancestor_name = Some(ancestor.clone());
        }
        if let Some(mode) = self.ancestor_match {
            probe.ancestor_match = Some(mode);
        }
        if let Some(depth) = self.max_ancestors {
            probe.max_ancestors = Some(depth);
        }
        if self.execveat {
            probe.execveat = Some(true);
        }
        if let Some(interval) = self.interval {
            probe.poll_interval_ms = Some(interval);
        }

        let output = &mut settings.output;
        if let Some(format) = self.output {
            output.format = Some(format);
        }
        if self.only_ancestor {
            output.only_ancestor = Some(true);
        }
        if self.fails {
            output.include_failed = Some(true);
        }
        if self.timestamp {
            output.timestamp = Some(true);
        }
        if self.quote {
            output.quote = Some(true);
        }
        if let Some(name) = &self.name {
            output.name_filter = Some(name.clone());
        }
        if let Some(line) = &self.line {
            output.line_filter = Some(line.clone());
        }
        if self.numeric {
            output.numeric = Some(true);
        }
        if self.no_header {
            output.no_header = Some(true);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let opt = Opt::parse();

    let default_filter = match opt.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let mut settings = Settings::load(&opt.config).context("Failed to load settings")?;
    opt.apply(&mut settings);

    telemetry::init_metrics()?;

    let engine = ExecSnoopEngine::new(
        settings,
        aya::include_bytes_aligned!(concat!(env!("OUT_DIR"), "/execsnoop")),
    )?;
    let result = engine.run(opt.wait.map(Duration::from_secs)).await;

    telemetry::shutdown_metrics();
    result
}
