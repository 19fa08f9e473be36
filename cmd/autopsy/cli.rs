use std::path::{Path, PathBuf};

use autopsy::batch::{load_traces, run_batch};
use autopsy::findings::{Finding, load_findings};
use autopsy::{Analyzer, AutopsyConfig};
use clap::{Parser as ClapParser, Subcommand as ClapSubcommand};
use eyre::{WrapErr, bail};
use tokio_util::sync::CancellationToken;
use tracing::{Level, info};

#[allow(clippy::upper_case_acronyms)]
#[derive(ClapParser)]
#[command(
    name = "autopsy",
    author = "Lambdaclass",
    version,
    about = "Attributes roles and exploit mechanisms to attack transactions"
)]
pub struct CLI {
    #[command(flatten)]
    pub opts: Options,
    #[command(subcommand)]
    pub command: Subcommand,
}

#[derive(ClapParser, Debug, Clone)]
pub struct Options {
    #[arg(
        long = "log-level",
        default_value_t = Level::INFO,
        value_name = "LOG_LEVEL",
        env = "AUTOPSY_LOG_LEVEL",
        global = true,
        help = "The verbosity level used for logs.",
        long_help = "Possible values: info, debug, trace, warn, error. RUST_LOG takes precedence."
    )]
    pub log_level: Level,
}

#[derive(ClapSubcommand, Debug)]
pub enum Subcommand {
    /// Analyze a single transaction trace
    #[command(name = "analyze")]
    Analyze {
        /// Trace envelope (callTracer frames or parity flat traces)
        #[arg(long, value_name = "TRACE_FILE")]
        trace: PathBuf,

        /// Finding feed (JSON array)
        #[arg(long, value_name = "FINDINGS_FILE")]
        findings: Option<PathBuf>,

        /// Configuration file (TOML, or JSON with a .json extension)
        #[arg(long, value_name = "CONFIG_FILE", env = "AUTOPSY_CONFIG")]
        config: Option<PathBuf>,

        /// Write the JSON result here instead of stdout
        #[arg(long, value_name = "OUTPUT_FILE")]
        output: Option<PathBuf>,
    },
    /// Analyze many transaction traces in parallel
    #[command(name = "batch")]
    Batch {
        /// File holding an array of trace envelopes
        #[arg(long, value_name = "TRACES_FILE")]
        traces: PathBuf,

        /// Finding feed shared by every trace
        #[arg(long, value_name = "FINDINGS_FILE")]
        findings: Option<PathBuf>,

        #[arg(long, value_name = "CONFIG_FILE", env = "AUTOPSY_CONFIG")]
        config: Option<PathBuf>,

        #[arg(long, value_name = "OUTPUT_FILE")]
        output: Option<PathBuf>,

        /// Override the configured worker count
        #[arg(long, value_name = "N")]
        concurrency: Option<usize>,
    },
    /// Validate a configuration file and exit
    #[command(name = "check-config")]
    CheckConfig {
        #[arg(long, value_name = "CONFIG_FILE")]
        config: PathBuf,
    },
}

impl Subcommand {
    pub fn run(self, cancel: CancellationToken) -> eyre::Result<()> {
        match self {
            Subcommand::Analyze {
                trace,
                findings,
                config,
                output,
            } => {
                let analyzer = Analyzer::new(read_config(config.as_deref())?)?;
                let findings = read_findings(findings.as_deref())?;
                let mut envelopes = load_traces(&analyzer, &trace)
                    .wrap_err_with(|| format!("reading {}", trace.display()))?;
                if envelopes.len() != 1 {
                    bail!(
                        "{} holds {} traces; use `autopsy batch` for more than one",
                        trace.display(),
                        envelopes.len()
                    );
                }
                let envelope = envelopes.remove(0);
                let ctx = analyzer.context(cancel);
                let result = analyzer
                    .analyze_value(envelope, &findings, &ctx)
                    .wrap_err_with(|| format!("analyzing {}", trace.display()))?;
                info!(
                    tx = %format!("{:#x}", result.tx_hash),
                    summary = %result.summary,
                    "analysis finished"
                );
                emit(&serde_json::to_string_pretty(&result)?, output.as_deref())
            }
            Subcommand::Batch {
                traces,
                findings,
                config,
                output,
                concurrency,
            } => {
                let mut config = read_config(config.as_deref())?;
                if let Some(n) = concurrency {
                    config.concurrency = n;
                }
                let analyzer = Analyzer::new(config)?;
                let findings = read_findings(findings.as_deref())?;
                let envelopes = load_traces(&analyzer, &traces)
                    .wrap_err_with(|| format!("reading {}", traces.display()))?;
                let report = run_batch(&analyzer, envelopes, &findings, &cancel)?;
                emit(&serde_json::to_string_pretty(&report)?, output.as_deref())
            }
            Subcommand::CheckConfig { config } => {
                let loaded = AutopsyConfig::load(&config)
                    .wrap_err_with(|| format!("loading {}", config.display()))?;
                let analyzer = Analyzer::new(loaded)?;
                println!(
                    "{}: ok ({} known addresses, {} privileged selectors, {} fee/limit selectors)",
                    config.display(),
                    analyzer.registry().len(),
                    analyzer.config().privileged_selectors.len(),
                    analyzer.config().fee_limit_selectors.len()
                );
                Ok(())
            }
        }
    }
}

fn read_config(path: Option<&Path>) -> eyre::Result<AutopsyConfig> {
    match path {
        Some(path) => AutopsyConfig::load(path)
            .wrap_err_with(|| format!("loading config {}", path.display())),
        None => Ok(AutopsyConfig::default()),
    }
}

fn read_findings(path: Option<&Path>) -> eyre::Result<Vec<Finding>> {
    match path {
        Some(path) => {
            load_findings(path).wrap_err_with(|| format!("loading findings {}", path.display()))
        }
        None => Ok(Vec::new()),
    }
}

fn emit(json: &str, output: Option<&Path>) -> eyre::Result<()> {
    match output {
        Some(path) => std::fs::write(path, json)
            .wrap_err_with(|| format!("writing {}", path.display())),
        None => {
            println!("{json}");
            Ok(())
        }
    }
}
