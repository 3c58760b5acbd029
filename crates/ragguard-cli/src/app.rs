//! CLI argument definitions

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ragguard")]
#[command(
    author,
    version,
    about = "Inspect and exercise the ragguard resilience substrate"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to the user config directory)
    #[arg(long, global = true, env = "RAGGUARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, value_enum, default_value = "cli")]
    pub format: OutputFormat,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show, locate or initialise the configuration
    Config(ConfigArgs),

    /// Send questions to the LLM service through the guarded query path
    Probe(ProbeArgs),

    /// Show pool, cache and breaker state for the LLM path
    Status,
}

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file location
    Path,
    /// Write the default configuration
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Args)]
pub struct ProbeArgs {
    /// Question to send
    pub question: Vec<String>,

    /// Number of requests
    #[arg(short = 'n', long, default_value = "1")]
    pub count: usize,

    /// Requests in flight at once
    #[arg(short, long, default_value = "1")]
    pub concurrency: usize,

    /// Send each request with a distinct question so the cache is bypassed
    #[arg(long)]
    pub distinct: bool,

    /// Print the metrics dashboard afterwards
    #[arg(long)]
    pub dashboard: bool,

    /// Dashboard window in seconds
    #[arg(long, default_value = "300")]
    pub window: u64,
}

impl ProbeArgs {
    pub fn question(&self) -> String {
        self.question.join(" ")
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, ValueEnum)]
pub enum OutputFormat {
    Cli,
    Json,
    Yaml,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_defaults() {
        let cli = Cli::try_parse_from(["ragguard", "probe", "what", "is", "rag?"]).unwrap();
        let Commands::Probe(args) = cli.command else {
            panic!("expected probe");
        };
        assert_eq!(args.question(), "what is rag?");
        assert_eq!(args.count, 1);
        assert_eq!(args.concurrency, 1);
        assert!(!args.dashboard);
        assert_eq!(cli.format, OutputFormat::Cli);
    }

    #[test]
    fn test_probe_options_and_global_flags() {
        let cli = Cli::try_parse_from([
            "ragguard",
            "probe",
            "hello",
            "-n",
            "20",
            "-c",
            "4",
            "--distinct",
            "--dashboard",
            "--format",
            "json",
            "-v",
        ])
        .unwrap();
        let Commands::Probe(args) = cli.command else {
            panic!("expected probe");
        };
        assert_eq!(args.count, 20);
        assert_eq!(args.concurrency, 4);
        assert!(args.distinct);
        assert!(args.dashboard);
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(cli.verbose);
    }

    #[test]
    fn test_config_actions() {
        let cli =
            Cli::try_parse_from(["ragguard", "--config", "/tmp/rg.yml", "config", "init", "--force"])
                .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/rg.yml")));
        assert!(matches!(
            cli.command,
            Commands::Config(ConfigArgs {
                action: ConfigAction::Init { force: true }
            })
        ));
    }

    #[test]
    fn test_rejects_unknown_format() {
        assert!(Cli::try_parse_from(["ragguard", "status", "--format", "xml"]).is_err());
        assert!(Cli::try_parse_from(["ragguard"]).is_err());
    }
}
