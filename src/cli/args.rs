//! CLI argument definitions using clap derive

use crate::fnruntime::ImagePullPolicy;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Porchlet - package orchestration over OCI registries
///
/// Manages package revisions stored in registries and runs package
/// functions in sandboxed containers.
#[derive(Parser, Debug)]
#[command(name = "porchlet")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "PORCHLET_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run package functions
    #[command(name = "fn")]
    Function(FunctionArgs),

    /// Inspect the container engine
    Runtime(RuntimeArgs),

    /// Manage package revisions in registered repositories
    Rpkg(RpkgArgs),

    /// Show or initialize configuration
    Config(ConfigArgs),
}

/// Arguments for the fn command
#[derive(Parser, Debug)]
pub struct FunctionArgs {
    #[command(subcommand)]
    pub action: FunctionAction,
}

/// Function subcommands
#[derive(Subcommand, Debug)]
pub enum FunctionAction {
    /// Run a function over a local package directory
    Eval(EvalArgs),
}

/// Arguments for fn eval
#[derive(Parser, Debug)]
pub struct EvalArgs {
    /// Function image (short names get the default registry prefix)
    pub image: String,

    /// Package directory (defaults to current directory)
    pub dir: Option<PathBuf>,

    /// Write results here instead of back into the package directory
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Give the function host networking
    #[arg(long)]
    pub network: bool,

    /// Storage mounts (type=bind,src=/host,dst=/container[,rw=true])
    #[arg(long = "mount")]
    pub mounts: Vec<String>,

    /// Permit storage mounts
    #[arg(long)]
    pub allow_mount: bool,

    /// Environment for the function (KEY=VALUE, or KEY to pass through)
    #[arg(short, long)]
    pub env: Vec<String>,

    /// Image pull policy: Always, IfNotPresent, Never
    #[arg(long, value_parser = parse_pull_policy)]
    pub image_pull_policy: Option<ImagePullPolicy>,

    /// Kill the function after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Run as UID:GID instead of nobody
    #[arg(long)]
    pub user: Option<String>,
}

/// Arguments for the runtime command
#[derive(Parser, Debug)]
pub struct RuntimeArgs {
    #[command(subcommand)]
    pub action: RuntimeAction,
}

/// Runtime subcommands
#[derive(Subcommand, Debug)]
pub enum RuntimeAction {
    /// Check that the selected engine is installed and supported
    Check,
}

/// Arguments for the rpkg command
#[derive(Parser, Debug)]
pub struct RpkgArgs {
    /// Namespace of the repositories
    #[arg(short, long, global = true, default_value = "default")]
    pub namespace: String,

    #[command(subcommand)]
    pub action: RpkgAction,
}

/// Package revision subcommands
#[derive(Subcommand, Debug)]
pub enum RpkgAction {
    /// List package revisions
    List {
        /// Field selector (e.g. spec.repository=blueprints,spec.lifecycle=Draft)
        #[arg(short, long, default_value = "")]
        selector: String,

        /// Output format
        #[arg(short, long, default_value = "table")]
        format: OutputFormat,
    },

    /// Show one package revision
    Get {
        /// Package revision name
        name: String,

        /// Output format
        #[arg(short, long, default_value = "json")]
        format: OutputFormat,
    },

    /// Create a new draft package
    Init {
        /// Package name
        package: String,

        /// Repository to create it in
        #[arg(short, long)]
        repository: String,

        /// Revision tag
        #[arg(long, default_value = "v1")]
        revision: String,

        /// Package description
        #[arg(long)]
        description: Option<String>,

        /// Package keywords (comma-separated)
        #[arg(long, value_delimiter = ',')]
        keywords: Vec<String>,

        /// Package site URL
        #[arg(long)]
        site: Option<String>,
    },

    /// Propose a draft for publishing
    Propose {
        /// Package revision name
        name: String,
    },

    /// Return a proposed revision to draft
    Reject {
        /// Package revision name
        name: String,
    },

    /// Publish a proposed revision
    Approve {
        /// Package revision name
        name: String,
    },

    /// Delete a package revision
    Delete {
        /// Package revision name
        name: String,
    },
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

/// Output format for listings
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
    /// Simple text (one per line)
    Plain,
}

fn parse_pull_policy(s: &str) -> Result<ImagePullPolicy, String> {
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_fn_eval() {
        let cli = Cli::parse_from([
            "porchlet",
            "fn",
            "eval",
            "set-namespace:v0.4",
            "./pkg",
            "-e",
            "namespace=prod",
            "--image-pull-policy",
            "never",
        ]);
        match cli.command {
            Commands::Function(FunctionArgs {
                action: FunctionAction::Eval(args),
            }) => {
                assert_eq!(args.image, "set-namespace:v0.4");
                assert_eq!(args.dir, Some(PathBuf::from("./pkg")));
                assert_eq!(args.env, vec!["namespace=prod"]);
                assert_eq!(args.image_pull_policy, Some(ImagePullPolicy::Never));
                assert!(!args.network);
            }
            _ => panic!("expected fn eval"),
        }
    }

    #[test]
    fn cli_rejects_unknown_pull_policy() {
        let result = Cli::try_parse_from([
            "porchlet",
            "fn",
            "eval",
            "img",
            "--image-pull-policy",
            "sometimes",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_parses_rpkg_init() {
        let cli = Cli::parse_from([
            "porchlet",
            "rpkg",
            "init",
            "basens",
            "--repository",
            "blueprints",
            "--keywords",
            "ns,base",
            "-n",
            "prod",
        ]);
        match cli.command {
            Commands::Rpkg(args) => {
                assert_eq!(args.namespace, "prod");
                match args.action {
                    RpkgAction::Init {
                        package,
                        repository,
                        revision,
                        keywords,
                        ..
                    } => {
                        assert_eq!(package, "basens");
                        assert_eq!(repository, "blueprints");
                        assert_eq!(revision, "v1");
                        assert_eq!(keywords, vec!["ns", "base"]);
                    }
                    _ => panic!("expected rpkg init"),
                }
            }
            _ => panic!("expected rpkg"),
        }
    }

    #[test]
    fn cli_rpkg_namespace_defaults() {
        let cli = Cli::parse_from(["porchlet", "rpkg", "list"]);
        match cli.command {
            Commands::Rpkg(args) => assert_eq!(args.namespace, "default"),
            _ => panic!("expected rpkg"),
        }
    }

    #[test]
    fn cli_verbose_levels() {
        let cli = Cli::parse_from(["porchlet", "runtime", "check"]);
        assert_eq!(cli.verbose, 0);

        let cli = Cli::parse_from(["porchlet", "-vv", "runtime", "check"]);
        assert_eq!(cli.verbose, 2);
    }
}
