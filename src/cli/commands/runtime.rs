//! Runtime command - check the container engine

use crate::cli::args::{RuntimeAction, RuntimeArgs};
use crate::cli::commands::runtime_probe;
use crate::config::Config;
use crate::error::PorchletResult;
use console::{style, Emoji};

static CHECK: Emoji<'_, '_> = Emoji("✓ ", "[OK] ");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "[FAIL] ");

/// Execute the runtime command
pub async fn execute(args: RuntimeArgs, config: &Config) -> PorchletResult<()> {
    match args.action {
        RuntimeAction::Check => check(config).await,
    }
}

async fn check(config: &Config) -> PorchletResult<()> {
    let probe = runtime_probe(config)?;

    println!("{}", style("Function Runtime").bold().cyan());
    println!();
    println!("  Engine: {}", probe.engine());
    println!("  Binary: {}", probe.binary());
    println!();

    match probe.ensure_available().await {
        Ok(()) => {
            println!("  {} {}", CHECK, style("Engine available").green());
            Ok(())
        }
        Err(e) => {
            println!("  {} {}", CROSS, style("Engine unavailable").red());
            Err(e)
        }
    }
}
