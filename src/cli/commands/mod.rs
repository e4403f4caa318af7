//! CLI command implementations

pub mod config;
pub mod function;
pub mod rpkg;
pub mod runtime;

pub use config::execute as config;
pub use function::execute as function;
pub use rpkg::execute as rpkg;
pub use runtime::execute as runtime;

use crate::config::Config;
use crate::error::PorchletResult;
use crate::fnruntime::RuntimeProbe;

/// Build the engine probe from `PORCHLET_FN_RUNTIME` and the config
pub fn runtime_probe(config: &Config) -> PorchletResult<RuntimeProbe> {
    RuntimeProbe::from_config(&config.runtime)
}
