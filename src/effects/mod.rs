//! Effect execution: intake, handler registry and executor pool

mod executor;
mod handlers;
mod intake;
mod registry;

pub use executor::{execute_action, ExecutorPool, ExecutorStats};
pub use handlers::{default_registry, ContractCallHandler, ContractCallPayload};
pub use intake::ActionIntake;
pub use registry::{EffectHandler, HandlerRegistry};
