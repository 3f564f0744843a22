//! Runtime assembly: configuration, the builder, and the [`FlowRuntime`]
//! facade that ties the bus, router, executor, endpoints, state, and
//! observer together.

mod config;
mod runner;

pub use config::{BusConfig, ConfigError, EndpointDef, RuntimeConfig, StateConfig};
pub use runner::{FlowRuntime, FlowRuntimeBuilder, RuntimeError, StepRegistration};
