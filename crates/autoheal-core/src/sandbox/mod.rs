//! Sandbox: resource-bounded, network-isolated test execution.
//!
//! Every sandboxed run uses a throwaway container with no network, a
//! read-only root, bounded tmpfs scratch, memory/CPU ceilings and a hard
//! wall-clock timeout. When the container runtime is absent the same script
//! runs directly on the host and a `sandbox.degraded` warning is emitted.
//!
//! # Modules
//!
//! - [`config`]: `SandboxConfig` (limits, images, timeouts)
//! - [`runtime`]: `SandboxRuntime` probe and `run` argument builder
//! - [`script`]: per-language test scripts and sentinel report recovery
//! - [`report`]: pytest / jest / plain-text report parsing
//! - [`executor`]: `TestExecutor` trait and `SandboxedExecutor`

pub mod config;
pub mod executor;
pub mod report;
pub mod runtime;
pub mod script;

pub use config::SandboxConfig;
pub use executor::{interpret, CommandOutput, SandboxedExecutor, TestExecutor};
pub use report::PathMapper;
pub use runtime::SandboxRuntime;
