//! Test fixtures for broker scenarios: scripted plugins, storage with
//! injectable failures, and in-process brokers wired over loopback.

pub mod fixtures;
pub mod plugin;
pub mod storage;

pub use fixtures::{alice, compute_spec, volume_spec, Federation, TestBroker, FAST_WORKERS, SIM_CLOUD};
pub use plugin::{ScriptedPlugin, SCRIPT_BUILDING, SCRIPT_FAILED, SCRIPT_READY};
pub use storage::FlakyStorage;
