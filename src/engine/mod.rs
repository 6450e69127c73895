//! Execution engine module

pub mod executor;

pub use executor::{
    CancelChecker, ExecutionError, ExecutionLog, ExecutionResult, Executor, LogHook, LogStatus,
    RunHooks,
};
