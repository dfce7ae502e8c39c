#![doc = include_str!("../README.md")]

mod error;
mod pause;
mod pool;
mod queue;
mod signal;
mod task;
mod worker;

pub use crate::{
    error::{CreateError, InvalidArgumentError, ShutdownTimeoutError, SubmitError},
    pause::PauseToken,
    pool::{Builder, PerCore, PoolSize, ThreadPool},
    signal::Signal,
    task::Task,
};
