pub mod codec;
pub mod commands;
pub mod config;
pub mod error;
pub mod instance;
pub mod job;
pub mod port;
pub mod protocol;
pub mod rpc;
pub mod session;
pub mod worker;

pub use error::{WorkerError, WorkerResult};
