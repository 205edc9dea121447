pub mod agent;
pub mod worker;

pub use agent::{AckOutcome, AgentProtocol, ProtocolConfig};
pub use worker::{AgentWorker, Teardown, WorkerConfig, WorkerPassReport};
