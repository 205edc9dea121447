pub mod cancellation;
pub mod convergence;
pub mod escalation;
pub mod propagation;
pub mod retry;

pub use cancellation::{CancellationAck, CancellationService};
pub use convergence::{ConvergenceMonitor, MonitorConfig, WorkflowReconciliation};
pub use escalation::{ChannelEscalationSink, Escalation, EscalationSink, LogEscalationSink};
pub use propagation::{PropagationConfig, PropagationEngine, PropagationReport};
pub use retry::RetryPolicy;
