pub mod adapter;
pub mod command_center;
pub mod consensus;
pub mod coordinator;
pub mod error;
pub mod execution;
pub mod node;
pub mod parser;
pub mod registry;
pub mod risk;
pub mod safety;
pub mod transport;

pub mod test_support;

pub use adapter::{AgentAdapter, AgentBackend, LiveAgent, SimulatedAgent};
pub use command_center::CommandCenter;
pub use coordinator::CrossAgentCoordinator;
pub use error::{AgentError, CoordinationError, TransportError};
pub use node::AgentNode;
pub use registry::AgentRegistry;
pub use safety::{NoopSafetyMonitor, SafetyMonitor, Severity, TracingSafetyMonitor};
pub use transport::{LocalTransport, Transport};
