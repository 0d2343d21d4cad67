//! Gateway front-ends: the stdio server, the orchestrator that
//! sequences a session's startup/shutdown, and the SSE bridge.

pub mod bridge;
pub mod orchestrator;
pub mod server;

pub use bridge::Bridge;
pub use orchestrator::Orchestrator;
pub use server::GatewayServer;
