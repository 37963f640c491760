//! Transport layer for the export relay.
//!
//! Provides:
//! - Wire protocol for observers and remote agents
//! - `ObserverRegistry` - session registry that delivers results (`Transport`)
//! - `AgentRegistry` - per-target agent connections (`WorkerLink`)
//! - `RelayState` - message routing into the coordinator
//! - WebSocket, status and SSE endpoints (with `websocket` feature)

pub mod protocol;
pub mod registry;
pub mod relay;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use protocol::{AgentCommand, AgentMessage, ClientMessage, ServerMessage};
pub use registry::{AgentConnection, AgentRegistry, ObserverRegistry};
pub use relay::{RelayError, RelayState};

#[cfg(feature = "websocket")]
pub use websocket::{StatusResponse, create_router};
