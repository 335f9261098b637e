//! Client side of a terminal workspace: several remote shell sessions
//! multiplexed over one reconnecting WebSocket.

pub mod config;
pub mod history;
pub mod input;
pub mod protocol;
pub mod session;
pub mod telemetry;
pub mod terminal;
pub mod transport;
pub mod workspace;

pub use config::{ClientConfig, ConfigError};
pub use history::CommandHistoryBuffer;
pub use input::InputRouter;
pub use protocol::{Frame, FrameCodec, SessionId, SessionStatus};
pub use session::{RegistryError, Session, SessionRegistry};
pub use transport::{
    ConnectionState, ReconnectPolicy, TransportConnection, TransportEvent, TransportHandle,
};
pub use workspace::{Control, Renderer, Workspace, WorkspaceEvent};
