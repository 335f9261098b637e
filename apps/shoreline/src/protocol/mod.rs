pub mod codec;
pub mod frame;
pub mod wire;

pub use codec::{CodecError, FrameCodec, Inbound};
pub use frame::{Direction, Frame, SessionId, SessionStatus};
pub use wire::WireMessage;
