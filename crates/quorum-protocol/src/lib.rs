pub mod codec;
pub mod error;
pub mod protocol;
pub mod replay;
pub mod signing;

pub use codec::{claimed_kind, claimed_sender, deserialize, serialize};
pub use error::ProtocolError;
pub use protocol::MessageProtocol;
pub use replay::ReplayGuard;
pub use signing::{sign, verify};
