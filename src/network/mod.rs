//! Network Layer
//!
//! WebSocket feed for spectators, the trading collaborator and operators.
//! All round logic runs through `table/`.

pub mod protocol;
pub mod server;

pub use protocol::{ClientMessage, DepositRequest, ErrorCode, ErrorReply, ServerMessage, VerifyResult};
pub use server::{FeedHandler, FeedServer, ServerError};
