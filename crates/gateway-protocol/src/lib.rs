//! # gateway-protocol
//!
//! Shared wire schema for the real-time gateway.
//!
//! Both the server and the client state machines consume this crate, so the
//! opcode values, close codes, and envelope shapes cannot drift between the
//! two sides.

pub mod close_codes;
pub mod events;
pub mod frame;
pub mod id;
pub mod opcodes;
pub mod payloads;

pub use close_codes::CloseCode;
pub use events::EventType;
pub use frame::GatewayFrame;
pub use id::{Id, IdParseError};
pub use opcodes::OpCode;
pub use payloads::{
    HelloPayload, IdentifyPayload, ReadyPayload, ResumePayload, ResumedPayload, UserPayload,
};
