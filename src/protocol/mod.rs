//! PostgreSQL wire protocol, version 3.0.
//!
//! Frames are `[type byte][Int32 length][payload]` where the length counts
//! itself but not the type byte. The startup family (Startup, SSLRequest,
//! CancelRequest) omits the type byte and is distinguished by a version or
//! request code at the front of the payload instead.

pub mod backend;
pub mod codec;
pub mod frontend;
pub mod message;
pub mod parser;
pub mod types;

pub use message::Message;
pub use parser::{Parsed, StreamParser};
pub use types::{DataType, FormatCode, Oid, TransactionStatus};
