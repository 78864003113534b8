//! Wire protocol shared by the chunkbus client and server.
//!
//! The "bus" is a loopback WebSocket carrying JSON envelopes. Member names,
//! bus coordinates, and type signatures follow the `com.example.ITestService`
//! interface exactly; payload bodies are typed structs in [`messages`].

pub mod constants;
pub mod envelope;
pub mod messages;

pub use constants::Member;
pub use envelope::{Message, MethodError};
