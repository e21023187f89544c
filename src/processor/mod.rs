//! Request processing behind the protocol layer
//!
//! The server only needs [`Processor`]; [`router`] supplies a method-name
//! dispatcher with a built-in `ping` handler for the bundled binary.

use async_trait::async_trait;

use crate::{errors::ProcessError, protocol::Protocol};

pub mod router;

pub use router::{ApplicationException, MethodHandler, MethodRouter, PingHandler};

#[async_trait]
pub trait Processor: Send + Sync {
    /// Consumes exactly one request from `input` and writes its response to
    /// `output`.
    ///
    /// A [`ProcessError`] that is end-of-stream tells the session the peer is
    /// gone; any other error tears the connection down as a fault.
    async fn process(
        &self,
        input: &mut dyn Protocol,
        output: &mut dyn Protocol,
    ) -> Result<(), ProcessError>;
}
