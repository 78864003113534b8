//! Vtable trait mapping bus members to typed handlers.
//!
//! Implementors provide the service semantics (echo store, chunk
//! receiver); the server framework owns connection management, routing,
//! and the envelope format. Default implementations answer 501 so a
//! handler only overrides the members it serves.

use std::future::Future;
use std::pin::Pin;

use chunkbus_protocol::Message;
use chunkbus_protocol::constants::ERR_NOT_IMPLEMENTED;

use crate::connection::Sender;

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Handler vtable for `com.example.ITestService`.
///
/// Methods receive a [`Sender`] to answer through (replies may be sent
/// from another task, e.g. after a worker-pool hop) and the parsed
/// envelope. Handlers must not block the dispatch task on long waits;
/// offload those and reply from the offloaded task.
pub trait ServiceHandler: Send + Sync + 'static {
    /// Called for `SetTestBool`.
    fn on_set_test_bool(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, ERR_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `SetTestInt`.
    fn on_set_test_int(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, ERR_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `SetTestDouble`.
    fn on_set_test_double(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, ERR_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `SetTestString`.
    fn on_set_test_string(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, ERR_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `SetTestInfo`.
    fn on_set_test_info(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, ERR_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `GetTestBool`. The heartbeat probe uses this member, so
    /// real services must always answer it.
    fn on_get_test_bool(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, ERR_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `GetTestInt`.
    fn on_get_test_int(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, ERR_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `GetTestDouble`.
    fn on_get_test_double(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, ERR_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `GetTestString`.
    fn on_get_test_string(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, ERR_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `GetTestInfo`.
    fn on_get_test_info(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, ERR_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `SendFileChunk`.
    fn on_send_file_chunk(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, ERR_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `GetTransferStatus`.
    fn on_get_transfer_status(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, ERR_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called for `GetMissingChunks`.
    fn on_get_missing_chunks(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let _ = sender.send_error(&msg, ERR_NOT_IMPLEMENTED, "not implemented");
        })
    }

    /// Called when a peer connection goes away (cleanup hook).
    fn on_peer_disconnected(&self) -> HandlerFuture<'_> {
        Box::pin(async {})
    }
}
