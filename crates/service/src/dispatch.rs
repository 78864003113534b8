//! Maps bus envelopes onto [`TestService`] calls.
//!
//! Scalar members answer inline on the dispatch task. `SendFileChunk`
//! hops through the worker pool because admission may wait on the memory
//! budget, and the dispatch task must never block on that; the reply is
//! sent from the pooled task when processing finishes.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use chunkbus_bus_server::{HandlerFuture, Sender, ServiceHandler};
use chunkbus_protocol::Message;
use chunkbus_protocol::constants::{
    ERR_BAD_REQUEST, ERR_INTERNAL, SIG_BOOL, SIG_DOUBLE, SIG_INFO, SIG_INT, SIG_MISSING_CHUNKS,
    SIG_STRING, SIG_TRANSFER_STATUS,
};
use chunkbus_protocol::messages::{
    BoolValue, DoubleValue, FileChunkMsg, InfoValue, IntValue, StringValue, TransferQuery,
};
use chunkbus_receiver::ReceiveError;
use chunkbus_task_pool::TaskPool;

use crate::service::TestService;

/// Implements the bus vtable on top of [`TestService`].
pub struct ServiceDispatcher {
    service: Arc<TestService>,
    pool: Arc<TaskPool>,
}

impl ServiceDispatcher {
    pub fn new(service: Arc<TestService>, pool: Arc<TaskPool>) -> Self {
        Self { service, pool }
    }
}

fn parse_args<T: DeserializeOwned>(msg: &Message) -> Result<T, String> {
    msg.parse_payload::<T>()
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "missing payload".to_owned())
}

fn reply_or_log(sender: &Sender, reply: Result<Message, serde_json::Error>) {
    match reply {
        Ok(msg) => {
            let _ = sender.send_msg(msg);
        }
        Err(e) => tracing::error!("failed to encode reply: {e}"),
    }
}

fn receive_error_code(e: &ReceiveError) -> i32 {
    match e {
        ReceiveError::InvalidChunk(_)
        | ReceiveError::ShapeMismatch { .. }
        | ReceiveError::BudgetExceeded => ERR_BAD_REQUEST,
        _ => ERR_INTERNAL,
    }
}

impl ServiceHandler for ServiceDispatcher {
    fn on_set_test_bool(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            match parse_args::<BoolValue>(&msg) {
                Ok(args) => {
                    let ok = self.service.set_test_bool(args.value);
                    reply_or_log(&sender, msg.reply(SIG_BOOL, &BoolValue { value: ok }));
                }
                Err(e) => {
                    let _ = sender.send_error(&msg, ERR_BAD_REQUEST, &e);
                }
            }
        })
    }

    fn on_set_test_int(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            match parse_args::<IntValue>(&msg) {
                Ok(args) => {
                    let ok = self.service.set_test_int(args.value);
                    reply_or_log(&sender, msg.reply(SIG_BOOL, &BoolValue { value: ok }));
                }
                Err(e) => {
                    let _ = sender.send_error(&msg, ERR_BAD_REQUEST, &e);
                }
            }
        })
    }

    fn on_set_test_double(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            match parse_args::<DoubleValue>(&msg) {
                Ok(args) => {
                    let ok = self.service.set_test_double(args.value);
                    reply_or_log(&sender, msg.reply(SIG_BOOL, &BoolValue { value: ok }));
                }
                Err(e) => {
                    let _ = sender.send_error(&msg, ERR_BAD_REQUEST, &e);
                }
            }
        })
    }

    fn on_set_test_string(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            match parse_args::<StringValue>(&msg) {
                Ok(args) => {
                    let ok = self.service.set_test_string(&args.value);
                    reply_or_log(&sender, msg.reply(SIG_BOOL, &BoolValue { value: ok }));
                }
                Err(e) => {
                    let _ = sender.send_error(&msg, ERR_BAD_REQUEST, &e);
                }
            }
        })
    }

    fn on_set_test_info(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            match parse_args::<InfoValue>(&msg) {
                Ok(args) => {
                    let ok = self.service.set_test_info(&args.value);
                    reply_or_log(&sender, msg.reply(SIG_BOOL, &BoolValue { value: ok }));
                }
                Err(e) => {
                    let _ = sender.send_error(&msg, ERR_BAD_REQUEST, &e);
                }
            }
        })
    }

    fn on_get_test_bool(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let value = self.service.get_test_bool();
            reply_or_log(&sender, msg.reply(SIG_BOOL, &BoolValue { value }));
        })
    }

    fn on_get_test_int(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let value = self.service.get_test_int();
            reply_or_log(&sender, msg.reply(SIG_INT, &IntValue { value }));
        })
    }

    fn on_get_test_double(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let value = self.service.get_test_double();
            reply_or_log(&sender, msg.reply(SIG_DOUBLE, &DoubleValue { value }));
        })
    }

    fn on_get_test_string(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let value = self.service.get_test_string();
            reply_or_log(&sender, msg.reply(SIG_STRING, &StringValue { value }));
        })
    }

    fn on_get_test_info(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            let value = self.service.get_test_info();
            reply_or_log(&sender, msg.reply(SIG_INFO, &InfoValue { value }));
        })
    }

    fn on_send_file_chunk(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        let service = self.service.clone();
        let pool = self.pool.clone();
        Box::pin(async move {
            let chunk: FileChunkMsg = match parse_args(&msg) {
                Ok(chunk) => chunk,
                Err(e) => {
                    let _ = sender.send_error(&msg, ERR_BAD_REQUEST, &e);
                    return;
                }
            };

            // The pooled task owns the reply; admission waits happen
            // there, off the dispatch task.
            pool.submit(async move {
                match service.send_file_chunk(chunk).await {
                    Ok(()) => {
                        reply_or_log(&sender, msg.reply(SIG_BOOL, &BoolValue { value: true }));
                    }
                    Err(e) => {
                        let _ =
                            sender.send_error(&msg, receive_error_code(&e), &e.to_string());
                    }
                }
                Ok(())
            });
        })
    }

    fn on_get_transfer_status(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            match parse_args::<TransferQuery>(&msg) {
                Ok(q) => {
                    let status =
                        self.service
                            .transfer_status(&q.transfer_id, &q.userid, &q.file_name);
                    reply_or_log(&sender, msg.reply(SIG_TRANSFER_STATUS, &status));
                }
                Err(e) => {
                    let _ = sender.send_error(&msg, ERR_BAD_REQUEST, &e);
                }
            }
        })
    }

    fn on_get_missing_chunks(&self, sender: Sender, msg: Message) -> HandlerFuture<'_> {
        Box::pin(async move {
            match parse_args::<TransferQuery>(&msg) {
                Ok(q) => {
                    let missing =
                        self.service
                            .missing_chunks(&q.transfer_id, &q.userid, &q.file_name);
                    reply_or_log(&sender, msg.reply(SIG_MISSING_CHUNKS, &missing));
                }
                Err(e) => {
                    let _ = sender.send_error(&msg, ERR_BAD_REQUEST, &e);
                }
            }
        })
    }
}
