use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::{
    errors::{ProcessError, ProtocolError},
    protocol::{FieldHeader, MessageHeader, MessageType, Protocol, TType},
};

use super::Processor;

/// Handles one named method after its message header has been read.
///
/// Implementations read the argument struct and `read_message_end` from
/// `input`, then write the complete reply message to `output` unless the call
/// is oneway.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    async fn call(
        &self,
        header: &MessageHeader,
        input: &mut dyn Protocol,
        output: &mut dyn Protocol,
    ) -> Result<(), ProcessError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationExceptionKind {
    Unknown = 0,
    UnknownMethod = 1,
    InvalidMessageType = 2,
    WrongMethodName = 3,
    BadSequenceId = 4,
    MissingResult = 5,
    InternalError = 6,
    ProtocolError = 7,
}

/// Error reply sent to the client in an `Exception` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationException {
    pub kind: ApplicationExceptionKind,
    pub message: String,
}

impl ApplicationException {
    pub fn new(kind: ApplicationExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub async fn write_reply(
        &self,
        output: &mut dyn Protocol,
        method: &str,
        sequence_id: i32,
    ) -> Result<(), ProtocolError> {
        output
            .write_message_begin(&MessageHeader::new(
                method,
                MessageType::Exception,
                sequence_id,
            ))
            .await?;
        output.write_struct_begin("TApplicationException").await?;
        output
            .write_field_begin(FieldHeader {
                field_type: TType::String,
                id: 1,
            })
            .await?;
        output.write_string(&self.message).await?;
        output.write_field_end().await?;
        output
            .write_field_begin(FieldHeader {
                field_type: TType::I32,
                id: 2,
            })
            .await?;
        output.write_i32(self.kind as i32).await?;
        output.write_field_end().await?;
        output.write_field_stop().await?;
        output.write_struct_end().await?;
        output.write_message_end().await
    }
}

async fn discard_arguments(input: &mut dyn Protocol) -> Result<(), ProtocolError> {
    input.skip(TType::Struct).await?;
    input.read_message_end().await
}

/// Dispatches calls to handlers registered by method name.
#[derive(Default, Clone)]
pub struct MethodRouter {
    handlers: HashMap<String, Arc<dyn MethodHandler>>,
}

impl MethodRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, method: impl Into<String>, handler: Arc<dyn MethodHandler>) -> Self {
        self.handlers.insert(method.into(), handler);
        self
    }

    pub fn methods(&self) -> Vec<&str> {
        let mut methods: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        methods.sort_unstable();
        methods
    }
}

#[async_trait]
impl Processor for MethodRouter {
    async fn process(
        &self,
        input: &mut dyn Protocol,
        output: &mut dyn Protocol,
    ) -> Result<(), ProcessError> {
        let header = input.read_message_begin().await?;

        if !matches!(header.message_type, MessageType::Call | MessageType::Oneway) {
            discard_arguments(input).await?;
            warn!(
                method = %header.name,
                message_type = ?header.message_type,
                "rejected non-call message"
            );
            ApplicationException::new(
                ApplicationExceptionKind::InvalidMessageType,
                format!("expected a call, got {:?}", header.message_type),
            )
            .write_reply(output, &header.name, header.sequence_id)
            .await?;
            return Ok(());
        }

        let Some(handler) = self.handlers.get(&header.name) else {
            discard_arguments(input).await?;
            warn!(method = %header.name, "unknown method");
            if header.message_type == MessageType::Oneway {
                return Ok(());
            }
            ApplicationException::new(
                ApplicationExceptionKind::UnknownMethod,
                format!("unknown method {}", header.name),
            )
            .write_reply(output, &header.name, header.sequence_id)
            .await?;
            return Ok(());
        };

        let result = handler.call(&header, input, output).await;
        debug!(
            method = %header.name,
            sequence_id = header.sequence_id,
            outcome = if result.is_ok() { "success" } else { "failure" },
            "rpc call dispatched"
        );
        result
    }
}

/// Answers `ping` with an empty result struct.
#[derive(Debug, Default, Clone, Copy)]
pub struct PingHandler;

#[async_trait]
impl MethodHandler for PingHandler {
    async fn call(
        &self,
        header: &MessageHeader,
        input: &mut dyn Protocol,
        output: &mut dyn Protocol,
    ) -> Result<(), ProcessError> {
        discard_arguments(input).await?;
        if header.message_type == MessageType::Oneway {
            return Ok(());
        }

        output
            .write_message_begin(&MessageHeader::new(
                header.name.as_str(),
                MessageType::Reply,
                header.sequence_id,
            ))
            .await?;
        output.write_struct_begin("ping_result").await?;
        output.write_field_stop().await?;
        output.write_struct_end().await?;
        output.write_message_end().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        protocol::{BinaryProtocol, MessageType},
        test_support::ScriptedStream,
        transport::BufferedTransport,
    };

    fn protocol(stream: &Arc<ScriptedStream>) -> BinaryProtocol {
        BinaryProtocol::new(
            Box::new(BufferedTransport::new(stream.clone(), 256)),
            false,
            1024,
        )
    }

    async fn encode_call(method: &str, message_type: MessageType, sequence_id: i32) -> Vec<u8> {
        let sink = Arc::new(ScriptedStream::new(Vec::new()));
        let mut writer = protocol(&sink);
        writer
            .write_message_begin(&MessageHeader::new(method, message_type, sequence_id))
            .await
            .expect("header");
        writer.write_struct_begin("args").await.expect("args");
        writer
            .write_field_begin(FieldHeader {
                field_type: TType::String,
                id: 1,
            })
            .await
            .expect("field");
        writer.write_string("ignored").await.expect("value");
        writer.write_field_end().await.expect("field end");
        writer.write_field_stop().await.expect("stop");
        writer.write_struct_end().await.expect("args end");
        writer.write_message_end().await.expect("flush");
        sink.written()
    }

    async fn run(router: &MethodRouter, request: Vec<u8>) -> Result<Vec<u8>, ProcessError> {
        let input_stream = Arc::new(ScriptedStream::new(vec![request]));
        let output_stream = Arc::new(ScriptedStream::new(Vec::new()));
        let mut input = protocol(&input_stream);
        let mut output = protocol(&output_stream);
        router.process(&mut input, &mut output).await?;
        Ok(output_stream.written())
    }

    fn ping_router() -> MethodRouter {
        MethodRouter::new().route("ping", Arc::new(PingHandler))
    }

    #[tokio::test]
    async fn ping_gets_empty_reply_with_same_sequence_id() {
        let request = encode_call("ping", MessageType::Call, 11).await;
        let reply = run(&ping_router(), request).await.expect("ping");

        let stream = Arc::new(ScriptedStream::new(vec![reply]));
        let mut reader = protocol(&stream);
        let header = reader.read_message_begin().await.expect("reply header");
        assert_eq!(header, MessageHeader::new("ping", MessageType::Reply, 11));
        assert_eq!(reader.read_field_begin().await.expect("stop"), None);
    }

    #[tokio::test]
    async fn oneway_ping_writes_nothing() {
        let request = encode_call("ping", MessageType::Oneway, 3).await;
        let reply = run(&ping_router(), request).await.expect("oneway ping");
        assert!(reply.is_empty());
    }

    #[tokio::test]
    async fn unknown_method_replies_with_exception() {
        let request = encode_call("missing", MessageType::Call, 5).await;
        let reply = run(&ping_router(), request).await.expect("unknown method");

        let stream = Arc::new(ScriptedStream::new(vec![reply]));
        let mut reader = protocol(&stream);
        let header = reader.read_message_begin().await.expect("reply header");
        assert_eq!(header, MessageHeader::new("missing", MessageType::Exception, 5));

        let message_field = reader.read_field_begin().await.expect("field").expect("message");
        assert_eq!(message_field.id, 1);
        assert_eq!(
            reader.read_string().await.expect("message"),
            "unknown method missing"
        );
        let kind_field = reader.read_field_begin().await.expect("field").expect("kind");
        assert_eq!(kind_field.id, 2);
        assert_eq!(
            reader.read_i32().await.expect("kind"),
            ApplicationExceptionKind::UnknownMethod as i32
        );
    }

    #[tokio::test]
    async fn reply_messages_are_rejected() {
        let request = encode_call("ping", MessageType::Reply, 1).await;
        let reply = run(&ping_router(), request).await.expect("rejected reply");

        let stream = Arc::new(ScriptedStream::new(vec![reply]));
        let mut reader = protocol(&stream);
        let header = reader.read_message_begin().await.expect("reply header");
        assert_eq!(header.message_type, MessageType::Exception);
    }

    #[tokio::test]
    async fn exhausted_input_is_end_of_stream() {
        let err = run(&ping_router(), Vec::new())
            .await
            .expect_err("no request available");
        assert!(err.is_end_of_stream());
    }

    #[test]
    fn methods_are_listed_sorted() {
        let router = ping_router().route("echo", Arc::new(PingHandler));
        assert_eq!(router.methods(), vec!["echo", "ping"]);
    }
}
