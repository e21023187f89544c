//! Message encoding on top of a transport
//!
//! Provides the Thrift-style `Protocol` abstraction the processor reads requests
//! from and writes replies to, together with the default binary codec.

use async_trait::async_trait;

use crate::{errors::ProtocolError, transport::Transport};

pub mod binary;

pub use binary::{BinaryProtocol, BinaryProtocolFactory};

const MAX_SKIP_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Call = 1,
    Reply = 2,
    Exception = 3,
    Oneway = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Call),
            2 => Ok(Self::Reply),
            3 => Ok(Self::Exception),
            4 => Ok(Self::Oneway),
            other => Err(ProtocolError::InvalidData(format!(
                "unknown message type {other}"
            ))),
        }
    }
}

/// Wire type tag of a field, list element or map entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TType {
    Stop = 0,
    Void = 1,
    Bool = 2,
    Byte = 3,
    Double = 4,
    I16 = 6,
    I32 = 8,
    I64 = 10,
    String = 11,
    Struct = 12,
    Map = 13,
    Set = 14,
    List = 15,
}

impl TryFrom<u8> for TType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Stop,
            1 => Self::Void,
            2 => Self::Bool,
            3 => Self::Byte,
            4 => Self::Double,
            6 => Self::I16,
            8 => Self::I32,
            10 => Self::I64,
            11 => Self::String,
            12 => Self::Struct,
            13 => Self::Map,
            14 => Self::Set,
            15 => Self::List,
            other => return Err(ProtocolError::UnknownType(other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub name: String,
    pub message_type: MessageType,
    pub sequence_id: i32,
}

impl MessageHeader {
    pub fn new(name: impl Into<String>, message_type: MessageType, sequence_id: i32) -> Self {
        Self {
            name: name.into(),
            message_type,
            sequence_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldHeader {
    pub field_type: TType,
    pub id: i16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListHeader {
    pub element_type: TType,
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapHeader {
    pub key_type: TType,
    pub value_type: TType,
    pub size: usize,
}

/// Encoder/decoder for one RPC message at a time.
///
/// Reads and writes are sequential against the owned transport. Writers must
/// call `write_message_end` to push the buffered message onto the wire.
#[async_trait]
pub trait Protocol: Send {
    fn transport(&mut self) -> &mut dyn Transport;

    async fn read_message_begin(&mut self) -> Result<MessageHeader, ProtocolError>;
    async fn read_message_end(&mut self) -> Result<(), ProtocolError>;
    async fn read_struct_begin(&mut self) -> Result<(), ProtocolError>;
    async fn read_struct_end(&mut self) -> Result<(), ProtocolError>;
    /// Returns `None` at the stop marker closing a struct.
    async fn read_field_begin(&mut self) -> Result<Option<FieldHeader>, ProtocolError>;
    async fn read_field_end(&mut self) -> Result<(), ProtocolError>;
    async fn read_list_begin(&mut self) -> Result<ListHeader, ProtocolError>;
    async fn read_list_end(&mut self) -> Result<(), ProtocolError>;
    async fn read_set_begin(&mut self) -> Result<ListHeader, ProtocolError>;
    async fn read_set_end(&mut self) -> Result<(), ProtocolError>;
    async fn read_map_begin(&mut self) -> Result<MapHeader, ProtocolError>;
    async fn read_map_end(&mut self) -> Result<(), ProtocolError>;
    async fn read_bool(&mut self) -> Result<bool, ProtocolError>;
    async fn read_byte(&mut self) -> Result<i8, ProtocolError>;
    async fn read_i16(&mut self) -> Result<i16, ProtocolError>;
    async fn read_i32(&mut self) -> Result<i32, ProtocolError>;
    async fn read_i64(&mut self) -> Result<i64, ProtocolError>;
    async fn read_double(&mut self) -> Result<f64, ProtocolError>;
    async fn read_binary(&mut self) -> Result<Vec<u8>, ProtocolError>;

    async fn read_string(&mut self) -> Result<String, ProtocolError> {
        let raw = self.read_binary().await?;
        String::from_utf8(raw)
            .map_err(|err| ProtocolError::InvalidData(format!("string is not utf-8: {err}")))
    }

    async fn write_message_begin(&mut self, header: &MessageHeader) -> Result<(), ProtocolError>;
    async fn write_message_end(&mut self) -> Result<(), ProtocolError>;
    async fn write_struct_begin(&mut self, name: &str) -> Result<(), ProtocolError>;
    async fn write_struct_end(&mut self) -> Result<(), ProtocolError>;
    async fn write_field_begin(&mut self, field: FieldHeader) -> Result<(), ProtocolError>;
    async fn write_field_end(&mut self) -> Result<(), ProtocolError>;
    async fn write_field_stop(&mut self) -> Result<(), ProtocolError>;
    async fn write_list_begin(&mut self, list: ListHeader) -> Result<(), ProtocolError>;
    async fn write_list_end(&mut self) -> Result<(), ProtocolError>;
    async fn write_set_begin(&mut self, set: ListHeader) -> Result<(), ProtocolError>;
    async fn write_set_end(&mut self) -> Result<(), ProtocolError>;
    async fn write_map_begin(&mut self, map: MapHeader) -> Result<(), ProtocolError>;
    async fn write_map_end(&mut self) -> Result<(), ProtocolError>;
    async fn write_bool(&mut self, value: bool) -> Result<(), ProtocolError>;
    async fn write_byte(&mut self, value: i8) -> Result<(), ProtocolError>;
    async fn write_i16(&mut self, value: i16) -> Result<(), ProtocolError>;
    async fn write_i32(&mut self, value: i32) -> Result<(), ProtocolError>;
    async fn write_i64(&mut self, value: i64) -> Result<(), ProtocolError>;
    async fn write_double(&mut self, value: f64) -> Result<(), ProtocolError>;
    async fn write_binary(&mut self, value: &[u8]) -> Result<(), ProtocolError>;

    async fn write_string(&mut self, value: &str) -> Result<(), ProtocolError> {
        self.write_binary(value.as_bytes()).await
    }

    /// Consumes and discards one value of the given type.
    async fn skip(&mut self, value_type: TType) -> Result<(), ProtocolError> {
        self.skip_nested(value_type, MAX_SKIP_DEPTH).await
    }

    async fn skip_nested(&mut self, value_type: TType, depth: usize) -> Result<(), ProtocolError> {
        if depth == 0 {
            return Err(ProtocolError::InvalidData(
                "maximum skip depth exceeded".to_string(),
            ));
        }

        match value_type {
            TType::Stop | TType::Void => Ok(()),
            TType::Bool => self.read_bool().await.map(drop),
            TType::Byte => self.read_byte().await.map(drop),
            TType::Double => self.read_double().await.map(drop),
            TType::I16 => self.read_i16().await.map(drop),
            TType::I32 => self.read_i32().await.map(drop),
            TType::I64 => self.read_i64().await.map(drop),
            TType::String => self.read_binary().await.map(drop),
            TType::Struct => {
                self.read_struct_begin().await?;
                while let Some(field) = self.read_field_begin().await? {
                    self.skip_nested(field.field_type, depth - 1).await?;
                    self.read_field_end().await?;
                }
                self.read_struct_end().await
            }
            TType::Map => {
                let map = self.read_map_begin().await?;
                for _ in 0..map.size {
                    self.skip_nested(map.key_type, depth - 1).await?;
                    self.skip_nested(map.value_type, depth - 1).await?;
                }
                self.read_map_end().await
            }
            TType::Set => {
                let set = self.read_set_begin().await?;
                for _ in 0..set.size {
                    self.skip_nested(set.element_type, depth - 1).await?;
                }
                self.read_set_end().await
            }
            TType::List => {
                let list = self.read_list_begin().await?;
                for _ in 0..list.size {
                    self.skip_nested(list.element_type, depth - 1).await?;
                }
                self.read_list_end().await
            }
        }
    }
}

pub trait ProtocolFactory: Send + Sync {
    fn get_protocol(&self, transport: Box<dyn Transport>) -> Box<dyn Protocol>;
}
