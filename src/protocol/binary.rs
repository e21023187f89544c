use async_trait::async_trait;

use crate::{errors::ProtocolError, transport::Transport};

use super::{
    FieldHeader, ListHeader, MapHeader, MessageHeader, MessageType, Protocol, ProtocolFactory,
    TType,
};

const VERSION_1: u32 = 0x8001_0000;
const VERSION_MASK: u32 = 0xffff_0000;
const TYPE_MASK: u32 = 0x0000_00ff;

pub const DEFAULT_MAX_LENGTH: usize = 16 * 1024 * 1024;

/// Big-endian Thrift binary encoding. Always writes strict message headers.
pub struct BinaryProtocol {
    transport: Box<dyn Transport>,
    strict_read: bool,
    max_length: usize,
}

impl BinaryProtocol {
    pub fn new(transport: Box<dyn Transport>, strict_read: bool, max_length: usize) -> Self {
        Self {
            transport,
            strict_read,
            max_length,
        }
    }

    async fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        let mut buf = [0u8; N];
        self.transport.read_exact(&mut buf).await?;
        Ok(buf)
    }

    fn checked_size(&self, size: i32) -> Result<usize, ProtocolError> {
        let size = usize::try_from(size).map_err(|_| ProtocolError::NegativeSize(size))?;
        if size > self.max_length {
            return Err(ProtocolError::SizeLimit {
                size,
                limit: self.max_length,
            });
        }
        Ok(size)
    }

    async fn read_type(&mut self) -> Result<TType, ProtocolError> {
        let [raw] = self.read_array::<1>().await?;
        TType::try_from(raw)
    }

    async fn read_sized(&mut self, size: usize) -> Result<Vec<u8>, ProtocolError> {
        let mut buf = vec![0u8; size];
        self.transport.read_exact(&mut buf).await?;
        Ok(buf)
    }

    async fn write_size(&mut self, size: usize) -> Result<(), ProtocolError> {
        let size = i32::try_from(size).map_err(|_| ProtocolError::SizeLimit {
            size,
            limit: i32::MAX as usize,
        })?;
        self.write_i32(size).await
    }
}

#[async_trait]
impl Protocol for BinaryProtocol {
    fn transport(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    async fn read_message_begin(&mut self) -> Result<MessageHeader, ProtocolError> {
        let first = self.read_i32().await?;

        if first < 0 {
            let word = first as u32;
            if word & VERSION_MASK != VERSION_1 {
                return Err(ProtocolError::BadVersion(word));
            }
            let message_type = MessageType::try_from((word & TYPE_MASK) as u8)?;
            let name = self.read_string().await?;
            let sequence_id = self.read_i32().await?;
            return Ok(MessageHeader::new(name, message_type, sequence_id));
        }

        if self.strict_read {
            return Err(ProtocolError::BadVersion(first as u32));
        }

        let size = self.checked_size(first)?;
        let raw_name = self.read_sized(size).await?;
        let name = String::from_utf8(raw_name)
            .map_err(|err| ProtocolError::InvalidData(format!("method name is not utf-8: {err}")))?;
        let [raw_type] = self.read_array::<1>().await?;
        let message_type = MessageType::try_from(raw_type)?;
        let sequence_id = self.read_i32().await?;
        Ok(MessageHeader::new(name, message_type, sequence_id))
    }

    async fn read_message_end(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn read_struct_begin(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn read_struct_end(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn read_field_begin(&mut self) -> Result<Option<FieldHeader>, ProtocolError> {
        let field_type = self.read_type().await?;
        if field_type == TType::Stop {
            return Ok(None);
        }
        let id = self.read_i16().await?;
        Ok(Some(FieldHeader { field_type, id }))
    }

    async fn read_field_end(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn read_list_begin(&mut self) -> Result<ListHeader, ProtocolError> {
        let element_type = self.read_type().await?;
        let size = self.read_i32().await?;
        Ok(ListHeader {
            element_type,
            size: self.checked_size(size)?,
        })
    }

    async fn read_list_end(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn read_set_begin(&mut self) -> Result<ListHeader, ProtocolError> {
        self.read_list_begin().await
    }

    async fn read_set_end(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn read_map_begin(&mut self) -> Result<MapHeader, ProtocolError> {
        let key_type = self.read_type().await?;
        let value_type = self.read_type().await?;
        let size = self.read_i32().await?;
        Ok(MapHeader {
            key_type,
            value_type,
            size: self.checked_size(size)?,
        })
    }

    async fn read_map_end(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_byte().await? != 0)
    }

    async fn read_byte(&mut self) -> Result<i8, ProtocolError> {
        Ok(i8::from_be_bytes(self.read_array().await?))
    }

    async fn read_i16(&mut self) -> Result<i16, ProtocolError> {
        Ok(i16::from_be_bytes(self.read_array().await?))
    }

    async fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        Ok(i32::from_be_bytes(self.read_array().await?))
    }

    async fn read_i64(&mut self) -> Result<i64, ProtocolError> {
        Ok(i64::from_be_bytes(self.read_array().await?))
    }

    async fn read_double(&mut self) -> Result<f64, ProtocolError> {
        Ok(f64::from_bits(u64::from_be_bytes(self.read_array().await?)))
    }

    async fn read_binary(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let size = self.read_i32().await?;
        let size = self.checked_size(size)?;
        self.read_sized(size).await
    }

    async fn write_message_begin(&mut self, header: &MessageHeader) -> Result<(), ProtocolError> {
        let word = VERSION_1 | header.message_type as u32;
        self.write_i32(word as i32).await?;
        self.write_string(&header.name).await?;
        self.write_i32(header.sequence_id).await
    }

    async fn write_message_end(&mut self) -> Result<(), ProtocolError> {
        self.transport.flush().await?;
        Ok(())
    }

    async fn write_struct_begin(&mut self, _name: &str) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn write_struct_end(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn write_field_begin(&mut self, field: FieldHeader) -> Result<(), ProtocolError> {
        self.write_byte(field.field_type as i8).await?;
        self.write_i16(field.id).await
    }

    async fn write_field_end(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn write_field_stop(&mut self) -> Result<(), ProtocolError> {
        self.write_byte(TType::Stop as i8).await
    }

    async fn write_list_begin(&mut self, list: ListHeader) -> Result<(), ProtocolError> {
        self.write_byte(list.element_type as i8).await?;
        self.write_size(list.size).await
    }

    async fn write_list_end(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn write_set_begin(&mut self, set: ListHeader) -> Result<(), ProtocolError> {
        self.write_list_begin(set).await
    }

    async fn write_set_end(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn write_map_begin(&mut self, map: MapHeader) -> Result<(), ProtocolError> {
        self.write_byte(map.key_type as i8).await?;
        self.write_byte(map.value_type as i8).await?;
        self.write_size(map.size).await
    }

    async fn write_map_end(&mut self) -> Result<(), ProtocolError> {
        Ok(())
    }

    async fn write_bool(&mut self, value: bool) -> Result<(), ProtocolError> {
        self.write_byte(i8::from(value)).await
    }

    async fn write_byte(&mut self, value: i8) -> Result<(), ProtocolError> {
        self.transport.write(&value.to_be_bytes()).await?;
        Ok(())
    }

    async fn write_i16(&mut self, value: i16) -> Result<(), ProtocolError> {
        self.transport.write(&value.to_be_bytes()).await?;
        Ok(())
    }

    async fn write_i32(&mut self, value: i32) -> Result<(), ProtocolError> {
        self.transport.write(&value.to_be_bytes()).await?;
        Ok(())
    }

    async fn write_i64(&mut self, value: i64) -> Result<(), ProtocolError> {
        self.transport.write(&value.to_be_bytes()).await?;
        Ok(())
    }

    async fn write_double(&mut self, value: f64) -> Result<(), ProtocolError> {
        self.transport.write(&value.to_bits().to_be_bytes()).await?;
        Ok(())
    }

    async fn write_binary(&mut self, value: &[u8]) -> Result<(), ProtocolError> {
        self.write_size(value.len()).await?;
        self.transport.write(value).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BinaryProtocolFactory {
    strict_read: bool,
    max_length: usize,
}

impl BinaryProtocolFactory {
    pub fn new(strict_read: bool, max_length: usize) -> Self {
        Self {
            strict_read,
            max_length,
        }
    }
}

impl Default for BinaryProtocolFactory {
    fn default() -> Self {
        Self::new(false, DEFAULT_MAX_LENGTH)
    }
}

impl ProtocolFactory for BinaryProtocolFactory {
    fn get_protocol(&self, transport: Box<dyn Transport>) -> Box<dyn Protocol> {
        Box::new(BinaryProtocol::new(
            transport,
            self.strict_read,
            self.max_length,
        ))
    }
}
