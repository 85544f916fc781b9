//! Record batch framing shared by Fetch and Produce.
//!
//! ### Protocol Def
//! ```text
//! RecordBatch =>
//!   base_offset => INT64
//!   batch_length => INT32
//!   partition_leader_epoch => INT32
//!   magic => INT8 (current magic value is 2)
//!   crc => UINT32
//!   attributes => INT16
//!     bit 0~2:
//!         0: no compression
//!         1: gzip
//!         2: snappy
//!         3: lz4
//!         4: zstd
//!     bit 3: timestampType
//!     bit 4: isTransactional (0 means not transactional)
//!     bit 5: isControlBatch (0 means not a control batch)
//!     bit 6~15: unused
//!   last_offset_delta => INT32
//!   first_timestamp => INT64
//!   max_timestamp => INT64
//!   producer_id => INT64
//!   producer_epoch => INT16
//!   base_sequence => INT32
//!   records => [Record]
//!
//! Record =>
//!   length => VARINT
//!   attributes => INT8
//!   timestamp_delta => VARLONG
//!   offset_delta => VARINT
//!   key_length => VARINT
//!   key => BYTES
//!   value_length => VARINT
//!   value => BYTES
//!   headers => [Header]
//!
//! Header =>
//!   header_key_length => VARINT
//!   header_key => STRING
//!   header_value_length => VARINT
//!   value => BYTES
//! ```
//!
//! The CRC covers the data from the attributes to the end of the batch.

use bytes::{BufMut, Bytes};
use nom::{
    number::streaming::{be_i16, be_i32, be_i64, be_i8, be_u32},
    IResult,
};
use nombytes::NomBytes;

use crate::{
    encode::{varint_size, varlong_size, ToByte, Varint, VarintBytes, Varlong},
    error::Result,
    parser,
};

pub const RECORD_BATCH_MAGIC: i8 = 2;
/// Encoded size of [`RecordBatchHeader`].
pub const RECORD_BATCH_HEADER_SIZE: usize = 61;
/// Bytes up to and including `batch_length`, which are not counted by it.
pub const FIELD_LIMIT_RECORD_BATCH_LENGTH: usize = 12;
pub const FIELD_OFFSET_CRC: usize = 17;
pub const FIELD_OFFSET_ATTRIBUTES: usize = 21;

pub const ATTRIBUTES_COMPRESSION_MASK: i16 = 0x07;
pub const ATTRIBUTES_NO_TIMESTAMP: i16 = 0x08;
pub const ATTRIBUTES_TRANSACTIONAL: i16 = 0x10;
pub const ATTRIBUTES_CONTROL: i16 = 0x20;

pub const CONTROL_TYPE_ABORT: i16 = 0;
pub const CONTROL_TYPE_COMMIT: i16 = 1;

/// Worst case size of a varint length prefix.
pub const RECORD_LENGTH_MAX: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RecordBatchHeader {
    pub base_offset: i64,
    pub length: i32,
    pub partition_leader_epoch: i32,
    pub magic: i8,
    pub crc: u32,
    pub attributes: i16,
    pub last_offset_delta: i32,
    pub first_timestamp: i64,
    pub max_timestamp: i64,
    pub producer_id: i64,
    pub producer_epoch: i16,
    pub base_sequence: i32,
    pub record_count: i32,
}

impl RecordBatchHeader {
    pub fn is_compressed(&self) -> bool {
        self.attributes & ATTRIBUTES_COMPRESSION_MASK != 0
    }

    pub fn is_transactional(&self) -> bool {
        self.attributes & ATTRIBUTES_TRANSACTIONAL != 0
    }

    pub fn is_control(&self) -> bool {
        self.attributes & ATTRIBUTES_CONTROL != 0
    }

    /// Offset of the last record in the batch.
    pub fn last_offset(&self) -> i64 {
        self.base_offset + self.last_offset_delta as i64
    }

    /// Bytes of records following this header.
    pub fn records_length(&self) -> i32 {
        self.length - (RECORD_BATCH_HEADER_SIZE - FIELD_LIMIT_RECORD_BATCH_LENGTH) as i32
    }
}

impl ToByte for RecordBatchHeader {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        self.base_offset.encode(buffer)?;
        self.length.encode(buffer)?;
        self.partition_leader_epoch.encode(buffer)?;
        self.magic.encode(buffer)?;
        buffer.put_u32(self.crc);
        self.attributes.encode(buffer)?;
        self.last_offset_delta.encode(buffer)?;
        self.first_timestamp.encode(buffer)?;
        self.max_timestamp.encode(buffer)?;
        self.producer_id.encode(buffer)?;
        self.producer_epoch.encode(buffer)?;
        self.base_sequence.encode(buffer)?;
        self.record_count.encode(buffer)?;
        Ok(())
    }
}

pub fn parse_record_batch_header(s: NomBytes) -> IResult<NomBytes, RecordBatchHeader> {
    let (s, base_offset) = be_i64(s)?;
    let (s, length) = be_i32(s)?;
    let (s, partition_leader_epoch) = be_i32(s)?;
    let (s, magic) = be_i8(s)?;
    let (s, crc) = be_u32(s)?;
    let (s, attributes) = be_i16(s)?;
    let (s, last_offset_delta) = be_i32(s)?;
    let (s, first_timestamp) = be_i64(s)?;
    let (s, max_timestamp) = be_i64(s)?;
    let (s, producer_id) = be_i64(s)?;
    let (s, producer_epoch) = be_i16(s)?;
    let (s, base_sequence) = be_i32(s)?;
    let (s, record_count) = be_i32(s)?;

    Ok((
        s,
        RecordBatchHeader {
            base_offset,
            length,
            partition_leader_epoch,
            magic,
            crc,
            attributes,
            last_offset_delta,
            first_timestamp,
            max_timestamp,
            producer_id,
            producer_epoch,
            base_sequence,
            record_count,
        },
    ))
}

/// Everything in a record ahead of the value bytes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordHeader {
    /// Bytes following the length prefix.
    pub length: i32,
    pub attributes: i8,
    pub timestamp_delta: i64,
    pub offset_delta: i32,
    pub key: Option<Bytes>,
    /// `-1` for a null value.
    pub value_length: i32,
}

impl ToByte for RecordHeader {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        Varint(self.length).encode(buffer)?;
        self.attributes.encode(buffer)?;
        Varlong(self.timestamp_delta).encode(buffer)?;
        Varint(self.offset_delta).encode(buffer)?;
        VarintBytes(self.key.as_deref()).encode(buffer)?;
        Varint(self.value_length).encode(buffer)?;
        Ok(())
    }
}

impl RecordHeader {
    /// Size of everything after the length prefix up to the value.
    pub fn sizeof_body(&self) -> usize {
        let key_size = match &self.key {
            Some(key) => varint_size(key.len() as i32) + key.len(),
            None => varint_size(-1),
        };
        1 + varlong_size(self.timestamp_delta)
            + varint_size(self.offset_delta)
            + key_size
            + varint_size(self.value_length)
    }
}

/// Just the varint `length` at the head of a record.
pub fn parse_record_length(s: NomBytes) -> IResult<NomBytes, i32> {
    parser::parse_varint(s)
}

pub fn parse_record_header(s: NomBytes) -> IResult<NomBytes, RecordHeader> {
    let (s, length) = parser::parse_varint(s)?;
    let (s, attributes) = be_i8(s)?;
    let (s, timestamp_delta) = parser::parse_varlong(s)?;
    let (s, offset_delta) = parser::parse_varint(s)?;
    let (s, key) = parser::parse_varint_bytes(s)?;
    let (s, value_length) = parser::parse_varint(s)?;

    Ok((
        s,
        RecordHeader {
            length,
            attributes,
            timestamp_delta,
            offset_delta,
            key,
            value_length,
        },
    ))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct MessageHeader {
    pub key: Bytes,
    pub value: Option<Bytes>,
}

impl ToByte for MessageHeader {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        VarintBytes(Some(&self.key[..])).encode(buffer)?;
        VarintBytes(self.value.as_deref()).encode(buffer)?;
        Ok(())
    }
}

pub fn parse_message_header(s: NomBytes) -> IResult<NomBytes, MessageHeader> {
    let (s, key) = parser::parse_varint_bytes(s)?;
    let (s, value) = parser::parse_varint_bytes(s)?;
    Ok((
        s,
        MessageHeader {
            key: key.unwrap_or_default(),
            value,
        },
    ))
}

/// The headers that follow a record value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordTrailer {
    pub headers: Vec<MessageHeader>,
}

impl ToByte for RecordTrailer {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        Varint(self.headers.len() as i32).encode(buffer)?;
        for header in &self.headers {
            header.encode(buffer)?;
        }
        Ok(())
    }
}

pub fn parse_record_trailer(s: NomBytes) -> IResult<NomBytes, RecordTrailer> {
    let (s, count) = parser::parse_varint(s)?;
    let (s, headers) =
        nom::multi::count(parse_message_header, count.max(0) as usize)(s)?;
    Ok((s, RecordTrailer { headers }))
}

/// Key of a control record, its value is ignored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlRecordKey {
    pub version: i16,
    pub control_type: i16,
}

pub fn parse_control_record_key(s: NomBytes) -> IResult<NomBytes, ControlRecordKey> {
    let (s, version) = be_i16(s)?;
    let (s, control_type) = be_i16(s)?;
    Ok((
        s,
        ControlRecordKey {
            version,
            control_type,
        },
    ))
}

#[cfg(test)]
mod test {
    use bytes::BytesMut;

    use super::*;
    use crate::{parser::try_wrap, utils::to_crc32c};

    #[test]
    fn encode() {
        let header = RecordHeader {
            length: 17,
            attributes: 0,
            timestamp_delta: 0,
            offset_delta: 1,
            key: Some(Bytes::from_static(b"key")),
            value_length: 5,
        };
        let trailer = RecordTrailer {
            headers: vec![MessageHeader {
                key: Bytes::from_static(b"h"),
                value: None,
            }],
        };

        let mut buffer = vec![];
        header.encode(&mut buffer).unwrap();
        buffer.extend_from_slice(b"value");
        trailer.encode(&mut buffer).unwrap();

        assert_eq!(
            buffer,
            [
                34, 0, 0, 2, 6, b'k', b'e', b'y', 10, b'v', b'a', b'l', b'u', b'e', 2, 2, b'h', 1
            ]
        );
        assert_eq!(header.sizeof_body(), 8);
    }

    #[test]
    fn parse() {
        let b = Bytes::from_static(&[
            34, 0, 0, 2, 6, b'k', b'e', b'y', 10, b'v', b'a', b'l', b'u', b'e', 2, 2, b'h', 1,
        ]);

        let (header, sizeof) = try_wrap(parse_record_header, &b, 0, b.len())
            .unwrap()
            .unwrap();
        assert_eq!(sizeof, 9);
        assert_eq!(header.length, 17);
        assert_eq!(header.key, Some(Bytes::from_static(b"key")));
        assert_eq!(header.value_length, 5);

        let (trailer, _) = try_wrap(parse_record_trailer, &b, 14, b.len())
            .unwrap()
            .unwrap();
        assert_eq!(trailer.headers[0].key, Bytes::from_static(b"h"));
        assert_eq!(trailer.headers[0].value, None);
    }

    #[test]
    fn batch_header_crc_covers_attributes_onwards() {
        let mut header = RecordBatchHeader {
            base_offset: 100,
            length: 49,
            partition_leader_epoch: -1,
            magic: RECORD_BATCH_MAGIC,
            crc: 0,
            attributes: ATTRIBUTES_TRANSACTIONAL,
            last_offset_delta: 2,
            first_timestamp: 1,
            max_timestamp: 3,
            producer_id: 7,
            producer_epoch: 0,
            base_sequence: -1,
            record_count: 3,
        };
        let mut buffer = BytesMut::new();
        header.encode(&mut buffer).unwrap();
        assert_eq!(buffer.len(), RECORD_BATCH_HEADER_SIZE);

        header.crc = to_crc32c(&buffer[FIELD_OFFSET_ATTRIBUTES..]);
        let mut encoded = BytesMut::new();
        header.encode(&mut encoded).unwrap();

        let (parsed, _) = try_wrap(
            parse_record_batch_header,
            &encoded.freeze(),
            0,
            RECORD_BATCH_HEADER_SIZE,
        )
        .unwrap()
        .unwrap();
        assert_eq!(parsed, header);
        assert_eq!(parsed.last_offset(), 102);
        assert_eq!(parsed.records_length(), 0);
        assert!(parsed.is_transactional());
        assert!(!parsed.is_control());
    }
}
