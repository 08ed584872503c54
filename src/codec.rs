use std::io::{self, Read, Write};

use byteorder::{LittleEndian, WriteBytesExt};
use serde::{Serialize, Serializer};
use thiserror::Error;

// protobuf 风格的字段 tag（字段号 << 3 | 线路类型）
const TAG_VALUE_PACKED: u8 = 0x0a;
const TAG_LABEL: u8 = 0x10;
const TAG_ID: u8 = 0x1a;
const TAG_PAYLOAD: u8 = 0x22;

/// 单条记录消息体的大小上限，与下游解码器的 4M 读缓冲一致
pub const MAX_RECORD_SIZE: u64 = 4 * 1024 * 1024;

/// 解码记录流时可能出现的错误
#[derive(Debug, Error)]
pub enum DecodeError {
    /// 数据流在一条记录中间结束
    #[error("记录被截断: 期望 {expected} 字节, 只剩 {actual} 字节")]
    Truncated { expected: usize, actual: usize },
    /// 长度前缀超出单条记录的大小上限，通常意味着数据已损坏
    #[error("记录长度超出上限: {0} 字节")]
    Oversized(u64),
    #[error("无法识别的线路类型: {0}")]
    InvalidWireType(u8),
    #[error("varint 编码超出 64 位范围")]
    MalformedVarint,
    #[error("打包的 float 字段长度不是 4 的倍数: {0}")]
    BadPackedLength(usize),
    #[error("id 字段不是有效的 UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 一条特征记录，对应输出文件中的一个长度前缀条目
///
/// 线路格式为 8 字节小端长度前缀 + protobuf 编码的消息体，
/// 下游的记录解码器按同样的格式消费
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeatureRecord {
    /// 特征向量，长度由模型决定
    pub values: Vec<f32>,
    /// 类别标签，未知时可以是占位值
    pub label: i64,
    /// 记录 ID，取自来源文件的文件名
    pub id: String,
    /// 来源元数据，编解码时按原样透传
    #[serde(serialize_with = "serialize_payload")]
    pub payload: Vec<u8>,
}

fn serialize_payload<S: Serializer>(payload: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&String::from_utf8_lossy(payload))
}

impl FeatureRecord {
    /// 编码为带长度前缀的完整字节序列
    pub fn encode(&self) -> Vec<u8> {
        let body = self.encode_body();
        let mut out = Vec::with_capacity(body.len() + 8);
        out.extend_from_slice(&(body.len() as u64).to_le_bytes());
        out.extend(body);
        out
    }

    /// 把一条记录写入输出流，不负责 flush
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        let body = self.encode_body();
        writer.write_u64::<LittleEndian>(body.len() as u64)?;
        writer.write_all(&body)
    }

    /// 从输入流中读取下一条记录
    ///
    /// 流在记录边界处干净结束时返回 None；在长度前缀或消息体中间
    /// 结束则视为截断错误，不会返回残缺的记录
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<Self>, DecodeError> {
        let mut prefix = [0u8; 8];
        match read_fully(reader, &mut prefix)? {
            0 => return Ok(None),
            8 => {}
            n => return Err(DecodeError::Truncated { expected: 8, actual: n }),
        }

        // 长度前缀来自外部输入，先检查上限再分配缓冲区
        let len = u64::from_le_bytes(prefix);
        if len > MAX_RECORD_SIZE {
            return Err(DecodeError::Oversized(len));
        }
        let len = len as usize;
        let mut body = vec![0u8; len];
        let n = read_fully(reader, &mut body)?;
        if n < len {
            return Err(DecodeError::Truncated { expected: len, actual: n });
        }
        Ok(Some(Self::decode_body(&body)?))
    }

    fn encode_body(&self) -> Vec<u8> {
        let mut body =
            Vec::with_capacity(self.values.len() * 4 + self.id.len() + self.payload.len() + 24);
        // 空向量也显式写出零长度的打包字段
        body.push(TAG_VALUE_PACKED);
        write_varint(&mut body, (self.values.len() * 4) as u64);
        for v in &self.values {
            body.extend_from_slice(&v.to_le_bytes());
        }
        body.push(TAG_LABEL);
        write_varint(&mut body, self.label as u64);
        body.push(TAG_ID);
        write_varint(&mut body, self.id.len() as u64);
        body.extend_from_slice(self.id.as_bytes());
        body.push(TAG_PAYLOAD);
        write_varint(&mut body, self.payload.len() as u64);
        body.extend_from_slice(&self.payload);
        body
    }

    /// 解码消息体，按线路类型跳过无法识别的字段
    fn decode_body(body: &[u8]) -> Result<Self, DecodeError> {
        let mut record = FeatureRecord::default();
        let mut pos = 0;
        while pos < body.len() {
            let tag = read_varint(body, &mut pos)?;
            let field = tag >> 3;
            let wire = (tag & 0x7) as u8;
            match (field, wire) {
                (1, 2) => {
                    let bytes = read_bytes(body, &mut pos)?;
                    if bytes.len() % 4 != 0 {
                        return Err(DecodeError::BadPackedLength(bytes.len()));
                    }
                    record.values.reserve(bytes.len() / 4);
                    for chunk in bytes.chunks_exact(4) {
                        record.values.push(f32::from_le_bytes(chunk.try_into().unwrap()));
                    }
                }
                // 兼容非打包形式的 float 字段
                (1, 5) => {
                    let bytes = read_fixed(body, &mut pos, 4)?;
                    record.values.push(f32::from_le_bytes(bytes.try_into().unwrap()));
                }
                (2, 0) => record.label = read_varint(body, &mut pos)? as i64,
                (3, 2) => record.id = String::from_utf8(read_bytes(body, &mut pos)?.to_vec())?,
                (4, 2) => record.payload = read_bytes(body, &mut pos)?.to_vec(),
                (_, wire) => skip_field(body, &mut pos, wire)?,
            }
        }
        Ok(record)
    }
}

/// 读满整个缓冲区或读到 EOF，返回实际读取的字节数
fn read_fully<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..])? {
            0 => break,
            n => total += n,
        }
    }
    Ok(total)
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn read_varint(body: &[u8], pos: &mut usize) -> Result<u64, DecodeError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        if shift >= 64 {
            return Err(DecodeError::MalformedVarint);
        }
        let byte = *body
            .get(*pos)
            .ok_or(DecodeError::Truncated { expected: *pos + 1, actual: body.len() })?;
        *pos += 1;
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

fn read_bytes<'a>(body: &'a [u8], pos: &mut usize) -> Result<&'a [u8], DecodeError> {
    let len = read_varint(body, pos)? as usize;
    read_fixed(body, pos, len)
}

fn read_fixed<'a>(body: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], DecodeError> {
    if len > body.len() - *pos {
        return Err(DecodeError::Truncated { expected: len, actual: body.len() - *pos });
    }
    let bytes = &body[*pos..*pos + len];
    *pos += len;
    Ok(bytes)
}

fn skip_field(body: &[u8], pos: &mut usize, wire: u8) -> Result<(), DecodeError> {
    match wire {
        0 => read_varint(body, pos).map(|_| ()),
        1 => read_fixed(body, pos, 8).map(|_| ()),
        2 => read_bytes(body, pos).map(|_| ()),
        5 => read_fixed(body, pos, 4).map(|_| ()),
        wire => Err(DecodeError::InvalidWireType(wire)),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    fn sample_record() -> FeatureRecord {
        FeatureRecord {
            values: vec![1.0, -2.5, 3.25],
            label: 449,
            id: "n01440764_10026.JPEG".to_string(),
            payload: br#"{"img": "train/n01440764/n01440764_10026.JPEG"}"#.to_vec(),
        }
    }

    #[test]
    fn test_round_trip() {
        let record = sample_record();
        let mut buf = vec![];
        record.write_to(&mut buf).unwrap();
        assert_eq!(buf, record.encode());

        let mut cursor = Cursor::new(buf);
        let decoded = FeatureRecord::read_from(&mut cursor).unwrap().unwrap();
        assert_eq!(decoded, record);
        assert!(FeatureRecord::read_from(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn test_round_trip_empty_values() {
        let record = FeatureRecord { values: vec![], label: 0, id: "x".into(), payload: vec![] };
        let mut cursor = Cursor::new(record.encode());
        let decoded = FeatureRecord::read_from(&mut cursor).unwrap().unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_round_trip_negative_label() {
        let record = FeatureRecord { values: vec![0.5], label: -1, id: "x".into(), payload: vec![] };
        let mut cursor = Cursor::new(record.encode());
        let decoded = FeatureRecord::read_from(&mut cursor).unwrap().unwrap();
        assert_eq!(decoded.label, -1);
    }

    #[test]
    fn test_exact_wire_bytes() {
        let record =
            FeatureRecord { values: vec![1.0], label: 1, id: "a".into(), payload: b"x".to_vec() };
        #[rustfmt::skip]
        let expected_body = [
            0x0a, 0x04, 0x00, 0x00, 0x80, 0x3f, // value: [1.0]
            0x10, 0x01,                         // label: 1
            0x1a, 0x01, 0x61,                   // id: "a"
            0x22, 0x01, 0x78,                   // payload: "x"
        ];
        let mut expected = (expected_body.len() as u64).to_le_bytes().to_vec();
        expected.extend_from_slice(&expected_body);
        assert_eq!(record.encode(), expected);
    }

    #[test]
    fn test_decode_unpacked_floats() {
        // 字段 1 也可以逐个以 fixed32 形式出现
        let body = [0x0d, 0x00, 0x00, 0x80, 0x3f, 0x0d, 0x00, 0x00, 0x00, 0x40];
        let mut data = (body.len() as u64).to_le_bytes().to_vec();
        data.extend_from_slice(&body);
        let decoded = FeatureRecord::read_from(&mut Cursor::new(data)).unwrap().unwrap();
        assert_eq!(decoded.values, vec![1.0, 2.0]);
    }

    #[test]
    fn test_decode_skips_unknown_field() {
        let record = sample_record();
        let mut body = record.encode()[8..].to_vec();
        // 追加一个未知的字段 9 (varint)
        body.extend_from_slice(&[0x48, 0x2a]);
        let mut data = (body.len() as u64).to_le_bytes().to_vec();
        data.extend_from_slice(&body);
        let decoded = FeatureRecord::read_from(&mut Cursor::new(data)).unwrap().unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_truncated_prefix() {
        let err = FeatureRecord::read_from(&mut Cursor::new([0x05, 0x00, 0x00])).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }

    #[test]
    fn test_oversized_prefix() {
        // 损坏的长度前缀不应该触发超大内存分配
        let data = (1u64 << 63).to_le_bytes();
        let err = FeatureRecord::read_from(&mut Cursor::new(data)).unwrap_err();
        assert!(matches!(err, DecodeError::Oversized(len) if len == 1 << 63));

        let data = (MAX_RECORD_SIZE + 1).to_le_bytes();
        let err = FeatureRecord::read_from(&mut Cursor::new(data)).unwrap_err();
        assert!(matches!(err, DecodeError::Oversized(_)));
    }

    #[test]
    fn test_truncated_body() {
        let mut data = sample_record().encode();
        data.truncate(data.len() - 1);
        let err = FeatureRecord::read_from(&mut Cursor::new(data)).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }

    #[test]
    fn test_truncated_inside_field() {
        // 声明 8 字节消息体，但其中的 bytes 字段声称有 100 字节
        let body = [0x22, 0x64, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let mut data = (body.len() as u64).to_le_bytes().to_vec();
        data.extend_from_slice(&body);
        let err = FeatureRecord::read_from(&mut Cursor::new(data)).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated { .. }));
    }
}
