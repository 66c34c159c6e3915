//! 帧编解码与 ID 生成工具
//!
//! 事件通道帧为 JSON；二进制帧可选 gzip 压缩（接收端按魔数嗅探，
//! 发送端由配置决定）。

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use uuid::Uuid;

use crate::im::types::{ClientCommand, ServerEvent};

/// 压缩数据为 gzip 格式
pub fn compress_gzip(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// 解压 gzip 数据
pub fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>, std::io::Error> {
    let mut decoder = GzDecoder::new(data);
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed)?;
    Ok(decompressed)
}

/// gzip 魔数嗅探
pub fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

/// 生成客户端临时消息 ID
///
/// 带 sender 前缀便于日志排查；服务器确认后整体替换为服务器 ID。
pub fn generate_temp_id(user_id: &str) -> String {
    format!("{}-{}", user_id, Uuid::new_v4().simple())
}

/// 编码一条出站控制帧
pub fn encode_command(cmd: &ClientCommand, compression: &str) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(cmd).context("序列化控制帧失败")?;
    if compression == "gzip" {
        Ok(compress_gzip(&json).context("压缩控制帧失败")?)
    } else {
        Ok(json)
    }
}

/// 解码一条入站事件帧（自动识别 gzip 二进制帧）
pub fn decode_event(data: &[u8]) -> Result<ServerEvent> {
    let plain;
    let bytes = if is_gzip(data) {
        plain = decompress_gzip(data).context("解压事件帧失败")?;
        &plain[..]
    } else {
        data
    };
    serde_json::from_slice(bytes).with_context(|| {
        format!("解析事件帧失败: {}", String::from_utf8_lossy(bytes))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::im::types::event_name;

    #[test]
    fn gzip_roundtrip() {
        let data = br#"{"event":"typing:update","data":{}}"#;
        let compressed = compress_gzip(data).unwrap();
        assert!(is_gzip(&compressed));
        assert_eq!(decompress_gzip(&compressed).unwrap(), data);
    }

    #[test]
    fn decode_event_accepts_compressed_frame() {
        let json = br#"{
            "event": "typing:update",
            "data": {"conversationID": "c1", "userName": "Ana", "isTyping": true}
        }"#;
        let frame = compress_gzip(json).unwrap();
        let event = decode_event(&frame).unwrap();
        assert_eq!(event.name(), event_name::TYPING_UPDATE);
    }

    #[test]
    fn temp_ids_are_unique_per_call() {
        let a = generate_temp_id("u1");
        let b = generate_temp_id("u1");
        assert_ne!(a, b);
        assert!(a.starts_with("u1-"));
    }
}
