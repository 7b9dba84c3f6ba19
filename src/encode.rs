//! # 传输编码协商模块
//!
//! 根据响应体长度、媒体类型与客户端的 `Accept-Encoding` 偏好，
//! 决定使用恒等传输还是 gzip 压缩。已经压缩过的格式（归档、
//! 多数音视频与图像）不做二次压缩。

use std::io::Write;

use bytes::Bytes;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::exception::HttpException;
use crate::header::AcceptEncoding;

/// 低于该长度的响应体不值得压缩（字节）
pub const COMPRESSION_MIN_SIZE: u64 = 256;

/// 响应体的传输编码。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyEncoding {
    Identity,
    Gzip,
}

impl BodyEncoding {
    /// `Content-Encoding` 标头中使用的编码名。
    pub fn token(&self) -> &'static str {
        match self {
            BodyEncoding::Identity => "identity",
            BodyEncoding::Gzip => "gzip",
        }
    }

    /// 为给定的响应体选择传输编码。
    ///
    /// 长度不超过阈值或媒体类型已经是压缩格式时使用恒等传输；
    /// 否则在客户端未发送 `Accept-Encoding` 或明确接受 `gzip`
    /// （包括任意编码哨兵）时使用 gzip。
    pub fn negotiate(
        size: u64,
        media_type: Option<&str>,
        accept: Option<&AcceptEncoding>,
    ) -> BodyEncoding {
        if size <= COMPRESSION_MIN_SIZE {
            return BodyEncoding::Identity;
        }
        if let Some(media_type) = media_type {
            if is_precompressed(media_type) {
                return BodyEncoding::Identity;
            }
        }
        match accept {
            None => BodyEncoding::Gzip,
            Some(accept) if accept.accepts("gzip") => BodyEncoding::Gzip,
            Some(_) => BodyEncoding::Identity,
        }
    }

    /// 按选定的编码变换响应体。恒等传输原样返回。
    ///
    /// gzip 编码器在返回前完成收尾（写出尾部校验），调用方拿到的
    /// 是一个完整的压缩流。
    pub fn encode(&self, data: Bytes) -> Result<Bytes, HttpException> {
        match self {
            BodyEncoding::Identity => Ok(data),
            BodyEncoding::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder
                    .write_all(&data)
                    .map_err(|e| HttpException::server("gzip encoding failed", e))?;
                let compressed = encoder
                    .finish()
                    .map_err(|e| HttpException::server("gzip finalization failed", e))?;
                Ok(Bytes::from(compressed))
            }
        }
    }
}

/// 媒体类型是否已经是压缩格式。
///
/// 归档类后缀一律视为已压缩；BMP 与 WAV 是少数未压缩的
/// 图像/音频格式，其余的 `video/*`、`audio/*`、`image/*` 视为已压缩。
fn is_precompressed(media_type: &str) -> bool {
    for token in [
        "x-compressed",
        "x-bzip2",
        "x-gzip",
        "multipart/x-gzip",
        "x-tar",
        "x-gtar",
    ] {
        if media_type.contains(token) {
            return true;
        }
    }
    for uncompressed in ["image/bmp", "audio/wav", "audio/x-wav"] {
        if media_type == uncompressed {
            return false;
        }
    }
    media_type.starts_with("video/")
        || media_type.starts_with("audio/")
        || media_type.starts_with("image/")
}
