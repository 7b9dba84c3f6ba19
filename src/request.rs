// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 请求处理模块
//!
//! 该模块是服务器的核心组件之一，负责把 TLS 流上的原始字节
//! 解析为强类型的 [`HttpRequest`] 结构体。它涵盖了：
//! 1. 逐字节的行读取（同时识别 `\n` 与 `\r\n`，拒绝孤立的 `\r`）。
//! 2. 请求行（Request-Line）的解析（方法、目标、版本）。
//! 3. 标头块的逐行解析，直到空行结束。
//!
//! 标头块之后的剩余字节不做进一步解析，作为请求体流保留在
//! [`HttpRequest`] 中供处理器按需读取。

use tokio::io::{AsyncRead, AsyncReadExt, BufReader};

use crate::exception::HttpException;
use crate::header::HttpHeaders;
use crate::param::{HttpRequestMethod, HttpVersion};

/// 表示一个完整的 HTTP 请求。
///
/// 由 [`read_request`] 在每个连接上恰好构建一次，元数据部分在
/// 构建之后只读。
pub struct HttpRequest {
    /// HTTP 协议版本
    version: HttpVersion,
    /// HTTP 请求方法（GET, POST 等）
    method: HttpRequestMethod,
    /// 请求目标（包含查询字符串）
    target: String,
    /// 已解析的请求标头
    headers: HttpHeaders,
    /// 标头块之后的剩余连接字节
    body: Box<dyn AsyncRead + Send + Unpin>,
}

/// 从字节流中读取并解析一个 HTTP 请求。
///
/// # 逻辑步骤
/// 1. 跳过请求行之前的空行（容忍客户端多余的换行）。
/// 2. 解析请求行：提取方法、目标和协议版本，仅接受 `HTTP/1.0` 与 `HTTP/1.1`。
/// 3. 逐行解析标头，直到空行终止标头块。
/// 4. 把缓冲读取器的剩余部分封装为请求体流。
///
/// # 错误处理
/// 对端在请求行之前关闭连接时返回 [`HttpException::Eof`]（调用方静默关闭，
/// 不产生响应）；格式非法返回 `Parse`；版本不受支持返回 `Version`。
pub async fn read_request<R>(reader: R) -> Result<HttpRequest, HttpException>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    let mut reader = BufReader::new(reader);

    // 1. 跳过前导空行，定位请求行
    let mut request_line = read_line(&mut reader).await?;
    while request_line.is_empty() {
        request_line = read_line(&mut reader).await?;
    }

    // 2. 解析请求行 (e.g., "GET /index.html HTTP/1.1")
    let parts: Vec<&str> = request_line.split(' ').filter(|p| !p.is_empty()).collect();
    if parts.len() < 3 {
        return Err(HttpException::Parse(format!(
            "malformed request line: '{}'",
            request_line
        )));
    }

    let method = HttpRequestMethod::parse(parts[0])?;

    // 目标中可能包含未编码的空格，尝试通过 join 恢复
    let target = if parts.len() == 3 {
        parts[1].to_string()
    } else {
        parts[1..parts.len() - 1].join(" ")
    };

    let version_token = parts[parts.len() - 1];
    let version_number = version_token.strip_prefix("HTTP/").ok_or_else(|| {
        HttpException::Version(format!("malformed version token: '{}'", version_token))
    })?;
    let version = match version_number {
        "1.0" => HttpVersion::V1_0,
        "1.1" => HttpVersion::V1_1,
        _ => {
            return Err(HttpException::Version(format!(
                "unsupported protocol version: '{}'",
                version_number
            )))
        }
    };

    // 3. 逐行解析标头块
    let mut headers = HttpHeaders::new();
    loop {
        let line = read_line(&mut reader).await?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':').ok_or_else(|| {
            HttpException::Parse(format!("malformed header line: '{}'", line))
        })?;
        headers.set(name.trim(), value.trim())?;
    }

    Ok(HttpRequest {
        version,
        method,
        target,
        headers,
        body: Box::new(reader),
    })
}

/// 读取一行文本，行终止符可以是 `\n` 或 `\r\n`，两者都不计入返回值。
///
/// 孤立的 `\r`（其后不是 `\n`）视为格式错误；流在行读完之前结束
/// 返回 [`HttpException::Eof`]。
async fn read_line<R>(reader: &mut R) -> Result<String, HttpException>
where
    R: AsyncRead + Unpin,
{
    let mut buffer: Vec<u8> = Vec::new();
    loop {
        let byte = match reader.read_u8().await {
            Ok(byte) => byte,
            Err(_) => return Err(HttpException::Eof),
        };
        match byte {
            b'\n' => break,
            b'\r' => {
                match reader.read_u8().await {
                    Ok(b'\n') => break,
                    Ok(other) => {
                        return Err(HttpException::Parse(format!(
                            "stray carriage return before byte 0x{:02x}",
                            other
                        )))
                    }
                    Err(_) => return Err(HttpException::Eof),
                }
            }
            other => buffer.push(other),
        }
    }
    String::from_utf8(buffer)
        .map_err(|_| HttpException::Parse("header line is not valid UTF-8".to_string()))
}

impl HttpRequest {
    /// 获取 HTTP 协议版本
    pub fn version(&self) -> HttpVersion {
        self.version
    }

    /// 获取请求方法
    pub fn method(&self) -> HttpRequestMethod {
        self.method
    }

    /// 获取请求目标（含查询参数）
    pub fn target(&self) -> &str {
        &self.target
    }

    /// 获取不含查询参数的请求路径
    pub fn path(&self) -> &str {
        match self.target.split_once('?') {
            Some((path, _)) => path,
            None => &self.target,
        }
    }

    /// 获取查询字符串（`?` 之后的部分）
    pub fn query(&self) -> Option<&str> {
        self.target.split_once('?').map(|(_, query)| query)
    }

    /// 获取请求标头
    pub fn headers(&self) -> &HttpHeaders {
        &self.headers
    }

    /// 获取请求体流（标头块之后的剩余连接字节）
    pub fn body(&mut self) -> &mut (dyn AsyncRead + Send + Unpin) {
        &mut *self.body
    }
}
