// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 请求-响应交换模块
//!
//! 该模块定义了单次 HTTP 交互的可变上下文 [`HttpEvent`]：对端地址、
//! 已解析的请求、响应状态与标头，以及底层的输出流。
//!
//! ## 写入契约
//! 状态行与标头块在整个交换中最多写出一次：
//! - 状态未设置时调用 [`HttpEvent::write_headers`] 是服务端错误。
//! - 重复调用会被忽略并记录警告，`wrote_headers` 标志供错误响应器
//!   判断响应是否已经部分写出。

use log::warn;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::exception::HttpException;
use crate::header::HttpHeaders;
use crate::param::{reason_phrase, CRLF};
use crate::request::HttpRequest;

/// 连接对端的地址信息。
#[derive(Debug, Clone)]
pub struct HttpPeer {
    host: String,
    port: u16,
}

impl HttpPeer {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// 单次 HTTP 交换的可变上下文。
///
/// 每个连接恰好创建一个实例，响应写完后随连接一起销毁。
pub struct HttpEvent {
    /// 连接对端
    peer: HttpPeer,
    /// 已解析的请求
    request: HttpRequest,
    /// 响应状态码，写出标头之前必须设置
    status: Option<u16>,
    /// 响应标头，按插入顺序写出
    headers: HttpHeaders,
    /// 底层输出流
    stream: Box<dyn AsyncWrite + Send + Unpin>,
    /// 状态行与标头块是否已经写出
    wrote_headers: bool,
}

impl HttpEvent {
    pub fn new(
        peer: HttpPeer,
        request: HttpRequest,
        stream: Box<dyn AsyncWrite + Send + Unpin>,
    ) -> Self {
        Self {
            peer,
            request,
            status: None,
            headers: HttpHeaders::new(),
            stream,
            wrote_headers: false,
        }
    }

    pub fn peer(&self) -> &HttpPeer {
        &self.peer
    }

    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut HttpRequest {
        &mut self.request
    }

    /// 设置响应状态码。
    pub fn set_status(&mut self, status: u16) {
        self.status = Some(status);
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    /// 获取响应标头
    pub fn headers(&self) -> &HttpHeaders {
        &self.headers
    }

    /// 获取可变的响应标头
    pub fn headers_mut(&mut self) -> &mut HttpHeaders {
        &mut self.headers
    }

    /// 状态行与标头块是否已经写出。
    pub fn has_written_headers(&self) -> bool {
        self.wrote_headers
    }

    /// 写出状态行与标头块。
    ///
    /// 状态未设置时返回 500 级异常；重复调用被忽略并记录警告，
    /// 以免破坏已经写出的报文。
    pub async fn write_headers(&mut self) -> Result<(), HttpException> {
        if self.wrote_headers {
            warn!(
                "[{}:{}] response headers were already written, ignoring",
                self.peer.host, self.peer.port
            );
            return Ok(());
        }
        let status = self.status.ok_or_else(|| {
            HttpException::Server(
                "attempted to write headers before setting a status".to_string(),
                None,
            )
        })?;

        let mut message = format!("HTTP/1.1 {} {}{}", status, reason_phrase(status), CRLF);
        for (name, value) in self.headers.iter() {
            message.push_str(name);
            message.push_str(": ");
            message.push_str(&value.serialize());
            message.push_str(CRLF);
        }
        message.push_str(CRLF);

        self.stream
            .write_all(message.as_bytes())
            .await
            .map_err(|e| HttpException::server("failed to write response headers", e))?;
        self.wrote_headers = true;
        Ok(())
    }

    /// 向输出流写入一段响应体。必须在标头写出之后调用。
    pub async fn write_body(&mut self, data: &[u8]) -> Result<(), HttpException> {
        self.stream
            .write_all(data)
            .await
            .map_err(|e| HttpException::server("failed to write response body", e))
    }

    /// 冲刷输出流，确保报文完整送达对端。
    pub async fn flush(&mut self) -> Result<(), HttpException> {
        self.stream
            .flush()
            .await
            .map_err(|e| HttpException::server("failed to flush response stream", e))
    }
}
