// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # Exception 模块
//!
//! 该模块定义了服务器在请求处理生命周期中可能抛出的各类异常情况。
//!
//! ## 设计意图
//! - **错误分类**：涵盖协议解析错误、资源查找错误、认证错误以及服务端内部故障。
//! - **语义映射**：每个变体都对应一个 HTTP 状态码，由错误响应器渲染为响应页面。
//! - **单一恢复点**：处理器统一返回 `Result<_, HttpException>`，路由层是唯一的
//!   捕获与恢复边界，下层除日志外不得吞掉错误。

use std::error::Error;
use std::fmt;

use crate::param::reason_phrase;

/// 服务器处理请求过程中发生的异常类型。
///
/// 该枚举通常作为 `Result` 的 `Err` 部分返回，用于指示处理失败的具体原因。
#[derive(Debug)]
pub enum HttpException {
    /// 客户端在报文尚未读取完整时关闭了连接。不产生任何响应。
    Eof,
    /// 请求行、请求头或凭据格式非法。在 Web 语义中对应 `400 Bad Request`。
    Parse(String),
    /// 客户端使用了服务器不支持的 HTTP 协议版本。同样对应 `400 Bad Request`。
    Version(String),
    /// 未找到所请求的路由或资源。对应 `404 Not Found`。
    NotFound(String),
    /// 内容处理器不支持该 HTTP 方法。对应 `405 Method Not Allowed`。
    MethodNotAllowed,
    /// 认证失败（用户不存在与密码错误合并为同一种结果）。对应 `401 Unauthorized`。
    Unauthorized(String),
    /// 未被归类的服务端故障，携带可选的底层原因。对应 `500 Internal Server Error`。
    Server(String, Option<Box<dyn Error + Send + Sync>>),
}

impl HttpException {
    /// 将底层错误包装为 500 级异常。
    pub fn server<E>(message: &str, cause: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        HttpException::Server(message.to_string(), Some(Box::new(cause)))
    }

    /// 该异常对应的 HTTP 状态码。`Eof` 不产生响应，按 400 兜底。
    pub fn status_code(&self) -> u16 {
        match self {
            HttpException::Eof => 400,
            HttpException::Parse(_) => 400,
            HttpException::Version(_) => 400,
            HttpException::NotFound(_) => 404,
            HttpException::MethodNotAllowed => 405,
            HttpException::Unauthorized(_) => 401,
            HttpException::Server(..) => 500,
        }
    }

    /// 面向用户的错误描述，没有附加信息时返回 `None`。
    pub fn message(&self) -> Option<&str> {
        match self {
            HttpException::Eof | HttpException::MethodNotAllowed => None,
            HttpException::Parse(m)
            | HttpException::Version(m)
            | HttpException::NotFound(m)
            | HttpException::Unauthorized(m)
            | HttpException::Server(m, _) => {
                if m.is_empty() {
                    None
                } else {
                    Some(m)
                }
            }
        }
    }

    /// 渲染底层原因，仅 500 级异常携带。用于错误页面的调试输出。
    pub fn trace(&self) -> Option<String> {
        match self {
            HttpException::Server(_, Some(cause)) => Some(format!("{:?}", cause)),
            _ => None,
        }
    }
}

impl fmt::Display for HttpException {
    /// 根据错误类型写入人类可读的描述文本。
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = self.status_code();
        match self {
            HttpException::Eof => write!(f, "Unexpected end of stream"),
            HttpException::Server(m, Some(cause)) => {
                write!(f, "{} {}: {} ({})", code, reason_phrase(code), m, cause)
            }
            _ => match self.message() {
                Some(m) => write!(f, "{} {}: {}", code, reason_phrase(code), m),
                None => write!(f, "{} {}", code, reason_phrase(code)),
            },
        }
    }
}
