// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # HTTP 标头模型
//!
//! 该模块把原始的 `name: value` 标头行解析为强类型的 [`HeaderValue`]，
//! 并提供一个按插入顺序保存条目的 [`HttpHeaders`] 映射。核心功能：
//! 1. 按标头名分派到对应的变体解析器（未知标头一律按原始字符串处理）。
//! 2. `Accept-Encoding` 的加权列表解析与内容协商查询。
//! 3. `Authorization: Basic` 凭据的 Base64 解码。

use std::time::SystemTime;

use base64::Engine;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::exception::HttpException;

lazy_static! {
    static ref LIST_SEPARATOR: Regex = Regex::new(r"[ ]*,[ ]*").unwrap();
    static ref VALUE_SEPARATOR: Regex = Regex::new(r"[ ]*;[ ]*").unwrap();
    static ref SCHEME_SEPARATOR: Regex = Regex::new(r"[ ]+").unwrap();
}

/// 单个标头的类型化取值。
///
/// 由 [`HeaderValue::parse`] 按标头名选择变体，序列化时保证语义上可往返
/// （不要求逐字节一致）。
#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    /// 原始字符串，例如 `User-Agent`
    Raw(String),
    /// 非负整数，例如 `Content-Length`
    Numeric(u64),
    /// 逗号分隔的有序列表，例如 `Content-Encoding`
    List(Vec<String>),
    /// 带 `q=` 权重的有序列表，例如 `Accept-Encoding`
    Weighted(AcceptEncoding),
    /// `Basic` 认证凭据，例如 `Authorization`
    Credential(Credential),
}

impl HeaderValue {
    /// 按小写标头名分派到对应的变体解析器。未列出的标头一律得到 [`HeaderValue::Raw`]。
    pub fn parse(name: &str, raw: &str) -> Result<HeaderValue, HttpException> {
        match name {
            "accept-encoding" => Ok(HeaderValue::Weighted(AcceptEncoding::parse(raw)?)),
            "authorization" => Ok(HeaderValue::Credential(Credential::parse(raw)?)),
            "content-encoding" => Ok(HeaderValue::List(
                LIST_SEPARATOR.split(raw.trim()).map(str::to_string).collect(),
            )),
            "content-length" | "max-redirects" => {
                let value = raw.trim().parse::<u64>().map_err(|_| {
                    HttpException::Parse(format!("malformed numeric header: '{}'", raw))
                })?;
                Ok(HeaderValue::Numeric(value))
            }
            _ => Ok(HeaderValue::Raw(raw.to_string())),
        }
    }

    /// 序列化为响应报文中的标头值。
    pub fn serialize(&self) -> String {
        match self {
            HeaderValue::Raw(s) => s.clone(),
            HeaderValue::Numeric(n) => n.to_string(),
            HeaderValue::List(items) => items.join(", "),
            HeaderValue::Weighted(accept) => accept.serialize(),
            HeaderValue::Credential(credential) => credential.serialize(),
        }
    }
}

/// `Accept-Encoding` 的加权编码偏好列表。
///
/// 空输入或单独的 `*` 表示客户端接受任意编码，该状态与显式列表严格区分。
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptEncoding {
    any: bool,
    entries: Vec<(String, f32)>,
}

impl AcceptEncoding {
    /// 解析形如 `gzip, deflate; q=0.5` 的列表。
    ///
    /// 权重缺省为 1.0；`q=` 前缀缺失或权重无法解析为浮点数都视为协议错误；
    /// 权重为 0 的条目被丢弃。条目按权重降序排列，权重相同时保持输入顺序。
    pub fn parse(raw: &str) -> Result<Self, HttpException> {
        let trimmed = raw.trim();
        let mut entries: Vec<(String, f32)> = Vec::new();

        if !trimmed.is_empty() {
            for item in LIST_SEPARATOR.split(trimmed) {
                let mut parts = VALUE_SEPARATOR.splitn(item, 2);
                let token = parts.next().unwrap_or("").to_string();
                match parts.next() {
                    None => entries.push((token, 1.0)),
                    Some(weight_str) => {
                        let weight_str = weight_str.strip_prefix("q=").ok_or_else(|| {
                            HttpException::Parse(format!(
                                "encoding weight must start with \"q=\": '{}'",
                                item
                            ))
                        })?;
                        let weight = weight_str.parse::<f32>().map_err(|_| {
                            HttpException::Parse(format!(
                                "malformed encoding weight: '{}'",
                                weight_str
                            ))
                        })?;
                        if weight > 0.0 {
                            entries.push((token, weight));
                        }
                    }
                }
            }
        }

        // sort_by 是稳定排序，权重相同的条目保持原始顺序
        entries.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let any = trimmed.is_empty() || (entries.len() == 1 && entries[0].0 == "*");
        Ok(AcceptEncoding { any, entries })
    }

    /// 客户端最偏好的编码。
    ///
    /// 接受任意编码时返回 `*`，否则返回权重最高（并列时最先出现）的条目。
    /// 所有条目都被零权重滤除的列表没有可选项，同样回落到 `*`。
    pub fn preferred(&self) -> &str {
        match self.entries.first() {
            Some((token, _)) if !self.any => token,
            _ => "*",
        }
    }

    /// 客户端是否接受给定编码。该查询区分大小写。
    pub fn accepts(&self, encoding: &str) -> bool {
        self.any || self.entries.iter().any(|(token, _)| token == encoding)
    }

    /// 客户端是否声明接受任意编码。
    pub fn accepts_any(&self) -> bool {
        self.any
    }

    /// 从最偏好到最不偏好的编码序列。接受任意编码时只含 `*`。
    pub fn preferences(&self) -> Vec<&str> {
        if self.any {
            vec!["*"]
        } else {
            self.entries.iter().map(|(token, _)| token.as_str()).collect()
        }
    }

    fn serialize(&self) -> String {
        if self.any {
            return "*".to_string();
        }
        self.entries
            .iter()
            .map(|(token, weight)| {
                if (*weight - 1.0).abs() < f32::EPSILON {
                    token.clone()
                } else {
                    format!("{}; q={}", token, weight)
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// `Authorization` 标头携带的 Basic 凭据。
///
/// 凭据格式非法属于协议误用，映射为 400 而不是 401——后者专指身份校验失败。
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    scheme: String,
    user: String,
    secret: String,
}

impl Credential {
    /// 解析形如 `Basic dXNlcjpwYXNz` 的凭据。
    ///
    /// 仅支持 `Basic` 方案；Base64 解码失败或解码结果缺少 `:` 分隔符均视为
    /// 格式错误。
    pub fn parse(raw: &str) -> Result<Self, HttpException> {
        let mut parts = SCHEME_SEPARATOR.splitn(raw.trim(), 2);
        let scheme = parts.next().unwrap_or("");
        if scheme != "Basic" {
            return Err(HttpException::Parse(format!(
                "unsupported authorization scheme: '{}'",
                scheme
            )));
        }
        let encoded = parts.next().ok_or_else(|| {
            HttpException::Parse("authorization header is missing credentials".to_string())
        })?;

        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|_| HttpException::Parse("malformed base64 credentials".to_string()))?;
        let decoded = String::from_utf8(decoded)
            .map_err(|_| HttpException::Parse("credentials are not valid UTF-8".to_string()))?;

        let (user, secret) = decoded.split_once(':').ok_or_else(|| {
            HttpException::Parse("credentials are missing the ':' separator".to_string())
        })?;

        Ok(Credential {
            scheme: scheme.to_string(),
            user: user.to_string(),
            secret: secret.to_string(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }

    fn serialize(&self) -> String {
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(format!("{}:{}", self.user, self.secret));
        format!("{} {}", self.scheme, encoded)
    }
}

/// 以小写标头名为键、保持插入顺序的标头映射。
///
/// 请求与响应共用同一结构；响应序列化时按显式写入的顺序输出各行。
#[derive(Debug, Default)]
pub struct HttpHeaders {
    entries: Vec<(String, HeaderValue)>,
}

impl HttpHeaders {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// 解析原始值并写入映射。同名条目被替换且保留原有位置。
    pub fn set(&mut self, name: &str, raw: &str) -> Result<(), HttpException> {
        let name = name.to_lowercase();
        let value = HeaderValue::parse(&name, raw)?;
        self.insert(&name, value);
        Ok(())
    }

    /// 直接写入已构造好的取值。
    pub fn insert(&mut self, name: &str, value: HeaderValue) {
        let name = name.to_lowercase();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&HeaderValue> {
        let name = name.to_lowercase();
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// 序列化后的原始标头值。
    pub fn raw_value(&self, name: &str) -> Option<String> {
        self.get(name).map(HeaderValue::serialize)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按插入顺序遍历 `(名, 值)` 条目。
    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v))
    }

    // --- 类型化访问器 ---

    pub fn accept_encoding(&self) -> Option<&AcceptEncoding> {
        match self.get("accept-encoding") {
            Some(HeaderValue::Weighted(accept)) => Some(accept),
            _ => None,
        }
    }

    pub fn authorization(&self) -> Option<&Credential> {
        match self.get("authorization") {
            Some(HeaderValue::Credential(credential)) => Some(credential),
            _ => None,
        }
    }

    pub fn content_length(&self) -> Option<u64> {
        match self.get("content-length") {
            Some(HeaderValue::Numeric(n)) => Some(*n),
            _ => None,
        }
    }

    // --- 类型化设置器 ---

    pub fn set_content_type(&mut self, media_type: &str) {
        self.insert("content-type", HeaderValue::Raw(media_type.to_string()));
    }

    pub fn set_content_length(&mut self, length: u64) {
        self.insert("content-length", HeaderValue::Numeric(length));
    }

    pub fn set_content_encoding(&mut self, encoding: &str) {
        self.insert(
            "content-encoding",
            HeaderValue::List(vec![encoding.to_string()]),
        );
    }

    /// 按 RFC 7231 的 HTTP 日期格式写入 `Last-Modified`。
    pub fn set_last_modified(&mut self, modified: SystemTime) {
        let datetime: DateTime<Utc> = modified.into();
        let formatted = datetime.format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        self.insert("last-modified", HeaderValue::Raw(formatted));
    }

    pub fn set_location(&mut self, location: &str) {
        self.insert("location", HeaderValue::Raw(location.to_string()));
    }
}
