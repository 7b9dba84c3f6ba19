// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 路由与请求处理模块
//!
//! 该模块把服务器的共享状态（配置、资源缓存、凭据校验器、路由表）
//! 组合成 [`HttpServer`]，并实现三条处理路径：
//! 1. **内容路径**：GET/HEAD 的静态与预处理资源服务。HTML 走两遍
//!    预处理流水线——常量遍的输出直写缓存，请求遍注入每请求变量。
//! 2. **登录路径**：`/login` 上的 Basic 认证，成功后重定向到首页。
//! 3. **错误路径**：任何处理失败统一转给错误响应器，渲染主题错误页
//!    或纯文本回退。
//!
//! 路由表按序匹配，方法相同且路径前缀命中的第一个处理器获胜，
//! 都不命中时回退到内容路径。每个请求恰好运行一个处理器。

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use log::{debug, error, info, warn};

use crate::cache::ResourceCache;
use crate::config::Config;
use crate::encode::BodyEncoding;
use crate::event::HttpEvent;
use crate::exception::HttpException;
use crate::header::HeaderValue;
use crate::param::{reason_phrase, HttpRequestMethod, CRLF, SERVER_NAME};
use crate::preprocess::{PreProcessSource, PreProcessor};
use crate::request::HttpRequest;
use crate::resource::{Locator, ResourceStore};
use crate::security::CredentialVerifier;

/// markdown 渲染能力。`embed` 指令声明 markdown 类型时调用。
pub trait MarkdownRenderer: Send + Sync {
    fn render(&self, source: &str) -> String;
}

/// 默认的 markdown 渲染：转义后包在预格式化块里。
pub struct PreformattedMarkdown;

impl MarkdownRenderer for PreformattedMarkdown {
    fn render(&self, source: &str) -> String {
        format!("<pre class=\"markdown\">{}</pre>", escape_html(source))
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// 路由谓词：方法相同且请求路径以基准路径开头即命中。
#[derive(Debug, Clone)]
pub struct RequestMatcher {
    method: HttpRequestMethod,
    base_uri: String,
}

impl RequestMatcher {
    pub fn new(method: HttpRequestMethod, base_uri: &str) -> Self {
        Self {
            method,
            base_uri: base_uri.to_string(),
        }
    }

    pub fn matches(&self, request: &HttpRequest) -> bool {
        request.method() == self.method && request.path().starts_with(&self.base_uri)
    }
}

/// 具名处理器。内容路径是路由表之外的回退，不在此枚举中。
#[derive(Debug, Clone, Copy)]
enum Handler {
    Login,
}

/// 服务器实例：进程级共享状态的显式持有者。
pub struct HttpServer {
    config: Arc<Config>,
    cache: Arc<ResourceCache>,
    store: ResourceStore,
    verifier: Box<dyn CredentialVerifier>,
    markdown: Box<dyn MarkdownRenderer>,
    routes: Vec<(RequestMatcher, Handler)>,
}

impl HttpServer {
    pub fn new(config: Config, verifier: Box<dyn CredentialVerifier>) -> Self {
        let store = ResourceStore::new(
            config.asset_root().into(),
            config.www_root().into(),
        );
        let routes = vec![(
            RequestMatcher::new(HttpRequestMethod::Get, "/login"),
            Handler::Login,
        )];
        Self {
            config: Arc::new(config),
            cache: Arc::new(ResourceCache::new()),
            store,
            verifier,
            markdown: Box::new(PreformattedMarkdown),
            routes,
        }
    }

    /// 替换 markdown 渲染实现。
    pub fn with_markdown(mut self, markdown: Box<dyn MarkdownRenderer>) -> Self {
        self.markdown = markdown;
        self
    }

    pub fn cache(&self) -> &Arc<ResourceCache> {
        &self.cache
    }

    /// 处理一次完整的请求-响应交换。
    ///
    /// 处理失败转给错误响应器；错误响应器自身的失败只记录日志，
    /// 连接随后直接关闭。
    pub async fn handle_event(&self, id: u128, event: &mut HttpEvent) {
        let start_time = Instant::now();

        if let Err(e) = self.dispatch(event).await {
            warn!("[ID{}]请求处理失败: {}", id, e);
            if let Err(write_error) = self.respond_error(event, &e).await {
                error!("[ID{}]错误响应写出失败: {}", id, write_error);
            }
        }
        if let Err(e) = event.flush().await {
            debug!("[ID{}]响应冲刷失败: {}", id, e);
        }

        info!(
            "[ID{}] {}:{}, {}, {}, {}, {}ms",
            id,
            event.peer().host(),
            event.peer().port(),
            event.request().method(),
            event.request().path(),
            event.status().unwrap_or(0),
            start_time.elapsed().as_millis(),
        );
    }

    /// 路由分发：第一个命中的谓词获胜，否则回退到内容路径。
    async fn dispatch(&self, event: &mut HttpEvent) -> Result<(), HttpException> {
        let handler = self
            .routes
            .iter()
            .find(|(matcher, _)| matcher.matches(event.request()))
            .map(|(_, handler)| *handler);

        match handler {
            Some(Handler::Login) => self.handle_login(event).await,
            None => self.handle_root(event).await,
        }
    }

    /// 内容路径：静态与预处理资源服务，仅接受 GET 与 HEAD。
    async fn handle_root(&self, event: &mut HttpEvent) -> Result<(), HttpException> {
        let method = event.request().method();
        if method != HttpRequestMethod::Get && method != HttpRequestMethod::Head {
            return Err(HttpException::MethodNotAllowed);
        }

        let locator = self.store.resolve(event.request().path()).ok_or_else(|| {
            HttpException::NotFound(self.config.not_found_message().to_string())
        })?;
        let attributes = self.cache.get_attributes(&locator)?;

        if attributes.media_type.as_deref() == Some("text/html") {
            self.serve_html(event, &locator).await
        } else {
            self.serve_raw(event, &locator).await
        }
    }

    /// HTML 两遍预处理流水线。
    ///
    /// 后备文件变化（或常量遍输出尚未缓存）时重跑常量遍并直写缓存，
    /// 之后每个请求只在缓存的中间结果上执行请求遍。
    async fn serve_html(
        &self,
        event: &mut HttpEvent,
        locator: &Locator,
    ) -> Result<(), HttpException> {
        let changed = self.cache.update_attributes(locator)?;
        if changed || !self.cache.has_bytes(locator) {
            debug!("constant pass: {:?}", locator.path());
            let raw = self.cache.get_text_blocking(locator)?;
            let mut constant_pass = PreProcessor::new(self).constant_mode(true);
            let intermediate = constant_pass.process(&raw)?;
            let attributes = self.cache.get_attributes(locator)?;
            self.cache.store(
                locator,
                attributes.media_type,
                attributes.modified,
                Bytes::from(intermediate),
            );
        }

        let template = self.cache.get_text(locator).await?;
        let attributes = self.cache.get_attributes(locator)?;

        let mut request_pass = PreProcessor::new(self);
        request_pass.define("server.port", &self.config.port().to_string());
        request_pass.define("user.ip", event.peer().host());
        request_pass.define("user.port", &event.peer().port().to_string());
        if let Some(credential) = event.request().headers().authorization() {
            request_pass.define("user.name", credential.user());
        }
        let body = request_pass.process(&template)?;

        self.send_body(
            event,
            200,
            Some("text/html".to_string()),
            Some(attributes.modified),
            Bytes::from(body),
        )
        .await
    }

    /// 非 HTML 资源：恒等传输时逐块流式写出，压缩传输时整体编码。
    async fn serve_raw(
        &self,
        event: &mut HttpEvent,
        locator: &Locator,
    ) -> Result<(), HttpException> {
        let attributes = self.cache.get_attributes(locator)?;
        let encoding = BodyEncoding::negotiate(
            attributes.size,
            attributes.media_type.as_deref(),
            event.request().headers().accept_encoding(),
        );

        if encoding == BodyEncoding::Gzip {
            let bytes = self.cache.get_all_bytes(locator).await?;
            return self
                .send_body(
                    event,
                    200,
                    attributes.media_type.clone(),
                    Some(attributes.modified),
                    bytes,
                )
                .await;
        }

        event.set_status(200);
        event
            .headers_mut()
            .insert("server", HeaderValue::Raw(SERVER_NAME.to_string()));
        if let Some(media_type) = &attributes.media_type {
            event.headers_mut().set_content_type(media_type);
        }
        event.headers_mut().set_content_length(attributes.size);
        event.headers_mut().set_last_modified(attributes.modified);
        event.write_headers().await?;

        if event.request().method() != HttpRequestMethod::Head {
            let mut stream = self.cache.open_stream(locator).await?;
            while let Some(block) = stream.next_block().await {
                event.write_body(&block).await?;
            }
        }
        Ok(())
    }

    /// 协商编码并一次性写出完整响应。`Content-Length` 是编码后的长度。
    async fn send_body(
        &self,
        event: &mut HttpEvent,
        status: u16,
        media_type: Option<String>,
        modified: Option<std::time::SystemTime>,
        body: Bytes,
    ) -> Result<(), HttpException> {
        let encoding = BodyEncoding::negotiate(
            body.len() as u64,
            media_type.as_deref(),
            event.request().headers().accept_encoding(),
        );
        let encoded = encoding.encode(body)?;

        event.set_status(status);
        event
            .headers_mut()
            .insert("server", HeaderValue::Raw(SERVER_NAME.to_string()));
        if let Some(media_type) = &media_type {
            event.headers_mut().set_content_type(media_type);
        }
        if encoding == BodyEncoding::Gzip {
            event.headers_mut().set_content_encoding(encoding.token());
        }
        event.headers_mut().set_content_length(encoded.len() as u64);
        if let Some(modified) = modified {
            event.headers_mut().set_last_modified(modified);
        }
        event.write_headers().await?;

        if event.request().method() != HttpRequestMethod::Head {
            event.write_body(&encoded).await?;
        }
        Ok(())
    }

    /// 登录路径：校验 Basic 凭据，成功后重定向到首页。
    ///
    /// 凭据缺失、用户不存在与口令错误统一映射为同一个 401，
    /// 不向客户端泄露差异。
    async fn handle_login(&self, event: &mut HttpEvent) -> Result<(), HttpException> {
        let credential = event
            .request()
            .headers()
            .authorization()
            .cloned()
            .ok_or_else(|| {
                HttpException::Unauthorized("Wrong username or password".to_string())
            })?;

        if !self
            .verifier
            .verify(&credential.user().to_lowercase(), credential.secret())
        {
            return Err(HttpException::Unauthorized(
                "Wrong username or password".to_string(),
            ));
        }

        event.set_status(301);
        event
            .headers_mut()
            .insert("server", HeaderValue::Raw(SERVER_NAME.to_string()));
        event.headers_mut().set_location("/");
        event.headers_mut().set_content_length(0);
        event.write_headers().await
    }

    /// 错误响应器：渲染主题错误页，失败时回退到纯文本。
    ///
    /// 标头已经写出时无法再更改响应，只记录日志后放弃。
    async fn respond_error(
        &self,
        event: &mut HttpEvent,
        exception: &HttpException,
    ) -> Result<(), HttpException> {
        if matches!(exception, HttpException::Eof) {
            return Ok(());
        }
        if event.has_written_headers() {
            error!("headers already written, cannot report: {}", exception);
            return Ok(());
        }

        let status = exception.status_code();
        let (body, media_type) = match self.themed_error_page(exception) {
            Some(page) => (page, "text/html"),
            None => (plaintext_error_page(exception), "text/plain"),
        };

        event.headers_mut().clear();
        event.set_status(status);
        event
            .headers_mut()
            .insert("server", HeaderValue::Raw(SERVER_NAME.to_string()));
        if status == 401 {
            event.headers_mut().insert(
                "www-authenticate",
                HeaderValue::Raw("Basic realm=\"Login\"".to_string()),
            );
        }

        // 非空错误页一律压缩，空响应体用恒等传输
        let (encoded, encoding) = if body.is_empty() {
            (Bytes::new(), BodyEncoding::Identity)
        } else {
            (BodyEncoding::Gzip.encode(Bytes::from(body))?, BodyEncoding::Gzip)
        };
        event.headers_mut().set_content_type(media_type);
        if encoding == BodyEncoding::Gzip {
            event.headers_mut().set_content_encoding(encoding.token());
        }
        event.headers_mut().set_content_length(encoded.len() as u64);
        event.write_headers().await?;
        event.write_body(&encoded).await
    }

    /// 加载并预处理状态码对应的主题错误页，任何失败都回退到 `None`。
    fn themed_error_page(&self, exception: &HttpException) -> Option<String> {
        let status = exception.status_code();
        let locator = self.store.asset(&format!("html/{}.html", status));
        self.cache.update_attributes(&locator).ok()?;
        let raw = self.cache.get_text_blocking(&locator).ok()?;

        let mut pre = PreProcessor::new(self);
        pre.define("server.port", &self.config.port().to_string());
        pre.define("error.code", &status.to_string());
        pre.define("error.status", reason_phrase(status));
        pre.define("error.message", exception.message().unwrap_or(""));
        if status == 500 {
            pre.define("error.trace", &exception.trace().unwrap_or_default());
        }
        match pre.process(&raw) {
            Ok(page) => Some(page),
            Err(e) => {
                warn!("themed error page failed, using plaintext fallback: {}", e);
                None
            }
        }
    }
}

/// 纯文本回退页：状态行、可选描述，500 级附带故障细节。
fn plaintext_error_page(exception: &HttpException) -> String {
    let status = exception.status_code();
    let mut page = format!("{} {}{}", status, reason_phrase(status), CRLF);
    if let Some(message) = exception.message() {
        page.push_str(CRLF);
        page.push_str(message);
        page.push_str(CRLF);
    }
    if let Some(trace) = exception.trace() {
        page.push_str(CRLF);
        page.push_str(&trace);
        page.push_str(CRLF);
    }
    page
}

impl PreProcessSource for HttpServer {
    /// `embed` 的资源解析：捆绑资源目录优先，其次走逻辑路径解析。
    fn load_text(&self, name: &str) -> Result<(String, Option<String>), HttpException> {
        let asset = self.store.asset(name);
        let locator = if asset.path().is_file() {
            asset
        } else {
            self.store
                .resolve(&format!("/{}", name))
                .ok_or_else(|| HttpException::NotFound(name.to_string()))?
        };
        self.cache.update_attributes(&locator)?;
        let text = self.cache.get_text_blocking(&locator)?;
        Ok((text, locator.media_type()))
    }

    fn render_markdown(&self, source: &str) -> String {
        self.markdown.render(source)
    }
}
