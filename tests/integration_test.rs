//! 端到端集成测试：不经过 TLS 监听层，直接驱动路由处理一次完整的
//! 请求-响应交换，并在对端解析写出的原始报文。

use std::fs;
use std::io::Read;

use base64::Engine;
use flate2::read::GzDecoder;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;

use ironhttpd::{read_request, Config, HttpEvent, HttpPeer, HttpServer, Locator, PasswordStore};

/// 在临时目录里搭建一套完整的服务器环境
fn build_server(dir: &TempDir) -> HttpServer {
    let asset_root = dir.path().join("assets");
    let www_root = dir.path().join("www");
    fs::create_dir_all(asset_root.join("html")).unwrap();
    fs::create_dir_all(asset_root.join("fragments")).unwrap();
    fs::create_dir_all(&www_root).unwrap();

    fs::write(
        asset_root.join("html/index.html"),
        "$const:def{\"title\":\"Welcome\"}<html><head><title>$const:title</title></head>\
         <body>$embed{\"src\":\"fragments/header.html\"}\
         <p>Served on port $server.port for $user.ip</p></body></html>",
    )
    .unwrap();
    fs::write(
        asset_root.join("fragments/header.html"),
        "<header>shared banner</header>",
    )
    .unwrap();
    fs::write(
        asset_root.join("html/404.html"),
        "<html><body><h1>$error.code $error.status</h1><p>$error.message</p></body></html>",
    )
    .unwrap();
    fs::write(www_root.join("notes.txt"), "plain notes body").unwrap();
    fs::write(www_root.join("big.txt"), "a".repeat(10_000)).unwrap();

    let passwords = dir.path().join("passwords.csv");
    fs::write(&passwords, "user,password\nalice,wonderland\n").unwrap();

    let config_file = dir.path().join("development.toml");
    fs::write(
        &config_file,
        format!(
            "port = 8443\n\
             local = true\n\
             asset_root = {:?}\n\
             www_root = {:?}\n\
             cert_file = \"config/cert.pem\"\n\
             key_file = \"config/key.pem\"\n\
             passwords_file = {:?}\n\
             worker_threads = 2\n",
            asset_root, www_root, passwords
        ),
    )
    .unwrap();

    let config = Config::from_toml(config_file.to_str().unwrap());
    let verifier = PasswordStore::load(&passwords).unwrap();
    HttpServer::new(config, Box::new(verifier))
}

/// 发送一个原始请求，返回 (状态码, 标头, 响应体字节)
async fn exchange(server: &HttpServer, raw: String) -> (u16, Vec<(String, String)>, Vec<u8>) {
    let raw: &'static [u8] = Box::leak(raw.into_boxed_str()).as_bytes();
    let request = read_request(raw).await.unwrap();

    let (mut client, server_side) = tokio::io::duplex(1 << 20);
    let peer = HttpPeer::new("127.0.0.1".to_string(), 49152);
    let mut event = HttpEvent::new(peer, request, Box::new(server_side));
    server.handle_event(0, &mut event).await;
    drop(event);

    let mut response = Vec::new();
    client.read_to_end(&mut response).await.unwrap();
    parse_response(&response)
}

fn parse_response(response: &[u8]) -> (u16, Vec<(String, String)>, Vec<u8>) {
    let separator = response
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response has no header block terminator");
    let head = String::from_utf8_lossy(&response[..separator]).to_string();
    let body = response[separator + 4..].to_vec();

    let mut lines = head.split("\r\n");
    let status_line = lines.next().unwrap();
    assert!(status_line.starts_with("HTTP/1.1 "));
    let status_code = status_line
        .split_whitespace()
        .nth(1)
        .unwrap()
        .parse::<u16>()
        .unwrap();

    let mut headers = Vec::new();
    for line in lines {
        if let Some((key, value)) = line.split_once(": ") {
            headers.push((key.to_lowercase(), value.to_string()));
        }
    }
    (status_code, headers, body)
}

fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

fn gunzip(body: &[u8]) -> Vec<u8> {
    let mut decoder = GzDecoder::new(body);
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded).unwrap();
    decoded
}

fn basic_auth(user: &str, password: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, password))
}

/// 首页经过两遍预处理：常量记号与每请求变量都已展开
#[tokio::test]
async fn test_get_root_preprocessed() {
    let dir = TempDir::new().unwrap();
    let server = build_server(&dir);

    let (status, headers, body) =
        exchange(&server, "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n".to_string()).await;

    assert_eq!(status, 200);
    assert_eq!(header(&headers, "server"), Some("ironhttpd"));
    assert_eq!(header(&headers, "content-type"), Some("text/html"));

    let body = String::from_utf8(body).unwrap();
    assert!(body.contains("<title>Welcome</title>"), "body: {}", body);
    assert!(body.contains("Served on port 8443 for 127.0.0.1"));
    assert!(!body.contains("$const:"));
    assert!(!body.contains("$server.port"));
}

/// HEAD 请求返回完整标头但没有响应体
#[tokio::test]
async fn test_head_has_no_body() {
    let dir = TempDir::new().unwrap();
    let server = build_server(&dir);

    let (status, headers, body) =
        exchange(&server, "HEAD / HTTP/1.1\r\nHost: localhost\r\n\r\n".to_string()).await;

    assert_eq!(status, 200);
    let length: usize = header(&headers, "content-length").unwrap().parse().unwrap();
    assert!(length > 0);
    assert!(body.is_empty());
}

/// 内容路径只接受 GET 与 HEAD
#[tokio::test]
async fn test_post_is_method_not_allowed() {
    let dir = TempDir::new().unwrap();
    let server = build_server(&dir);

    let (status, _, _) =
        exchange(&server, "POST / HTTP/1.1\r\nHost: localhost\r\n\r\n".to_string()).await;
    assert_eq!(status, 405);
}

/// 未命中的路径返回主题 404 页，正文携带配置的提示语
#[tokio::test]
async fn test_missing_resource_themed_404() {
    let dir = TempDir::new().unwrap();
    let server = build_server(&dir);

    let (status, headers, body) = exchange(
        &server,
        "GET /definitely-missing HTTP/1.1\r\nHost: localhost\r\n\r\n".to_string(),
    )
    .await;

    assert_eq!(status, 404);
    assert_eq!(header(&headers, "content-encoding"), Some("gzip"));
    let length: usize = header(&headers, "content-length").unwrap().parse().unwrap();
    assert_eq!(length, body.len());

    let page = String::from_utf8(gunzip(&body)).unwrap();
    assert!(page.contains("404 Not Found"), "page: {}", page);
    assert!(page.contains("Resource could not be found"));
}

/// 没有主题页面的状态码退回纯文本
#[tokio::test]
async fn test_plaintext_fallback_for_405() {
    let dir = TempDir::new().unwrap();
    let server = build_server(&dir);

    let (status, headers, body) =
        exchange(&server, "PUT / HTTP/1.1\r\nHost: localhost\r\n\r\n".to_string()).await;

    assert_eq!(status, 405);
    assert_eq!(header(&headers, "content-type"), Some("text/plain"));
    let page = String::from_utf8(gunzip(&body)).unwrap();
    assert_eq!(page, "405 Method Not Allowed\r\n");
}

/// 缺失凭据的登录返回 401 与 Basic 挑战
#[tokio::test]
async fn test_login_without_credentials() {
    let dir = TempDir::new().unwrap();
    let server = build_server(&dir);

    let (status, headers, _) = exchange(
        &server,
        "GET /login HTTP/1.1\r\nHost: localhost\r\n\r\n".to_string(),
    )
    .await;

    assert_eq!(status, 401);
    assert_eq!(
        header(&headers, "www-authenticate"),
        Some("Basic realm=\"Login\"")
    );
}

/// 口令错误与用户不存在得到同样的 401
#[tokio::test]
async fn test_login_wrong_credentials() {
    let dir = TempDir::new().unwrap();
    let server = build_server(&dir);

    for credential in [
        basic_auth("alice", "not-her-password"),
        basic_auth("nobody", "wonderland"),
    ] {
        let (status, headers, _) = exchange(
            &server,
            format!(
                "GET /login HTTP/1.1\r\nHost: localhost\r\nAuthorization: Basic {}\r\n\r\n",
                credential
            ),
        )
        .await;
        assert_eq!(status, 401);
        assert_eq!(
            header(&headers, "www-authenticate"),
            Some("Basic realm=\"Login\"")
        );
    }
}

/// 正确凭据重定向到首页
#[tokio::test]
async fn test_login_success_redirects() {
    let dir = TempDir::new().unwrap();
    let server = build_server(&dir);

    let (status, headers, body) = exchange(
        &server,
        format!(
            "GET /login HTTP/1.1\r\nHost: localhost\r\nAuthorization: Basic {}\r\n\r\n",
            basic_auth("Alice", "wonderland")
        ),
    )
    .await;

    assert_eq!(status, 301);
    assert_eq!(header(&headers, "location"), Some("/"));
    assert!(body.is_empty());
}

/// 小文件恒等传输，正文原样返回
#[tokio::test]
async fn test_small_file_identity() {
    let dir = TempDir::new().unwrap();
    let server = build_server(&dir);

    let (status, headers, body) = exchange(
        &server,
        "GET /notes.txt HTTP/1.1\r\nHost: localhost\r\nAccept-Encoding: gzip\r\n\r\n".to_string(),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(header(&headers, "content-type"), Some("text/plain"));
    assert!(header(&headers, "content-encoding").is_none());
    assert_eq!(body, b"plain notes body");
}

/// 大文本按协商结果压缩，Content-Length 是压缩后的长度
#[tokio::test]
async fn test_large_file_gzip_round_trip() {
    let dir = TempDir::new().unwrap();
    let server = build_server(&dir);

    let (status, headers, body) = exchange(
        &server,
        "GET /big.txt HTTP/1.1\r\nHost: localhost\r\nAccept-Encoding: gzip\r\n\r\n".to_string(),
    )
    .await;

    assert_eq!(status, 200);
    assert_eq!(header(&headers, "content-encoding"), Some("gzip"));
    let length: usize = header(&headers, "content-length").unwrap().parse().unwrap();
    assert_eq!(length, body.len());
    assert!(length < 10_000);

    let decoded = gunzip(&body);
    assert_eq!(decoded, "a".repeat(10_000).into_bytes());
}

/// 客户端只接受其他编码时退回恒等传输
#[tokio::test]
async fn test_large_file_identity_when_gzip_refused() {
    let dir = TempDir::new().unwrap();
    let server = build_server(&dir);

    let (status, headers, body) = exchange(
        &server,
        "GET /big.txt HTTP/1.1\r\nHost: localhost\r\nAccept-Encoding: br\r\n\r\n".to_string(),
    )
    .await;

    assert_eq!(status, 200);
    assert!(header(&headers, "content-encoding").is_none());
    assert_eq!(body.len(), 10_000);
}

/// 同一页面的第二次请求命中常量遍的缓存输出
#[tokio::test]
async fn test_repeated_request_uses_cached_constant_pass() {
    let dir = TempDir::new().unwrap();
    let server = build_server(&dir);

    let (first_status, _, first_body) =
        exchange(&server, "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n".to_string()).await;
    let (second_status, _, second_body) =
        exchange(&server, "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n".to_string()).await;

    assert_eq!(first_status, 200);
    assert_eq!(second_status, 200);
    assert_eq!(first_body, second_body);
}

/// 嵌入片段与主题错误页都经由缓存读取，访问后字节驻留内存
#[tokio::test]
async fn test_embed_and_error_pages_read_through_cache() {
    let dir = TempDir::new().unwrap();
    let server = build_server(&dir);
    let asset_root = dir.path().join("assets");

    let (status, _, body) =
        exchange(&server, "GET / HTTP/1.1\r\nHost: localhost\r\n\r\n".to_string()).await;
    assert_eq!(status, 200);
    let body = String::from_utf8(body).unwrap();
    assert!(body.contains("<header>shared banner</header>"), "body: {}", body);
    assert!(server
        .cache()
        .has_bytes(&Locator::new(asset_root.join("fragments/header.html"))));

    let (status, _, _) = exchange(
        &server,
        "GET /definitely-missing HTTP/1.1\r\nHost: localhost\r\n\r\n".to_string(),
    )
    .await;
    assert_eq!(status, 404);
    assert!(server
        .cache()
        .has_bytes(&Locator::new(asset_root.join("html/404.html"))));
}
