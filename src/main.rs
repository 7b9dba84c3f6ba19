// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 自托管 HTTPS 内容服务器
//!
//! 该模块实现了基于 Tokio 运行时的 TLS 内容服务器入口。
//! 核心功能包括：
//! - 手写的 HTTP/1.1 请求解析与强类型标头模型
//! - 每连接一个任务的并发模型，连接处理完即关闭
//! - 进程内资源缓存与后台旁路填充
//! - 服务端 HTML 指令预处理（两遍流水线）
//! - Basic 认证的登录路径

// --- 模块定义 ---
mod cache;      // 资源缓存与旁路填充
mod config;     // 配置解析与管理
mod encode;     // 传输编码协商
mod event;      // 请求-响应交换上下文
mod exception;  // 自定义异常与错误处理
mod header;     // 强类型标头模型
mod param;      // 全局常量与静态参数
mod preprocess; // HTML 指令预处理器
mod request;    // HTTP 请求报文解析器
mod resource;   // 资源定位与路径解析
mod security;   // 凭据校验
mod server;     // 路由与请求处理

use config::Config;
use event::{HttpEvent, HttpPeer};
use exception::HttpException;
use request::read_request;
use security::PasswordStore;
use server::HttpServer;

use log::{debug, error, info};
use log4rs;
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    runtime::Builder,
};
use tokio_rustls::TlsAcceptor;

use std::{
    fs::File,
    io::BufReader,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    path::Path,
    sync::Arc,
};

/// # 程序入口点
///
/// 初始化日志与配置，按配置构建多线程运行时，再进入监听循环。
fn main() {
    // 1. 初始化日志系统：采用 log4rs 异步日志架构，通过外部 YAML 灵活配置级别与输出目的地
    log4rs::init_file("config/log4rs.yaml", Default::default()).unwrap();

    // 2. 环境配置加载：从 TOML 文件读取运行参数
    let config = Config::from_toml("config/development.toml");
    info!("配置文件已载入");
    info!("asset root: {}", config.asset_root());
    info!("www root: {}", config.www_root());

    // 3. 异步运行时定制：根据配置文件动态分配工作线程数
    let worker_threads = config.worker_threads();
    let runtime = Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .enable_all()
        .build()
        .unwrap();

    runtime.block_on(run(config));
}

/// 加载 TLS 证书与私钥，构建握手接受器。
fn build_tls_acceptor(config: &Config) -> TlsAcceptor {
    let cert_file = match File::open(config.cert_file()) {
        Ok(f) => f,
        Err(e) => panic!("no such file {} exception:{}", config.cert_file(), e),
    };
    let certs: Vec<_> = match rustls_pemfile::certs(&mut BufReader::new(cert_file)).collect() {
        Ok(certs) => certs,
        Err(e) => panic!("无法解析证书文件：{}", e),
    };

    let key_file = match File::open(config.key_file()) {
        Ok(f) => f,
        Err(e) => panic!("no such file {} exception:{}", config.key_file(), e),
    };
    let key = match rustls_pemfile::private_key(&mut BufReader::new(key_file)) {
        Ok(Some(key)) => key,
        Ok(None) => panic!("私钥文件中没有可用的私钥：{}", config.key_file()),
        Err(e) => panic!("无法解析私钥文件：{}", e),
    };

    let tls_config = match rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
    {
        Ok(c) => c,
        Err(e) => panic!("无法构建TLS配置：{}", e),
    };
    TlsAcceptor::from(Arc::new(tls_config))
}

/// 主事件循环：接收连接并分发到每连接一个的处理任务。
async fn run(config: Config) {
    // 凭据文件加载：登录路径的校验来源
    let verifier = match PasswordStore::load(Path::new(config.passwords_file())) {
        Ok(store) => {
            info!("凭据文件已载入，共{}个用户", store.len());
            store
        }
        Err(e) => panic!("无法加载凭据文件：{}", e),
    };

    let acceptor = build_tls_acceptor(&config);
    info!("TLS证书与私钥加载完成");

    // 网络层初始化：支持全地址监听 (0.0.0.0) 或本地回环监听 (127.0.0.1)
    let port: u16 = config.port();
    let address = match config.local() {
        true => Ipv4Addr::new(127, 0, 0, 1),
        false => Ipv4Addr::new(0, 0, 0, 0),
    };
    info!("服务端将在{}:{}上监听TLS连接", address, port);
    let socket = SocketAddrV4::new(address, port);

    let listener = match TcpListener::bind(socket).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("无法绑定端口：{}，错误：{}", port, e);
            panic!("无法绑定端口：{}，错误：{}", port, e);
        }
    };
    info!("端口{}绑定完成", port);

    let server = Arc::new(HttpServer::new(config, Box::new(verifier)));

    let mut id: u128 = 0;

    // 持续接收新连接并分发至 Tokio 线程池
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                error!("接受连接失败：{}", e);
                continue;
            }
        };
        debug!("[ID{}]新的连接：{}", id, addr);

        let acceptor = acceptor.clone();
        let server = Arc::clone(&server);
        tokio::spawn(async move {
            handle_connection(server, acceptor, stream, addr, id).await;
        });
        id += 1;
    }
}

/// # 连接处理器
///
/// 负责单个 TLS 连接的生命周期：握手、读取并解析一个请求、
/// 构建交换上下文并交给路由处理。响应写完后连接即关闭，
/// 不做连接复用。
async fn handle_connection(
    server: Arc<HttpServer>,
    acceptor: TlsAcceptor,
    stream: TcpStream,
    addr: SocketAddr,
    id: u128,
) {
    // 1. TLS 握手
    let tls_stream = match acceptor.accept(stream).await {
        Ok(s) => s,
        Err(e) => {
            error!("[ID{}]TLS握手失败：{}", id, e);
            return;
        }
    };
    debug!("[ID{}]TLS握手完成", id);

    let (read_half, mut write_half) = tokio::io::split(tls_stream);

    // 2. 协议解析阶段：把字节流转换为结构化的请求对象
    let request = match read_request(read_half).await {
        Ok(request) => request,
        Err(HttpException::Eof) => {
            // 对端在请求之前关闭了连接，静默放弃
            debug!("[ID{}]对端提前关闭连接", id);
            return;
        }
        Err(e) => {
            error!("[ID{}]解析HTTP请求失败: {}", id, e);
            let response = "HTTP/1.1 400 Bad Request\r\nContent-Length: 11\r\n\r\nBad Request";
            let _ = write_half.write_all(response.as_bytes()).await;
            let _ = write_half.flush().await;
            return;
        }
    };
    debug!("[ID{}]成功解析HTTP请求", id);

    // 3. 构建交换上下文并分发
    let peer = HttpPeer::new(addr.ip().to_string(), addr.port());
    let mut event = HttpEvent::new(peer, request, Box::new(write_half));
    server.handle_event(id, &mut event).await;
}
