//! # 资源缓存模块
//!
//! 该模块实现了以 [`Locator`] 为键的进程内容缓存，用于避免重复的磁盘读取。
//!
//! ## 设计意图
//! - **属性与内容分离**：条目的元数据（长度、修改时间、媒体类型）总是存在，
//!   字节内容则惰性填充，检测到后备资源变化时单独失效。
//! - **旁路填充（tee）**：冷缓存读取把每个数据块同时送往调用方与一个
//!   累积缓冲区，首个请求以流式方式立即见到数据，后续请求直接命中内存。
//! - **有界背压**：调用方读取的管道是有界的，读得慢时填充任务会阻塞在
//!   发送端，进而阻塞对源文件的读取，不在热路径上无限缓冲。
//!
//! 填充任务与请求连接的生命周期相互独立：即使连接中途断开，填充仍会
//! 完成写入缓存；源读取失败时丢弃已累积的部分内容，不落入缓存。

use std::sync::Arc;
use std::time::SystemTime;

use bytes::Bytes;
use dashmap::DashMap;
use log::{debug, error};
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

use crate::exception::HttpException;
use crate::resource::{Locator, ResourceAttributes};

/// 旁路填充的读取块大小（字节）
const BLOCK_SIZE: usize = 4096;

/// 调用方管道中在途数据块的上限
const PIPE_DEPTH: usize = 8;

/// 单个缓存条目：元数据总是存在，字节内容可能尚未填充。
#[derive(Debug, Clone)]
struct CacheEntry {
    attributes: ResourceAttributes,
    bytes: Option<Bytes>,
}

/// 以 [`Locator`] 为键的资源缓存。
///
/// 条目映射按键做细粒度并发访问；两个连接对同一冷资源的竞争读取
/// 可能各自触发一次填充，缓存最终保留后完成的那一份，没有正确性问题。
#[derive(Debug, Default)]
pub struct ResourceCache {
    entries: DashMap<Locator, CacheEntry>,
}

/// [`ResourceCache::open_stream`] 返回的内容流。
///
/// 命中时直接来自内存，未命中时来自填充任务的有界管道。
pub enum ResourceStream {
    Memory(Option<Bytes>),
    Live(mpsc::Receiver<Bytes>),
}

impl ResourceStream {
    /// 取出下一个数据块，流结束时返回 `None`。
    pub async fn next_block(&mut self) -> Option<Bytes> {
        match self {
            ResourceStream::Memory(bytes) => bytes.take(),
            ResourceStream::Live(receiver) => receiver.recv().await,
        }
    }

    /// 把整个流读入内存。
    pub async fn read_to_end(&mut self) -> Bytes {
        let mut buffer = Vec::new();
        while let Some(block) = self.next_block().await {
            buffer.extend_from_slice(&block);
        }
        Bytes::from(buffer)
    }
}

impl ResourceCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// 查询资源元数据。
    ///
    /// 未命中时探测后备资源并写入一个仅含元数据的条目，
    /// 从不等待完整的内容传输。
    pub fn get_attributes(&self, locator: &Locator) -> Result<ResourceAttributes, HttpException> {
        if let Some(entry) = self.entries.get(locator) {
            return Ok(entry.attributes.clone());
        }
        let attributes = locator.probe()?;
        self.entries.insert(
            locator.clone(),
            CacheEntry {
                attributes: attributes.clone(),
                bytes: None,
            },
        );
        Ok(attributes)
    }

    /// 对照后备资源刷新元数据。
    ///
    /// 修改时间发生变化时替换元数据并丢弃已缓存的字节（强制重新填充），
    /// 返回 `true`；条目尚不存在时同样返回 `true`；未变化返回 `false`。
    pub fn update_attributes(&self, locator: &Locator) -> Result<bool, HttpException> {
        let current = locator.probe()?;
        match self.entries.get_mut(locator) {
            Some(mut entry) => {
                if entry.attributes.modified == current.modified {
                    Ok(false)
                } else {
                    debug!("resource changed, dropping cached bytes: {:?}", locator.path());
                    entry.attributes = current;
                    entry.bytes = None;
                    Ok(true)
                }
            }
            None => {
                self.entries.insert(
                    locator.clone(),
                    CacheEntry {
                        attributes: current,
                        bytes: None,
                    },
                );
                Ok(true)
            }
        }
    }

    /// 打开资源内容流。
    ///
    /// 命中时立即返回内存流；未命中时打开后备资源并返回管道流，
    /// 同时派生一个独立的填充任务，把每个读取块旁路复制到累积缓冲区，
    /// 源耗尽后将累积内容连同元数据提交为新的缓存条目。
    pub async fn open_stream(
        self: &Arc<Self>,
        locator: &Locator,
    ) -> Result<ResourceStream, HttpException> {
        if let Some(entry) = self.entries.get(locator) {
            if let Some(bytes) = &entry.bytes {
                debug!("cache hit: {:?}", locator.path());
                return Ok(ResourceStream::Memory(Some(bytes.clone())));
            }
        }

        let attributes = locator.probe()?;
        let mut file = tokio::fs::File::open(locator.path())
            .await
            .map_err(|e| HttpException::server("failed to open resource", e))?;

        let (sender, receiver) = mpsc::channel::<Bytes>(PIPE_DEPTH);
        let cache = Arc::clone(self);
        let locator = locator.clone();

        // 填充任务：生命周期独立于请求连接，接收端关闭后继续读完以完成填充
        tokio::spawn(async move {
            let mut accumulated: Vec<u8> = Vec::with_capacity(attributes.size as usize);
            let mut receiver_gone = false;
            loop {
                let mut block = vec![0u8; BLOCK_SIZE];
                let count = match file.read(&mut block).await {
                    Ok(0) => break,
                    Ok(count) => count,
                    Err(e) => {
                        // 源读取失败：丢弃已累积的部分内容，不落入缓存
                        error!("resource read failed, discarding partial content: {}", e);
                        return;
                    }
                };
                block.truncate(count);
                let block = Bytes::from(block);
                accumulated.extend_from_slice(&block);
                if !receiver_gone && sender.send(block).await.is_err() {
                    receiver_gone = true;
                }
            }
            cache.entries.insert(
                locator,
                CacheEntry {
                    attributes,
                    bytes: Some(Bytes::from(accumulated)),
                },
            );
        });

        Ok(ResourceStream::Live(receiver))
    }

    /// 显式直写一个完整条目。
    ///
    /// 用于把变换后的内容（例如预处理结果）放入缓存，使后续请求
    /// 直接命中处理后的字节而非原始源。
    pub fn store(
        &self,
        locator: &Locator,
        media_type: Option<String>,
        modified: SystemTime,
        bytes: Bytes,
    ) {
        self.entries.insert(
            locator.clone(),
            CacheEntry {
                attributes: ResourceAttributes {
                    size: bytes.len() as u64,
                    modified,
                    media_type,
                },
                bytes: Some(bytes),
            },
        );
    }

    /// 同步读取资源的全部字节：命中直接返回，未命中读取后备资源并
    /// 直写缓存，后续请求不再触碰磁盘。
    ///
    /// 供预处理回调等同步上下文使用；需要新鲜度保证的调用方先执行
    /// [`ResourceCache::update_attributes`]。
    pub fn get_bytes_blocking(&self, locator: &Locator) -> Result<Bytes, HttpException> {
        if let Some(entry) = self.entries.get(locator) {
            if let Some(bytes) = &entry.bytes {
                debug!("cache hit: {:?}", locator.path());
                return Ok(bytes.clone());
            }
        }
        let attributes = locator.probe()?;
        let data = std::fs::read(locator.path())
            .map_err(|e| HttpException::server("failed to read resource", e))?;
        let bytes = Bytes::from(data);
        self.entries.insert(
            locator.clone(),
            CacheEntry {
                attributes,
                bytes: Some(bytes.clone()),
            },
        );
        Ok(bytes)
    }

    /// 以 UTF-8 文本形式同步读取资源，未命中时直写缓存。
    pub fn get_text_blocking(&self, locator: &Locator) -> Result<String, HttpException> {
        let bytes = self.get_bytes_blocking(locator)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| HttpException::server("resource is not valid UTF-8", e))
    }

    /// 读取资源的全部字节。
    pub async fn get_all_bytes(self: &Arc<Self>, locator: &Locator) -> Result<Bytes, HttpException> {
        let mut stream = self.open_stream(locator).await?;
        Ok(stream.read_to_end().await)
    }

    /// 以 UTF-8 文本形式读取资源的全部内容。
    pub async fn get_text(self: &Arc<Self>, locator: &Locator) -> Result<String, HttpException> {
        let bytes = self.get_all_bytes(locator).await?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| HttpException::server("resource is not valid UTF-8", e))
    }

    /// 条目是否已经持有填充完成的字节内容。
    pub fn has_bytes(&self, locator: &Locator) -> bool {
        self.entries
            .get(locator)
            .map(|entry| entry.bytes.is_some())
            .unwrap_or(false)
    }
}
