//! # 资源定位模块
//!
//! 该模块定义了缓存键 [`Locator`] 与逻辑路径解析器 [`ResourceStore`]。
//! 逻辑路径按固定顺序解析：捆绑资源目录下的 `html/` 子目录优先，
//! 其次尝试补全 `.html` 后缀，最后回退到站点根目录。

use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use crate::exception::HttpException;
use crate::param::MIME_TYPES;

/// 可获取资源的不透明句柄，同时充当缓存键。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator(PathBuf);

/// 资源的元数据：字节长度、修改时间与媒体类型。
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceAttributes {
    /// 字节长度
    pub size: u64,
    /// 后备资源的最后修改时间
    pub modified: SystemTime,
    /// 按文件后缀推断的媒体类型，无法推断时为 `None`
    pub media_type: Option<String>,
}

impl Locator {
    pub fn new(path: PathBuf) -> Self {
        Self(path)
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// 按文件后缀推断媒体类型。
    pub fn media_type(&self) -> Option<String> {
        let extension = self.0.extension()?.to_str()?;
        MIME_TYPES
            .get(extension.to_lowercase().as_str())
            .map(|mime| mime.to_string())
    }

    /// 探测后备资源的当前元数据。资源不存在或不可读按 404 处理。
    pub fn probe(&self) -> Result<ResourceAttributes, HttpException> {
        let metadata = std::fs::metadata(&self.0)
            .map_err(|_| HttpException::NotFound(String::new()))?;
        let modified = metadata
            .modified()
            .map_err(|e| HttpException::server("failed to read modification time", e))?;
        Ok(ResourceAttributes {
            size: metadata.len(),
            modified,
            media_type: self.media_type(),
        })
    }
}

/// 把请求路径解析为文件系统定位符。
///
/// `asset_root` 存放捆绑资源（主题页面、模板），`www_root` 是站点
/// 内容的回退目录。
#[derive(Debug, Clone)]
pub struct ResourceStore {
    asset_root: PathBuf,
    www_root: PathBuf,
}

impl ResourceStore {
    pub fn new(asset_root: PathBuf, www_root: PathBuf) -> Self {
        Self {
            asset_root,
            www_root,
        }
    }

    /// 解析逻辑请求路径，找不到任何候选文件时返回 `None`。
    ///
    /// 解析顺序：
    /// 1. `/` 映射到捆绑的首页。
    /// 2. 捆绑资源目录下的 `html/<path>`。
    /// 3. 同上并补全 `.html` 后缀。
    /// 4. 站点根目录下的 `<path>`。
    pub fn resolve(&self, request_path: &str) -> Option<Locator> {
        let relative = request_path.trim_start_matches('/');
        if !is_safe_path(relative) {
            return None;
        }
        if relative.is_empty() {
            return self.existing(self.asset_root.join(crate::param::ASSET_INDEX));
        }

        self.existing(self.asset_root.join("html").join(relative))
            .or_else(|| {
                self.existing(
                    self.asset_root
                        .join("html")
                        .join(format!("{}.html", relative)),
                )
            })
            .or_else(|| self.existing(self.www_root.join(relative)))
    }

    /// 直接定位一个捆绑资源（例如主题错误页），不检查存在性。
    pub fn asset(&self, relative: &str) -> Locator {
        Locator(self.asset_root.join(relative))
    }

    fn existing(&self, path: PathBuf) -> Option<Locator> {
        if path.is_file() {
            Some(Locator(path))
        } else {
            None
        }
    }
}

/// 拒绝包含上跳组件的路径，防止逃出资源目录。
fn is_safe_path(relative: &str) -> bool {
    Path::new(relative)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}
