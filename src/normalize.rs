//! URL规范化模块
//!
//! 缓存查找和删除回退都以规范化URL作为唯一的相等键。
//! 规则：解析成功则取序列化形式，去掉末尾单个斜杠并整体转小写；
//! 解析失败则把原始输入转小写后原样返回，绝不向调用方抛错。
//!
//! 注意：仅折叠末尾斜杠和大小写差异。查询参数顺序不参与规范化，
//! 顺序不同的同义URL会被视为两个不同的书签。

use url::Url;

/// 规范化URL，用作缓存键
pub fn normalize_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(parsed) => {
            let serialized = parsed.to_string();
            serialized
                .strip_suffix('/')
                .unwrap_or(&serialized)
                .to_lowercase()
        }
        Err(_) => raw.to_lowercase(),
    }
}

/// 浏览器内部页面不参与镜像和导入
pub fn is_internal_url(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(parsed) => matches!(
            parsed.scheme(),
            "chrome" | "chrome-extension" | "about" | "edge" | "moz-extension"
        ),
        Err(_) => false,
    }
}
