//! 标识生成器
//!
//! - 十位 62 进制短 ID：用于监听器、订阅等进程内句柄
//! - UUID v4：用于定位器等需要全局唯一性的对象
//! - 单调序号：用于描述符和服务引用，保证创建顺序可比较

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// 62 进制字符集
const BASE62_CHARS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// 短 ID 长度
const ID_LENGTH: usize = 10;

/// 全局单调序号
static NEXT_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// 生成 10 位 62 进制 ID
///
/// 使用时间戳与随机数组合。
///
/// ```
/// use chips_habitat::utils::id::generate_id;
///
/// assert_eq!(generate_id().len(), 10);
/// ```
pub fn generate_id() -> String {
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default();
    let random: u64 = rand::thread_rng().gen();

    let mut value = timestamp ^ random;
    let mut result = Vec::with_capacity(ID_LENGTH);
    for _ in 0..ID_LENGTH {
        result.push(BASE62_CHARS[(value % 62) as usize] as char);
        value /= 62;
    }
    result.into_iter().rev().collect()
}

/// 生成 UUID v4 格式的 ID
pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// 取下一个进程内单调序号（从 1 开始）
pub fn next_sequence() -> u64 {
    NEXT_SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_id_charset() {
        let id = generate_id();
        assert_eq!(id.len(), ID_LENGTH);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn test_generate_id_uniqueness() {
        let mut ids = HashSet::new();
        for _ in 0..1000 {
            assert!(ids.insert(generate_id()), "ID collision detected");
        }
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let a = next_sequence();
        let b = next_sequence();
        assert!(b > a);
    }

    #[test]
    fn test_generate_uuid() {
        assert_eq!(generate_uuid().len(), 36);
    }
}
