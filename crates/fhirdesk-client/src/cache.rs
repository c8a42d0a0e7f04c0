//! 附件图像缓存
//!
//! 以 (附件ID, 数据SHA-256) 为键缓存解码后的字节，
//! 同时受条目数与总字节数约束，超出时淘汰最久未使用的条目。

use fhirdesk_core::{Attachment, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

use crate::attachment::decode_attachment;

/// 缓存键
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub attachment_id: String,
    pub digest: String,
}

impl CacheKey {
    /// 没有数据的附件不可缓存
    pub fn for_attachment(attachment: &Attachment) -> Option<Self> {
        let data = attachment.data.as_deref().filter(|d| !d.is_empty())?;
        let digest = format!("{:x}", Sha256::digest(data.as_bytes()));
        Some(Self {
            attachment_id: attachment.id.clone().unwrap_or_default(),
            digest,
        })
    }
}

/// 缓存统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub bytes: usize,
}

/// 有界LRU附件缓存
#[derive(Debug)]
pub struct AttachmentCache {
    max_entries: usize,
    max_bytes: usize,
    entries: HashMap<CacheKey, Arc<Vec<u8>>>,
    // 队首为最久未使用
    order: VecDeque<CacheKey>,
    bytes: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl AttachmentCache {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        Self {
            max_entries,
            max_bytes,
            entries: HashMap::new(),
            order: VecDeque::new(),
            bytes: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    fn touch(&mut self, key: &CacheKey) {
        if let Some(position) = self.order.iter().position(|k| k == key) {
            if let Some(k) = self.order.remove(position) {
                self.order.push_back(k);
            }
        }
    }

    pub fn get(&mut self, key: &CacheKey) -> Option<Arc<Vec<u8>>> {
        match self.entries.get(key).cloned() {
            Some(bytes) => {
                self.hits += 1;
                self.touch(key);
                Some(bytes)
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    fn evict_oldest(&mut self) -> bool {
        let Some(key) = self.order.pop_front() else {
            return false;
        };
        if let Some(bytes) = self.entries.remove(&key) {
            self.bytes -= bytes.len();
            self.evictions += 1;
            debug!("Evicted cached attachment {}", key.attachment_id);
        }
        true
    }

    /// 插入条目；单个条目超过字节上限时不缓存
    pub fn insert(&mut self, key: CacheKey, bytes: Arc<Vec<u8>>) {
        if bytes.len() > self.max_bytes || self.max_entries == 0 {
            debug!("Attachment {} too large to cache", key.attachment_id);
            return;
        }

        if let Some(previous) = self.entries.remove(&key) {
            self.bytes -= previous.len();
            self.order.retain(|k| k != &key);
        }

        while self.entries.len() >= self.max_entries || self.bytes + bytes.len() > self.max_bytes {
            if !self.evict_oldest() {
                break;
            }
        }

        self.bytes += bytes.len();
        self.order.push_back(key.clone());
        self.entries.insert(key, bytes);
    }

    /// 读取缓存，未命中时解码附件并写入缓存
    pub fn get_or_decode(&mut self, attachment: &Attachment) -> Result<Arc<Vec<u8>>> {
        let Some(key) = CacheKey::for_attachment(attachment) else {
            return decode_attachment(attachment).map(Arc::new);
        };

        if let Some(bytes) = self.get(&key) {
            return Ok(bytes);
        }

        let bytes = Arc::new(decode_attachment(attachment)?);
        self.insert(key, bytes.clone());
        Ok(bytes)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            entries: self.entries.len(),
            bytes: self.bytes,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.bytes = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::attachment_from_bytes;

    fn key(id: &str) -> CacheKey {
        CacheKey {
            attachment_id: id.to_string(),
            digest: id.to_string(),
        }
    }

    #[test]
    fn test_lru_eviction_by_entry_count() {
        let mut cache = AttachmentCache::new(2, 1024);
        cache.insert(key("a"), Arc::new(vec![1]));
        cache.insert(key("b"), Arc::new(vec![2]));
        assert!(cache.get(&key("a")).is_some());

        cache.insert(key("c"), Arc::new(vec![3]));
        assert!(cache.get(&key("b")).is_none());
        assert!(cache.get(&key("a")).is_some());
        assert!(cache.get(&key("c")).is_some());

        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.entries, 2);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_eviction_by_total_bytes() {
        let mut cache = AttachmentCache::new(10, 10);
        cache.insert(key("a"), Arc::new(vec![0; 6]));
        cache.insert(key("b"), Arc::new(vec![0; 6]));
        assert_eq!(cache.stats().entries, 1);
        assert_eq!(cache.stats().bytes, 6);

        cache.insert(key("huge"), Arc::new(vec![0; 11]));
        assert!(cache.get(&key("huge")).is_none());
        assert!(cache.get(&key("b")).is_some());
    }

    #[test]
    fn test_key_changes_with_payload() {
        let mut first = attachment_from_bytes("image/png", b"one");
        let key_one = CacheKey::for_attachment(&first).unwrap();
        first.data = Some("dHdv".to_string());
        let key_two = CacheKey::for_attachment(&first).unwrap();
        assert_eq!(key_one.attachment_id, key_two.attachment_id);
        assert_ne!(key_one, key_two);
        assert!(CacheKey::for_attachment(&Attachment::default()).is_none());
    }

    #[test]
    fn test_get_or_decode_hits_on_second_read() {
        let mut cache = AttachmentCache::new(4, 1024);
        let attachment = attachment_from_bytes("image/png", b"pixels");

        assert_eq!(cache.get_or_decode(&attachment).unwrap().as_slice(), b"pixels");
        assert_eq!(cache.get_or_decode(&attachment).unwrap().as_slice(), b"pixels");

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }
}
