//! 内存存储
//!
//! 使用 DashMap 实现的高并发内存存储，模拟服务重启即丢失数据。

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

/// 通用内存存储
///
/// clone 共享同一份数据，可在多个路由处理器间传递。
#[derive(Debug)]
pub struct MemoryStore<T> {
    data: Arc<DashMap<String, T>>,
}

impl<T: Clone> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            data: Arc::new(DashMap::new()),
        }
    }

    /// 仅在 key 不存在时插入，返回是否插入成功
    pub fn insert_if_absent(&self, id: &str, value: T) -> bool {
        match self.data.entry(id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(value);
                true
            }
        }
    }

    /// 返回数据的克隆，不持有锁
    pub fn get(&self, id: &str) -> Option<T> {
        self.data.get(id).map(|v| v.clone())
    }

    /// 在持有该 key 写锁的情况下修改数据
    ///
    /// 同一 key 的并发修改串行执行；key 不存在时返回 None
    pub fn update<R>(&self, id: &str, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.data.get_mut(id).map(|mut v| f(v.value_mut()))
    }

    pub fn count(&self) -> usize {
        self.data.len()
    }
}

impl<T: Clone> Clone for MemoryStore<T> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
        }
    }
}
