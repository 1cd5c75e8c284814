//! 健康实例快照

use std::collections::HashMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::ServiceEntry;

/// 一个服务实例的地址信息
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AddressInfo {
    /// 注册中心分配的实例 ID
    pub id: String,
    /// `host:port`
    pub addr: String,
}

impl AddressInfo {
    pub fn new(id: impl Into<String>, addr: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            addr: addr.into(),
        }
    }
}

/// 某个服务名下健康实例的不可变快照
///
/// `ordered` 与 `by_id` 总是由同一次通知一起构建，二者成员完全一致。
/// 快照只会被整体替换，不会被增量修改。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressSet {
    ordered: Vec<AddressInfo>,
    by_id: HashMap<String, usize>,
}

impl AddressSet {
    /// 空快照
    pub fn empty() -> Self {
        Self::default()
    }

    /// 从通知条目构建，只保留健康实例
    ///
    /// 同一通知中重复出现的实例 ID 只保留第一条健康记录
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = &'a ServiceEntry>,
    {
        let mut set = Self::default();
        for entry in entries {
            if !entry.is_healthy() {
                continue;
            }
            if set.by_id.contains_key(&entry.service.id) {
                debug!(id = %entry.service.id, "duplicate service id in notification, skipped");
                continue;
            }
            set.by_id.insert(entry.service.id.clone(), set.ordered.len());
            set.ordered.push(AddressInfo::new(entry.service.id.clone(), entry.addr()));
        }
        set
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// 按通知中出现的顺序
    pub fn ordered(&self) -> &[AddressInfo] {
        &self.ordered
    }

    pub fn get(&self, index: usize) -> Option<&AddressInfo> {
        self.ordered.get(index)
    }

    pub fn get_by_id(&self, id: &str) -> Option<&AddressInfo> {
        self.by_id.get(id).and_then(|&index| self.ordered.get(index))
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// 均匀随机选取一个实例
    pub fn random(&self) -> Option<&AddressInfo> {
        if self.ordered.is_empty() {
            return None;
        }
        let index = rand::thread_rng().gen_range(0..self.ordered.len());
        self.ordered.get(index)
    }

    /// 键集合与有序序列是否一致
    pub fn is_consistent(&self) -> bool {
        self.by_id.len() == self.ordered.len()
            && self
                .ordered
                .iter()
                .enumerate()
                .all(|(index, info)| self.by_id.get(&info.id) == Some(&index))
    }
}
