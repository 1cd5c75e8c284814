//! 成员表
//!
//! 记录集群成员（以地址标识）的生命周期状态：
//! `Unused -> Adding -> Running -> Removing -> Unused`

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

/// 成员状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberStatus {
    /// 不可用（不在成员表中）
    Unused,
    /// 添加中
    Adding,
    /// 运行中
    Running,
    /// 移除中
    Removing,
}

/// 成员表
pub struct Membership {
    members: RwLock<HashMap<String, MemberStatus>>,
}

impl Membership {
    pub fn new() -> Self {
        Self {
            members: RwLock::new(HashMap::new()),
        }
    }

    /// 开始添加成员，成员已存在时返回 false
    pub async fn add_member(&self, addr: impl Into<String>) -> bool {
        let addr = addr.into();
        let mut members = self.members.write().await;
        if members.contains_key(&addr) {
            return false;
        }
        debug!(member = %addr, "member adding");
        members.insert(addr, MemberStatus::Adding);
        true
    }

    /// 添加完成，只有 `Adding` 状态的成员可以进入 `Running`
    pub async fn activate(&self, addr: &str) -> bool {
        self.transition(addr, MemberStatus::Adding, MemberStatus::Running)
            .await
    }

    /// 开始移除，只有 `Running` 状态的成员可以进入 `Removing`
    pub async fn begin_remove(&self, addr: &str) -> bool {
        self.transition(addr, MemberStatus::Running, MemberStatus::Removing)
            .await
    }

    /// 移除成员，返回移除前的状态
    pub async fn remove_member(&self, addr: &str) -> MemberStatus {
        let removed = self.members.write().await.remove(addr);
        if removed.is_some() {
            debug!(member = addr, "member removed");
        }
        removed.unwrap_or(MemberStatus::Unused)
    }

    pub async fn status(&self, addr: &str) -> MemberStatus {
        self.members
            .read()
            .await
            .get(addr)
            .copied()
            .unwrap_or(MemberStatus::Unused)
    }

    /// 所有成员及其状态（按地址排序）
    pub async fn members(&self) -> Vec<(String, MemberStatus)> {
        let mut members: Vec<(String, MemberStatus)> = self
            .members
            .read()
            .await
            .iter()
            .map(|(addr, status)| (addr.clone(), *status))
            .collect();
        members.sort_by(|a, b| a.0.cmp(&b.0));
        members
    }

    /// 所有 `Running` 状态的成员
    pub async fn running_members(&self) -> Vec<String> {
        let members = self.members.read().await;
        let mut running: Vec<String> = members
            .iter()
            .filter(|(_, status)| **status == MemberStatus::Running)
            .map(|(addr, _)| addr.clone())
            .collect();
        running.sort();
        running
    }

    async fn transition(&self, addr: &str, from: MemberStatus, to: MemberStatus) -> bool {
        let mut members = self.members.write().await;
        match members.get_mut(addr) {
            Some(status) if *status == from => {
                *status = to;
                debug!(member = addr, ?from, ?to, "member status changed");
                true
            }
            _ => false,
        }
    }
}

impl Default for Membership {
    fn default() -> Self {
        Self::new()
    }
}
