use std::{cmp::Ordering, collections::BTreeSet};

use serde::{Deserialize, Serialize};

use crate::value_objects::{RoomId, RoomName, Sequence, Timestamp, UserId};

/// 房间类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    /// 显式创建的命名房间
    Group,
    /// 首次私聊时隐式创建的一对一房间
    Direct,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomKind::Group => "group",
            RoomKind::Direct => "direct",
        }
    }
}

/// 房间。
///
/// 房间不会被物理删除，历史消息始终可查；成员集合只由房间注册表修改。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    pub name: RoomName,
    pub kind: RoomKind,
    pub members: BTreeSet<UserId>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: Timestamp,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity_at: Timestamp,
    pub last_sequence: Option<Sequence>,
}

impl Room {
    pub fn new_group(id: RoomId, name: RoomName, created_at: Timestamp) -> Self {
        Self {
            id,
            name,
            kind: RoomKind::Group,
            members: BTreeSet::new(),
            created_at,
            last_activity_at: created_at,
            last_sequence: None,
        }
    }

    pub fn new_direct(id: RoomId, a: UserId, b: UserId, created_at: Timestamp) -> Self {
        Self {
            id,
            name: RoomName::direct(a, b),
            kind: RoomKind::Direct,
            members: BTreeSet::from([a, b]),
            created_at,
            last_activity_at: created_at,
            last_sequence: None,
        }
    }

    pub fn is_member(&self, user_id: UserId) -> bool {
        self.members.contains(&user_id)
    }

    /// 返回是否新增了成员
    pub fn add_member(&mut self, user_id: UserId) -> bool {
        self.members.insert(user_id)
    }

    /// 返回是否确实移除了成员
    pub fn remove_member(&mut self, user_id: UserId) -> bool {
        self.members.remove(&user_id)
    }

    /// 记录一次追加；活动时间与序列号只前进不后退。
    pub fn record_activity(&mut self, sequence: Sequence, at: Timestamp) {
        if self.last_sequence.map_or(true, |current| sequence > current) {
            self.last_sequence = Some(sequence);
        }
        if at > self.last_activity_at {
            self.last_activity_at = at;
        }
    }

    pub fn summary(&self) -> RoomSummary {
        RoomSummary {
            id: self.id,
            name: self.name.clone(),
            kind: self.kind,
            member_count: self.members.len(),
            last_sequence: self.last_sequence,
            last_activity_at: self.last_activity_at,
        }
    }
}

/// 房间列表查询的摘要
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: RoomName,
    pub kind: RoomKind,
    pub member_count: usize,
    pub last_sequence: Option<Sequence>,
    #[serde(with = "time::serde::rfc3339")]
    pub last_activity_at: Timestamp,
}

impl RoomSummary {
    /// 列表排序：最近活动在前，活动时间相同时按房间 ID 升序。
    pub fn activity_order(a: &RoomSummary, b: &RoomSummary) -> Ordering {
        b.last_activity_at
            .cmp(&a.last_activity_at)
            .then_with(|| a.id.cmp(&b.id))
    }
}
