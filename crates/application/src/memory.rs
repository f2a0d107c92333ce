//! 内存实现的房间注册表与消息存储
//!
//! 用于开发环境与测试。每个房间一个独立的日志锁：同一房间的追加串行化，
//! 不同房间之间互不阻塞。

use std::{
    collections::{BTreeSet, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use domain::{
    Message, NewMessage, RepositoryError, Room, RoomId, RoomKind, RoomName, RoomSummary, Sequence,
    Timestamp, UserId,
};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::repository::{AppendOutcome, HistoryQuery, MessagePage, MessageStore, RoomRegistry};

#[derive(Default)]
struct RegistryState {
    rooms: HashMap<RoomId, Room>,
    by_name: HashMap<RoomName, RoomId>,
    user_rooms: HashMap<UserId, BTreeSet<RoomId>>,
}

impl RegistryState {
    fn insert(&mut self, room: Room) {
        for member in &room.members {
            self.user_rooms.entry(*member).or_default().insert(room.id);
        }
        self.by_name.insert(room.name.clone(), room.id);
        self.rooms.insert(room.id, room);
    }
}

#[derive(Default)]
pub struct InMemoryRoomRegistry {
    state: RwLock<RegistryState>,
}

impl InMemoryRoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, room_id: RoomId) -> bool {
        self.state.read().await.rooms.contains_key(&room_id)
    }
}

#[async_trait]
impl RoomRegistry for InMemoryRoomRegistry {
    async fn create_room(&self, room: Room) -> Result<Room, RepositoryError> {
        let mut state = self.state.write().await;
        if state.by_name.contains_key(&room.name) {
            return Err(RepositoryError::Conflict);
        }
        state.insert(room.clone());
        Ok(room)
    }

    async fn find_by_id(&self, id: RoomId) -> Result<Option<Room>, RepositoryError> {
        Ok(self.state.read().await.rooms.get(&id).cloned())
    }

    async fn find_by_name(&self, name: &RoomName) -> Result<Option<Room>, RepositoryError> {
        let state = self.state.read().await;
        Ok(state
            .by_name
            .get(name)
            .and_then(|id| state.rooms.get(id))
            .cloned())
    }

    async fn get_or_create_direct(&self, room: Room) -> Result<Room, RepositoryError> {
        if room.kind != RoomKind::Direct {
            return Err(RepositoryError::storage("expected a direct room"));
        }
        let mut state = self.state.write().await;
        if let Some(existing) = state.by_name.get(&room.name).and_then(|id| state.rooms.get(id)) {
            return Ok(existing.clone());
        }
        state.insert(room.clone());
        Ok(room)
    }

    async fn ensure_membership(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let room = state
            .rooms
            .get_mut(&room_id)
            .ok_or(RepositoryError::NotFound)?;
        let added = room.add_member(user_id);
        if added {
            state.user_rooms.entry(user_id).or_default().insert(room_id);
        }
        Ok(added)
    }

    async fn remove_membership(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        let mut state = self.state.write().await;
        let room = state
            .rooms
            .get_mut(&room_id)
            .ok_or(RepositoryError::NotFound)?;
        let removed = room.remove_member(user_id);
        if removed {
            if let Some(rooms) = state.user_rooms.get_mut(&user_id) {
                rooms.remove(&room_id);
                if rooms.is_empty() {
                    state.user_rooms.remove(&user_id);
                }
            }
        }
        Ok(removed)
    }

    async fn record_activity(
        &self,
        room_id: RoomId,
        sequence: Sequence,
        at: Timestamp,
    ) -> Result<(), RepositoryError> {
        let mut state = self.state.write().await;
        let room = state
            .rooms
            .get_mut(&room_id)
            .ok_or(RepositoryError::NotFound)?;
        room.record_activity(sequence, at);
        Ok(())
    }

    async fn list_rooms_for(&self, user_id: UserId) -> Result<Vec<RoomSummary>, RepositoryError> {
        let state = self.state.read().await;
        let mut summaries: Vec<RoomSummary> = state
            .user_rooms
            .get(&user_id)
            .into_iter()
            .flatten()
            .filter_map(|id| state.rooms.get(id))
            .map(Room::summary)
            .collect();
        summaries.sort_by(RoomSummary::activity_order);
        Ok(summaries)
    }
}

#[derive(Default)]
struct RoomLog {
    messages: Vec<Message>,
    by_client_id: HashMap<(UserId, Uuid), Sequence>,
}

impl RoomLog {
    fn get(&self, sequence: Sequence) -> Option<&Message> {
        // 序列号从 1 开始且连续，直接按下标定位
        let index = usize::try_from(sequence.value()).ok()?.checked_sub(1)?;
        self.messages.get(index)
    }

    fn last_sequence(&self) -> Option<Sequence> {
        self.messages.last().map(|message| message.id)
    }
}

/// 消息日志只为注册表中存在的房间创建
pub struct InMemoryMessageStore {
    rooms: Arc<InMemoryRoomRegistry>,
    logs: RwLock<HashMap<RoomId, Arc<Mutex<RoomLog>>>>,
}

impl InMemoryMessageStore {
    pub fn new(rooms: Arc<InMemoryRoomRegistry>) -> Self {
        Self {
            rooms,
            logs: RwLock::new(HashMap::new()),
        }
    }

    async fn log_for(&self, room_id: RoomId) -> Arc<Mutex<RoomLog>> {
        if let Some(log) = self.logs.read().await.get(&room_id) {
            return log.clone();
        }
        self.logs
            .write()
            .await
            .entry(room_id)
            .or_default()
            .clone()
    }

    async fn existing_log(&self, room_id: RoomId) -> Option<Arc<Mutex<RoomLog>>> {
        self.logs.read().await.get(&room_id).cloned()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn append(&self, message: NewMessage) -> Result<AppendOutcome, RepositoryError> {
        if !self.rooms.contains(message.room_id).await {
            return Err(RepositoryError::NotFound);
        }
        let log = self.log_for(message.room_id).await;
        let mut log = log.lock().await;

        let dedupe_key = message
            .client_message_id
            .map(|client_id| (message.sender_id, client_id));

        if let Some(key) = dedupe_key {
            if let Some(existing) = log.by_client_id.get(&key).and_then(|seq| log.get(*seq)) {
                return Ok(AppendOutcome {
                    message: existing.clone(),
                    created: false,
                });
            }
        }

        let sequence = Sequence::after(log.last_sequence());
        let stored = message.into_message(sequence);
        if let Some(key) = dedupe_key {
            log.by_client_id.insert(key, sequence);
        }
        log.messages.push(stored.clone());

        Ok(AppendOutcome {
            message: stored,
            created: true,
        })
    }

    async fn list_messages(
        &self,
        room_id: RoomId,
        query: HistoryQuery,
    ) -> Result<MessagePage, RepositoryError> {
        let Some(log) = self.existing_log(room_id).await else {
            return Ok(MessagePage::from_overfetch(Vec::new(), query.limit));
        };
        let log = log.lock().await;

        let start = query.after.map_or(0, |after| after.value() as usize);
        let messages = log
            .messages
            .iter()
            .skip(start)
            .take(query.limit as usize + 1)
            .cloned()
            .collect();
        Ok(MessagePage::from_overfetch(messages, query.limit))
    }

    async fn list_all(&self, room_id: RoomId) -> Result<Vec<Message>, RepositoryError> {
        match self.existing_log(room_id).await {
            Some(log) => Ok(log.lock().await.messages.clone()),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::MessageBody;
    use time::{Duration, OffsetDateTime};

    fn user() -> UserId {
        UserId::from(Uuid::new_v4())
    }

    fn new_message(room_id: RoomId, sender_id: UserId, body: &str) -> NewMessage {
        NewMessage {
            room_id,
            sender_id,
            receiver_id: None,
            body: MessageBody::new(body).unwrap(),
            sent_at: OffsetDateTime::UNIX_EPOCH,
            client_message_id: None,
        }
    }

    fn group(name: &str) -> Room {
        Room::new_group(
            RoomId::from(Uuid::new_v4()),
            RoomName::parse(name).unwrap(),
            OffsetDateTime::UNIX_EPOCH,
        )
    }

    /// 注册若干房间，返回共享该注册表的消息存储
    async fn store_with_rooms(count: usize) -> (InMemoryMessageStore, Vec<RoomId>) {
        let registry = Arc::new(InMemoryRoomRegistry::new());
        let mut room_ids = Vec::with_capacity(count);
        for i in 0..count {
            let room = registry.create_room(group(&format!("room-{i}"))).await.unwrap();
            room_ids.push(room.id);
        }
        (InMemoryMessageStore::new(registry), room_ids)
    }

    #[tokio::test]
    async fn sequences_start_at_one_per_room() {
        let (store, rooms) = store_with_rooms(2).await;
        let (first_room, second_room) = (rooms[0], rooms[1]);
        let sender = user();

        let a = store.append(new_message(first_room, sender, "a")).await.unwrap();
        let b = store.append(new_message(first_room, sender, "b")).await.unwrap();
        let c = store.append(new_message(second_room, sender, "c")).await.unwrap();

        assert_eq!(a.message.id, Sequence::new(1));
        assert_eq!(b.message.id, Sequence::new(2));
        assert_eq!(c.message.id, Sequence::new(1));
        assert!(a.created && b.created && c.created);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_appends_get_contiguous_sequences() {
        let (store, rooms) = store_with_rooms(1).await;
        let store = Arc::new(store);
        let room_id = rooms[0];

        let tasks = (0..50).map(|i| {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .append(new_message(room_id, user(), &format!("m{i}")))
                    .await
                    .unwrap()
            })
        });
        let mut ids: Vec<u64> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|outcome| outcome.unwrap().message.id.value())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=50).collect::<Vec<_>>());

        let all = store.list_all(room_id).await.unwrap();
        assert!(all.windows(2).all(|pair| pair[0].id < pair[1].id));
    }

    #[tokio::test]
    async fn retry_with_same_client_id_returns_stored_message() {
        let (store, rooms) = store_with_rooms(1).await;
        let room_id = rooms[0];
        let sender = user();
        let client_id = Uuid::new_v4();

        let mut message = new_message(room_id, sender, "hello");
        message.client_message_id = Some(client_id);

        let first = store.append(message.clone()).await.unwrap();
        let retry = store.append(message).await.unwrap();
        assert!(first.created);
        assert!(!retry.created);
        assert_eq!(first.message, retry.message);
        assert_eq!(store.list_all(room_id).await.unwrap().len(), 1);

        // 不同发送者使用相同的 client id 互不影响
        let mut other = new_message(room_id, user(), "hello");
        other.client_message_id = Some(client_id);
        assert!(store.append(other).await.unwrap().created);
    }

    #[tokio::test]
    async fn pagination_follows_the_cursor() {
        let (store, rooms) = store_with_rooms(1).await;
        let room_id = rooms[0];
        let sender = user();
        for i in 0..5 {
            store
                .append(new_message(room_id, sender, &format!("m{i}")))
                .await
                .unwrap();
        }

        let first = store
            .list_messages(room_id, HistoryQuery { after: None, limit: 2 })
            .await
            .unwrap();
        assert_eq!(first.messages.len(), 2);
        assert_eq!(first.next_cursor, Some(Sequence::new(2)));

        let second = store
            .list_messages(room_id, HistoryQuery { after: first.next_cursor, limit: 2 })
            .await
            .unwrap();
        assert_eq!(second.messages[0].id, Sequence::new(3));
        assert_eq!(second.next_cursor, Some(Sequence::new(4)));

        let last = store
            .list_messages(room_id, HistoryQuery { after: second.next_cursor, limit: 2 })
            .await
            .unwrap();
        assert_eq!(last.messages.len(), 1);
        assert_eq!(last.next_cursor, None);
    }

    #[tokio::test]
    async fn unknown_room_has_empty_history() {
        let (store, _) = store_with_rooms(0).await;
        let room_id = RoomId::from(Uuid::new_v4());
        assert!(store.list_all(room_id).await.unwrap().is_empty());
        let page = store
            .list_messages(room_id, HistoryQuery { after: None, limit: 10 })
            .await
            .unwrap();
        assert!(page.messages.is_empty());
        assert_eq!(page.next_cursor, None);
    }

    #[tokio::test]
    async fn append_to_unregistered_room_is_not_found() {
        let (store, _) = store_with_rooms(0).await;
        let room_id = RoomId::from(Uuid::new_v4());

        let err = store
            .append(new_message(room_id, user(), "nowhere"))
            .await
            .unwrap_err();
        assert_eq!(err, RepositoryError::NotFound);
        assert!(store.list_all(room_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cursor_neither_skips_nor_repeats_when_messages_arrive_between_pages() {
        let (store, rooms) = store_with_rooms(1).await;
        let room_id = rooms[0];
        let sender = user();
        for i in 0..3 {
            store
                .append(new_message(room_id, sender, &format!("before-{i}")))
                .await
                .unwrap();
        }

        let first = store
            .list_messages(room_id, HistoryQuery { after: None, limit: 2 })
            .await
            .unwrap();
        let mut seen: Vec<u64> = first.messages.iter().map(|m| m.id.value()).collect();

        for i in 0..4 {
            store
                .append(new_message(room_id, sender, &format!("after-{i}")))
                .await
                .unwrap();
        }

        let mut cursor = first.next_cursor;
        while let Some(after) = cursor {
            let page = store
                .list_messages(room_id, HistoryQuery { after: Some(after), limit: 2 })
                .await
                .unwrap();
            seen.extend(page.messages.iter().map(|m| m.id.value()));
            cursor = page.next_cursor;
        }
        assert_eq!(seen, (1..=7).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn duplicate_room_name_conflicts() {
        let registry = InMemoryRoomRegistry::new();
        registry.create_room(group("general")).await.unwrap();
        let err = registry.create_room(group("general")).await.unwrap_err();
        assert_eq!(err, RepositoryError::Conflict);
    }

    #[tokio::test]
    async fn direct_room_is_created_once() {
        let registry = InMemoryRoomRegistry::new();
        let (a, b) = (user(), user());
        let at = OffsetDateTime::UNIX_EPOCH;

        let first = registry
            .get_or_create_direct(Room::new_direct(RoomId::from(Uuid::new_v4()), a, b, at))
            .await
            .unwrap();
        let second = registry
            .get_or_create_direct(Room::new_direct(RoomId::from(Uuid::new_v4()), b, a, at))
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(registry.list_rooms_for(a).await.unwrap().len(), 1);
        assert_eq!(registry.list_rooms_for(b).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn user_without_rooms_gets_empty_list() {
        let registry = InMemoryRoomRegistry::new();
        registry.create_room(group("general")).await.unwrap();
        assert!(registry.list_rooms_for(user()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rooms_are_listed_by_recent_activity() {
        let registry = InMemoryRoomRegistry::new();
        let me = user();
        let start = OffsetDateTime::UNIX_EPOCH;

        let quiet = registry.create_room(group("quiet")).await.unwrap();
        let busy = registry.create_room(group("busy")).await.unwrap();
        registry.ensure_membership(quiet.id, me).await.unwrap();
        registry.ensure_membership(busy.id, me).await.unwrap();

        registry
            .record_activity(busy.id, Sequence::new(3), start + Duration::seconds(30))
            .await
            .unwrap();
        registry
            .record_activity(quiet.id, Sequence::new(1), start + Duration::seconds(10))
            .await
            .unwrap();

        let names: Vec<_> = registry
            .list_rooms_for(me)
            .await
            .unwrap()
            .into_iter()
            .map(|summary| summary.name.to_string())
            .collect();
        assert_eq!(names, ["busy", "quiet"]);
    }

    #[tokio::test]
    async fn membership_changes_update_the_index() {
        let registry = InMemoryRoomRegistry::new();
        let me = user();
        let room = registry.create_room(group("general")).await.unwrap();

        assert!(registry.ensure_membership(room.id, me).await.unwrap());
        assert!(!registry.ensure_membership(room.id, me).await.unwrap());
        assert_eq!(registry.list_rooms_for(me).await.unwrap().len(), 1);

        assert!(registry.remove_membership(room.id, me).await.unwrap());
        assert!(!registry.remove_membership(room.id, me).await.unwrap());
        assert!(registry.list_rooms_for(me).await.unwrap().is_empty());

        let missing = RoomId::from(Uuid::new_v4());
        assert_eq!(
            registry.ensure_membership(missing, me).await.unwrap_err(),
            RepositoryError::NotFound
        );
    }
}
