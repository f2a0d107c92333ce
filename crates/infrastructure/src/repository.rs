use application::{AppendOutcome, HistoryQuery, MessagePage, MessageStore, RoomRegistry};
use async_trait::async_trait;
use domain::{
    Message, MessageBody, NewMessage, RepositoryError, Room, RoomId, RoomKind, RoomName,
    RoomSummary, Sequence, Timestamp, UserId,
};
use sqlx::{postgres::PgPoolOptions, FromRow, PgPool};
use time::OffsetDateTime;
use uuid::Uuid;

const UNIQUE_VIOLATION: &str = "23505";

fn map_sqlx_err(err: sqlx::Error) -> RepositoryError {
    let unique_violation = err
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == UNIQUE_VIOLATION);
    if unique_violation {
        return RepositoryError::Conflict;
    }
    RepositoryError::storage(err.to_string())
}

fn invalid_data(message: impl Into<String>) -> RepositoryError {
    RepositoryError::storage(message)
}

fn to_db_sequence(sequence: Sequence) -> Result<i64, RepositoryError> {
    i64::try_from(sequence.value()).map_err(|_| invalid_data("sequence out of range"))
}

fn from_db_sequence(value: i64) -> Result<Sequence, RepositoryError> {
    u64::try_from(value)
        .map(Sequence::new)
        .map_err(|_| invalid_data(format!("negative sequence {value}")))
}

fn parse_kind(value: &str) -> Result<RoomKind, RepositoryError> {
    match value {
        "group" => Ok(RoomKind::Group),
        "direct" => Ok(RoomKind::Direct),
        other => Err(invalid_data(format!("unknown room kind `{other}`"))),
    }
}

#[derive(Debug, FromRow)]
struct RoomRecord {
    id: Uuid,
    name: String,
    kind: String,
    created_at: OffsetDateTime,
    last_activity_at: OffsetDateTime,
    last_sequence: Option<i64>,
    members: Vec<Uuid>,
}

impl TryFrom<RoomRecord> for Room {
    type Error = RepositoryError;

    fn try_from(value: RoomRecord) -> Result<Self, Self::Error> {
        let name = RoomName::parse(value.name).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Room {
            id: RoomId::from(value.id),
            name,
            kind: parse_kind(&value.kind)?,
            members: value.members.into_iter().map(UserId::from).collect(),
            created_at: value.created_at,
            last_activity_at: value.last_activity_at,
            last_sequence: value.last_sequence.map(from_db_sequence).transpose()?,
        })
    }
}

#[derive(Debug, FromRow)]
struct RoomSummaryRecord {
    id: Uuid,
    name: String,
    kind: String,
    member_count: i64,
    last_sequence: Option<i64>,
    last_activity_at: OffsetDateTime,
}

impl TryFrom<RoomSummaryRecord> for RoomSummary {
    type Error = RepositoryError;

    fn try_from(value: RoomSummaryRecord) -> Result<Self, Self::Error> {
        Ok(RoomSummary {
            id: RoomId::from(value.id),
            name: RoomName::parse(value.name).map_err(|err| invalid_data(err.to_string()))?,
            kind: parse_kind(&value.kind)?,
            member_count: usize::try_from(value.member_count)
                .map_err(|_| invalid_data("negative member count"))?,
            last_sequence: value.last_sequence.map(from_db_sequence).transpose()?,
            last_activity_at: value.last_activity_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct MessageRecord {
    room_id: Uuid,
    seq: i64,
    sender_id: Uuid,
    receiver_id: Option<Uuid>,
    body: String,
    sent_at: OffsetDateTime,
    client_message_id: Option<Uuid>,
}

impl TryFrom<MessageRecord> for Message {
    type Error = RepositoryError;

    fn try_from(value: MessageRecord) -> Result<Self, Self::Error> {
        let body = MessageBody::new(value.body).map_err(|err| invalid_data(err.to_string()))?;
        Ok(Message {
            id: from_db_sequence(value.seq)?,
            room_id: RoomId::from(value.room_id),
            sender_id: UserId::from(value.sender_id),
            receiver_id: value.receiver_id.map(UserId::from),
            body,
            sent_at: value.sent_at,
            client_message_id: value.client_message_id,
        })
    }
}

const ROOM_SELECT: &str = r#"
    SELECT r.id, r.name, r.kind, r.created_at, r.last_activity_at, r.last_sequence,
           COALESCE(
               array_agg(m.user_id ORDER BY m.user_id) FILTER (WHERE m.user_id IS NOT NULL),
               '{}'::uuid[]
           ) AS members
    FROM rooms r
    LEFT JOIN room_members m ON m.room_id = r.id
"#;

const MESSAGE_COLUMNS: &str =
    "room_id, seq, sender_id, receiver_id, body, sent_at, client_message_id";

#[derive(Clone)]
pub struct PgRoomRegistry {
    pool: PgPool,
}

impl PgRoomRegistry {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn room_exists(&self, room_id: RoomId) -> Result<bool, RepositoryError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM rooms WHERE id = $1)")
            .bind(Uuid::from(room_id))
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_err)
    }

    /// 在一个事务里写入房间与初始成员；名称已存在时返回 false
    async fn insert_room(&self, room: &Room) -> Result<bool, RepositoryError> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO rooms (id, name, kind, created_at, last_activity_at, last_sequence)
            VALUES ($1, $2, $3, $4, $5, NULL)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(Uuid::from(room.id))
        .bind(room.name.as_str())
        .bind(room.kind.as_str())
        .bind(room.created_at)
        .bind(room.last_activity_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_err)?
        .rows_affected()
            == 1;

        if !inserted {
            tx.rollback().await.map_err(map_sqlx_err)?;
            return Ok(false);
        }

        for member in &room.members {
            sqlx::query(
                "INSERT INTO room_members (room_id, user_id, joined_at) VALUES ($1, $2, $3)",
            )
            .bind(Uuid::from(room.id))
            .bind(Uuid::from(*member))
            .bind(room.created_at)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;
        }

        tx.commit().await.map_err(map_sqlx_err)?;
        Ok(true)
    }
}

#[async_trait]
impl RoomRegistry for PgRoomRegistry {
    async fn create_room(&self, room: Room) -> Result<Room, RepositoryError> {
        if !self.insert_room(&room).await? {
            return Err(RepositoryError::Conflict);
        }
        Ok(room)
    }

    async fn find_by_id(&self, id: RoomId) -> Result<Option<Room>, RepositoryError> {
        let query = format!("{ROOM_SELECT} WHERE r.id = $1 GROUP BY r.id");
        let record = sqlx::query_as::<_, RoomRecord>(&query)
            .bind(Uuid::from(id))
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        record.map(Room::try_from).transpose()
    }

    async fn find_by_name(&self, name: &RoomName) -> Result<Option<Room>, RepositoryError> {
        let query = format!("{ROOM_SELECT} WHERE r.name = $1 GROUP BY r.id");
        let record = sqlx::query_as::<_, RoomRecord>(&query)
            .bind(name.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_err)?;
        record.map(Room::try_from).transpose()
    }

    async fn get_or_create_direct(&self, room: Room) -> Result<Room, RepositoryError> {
        if room.kind != RoomKind::Direct {
            return Err(invalid_data("expected a direct room"));
        }
        // 并发创建时 ON CONFLICT 会等待另一方提交，随后统一按名称读取
        if self.insert_room(&room).await? {
            tracing::debug!(room_id = %room.id, room_name = %room.name, "创建直连房间");
        }
        self.find_by_name(&room.name)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    async fn ensure_membership(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO room_members (room_id, user_id)
            SELECT id, $2 FROM rooms WHERE id = $1
            ON CONFLICT (room_id, user_id) DO NOTHING
            "#,
        )
        .bind(Uuid::from(room_id))
        .bind(Uuid::from(user_id))
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .rows_affected();

        if inserted == 0 && !self.room_exists(room_id).await? {
            return Err(RepositoryError::NotFound);
        }
        Ok(inserted == 1)
    }

    async fn remove_membership(
        &self,
        room_id: RoomId,
        user_id: UserId,
    ) -> Result<bool, RepositoryError> {
        let removed = sqlx::query("DELETE FROM room_members WHERE room_id = $1 AND user_id = $2")
            .bind(Uuid::from(room_id))
            .bind(Uuid::from(user_id))
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_err)?
            .rows_affected();

        if removed == 0 && !self.room_exists(room_id).await? {
            return Err(RepositoryError::NotFound);
        }
        Ok(removed == 1)
    }

    async fn record_activity(
        &self,
        room_id: RoomId,
        sequence: Sequence,
        at: Timestamp,
    ) -> Result<(), RepositoryError> {
        let updated = sqlx::query(
            r#"
            UPDATE rooms
            SET last_sequence = GREATEST(COALESCE(last_sequence, 0), $2),
                last_activity_at = GREATEST(last_activity_at, $3)
            WHERE id = $1
            "#,
        )
        .bind(Uuid::from(room_id))
        .bind(to_db_sequence(sequence)?)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_err)?
        .rows_affected();

        if updated == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn list_rooms_for(&self, user_id: UserId) -> Result<Vec<RoomSummary>, RepositoryError> {
        let records = sqlx::query_as::<_, RoomSummaryRecord>(
            r#"
            SELECT r.id, r.name, r.kind, r.last_sequence, r.last_activity_at,
                   (SELECT COUNT(*) FROM room_members c WHERE c.room_id = r.id) AS member_count
            FROM rooms r
            JOIN room_members m ON m.room_id = r.id
            WHERE m.user_id = $1
            ORDER BY r.last_activity_at DESC, r.id ASC
            "#,
        )
        .bind(Uuid::from(user_id))
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_err)?;

        records.into_iter().map(RoomSummary::try_from).collect()
    }
}

#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn append(&self, message: NewMessage) -> Result<AppendOutcome, RepositoryError> {
        let room_id = Uuid::from(message.room_id);
        let mut tx = self.pool.begin().await.map_err(map_sqlx_err)?;

        // 房间行锁让同一房间的序列号分配串行化，不同房间互不影响
        let last_sequence: Option<Option<i64>> =
            sqlx::query_scalar("SELECT last_sequence FROM rooms WHERE id = $1 FOR UPDATE")
                .bind(room_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
        let Some(last_sequence) = last_sequence else {
            return Err(RepositoryError::NotFound);
        };

        if let Some(client_message_id) = message.client_message_id {
            let query = format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages \
                 WHERE room_id = $1 AND sender_id = $2 AND client_message_id = $3"
            );
            let existing = sqlx::query_as::<_, MessageRecord>(&query)
                .bind(room_id)
                .bind(Uuid::from(message.sender_id))
                .bind(client_message_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(map_sqlx_err)?;
            if let Some(record) = existing {
                tx.rollback().await.map_err(map_sqlx_err)?;
                return Ok(AppendOutcome {
                    message: Message::try_from(record)?,
                    created: false,
                });
            }
        }

        let sequence = Sequence::after(last_sequence.map(from_db_sequence).transpose()?);
        let seq = to_db_sequence(sequence)?;

        let query = format!(
            "INSERT INTO messages ({MESSAGE_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {MESSAGE_COLUMNS}"
        );
        let record = sqlx::query_as::<_, MessageRecord>(&query)
            .bind(room_id)
            .bind(seq)
            .bind(Uuid::from(message.sender_id))
            .bind(message.receiver_id.map(Uuid::from))
            .bind(message.body.as_str())
            .bind(message.sent_at)
            .bind(message.client_message_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        sqlx::query("UPDATE rooms SET last_sequence = $2 WHERE id = $1")
            .bind(room_id)
            .bind(seq)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_err)?;

        tx.commit().await.map_err(map_sqlx_err)?;

        Ok(AppendOutcome {
            message: Message::try_from(record)?,
            created: true,
        })
    }

    async fn list_messages(
        &self,
        room_id: RoomId,
        query: HistoryQuery,
    ) -> Result<MessagePage, RepositoryError> {
        let after = query.after.map(to_db_sequence).transpose()?.unwrap_or(0);
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages \
             WHERE room_id = $1 AND seq > $2 ORDER BY seq ASC LIMIT $3"
        );
        let records = sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(Uuid::from(room_id))
            .bind(after)
            .bind(i64::from(query.limit) + 1)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?;

        let messages = records
            .into_iter()
            .map(Message::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MessagePage::from_overfetch(messages, query.limit))
    }

    async fn list_all(&self, room_id: RoomId) -> Result<Vec<Message>, RepositoryError> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages WHERE room_id = $1 ORDER BY seq ASC"
        );
        sqlx::query_as::<_, MessageRecord>(&sql)
            .bind(Uuid::from(room_id))
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx_err)?
            .into_iter()
            .map(Message::try_from)
            .collect()
    }
}

pub async fn create_pg_pool(
    database_url: &str,
    max_connections: u32,
) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}
