// Refresh-token and passkey rows get app-side UUIDv7 ids, so ordering by primary
// key is ordering by creation time. Identity tables keep PG's gen_random_uuid().

use uuid::Uuid;

/// Timestamp-sortable id for new records.
pub fn uuidv7() -> Uuid {
    Uuid::now_v7()
}
