// ── Atoms: Tenant-scoped ID newtypes ────────────────────────────────────────
// Every entity id is wrapped so the store layer cannot accidentally pass an
// id of the wrong kind, and so tenant-scoped queries take `ProjectId` as an
// explicit, un-skippable first parameter (a missing scope becomes a compile
// error, not a forgotten `WHERE` clause).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn parse(s: &str) -> Result<Self, uuid::Error> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(u: Uuid) -> Self {
                Self(u)
            }
        }

        impl rusqlite::ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
                Ok(rusqlite::types::ToSqlOutput::from(self.0.to_string()))
            }
        }

        impl rusqlite::types::FromSql for $name {
            fn column_result(value: rusqlite::types::ValueRef<'_>) -> rusqlite::types::FromSqlResult<Self> {
                let s = value.as_str()?;
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| rusqlite::types::FromSqlError::Other(Box::new(e)))
            }
        }
    };
}

id_newtype!(ProjectId);
id_newtype!(CollectionId);
id_newtype!(FileId);
id_newtype!(WebsiteId);
id_newtype!(WebsitePageId);
id_newtype!(QaPairId);
id_newtype!(ChunkId);
id_newtype!(EmbeddingConfigId);
id_newtype!(VisitorId);
id_newtype!(StaffId);
id_newtype!(SessionId);
id_newtype!(PlatformId);
id_newtype!(AssignmentRuleId);
id_newtype!(AssignmentHistoryId);
id_newtype!(WaitingQueueId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_string() {
        let id = ProjectId::new();
        let parsed = ProjectId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn distinct_newtypes_do_not_mix() {
        let project = ProjectId::new();
        let collection = CollectionId::new();
        assert_ne!(project.0, Uuid::nil());
        assert_ne!(collection.0, Uuid::nil());
    }
}
