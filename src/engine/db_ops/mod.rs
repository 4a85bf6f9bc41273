//! Database operations: schema, open, profile/checkpoint/match storage.

mod connection;
mod profiles;

pub use connection::{open_db, open_db_in_memory};
pub use profiles::ProfileStore;

/// WAL tuning pragmas (synchronous, autocheckpoint, size limit). Use after PRAGMA journal_mode = WAL.
pub(crate) const WAL_PRAGMAS: &str = r#"
        PRAGMA synchronous = NORMAL;
        PRAGMA wal_autocheckpoint = 10000;
        PRAGMA journal_size_limit = 67108864;
        "#;

/// Insert statement for matches; re-recording a match is a no-op.
pub(crate) const INSERT_MATCH_SQL: &str =
    "INSERT OR IGNORE INTO matches (profile_id, seed, star_index) VALUES (?1, ?2, ?3)";

/// Schema for profiles, their checkpoint and their matches.
pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS progress (
    profile_id TEXT PRIMARY KEY REFERENCES profiles(id) ON DELETE CASCADE,
    start_seed INTEGER NOT NULL,
    end_seed INTEGER NOT NULL,
    current_seed INTEGER NOT NULL,
    found INTEGER NOT NULL DEFAULT 0,
    concurrency INTEGER NOT NULL,
    autosave REAL NOT NULL,
    star_count INTEGER NOT NULL,
    resource_multiplier REAL NOT NULL,
    rule TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS matches (
    profile_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
    seed INTEGER NOT NULL,
    star_index INTEGER NOT NULL,
    PRIMARY KEY (profile_id, seed, star_index)
);
"#;
