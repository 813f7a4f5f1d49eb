//! Idempotent schema migrations.
//!
//! Every statement is `CREATE … IF NOT EXISTS` and each migration runs
//! independently: the parent process applies parts of the same schema on its
//! side, so a collision in one migration (a table that already exists with a
//! compatible shape) must not block the rest.

use tracing::{info, warn};

use super::DbPool;
use crate::Result;

const MIGRATION_0001_INITIAL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    chat_id INTEGER PRIMARY KEY,
    username TEXT,
    first_seen DATETIME DEFAULT CURRENT_TIMESTAMP,
    is_admin BOOLEAN DEFAULT FALSE,
    last_activity DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    chat_id INTEGER NOT NULL,
    task_type TEXT NOT NULL,
    url TEXT NOT NULL,
    label TEXT,
    status TEXT DEFAULT 'queued',
    progress INTEGER DEFAULT 0,
    file_path TEXT,
    file_url TEXT,
    scheduled_at DATETIME,
    started_at DATETIME,
    finished_at DATETIME,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    error_msg TEXT,
    FOREIGN KEY (chat_id) REFERENCES users(chat_id)
);

CREATE TABLE IF NOT EXISTS sessions (
    token TEXT PRIMARY KEY,
    chat_id INTEGER NOT NULL,
    expires_at DATETIME NOT NULL,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (chat_id) REFERENCES users(chat_id)
);

CREATE TABLE IF NOT EXISTS config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_chat_id ON tasks(chat_id);
CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);
CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at);
"#;

const MIGRATION_0002_MEDIA_TASKS: &str = r#"
CREATE TABLE IF NOT EXISTS media_tasks (
    task_id TEXT PRIMARY KEY,
    user_chat_id INTEGER NOT NULL,
    task_type TEXT NOT NULL,
    url TEXT NOT NULL,
    status TEXT DEFAULT 'pending',
    progress_percent INTEGER DEFAULT 0,
    current_speed TEXT,
    eta_seconds INTEGER,
    result_file_path TEXT,
    file_size_bytes BIGINT,
    error_code TEXT,
    error_message TEXT,
    retry_count INTEGER DEFAULT 0,
    started_at DATETIME,
    finished_at DATETIME,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (user_chat_id) REFERENCES users(chat_id)
);

CREATE TABLE IF NOT EXISTS task_progress_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL,
    timestamp DATETIME DEFAULT CURRENT_TIMESTAMP,
    percent INTEGER,
    speed_mbps REAL,
    eta_seconds INTEGER,
    FOREIGN KEY (task_id) REFERENCES media_tasks(task_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS playlists (
    playlist_id TEXT PRIMARY KEY,
    user_chat_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    url TEXT,
    total_tracks INTEGER,
    downloaded_tracks INTEGER DEFAULT 0,
    status TEXT DEFAULT 'pending',
    folder_path TEXT,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (user_chat_id) REFERENCES users(chat_id)
);

CREATE INDEX IF NOT EXISTS idx_media_tasks_chat_id ON media_tasks(user_chat_id);
CREATE INDEX IF NOT EXISTS idx_media_tasks_status ON media_tasks(status);
CREATE INDEX IF NOT EXISTS idx_playlists_chat_id ON playlists(user_chat_id);
"#;

const MIGRATION_0003_USER_PREFERENCES: &str = r#"
CREATE TABLE IF NOT EXISTS user_preferences (
    chat_id INTEGER PRIMARY KEY,
    audio_format TEXT DEFAULT 'mp3',
    audio_quality TEXT DEFAULT '192',
    create_archives BOOLEAN DEFAULT TRUE,
    archive_max_size_mb INTEGER DEFAULT 100,
    auto_delete_original_files BOOLEAN DEFAULT FALSE,
    language TEXT DEFAULT 'en',
    timezone TEXT DEFAULT 'UTC',
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (chat_id) REFERENCES users(chat_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS download_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_chat_id INTEGER NOT NULL,
    title TEXT NOT NULL,
    url TEXT NOT NULL,
    file_path TEXT,
    file_size_bytes BIGINT,
    duration_seconds INTEGER,
    source TEXT,
    downloaded_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    is_favorite BOOLEAN DEFAULT FALSE,
    FOREIGN KEY (user_chat_id) REFERENCES users(chat_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS favorite_playlists (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_chat_id INTEGER NOT NULL,
    playlist_url TEXT NOT NULL,
    playlist_name TEXT NOT NULL,
    playlist_id TEXT,
    added_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    UNIQUE(user_chat_id, playlist_url),
    FOREIGN KEY (user_chat_id) REFERENCES users(chat_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_download_history_chat_id ON download_history(user_chat_id);
CREATE INDEX IF NOT EXISTS idx_download_history_favorite ON download_history(is_favorite);
CREATE INDEX IF NOT EXISTS idx_favorite_playlists_chat_id ON favorite_playlists(user_chat_id);
"#;

const MIGRATION_0004_CACHE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS youtube_metadata_cache (
    video_id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    uploader TEXT,
    duration_seconds INTEGER,
    thumbnail_url TEXT,
    is_age_restricted BOOLEAN DEFAULT FALSE,
    is_playlist BOOLEAN DEFAULT FALSE,
    is_private BOOLEAN DEFAULT FALSE,
    fetched_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    expires_at DATETIME,
    access_count INTEGER DEFAULT 0,
    last_accessed DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS search_cache (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    query TEXT NOT NULL,
    query_hash TEXT NOT NULL UNIQUE,
    results_json TEXT NOT NULL,
    cached_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    expires_at DATETIME,
    access_count INTEGER DEFAULT 0,
    last_accessed DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS cookie_management (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    cookie_file_path TEXT NOT NULL,
    source TEXT,
    is_valid BOOLEAN DEFAULT TRUE,
    validation_error TEXT,
    expires_at DATETIME,
    last_validated DATETIME,
    validation_count INTEGER DEFAULT 0,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_youtube_metadata_expires_at ON youtube_metadata_cache(expires_at);
CREATE INDEX IF NOT EXISTS idx_search_cache_expires_at ON search_cache(expires_at);
"#;

const MIGRATION_0005_RATE_LIMITING: &str = r#"
CREATE TABLE IF NOT EXISTS rate_limits (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_chat_id INTEGER NOT NULL,
    action TEXT NOT NULL,
    attempt_count INTEGER DEFAULT 1,
    window_start DATETIME DEFAULT CURRENT_TIMESTAMP,
    window_end DATETIME,
    UNIQUE(user_chat_id, action),
    FOREIGN KEY (user_chat_id) REFERENCES users(chat_id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS api_usage_stats (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_chat_id INTEGER NOT NULL,
    action TEXT NOT NULL,
    execution_time_ms INTEGER,
    success BOOLEAN DEFAULT TRUE,
    error_code TEXT,
    recorded_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    FOREIGN KEY (user_chat_id) REFERENCES users(chat_id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_rate_limits_chat_id ON rate_limits(user_chat_id);
CREATE INDEX IF NOT EXISTS idx_api_usage_stats_chat_id ON api_usage_stats(user_chat_id);
"#;

const MIGRATION_0006_DEDUP_STORAGE: &str = r#"
CREATE TABLE IF NOT EXISTS file_storage (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_hash_sha1 TEXT NOT NULL UNIQUE,
    physical_path TEXT NOT NULL,
    file_size_bytes BIGINT NOT NULL,
    file_extension TEXT,
    youtube_url TEXT,
    title TEXT,
    is_protected BOOLEAN DEFAULT FALSE,
    downloaded_at DATETIME DEFAULT CURRENT_TIMESTAMP,
    access_count INTEGER DEFAULT 1,
    last_accessed_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS user_symlinks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_chat_id INTEGER NOT NULL,
    file_hash_sha1 TEXT NOT NULL,
    symlink_path TEXT NOT NULL UNIQUE,
    is_protected BOOLEAN DEFAULT FALSE,
    created_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS dedup_user_preferences (
    chat_id INTEGER PRIMARY KEY,
    dedup_enabled BOOLEAN DEFAULT TRUE,
    updated_at DATETIME DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS dedup_file_metadata (
    file_hash_sha1 TEXT PRIMARY KEY,
    corruption_checks INTEGER DEFAULT 0,
    last_checked_at DATETIME
);

CREATE INDEX IF NOT EXISTS idx_file_storage_hash ON file_storage(file_hash_sha1);
CREATE INDEX IF NOT EXISTS idx_file_storage_youtube_url ON file_storage(youtube_url);
CREATE INDEX IF NOT EXISTS idx_user_symlinks_hash ON user_symlinks(file_hash_sha1);
CREATE INDEX IF NOT EXISTS idx_user_symlinks_chat_id ON user_symlinks(user_chat_id);
"#;

const MIGRATION_0007_FILE_CACHE: &str = r#"
CREATE TABLE IF NOT EXISTS file_cache (
    file_hash_sha256 TEXT PRIMARY KEY,
    file_path TEXT NOT NULL,
    channel_msg_id BIGINT NOT NULL,
    file_size_bytes BIGINT,
    cached_at DATETIME DEFAULT CURRENT_TIMESTAMP
);
"#;

/// All migrations, in application order.
const MIGRATIONS: &[(&str, &str)] = &[
    ("0001_initial", MIGRATION_0001_INITIAL),
    ("0002_media_tasks", MIGRATION_0002_MEDIA_TASKS),
    ("0003_user_preferences", MIGRATION_0003_USER_PREFERENCES),
    ("0004_cache_tables", MIGRATION_0004_CACHE_TABLES),
    ("0005_rate_limiting", MIGRATION_0005_RATE_LIMITING),
    ("0006_dedup_storage", MIGRATION_0006_DEDUP_STORAGE),
    ("0007_file_cache", MIGRATION_0007_FILE_CACHE),
];

/// Run all migrations. Safe to call any number of times.
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    let mut skipped = 0u32;

    for (name, sql) in MIGRATIONS {
        match sqlx::raw_sql(sql).execute(pool).await {
            Ok(_) => {}
            Err(e) => {
                // A peer process may have created some tables with a
                // divergent shape; the remaining migrations still apply.
                skipped += 1;
                warn!(migration = name, error = %e, "migration skipped");
            }
        }
    }

    if skipped == 0 {
        info!("database migrations completed");
    } else {
        info!(skipped, "database migrations completed with skips");
    }
    Ok(())
}
