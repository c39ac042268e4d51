pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    category TEXT NOT NULL CHECK (category IN ('algorithmic', 'design_low_level', 'design_high_level', 'miscellaneous')),
    subcategory TEXT NOT NULL,
    attachments TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);

-- Sparse per-user overlay; a missing row means 'pending'
CREATE TABLE IF NOT EXISTS progress (
    user_id INTEGER NOT NULL,
    item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'in_progress', 'done')),
    starred INTEGER NOT NULL DEFAULT 0,
    notes TEXT NOT NULL DEFAULT '',
    started_at TEXT,
    completed_at TEXT,
    updated_at TEXT NOT NULL,
    PRIMARY KEY (user_id, item_id),
    CHECK ((status = 'done') = (completed_at IS NOT NULL))
);

CREATE TABLE IF NOT EXISTS user_stats (
    user_id INTEGER PRIMARY KEY,
    completed_all_count INTEGER NOT NULL DEFAULT 0,
    current_streak INTEGER NOT NULL DEFAULT 0,
    longest_streak INTEGER NOT NULL DEFAULT 0,
    last_activity_date TEXT,
    CHECK (current_streak <= longest_streak)
);

CREATE TABLE IF NOT EXISTS session_items (
    session_id TEXT NOT NULL,
    user_id INTEGER NOT NULL,
    item_id INTEGER NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    status TEXT NOT NULL DEFAULT 'pending' CHECK (status IN ('pending', 'completed', 'abandoned')),
    created_at TEXT NOT NULL,
    resolved_at TEXT,
    PRIMARY KEY (session_id, item_id)
);

CREATE INDEX IF NOT EXISTS idx_items_category ON items(category);
CREATE INDEX IF NOT EXISTS idx_progress_user_status ON progress(user_id, status);
CREATE INDEX IF NOT EXISTS idx_session_items_user ON session_items(user_id, status);

-- Only one item in progress per user at a time
CREATE UNIQUE INDEX IF NOT EXISTS idx_one_in_progress
    ON progress(user_id) WHERE status = 'in_progress';
"#;
