use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id          TEXT PRIMARY KEY,
                username    TEXT NOT NULL,
                is_admin    INTEGER NOT NULL DEFAULT 0,
                district    TEXT,
                created_at  TEXT NOT NULL
            );

            CREATE TABLE issues (
                id                   INTEGER PRIMARY KEY AUTOINCREMENT,
                title                TEXT NOT NULL,
                description          TEXT NOT NULL,
                category             TEXT NOT NULL,
                status               TEXT NOT NULL DEFAULT 'Open'
                                     CHECK (status IN ('Open', 'InProgress', 'Resolved')),
                street_address       TEXT,
                landmark_reference   TEXT,
                detailed_description TEXT,
                province             TEXT,
                district             TEXT,
                sector               TEXT,
                image_url            TEXT,
                user_id              TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                created_at           TEXT NOT NULL,
                updated_at           TEXT NOT NULL
            );

            CREATE INDEX idx_issues_status ON issues(status);
            CREATE INDEX idx_issues_category ON issues(category);
            CREATE INDEX idx_issues_district ON issues(district);
            CREATE INDEX idx_issues_created ON issues(created_at);

            CREATE TABLE votes (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                issue_id    INTEGER NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
                created_at  TEXT NOT NULL,
                CONSTRAINT unique_user_issue_vote UNIQUE (user_id, issue_id)
            );

            CREATE INDEX idx_votes_issue ON votes(issue_id);

            CREATE TABLE notifications (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                issue_id    INTEGER REFERENCES issues(id) ON DELETE CASCADE,
                title       TEXT NOT NULL,
                message     TEXT NOT NULL,
                kind        TEXT NOT NULL DEFAULT 'info',
                is_read     INTEGER NOT NULL DEFAULT 0,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_notifications_user ON notifications(user_id, created_at);

            CREATE TABLE status_history (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                issue_id    INTEGER NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
                old_status  TEXT,
                new_status  TEXT NOT NULL,
                changed_by  TEXT NOT NULL,
                comment     TEXT,
                changed_at  TEXT NOT NULL
            );

            CREATE INDEX idx_status_history_issue ON status_history(issue_id, changed_at);

            CREATE TABLE admin_comments (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                issue_id    INTEGER NOT NULL REFERENCES issues(id) ON DELETE CASCADE,
                admin_name  TEXT NOT NULL,
                comment     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );

            CREATE INDEX idx_admin_comments_issue ON admin_comments(issue_id, created_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
