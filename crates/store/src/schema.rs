//! 스키마 정의 및 연결 초기화

use rusqlite::Connection;

use crate::error::StoreError;

/// 전체 스키마 (멱등)
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pdi (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    category      INTEGER,
    short_title   TEXT NOT NULL DEFAULT '',
    group_title   TEXT NOT NULL DEFAULT '',
    description   TEXT NOT NULL DEFAULT '',
    check_text    TEXT NOT NULL DEFAULT '',
    fix_text      TEXT NOT NULL DEFAULT '',
    updated       TEXT
);

CREATE TABLE IF NOT EXISTS pdi_xref (
    scheme  TEXT NOT NULL,
    ext_id  TEXT NOT NULL,
    pdi_id  INTEGER NOT NULL REFERENCES pdi(id),
    PRIMARY KEY (scheme, ext_id)
);
CREATE INDEX IF NOT EXISTS idx_pdi_xref_pdi ON pdi_xref(pdi_id);

CREATE TABLE IF NOT EXISTS software (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    cpe      TEXT NOT NULL UNIQUE,
    vendor   TEXT NOT NULL DEFAULT '',
    name     TEXT NOT NULL DEFAULT '',
    version  TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS checklist (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    name     TEXT NOT NULL,
    version  TEXT NOT NULL DEFAULT '',
    release  TEXT NOT NULL DEFAULT '',
    UNIQUE (name, version, release)
);

CREATE TABLE IF NOT EXISTS checklist_pdi (
    checklist_id  INTEGER NOT NULL REFERENCES checklist(id),
    pdi_id        INTEGER NOT NULL REFERENCES pdi(id),
    PRIMARY KEY (checklist_id, pdi_id)
);

CREATE TABLE IF NOT EXISTS target (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    context_id      INTEGER NOT NULL,
    name            TEXT NOT NULL,
    os              TEXT,
    classification  TEXT,
    notes           TEXT NOT NULL DEFAULT '',
    open_ports      TEXT NOT NULL DEFAULT '',
    process_list    TEXT NOT NULL DEFAULT '',
    UNIQUE (context_id, name)
);

CREATE TABLE IF NOT EXISTS target_checklist (
    target_id     INTEGER NOT NULL REFERENCES target(id),
    checklist_id  INTEGER NOT NULL REFERENCES checklist(id),
    PRIMARY KEY (target_id, checklist_id)
);

CREATE TABLE IF NOT EXISTS target_software (
    target_id    INTEGER NOT NULL REFERENCES target(id),
    software_id  INTEGER NOT NULL REFERENCES software(id),
    PRIMARY KEY (target_id, software_id)
);

CREATE TABLE IF NOT EXISTS interface (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    target_id INTEGER NOT NULL REFERENCES target(id),
    name      TEXT NOT NULL DEFAULT '',
    ipv4      TEXT,
    ipv6      TEXT,
    hostname  TEXT,
    fqdn      TEXT,
    mac       TEXT
);
CREATE INDEX IF NOT EXISTS idx_interface_target ON interface(target_id);
CREATE INDEX IF NOT EXISTS idx_interface_ipv4 ON interface(ipv4);
CREATE INDEX IF NOT EXISTS idx_interface_hostname ON interface(hostname);

CREATE TABLE IF NOT EXISTS port (
    interface_id  INTEGER NOT NULL REFERENCES interface(id),
    proto         TEXT NOT NULL,
    port          INTEGER NOT NULL,
    service       TEXT NOT NULL DEFAULT '',
    banner        TEXT NOT NULL DEFAULT '',
    notes         TEXT NOT NULL DEFAULT '',
    listening     INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (interface_id, proto, port)
);

CREATE TABLE IF NOT EXISTS scan (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    context_id   INTEGER NOT NULL,
    source_type  TEXT NOT NULL,
    file_name    TEXT NOT NULL,
    file_date    TEXT,
    status       TEXT NOT NULL,
    host_list    TEXT NOT NULL DEFAULT '{}',
    UNIQUE (context_id, file_name)
);

CREATE TABLE IF NOT EXISTS finding (
    target_id     INTEGER NOT NULL REFERENCES target(id),
    pdi_id        INTEGER NOT NULL REFERENCES pdi(id),
    status        TEXT NOT NULL,
    cat_override  INTEGER,
    notes         TEXT NOT NULL DEFAULT '',
    iteration     INTEGER NOT NULL DEFAULT 1,
    scan_id       INTEGER NOT NULL REFERENCES scan(id),
    source        TEXT NOT NULL,
    partial       INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (target_id, pdi_id)
);
CREATE INDEX IF NOT EXISTS idx_finding_scan ON finding(scan_id);

CREATE TABLE IF NOT EXISTS job (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    context_id    INTEGER NOT NULL,
    file_name     TEXT NOT NULL,
    source_type   TEXT NOT NULL,
    pid           INTEGER,
    status        TEXT NOT NULL,
    percent       INTEGER NOT NULL DEFAULT 0,
    last_host     TEXT NOT NULL DEFAULT '',
    complete      INTEGER NOT NULL DEFAULT 0,
    message       TEXT NOT NULL DEFAULT '',
    updated_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_job_context_file ON job(context_id, file_name);
CREATE INDEX IF NOT EXISTS idx_job_context_status ON job(context_id, status);
"#;

/// 연결 pragma를 설정하고 스키마를 생성합니다.
///
/// WAL 저널과 busy timeout으로 여러 워커 프로세스의 쓰기가 직렬화됩니다.
pub fn init(conn: &Connection, busy_timeout_ms: u64) -> Result<(), StoreError> {
    conn.busy_timeout(std::time::Duration::from_millis(busy_timeout_ms))?;
    // in-memory 연결은 "memory"를 돌려주므로 결과는 확인하지 않음
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA synchronous = NORMAL;")?;
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init(&conn, 1000).unwrap();
        init(&conn, 1000).unwrap();

        let tables: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 13);
    }
}
