//! Database schema definitions

/// SQL schema for the store
pub const SCHEMA_SQL: &str = r#"
-- Latest extracted version of every crawled page
CREATE TABLE IF NOT EXISTS documents (
    url TEXT PRIMARY KEY,
    title TEXT,
    description TEXT,
    text TEXT NOT NULL,
    links TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    rendered INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_hash ON documents(content_hash);

-- Chunk embeddings, one row per chunk of one document version
CREATE TABLE IF NOT EXISTS embeddings (
    url TEXT NOT NULL,
    content_hash TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    chunk_text TEXT NOT NULL,
    vector TEXT NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (url, content_hash, chunk_index)
);

-- Latest outcome of every job delivery
CREATE TABLE IF NOT EXISTS job_outcomes (
    job_id TEXT PRIMARY KEY,
    job_type TEXT NOT NULL,
    status TEXT NOT NULL,
    reason TEXT,
    report TEXT,
    attempts INTEGER NOT NULL DEFAULT 1,
    recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_job_outcomes_status ON job_outcomes(status);

-- Recurring crawl definitions, written by the API or the CLI
CREATE TABLE IF NOT EXISTS schedules (
    id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    website_id TEXT,
    frequency TEXT NOT NULL,
    options TEXT NOT NULL DEFAULT '{}',
    enabled INTEGER NOT NULL DEFAULT 1,
    last_dispatched_at TEXT
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
