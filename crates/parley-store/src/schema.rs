/// SQL DDL for the parley store.
/// Connection pragmas are applied per connection by the pool customizer.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    key TEXT PRIMARY KEY,
    class_name TEXT NOT NULL,
    doc TEXT NOT NULL CHECK (json_valid(doc)),
    expires_at INTEGER
);

CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at INTEGER
);

CREATE TABLE IF NOT EXISTS sequences (
    name TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sorted_set_members (
    key TEXT NOT NULL,
    member TEXT NOT NULL,
    score INTEGER NOT NULL,
    PRIMARY KEY (key, member)
);

CREATE TABLE IF NOT EXISTS key_expirations (
    key TEXT PRIMARY KEY,
    expires_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS search_indexes (
    class_name TEXT PRIMARY KEY,
    prefix TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_documents_class ON documents(class_name);
CREATE INDEX IF NOT EXISTS idx_documents_expires ON documents(expires_at) WHERE expires_at IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_kv_expires ON kv(expires_at) WHERE expires_at IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_sorted_set_score ON sorted_set_members(key, score);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

/// Expression indexes backing owner-filtered, sorted listing of one class.
pub fn search_index_ddl(class_name: &str) -> String {
    let table_suffix = class_name.to_lowercase();
    format!(
        "CREATE INDEX IF NOT EXISTS idx_search_{table_suffix}_created ON documents(
             json_extract(doc, '$.owner'), json_extract(doc, '$.created_at.timestamp'), json_extract(doc, '$.id')
         ) WHERE class_name = '{class_name}';
         CREATE INDEX IF NOT EXISTS idx_search_{table_suffix}_updated ON documents(
             json_extract(doc, '$.owner'), json_extract(doc, '$.updated_at.timestamp'), json_extract(doc, '$.id')
         ) WHERE class_name = '{class_name}';
         CREATE INDEX IF NOT EXISTS idx_search_{table_suffix}_id ON documents(
             json_extract(doc, '$.owner'), json_extract(doc, '$.id')
         ) WHERE class_name = '{class_name}';"
    )
}
