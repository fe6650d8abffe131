#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS queue_items (
          seq INTEGER PRIMARY KEY AUTOINCREMENT,
          status TEXT NOT NULL,
          store_name TEXT NOT NULL,
          pod_name TEXT NOT NULL,
          context_alias TEXT NOT NULL,
          operations_json TEXT NOT NULL,
          change_set_json TEXT NOT NULL,
          deleted_subjects_json TEXT NOT NULL,
          config_json TEXT,
          error_message TEXT,
          created_on_ms INTEGER NOT NULL,
          last_updated_ms INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_queue_items_status
          ON queue_items(status, seq);

        CREATE TABLE IF NOT EXISTS config_cache (
          token TEXT PRIMARY KEY,
          config_json TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL
        );
"#;
