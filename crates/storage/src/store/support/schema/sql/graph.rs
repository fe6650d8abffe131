#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS resources (
          pod TEXT NOT NULL,
          r TEXT NOT NULL,
          c TEXT NOT NULL,
          doc_json TEXT NOT NULL,
          updated_at_ms INTEGER NOT NULL,
          PRIMARY KEY (pod, r, c)
        );

        CREATE TABLE IF NOT EXISTS resource_types (
          pod TEXT NOT NULL,
          r TEXT NOT NULL,
          c TEXT NOT NULL,
          rdf_type TEXT NOT NULL,
          PRIMARY KEY (pod, r, c, rdf_type)
        );

        CREATE INDEX IF NOT EXISTS idx_resource_types_type
          ON resource_types(pod, rdf_type, c, r);
"#;
