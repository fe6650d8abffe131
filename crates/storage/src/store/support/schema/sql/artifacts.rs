#![forbid(unsafe_code)]

pub(super) const SQL: &str = r#"

        CREATE TABLE IF NOT EXISTS artifacts (
          kind TEXT NOT NULL,
          spec_id TEXT NOT NULL,
          r TEXT NOT NULL,
          c TEXT NOT NULL,
          doc_json TEXT NOT NULL,
          created_at_ms INTEGER NOT NULL,
          PRIMARY KEY (kind, spec_id, r, c)
        );

        CREATE INDEX IF NOT EXISTS idx_artifacts_resource
          ON artifacts(kind, r, c);

        CREATE TABLE IF NOT EXISTS artifact_impacts (
          kind TEXT NOT NULL,
          spec_id TEXT NOT NULL,
          r TEXT NOT NULL,
          c TEXT NOT NULL,
          dep_r TEXT NOT NULL,
          dep_c TEXT NOT NULL,
          PRIMARY KEY (kind, spec_id, r, c, dep_r, dep_c)
        );

        CREATE INDEX IF NOT EXISTS idx_artifact_impacts_dep
          ON artifact_impacts(kind, spec_id, dep_r, dep_c);

        CREATE TABLE IF NOT EXISTS search_terms (
          spec_id TEXT NOT NULL,
          r TEXT NOT NULL,
          c TEXT NOT NULL,
          term TEXT NOT NULL,
          PRIMARY KEY (spec_id, r, c, term)
        );

        CREATE INDEX IF NOT EXISTS idx_search_terms_term
          ON search_terms(spec_id, term);
"#;
