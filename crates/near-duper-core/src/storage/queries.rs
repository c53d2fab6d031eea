use super::models::*;
use super::sqlite::Database;
use rusqlite::{params, OptionalExtension, Result};
use std::collections::BTreeMap;
use tracing::debug;

/// One fingerprint row ready for insertion: start time, encoded hash bins and
/// the LSH bucket keys it is reachable from.
pub struct FingerprintRow {
    pub start_at: f64,
    pub hash_bins: Vec<u8>,
    pub buckets: Vec<i64>,
}

impl Database {
    // ── Scan Session ─────────────────────────────────────────────

    pub fn create_scan_session(&self, search_type: &str, namespace: &str) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        self.connection().execute(
            "INSERT INTO scan_session (started_at, status, search_type, namespace) \
             VALUES (?1, 'running', ?2, ?3)",
            params![now, search_type, namespace],
        )?;
        Ok(self.connection().last_insert_rowid())
    }

    pub fn complete_scan_session(
        &self,
        session_id: i64,
        status: &str,
        files_processed: i64,
        clusters: i64,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.connection().execute(
            "UPDATE scan_session SET completed_at = ?1, status = ?2, \
             files_processed = ?3, clusters = ?4 WHERE id = ?5",
            params![now, status, files_processed, clusters, session_id],
        )?;
        Ok(())
    }

    /// Most recent sessions first.
    pub fn list_sessions(&self, limit: i64) -> Result<Vec<ScanSession>> {
        let mut stmt = self.connection().prepare(
            "SELECT id, started_at, completed_at, status, search_type, namespace, \
                    files_processed, clusters \
             FROM scan_session ORDER BY id DESC LIMIT ?1",
        )?;
        let sessions = stmt
            .query_map(params![limit], |row| {
                Ok(ScanSession {
                    id: row.get(0)?,
                    started_at: row.get(1)?,
                    completed_at: row.get(2)?,
                    status: row.get(3)?,
                    search_type: row.get(4)?,
                    namespace: row.get(5)?,
                    files_processed: row.get(6)?,
                    clusters: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(sessions)
    }

    // ── Signatures ───────────────────────────────────────────────

    pub fn put_signature(&self, namespace: &str, content_id: &[u8], blob: &[u8]) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        self.connection().execute(
            "INSERT INTO signature (namespace, content_id, signature, created_at) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(namespace, content_id) DO UPDATE SET \
                 signature = excluded.signature, created_at = excluded.created_at",
            params![namespace, content_id, blob, now],
        )?;
        Ok(())
    }

    pub fn get_signature(&self, namespace: &str, content_id: &[u8]) -> Result<Option<Vec<u8>>> {
        self.connection()
            .query_row(
                "SELECT signature FROM signature WHERE namespace = ?1 AND content_id = ?2",
                params![namespace, content_id],
                |row| row.get(0),
            )
            .optional()
    }

    pub fn signature_exists(&self, namespace: &str, content_id: &[u8]) -> Result<bool> {
        let count: i64 = self.connection().query_row(
            "SELECT COUNT(*) FROM signature WHERE namespace = ?1 AND content_id = ?2",
            params![namespace, content_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Every `(content_id, signature)` pair of a namespace.
    pub fn all_signatures(&self, namespace: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut stmt = self
            .connection()
            .prepare_cached("SELECT content_id, signature FROM signature WHERE namespace = ?1")?;
        let rows = stmt
            .query_map(params![namespace], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Match Links ──────────────────────────────────────────────

    /// Each entry is `(original_id, duplicate_id, score)`.
    pub fn insert_links(&self, namespace: &str, links: &[(Vec<u8>, Vec<u8>, f64)]) -> Result<usize> {
        let now = chrono::Utc::now().to_rfc3339();
        let tx = self.connection().unchecked_transaction()?;
        let mut count = 0;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO match_link (namespace, original_id, duplicate_id, score, linked_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(namespace, original_id, duplicate_id) DO UPDATE SET \
                     score = excluded.score, linked_at = excluded.linked_at",
            )?;
            for (original, duplicate, score) in links {
                count += stmt.execute(params![namespace, original, duplicate, score, now])?;
            }
        }
        tx.commit()?;
        debug!("Upserted {} match links in {}", count, namespace);
        Ok(count)
    }

    /// Links touching `content_id` from either end, as `(other_id, score)`.
    pub fn links_for(&self, namespace: &str, content_id: &[u8]) -> Result<Vec<(Vec<u8>, f64)>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT duplicate_id, score FROM match_link WHERE namespace = ?1 AND original_id = ?2 \
             UNION \
             SELECT original_id, score FROM match_link WHERE namespace = ?1 AND duplicate_id = ?2",
        )?;
        let rows = stmt
            .query_map(params![namespace, content_id], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Fingerprints ─────────────────────────────────────────────

    /// Replace the fingerprints of one file, buckets included, in one transaction.
    pub fn replace_fingerprints(
        &self,
        namespace: &str,
        content_id: &[u8],
        rows: &[FingerprintRow],
    ) -> Result<usize> {
        let tx = self.connection().unchecked_transaction()?;
        tx.execute(
            "DELETE FROM fingerprint WHERE namespace = ?1 AND content_id = ?2",
            params![namespace, content_id],
        )?;
        {
            let mut fp_stmt = tx.prepare_cached(
                "INSERT INTO fingerprint (namespace, content_id, start_at, hash_bins) \
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            let mut bucket_stmt = tx.prepare_cached(
                "INSERT INTO fingerprint_bucket (namespace, bucket, fingerprint_id) \
                 VALUES (?1, ?2, ?3)",
            )?;
            for row in rows {
                fp_stmt.execute(params![namespace, content_id, row.start_at, row.hash_bins])?;
                let fp_id = tx.last_insert_rowid();
                for bucket in &row.buckets {
                    bucket_stmt.execute(params![namespace, bucket, fp_id])?;
                }
            }
        }
        tx.commit()?;
        debug!("Stored {} fingerprints in {}", rows.len(), namespace);
        Ok(rows.len())
    }

    /// `(content_id, start_at)` of fingerprints carrying `bucket` within `[start, end]`.
    pub fn fingerprints_in_bucket(
        &self,
        namespace: &str,
        bucket: i64,
        start: f64,
        end: f64,
    ) -> Result<Vec<(Vec<u8>, f64)>> {
        let mut stmt = self.connection().prepare_cached(
            "SELECT f.content_id, f.start_at FROM fingerprint_bucket b \
             JOIN fingerprint f ON f.id = b.fingerprint_id \
             WHERE b.namespace = ?1 AND b.bucket = ?2 AND f.start_at BETWEEN ?3 AND ?4",
        )?;
        let rows = stmt
            .query_map(params![namespace, bucket, start, end], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn fingerprint_count(&self, namespace: &str, content_id: &[u8]) -> Result<i64> {
        self.connection().query_row(
            "SELECT COUNT(*) FROM fingerprint WHERE namespace = ?1 AND content_id = ?2",
            params![namespace, content_id],
            |row| row.get(0),
        )
    }

    // ── Stats ────────────────────────────────────────────────────

    pub fn index_stats(&self) -> Result<IndexStats> {
        let mut by_namespace: BTreeMap<String, NamespaceStats> = BTreeMap::new();
        let queries = [
            "SELECT namespace, COUNT(*) FROM signature GROUP BY namespace",
            "SELECT namespace, COUNT(*) FROM fingerprint GROUP BY namespace",
            "SELECT namespace, COUNT(*) FROM match_link GROUP BY namespace",
        ];
        for (column, sql) in queries.iter().enumerate() {
            let mut stmt = self.connection().prepare(sql)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<Result<Vec<_>>>()?;
            for (namespace, count) in rows {
                let entry = by_namespace
                    .entry(namespace.clone())
                    .or_insert_with(|| NamespaceStats {
                        namespace,
                        ..Default::default()
                    });
                match column {
                    0 => entry.signatures = count,
                    1 => entry.fingerprints = count,
                    _ => entry.links = count,
                }
            }
        }

        let sessions: i64 = self
            .connection()
            .query_row("SELECT COUNT(*) FROM scan_session", [], |row| row.get(0))?;

        Ok(IndexStats {
            namespaces: by_namespace.into_values().collect(),
            sessions,
        })
    }
}
