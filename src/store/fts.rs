//! BM25 lexical search over the contentless FTS5 index.
//!
//! Queries are sanitized into an OR of quoted terms so user punctuation
//! never reaches the FTS5 query parser. FTS5 ranks ascending with negative
//! BM25 values; hits are returned best-first with `|rank| / max|rank|`
//! mapped onto `[0, 1]`.

use rusqlite::params;

use crate::error::Result;
use crate::store::MetaStore;

/// One lexical hit: raw FTS5 rank (negative, lower is better) plus the
/// normalized score.
#[derive(Debug, Clone, PartialEq)]
pub struct Bm25Hit {
    pub leaf_id: String,
    pub raw_rank: f64,
    pub score: f64,
}

/// Turn free text into an FTS5 query: whitespace-split, quotes stripped,
/// each term phrase-quoted, OR-joined. `None` when nothing survives.
#[must_use]
pub fn sanitize_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|t| t.replace(['"', '\''], ""))
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\""))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}

impl MetaStore {
    /// BM25 search across all leaves.
    pub fn bm25_search(&self, query: &str, limit: usize) -> Result<Vec<Bm25Hit>> {
        self.bm25_search_in_shards(query, None, limit)
    }

    /// BM25 search restricted to a shard set (`None` = unrestricted).
    pub fn bm25_search_in_shards(
        &self,
        query: &str,
        shard_ids: Option<&[u32]>,
        limit: usize,
    ) -> Result<Vec<Bm25Hit>> {
        let Some(fts_query) = sanitize_query(query) else {
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Ok(Vec::new());
        }

        let conn = self.conn.lock();
        let mut raw_hits: Vec<(String, f64)> = match shard_ids {
            Some(shards) if shards.is_empty() => Vec::new(),
            Some(shards) => {
                let placeholders = vec!["?"; shards.len()].join(", ");
                let sql = format!(
                    "SELECT l.leaf_id, f.rank FROM leaf_fts f \
                     JOIN leaves l ON l.rowid = f.rowid \
                     WHERE leaf_fts MATCH ?1 AND l.shard_id IN ({placeholders}) \
                     ORDER BY f.rank LIMIT ?{}",
                    shards.len() + 2
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut values: Vec<rusqlite::types::Value> =
                    vec![rusqlite::types::Value::Text(fts_query)];
                values.extend(
                    shards
                        .iter()
                        .map(|&s| rusqlite::types::Value::Integer(i64::from(s))),
                );
                values.push(rusqlite::types::Value::Integer(limit as i64));
                let rows = stmt.query_map(rusqlite::params_from_iter(values), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
                })?;
                rows.collect::<rusqlite::Result<_>>()?
            }
            None => {
                let mut stmt = conn.prepare_cached(
                    "SELECT l.leaf_id, f.rank FROM leaf_fts f \
                     JOIN leaves l ON l.rowid = f.rowid \
                     WHERE leaf_fts MATCH ?1 \
                     ORDER BY f.rank LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![fts_query, limit as i64], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
                })?;
                rows.collect::<rusqlite::Result<_>>()?
            }
        };
        drop(conn);

        // Deterministic order for equal ranks.
        raw_hits.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let max_abs = raw_hits
            .iter()
            .map(|(_, rank)| rank.abs())
            .fold(0.0f64, f64::max);
        Ok(raw_hits
            .into_iter()
            .map(|(leaf_id, raw_rank)| Bm25Hit {
                leaf_id,
                raw_rank,
                score: if max_abs > 0.0 {
                    raw_rank.abs() / max_abs
                } else {
                    0.0
                },
            })
            .collect())
    }
}
