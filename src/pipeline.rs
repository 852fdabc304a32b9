//! Query orchestration: embed → route → search → fuse → merge → excerpt.
//!
//! Per-shard vector searches run concurrently (one thread per selected
//! shard) and join before fusion. Candidates are over-fetched at three times
//! the requested limit to absorb filtering and span-merge loss. Everything
//! downstream of the ANN layer is deterministic: fusion ties break on leaf
//! id, span order is stable by (score, doc, start).

use std::collections::{BTreeSet, HashMap};
use std::time::Instant;

use crate::config::{EngineConfig, FETCH_MULTIPLIER, ROUTE_TOP_NODES};
use crate::embedding::{dot, Embedder};
use crate::error::{EngineError, Result};
use crate::ids::shard_for_doc;
use crate::search::{
    ExcerptExtractor, HybridScorer, QueryMeta, QueryParams, QueryResponse, SearchResult,
    SpanCandidate, SpanMerger,
};
use crate::snapshot::Snapshot;

pub struct RetrievalPipeline<'a> {
    snapshot: &'a Snapshot,
    embedder: &'a dyn Embedder,
    config: &'a EngineConfig,
}

impl<'a> RetrievalPipeline<'a> {
    pub fn new(snapshot: &'a Snapshot, embedder: &'a dyn Embedder, config: &'a EngineConfig) -> Self {
        Self {
            snapshot,
            embedder,
            config,
        }
    }

    pub fn query(&self, params: &QueryParams) -> Result<QueryResponse> {
        let started = Instant::now();
        let query = params.query.trim();
        if query.is_empty() {
            return Ok(QueryResponse {
                results: Vec::new(),
                meta: QueryMeta {
                    took_ms: started.elapsed().as_millis() as u64,
                    shards_searched: params.include_shards_searched.then(Vec::new),
                },
            });
        }

        let fetch_limit = FETCH_MULTIPLIER * params.top_k.max(1);
        let query_vector = self.embedder.embed(query)?.vector;

        let shards = self.route_shards(&query_vector, params)?;

        let (vector_scores, bm25_raw) = self.gather_candidates(query, &query_vector, &shards, fetch_limit)?;

        // BM25-only candidates borrow their vector score from the embedding
        // cache when one exists; the model never reruns at query time.
        let mut bm25_scores: HashMap<String, (f32, Option<f32>)> = HashMap::new();
        for hit in bm25_raw {
            let cached = if vector_scores.contains_key(&hit.leaf_id) {
                None
            } else {
                self.snapshot
                    .store
                    .leaf_embedding(&hit.leaf_id)?
                    .map(|v| dot(&query_vector, &v).clamp(0.0, 1.0))
            };
            bm25_scores.insert(hit.leaf_id, (hit.score as f32, cached));
        }

        let scorer = HybridScorer::new(
            self.config.retrieval.vector_weight,
            self.config.retrieval.bm25_weight,
        )?;
        let fused = scorer.fuse(&vector_scores, &bm25_scores);

        // Hydrate metadata, drop orphans, apply filters.
        let leaf_ids: Vec<String> = fused.iter().map(|c| c.leaf_id.clone()).collect();
        let metas = self.snapshot.store.leaf_meta(&leaf_ids)?;
        let mut per_leaf: HashMap<String, (f32, f32)> = HashMap::new();
        let mut spans = Vec::new();
        for candidate in fused {
            let Some(meta) = metas.get(&candidate.leaf_id) else {
                continue;
            };
            if !params.filters.matches(&meta.doc_uri, &meta.heading_path) {
                continue;
            }
            per_leaf.insert(
                candidate.leaf_id.clone(),
                (candidate.vector_score, candidate.bm25_score),
            );
            spans.push(SpanCandidate {
                doc_uri: meta.doc_uri.clone(),
                start_char: meta.start_char,
                end_char: meta.end_char,
                score: candidate.score,
                leaf_ids: vec![candidate.leaf_id],
            });
        }

        let merger = SpanMerger::new(self.config.retrieval.span_merge_gap_threshold);
        let merged = merger.merge(spans);

        let extractor = ExcerptExtractor::new(&self.config.vault_root);
        let mut results = Vec::with_capacity(params.top_k);
        for span in merged {
            if results.len() >= params.top_k {
                break;
            }
            let Some(representative) = span.leaf_ids.first() else {
                continue;
            };
            let Some(rep_meta) = metas.get(representative) else {
                continue;
            };
            let (vector_score, bm25_score) =
                per_leaf.get(representative).copied().unwrap_or((0.0, 0.0));
            let excerpt = match extractor.extract(
                &span.doc_uri,
                span.start_char,
                span.end_char,
                params.max_excerpt_chars,
            ) {
                Ok(excerpt) => excerpt,
                Err(EngineError::NotFound(_)) => {
                    tracing::warn!(doc_uri = %span.doc_uri, "indexed file gone; result dropped");
                    continue;
                }
                Err(err) => return Err(err),
            };
            results.push(SearchResult {
                doc_uri: span.doc_uri,
                heading_path: rep_meta.heading_path.clone(),
                start_char: span.start_char,
                end_char: span.end_char,
                excerpt: excerpt.text,
                excerpt_truncated: excerpt.truncated,
                score: span.score,
                vector_score,
                bm25_score,
            });
        }

        Ok(QueryResponse {
            results,
            meta: QueryMeta {
                took_ms: started.elapsed().as_millis() as u64,
                shards_searched: params.include_shards_searched.then(|| shards.clone()),
            },
        })
    }

    /// Outline routing, narrowed by document filters where their shards are
    /// computable. With an empty outline (or routing loss) and an explicit
    /// document filter, the filter's own shards serve as the candidate set.
    fn route_shards(&self, query_vector: &[f32], params: &QueryParams) -> Result<Vec<u32>> {
        let max_shards = self.config.sharding.max_shards_per_query;
        let mut shards =
            self.snapshot
                .outline
                .route(query_vector, ROUTE_TOP_NODES, max_shards);

        let mut allowed: Option<BTreeSet<u32>> = None;
        if !params.filters.doc_uris.is_empty() {
            allowed = Some(params.filters.doc_uris.iter().map(|u| shard_for_doc(u)).collect());
        }
        if let Some(prefix) = &params.filters.doc_uri_prefix {
            let prefix_shards: BTreeSet<u32> = self
                .snapshot
                .store
                .doc_uris_with_prefix(prefix)?
                .iter()
                .map(|u| shard_for_doc(u))
                .collect();
            allowed = Some(match allowed {
                Some(set) => set.intersection(&prefix_shards).copied().collect(),
                None => prefix_shards,
            });
        }

        if let Some(allowed) = allowed {
            if shards.is_empty() {
                shards = allowed.into_iter().take(max_shards).collect();
            } else {
                shards.retain(|s| allowed.contains(s));
            }
        }
        Ok(shards)
    }

    /// Vector-search every selected shard concurrently; BM25 runs on the
    /// calling thread against the same shard set.
    fn gather_candidates(
        &self,
        query: &str,
        query_vector: &[f32],
        shards: &[u32],
        fetch_limit: usize,
    ) -> Result<(HashMap<String, f32>, Vec<crate::store::fts::Bm25Hit>)> {
        let mut vector_scores: HashMap<String, f32> = HashMap::new();
        let mut bm25_hits = Vec::new();

        std::thread::scope(|scope| -> Result<()> {
            let handles: Vec<_> = shards
                .iter()
                .map(|&shard_id| {
                    scope.spawn(move || -> Result<Vec<(String, f32)>> {
                        match self.snapshot.shard_index(shard_id)? {
                            Some(index) => Ok(index.search(query_vector, fetch_limit)),
                            None => Ok(Vec::new()),
                        }
                    })
                })
                .collect();

            bm25_hits = self
                .snapshot
                .store
                .bm25_search_in_shards(query, Some(shards), fetch_limit)?;

            for handle in handles {
                let hits = handle
                    .join()
                    .map_err(|_| EngineError::Internal("shard search thread panicked".into()))??;
                for (leaf_id, score) in hits {
                    let clamped = score.clamp(0.0, 1.0);
                    vector_scores
                        .entry(leaf_id)
                        .and_modify(|s| *s = s.max(clamped))
                        .or_insert(clamped);
                }
            }
            Ok(())
        })?;

        Ok((vector_scores, bm25_hits))
    }
}
