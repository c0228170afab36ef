//! The search assistant: query embedding, similarity ranking over stored
//! listing embeddings, a TTL answer cache, and the demo-mode fallback.

use crate::listings::{Listing, ListingStore};
use crate::semantic::provider::EmbeddingProvider;
use crate::semantic::similarity::cosine_similarity;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

/// Results below this cosine similarity are discarded.
const SIMILARITY_THRESHOLD: f32 = 0.6;
/// Only the best few matches make it into the answer.
const TOP_K: usize = 3;
/// Placeholder relevance score reported by the demo-mode fallback.
/// f64 so the wire carries exactly 0.85; an f32 widened through serde's
/// flatten buffer would serialize as 0.8500000238418579.
const DEMO_SCORE: f64 = 0.85;

#[derive(Debug, Clone, Serialize)]
pub struct ScoredListing {
    #[serde(flatten)]
    pub listing: Listing,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub answer: String,
    pub results: Vec<ScoredListing>,
    pub cached: bool,
    pub timestamp: DateTime<Utc>,
    /// Present (and true) only for the degraded-mode response variant.
    #[serde(rename = "demoMode", skip_serializing_if = "Option::is_none")]
    pub demo_mode: Option<bool>,
}

struct CacheEntry {
    stored_at: Instant,
    response: SearchResponse,
}

pub struct AssistantService {
    listings: Arc<dyn ListingStore>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    cache_ttl: Duration,
}

impl AssistantService {
    /// `cache_ttl` of zero disables caching. A missing provider puts the
    /// whole service into demo mode.
    pub fn new(
        listings: Arc<dyn ListingStore>,
        provider: Option<Arc<dyn EmbeddingProvider>>,
        cache_ttl: Duration,
    ) -> Self {
        AssistantService {
            listings,
            provider,
            cache: RwLock::new(HashMap::new()),
            cache_ttl,
        }
    }

    pub fn is_demo_mode(&self) -> bool {
        self.provider.is_none()
    }

    /// Drop every cached answer. Used by the on-demand revalidation
    /// endpoint.
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.cache.write() {
            cache.clear();
        }
    }

    pub fn search(&self, query: &str) -> anyhow::Result<SearchResponse> {
        let Some(provider) = self.provider.clone() else {
            log::info!("embedding provider not configured, serving demo-mode search");
            return self.demo_search(query);
        };

        if let Some(mut hit) = self.cache_get(query) {
            hit.cached = true;
            return Ok(hit);
        }

        let query_embedding = provider.embed(query)?;

        let mut results: Vec<ScoredListing> = vec![];
        for listing in self.listings.embedded()? {
            let Some(embedding) = listing.embedding.as_deref() else {
                continue;
            };
            match cosine_similarity(&query_embedding, embedding) {
                Ok(score) if score >= SIMILARITY_THRESHOLD => {
                    results.push(ScoredListing {
                        listing,
                        score: score as f64,
                    });
                }
                Ok(_) => {}
                Err(err) => {
                    // A stale vector from an older model must not sink the
                    // whole query.
                    log::warn!("skipping listing {}: {err}", listing.id);
                }
            }
        }

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(TOP_K);

        let response = SearchResponse {
            query: query.to_string(),
            answer: compose_answer(query, &results),
            results,
            cached: false,
            timestamp: Utc::now(),
            demo_mode: None,
        };

        self.cache_put(query, &response);

        Ok(response)
    }

    /// Substring search over name/description/category with a fixed
    /// placeholder score. A deliberate degraded-mode contract, flagged via
    /// `demoMode`.
    fn demo_search(&self, query: &str) -> anyhow::Result<SearchResponse> {
        let results: Vec<ScoredListing> = self
            .listings
            .search(Some(query))?
            .into_iter()
            .take(TOP_K)
            .map(|listing| ScoredListing {
                listing,
                score: DEMO_SCORE,
            })
            .collect();

        Ok(SearchResponse {
            query: query.to_string(),
            answer: compose_answer(query, &results),
            results,
            cached: false,
            timestamp: Utc::now(),
            demo_mode: Some(true),
        })
    }

    fn cache_get(&self, query: &str) -> Option<SearchResponse> {
        if self.cache_ttl.is_zero() {
            return None;
        }

        let cache = self.cache.read().ok()?;
        let entry = cache.get(query)?;
        if entry.stored_at.elapsed() > self.cache_ttl {
            return None;
        }
        Some(entry.response.clone())
    }

    fn cache_put(&self, query: &str, response: &SearchResponse) {
        if self.cache_ttl.is_zero() {
            return;
        }

        // The cache is best-effort: a poisoned lock disables it rather
        // than failing the request.
        let Ok(mut cache) = self.cache.write() else {
            return;
        };

        let ttl = self.cache_ttl;
        cache.retain(|_, entry| entry.stored_at.elapsed() <= ttl);
        cache.insert(
            query.to_string(),
            CacheEntry {
                stored_at: Instant::now(),
                response: response.clone(),
            },
        );
    }
}

fn compose_answer(query: &str, results: &[ScoredListing]) -> String {
    match results.first() {
        Some(top) => {
            let ScoredListing { listing, .. } = top;
            let mut answer = format!(
                "The best match for \"{query}\" is {} ({}), located at {}.",
                listing.name, listing.category, listing.address
            );
            if let Some(description) = listing.description.as_deref() {
                answer.push_str(&format!(" {description}"));
            }
            if results.len() > 1 {
                answer.push_str(&format!(
                    " {} other listings also matched.",
                    results.len() - 1
                ));
            }
            answer
        }
        None => format!("I couldn't find any listing matching \"{query}\"."),
    }
}
