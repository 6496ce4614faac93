//! Knowledge bases: named content split into embedded chunks, searched by
//! vector similarity, keyword overlap, or a fusion of both.

use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::error::{Result, SayrError};

/// Reciprocal Rank Fusion constant.
const RRF_K: f32 = 60.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    #[default]
    Vector,
    Keyword,
    Hybrid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content_name: String,
    pub chunk_index: usize,
    pub text: String,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f32,
}

/// Where a piece of content comes from.
#[derive(Debug, Clone)]
pub enum ContentBody {
    Text(String),
    Path(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ContentSource {
    pub name: String,
    pub body: ContentBody,
    pub metadata: Value,
}

impl ContentSource {
    pub fn text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            body: ContentBody::Text(text.into()),
            metadata: Value::Null,
        }
    }

    pub fn path(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            body: ContentBody::Path(path.into()),
            metadata: Value::Null,
        }
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    fn source_label(&self) -> String {
        match &self.body {
            ContentBody::Text(_) => "text".to_string(),
            ContentBody::Path(path) => path.display().to_string(),
        }
    }
}

/// Bookkeeping row for an ingested piece of content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub name: String,
    pub source: String,
    pub chunk_count: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestReport {
    pub name: String,
    pub chunks: usize,
    pub skipped: bool,
}

pub struct SearchRequest<'a> {
    pub query: &'a str,
    pub embedding: &'a [f32],
    pub search_type: SearchType,
    pub top_k: usize,
    /// Vector hits scoring at or below this similarity are dropped.
    pub min_score: f32,
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Store the chunks of one content, replacing any chunks already held under its name.
    async fn insert(&self, content: ContentRecord, chunks: Vec<EmbeddedChunk>) -> Result<()>;
    async fn search(&self, request: &SearchRequest<'_>) -> Result<Vec<ScoredChunk>>;
    async fn content_exists(&self, name: &str) -> Result<bool>;
    async fn delete_content(&self, name: &str) -> Result<usize>;
    async fn chunk_count(&self) -> Result<usize>;
}

/// Lowercased alphanumeric terms.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .collect()
}

/// Hashed bag-of-words embedding. Deterministic and local; good enough for
/// tests and small corpora.
pub struct WhitespaceEmbedder {
    buckets: usize,
}

impl Default for WhitespaceEmbedder {
    fn default() -> Self {
        Self { buckets: 256 }
    }
}

impl WhitespaceEmbedder {
    pub fn new(buckets: usize) -> Self {
        Self {
            buckets: buckets.max(1),
        }
    }
}

#[async_trait]
impl Embedder for WhitespaceEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0; self.buckets];
        for token in tokenize(text) {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            token.hash(&mut hasher);
            let idx = (hasher.finish() as usize) % self.buckets;
            vector[idx] += 1.0;
        }
        Ok(vector)
    }
}

/// Embeddings from an OpenAI-compatible `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiEmbedder {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let resp = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({ "model": self.model, "input": [text] }))
            .send()
            .await
            .map_err(|err| SayrError::Knowledge(format!("embedding request error: {err}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SayrError::Knowledge(format!(
                "embedding request failed with {status}: {body}"
            )));
        }
        let parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|err| SayrError::Knowledge(format!("embedding parse error: {err}")))?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|data| data.embedding)
            .ok_or_else(|| SayrError::Knowledge("empty embedding response".into()))
    }
}

/// Zero for vectors of different dimensions.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a.sqrt() * norm_b.sqrt())
    }
}

/// Share of distinct query terms found in `text`.
pub fn keyword_score(query_terms: &HashSet<String>, text: &str) -> f32 {
    if query_terms.is_empty() {
        return 0.0;
    }
    let terms: HashSet<String> = tokenize(text).into_iter().collect();
    let matched = query_terms.iter().filter(|t| terms.contains(*t)).count();
    matched as f32 / query_terms.len() as f32
}

fn sort_desc(scored: &mut [ScoredChunk]) {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Brute-force ranking shared by the bundled stores.
pub fn rank_chunks<'a, I>(entries: I, request: &SearchRequest<'_>) -> Vec<ScoredChunk>
where
    I: IntoIterator<Item = (&'a Chunk, &'a [f32])>,
{
    let query_terms: HashSet<String> = tokenize(request.query).into_iter().collect();
    let mut by_vector = Vec::new();
    let mut by_keyword = Vec::new();
    let mut mismatched = 0usize;
    for (chunk, embedding) in entries {
        if request.search_type != SearchType::Keyword {
            if embedding.len() != request.embedding.len() {
                mismatched += 1;
            } else {
                let score = cosine_similarity(embedding, request.embedding);
                if score > request.min_score {
                    by_vector.push(ScoredChunk {
                        chunk: chunk.clone(),
                        score,
                    });
                }
            }
        }
        if request.search_type != SearchType::Vector {
            let score = keyword_score(&query_terms, &chunk.text);
            if score > 0.0 {
                by_keyword.push(ScoredChunk {
                    chunk: chunk.clone(),
                    score,
                });
            }
        }
    }
    if mismatched > 0 {
        tracing::warn!(
            chunks = mismatched,
            query_dims = request.embedding.len(),
            "skipped chunks embedded with a different dimension; re-ingest with the current embedder"
        );
    }
    sort_desc(&mut by_vector);
    sort_desc(&mut by_keyword);

    let mut ranked = match request.search_type {
        SearchType::Vector => by_vector,
        SearchType::Keyword => by_keyword,
        SearchType::Hybrid => reciprocal_rank_fusion(&[by_vector, by_keyword]),
    };
    ranked.truncate(request.top_k);
    ranked
}

/// Merge several rankings: each chunk scores the sum of `1 / (k + rank)`.
pub fn reciprocal_rank_fusion(rankings: &[Vec<ScoredChunk>]) -> Vec<ScoredChunk> {
    let mut fused: HashMap<String, ScoredChunk> = HashMap::new();
    for ranking in rankings {
        for (rank, scored) in ranking.iter().enumerate() {
            let contribution = 1.0 / (RRF_K + rank as f32 + 1.0);
            fused
                .entry(scored.chunk.id.clone())
                .and_modify(|existing| existing.score += contribution)
                .or_insert_with(|| ScoredChunk {
                    chunk: scored.chunk.clone(),
                    score: contribution,
                });
        }
    }
    let mut merged: Vec<ScoredChunk> = fused.into_values().collect();
    merged.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk.content_name.cmp(&b.chunk.content_name))
            .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
    });
    merged
}

/// Split text into chunks at line boundaries.
///
/// Chunks target `chunk_size` characters but won't split mid-line; a longer
/// line gets its own chunk. With `overlap > 0` each chunk after the first
/// starts with the tail of the previous one.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }
    if text.len() <= chunk_size {
        return vec![text.to_string()];
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if !current.is_empty() && current.len() + line.len() + 1 > chunk_size {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    if overlap == 0 || chunks.len() < 2 {
        return chunks;
    }
    let mut overlapped = Vec::with_capacity(chunks.len());
    overlapped.push(chunks[0].clone());
    for window in chunks.windows(2) {
        let previous = &window[0];
        let mut start = previous.len().saturating_sub(overlap);
        while !previous.is_char_boundary(start) {
            start += 1;
        }
        overlapped.push(format!("{}{}", &previous[start..], window[1]));
    }
    overlapped
}

/// Extract the text of a content source. PDFs go through the PDF extractor;
/// everything else is read as UTF-8.
pub async fn read_content(source: &ContentSource) -> Result<String> {
    let path = match &source.body {
        ContentBody::Text(text) => return Ok(text.clone()),
        ContentBody::Path(path) => path,
    };
    let is_pdf = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

    if is_pdf {
        let bytes = tokio::fs::read(path).await.map_err(|err| {
            SayrError::Knowledge(format!("failed to read pdf `{}`: {err}", path.display()))
        })?;
        let label = path.display().to_string();
        return tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|err| SayrError::Knowledge(format!("pdf extraction task failed: {err}")))?
            .map_err(|err| {
                SayrError::Knowledge(format!("failed to extract text from `{label}`: {err}"))
            });
    }

    tokio::fs::read_to_string(path).await.map_err(|err| {
        SayrError::Knowledge(format!("failed to read `{}`: {err}", path.display()))
    })
}

#[derive(Default)]
struct InMemoryEntries {
    contents: HashMap<String, ContentRecord>,
    chunks: Vec<EmbeddedChunk>,
}

#[derive(Default)]
pub struct InMemoryVectorStore {
    entries: RwLock<InMemoryEntries>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn insert(&self, content: ContentRecord, chunks: Vec<EmbeddedChunk>) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries
            .chunks
            .retain(|entry| entry.chunk.content_name != content.name);
        entries.chunks.extend(chunks);
        entries.contents.insert(content.name.clone(), content);
        Ok(())
    }

    async fn search(&self, request: &SearchRequest<'_>) -> Result<Vec<ScoredChunk>> {
        let entries = self.entries.read().await;
        Ok(rank_chunks(
            entries
                .chunks
                .iter()
                .map(|entry| (&entry.chunk, entry.embedding.as_slice())),
            request,
        ))
    }

    async fn content_exists(&self, name: &str) -> Result<bool> {
        Ok(self.entries.read().await.contents.contains_key(name))
    }

    async fn delete_content(&self, name: &str) -> Result<usize> {
        let mut entries = self.entries.write().await;
        let before = entries.chunks.len();
        entries.chunks.retain(|entry| entry.chunk.content_name != name);
        entries.contents.remove(name);
        Ok(before - entries.chunks.len())
    }

    async fn chunk_count(&self) -> Result<usize> {
        Ok(self.entries.read().await.chunks.len())
    }
}

#[cfg(feature = "persistence")]
pub use sql::SqliteVectorStore;

#[cfg(feature = "persistence")]
mod sql {
    use async_trait::async_trait;
    use sqlx::{Row, SqlitePool};

    use super::{
        rank_chunks, Chunk, ContentRecord, EmbeddedChunk, ScoredChunk, SearchRequest, VectorStore,
    };
    use crate::error::{Result, SayrError};

    /// Chunks and embeddings in a SQLite table; search is brute force in process.
    #[derive(Clone)]
    pub struct SqliteVectorStore {
        pool: SqlitePool,
        table: String,
    }

    fn storage_err(context: &str) -> impl Fn(sqlx::Error) -> SayrError + '_ {
        move |err| SayrError::Storage(format!("{context}: {err}"))
    }

    impl SqliteVectorStore {
        pub async fn from_pool(pool: SqlitePool, table_name: &str) -> Result<Self> {
            if table_name.is_empty()
                || !table_name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(SayrError::Config(format!(
                    "invalid knowledge table name `{table_name}`"
                )));
            }
            let table = table_name.to_string();
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    content_name TEXT NOT NULL,
                    chunk_index INTEGER NOT NULL,
                    text TEXT NOT NULL,
                    metadata TEXT NOT NULL,
                    embedding TEXT NOT NULL
                )"
            ))
            .execute(&pool)
            .await
            .map_err(storage_err("failed creating chunk table"))?;
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {table}_contents (
                    name TEXT PRIMARY KEY,
                    source TEXT NOT NULL,
                    chunk_count INTEGER NOT NULL,
                    created_at TEXT NOT NULL
                )"
            ))
            .execute(&pool)
            .await
            .map_err(storage_err("failed creating contents table"))?;
            Ok(Self { pool, table })
        }
    }

    #[async_trait]
    impl VectorStore for SqliteVectorStore {
        async fn insert(&self, content: ContentRecord, chunks: Vec<EmbeddedChunk>) -> Result<()> {
            let table = &self.table;
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(storage_err("failed opening transaction"))?;
            sqlx::query(&format!("DELETE FROM {table} WHERE content_name = ?"))
                .bind(&content.name)
                .execute(&mut *tx)
                .await
                .map_err(storage_err("failed clearing previous chunks"))?;
            for entry in &chunks {
                sqlx::query(&format!(
                    "INSERT INTO {table} (id, content_name, chunk_index, text, metadata, embedding) VALUES (?, ?, ?, ?, ?, ?)"
                ))
                .bind(&entry.chunk.id)
                .bind(&entry.chunk.content_name)
                .bind(entry.chunk.chunk_index as i64)
                .bind(&entry.chunk.text)
                .bind(serde_json::to_string(&entry.chunk.metadata)?)
                .bind(serde_json::to_string(&entry.embedding)?)
                .execute(&mut *tx)
                .await
                .map_err(storage_err("failed inserting chunk"))?;
            }
            sqlx::query(&format!(
                "INSERT OR REPLACE INTO {table}_contents (name, source, chunk_count, created_at) VALUES (?, ?, ?, ?)"
            ))
            .bind(&content.name)
            .bind(&content.source)
            .bind(content.chunk_count as i64)
            .bind(content.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(storage_err("failed recording content"))?;
            tx.commit()
                .await
                .map_err(storage_err("failed committing chunks"))
        }

        async fn search(&self, request: &SearchRequest<'_>) -> Result<Vec<ScoredChunk>> {
            let rows = sqlx::query(&format!(
                "SELECT id, content_name, chunk_index, text, metadata, embedding FROM {} ORDER BY content_name, chunk_index",
                self.table
            ))
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err("failed loading chunks"))?;

            let mut entries: Vec<(Chunk, Vec<f32>)> = Vec::with_capacity(rows.len());
            for row in rows {
                let decode = storage_err("failed decoding chunk row");
                let metadata: String = row.try_get("metadata").map_err(&decode)?;
                let embedding: String = row.try_get("embedding").map_err(&decode)?;
                let chunk_index: i64 = row.try_get("chunk_index").map_err(&decode)?;
                entries.push((
                    Chunk {
                        id: row.try_get("id").map_err(&decode)?,
                        content_name: row.try_get("content_name").map_err(&decode)?,
                        chunk_index: chunk_index as usize,
                        text: row.try_get("text").map_err(&decode)?,
                        metadata: serde_json::from_str(&metadata)?,
                    },
                    serde_json::from_str(&embedding)?,
                ));
            }
            Ok(rank_chunks(
                entries.iter().map(|(chunk, emb)| (chunk, emb.as_slice())),
                request,
            ))
        }

        async fn content_exists(&self, name: &str) -> Result<bool> {
            let row = sqlx::query(&format!(
                "SELECT 1 FROM {}_contents WHERE name = ? LIMIT 1",
                self.table
            ))
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err("failed checking content"))?;
            Ok(row.is_some())
        }

        async fn delete_content(&self, name: &str) -> Result<usize> {
            let deleted = sqlx::query(&format!(
                "DELETE FROM {} WHERE content_name = ?",
                self.table
            ))
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(storage_err("failed deleting chunks"))?
            .rows_affected();
            sqlx::query(&format!("DELETE FROM {}_contents WHERE name = ?", self.table))
                .bind(name)
                .execute(&self.pool)
                .await
                .map_err(storage_err("failed deleting content"))?;
            Ok(deleted as usize)
        }

        async fn chunk_count(&self) -> Result<usize> {
            let row = sqlx::query(&format!("SELECT COUNT(*) AS n FROM {}", self.table))
                .fetch_one(&self.pool)
                .await
                .map_err(storage_err("failed counting chunks"))?;
            let count: i64 = row
                .try_get("n")
                .map_err(storage_err("failed decoding count"))?;
            Ok(count as usize)
        }
    }
}

/// A named knowledge base over an embedder and a vector store.
pub struct KnowledgeBase {
    name: String,
    description: String,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    search_type: SearchType,
    max_results: usize,
    min_score: f32,
    chunk_size: usize,
    chunk_overlap: usize,
}

impl KnowledgeBase {
    pub fn new(
        name: impl Into<String>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
    ) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            embedder,
            store,
            search_type: SearchType::default(),
            max_results: 5,
            min_score: 0.0,
            chunk_size: 5000,
            chunk_overlap: 0,
        }
    }

    /// In-memory knowledge base with the hashed embedder.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self::new(
            name,
            Arc::new(WhitespaceEmbedder::default()),
            Arc::new(InMemoryVectorStore::new()),
        )
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_search_type(mut self, search_type: SearchType) -> Self {
        self.search_type = search_type;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results.max(1);
        self
    }

    /// Minimum cosine similarity for a vector hit to count as a match.
    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_chunking(mut self, chunk_size: usize, chunk_overlap: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.chunk_overlap = chunk_overlap.min(self.chunk_size / 2);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    pub async fn chunk_count(&self) -> Result<usize> {
        self.store.chunk_count().await
    }

    /// Read, chunk, embed and store a content source.
    ///
    /// With `skip_if_exists`, content already ingested under the same name is
    /// left untouched. Otherwise it is replaced.
    pub async fn add_content(
        &self,
        source: ContentSource,
        skip_if_exists: bool,
    ) -> Result<IngestReport> {
        if skip_if_exists && self.store.content_exists(&source.name).await? {
            tracing::debug!(knowledge = %self.name, content = %source.name, "content exists, skipping");
            return Ok(IngestReport {
                name: source.name,
                chunks: 0,
                skipped: true,
            });
        }

        let text = read_content(&source).await?;
        let pieces = chunk_text(&text, self.chunk_size, self.chunk_overlap);
        let mut chunks = Vec::with_capacity(pieces.len());
        for (chunk_index, piece) in pieces.into_iter().enumerate() {
            let embedding = self.embedder.embed(&piece).await?;
            chunks.push(EmbeddedChunk {
                chunk: Chunk {
                    id: uuid::Uuid::new_v4().to_string(),
                    content_name: source.name.clone(),
                    chunk_index,
                    text: piece,
                    metadata: source.metadata.clone(),
                },
                embedding,
            });
        }

        let report = IngestReport {
            name: source.name.clone(),
            chunks: chunks.len(),
            skipped: false,
        };
        let record = ContentRecord {
            name: source.name.clone(),
            source: source.source_label(),
            chunk_count: chunks.len(),
            created_at: Utc::now(),
        };
        self.store.insert(record, chunks).await?;
        tracing::info!(knowledge = %self.name, content = %report.name, chunks = report.chunks, "content ingested");
        Ok(report)
    }

    pub async fn remove_content(&self, name: &str) -> Result<usize> {
        self.store.delete_content(name).await
    }

    pub async fn search(&self, query: &str) -> Result<Vec<ScoredChunk>> {
        self.search_with_limit(query, self.max_results).await
    }

    pub async fn search_with_limit(&self, query: &str, top_k: usize) -> Result<Vec<ScoredChunk>> {
        let embedding = self.embedder.embed(query).await?;
        self.store
            .search(&SearchRequest {
                query,
                embedding: &embedding,
                search_type: self.search_type,
                top_k,
                min_score: self.min_score,
            })
            .await
    }
}
