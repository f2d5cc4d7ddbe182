//! Hosted relational backend reached over a PostgREST-style HTTP API.
//!
//! Tables mirror the SQLite schema and rows use the serde shape of the
//! model types. Requests go to `{url}/rest/v1/{table}` with the service key
//! sent as both `apikey` and a bearer token. Content blobs travel as base64
//! text so compressed bytes survive JSON.
//!
//! The API has no multi-statement transactions. Batch inserts are a single
//! array POST (all-or-nothing on the server). When the follow-up content
//! upload fails, the rows just inserted are deleted again by id before the
//! error is returned; a failed cleanup is logged.
//!
//! Servers cap how many rows one response may carry, so statistics use
//! exact counts from `Content-Range` and page through documents.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Method, RequestBuilder, StatusCode};
use reqwest::header::CONTENT_RANGE;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};

use ragversion_core::error::StorageResultExt;
use ragversion_core::models::{
    Chunk, ChunkRecord, Document, DocumentFilter, DocumentSort, StorageStatistics, Version,
    VersionRecord,
};
use ragversion_core::store::Store;
use ragversion_core::{Error, Result};

use crate::compress;
use crate::config::RemoteConfig;

/// Rows requested per page when scanning a whole table.
const PAGE_SIZE: usize = 1000;

#[derive(Debug, Serialize, Deserialize)]
struct ContentRow {
    version_id: String,
    content: String,
    compressed: bool,
    original_size: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChunkContentRow {
    chunk_id: String,
    content: String,
    compressed: bool,
}

#[derive(Debug, Deserialize)]
struct DocumentStatRow {
    file_type: String,
    file_size: i64,
    created_at: DateTime<Utc>,
}


/// [`Store`] implementation over a PostgREST endpoint.
pub struct RemoteStore {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
    compress: bool,
    closed: AtomicBool,
}

fn timestamp_param(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Total from a `Content-Range` value such as `0-24/3573` or `*/0`.
fn range_total(range: &str) -> Option<i64> {
    range.rsplit_once('/')?.1.trim().parse().ok()
}

fn encode_blob(text: &str, compress: bool) -> Result<(String, bool)> {
    let (bytes, compressed) = compress::encode(text, compress)?;
    Ok((STANDARD.encode(bytes), compressed))
}

fn decode_blob(encoded: &str, compressed: bool) -> Result<String> {
    let bytes = STANDARD
        .decode(encoded)
        .storage_context("stored content is not valid base64")?;
    compress::decode(&bytes, compressed)
}

impl RemoteStore {
    /// Build a client from configuration; URL and key may come from the environment.
    pub fn new(config: &RemoteConfig, compress: bool) -> Result<Self> {
        let base_url = config
            .resolved_url()
            .ok_or_else(|| Error::Configuration("remote storage url is not set".into()))?;
        let service_key = config
            .resolved_key()
            .ok_or_else(|| Error::Configuration("remote storage service key is not set".into()))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .storage_context("failed to build http client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            compress,
            closed: AtomicBool::new(false),
        })
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}/rest/v1/{}", self.base_url, table))
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("Content-Type", "application/json")
    }

    async fn send(&self, builder: RequestBuilder, what: &str) -> Result<reqwest::Response> {
        let response = builder
            .send()
            .await
            .storage_context(&format!("{} request failed", what))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::storage_msg(format!("{} failed with {}: {}", what, status, body)))
    }

    async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
        what: &str,
    ) -> Result<Vec<T>> {
        let response = self
            .send(self.request(Method::GET, table).query(query), what)
            .await?;
        response
            .json::<Vec<T>>()
            .await
            .storage_context(&format!("{}: unexpected response body", what))
    }

    async fn select_one<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, String)],
        what: &str,
    ) -> Result<Option<T>> {
        let mut rows: Vec<T> = self.select(table, query, what).await?;
        Ok(if rows.is_empty() {
            None
        } else {
            Some(rows.swap_remove(0))
        })
    }

    async fn insert<T: Serialize + ?Sized>(&self, table: &str, body: &T, what: &str) -> Result<()> {
        self.send(
            self.request(Method::POST, table)
                .header("Prefer", "return=minimal")
                .json(body),
            what,
        )
        .await?;
        Ok(())
    }

    async fn upsert<T: Serialize + ?Sized>(&self, table: &str, body: &T, what: &str) -> Result<()> {
        self.send(
            self.request(Method::POST, table)
                .header("Prefer", "resolution=merge-duplicates,return=minimal")
                .json(body),
            what,
        )
        .await?;
        Ok(())
    }

    /// Delete matching rows and return how many went.
    async fn delete_where(&self, table: &str, query: &[(&str, String)], what: &str) -> Result<u64> {
        let response = self
            .send(
                self.request(Method::DELETE, table)
                    .header("Prefer", "return=representation")
                    .query(query),
                what,
            )
            .await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(0);
        }
        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .storage_context(&format!("{}: unexpected response body", what))?;
        Ok(rows.len() as u64)
    }

    /// Exact number of rows matching `filters`.
    async fn count(&self, table: &str, filters: &[(&str, String)], what: &str) -> Result<i64> {
        let mut query: Vec<(&str, String)> =
            vec![("select", "id".to_string()), ("limit", "1".to_string())];
        query.extend(filters.iter().cloned());
        let response = self
            .send(
                self.request(Method::GET, table)
                    .header("Prefer", "count=exact")
                    .query(&query),
                what,
            )
            .await?;
        let range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::storage_msg(format!("{}: response has no Content-Range", what)))?;
        range_total(range)
            .ok_or_else(|| Error::storage_msg(format!("{}: malformed Content-Range {}", what, range)))
    }

    /// All rows of `table`, fetched page by page until an empty page.
    async fn select_all<T: DeserializeOwned>(
        &self,
        table: &str,
        columns: &str,
        what: &str,
    ) -> Result<Vec<T>> {
        let mut rows = Vec::new();
        loop {
            let page: Vec<T> = self
                .select(
                    table,
                    &[
                        ("select", columns.to_string()),
                        ("order", "id.asc".into()),
                        ("limit", PAGE_SIZE.to_string()),
                        ("offset", rows.len().to_string()),
                    ],
                    what,
                )
                .await?;
            if page.is_empty() {
                return Ok(rows);
            }
            rows.extend(page);
        }
    }

    /// Delete rows inserted by a step whose follow-up failed.
    async fn roll_back(&self, table: &str, ids: &[&str]) {
        let filter = format!("in.({})", ids.join(","));
        if let Err(e) = self
            .delete_where(table, &[("id", filter)], "roll back insert")
            .await
        {
            tracing::error!(
                table,
                rows = ids.len(),
                error = %e,
                "failed to remove rows after a partial write; manual cleanup needed"
            );
        }
    }

    fn content_row(&self, version_id: &str, text: &str, compress: bool) -> Result<ContentRow> {
        let (content, compressed) = encode_blob(text, compress)?;
        Ok(ContentRow {
            version_id: version_id.to_string(),
            content,
            compressed,
            original_size: text.len() as i64,
        })
    }

    fn chunk_content_row(&self, chunk_id: &str, text: &str, compress: bool) -> Result<ChunkContentRow> {
        let (content, compressed) = encode_blob(text, compress)?;
        Ok(ChunkContentRow {
            chunk_id: chunk_id.to_string(),
            content,
            compressed,
        })
    }
}

fn eq(value: &str) -> String {
    format!("eq.{}", value)
}

#[async_trait]
impl Store for RemoteStore {
    async fn initialize(&self) -> Result<()> {
        let _: Vec<IgnoredAny> = self
            .select(
                "documents",
                &[("select", "id".into()), ("limit", "1".into())],
                "check documents table",
            )
            .await?;
        self.closed.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.select::<IgnoredAny>(
            "documents",
            &[("select", "id".into()), ("limit", "1".into())],
            "health check",
        )
        .await
        .is_ok()
    }

    async fn create_document(&self, doc: &Document) -> Result<()> {
        self.insert("documents", doc, "create document").await
    }

    async fn batch_create_documents(&self, docs: &[Document]) -> Result<()> {
        if docs.is_empty() {
            return Ok(());
        }
        self.insert("documents", docs, "batch create documents").await
    }

    async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        self.select_one("documents", &[("id", eq(id))], "get document")
            .await
    }

    async fn get_document_by_path(&self, file_path: &str) -> Result<Option<Document>> {
        self.select_one("documents", &[("file_path", eq(file_path))], "get document by path")
            .await
    }

    async fn update_document(&self, doc: &Document) -> Result<()> {
        let response = self
            .send(
                self.request(Method::PATCH, "documents")
                    .header("Prefer", "return=representation")
                    .query(&[("id", eq(&doc.id))])
                    .json(doc),
                "update document",
            )
            .await?;
        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .storage_context("update document: unexpected response body")?;
        if rows.is_empty() {
            return Err(Error::DocumentNotFound(doc.id.clone()));
        }
        Ok(())
    }

    async fn delete_document(&self, id: &str) -> Result<()> {
        self.delete_where("documents", &[("id", eq(id))], "delete document")
            .await?;
        Ok(())
    }

    async fn list_documents(
        &self,
        limit: i64,
        offset: i64,
        sort: DocumentSort,
    ) -> Result<Vec<Document>> {
        self.select(
            "documents",
            &[
                ("order", format!("{}.desc", sort.column())),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ],
            "list documents",
        )
        .await
    }

    async fn search_documents(&self, filter: &DocumentFilter) -> Result<Vec<Document>> {
        let mut query = vec![("order", "updated_at.desc".to_string())];
        if !filter.metadata.is_empty() {
            let json = serde_json::to_string(&filter.metadata)
                .storage_context("failed to encode filter")?;
            query.push(("metadata", format!("cs.{}", json)));
        }
        if let Some(file_type) = &filter.file_type {
            query.push(("file_type", eq(file_type)));
        }
        self.select("documents", &query, "search documents").await
    }

    async fn create_version(&self, version: &Version, content: Option<&str>) -> Result<()> {
        self.insert("versions", version, "create version").await?;
        if let Some(text) = content {
            let row = self.content_row(&version.id, text, self.compress)?;
            if let Err(e) = self.upsert("content_snapshots", &row, "store content").await {
                self.roll_back("versions", &[version.id.as_str()]).await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn batch_create_versions(&self, records: &[VersionRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let versions: Vec<&Version> = records.iter().map(|r| &r.version).collect();
        self.insert("versions", &versions, "batch create versions")
            .await?;

        let mut contents = Vec::new();
        for record in records {
            if let Some(text) = &record.content {
                contents.push(self.content_row(&record.version.id, text, self.compress)?);
            }
        }
        if !contents.is_empty() {
            if let Err(e) = self
                .upsert("content_snapshots", &contents, "batch store content")
                .await
            {
                let ids: Vec<&str> = versions.iter().map(|v| v.id.as_str()).collect();
                self.roll_back("versions", &ids).await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn get_version(&self, id: &str) -> Result<Option<Version>> {
        self.select_one("versions", &[("id", eq(id))], "get version")
            .await
    }

    async fn get_version_by_number(
        &self,
        document_id: &str,
        version_number: i64,
    ) -> Result<Option<Version>> {
        self.select_one(
            "versions",
            &[
                ("document_id", eq(document_id)),
                ("version_number", eq(&version_number.to_string())),
            ],
            "get version by number",
        )
        .await
    }

    async fn list_versions(
        &self,
        document_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Version>> {
        self.select(
            "versions",
            &[
                ("document_id", eq(document_id)),
                ("order", "version_number.desc".into()),
                ("limit", limit.to_string()),
                ("offset", offset.to_string()),
            ],
            "list versions",
        )
        .await
    }

    async fn delete_version(&self, id: &str) -> Result<()> {
        self.delete_where("versions", &[("id", eq(id))], "delete version")
            .await?;
        Ok(())
    }

    async fn get_latest_version(&self, document_id: &str) -> Result<Option<Version>> {
        self.select_one(
            "versions",
            &[
                ("document_id", eq(document_id)),
                ("order", "version_number.desc".into()),
                ("limit", "1".into()),
            ],
            "get latest version",
        )
        .await
    }

    async fn store_content(&self, version_id: &str, content: &str, compress: bool) -> Result<()> {
        let row = self.content_row(version_id, content, compress)?;
        self.upsert("content_snapshots", &row, "store content").await
    }

    async fn get_content(&self, version_id: &str) -> Result<Option<String>> {
        let row: Option<ContentRow> = self
            .select_one(
                "content_snapshots",
                &[("version_id", eq(version_id))],
                "get content",
            )
            .await?;
        row.map(|r| decode_blob(&r.content, r.compressed)).transpose()
    }

    async fn delete_content(&self, version_id: &str) -> Result<()> {
        self.delete_where(
            "content_snapshots",
            &[("version_id", eq(version_id))],
            "delete content",
        )
        .await?;
        Ok(())
    }

    async fn create_chunk(&self, chunk: &Chunk, text: Option<&str>) -> Result<()> {
        self.insert("chunks", chunk, "create chunk").await?;
        if let Some(text) = text {
            let row = self.chunk_content_row(&chunk.id, text, self.compress)?;
            if let Err(e) = self.upsert("chunk_content", &row, "store chunk content").await {
                self.roll_back("chunks", &[chunk.id.as_str()]).await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn batch_create_chunks(&self, records: &[ChunkRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let chunks: Vec<&Chunk> = records.iter().map(|r| &r.chunk).collect();
        self.insert("chunks", &chunks, "batch create chunks").await?;

        let mut contents = Vec::new();
        for record in records {
            if let Some(text) = &record.text {
                contents.push(self.chunk_content_row(&record.chunk.id, text, self.compress)?);
            }
        }
        if !contents.is_empty() {
            if let Err(e) = self
                .upsert("chunk_content", &contents, "batch store chunk content")
                .await
            {
                let ids: Vec<&str> = chunks.iter().map(|c| c.id.as_str()).collect();
                self.roll_back("chunks", &ids).await;
                return Err(e);
            }
        }
        Ok(())
    }

    async fn get_chunk(&self, id: &str) -> Result<Option<Chunk>> {
        self.select_one("chunks", &[("id", eq(id))], "get chunk").await
    }

    async fn get_chunks_by_version(&self, version_id: &str) -> Result<Vec<Chunk>> {
        self.select(
            "chunks",
            &[
                ("version_id", eq(version_id)),
                ("order", "chunk_index.asc".into()),
            ],
            "get chunks by version",
        )
        .await
    }

    async fn store_chunk_content(&self, chunk_id: &str, text: &str, compress: bool) -> Result<()> {
        let row = self.chunk_content_row(chunk_id, text, compress)?;
        self.upsert("chunk_content", &row, "store chunk content").await
    }

    async fn get_chunk_content(&self, chunk_id: &str) -> Result<Option<String>> {
        let row: Option<ChunkContentRow> = self
            .select_one("chunk_content", &[("chunk_id", eq(chunk_id))], "get chunk content")
            .await?;
        row.map(|r| decode_blob(&r.content, r.compressed)).transpose()
    }

    async fn delete_chunk_content(&self, chunk_id: &str) -> Result<()> {
        self.delete_where("chunk_content", &[("chunk_id", eq(chunk_id))], "delete chunk content")
            .await?;
        Ok(())
    }

    async fn delete_chunks_by_version(&self, version_id: &str) -> Result<u64> {
        self.delete_where("chunks", &[("version_id", eq(version_id))], "delete chunks")
            .await
    }

    async fn cleanup_by_age(&self, days: i64) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::days(days);
        self.delete_where(
            "versions",
            &[("created_at", format!("lt.{}", timestamp_param(&cutoff)))],
            "clean up old versions",
        )
        .await
    }

    async fn get_statistics(&self) -> Result<StorageStatistics> {
        let week_ago = Utc::now() - chrono::Duration::days(7);
        let total_documents = self.count("documents", &[], "count documents").await?;
        let total_versions = self.count("versions", &[], "count versions").await?;
        let recent_activity_count = self
            .count(
                "versions",
                &[("created_at", format!("gte.{}", timestamp_param(&week_ago)))],
                "count recent versions",
            )
            .await?;
        let documents: Vec<DocumentStatRow> = self
            .select_all("documents", "file_type,file_size,created_at", "document statistics")
            .await?;

        let mut documents_by_file_type = BTreeMap::new();
        for doc in &documents {
            *documents_by_file_type.entry(doc.file_type.clone()).or_insert(0) += 1;
        }

        Ok(StorageStatistics {
            total_documents,
            total_versions,
            total_storage_bytes: documents.iter().map(|d| d.file_size).sum(),
            average_versions_per_document: if total_documents > 0 {
                total_versions as f64 / total_documents as f64
            } else {
                0.0
            },
            documents_by_file_type,
            recent_activity_count,
            oldest_document_date: documents.iter().map(|d| d.created_at).min(),
            newest_document_date: documents.iter().map(|d| d.created_at).max(),
        })
    }
}
