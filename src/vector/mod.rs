//! Vector store client.
//!
//! The vector store is an external service treated as an opaque collection:
//! add documents, query by text, fetch by metadata filter. Everything the
//! runtime needs sits behind [`VectorCollection`] so tests can run against
//! an in-memory fake.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::error::{Result, WardenError};

/// One stored document plus its metadata.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub document: String,
    pub metadata: Value,
}

#[async_trait]
pub trait VectorCollection: Send + Sync {
    /// Add documents with ids and per-document metadata.
    async fn add(
        &self,
        documents: Vec<String>,
        ids: Vec<String>,
        metadatas: Vec<Value>,
    ) -> Result<()>;

    /// Semantic query, optionally restricted by a metadata filter.
    async fn query(
        &self,
        query_text: &str,
        n_results: usize,
        filter: Option<Value>,
    ) -> Result<Vec<VectorHit>>;

    /// Fetch documents by metadata filter, most recent first is not
    /// guaranteed — callers sort on their own metadata.
    async fn get(&self, filter: Value, limit: usize) -> Result<Vec<VectorHit>>;
}

/// REST client for one named collection of the vector store service.
pub struct HttpVectorStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
}

impl HttpVectorStore {
    pub fn new(base_url: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            collection: collection.into(),
        }
    }

    fn url(&self, op: &str) -> String {
        format!(
            "{}/collections/{}/{op}",
            self.base_url.trim_end_matches('/'),
            self.collection
        )
    }

    async fn post(&self, op: &str, body: Value) -> Result<Value> {
        let response = self
            .client
            .post(self.url(op))
            .json(&body)
            .send()
            .await
            .map_err(|e| WardenError::VectorStore(format!("{op} request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(WardenError::VectorStore(format!(
                "{op} returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| WardenError::VectorStore(format!("{op} returned malformed JSON: {e}")))
    }
}

fn parse_hits(value: &Value) -> Vec<VectorHit> {
    let documents = value["documents"].as_array().cloned().unwrap_or_default();
    let metadatas = value["metadatas"].as_array().cloned().unwrap_or_default();
    documents
        .iter()
        .enumerate()
        .filter_map(|(i, doc)| {
            doc.as_str().map(|d| VectorHit {
                document: d.to_string(),
                metadata: metadatas.get(i).cloned().unwrap_or(Value::Null),
            })
        })
        .collect()
}

#[async_trait]
impl VectorCollection for HttpVectorStore {
    async fn add(
        &self,
        documents: Vec<String>,
        ids: Vec<String>,
        metadatas: Vec<Value>,
    ) -> Result<()> {
        self.post(
            "add",
            json!({
                "documents": documents,
                "ids": ids,
                "metadatas": metadatas,
            }),
        )
        .await?;
        Ok(())
    }

    async fn query(
        &self,
        query_text: &str,
        n_results: usize,
        filter: Option<Value>,
    ) -> Result<Vec<VectorHit>> {
        let mut body = json!({
            "query_text": query_text,
            "n_results": n_results,
        });
        if let Some(filter) = filter {
            body["where"] = filter;
        }
        let response = self.post("query", body).await?;
        Ok(parse_hits(&response))
    }

    async fn get(&self, filter: Value, limit: usize) -> Result<Vec<VectorHit>> {
        let response = self
            .post("get", json!({ "where": filter, "limit": limit }))
            .await?;
        Ok(parse_hits(&response))
    }
}

#[cfg(test)]
pub mod testing {
    //! In-memory collection used across the skill and memory tests.

    use std::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct FakeCollection {
        pub entries: Mutex<Vec<VectorHit>>,
        pub fail: Mutex<bool>,
    }

    impl FakeCollection {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_fail(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }

        fn check_fail(&self) -> Result<()> {
            if *self.fail.lock().unwrap() {
                Err(WardenError::VectorStore("collection offline".into()))
            } else {
                Ok(())
            }
        }

        fn matches(filter: &Value, metadata: &Value) -> bool {
            filter
                .as_object()
                .map(|f| f.iter().all(|(k, v)| &metadata[k] == v))
                .unwrap_or(true)
        }
    }

    #[async_trait]
    impl VectorCollection for FakeCollection {
        async fn add(
            &self,
            documents: Vec<String>,
            _ids: Vec<String>,
            metadatas: Vec<Value>,
        ) -> Result<()> {
            self.check_fail()?;
            let mut entries = self.entries.lock().unwrap();
            for (doc, meta) in documents.into_iter().zip(metadatas) {
                entries.push(VectorHit {
                    document: doc,
                    metadata: meta,
                });
            }
            Ok(())
        }

        async fn query(
            &self,
            query_text: &str,
            n_results: usize,
            filter: Option<Value>,
        ) -> Result<Vec<VectorHit>> {
            self.check_fail()?;
            let entries = self.entries.lock().unwrap();
            Ok(entries
                .iter()
                .filter(|hit| {
                    filter
                        .as_ref()
                        .map(|f| Self::matches(f, &hit.metadata))
                        .unwrap_or(true)
                })
                .filter(|hit| {
                    // Crude relevance: substring match, empty query matches all.
                    query_text.is_empty()
                        || hit
                            .document
                            .to_lowercase()
                            .contains(&query_text.to_lowercase())
                })
                .take(n_results)
                .cloned()
                .collect())
        }

        async fn get(&self, filter: Value, limit: usize) -> Result<Vec<VectorHit>> {
            self.check_fail()?;
            let entries = self.entries.lock().unwrap();
            Ok(entries
                .iter()
                .filter(|hit| Self::matches(&filter, &hit.metadata))
                .take(limit)
                .cloned()
                .collect())
        }
    }
}
