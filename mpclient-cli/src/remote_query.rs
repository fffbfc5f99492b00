//! Object queries forwarded to the management point's query endpoint.
//!
//! Request: `{"spec": QuerySpec, "query": "SELECT ..", "count": bool}`.
//! Reply: `{"rows": [..]}` for queries, `{"count": n}` for counts.

use async_trait::async_trait;
use mpclient_core::{ObjectQuery, QueryError, QuerySpec, Row};
use serde::{Deserialize, Serialize};

use crate::transport::Transport;

#[derive(Debug, Serialize)]
struct QueryRequest<'a> {
    spec: &'a QuerySpec,
    query: String,
    count: bool,
}

#[derive(Debug, Deserialize)]
struct RowsReply {
    rows: Vec<Row>,
}

#[derive(Debug, Deserialize)]
struct CountReply {
    count: u64,
}

#[derive(Debug, thiserror::Error)]
#[error("query endpoint answered HTTP {0}")]
struct QueryStatus(u16);

/// [`ObjectQuery`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpObjectQuery {
    client: reqwest::Client,
    url: String,
}

impl HttpObjectQuery {
    #[must_use]
    pub fn new(transport: &Transport) -> Self {
        Self {
            client: transport.http().clone(),
            url: transport.url_for(&transport.endpoints().query),
        }
    }

    async fn post<T>(&self, spec: &QuerySpec, count: bool) -> Result<T, QueryError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let request = QueryRequest {
            spec,
            query: if count {
                spec.to_count_string()
            } else {
                spec.to_query_string()
            },
            count,
        };
        tracing::debug!(url = %self.url, query = %request.query, "object query");

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(backend)?;
        let status = response.status();
        if !status.is_success() {
            return Err(backend(QueryStatus(status.as_u16())));
        }
        response.json::<T>().await.map_err(backend)
    }
}

fn backend(e: impl std::error::Error + Send + Sync + 'static) -> QueryError {
    QueryError::Backend(Box::new(e))
}

#[async_trait]
impl ObjectQuery for HttpObjectQuery {
    async fn query(&self, spec: &QuerySpec) -> Result<Vec<Row>, QueryError> {
        let reply: RowsReply = self.post(spec, false).await?;
        Ok(reply.rows)
    }

    async fn count(&self, spec: &QuerySpec) -> Result<u64, QueryError> {
        let reply: CountReply = self.post(spec, true).await?;
        Ok(reply.count)
    }
}
