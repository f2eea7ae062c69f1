//! REST content source: bearer-token auth, offset pagination.

use crate::error::{SourceError, SourceResult};
use crate::ContentSource;
use async_trait::async_trait;
use pagewarden_protocol::{Attachment, ContentUnit, Partition, PartitionKey};
use serde::Deserialize;
use tracing::warn;

const PAGE_SIZE: usize = 50;

#[derive(Debug, Deserialize)]
struct SpaceDto {
    key: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct PageDto {
    id: String,
    title: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    modified_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PageListDto {
    results: Vec<PageDto>,
    #[serde(default)]
    size: usize,
}

#[derive(Debug, Deserialize)]
struct AttachmentDto {
    name: String,
    #[serde(default)]
    media_type: String,
    #[serde(default)]
    modified_at: Option<i64>,
    /// Owning page, present on partition-wide attachment listings.
    #[serde(default)]
    page_id: Option<String>,
}

/// Content source backed by a wiki-style REST API.
pub struct HttpContentSource {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpContentSource {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client: reqwest::Client::new(),
        }
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.get(format!("{}{}", self.base_url, path));
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    /// Send a GET and map the status code into the error taxonomy.
    async fn get(&self, path: &str) -> SourceResult<reqwest::Response> {
        let response = self
            .request(path)
            .send()
            .await
            .map_err(SourceError::from)?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Err(SourceError::NotFound(path.to_string()));
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    /// Decode a JSON body; a malformed body is recovered as `None` and
    /// logged rather than propagated.
    async fn decode<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        response: reqwest::Response,
    ) -> Option<T> {
        match response.json::<T>().await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(path, error = %e, "Malformed source response body");
                None
            }
        }
    }

    async fn fetch_units(&self, path_base: &str, key: &PartitionKey) -> SourceResult<Vec<ContentUnit>> {
        let mut units = Vec::new();
        let mut start = 0usize;
        loop {
            let path = format!("{}start={}&limit={}", path_base, start, PAGE_SIZE);
            let response = self.get(&path).await?;
            let Some(batch) = self.decode::<PageListDto>(&path, response).await else {
                return Ok(units);
            };
            let count = batch.results.len();
            units.extend(batch.results.into_iter().map(|dto| ContentUnit {
                id: dto.id,
                title: dto.title,
                partition_key: key.clone(),
                body: dto.body,
                modified_at: dto.modified_at,
            }));
            if count < PAGE_SIZE || batch.size <= start + count {
                return Ok(units);
            }
            start += count;
        }
    }

    fn attachment_from_dto(unit_id: &str, dto: AttachmentDto) -> Attachment {
        Attachment {
            unit_id: dto.page_id.unwrap_or_else(|| unit_id.to_string()),
            name: dto.name,
            kind: dto.media_type,
            modified_at: dto.modified_at,
        }
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    async fn get_partition(&self, key: &PartitionKey) -> SourceResult<Option<Partition>> {
        let path = format!("/spaces/{}", key);
        let response = match self.get(&path).await {
            Ok(response) => response,
            Err(SourceError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(self
            .decode::<SpaceDto>(&path, response)
            .await
            .map(|dto| Partition {
                key: PartitionKey(dto.key),
                name: dto.name,
            }))
    }

    async fn list_partitions(&self) -> SourceResult<Vec<Partition>> {
        let path = "/spaces";
        let response = self.get(path).await?;
        let spaces = self
            .decode::<Vec<SpaceDto>>(path, response)
            .await
            .unwrap_or_default();
        Ok(spaces
            .into_iter()
            .map(|dto| Partition {
                key: PartitionKey(dto.key),
                name: dto.name,
            })
            .collect())
    }

    async fn list_units(&self, key: &PartitionKey) -> SourceResult<Vec<ContentUnit>> {
        self.fetch_units(&format!("/spaces/{}/pages?", key), key).await
    }

    async fn list_attachments(&self, unit_id: &str) -> SourceResult<Vec<Attachment>> {
        let path = format!("/pages/{}/attachments", unit_id);
        let response = self.get(&path).await?;
        let attachments = self
            .decode::<Vec<AttachmentDto>>(&path, response)
            .await
            .unwrap_or_default();
        Ok(attachments
            .into_iter()
            .map(|dto| Self::attachment_from_dto(unit_id, dto))
            .collect())
    }

    async fn download_attachment(
        &self,
        unit_id: &str,
        attachment_name: &str,
    ) -> SourceResult<Option<Vec<u8>>> {
        let path = format!("/pages/{}/attachments/{}", unit_id, attachment_name);
        let response = match self.get(&path).await {
            Ok(response) => response,
            Err(SourceError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let bytes = response.bytes().await.map_err(SourceError::from)?;
        Ok(Some(bytes.to_vec()))
    }

    async fn list_units_modified_since(
        &self,
        key: &PartitionKey,
        since_millis: i64,
    ) -> SourceResult<Vec<ContentUnit>> {
        self.fetch_units(
            &format!("/spaces/{}/pages?modified-since={}&", key, since_millis),
            key,
        )
        .await
    }

    async fn list_attachments_modified_since(
        &self,
        key: &PartitionKey,
        since_millis: i64,
    ) -> SourceResult<Vec<Attachment>> {
        let path = format!(
            "/spaces/{}/attachments?modified-since={}",
            key, since_millis
        );
        let response = self.get(&path).await?;
        let attachments = self
            .decode::<Vec<AttachmentDto>>(&path, response)
            .await
            .unwrap_or_default();
        Ok(attachments
            .into_iter()
            .map(|dto| Self::attachment_from_dto("", dto))
            .collect())
    }
}
