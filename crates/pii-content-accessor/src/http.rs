use std::time::Duration;

use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION},
    Client,
};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use url::Url;

use pii_types::{AttachmentName, PageId, SpaceKey};

use crate::{AttachmentInfo, ContentAccessError, ContentBackend, Page, Space};

#[derive(Debug, Deserialize)]
struct SpaceDto {
    key: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct PageDto {
    id: String,
    #[serde(rename = "spaceKey")]
    space_key: String,
    title: String,
    body: String,
}

#[derive(Debug, Deserialize)]
struct AttachmentDto {
    name: String,
    #[serde(rename = "contentType")]
    content_type: String,
}

/// Generic-REST [`ContentBackend`] over a bearer-token-authenticated content
/// platform. Assumes `GET {base}/spaces`, `GET {base}/spaces/{key}/pages`,
/// `GET {base}/pages/{id}`, `GET {base}/pages/{id}/attachments`, and
/// `GET {base}/pages/{id}/attachments/{name}` (raw bytes) — adapt the path
/// templates here if a deployed wiki's actual API differs.
pub struct HttpContentBackend {
    client: Client,
    base_url: Url,
}

impl HttpContentBackend {
    /// Construct a backend against `base_url`, authenticating every request
    /// with `token` as a bearer credential.
    pub fn new(base_url: Url, token: Secret<String>, timeout: Duration) -> Result<Self, ContentAccessError> {
        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", token.expose_secret());
        let mut header_value = HeaderValue::from_str(&auth_value)
            .map_err(|e| ContentAccessError::Backend(format!("invalid token: {e}")))?;
        header_value.set_sensitive(true);
        headers.insert(AUTHORIZATION, header_value);

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ContentAccessError::Backend(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> Result<Url, ContentAccessError> {
        self.base_url
            .join(path)
            .map_err(|e| ContentAccessError::Backend(format!("invalid path {path}: {e}")))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, ContentAccessError> {
        let url = self.url(path)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ContentAccessError::Backend(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ContentAccessError::NotFound(path.to_string()));
        }
        let response = response
            .error_for_status()
            .map_err(|e| ContentAccessError::Backend(e.to_string()))?;
        response
            .json::<T>()
            .await
            .map_err(|e| ContentAccessError::Backend(e.to_string()))
    }
}

#[async_trait::async_trait]
impl ContentBackend for HttpContentBackend {
    async fn list_spaces(&self) -> Result<Vec<Space>, ContentAccessError> {
        let dtos: Vec<SpaceDto> = self.get_json("spaces").await?;
        dtos.into_iter()
            .map(|dto| {
                Ok(Space {
                    key: SpaceKey::new(dto.key).map_err(|e| ContentAccessError::Backend(e.to_string()))?,
                    name: dto.name,
                })
            })
            .collect()
    }

    async fn get_page(&self, id: &PageId) -> Result<Page, ContentAccessError> {
        let dto: PageDto = self.get_json(&format!("pages/{id}")).await?;
        Ok(Page {
            id: id.clone(),
            space_key: SpaceKey::new(dto.space_key).map_err(|e| ContentAccessError::Backend(e.to_string()))?,
            title: dto.title,
            body: dto.body,
        })
    }

    async fn list_pages(&self, space_key: &SpaceKey) -> Result<Vec<Page>, ContentAccessError> {
        let dtos: Vec<PageDto> = self.get_json(&format!("spaces/{space_key}/pages")).await?;
        dtos.into_iter()
            .map(|dto| {
                Ok(Page {
                    id: PageId::new(dto.id).map_err(|e| ContentAccessError::Backend(e.to_string()))?,
                    space_key: space_key.clone(),
                    title: dto.title,
                    body: dto.body,
                })
            })
            .collect()
    }

    async fn list_attachments(
        &self,
        page_id: &PageId,
    ) -> Result<Vec<AttachmentInfo>, ContentAccessError> {
        let dtos: Vec<AttachmentDto> = self.get_json(&format!("pages/{page_id}/attachments")).await?;
        dtos.into_iter()
            .map(|dto| {
                Ok(AttachmentInfo {
                    name: AttachmentName::new(dto.name).map_err(|e| ContentAccessError::Backend(e.to_string()))?,
                    page_id: page_id.clone(),
                    content_type: dto.content_type,
                })
            })
            .collect()
    }

    async fn download_attachment(
        &self,
        page_id: &PageId,
        name: &AttachmentName,
    ) -> Result<Vec<u8>, ContentAccessError> {
        let url = self.url(&format!("pages/{page_id}/attachments/{name}"))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ContentAccessError::Backend(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ContentAccessError::NotFound(format!("{page_id}/{name}")));
        }
        let response = response
            .error_for_status()
            .map_err(|e| ContentAccessError::Backend(e.to_string()))?;
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| ContentAccessError::Backend(e.to_string()))
    }
}
