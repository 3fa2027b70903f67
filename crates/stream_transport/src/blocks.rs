use reqwest::{Client, Response};
use serde::Deserialize;
use stream_protocol::ContentBlock;

use crate::config::TransportConfig;
use crate::error::{parse_error_message, TransportError};
use crate::url::blocks_url;

/// Page size used when listing blocks; the server's own maximum.
pub const PAGE_LIMIT: usize = 500;

/// One page of the block listing.
#[derive(Debug, Clone, Deserialize)]
pub struct BlockPage {
    pub blocks: Vec<ContentBlock>,
    #[serde(default)]
    pub total: usize,
}

/// REST client for the persisted blocks of a session.
#[derive(Debug, Clone)]
pub struct BlocksClient {
    http: Client,
    config: TransportConfig,
}

impl BlocksClient {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Fetches one page, ordered by sequence number.
    pub async fn list_page(&self, skip: usize, limit: usize) -> Result<BlockPage, TransportError> {
        let url = blocks_url(&self.config.base_url, &self.config.session_id)?;
        let response = self
            .http
            .get(url)
            .query(&[("skip", skip), ("limit", limit)])
            .send()
            .await?;
        let response = ensure_success(response).await?;
        Ok(response.json::<BlockPage>().await?)
    }

    /// Fetches every persisted block of the session in sequence order.
    pub async fn list_blocks(&self) -> Result<Vec<ContentBlock>, TransportError> {
        let mut blocks = Vec::new();
        loop {
            let page = self.list_page(blocks.len(), PAGE_LIMIT).await?;
            let received = page.blocks.len();
            blocks.extend(page.blocks);
            if received == 0 || blocks.len() >= page.total {
                break;
            }
        }
        tracing::debug!(count = blocks.len(), "loaded persisted blocks");
        Ok(blocks)
    }

    pub async fn get_block(&self, block_id: &str) -> Result<ContentBlock, TransportError> {
        let mut url = blocks_url(&self.config.base_url, &self.config.session_id)?;
        url.path_segments_mut()
            .map_err(|_| TransportError::InvalidUrl(self.config.base_url.clone()))?
            .push(block_id);
        let response = ensure_success(self.http.get(url).send().await?).await?;
        Ok(response.json::<ContentBlock>().await?)
    }
}

async fn ensure_success(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status {
        status,
        message: parse_error_message(status, &body),
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::BlockPage;

    #[test]
    fn page_deserializes_server_listing() {
        let page: BlockPage = serde_json::from_value(json!({
            "blocks": [{
                "id": "b-1",
                "chat_session_id": "s-1",
                "sequence_number": 0,
                "block_type": "user_text",
                "author": "user",
                "content": {"text": "hello"},
                "parent_block_id": null,
                "block_metadata": {},
                "created_at": "2025-01-10T09:30:00.123456",
                "updated_at": null
            }],
            "total": 1
        }))
        .expect("page");

        assert_eq!(page.total, 1);
        assert_eq!(page.blocks[0].text_content(), Some("hello"));
        assert!(page.blocks[0].created_at.is_some());
    }
}
