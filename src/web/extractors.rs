//! Request validation and parameter extraction.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use serde::Deserialize;
use uuid::Uuid;

use crate::models::{ChannelQuery, ChannelSort, FeedType};

/// Per-request correlation id, generated by the request-id middleware and
/// echoed in every error payload and log line.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext {
    pub request_id: Uuid,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RequestId(pub Uuid);

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = parts
            .extensions
            .get::<RequestId>()
            .map(|id| id.0)
            .unwrap_or_else(Uuid::new_v4);
        Ok(RequestContext { request_id })
    }
}

/// Query parameters accepted by the channel listing endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelListParams {
    pub enabled: Option<bool>,
    pub feed_type: Option<String>,
    pub sort: Option<String>,
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl ChannelListParams {
    pub fn into_query(self) -> Result<ChannelQuery, String> {
        let feed_type = match self.feed_type.as_deref() {
            None => None,
            Some(raw) => Some(
                FeedType::parse(raw).ok_or_else(|| format!("invalid feed_type: {raw}"))?,
            ),
        };

        let sort = match self.sort.as_deref() {
            None | Some("created_at") => ChannelSort::CreatedAt,
            Some("updated_at") => ChannelSort::UpdatedAt,
            Some("last_refresh_at") => ChannelSort::LastRefreshAt,
            Some(raw) => return Err(format!("invalid sort: {raw}")),
        };

        Ok(ChannelQuery {
            enabled: self.enabled,
            feed_type,
            sort,
            page: self.page.unwrap_or(1).max(1),
            limit: self.limit.unwrap_or(50).clamp(1, 1000),
        })
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EpisodeListParams {
    pub status: Option<String>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefreshParams {
    #[serde(default)]
    pub force: bool,
}
