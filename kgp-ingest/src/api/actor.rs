//! Caller identity extractor
//!
//! Identity and capabilities arrive as request headers set by the fronting
//! gateway; role storage is not this service's concern.

use std::collections::BTreeSet;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use crate::error::ApiError;
use crate::governance::{Actor, Capability};

pub const ACTOR_ID_HEADER: &str = "x-actor-id";
pub const ACTOR_CAPABILITIES_HEADER: &str = "x-actor-capabilities";

/// Extracts the calling [`Actor`] from `X-Actor-Id` / `X-Actor-Capabilities`
#[derive(Debug, Clone)]
pub struct CallingActor(pub Actor);

#[async_trait]
impl<S> FromRequestParts<S> for CallingActor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header_str(parts, ACTOR_ID_HEADER)?
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ApiError::BadRequest("missing X-Actor-Id header".to_string()))?
            .to_string();

        let capabilities = match header_str(parts, ACTOR_CAPABILITIES_HEADER)? {
            Some(list) => parse_capabilities(list).map_err(ApiError::BadRequest)?,
            None => BTreeSet::new(),
        };

        Ok(CallingActor(Actor { id, capabilities }))
    }
}

fn header_str<'a>(parts: &'a Parts, name: &str) -> Result<Option<&'a str>, ApiError> {
    parts
        .headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| ApiError::BadRequest(format!("header {} is not valid text", name)))
        })
        .transpose()
}

/// Parse a comma-separated capability list; blanks are ignored
pub fn parse_capabilities(list: &str) -> Result<BTreeSet<Capability>, String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect()
}
