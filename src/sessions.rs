//! Server-side chat sessions.
//!
//! The backend stores each conversation under a session id. These calls let
//! a user look at past sessions and delete them. Continuing one is done by
//! handing [`Session::resume`](crate::models::Session::resume) to a new
//! [`ChatPipeline`](crate::chat::ChatPipeline).

use reqwest::Method;

use crate::client::{segment_path, ApiRequest, RequestClient};
use crate::error::ClassifiedError;
use crate::models::SessionSummary;

pub const SESSIONS_PATH: &str = "/api/v1/chat/sessions";
const SESSION_PREFIX: &str = "/api/v1/chat/sessions/";

#[derive(Clone)]
pub struct SessionDirectory {
    client: RequestClient,
}

impl SessionDirectory {
    pub fn new(client: RequestClient) -> Self {
        Self { client }
    }

    /// Most recently updated first, as ordered by the server.
    pub async fn list(&self, skip: u32, limit: u32) -> Result<Vec<SessionSummary>, ClassifiedError> {
        let request = ApiRequest::new(Method::GET, SESSIONS_PATH)
            .query("skip", skip)
            .query("limit", limit.clamp(1, 100));
        self.client.execute(&request).await?.json()
    }

    pub async fn get(&self, id: &str) -> Result<SessionSummary, ClassifiedError> {
        let path = segment_path(SESSION_PREFIX, id);
        self.client.send(Method::GET, &path, None).await?.json()
    }

    pub async fn delete(&self, id: &str) -> Result<(), ClassifiedError> {
        let path = segment_path(SESSION_PREFIX, id);
        self.client.send(Method::DELETE, &path, None).await?;
        Ok(())
    }
}
