use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use skylight_proto::{
    Assignment, AssignmentIdentity, AssignmentNew, CardIdentity, CardNew, SequenceIdentity,
    SequenceNew,
};
use tracing::debug;
use url::Url;

use crate::api::AssignmentApi;
use crate::config::Credentials;
use crate::error::{SdkError, SdkResult};

/// REST client for the assignments API, authenticated with the integration's
/// basic credentials.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: Url,
    username: String,
    password: String,
}

impl ApiClient {
    pub fn new(base_url: Url, username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            base_url,
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn from_credentials(credentials: &Credentials) -> Self {
        Self::new(
            credentials.api_url.clone(),
            credentials.username.clone(),
            credentials.password.clone(),
        )
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub async fn get_assignment(&self, assignment_id: &str) -> SdkResult<Assignment> {
        let url = self.endpoint(&["v1", "assignments", assignment_id])?;
        let res = self.authed(self.http.get(url)).send().await?;
        read_json(res).await
    }

    /// Purging removes the assignment outright; otherwise it is archived.
    pub async fn delete_assignment(&self, assignment_id: &str, purge: bool) -> SdkResult<()> {
        let url = self.endpoint(&["v1", "assignments", assignment_id])?;
        debug!(target = "skylight.api", assignment_id, purge, "deleting assignment");
        let res = self
            .authed(self.http.delete(url))
            .query(&[("purge", purge)])
            .send()
            .await?;
        ensure_success(res).await.map(drop)
    }

    fn endpoint(&self, segments: &[&str]) -> SdkResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| SdkError::InvalidBaseUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.username, Some(&self.password))
    }

    async fn post_json<B, T>(&self, url: Url, body: &B) -> SdkResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(target = "skylight.api", %url, "post");
        let res = self.authed(self.http.post(url)).json(body).send().await?;
        read_json(res).await
    }
}

async fn ensure_success(res: Response) -> SdkResult<Response> {
    if res.status().is_success() {
        Ok(res)
    } else {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        Err(SdkError::UnexpectedStatus { status, body })
    }
}

async fn read_json<T: DeserializeOwned>(res: Response) -> SdkResult<T> {
    Ok(ensure_success(res).await?.json::<T>().await?)
}

#[async_trait]
impl AssignmentApi for ApiClient {
    async fn create_assignment(&self, assignment: &AssignmentNew) -> SdkResult<AssignmentIdentity> {
        let url = self.endpoint(&["v1", "assignments"])?;
        self.post_json(url, assignment).await
    }

    async fn create_sequences(
        &self,
        assignment_id: &str,
        sequences: &[SequenceNew],
    ) -> SdkResult<Vec<SequenceIdentity>> {
        let url = self.endpoint(&["v1", "assignments", assignment_id, "sequences", "bulk"])?;
        self.post_json(url, sequences).await
    }

    async fn create_sequence(
        &self,
        assignment_id: &str,
        sequence: &SequenceNew,
    ) -> SdkResult<SequenceIdentity> {
        let url = self.endpoint(&["v1", "assignments", assignment_id, "sequences"])?;
        self.post_json(url, sequence).await
    }

    async fn create_cards(
        &self,
        assignment_id: &str,
        sequence_id: &str,
        cards: &[CardNew],
    ) -> SdkResult<Vec<CardIdentity>> {
        let url = self.endpoint(&[
            "v1",
            "assignments",
            assignment_id,
            "sequences",
            sequence_id,
            "cards",
        ])?;
        self.post_json(url, cards).await
    }
}
