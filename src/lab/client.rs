use async_trait::async_trait;
use reqwest::{Client, Response};
use std::time::Duration;

use super::types::*;
use super::LabService;
use crate::error::ServiceError;

/// REST client for the lab-management server (GNS3 v2 API)
pub struct LabClient {
    base_url: String,
    client: Client,
}

impl LabClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::Unreachable(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: url.trim_end_matches('/').to_string(),
            client,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}/v2{}", self.base_url, path)
    }

    /// Turn a non-success status into `Rejected`, otherwise decode the body
    async fn decode<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T, ServiceError> {
        let resp = Self::check(resp).await?;
        resp.json().await.map_err(|e| ServiceError::Decode(e.to_string()))
    }

    async fn check(resp: Response) -> Result<Response, ServiceError> {
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ServiceError::Rejected { status, body });
        }
        Ok(resp)
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, endpoint: &str) -> Result<T, ServiceError> {
        let resp = self
            .client
            .get(self.api_url(endpoint))
            .header("Accept", "application/json")
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn post<T, B>(&self, endpoint: &str, body: &B) -> Result<T, ServiceError>
    where
        T: serde::de::DeserializeOwned,
        B: serde::Serialize,
    {
        let resp = self.client.post(self.api_url(endpoint)).json(body).send().await?;
        Self::decode(resp).await
    }

    /// POST with an empty JSON body, ignoring the response payload
    async fn post_action(&self, endpoint: &str) -> Result<(), ServiceError> {
        let resp = self
            .client
            .post(self.api_url(endpoint))
            .json(&serde_json::json!({}))
            .send()
            .await?;
        Self::check(resp).await.map(|_| ())
    }
}

#[async_trait]
impl LabService for LabClient {
    async fn version(&self) -> Result<ServerVersion, ServiceError> {
        self.get("/version").await
    }

    async fn list_templates(&self) -> Result<Vec<LabTemplate>, ServiceError> {
        self.get("/templates").await
    }

    // --- Projects ---

    async fn list_projects(&self) -> Result<Vec<LabProject>, ServiceError> {
        self.get("/projects").await
    }

    async fn create_project(&self, name: &str) -> Result<LabProject, ServiceError> {
        self.post("/projects", &ProjectCreate { name: name.to_string() }).await
    }

    async fn open_project(&self, project_id: &str) -> Result<(), ServiceError> {
        self.post_action(&format!("/projects/{}/open", project_id)).await
    }

    // --- Nodes ---

    async fn list_nodes(&self, project_id: &str) -> Result<Vec<LabNode>, ServiceError> {
        self.get(&format!("/projects/{}/nodes", project_id)).await
    }

    async fn create_node(
        &self,
        project_id: &str,
        template_id: &str,
        name: &str,
        x: i32,
        y: i32,
    ) -> Result<LabNode, ServiceError> {
        let node: LabNode = self
            .post(
                &format!("/projects/{}/templates/{}", project_id, template_id),
                &NodeFromTemplate { x, y },
            )
            .await?;

        // Template instantiation picks its own name; rename to the planned one
        if node.name == name {
            return Ok(node);
        }
        let resp = self
            .client
            .put(self.api_url(&format!("/projects/{}/nodes/{}", project_id, node.node_id)))
            .json(&NodeRename { name: name.to_string() })
            .send()
            .await?;
        Self::decode(resp).await
    }

    async fn start_node(&self, project_id: &str, node_id: &str) -> Result<(), ServiceError> {
        self.post_action(&format!("/projects/{}/nodes/{}/start", project_id, node_id))
            .await
    }

    // --- Links ---

    async fn list_links(&self, project_id: &str) -> Result<Vec<LabLink>, ServiceError> {
        self.get(&format!("/projects/{}/links", project_id)).await
    }

    async fn create_link(
        &self,
        project_id: &str,
        a: LinkNodeRef,
        b: LinkNodeRef,
    ) -> Result<LabLink, ServiceError> {
        self.post(
            &format!("/projects/{}/links", project_id),
            &LinkCreate { nodes: vec![a, b] },
        )
        .await
    }
}
