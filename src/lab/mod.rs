pub mod client;
pub mod provisioner;
pub mod types;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;

use crate::error::ServiceError;
pub use client::LabClient;
pub use provisioner::Provisioner;
pub use types::*;

/// LabService is the seam to the lab-management server. The REST client
/// implements it for real runs; tests plug in an in-memory lab.
#[async_trait]
pub trait LabService: Send + Sync {
    async fn version(&self) -> Result<ServerVersion, ServiceError>;
    async fn list_templates(&self) -> Result<Vec<LabTemplate>, ServiceError>;

    async fn list_projects(&self) -> Result<Vec<LabProject>, ServiceError>;
    async fn create_project(&self, name: &str) -> Result<LabProject, ServiceError>;
    async fn open_project(&self, project_id: &str) -> Result<(), ServiceError>;

    async fn list_nodes(&self, project_id: &str) -> Result<Vec<LabNode>, ServiceError>;
    /// Instantiate `template_id` at (x, y) and give the node `name`
    async fn create_node(
        &self,
        project_id: &str,
        template_id: &str,
        name: &str,
        x: i32,
        y: i32,
    ) -> Result<LabNode, ServiceError>;
    async fn start_node(&self, project_id: &str, node_id: &str) -> Result<(), ServiceError>;

    async fn list_links(&self, project_id: &str) -> Result<Vec<LabLink>, ServiceError>;
    async fn create_link(
        &self,
        project_id: &str,
        a: LinkNodeRef,
        b: LinkNodeRef,
    ) -> Result<LabLink, ServiceError>;
}
