use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio::sync::Mutex;

use super::types::{LabNode, LabTemplate, LinkNodeRef, ServerVersion};
use super::LabService;
use crate::error::{LabError, ServiceError};
use crate::models::{ConsoleEndpoint, LinkEndpoint, LinkHandle, LinkSpec, NodeHandle, NodeSpec, ProjectHandle};

/// Hosts a node may report when its console listens on every interface
const WILDCARD_HOSTS: &[&str] = &["", "0.0.0.0", "::", "0:0:0:0:0:0:0:0"];

/// Provisioner realizes a topology in the lab service. Every operation attaches
/// to what already exists by name, so re-running against a populated project
/// is safe.
pub struct Provisioner {
    service: Arc<dyn LabService>,
    server_host: String,
    /// Held across the whole lookup-or-create so concurrent callers single-flight
    projects: Mutex<HashMap<String, ProjectHandle>>,
    templates: Mutex<Option<Vec<LabTemplate>>>,
    placed: AtomicUsize,
}

impl Provisioner {
    pub fn new(service: Arc<dyn LabService>, server_host: &str) -> Self {
        Self {
            service,
            server_host: server_host.to_string(),
            projects: Mutex::new(HashMap::new()),
            templates: Mutex::new(None),
            placed: AtomicUsize::new(0),
        }
    }

    pub async fn server_version(&self) -> Result<ServerVersion, LabError> {
        self.service.version().await.map_err(|e| e.into_lab_error("server"))
    }

    pub async fn list_templates(&self) -> Result<Vec<LabTemplate>, LabError> {
        let mut cache = self.templates.lock().await;
        if let Some(templates) = cache.as_ref() {
            return Ok(templates.clone());
        }
        let templates = self
            .service
            .list_templates()
            .await
            .map_err(|e| e.into_lab_error("templates"))?;
        *cache = Some(templates.clone());
        Ok(templates)
    }

    /// Find the project by name or create it, then make sure it is open
    pub async fn create_project(&self, name: &str) -> Result<ProjectHandle, LabError> {
        let mut cache = self.projects.lock().await;
        if let Some(handle) = cache.get(name) {
            return Ok(handle.clone());
        }

        let target = format!("project {}", name);
        let handle = match self.find_project(name).await? {
            Some(handle) => {
                tracing::info!("Attaching to existing project '{}' ({})", name, handle.project_id);
                self.service
                    .open_project(&handle.project_id)
                    .await
                    .map_err(|e| e.into_lab_error(&target))?;
                handle
            }
            None => match self.service.create_project(name).await {
                Ok(project) => {
                    tracing::info!("Created project '{}' ({})", name, project.project_id);
                    ProjectHandle {
                        project_id: project.project_id,
                        name: project.name,
                    }
                }
                // Someone else created it between our lookup and create
                Err(ServiceError::Rejected { status: 409, .. }) => self
                    .find_project(name)
                    .await?
                    .ok_or_else(|| LabError::provisioning(&target, "name taken but project not listed"))?,
                Err(e) => return Err(e.into_lab_error(&target)),
            },
        };

        cache.insert(name.to_string(), handle.clone());
        Ok(handle)
    }

    async fn find_project(&self, name: &str) -> Result<Option<ProjectHandle>, LabError> {
        let projects = self
            .service
            .list_projects()
            .await
            .map_err(|e| e.into_lab_error(&format!("project {}", name)))?;
        Ok(projects
            .into_iter()
            .find(|p| p.name == name)
            .map(|p| ProjectHandle {
                project_id: p.project_id,
                name: p.name,
            }))
    }

    /// Attach to a node with the same name, or instantiate the node's template
    pub async fn create_node(&self, project: &ProjectHandle, spec: &NodeSpec) -> Result<NodeHandle, LabError> {
        let target = format!("node {}", spec.name);
        let nodes = self.nodes(project, &target).await?;
        if let Some(node) = nodes.into_iter().find(|n| n.name == spec.name) {
            tracing::debug!("Node {} already exists ({})", spec.name, node.node_id);
            return Ok(NodeHandle {
                node_id: node.node_id,
                name: node.name,
            });
        }

        let template_id = self
            .list_templates()
            .await?
            .into_iter()
            .find(|t| t.name == spec.template || t.template_id == spec.template)
            .map(|t| t.template_id)
            .ok_or_else(|| LabError::provisioning(&target, format!("template '{}' not found", spec.template)))?;

        let (x, y) = self.next_position();
        let node = self
            .service
            .create_node(&project.project_id, &template_id, &spec.name, x, y)
            .await
            .map_err(|e| e.into_lab_error(&target))?;
        tracing::info!("Created node {} from '{}' ({})", spec.name, spec.template, node.node_id);
        Ok(NodeHandle {
            node_id: node.node_id,
            name: node.name,
        })
    }

    /// Lay nodes out on a grid so the project is readable in the GUI
    fn next_position(&self) -> (i32, i32) {
        let idx = self.placed.fetch_add(1, Ordering::Relaxed) as i32;
        ((idx % 4) * 200 - 300, (idx / 4) * 150 - 150)
    }

    /// Connect two node ports. An identical existing link is reused; a port
    /// already patched elsewhere is an error.
    pub async fn create_link(&self, project: &ProjectHandle, link: &LinkSpec) -> Result<LinkHandle, LabError> {
        let target = format!("link {} <-> {}", link.a, link.b);
        let nodes = self.nodes(project, &target).await?;
        let a = port_ref(&nodes, &link.a).ok_or_else(|| LabError::provisioning(&target, format!("node {} not in project", link.a.node)))?;
        let b = port_ref(&nodes, &link.b).ok_or_else(|| LabError::provisioning(&target, format!("node {} not in project", link.b.node)))?;

        let existing = self
            .service
            .list_links(&project.project_id)
            .await
            .map_err(|e| e.into_lab_error(&target))?;
        if let Some(found) = existing.iter().find(|l| l.joins(&a, &b)) {
            tracing::debug!("Link {} already exists ({})", target, found.link_id);
            return Ok(LinkHandle {
                link_id: found.link_id.clone(),
            });
        }
        if existing.iter().any(|l| l.uses(&a) || l.uses(&b)) {
            return Err(LabError::provisioning(&target, "port already connected to another node"));
        }

        let created = self
            .service
            .create_link(&project.project_id, a, b)
            .await
            .map_err(|e| e.into_lab_error(&target))?;
        tracing::info!("Created {} ({})", target, created.link_id);
        Ok(LinkHandle {
            link_id: created.link_id,
        })
    }

    /// Start every node in the project. Returns the nodes that failed to start;
    /// only a failure to list the project's nodes is an error of the call itself.
    pub async fn start_all(&self, project: &ProjectHandle, workers: usize) -> Result<Vec<(String, LabError)>, LabError> {
        let nodes = self.nodes(project, &format!("project {}", project.name)).await?;
        let failures: Vec<(String, LabError)> = stream::iter(
            nodes.into_iter().filter(|n| n.status.as_deref() != Some("started")),
        )
            .map(|node| async move {
                let target = format!("node {}", node.name);
                match self.service.start_node(&project.project_id, &node.node_id).await {
                    Ok(()) => {
                        tracing::info!("Started node {}", node.name);
                        None
                    }
                    Err(e) => {
                        tracing::warn!("Failed to start node {}: {}", node.name, e);
                        Some((node.name, e.into_lab_error(&target)))
                    }
                }
            })
            .buffer_unordered(workers.max(1))
            .filter_map(|failure| async move { failure })
            .collect()
            .await;
        Ok(failures)
    }

    /// Console endpoints of started nodes, keyed by node name. Nodes that are
    /// stopped or report no console port are absent.
    pub async fn resolve_console_endpoints(&self, project: &ProjectHandle) -> Result<HashMap<String, ConsoleEndpoint>, LabError> {
        let nodes = self.nodes(project, &format!("project {}", project.name)).await?;
        Ok(nodes
            .into_iter()
            .filter(|n| n.is_started() && n.console_type.as_deref() != Some("none"))
            .filter_map(|n| {
                let port = n.console.filter(|p| *p != 0)?;
                let host = match n.console_host.as_deref().map(str::trim) {
                    Some(h) if !WILDCARD_HOSTS.contains(&h) => h,
                    _ => self.server_host.as_str(),
                };
                Some((n.name.clone(), ConsoleEndpoint::new(host, port)))
            })
            .collect())
    }

    async fn nodes(&self, project: &ProjectHandle, target: &str) -> Result<Vec<LabNode>, LabError> {
        self.service
            .list_nodes(&project.project_id)
            .await
            .map_err(|e| e.into_lab_error(target))
    }
}

fn port_ref(nodes: &[LabNode], end: &LinkEndpoint) -> Option<LinkNodeRef> {
    nodes.iter().find(|n| n.name == end.node).map(|n| LinkNodeRef {
        node_id: n.node_id.clone(),
        adapter_number: end.adapter,
        port_number: end.port,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lab::fake::FakeLab;
    use crate::models::NodeRole;

    fn setup() -> (Arc<FakeLab>, Provisioner) {
        let lab = Arc::new(FakeLab::new());
        let prov = Provisioner::new(lab.clone(), "172.16.132.128");
        (lab, prov)
    }

    #[tokio::test]
    async fn test_create_project_attaches_on_second_call() {
        let (lab, prov) = setup();
        let first = prov.create_project("VLAN_Lab").await.unwrap();

        // Fresh provisioner has no cache, must find the project by name
        let other = Provisioner::new(lab.clone(), "127.0.0.1");
        let second = other.create_project("VLAN_Lab").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(lab.project_count(), 1);
        assert_eq!(lab.project_creates(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_create_project_single_flight() {
        let (lab, prov) = setup();
        let (a, b, c) = tokio::join!(
            prov.create_project("VLAN_Lab"),
            prov.create_project("VLAN_Lab"),
            prov.create_project("VLAN_Lab"),
        );
        assert_eq!(a.clone().unwrap(), b.unwrap());
        assert_eq!(a.unwrap(), c.unwrap());
        assert_eq!(lab.project_creates(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_create_project_across_provisioners() {
        let lab = Arc::new(FakeLab::new());
        let p1 = Provisioner::new(lab.clone(), "127.0.0.1");
        let p2 = Provisioner::new(lab.clone(), "127.0.0.1");
        let (a, b) = tokio::join!(p1.create_project("VLAN_Lab"), p2.create_project("VLAN_Lab"));
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(lab.project_count(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_service_is_fatal() {
        let (lab, prov) = setup();
        lab.set_unreachable(true);
        let err = prov.create_project("VLAN_Lab").await.unwrap_err();
        assert!(matches!(err, LabError::LabUnreachable(_)));
        assert!(prov.server_version().await.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_create_node_attaches_by_name() {
        let (lab, prov) = setup();
        let project = prov.create_project("VLAN_Lab").await.unwrap();
        let spec = NodeSpec::new("PC1", NodeRole::Host, "VPCS");

        let first = prov.create_node(&project, &spec).await.unwrap();
        let second = prov.create_node(&project, &spec).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(lab.node_count(&project.project_id), 1);
    }

    #[tokio::test]
    async fn test_create_node_unknown_template() {
        let (_lab, prov) = setup();
        let project = prov.create_project("VLAN_Lab").await.unwrap();
        let spec = NodeSpec::new("R1", NodeRole::Router, "Cisco 7200");
        let err = prov.create_node(&project, &spec).await.unwrap_err();
        assert!(matches!(err, LabError::ProvisioningFailed { .. }));
        assert!(!err.is_fatal());
    }

    #[tokio::test]
    async fn test_create_link_reuses_and_rejects_busy_port() {
        let (lab, prov) = setup();
        let project = prov.create_project("VLAN_Lab").await.unwrap();
        for (name, role, template) in [
            ("R1", NodeRole::Router, "Cisco 2911"),
            ("SW1", NodeRole::Switch, "IOSv-L2"),
            ("PC1", NodeRole::Host, "VPCS"),
        ] {
            prov.create_node(&project, &NodeSpec::new(name, role, template)).await.unwrap();
        }

        let link = LinkSpec::new(LinkEndpoint::new("R1", 0, 0), LinkEndpoint::new("SW1", 0, 0));
        let first = prov.create_link(&project, &link).await.unwrap();
        let reversed = LinkSpec::new(LinkEndpoint::new("SW1", 0, 0), LinkEndpoint::new("R1", 0, 0));
        let second = prov.create_link(&project, &reversed).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(lab.link_count(&project.project_id), 1);

        let busy = LinkSpec::new(LinkEndpoint::new("PC1", 0, 0), LinkEndpoint::new("SW1", 0, 0));
        let err = prov.create_link(&project, &busy).await.unwrap_err();
        assert!(matches!(err, LabError::ProvisioningFailed { .. }));

        let missing = LinkSpec::new(LinkEndpoint::new("PC9", 0, 0), LinkEndpoint::new("SW1", 1, 0));
        assert!(prov.create_link(&project, &missing).await.is_err());
    }

    #[tokio::test]
    async fn test_console_endpoints_after_start() {
        let (lab, prov) = setup();
        let project = prov.create_project("VLAN_Lab").await.unwrap();
        for name in ["PC1", "PC2", "PC3"] {
            prov.create_node(&project, &NodeSpec::new(name, NodeRole::Host, "VPCS")).await.unwrap();
        }
        lab.console_port("PC1", 5001);
        lab.without_console("PC2");
        lab.fail_start("PC3");

        assert!(prov.resolve_console_endpoints(&project).await.unwrap().is_empty());

        let failures = prov.start_all(&project, 2).await.unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].0, "PC3");

        let endpoints = prov.resolve_console_endpoints(&project).await.unwrap();
        assert_eq!(endpoints.len(), 1);
        // Wildcard console host is rewritten to the server address
        assert_eq!(endpoints["PC1"], ConsoleEndpoint::new("172.16.132.128", 5001));
    }
}
