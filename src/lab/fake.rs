//! In-memory lab service for tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::types::*;
use super::LabService;
use crate::error::ServiceError;

#[derive(Default)]
struct FakeState {
    templates: Vec<LabTemplate>,
    projects: Vec<LabProject>,
    nodes: Vec<(String, LabNode)>,
    links: Vec<(String, LabLink)>,
    next_id: usize,
}

impl FakeState {
    fn id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }
}

pub struct FakeLab {
    state: Mutex<FakeState>,
    unreachable: AtomicBool,
    failing_creates: Mutex<HashSet<String>>,
    failing_starts: Mutex<HashSet<String>>,
    no_console: Mutex<HashSet<String>>,
    console_ports: Mutex<HashMap<String, u16>>,
    console_host: String,
    project_creates: AtomicUsize,
}

impl FakeLab {
    pub fn new() -> Self {
        let mut state = FakeState::default();
        for (id, name) in [("t-router", "Cisco 2911"), ("t-switch", "IOSv-L2"), ("t-vpcs", "VPCS")] {
            state.templates.push(LabTemplate {
                template_id: id.to_string(),
                name: name.to_string(),
                template_type: "qemu".to_string(),
            });
        }
        Self {
            state: Mutex::new(state),
            unreachable: AtomicBool::new(false),
            failing_creates: Mutex::new(HashSet::new()),
            failing_starts: Mutex::new(HashSet::new()),
            no_console: Mutex::new(HashSet::new()),
            console_ports: Mutex::new(HashMap::new()),
            console_host: "0.0.0.0".to_string(),
            project_creates: AtomicUsize::new(0),
        }
    }

    pub fn set_unreachable(&self, down: bool) {
        self.unreachable.store(down, Ordering::SeqCst);
    }

    pub fn fail_create(&self, node: &str) {
        self.failing_creates.lock().unwrap().insert(node.to_string());
    }

    pub fn fail_start(&self, node: &str) {
        self.failing_starts.lock().unwrap().insert(node.to_string());
    }

    /// Node starts but never reports a console port
    pub fn without_console(&self, node: &str) {
        self.no_console.lock().unwrap().insert(node.to_string());
    }

    /// Console port reported for `node` once started
    pub fn console_port(&self, node: &str, port: u16) {
        self.console_ports.lock().unwrap().insert(node.to_string(), port);
    }

    pub fn project_creates(&self) -> usize {
        self.project_creates.load(Ordering::SeqCst)
    }

    pub fn project_count(&self) -> usize {
        self.state.lock().unwrap().projects.len()
    }

    pub fn node_count(&self, project_id: &str) -> usize {
        self.state.lock().unwrap().nodes.iter().filter(|(p, _)| p == project_id).count()
    }

    pub fn link_count(&self, project_id: &str) -> usize {
        self.state.lock().unwrap().links.iter().filter(|(p, _)| p == project_id).count()
    }

    fn reachable(&self) -> Result<(), ServiceError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(ServiceError::Unreachable("connection refused".into()));
        }
        Ok(())
    }

    fn rejected(status: u16, body: &str) -> ServiceError {
        ServiceError::Rejected {
            status,
            body: body.to_string(),
        }
    }
}

#[async_trait]
impl LabService for FakeLab {
    async fn version(&self) -> Result<ServerVersion, ServiceError> {
        self.reachable()?;
        Ok(ServerVersion {
            version: "2.2.43".into(),
            local: true,
        })
    }

    async fn list_templates(&self) -> Result<Vec<LabTemplate>, ServiceError> {
        self.reachable()?;
        Ok(self.state.lock().unwrap().templates.clone())
    }

    async fn list_projects(&self) -> Result<Vec<LabProject>, ServiceError> {
        self.reachable()?;
        Ok(self.state.lock().unwrap().projects.clone())
    }

    async fn create_project(&self, name: &str) -> Result<LabProject, ServiceError> {
        self.reachable()?;
        // Give concurrent callers a chance to interleave
        tokio::task::yield_now().await;
        let mut state = self.state.lock().unwrap();
        if state.projects.iter().any(|p| p.name == name) {
            return Err(Self::rejected(409, "project name already exists"));
        }
        self.project_creates.fetch_add(1, Ordering::SeqCst);
        let project = LabProject {
            project_id: state.id("project"),
            name: name.to_string(),
            status: Some("opened".into()),
        };
        state.projects.push(project.clone());
        Ok(project)
    }

    async fn open_project(&self, project_id: &str) -> Result<(), ServiceError> {
        self.reachable()?;
        let mut state = self.state.lock().unwrap();
        match state.projects.iter_mut().find(|p| p.project_id == project_id) {
            Some(p) => {
                p.status = Some("opened".into());
                Ok(())
            }
            None => Err(Self::rejected(404, "project not found")),
        }
    }

    async fn list_nodes(&self, project_id: &str) -> Result<Vec<LabNode>, ServiceError> {
        self.reachable()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .nodes
            .iter()
            .filter(|(p, _)| p == project_id)
            .map(|(_, n)| n.clone())
            .collect())
    }

    async fn create_node(
        &self,
        project_id: &str,
        template_id: &str,
        name: &str,
        _x: i32,
        _y: i32,
    ) -> Result<LabNode, ServiceError> {
        self.reachable()?;
        if self.failing_creates.lock().unwrap().contains(name) {
            return Err(Self::rejected(500, "emulator image missing"));
        }
        let mut state = self.state.lock().unwrap();
        if !state.templates.iter().any(|t| t.template_id == template_id) {
            return Err(Self::rejected(404, "template not found"));
        }
        let node = LabNode {
            node_id: state.id("node"),
            name: name.to_string(),
            console: None,
            console_host: Some(self.console_host.clone()),
            console_type: Some("telnet".into()),
            status: Some("stopped".into()),
        };
        state.nodes.push((project_id.to_string(), node.clone()));
        Ok(node)
    }

    async fn start_node(&self, project_id: &str, node_id: &str) -> Result<(), ServiceError> {
        self.reachable()?;
        let mut state = self.state.lock().unwrap();
        let next_port = 5000 + state.nodes.len() as u16;
        let node = state
            .nodes
            .iter_mut()
            .find(|(p, n)| p == project_id && n.node_id == node_id)
            .map(|(_, n)| n)
            .ok_or_else(|| Self::rejected(404, "node not found"))?;
        if self.failing_starts.lock().unwrap().contains(&node.name) {
            return Err(Self::rejected(500, "failed to start emulator"));
        }
        node.status = Some("started".into());
        if !self.no_console.lock().unwrap().contains(&node.name) {
            let port = self.console_ports.lock().unwrap().get(&node.name).copied();
            node.console = Some(port.unwrap_or(next_port));
        }
        Ok(())
    }

    async fn list_links(&self, project_id: &str) -> Result<Vec<LabLink>, ServiceError> {
        self.reachable()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .links
            .iter()
            .filter(|(p, _)| p == project_id)
            .map(|(_, l)| l.clone())
            .collect())
    }

    async fn create_link(
        &self,
        project_id: &str,
        a: LinkNodeRef,
        b: LinkNodeRef,
    ) -> Result<LabLink, ServiceError> {
        self.reachable()?;
        let mut state = self.state.lock().unwrap();
        let taken = state
            .links
            .iter()
            .any(|(p, l)| p == project_id && (l.uses(&a) || l.uses(&b)));
        if taken {
            return Err(Self::rejected(409, "port already connected"));
        }
        let link = LabLink {
            link_id: state.id("link"),
            nodes: vec![a, b],
        };
        state.links.push((project_id.to_string(), link.clone()));
        Ok(link)
    }
}
