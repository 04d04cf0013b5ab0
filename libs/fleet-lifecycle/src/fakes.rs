//! In-crate fakes for the orchestrator's collaborators.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use registry_session::{CoordinationError, CoordinationResult, RegistryHandle, RegistryPaths};

use crate::config::LifecycleConfig;
use crate::container::ContainerRef;
use crate::error::{LifecycleError, LifecycleResult, RemoteError};
use crate::fleet::{
    ContainerControl, CredentialStore, Credentials, FleetMembership, ProcessRestart,
    RemoteManagement, RemoteSession,
};
use crate::orchestrator::{Collaborators, LifecycleOrchestrator};

pub(crate) type CallLog = Arc<Mutex<Vec<String>>>;

/// Pops scripted answers; the last one sticks.
fn next_answer(script: &mut VecDeque<bool>) -> Option<bool> {
    if script.len() > 1 {
        script.pop_front()
    } else {
        script.front().copied()
    }
}

pub(crate) struct FakeFleet {
    log: CallLog,
    containers: Mutex<Vec<ContainerRef>>,
    current: Mutex<ContainerRef>,
    alive: Mutex<HashMap<String, VecDeque<bool>>>,
    stopped: Mutex<HashSet<String>>,
    stop_errors: Mutex<HashMap<String, LifecycleError>>,
    start_errors: Mutex<HashMap<String, LifecycleError>>,
    membership_errors: Mutex<HashMap<String, LifecycleError>>,
}

impl FakeFleet {
    pub(crate) fn add(&self, container: ContainerRef) {
        let mut containers = self.containers.lock();
        containers.retain(|c| c.name != container.name);
        containers.push(container);
    }

    pub(crate) fn set_current(&self, container: ContainerRef) {
        *self.current.lock() = container;
    }

    /// Scripted `is_alive` answers for `name`, overriding stop/start tracking.
    pub(crate) fn script_alive(&self, name: &str, answers: &[bool]) {
        self.alive
            .lock()
            .insert(name.to_owned(), answers.iter().copied().collect());
    }

    pub(crate) fn mark_stopped(&self, name: &str) {
        self.stopped.lock().insert(name.to_owned());
    }

    pub(crate) fn fail_stop(&self, name: &str, err: LifecycleError) {
        self.stop_errors.lock().insert(name.to_owned(), err);
    }

    pub(crate) fn fail_start(&self, name: &str, err: LifecycleError) {
        self.start_errors.lock().insert(name.to_owned(), err);
    }

    /// Membership lookups for `name` fail with `err`.
    pub(crate) fn fail_membership(&self, name: &str, err: LifecycleError) {
        self.membership_errors.lock().insert(name.to_owned(), err);
    }

    fn membership_error(&self, container: &ContainerRef) -> LifecycleResult<()> {
        match self.membership_errors.lock().get(&container.name) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter(|c| c.starts_with("stop:") || c.starts_with("start:"))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl FleetMembership for FakeFleet {
    async fn resolve(&self, pattern: &str) -> LifecycleResult<Vec<ContainerRef>> {
        let containers = self.containers.lock();
        let matched: Vec<ContainerRef> = match pattern.strip_suffix('*') {
            Some(prefix) => containers
                .iter()
                .filter(|c| c.name.starts_with(prefix))
                .cloned()
                .collect(),
            None => containers
                .iter()
                .filter(|c| c.name == pattern)
                .cloned()
                .collect(),
        };
        if matched.is_empty() && !pattern.contains('*') {
            return Err(LifecycleError::Validation(format!(
                "container '{pattern}' does not exist"
            )));
        }
        Ok(matched)
    }

    async fn is_managed(&self, container: &ContainerRef) -> LifecycleResult<bool> {
        self.membership_error(container)?;
        Ok(container.managed)
    }

    async fn is_ensemble_member(&self, container: &ContainerRef) -> LifecycleResult<bool> {
        self.membership_error(container)?;
        Ok(container.ensemble_member)
    }

    async fn current_container(&self) -> LifecycleResult<ContainerRef> {
        Ok(self.current.lock().clone())
    }
}

#[async_trait]
impl ContainerControl for FakeFleet {
    async fn stop(&self, container: &ContainerRef, force: bool) -> LifecycleResult<()> {
        self.log
            .lock()
            .push(format!("stop:{}:{force}", container.name));
        if let Some(err) = self.stop_errors.lock().get(&container.name) {
            return Err(err.clone());
        }
        self.stopped.lock().insert(container.name.clone());
        Ok(())
    }

    async fn start(&self, container: &ContainerRef, force: bool) -> LifecycleResult<()> {
        self.log
            .lock()
            .push(format!("start:{}:{force}", container.name));
        if let Some(err) = self.start_errors.lock().get(&container.name) {
            return Err(err.clone());
        }
        self.stopped.lock().remove(&container.name);
        Ok(())
    }

    async fn is_alive(&self, container: &ContainerRef) -> LifecycleResult<bool> {
        if let Some(script) = self.alive.lock().get_mut(&container.name) {
            if let Some(answer) = next_answer(script) {
                return Ok(answer);
            }
        }
        Ok(!self.stopped.lock().contains(&container.name))
    }

    async fn update_credentials(
        &self,
        container: &ContainerRef,
        credentials: &Credentials,
    ) -> LifecycleResult<()> {
        self.log
            .lock()
            .push(format!("credentials:{}:{}", container.name, credentials.user));
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct FakeRegistry {
    present: Mutex<HashMap<String, VecDeque<bool>>>,
    polls: AtomicU32,
    failing: AtomicBool,
}

impl FakeRegistry {
    pub(crate) fn script(&self, path: &str, answers: &[bool]) {
        self.present
            .lock()
            .insert(path.to_owned(), answers.iter().copied().collect());
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RegistryHandle for FakeRegistry {
    async fn exists(&self, path: &str) -> CoordinationResult<bool> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoordinationError::NotConnected("fake registry down".into()));
        }
        Ok(self
            .present
            .lock()
            .get_mut(path)
            .and_then(next_answer)
            .unwrap_or(false))
    }

    async fn children(&self, _path: &str) -> CoordinationResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn read_data(&self, path: &str) -> CoordinationResult<Vec<u8>> {
        Err(CoordinationError::NoNode(path.to_owned()))
    }
}

pub(crate) struct FakeRemote {
    log: CallLog,
    auth_failures: AtomicU32,
    connect_error: Mutex<Option<RemoteError>>,
    invoke_error: Mutex<Option<RemoteError>>,
    objects: Mutex<Vec<String>>,
    pub(crate) connects: Mutex<Vec<(String, Option<Credentials>)>>,
}

impl FakeRemote {
    pub(crate) fn reject_credentials(&self, times: u32) {
        self.auth_failures.store(times, Ordering::SeqCst);
    }

    pub(crate) fn fail_connect(&self, err: RemoteError) {
        *self.connect_error.lock() = Some(err);
    }

    pub(crate) fn fail_invoke(&self, err: RemoteError) {
        *self.invoke_error.lock() = Some(err);
    }

    pub(crate) fn set_objects(&self, objects: &[&str]) {
        *self.objects.lock() = objects.iter().map(|o| o.to_string()).collect();
    }

    pub(crate) fn invocations(&self) -> Vec<String> {
        self.log
            .lock()
            .iter()
            .filter(|c| c.starts_with("invoke:"))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RemoteManagement for FakeRemote {
    async fn connect(
        &self,
        endpoint: &str,
        credentials: Option<&Credentials>,
    ) -> Result<Box<dyn RemoteSession>, RemoteError> {
        self.connects
            .lock()
            .push((endpoint.to_owned(), credentials.cloned()));
        self.log.lock().push(format!("connect:{endpoint}"));
        if self
            .auth_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(RemoteError::Authentication("401 Unauthorized".into()));
        }
        if let Some(err) = self.connect_error.lock().clone() {
            return Err(err);
        }
        Ok(Box::new(FakeSession {
            log: Arc::clone(&self.log),
            objects: self.objects.lock().clone(),
            invoke_error: self.invoke_error.lock().clone(),
        }))
    }
}

struct FakeSession {
    log: CallLog,
    objects: Vec<String>,
    invoke_error: Option<RemoteError>,
}

#[async_trait]
impl RemoteSession for FakeSession {
    async fn list_objects(&self) -> Result<Vec<String>, RemoteError> {
        Ok(self.objects.clone())
    }

    async fn invoke(
        &self,
        object: &str,
        operation: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value, RemoteError> {
        self.log.lock().push(format!(
            "invoke:{object}:{operation}:{}",
            serde_json::Value::Array(args)
        ));
        match &self.invoke_error {
            Some(err) => Err(err.clone()),
            None => Ok(serde_json::Value::Null),
        }
    }
}

pub(crate) struct FakeCredentials {
    log: CallLog,
    current: Mutex<Option<Credentials>>,
    prompt_answer: Mutex<Option<Credentials>>,
}

impl FakeCredentials {
    pub(crate) fn answer_prompt_with(&self, credentials: Credentials) {
        *self.prompt_answer.lock() = Some(credentials);
    }
}

#[async_trait]
impl CredentialStore for FakeCredentials {
    fn get(&self) -> Option<Credentials> {
        self.current.lock().clone()
    }

    async fn prompt(&self, container: &ContainerRef) -> Option<Credentials> {
        self.log.lock().push(format!("prompt:{}", container.name));
        let answer = self.prompt_answer.lock().clone();
        *self.current.lock() = answer.clone();
        answer
    }

    fn clear(&self) {
        self.log.lock().push("clear".into());
        *self.current.lock() = None;
    }
}

#[derive(Default)]
pub(crate) struct FakeProcess {
    requests: AtomicU32,
    failing: AtomicBool,
}

impl FakeProcess {
    pub(crate) fn set_failing(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub(crate) fn requests(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }
}

impl ProcessRestart for FakeProcess {
    fn request_restart(&self) -> LifecycleResult<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(LifecycleError::operation("root", "runtime refused to stop"));
        }
        Ok(())
    }
}

/// Fakes wired into an orchestrator with default timings.
pub(crate) struct Harness {
    pub(crate) log: CallLog,
    pub(crate) fleet: Arc<FakeFleet>,
    pub(crate) registry: Arc<FakeRegistry>,
    pub(crate) remote: Arc<FakeRemote>,
    pub(crate) credentials: Arc<FakeCredentials>,
    pub(crate) process: Arc<FakeProcess>,
    pub(crate) config: LifecycleConfig,
}

impl Harness {
    /// Managed root containers named `names`; the caller is `root`.
    pub(crate) fn new<const N: usize>(names: [&str; N]) -> Self {
        let log: CallLog = Arc::default();
        let fleet = Arc::new(FakeFleet {
            log: Arc::clone(&log),
            containers: Mutex::new(names.iter().map(|n| ContainerRef::new(*n)).collect()),
            current: Mutex::new(ContainerRef::new("root")),
            alive: Mutex::default(),
            stopped: Mutex::default(),
            stop_errors: Mutex::default(),
            start_errors: Mutex::default(),
            membership_errors: Mutex::default(),
        });
        let remote = Arc::new(FakeRemote {
            log: Arc::clone(&log),
            auth_failures: AtomicU32::new(0),
            connect_error: Mutex::new(None),
            invoke_error: Mutex::new(None),
            objects: Mutex::new(vec![
                "io.fleet:type=Fleet".into(),
                "osgi.core:type=framework,version=1.7,uuid=4f2a".into(),
            ]),
            connects: Mutex::default(),
        });
        let credentials = Arc::new(FakeCredentials {
            log: Arc::clone(&log),
            current: Mutex::new(Some(Credentials::new("admin", "admin"))),
            prompt_answer: Mutex::new(None),
        });
        Self {
            log,
            fleet,
            registry: Arc::default(),
            remote,
            credentials,
            process: Arc::default(),
            config: LifecycleConfig::default(),
        }
    }

    pub(crate) fn orchestrator(&self) -> LifecycleOrchestrator {
        LifecycleOrchestrator::new(
            Collaborators {
                membership: self.fleet.clone(),
                control: self.fleet.clone(),
                remote: self.remote.clone(),
                credentials: self.credentials.clone(),
                process: self.process.clone(),
            },
            self.registry.clone(),
            RegistryPaths::default(),
            self.config.clone(),
        )
    }

    pub(crate) fn log(&self) -> Vec<String> {
        self.log.lock().clone()
    }
}
