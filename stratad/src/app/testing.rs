// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! In-memory cluster and a runtime wired to the in-memory SQLite store, shared
//! by the app-layer tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tokio::sync::{Notify, mpsc};

use crate::adapters::db::{EngineStore, SqliteStoreAdapter};
use crate::adapters::time::SystemClock;
use crate::app::catalog::{
    ApplicationDeployment, ApplicationInterface, CatalogKind, ComputePreference, ComputeResource,
    DataMovementInterface, GatewayResourceProfile, JobSubmissionInterface, ResourceJobManager,
    StoragePreference, StorageResource,
};
use crate::app::errors::{AppError, AppErrorKind, AppResult, codes};
use crate::app::monitor::JobReport;
use crate::app::ports::{
    ByteReader, ByteWriter, CatalogPort, ClusterAccess, ClusterSpec, CommandOutput, RegistryPort,
    RemoteCluster, RemoteClusterFactory, StatusEvent, StatusPublisherPort, SubmissionOutput,
};
use crate::app::runtime::{Runtime, RuntimeSettings};
use crate::app::types::{
    DataMovementProtocol, DataType, InputDataObject, JobState, JobSubmissionProtocol, MonitorMode,
    OutputDataObject, ProcessModel, ProcessState, ProcessStatus, ResourceJobManagerType,
    ResourceScheduling, SecurityProtocol, ServerInfo,
};

pub const GATEWAY: &str = "gw";
pub const COMPUTE_HOST: &str = "login.hpc.example.org";
pub const STORAGE_HOST: &str = "storage.example.org";

type Files = Arc<Mutex<BTreeMap<String, Vec<u8>>>>;

struct CaptureWriter {
    path: String,
    buf: Vec<u8>,
    files: Files,
}

impl AsyncWrite for CaptureWriter {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.buf.extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.files
            .lock()
            .expect("files lock")
            .insert(this.path.clone(), std::mem::take(&mut this.buf));
        Poll::Ready(Ok(()))
    }
}

/// Scriptable cluster that keeps files in memory and records every call.
pub struct FakeCluster {
    server: ServerInfo,
    pub files: Files,
    pub dirs: Mutex<BTreeSet<String>>,
    pub calls: Mutex<Vec<String>>,
    pub submissions: Mutex<VecDeque<AppResult<SubmissionOutput>>>,
    pub job_states: Mutex<HashMap<String, JobState>>,
    pub jobs_by_name: Mutex<HashMap<String, String>>,
    pub exec_ok: Mutex<bool>,
    pub read_transport_failures: Mutex<u32>,
    pub cancel_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeCluster {
    pub fn new(host: &str) -> Self {
        Self {
            server: ServerInfo {
                host: host.to_string(),
                port: 22,
                login_user: "alice".into(),
                credential_token: "tok".into(),
            },
            files: Arc::new(Mutex::new(BTreeMap::new())),
            dirs: Mutex::new(BTreeSet::new()),
            calls: Mutex::new(Vec::new()),
            submissions: Mutex::new(VecDeque::new()),
            job_states: Mutex::new(HashMap::new()),
            jobs_by_name: Mutex::new(HashMap::new()),
            exec_ok: Mutex::new(true),
            read_transport_failures: Mutex::new(0),
            cancel_gate: Mutex::new(None),
        }
    }

    pub fn put_file(&self, path: &str, contents: &[u8]) {
        self.files
            .lock()
            .expect("files lock")
            .insert(path.to_string(), contents.to_vec());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().expect("files lock").get(path).cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.starts_with(prefix))
            .collect()
    }

    pub fn push_submission(&self, result: AppResult<SubmissionOutput>) {
        self.submissions
            .lock()
            .expect("submissions lock")
            .push_back(result);
    }

    pub fn set_job_state(&self, job_id: &str, state: JobState) {
        self.job_states
            .lock()
            .expect("states lock")
            .insert(job_id.to_string(), state);
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

pub fn accepted(job_id: &str) -> AppResult<SubmissionOutput> {
    Ok(SubmissionOutput {
        job_id: Some(job_id.to_string()),
        output: CommandOutput {
            stdout: format!("Submitted batch job {job_id}\n"),
            stderr: String::new(),
            exit_code: 0,
        },
    })
}

#[async_trait]
impl RemoteCluster for FakeCluster {
    fn server_info(&self) -> &ServerInfo {
        &self.server
    }

    async fn submit(&self, script_path: &str, _work_dir: &str) -> AppResult<SubmissionOutput> {
        self.record(format!("submit:{script_path}"));
        let next = self.submissions.lock().expect("submissions lock").pop_front();
        next.unwrap_or_else(|| accepted("1001"))
    }

    async fn copy_to(&self, local: &Path, remote: &str) -> AppResult<()> {
        self.record(format!("copy_to:{remote}"));
        let data = std::fs::read(local)
            .map_err(|err| AppError::task(format!("read {}: {err}", local.display())))?;
        self.put_file(remote, &data);
        Ok(())
    }

    async fn copy_from(&self, remote: &str, local: &Path) -> AppResult<()> {
        self.record(format!("copy_from:{remote}"));
        let Some(data) = self.file(remote) else {
            return Err(AppError::with_message(
                AppErrorKind::NotFound,
                codes::NOT_FOUND,
                format!("{remote} does not exist"),
            ));
        };
        if let Some(parent) = local.parent() {
            std::fs::create_dir_all(parent).expect("create local parent");
        }
        std::fs::write(local, data).expect("write local copy");
        Ok(())
    }

    async fn make_directory(&self, path: &str) -> AppResult<()> {
        self.record(format!("mkdir:{path}"));
        self.dirs.lock().expect("dirs lock").insert(path.to_string());
        Ok(())
    }

    async fn list_directory(&self, path: &str) -> AppResult<Vec<String>> {
        let prefix = format!("{}/", path.trim_end_matches('/'));
        Ok(self
            .files
            .lock()
            .expect("files lock")
            .keys()
            .filter_map(|key| key.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect())
    }

    async fn cancel(&self, job_id: &str) -> AppResult<JobState> {
        self.record(format!("cancel:{job_id}"));
        let gate = self.cancel_gate.lock().expect("gate lock").clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut states = self.job_states.lock().expect("states lock");
        let previous = states.get(job_id).copied().unwrap_or(JobState::Unknown);
        states.insert(job_id.to_string(), JobState::Canceled);
        Ok(previous)
    }

    async fn status(&self, job_id: &str) -> AppResult<JobState> {
        Ok(self
            .job_states
            .lock()
            .expect("states lock")
            .get(job_id)
            .copied()
            .unwrap_or(JobState::Unknown))
    }

    async fn job_id_by_name(&self, job_name: &str, _user: &str) -> AppResult<Option<String>> {
        self.record(format!("job_id_by_name:{job_name}"));
        Ok(self
            .jobs_by_name
            .lock()
            .expect("names lock")
            .get(job_name)
            .cloned())
    }

    async fn statuses(
        &self,
        _user: &str,
        job_ids: &[String],
    ) -> AppResult<HashMap<String, JobState>> {
        let states = self.job_states.lock().expect("states lock");
        Ok(job_ids
            .iter()
            .map(|id| (id.clone(), states.get(id).copied().unwrap_or(JobState::Unknown)))
            .collect())
    }

    async fn exec(&self, command: &str) -> AppResult<bool> {
        self.record(format!("exec:{command}"));
        Ok(*self.exec_ok.lock().expect("exec lock"))
    }

    async fn remove_path(&self, path: &str) -> AppResult<()> {
        self.record(format!("rm:{path}"));
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.files
            .lock()
            .expect("files lock")
            .retain(|key, _| key != path && !key.starts_with(&prefix));
        self.dirs.lock().expect("dirs lock").remove(path);
        Ok(())
    }

    async fn file_size(&self, path: &str) -> AppResult<Option<u64>> {
        Ok(self.file(path).map(|data| data.len() as u64))
    }

    async fn open_read(&self, path: &str) -> AppResult<ByteReader> {
        {
            let mut failures = self.read_transport_failures.lock().expect("failures lock");
            if *failures > 0 {
                *failures -= 1;
                return Err(AppError::transport("connection reset by peer"));
            }
        }
        let data = self.file(path).ok_or_else(|| {
            AppError::with_message(
                AppErrorKind::NotFound,
                codes::NOT_FOUND,
                format!("{path} does not exist"),
            )
        })?;
        Ok(Box::new(io::Cursor::new(data)))
    }

    async fn open_write(&self, path: &str) -> AppResult<ByteWriter> {
        Ok(Box::new(CaptureWriter {
            path: path.to_string(),
            buf: Vec::new(),
            files: Arc::clone(&self.files),
        }))
    }
}

/// Hands out one fake per host and remembers every spec it was asked for.
#[derive(Default)]
pub struct FakeClusterFactory {
    pub clusters: Mutex<HashMap<String, Arc<FakeCluster>>>,
    pub specs: Mutex<Vec<ClusterSpec>>,
}

impl FakeClusterFactory {
    pub fn host(&self, host: &str) -> Arc<FakeCluster> {
        Arc::clone(
            self.clusters
                .lock()
                .expect("clusters lock")
                .entry(host.to_string())
                .or_insert_with(|| Arc::new(FakeCluster::new(host))),
        )
    }
}

#[async_trait]
impl RemoteClusterFactory for FakeClusterFactory {
    async fn cluster(&self, spec: &ClusterSpec) -> AppResult<Arc<dyn RemoteCluster>> {
        match spec.access {
            ClusterAccess::Submission(JobSubmissionProtocol::Unicore)
            | ClusterAccess::Transfer(DataMovementProtocol::GridFtp)
            | ClusterAccess::Transfer(DataMovementProtocol::UnicoreStorageService) => {
                return Err(AppError::remote_init(format!("{} is not supported", spec.access)));
            }
            _ => {}
        }
        self.specs.lock().expect("specs lock").push(spec.clone());
        let cluster: Arc<dyn RemoteCluster> = self.host(&spec.server.host);
        Ok(cluster)
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    pub events: Mutex<Vec<StatusEvent>>,
}

impl RecordingPublisher {
    pub fn process_states(&self, process_id: &str) -> Vec<ProcessState> {
        self.events
            .lock()
            .expect("events lock")
            .iter()
            .filter_map(|event| match event {
                StatusEvent::Process {
                    process_id: id,
                    state,
                    ..
                } if id == process_id => Some(*state),
                _ => None,
            })
            .collect()
    }
}

impl StatusPublisherPort for RecordingPublisher {
    fn publish(&self, event: StatusEvent) {
        self.events.lock().expect("events lock").push(event);
    }
}

pub struct Harness {
    pub runtime: Arc<Runtime>,
    pub store: Arc<SqliteStoreAdapter>,
    pub clusters: Arc<FakeClusterFactory>,
    pub publisher: Arc<RecordingPublisher>,
    pub reports: mpsc::UnboundedReceiver<JobReport>,
    pub local_dir: tempfile::TempDir,
}

impl Harness {
    pub fn compute(&self) -> Arc<FakeCluster> {
        self.clusters.host(COMPUTE_HOST)
    }
}

pub fn settings(local_data_location: PathBuf) -> RuntimeSettings {
    RuntimeSettings {
        local_data_location,
        monitor_poll_interval: Duration::from_secs(30),
        verification_delay: Duration::from_millis(1),
        max_workers: 4,
        queue_poll_interval: Duration::from_millis(10),
    }
}

pub async fn harness() -> Harness {
    let store = EngineStore::open_memory().await.expect("open store");
    let store = Arc::new(SqliteStoreAdapter::new(store));
    let clusters = Arc::new(FakeClusterFactory::default());
    let publisher = Arc::new(RecordingPublisher::default());
    let local_dir = tempfile::TempDir::new().expect("tempdir");
    let (runtime, reports) = Runtime::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        clusters.clone(),
        publisher.clone(),
        Arc::new(SystemClock::new()),
        settings(local_dir.path().to_path_buf()),
    );
    Harness {
        runtime,
        store,
        clusters,
        publisher,
        reports,
        local_dir,
    }
}

pub fn compute_resource() -> ComputeResource {
    ComputeResource {
        compute_resource_id: "cr-1".into(),
        host_name: COMPUTE_HOST.into(),
        job_submission_interfaces: vec![JobSubmissionInterface {
            protocol: JobSubmissionProtocol::Ssh,
            priority: 0,
            security_protocol: SecurityProtocol::SshKeys,
            resource_job_manager: ResourceJobManager {
                job_manager_type: ResourceJobManagerType::SLURM,
                job_manager_bin_path: None,
                command_overrides: BTreeMap::new(),
            },
            monitor_mode: MonitorMode::JobStatusPolling,
            ssh_port: None,
        }],
        data_movement_interfaces: vec![DataMovementInterface {
            protocol: DataMovementProtocol::Scp,
            priority: 0,
            security_protocol: SecurityProtocol::SshKeys,
            ssh_port: None,
        }],
        gateway_usage_reporting: false,
        gateway_usage_module_load_command: None,
        gateway_usage_executable: None,
    }
}

pub fn deployment() -> ApplicationDeployment {
    ApplicationDeployment {
        app_deployment_id: "dep-1".into(),
        compute_host_id: "cr-1".into(),
        executable_path: "/opt/echo/bin/echo".into(),
        parallelism: Default::default(),
        module_load_cmds: vec![],
        set_environment: vec![],
        pre_job_commands: vec![],
        post_job_commands: vec![],
        default_queue_name: Some("normal".into()),
        default_node_count: Some(1),
        default_cpu_count: Some(1),
        default_walltime: Some(10),
    }
}

pub fn interface() -> ApplicationInterface {
    ApplicationInterface {
        application_interface_id: "iface-1".into(),
        application_name: "echo".into(),
        inputs: vec![],
        outputs: vec![],
        archive_working_directory: false,
    }
}

pub fn gateway_profile() -> GatewayResourceProfile {
    GatewayResourceProfile {
        gateway_id: GATEWAY.into(),
        credential_store_token: Some("gw-token".into()),
        compute_resource_preferences: vec![ComputePreference {
            compute_resource_id: "cr-1".into(),
            login_user_name: Some("alice".into()),
            scratch_location: Some("/scratch/alice".into()),
            ..Default::default()
        }],
        storage_preferences: vec![],
    }
}

pub fn process(process_id: &str) -> ProcessModel {
    ProcessModel {
        process_id: process_id.into(),
        experiment_id: format!("EXP_{process_id}"),
        gateway_id: GATEWAY.into(),
        user_name: "alice".into(),
        compute_resource_id: "cr-1".into(),
        application_interface_id: "iface-1".into(),
        application_deployment_id: "dep-1".into(),
        group_resource_profile_id: None,
        storage_resource_id: None,
        experiment_data_dir: None,
        task_order: vec![],
        inputs: vec![InputDataObject {
            name: "message".into(),
            value: Some("hello".into()),
            data_type: DataType::String,
            add_to_command_line: true,
            ..Default::default()
        }],
        outputs: vec![OutputDataObject {
            name: "stdout".into(),
            value: None,
            data_type: DataType::Stdout,
            is_required: false,
            output_streaming: false,
            data_movement: true,
        }],
        scheduling: ResourceScheduling::default(),
        use_user_compute_preference: false,
        archive: false,
        cleanup_scratch: true,
    }
}

/// Seeds the catalog documents every test process refers to.
pub async fn seed_catalog(store: &SqliteStoreAdapter) {
    let docs: Vec<(CatalogKind, &str, serde_json::Value)> = vec![
        (
            CatalogKind::ComputeResource,
            "cr-1",
            serde_json::to_value(compute_resource()).expect("json"),
        ),
        (
            CatalogKind::ApplicationDeployment,
            "dep-1",
            serde_json::to_value(deployment()).expect("json"),
        ),
        (
            CatalogKind::ApplicationInterface,
            "iface-1",
            serde_json::to_value(interface()).expect("json"),
        ),
        (
            CatalogKind::GatewayProfile,
            GATEWAY,
            serde_json::to_value(gateway_profile()).expect("json"),
        ),
    ];
    for (kind, key, body) in docs {
        store.put_document(kind, key, &body).await.expect("seed");
    }
}

/// Adds a storage resource and makes it the gateway's default storage.
pub async fn seed_storage(store: &SqliteStoreAdapter) {
    let storage = StorageResource {
        storage_resource_id: "sr-1".into(),
        host_name: STORAGE_HOST.into(),
        data_movement_interfaces: vec![DataMovementInterface {
            protocol: DataMovementProtocol::Scp,
            priority: 0,
            security_protocol: SecurityProtocol::SshKeys,
            ssh_port: None,
        }],
    };
    let mut profile = gateway_profile();
    profile.storage_preferences.push(StoragePreference {
        storage_resource_id: "sr-1".into(),
        login_user_name: Some("gwuser".into()),
        file_system_root_location: Some("/var/gw".into()),
        resource_specific_credential_store_token: None,
    });
    store
        .put_document(
            CatalogKind::StorageResource,
            "sr-1",
            &serde_json::to_value(storage).expect("json"),
        )
        .await
        .expect("storage");
    store
        .put_document(
            CatalogKind::GatewayProfile,
            GATEWAY,
            &serde_json::to_value(profile).expect("json"),
        )
        .await
        .expect("profile");
}

/// Persists `process` with an initial CREATED status.
pub async fn seed_process(store: &SqliteStoreAdapter, process: &ProcessModel) {
    store.upsert_process(process).await.expect("process");
    store
        .add_process_status(
            &process.process_id,
            &ProcessStatus {
                state: ProcessState::Created,
                reason: None,
                time_of_change: time::OffsetDateTime::now_utc(),
            },
        )
        .await
        .expect("status");
}
