//! In-memory stand-ins for cluster nodes, the copy tool and local storage.

use crate::config::Settings;
use crate::fs::LocalStorage;
use crate::orchestrator::RunContext;
use crate::remote::{CommandOutput, RemoteExecutor};
use crate::topology::{
    AddressCandidate, ClusterTopology, ConfigLookup, InstallMode, ModuleNode, ReleaseInfo, Role, ServerType,
};
use crate::transfer::{Location, SizeProbe, Syncer, TransferJob, TransferKind};
use crate::utils::errors::{BackupError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const RELEASE_FILE: &str = "version=6.4.8\nrelease=1\n";

fn pm_address(id: u32) -> String {
    format!("10.0.0.{}", id)
}

fn um_address(id: u32) -> String {
    format!("10.0.1.{}", id)
}

fn dbroot_dir(id: u32) -> PathBuf {
    PathBuf::from(format!("/var/lib/columnstore/data{}", id))
}

/// Descriptor lookups served from a map
#[derive(Debug, Clone, Default)]
pub struct MapLookup {
    values: BTreeMap<(String, String), String>,
}

impl MapLookup {
    pub fn insert(&mut self, section: &str, key: &str, value: &str) {
        self.values
            .insert((section.to_string(), key.to_string()), value.to_string());
    }

    pub fn remove(&mut self, section: &str, key: &str) {
        self.values.remove(&(section.to_string(), key.to_string()));
    }
}

#[async_trait]
impl ConfigLookup for MapLookup {
    async fn get(&self, section: &str, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(&(section.to_string(), key.to_string())).cloned())
    }
}

/// Descriptor of a multi-node install with dedicated UM nodes.
///
/// PM n answers on 10.0.0.n (secondary 10.0.2.n), UM n on 10.0.1.n.
pub fn separate_descriptor(pm_count: u32, um_count: u32, dbroots: &[&[u32]]) -> MapLookup {
    let mut lookup = MapLookup::default();
    lookup.insert("SystemConfig", "SystemName", "columnstore-1");
    lookup.insert("Installation", "SingleServerInstall", "n");
    lookup.insert("Installation", "ServerTypeInstall", "1");
    lookup.insert("Installation", "PMwithUM", "n");
    lookup.insert("Installation", "DBRootStorageType", "internal");
    lookup.insert("SystemModuleConfig", "ModuleCount3", &pm_count.to_string());
    lookup.insert("SystemModuleConfig", "ModuleCount2", &um_count.to_string());

    let total: usize = dbroots.iter().map(|d| d.len()).sum();
    lookup.insert("SystemConfig", "DBRootCount", &total.to_string());

    for id in 1..=pm_count {
        lookup.insert("SystemModuleConfig", &format!("ModuleIPAddr{}-1-3", id), &pm_address(id));
        lookup.insert("SystemModuleConfig", &format!("ModuleHostName{}-1-3", id), &format!("pm{}", id));
        lookup.insert("SystemModuleConfig", &format!("ModuleIPAddr{}-2-3", id), &format!("10.0.2.{}", id));

        let assigned = dbroots.get(id as usize - 1).copied().unwrap_or(&[]);
        lookup.insert(
            "SystemModuleConfig",
            &format!("ModuleDBRootCount{}-3", id),
            &assigned.len().to_string(),
        );
        for (slot, dbroot) in assigned.iter().enumerate() {
            lookup.insert(
                "SystemModuleConfig",
                &format!("ModuleDBRootID{}-{}-3", id, slot + 1),
                &dbroot.to_string(),
            );
            lookup.insert(
                "SystemConfig",
                &format!("DBRoot{}", dbroot),
                &dbroot_dir(*dbroot).to_string_lossy(),
            );
        }
    }

    for id in 1..=um_count {
        lookup.insert("SystemModuleConfig", &format!("ModuleIPAddr{}-1-2", id), &um_address(id));
        lookup.insert("SystemModuleConfig", &format!("ModuleHostName{}-1-2", id), &format!("um{}", id));
    }
    lookup
}

/// Resolved topology matching `separate_descriptor`
pub fn topology_fixture(pm_count: u32, um_count: u32, dbroots: &[&[u32]]) -> ClusterTopology {
    let node = |role: Role, id: u32, address: String, dbroots: Vec<u32>| ModuleNode {
        id,
        role,
        candidates: vec![AddressCandidate {
            address: address.clone(),
            hostname: Some(format!("{}{}", role.prefix(), id)),
        }],
        resolved: Some(address),
        dbroots,
    };

    let pm_modules: Vec<ModuleNode> = (1..=pm_count)
        .map(|id| {
            let assigned = dbroots.get(id as usize - 1).map(|d| d.to_vec()).unwrap_or_default();
            node(Role::Pm, id, pm_address(id), assigned)
        })
        .collect();
    let um_nodes = (1..=um_count).map(|id| node(Role::Um, id, um_address(id), Vec::new())).collect();
    let dbroot_paths = pm_modules
        .iter()
        .flat_map(|m| m.dbroots.iter().map(|d| (*d, dbroot_dir(*d))))
        .collect::<BTreeMap<_, _>>();

    ClusterTopology {
        system_name: "columnstore-1".into(),
        install_mode: InstallMode::Multi,
        server_type: ServerType::PmOnly,
        pm_has_um: false,
        dbroot_storage_type: "internal".into(),
        um_module_count: um_count as usize,
        pm_module_count: pm_count as usize,
        dbroot_count: dbroot_paths.len(),
        dbroot_paths,
        pm_modules,
        um_nodes,
        release: Some(ReleaseInfo {
            version: "6.4.8".into(),
            release: "1".into(),
        }),
    }
}

#[derive(Default)]
struct ClusterState {
    config: HashMap<(String, String), String>,
    sizes: HashMap<(String, String), u64>,
    available: HashMap<String, u64>,
    mounts: HashMap<(String, String), String>,
    files: HashMap<(String, String), String>,
    processes: HashMap<String, Vec<String>>,
    databases: HashMap<(String, String), Vec<String>>,
    existing: HashSet<(String, String)>,
    unreachable: HashSet<String>,
    failing: Vec<String>,
    commands: Vec<(String, String)>,
}

/// Every node of a cluster answering the shell commands the engine sends
#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

const DEFAULT_AVAILABLE: u64 = 1 << 40;

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cluster serving `separate_descriptor(..)` with the version file on every node
    pub fn separate(pm_count: u32, um_count: u32, dbroots: &[&[u32]]) -> Self {
        let cluster = Self::new();
        cluster.set_descriptor(&separate_descriptor(pm_count, um_count, dbroots));
        let hosts = (1..=pm_count).map(pm_address).chain((1..=um_count).map(um_address));
        for host in hosts {
            cluster.set_file(&host, "/usr/local/mariadb/columnstore/releasenum", RELEASE_FILE);
        }
        cluster
    }

    pub fn set_config(&self, section: &str, key: &str, value: &str) {
        self.lock()
            .config
            .insert((section.to_string(), key.to_string()), value.to_string());
    }

    pub fn set_descriptor(&self, lookup: &MapLookup) {
        let mut state = self.lock();
        for (key, value) in &lookup.values {
            state.config.insert(key.clone(), value.clone());
        }
    }

    pub fn set_size(&self, host: &str, path: &str, bytes: u64) {
        self.lock().sizes.insert((host.to_string(), path.to_string()), bytes);
    }

    /// Free bytes on `host`; every path there shares one filesystem unless
    /// `set_mount` says otherwise
    pub fn set_available(&self, host: &str, bytes: u64) {
        self.lock().available.insert(host.to_string(), bytes);
    }

    pub fn set_mount(&self, host: &str, path: &str, mount: &str) {
        self.lock()
            .mounts
            .insert((host.to_string(), path.to_string()), mount.to_string());
    }

    pub fn set_file(&self, host: &str, path: &str, content: &str) {
        self.lock()
            .files
            .insert((host.to_string(), path.to_string()), content.to_string());
    }

    pub fn set_processes(&self, host: &str, names: &[&str]) {
        self.lock()
            .processes
            .insert(host.to_string(), names.iter().map(|n| n.to_string()).collect());
    }

    pub fn set_databases(&self, host: &str, dir: &str, names: &[&str]) {
        self.lock().databases.insert(
            (host.to_string(), dir.to_string()),
            names.iter().map(|n| n.to_string()).collect(),
        );
    }

    pub fn set_exists(&self, host: &str, path: &str) {
        self.lock().existing.insert((host.to_string(), path.to_string()));
    }

    pub fn mark_unreachable(&self, host: &str) {
        self.lock().unreachable.insert(host.to_string());
    }

    /// Commands containing `pattern` exit with status 1
    pub fn fail_command(&self, pattern: &str) {
        self.lock().failing.push(pattern.to_string());
    }

    pub fn commands_on(&self, host: &str) -> Vec<String> {
        self.lock()
            .commands
            .iter()
            .filter(|(h, _)| h == host)
            .map(|(_, c)| c.clone())
            .collect()
    }

    pub fn commands_matching(&self, pattern: &str) -> Vec<String> {
        self.lock()
            .commands
            .iter()
            .filter(|(_, c)| c.contains(pattern))
            .map(|(_, c)| c.clone())
            .collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClusterState> {
        self.state.lock().unwrap()
    }

    fn answer(state: &ClusterState, host: &str, command: &str) -> CommandOutput {
        let ok = |stdout: String| CommandOutput {
            status: 0,
            stdout,
            stderr: String::new(),
        };
        let fail = |status: i32| CommandOutput {
            status,
            stdout: String::new(),
            stderr: "failed".into(),
        };
        let key = |path: &str| (host.to_string(), path.to_string());

        if state.failing.iter().any(|p| command.contains(p.as_str())) {
            return fail(1);
        }

        let tokens: Vec<String> = command
            .split_whitespace()
            .map(|t| t.trim_matches('\'').to_string())
            .collect();
        let args: Vec<&str> = tokens.iter().map(String::as_str).collect();

        match args.as_slice() {
            ["true"] => ok(String::new()),
            [tool, section, name] if tool.ends_with("mcsGetConfig") => {
                let value = state.config.get(&(section.to_string(), name.to_string()));
                ok(value.map(|v| format!("{}\n", v)).unwrap_or_default())
            }
            [tool, ..] if tool.ends_with("mcsadmin") => ok(String::new()),
            ["du", "-sbc", rest @ ..] => {
                let mut out = String::new();
                let mut total = 0;
                for path in rest.iter().take_while(|p| !p.starts_with("2>")) {
                    if let Some(bytes) = state.sizes.get(&key(*path)) {
                        out.push_str(&format!("{}\t{}\n", bytes, path));
                        total += bytes;
                    }
                }
                out.push_str(&format!("{}\ttotal\n", total));
                ok(out)
            }
            ["du", "-sb", path] => match state.sizes.get(&key(*path)) {
                Some(bytes) => ok(format!("{}\t{}\n", bytes, path)),
                None => fail(1),
            },
            ["df", "-P", "-B1", path] => {
                let available = state.available.get(host).copied().unwrap_or(DEFAULT_AVAILABLE);
                let mount = state.mounts.get(&key(*path)).map(String::as_str).unwrap_or("/");
                ok(format!(
                    "Filesystem 1-blocks Used Available Capacity Mounted on\n/dev/fake 0 0 {} 0% {}\n",
                    available, mount
                ))
            }
            ["cat", path] => match state.files.get(&key(*path)) {
                Some(content) => ok(content.clone()),
                None => fail(1),
            },
            ["ps", "-eo", "comm="] => {
                let names = state.processes.get(host).cloned().unwrap_or_default();
                ok(names.iter().map(|n| format!("{}\n", n)).collect())
            }
            ["find", dir, ..] => {
                let names = state.databases.get(&key(*dir)).cloned().unwrap_or_default();
                ok(names.iter().map(|n| format!("{}\n", n)).collect())
            }
            ["test", "-e", path] => {
                if state.existing.contains(&key(*path)) {
                    ok(String::new())
                } else {
                    fail(1)
                }
            }
            _ => fail(127),
        }
    }
}

#[async_trait]
impl RemoteExecutor for FakeCluster {
    async fn run(&self, host: &str, command: &str) -> Result<CommandOutput> {
        let mut state = self.lock();
        if state.unreachable.contains(host) {
            return Err(BackupError::Unreachable(host.to_string()));
        }
        state.commands.push((host.to_string(), command.to_string()));
        Ok(Self::answer(&state, host, command))
    }
}

#[derive(Default)]
struct SyncerState {
    calls: Vec<TransferJob>,
    failures: HashMap<String, i32>,
}

/// Copy tool that records jobs and lays out local destinations
#[derive(Default)]
pub struct FakeSyncer {
    state: Mutex<SyncerState>,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    completed: AtomicUsize,
}

impl FakeSyncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    /// The job labelled `label` exits with `code`
    pub fn fail(&self, label: &str, code: i32) {
        self.state.lock().unwrap().failures.insert(label.to_string(), code);
    }

    pub fn calls(&self) -> Vec<TransferJob> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn call(&self, label: &str) -> Option<TransferJob> {
        self.calls().into_iter().find(|j| j.label == label)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Syncer for FakeSyncer {
    async fn sync(&self, job: &TransferJob) -> Result<i32> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let code = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(job.clone());
            state.failures.get(&job.label).copied().unwrap_or(0)
        };

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        if let (Location::Local(dest), false, 0) = (&job.destination, job.dry_run, code) {
            match job.kind {
                TransferKind::Tree => std::fs::create_dir_all(dest)?,
                TransferKind::File => {
                    if let Some(parent) = dest.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(dest, job.label.as_bytes())?;
                }
            }
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(code)
    }
}

/// Fixed free space and scripted tree sizes
pub struct FakeStorage {
    available: u64,
    sizes: Mutex<HashMap<PathBuf, u64>>,
}

impl FakeStorage {
    pub fn new(available: u64) -> Self {
        Self {
            available,
            sizes: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_tree_size(&self, path: &str, bytes: u64) {
        self.sizes.lock().unwrap().insert(PathBuf::from(path), bytes);
    }
}

impl LocalStorage for FakeStorage {
    fn available_bytes(&self, _path: &Path) -> std::io::Result<u64> {
        Ok(self.available)
    }

    fn tree_size(&self, path: &Path) -> std::io::Result<u64> {
        Ok(self.sizes.lock().unwrap().get(path).copied().unwrap_or(0))
    }
}

/// Returns the scripted sizes in order, then repeats the last one
pub struct ScriptedProbe {
    values: Vec<u64>,
    calls: AtomicUsize,
}

impl ScriptedProbe {
    pub fn new(values: Vec<u64>) -> Self {
        Self {
            values,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SizeProbe for ScriptedProbe {
    async fn measure(&self, _targets: &[Location]) -> Result<u64> {
        let index = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .values
            .get(index)
            .or(self.values.last())
            .copied()
            .unwrap_or(0))
    }
}

/// Run context over fakes with default settings
pub fn run_context(
    cluster: Arc<FakeCluster>,
    syncer: Arc<FakeSyncer>,
    storage: FakeStorage,
    dry_run: bool,
) -> RunContext {
    RunContext::with_collaborators(
        Settings::default(),
        dry_run,
        cluster,
        syncer,
        Arc::new(storage),
        CancellationToken::new(),
    )
}
