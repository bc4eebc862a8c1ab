// ABOUTME: In-memory Provider used by tests across the workspace
// ABOUTME: Emulates the handful of shell commands the session flow runs inside containers

use crate::archive;
use crate::providers::{
    ContainerConfig, ContainerInfo, ContainerStatus, ExecResult, Provider, ProviderError, Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::io::Read;
use std::sync::{Mutex, MutexGuard};

/// One command observed by the fake
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCommand {
    pub container_id: String,
    pub argv: Vec<String>,
    pub working_dir: Option<String>,
    pub env: HashMap<String, String>,
}

impl RecordedCommand {
    /// The command as a user would type it; `sh -c` scripts are unwrapped
    pub fn display(&self) -> String {
        display_command(&self.argv)
    }
}

#[derive(Debug)]
struct FakeContainer {
    name: String,
    status: ContainerStatus,
    created_at: DateTime<Utc>,
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
}

impl FakeContainer {
    fn new(name: &str, status: ContainerStatus) -> Self {
        let mut container = Self {
            name: name.to_string(),
            status,
            created_at: Utc::now(),
            files: BTreeMap::new(),
            dirs: BTreeSet::new(),
        };
        container.mkdir_p("/workspace");
        container
    }

    fn mkdir_p(&mut self, path: &str) {
        let mut current = String::new();
        self.dirs.insert("/".to_string());
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            self.dirs.insert(current.clone());
        }
    }

    fn put_file(&mut self, path: &str, content: Vec<u8>) {
        if let Some((parent, _)) = path.rsplit_once('/') {
            self.mkdir_p(parent);
        }
        self.files.insert(path.to_string(), content);
    }

    fn is_dir(&self, path: &str) -> bool {
        let path = normalize(path);
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.dirs.contains(&path) || self.files.keys().any(|f| f.starts_with(&prefix))
    }

    fn is_file(&self, path: &str) -> bool {
        self.files.contains_key(&normalize(path))
    }

    fn remove(&mut self, path: &str) {
        let path = normalize(path);
        let prefix = format!("{}/", path.trim_end_matches('/'));
        self.files
            .retain(|f, _| f != &path && !f.starts_with(&prefix));
        self.dirs.retain(|d| d != &path && !d.starts_with(&prefix));
    }

    fn ls(&self, path: &str) -> String {
        let path = normalize(path);
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        let mut out = String::from("total 0\n");
        out.push_str("drwxr-xr-x 1 root root 4096 Jan  1 00:00 .\n");
        out.push_str("drwxr-xr-x 1 root root 4096 Jan  1 00:00 ..\n");

        let mut children: BTreeMap<String, Option<u64>> = BTreeMap::new();
        for dir in &self.dirs {
            if let Some(rest) = dir.strip_prefix(&prefix) {
                if !rest.is_empty() && !rest.contains('/') {
                    children.insert(rest.to_string(), None);
                }
            }
        }
        for (file, content) in &self.files {
            if let Some(rest) = file.strip_prefix(&prefix) {
                match rest.split_once('/') {
                    None => {
                        children.insert(rest.to_string(), Some(content.len() as u64));
                    }
                    Some((dir, _)) => {
                        children.entry(dir.to_string()).or_insert(None);
                    }
                }
            }
        }

        for (name, size) in children {
            match size {
                None => out.push_str(&format!(
                    "drwxr-xr-x 1 root root 4096 Jan  1 00:00 {}\n",
                    name
                )),
                Some(size) => out.push_str(&format!(
                    "-rw-r--r-- 1 root root {} Jan  1 00:00 {}\n",
                    size, name
                )),
            }
        }
        out
    }
}

#[derive(Debug, Default)]
struct FakeState {
    next_id: u64,
    containers: HashMap<String, FakeContainer>,
    images: HashSet<String>,
    builds: Vec<String>,
    commands: Vec<RecordedCommand>,
    detached: Vec<RecordedCommand>,
    failures: Vec<(String, ExecResult)>,
    clone_fixture: BTreeMap<String, Vec<u8>>,
    start_not_running: bool,
    fail_remove: bool,
    unavailable: bool,
}

/// Container runtime double that keeps every container in memory
///
/// Supported commands: `test -e|-f|-d`, `rm -f|-rf`, `mkdir -p`, `ls -la` and
/// `git clone <url> <dest>` (which materializes the configured fixture files).
/// Anything else succeeds with empty output unless a failure is registered for it.
#[derive(Debug, Default)]
pub struct FakeProvider {
    state: Mutex<FakeState>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Files that `git clone` places under its destination directory
    pub fn with_clone_fixture<'a>(self, files: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        {
            let mut state = self.state();
            for (path, content) in files {
                state
                    .clone_fixture
                    .insert(path.trim_start_matches('/').to_string(), content.as_bytes().to_vec());
            }
        }
        self
    }

    /// Mark an image as already present
    pub fn with_image(self, image: &str) -> Self {
        self.state().images.insert(image.to_string());
        self
    }

    /// Make any command whose display form starts with `prefix` exit non-zero
    pub fn fail_command(&self, prefix: &str, exit_code: i64, stderr: &str) {
        self.state().failures.push((
            prefix.to_string(),
            ExecResult {
                exit_code,
                stdout: Vec::new(),
                stderr: stderr.as_bytes().to_vec(),
            },
        ));
    }

    /// Newly created containers report the exited state
    pub fn start_not_running(&self) {
        self.state().start_not_running = true;
    }

    /// Container removal fails with a runtime error
    pub fn fail_remove(&self) {
        self.state().fail_remove = true;
    }

    pub fn set_unavailable(&self) {
        self.state().unavailable = true;
    }

    /// Add a container the caller does not know about, returning its id
    pub fn seed_container(&self, name: &str) -> String {
        let mut state = self.state();
        let id = state.allocate_id();
        state
            .containers
            .insert(id.clone(), FakeContainer::new(name, ContainerStatus::Running));
        id
    }

    /// Place a file directly into the container named `name`
    pub fn seed_file(&self, name: &str, path: &str, content: &str) {
        let mut state = self.state();
        if let Some(container) = state.containers.values_mut().find(|c| c.name == name) {
            container.put_file(&normalize(path), content.as_bytes().to_vec());
        }
    }

    /// Content of a file inside the container named `name`
    pub fn file(&self, name: &str, path: &str) -> Option<String> {
        let state = self.state();
        state
            .containers
            .values()
            .find(|c| c.name == name)
            .and_then(|c| c.files.get(&normalize(path)))
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Every file path inside the container named `name`
    pub fn file_paths(&self, name: &str) -> Vec<String> {
        let state = self.state();
        state
            .containers
            .values()
            .find(|c| c.name == name)
            .map(|c| c.files.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn container_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state()
            .containers
            .values()
            .map(|c| c.name.clone())
            .collect();
        names.sort();
        names
    }

    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.state().commands.clone()
    }

    pub fn detached(&self) -> Vec<RecordedCommand> {
        self.state().detached.clone()
    }

    pub fn built_images(&self) -> Vec<String> {
        self.state().builds.clone()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl FakeState {
    fn allocate_id(&mut self) -> String {
        self.next_id += 1;
        format!("fake-{:04}", self.next_id)
    }

    fn container_mut(&mut self, id: &str) -> Result<&mut FakeContainer> {
        self.containers
            .get_mut(id)
            .ok_or_else(|| ProviderError::ContainerNotFound(id.to_string()))
    }

    fn failure_for(&self, argv: &[String]) -> Option<ExecResult> {
        let display = display_command(argv);
        self.failures
            .iter()
            .find(|(prefix, _)| display.starts_with(prefix.as_str()))
            .map(|(_, result)| result.clone())
    }
}

#[async_trait]
impl Provider for FakeProvider {
    async fn is_available(&self) -> Result<bool> {
        Ok(!self.state().unavailable)
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        Ok(self.state().images.contains(image))
    }

    async fn build_image(&self, tag: &str, _dockerfile: &str) -> Result<()> {
        let mut state = self.state();
        state.builds.push(tag.to_string());
        state.images.insert(tag.to_string());
        Ok(())
    }

    async fn create_container(&self, config: &ContainerConfig) -> Result<String> {
        let mut state = self.state();
        if state.unavailable {
            return Err(ProviderError::ConnectionError(
                "container runtime unavailable".to_string(),
            ));
        }
        if state.containers.values().any(|c| c.name == config.name) {
            return Err(ProviderError::ContainerError(format!(
                "Conflict. The container name \"/{}\" is already in use",
                config.name
            )));
        }

        let status = if state.start_not_running {
            ContainerStatus::Stopped
        } else {
            ContainerStatus::Running
        };
        let id = state.allocate_id();
        state
            .containers
            .insert(id.clone(), FakeContainer::new(&config.name, status));
        Ok(id)
    }

    async fn get_container_info(&self, container_id: &str) -> Result<ContainerInfo> {
        let mut state = self.state();
        let container = state.container_mut(container_id)?;
        Ok(ContainerInfo {
            id: container_id.to_string(),
            name: container.name.clone(),
            status: container.status.clone(),
            created_at: container.created_at,
        })
    }

    async fn stop_container(&self, container_id: &str, _timeout_secs: u64) -> Result<()> {
        let mut state = self.state();
        let container = state.container_mut(container_id)?;
        container.status = ContainerStatus::Stopped;
        Ok(())
    }

    async fn remove_container(&self, container_id: &str, _force: bool) -> Result<()> {
        let mut state = self.state();
        if state.fail_remove {
            return Err(ProviderError::ContainerError(format!(
                "removal of container {} is already in progress",
                container_id
            )));
        }
        state.containers.remove(container_id);
        Ok(())
    }

    async fn list_containers(&self, name_prefix: &str) -> Result<Vec<ContainerInfo>> {
        let state = self.state();
        let mut containers: Vec<ContainerInfo> = state
            .containers
            .iter()
            .filter(|(_, c)| c.name.starts_with(name_prefix))
            .map(|(id, c)| ContainerInfo {
                id: id.clone(),
                name: c.name.clone(),
                status: c.status.clone(),
                created_at: c.created_at,
            })
            .collect();
        containers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(containers)
    }

    async fn exec_command(
        &self,
        container_id: &str,
        command: Vec<String>,
        working_dir: Option<String>,
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<ExecResult> {
        let mut state = self.state();
        state.commands.push(RecordedCommand {
            container_id: container_id.to_string(),
            argv: command.clone(),
            working_dir: working_dir.clone(),
            env: env_vars.unwrap_or_default(),
        });

        if let Some(failure) = state.failure_for(&command) {
            return Ok(failure);
        }

        let fixture = state.clone_fixture.clone();
        let container = state.container_mut(container_id)?;
        let cwd = working_dir.unwrap_or_else(|| "/workspace".to_string());
        let args: Vec<&str> = command.iter().map(String::as_str).collect();

        let result = match args.as_slice() {
            ["test", flag, path] => {
                let path = resolve(&cwd, path);
                let hit = match *flag {
                    "-f" => container.is_file(&path),
                    "-d" => container.is_dir(&path),
                    _ => container.is_file(&path) || container.is_dir(&path),
                };
                exit(if hit { 0 } else { 1 })
            }
            ["rm", flag, paths @ ..] if flag.starts_with('-') => {
                for path in paths {
                    container.remove(&resolve(&cwd, path));
                }
                exit(0)
            }
            ["mkdir", "-p", paths @ ..] => {
                for path in paths {
                    container.mkdir_p(&resolve(&cwd, path));
                }
                exit(0)
            }
            ["ls", "-la", path] => {
                let path = resolve(&cwd, path);
                if container.is_dir(&path) {
                    ExecResult {
                        exit_code: 0,
                        stdout: container.ls(&path).into_bytes(),
                        stderr: Vec::new(),
                    }
                } else {
                    ExecResult {
                        exit_code: 2,
                        stdout: Vec::new(),
                        stderr: format!(
                            "ls: cannot access '{}': No such file or directory\n",
                            path
                        )
                        .into_bytes(),
                    }
                }
            }
            ["git", "clone", .., dest] => {
                let dest = resolve(&cwd, dest);
                container.mkdir_p(&dest);
                for (relative, content) in fixture {
                    container.put_file(&format!("{}/{}", dest, relative), content);
                }
                exit(0)
            }
            _ => exit(0),
        };

        Ok(result)
    }

    async fn exec_detached(
        &self,
        container_id: &str,
        command: Vec<String>,
        working_dir: Option<String>,
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<String> {
        let mut state = self.state();
        state.container_mut(container_id)?;

        if let Some(failure) = state.failure_for(&command) {
            return Err(ProviderError::ContainerError(
                String::from_utf8_lossy(&failure.stderr).into_owned(),
            ));
        }

        state.detached.push(RecordedCommand {
            container_id: container_id.to_string(),
            argv: command,
            working_dir,
            env: env_vars.unwrap_or_default(),
        });
        Ok(format!("exec-{}", state.detached.len()))
    }

    async fn upload_archive(&self, container_id: &str, dest_dir: &str, data: Vec<u8>) -> Result<()> {
        let mut state = self.state();
        let container = state.container_mut(container_id)?;
        if !container.is_dir(dest_dir) {
            return Err(ProviderError::PathNotFound(dest_dir.to_string()));
        }

        let mut archive = tar::Archive::new(data.as_slice());
        let entries = archive
            .entries()
            .map_err(|e| ProviderError::InternalError(e.to_string()))?;
        for entry in entries {
            let mut entry = entry.map_err(|e| ProviderError::InternalError(e.to_string()))?;
            if !entry.header().entry_type().is_file() {
                continue;
            }
            let name = entry
                .path()
                .map_err(|e| ProviderError::InternalError(e.to_string()))?
                .to_string_lossy()
                .into_owned();
            let mut content = Vec::new();
            entry
                .read_to_end(&mut content)
                .map_err(|e| ProviderError::InternalError(e.to_string()))?;
            container.put_file(&resolve(dest_dir, &name), content);
        }
        Ok(())
    }

    async fn download_archive(&self, container_id: &str, path: &str) -> Result<Vec<u8>> {
        let mut state = self.state();
        let container = state.container_mut(container_id)?;
        let path = normalize(path);

        if let Some(content) = container.files.get(&path) {
            let name = path.rsplit('/').next().unwrap_or(path.as_str());
            return archive::pack_file(name, content)
                .map_err(|e| ProviderError::InternalError(e.to_string()));
        }

        if container.is_dir(&path) {
            return archive_directory(container, &path)
                .map_err(|e| ProviderError::InternalError(e.to_string()));
        }

        Err(ProviderError::PathNotFound(path))
    }
}

/// Tar a directory the way the Docker archive endpoint does: the directory entry first, then
/// every nested directory and file
fn archive_directory(container: &FakeContainer, path: &str) -> std::io::Result<Vec<u8>> {
    let base = path.rsplit('/').find(|s| !s.is_empty()).unwrap_or("root");
    let prefix = format!("{}/", path.trim_end_matches('/'));
    let relative = |full: &str| format!("{}/{}", base, &full[prefix.len()..]);

    let mut builder = tar::Builder::new(Vec::new());
    append_dir(&mut builder, format!("{}/", base))?;
    for dir in container.dirs.iter().filter(|d| d.starts_with(&prefix)) {
        append_dir(&mut builder, format!("{}/", relative(dir)))?;
    }
    for (file, content) in container.files.iter().filter(|(f, _)| f.starts_with(&prefix)) {
        let mut header = tar::Header::new_gnu();
        header.set_entry_type(tar::EntryType::Regular);
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, relative(file), content.as_slice())?;
    }

    builder.into_inner()
}

fn append_dir(builder: &mut tar::Builder<Vec<u8>>, name: String) -> std::io::Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Directory);
    header.set_size(0);
    header.set_mode(0o755);
    header.set_cksum();
    builder.append_data(&mut header, name, std::io::empty())
}

fn exit(code: i64) -> ExecResult {
    ExecResult {
        exit_code: code,
        ..ExecResult::default()
    }
}

fn display_command(argv: &[String]) -> String {
    match argv {
        [sh, flag, script] if sh == "sh" && flag == "-c" => script.clone(),
        _ => argv.join(" "),
    }
}

fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn resolve(cwd: &str, path: &str) -> String {
    if path.starts_with('/') {
        normalize(path)
    } else {
        normalize(&format!("{}/{}", cwd.trim_end_matches('/'), path.trim_start_matches("./")))
    }
}
