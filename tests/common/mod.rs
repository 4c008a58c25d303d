//! Shared fakes for integration tests
#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use tlsfront::orchestrator::Prompter;
use tlsfront::public_ip::AddressLookup;
use tlsfront::system::{display_command, CommandOutput, SystemOps};
use tlsfront::{ProvisionError, ProvisionResult};

//==============================================================================
// SystemOps
//==============================================================================

/// In-memory host: files, links and a command log
///
/// Every command succeeds unless a failure was scripted for its program.
#[derive(Default)]
pub struct FakeSystem {
    files: Mutex<BTreeMap<PathBuf, (String, u32)>>,
    links: Mutex<BTreeMap<PathBuf, PathBuf>>,
    dirs: Mutex<BTreeSet<PathBuf>>,
    commands: Mutex<Vec<String>>,
    scripted: Mutex<HashMap<String, VecDeque<Option<String>>>>,
    scripted_writes: Mutex<HashMap<PathBuf, VecDeque<bool>>>,
}

impl FakeSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a failing invocation of `program`: exit 1 with `stderr`
    pub fn fail_next(&self, program: &str, stderr: &str) {
        self.script(program, Some(stderr.to_string()));
    }

    /// Queues a successful invocation of `program`
    pub fn succeed_next(&self, program: &str) {
        self.script(program, None);
    }

    fn script(&self, program: &str, failure: Option<String>) {
        self.scripted
            .lock()
            .unwrap()
            .entry(program.to_string())
            .or_default()
            .push_back(failure);
    }

    /// Queues write outcomes for `path`, `true` meaning success
    pub fn script_writes(&self, path: impl Into<PathBuf>, outcomes: &[bool]) {
        self.scripted_writes
            .lock()
            .unwrap()
            .entry(path.into())
            .or_default()
            .extend(outcomes.iter().copied());
    }

    pub fn put_file(&self, path: impl Into<PathBuf>, contents: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.into(), (contents.to_string(), 0o644));
    }

    pub fn put_link(&self, link: impl Into<PathBuf>, target: impl Into<PathBuf>) {
        self.links.lock().unwrap().insert(link.into(), target.into());
    }

    pub fn file(&self, path: impl AsRef<Path>) -> Option<String> {
        self.files
            .lock()
            .unwrap()
            .get(path.as_ref())
            .map(|(contents, _)| contents.clone())
    }

    pub fn mode(&self, path: impl AsRef<Path>) -> Option<u32> {
        self.files
            .lock()
            .unwrap()
            .get(path.as_ref())
            .map(|(_, mode)| *mode)
    }

    pub fn link(&self, path: impl AsRef<Path>) -> Option<PathBuf> {
        self.links.lock().unwrap().get(path.as_ref()).cloned()
    }

    /// Content reached through an enabled link, as nginx would read it
    pub fn through_link(&self, link: impl AsRef<Path>) -> Option<String> {
        let target = self.link(link)?;
        self.file(target)
    }

    pub fn has_dir(&self, path: impl AsRef<Path>) -> bool {
        self.dirs.lock().unwrap().contains(path.as_ref())
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count(&self, command: &str) -> usize {
        self.commands().iter().filter(|c| c.as_str() == command).count()
    }

    pub fn commands_of(&self, program: &str) -> Vec<String> {
        let prefix = format!("{} ", program);
        self.commands()
            .into_iter()
            .filter(|c| c.starts_with(&prefix))
            .collect()
    }

    /// Position of the first command equal to `command`
    pub fn position(&self, command: &str) -> Option<usize> {
        self.commands().iter().position(|c| c == command)
    }
}

#[async_trait]
impl SystemOps for FakeSystem {
    async fn run(&self, program: &str, args: &[&str]) -> ProvisionResult<CommandOutput> {
        self.commands
            .lock()
            .unwrap()
            .push(display_command(program, args));

        let failure = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(program)
            .and_then(VecDeque::pop_front)
            .flatten();
        Ok(match failure {
            Some(stderr) => CommandOutput {
                code: Some(1),
                stdout: String::new(),
                stderr,
            },
            None => CommandOutput {
                code: Some(0),
                ..Default::default()
            },
        })
    }

    async fn write_file(&self, path: &Path, contents: &str, mode: u32) -> ProvisionResult<()> {
        let allowed = self
            .scripted_writes
            .lock()
            .unwrap()
            .get_mut(path)
            .and_then(VecDeque::pop_front)
            .unwrap_or(true);
        if !allowed {
            return Err(ProvisionError::io(
                path,
                std::io::Error::from(std::io::ErrorKind::PermissionDenied),
            ));
        }
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), (contents.to_string(), mode));
        Ok(())
    }

    async fn append_file(&self, path: &Path, contents: &str) -> ProvisionResult<()> {
        let mut files = self.files.lock().unwrap();
        match files.get_mut(path) {
            Some((existing, _)) => {
                existing.push_str(contents);
                Ok(())
            }
            None => Err(ProvisionError::io(
                path,
                std::io::Error::from(std::io::ErrorKind::NotFound),
            )),
        }
    }

    async fn read_file(&self, path: &Path) -> ProvisionResult<Option<String>> {
        Ok(self.file(path))
    }

    async fn create_dir_all(&self, path: &Path) -> ProvisionResult<()> {
        self.dirs.lock().unwrap().insert(path.to_path_buf());
        Ok(())
    }

    async fn symlink(&self, target: &Path, link: &Path) -> ProvisionResult<()> {
        self.put_link(link, target);
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> ProvisionResult<()> {
        self.files.lock().unwrap().remove(path);
        self.links.lock().unwrap().remove(path);
        Ok(())
    }
}

//==============================================================================
// Address lookup and prompts
//==============================================================================

/// Fixed public addresses; counts lookups
pub struct StaticLookup {
    pub ipv4: Option<IpAddr>,
    pub ipv6: Option<IpAddr>,
    calls: AtomicUsize,
}

impl StaticLookup {
    pub fn new(ipv4: Option<&str>, ipv6: Option<&str>) -> Self {
        Self {
            ipv4: ipv4.map(|a| a.parse().unwrap()),
            ipv6: ipv6.map(|a| a.parse().unwrap()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AddressLookup for StaticLookup {
    async fn public_ipv4(&self) -> Option<IpAddr> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.ipv4
    }

    async fn public_ipv6(&self) -> Option<IpAddr> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.ipv6
    }
}

/// Answers questions from a script; panics when it runs out
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<bool>>,
    pub asked: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new(answers: &[bool]) -> Self {
        Self {
            answers: Mutex::new(answers.iter().copied().collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn questions(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    async fn confirm(&self, question: &str, _default: bool) -> ProvisionResult<bool> {
        self.asked.lock().unwrap().push(question.to_string());
        Ok(self
            .answers
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected question: {question}")))
    }
}
