//! In-memory collaborators for rehearsals and tests.
//!
//! The mock shell understands a tiny script language, one command per line
//! (`#` starts a comment):
//!
//! ```text
//! createProject <name>   add a project to the repository
//! lockProject <name>     take a lock in a project
//! publishProject         start a background publish job
//! echo <text>            log a line
//! fail <message>         fail the script
//! ```
//!
//! Any other command is recorded and otherwise ignored.

use crate::db::{Connector, SetupConnection};
use crate::repository::{
    ContentRepository, IdentityContext, ImportParameters, ProjectId, ReportSink,
};
use crate::shell::{CommandShell, SessionSpec, ShellBackend};
use crate::RuntimeError;
use std::collections::{BTreeMap, BTreeSet};
use std::io::BufRead;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;
use testbed_schema::{ConnectionProfile, Dialect};
use tracing::{debug, info};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// --- repository ---

#[derive(Debug)]
struct RepoState {
    users: BTreeMap<String, String>,
    projects: BTreeMap<String, u64>,
    locks: BTreeMap<String, u32>,
    imports: Vec<ImportParameters>,
    fail_imports: BTreeSet<String>,
    publishing: bool,
    publishes_completed: u32,
    publish_waits: u32,
}

impl Default for RepoState {
    fn default() -> Self {
        let projects = ["Online", "_setupProject", "tempFileProject"]
            .into_iter()
            .enumerate()
            .map(|(i, name)| (name.to_owned(), i as u64 + 1))
            .collect();
        Self {
            users: BTreeMap::from([("Admin".to_owned(), "admin".to_owned())]),
            projects,
            locks: BTreeMap::new(),
            imports: Vec::new(),
            fail_imports: BTreeSet::new(),
            publishing: false,
            publishes_completed: 0,
            publish_waits: 0,
        }
    }
}

/// Repository with projects, locks and a background publish worker.
///
/// Imports lock one resource in the importing project; a finished publish
/// releases every lock.
pub struct MockRepository {
    state: Mutex<RepoState>,
    idle: Condvar,
    publish_delay: Duration,
}

impl Default for MockRepository {
    fn default() -> Self {
        Self {
            state: Mutex::new(RepoState::default()),
            idle: Condvar::new(),
            publish_delay: Duration::from_millis(50),
        }
    }
}

impl MockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_publish_delay(mut self, delay: Duration) -> Self {
        self.publish_delay = delay;
        self
    }

    /// Make every import of a source whose file name is `file_name` fail.
    pub fn fail_import_of(&self, file_name: &str) {
        lock(&self.state).fail_imports.insert(file_name.to_owned());
    }

    pub fn create_project(&self, name: &str) {
        let mut state = lock(&self.state);
        let next = state.projects.len() as u64 + 1;
        state.projects.entry(name.to_owned()).or_insert(next);
    }

    pub fn lock_project(&self, name: &str) {
        *lock(&self.state).locks.entry(name.to_owned()).or_default() += 1;
    }

    /// Start a publish job on a worker thread and return immediately.
    pub fn begin_publish(self: &Arc<Self>) {
        lock(&self.state).publishing = true;
        let repo = Arc::clone(self);
        thread::spawn(move || {
            thread::sleep(repo.publish_delay);
            let mut state = lock(&repo.state);
            state.locks.clear();
            state.publishing = false;
            state.publishes_completed += 1;
            repo.idle.notify_all();
        });
    }

    pub fn projects(&self) -> Vec<String> {
        lock(&self.state).projects.keys().cloned().collect()
    }

    pub fn locks_in(&self, project: &str) -> u32 {
        lock(&self.state).locks.get(project).copied().unwrap_or(0)
    }

    pub fn imports(&self) -> Vec<ImportParameters> {
        lock(&self.state).imports.clone()
    }

    pub fn is_publishing(&self) -> bool {
        lock(&self.state).publishing
    }

    pub fn publishes_completed(&self) -> u32 {
        lock(&self.state).publishes_completed
    }

    pub fn publish_waits(&self) -> u32 {
        lock(&self.state).publish_waits
    }
}

impl ContentRepository for MockRepository {
    fn authenticate(
        &self,
        ctx: &mut IdentityContext,
        user: &str,
        password: &str,
    ) -> Result<(), RuntimeError> {
        let state = lock(&self.state);
        match state.users.get(user) {
            Some(expected) if expected == password => {
                ctx.user = user.to_owned();
                Ok(())
            }
            _ => Err(RuntimeError::Repository(format!("invalid login for '{user}'"))),
        }
    }

    fn read_project(&self, name: &str) -> Result<ProjectId, RuntimeError> {
        lock(&self.state)
            .projects
            .get(name)
            .map(|&id| ProjectId {
                id,
                name: name.to_owned(),
            })
            .ok_or_else(|| RuntimeError::Repository(format!("unknown project '{name}'")))
    }

    fn select_project(
        &self,
        ctx: &mut IdentityContext,
        project: &ProjectId,
    ) -> Result<(), RuntimeError> {
        self.read_project(&project.name)?;
        ctx.project.clone_from(&project.name);
        Ok(())
    }

    fn unlock_project(&self, ctx: &IdentityContext, project: &ProjectId) -> Result<(), RuntimeError> {
        let mut state = lock(&self.state);
        if !state.projects.contains_key(&project.name) {
            return Err(RuntimeError::Repository(format!(
                "unknown project '{}'",
                project.name
            )));
        }
        let released = state.locks.remove(&project.name).unwrap_or(0);
        debug!("{} released {released} locks in {}", ctx.user, project.name);
        Ok(())
    }

    fn import_data(
        &self,
        ctx: &IdentityContext,
        report: &mut dyn ReportSink,
        params: &ImportParameters,
    ) -> Result<(), RuntimeError> {
        if !params.source.is_file() {
            return Err(RuntimeError::Repository(format!(
                "import source not found: {}",
                params.source.display()
            )));
        }
        let mut state = lock(&self.state);
        if !state.users.contains_key(&ctx.user) {
            return Err(RuntimeError::Repository(format!(
                "'{}' may not import data",
                ctx.user
            )));
        }
        let file_name = params
            .source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if state.fail_imports.contains(&file_name) {
            return Err(RuntimeError::Repository(format!("import of {file_name} failed")));
        }

        report.line(&format!("importing {file_name} into {}", params.target));
        state.imports.push(params.clone());
        *state.locks.entry(ctx.project.clone()).or_default() += 1;
        Ok(())
    }

    fn wait_while_publishing(&self) -> Result<(), RuntimeError> {
        let mut state = lock(&self.state);
        state.publish_waits += 1;
        while state.publishing {
            state = self.idle.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        Ok(())
    }
}

// --- shell ---

#[derive(Debug, Default)]
struct ShellJournal {
    opened: Vec<u64>,
    live: usize,
    commands: Vec<String>,
}

/// Shell backend whose sessions interpret the mock script language against
/// a shared `MockRepository`.
pub struct MockShellBackend {
    repository: Arc<MockRepository>,
    journal: Arc<Mutex<ShellJournal>>,
    failing_exit: bool,
}

impl MockShellBackend {
    pub fn new(repository: Arc<MockRepository>) -> Self {
        Self {
            repository,
            journal: Arc::new(Mutex::new(ShellJournal::default())),
            failing_exit: false,
        }
    }

    /// A backend with its own private repository.
    pub fn standalone() -> Self {
        Self::new(Arc::new(MockRepository::new()))
    }

    /// Sessions close but report an error from `exit()`.
    #[must_use]
    pub fn with_failing_exit(mut self) -> Self {
        self.failing_exit = true;
        self
    }

    pub fn repository(&self) -> &Arc<MockRepository> {
        &self.repository
    }

    pub fn live_sessions(&self) -> usize {
        lock(&self.journal).live
    }

    pub fn opened_sessions(&self) -> Vec<u64> {
        lock(&self.journal).opened.clone()
    }

    /// Every non-comment line executed by any session, in order.
    pub fn commands(&self) -> Vec<String> {
        lock(&self.journal).commands.clone()
    }
}

impl ShellBackend for MockShellBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn available(&self) -> bool {
        true
    }

    fn open(&self, spec: &SessionSpec) -> Result<Box<dyn CommandShell>, RuntimeError> {
        let mut journal = lock(&self.journal);
        journal.opened.push(spec.session_id);
        journal.live += 1;
        Ok(Box::new(MockShell {
            session_id: spec.session_id,
            repository: Arc::clone(&self.repository),
            journal: Arc::clone(&self.journal),
            closed: false,
            failing_exit: self.failing_exit,
        }))
    }
}

struct MockShell {
    session_id: u64,
    repository: Arc<MockRepository>,
    journal: Arc<Mutex<ShellJournal>>,
    closed: bool,
    failing_exit: bool,
}

impl MockShell {
    fn run_line(&self, line: &str) -> Result<(), RuntimeError> {
        let (command, arg) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(c, a)| (c, a.trim()));
        match command {
            "createProject" => self.repository.create_project(arg),
            "lockProject" => self.repository.lock_project(arg),
            "publishProject" => self.repository.begin_publish(),
            "echo" => info!("[session {}] {arg}", self.session_id),
            "fail" => return Err(RuntimeError::ScriptFailed(arg.to_owned())),
            _ => debug!("[session {}] ignoring '{command}'", self.session_id),
        }
        Ok(())
    }
}

impl CommandShell for MockShell {
    fn execute(&mut self, input: &mut dyn BufRead) -> Result<(), RuntimeError> {
        if self.closed {
            return Err(RuntimeError::SessionClosed(self.session_id));
        }
        for line in input.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            lock(&self.journal).commands.push(line.to_owned());
            self.run_line(line)?;
        }
        Ok(())
    }

    fn exit(&mut self) -> Result<(), RuntimeError> {
        if !self.closed {
            self.closed = true;
            lock(&self.journal).live -= 1;
        }
        if self.failing_exit {
            return Err(RuntimeError::ScriptFailed(format!(
                "session {} did not exit cleanly",
                self.session_id
            )));
        }
        Ok(())
    }
}

// --- backing store ---

#[derive(Debug, Default)]
struct DbState {
    databases: BTreeSet<String>,
    tables: BTreeSet<String>,
    open: usize,
    connects: u32,
    create_database_calls: u32,
    fail_create_database: u32,
    fail_drop_database: bool,
    refused: BTreeSet<String>,
    connect_noise: bool,
}

/// Backing store kept in memory, with fault injection.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<DbState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` `create_database` statements.
    pub fn fail_next_create_database(&self, n: u32) {
        lock(&self.state).fail_create_database = n;
    }

    pub fn fail_drop_database(&self, fail: bool) {
        lock(&self.state).fail_drop_database = fail;
    }

    pub fn refuse_profile(&self, profile: &str) {
        lock(&self.state).refused.insert(profile.to_owned());
    }

    /// Every new connection reports a warning right after connecting.
    pub fn with_connect_noise(&self, noise: bool) {
        lock(&self.state).connect_noise = noise;
    }

    /// Pretend a previous run left `name` behind.
    pub fn seed_database(&self, name: &str) {
        lock(&self.state).databases.insert(name.to_owned());
    }

    pub fn has_database(&self, name: &str) -> bool {
        lock(&self.state).databases.contains(name)
    }

    pub fn has_tables(&self, name: &str) -> bool {
        lock(&self.state).tables.contains(name)
    }

    pub fn open_connections(&self) -> usize {
        lock(&self.state).open
    }

    pub fn connects(&self) -> u32 {
        lock(&self.state).connects
    }

    pub fn create_database_calls(&self) -> u32 {
        lock(&self.state).create_database_calls
    }
}

impl Connector for MockConnector {
    fn connect(&self, profile: &ConnectionProfile) -> Result<Box<dyn SetupConnection>, RuntimeError> {
        let mut state = lock(&self.state);
        if state.refused.contains(profile.name().as_str()) {
            return Err(RuntimeError::ConnectFailed {
                profile: profile.name().to_string(),
                reason: "connection refused".to_owned(),
            });
        }
        state.open += 1;
        state.connects += 1;
        let errors = if state.connect_noise {
            vec![format!("connection warning for {}", profile.url())]
        } else {
            Vec::new()
        };
        Ok(Box::new(MockConnection {
            state: Arc::clone(&self.state),
            errors,
            closed: false,
        }))
    }
}

struct MockConnection {
    state: Arc<Mutex<DbState>>,
    errors: Vec<String>,
    closed: bool,
}

impl MockConnection {
    fn statement(
        &mut self,
        op: &str,
        substitutions: &BTreeMap<String, String>,
        run: impl FnOnce(&mut DbState, &str) -> Result<(), String>,
    ) -> Result<(), RuntimeError> {
        if self.closed {
            return Err(RuntimeError::StatementFailed(format!(
                "{op} on a closed connection"
            )));
        }
        let Some(database) = substitutions.get("${database}") else {
            self.errors.push(format!("{op}: no database name given"));
            return Ok(());
        };
        let mut state = lock(&self.state);
        if let Err(e) = run(&mut state, database) {
            self.errors.push(format!("{op}: {e}"));
        }
        Ok(())
    }
}

impl SetupConnection for MockConnection {
    fn create_database(
        &mut self,
        _dialect: Dialect,
        substitutions: &BTreeMap<String, String>,
        _abort_on_error: bool,
    ) -> Result<(), RuntimeError> {
        self.statement("create database", substitutions, |state, db| {
            state.create_database_calls += 1;
            if state.fail_create_database > 0 {
                state.fail_create_database -= 1;
                return Err(format!("cannot create '{db}'"));
            }
            if !state.databases.insert(db.to_owned()) {
                return Err(format!("database '{db}' already exists"));
            }
            Ok(())
        })
    }

    fn create_tables(
        &mut self,
        _dialect: Dialect,
        substitutions: &BTreeMap<String, String>,
        _abort_on_error: bool,
    ) -> Result<(), RuntimeError> {
        self.statement("create tables", substitutions, |state, db| {
            if !state.databases.contains(db) {
                return Err(format!("unknown database '{db}'"));
            }
            if !state.tables.insert(db.to_owned()) {
                return Err(format!("tables already exist in '{db}'"));
            }
            Ok(())
        })
    }

    fn drop_tables(
        &mut self,
        _dialect: Dialect,
        substitutions: &BTreeMap<String, String>,
        _abort_on_error: bool,
    ) -> Result<(), RuntimeError> {
        self.statement("drop tables", substitutions, |state, db| {
            if state.tables.remove(db) {
                Ok(())
            } else {
                Err(format!("no tables in '{db}'"))
            }
        })
    }

    fn drop_database(
        &mut self,
        _dialect: Dialect,
        substitutions: &BTreeMap<String, String>,
        _abort_on_error: bool,
    ) -> Result<(), RuntimeError> {
        self.statement("drop database", substitutions, |state, db| {
            if state.fail_drop_database {
                return Err(format!("cannot drop '{db}'"));
            }
            if !state.databases.remove(db) {
                return Err(format!("unknown database '{db}'"));
            }
            state.tables.remove(db);
            Ok(())
        })
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            lock(&self.state).open -= 1;
        }
    }

    fn errors(&self) -> Vec<String> {
        self.errors.clone()
    }
}
