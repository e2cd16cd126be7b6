//! Fakes shared by the unit tests of this crate.

use crate::alembic::{AlembicCli, MigrationTool};
use crate::command::{CommandLine, CommandOutput, CommandRunner};
use crate::config::{DatabaseConfig, IndexConfig};
use crate::config_store::ConfigurationStore;
use crate::error::{ChartreuseError, Result};
use crate::helper::MigrationBackend;
use crate::index::{EndpointCheck, EslembicCli, IndexTool};
use crate::inspector::DatabaseInspector;
use crate::orchestrator::IndexBackend;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Records every command and answers from a script keyed by the end of the command line
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    calls: Mutex<Vec<String>>,
    responses: Mutex<Vec<(String, CommandOutput)>>,
}

impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Answer commands ending with `suffix`; unmatched commands succeed silently
    pub(crate) fn respond(self, suffix: &str, stdout: &str, exit_code: i32) -> Self {
        self.responses.lock().unwrap().push((
            suffix.to_string(),
            CommandOutput {
                stdout: stdout.to_string(),
                stderr: if exit_code == 0 {
                    String::new()
                } else {
                    "scripted failure".to_string()
                },
                exit_code,
            },
        ));
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn calls_ending_with(&self, suffix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|call| call.ends_with(suffix))
            .collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &CommandLine, _working_directory: &Path) -> Result<CommandOutput> {
        let line = command.to_string();
        self.calls.lock().unwrap().push(line.clone());
        let responses = self.responses.lock().unwrap();
        Ok(responses
            .iter()
            .find(|(suffix, _)| line.ends_with(suffix.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }
}

/// Inspector answering from fixed data
pub(crate) struct FakeInspector {
    tables: Vec<String>,
    privilege_failures_left: AtomicU32,
    list_calls: Arc<AtomicU32>,
}

#[async_trait]
impl DatabaseInspector for FakeInspector {
    async fn list_tables(&self) -> Result<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.tables.clone())
    }

    async fn check_role_privileges(&self) -> Result<()> {
        let left = self.privilege_failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.privilege_failures_left.store(left - 1, Ordering::SeqCst);
            return Err(ChartreuseError::database("permission denied for table canary"));
        }
        Ok(())
    }
}

/// Backend pairing a [`ScriptedRunner`]-driven alembic with fake inspectors
pub(crate) struct FakeBackend {
    pub(crate) runner: Arc<ScriptedRunner>,
    tables: HashMap<String, Vec<String>>,
    privilege_failures: u32,
    pub(crate) list_calls: Arc<AtomicU32>,
}

impl FakeBackend {
    pub(crate) fn new(runner: ScriptedRunner) -> Self {
        Self::shared(Arc::new(runner))
    }

    /// Backend driving a runner the test keeps a handle on
    pub(crate) fn shared(runner: Arc<ScriptedRunner>) -> Self {
        Self {
            runner,
            tables: HashMap::new(),
            privilege_failures: 0,
            list_calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Tables reported for database `name`; databases without an entry report none
    pub(crate) fn with_tables(mut self, name: &str, tables: &[&str]) -> Self {
        self.tables.insert(
            name.to_string(),
            tables.iter().map(|table| table.to_string()).collect(),
        );
        self
    }

    /// Fail the privilege canary this many times before it succeeds
    pub(crate) fn with_privilege_failures(mut self, failures: u32) -> Self {
        self.privilege_failures = failures;
        self
    }
}

impl MigrationBackend for FakeBackend {
    fn inspector(&self, config: &DatabaseConfig) -> Result<Box<dyn DatabaseInspector>> {
        Ok(Box::new(FakeInspector {
            tables: self.tables.get(&config.name).cloned().unwrap_or_default(),
            privilege_failures_left: AtomicU32::new(self.privilege_failures),
            list_calls: self.list_calls.clone(),
        }))
    }

    fn migration_tool(
        &self,
        config: &DatabaseConfig,
        additional_parameters: &str,
    ) -> Result<Box<dyn MigrationTool>> {
        Ok(Box::new(AlembicCli::new(
            self.runner.clone(),
            "alembic",
            &config.alembic_directory,
            &config.alembic_config_file,
            additional_parameters,
        )?))
    }
}

/// Reachability check with a fixed answer
pub(crate) struct FixedCheck(pub(crate) bool);

#[async_trait]
impl EndpointCheck for FixedCheck {
    async fn is_reachable(&self, _url: &str) -> bool {
        self.0
    }
}

/// Index backend driving `eslembic` through a [`ScriptedRunner`] against a reachable cluster
pub(crate) struct FakeIndexBackend {
    runner: Arc<ScriptedRunner>,
    check: FixedCheck,
}

impl FakeIndexBackend {
    pub(crate) fn new(runner: Arc<ScriptedRunner>) -> Self {
        Self {
            runner,
            check: FixedCheck(true),
        }
    }
}

impl IndexBackend for FakeIndexBackend {
    fn index_tool(&self, config: &IndexConfig) -> Result<Box<dyn IndexTool>> {
        Ok(Box::new(EslembicCli::new(self.runner.clone(), "eslembic", config)))
    }

    fn endpoint_check(&self) -> &dyn EndpointCheck {
        &self.check
    }
}

/// Store remembering every rewrite instead of touching files
#[derive(Default)]
pub(crate) struct RecordingStore {
    pub(crate) writes: Vec<(PathBuf, String, String)>,
}

impl ConfigurationStore for RecordingStore {
    fn set_connection_string(&mut self, file: &Path, section: &str, url: &str) -> Result<()> {
        self.writes
            .push((file.to_path_buf(), section.to_string(), url.to_string()));
        Ok(())
    }
}
