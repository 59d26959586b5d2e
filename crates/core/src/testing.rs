//! 测试用的可编排包管理器。

use crate::executor::CommandOutput;
use crate::manager::PackageManager;
use crate::package::InstallStatus;
use crate::parser::{find_marked_line, OutputParser};
use async_trait::async_trait;
use pkgdeck_error::{PkgdeckError, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

pub struct FakeParser;

impl OutputParser for FakeParser {
    fn is_not_found(&self, output: &str) -> bool {
        output.contains("not found")
    }

    fn parse_status(&self, _package: &str, _output: &str) -> InstallStatus {
        InstallStatus::NotInstalled
    }

    fn detect_failure(&self, output: &str) -> Option<String> {
        find_marked_line(output, &["error:", "access denied"])
    }
}

/// 探测结果按包名排队返回，队列只剩一个元素时重复返回它。
/// 返回 `Err(code)` 表示命令以该退出码失败。
pub struct FakeManager {
    name: String,
    parser: FakeParser,
    statuses: Mutex<HashMap<String, VecDeque<std::result::Result<InstallStatus, i32>>>>,
    applies: Mutex<VecDeque<std::result::Result<CommandOutput, i32>>>,
    apply_delay: Duration,
    probe_delay: Duration,
    apply_times: Mutex<Vec<Instant>>,
    probe_calls: AtomicUsize,
    apply_calls: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl FakeManager {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parser: FakeParser,
            statuses: Mutex::new(HashMap::new()),
            applies: Mutex::new(VecDeque::new()),
            apply_delay: Duration::ZERO,
            probe_delay: Duration::ZERO,
            apply_times: Mutex::new(Vec::new()),
            probe_calls: AtomicUsize::new(0),
            apply_calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    pub fn with_apply_delay(mut self, delay: Duration) -> Self {
        self.apply_delay = delay;
        self
    }

    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = delay;
        self
    }

    pub fn script_status(
        &self,
        package: &str,
        script: Vec<std::result::Result<InstallStatus, i32>>,
    ) {
        self.statuses
            .lock()
            .unwrap()
            .insert(package.to_lowercase(), script.into());
    }

    pub fn script_apply(&self, script: Vec<std::result::Result<CommandOutput, i32>>) {
        *self.applies.lock().unwrap() = script.into();
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn apply_calls(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }

    pub fn apply_times(&self) -> Vec<Instant> {
        self.apply_times.lock().unwrap().clone()
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    fn failure(&self, command: &str, exit_code: i32) -> PkgdeckError {
        PkgdeckError::CommandFailed {
            manager: self.name.clone(),
            command: command.to_string(),
            exit_code,
        }
    }

    async fn run_apply(&self, command: &str) -> Result<CommandOutput> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        self.apply_times.lock().unwrap().push(Instant::now());
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);

        if !self.apply_delay.is_zero() {
            sleep(self.apply_delay).await;
        }

        let next = {
            let mut applies = self.applies.lock().unwrap();
            if applies.len() > 1 {
                applies.pop_front()
            } else {
                applies.front().cloned()
            }
        };
        self.running.fetch_sub(1, Ordering::SeqCst);

        match next {
            Some(Ok(output)) => Ok(output),
            Some(Err(code)) => Err(self.failure(command, code)),
            None => Ok(CommandOutput::new(0, "Successfully completed")),
        }
    }
}

#[async_trait]
impl PackageManager for FakeManager {
    fn name(&self) -> &str {
        &self.name
    }

    fn parser(&self) -> &dyn OutputParser {
        &self.parser
    }

    async fn check_available(&self) -> Result<bool> {
        Ok(true)
    }

    async fn query_status(&self, package: &str) -> Result<InstallStatus> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        if !self.probe_delay.is_zero() {
            sleep(self.probe_delay).await;
        }
        let next = {
            let mut statuses = self.statuses.lock().unwrap();
            match statuses.get_mut(&package.to_lowercase()) {
                Some(script) if script.len() > 1 => script.pop_front(),
                Some(script) => script.front().cloned(),
                None => None,
            }
        };

        match next {
            Some(Ok(status)) => Ok(status),
            Some(Err(code)) => Err(self.failure("list", code)),
            None => Ok(InstallStatus::NotInstalled),
        }
    }

    async fn install(&self, _package: &str) -> Result<CommandOutput> {
        self.run_apply("install").await
    }

    async fn uninstall(&self, _package: &str) -> Result<CommandOutput> {
        self.run_apply("uninstall").await
    }
}
