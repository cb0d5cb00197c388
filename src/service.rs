//! Per-service lifecycle control.
//!
//! A `ServiceController` owns one service: its ordered command sequence, the
//! optional healthcheck, the scrollback view, and the state machine
//! Stopped → Starting → Running → Stopping → Stopped. Starting covers
//! everything between the first start request and the service being up:
//! waiting on required services, waiting on locks, running earlier commands
//! of the sequence, and polling the healthcheck.
//!
//! Controllers never call each other. Cross-service effects (start this
//! dependency, locks were released, I started/stopped) are sent as events
//! and routed back through the supervisor.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;

use crate::config::Config;
use crate::events::Event;
use crate::locks::LockRegistry;
use crate::logview::LogView;
use crate::runner;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// One entry of a service's command sequence.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub command: String,
    /// Working directory override, absolute or relative to the service path.
    pub path: Option<String>,
    pub locks: Vec<String>,
    pub requires: Vec<String>,
    pub kill: bool,
}

#[derive(Debug, Clone)]
pub struct HealthcheckSpec {
    pub command: String,
    pub period_secs: u64,
    pub lock_until_healthy: Vec<String>,
}

pub struct ServiceController {
    key: String,
    pub name: String,
    path: PathBuf,
    commands: Vec<CommandSpec>,
    healthcheck: Option<HealthcheckSpec>,
    pub state: ServiceState,
    active_command: usize,
    pid: u32,
    term_attempts: u32,
    wait_list: Vec<String>,
    touched: bool,
    run: u64,
    hc_generation: u64,
    pub log: LogView,
    tx: UnboundedSender<Event>,
}

impl ServiceController {
    pub fn new(
        key: String,
        name: String,
        path: PathBuf,
        commands: Vec<CommandSpec>,
        healthcheck: Option<HealthcheckSpec>,
        max_log_bytes: usize,
        tx: UnboundedSender<Event>,
    ) -> Self {
        let mut log = LogView::new(max_log_bytes);
        log.append(
            "\x1b[90mPress enter or space to start the service\x1b[0m",
            true,
        );
        Self {
            key,
            name,
            path,
            commands,
            healthcheck,
            state: ServiceState::Stopped,
            active_command: 0,
            pid: 0,
            term_attempts: 0,
            wait_list: Vec::new(),
            touched: false,
            run: 0,
            hc_generation: 0,
            log,
            tx,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn term_attempts(&self) -> u32 {
        self.term_attempts
    }

    pub fn wait_list(&self) -> &[String] {
        &self.wait_list
    }

    /// Moves the service toward Running. Safe to call repeatedly: a start
    /// that is already past the spawn, or a service that is Running or
    /// Stopping, is left alone. Returns without a child when the service is
    /// blocked on required services or on locks; the supervisor calls again
    /// once the blocker clears.
    pub fn start_service(
        &mut self,
        states: &HashMap<String, ServiceState>,
        locks: &mut LockRegistry,
        config: &Config,
    ) {
        if matches!(self.state, ServiceState::Running | ServiceState::Stopping)
            || (self.state == ServiceState::Starting && self.pid != 0)
        {
            return;
        }

        if self.state == ServiceState::Stopped && self.active_command == 0 {
            if !self.touched {
                self.log.clear();
                self.touched = true;
            }
            self.state = ServiceState::Starting;
            for index in 0..self.commands.len() {
                for required in self.commands[index].requires.clone() {
                    let running = states.get(&required) == Some(&ServiceState::Running);
                    if !running && !self.wait_list.contains(&required) {
                        self.wait_list.push(required.clone());
                        self.sys_out(&format!("Starting required service: {required}"));
                        let _ = self.tx.send(Event::StartRequested { key: required });
                    }
                }
            }
        }

        let command = self.commands[self.active_command].clone();

        if command.requires.iter().any(|r| self.wait_list.contains(r)) {
            self.sys_out(&format!(
                "Waiting for required services to start: {}",
                self.wait_list.join(", ")
            ));
            return;
        }

        let relevant_locks = self.relevant_locks();
        if !relevant_locks.is_empty() {
            self.state = ServiceState::Starting;
            let overlap = locks.overlap(&relevant_locks);
            if !overlap.is_empty() {
                self.sys_out(&format!(
                    "Waiting for locks to unlock: {}",
                    overlap.join(", ")
                ));
                return;
            }
        }

        let dir = self.resolve_command_dir(&command);
        let shown = runner::transform_command(config, &command.command);
        self.sys_out(&format!("Running command \"{}\" in {}", shown, dir.display()));
        self.run += 1;
        let pid = match runner::spawn_service_command(
            config,
            &self.key,
            self.run,
            &command.command,
            &dir,
            self.tx.clone(),
        ) {
            Ok(pid) => pid,
            Err(err) => {
                self.handle_spawn_error(err, locks);
                return;
            }
        };

        self.pid = pid;
        self.state = ServiceState::Starting;
        locks.acquire(&relevant_locks);
        self.sys_out(&format!("Process started with PID: {pid}"));

        if self.active_command == self.commands.len() - 1 {
            match self.healthcheck.clone() {
                Some(hc) if !hc.command.is_empty() => {
                    self.hc_generation += 1;
                    self.sys_out(&format!("Running healthcheck \"{}\"", hc.command));
                    runner::spawn_healthcheck(
                        config,
                        &self.key,
                        self.hc_generation,
                        &hc.command,
                        &self.path,
                        None,
                        self.tx.clone(),
                    );
                }
                hc => {
                    // No check to wait for: any hold-until-healthy locks are
                    // released right as the service comes up.
                    if let Some(hc) = hc {
                        self.release_locks(&hc.lock_until_healthy, locks);
                    }
                    self.state = ServiceState::Running;
                    let _ = self.tx.send(Event::ServiceStarted {
                        key: self.key.clone(),
                    });
                }
            }
        }
    }

    /// Child exit from spawn `run`. Advances the command sequence on a clean
    /// exit mid-sequence, otherwise settles into Stopped and releases locks.
    pub fn on_process_exited(&mut self, run: u64, code: i32, locks: &mut LockRegistry) {
        if run != self.run {
            return;
        }
        let was_stopping = self.state == ServiceState::Stopping;
        self.pid = 0;
        self.term_attempts = 0;
        self.sys_out(&format!("Process finished with exit code: {code}"));

        let finished = self.active_command;
        self.release_locks(&self.commands[finished].locks.clone(), locks);

        if !was_stopping && code == 0 && self.active_command + 1 < self.commands.len() {
            self.active_command += 1;
            let _ = self.tx.send(Event::StartRequested {
                key: self.key.clone(),
            });
        } else {
            self.active_command = 0;
            self.wait_list.clear();
            self.state = ServiceState::Stopped;
            if let Some(hc) = self.healthcheck.clone() {
                self.release_locks(&hc.lock_until_healthy, locks);
            }
            let _ = self.tx.send(Event::ServiceStopped {
                key: self.key.clone(),
            });
        }
    }

    /// One healthcheck attempt finished. On the first healthy result while
    /// still Starting the service becomes Running; otherwise the check is
    /// rescheduled after the polling period.
    pub fn on_healthcheck_done(
        &mut self,
        generation: u64,
        code: i32,
        error: Option<String>,
        locks: &mut LockRegistry,
        config: &Config,
    ) {
        if generation != self.hc_generation || self.state != ServiceState::Starting {
            return;
        }
        let Some(hc) = self.healthcheck.clone() else {
            return;
        };
        match error {
            Some(err) => self.sys_err(&format!("Error running healthcheck: {err}")),
            None if code == 0 => {
                self.sys_out("Healthcheck passed");
                self.release_locks(&hc.lock_until_healthy, locks);
                self.state = ServiceState::Running;
                let _ = self.tx.send(Event::ServiceStarted {
                    key: self.key.clone(),
                });
                return;
            }
            None => self.sys_err(&format!("Healthcheck failed with exit code: {code}")),
        }
        let period = hc.period_secs.max(1);
        self.sys_out(&format!("Running healthcheck \"{}\"", hc.command));
        runner::spawn_healthcheck(
            config,
            &self.key,
            generation,
            &hc.command,
            &self.path,
            Some(Duration::from_secs(period)),
            self.tx.clone(),
        );
    }

    /// Stops the service. With a live child, each call delivers one stop
    /// signal — polite twice, forced from the third attempt (or immediately
    /// for kill-flagged and kill-listed commands). Without a child the
    /// service settles into Stopped directly.
    pub fn end_service(&mut self, locks: &mut LockRegistry) {
        self.term_attempts += 1;
        self.state = ServiceState::Stopping;
        self.wait_list.clear();
        self.sys_out("Closing process");
        if self.pid != 0 {
            let command = &self.commands[self.active_command];
            let force = runner::should_force_kill(&command.command, command.kill, self.term_attempts);
            match runner::terminate(self.pid, force) {
                Ok(()) => {
                    let _ = self.tx.send(Event::ServiceStopping {
                        key: self.key.clone(),
                    });
                }
                Err(err) => self.sys_err(&format!("Error closing process: {err}")),
            }
        } else {
            self.term_attempts = 0;
            self.state = ServiceState::Stopped;
            self.release_locks(&self.commands[self.active_command].locks.clone(), locks);
            // The hold-until-healthy locks stay held across the whole command
            // sequence, so their release cannot depend on which command was
            // active when the stop arrived.
            if let Some(hc) = self.healthcheck.clone() {
                self.release_locks(&hc.lock_until_healthy, locks);
            }
            self.active_command = 0;
            let _ = self.tx.send(Event::ServiceStopped {
                key: self.key.clone(),
            });
        }
    }

    /// A required service reached Running. Returns true when the wait-list
    /// drained and this service should be started again.
    pub fn done_waiting(&mut self, other: &str) -> bool {
        let Some(position) = self.wait_list.iter().position(|key| key == other) else {
            return false;
        };
        self.wait_list.remove(position);
        if self.wait_list.is_empty() && self.state == ServiceState::Starting {
            self.sys_out("All dependencies are up, starting");
            return true;
        }
        false
    }

    /// Whether a release of `names` unblocks this service: it is Starting
    /// without a child and one of the released names is among the locks its
    /// next spawn needs.
    pub fn wants_unlock(&self, names: &[String]) -> bool {
        if self.state != ServiceState::Starting || self.pid != 0 {
            return false;
        }
        let relevant = self.relevant_locks();
        names.iter().any(|name| relevant.contains(name))
    }

    pub fn append_output(&mut self, text: &str, end_line: bool) {
        self.log.append(text, end_line);
    }

    // Locks the next spawn must hold: the command's own locks plus, for the
    // first command of the sequence, the healthcheck's hold-until-healthy
    // locks.
    fn relevant_locks(&self) -> Vec<String> {
        let mut relevant = self.commands[self.active_command].locks.clone();
        if self.active_command == 0 {
            if let Some(hc) = &self.healthcheck {
                for name in &hc.lock_until_healthy {
                    if !relevant.contains(name) {
                        relevant.push(name.clone());
                    }
                }
            }
        }
        relevant
    }

    fn resolve_command_dir(&self, command: &CommandSpec) -> PathBuf {
        match &command.path {
            Some(path) => {
                let path = Path::new(path);
                if path.is_absolute() {
                    path.to_path_buf()
                } else {
                    self.path.join(path)
                }
            }
            None => self.path.clone(),
        }
    }

    fn handle_spawn_error(&mut self, err: anyhow::Error, locks: &mut LockRegistry) {
        self.sys_err(&format!("Error running command: {err:#}"));
        self.state = ServiceState::Stopped;
        if self.active_command != 0 {
            self.active_command = 0;
            if let Some(hc) = self.healthcheck.clone() {
                self.release_locks(&hc.lock_until_healthy, locks);
            }
        }
    }

    fn release_locks(&mut self, names: &[String], locks: &mut LockRegistry) {
        let released = locks.release(names);
        if !released.is_empty() {
            let _ = self.tx.send(Event::LocksReleased { names: released });
        }
    }

    fn sys_out(&mut self, message: &str) {
        self.log
            .append(&format!("\x1b[90m{message}\x1b[0m"), true);
    }

    fn sys_err(&mut self, message: &str) {
        self.log
            .append(&format!("\x1b[31m{message}\x1b[0m"), true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn command(cmd: &str) -> CommandSpec {
        CommandSpec {
            command: cmd.to_string(),
            path: None,
            locks: Vec::new(),
            requires: Vec::new(),
            kill: false,
        }
    }

    fn controller(
        key: &str,
        commands: Vec<CommandSpec>,
        healthcheck: Option<HealthcheckSpec>,
    ) -> (ServiceController, UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = ServiceController::new(
            key.to_string(),
            key.to_string(),
            PathBuf::from("/tmp"),
            commands,
            healthcheck,
            1024 * 1024,
            tx,
        );
        (controller, rx)
    }

    fn plain_log(controller: &ServiceController) -> Vec<String> {
        let buffer = controller.log.buffer();
        (0..buffer.len())
            .map(|i| buffer.plain_line(i).to_string())
            .collect()
    }

    fn test_config() -> Config {
        Config {
            command_executor: "/bin/sh".to_string(),
            command_argument: "-c".to_string(),
            ..Config::default()
        }
    }

    fn drain(rx: &mut UnboundedReceiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn new_service_is_stopped_with_banner() {
        let (controller, _rx) = controller("api", vec![command("run")], None);
        assert_eq!(controller.state, ServiceState::Stopped);
        assert_eq!(controller.pid(), 0);
        assert!(plain_log(&controller)[0].contains("Press enter"));
    }

    #[test]
    fn start_blocks_on_held_locks() {
        let mut locked = command("run");
        locked.locks = vec!["db".to_string()];
        let (mut controller, mut rx) = controller("api", vec![locked], None);
        let mut locks = LockRegistry::new();
        locks.acquire(&["db".to_string()]);

        controller.start_service(&HashMap::new(), &mut locks, &test_config());

        assert_eq!(controller.state, ServiceState::Starting);
        assert_eq!(controller.pid(), 0);
        assert!(plain_log(&controller)
            .iter()
            .any(|l| l.contains("Waiting for locks to unlock: db")));
        assert!(drain(&mut rx).is_empty());
        assert!(controller.wants_unlock(&["db".to_string()]));
        assert!(!controller.wants_unlock(&["other".to_string()]));
    }

    #[test]
    fn start_blocks_on_required_services_and_requests_them() {
        let mut dependent = command("run");
        dependent.requires = vec!["db".to_string()];
        let (mut controller, mut rx) = controller("api", vec![dependent], None);
        let mut locks = LockRegistry::new();
        let states = HashMap::from([("db".to_string(), ServiceState::Stopped)]);

        controller.start_service(&states, &mut locks, &test_config());

        assert_eq!(controller.state, ServiceState::Starting);
        assert_eq!(controller.wait_list(), ["db"]);
        assert_eq!(controller.pid(), 0);
        let events = drain(&mut rx);
        assert!(matches!(
            events.as_slice(),
            [Event::StartRequested { key }] if key == "db"
        ));
        assert!(plain_log(&controller)
            .iter()
            .any(|l| l.contains("Waiting for required services to start: db")));
    }

    #[test]
    fn running_requirement_is_not_waited_on() {
        let mut dependent = command("run");
        dependent.requires = vec!["db".to_string()];
        let (mut controller, _rx) = controller("api", vec![dependent], None);
        let states = HashMap::from([("db".to_string(), ServiceState::Running)]);
        // Only exercise the wait-list bookkeeping: hold a lock so the start
        // parks before spawning.
        let mut locks = LockRegistry::new();
        controller.commands[0].locks = vec!["gate".to_string()];
        locks.acquire(&["gate".to_string()]);

        controller.start_service(&states, &mut locks, &test_config());
        assert!(controller.wait_list().is_empty());
    }

    #[test]
    fn done_waiting_drains_the_wait_list() {
        let mut dependent = command("run");
        dependent.requires = vec!["db".to_string(), "cache".to_string()];
        let (mut controller, _rx) = controller("api", vec![dependent], None);
        let mut locks = LockRegistry::new();
        controller.start_service(&HashMap::new(), &mut locks, &test_config());
        assert_eq!(controller.wait_list().len(), 2);

        assert!(!controller.done_waiting("db"));
        assert!(controller.done_waiting("cache"));
        assert!(controller.wait_list().is_empty());
        assert!(!controller.done_waiting("db"));
    }

    #[test]
    fn end_service_without_child_settles_immediately() {
        let mut locked = command("run");
        locked.locks = vec!["db".to_string()];
        let (mut controller, mut rx) = controller("api", vec![locked], None);
        let mut locks = LockRegistry::new();
        locks.acquire(&["db".to_string()]);
        controller.start_service(&HashMap::new(), &mut locks, &test_config());
        drain(&mut rx);

        controller.end_service(&mut locks);
        assert_eq!(controller.state, ServiceState::Stopped);
        assert_eq!(controller.term_attempts(), 0);
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::ServiceStopped { key } if key == "api")));
        // Lock ownership is not tracked: ending the service requests the
        // release of the command's locks whether or not it acquired them.
        assert!(!locks.is_held("db"));
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::LocksReleased { names } if names.contains(&"db".to_string()))));
    }

    #[test]
    fn end_service_mid_sequence_releases_healthcheck_locks() {
        let healthcheck = HealthcheckSpec {
            command: "true".to_string(),
            period_secs: 1,
            lock_until_healthy: vec!["warmup".to_string()],
        };
        let (mut controller, mut rx) = controller(
            "api",
            vec![command("step-one"), command("step-two")],
            Some(healthcheck),
        );
        let mut locks = LockRegistry::new();
        // Command 0 finished and held the warmup lock across the sequence;
        // command 1 is parked without a child.
        locks.acquire(&["warmup".to_string()]);
        controller.state = ServiceState::Starting;
        controller.active_command = 1;

        controller.end_service(&mut locks);
        assert_eq!(controller.state, ServiceState::Stopped);
        assert!(!locks.is_held("warmup"));
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::LocksReleased { names } if names.contains(&"warmup".to_string()))));
    }

    #[test]
    fn stale_exit_events_are_ignored() {
        let (mut controller, _rx) = controller("api", vec![command("run")], None);
        let mut locks = LockRegistry::new();
        controller.on_process_exited(99, 0, &mut locks);
        assert_eq!(controller.state, ServiceState::Stopped);
        assert!(plain_log(&controller)
            .iter()
            .all(|l| !l.contains("exit code")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn single_command_lifecycle_reaches_running_then_stopped() {
        let (mut controller, mut rx) = controller("api", vec![command("sleep 5")], None);
        let mut locks = LockRegistry::new();
        let config = test_config();

        controller.start_service(&HashMap::new(), &mut locks, &config);
        assert_eq!(controller.state, ServiceState::Running);
        assert!(controller.pid() > 0);
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::ServiceStarted { key } if key == "api")));

        // A second start while running is a no-op.
        let pid = controller.pid();
        controller.start_service(&HashMap::new(), &mut locks, &config);
        assert_eq!(controller.pid(), pid);

        controller.end_service(&mut locks);
        assert_eq!(controller.state, ServiceState::Stopping);
        assert_eq!(controller.term_attempts(), 1);

        // The reaper task reports the exit on the channel.
        let run = loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out")
                .expect("channel closed");
            if let Event::ServiceExited { run, .. } = event {
                break run;
            }
        };
        controller.on_process_exited(run, -1, &mut locks);
        assert_eq!(controller.state, ServiceState::Stopped);
        assert_eq!(controller.term_attempts(), 0);
        assert_eq!(controller.pid(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn clean_mid_sequence_exit_advances_to_next_command() {
        let (mut controller, mut rx) =
            controller("api", vec![command("true"), command("sleep 5")], None);
        let mut locks = LockRegistry::new();
        let config = test_config();

        controller.start_service(&HashMap::new(), &mut locks, &config);
        // Not the last command: the service stays Starting.
        assert_eq!(controller.state, ServiceState::Starting);

        let run = loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out")
                .expect("channel closed");
            if let Event::ServiceExited { run, .. } = event {
                break run;
            }
        };
        controller.on_process_exited(run, 0, &mut locks);
        assert_eq!(controller.state, ServiceState::Starting);
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::StartRequested { key } if key == "api")));

        // The supervisor would route the request straight back.
        controller.start_service(&HashMap::new(), &mut locks, &config);
        assert_eq!(controller.state, ServiceState::Running);
        controller.end_service(&mut locks);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_mid_sequence_exit_resets_to_stopped() {
        let (mut controller, mut rx) =
            controller("api", vec![command("false"), command("sleep 5")], None);
        let mut locks = LockRegistry::new();
        controller.start_service(&HashMap::new(), &mut locks, &test_config());
        let run = loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out")
                .expect("channel closed");
            if let Event::ServiceExited { run, .. } = event {
                break run;
            }
        };
        controller.on_process_exited(run, 1, &mut locks);
        assert_eq!(controller.state, ServiceState::Stopped);
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::ServiceStopped { key } if key == "api")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn healthcheck_gates_the_running_transition() {
        let healthcheck = HealthcheckSpec {
            command: "true".to_string(),
            period_secs: 1,
            lock_until_healthy: vec!["warmup".to_string()],
        };
        let (mut controller, mut rx) =
            controller("api", vec![command("sleep 5")], Some(healthcheck));
        let mut locks = LockRegistry::new();
        let config = test_config();

        controller.start_service(&HashMap::new(), &mut locks, &config);
        assert_eq!(controller.state, ServiceState::Starting);
        assert!(locks.is_held("warmup"));

        let (generation, code) = loop {
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out")
                .expect("channel closed");
            if let Event::HealthcheckDone {
                generation, code, ..
            } = event
            {
                break (generation, code);
            }
        };
        controller.on_healthcheck_done(generation, code, None, &mut locks, &config);
        assert_eq!(controller.state, ServiceState::Running);
        assert!(!locks.is_held("warmup"));
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::LocksReleased { names } if names.contains(&"warmup".to_string()))));
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::ServiceStarted { key } if key == "api")));
        controller.end_service(&mut locks);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn empty_healthcheck_command_releases_hold_locks_on_running() {
        let healthcheck = HealthcheckSpec {
            command: String::new(),
            period_secs: 1,
            lock_until_healthy: vec!["warmup".to_string()],
        };
        let (mut controller, mut rx) =
            controller("api", vec![command("sleep 5")], Some(healthcheck));
        let mut locks = LockRegistry::new();

        controller.start_service(&HashMap::new(), &mut locks, &test_config());
        assert_eq!(controller.state, ServiceState::Running);
        assert!(!locks.is_held("warmup"));
        let events = drain(&mut rx);
        assert!(events
            .iter()
            .any(|e| matches!(e, Event::LocksReleased { names } if names.contains(&"warmup".to_string()))));
        controller.end_service(&mut locks);
    }

    #[test]
    fn stale_healthcheck_results_are_discarded() {
        let healthcheck = HealthcheckSpec {
            command: "true".to_string(),
            period_secs: 1,
            lock_until_healthy: Vec::new(),
        };
        let (mut controller, _rx) = controller("api", vec![command("run")], Some(healthcheck));
        let mut locks = LockRegistry::new();
        controller.on_healthcheck_done(5, 0, None, &mut locks, &test_config());
        assert_eq!(controller.state, ServiceState::Stopped);
    }
}
