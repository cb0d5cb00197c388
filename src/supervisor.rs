//! Cross-service coordination.
//!
//! The supervisor owns every `ServiceController` (in tab order) plus the
//! lock registry, and routes the typed events the controllers emit: a
//! started service drains the wait-lists that name it, a stopped service
//! drives the global quit, released locks retry blocked starts, and start
//! requests land on the right controller. Keeping the routing here means a
//! controller never calls into another controller.

use std::collections::HashMap;

use crate::config::Config;
use crate::events::Event;
use crate::locks::LockRegistry;
use crate::service::{ServiceController, ServiceState};

pub struct Supervisor {
    services: Vec<ServiceController>,
    locks: LockRegistry,
    config: Config,
    pub quitting: bool,
    dirty: bool,
}

impl Supervisor {
    pub fn new(config: Config, services: Vec<ServiceController>) -> Self {
        Self {
            services,
            locks: LockRegistry::new(),
            config,
            quitting: false,
            dirty: true,
        }
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn service(&self, index: usize) -> &ServiceController {
        &self.services[index]
    }

    pub fn service_mut(&mut self, index: usize) -> &mut ServiceController {
        &mut self.services[index]
    }

    pub fn services(&self) -> &[ServiceController] {
        &self.services
    }

    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.services.iter().position(|s| s.key() == key)
    }

    /// Marks the UI stale and reports whether it was.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn all_stopped(&self) -> bool {
        self.services
            .iter()
            .all(|s| s.state == ServiceState::Stopped)
    }

    pub fn running_count(&self) -> usize {
        self.services
            .iter()
            .filter(|s| matches!(s.state, ServiceState::Running | ServiceState::Stopping))
            .count()
    }

    /// Routes one service event. Returns true when the program should exit
    /// (the last service stopped while quitting).
    pub fn handle_event(&mut self, event: Event) -> bool {
        match event {
            Event::ServiceOutput {
                key,
                text,
                end_line,
            } => {
                if let Some(index) = self.index_of(&key) {
                    self.services[index].append_output(&text, end_line);
                }
                self.dirty = true;
            }
            Event::ServiceExited { key, run, code } => {
                if let Some(index) = self.index_of(&key) {
                    let Self {
                        services, locks, ..
                    } = self;
                    services[index].on_process_exited(run, code, locks);
                }
                self.dirty = true;
            }
            Event::HealthcheckDone {
                key,
                generation,
                code,
                error,
            } => {
                if let Some(index) = self.index_of(&key) {
                    let Self {
                        services,
                        locks,
                        config,
                        ..
                    } = self;
                    services[index].on_healthcheck_done(generation, code, error, locks, config);
                }
                self.dirty = true;
            }
            Event::ServiceStarted { key } => {
                let mut ready = Vec::new();
                for index in 0..self.services.len() {
                    if self.services[index].key() != key && self.services[index].done_waiting(&key)
                    {
                        ready.push(index);
                    }
                }
                for index in ready {
                    self.start_service_at(index);
                }
                self.dirty = true;
            }
            Event::ServiceStopping { .. } => {
                self.dirty = true;
            }
            Event::ServiceStopped { key } => {
                let blocked: Vec<usize> = (0..self.services.len())
                    .filter(|&i| self.services[i].wait_list().contains(&key))
                    .collect();
                for index in blocked {
                    self.start_service_at(index);
                }
                self.dirty = true;
                if self.quitting && self.all_stopped() {
                    return true;
                }
            }
            Event::LocksReleased { names } => {
                let unblocked: Vec<usize> = (0..self.services.len())
                    .filter(|&i| self.services[i].wants_unlock(&names))
                    .collect();
                for index in unblocked {
                    self.start_service_at(index);
                }
                self.dirty = true;
            }
            Event::StartRequested { key } => {
                if !self.quitting {
                    if let Some(index) = self.index_of(&key) {
                        self.start_service_at(index);
                    }
                }
            }
            // Input, resize, and shutdown are handled by the event loop.
            Event::Key(_) | Event::Resize { .. } | Event::ShutdownRequested => {}
        }
        false
    }

    pub fn start_service_at(&mut self, index: usize) {
        let states = self.states_snapshot();
        let Self {
            services,
            locks,
            config,
            ..
        } = self;
        if let Some(controller) = services.get_mut(index) {
            controller.start_service(&states, locks, config);
        }
        self.dirty = true;
    }

    pub fn end_service_at(&mut self, index: usize) {
        let Self {
            services, locks, ..
        } = self;
        if let Some(controller) = services.get_mut(index) {
            controller.end_service(locks);
        }
        self.dirty = true;
    }

    /// Enter/space on the focused tab: start when stopped, stop when
    /// running or already stopping.
    pub fn toggle_service(&mut self, index: usize) {
        if index >= self.services.len() {
            return;
        }
        match self.services[index].state {
            ServiceState::Stopped => {
                if !self.quitting {
                    self.start_service_at(index);
                }
            }
            ServiceState::Running | ServiceState::Stopping => self.end_service_at(index),
            ServiceState::Starting => {}
        }
    }

    /// Begins global shutdown: stops every non-stopped service. Returns true
    /// when everything was already stopped and the program can exit now.
    pub fn request_shutdown(&mut self) -> bool {
        self.quitting = true;
        self.dirty = true;
        let active: Vec<usize> = (0..self.services.len())
            .filter(|&i| self.services[i].state != ServiceState::Stopped)
            .collect();
        if active.is_empty() {
            return true;
        }
        for index in active {
            self.end_service_at(index);
        }
        false
    }

    /// Moves the service at `index` by `delta` tab positions, rotating the
    /// whole row when it falls off either end. Returns the new index.
    pub fn move_service(&mut self, index: usize, delta: i64) -> usize {
        let len = self.services.len();
        if len < 2 || index >= len {
            return index;
        }
        self.dirty = true;
        let target = index as i64 + delta;
        if target < 0 {
            let controller = self.services.remove(index);
            self.services.push(controller);
            len - 1
        } else if target as usize >= len {
            let controller = self.services.remove(index);
            self.services.insert(0, controller);
            0
        } else {
            self.services.swap(index, target as usize);
            target as usize
        }
    }

    fn states_snapshot(&self) -> HashMap<String, ServiceState> {
        self.services
            .iter()
            .map(|s| (s.key().to_string(), s.state))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::CommandSpec;
    use std::path::PathBuf;
    use std::time::Duration;
    use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

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
        tx: UnboundedSender<Event>,
    ) -> ServiceController {
        ServiceController::new(
            key.to_string(),
            key.to_string(),
            PathBuf::from("/tmp"),
            commands,
            None,
            1024 * 1024,
            tx,
        )
    }

    fn test_config() -> Config {
        Config {
            command_executor: "/bin/sh".to_string(),
            command_argument: "-c".to_string(),
            ..Config::default()
        }
    }

    fn pump(supervisor: &mut Supervisor, rx: &mut UnboundedReceiver<Event>) -> bool {
        let mut should_exit = false;
        while let Ok(event) = rx.try_recv() {
            should_exit |= supervisor.handle_event(event);
        }
        should_exit
    }

    async fn pump_until(
        supervisor: &mut Supervisor,
        rx: &mut UnboundedReceiver<Event>,
        mut done: impl FnMut(&Supervisor) -> bool,
    ) -> bool {
        let mut should_exit = false;
        for _ in 0..200 {
            should_exit |= pump(supervisor, rx);
            if done(supervisor) {
                return should_exit;
            }
            let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for events")
                .expect("event channel closed");
            should_exit |= supervisor.handle_event(event);
        }
        panic!("condition not reached");
    }

    #[test]
    fn move_service_swaps_and_rotates() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let services = ["a", "b", "c"]
            .iter()
            .map(|key| controller(key, vec![command("true")], tx.clone()))
            .collect();
        let mut supervisor = Supervisor::new(test_config(), services);

        assert_eq!(supervisor.move_service(0, 1), 1);
        let order: Vec<_> = supervisor.services().iter().map(|s| s.key().to_string()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);

        // Falling off the left end rotates the service to the last tab.
        assert_eq!(supervisor.move_service(0, -1), 2);
        let order: Vec<_> = supervisor.services().iter().map(|s| s.key().to_string()).collect();
        assert_eq!(order, vec!["a", "c", "b"]);

        // Falling off the right end rotates it to the first tab.
        assert_eq!(supervisor.move_service(2, 1), 0);
        let order: Vec<_> = supervisor.services().iter().map(|s| s.key().to_string()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn shutdown_with_nothing_running_exits_immediately() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let services = vec![controller("a", vec![command("true")], tx)];
        let mut supervisor = Supervisor::new(test_config(), services);
        assert!(supervisor.request_shutdown());
        assert!(supervisor.quitting);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn requires_chain_starts_dependency_first() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let a = controller("a", vec![command("sleep 5")], tx.clone());
        let mut b_command = command("sleep 5");
        b_command.requires = vec!["a".to_string()];
        let b = controller("b", vec![b_command], tx.clone());
        let mut supervisor = Supervisor::new(test_config(), vec![a, b]);

        // The user starts b; a is requested, started, and once a reports
        // started, b's wait-list drains and b spawns.
        supervisor.start_service_at(1);
        assert_eq!(supervisor.service(1).state, ServiceState::Starting);
        assert_eq!(supervisor.service(1).wait_list(), ["a"]);

        pump_until(&mut supervisor, &mut rx, |s| {
            s.service(1).state == ServiceState::Running
        })
        .await;
        assert_eq!(supervisor.service(0).state, ServiceState::Running);
        assert!(supervisor.service(1).wait_list().is_empty());
        assert!(supervisor.service(1).pid() > 0);

        supervisor.request_shutdown();
        let should_exit = pump_until(&mut supervisor, &mut rx, Supervisor::all_stopped).await;
        assert!(should_exit);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn lock_contention_serializes_services() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut a_command = command("sleep 5");
        a_command.locks = vec!["db".to_string()];
        let mut b_command = command("sleep 5");
        b_command.locks = vec!["db".to_string()];
        let a = controller("a", vec![a_command], tx.clone());
        let b = controller("b", vec![b_command], tx.clone());
        let mut supervisor = Supervisor::new(test_config(), vec![a, b]);

        supervisor.start_service_at(0);
        pump_until(&mut supervisor, &mut rx, |s| {
            s.service(0).state == ServiceState::Running
        })
        .await;

        supervisor.start_service_at(1);
        assert_eq!(supervisor.service(1).state, ServiceState::Starting);
        assert_eq!(supervisor.service(1).pid(), 0);
        let waiting_line = {
            let buffer = supervisor.service(1).log.buffer();
            (0..buffer.len()).any(|i| {
                buffer
                    .plain_line(i)
                    .contains("Waiting for locks to unlock: db")
            })
        };
        assert!(waiting_line);

        // Stopping a releases "db", which lets b spawn.
        supervisor.end_service_at(0);
        pump_until(&mut supervisor, &mut rx, |s| {
            s.service(1).state == ServiceState::Running
        })
        .await;
        assert_eq!(supervisor.service(0).state, ServiceState::Stopped);

        supervisor.request_shutdown();
        pump_until(&mut supervisor, &mut rx, Supervisor::all_stopped).await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn quit_waits_for_every_service_to_stop() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let services = vec![
            controller("a", vec![command("sleep 5")], tx.clone()),
            controller("b", vec![command("sleep 5")], tx.clone()),
        ];
        let mut supervisor = Supervisor::new(test_config(), services);
        supervisor.start_service_at(0);
        supervisor.start_service_at(1);
        pump_until(&mut supervisor, &mut rx, |s| s.running_count() == 2).await;

        assert!(!supervisor.request_shutdown());
        let should_exit = pump_until(&mut supervisor, &mut rx, Supervisor::all_stopped).await;
        assert!(should_exit);
        assert_eq!(supervisor.running_count(), 0);
    }
}
