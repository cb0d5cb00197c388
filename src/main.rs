//! rigup: a terminal multiplexer for long-running local services.
//!
//! This is the entry point. It parses command-line arguments, loads the
//! context file and configuration, builds one controller per service, and
//! runs the main event loop that multiplexes child output, coordination
//! events, user input, and the UI refresh tick.

mod ansi;
mod config;
mod context;
mod events;
mod locks;
mod logview;
mod runner;
mod scrollback;
mod service;
mod supervisor;
mod tui;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::config::{Config, ContextSettings};
use crate::context::LoadedContext;
use crate::events::Event;
use crate::service::{CommandSpec, HealthcheckSpec, ServiceController};
use crate::supervisor::Supervisor;
use crate::tui::DebugOverlay;

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "rigup",
    version,
    about = "Terminal multiplexer for long-running local services"
)]
struct Cli {
    /// Path to the context YAML file.
    context: PathBuf,
    /// Overlay the last received key event.
    #[arg(long)]
    debug_keyboard: bool,
    /// Overlay the scroll-anchor internals of the focused log.
    #[arg(long)]
    debug_scroll: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load();
    let loaded = context::load_context(&cli.context)?;
    let settings = config::load_context_settings(&loaded.file_path);

    let (tx, rx) = mpsc::unbounded_channel();
    let (supervisor, active) = build_supervisor(&loaded, &settings, config.clone(), tx.clone());

    let mut terminal = tui::init_terminal()?;
    spawn_input_listener(tx.clone());
    spawn_signal_listener(tx);

    let debug = DebugOverlay {
        keyboard: cli.debug_keyboard,
        scroll: cli.debug_scroll,
        last_key: None,
    };
    let result = run(&mut terminal, supervisor, rx, loaded, config, active, debug).await;
    tui::restore_terminal(terminal)?;
    result
}

fn build_supervisor(
    loaded: &LoadedContext,
    settings: &ContextSettings,
    config: Config,
    tx: mpsc::UnboundedSender<Event>,
) -> (Supervisor, usize) {
    let declared: Vec<String> = loaded.services.keys().cloned().collect();
    let order = context::merge_service_order(declared, &settings.service_order);

    let mut controllers = Vec::with_capacity(order.len());
    for key in &order {
        let def = &loaded.services[key.as_str()];
        let name = match &def.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => key.clone(),
        };
        let commands = def
            .commands
            .iter()
            .map(|c| CommandSpec {
                command: c.command.clone(),
                path: c.path.clone(),
                locks: c.locks.clone(),
                requires: c.requires.clone(),
                kill: c.kill,
            })
            .collect();
        let healthcheck = def.healthcheck.as_ref().map(|h| HealthcheckSpec {
            command: h.command.clone(),
            period_secs: h.period.unwrap_or(1),
            lock_until_healthy: h.lock_until_healthy.clone(),
        });
        controllers.push(ServiceController::new(
            key.clone(),
            name,
            resolve_service_path(&loaded.dir, def.path.as_deref()),
            commands,
            healthcheck,
            config.max_log_bytes,
            tx.clone(),
        ));
    }

    let supervisor = Supervisor::new(config, controllers);
    let active = supervisor.index_of(&settings.active_service).unwrap_or(0);
    (supervisor, active)
}

async fn run(
    terminal: &mut tui::TuiTerminal,
    mut supervisor: Supervisor,
    mut rx: mpsc::UnboundedReceiver<Event>,
    loaded: LoadedContext,
    config: Config,
    mut active: usize,
    mut debug: DebugOverlay,
) -> Result<()> {
    let size = terminal.size()?;
    set_view_sizes(&mut supervisor, size.width, size.height);

    let mut ticker = tokio::time::interval(Duration::from_millis(config.refresh_millis.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break };
                let should_exit = match event {
                    Event::Key(key) => {
                        handle_key(key, &mut supervisor, &mut active, &loaded, &mut debug)
                    }
                    Event::Resize { width, height } => {
                        let _ = terminal.autoresize();
                        set_view_sizes(&mut supervisor, width, height);
                        false
                    }
                    Event::ShutdownRequested => supervisor.request_shutdown(),
                    other => supervisor.handle_event(other),
                };
                if should_exit {
                    break;
                }
            }
            _ = ticker.tick() => {
                if supervisor.take_dirty() {
                    tui::draw(terminal, &mut supervisor, active, &loaded.name, &debug)?;
                }
            }
        }
    }
    Ok(())
}

// Keys go to the focused log view first; whatever it does not consume is a
// global binding.
fn handle_key(
    key: KeyEvent,
    supervisor: &mut Supervisor,
    active: &mut usize,
    loaded: &LoadedContext,
    debug: &mut DebugOverlay,
) -> bool {
    if key.kind != KeyEventKind::Press {
        return false;
    }
    if debug.keyboard {
        debug.last_key = Some(format_key(key));
        supervisor.mark_dirty();
    }
    if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
        return supervisor.request_shutdown();
    }
    if supervisor.service_mut(*active).log.handle_key(key) {
        supervisor.mark_dirty();
        return false;
    }

    let shift = key.modifiers.contains(KeyModifiers::SHIFT);
    match key.code {
        KeyCode::Char('q') | KeyCode::Esc => return supervisor.request_shutdown(),
        KeyCode::Enter | KeyCode::Char(' ') => supervisor.toggle_service(*active),
        KeyCode::Left | KeyCode::Right if shift => {
            let delta = if key.code == KeyCode::Left { -1 } else { 1 };
            *active = supervisor.move_service(*active, delta);
            save_settings(supervisor, *active, &loaded.file_path);
        }
        KeyCode::Char('H') => {
            *active = supervisor.move_service(*active, -1);
            save_settings(supervisor, *active, &loaded.file_path);
        }
        KeyCode::Char('L') => {
            *active = supervisor.move_service(*active, 1);
            save_settings(supervisor, *active, &loaded.file_path);
        }
        KeyCode::Left | KeyCode::Char('h') => {
            change_active(supervisor, active, -1, &loaded.file_path);
        }
        KeyCode::Right | KeyCode::Char('l') => {
            change_active(supervisor, active, 1, &loaded.file_path);
        }
        _ => {}
    }
    false
}

fn change_active(
    supervisor: &mut Supervisor,
    active: &mut usize,
    delta: i64,
    context_path: &Path,
) {
    let len = supervisor.len();
    if len < 2 {
        return;
    }
    *active = (*active as i64 + delta).rem_euclid(len as i64) as usize;
    supervisor.mark_dirty();
    save_settings(supervisor, *active, context_path);
}

fn save_settings(supervisor: &Supervisor, active: usize, context_path: &Path) {
    let settings = ContextSettings {
        service_order: supervisor
            .services()
            .iter()
            .map(|s| s.key().to_string())
            .collect(),
        active_service: supervisor.service(active).key().to_string(),
    };
    config::save_context_settings(context_path, &settings);
}

fn set_view_sizes(supervisor: &mut Supervisor, width: u16, height: u16) {
    // One header row, one footer row.
    let log_height = (height as usize).saturating_sub(2);
    for index in 0..supervisor.len() {
        supervisor
            .service_mut(index)
            .log
            .set_size(width as usize, log_height);
    }
    supervisor.mark_dirty();
}

fn resolve_service_path(context_dir: &Path, path: Option<&str>) -> PathBuf {
    match path {
        Some(path) => {
            let path = Path::new(path);
            if path.is_absolute() {
                path.to_path_buf()
            } else {
                context_dir.join(path)
            }
        }
        None => context_dir.to_path_buf(),
    }
}

fn format_key(key: KeyEvent) -> String {
    if key.modifiers.is_empty() {
        format!("{:?}", key.code)
    } else {
        format!("{:?}+{:?}", key.modifiers, key.code)
    }
}

fn spawn_input_listener(tx: mpsc::UnboundedSender<Event>) {
    std::thread::spawn(move || loop {
        if crossterm::event::poll(Duration::from_millis(100)).unwrap_or(false) {
            match crossterm::event::read() {
                Ok(crossterm::event::Event::Key(key)) => {
                    if tx.send(Event::Key(key)).is_err() {
                        break;
                    }
                }
                Ok(crossterm::event::Event::Resize(width, height)) => {
                    let _ = tx.send(Event::Resize { width, height });
                }
                Err(_) => break,
                _ => {}
            }
        }
    });
}

fn spawn_signal_listener(tx: mpsc::UnboundedSender<Event>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(signal) => signal,
                Err(_) => return,
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
            let _ = tx.send(Event::ShutdownRequested);
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            let _ = tx.send(Event::ShutdownRequested);
        }
    });
}
