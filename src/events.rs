//! Event definitions for the application event loop.
//!
//! Everything that mutates supervisor or service state travels through this
//! enum: output and exits from child processes, healthcheck results,
//! cross-service coordination (start requests, started/stopped transitions,
//! lock releases), and user input.

use crossterm::event::KeyEvent;

#[derive(Debug, Clone)]
pub enum Event {
    /// A fragment of child output. `end_line` is false when the fragment
    /// leaves the line open (a long line split by the reader, or output
    /// without a trailing newline).
    ServiceOutput {
        key: String,
        text: String,
        end_line: bool,
    },
    /// The child of spawn `run` exited. Stale runs are ignored by the
    /// controller.
    ServiceExited { key: String, run: u64, code: i32 },
    /// One healthcheck attempt finished. `error` carries a spawn failure.
    HealthcheckDone {
        key: String,
        generation: u64,
        code: i32,
        error: Option<String>,
    },
    /// A service finished starting (last command spawned and healthy).
    ServiceStarted { key: String },
    /// A termination signal was delivered to a service's child.
    ServiceStopping { key: String },
    /// A service reached Stopped.
    ServiceStopped { key: String },
    /// Locks were released; blocked services may proceed.
    LocksReleased { names: Vec<String> },
    /// A service asked for another service to be started.
    StartRequested { key: String },
    /// A keyboard event from the input thread.
    Key(KeyEvent),
    /// The terminal was resized.
    Resize { width: u16, height: u16 },
    /// The user or the OS asked the whole program to shut down.
    ShutdownRequested,
}
