//! Tracing subsystem control
//!
//! Drives the tracing filesystem through its named setting files
//! (`tracing_on`, `set_event`, `trace_marker`, ...). The first write is
//! used as a permission check: failing it means nothing else will work.

use crate::{
    error::{LatencyError, Result},
    source::{LineSource, TraceSource},
};
use log::{debug, info, warn};
use std::{
    fs::OpenOptions,
    future::Future,
    io::{self, Write},
    path::{Path, PathBuf},
};

/// What to capture once tracing is enabled
#[derive(Debug, Clone, Default)]
pub struct TracingSettings {
    /// Space-separated event names for `set_event`
    pub events: Option<String>,
    /// Restrict events to one process
    pub pid: Option<u32>,
    /// Trace clock source (e.g. `global`)
    pub clock: Option<String>,
}

/// Write-only channel of named tracing settings
pub trait ControlChannel: Send + Sync {
    /// Stream type produced by [`ControlChannel::open_source`]
    type Source: LineSource + 'static;

    /// Write one raw value into a named setting
    fn write_setting(&self, setting: &str, value: &str) -> io::Result<()>;

    /// Location of the channel, for diagnostics
    fn location(&self) -> PathBuf;

    /// Open the event stream fed by this channel's settings
    fn open_source(&self) -> impl Future<Output = Result<Self::Source>> + Send;

    fn write(&self, setting: &str, value: &str) -> Result<()> {
        debug!("tracing: {} <- {:?}", setting, value);
        self.write_setting(setting, value)
            .map_err(|source| LatencyError::ControlWrite {
                setting: setting.to_string(),
                source,
            })
    }

    fn set_tracing(&self, on: bool) -> Result<()> {
        self.write("tracing_on", if on { "1" } else { "0" })
    }

    fn set_events(&self, events: &str) -> Result<()> {
        self.write("set_event", events)
    }

    fn set_clock(&self, clock: &str) -> Result<()> {
        self.write("trace_clock", clock)
    }

    /// Restrict capture to one process, `None` clears the filter
    fn set_event_pid(&self, pid: Option<u32>) -> Result<()> {
        let value = pid.map(|p| p.to_string()).unwrap_or_default();
        self.write("set_event_pid", &value)
    }

    /// Inject an opaque marker line into the event stream
    fn mark(&self, text: &str) -> Result<()> {
        self.write("trace_marker", text)
    }

    /// Reset the tracing subsystem and start capturing
    ///
    /// When a step after the permission check fails, whatever was already
    /// set is released before the error is returned.
    fn start(&self, settings: &TracingSettings) -> Result<()> {
        // If the first write fails we most likely lack permissions
        self.write_setting("trace", "")
            .map_err(|source| LatencyError::ControlChannelDenied {
                path: self.location(),
                source,
            })?;

        if let Err(e) = configure(self, settings) {
            warn!("Tracing setup failed, releasing: {}", e);
            let _ = self.release();
            return Err(e);
        }

        info!("Tracing enabled at {:?}", self.location());
        Ok(())
    }

    /// Stop capturing and clear event filters
    ///
    /// Every step is attempted; the first failure is returned.
    fn release(&self) -> Result<()> {
        let results = [
            self.set_tracing(false),
            self.set_event_pid(None),
            self.set_events(""),
        ];

        let mut first_err = None;
        for result in results {
            if let Err(e) = result {
                warn!("  ⚠ {}", e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => {
                info!("Tracing disabled");
                Ok(())
            }
        }
    }
}

/// Bring-up after the permission check
fn configure<C: ControlChannel + ?Sized>(control: &C, settings: &TracingSettings) -> Result<()> {
    control.write("trace", "")?;
    control.write("current_tracer", "nop")?;
    if let Some(clock) = &settings.clock {
        control.set_clock(clock)?;
    }
    if let Some(events) = &settings.events {
        control.set_events(events)?;
    }
    if settings.pid.is_some() {
        control.set_event_pid(settings.pid)?;
    }
    control.set_tracing(true)
}

/// Control channel backed by the tracing filesystem
#[derive(Debug, Clone)]
pub struct TracingControl {
    root: PathBuf,
}

impl TracingControl {
    /// # Arguments
    ///
    /// * `root` - Tracing filesystem mount (e.g. `/sys/kernel/debug/tracing`)
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ControlChannel for TracingControl {
    type Source = TraceSource;

    fn write_setting(&self, setting: &str, value: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(self.root.join(setting))?;
        file.write_all(value.as_bytes())
    }

    fn location(&self) -> PathBuf {
        self.root.clone()
    }

    async fn open_source(&self) -> Result<TraceSource> {
        TraceSource::open_pipe(self.root.join("trace_pipe"))
    }
}
