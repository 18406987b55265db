//! Systemd manager D-Bus client

use std::{fmt, str::FromStr};

use zbus::zvariant::{ObjectPath, OwnedObjectPath};

/// Job mode for enqueued jobs, fail if it conflicts with a pending one
const JOB_MODE: &str = "fail";
/// Which unit processes to send a signal to
const KILL_WHOM: &str = "all";

/// Final state of a systemd job, as reported by the `JobRemoved` signal
#[derive(Debug, Clone, PartialEq, Eq, strum::EnumString, strum::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum JobOutcome {
    /// Job completed successfully
    Done,
    /// Job was canceled before completion
    Canceled,
    /// Job timed out
    Timeout,
    /// Job failed
    Failed,
    /// A required dependency job failed
    Dependency,
    /// Job was not applicable to the unit
    Skipped,
    /// Anything newer systemd versions may report
    #[strum(default)]
    Other(String),
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Self::Other(result) = self {
            write!(f, "{result}")
        } else {
            let s: &'static str = self.into();
            write!(f, "{s}")
        }
    }
}

impl JobOutcome {
    /// Whether this outcome should be treated as an error
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

/// Snapshot of a loaded unit state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
    /// Unit name, ie. `foo@1.service`
    pub name: String,
    /// Unit description
    pub description: String,
    /// Load state (`loaded`, `not-found`...)
    pub load_state: String,
    /// Active state (`active`, `inactive`, `failed`...)
    pub active_state: String,
    /// Sub state (`running`, `dead`, `exited`...)
    pub sub_state: String,
}

impl UnitStatus {
    /// Whether the unit main process is running
    pub fn is_running(&self) -> bool {
        self.sub_state == "running"
    }
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} active={} sub={}",
            self.name, self.active_state, self.sub_state
        )
    }
}

/// Unit lifecycle primitives exposed by the service manager.
///
/// Job methods block until the job they enqueue is removed from the manager queue.
pub trait ServiceManager {
    /// Start unit
    fn start_unit(&self, unit: &str) -> zbus::Result<JobOutcome>;
    /// Stop unit
    fn stop_unit(&self, unit: &str) -> zbus::Result<JobOutcome>;
    /// Restart unit
    fn restart_unit(&self, unit: &str) -> zbus::Result<JobOutcome>;
    /// Reload unit if it supports it, restart it otherwise
    fn reload_or_restart_unit(&self, unit: &str) -> zbus::Result<JobOutcome>;
    /// Send signal to all unit processes
    fn kill_unit(&self, unit: &str, signal: i32) -> zbus::Result<()>;
    /// Reload all unit files
    fn reload_daemon(&self) -> zbus::Result<()>;
    /// List loaded units whose names match any of the glob patterns
    fn list_units_by_patterns(&self, patterns: &[&str]) -> zbus::Result<Vec<UnitStatus>>;
}

/// Factory for service manager connections
pub trait Connect {
    /// Connection type
    type Manager: ServiceManager;

    /// Open a new connection
    fn connect(&self) -> zbus::Result<Self::Manager>;
}

/// Entry of the `ListUnitsByPatterns` reply, signature `(ssssssouso)`
type UnitListEntry = (
    String,
    String,
    String,
    String,
    String,
    String,
    OwnedObjectPath,
    u32,
    String,
    OwnedObjectPath,
);

#[zbus::proxy(
    interface = "org.freedesktop.systemd1.Manager",
    default_service = "org.freedesktop.systemd1",
    default_path = "/org/freedesktop/systemd1",
    gen_async = false,
    blocking_name = "ManagerProxyBlocking"
)]
trait Manager {
    fn start_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    fn stop_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    fn restart_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    fn reload_or_restart_unit(&self, name: &str, mode: &str) -> zbus::Result<OwnedObjectPath>;

    fn kill_unit(&self, name: &str, whom: &str, signal: i32) -> zbus::Result<()>;

    fn reload(&self) -> zbus::Result<()>;

    fn subscribe(&self) -> zbus::Result<()>;

    fn list_units_by_patterns(
        &self,
        states: &[&str],
        patterns: &[&str],
    ) -> zbus::Result<Vec<UnitListEntry>>;

    #[zbus(signal)]
    fn job_removed(
        &self,
        id: u32,
        job: ObjectPath<'_>,
        unit: &str,
        result: &str,
    ) -> zbus::Result<()>;
}

/// System bus connection factory
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBus;

impl Connect for SystemBus {
    type Manager = SystemManager;

    fn connect(&self) -> zbus::Result<SystemManager> {
        let conn = zbus::blocking::Connection::system()?;
        let proxy = ManagerProxyBlocking::new(&conn)?;
        // Ensure job signals are emitted to us
        proxy.subscribe()?;
        Ok(SystemManager { proxy })
    }
}

/// Systemd manager reached over the system bus
pub struct SystemManager {
    proxy: ManagerProxyBlocking<'static>,
}

impl SystemManager {
    /// Enqueue a job and block until systemd reports its completion
    fn run_job<F>(&self, enqueue: F) -> zbus::Result<JobOutcome>
    where
        F: FnOnce(&ManagerProxyBlocking<'static>) -> zbus::Result<OwnedObjectPath>,
    {
        // Listen before enqueuing, the job can complete before the method reply is read
        let signals = self.proxy.receive_job_removed()?;
        let job = enqueue(&self.proxy)?;
        for signal in signals {
            let args = signal.args()?;
            if args.job().as_str() == job.as_str() {
                return JobOutcome::from_str(args.result())
                    .map_err(|e| zbus::Error::Failure(e.to_string()));
            }
        }
        Err(zbus::Error::Failure(format!(
            "Signal stream ended before job {} completion",
            job.as_str()
        )))
    }
}

impl ServiceManager for SystemManager {
    fn start_unit(&self, unit: &str) -> zbus::Result<JobOutcome> {
        self.run_job(|p| p.start_unit(unit, JOB_MODE))
    }

    fn stop_unit(&self, unit: &str) -> zbus::Result<JobOutcome> {
        self.run_job(|p| p.stop_unit(unit, JOB_MODE))
    }

    fn restart_unit(&self, unit: &str) -> zbus::Result<JobOutcome> {
        self.run_job(|p| p.restart_unit(unit, JOB_MODE))
    }

    fn reload_or_restart_unit(&self, unit: &str) -> zbus::Result<JobOutcome> {
        self.run_job(|p| p.reload_or_restart_unit(unit, JOB_MODE))
    }

    fn kill_unit(&self, unit: &str, signal: i32) -> zbus::Result<()> {
        self.proxy.kill_unit(unit, KILL_WHOM, signal)
    }

    fn reload_daemon(&self) -> zbus::Result<()> {
        self.proxy.reload()
    }

    fn list_units_by_patterns(&self, patterns: &[&str]) -> zbus::Result<Vec<UnitStatus>> {
        Ok(self
            .proxy
            .list_units_by_patterns(&[], patterns)?
            .into_iter()
            .map(
                |(name, description, load_state, active_state, sub_state, ..)| UnitStatus {
                    name,
                    description,
                    load_state,
                    active_state,
                    sub_state,
                },
            )
            .collect())
    }
}
