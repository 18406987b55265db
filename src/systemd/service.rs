//! Systemd service actions

use std::{
    env, fmt,
    fs::{self, Permissions},
    io,
    os::unix::fs::{PermissionsExt as _, symlink},
    path::PathBuf,
};

use log::Level;
use nix::sys::signal::Signal;

use super::{
    Error, UnitErrors,
    bus::{Connect, JobOutcome, ServiceManager, SystemBus, UnitStatus},
    unit::{self, DEFAULT_TAG, ServiceDescriptor, UnitPaths},
};

/// Unit files are world readable, only root can write them
const UNIT_FILE_MODE: u32 = 0o644;

/// Units an action applies to
enum Targets {
    /// Explicit unit names
    Units(Vec<String>),
    /// Bare service unit, or its default instance if the manager rejects it
    Bare,
}

/// Lifecycle orchestrator for one service
pub struct Service<'l, C = SystemBus> {
    descriptor: ServiceDescriptor,
    paths: UnitPaths,
    exec_path: Option<PathBuf>,
    bus: C,
    logger: &'l dyn log::Log,
}

impl Service<'static, SystemBus> {
    /// Manage a service through the system bus, reporting to the global logger
    pub fn new(descriptor: ServiceDescriptor) -> Self {
        Self {
            descriptor,
            paths: UnitPaths::default(),
            exec_path: None,
            bus: SystemBus,
            logger: log::logger(),
        }
    }
}

impl<'l, C: Connect> Service<'l, C> {
    /// Use another service manager connection factory
    pub fn with_bus<B: Connect>(self, bus: B) -> Service<'l, B> {
        Service {
            descriptor: self.descriptor,
            paths: self.paths,
            exec_path: self.exec_path,
            bus,
            logger: self.logger,
        }
    }

    /// Report progress to `logger` instead of the global logger
    pub fn with_logger<'m>(self, logger: &'m dyn log::Log) -> Service<'m, C> {
        Service {
            descriptor: self.descriptor,
            paths: self.paths,
            exec_path: self.exec_path,
            bus: self.bus,
            logger,
        }
    }

    /// Use other unit directories
    #[must_use]
    pub fn with_paths(mut self, paths: UnitPaths) -> Self {
        self.paths = paths;
        self
    }

    /// Reference this executable in generated units, instead of the current one
    #[must_use]
    pub fn with_exec_path(mut self, exec_path: PathBuf) -> Self {
        self.exec_path = Some(exec_path);
        self
    }

    /// Managed service identity
    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    /// Path of the unit file, templated or not
    pub fn unit_file(&self, multi: bool) -> PathBuf {
        self.paths.unit_file(&self.descriptor, multi)
    }

    fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        let record = log::Record::builder()
            .level(level)
            .target(module_path!())
            .args(args)
            .build();
        if self.logger.enabled(record.metadata()) {
            self.logger.log(&record);
        }
    }

    fn exec_path(&self) -> Result<PathBuf, Error> {
        match &self.exec_path {
            Some(path) => Ok(path.clone()),
            None => env::current_exe().map_err(Error::CurrentExe),
        }
    }

    /// Generate unit file content for this service
    pub fn render_unit<S: AsRef<str>>(&self, multi: bool, args: &[S]) -> Result<String, Error> {
        let exec_path = self.exec_path()?;
        let exec_path = exec_path
            .to_str()
            .ok_or_else(|| Error::NonUtf8ExecPath(exec_path.clone()))?;
        Ok(unit::render(
            multi,
            &self.descriptor.name,
            &self.descriptor.description,
            exec_path,
            args,
        )?)
    }

    /// Read installed unit file content
    pub fn read_unit(&self, multi: bool) -> Result<String, Error> {
        let path = self.unit_file(multi);
        self.log(Level::Info, format_args!("filepath = {}", path.display()));
        fs::read_to_string(&path).map_err(|e| Error::io(path, e))
    }

    /// Write unit file, and reload manager configuration
    pub fn install<S: AsRef<str>>(&self, multi: bool, args: &[S]) -> Result<(), Error> {
        let sd = &self.descriptor;
        self.log(
            Level::Info,
            format_args!("Install... {} v{} ({})", sd.name, sd.version, sd.app_id),
        );
        let manager = self.bus.connect()?;
        let unit = self.render_unit(multi, args)?;
        let path = self.unit_file(multi);
        fs::write(&path, unit)
            .and_then(|()| fs::set_permissions(&path, Permissions::from_mode(UNIT_FILE_MODE)))
            .map_err(|err| {
                self.log(
                    Level::Error,
                    format_args!("Failed to write unit file {}: {err}", path.display()),
                );
                Error::io(&path, err)
            })?;
        manager.reload_daemon()?;
        self.log(Level::Info, format_args!("Installed {}", sd.name));
        Ok(())
    }

    /// Stop all instances, and remove unit files
    pub fn remove(&self) -> Result<(), Error> {
        self.log(Level::Info, format_args!("Removing... {}", self.descriptor.name));
        let manager = self.bus.connect()?;
        if let Err(err) = self.stop_with(&manager, true, &[]) {
            self.log(Level::Warn, format_args!("{err}"));
        }
        // Attempt both, even if the first one succeeds
        let removed = [false, true]
            .into_iter()
            .filter(|multi| {
                let path = self.unit_file(*multi);
                match fs::remove_file(&path) {
                    Ok(()) => {
                        self.log(Level::Info, format_args!("{} removed", path.display()));
                        true
                    }
                    Err(err) => {
                        self.log(
                            Level::Debug,
                            format_args!("Failed to remove {}: {err}", path.display()),
                        );
                        false
                    }
                }
            })
            .count();
        if removed == 0 {
            return Err(Error::RemoveFailed);
        }
        // Unit files are gone at this point, a failed reload only leaves a stale manager view
        if let Err(err) = manager.reload_daemon() {
            self.log(
                Level::Warn,
                format_args!("Failed to reload service manager configuration: {err}"),
            );
        }
        self.log(Level::Info, format_args!("Removed {}", self.descriptor.name));
        Ok(())
    }

    /// Start `num` numbered instances, or the tagged instances, or the service itself
    pub fn start(&self, num: u32, tags: &[String]) -> Result<(), Error> {
        let manager = self.bus.connect()?;
        let targets = if num > 0 {
            Targets::Units(
                (1..=num)
                    .map(|i| self.descriptor.instance_name(&i.to_string()))
                    .collect(),
            )
        } else {
            self.tag_targets(tags)
        };
        self.run_each("Started", targets, |unit| manager.start_unit(unit).map(Some))
    }

    /// Stop all running units, or the tagged instances, or the service itself
    pub fn stop(&self, all: bool, tags: &[String]) -> Result<(), Error> {
        let manager = self.bus.connect()?;
        self.stop_with(&manager, all, tags)
    }

    fn stop_with(&self, manager: &C::Manager, all: bool, tags: &[String]) -> Result<(), Error> {
        let targets = self.targets(manager, all, tags)?;
        self.run_each("Stop", targets, |unit| manager.stop_unit(unit).map(Some))
    }

    /// Restart all units, or the tagged instances, or the service itself
    pub fn restart(&self, all: bool, tags: &[String]) -> Result<(), Error> {
        let manager = self.bus.connect()?;
        let targets = self.targets(&manager, all, tags)?;
        self.run_each("Restarted", targets, |unit| {
            manager.restart_unit(unit).map(Some)
        })
    }

    /// Reload (or restart if unsupported) all units, or the tagged instances, or the service itself
    pub fn reload(&self, all: bool, tags: &[String]) -> Result<(), Error> {
        self.log(Level::Info, format_args!("Reloading... {}", self.descriptor.name));
        let manager = self.bus.connect()?;
        let targets = self.targets(&manager, all, tags)?;
        self.run_each("Reloaded", targets, |unit| {
            manager.reload_or_restart_unit(unit).map(Some)
        })
    }

    /// Send SIGKILL to all units, or the tagged instances, or the service itself
    pub fn kill(&self, all: bool, tags: &[String]) -> Result<(), Error> {
        let manager = self.bus.connect()?;
        let targets = self.targets(&manager, all, tags)?;
        self.run_each("Killed", targets, |unit| {
            manager
                .kill_unit(unit, Signal::SIGKILL as i32)
                .map(|()| None)
        })
    }

    /// Link unit file into the wants directory, once per tag for templates
    pub fn enable(&self, tags: &[String]) -> Result<(), Error> {
        let template = self.unit_file(true);
        let single = self.unit_file(false);
        let links: Vec<(PathBuf, String)> = if template.is_file() {
            let default = [DEFAULT_TAG.to_owned()];
            let tags = if tags.is_empty() { &default[..] } else { tags };
            tags.iter()
                .map(|tag| (template.clone(), self.descriptor.instance_name(tag)))
                .collect()
        } else if single.is_file() {
            vec![(single, self.descriptor.unit_name())]
        } else {
            return Err(Error::NotInstalled);
        };

        let wants_dir = self.paths.wants_dir();
        fs::create_dir_all(wants_dir).map_err(|e| Error::io(wants_dir, e))?;

        let mut failures = UnitErrors::default();
        for (origin, unit) in links {
            let link = self.paths.wants_link(&unit);
            match symlink(&origin, &link) {
                Ok(()) => self.log(
                    Level::Info,
                    format_args!("Created symlink {} -> {}", link.display(), origin.display()),
                ),
                Err(err)
                    if err.kind() == io::ErrorKind::AlreadyExists
                        && fs::read_link(&link).is_ok_and(|t| t == origin) =>
                {
                    self.log(Level::Info, format_args!("{unit} is already enabled"));
                }
                Err(err) => {
                    self.log(
                        Level::Error,
                        format_args!(
                            "Failed to create symlink {} -> {}: {err}",
                            link.display(),
                            origin.display()
                        ),
                    );
                    failures.push(&unit, err);
                }
            }
        }
        failures.into_result()
    }

    /// Remove wants directory links of the tagged instances, or of the default instance and the service itself
    pub fn disable(&self, tags: &[String]) -> Result<(), Error> {
        let units: Vec<String> = if tags.is_empty() {
            vec![
                self.descriptor.instance_name(DEFAULT_TAG),
                self.descriptor.unit_name(),
            ]
        } else {
            tags.iter()
                .map(|tag| self.descriptor.instance_name(tag))
                .collect()
        };
        let mut failures = UnitErrors::default();
        for unit in units {
            let link = self.paths.wants_link(&unit);
            match fs::remove_file(&link) {
                Ok(()) => self.log(
                    Level::Info,
                    format_args!("Removed symlink {}", link.display()),
                ),
                Err(err) if err.kind() == io::ErrorKind::NotFound => {
                    self.log(Level::Info, format_args!("{unit} is not enabled"));
                }
                Err(err) => {
                    self.log(
                        Level::Warn,
                        format_args!("Failed to remove symlink {}: {err}", link.display()),
                    );
                    failures.push(&unit, err);
                }
            }
        }
        failures.into_result()
    }

    /// List units of this service, optionally logging their state
    pub fn status(&self, show: bool) -> Result<Vec<UnitStatus>, Error> {
        let manager = self.bus.connect()?;
        self.list_units(&manager, show)
    }

    fn list_units(&self, manager: &C::Manager, show: bool) -> Result<Vec<UnitStatus>, Error> {
        let pattern = self.descriptor.unit_pattern();
        let units = manager.list_units_by_patterns(&[&pattern])?;
        if show {
            for unit in &units {
                let level = if unit.is_running() {
                    Level::Info
                } else {
                    Level::Warn
                };
                self.log(level, format_args!("Status {unit}"));
            }
        }
        Ok(units)
    }

    fn tag_targets(&self, tags: &[String]) -> Targets {
        if tags.is_empty() {
            Targets::Bare
        } else {
            Targets::Units(
                tags.iter()
                    .map(|tag| self.descriptor.instance_name(tag))
                    .collect(),
            )
        }
    }

    fn targets(&self, manager: &C::Manager, all: bool, tags: &[String]) -> Result<Targets, Error> {
        if all {
            Ok(Targets::Units(
                self.list_units(manager, false)?
                    .into_iter()
                    .map(|u| u.name)
                    .collect(),
            ))
        } else {
            Ok(self.tag_targets(tags))
        }
    }

    /// Apply `op` to each target unit, sequentially, collecting failures
    fn run_each<F>(&self, verb: &str, targets: Targets, mut op: F) -> Result<(), Error>
    where
        F: FnMut(&str) -> zbus::Result<Option<JobOutcome>>,
    {
        let mut failures = UnitErrors::default();
        match targets {
            Targets::Units(units) => {
                for unit in &units {
                    self.report(verb, unit, op(unit.as_str()), &mut failures);
                }
            }
            Targets::Bare => {
                let bare = self.descriptor.unit_name();
                match op(bare.as_str()) {
                    Ok(outcome) => self.report(verb, &bare, Ok(outcome), &mut failures),
                    Err(err) => {
                        let instance = self.descriptor.instance_name(DEFAULT_TAG);
                        self.log(
                            Level::Debug,
                            format_args!("{bare} rejected ({err}), falling back to {instance}"),
                        );
                        let res = op(instance.as_str());
                        self.report(verb, &instance, res, &mut failures);
                    }
                }
            }
        }
        failures.into_result()
    }

    fn report(
        &self,
        verb: &str,
        unit: &str,
        res: zbus::Result<Option<JobOutcome>>,
        failures: &mut UnitErrors,
    ) {
        match res {
            Ok(Some(outcome)) if outcome.is_failure() => {
                self.log(Level::Error, format_args!("{verb} [ {unit} ] {outcome}"));
                failures.push(unit, format_args!("job {outcome}"));
            }
            Ok(Some(outcome)) => {
                self.log(Level::Info, format_args!("{verb} [ {unit} ] {outcome}"));
            }
            Ok(None) => self.log(Level::Info, format_args!("{verb} [ {unit} ]")),
            Err(err) => {
                self.log(Level::Warn, format_args!("{verb} [ {unit} ] {err}"));
                failures.push(unit, err);
            }
        }
    }
}
