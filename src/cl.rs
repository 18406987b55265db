//! Command line interface

use std::path::PathBuf;

use anyhow::Context as _;
use clap::Parser;
use nix::unistd::Uid;

use crate::systemd::{Connect, Service, ServiceDescriptor};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(version, about)]
pub struct Args {
    /// Managed service identity
    #[command(flatten)]
    pub service: ServiceOptions,
    /// Command to run
    #[command(subcommand)]
    pub command: Command,
}

/// Identity of the managed service
#[derive(Debug, clap::Args)]
pub struct ServiceOptions {
    /// Service unit name, without the .service suffix
    #[arg(long, env = "SDUNIT_NAME", default_value = env!("CARGO_PKG_NAME"), global = true)]
    pub name: String,
    /// Service description
    #[arg(
        long,
        env = "SDUNIT_DESCRIPTION",
        default_value = env!("CARGO_PKG_DESCRIPTION"),
        global = true
    )]
    pub description: String,
    /// Version of the managed application
    #[arg(
        long,
        env = "SDUNIT_VERSION",
        default_value = env!("CARGO_PKG_VERSION"),
        global = true
    )]
    pub app_version: String,
    /// Application identifier [default: org.sdunit.<NAME>]
    #[arg(long, env = "SDUNIT_APP_ID", global = true)]
    pub app_id: Option<String>,
    /// Executable started by generated units [default: this program]
    #[arg(long, env = "SDUNIT_EXEC", global = true)]
    pub exec: Option<PathBuf>,
}

impl ServiceOptions {
    /// Build service identity from options
    pub fn descriptor(&self) -> ServiceDescriptor {
        let app_id = self
            .app_id
            .clone()
            .unwrap_or_else(|| format!("org.sdunit.{}", self.name));
        ServiceDescriptor::new(&self.name, &self.description, &self.app_version, &app_id)
    }
}

/// Top level commands
#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Service lifecycle verbs
    #[command(flatten)]
    Service(Action),
    /// Generate man pages
    #[cfg(feature = "generate-extra")]
    GenManPages {
        /// Target directory (must exist)
        dir: PathBuf,
    },
    /// Generate shell completion
    #[cfg(feature = "generate-extra")]
    #[group(required = true, multiple = true)]
    GenShellComplete {
        /// Shell to generate for, leave empty for all
        #[arg(short = 's', long, default_value = None)]
        shell: Option<clap_complete::Shell>,
        /// Target directory, leave empty to write to standard output
        dir: Option<PathBuf>,
    },
}

/// Service lifecycle verbs
#[derive(Debug, clap::Subcommand)]
pub enum Action {
    /// Install service unit file
    #[command(visible_alias = "i")]
    Install {
        /// Install a template unit, to run several instances
        #[arg(short, long, default_value_t = false)]
        multi: bool,
        /// Arguments passed to the executable
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Stop service, and remove its unit files
    #[command(visible_aliases = ["rm", "uninstall", "uni", "un"])]
    Remove,
    /// Start service, or some of its instances
    #[command(visible_alias = "run")]
    Start {
        /// Number of instances to start, named 1 to NUM
        #[arg(short, long, default_value_t = 0)]
        num: u32,
        /// Instances to start
        tags: Vec<String>,
    },
    /// Stop service, or some of its instances
    Stop {
        /// Units to act on
        #[command(flatten)]
        targets: Targets,
    },
    /// Restart service, or some of its instances
    #[command(visible_aliases = ["r", "re"])]
    Restart {
        /// Units to act on
        #[command(flatten)]
        targets: Targets,
    },
    /// Send SIGKILL to service, or some of its instances
    #[command(visible_alias = "k")]
    Kill {
        /// Units to act on
        #[command(flatten)]
        targets: Targets,
    },
    /// Reload service, or some of its instances, restarting them if they can not reload
    Reload {
        /// Units to act on
        #[command(flatten)]
        targets: Targets,
    },
    /// Start service, or some of its instances, at boot
    Enable {
        /// Instances to enable [default: default]
        tags: Vec<String>,
    },
    /// Do not start service, or some of its instances, at boot
    Disable {
        /// Instances to disable
        tags: Vec<String>,
    },
    /// Show state of service units
    #[command(visible_aliases = ["info", "if"])]
    Status,
    /// Print systemd unit file
    #[command(hide = true)]
    Unit {
        /// Print generated unit instead of the installed one
        #[arg(short, long, default_value_t = false)]
        template: bool,
        /// Use template unit
        #[arg(short, long, default_value_t = false)]
        multi: bool,
        /// Arguments passed to the executable, for generated unit
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

/// Units to act on
#[derive(Debug, clap::Args)]
pub struct Targets {
    /// Act on all units of the service
    #[arg(short, long, default_value_t = false)]
    pub all: bool,
    /// Instances to act on
    pub tags: Vec<String>,
}

impl Action {
    /// Whether the action modifies the system
    pub fn requires_root(&self) -> bool {
        !matches!(self, Self::Status | Self::Unit { .. })
    }

    /// Run action on `service`
    pub fn run<C: Connect>(&self, service: &Service<'_, C>) -> anyhow::Result<()> {
        if self.requires_root() {
            anyhow::ensure!(Uid::effective().is_root(), "root privileges required");
        }
        let name = &service.descriptor().name;
        match self {
            Self::Install { multi, args } => service
                .install(*multi, args)
                .with_context(|| format!("Failed to install {name}")),
            Self::Remove => service
                .remove()
                .with_context(|| format!("Failed to remove {name}")),
            Self::Start { num, tags } => service
                .start(*num, tags)
                .with_context(|| format!("Failed to start {name}")),
            Self::Stop { targets } => service
                .stop(targets.all, &targets.tags)
                .with_context(|| format!("Failed to stop {name}")),
            Self::Restart { targets } => service
                .restart(targets.all, &targets.tags)
                .with_context(|| format!("Failed to restart {name}")),
            Self::Kill { targets } => service
                .kill(targets.all, &targets.tags)
                .with_context(|| format!("Failed to kill {name}")),
            Self::Reload { targets } => service
                .reload(targets.all, &targets.tags)
                .with_context(|| format!("Failed to reload {name}")),
            Self::Enable { tags } => service
                .enable(tags)
                .with_context(|| format!("Failed to enable {name}")),
            Self::Disable { tags } => service
                .disable(tags)
                .with_context(|| format!("Failed to disable {name}")),
            Self::Status => service
                .status(true)
                .map(|_| ())
                .with_context(|| format!("Failed to get {name} status")),
            Self::Unit {
                template,
                multi,
                args,
            } => {
                // Not through logging facility, this is the command output
                let unit = if *template {
                    service.render_unit(*multi, args)?
                } else {
                    service.read_unit(*multi)?
                };
                print!("{unit}");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory as _;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn parse_install() {
        let args = Args::try_parse_from([
            "sdunit", "--name", "foo", "install", "-m", "serve", "--port", "80",
        ])
        .unwrap();
        assert_eq!(args.service.name, "foo");
        let Command::Service(Action::Install { multi, args }) = args.command else {
            panic!("unexpected command");
        };
        assert!(multi);
        assert_eq!(args, vec!["serve", "--port", "80"]);
    }

    #[test]
    fn parse_aliases() {
        for (alias, expect_remove) in [("rm", true), ("uninstall", true), ("if", false)] {
            let args = Args::try_parse_from(["sdunit", alias]).unwrap();
            assert_eq!(
                matches!(args.command, Command::Service(Action::Remove)),
                expect_remove
            );
        }
        let args = Args::try_parse_from(["sdunit", "run", "-n", "3"]).unwrap();
        assert!(matches!(
            args.command,
            Command::Service(Action::Start { num: 3, .. })
        ));
    }

    #[test]
    fn parse_targets() {
        let args = Args::try_parse_from(["sdunit", "stop", "-a"]).unwrap();
        let Command::Service(Action::Stop { targets }) = args.command else {
            panic!("unexpected command");
        };
        assert!(targets.all);
        assert!(targets.tags.is_empty());

        let args = Args::try_parse_from(["sdunit", "kill", "a", "b"]).unwrap();
        let Command::Service(Action::Kill { targets }) = args.command else {
            panic!("unexpected command");
        };
        assert!(!targets.all);
        assert_eq!(targets.tags, vec!["a", "b"]);
    }

    #[test]
    fn root_requirement() {
        let status = Action::Status;
        assert!(!status.requires_root());
        let unit = Action::Unit {
            template: true,
            multi: false,
            args: vec![],
        };
        assert!(!unit.requires_root());
        assert!(Action::Remove.requires_root());
        assert!(Action::Enable { tags: vec![] }.requires_root());
    }

    #[test]
    fn default_app_id() {
        let args = Args::try_parse_from(["sdunit", "--name", "foo", "status"]).unwrap();
        let sd = args.service.descriptor();
        assert_eq!(sd.name, "foo");
        assert_eq!(sd.app_id, "org.sdunit.foo");
        assert_eq!(sd.version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn app_version_option() {
        let args =
            Args::try_parse_from(["sdunit", "--app-version", "9.8.7", "--app-id", "x.y", "status"])
                .unwrap();
        let sd = args.service.descriptor();
        assert_eq!(sd.version, "9.8.7");
        assert_eq!(sd.app_id, "x.y");
    }

    #[test]
    fn targets_documented() {
        let mut cmd = Args::command();
        for verb in ["stop", "restart", "kill", "reload"] {
            let sub = cmd.find_subcommand_mut(verb).unwrap();
            let all = sub.get_arguments().find(|a| a.get_id() == "all").unwrap();
            assert!(all.get_help().is_some(), "{verb} --all has no help");
        }
    }
}
