//! Install and control systemd services

use anyhow::Context as _;
use clap::Parser as _;

use sdunit::{cl, systemd};

fn main() -> anyhow::Result<()> {
    // Init logger
    simple_logger::SimpleLogger::new()
        .with_level(if cfg!(debug_assertions) {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .env()
        .init()
        .context("Failed to setup logger")?;

    // Parse cl args
    let args = cl::Args::parse();

    // Handle CL args
    match args.command {
        cl::Command::Service(action) => {
            let mut service = systemd::Service::new(args.service.descriptor());
            if let Some(exec) = args.service.exec {
                service = service.with_exec_path(exec);
            }
            log::debug!("{:?} {action:?}", service.descriptor());
            action.run(&service)?;
        }
        #[cfg(feature = "generate-extra")]
        cl::Command::GenManPages { dir } => {
            use clap::CommandFactory as _;

            // Use the binary name instead of the default of the package name
            let cmd = cl::Args::command().name(env!("CARGO_BIN_NAME"));
            clap_mangen::generate_to(cmd, &dir)?;
        }
        #[cfg(feature = "generate-extra")]
        cl::Command::GenShellComplete { shell, dir } => {
            use clap::{CommandFactory as _, ValueEnum as _};
            use clap_complete::{Shell, generate, generate_to};

            // Use the binary name instead of the default of the package name
            let name = env!("CARGO_BIN_NAME");
            let mut cmd = cl::Args::command().name(name);

            if let Some(shell) = shell {
                if let Some(dir) = dir {
                    generate_to(shell, &mut cmd, name, dir)?;
                } else {
                    generate(shell, &mut cmd, name, &mut std::io::stdout());
                }
            } else if let Some(dir) = dir {
                let shells = Shell::value_variants();
                for shell_i in shells {
                    generate_to(*shell_i, &mut cmd, name, &dir)?;
                }
            }
        }
    }

    Ok(())
}
