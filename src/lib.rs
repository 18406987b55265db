//! Install and control systemd services of an application, by generating unit files
//! and talking to the systemd manager over D-Bus.
//!
//! Applications can embed the command line verbs with [`cl::Action`], and run them
//! with [`cl::Action::run`].

pub mod cl;
pub mod systemd;
