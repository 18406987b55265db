//! Unit file generation and naming

use std::{
    fmt::{self, Write},
    path::{Path, PathBuf},
};

/// Tag used when a templated unit is addressed without an explicit instance
pub const DEFAULT_TAG: &str = "default";

const UNIT_DIR: &str = "/etc/systemd/system";
const WANTS_DIR_NAME: &str = "multi-user.target.wants";
const INSTALL_TARGET: &str = "multi-user.target";

/// Identity of the service this tool manages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Unit base name, without `.service` suffix
    pub name: String,
    /// Human readable description, written in the unit `Description=`
    pub description: String,
    /// Version of the managed application
    pub version: String,
    /// Application identifier
    pub app_id: String,
}

impl ServiceDescriptor {
    /// Build a new descriptor
    pub fn new(name: &str, description: &str, version: &str, app_id: &str) -> Self {
        Self {
            name: name.to_owned(),
            description: description.to_owned(),
            version: version.to_owned(),
            app_id: app_id.to_owned(),
        }
    }

    /// Bare unit name, ie. `name.service`
    pub fn unit_name(&self) -> String {
        format!("{}.service", self.name)
    }

    /// Templated instance unit name, ie. `name@tag.service`
    pub fn instance_name(&self, tag: &str) -> String {
        format!("{}@{tag}.service", self.name)
    }

    /// Unit file name, templated or not
    pub fn unit_file_name(&self, multi: bool) -> String {
        if multi {
            format!("{}@.service", self.name)
        } else {
            self.unit_name()
        }
    }

    /// Pattern matching all units derived from this service
    pub(crate) fn unit_pattern(&self) -> String {
        format!("{}*", self.name)
    }
}

/// Directories where unit files and enable symlinks live
#[derive(Debug, Clone)]
pub struct UnitPaths {
    unit_dir: PathBuf,
    wants_dir: PathBuf,
}

impl Default for UnitPaths {
    fn default() -> Self {
        Self::under(UNIT_DIR)
    }
}

impl UnitPaths {
    /// Use `root` as the system unit directory
    pub fn under<P: AsRef<Path>>(root: P) -> Self {
        let unit_dir = root.as_ref().to_path_buf();
        let wants_dir = unit_dir.join(WANTS_DIR_NAME);
        Self {
            unit_dir,
            wants_dir,
        }
    }

    /// Path of the installed unit file
    pub fn unit_file(&self, service: &ServiceDescriptor, multi: bool) -> PathBuf {
        self.unit_dir.join(service.unit_file_name(multi))
    }

    /// Directory holding enable symlinks
    pub fn wants_dir(&self) -> &Path {
        &self.wants_dir
    }

    /// Path of the enable symlink for a given unit name
    pub fn wants_link(&self, unit_name: &str) -> PathBuf {
        self.wants_dir.join(unit_name)
    }
}

/// Unit text that can not be generated
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RenderError {
    /// Unit files are line based, and systemd rejects most control characters
    #[error("Control character {ch:?} in {field}")]
    ControlCharacter {
        /// Which input carries the character
        field: &'static str,
        /// Offending character
        ch: char,
    },
    /// A trailing backslash would continue the setting on the next line
    #[error("Trailing backslash in {0}")]
    TrailingBackslash(&'static str),
    /// Formatter failure
    #[error(transparent)]
    Format(#[from] fmt::Error),
}

fn check_text(field: &'static str, text: &str) -> Result<(), RenderError> {
    match text.chars().find(|c| c.is_control()) {
        Some(ch) => Err(RenderError::ControlCharacter { field, ch }),
        None => Ok(()),
    }
}

/// Escape systemd specifiers and variable expansion, and quote for the `ExecStart=` command
/// line
fn exec_word(field: &'static str, word: &str) -> Result<String, RenderError> {
    check_text(field, word)?;
    let escaped = word.replace('%', "%%").replace('$', "$$");
    let needs_quotes = escaped.is_empty()
        || escaped == ";"
        || escaped
            .chars()
            .any(|c| c.is_whitespace() || matches!(c, '"' | '\'' | '\\'));
    if !needs_quotes {
        return Ok(escaped);
    }
    let mut quoted = String::with_capacity(escaped.len() + 2);
    quoted.push('"');
    for c in escaped.chars() {
        if matches!(c, '"' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    Ok(quoted)
}

fn write_unit<W: Write>(
    w: &mut W,
    multi: bool,
    name: &str,
    description: &str,
    exec_start: &str,
) -> fmt::Result {
    writeln!(
        w,
        "# This file has been autogenerated by {} v{} for {name}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
    )?;
    writeln!(w, "[Unit]")?;
    if multi {
        writeln!(w, "Description={description} (%i)")?;
    } else {
        writeln!(w, "Description={description}")?;
    }
    writeln!(w, "After=network.target")?;
    writeln!(w)?;
    writeln!(w, "[Service]")?;
    writeln!(w, "Type=simple")?;
    writeln!(w, "ExecStart={exec_start}")?;
    writeln!(w, "Restart=on-failure")?;
    writeln!(w, "RestartSec=5")?;
    writeln!(w)?;
    writeln!(w, "[Install]")?;
    writeln!(w, "WantedBy={INSTALL_TARGET}")
}

/// Render unit file content.
///
/// With `multi`, the result is a template unit to be installed as `name@.service`, and
/// the instance name is passed to the executable as `--instance %i`.
///
/// Inputs containing control characters are rejected, since they could inject settings.
pub fn render<S: AsRef<str>>(
    multi: bool,
    name: &str,
    description: &str,
    exec_path: &str,
    args: &[S],
) -> Result<String, RenderError> {
    check_text("name", name)?;
    check_text("description", description)?;
    if description.ends_with('\\') {
        return Err(RenderError::TrailingBackslash("description"));
    }
    let description = description.replace('%', "%%");

    let mut exec_start = exec_word("executable path", exec_path)?;
    for arg in args {
        exec_start.push(' ');
        exec_start.push_str(&exec_word("argument", arg.as_ref())?);
    }
    if multi {
        exec_start.push_str(" --instance %i");
    }

    let mut unit = String::new();
    write_unit(&mut unit, multi, name, &description, &exec_start)?;
    Ok(unit)
}
