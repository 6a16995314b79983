//! Presentation of completed execs.

use std::{collections::HashMap, fmt, io::Write};

use anyhow::Result;
use log::debug;
use nix::unistd::{self, Gid, Uid};
use serde::Serialize;

pub use json_lines::JsonLinesOutput;
pub use table::TableOutput;

use crate::{
    assembler::{CommandLine, Exec},
    settings::{OutputFormat, OutputSettings},
};

mod json_lines;
mod table;

pub trait Output {
    fn header(&mut self) -> Result<()>;
    fn exec(&mut self, exec: &Exec) -> Result<()>;
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<O: Output + ?Sized> Output for Box<O> {
    fn header(&mut self) -> Result<()> {
        (**self).header()
    }

    fn exec(&mut self, exec: &Exec) -> Result<()> {
        (**self).exec(exec)
    }

    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OutputOpts {
    pub numeric: bool,
    pub timestamp: bool,
    pub quote: bool,
    pub header: bool,
}

impl OutputOpts {
    pub fn from_settings(settings: &OutputSettings) -> Self {
        Self {
            numeric: settings.numeric.unwrap_or(false),
            timestamp: settings.timestamp.unwrap_or(false),
            quote: settings.quote.unwrap_or(false),
            header: !settings.no_header.unwrap_or(false),
        }
    }
}

pub fn from_settings<W>(settings: &OutputSettings, writer: W) -> Box<dyn Output + Send>
where
    W: Write + Send + 'static,
{
    let opts = OutputOpts::from_settings(settings);
    match settings.format.unwrap_or_default() {
        OutputFormat::Table => Box::new(TableOutput::new(writer, opts)),
        OutputFormat::Json => Box::new(JsonLinesOutput::new(writer, opts)),
    }
}

fn escape_arg(arg: &str, quote: bool) -> String {
    let arg = arg.replace('\n', "\\n");
    if quote {
        format!("\"{}\"", arg.replace('"', "\\\""))
    } else {
        arg
    }
}

/// Command line as printed: newlines escaped, optionally quoted per argument.
pub fn format_command(command: &CommandLine, quote: bool) -> String {
    if command.is_empty() {
        return "-".to_string();
    }
    command
        .args
        .iter()
        .map(|arg| escape_arg(arg, quote))
        .collect::<Vec<_>>()
        .join(" ")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum User {
    Name(String),
    Id(u32),
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            User::Name(name) => f.pad(name),
            User::Id(id) => f.pad(&id.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Group {
    Name(String),
    Id(u32),
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Group::Name(name) => f.pad(name),
            Group::Id(id) => f.pad(&id.to_string()),
        }
    }
}

fn user_name(uid: u32) -> Option<String> {
    match unistd::User::from_uid(Uid::from_raw(uid)) {
        Ok(user) => user.map(|u| u.name),
        Err(e) => {
            debug!("Failed to look up uid {}: {}", uid, e);
            None
        }
    }
}

fn group_name(gid: u32) -> Option<String> {
    match unistd::Group::from_gid(Gid::from_raw(gid)) {
        Ok(group) => group.map(|g| g.name),
        Err(e) => {
            debug!("Failed to look up gid {}: {}", gid, e);
            None
        }
    }
}

/// uid/gid to name lookups, cached for the lifetime of the output.
#[derive(Debug, Default)]
pub struct NameResolver {
    numeric: bool,
    users: HashMap<u32, User>,
    groups: HashMap<u32, Group>,
}

impl NameResolver {
    pub fn new(numeric: bool) -> Self {
        Self {
            numeric,
            ..Default::default()
        }
    }

    pub fn user(&mut self, uid: u32) -> User {
        if self.numeric {
            return User::Id(uid);
        }
        self.users
            .entry(uid)
            .or_insert_with(|| user_name(uid).map(User::Name).unwrap_or(User::Id(uid)))
            .clone()
    }

    pub fn group(&mut self, gid: u32) -> Group {
        if self.numeric {
            return Group::Id(gid);
        }
        self.groups
            .entry(gid)
            .or_insert_with(|| group_name(gid).map(Group::Name).unwrap_or(Group::Id(gid)))
            .clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::assembler::Exec;
    use chrono::{Local, TimeZone};

    pub(crate) fn sample_exec(args: &[&str]) -> Exec {
        Exec {
            time: Local.with_ymd_and_hms(2024, 5, 1, 12, 30, 45).unwrap(),
            pid: 4242,
            ppid: Some(4200),
            ancestor: true,
            comm: "ls".to_string(),
            tty: "pts/0".to_string(),
            uid: 0,
            gid: 0,
            ret_val: 0,
            command: CommandLine {
                args: args.iter().map(|a| a.to_string()).collect(),
                truncated: false,
            },
        }
    }

    #[test]
    fn test_format_command_plain() {
        let command = sample_exec(&["/bin/echo", "a b", "c"]).command;
        assert_eq!(format_command(&command, false), "/bin/echo a b c");
    }

    #[test]
    fn test_format_command_quoted() {
        let command = sample_exec(&["/bin/echo", "say \"hi\""]).command;
        assert_eq!(
            format_command(&command, true),
            "\"/bin/echo\" \"say \\\"hi\\\"\""
        );
    }

    #[test]
    fn test_format_command_escapes_newlines() {
        let command = sample_exec(&["/bin/printf", "a\nb"]).command;
        assert_eq!(format_command(&command, false), "/bin/printf a\\nb");
    }

    #[test]
    fn test_format_empty_command() {
        let command = CommandLine::default();
        assert_eq!(format_command(&command, true), "-");
    }

    #[test]
    fn test_numeric_names() {
        let mut names = NameResolver::new(true);
        assert_eq!(names.user(0), User::Id(0));
        assert_eq!(names.group(0), Group::Id(0));
    }

    #[test]
    fn test_root_is_resolved_by_name() {
        let mut names = NameResolver::new(false);
        assert_eq!(names.user(0), User::Name("root".to_string()));
        assert_eq!(names.group(0), Group::Name("root".to_string()));
        // Served from the cache the second time.
        assert_eq!(names.users.len(), 1);
        assert_eq!(names.user(0), User::Name("root".to_string()));
        assert_eq!(names.users.len(), 1);
    }

    #[test]
    fn test_unknown_ids_stay_numeric() {
        let mut names = NameResolver::new(false);
        assert_eq!(names.user(3_999_999_999), User::Id(3_999_999_999));
        assert_eq!(names.group(3_999_999_999), Group::Id(3_999_999_999));
    }

    #[test]
    fn test_display_pads() {
        assert_eq!(format!("{:<6}|", User::Name("root".into())), "root  |");
        assert_eq!(format!("{:<6}|", Group::Id(42)), "42    |");
    }

    #[test]
    fn test_untagged_serialization() {
        assert_eq!(serde_json::to_string(&User::Name("root".into())).unwrap(), "\"root\"");
        assert_eq!(serde_json::to_string(&Group::Id(7)).unwrap(), "7");
    }
}
