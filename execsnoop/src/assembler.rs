//! Reassembles command lines from the per-argument records.
//!
//! ARGUMENT records are buffered per pid until the RETURN record of the same
//! pid arrives. Records of different processes may interleave freely.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Local};
use execsnoop_common::MAX_ARGS;
use log::{debug, warn};

use crate::event::{Arg, Event, Return};

/// Pending command lines kept before the oldest one is dropped.
pub const DEFAULT_PENDING_CAPACITY: usize = 4096;

const WIRE_ELLIPSIS: &[u8] = execsnoop_common::ELLIPSIS;
/// The probe's ellipsis record as it decodes, terminator stripped.
const ELLIPSIS: &[u8] = WIRE_ELLIPSIS.split_at(WIRE_ELLIPSIS.len() - 1).0;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandLine {
    pub args: Vec<String>,
    /// The probe ran out of argument slots and sent `...` last.
    pub truncated: bool,
}

impl CommandLine {
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Plain space separated form, `-` when nothing was captured.
    pub fn joined(&self) -> String {
        if self.args.is_empty() {
            "-".to_string()
        } else {
            self.args.join(" ")
        }
    }
}

/// One completed exec: the summary record plus its command line.
#[derive(Debug, Clone)]
pub struct Exec {
    pub time: DateTime<Local>,
    pub pid: u32,
    /// `None` when neither the kernel nor procfs knew the parent.
    pub ppid: Option<u32>,
    pub ancestor: bool,
    pub comm: String,
    pub tty: String,
    pub uid: u32,
    pub gid: u32,
    pub ret_val: i32,
    pub command: CommandLine,
}

impl Exec {
    pub fn from_return(ret: Return, command: CommandLine) -> Self {
        Self {
            time: Local::now(),
            pid: ret.pid,
            ppid: if ret.ppid == 0 { None } else { Some(ret.ppid) },
            ancestor: ret.ancestor,
            comm: ret.comm,
            tty: ret.tty,
            uid: ret.uid,
            gid: ret.gid,
            ret_val: ret.ret_val,
            command,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.ret_val == 0
    }
}

#[derive(Debug)]
pub struct Assembler {
    pending: HashMap<u32, Vec<String>>,
    order: VecDeque<u32>,
    capacity: usize,
    arg_limit: usize,
}

impl Assembler {
    /// `arg_limit` is the per-exec record limit the probes were loaded with.
    pub fn new(capacity: usize, arg_limit: usize) -> Self {
        Self {
            pending: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            arg_limit: arg_limit.clamp(2, MAX_ARGS),
        }
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Feeds one record; yields an [`Exec`] when a RETURN closes a command.
    pub fn push(&mut self, event: Event) -> Option<Exec> {
        match event {
            Event::Arg(arg) => {
                self.push_arg(arg);
                None
            }
            Event::Return(ret) => Some(self.complete(ret)),
        }
    }

    fn push_arg(&mut self, arg: Arg) {
        if !self.pending.contains_key(&arg.pid) {
            if self.pending.len() >= self.capacity {
                self.evict_oldest();
            }
            self.order.push_back(arg.pid);
        }

        let args = self.pending.entry(arg.pid).or_default();
        if args.len() >= MAX_ARGS {
            debug!("Dropping argument for pid {}: too many records", arg.pid);
            return;
        }
        args.push(arg.argv);
    }

    fn evict_oldest(&mut self) {
        while let Some(pid) = self.order.pop_front() {
            if let Some(args) = self.pending.remove(&pid) {
                warn!(
                    "Dropping {} pending argument(s) of pid {}: no return record seen",
                    args.len(),
                    pid
                );
                return;
            }
        }
    }

    fn complete(&mut self, ret: Return) -> Exec {
        let args = self.pending.remove(&ret.pid).unwrap_or_default();
        if let Some(pos) = self.order.iter().position(|&pid| pid == ret.pid) {
            self.order.remove(pos);
        }

        let truncated =
            args.len() >= self.arg_limit && args.last().map(String::as_bytes) == Some(ELLIPSIS);
        Exec::from_return(ret, CommandLine { args, truncated })
    }
}

impl Default for Assembler {
    fn default() -> Self {
        Self::new(DEFAULT_PENDING_CAPACITY, MAX_ARGS)
    }
}
