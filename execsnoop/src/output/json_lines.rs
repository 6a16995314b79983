use std::io::Write;

use anyhow::Result;
use serde::Serialize;

use super::{Group, NameResolver, Output, OutputOpts, User, format_command};
use crate::assembler::Exec;

/// One JSON object per line, no header.
pub struct JsonLinesOutput<W: Write> {
    writer: W,
    opts: OutputOpts,
    names: NameResolver,
}

impl<W: Write> JsonLinesOutput<W> {
    pub fn new(writer: W, opts: OutputOpts) -> Self {
        Self {
            writer,
            opts,
            names: NameResolver::new(opts.numeric),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[derive(Debug, Serialize)]
struct JsonLine<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    time: Option<String>,
    pid: u32,
    ppid: Option<u32>,
    ancestor: bool,
    comm: &'a str,
    tty: &'a str,
    uid: User,
    gid: Group,
    return_value: i32,
    args: String,
    truncated: bool,
}

impl<W: Write> Output for JsonLinesOutput<W> {
    fn header(&mut self) -> Result<()> {
        Ok(())
    }

    fn exec(&mut self, exec: &Exec) -> Result<()> {
        let line = JsonLine {
            time: self.opts.timestamp.then(|| exec.time.to_rfc3339()),
            pid: exec.pid,
            ppid: exec.ppid,
            ancestor: exec.ancestor,
            comm: &exec.comm,
            tty: &exec.tty,
            uid: self.names.user(exec.uid),
            gid: self.names.group(exec.gid),
            return_value: exec.ret_val,
            args: format_command(&exec.command, self.opts.quote),
            truncated: exec.command.truncated,
        };
        serde_json::to_writer(&mut self.writer, &line)?;
        writeln!(self.writer)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
