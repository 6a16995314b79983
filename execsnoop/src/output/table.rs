use std::io::Write;

use anyhow::Result;

use super::{NameResolver, Output, OutputOpts, format_command};
use crate::assembler::Exec;

const TIME_FORMAT: &str = "%H:%M:%S";

pub struct TableOutput<W: Write> {
    writer: W,
    opts: OutputOpts,
    names: NameResolver,
}

impl<W: Write> TableOutput<W> {
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

impl<W: Write> Output for TableOutput<W> {
    fn header(&mut self) -> Result<()> {
        if !self.opts.header {
            return Ok(());
        }
        if self.opts.timestamp {
            write!(self.writer, "{:<8} ", "TIME")?;
        }
        writeln!(
            self.writer,
            "{:<16} {:<6} {:<6} {:<6} {:<6} {:<6} {:<9} {:<6} ARGS",
            "PCOMM", "PID", "PPID", "UID", "GID", "RET", "ANCESTOR?", "TTY"
        )?;
        Ok(())
    }

    fn exec(&mut self, exec: &Exec) -> Result<()> {
        let user = self.names.user(exec.uid);
        let group = self.names.group(exec.gid);
        let ppid = exec
            .ppid
            .map(|ppid| ppid.to_string())
            .unwrap_or_else(|| "?".to_string());
        let tty = if exec.tty.is_empty() { "-" } else { exec.tty.as_str() };

        if self.opts.timestamp {
            write!(self.writer, "{:<8} ", exec.time.format(TIME_FORMAT))?;
        }
        writeln!(
            self.writer,
            "{:<16} {:<6} {:<6} {:<6} {:<6} {:<6} {:<9} {:<6} {}",
            exec.comm,
            exec.pid,
            ppid,
            user,
            group,
            exec.ret_val,
            exec.ancestor,
            tty,
            format_command(&exec.command, self.opts.quote)
        )?;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
