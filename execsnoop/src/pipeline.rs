//! Single consumer of the decoded record stream.

use anyhow::Result;
use log::debug;
use tokio::sync::mpsc;

use crate::{
    assembler::Assembler, event::Event, filter::Filter, output::Output, process, telemetry,
};

pub struct Pipeline<O: Output> {
    assembler: Assembler,
    filter: Filter,
    output: O,
    ppid_lookup: fn(u32) -> Option<u32>,
}

impl<O: Output> Pipeline<O> {
    pub fn new(assembler: Assembler, filter: Filter, output: O) -> Self {
        Self {
            assembler,
            filter,
            output,
            ppid_lookup: process::parent_pid,
        }
    }

    pub fn with_ppid_lookup(mut self, lookup: fn(u32) -> Option<u32>) -> Self {
        self.ppid_lookup = lookup;
        self
    }

    pub fn start(&mut self) -> Result<()> {
        self.output.header()?;
        self.output.flush()
    }

    pub fn handle(&mut self, event: Event) -> Result<()> {
        let Some(mut exec) = self.assembler.push(event) else {
            return Ok(());
        };
        if exec.ppid.is_none() {
            exec.ppid = (self.ppid_lookup)(exec.pid);
        }
        telemetry::record_exec(&exec);

        if !self.filter.matches(&exec) {
            debug!("Filtered exec of pid {} ({})", exec.pid, exec.comm);
            return Ok(());
        }
        self.output.exec(&exec)?;
        self.output.flush()
    }

    pub fn into_output(self) -> O {
        self.output
    }
}

/// Runs until every sender is gone.
pub async fn consume<O: Output>(
    mut rx: mpsc::Receiver<Event>,
    mut pipeline: Pipeline<O>,
) -> Result<()> {
    pipeline.start()?;
    while let Some(event) = rx.recv().await {
        pipeline.handle(event)?;
    }
    pipeline.output.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::{Arg, Return},
        output::{OutputOpts, TableOutput},
        settings::OutputSettings,
    };

    fn arg(pid: u32, argv: &str) -> Event {
        Event::Arg(Arg {
            pid,
            argv: argv.to_string(),
        })
    }

    fn ret(pid: u32, ppid: u32, ret_val: i32) -> Event {
        Event::Return(Return {
            pid,
            ppid,
            ancestor: false,
            comm: "ls".to_string(),
            tty: "pts/1".to_string(),
            uid: 1000,
            gid: 1000,
            ret_val,
        })
    }

    fn pipeline(settings: &OutputSettings) -> Pipeline<TableOutput<Vec<u8>>> {
        let opts = OutputOpts {
            numeric: true,
            ..Default::default()
        };
        Pipeline::new(
            Assembler::default(),
            Filter::from_settings(settings).unwrap(),
            TableOutput::new(Vec::new(), opts),
        )
        .with_ppid_lookup(|_| Some(1))
    }

    fn text(pipeline: Pipeline<TableOutput<Vec<u8>>>) -> String {
        String::from_utf8(pipeline.into_output().into_inner()).unwrap()
    }

    #[test]
    fn test_prints_completed_exec() {
        let mut p = pipeline(&OutputSettings::default());
        for event in [arg(9, "/bin/ls"), arg(9, "-la"), arg(9, "/tmp"), ret(9, 8, 0)] {
            p.handle(event).unwrap();
        }

        let out = text(p);
        assert_eq!(out.lines().count(), 1);
        assert!(out.contains(" 9 "));
        assert!(out.trim_end().ends_with("/bin/ls -la /tmp"));
    }

    #[test]
    fn test_failed_exec_hidden_by_default() {
        let mut p = pipeline(&OutputSettings::default());
        p.handle(arg(9, "/bin/missing")).unwrap();
        p.handle(ret(9, 8, -2)).unwrap();
        assert!(text(p).is_empty());

        let settings = OutputSettings {
            include_failed: Some(true),
            ..Default::default()
        };
        let mut p = pipeline(&settings);
        p.handle(arg(9, "/bin/missing")).unwrap();
        p.handle(ret(9, 8, -2)).unwrap();
        assert!(text(p).contains("-2"));
    }

    #[test]
    fn test_zero_ppid_falls_back_to_lookup() {
        let mut p = pipeline(&OutputSettings::default()).with_ppid_lookup(|pid| Some(pid + 100));
        p.handle(arg(5, "/bin/true")).unwrap();
        p.handle(ret(5, 0, 0)).unwrap();
        assert!(text(p).contains(" 105 "));

        let mut p = pipeline(&OutputSettings::default()).with_ppid_lookup(|_| None);
        p.handle(ret(5, 0, 0)).unwrap();
        assert!(text(p).contains(" ? "));
    }

    #[tokio::test]
    async fn test_consume_until_senders_drop() {
        let (tx, rx) = mpsc::channel(8);
        let task = tokio::spawn(consume(rx, pipeline(&OutputSettings::default())));

        tx.send(arg(3, "/usr/bin/id")).await.unwrap();
        tx.send(ret(3, 2, 0)).await.unwrap();
        drop(tx);

        assert!(task.await.unwrap().is_ok());
    }
}
