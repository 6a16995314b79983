use anyhow::{Result, bail};
use aya::Ebpf;
use log::{info, warn};

use crate::probes::{Probe, TracepointConfig, attach_tracepoint};
use crate::telemetry;

const EXECVE: [TracepointConfig<'static>; 2] = [
    TracepointConfig {
        program_name: "sys_enter_execve",
        category: "syscalls",
        name: "sys_enter_execve",
    },
    TracepointConfig {
        program_name: "sys_exit_execve",
        category: "syscalls",
        name: "sys_exit_execve",
    },
];

const EXECVEAT: [TracepointConfig<'static>; 2] = [
    TracepointConfig {
        program_name: "sys_enter_execveat",
        category: "syscalls",
        name: "sys_enter_execveat",
    },
    TracepointConfig {
        program_name: "sys_exit_execveat",
        category: "syscalls",
        name: "sys_exit_execveat",
    },
];

/// Entry and exit tracepoints of execve, and optionally execveat.
pub struct ExecProbe {
    pub execveat: bool,
}

impl ExecProbe {
    /// Attaches an entry/exit pair; both or neither are reported.
    fn attach_pair(bpf: &mut Ebpf, pair: &[TracepointConfig<'static>; 2]) -> Result<bool> {
        for tp in pair {
            if !attach_tracepoint(bpf, tp)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl Probe for ExecProbe {
    fn attach(&self, bpf: &mut Ebpf) -> Result<()> {
        if !Self::attach_pair(bpf, &EXECVE)? {
            bail!("execve tracepoints are not available; is tracefs mounted?");
        }
        let mut attached = EXECVE.len() as u64;

        if self.execveat {
            match Self::attach_pair(bpf, &EXECVEAT) {
                Ok(true) => attached += EXECVEAT.len() as u64,
                Ok(false) => {}
                Err(e) => warn!("Failed to attach execveat tracepoints: {:#}", e),
            }
        }

        info!("Exec probe attached ({} tracepoints)", attached);
        telemetry::record_active_probe("exec", attached);
        Ok(())
    }
}
