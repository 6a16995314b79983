//! aya-ebpf implementations of the probe core traits.

pub mod syscall_types;

use aya_ebpf::{
    EbpfContext,
    helpers::{
        bpf_get_current_comm, bpf_get_current_pid_tgid, bpf_get_current_task,
        bpf_get_current_uid_gid, bpf_probe_read_kernel, bpf_probe_read_kernel_str_bytes,
        bpf_probe_read_user, bpf_probe_read_user_str_bytes,
    },
    maps::PerfEventArray,
};
use execsnoop_common::{
    ExecEvent, ProbeConfig, TASK_COMM_LEN,
    probe::{EventSink, TaskAccess, UserMemory},
};

fn read_field<T: Copy>(base: *const u8, offset: u32) -> Option<T> {
    if base.is_null() {
        return None;
    }
    let ptr = unsafe { base.add(offset as usize) as *const T };
    unsafe { bpf_probe_read_kernel(ptr).ok() }
}

fn read_ptr(base: *const u8, offset: u32) -> Option<*const u8> {
    let addr: u64 = read_field(base, offset)?;
    if addr == 0 {
        None
    } else {
        Some(addr as *const u8)
    }
}

/// Kernel task reads through the offsets resolved by the loader.
pub struct BpfKernel<'a> {
    config: &'a ProbeConfig,
}

impl<'a> BpfKernel<'a> {
    pub fn new(config: &'a ProbeConfig) -> Self {
        Self { config }
    }
}

impl TaskAccess for BpfKernel<'_> {
    type Task = *const u8;

    fn current_pid(&self) -> u32 {
        (bpf_get_current_pid_tgid() >> 32) as u32
    }

    fn current_task(&self) -> Option<*const u8> {
        // Without offsets every dereference would be garbage.
        if !self.config.has_offsets() {
            return None;
        }
        let task = unsafe { bpf_get_current_task() } as *const u8;
        if task.is_null() { None } else { Some(task) }
    }

    fn current_comm(&self) -> [u8; TASK_COMM_LEN] {
        bpf_get_current_comm().unwrap_or([0; TASK_COMM_LEN])
    }

    fn current_uid_gid(&self) -> (u32, u32) {
        let uid_gid = bpf_get_current_uid_gid();
        (uid_gid as u32, (uid_gid >> 32) as u32)
    }

    fn real_parent(&self, task: *const u8) -> Option<*const u8> {
        read_ptr(task, self.config.offsets.real_parent)
    }

    fn tgid(&self, task: *const u8) -> Option<u32> {
        read_field::<i32>(task, self.config.offsets.tgid).map(|tgid| tgid as u32)
    }

    fn comm(&self, task: *const u8) -> Option<[u8; TASK_COMM_LEN]> {
        read_field(task, self.config.offsets.comm)
    }

    fn tty_name(&self, task: *const u8, buf: &mut [u8]) -> Option<usize> {
        let offsets = &self.config.offsets;
        let signal = read_ptr(task, offsets.signal)?;
        let tty = read_ptr(signal, offsets.signal_tty)?;
        let name = unsafe { tty.add(offsets.tty_name as usize) };
        unsafe { bpf_probe_read_kernel_str_bytes(name, buf) }
            .ok()
            .map(|name| name.len())
    }
}

/// Reads from the address space of the task calling exec.
pub struct BpfUser;

impl UserMemory for BpfUser {
    fn read_ptr(&self, addr: u64) -> Option<u64> {
        if addr == 0 {
            return None;
        }
        unsafe { bpf_probe_read_user(addr as *const u64) }.ok()
    }

    fn read_str(&self, addr: u64, buf: &mut [u8]) -> Option<usize> {
        if addr == 0 {
            return None;
        }
        unsafe { bpf_probe_read_user_str_bytes(addr as *const u8, buf) }
            .ok()
            .map(|s| s.len())
    }
}

/// Pushes records into the per-CPU perf buffer of the calling context.
pub struct PerfSink<'a, C: EbpfContext> {
    events: &'a PerfEventArray<ExecEvent>,
    ctx: &'a C,
}

impl<'a, C: EbpfContext> PerfSink<'a, C> {
    pub fn new(events: &'a PerfEventArray<ExecEvent>, ctx: &'a C) -> Self {
        Self { events, ctx }
    }
}

impl<C: EbpfContext> EventSink for PerfSink<'_, C> {
    fn submit(&self, event: &ExecEvent) {
        // A full buffer drops the record; the listener sees it as lost.
        self.events.output(self.ctx, event, 0);
    }
}
