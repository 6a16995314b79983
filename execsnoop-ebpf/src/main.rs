#![no_std]
#![no_main]

mod probes;

use core::mem::offset_of;

use aya_ebpf::{
    macros::{map, tracepoint},
    maps::PerfEventArray,
    programs::TracePointContext,
};
use aya_log_ebpf::debug;
use execsnoop_common::{ExecEvent, ProbeConfig, probe};

use probes::{
    BpfKernel, BpfUser, PerfSink,
    syscall_types::{SysEnterExecve, SysEnterExecveat, SysExitExecve},
};

#[map]
static EVENTS: PerfEventArray<ExecEvent> = PerfEventArray::new(0);

/// Filled in by the loader before the object is loaded.
#[unsafe(no_mangle)]
static CONFIG: ProbeConfig = ProbeConfig::new();

fn load_config() -> ProbeConfig {
    unsafe { core::ptr::read_volatile(&CONFIG) }
}

fn read_arg(ctx: &TracePointContext, offset: usize) -> u64 {
    unsafe { ctx.read_at::<u64>(offset) }.unwrap_or(0)
}

fn handle_enter(ctx: &TracePointContext, filename_at: usize, argv_at: usize) -> u32 {
    let config = load_config();
    let filename = read_arg(ctx, filename_at);
    let argv = read_arg(ctx, argv_at);

    let kernel = BpfKernel::new(&config);
    let sink = PerfSink::new(&EVENTS, ctx);
    let outcome = probe::trace_exec_entry(&kernel, &BpfUser, &sink, &config, filename, argv);
    if outcome.truncated {
        debug!(ctx, "argv truncated after {} records", outcome.records);
    }
    0
}

fn handle_exit(ctx: &TracePointContext) -> u32 {
    let config = load_config();
    let ret = unsafe { ctx.read_at::<i64>(offset_of!(SysExitExecve, ret)) }.unwrap_or(0);

    let kernel = BpfKernel::new(&config);
    let sink = PerfSink::new(&EVENTS, ctx);
    probe::trace_exec_return(&kernel, &sink, &config, ret);
    0
}

/// Tracepoint for sys_enter_execve - emits one record per argument.
#[tracepoint]
pub fn sys_enter_execve(ctx: TracePointContext) -> u32 {
    handle_enter(
        &ctx,
        offset_of!(SysEnterExecve, filename),
        offset_of!(SysEnterExecve, argv),
    )
}

/// Tracepoint for sys_exit_execve - emits the summary record.
#[tracepoint]
pub fn sys_exit_execve(ctx: TracePointContext) -> u32 {
    handle_exit(&ctx)
}

#[tracepoint]
pub fn sys_enter_execveat(ctx: TracePointContext) -> u32 {
    handle_enter(
        &ctx,
        offset_of!(SysEnterExecveat, filename),
        offset_of!(SysEnterExecveat, argv),
    )
}

#[tracepoint]
pub fn sys_exit_execveat(ctx: TracePointContext) -> u32 {
    handle_exit(&ctx)
}

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    unsafe { core::hint::unreachable_unchecked() }
}

#[unsafe(link_section = "license")]
#[unsafe(no_mangle)]
static LICENSE: [u8; 13] = *b"Dual MIT/GPL\0";
