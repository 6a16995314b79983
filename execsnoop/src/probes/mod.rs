use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use aya::{Ebpf, maps::AsyncPerfEventArray, programs::TracePoint, util::online_cpus};
use bytes::BytesMut;
use execsnoop_common::ExecEvent;
use log::{debug, info, warn};
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
    event::{self, Event},
    telemetry,
};

pub mod exec;

static SHUTDOWN: once_cell::sync::Lazy<Arc<AtomicBool>> =
    once_cell::sync::Lazy::new(|| Arc::new(AtomicBool::new(false)));

pub fn shutdown_flag() -> Arc<AtomicBool> {
    SHUTDOWN.clone()
}

pub fn request_shutdown() {
    SHUTDOWN.store(true, Ordering::Relaxed);
}

pub trait Probe {
    fn attach(&self, bpf: &mut Ebpf) -> Result<()>;
}

pub struct TracepointConfig<'a> {
    pub program_name: &'a str,
    pub category: &'a str,
    pub name: &'a str,
}

/// Samples fetched from a perf buffer per wakeup.
const BUFFERS_PER_READ: usize = 16;

fn tracepoint_exists(category: &str, name: &str) -> bool {
    const TRACEFS_MOUNT_POINTS: [&str; 2] = ["/sys/kernel/tracing", "/sys/kernel/debug/tracing"];

    TRACEFS_MOUNT_POINTS.iter().any(|base| {
        Path::new(base)
            .join("events")
            .join(category)
            .join(name)
            .exists()
    })
}

pub fn attach_tracepoint(bpf: &mut Ebpf, config: &TracepointConfig) -> Result<bool> {
    if !tracepoint_exists(config.category, config.name) {
        warn!(
            "Tracepoint {}:{} not available; skipping {}",
            config.category, config.name, config.program_name
        );
        return Ok(false);
    }

    info!("Loading program {}", config.program_name);
    let program: &mut TracePoint = bpf
        .program_mut(config.program_name)
        .with_context(|| format!("Failed to find {} program", config.program_name))?
        .try_into()?;
    program.load()?;
    program
        .attach(config.category, config.name)
        .with_context(|| format!("Failed to attach {}", config.name))?;
    Ok(true)
}

/// One task per online CPU: drain its perf buffer, decode, forward.
///
/// Each task re-checks the shutdown flag at least every `poll`. Tasks end
/// when shutdown is requested or the receiver goes away.
pub fn spawn_perf_readers(
    bpf: &mut Ebpf,
    map_name: &str,
    page_count: usize,
    poll: Duration,
    tx: mpsc::Sender<Event>,
) -> Result<Vec<JoinHandle<()>>> {
    let mut perf_array = AsyncPerfEventArray::try_from(
        bpf.take_map(map_name)
            .with_context(|| format!("Failed to get {} map", map_name))?,
    )?;
    let cpus = online_cpus()
        .map_err(|(path, err)| anyhow!("Failed to read online CPUs from {}: {}", path, err))?;

    let mut readers = Vec::with_capacity(cpus.len());
    for cpu in cpus {
        let mut buf = perf_array
            .open(cpu, Some(page_count))
            .with_context(|| format!("Failed to open perf buffer for CPU {}", cpu))?;
        let tx = tx.clone();
        let shutdown = shutdown_flag();

        readers.push(tokio::spawn(async move {
            let mut buffers = (0..BUFFERS_PER_READ)
                .map(|_| BytesMut::with_capacity(std::mem::size_of::<ExecEvent>()))
                .collect::<Vec<_>>();

            while !shutdown.load(Ordering::Relaxed) {
                let read = tokio::time::timeout(poll, buf.read_events(&mut buffers));
                let events = match read.await {
                    Err(_) => continue,
                    Ok(Ok(events)) => events,
                    Ok(Err(e)) => {
                        warn!("Failed to read perf buffer on CPU {}: {}", cpu, e);
                        break;
                    }
                };

                if events.lost > 0 {
                    warn!("Lost {} exec records on CPU {}", events.lost, cpu);
                    telemetry::record_lost_events(cpu, events.lost);
                }

                for sample in buffers.iter().take(events.read) {
                    match event::decode(sample) {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                return;
                            }
                        }
                        Err(e) => debug!("Skipping record on CPU {}: {:#}", cpu, e),
                    }
                }
            }
        }));
    }
    Ok(readers)
}
