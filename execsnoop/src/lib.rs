pub mod assembler;
pub mod event;
pub mod filter;
pub mod offsets;
pub mod output;
pub mod pipeline;
pub mod probes;
pub mod process;
pub mod settings;
pub mod telemetry;

use std::time::Duration;

use anyhow::{Context, Result, bail};
use aya::{Ebpf, EbpfLoader};
use aya_log::EbpfLogger;
use log::{info, warn};
use tokio::{signal, sync::mpsc};

use crate::{
    assembler::{Assembler, DEFAULT_PENDING_CAPACITY},
    filter::Filter,
    pipeline::Pipeline,
    probes::{Probe, exec::ExecProbe},
    settings::Settings,
};

/// Name of the load-time config global in the BPF object.
const CONFIG_GLOBAL: &str = "CONFIG";
const EVENTS_MAP: &str = "EVENTS";
const EVENT_CHANNEL_CAPACITY: usize = 8192;

pub struct ExecSnoopEngine {
    pub settings: Settings,
    bpf: Ebpf,
}

impl ExecSnoopEngine {
    pub fn new(settings: Settings, bytecode: &[u8]) -> Result<Self> {
        if bytecode.is_empty() {
            bail!("Embedded eBPF object is empty; rebuild with a nightly toolchain and bpf-linker");
        }
        bump_memlock_rlimit()?;

        let offsets = offsets::resolve(&settings.offsets);
        let config = settings.to_probe_config(offsets);
        info!(
            "Watching for ancestor {:?} ({:?} match, depth {}), up to {} argument records",
            settings.ancestor_name(),
            settings.probe.ancestor_match.unwrap_or_default(),
            config.max_ancestors,
            config.max_args
        );

        let mut bpf = EbpfLoader::new()
            .set_global(CONFIG_GLOBAL, &config, true)
            .load(bytecode)
            .context("Failed to load eBPF object")?;
        if let Err(e) = EbpfLogger::init(&mut bpf) {
            warn!("Failed to initialize eBPF logger: {}", e);
        }
        Ok(Self { settings, bpf })
    }

    /// Traces until Ctrl-C, `wait` elapsing, or the output failing.
    pub async fn run(mut self, wait: Option<Duration>) -> Result<()> {
        ExecProbe {
            execveat: self.settings.probe.execveat.unwrap_or(false),
        }
        .attach(&mut self.bpf)?;

        let output_settings = &self.settings.output;
        let pipeline = Pipeline::new(
            Assembler::new(DEFAULT_PENDING_CAPACITY, self.settings.max_args() as usize),
            Filter::from_settings(output_settings)?,
            output::from_settings(output_settings, std::io::stdout()),
        );

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let readers = probes::spawn_perf_readers(
            &mut self.bpf,
            EVENTS_MAP,
            self.settings.perf_pages(),
            self.settings.poll_interval(),
            tx,
        )?;
        let mut consumer = tokio::spawn(pipeline::consume(rx, pipeline));

        info!("Monitoring active. Press Ctrl-C to exit.");
        let result = tokio::select! {
            stopped = wait_for_stop(wait) => stopped,
            finished = &mut consumer => {
                probes::request_shutdown();
                return finished.context("Output task panicked")?;
            }
        };
        info!("Exiting...");

        probes::request_shutdown();
        for reader in readers {
            let _ = reader.await;
        }
        if let Err(e) = consumer.await.context("Output task panicked")? {
            warn!("Output stopped with an error: {:#}", e);
        }
        result
    }
}

async fn wait_for_stop(wait: Option<Duration>) -> Result<()> {
    match wait {
        Some(wait) => {
            tokio::select! {
                res = signal::ctrl_c() => res?,
                _ = tokio::time::sleep(wait) => info!("Wait time of {:?} elapsed", wait),
            }
        }
        None => signal::ctrl_c().await?,
    }
    Ok(())
}

fn bump_memlock_rlimit() -> Result<()> {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        warn!("Failed to increase rlimit");
    }
    Ok(())
}
