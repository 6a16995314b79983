use std::{path::Path, time::Duration};

use config::{Config, ConfigError, Environment, File};
use execsnoop_common::{
    AncestorMatch, DEFAULT_ANCESTOR_NAME, MAX_ANCESTOR_NAME_LEN, MAX_ANCESTORS, MAX_ARGS,
    ProbeConfig, TaskOffsets,
};
use log::warn;
use serde::Deserialize;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/execsnoop/execsnoop.yaml";

/// Per-CPU perf buffer size in pages (must be a power of two).
pub const DEFAULT_PERF_PAGES: usize = 64;

/// How long a perf reader waits for records before re-checking for shutdown.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum AncestorMode {
    #[default]
    Prefix,
    Exact,
}

impl From<AncestorMode> for AncestorMatch {
    fn from(mode: AncestorMode) -> Self {
        match mode {
            AncestorMode::Prefix => AncestorMatch::Prefix,
            AncestorMode::Exact => AncestorMatch::Exact,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Kernel-side probe configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ProbeSettings {
    pub max_args: Option<u32>,
    pub max_ancestors: Option<u32>,
    pub ancestor_name: Option<String>,
    pub ancestor_match: Option<AncestorMode>,
    pub execveat: Option<bool>,
    pub perf_pages: Option<usize>,
    pub poll_interval_ms: Option<u64>,
}

/// Listener-side presentation and filtering
#[derive(Debug, Deserialize, Clone, Default)]
pub struct OutputSettings {
    pub format: Option<OutputFormat>,
    pub numeric: Option<bool>,
    pub only_ancestor: Option<bool>,
    pub include_failed: Option<bool>,
    pub timestamp: Option<bool>,
    pub quote: Option<bool>,
    pub no_header: Option<bool>,
    pub name_filter: Option<String>,
    pub line_filter: Option<String>,
}

/// Where to find `task_struct` member offsets. Explicit values win over BTF.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct OffsetSettings {
    pub btf_path: Option<String>,
    pub real_parent: Option<u32>,
    pub tgid: Option<u32>,
    pub comm: Option<u32>,
    pub signal: Option<u32>,
    pub signal_tty: Option<u32>,
    pub tty_name: Option<u32>,
}

impl OffsetSettings {
    /// All six offsets, when every one of them is configured.
    pub fn explicit(&self) -> Option<TaskOffsets> {
        Some(TaskOffsets {
            real_parent: self.real_parent?,
            tgid: self.tgid?,
            comm: self.comm?,
            signal: self.signal?,
            signal_tty: self.signal_tty?,
            tty_name: self.tty_name?,
        })
    }

    pub fn overlay(&self, base: TaskOffsets) -> TaskOffsets {
        TaskOffsets {
            real_parent: self.real_parent.unwrap_or(base.real_parent),
            tgid: self.tgid.unwrap_or(base.tgid),
            comm: self.comm.unwrap_or(base.comm),
            signal: self.signal.unwrap_or(base.signal),
            signal_tty: self.signal_tty.unwrap_or(base.signal_tty),
            tty_name: self.tty_name.unwrap_or(base.tty_name),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub probe: ProbeSettings,
    #[serde(default)]
    pub output: OutputSettings,
    #[serde(default)]
    pub offsets: OffsetSettings,
}

impl Settings {
    /// Reads the optional YAML file, then `SECTION__KEY` environment variables.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let s = Config::builder()
            .add_source(File::from(path).required(false))
            .add_source(Environment::default().separator("__").try_parsing(true))
            .build()?;

        let settings: Self = s.try_deserialize()?;
        log::debug!("Parsed settings: {:?}", settings);
        Ok(settings)
    }

    pub fn ancestor_name(&self) -> &str {
        self.probe
            .ancestor_name
            .as_deref()
            .unwrap_or(DEFAULT_ANCESTOR_NAME)
    }

    pub fn perf_pages(&self) -> usize {
        let pages = self.probe.perf_pages.unwrap_or(DEFAULT_PERF_PAGES).max(1);
        pages.next_power_of_two()
    }

    pub fn poll_interval(&self) -> Duration {
        let ms = self
            .probe
            .poll_interval_ms
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS)
            .max(1);
        Duration::from_millis(ms)
    }

    /// Effective per-exec record limit, as the probes will apply it.
    pub fn max_args(&self) -> u32 {
        self.probe
            .max_args
            .unwrap_or(MAX_ARGS as u32)
            .clamp(2, MAX_ARGS as u32)
    }

    /// Builds the constants written into the BPF object before load.
    pub fn to_probe_config(&self, offsets: Option<TaskOffsets>) -> ProbeConfig {
        let mode = self.probe.ancestor_match.unwrap_or_default();
        let name = self.ancestor_name();
        if name.len() > MAX_ANCESTOR_NAME_LEN {
            warn!(
                "Ancestor name {:?} is longer than the kernel keeps; matching on {:?}",
                name,
                String::from_utf8_lossy(&name.as_bytes()[..MAX_ANCESTOR_NAME_LEN])
            );
        }
        let mut config = ProbeConfig::new().with_ancestor(name.as_bytes(), mode.into());
        config.max_args = self.max_args();
        config.max_ancestors = self
            .probe
            .max_ancestors
            .unwrap_or(MAX_ANCESTORS as u32)
            .min(MAX_ANCESTORS as u32);
        match offsets {
            Some(offsets) => config.with_offsets(offsets),
            None => config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ENV_KEYS: [&str; 5] = [
        "PROBE__MAX_ARGS",
        "PROBE__ANCESTOR_NAME",
        "PROBE__ANCESTOR_MATCH",
        "OUTPUT__FORMAT",
        "OUTPUT__INCLUDE_FAILED",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            unsafe { std::env::remove_var(key) };
        }
    }

    #[test]
    #[serial]
    fn test_load_settings_from_env() {
        clear_env();
        unsafe {
            std::env::set_var("PROBE__MAX_ARGS", "8");
            std::env::set_var("PROBE__ANCESTOR_NAME", "login");
            std::env::set_var("PROBE__ANCESTOR_MATCH", "exact");
            std::env::set_var("OUTPUT__FORMAT", "json");
            std::env::set_var("OUTPUT__INCLUDE_FAILED", "true");
        }

        let settings = Settings::load(Path::new("/nonexistent/execsnoop.yaml"))
            .expect("Failed to load settings");

        assert_eq!(settings.probe.max_args, Some(8));
        assert_eq!(settings.ancestor_name(), "login");
        assert_eq!(settings.probe.ancestor_match, Some(AncestorMode::Exact));
        assert_eq!(settings.output.format, Some(OutputFormat::Json));
        assert_eq!(settings.output.include_failed, Some(true));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_load_settings_from_yaml_file() {
        clear_env();
        let path = std::env::temp_dir()
            .join(format!("execsnoop-settings-{}.yaml", std::process::id()));
        std::fs::write(
            &path,
            "probe:\n  max_ancestors: 4\n  execveat: true\noutput:\n  quote: true\n  name_filter: \"^ba\"\noffsets:\n  tgid: 2400\n",
        )
        .unwrap();

        let settings = Settings::load(&path).expect("Failed to load settings");
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.probe.max_ancestors, Some(4));
        assert_eq!(settings.probe.execveat, Some(true));
        assert_eq!(settings.output.quote, Some(true));
        assert_eq!(settings.output.name_filter.as_deref(), Some("^ba"));
        assert_eq!(settings.offsets.tgid, Some(2400));
        assert!(settings.offsets.explicit().is_none());
    }

    #[test]
    #[serial]
    fn test_sample_settings_file_parses() {
        clear_env();
        let path = Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/../execsnoop.yaml"));

        let settings = Settings::load(path).expect("Failed to load sample settings");

        assert_eq!(settings.max_args(), MAX_ARGS as u32);
        assert_eq!(settings.ancestor_name(), DEFAULT_ANCESTOR_NAME);
        assert_eq!(settings.probe.ancestor_match, Some(AncestorMode::Prefix));
        assert_eq!(settings.output.format, Some(OutputFormat::Table));
        assert_eq!(settings.perf_pages(), DEFAULT_PERF_PAGES);
        assert_eq!(
            settings.poll_interval(),
            Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
        );
        assert!(settings.offsets.explicit().is_none());
    }

    #[test]
    fn test_to_probe_config_defaults() {
        let config = Settings::default().to_probe_config(None);

        assert_eq!(config.max_args, MAX_ARGS as u32);
        assert_eq!(config.max_ancestors, MAX_ANCESTORS as u32);
        assert_eq!(config.ancestor_name_len, 4);
        assert_eq!(&config.ancestor_name[..4], b"sshd");
        assert_eq!(config.ancestor_match, AncestorMatch::Prefix as u32);
        assert!(!config.has_offsets());
    }

    #[test]
    fn test_to_probe_config_clamps_and_carries_offsets() {
        let settings = Settings {
            probe: ProbeSettings {
                max_args: Some(1000),
                max_ancestors: Some(1000),
                ancestor_match: Some(AncestorMode::Exact),
                ..Default::default()
            },
            ..Default::default()
        };
        let offsets = TaskOffsets {
            real_parent: 2456,
            tgid: 2468,
            comm: 3000,
            signal: 3100,
            signal_tty: 408,
            tty_name: 368,
        };

        let config = settings.to_probe_config(Some(offsets));

        assert_eq!(config.max_args, MAX_ARGS as u32);
        assert_eq!(config.max_ancestors, MAX_ANCESTORS as u32);
        assert_eq!(config.ancestor_match, AncestorMatch::Exact as u32);
        assert!(config.has_offsets());
        assert_eq!(config.offsets, offsets);
    }

    #[test]
    fn test_offset_overlay() {
        let partial = OffsetSettings {
            tgid: Some(7),
            tty_name: Some(9),
            ..Default::default()
        };
        let base = TaskOffsets {
            real_parent: 1,
            tgid: 2,
            comm: 3,
            signal: 4,
            signal_tty: 5,
            tty_name: 6,
        };

        let merged = partial.overlay(base);
        assert_eq!(merged.tgid, 7);
        assert_eq!(merged.tty_name, 9);
        assert_eq!(merged.real_parent, 1);
        assert!(partial.explicit().is_none());
    }

    #[test]
    fn test_perf_pages_power_of_two() {
        let mut settings = Settings::default();
        assert_eq!(settings.perf_pages(), DEFAULT_PERF_PAGES);
        settings.probe.perf_pages = Some(0);
        assert_eq!(settings.perf_pages(), 1);
        settings.probe.perf_pages = Some(100);
        assert_eq!(settings.perf_pages(), 128);
    }

    #[test]
    fn test_poll_interval() {
        let mut settings = Settings::default();
        assert_eq!(
            settings.poll_interval(),
            Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
        );
        settings.probe.poll_interval_ms = Some(250);
        assert_eq!(settings.poll_interval(), Duration::from_millis(250));
        settings.probe.poll_interval_ms = Some(0);
        assert_eq!(settings.poll_interval(), Duration::from_millis(1));
    }
}
