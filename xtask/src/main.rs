use std::path::{Path, PathBuf};
use std::process::Command;
use std::{env, fs};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

const BINARY: &str = "execsnoop";
const SAMPLE_CONFIG: &str = "execsnoop.yaml";

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build and package execsnoop")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the complete binary (eBPF + userspace)
    Build {
        /// Build in release mode
        #[arg(long)]
        release: bool,

        /// Target architecture for cross-compilation (e.g., aarch64-unknown-linux-gnu)
        #[arg(long)]
        target: Option<String>,
    },

    /// Package binary, sample settings and an install script
    Package {
        /// Target architecture
        #[arg(long)]
        target: Option<String>,

        /// Output directory
        #[arg(long, default_value = "dist")]
        output: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build { release, target } => {
            build(release, target.as_deref())?;
        }
        Commands::Package { target, output } => {
            package(target.as_deref(), &output)?;
        }
    }

    Ok(())
}

fn project_root() -> Result<PathBuf> {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(Path::to_path_buf)
        .context("xtask has no parent directory")
}

fn binary_path(root: &Path, release: bool, target: Option<&str>) -> PathBuf {
    let profile = if release { "release" } else { "debug" };
    match target {
        Some(t) => root.join("target").join(t).join(profile).join(BINARY),
        None => root.join("target").join(profile).join(BINARY),
    }
}

fn check_ebpf_toolchain() -> Result<()> {
    if which::which("bpf-linker").is_err() {
        bail!(
            "bpf-linker not found in PATH.\n\
             Install with: cargo install bpf-linker"
        );
    }
    let nightly = Command::new("rustup")
        .args(["run", "nightly", "rustc", "--version"])
        .output();
    match nightly {
        Ok(out) if out.status.success() => Ok(()),
        _ => bail!(
            "A nightly toolchain with rust-src is required for the eBPF object.\n\
             Install with: rustup toolchain install nightly --component rust-src"
        ),
    }
}

fn build(release: bool, target: Option<&str>) -> Result<PathBuf> {
    let root = project_root()?;

    println!("🔨 Building {}...", BINARY);
    check_ebpf_toolchain()?;

    let is_cross_compile = target.is_some_and(|t| t.contains("linux")) && !cfg!(target_os = "linux");

    let build_cmd = if is_cross_compile {
        if which::which("cross").is_ok() {
            println!("   Using 'cross' for cross-compilation");
            "cross"
        } else {
            bail!(
                "Cross-compilation to Linux requires 'cross' tool.\n\
                 Install with: cargo install cross\n\
                 Also requires Docker to be running."
            );
        }
    } else {
        "cargo"
    };

    let mut cmd = Command::new(build_cmd);
    cmd.current_dir(&root);
    cmd.arg("build");

    if release {
        cmd.arg("--release");
    }

    if let Some(t) = target {
        cmd.arg("--target").arg(t);
        println!("   Target: {}", t);
    }

    cmd.arg("-p").arg(BINARY);

    let status = cmd.status().context("Failed to run cargo build")?;
    if !status.success() {
        bail!("Build failed");
    }

    let binary = binary_path(&root, release, target);
    println!("✅ Build complete: {}", binary.display());

    Ok(binary)
}

fn package(target: Option<&str>, output_dir: &str) -> Result<()> {
    let binary = build(true, target)?;
    if !binary.exists() {
        bail!("Binary not found at: {}", binary.display());
    }

    let root = project_root()?;
    let output_path = root.join(output_dir);
    fs::create_dir_all(&output_path).context("Failed to create output directory")?;

    let arch = target.unwrap_or(env::consts::ARCH);
    let version = env!("CARGO_PKG_VERSION");
    let package_name = format!("{}-{}-{}", BINARY, version, arch);

    let package_dir = output_path.join(&package_name);
    fs::create_dir_all(&package_dir)?;

    fs::copy(&binary, package_dir.join(BINARY))?;

    let sample = root.join(SAMPLE_CONFIG);
    if sample.exists() {
        fs::copy(&sample, package_dir.join(format!("{}.example", SAMPLE_CONFIG)))?;
    }

    fs::write(package_dir.join("install.sh"), install_script())?;

    let tarball = output_path.join(format!("{}.tar.gz", package_name));
    let status = Command::new("tar")
        .current_dir(&output_path)
        .args(["-czf", &tarball.to_string_lossy(), &package_name])
        .status()
        .context("Failed to create tarball")?;

    if !status.success() {
        bail!("Failed to create tarball");
    }

    fs::remove_dir_all(&package_dir)?;

    println!("✅ Package created: {}", tarball.display());

    Ok(())
}

fn install_script() -> String {
    format!(
        r#"#!/bin/bash
set -e

INSTALL_DIR="${{INSTALL_DIR:-/usr/local/bin}}"
CONFIG_DIR="${{CONFIG_DIR:-/etc/{bin}}}"

echo "Installing {bin}..."

sudo install -m 755 {bin} "$INSTALL_DIR/{bin}"

sudo mkdir -p "$CONFIG_DIR"
if [ -f {cfg}.example ] && [ ! -f "$CONFIG_DIR/{cfg}" ]; then
    sudo cp {cfg}.example "$CONFIG_DIR/{cfg}"
fi

echo "✅ Installed to $INSTALL_DIR/{bin}"
echo "   Run as root (or with CAP_BPF and CAP_PERFMON): {bin} --help"
"#,
        bin = BINARY,
        cfg = SAMPLE_CONFIG,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_path() {
        let root = Path::new("/src");
        assert_eq!(
            binary_path(root, true, None),
            PathBuf::from("/src/target/release/execsnoop")
        );
        assert_eq!(
            binary_path(root, false, Some("aarch64-unknown-linux-gnu")),
            PathBuf::from("/src/target/aarch64-unknown-linux-gnu/debug/execsnoop")
        );
    }

    #[test]
    fn test_install_script_names_binary_and_config() {
        let script = install_script();
        assert!(script.contains("install -m 755 execsnoop \"$INSTALL_DIR/execsnoop\""));
        assert!(script.contains("CONFIG_DIR=\"${CONFIG_DIR:-/etc/execsnoop}\""));
        assert!(script.contains("execsnoop.yaml.example"));
    }
}
