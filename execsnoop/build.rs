use std::{env, fs, path::PathBuf, process::Command};

use anyhow::{Context as _, Result, anyhow};
use cargo_metadata::{MetadataCommand, Package};

const EBPF_PACKAGE: &str = "execsnoop-ebpf";
const EBPF_BINARY: &str = "execsnoop";

fn main() -> Result<()> {
    let out_dir = PathBuf::from(env::var("OUT_DIR").context("OUT_DIR not set")?);
    let out_file = out_dir.join(EBPF_BINARY);

    println!("cargo:rerun-if-env-changed=EXECSNOOP_SKIP_EBPF");
    if env::var_os("EXECSNOOP_SKIP_EBPF").is_some() {
        println!("cargo:warning=EXECSNOOP_SKIP_EBPF set; embedding an empty eBPF object");
        fs::write(&out_file, [])?;
        return Ok(());
    }

    // Host tests only need the object to exist; a missing nightly toolchain
    // must not break them. The loader refuses an empty object at runtime.
    if let Err(err) = build_ebpf(&out_file) {
        println!("cargo:warning=eBPF build failed: {err:#}");
        println!("cargo:warning=embedding an empty eBPF object, the loader will refuse to start");
        fs::write(&out_file, [])?;
    }
    Ok(())
}

fn ebpf_package() -> Result<Package> {
    let metadata = MetadataCommand::new()
        .no_deps()
        .exec()
        .context("Failed to run cargo metadata")?;
    metadata
        .packages
        .into_iter()
        .find(|pkg| pkg.name.as_str() == EBPF_PACKAGE)
        .ok_or_else(|| anyhow!("{EBPF_PACKAGE} not found in workspace"))
}

fn build_ebpf(out_file: &PathBuf) -> Result<()> {
    let package = ebpf_package()?;
    let ebpf_dir = package
        .manifest_path
        .parent()
        .context("eBPF manifest has no parent directory")?
        .as_std_path()
        .to_path_buf();

    println!("cargo:rerun-if-changed={}", ebpf_dir.join("src").display());
    println!(
        "cargo:rerun-if-changed={}",
        ebpf_dir.join("../execsnoop-common/src").display()
    );

    let arch = env::var("CARGO_CFG_TARGET_ARCH").context("CARGO_CFG_TARGET_ARCH not set")?;
    let bpf_target = match arch.as_str() {
        "x86_64" | "x86" | "aarch64" | "arm" | "riscv64" | "loongarch64" => "bpfel-unknown-none",
        "mips" | "mips64" | "powerpc" | "powerpc64" | "s390x" => "bpfeb-unknown-none",
        _ => {
            println!(
                "cargo:warning=Unknown architecture '{}', defaulting to bpfel-unknown-none",
                arch
            );
            "bpfel-unknown-none"
        }
    };

    // Use a separate target directory for eBPF to avoid file lock conflicts
    let ebpf_target_dir = PathBuf::from(env::var("OUT_DIR")?).join("ebpf-target");

    let cargo = env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
    let status = Command::new(cargo)
        .current_dir(&ebpf_dir)
        .env_remove("RUSTC")
        .env_remove("RUSTC_WORKSPACE_WRAPPER")
        .env_remove("RUSTFLAGS")
        .env_remove("CARGO_ENCODED_RUSTFLAGS")
        .env("RUSTUP_TOOLCHAIN", "nightly")
        .env("CARGO_TARGET_DIR", &ebpf_target_dir)
        .args([
            "build",
            "--release",
            &format!("--target={}", bpf_target),
            "-Z",
            "build-std=core",
        ])
        .status()
        .context("Failed to execute cargo command")?;

    if !status.success() {
        return Err(anyhow!("cargo build for {EBPF_PACKAGE} exited with {status}"));
    }

    let ebpf_binary = ebpf_target_dir.join(format!("{}/release/{}", bpf_target, EBPF_BINARY));
    fs::copy(&ebpf_binary, out_file).with_context(|| {
        format!("Failed to copy eBPF object file {}", ebpf_binary.display())
    })?;
    Ok(())
}
