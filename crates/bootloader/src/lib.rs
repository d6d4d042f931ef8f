//! Host front end for the kernel.
//!
//! This crate:
//! - converts RV32 ELF executables into the kernel's paged image format,
//! - loads programs from disk, converting ELF files on the fly,
//! - boots a kernel, runs programs to completion and reports how they died.

pub mod elf;
pub mod logger;

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use kernel::{Executable, FileDisk, Kernel, KernelConfig, Pid, ProcEvent};
use types::BLOCKS_PER_PAGE;

pub use elf::{LoadSegment, elf_to_image, load_segments};

const ELF_MAGIC: &[u8; 4] = b"\x7fELF";

/// Read a program from `path`. ELF files are converted for a virtual range
/// of `virt_pages` pages; anything else must already be an image.
pub fn load_program(path: &Path, virt_pages: usize) -> Result<Executable> {
    let bytes = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("program")
        .to_string();
    let image = if bytes.starts_with(ELF_MAGIC) {
        elf_to_image(&bytes, virt_pages).with_context(|| format!("failed to convert {}", path.display()))?
    } else {
        bytes
    };
    Executable::from_bytes(name, image).with_context(|| format!("bad executable {}", path.display()))
}

/// Load the kernel configuration from a JSON file, or the defaults.
pub fn load_config(path: Option<&Path>) -> Result<KernelConfig> {
    match path {
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
            Ok(KernelConfig::from_json(&text).with_context(|| format!("bad config {}", path.display()))?)
        }
        None => Ok(KernelConfig::default()),
    }
}

/// How one program ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub name: String,
    pub pid: Pid,
    pub status: Option<i32>,
}

/// Boot a kernel, start every program and wait for all of them to die, at
/// most `timeout` each. Programs still alive then are reaped by shutdown.
pub fn run_programs(
    config: KernelConfig,
    swap_file: Option<&Path>,
    programs: Vec<Executable>,
    timeout: Option<Duration>,
) -> Result<Vec<Outcome>> {
    let mut kernel = Kernel::new(config.clone());
    if let Some(path) = swap_file {
        let disk = FileDisk::create(path, config.swap_pages * BLOCKS_PER_PAGE)
            .with_context(|| format!("failed to create swap file {}", path.display()))?;
        kernel = kernel.with_swap(Box::new(disk));
    }
    let sys = kernel.boot().context("failed to boot the kernel")?;

    let mut outcomes = Vec::new();
    for exe in programs {
        let name = exe.name().to_string();
        let pid = sys.exec(exe).with_context(|| format!("failed to start {}", name))?;
        outcomes.push(Outcome { name, pid, status: None });
    }

    while outcomes.iter().any(|o| o.status.is_none()) {
        let ProcEvent { pid, status } = match sys.wait_event(timeout) {
            Ok(event) => event,
            Err(err) => {
                log::warn!("stopped waiting for programs: {}", err);
                break;
            }
        };
        if let Some(o) = outcomes.iter_mut().find(|o| o.pid == pid) {
            o.status = Some(status);
        }
    }

    log::debug!("{}", sys.dump().unwrap_or_default());
    sys.shutdown().context("kernel did not halt")?;
    Ok(outcomes)
}
