use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;

use bootloader::{load_config, load_program, logger, run_programs};
use kernel::KernelConfig;
use types::{DEFAULT_VIRT_PAGES, PAGE_SIZE, page_number};

/// Boot the kernel on the host and run RV32 programs under it.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// More log output (repeat for debug and trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run programs until they all exit
    Run {
        /// ELF executables or converted images
        #[arg(required = true)]
        programs: Vec<PathBuf>,

        /// Kernel configuration (JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Override the number of physical frames
        #[arg(long)]
        phys_frames: Option<usize>,

        /// Override the number of TLB entries
        #[arg(long)]
        tlb_entries: Option<usize>,

        /// Override the clock tick period; 0 disables preemption
        #[arg(long)]
        timer_ms: Option<u64>,

        /// Page to this file instead of memory
        #[arg(long)]
        swap_file: Option<PathBuf>,

        /// Give up on programs still running after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Convert an ELF executable into an image
    Convert {
        elf: PathBuf,
        output: PathBuf,

        /// Size of the virtual range the program must fit in
        #[arg(long, default_value_t = DEFAULT_VIRT_PAGES)]
        virt_pages: usize,
    },
    /// Describe an executable
    Inspect {
        program: PathBuf,

        /// Size of the virtual range the program must fit in
        #[arg(long, default_value_t = DEFAULT_VIRT_PAGES)]
        virt_pages: usize,
    },
    /// Print the default configuration
    Config,
}

fn main() {
    let args = Args::parse();
    if let Err(e) = logger::init(logger::level_for(args.verbose, args.quiet)) {
        eprintln!("Error: {}", e);
    }
    if let Err(e) = run(args.command) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Run { programs, config, phys_frames, tlb_entries, timer_ms, swap_file, timeout } => {
            let mut cfg = load_config(config.as_deref())?;
            if let Some(n) = phys_frames {
                cfg.phys_frames = n;
            }
            if let Some(n) = tlb_entries {
                cfg.tlb_entries = n;
            }
            if let Some(ms) = timer_ms {
                cfg.timer_interval_ms = ms;
            }
            cfg.validate()?;
            let exes = programs.iter().map(|p| load_program(p, cfg.virt_pages)).collect::<Result<Vec<_>>>()?;
            let outcomes = run_programs(cfg, swap_file.as_deref(), exes, timeout.map(Duration::from_secs))?;

            let mut failed = false;
            for o in outcomes {
                match o.status {
                    Some(0) => println!("{} {} (pid {}) exited 0", "✓".green(), o.name, o.pid),
                    Some(status) => {
                        failed = true;
                        println!("{} {} (pid {}) exited {}", "✗".red(), o.name, o.pid, status);
                    }
                    None => {
                        failed = true;
                        println!("{} {} (pid {}) still running at shutdown", "⚠".yellow(), o.name, o.pid);
                    }
                }
            }
            if failed {
                anyhow::bail!("some programs failed");
            }
            Ok(())
        }
        Command::Convert { elf, output, virt_pages } => {
            let bytes = fs::read(&elf).with_context(|| format!("failed to read {}", elf.display()))?;
            let image = bootloader::elf_to_image(&bytes, virt_pages)?;
            fs::write(&output, &image).with_context(|| format!("failed to write {}", output.display()))?;
            println!("{} {} -> {} ({} bytes)", "✓".green(), elf.display(), output.display(), image.len());
            Ok(())
        }
        Command::Inspect { program, virt_pages } => inspect(program, virt_pages),
        Command::Config => {
            println!("{}", KernelConfig::default().to_json());
            Ok(())
        }
    }
}

fn inspect(path: PathBuf, virt_pages: usize) -> Result<()> {
    let exe = load_program(&path, virt_pages)?;
    let h = exe.header();
    println!("{}", exe.name().bold().blue());
    println!(
        "  entry {:#010x}  base page {:#x}  data at file page {}  {} pages of data",
        h.start, h.base, h.offset, h.size
    );
    for seg in exe.segments() {
        println!(
            "  segment pages {:#x}..{:#x}  prot {}",
            seg.first,
            seg.first + seg.npages,
            seg.prot.to_string().yellow()
        );
    }

    let mut page = vec![0u8; PAGE_SIZE];
    let entry_page = page_number(exe.entry());
    exe.read_page(entry_page, &mut page).context("failed to read the entry page")?;
    let at = exe.entry() as usize % PAGE_SIZE;
    println!("  code at entry:");
    for (i, word) in page[at..].chunks_exact(4).take(8).enumerate() {
        let raw = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        let text = match vm::decoder::decode_full(raw) {
            Some(instr) => format!("{:?}", instr),
            None => "??".dimmed().to_string(),
        };
        println!("    {:#010x}  {}  {}", exe.entry() as usize + 4 * i, hex::encode(word), text);
    }
    Ok(())
}
