//! Converting RV32 ELF executables into the kernel's paged image format.

use anyhow::{Context, Result, bail, ensure};
use goblin::elf::Elf;
use goblin::elf::header::{EM_RISCV, ET_EXEC};
use goblin::elf::program_header::{PF_R, PF_W, PF_X, PT_LOAD};
use kernel::ImageBuilder;
use types::{PAGE_SIZE, Prot, VIRT_BASE};

/// One loadable segment as it will appear in the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSegment {
    pub vaddr: u32,
    pub npages: u32,
    pub prot: Prot,
    pub filesz: u32,
}

fn prot_of(flags: u32) -> Prot {
    let mut prot = Prot::NONE;
    if flags & PF_R != 0 {
        prot = prot | Prot::READ;
    }
    if flags & PF_W != 0 {
        prot = prot | Prot::WRITE;
    }
    if flags & PF_X != 0 {
        prot = prot | Prot::EXEC;
    }
    prot
}

/// Check `bytes` is a 32-bit RISC-V executable and list the segments the
/// kernel will load. Segments below the virtual base are skipped.
pub fn load_segments(bytes: &[u8]) -> Result<(u32, Vec<(LoadSegment, &[u8])>)> {
    let elf = Elf::parse(bytes).context("failed to parse ELF")?;
    ensure!(!elf.is_64, "not a 32-bit ELF");
    ensure!(elf.header.e_type == ET_EXEC, "not an executable (e_type {})", elf.header.e_type);
    ensure!(elf.header.e_machine == EM_RISCV, "not a RISC-V binary (e_machine {})", elf.header.e_machine);

    let mut segments = Vec::new();
    for (i, ph) in elf.program_headers.iter().enumerate() {
        if ph.p_type != PT_LOAD || ph.p_memsz == 0 {
            continue;
        }
        if ph.p_vaddr < VIRT_BASE as u64 {
            log::debug!("segment {} at {:#x} is below the virtual base, skipped", i, ph.p_vaddr);
            continue;
        }
        if ph.p_vaddr % PAGE_SIZE as u64 != 0 {
            bail!("segment {} address {:#x} not page aligned", i, ph.p_vaddr);
        }
        if ph.p_offset % PAGE_SIZE as u64 != 0 {
            bail!("segment {} file offset {:#x} not page aligned", i, ph.p_offset);
        }
        if ph.p_filesz > ph.p_memsz {
            bail!("segment {} bad size: filesz {} > memsz {}", i, ph.p_filesz, ph.p_memsz);
        }
        let end = ph.p_offset + ph.p_filesz;
        let data = bytes
            .get(ph.p_offset as usize..end as usize)
            .with_context(|| format!("segment {} runs past the end of the file", i))?;

        let seg = LoadSegment {
            vaddr: ph.p_vaddr as u32,
            npages: ph.p_memsz.div_ceil(PAGE_SIZE as u64) as u32,
            prot: prot_of(ph.p_flags),
            filesz: ph.p_filesz as u32,
        };
        log::debug!(
            "segment {}: vaddr={:#x} memsz={} offset={:#x} filesz={} prot={}",
            i,
            ph.p_vaddr,
            ph.p_memsz,
            ph.p_offset,
            ph.p_filesz,
            seg.prot
        );
        segments.push((seg, data));
    }
    Ok((elf.header.e_entry as u32, segments))
}

/// Convert an ELF executable into an image the kernel can page from. Every
/// segment must fit in a virtual range of `virt_pages` pages.
pub fn elf_to_image(bytes: &[u8], virt_pages: usize) -> Result<Vec<u8>> {
    let (entry, segments) = load_segments(bytes)?;
    ensure!(!segments.is_empty(), "no loadable segments at or above {:#x}", VIRT_BASE);

    let mut builder = ImageBuilder::new(entry).virt_pages(virt_pages);
    for (seg, data) in segments {
        builder = builder.segment(seg.vaddr / PAGE_SIZE as u32, seg.npages, seg.prot, data);
    }
    Ok(builder.build()?)
}
