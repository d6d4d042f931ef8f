//! A small process kernel hosted in one OS process.
//!
//! Processes are either kernel processes (host closures driving a [`Sys`]
//! handle) or user processes (executables run on an emulated RV32IM
//! processor). They communicate only through three per-process mailboxes
//! (request, reply, event). User memory is demand paged: a software TLB
//! opens pages of one shared virtual range, a clock algorithm picks victims
//! among the physical frames, and evicted pages go to a block-device swap
//! space.
//!
//! ```no_run
//! use kernel::{Kernel, KernelConfig, MsgClass};
//!
//! let sys = Kernel::new(KernelConfig::default()).boot()?;
//! let echo = sys.spawn("echo", |sys| {
//!     while let Ok(req) = sys.recv(MsgClass::Request, None) {
//!         let _ = sys.reply(req.src, &req.data);
//!     }
//!     0
//! })?;
//! assert_eq!(sys.rpc(echo, b"ping")?, b"ping");
//! sys.shutdown()?;
//! # Ok::<(), kernel::KernelError>(())
//! ```

pub mod clock;
pub mod config;
pub mod console;
pub mod error;
pub mod exec;
pub mod intr;
pub mod mmu;
pub mod paging;
pub mod proc;
pub mod trap;

mod sched;
mod state;
mod syscall;
mod sys;
mod user;

pub use config::{Config, KernelConfig};
pub use console::{Captured, Console};
pub use error::KernelError;
pub use exec::{ExecSource, Executable, ImageBuilder};
pub use intr::{DeviceHandle, DeviceId, DeviceSource, IoContext, KERNEL_PID};
pub use paging::{BlockStore, FileDisk, RamDisk};
pub use proc::{Delivery, Message, ProcState};
pub use sched::ProcBody;
pub use state::MemoryStats;
pub use sys::{Kernel, Sys};

pub use types::{MsgClass, Pid, ProcEvent, status};
