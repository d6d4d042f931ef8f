use core::fmt;

use types::{AbiError, MsgClass, Pid};

/// Recoverable kernel errors, reported to the caller of a kernel operation.
/// Conditions that indicate corrupted kernel state are not errors: they halt
/// the kernel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// The process table has no free slot.
    TableFull,
    /// The kernel is shutting down or has halted.
    ShuttingDown,
    UnknownProcess(Pid),
    /// The destination has terminated but was not yet reclaimed.
    ProcessDead(Pid),
    /// A reply was sent to a process not waiting for one from the sender.
    NotAwaitingReply(Pid),
    SelfRpc,
    /// The operation does not accept this message class.
    BadClass(MsgClass),
    PermissionDenied { killer: Pid, target: Pid },
    /// A bounded receive expired with nothing queued.
    TimedOut,
    /// The server of an RPC terminated before replying.
    ServerGone(Pid),
    /// The calling process was terminated while the operation was in progress.
    Terminated,
    BadExecutable(String),
    InvalidConfig(String),
    InvariantViolated(String),
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::TableFull => write!(f, "process table full"),
            KernelError::ShuttingDown => write!(f, "kernel is shutting down"),
            KernelError::UnknownProcess(pid) => write!(f, "no process {}", pid),
            KernelError::ProcessDead(pid) => write!(f, "process {} is dead", pid),
            KernelError::NotAwaitingReply(pid) => {
                write!(f, "process {} is not awaiting a reply from the sender", pid)
            }
            KernelError::SelfRpc => write!(f, "a process cannot call itself"),
            KernelError::BadClass(class) => write!(f, "message class {:?} not allowed here", class),
            KernelError::PermissionDenied { killer, target } => {
                write!(f, "process {} may not kill process {}", killer, target)
            }
            KernelError::TimedOut => write!(f, "receive timed out"),
            KernelError::ServerGone(pid) => write!(f, "server {} terminated before replying", pid),
            KernelError::Terminated => write!(f, "process terminated"),
            KernelError::BadExecutable(msg) => write!(f, "bad executable: {}", msg),
            KernelError::InvalidConfig(msg) => write!(f, "invalid config: {}", msg),
            KernelError::InvariantViolated(msg) => write!(f, "invariant violated: {}", msg),
        }
    }
}

impl std::error::Error for KernelError {}

impl From<AbiError> for KernelError {
    fn from(err: AbiError) -> Self {
        KernelError::BadExecutable(err.to_string())
    }
}
