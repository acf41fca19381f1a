//! Linux error numbers: https://man7.org/linux/man-pages/man3/errno.3.html

use thiserror::Error;

/// guest-visible errno, surfaced to the ABI return register as `-(errno as isize)`
#[repr(i32)]
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
#[allow(non_camel_case_types)]
pub enum Errno {
    #[error("[EPERM] Operation not permitted")]
    EPERM = 1,
    #[error("[ENOENT] No such file or directory")]
    ENOENT = 2,
    #[error("[ESRCH] No such process")]
    ESRCH = 3,
    #[error("[EINTR] Interrupted system call")]
    EINTR = 4,
    #[error("[EIO] I/O error")]
    EIO = 5,
    #[error("[ENXIO] No such device or address")]
    ENXIO = 6,
    #[error("[E2BIG] Argument list too long")]
    E2BIG = 7,
    #[error("[ENOEXEC] Exec format error")]
    ENOEXEC = 8,
    #[error("[EBADF] Bad file number")]
    EBADF = 9,
    #[error("[ECHILD] No child processes")]
    ECHILD = 10,
    #[error("[EAGAIN] Try again")]
    EAGAIN = 11,
    #[error("[ENOMEM] Out of memory")]
    ENOMEM = 12,
    #[error("[EACCES] Permission denied")]
    EACCES = 13,
    #[error("[EFAULT] Bad address")]
    EFAULT = 14,
    #[error("[ENOTBLK] Block device required")]
    ENOTBLK = 15,
    #[error("[EBUSY] Device or resource busy")]
    EBUSY = 16,
    #[error("[EEXIST] File exists")]
    EEXIST = 17,
    #[error("[EXDEV] Cross-device link")]
    EXDEV = 18,
    #[error("[ENODEV] No such device")]
    ENODEV = 19,
    #[error("[ENOTDIR] Not a directory")]
    ENOTDIR = 20,
    #[error("[EISDIR] Is a directory")]
    EISDIR = 21,
    #[error("[EINVAL] Invalid argument")]
    EINVAL = 22,
    #[error("[ENFILE] File table overflow")]
    ENFILE = 23,
    #[error("[EMFILE] Too many open files")]
    EMFILE = 24,
    #[error("[ENOTTY] Not a typewriter")]
    ENOTTY = 25,
    #[error("[ETXTBSY] Text file busy")]
    ETXTBSY = 26,
    #[error("[EFBIG] File too large")]
    EFBIG = 27,
    #[error("[ENOSPC] No space left on device")]
    ENOSPC = 28,
    #[error("[ESPIPE] Illegal seek")]
    ESPIPE = 29,
    #[error("[EROFS] Read-only file system")]
    EROFS = 30,
    #[error("[EMLINK] Too many links")]
    EMLINK = 31,
    #[error("[EPIPE] Broken pipe")]
    EPIPE = 32,
    #[error("[EDOM] Math argument out of domain of func")]
    EDOM = 33,
    #[error("[ERANGE] Math result not representable")]
    ERANGE = 34,
    #[error("[ENAMETOOLONG] File name too long")]
    ENAMETOOLONG = 36,
    #[error("[ENOSYS] Function not supported")]
    ENOSYS = 38,
    #[error("[ENOTSUP] Operation not supported (unsupported-flag)")]
    ENOTSUP = 95,
    #[error("[ETIMEDOUT] Connection timed out")]
    ETIMEDOUT = 110,
}

impl Errno {
    /// map a host errno (as returned by `nix`/`libc`) onto the guest's
    /// Linux i386 ABI errno space (spec.md §6: "Guest errno codes
    /// follow the Linux i386 ABI integer values"). The numbering
    /// agrees for every value this simulator's host calls can produce,
    /// so this is a lookup rather than a real translation table;
    /// anything unrecognized collapses to `EIO`, matching spec.md §7's
    /// treatment of host I/O failure.
    pub fn from_host(raw: i32) -> Errno {
        match raw {
            1 => Errno::EPERM,
            2 => Errno::ENOENT,
            3 => Errno::ESRCH,
            4 => Errno::EINTR,
            5 => Errno::EIO,
            6 => Errno::ENXIO,
            7 => Errno::E2BIG,
            8 => Errno::ENOEXEC,
            9 => Errno::EBADF,
            10 => Errno::ECHILD,
            11 => Errno::EAGAIN,
            12 => Errno::ENOMEM,
            13 => Errno::EACCES,
            14 => Errno::EFAULT,
            16 => Errno::EBUSY,
            17 => Errno::EEXIST,
            18 => Errno::EXDEV,
            19 => Errno::ENODEV,
            20 => Errno::ENOTDIR,
            21 => Errno::EISDIR,
            22 => Errno::EINVAL,
            23 => Errno::ENFILE,
            24 => Errno::EMFILE,
            25 => Errno::ENOTTY,
            27 => Errno::EFBIG,
            28 => Errno::ENOSPC,
            29 => Errno::ESPIPE,
            30 => Errno::EROFS,
            31 => Errno::EMLINK,
            32 => Errno::EPIPE,
            36 => Errno::ENAMETOOLONG,
            38 => Errno::ENOSYS,
            110 => Errno::ETIMEDOUT,
            _ => Errno::EIO,
        }
    }
}

impl From<nix::Error> for Errno {
    fn from(e: nix::Error) -> Errno {
        Errno::from_host(e as i32)
    }
}

/// result of a syscall handler that completed synchronously
pub type SysResult<T> = Result<T, Errno>;

/// fatal simulator errors: terminate the run with a diagnostic (spec.md §7)
#[derive(Debug, Error)]
pub enum SimError {
    #[error("unimplemented syscall {name} (no {no})")]
    UnimplementedSyscall { name: &'static str, no: usize },

    #[error("unsupported flag in {syscall}: {detail}")]
    UnsupportedFlag { syscall: &'static str, detail: String },

    #[error("out of guest memory: {detail}")]
    OutOfGuestMemory { detail: String },

    #[error("coherence invariant violated: {detail}")]
    CoherenceInconsistency { detail: String },

    #[error("malformed guest ELF: {0}")]
    Loader(String),

    #[error("fatal guest fault: {detail} at pc={pc:#x}")]
    GuestFault { detail: String, pc: u32 },
}
