//! POSIX errno taxonomy shared by every backend and driver.
//!
//! The rendered message format is an observable contract: downstream
//! tooling parses `"<CODE>: <msg>[, <syscall>][ '<path>'][ -> '<dest>']"`
//! byte for byte.

use std::fmt;

use num_derive::FromPrimitive;

/// Convenient result alias used by all filesystem operations.
pub type FsResult<T> = Result<T, FsError>;

/// Errno kinds with their fixed numeric codes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, FromPrimitive)]
pub enum ErrnoKind {
    /// Operation not permitted.
    Eperm = -1,
    /// No such file or directory.
    Enoent = -2,
    /// Bad file descriptor.
    Ebadf = -9,
    /// Permission denied.
    Eacces = -13,
    /// Resource busy or locked.
    Ebusy = -16,
    /// File already exists.
    Eexist = -17,
    /// Cross-device link not permitted.
    Exdev = -18,
    /// Not a directory.
    Enotdir = -20,
    /// Illegal operation on a directory.
    Eisdir = -21,
    /// Invalid argument.
    Einval = -22,
    /// File table overflow.
    Enfile = -23,
    /// Too many open files.
    Emfile = -24,
    /// No space left on device.
    Enospc = -28,
    /// Read-only file system.
    Erofs = -30,
    /// Name too long.
    Enametoolong = -36,
    /// Directory not empty.
    Enotempty = -39,
    /// Too many symbolic links encountered.
    Eloop = -40,
}

impl ErrnoKind {
    /// Numeric errno value (negative, matching the syscall convention).
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Upper-case symbolic code, e.g. `"ENOENT"`.
    pub fn symbol(self) -> &'static str {
        match self {
            ErrnoKind::Eperm => "EPERM",
            ErrnoKind::Enoent => "ENOENT",
            ErrnoKind::Ebadf => "EBADF",
            ErrnoKind::Eacces => "EACCES",
            ErrnoKind::Ebusy => "EBUSY",
            ErrnoKind::Eexist => "EEXIST",
            ErrnoKind::Exdev => "EXDEV",
            ErrnoKind::Enotdir => "ENOTDIR",
            ErrnoKind::Eisdir => "EISDIR",
            ErrnoKind::Einval => "EINVAL",
            ErrnoKind::Enfile => "ENFILE",
            ErrnoKind::Emfile => "EMFILE",
            ErrnoKind::Enospc => "ENOSPC",
            ErrnoKind::Erofs => "EROFS",
            ErrnoKind::Enametoolong => "ENAMETOOLONG",
            ErrnoKind::Enotempty => "ENOTEMPTY",
            ErrnoKind::Eloop => "ELOOP",
        }
    }

    /// Canonical human-readable message for the kind.
    pub fn message(self) -> &'static str {
        match self {
            ErrnoKind::Eperm => "operation not permitted",
            ErrnoKind::Enoent => "no such file or directory",
            ErrnoKind::Ebadf => "bad file descriptor",
            ErrnoKind::Eacces => "permission denied",
            ErrnoKind::Ebusy => "resource busy or locked",
            ErrnoKind::Eexist => "file already exists",
            ErrnoKind::Exdev => "cross-device link not permitted",
            ErrnoKind::Enotdir => "not a directory",
            ErrnoKind::Eisdir => "illegal operation on a directory",
            ErrnoKind::Einval => "invalid argument",
            ErrnoKind::Enfile => "file table overflow",
            ErrnoKind::Emfile => "too many open files",
            ErrnoKind::Enospc => "no space left on device",
            ErrnoKind::Erofs => "read-only file system",
            ErrnoKind::Enametoolong => "name too long",
            ErrnoKind::Enotempty => "directory not empty",
            ErrnoKind::Eloop => "too many symbolic links encountered",
        }
    }
}

/// A filesystem failure carrying the errno kind plus optional context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsError {
    kind: ErrnoKind,
    syscall: Option<&'static str>,
    path: Option<String>,
    dest: Option<String>,
}

impl FsError {
    /// Build an error with no context.
    pub fn new(kind: ErrnoKind) -> Self {
        Self { kind, syscall: None, path: None, dest: None }
    }

    /// Attach the originating syscall name.
    pub fn syscall(mut self, syscall: &'static str) -> Self {
        self.syscall = Some(syscall);
        self
    }

    /// Attach the affected path.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attach the destination path (rename, link, copy).
    pub fn dest(mut self, dest: impl Into<String>) -> Self {
        self.dest = Some(dest.into());
        self
    }

    /// The errno kind.
    pub fn kind(&self) -> ErrnoKind {
        self.kind
    }

    /// Numeric errno value.
    pub fn code(&self) -> i32 {
        self.kind.code()
    }

    /// The syscall recorded on this error, if any.
    pub fn syscall_name(&self) -> Option<&'static str> {
        self.syscall
    }

    /// The path recorded on this error, if any.
    pub fn path_str(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// True when the error is of the given kind.
    pub fn is(&self, kind: ErrnoKind) -> bool {
        self.kind == kind
    }

    /// Shorthand for an [`ErrnoKind::Enoent`] with syscall and path.
    pub fn enoent(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrnoKind::Enoent).syscall(syscall).path(path)
    }

    /// Shorthand for an [`ErrnoKind::Eexist`] with syscall and path.
    pub fn eexist(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrnoKind::Eexist).syscall(syscall).path(path)
    }

    /// Shorthand for an [`ErrnoKind::Eisdir`] with syscall and path.
    pub fn eisdir(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrnoKind::Eisdir).syscall(syscall).path(path)
    }

    /// Shorthand for an [`ErrnoKind::Enotdir`] with syscall and path.
    pub fn enotdir(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrnoKind::Enotdir).syscall(syscall).path(path)
    }

    /// Shorthand for an [`ErrnoKind::Einval`] with syscall and path.
    pub fn einval(syscall: &'static str, path: impl Into<String>) -> Self {
        Self::new(ErrnoKind::Einval).syscall(syscall).path(path)
    }

    /// Shorthand for an [`ErrnoKind::Ebadf`] with syscall.
    pub fn ebadf(syscall: &'static str) -> Self {
        Self::new(ErrnoKind::Ebadf).syscall(syscall)
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.symbol(), self.kind.message())?;
        if let Some(syscall) = self.syscall {
            write!(f, ", {syscall}")?;
        }
        if let Some(path) = &self.path {
            write!(f, " '{path}'")?;
        }
        if let Some(dest) = &self.dest {
            write!(f, " -> '{dest}'")?;
        }
        Ok(())
    }
}

impl std::error::Error for FsError {}

#[cfg(test)]
mod tests {
    use num_traits::FromPrimitive;

    use super::*;

    #[test]
    fn codes_match_posix() {
        assert_eq!(ErrnoKind::Enoent.code(), -2);
        assert_eq!(ErrnoKind::Eexist.code(), -17);
        assert_eq!(ErrnoKind::Eisdir.code(), -21);
        assert_eq!(ErrnoKind::Enotdir.code(), -20);
        assert_eq!(ErrnoKind::Eacces.code(), -13);
        assert_eq!(ErrnoKind::Eperm.code(), -1);
        assert_eq!(ErrnoKind::Enotempty.code(), -39);
        assert_eq!(ErrnoKind::Ebadf.code(), -9);
        assert_eq!(ErrnoKind::Einval.code(), -22);
        assert_eq!(ErrnoKind::Eloop.code(), -40);
        assert_eq!(ErrnoKind::Enametoolong.code(), -36);
        assert_eq!(ErrnoKind::Enospc.code(), -28);
        assert_eq!(ErrnoKind::Erofs.code(), -30);
        assert_eq!(ErrnoKind::Ebusy.code(), -16);
        assert_eq!(ErrnoKind::Emfile.code(), -24);
        assert_eq!(ErrnoKind::Enfile.code(), -23);
        assert_eq!(ErrnoKind::Exdev.code(), -18);
    }

    #[test]
    fn kind_from_code() {
        assert_eq!(ErrnoKind::from_i32(-2), Some(ErrnoKind::Enoent));
        assert_eq!(ErrnoKind::from_i32(-40), Some(ErrnoKind::Eloop));
        assert_eq!(ErrnoKind::from_i32(-99), None);
    }

    #[test]
    fn message_with_full_context() {
        let err = FsError::enoent("open", "/tmp/missing.txt");
        assert_eq!(err.to_string(), "ENOENT: no such file or directory, open '/tmp/missing.txt'");
    }

    #[test]
    fn message_with_dest() {
        let err = FsError::new(ErrnoKind::Exdev)
            .syscall("rename")
            .path("/mnt/a/file")
            .dest("/mnt/b/file");
        assert_eq!(
            err.to_string(),
            "EXDEV: cross-device link not permitted, rename '/mnt/a/file' -> '/mnt/b/file'"
        );
    }

    #[test]
    fn message_without_context() {
        let err = FsError::new(ErrnoKind::Ebadf);
        assert_eq!(err.to_string(), "EBADF: bad file descriptor");
    }

    #[test]
    fn message_path_without_syscall() {
        let err = FsError::new(ErrnoKind::Eacces).path("/etc/shadow");
        assert_eq!(err.to_string(), "EACCES: permission denied '/etc/shadow'");
    }
}
