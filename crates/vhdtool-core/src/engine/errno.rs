//! Static errno table used to render engine failures.

/// A platform error number with its symbolic name and message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrnoEntry {
    pub code: i32,
    pub name: &'static str,
    pub message: &'static str,
}

const fn entry(code: i32, name: &'static str, message: &'static str) -> ErrnoEntry {
    ErrnoEntry {
        code,
        name,
        message,
    }
}

/// Linux errno values 1..=40, indexed by `code - 1`.
static TABLE: [ErrnoEntry; 40] = [
    entry(1, "EPERM", "Operation not permitted"),
    entry(2, "ENOENT", "No such file or directory"),
    entry(3, "ESRCH", "No such process"),
    entry(4, "EINTR", "Interrupted system call"),
    entry(5, "EIO", "Input/output error"),
    entry(6, "ENXIO", "No such device or address"),
    entry(7, "E2BIG", "Argument list too long"),
    entry(8, "ENOEXEC", "Exec format error"),
    entry(9, "EBADF", "Bad file descriptor"),
    entry(10, "ECHILD", "No child processes"),
    entry(11, "EAGAIN", "Resource temporarily unavailable"),
    entry(12, "ENOMEM", "Cannot allocate memory"),
    entry(13, "EACCES", "Permission denied"),
    entry(14, "EFAULT", "Bad address"),
    entry(15, "ENOTBLK", "Block device required"),
    entry(16, "EBUSY", "Device or resource busy"),
    entry(17, "EEXIST", "File exists"),
    entry(18, "EXDEV", "Invalid cross-device link"),
    entry(19, "ENODEV", "No such device"),
    entry(20, "ENOTDIR", "Not a directory"),
    entry(21, "EISDIR", "Is a directory"),
    entry(22, "EINVAL", "Invalid argument"),
    entry(23, "ENFILE", "Too many open files in system"),
    entry(24, "EMFILE", "Too many open files"),
    entry(25, "ENOTTY", "Inappropriate ioctl for device"),
    entry(26, "ETXTBSY", "Text file busy"),
    entry(27, "EFBIG", "File too large"),
    entry(28, "ENOSPC", "No space left on device"),
    entry(29, "ESPIPE", "Illegal seek"),
    entry(30, "EROFS", "Read-only file system"),
    entry(31, "EMLINK", "Too many links"),
    entry(32, "EPIPE", "Broken pipe"),
    entry(33, "EDOM", "Numerical argument out of domain"),
    entry(34, "ERANGE", "Numerical result out of range"),
    entry(35, "EDEADLK", "Resource deadlock avoided"),
    entry(36, "ENAMETOOLONG", "File name too long"),
    entry(37, "ENOLCK", "No locks available"),
    entry(38, "ENOSYS", "Function not implemented"),
    entry(39, "ENOTEMPTY", "Directory not empty"),
    entry(40, "ELOOP", "Too many levels of symbolic links"),
];

/// Looks up an errno value.
pub fn lookup(code: i32) -> Option<&'static ErrnoEntry> {
    let index = usize::try_from(code).ok()?.checked_sub(1)?;
    TABLE.get(index)
}

/// Extracts the errno behind a failed engine call.
///
/// libvhd returns `-errno` from most entry points; when the return code is
/// not negative the thread's last OS error is used instead.
pub fn from_return(ret: i32) -> Option<i32> {
    if ret < 0 {
        ret.checked_neg()
    } else {
        std::io::Error::last_os_error()
            .raw_os_error()
            .filter(|&e| e != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_is_dense() {
        for (i, e) in TABLE.iter().enumerate() {
            assert_eq!(e.code as usize, i + 1);
        }
    }

    #[test]
    fn test_lookup() {
        assert_eq!(lookup(2).unwrap().name, "ENOENT");
        assert_eq!(lookup(22).unwrap().message, "Invalid argument");
        assert!(lookup(0).is_none());
        assert!(lookup(-5).is_none());
        assert!(lookup(41).is_none());
    }

    #[test]
    fn test_from_negative_return() {
        assert_eq!(from_return(-5), Some(5));
        assert_eq!(from_return(i32::MIN), None);
    }
}
