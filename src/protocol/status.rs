//! Status codes returned by the master and the chunkservers.

pub const STATUS_OK: u8 = 0;
pub const ERROR_EPERM: u8 = 1;
pub const ERROR_ENOTDIR: u8 = 2;
pub const ERROR_ENOENT: u8 = 3;
pub const ERROR_EACCES: u8 = 4;
pub const ERROR_EEXIST: u8 = 5;
pub const ERROR_EINVAL: u8 = 6;
pub const ERROR_ENOTEMPTY: u8 = 7;
pub const ERROR_CHUNKLOST: u8 = 8;
pub const ERROR_OUTOFMEMORY: u8 = 9;
pub const ERROR_WRONGVERSION: u8 = 19;
pub const ERROR_NOSPACE: u8 = 21;
pub const ERROR_IO: u8 = 22;
pub const ERROR_CRC: u8 = 29;
pub const ERROR_EROFS: u8 = 33;
pub const ERROR_QUOTA: u8 = 34;
pub const ERROR_BADSESSIONID: u8 = 35;
pub const ERROR_NOPASSWORD: u8 = 36;
pub const ERROR_BADPASSWORD: u8 = 37;

const STATUS_TABLE: [&str; 55] = [
    "OK",
    "Operation not permitted",
    "Not a directory",
    "No such file or directory",
    "Permission denied",
    "File exists",
    "Invalid argument",
    "Directory not empty",
    "Chunk lost",
    "Out of memory",
    "Index too big",
    "Chunk locked",
    "No chunk servers",
    "No such chunk",
    "Chunk is busy",
    "Incorrect register BLOB",
    "Operation not completed",
    "File not opened",
    "Write not started",
    "Wrong chunk version",
    "Chunk already exists",
    "No space left",
    "IO error",
    "Incorrect block number",
    "Incorrect size",
    "Incorrect offset",
    "Can't connect",
    "Incorrect chunk id",
    "Disconnected",
    "CRC error",
    "Operation delayed",
    "Can't create path",
    "Data mismatch",
    "Read-only file system",
    "Quota exceeded",
    "Bad session id",
    "Password is needed",
    "Incorrect password",
    "Attribute not found",
    "Operation not supported",
    "Result too large",
    "Entity not found",
    "Entity is active",
    "Chunkserver not present",
    "Waiting on lock",
    "Resource temporarily unavailable",
    "Interrupted system call",
    "Operation canceled",
    "No such file or directory (not cacheable)",
    "Operation not permitted (mfs admin only)",
    "Class name already in use",
    "Maximum number of classes reached",
    "No such class",
    "Class in use",
    "Unknown MFS error",
];

/// Human readable text for a status code. Codes past the table map to the
/// last entry.
pub fn strerror(code: u8) -> &'static str {
    let idx = (code as usize).min(STATUS_TABLE.len() - 1);
    STATUS_TABLE[idx]
}

/// POSIX errno for a status code.
pub fn to_errno(code: u8) -> i32 {
    match code {
        STATUS_OK => 0,
        ERROR_EPERM | 49 => libc::EPERM,
        ERROR_ENOTDIR => libc::ENOTDIR,
        ERROR_ENOENT | 48 => libc::ENOENT,
        ERROR_EACCES => libc::EACCES,
        ERROR_EEXIST => libc::EEXIST,
        ERROR_EINVAL => libc::EINVAL,
        ERROR_ENOTEMPTY => libc::ENOTEMPTY,
        ERROR_OUTOFMEMORY => libc::ENOMEM,
        ERROR_NOSPACE => libc::ENOSPC,
        ERROR_EROFS => libc::EROFS,
        ERROR_QUOTA => libc::EDQUOT,
        38 => libc::ENODATA,
        39 => libc::ENOTSUP,
        40 => libc::ERANGE,
        45 => libc::EAGAIN,
        46 => libc::EINTR,
        47 => libc::ECANCELED,
        _ => libc::EIO,
    }
}
