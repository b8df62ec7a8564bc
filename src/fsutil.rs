//! Filesystem primitives: corpus enumeration, unit IO, temp paths,
//! directory validation.

use std::fs;
use std::path::{Path, PathBuf};

use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::DriverResult;

/// A corpus entry as enumerated from disk. Ordered by (size, path) so
/// scheduling over a directory is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SizedFile {
    pub size: u64,
    pub path: PathBuf,
}

/// Recursively enumerate the regular files of a corpus directory.
pub fn sized_files_from_dir(dir: &Path, out: &mut Vec<SizedFile>) -> DriverResult<()> {
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| {
            std::io::Error::other(format!("walking {}: {e}", dir.display()))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        out.push(SizedFile {
            size,
            path: entry.path().to_path_buf(),
        });
    }
    Ok(())
}

/// Load every unit of a corpus directory into memory, truncating each to
/// `max_len` when it is non-zero. Unreadable entries are skipped.
pub fn read_dir_to_units(dir: &Path, max_len: usize, out: &mut Vec<Vec<u8>>) {
    let mut files = Vec::new();
    if sized_files_from_dir(dir, &mut files).is_err() {
        return;
    }
    files.sort();
    for file in files {
        if let Ok(mut unit) = fs::read(&file.path) {
            if max_len != 0 && unit.len() > max_len {
                unit.truncate(max_len);
            }
            out.push(unit);
        }
    }
}

pub fn file_to_vec(path: &Path) -> DriverResult<Vec<u8>> {
    Ok(fs::read(path)?)
}

/// Read a unit, truncated to `max_len` when it is non-zero.
pub fn file_to_vec_capped(path: &Path, max_len: usize) -> DriverResult<Vec<u8>> {
    let mut unit = fs::read(path)?;
    if max_len != 0 && unit.len() > max_len {
        unit.truncate(max_len);
    }
    Ok(unit)
}

pub fn file_to_string(path: &Path) -> DriverResult<String> {
    Ok(fs::read_to_string(path)?)
}

pub fn write_file(path: &Path, data: &[u8]) -> DriverResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, data)?;
    Ok(())
}

pub fn remove_file_quiet(path: &Path) {
    let _ = fs::remove_file(path);
}

/// A fresh path under the system temp directory.
pub fn temp_path(prefix: &str, ext: &str) -> PathBuf {
    std::env::temp_dir().join(format!("{prefix}-{}{ext}", Uuid::new_v4()))
}

pub fn dev_null() -> &'static Path {
    #[cfg(windows)]
    {
        Path::new("NUL")
    }
    #[cfg(not(windows))]
    {
        Path::new("/dev/null")
    }
}

pub fn is_separator(c: char) -> bool {
    std::path::is_separator(c)
}

/// The directory component of a path string; `.` when there is none.
pub fn dir_name(path: &str) -> String {
    match Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            parent.to_string_lossy().into_owned()
        }
        _ => ".".to_string(),
    }
}

/// Ensure a required directory exists. With `create`, missing directories
/// are created recursively; otherwise a missing directory is a user error.
/// User errors print one `ERROR:` line and terminate with status 1.
pub fn validate_directory_exists(path: &str, create: bool) {
    if path.is_empty() {
        eprintln!("ERROR: Provided directory path is an empty string");
        std::process::exit(1);
    }
    let dir = Path::new(path);
    if dir.is_dir() {
        return;
    }
    if create {
        if fs::create_dir_all(dir).is_err() {
            eprintln!("ERROR: Failed to create directory \"{path}\"");
            std::process::exit(1);
        }
        return;
    }
    eprintln!("ERROR: The required directory \"{path}\" does not exist");
    std::process::exit(1);
}

/// Route the target's stdout to the null device (`-close_fd_mask` bit 1).
pub fn close_stdout() {
    redirect_fd_to_dev_null(1);
}

/// Route the target's stderr to the null device (`-close_fd_mask` bit 2).
pub fn close_stderr() {
    redirect_fd_to_dev_null(2);
}

#[cfg(unix)]
fn redirect_fd_to_dev_null(fd: i32) {
    unsafe {
        let null = libc::open(b"/dev/null\0".as_ptr() as *const libc::c_char, libc::O_WRONLY);
        if null >= 0 {
            libc::dup2(null, fd);
            libc::close(null);
        }
    }
}

#[cfg(not(unix))]
fn redirect_fd_to_dev_null(_fd: i32) {}

pub fn number_of_cpu_cores() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

pub fn sleep_seconds(seconds: u64) {
    std::thread::sleep(std::time::Duration::from_secs(seconds));
}

/// Short hex digest used to name artifacts and corpus entries.
pub fn hash_unit(unit: &[u8]) -> String {
    blake3::hash(unit).to_hex().to_string()
}

/// Render a unit's printable bytes, escaping the rest, as dictionary tools
/// expect to display tokens.
pub fn ascii_repr(unit: &[u8]) -> String {
    let mut out = String::with_capacity(unit.len());
    for &b in unit {
        if (0x20..0x7f).contains(&b) && b != b'"' && b != b'\\' {
            out.push(b as char);
        } else {
            out.push_str(&format!("\\x{b:02X}"));
        }
    }
    out
}
