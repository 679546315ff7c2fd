// Named shared memory regions backed by files under /dev/shm.
//
// The creator sizes and maps the file; other processes open it by name and
// map whatever length it has. Mappings are page aligned, which covers the
// 128-byte alignment the region layouts ask for.

use std::fmt::Debug;
use std::io;

pub const REGION_ALIGN: usize = 128;

/// A mapped shared memory region.
pub trait SharedMemoryBackend: Send + Sync + Debug {
    /// Start of the mapping.
    fn as_ptr(&self) -> *mut u8;

    /// Length of the mapping in bytes.
    fn size(&self) -> usize;

    /// Name the region was created or opened under.
    fn name(&self) -> &str;
}

/// Rounds `size` up to the region alignment.
pub fn align_region(size: usize) -> usize {
    (size + REGION_ALIGN - 1) & !(REGION_ALIGN - 1)
}

#[cfg(target_os = "linux")]
pub fn create_shared_memory(name: &str, size: usize) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Ok(Box::new(linux::LinuxSharedMemory::create(name, size)?))
}

#[cfg(target_os = "linux")]
pub fn open_shared_memory(name: &str) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Ok(Box::new(linux::LinuxSharedMemory::open(name)?))
}

/// Removes the name of a region. Existing mappings stay valid.
#[cfg(target_os = "linux")]
pub fn remove_shared_memory(name: &str) -> io::Result<()> {
    std::fs::remove_file(linux::region_path(name))
}

#[cfg(not(target_os = "linux"))]
pub fn create_shared_memory(_name: &str, _size: usize) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Err(unsupported())
}

#[cfg(not(target_os = "linux"))]
pub fn open_shared_memory(_name: &str) -> io::Result<Box<dyn SharedMemoryBackend>> {
    Err(unsupported())
}

#[cfg(not(target_os = "linux"))]
pub fn remove_shared_memory(_name: &str) -> io::Result<()> {
    Err(unsupported())
}

#[cfg(not(target_os = "linux"))]
fn unsupported() -> io::Error {
    io::Error::new(
        io::ErrorKind::Unsupported,
        "Shared memory only supported on Linux",
    )
}

#[cfg(target_os = "linux")]
mod linux {
    use super::{SharedMemoryBackend, REGION_ALIGN};
    use std::fs::{File, OpenOptions};
    use std::io;
    use std::os::fd::AsRawFd;
    use std::os::unix::fs::OpenOptionsExt;
    use std::ptr::{self, NonNull};

    pub(super) fn region_path(name: &str) -> String {
        format!("/dev/shm/{}", name)
    }

    #[derive(Debug)]
    pub struct LinuxSharedMemory {
        ptr: NonNull<u8>,
        size: usize,
        name: String,
        // Held so the descriptor lives as long as the mapping.
        _file: File,
    }

    unsafe impl Send for LinuxSharedMemory {}
    unsafe impl Sync for LinuxSharedMemory {}

    impl LinuxSharedMemory {
        /// Creates (or truncates) `/dev/shm/<name>` with `size` zeroed bytes.
        pub fn create(name: &str, size: usize) -> io::Result<Self> {
            if size == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "shared memory region must not be empty",
                ));
            }

            let path = region_path(name);
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .mode(0o600)
                .open(&path)
                .map_err(|e| {
                    io::Error::new(
                        e.kind(),
                        format!("Failed to create shared memory file at {}: {}", path, e),
                    )
                })?;
            file.set_len(size as u64)?;

            Self::map(file, name, size)
        }

        /// Maps an existing region over its full length.
        pub fn open(name: &str) -> io::Result<Self> {
            let path = region_path(name);
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .map_err(|e| {
                    io::Error::new(
                        e.kind(),
                        format!("Failed to open shared memory at {}: {}", path, e),
                    )
                })?;

            let size = file.metadata()?.len() as usize;
            if size == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("Shared memory at {} is empty", path),
                ));
            }

            Self::map(file, name, size)
        }

        fn map(file: File, name: &str, size: usize) -> io::Result<Self> {
            let raw = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    size,
                    libc::PROT_READ | libc::PROT_WRITE,
                    libc::MAP_SHARED,
                    file.as_raw_fd(),
                    0,
                )
            };
            if raw == libc::MAP_FAILED {
                return Err(io::Error::last_os_error());
            }

            let ptr = NonNull::new(raw as *mut u8)
                .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))?;
            if ptr.as_ptr() as usize % REGION_ALIGN != 0 {
                unsafe { libc::munmap(raw, size) };
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "Shared memory not properly aligned",
                ));
            }

            Ok(Self {
                ptr,
                size,
                name: name.to_string(),
                _file: file,
            })
        }
    }

    impl Drop for LinuxSharedMemory {
        fn drop(&mut self) {
            unsafe {
                libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.size);
            }
        }
    }

    impl SharedMemoryBackend for LinuxSharedMemory {
        fn as_ptr(&self) -> *mut u8 {
            self.ptr.as_ptr()
        }

        fn size(&self) -> usize {
            self.size
        }

        fn name(&self) -> &str {
            &self.name
        }
    }
}
