use crate::error::{Error, Result};
use crate::memory::{MemoryRegion, QueryRegions, ReadMemory, WriteMemory};

/// A live process the workers attach to.
pub trait TargetProcess: ReadMemory + WriteMemory + QueryRegions {
    fn pid(&self) -> u32;

    fn is_alive(&self) -> bool;
}

impl<T: TargetProcess + ?Sized> TargetProcess for &T {
    fn pid(&self) -> u32 {
        (**self).pid()
    }

    fn is_alive(&self) -> bool {
        (**self).is_alive()
    }
}

#[cfg(target_os = "windows")]
pub use windows_impl::{ProcessHandle, find_process_id, is_elevated};

#[cfg(not(target_os = "windows"))]
pub use fallback::{ProcessHandle, find_process_id, is_elevated};

#[cfg(target_os = "windows")]
mod windows_impl {
    use std::ffi::c_void;
    use std::mem::size_of;

    use tracing::{debug, warn};
    use windows::Win32::Foundation::{
        BOOL, CloseHandle, ERROR_INVALID_PARAMETER, FALSE, GetLastError, HANDLE,
    };
    use windows::Win32::Security::{GetTokenInformation, TOKEN_ELEVATION, TOKEN_QUERY, TokenElevation};
    use windows::Win32::System::Diagnostics::Debug::{ReadProcessMemory, WriteProcessMemory};
    use windows::Win32::System::Diagnostics::ToolHelp::{
        CreateToolhelp32Snapshot, PROCESSENTRY32W, Process32FirstW, Process32NextW,
        TH32CS_SNAPPROCESS,
    };
    use windows::Win32::System::Memory::{MEMORY_BASIC_INFORMATION, VirtualQueryEx};
    use windows::Win32::System::Threading::{
        GetCurrentProcess, GetExitCodeProcess, IsWow64Process, OpenProcess, OpenProcessToken,
        PROCESS_QUERY_INFORMATION, PROCESS_VM_OPERATION, PROCESS_VM_READ, PROCESS_VM_WRITE,
    };

    use super::*;
    use crate::memory::{MAX_ADDRESS_32, MAX_ADDRESS_64, RegionKind, RegionState};

    const STILL_ACTIVE: u32 = 259;

    /// Open handle to a target process with read, write and query access.
    pub struct ProcessHandle {
        pid: u32,
        handle: HANDLE,
        is_64bit: bool,
    }

    impl ProcessHandle {
        pub fn open(pid: u32) -> Result<Self> {
            // SAFETY: OpenProcess has no memory-safety preconditions.
            let handle = unsafe {
                OpenProcess(
                    PROCESS_QUERY_INFORMATION
                        | PROCESS_VM_OPERATION
                        | PROCESS_VM_READ
                        | PROCESS_VM_WRITE,
                    FALSE,
                    pid,
                )
            }
            .map_err(|e| Error::ProcessOpenFailed(format!("pid {pid}: {e}")))?;

            let mut wow64 = BOOL::default();
            // SAFETY: handle is valid and wow64 is a valid out pointer.
            let is_64bit = match unsafe { IsWow64Process(handle, &mut wow64) } {
                Ok(()) => !wow64.as_bool(),
                Err(e) => {
                    warn!("IsWow64Process failed for pid {}: {}, assuming 64-bit", pid, e);
                    true
                }
            };

            debug!("Opened process {} ({}-bit)", pid, if is_64bit { 64 } else { 32 });
            Ok(Self {
                pid,
                handle,
                is_64bit,
            })
        }

        /// Locate a process by executable name and open it.
        pub fn find_and_open(name: &str) -> Result<Self> {
            let pid = find_process_id(name)?;
            Self::open(pid)
        }

        pub fn is_64bit(&self) -> bool {
            self.is_64bit
        }
    }

    impl TargetProcess for ProcessHandle {
        fn pid(&self) -> u32 {
            self.pid
        }

        fn is_alive(&self) -> bool {
            let mut code = 0u32;
            // SAFETY: handle is valid for the lifetime of self.
            match unsafe { GetExitCodeProcess(self.handle, &mut code) } {
                Ok(()) => code == STILL_ACTIVE,
                Err(_) => false,
            }
        }
    }

    impl ReadMemory for ProcessHandle {
        fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
            let mut buffer = vec![0u8; size];
            let mut read = 0usize;
            // SAFETY: buffer has `size` writable bytes; the target address is
            // validated by the OS.
            unsafe {
                ReadProcessMemory(
                    self.handle,
                    address as *const c_void,
                    buffer.as_mut_ptr() as *mut c_void,
                    size,
                    Some(&mut read),
                )
            }
            .map_err(|e| Error::MemoryReadFailed {
                address,
                message: e.to_string(),
            })?;

            if read != size {
                return Err(Error::MemoryReadFailed {
                    address,
                    message: format!("partial read: {read} of {size} bytes"),
                });
            }
            Ok(buffer)
        }
    }

    impl WriteMemory for ProcessHandle {
        fn write_bytes(&self, address: u64, bytes: &[u8]) -> Result<()> {
            let mut written = 0usize;
            // SAFETY: bytes is a valid readable slice for its length.
            unsafe {
                WriteProcessMemory(
                    self.handle,
                    address as *const c_void,
                    bytes.as_ptr() as *const c_void,
                    bytes.len(),
                    Some(&mut written),
                )
            }
            .map_err(|e| Error::MemoryWriteFailed {
                address,
                message: e.to_string(),
            })?;

            if written != bytes.len() {
                return Err(Error::MemoryWriteFailed {
                    address,
                    message: format!("partial write: {written} of {} bytes", bytes.len()),
                });
            }
            Ok(())
        }
    }

    impl QueryRegions for ProcessHandle {
        fn query_region(&self, address: u64) -> Result<Option<MemoryRegion>> {
            let mut info = MEMORY_BASIC_INFORMATION::default();
            // SAFETY: info is a valid out buffer of the size passed.
            let written = unsafe {
                VirtualQueryEx(
                    self.handle,
                    Some(address as *const c_void),
                    &mut info,
                    size_of::<MEMORY_BASIC_INFORMATION>(),
                )
            };

            if written == 0 {
                // SAFETY: reads thread-local error state.
                let last = unsafe { GetLastError() };
                if last == ERROR_INVALID_PARAMETER {
                    return Ok(None);
                }
                return Err(Error::RegionQueryFailed {
                    address,
                    message: format!("VirtualQueryEx failed with error {}", last.0),
                });
            }

            Ok(Some(MemoryRegion {
                base_address: info.BaseAddress as u64,
                size: info.RegionSize as u64,
                state: RegionState::from_raw(info.State.0),
                protection: info.Protect.0,
                kind: RegionKind::from_raw(info.Type.0),
            }))
        }

        fn max_address(&self) -> u64 {
            if self.is_64bit {
                MAX_ADDRESS_64
            } else {
                MAX_ADDRESS_32
            }
        }
    }

    impl Drop for ProcessHandle {
        fn drop(&mut self) {
            // SAFETY: handle was returned by OpenProcess and is closed once.
            if let Err(e) = unsafe { CloseHandle(self.handle) } {
                warn!("Failed to close process handle for pid {}: {}", self.pid, e);
            }
        }
    }

    /// Find the first process whose executable name matches `name` (case-insensitive).
    pub fn find_process_id(name: &str) -> Result<u32> {
        // SAFETY: snapshot handle is closed below on every path.
        let snapshot = unsafe { CreateToolhelp32Snapshot(TH32CS_SNAPPROCESS, 0) }
            .map_err(|e| Error::ProcessNotFound(format!("{name}: snapshot failed: {e}")))?;

        let mut entry = PROCESSENTRY32W {
            dwSize: size_of::<PROCESSENTRY32W>() as u32,
            ..Default::default()
        };

        let mut found = None;
        // SAFETY: entry.dwSize is initialised as required.
        let mut ok = unsafe { Process32FirstW(snapshot, &mut entry) }.is_ok();
        while ok {
            let len = entry
                .szExeFile
                .iter()
                .position(|&c| c == 0)
                .unwrap_or(entry.szExeFile.len());
            let exe = String::from_utf16_lossy(&entry.szExeFile[..len]);
            if exe.eq_ignore_ascii_case(name) {
                found = Some(entry.th32ProcessID);
                break;
            }
            // SAFETY: same snapshot and entry as above.
            ok = unsafe { Process32NextW(snapshot, &mut entry) }.is_ok();
        }

        // SAFETY: snapshot came from CreateToolhelp32Snapshot.
        let _ = unsafe { CloseHandle(snapshot) };
        found.ok_or_else(|| Error::ProcessNotFound(name.to_string()))
    }

    /// Whether the current process runs with an elevated token.
    pub fn is_elevated() -> Result<bool> {
        let mut token = HANDLE::default();
        // SAFETY: GetCurrentProcess returns a pseudo handle; token is an out pointer.
        unsafe { OpenProcessToken(GetCurrentProcess(), TOKEN_QUERY, &mut token) }
            .map_err(|e| Error::InsufficientPrivilege(format!("cannot open process token: {e}")))?;

        let mut elevation = TOKEN_ELEVATION::default();
        let mut returned = 0u32;
        // SAFETY: elevation is a valid buffer of the reported size.
        let result = unsafe {
            GetTokenInformation(
                token,
                TokenElevation,
                Some(&mut elevation as *mut TOKEN_ELEVATION as *mut c_void),
                size_of::<TOKEN_ELEVATION>() as u32,
                &mut returned,
            )
        };
        // SAFETY: token was opened above.
        let _ = unsafe { CloseHandle(token) };

        result.map_err(|e| {
            Error::InsufficientPrivilege(format!("cannot query token elevation: {e}"))
        })?;
        Ok(elevation.TokenIsElevated != 0)
    }
}

#[cfg(not(target_os = "windows"))]
mod fallback {
    use super::*;

    /// Placeholder handle; live process access needs Windows.
    #[derive(Debug)]
    pub struct ProcessHandle {
        pid: u32,
    }

    impl ProcessHandle {
        pub fn open(_pid: u32) -> Result<Self> {
            Err(Error::Unsupported("Process access"))
        }

        pub fn find_and_open(_name: &str) -> Result<Self> {
            Err(Error::Unsupported("Process access"))
        }

        pub fn is_64bit(&self) -> bool {
            true
        }
    }

    impl TargetProcess for ProcessHandle {
        fn pid(&self) -> u32 {
            self.pid
        }

        fn is_alive(&self) -> bool {
            false
        }
    }

    impl ReadMemory for ProcessHandle {
        fn read_bytes(&self, _address: u64, _size: usize) -> Result<Vec<u8>> {
            Err(Error::Unsupported("Process memory reads"))
        }
    }

    impl WriteMemory for ProcessHandle {
        fn write_bytes(&self, _address: u64, _bytes: &[u8]) -> Result<()> {
            Err(Error::Unsupported("Process memory writes"))
        }
    }

    impl QueryRegions for ProcessHandle {
        fn query_region(&self, _address: u64) -> Result<Option<MemoryRegion>> {
            Err(Error::Unsupported("Memory region queries"))
        }

        fn max_address(&self) -> u64 {
            crate::memory::MAX_ADDRESS_64
        }
    }

    pub fn find_process_id(_name: &str) -> Result<u32> {
        Err(Error::Unsupported("Process lookup"))
    }

    pub fn is_elevated() -> Result<bool> {
        Err(Error::Unsupported("Elevation check"))
    }
}
