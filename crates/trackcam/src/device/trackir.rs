//! NaturalPoint NPClient adapter.
//!
//! The client DLL is located through the registry, registered against a
//! hidden window, asked for every data field (mask 119) under the program
//! profile 13302, and then polled with `NP_GetData`.

#[cfg(target_os = "windows")]
pub use windows_impl::{NpClient, find_npclient_dll};

#[cfg(not(target_os = "windows"))]
pub use fallback::{NpClient, find_npclient_dll};

/// Data fields requested from the device (rotation and translation).
pub const DATA_FIELDS: u16 = 119;
/// Program profile ID registered with the tracking software.
pub const PROFILE_ID: u16 = 13302;

#[cfg(target_os = "windows")]
mod windows_impl {
    use std::path::PathBuf;

    use tracing::{debug, info, warn};
    use windows::Win32::Foundation::{FreeLibrary, HINSTANCE, HMODULE, HWND};
    use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};
    use windows::Win32::System::Registry::{HKEY_CURRENT_USER, RRF_RT_REG_SZ, RegGetValueW};
    use windows::Win32::UI::WindowsAndMessaging::{
        CreateWindowExW, DestroyWindow, HMENU, WINDOW_EX_STYLE, WINDOW_STYLE,
    };
    use windows::core::{HSTRING, PCSTR, s, w};

    use super::{DATA_FIELDS, PROFILE_ID};
    use crate::device::{PoseSample, PoseSource};
    use crate::error::{Error, Result};

    const NP_OK: i32 = 0;

    #[repr(C, packed)]
    #[derive(Default, Clone, Copy)]
    #[allow(dead_code)]
    struct TrackIrData {
        status: u16,
        frame: u16,
        io_data: u32,
        roll: f32,
        pitch: f32,
        yaw: f32,
        x: f32,
        y: f32,
        z: f32,
    }

    type RegisterWindowHandleFn = unsafe extern "system" fn(HWND) -> i32;
    type NoArgFn = unsafe extern "system" fn() -> i32;
    type U16ArgFn = unsafe extern "system" fn(u16) -> i32;
    type GetDataFn = unsafe extern "system" fn(*mut TrackIrData) -> i32;

    struct Api {
        register_window_handle: RegisterWindowHandleFn,
        unregister_window_handle: NoArgFn,
        request_data: U16ArgFn,
        register_profile_id: U16ArgFn,
        start_transmission: NoArgFn,
        stop_transmission: NoArgFn,
        get_data: GetDataFn,
    }

    /// Loaded NPClient64.dll plus the hidden window it reports to.
    pub struct NpClient {
        module: HMODULE,
        window: HWND,
        api: Api,
        running: bool,
    }

    /// Resolve `NPClient64.dll` from the NaturalPoint registry key.
    pub fn find_npclient_dll() -> Result<PathBuf> {
        let subkey = HSTRING::from(r"Software\NaturalPoint\NATURALPOINT\NPClient Location");
        let value_name = HSTRING::from("Path");

        let mut size: u32 = 0;
        // SAFETY: RegGetValueW with no buffer only reports the required size.
        unsafe {
            RegGetValueW(
                HKEY_CURRENT_USER,
                &subkey,
                &value_name,
                RRF_RT_REG_SZ,
                None,
                None,
                Some(&mut size),
            )
            .ok()
            .map_err(|e| Error::DeviceUnavailable(format!("NPClient location not registered: {e}")))?;
        }

        let mut buffer = vec![0u16; (size as usize) / 2];
        // SAFETY: buffer holds `size` bytes.
        unsafe {
            RegGetValueW(
                HKEY_CURRENT_USER,
                &subkey,
                &value_name,
                RRF_RT_REG_SZ,
                None,
                Some(buffer.as_mut_ptr().cast()),
                Some(&mut size),
            )
            .ok()
            .map_err(|e| Error::DeviceUnavailable(format!("Failed to read NPClient location: {e}")))?;
        }

        while buffer.last() == Some(&0) {
            buffer.pop();
        }
        let dir = String::from_utf16(&buffer)
            .map_err(|e| Error::DeviceUnavailable(format!("Invalid NPClient path: {e}")))?;
        Ok(PathBuf::from(dir).join("NPClient64.dll"))
    }

    fn proc_address(module: HMODULE, name: PCSTR) -> Result<unsafe extern "system" fn() -> isize> {
        // SAFETY: module is a loaded library and name is a static C string.
        unsafe { GetProcAddress(module, name) }.ok_or_else(|| {
            // SAFETY: name came from the s! macro and is NUL-terminated.
            let name = unsafe { name.to_string() }.unwrap_or_default();
            Error::DeviceUnavailable(format!("NPClient export {name} missing"))
        })
    }

    impl NpClient {
        pub fn load() -> Result<Self> {
            let path = find_npclient_dll()?;
            debug!("Loading {}", path.display());

            // SAFETY: loading a library runs its initialisation code; the path
            // comes from the vendor's own registry key.
            let module = unsafe { LoadLibraryW(&HSTRING::from(path.as_os_str())) }
                .map_err(|e| Error::DeviceUnavailable(format!("{}: {e}", path.display())))?;

            let api = match Self::resolve(module) {
                Ok(api) => api,
                Err(e) => {
                    // SAFETY: module was loaded above and is not used again.
                    let _ = unsafe { FreeLibrary(module) };
                    return Err(e);
                }
            };

            // SAFETY: a plain hidden STATIC window with no parent or menu.
            let window = unsafe {
                CreateWindowExW(
                    WINDOW_EX_STYLE::default(),
                    w!("STATIC"),
                    w!("trackcam"),
                    WINDOW_STYLE::default(),
                    0,
                    0,
                    0,
                    0,
                    HWND::default(),
                    HMENU::default(),
                    HINSTANCE::default(),
                    None,
                )
            };
            let window = match window {
                Ok(window) => window,
                Err(e) => {
                    // SAFETY: as above.
                    let _ = unsafe { FreeLibrary(module) };
                    return Err(Error::DeviceUnavailable(format!("Failed to create window: {e}")));
                }
            };

            info!("TrackIR client loaded");
            Ok(Self {
                module,
                window,
                api,
                running: false,
            })
        }

        fn resolve(module: HMODULE) -> Result<Api> {
            // SAFETY: each export has the documented NPClient signature.
            unsafe {
                Ok(Api {
                    register_window_handle: std::mem::transmute::<_, RegisterWindowHandleFn>(
                        proc_address(module, s!("NP_RegisterWindowHandle"))?,
                    ),
                    unregister_window_handle: std::mem::transmute::<_, NoArgFn>(proc_address(
                        module,
                        s!("NP_UnregisterWindowHandle"),
                    )?),
                    request_data: std::mem::transmute::<_, U16ArgFn>(proc_address(
                        module,
                        s!("NP_RequestData"),
                    )?),
                    register_profile_id: std::mem::transmute::<_, U16ArgFn>(proc_address(
                        module,
                        s!("NP_RegisterProgramProfileID"),
                    )?),
                    start_transmission: std::mem::transmute::<_, NoArgFn>(proc_address(
                        module,
                        s!("NP_StartDataTransmission"),
                    )?),
                    stop_transmission: std::mem::transmute::<_, NoArgFn>(proc_address(
                        module,
                        s!("NP_StopDataTransmission"),
                    )?),
                    get_data: std::mem::transmute::<_, GetDataFn>(proc_address(
                        module,
                        s!("NP_GetData"),
                    )?),
                })
            }
        }

        fn check(step: &str, code: i32) -> Result<()> {
            if code == NP_OK {
                Ok(())
            } else {
                Err(Error::DeviceUnavailable(format!("{step} failed (code {code})")))
            }
        }
    }

    impl PoseSource for NpClient {
        fn start(&mut self) -> Result<()> {
            if self.running {
                return Ok(());
            }
            // SAFETY: function pointers were resolved from the loaded module.
            unsafe {
                Self::check(
                    "NP_RegisterWindowHandle",
                    (self.api.register_window_handle)(self.window),
                )?;
                Self::check("NP_RequestData", (self.api.request_data)(DATA_FIELDS))?;
                Self::check(
                    "NP_RegisterProgramProfileID",
                    (self.api.register_profile_id)(PROFILE_ID),
                )?;
                Self::check(
                    "NP_StartDataTransmission",
                    (self.api.start_transmission)(),
                )?;
            }
            self.running = true;
            info!("TrackIR started");
            Ok(())
        }

        fn latest(&mut self) -> Option<PoseSample> {
            if !self.running {
                return None;
            }
            let mut data = TrackIrData::default();
            // SAFETY: data is a valid, packed out buffer.
            let code = unsafe { (self.api.get_data)(&mut data) };
            if code != NP_OK {
                return None;
            }
            Some(PoseSample {
                yaw: data.yaw,
                pitch: data.pitch,
                roll: data.roll,
                x: data.x,
                y: data.y,
                z: data.z,
                frame: data.frame,
            })
        }

        fn stop(&mut self) {
            if !self.running {
                return;
            }
            // SAFETY: transmission was started by this client.
            unsafe {
                if let Err(e) = Self::check("NP_StopDataTransmission", (self.api.stop_transmission)()) {
                    warn!("{}", e);
                }
                if let Err(e) = Self::check(
                    "NP_UnregisterWindowHandle",
                    (self.api.unregister_window_handle)(),
                ) {
                    warn!("{}", e);
                }
            }
            self.running = false;
            info!("TrackIR stopped");
        }
    }

    impl Drop for NpClient {
        fn drop(&mut self) {
            self.stop();
            // SAFETY: window and module are owned by this client.
            unsafe {
                let _ = DestroyWindow(self.window);
                let _ = FreeLibrary(self.module);
            }
        }
    }
}

#[cfg(not(target_os = "windows"))]
mod fallback {
    use std::path::PathBuf;

    use crate::device::{PoseSample, PoseSource};
    use crate::error::{Error, Result};

    /// Placeholder; the NPClient SDK is Windows-only.
    #[derive(Debug)]
    pub struct NpClient {
        _private: (),
    }

    pub fn find_npclient_dll() -> Result<PathBuf> {
        Err(Error::Unsupported("TrackIR access"))
    }

    impl NpClient {
        pub fn load() -> Result<Self> {
            Err(Error::Unsupported("TrackIR access"))
        }
    }

    impl PoseSource for NpClient {
        fn start(&mut self) -> Result<()> {
            Err(Error::Unsupported("TrackIR access"))
        }

        fn latest(&mut self) -> Option<PoseSample> {
            None
        }

        fn stop(&mut self) {}
    }
}
