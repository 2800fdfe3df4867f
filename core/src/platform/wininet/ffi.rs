use super::{ConnectionOptionStore, PerConnOption, PerConnSnapshot};
use anyhow::{anyhow, Result};
use std::ffi::{c_void, OsStr};
use std::io;
use std::os::windows::ffi::OsStrExt;
use std::ptr;
use windows_sys::Win32::Foundation::{GlobalFree, ERROR_NO_MORE_ITEMS, ERROR_SUCCESS};
use windows_sys::Win32::Networking::WinInet::{
    InternetQueryOptionW, InternetSetOptionW, INTERNET_PER_CONN_OPTIONW,
    INTERNET_PER_CONN_OPTIONW_0, INTERNET_PER_CONN_OPTION_LISTW,
};
use windows_sys::Win32::System::Registry::{
    RegCloseKey, RegEnumValueW, RegOpenKeyExW, HKEY, HKEY_CURRENT_USER, KEY_READ,
};

const INTERNET_OPTION_REFRESH: u32 = 37;
const INTERNET_OPTION_SETTINGS_CHANGED: u32 = 39;
const INTERNET_OPTION_PER_CONNECTION_OPTION: u32 = 75;

const INTERNET_PER_CONN_FLAGS: u32 = 1;
const INTERNET_PER_CONN_PROXY_SERVER: u32 = 2;
const INTERNET_PER_CONN_PROXY_BYPASS: u32 = 3;
const INTERNET_PER_CONN_AUTOCONFIG_URL: u32 = 4;

const CONNECTIONS_KEY: &str =
    r"Software\Microsoft\Windows\CurrentVersion\Internet Settings\Connections";

/// WinINet settings of the current user
#[derive(Debug, Clone, Copy, Default)]
pub struct WinInetStore;

impl WinInetStore {
    pub const fn new() -> Self {
        Self
    }
}

fn wide(value: &str) -> Vec<u16> {
    OsStr::new(value).encode_wide().chain(Some(0)).collect()
}

/// Read and free a WinINet-allocated wide string.
unsafe fn take_wide(ptr: *mut u16) -> String {
    if ptr.is_null() {
        return String::new();
    }
    let mut len = 0;
    while *ptr.add(len) != 0 {
        len += 1;
    }
    let value = String::from_utf16_lossy(std::slice::from_raw_parts(ptr, len));
    GlobalFree(ptr as _);
    value
}

fn list_for(
    connection: Option<&mut Vec<u16>>,
    options: &mut [INTERNET_PER_CONN_OPTIONW],
) -> INTERNET_PER_CONN_OPTION_LISTW {
    INTERNET_PER_CONN_OPTION_LISTW {
        dwSize: std::mem::size_of::<INTERNET_PER_CONN_OPTION_LISTW>() as u32,
        pszConnection: connection.map_or(ptr::null_mut(), |name| name.as_mut_ptr()),
        dwOptionCount: options.len() as u32,
        dwOptionError: 0,
        pOptions: options.as_mut_ptr(),
    }
}

impl ConnectionOptionStore for WinInetStore {
    fn connection_names(&self) -> Result<Vec<String>> {
        let path = wide(CONNECTIONS_KEY);
        // SAFETY: the key handle is closed before returning and every buffer
        // outlives the call that fills it.
        unsafe {
            let mut key: HKEY = std::mem::zeroed();
            let status = RegOpenKeyExW(HKEY_CURRENT_USER, path.as_ptr(), 0, KEY_READ, &mut key);
            if status != ERROR_SUCCESS {
                return Err(anyhow!(
                    "opening {CONNECTIONS_KEY} failed: {}",
                    io::Error::from_raw_os_error(status as i32)
                ));
            }

            let mut names = Vec::new();
            let mut buffer = vec![0u16; 16_384];
            let mut index = 0;
            loop {
                let mut len = buffer.len() as u32;
                let status = RegEnumValueW(
                    key,
                    index,
                    buffer.as_mut_ptr(),
                    &mut len,
                    ptr::null(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                    ptr::null_mut(),
                );
                if status == ERROR_NO_MORE_ITEMS {
                    break;
                }
                if status != ERROR_SUCCESS {
                    RegCloseKey(key);
                    return Err(anyhow!(
                        "enumerating connections failed: {}",
                        io::Error::from_raw_os_error(status as i32)
                    ));
                }
                names.push(String::from_utf16_lossy(&buffer[..len as usize]));
                index += 1;
            }
            RegCloseKey(key);
            Ok(names)
        }
    }

    fn apply(&self, connection: Option<&str>, options: &[PerConnOption]) -> Result<()> {
        let mut strings: Vec<Vec<u16>> = Vec::new();
        let mut raw: Vec<INTERNET_PER_CONN_OPTIONW> = Vec::with_capacity(options.len());
        for option in options {
            let (id, value) = match option {
                PerConnOption::Flags(flags) => (
                    INTERNET_PER_CONN_FLAGS,
                    INTERNET_PER_CONN_OPTIONW_0 { dwValue: *flags },
                ),
                PerConnOption::ProxyServer(text)
                | PerConnOption::ProxyBypass(text)
                | PerConnOption::AutoConfigUrl(text) => {
                    let id = match option {
                        PerConnOption::ProxyServer(_) => INTERNET_PER_CONN_PROXY_SERVER,
                        PerConnOption::ProxyBypass(_) => INTERNET_PER_CONN_PROXY_BYPASS,
                        _ => INTERNET_PER_CONN_AUTOCONFIG_URL,
                    };
                    strings.push(wide(text));
                    let text_ptr = strings.last_mut().map_or(ptr::null_mut(), |s| s.as_mut_ptr());
                    (id, INTERNET_PER_CONN_OPTIONW_0 { pszValue: text_ptr })
                }
            };
            raw.push(INTERNET_PER_CONN_OPTIONW {
                dwOption: id,
                Value: value,
            });
        }
        if raw.is_empty() {
            return Ok(());
        }

        let mut name = connection.map(wide);
        let mut list = list_for(name.as_mut(), &mut raw);
        // SAFETY: `list`, `raw`, `strings` and `name` stay alive for the call.
        let ok = unsafe {
            InternetSetOptionW(
                ptr::null(),
                INTERNET_OPTION_PER_CONNECTION_OPTION,
                &mut list as *mut _ as *const c_void,
                std::mem::size_of::<INTERNET_PER_CONN_OPTION_LISTW>() as u32,
            )
        };
        if ok == 0 {
            return Err(anyhow!(
                "InternetSetOptionW failed: {}",
                io::Error::last_os_error()
            ));
        }
        Ok(())
    }

    fn query(&self, connection: Option<&str>) -> Result<PerConnSnapshot> {
        let ids = [
            INTERNET_PER_CONN_FLAGS,
            INTERNET_PER_CONN_PROXY_SERVER,
            INTERNET_PER_CONN_PROXY_BYPASS,
            INTERNET_PER_CONN_AUTOCONFIG_URL,
        ];
        let mut raw: Vec<INTERNET_PER_CONN_OPTIONW> = ids
            .iter()
            .map(|id| INTERNET_PER_CONN_OPTIONW {
                dwOption: *id,
                Value: INTERNET_PER_CONN_OPTIONW_0 { dwValue: 0 },
            })
            .collect();
        let mut name = connection.map(wide);
        let mut list = list_for(name.as_mut(), &mut raw);
        let mut size = std::mem::size_of::<INTERNET_PER_CONN_OPTION_LISTW>() as u32;

        // SAFETY: WinINet fills `raw` in place; string values are copied and
        // freed by `take_wide`.
        unsafe {
            let ok = InternetQueryOptionW(
                ptr::null(),
                INTERNET_OPTION_PER_CONNECTION_OPTION,
                &mut list as *mut _ as *mut c_void,
                &mut size,
            );
            if ok == 0 {
                return Err(anyhow!(
                    "InternetQueryOptionW failed: {}",
                    io::Error::last_os_error()
                ));
            }
            Ok(PerConnSnapshot {
                flags: raw[0].Value.dwValue,
                proxy_server: take_wide(raw[1].Value.pszValue),
                proxy_bypass: take_wide(raw[2].Value.pszValue),
                autoconfig_url: take_wide(raw[3].Value.pszValue),
            })
        }
    }

    fn notify_changed(&self) -> Result<()> {
        for (option, name) in [
            (INTERNET_OPTION_SETTINGS_CHANGED, "SETTINGS_CHANGED"),
            (INTERNET_OPTION_REFRESH, "REFRESH"),
        ] {
            // SAFETY: neither option takes a buffer.
            let ok = unsafe { InternetSetOptionW(ptr::null(), option, ptr::null(), 0) };
            if ok == 0 {
                return Err(anyhow!(
                    "InternetSetOptionW({name}) failed: {}",
                    io::Error::last_os_error()
                ));
            }
        }
        Ok(())
    }
}
