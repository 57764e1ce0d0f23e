//! SetupAPI view of present USB devices on Windows. Devices bound to
//! drivers libusb cannot open still show up here.
#![cfg_attr(not(target_os = "windows"), allow(dead_code))]

#[cfg(target_os = "windows")]
use windows::core::*;
#[cfg(target_os = "windows")]
use windows::Win32::Devices::DeviceAndDriverInstallation::*;
#[cfg(target_os = "windows")]
use windows::Win32::Foundation::*;

#[derive(Debug, Clone, PartialEq)]
pub struct SetupUsbDevice {
    pub vid: u16,
    pub pid: u16,
    pub instance_id: String,
}

impl SetupUsbDevice {
    pub fn from_instance_id(instance_id: &str) -> Option<Self> {
        if !instance_id.to_ascii_uppercase().starts_with("USB\\VID_") {
            return None;
        }
        let (vid, pid) = parse_vid_pid(instance_id)?;
        Some(SetupUsbDevice {
            vid,
            pid,
            instance_id: instance_id.to_string(),
        })
    }
}

#[cfg(target_os = "windows")]
pub fn list_usb_instances() -> Vec<SetupUsbDevice> {
    unsafe {
        let mut devices = Vec::new();

        let device_info_set = match SetupDiGetClassDevsW(
            None,
            w!("USB"),
            None,
            DIGCF_PRESENT | DIGCF_ALLCLASSES,
        ) {
            Ok(handle) => handle,
            Err(e) => {
                log::warn!("SetupDiGetClassDevsW failed: {}", e);
                return devices;
            }
        };

        let mut index = 0;
        loop {
            let mut device_info = SP_DEVINFO_DATA {
                cbSize: std::mem::size_of::<SP_DEVINFO_DATA>() as u32,
                ..Default::default()
            };

            match SetupDiEnumDeviceInfo(device_info_set, index, &mut device_info) {
                Ok(_) => (),
                Err(e) if e.code() == ERROR_NO_MORE_ITEMS.into() => break,
                Err(e) => {
                    log::debug!("SetupDiEnumDeviceInfo stopped at {}: {}", index, e);
                    break;
                }
            }
            index += 1;

            let mut buffer = [0u16; 512];
            let mut required_size = 0;
            if SetupDiGetDeviceInstanceIdW(
                device_info_set,
                &device_info,
                Some(&mut buffer),
                Some(&mut required_size),
            )
            .is_err()
                || required_size == 0
            {
                continue;
            }

            let instance_id = String::from_utf16_lossy(&buffer[..required_size as usize - 1]);
            if let Some(device) = SetupUsbDevice::from_instance_id(&instance_id) {
                devices.push(device);
            }
        }

        let _ = SetupDiDestroyDeviceInfoList(device_info_set);

        devices
    }
}

/// Extracts the hex IDs from `USB\VID_xxxx&PID_yyyy\...`.
fn parse_vid_pid(id: &str) -> Option<(u16, u16)> {
    let upper = id.to_ascii_uppercase();
    let vid_start = upper.find("VID_")? + 4;
    let pid_start = upper.find("PID_")? + 4;

    let vid = u16::from_str_radix(upper.get(vid_start..vid_start + 4)?, 16).ok()?;
    let pid = u16::from_str_radix(upper.get(pid_start..pid_start + 4)?, 16).ok()?;

    Some((vid, pid))
}
