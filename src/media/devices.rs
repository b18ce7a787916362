use cpal::traits::{DeviceTrait, HostTrait};
use nokhwa::utils::{ApiBackend, CameraIndex};
use serde::Serialize;
use tracing::warn;

#[derive(Debug, Clone, Serialize)]
pub struct MediaDeviceInfo {
    pub id: String,
    pub label: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeviceCatalog {
    pub microphones: Vec<MediaDeviceInfo>,
    pub cameras: Vec<MediaDeviceInfo>,
}

/// Best-effort device listing. Backends that fail to enumerate leave their
/// section empty rather than failing the whole catalog.
pub fn enumerate() -> DeviceCatalog {
    let mut catalog = DeviceCatalog::default();

    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => {
            for info in cameras {
                catalog.cameras.push(MediaDeviceInfo {
                    id: info.index().to_string(),
                    label: info.human_name(),
                });
            }
        }
        Err(e) => warn!(error = %e, "camera enumeration failed"),
    }

    let host = cpal::default_host();
    match host.input_devices() {
        Ok(devices) => {
            for device in devices {
                match device.name() {
                    Ok(name) => catalog.microphones.push(MediaDeviceInfo {
                        id: name.clone(),
                        label: name,
                    }),
                    Err(e) => warn!(error = %e, "unnamed input device skipped"),
                }
            }
        }
        Err(e) => warn!(error = %e, "microphone enumeration failed"),
    }

    catalog
}

/// Camera ids are numeric indices on most platforms, opaque strings on the
/// rest; accept either form.
pub fn camera_index(device_id: &str) -> CameraIndex {
    device_id
        .parse::<u32>()
        .map(CameraIndex::Index)
        .unwrap_or_else(|_| CameraIndex::String(device_id.to_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_ids_parse_both_ways() {
        assert_eq!(camera_index("2"), CameraIndex::Index(2));
        assert_eq!(
            camera_index("usb-0000:00:14.0-1"),
            CameraIndex::String("usb-0000:00:14.0-1".into())
        );
    }
}
