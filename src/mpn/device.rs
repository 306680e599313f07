/******************************************************************************
   Author: Joaquín Béjar García
   Email: jb@taunais.com
   Date: 17/10/26
******************************************************************************/

use crate::mpn::MpnDeviceListener;
use crate::utils::IllegalArgumentException;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

pub(crate) type SharedDeviceListener = Arc<Mutex<Box<dyn MpnDeviceListener>>>;

/// Push notification service a device belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MpnPlatform {
    Apple,
    Google,
}

impl fmt::Display for MpnPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MpnPlatform::Apple => write!(f, "Apple"),
            MpnPlatform::Google => write!(f, "Google"),
        }
    }
}

/// Registration status of a device as reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MpnDeviceStatus {
    Unknown,
    Registered,
    Suspended,
}

impl fmt::Display for MpnDeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MpnDeviceStatus::Unknown => write!(f, "UNKNOWN"),
            MpnDeviceStatus::Registered => write!(f, "REGISTERED"),
            MpnDeviceStatus::Suspended => write!(f, "SUSPENDED"),
        }
    }
}

struct DeviceData {
    platform: MpnPlatform,
    application_id: String,
    device_token: String,
    previous_device_token: Option<String>,
    device_id: Option<String>,
    adapter_name: Option<String>,
    status: MpnDeviceStatus,
    status_timestamp: u64,
    listeners: Vec<SharedDeviceListener>,
}

/// A mobile device able to receive push notifications.
///
/// Like [`Subscription`](crate::subscription::Subscription), this is a shared handle:
/// clones observe the same registration state.
#[derive(Clone)]
pub struct MpnDevice {
    data: Arc<Mutex<DeviceData>>,
}

impl MpnDevice {
    pub fn new(
        device_token: &str,
        application_id: &str,
        platform: MpnPlatform,
    ) -> Result<Self, IllegalArgumentException> {
        if device_token.is_empty() {
            return Err(IllegalArgumentException::new("Device token cannot be empty"));
        }
        if application_id.is_empty() {
            return Err(IllegalArgumentException::new("Application id cannot be empty"));
        }
        Ok(Self {
            data: Arc::new(Mutex::new(DeviceData {
                platform,
                application_id: application_id.to_string(),
                device_token: device_token.to_string(),
                previous_device_token: None,
                device_id: None,
                adapter_name: None,
                status: MpnDeviceStatus::Unknown,
                status_timestamp: 0,
                listeners: Vec::new(),
            })),
        })
    }

    pub fn add_listener(&self, mut listener: Box<dyn MpnDeviceListener>) {
        listener.on_listen_start();
        self.data.lock().listeners.push(Arc::new(Mutex::new(listener)));
    }

    pub fn remove_listeners(&self) {
        let removed = std::mem::take(&mut self.data.lock().listeners);
        for listener in removed {
            listener.lock().on_listen_end();
        }
    }

    pub fn get_platform(&self) -> MpnPlatform {
        self.data.lock().platform
    }

    pub fn get_application_id(&self) -> String {
        self.data.lock().application_id.clone()
    }

    pub fn get_device_token(&self) -> String {
        self.data.lock().device_token.clone()
    }

    /// Replaces the device token, e.g. after the push service rotated it. A registered
    /// device is refreshed on the server by calling `register_for_mpn` again.
    pub fn set_device_token(&self, token: &str) -> Result<(), IllegalArgumentException> {
        if token.is_empty() {
            return Err(IllegalArgumentException::new("Device token cannot be empty"));
        }
        let mut data = self.data.lock();
        if data.device_token != token {
            let previous = std::mem::replace(&mut data.device_token, token.to_string());
            data.previous_device_token = Some(previous);
        }
        Ok(())
    }

    pub fn get_previous_device_token(&self) -> Option<String> {
        self.data.lock().previous_device_token.clone()
    }

    /// Server-assigned identifier, known once registered.
    pub fn get_device_id(&self) -> Option<String> {
        self.data.lock().device_id.clone()
    }

    pub fn get_adapter_name(&self) -> Option<String> {
        self.data.lock().adapter_name.clone()
    }

    pub fn get_status(&self) -> MpnDeviceStatus {
        self.data.lock().status
    }

    pub fn get_status_timestamp(&self) -> u64 {
        self.data.lock().status_timestamp
    }

    pub fn is_registered(&self) -> bool {
        self.data.lock().status != MpnDeviceStatus::Unknown
    }

    pub fn is_suspended(&self) -> bool {
        self.data.lock().status == MpnDeviceStatus::Suspended
    }

    pub(crate) fn listeners(&self) -> Vec<SharedDeviceListener> {
        self.data.lock().listeners.clone()
    }

    pub(crate) fn set_registered(&self, device_id: &str, adapter_name: &str) {
        let mut data = self.data.lock();
        data.device_id = Some(device_id.to_string());
        data.adapter_name = Some(adapter_name.to_string());
        data.previous_device_token = None;
        if data.status == MpnDeviceStatus::Unknown {
            data.status = MpnDeviceStatus::Registered;
        }
    }

    /// Stores a status update and returns the previous status.
    pub(crate) fn set_status(&self, status: MpnDeviceStatus, timestamp: u64) -> MpnDeviceStatus {
        let mut data = self.data.lock();
        data.status_timestamp = timestamp;
        std::mem::replace(&mut data.status, status)
    }

    pub(crate) fn reset(&self) {
        let mut data = self.data.lock();
        data.device_id = None;
        data.adapter_name = None;
        data.status = MpnDeviceStatus::Unknown;
        data.status_timestamp = 0;
    }

    pub(crate) fn same_device(&self, other: &MpnDevice) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Debug for MpnDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.data.lock();
        f.debug_struct("MpnDevice")
            .field("platform", &data.platform)
            .field("application_id", &data.application_id)
            .field("device_id", &data.device_id)
            .field("status", &data.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_validates() {
        assert!(MpnDevice::new("", "app", MpnPlatform::Google).is_err());
        assert!(MpnDevice::new("tok", "", MpnPlatform::Apple).is_err());
        let device = MpnDevice::new("tok", "com.example", MpnPlatform::Apple).unwrap();
        assert_eq!(device.get_platform().to_string(), "Apple");
        assert!(!device.is_registered());
        assert_eq!(device.get_device_id(), None);
    }

    #[test]
    fn test_token_rotation_keeps_previous() {
        let device = MpnDevice::new("tok1", "app", MpnPlatform::Google).unwrap();
        device.set_device_token("tok1").unwrap();
        assert_eq!(device.get_previous_device_token(), None);
        device.set_device_token("tok2").unwrap();
        assert_eq!(device.get_device_token(), "tok2");
        assert_eq!(device.get_previous_device_token().as_deref(), Some("tok1"));
        device.set_registered("dev-1", "MPN");
        assert_eq!(device.get_previous_device_token(), None);
        assert!(device.is_registered());
    }

    #[test]
    fn test_status_updates() {
        let device = MpnDevice::new("tok", "app", MpnPlatform::Google).unwrap();
        device.set_registered("dev-1", "MPN");
        assert_eq!(
            device.set_status(MpnDeviceStatus::Suspended, 1000),
            MpnDeviceStatus::Registered
        );
        assert!(device.is_suspended());
        assert_eq!(device.get_status_timestamp(), 1000);
        device.reset();
        assert_eq!(device.get_status(), MpnDeviceStatus::Unknown);
    }
}
