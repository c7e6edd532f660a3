//! Raw device discovery
//!
//! Enumerates MTP devices on the bus without opening them. The resulting
//! [`RawDeviceDescriptor`]s are what [`super::Session::connect`] opens.

use libc::c_int;
use log::{debug, info, warn};
use serde::Serialize;
use std::ptr;

use super::adapter::{copy_raw_devices, AdapterLimits};
use super::engine::MtpEngine;
use super::types::RawDeviceDescriptor;
use crate::core::error::{ErrorCode, MtpError, Result};

/// Outcome of a discovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetectedDevices {
    pub devices: Vec<RawDeviceDescriptor>,
    /// The engine also reported a full storage while enumerating
    pub storage_full: bool,
}

impl DetectedDevices {
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }
}

/// Enumerate the raw MTP devices currently attached.
///
/// - no device attached is an empty result, not an error
/// - a full storage is reported in [`DetectedDevices::storage_full`] and the
///   devices are still returned
/// - any other non-success status fails with that status
///
/// Exactly `count` entries of the engine's array are copied, and the array
/// is released on every path once the engine returned one.
pub fn detect_devices<E>(engine: &E, limits: &AdapterLimits) -> Result<DetectedDevices>
where
    E: MtpEngine + ?Sized,
{
    engine.initialize();

    let mut raw_devices = ptr::null_mut();
    let mut count: c_int = 0;
    let status = ErrorCode::from_raw(engine.detect_raw_devices(&mut raw_devices, &mut count));
    debug!("Raw device detection returned {} ({} device(s))", status, count);

    let storage_full = match status {
        ErrorCode::Success => false,
        ErrorCode::StorageFull => {
            warn!("Device engine reported a full storage during discovery");
            true
        }
        ErrorCode::NoDeviceAttached => {
            // SAFETY: the array (if any) came from this engine's detect call.
            if !raw_devices.is_null() {
                unsafe { engine.free_raw_devices(raw_devices) };
            }
            info!("No MTP devices attached");
            return Ok(DetectedDevices::default());
        }
        other => {
            if !raw_devices.is_null() {
                // SAFETY: as above.
                unsafe { engine.free_raw_devices(raw_devices) };
            }
            return Err(MtpError::from_status(other));
        }
    };

    // SAFETY: the engine reported `count` records at `raw_devices`.
    let copied = unsafe { copy_raw_devices(raw_devices, count, limits) };
    if !raw_devices.is_null() {
        // SAFETY: copied out above; released exactly once.
        unsafe { engine.free_raw_devices(raw_devices) };
    }
    let devices = copied?;

    for device in &devices {
        debug!(
            "Found {} ({:04x}:{:04x}) at bus {} device {}",
            device.display_name(),
            device.vendor_id,
            device.product_id,
            device.bus_location,
            device.device_number
        );
    }
    info!("Detected {} MTP device(s)", devices.len());

    Ok(DetectedDevices {
        devices,
        storage_full,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testdb::{MockDevice, MockEngine};

    #[test]
    fn test_no_device_attached_is_empty_success() {
        let engine = MockEngine::new();
        engine.set_detect_status(ErrorCode::NoDeviceAttached);

        let detected = detect_devices(&engine, &AdapterLimits::default()).unwrap();
        assert!(detected.is_empty());
        assert!(!detected.storage_full);
        assert_eq!(engine.live_allocations(), 0);
    }

    #[test]
    fn test_devices_are_copied_and_array_freed() {
        let engine = MockEngine::new();
        engine.add_device(MockDevice::new("Google", "Pixel 8").at(1, 5));
        engine.add_device(MockDevice::new("Samsung", "Galaxy S23").at(2, 3));

        let detected = detect_devices(&engine, &AdapterLimits::default()).unwrap();
        assert_eq!(detected.len(), 2);
        assert_eq!(detected.devices[0].vendor.as_deref(), Some("Google"));
        assert_eq!(detected.devices[0].id(), "mtp-1-5");
        assert_eq!(detected.devices[1].product.as_deref(), Some("Galaxy S23"));
        assert_eq!(engine.calls("initialize"), 1);
        assert_eq!(engine.calls("free_raw_devices"), 1);
        assert_eq!(engine.live_allocations(), 0);
    }

    #[test]
    fn test_only_count_entries_are_read() {
        let engine = MockEngine::new();
        engine.add_device(MockDevice::new("Google", "Pixel 8"));
        engine.add_device(MockDevice::new("Google", "Pixel 7"));
        engine.set_raw_device_padding(3);

        let detected = detect_devices(&engine, &AdapterLimits::default()).unwrap();
        assert_eq!(detected.len(), 2);
        assert_eq!(engine.live_allocations(), 0);
    }

    #[test]
    fn test_storage_full_is_not_fatal() {
        let engine = MockEngine::new();
        engine.add_device(MockDevice::new("Garmin", "Forerunner"));
        engine.set_detect_status(ErrorCode::StorageFull);

        let detected = detect_devices(&engine, &AdapterLimits::default()).unwrap();
        assert!(detected.storage_full);
        assert_eq!(detected.len(), 1);
    }

    #[test]
    fn test_other_statuses_fail_and_free() {
        let engine = MockEngine::new();
        engine.add_device(MockDevice::new("Google", "Pixel 8"));

        for code in [
            ErrorCode::AlreadyConnecting,
            ErrorCode::GeneralFailure,
            ErrorCode::ProtocolLayerFailure,
            ErrorCode::TransportLayerFailure,
            ErrorCode::OutOfMemory,
            ErrorCode::Cancelled,
        ] {
            engine.set_detect_status(code);
            match detect_devices(&engine, &AdapterLimits::default()) {
                Err(MtpError::Engine(reported)) => assert_eq!(reported, code),
                other => panic!("{:?} gave {:?}", code, other),
            }
            assert_eq!(engine.live_allocations(), 0, "{:?}", code);
        }

        engine.set_detect_status(ErrorCode::TransportLayerFailure);
        assert!(detect_devices(&engine, &AdapterLimits::default())
            .unwrap_err()
            .is_transient());

        engine.set_detect_status(ErrorCode::UnknownCode(99));
        let err = detect_devices(&engine, &AdapterLimits::default()).unwrap_err();
        assert!(matches!(err, MtpError::UnknownCode(99)));

        assert_eq!(engine.live_allocations(), 0);
    }

    #[test]
    fn test_count_beyond_limit_is_malformed() {
        let engine = MockEngine::new();
        for i in 0..3 {
            engine.add_device(MockDevice::new("Vendor", "Player").at(1, i + 1));
        }
        let limits = AdapterLimits {
            max_nodes: 2,
            ..AdapterLimits::default()
        };

        let err = detect_devices(&engine, &limits).unwrap_err();
        assert!(matches!(err, MtpError::MalformedForeignData(_)));
        assert_eq!(engine.live_allocations(), 0);
    }
}
