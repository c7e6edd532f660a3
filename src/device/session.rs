//! Device session lifecycle
//!
//! A [`Session`] is bound to at most one open device. The engine handle lives
//! in a [`DeviceHandle`] that only the session can reach; `disconnect` takes it
//! out and releases it, so no operation can touch it afterwards.

use libc::c_char;
use log::{debug, info, warn};
use serde::Serialize;
use std::ffi::CString;
use std::fmt;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use super::adapter::AdapterLimits;
use super::engine::MtpEngine;
use super::sys::{LIBMTP_device_entry_t, LIBMTP_mtpdevice_t, LIBMTP_raw_device_t};
use super::types::RawDeviceDescriptor;
use crate::core::error::{MtpError, Result};

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Disconnected,
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => f.write_str("disconnected"),
            SessionState::Connected => f.write_str("connected"),
        }
    }
}

/// Per-session behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// Bounds for every foreign list and tree walked through this session
    pub limits: AdapterLimits,
    /// Ask the engine to print its error stack before clearing it
    pub dump_error_stack: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            limits: AdapterLimits::default(),
            dump_error_stack: true,
        }
    }
}

/// Exclusive owner of an open engine device.
///
/// Not `Clone` and never handed out, so there is exactly one live reference
/// to the engine handle at any time.
pub(crate) struct DeviceHandle(NonNull<LIBMTP_mtpdevice_t>);

// SAFETY: the handle is only dereferenced by the engine, through `&mut`
// or `&` access to the owning session, one call at a time. Moving it to
// another thread is fine; sharing it is not, so there is no `Sync` impl.
unsafe impl Send for DeviceHandle {}

impl DeviceHandle {
    pub(crate) fn as_ptr(&self) -> *mut LIBMTP_mtpdevice_t {
        self.0.as_ptr()
    }
}

/// Stateful connection to one MTP device
pub struct Session<E: MtpEngine + ?Sized = dyn MtpEngine> {
    engine: Arc<E>,
    descriptor: Option<RawDeviceDescriptor>,
    device: Option<DeviceHandle>,
    options: SessionOptions,
}

impl<E: MtpEngine + ?Sized> Session<E> {
    /// A disconnected session with nothing to connect to yet
    pub fn new(engine: Arc<E>) -> Self {
        Self {
            engine,
            descriptor: None,
            device: None,
            options: SessionOptions::default(),
        }
    }

    /// A disconnected session that will open `descriptor` on `connect`
    pub fn with_descriptor(engine: Arc<E>, descriptor: RawDeviceDescriptor) -> Self {
        let mut session = Self::new(engine);
        session.descriptor = Some(descriptor);
        session
    }

    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Build a session for `descriptor` and connect it
    pub fn open(
        engine: Arc<E>,
        descriptor: RawDeviceDescriptor,
        options: SessionOptions,
    ) -> Result<Self> {
        let mut session = Self::with_descriptor(engine, descriptor).with_options(options);
        session.connect()?;
        Ok(session)
    }

    pub fn state(&self) -> SessionState {
        if self.device.is_some() {
            SessionState::Connected
        } else {
            SessionState::Disconnected
        }
    }

    pub fn is_connected(&self) -> bool {
        self.device.is_some()
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Descriptor waiting to be opened; `None` once `connect` consumed it
    pub fn pending_descriptor(&self) -> Option<&RawDeviceDescriptor> {
        self.descriptor.as_ref()
    }

    /// Replace the descriptor used by the next `connect`
    pub fn set_descriptor(&mut self, descriptor: RawDeviceDescriptor) -> Result<()> {
        if self.device.is_some() {
            return Err(MtpError::AlreadyConnected);
        }
        self.descriptor = Some(descriptor);
        Ok(())
    }

    /// Open the pending descriptor.
    ///
    /// Always uses the engine's uncached open, which file listing relies on.
    /// If the engine cannot open the device the session stays disconnected
    /// and keeps the descriptor, so `connect` can be tried again.
    pub fn connect(&mut self) -> Result<()> {
        if self.device.is_some() {
            return Err(MtpError::AlreadyConnected);
        }
        let descriptor = self.descriptor.as_ref().ok_or(MtpError::ObjectNotFound)?;

        let vendor = optional_cstring(descriptor.vendor.as_deref(), "vendor")?;
        let product = optional_cstring(descriptor.product.as_deref(), "product")?;
        let mut raw = LIBMTP_raw_device_t {
            device_entry: LIBMTP_device_entry_t {
                vendor: vendor.as_ref().map_or(ptr::null_mut(), |v| v.as_ptr() as *mut c_char),
                vendor_id: descriptor.vendor_id,
                product: product.as_ref().map_or(ptr::null_mut(), |p| p.as_ptr() as *mut c_char),
                product_id: descriptor.product_id,
                device_flags: descriptor.device_flags,
            },
            bus_location: descriptor.bus_location,
            devnum: descriptor.device_number,
        };

        self.engine.initialize();
        debug!("Opening {} ({})", descriptor.display_name(), descriptor.id());
        // SAFETY: `raw` and the strings it points to outlive the call.
        let device = unsafe { self.engine.open_raw_device_uncached(&mut raw) };

        match NonNull::new(device) {
            Some(handle) => {
                info!("Connected to {}", descriptor.display_name());
                self.device = Some(DeviceHandle(handle));
                self.descriptor = None;
                Ok(())
            }
            None => {
                warn!("Engine could not open {}", descriptor.display_name());
                Err(MtpError::NoDeviceConnected)
            }
        }
    }

    /// Release the device. The session is disconnected afterwards no matter
    /// what the engine does during release.
    pub fn disconnect(&mut self) -> Result<()> {
        let handle = self.device.take().ok_or(MtpError::NotConnected)?;
        // SAFETY: the handle came from this engine and was just taken out of
        // the session, so it cannot be used or released again.
        unsafe { self.engine.release_device(handle.as_ptr()) };
        info!("Disconnected");
        Ok(())
    }

    /// Open device handle, or `NotConnected` before any engine call is made
    pub(crate) fn device(&self) -> Result<*mut LIBMTP_mtpdevice_t> {
        self.device
            .as_ref()
            .map(DeviceHandle::as_ptr)
            .ok_or(MtpError::NotConnected)
    }

    pub(crate) fn engine(&self) -> &E {
        &self.engine
    }
}

impl<E: MtpEngine + ?Sized> Drop for Session<E> {
    fn drop(&mut self) {
        if let Some(handle) = self.device.take() {
            debug!("Releasing device on drop");
            // SAFETY: see `disconnect`.
            unsafe { self.engine.release_device(handle.as_ptr()) };
        }
    }
}

impl<E: MtpEngine + ?Sized> fmt::Debug for Session<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("descriptor", &self.descriptor)
            .field("options", &self.options)
            .finish()
    }
}

fn optional_cstring(text: Option<&str>, field: &str) -> Result<Option<CString>> {
    text.map(|t| {
        CString::new(t)
            .map_err(|_| MtpError::InvalidArgument(format!("{} contains a NUL byte", field)))
    })
    .transpose()
}
