//! Fixed-layout records exchanged through state channels.
//!
//! Names and sizes here are the compatibility surface for every external
//! producer and consumer; field order must not change.

use std::ptr;

use crate::channel::{OpenMode, SharedRecord, StateChannel};

/// Number of RC channels carried in the channel-value records.
pub const RC_CHANNEL_COUNT: usize = 14;

/// Centered/low stick position written into fresh RC channel values.
pub const RC_CENTER: u16 = 1000;

/// Override value meaning "no override, use the RC channel value".
pub const RC_OVERRIDE_INACTIVE: u16 = 0;

/// Maximum number of diversity adapters reported in ground status.
pub const MAX_ADAPTERS: usize = 4;

/// Interface name capacity, matching the kernel's IFNAMSIZ.
pub const IFNAMSIZ: usize = 16;

/// Health of one ground-side radio adapter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct AdapterStatus {
    pub received_packet_cnt: u32,
    pub current_signal_dbm: i8,
    /// Chipset family reported by the adapter driver.
    pub adapter_type: u8,
    /// NUL-padded interface name.
    pub name: [u8; IFNAMSIZ],
}

impl AdapterStatus {
    /// Interface name up to the first NUL.
    pub fn name(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(IFNAMSIZ);
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    /// Store an interface name, truncated to `IFNAMSIZ - 1` bytes.
    pub fn set_name(&mut self, name: &str) {
        self.name = [0; IFNAMSIZ];
        let len = name.len().min(IFNAMSIZ - 1);
        self.name[..len].copy_from_slice(&name.as_bytes()[..len]);
    }
}

/// Ground-station link and adapter health. Producer: ground process.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[repr(C)]
pub struct GroundStatus {
    /// Unix seconds of the producer's last refresh.
    pub last_update: i64,
    pub damaged_block_cnt: u32,
    pub lost_packet_cnt: u32,
    pub received_packet_cnt: u32,
    pub kbitrate: u32,
    pub kbitrate_measured: u32,
    pub kbitrate_set: u32,
    pub cpuload_gnd: f32,
    pub temp_gnd: f32,
    pub wifi_adapter_cnt: u32,
    pub adapter: [AdapterStatus; MAX_ADAPTERS],
}

/// RC transmitter/receiver link health. Producer: RC process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct RcStatus {
    pub last_update: i64,
    pub packets_sent: u32,
    pub lost_packet_cnt_rc: u32,
    pub received_packet_cnt_uav: u32,
    pub rssi_rc_uav: i8,
    pub adapter_rssi: i8,
    pub _reserved: [u8; 2],
}

/// Aircraft-reported link, battery and position summary.
///
/// Producer: the receive path. Truncated on every open so it never survives
/// a restart.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[repr(C)]
pub struct UavStatus {
    pub last_update: i64,
    /// Latitude in 1e-7 degrees.
    pub latitude: i32,
    /// Longitude in 1e-7 degrees.
    pub longitude: i32,
    /// Altitude above mean sea level in millimetres.
    pub altitude_mm: i32,
    pub injected_packet_cnt: u32,
    pub battery_voltage_mv: u16,
    pub battery_current_ca: i16,
    pub battery_remaining_pct: u8,
    pub cpu_usage: u8,
    pub cpu_temp: u8,
    pub undervolt: u8,
    pub rssi_ground: i8,
    pub gps_fix_type: u8,
    pub satellites_visible: u8,
    pub _reserved: u8,
}

/// Per-channel RC stick and aux positions. Producer: RC input process.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(C)]
pub struct RcChannels {
    pub ch: [u16; RC_CHANNEL_COUNT],
}

impl Default for RcChannels {
    fn default() -> Self {
        Self {
            ch: [RC_CENTER; RC_CHANNEL_COUNT],
        }
    }
}

/// Per-channel overrides. Producer: failsafe or UI process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(C)]
pub struct RcOverrides {
    pub ch: [u16; RC_CHANNEL_COUNT],
}

impl RcOverrides {
    /// Whether any channel carries an active override.
    pub fn is_active(&self) -> bool {
        self.ch.iter().any(|&v| v != RC_OVERRIDE_INACTIVE)
    }

    /// Merge onto RC channel values: non-zero overrides win.
    pub fn apply(&self, rc: &RcChannels) -> RcChannels {
        let mut out = *rc;
        for (value, &ov) in out.ch.iter_mut().zip(self.ch.iter()) {
            if ov != RC_OVERRIDE_INACTIVE {
                *value = ov;
            }
        }
        out
    }
}

// SAFETY (all impls below): #[repr(C)], plain integers/floats/byte arrays,
// all-zero is a valid value.
unsafe impl SharedRecord for GroundStatus {
    const NAME: &'static str = "/db_gnd_status_t";

    fn first_writer_defaults() -> Self {
        Self::default()
    }
}

unsafe impl SharedRecord for RcStatus {
    const NAME: &'static str = "/db_rc_status_t";

    fn first_writer_defaults() -> Self {
        Self::default()
    }
}

unsafe impl SharedRecord for UavStatus {
    const NAME: &'static str = "/db_uav_status_t";
    const OPEN_MODE: OpenMode = OpenMode::Truncate;

    fn first_writer_defaults() -> Self {
        Self::default()
    }
}

unsafe impl SharedRecord for RcChannels {
    const NAME: &'static str = "/db_rc_values_t";

    fn first_writer_defaults() -> Self {
        Self::default()
    }
}

unsafe impl SharedRecord for RcOverrides {
    const NAME: &'static str = "/db_rc_overwrite";

    fn first_writer_defaults() -> Self {
        Self::default()
    }
}

/// Records that are a flat array of `RC_CHANNEL_COUNT` channel values.
///
/// # Safety
///
/// Implementors must guarantee that `channels_ptr`, given a pointer to a
/// valid `Self`, returns a pointer to `RC_CHANNEL_COUNT` contiguous,
/// aligned `u16` values inside that record.
pub unsafe trait ChannelArray: SharedRecord {
    /// Address of the first channel value.
    ///
    /// # Safety
    ///
    /// `record` must point to a valid, live `Self`.
    #[doc(hidden)]
    unsafe fn channels_ptr(record: *mut Self) -> *mut u16;
}

// SAFETY: `ch` is `[u16; RC_CHANNEL_COUNT]`.
unsafe impl ChannelArray for RcChannels {
    unsafe fn channels_ptr(record: *mut Self) -> *mut u16 {
        // SAFETY: the caller guarantees `record` is valid; no reference is
        // created.
        unsafe { ptr::addr_of_mut!((*record).ch).cast::<u16>() }
    }
}

// SAFETY: `ch` is `[u16; RC_CHANNEL_COUNT]`.
unsafe impl ChannelArray for RcOverrides {
    unsafe fn channels_ptr(record: *mut Self) -> *mut u16 {
        // SAFETY: the caller guarantees `record` is valid; no reference is
        // created.
        unsafe { ptr::addr_of_mut!((*record).ch).cast::<u16>() }
    }
}

impl<T: ChannelArray> StateChannel<T> {
    /// Read one channel value without copying the whole record.
    pub fn channel(&self, index: usize) -> Option<u16> {
        if index >= RC_CHANNEL_COUNT {
            return None;
        }
        // SAFETY: the mapping holds a valid T, the trait contract places
        // RC_CHANNEL_COUNT u16s there, and index is in bounds.
        Some(unsafe { ptr::read_volatile(T::channels_ptr(self.as_ptr()).add(index)) })
    }

    /// Write one channel value. Returns `false` if `index` is out of range.
    pub fn set_channel(&self, index: usize, value: u16) -> bool {
        if index >= RC_CHANNEL_COUNT {
            return false;
        }
        // SAFETY: see `channel`.
        unsafe { ptr::write_volatile(T::channels_ptr(self.as_ptr()).add(index), value) };
        true
    }
}
