//! Log page decoding.

use std::fmt;

use crate::error::{Result, StatusCode};
use crate::protocol::{ensure_len, le_u16, le_u32, le_u64, le_u128};

/// Error log entry structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorLogEntry {
    /// Error count for this entry
    pub error_count: u64,
    /// Submission queue ID
    pub sqid: u16,
    /// Command ID
    pub cmdid: u16,
    /// Status field
    pub status: StatusCode,
    /// Parameter error location
    pub param_error_location: u16,
    /// LBA
    pub lba: u64,
    /// Namespace ID
    pub nsid: u32,
    /// Vendor specific info available
    pub vs: u8,
    /// Command specific info
    pub cs_info: u64,
}

impl ErrorLogEntry {
    /// Size of one entry.
    pub const LEN: usize = 64;

    /// Decode one entry.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        ensure_len(buf, Self::LEN)?;
        Ok(Self {
            error_count: le_u64(buf, 0),
            sqid: le_u16(buf, 8),
            cmdid: le_u16(buf, 10),
            status: StatusCode::from_raw(le_u16(buf, 12)),
            param_error_location: le_u16(buf, 14),
            lba: le_u64(buf, 16),
            nsid: le_u32(buf, 24),
            vs: buf[28],
            cs_info: le_u64(buf, 32),
        })
    }

    /// Decode every populated entry of an error information log page.
    pub fn parse_page(buf: &[u8]) -> Vec<Self> {
        buf.chunks_exact(Self::LEN)
            .filter_map(|chunk| Self::parse(chunk).ok())
            .filter(|entry| entry.error_count != 0)
            .collect()
    }
}

/// SMART / Health Information log page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmartHealthInfo {
    /// Critical warning flags
    pub critical_warning: u8,
    /// Composite temperature in Kelvin
    pub temperature: u16,
    /// Available spare percentage
    pub available_spare: u8,
    /// Available spare threshold percentage
    pub available_spare_threshold: u8,
    /// Percentage used estimate
    pub percentage_used: u8,
    /// Data units read (1000 x 512 byte units)
    pub data_units_read: u128,
    /// Data units written (1000 x 512 byte units)
    pub data_units_written: u128,
    /// Host read commands
    pub host_read_commands: u128,
    /// Host write commands
    pub host_write_commands: u128,
    /// Controller busy time in minutes
    pub controller_busy_time: u128,
    /// Power cycles
    pub power_cycles: u128,
    /// Power on hours
    pub power_on_hours: u128,
    /// Unsafe shutdowns
    pub unsafe_shutdowns: u128,
    /// Media errors
    pub media_errors: u128,
    /// Number of error log entries
    pub num_error_log_entries: u128,
    /// Warning temperature time in minutes
    pub warning_temp_time: u32,
    /// Critical temperature time in minutes
    pub critical_temp_time: u32,
}

impl SmartHealthInfo {
    /// Size of the log page.
    pub const LEN: usize = 512;

    /// Decode the health log page.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        ensure_len(buf, Self::LEN)?;
        Ok(Self {
            critical_warning: buf[0],
            temperature: le_u16(buf, 1),
            available_spare: buf[3],
            available_spare_threshold: buf[4],
            percentage_used: buf[5],
            data_units_read: le_u128(buf, 32),
            data_units_written: le_u128(buf, 48),
            host_read_commands: le_u128(buf, 64),
            host_write_commands: le_u128(buf, 80),
            controller_busy_time: le_u128(buf, 96),
            power_cycles: le_u128(buf, 112),
            power_on_hours: le_u128(buf, 128),
            unsafe_shutdowns: le_u128(buf, 144),
            media_errors: le_u128(buf, 160),
            num_error_log_entries: le_u128(buf, 176),
            warning_temp_time: le_u32(buf, 192),
            critical_temp_time: le_u32(buf, 196),
        })
    }

    /// Composite temperature in degrees Celsius.
    pub fn temperature_celsius(&self) -> i32 {
        self.temperature as i32 - 273
    }
}

impl fmt::Display for SmartHealthInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "critical_warning          : {:#04x}", self.critical_warning)?;
        writeln!(f, "temperature               : {} C", self.temperature_celsius())?;
        writeln!(f, "available_spare           : {}%", self.available_spare)?;
        writeln!(f, "available_spare_threshold : {}%", self.available_spare_threshold)?;
        writeln!(f, "percentage_used           : {}%", self.percentage_used)?;
        writeln!(f, "data_units_read           : {}", self.data_units_read)?;
        writeln!(f, "data_units_written        : {}", self.data_units_written)?;
        writeln!(f, "host_read_commands        : {}", self.host_read_commands)?;
        writeln!(f, "host_write_commands       : {}", self.host_write_commands)?;
        writeln!(f, "controller_busy_time      : {}", self.controller_busy_time)?;
        writeln!(f, "power_cycles              : {}", self.power_cycles)?;
        writeln!(f, "power_on_hours            : {}", self.power_on_hours)?;
        writeln!(f, "unsafe_shutdowns          : {}", self.unsafe_shutdowns)?;
        writeln!(f, "media_errors              : {}", self.media_errors)?;
        writeln!(f, "num_err_log_entries       : {}", self.num_error_log_entries)?;
        writeln!(f, "warning_temp_time         : {}", self.warning_temp_time)?;
        write!(f, "critical_temp_time        : {}", self.critical_temp_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StatusCodeType;

    #[test]
    fn health_log_offsets() {
        let mut page = vec![0u8; SmartHealthInfo::LEN];
        page[0] = 0x04;
        page[1..3].copy_from_slice(&310u16.to_le_bytes());
        page[3] = 100;
        page[5] = 7;
        page[112..128].copy_from_slice(&42u128.to_le_bytes());
        page[128..144].copy_from_slice(&1234u128.to_le_bytes());
        let info = SmartHealthInfo::parse(&page).unwrap();
        assert_eq!(info.critical_warning, 0x04);
        assert_eq!(info.temperature_celsius(), 37);
        assert_eq!(info.available_spare, 100);
        assert_eq!(info.percentage_used, 7);
        assert_eq!(info.power_cycles, 42);
        assert_eq!(info.power_on_hours, 1234);
    }

    #[test]
    fn error_log_skips_empty_entries() {
        let mut page = vec![0u8; ErrorLogEntry::LEN * 3];
        page[64..72].copy_from_slice(&5u64.to_le_bytes());
        // Invalid Field in Command
        page[64 + 12..64 + 14].copy_from_slice(&(0x02u16 << 1).to_le_bytes());
        let entries = ErrorLogEntry::parse_page(&page);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].error_count, 5);
        assert_eq!(entries[0].status.sct, StatusCodeType::Generic);
        assert_eq!(entries[0].status.sc, 0x02);
    }

    #[test]
    fn short_page_is_an_error() {
        assert!(SmartHealthInfo::parse(&[0u8; 100]).is_err());
    }
}
