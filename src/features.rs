//! Get/Set Features values.

use std::fmt;

use crate::cmd::FeatureId;
use crate::error::{Error, Result};

/// Feature configuration selector.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSelector {
    /// Current operating value
    #[default]
    Current = 0,
    /// Default value
    Default = 1,
    /// Saved value
    Saved = 2,
    /// Supported capabilities
    Supported = 3,
}

impl FeatureSelector {
    /// Look up a selector by its wire value.
    pub fn from_raw(sel: u8) -> Result<Self> {
        match sel {
            0 => Ok(FeatureSelector::Current),
            1 => Ok(FeatureSelector::Default),
            2 => Ok(FeatureSelector::Saved),
            3 => Ok(FeatureSelector::Supported),
            _ => Err(Error::InvalidArgument(format!("feature selector {sel}"))),
        }
    }
}

/// Arbitration (0x01).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbitrationConfig {
    /// Arbitration burst, as a power of two
    pub burst: u8,
    /// Low priority weight
    pub low_weight: u8,
    /// Medium priority weight
    pub medium_weight: u8,
    /// High priority weight
    pub high_weight: u8,
}

/// Temperature threshold configuration (0x04).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemperatureThreshold {
    /// Temperature threshold in Kelvin
    pub threshold: u16,
    /// Temperature select
    pub select: u8,
    /// Threshold type
    pub threshold_type: u8,
}

/// Error recovery (0x05).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorRecoveryConfig {
    /// Time limited error recovery in 100 ms units
    pub time_limit: u16,
    /// Deallocated or unwritten logical block error enable
    pub dulbe: bool,
}

/// Number of queues (0x07), both zero based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueCount {
    /// Submission queues allocated
    pub submission: u16,
    /// Completion queues allocated
    pub completion: u16,
}

/// Interrupt coalescing configuration (0x08).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptCoalescingConfig {
    /// Aggregation threshold (number of completion entries)
    pub threshold: u8,
    /// Aggregation time in 100 microsecond increments
    pub time: u8,
}

/// Interrupt vector configuration (0x09).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptVectorConfig {
    /// Interrupt vector
    pub vector: u16,
    /// Coalescing disable
    pub coalescing_disabled: bool,
}

/// Asynchronous Event configuration (0x0B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncEventConfig {
    /// SMART / health critical warning mask
    pub critical_warning_mask: u8,
    /// Namespace attribute notices
    pub namespace_attribute_enable: bool,
    /// Firmware activation notices
    pub firmware_activation_enable: bool,
    /// Telemetry log notices
    pub telemetry_enable: bool,
    /// ANA change notices (Asymmetric Namespace Access)
    pub ana_change_enable: bool,
    /// Predictable latency event aggregate log change notices
    pub predictable_latency_enable: bool,
    /// LBA status information notices
    pub lba_status_enable: bool,
    /// Endurance group event aggregate log change notices
    pub endurance_group_enable: bool,
    /// Zone descriptor changed notices
    pub zone_descriptor_enable: bool,
}

/// Host controlled thermal management (0x10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThermalManagementConfig {
    /// Thermal management temperature 1 in Kelvin
    pub tmt1: u16,
    /// Thermal management temperature 2 in Kelvin
    pub tmt2: u16,
}

/// A decoded Get Features completion dword 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureValue {
    /// Arbitration
    Arbitration(ArbitrationConfig),
    /// Power state
    PowerManagement {
        /// Power state
        power_state: u8,
        /// Workload hint
        workload_hint: u8,
    },
    /// Number of LBA range entries, zero based
    LbaRangeType(u8),
    /// Temperature threshold
    TemperatureThreshold(TemperatureThreshold),
    /// Error recovery
    ErrorRecovery(ErrorRecoveryConfig),
    /// Volatile write cache enable
    VolatileWriteCache(bool),
    /// Number of queues
    NumberOfQueues(QueueCount),
    /// Interrupt coalescing
    InterruptCoalescing(InterruptCoalescingConfig),
    /// Interrupt vector configuration
    InterruptVector(InterruptVectorConfig),
    /// Disable normal
    WriteAtomicity(bool),
    /// Asynchronous event configuration
    AsyncEvent(AsyncEventConfig),
    /// Autonomous power state transition enable
    AutonomousPowerState(bool),
    /// Host controlled thermal management
    HostControlledThermal(ThermalManagementConfig),
    /// Feature id without a decoder
    Raw(u32),
}

fn bit(value: u32, n: u32) -> bool {
    value & (1 << n) != 0
}

impl FeatureValue {
    /// Decode dword 0 of a Get Features completion for `fid`.
    pub fn decode(fid: u8, dw0: u32) -> Self {
        let Some(feature) = FeatureId::from_raw(fid) else {
            return FeatureValue::Raw(dw0);
        };
        match feature {
            FeatureId::Arbitration => FeatureValue::Arbitration(ArbitrationConfig {
                burst: (dw0 & 0x7) as u8,
                low_weight: (dw0 >> 8) as u8,
                medium_weight: (dw0 >> 16) as u8,
                high_weight: (dw0 >> 24) as u8,
            }),
            FeatureId::PowerManagement => FeatureValue::PowerManagement {
                power_state: (dw0 & 0x1F) as u8,
                workload_hint: ((dw0 >> 5) & 0x7) as u8,
            },
            FeatureId::LbaRangeType => FeatureValue::LbaRangeType((dw0 & 0x3F) as u8),
            FeatureId::TemperatureThreshold => {
                FeatureValue::TemperatureThreshold(TemperatureThreshold {
                    threshold: dw0 as u16,
                    select: ((dw0 >> 16) & 0xF) as u8,
                    threshold_type: ((dw0 >> 20) & 0x3) as u8,
                })
            }
            FeatureId::ErrorRecovery => FeatureValue::ErrorRecovery(ErrorRecoveryConfig {
                time_limit: dw0 as u16,
                dulbe: bit(dw0, 16),
            }),
            FeatureId::VolatileWriteCache => FeatureValue::VolatileWriteCache(bit(dw0, 0)),
            FeatureId::NumberOfQueues => FeatureValue::NumberOfQueues(QueueCount {
                submission: dw0 as u16,
                completion: (dw0 >> 16) as u16,
            }),
            FeatureId::InterruptCoalescing => {
                FeatureValue::InterruptCoalescing(InterruptCoalescingConfig {
                    threshold: dw0 as u8,
                    time: (dw0 >> 8) as u8,
                })
            }
            FeatureId::InterruptVectorConfig => {
                FeatureValue::InterruptVector(InterruptVectorConfig {
                    vector: dw0 as u16,
                    coalescing_disabled: bit(dw0, 16),
                })
            }
            FeatureId::WriteAtomicityNormal => FeatureValue::WriteAtomicity(bit(dw0, 0)),
            FeatureId::AsyncEventConfig => FeatureValue::AsyncEvent(AsyncEventConfig {
                critical_warning_mask: dw0 as u8,
                namespace_attribute_enable: bit(dw0, 8),
                firmware_activation_enable: bit(dw0, 9),
                telemetry_enable: bit(dw0, 10),
                ana_change_enable: bit(dw0, 11),
                predictable_latency_enable: bit(dw0, 12),
                lba_status_enable: bit(dw0, 13),
                endurance_group_enable: bit(dw0, 14),
                zone_descriptor_enable: bit(dw0, 27),
            }),
            FeatureId::AutonomousPowerState => FeatureValue::AutonomousPowerState(bit(dw0, 0)),
            FeatureId::HostControlledThermal => {
                FeatureValue::HostControlledThermal(ThermalManagementConfig {
                    tmt1: (dw0 >> 16) as u16,
                    tmt2: dw0 as u16,
                })
            }
        }
    }
}

impl fmt::Display for FeatureValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureValue::Arbitration(arb) => write!(
                f,
                "Arbitration Burst (AB): {}\nLow Priority Weight (LPW): {}\n\
                 Medium Priority Weight (MPW): {}\nHigh Priority Weight (HPW): {}",
                arb.burst, arb.low_weight, arb.medium_weight, arb.high_weight
            ),
            FeatureValue::PowerManagement {
                power_state,
                workload_hint,
            } => write!(
                f,
                "Power State (PS): {power_state}\nWorkload Hint (WH): {workload_hint}"
            ),
            FeatureValue::LbaRangeType(num) => write!(f, "Number of LBA Ranges (NUM): {num}"),
            FeatureValue::TemperatureThreshold(tt) => write!(
                f,
                "Temperature Threshold (TMPTH): {} K\nThreshold Temperature Select (TMPSEL): {}\n\
                 Threshold Type Select (THSEL): {}",
                tt.threshold, tt.select, tt.threshold_type
            ),
            FeatureValue::ErrorRecovery(er) => write!(
                f,
                "Time Limited Error Recovery (TLER): {}\nDULBE: {}",
                er.time_limit, er.dulbe
            ),
            FeatureValue::VolatileWriteCache(wce) => {
                write!(f, "Volatile Write Cache Enable (WCE): {wce}")
            }
            FeatureValue::NumberOfQueues(q) => write!(
                f,
                "Number of I/O Submission Queues Allocated (NSQA): {}\n\
                 Number of I/O Completion Queues Allocated (NCQA): {}",
                q.submission, q.completion
            ),
            FeatureValue::InterruptCoalescing(ic) => write!(
                f,
                "Aggregation Threshold (THR): {}\nAggregation Time (TIME): {}",
                ic.threshold, ic.time
            ),
            FeatureValue::InterruptVector(iv) => write!(
                f,
                "Interrupt Vector (IV): {}\nCoalescing Disable (CD): {}",
                iv.vector, iv.coalescing_disabled
            ),
            FeatureValue::WriteAtomicity(dn) => write!(f, "Disable Normal (DN): {dn}"),
            FeatureValue::AsyncEvent(ae) => write!(
                f,
                "SMART / Health Critical Warnings: {:#04x}\nNamespace Attribute Notices: {}\n\
                 Firmware Activation Notices: {}\nTelemetry Log Notices: {}\n\
                 ANA Change Notices: {}\nPredictable Latency Event Notices: {}\n\
                 LBA Status Information Notices: {}\nEndurance Group Event Notices: {}\n\
                 Zone Descriptor Changed Notices: {}",
                ae.critical_warning_mask,
                ae.namespace_attribute_enable,
                ae.firmware_activation_enable,
                ae.telemetry_enable,
                ae.ana_change_enable,
                ae.predictable_latency_enable,
                ae.lba_status_enable,
                ae.endurance_group_enable,
                ae.zone_descriptor_enable
            ),
            FeatureValue::AutonomousPowerState(apste) => {
                write!(f, "Autonomous Power State Transition Enable (APSTE): {apste}")
            }
            FeatureValue::HostControlledThermal(tm) => write!(
                f,
                "Thermal Management Temperature 1 (TMT1): {} K\n\
                 Thermal Management Temperature 2 (TMT2): {} K",
                tm.tmt1, tm.tmt2
            ),
            FeatureValue::Raw(value) => write!(f, "value: {value:#010x}"),
        }
    }
}
