use serde::Serialize;
use std::fmt;

/// Bootstrap phases, in execution order.
///
/// A phase may be skipped by scope or flags, never reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[repr(u8)]
pub enum Phase {
    /// Reboot a running u-boot back into the boot ROM.
    DestroyBoot = 1,
    /// Read the secure-boot fuse.
    CheckIfBoardIsSecure = 2,
    /// Load and run the DDR init stage.
    InitializingDdr = 3,
    /// Load and run u-boot, then wait for it to enumerate.
    RunningUboot = 4,
    /// Partition table, device tree and bootloader.
    PrepareForLoadingPartitions = 5,
    DataCachePartitionsWiping = 6,
    ProgramAllPartitions = 7,
    EfuseUpdate = 8,
    ResettingBoard = 9,
}

impl Phase {
    /// Log wording.
    pub fn title(&self) -> &'static str {
        match self {
            Phase::DestroyBoot => "Destroy the boot",
            Phase::CheckIfBoardIsSecure => "Check if board is secure",
            Phase::InitializingDdr => "Initializing DDR",
            Phase::RunningUboot => "Running u-boot",
            Phase::PrepareForLoadingPartitions => "Prepare for loading partitions",
            Phase::DataCachePartitionsWiping => "Wiping data and cache partitions",
            Phase::ProgramAllPartitions => "Programming all partitions",
            Phase::EfuseUpdate => "Programming efuses",
            Phase::ResettingBoard => "Resetting board",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::DestroyBoot => write!(f, "DestroyBoot"),
            Phase::CheckIfBoardIsSecure => write!(f, "CheckIfBoardIsSecure"),
            Phase::InitializingDdr => write!(f, "InitializingDDR"),
            Phase::RunningUboot => write!(f, "RunningUboot"),
            Phase::PrepareForLoadingPartitions => write!(f, "PrepareForLoadingPartitions"),
            Phase::DataCachePartitionsWiping => write!(f, "DataCachePartitionsWiping"),
            Phase::ProgramAllPartitions => write!(f, "ProgramAllPartitions"),
            Phase::EfuseUpdate => write!(f, "EfuseUpdate"),
            Phase::ResettingBoard => write!(f, "ResettingBoard"),
        }
    }
}
