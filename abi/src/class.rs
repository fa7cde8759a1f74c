//! Device class codes and handler class masks.

use core::fmt;

use bitflags::bitflags;

/// 12-bit device class code from an LCT entry.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceClass(pub u32);

impl DeviceClass {
    pub const EXECUTIVE: Self = Self(0x000);
    pub const DDM: Self = Self(0x001);
    pub const RANDOM_BLOCK_STORAGE: Self = Self(0x010);
    pub const SEQUENTIAL_STORAGE: Self = Self(0x011);
    pub const LAN: Self = Self(0x020);
    pub const WAN: Self = Self(0x030);
    pub const FIBRE_CHANNEL_PORT: Self = Self(0x040);
    pub const FIBRE_CHANNEL_PERIPHERAL: Self = Self(0x041);
    pub const SCSI_PERIPHERAL: Self = Self(0x051);
    pub const ATE_PORT: Self = Self(0x060);
    pub const ATE_PERIPHERAL: Self = Self(0x061);
    pub const FLOPPY_CONTROLLER: Self = Self(0x070);
    pub const FLOPPY_DEVICE: Self = Self(0x071);
    pub const BUS_ADAPTER_PORT: Self = Self(0x080);

    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self(raw & 0xFFF)
    }

    pub const fn name(self) -> &'static str {
        match self.0 {
            0x000 => "Executive",
            0x001 => "Device Driver Module",
            0x010 => "Random Block Storage",
            0x011 => "Sequential Storage",
            0x020 => "LAN Interface",
            0x030 => "WAN Interface",
            0x040 => "Fibre Channel Port",
            0x041 => "Fibre Channel Peripheral",
            0x051 => "SCSI Peripheral",
            0x060 => "ATE Port",
            0x061 => "ATE Peripheral",
            0x070 => "Floppy Controller",
            0x071 => "Floppy Device",
            0x080 => "Bus Adapter Port",
            _ => "Unknown Class",
        }
    }
}

impl fmt::Display for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#05x})", self.name(), self.0)
    }
}

impl fmt::Debug for DeviceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceClass({:#05x})", self.0)
    }
}

bitflags! {
    /// Which device classes a handler wants new-device notifications for.
    ///
    /// One bit per class code the subsystem knows about; `ALL` subscribes to
    /// everything, including classes this table has no named bit for.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ClassMask: u32 {
        const EXECUTIVE        = 1 << 0;
        const DDM              = 1 << 1;
        const RANDOM_BLOCK     = 1 << 2;
        const SEQUENTIAL       = 1 << 3;
        const LAN              = 1 << 4;
        const WAN              = 1 << 5;
        const FC_PORT          = 1 << 6;
        const FC_PERIPHERAL    = 1 << 7;
        const SCSI_PERIPHERAL  = 1 << 8;
        const ATE_PORT         = 1 << 9;
        const ATE_PERIPHERAL   = 1 << 10;
        const FLOPPY_CTRL      = 1 << 11;
        const FLOPPY_DEVICE    = 1 << 12;
        const BUS_ADAPTER_PORT = 1 << 13;
        const OTHER            = 1 << 31;
        const ALL              = u32::MAX;
    }
}

impl ClassMask {
    /// The mask bit covering one concrete class code.
    pub const fn for_class(class: DeviceClass) -> Self {
        match class.0 {
            0x000 => Self::EXECUTIVE,
            0x001 => Self::DDM,
            0x010 => Self::RANDOM_BLOCK,
            0x011 => Self::SEQUENTIAL,
            0x020 => Self::LAN,
            0x030 => Self::WAN,
            0x040 => Self::FC_PORT,
            0x041 => Self::FC_PERIPHERAL,
            0x051 => Self::SCSI_PERIPHERAL,
            0x060 => Self::ATE_PORT,
            0x061 => Self::ATE_PERIPHERAL,
            0x070 => Self::FLOPPY_CTRL,
            0x071 => Self::FLOPPY_DEVICE,
            0x080 => Self::BUS_ADAPTER_PORT,
            _ => Self::OTHER,
        }
    }

    /// `true` if a handler carrying this mask wants devices of `class`.
    #[inline]
    pub fn matches(self, class: DeviceClass) -> bool {
        self.intersects(Self::for_class(class))
    }
}

impl Default for ClassMask {
    fn default() -> Self {
        Self::empty()
    }
}
