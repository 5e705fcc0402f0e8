use std::net::IpAddr;

/// Resolves the 6-byte serial number stamped into secure packets, derived
/// from the hardware address of the NIC bound to the control endpoint's
/// local address (§6 "Environment"). Actual NIC enumeration is
/// platform-specific and lives outside this crate, matching the "interfaces
/// only" treatment given to the other out-of-scope collaborators in §1.
pub trait SerialNumberSource: Send + Sync {
    /// Returns the serial number for the NIC backing `local_addr`, or all
    /// zero bytes if it cannot be determined, per §6.
    fn serial_number_for(&self, local_addr: IpAddr) -> [u8; 6];
}

/// Fallback implementation used whenever the host environment cannot or
/// has not been asked to supply a real MAC-derived serial number.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZeroSerialNumber;

impl SerialNumberSource for ZeroSerialNumber {
    fn serial_number_for(&self, _local_addr: IpAddr) -> [u8; 6] {
        [0u8; 6]
    }
}
