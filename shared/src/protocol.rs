/// mDNS service type announced by networked printers
pub const PRINTER_SERVICE_TYPE: &str = "_ultimaker._tcp.local.";

/// TXT record keys carried in printer announcements
pub const TXT_NAME: &str = "name";
pub const TXT_FIRMWARE_VERSION: &str = "firmware_version";
pub const TXT_MACHINE: &str = "machine";

/// Path prefix of the printer's own HTTP API
pub const DEVICE_API_PREFIX: &str = "/api/v1";

/// Status string reported by a printer with an active print job
pub const STATUS_PRINTING: &str = "printing";

/// API path prefix of the manager daemon
pub const API_PREFIX: &str = "/v1";
