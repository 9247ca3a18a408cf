/// mDNS service type for plain eSCL scanners
pub const USCAN_SERVICE_TYPE: &str = "_uscan._tcp.local.";

/// mDNS service type for eSCL scanners over TLS
pub const USCANS_SERVICE_TYPE: &str = "_uscans._tcp.local.";

/// mDNS service type for IPP printers (some advertise an attached scanner)
pub const IPP_SERVICE_TYPE: &str = "_ipp._tcp.local.";

/// mDNS service type for IPP printers over TLS
pub const IPPS_SERVICE_TYPE: &str = "_ipps._tcp.local.";

/// TXT record keys read from scanner and printer announcements
pub const TXT_MODEL: &str = "ty";
pub const TXT_UUID: &str = "UUID";
pub const TXT_RESOURCE_PATH: &str = "rs";
pub const TXT_SCAN: &str = "Scan";

/// Resource path used when an eSCL announcement carries no `rs` key
pub const DEFAULT_ESCL_PATH: &str = "/eSCL/";

/// API path prefix
pub const API_PREFIX: &str = "/v1";
