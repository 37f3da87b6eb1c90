/// mDNS meta-query that enumerates every advertised service type
pub const META_QUERY_TYPE: &str = "_services._dns-sd._udp.local.";

/// TXT record keys that may carry a device model, in priority order
pub const TXT_MODEL_KEYS: [&str; 5] = ["model", "md", "am", "ty", "product"];

/// TXT record key carrying a vendor name
pub const TXT_VENDOR: &str = "vn";

/// Model values some devices advertise that carry no information
pub const PLACEHOLDER_MODELS: [&str; 2] = ["0", "0,1,2"];

/// Vendor hint the discovery tool prints when it does not know the OUI
pub const UNKNOWN_VENDOR_HINT: &str = "Unknown";

/// API path prefix
pub const API_PREFIX: &str = "/v1";
