use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use shared::protocol::{PLACEHOLDER_MODELS, TXT_MODEL_KEYS, TXT_VENDOR, UNKNOWN_VENDOR_HINT};
use super::manuf::ManufDatabase;

/// Override files applied in order; a later file wins on a shared prefix.
const OUI_OVERRIDE_FILES: [&str; 2] = ["oui_extra.json", "mac_overrides.json"];
const APPLE_MODELS_FILE: &str = "apple_models.json";

/// Manufacturer database plus OUI-keyed override and Apple model tables.
///
/// Table keys are the first three octets of a MAC, upper-case hex without
/// separators (`"A4B1C1"`).
#[derive(Debug, Clone, Default)]
pub struct VendorTables {
    manuf: Option<ManufDatabase>,
    oui: HashMap<String, String>,
    apple_models: HashMap<String, String>,
}

impl VendorTables {
    pub fn new(
        oui: impl IntoIterator<Item = (String, String)>,
        apple_models: impl IntoIterator<Item = (String, String)>,
    ) -> Self {
        Self {
            manuf: None,
            oui: oui.into_iter().map(|(k, v)| (normalize_key(&k), v)).collect(),
            apple_models: apple_models
                .into_iter()
                .map(|(k, v)| (normalize_key(&k), v))
                .collect(),
        }
    }

    /// Load the override tables from `dir`. Missing or malformed files are
    /// skipped; the daemon runs fine with empty tables.
    pub fn load(dir: &Path) -> Self {
        let mut oui = Vec::new();
        for name in OUI_OVERRIDE_FILES {
            if let Some(map) = read_table(&dir.join(name)) {
                oui.extend(map);
            }
        }
        let apple = read_table(&dir.join(APPLE_MODELS_FILE)).unwrap_or_default();
        Self::new(oui, apple)
    }

    pub fn with_manuf(mut self, manuf: ManufDatabase) -> Self {
        self.manuf = Some(manuf);
        self
    }

    pub fn manuf_source(&self) -> Option<&str> {
        self.manuf.as_ref().map(ManufDatabase::source)
    }

    pub fn oui_vendor(&self, mac: &str) -> Option<&str> {
        self.oui.get(&oui_prefix(mac)).map(String::as_str)
    }

    pub fn apple_model(&self, mac: &str) -> Option<&str> {
        self.apple_models.get(&oui_prefix(mac)).map(String::as_str)
    }

    pub fn oui_len(&self) -> usize {
        self.oui.len()
    }

    pub fn apple_len(&self) -> usize {
        self.apple_models.len()
    }

    /// Vendor for `mac`: inline hint, then the manuf database, then the
    /// override tables, then "Apple" if the prefix is in the Apple model
    /// table, then the mDNS `vn` property.
    /// Returns an empty string when nothing matches.
    pub fn resolve_vendor(
        &self,
        mac: &str,
        hint: Option<&str>,
        props: &BTreeMap<String, String>,
    ) -> String {
        if let Some(hint) = hint.map(str::trim) {
            if !hint.is_empty() && hint != UNKNOWN_VENDOR_HINT {
                return hint.to_string();
            }
        }
        if let Some(vendor) = self.manuf.as_ref().and_then(|db| db.manufacturer(mac)) {
            return vendor;
        }
        if let Some(vendor) = self.oui_vendor(mac) {
            return vendor.to_string();
        }
        if self.apple_model(mac).is_some() {
            return "Apple".to_string();
        }
        props
            .get(TXT_VENDOR)
            .map(|v| v.trim().to_string())
            .unwrap_or_default()
    }

    /// Model for `mac`: advertised TXT model first, then the Apple table.
    pub fn resolve_model(
        &self,
        mac: &str,
        vendor: &str,
        props: &BTreeMap<String, String>,
    ) -> String {
        advertised_model(props, vendor)
            .or_else(|| self.apple_model(mac).map(str::to_string))
            .unwrap_or_default()
    }
}

/// First non-empty model-bearing TXT value, with a leading vendor name
/// stripped. `None` when the result is a placeholder or just the vendor.
pub fn advertised_model(props: &BTreeMap<String, String>, vendor: &str) -> Option<String> {
    let raw = TXT_MODEL_KEYS
        .iter()
        .filter_map(|key| props.get(*key))
        .map(|v| v.trim())
        .find(|v| !v.is_empty())?;

    let model = strip_vendor_prefix(raw, vendor);
    is_meaningful_model(model, vendor).then(|| model.to_string())
}

pub fn is_meaningful_model(model: &str, vendor: &str) -> bool {
    let model = model.trim();
    !model.is_empty()
        && !PLACEHOLDER_MODELS.contains(&model)
        && !(!vendor.is_empty() && model.eq_ignore_ascii_case(vendor.trim()))
}

/// `"ACME Printer 100"` with vendor `"Acme"` becomes `"Printer 100"`.
pub fn strip_vendor_prefix<'a>(model: &'a str, vendor: &str) -> &'a str {
    let vendor = vendor.trim();
    if vendor.is_empty() {
        return model;
    }
    let n = vendor.len();
    match model.get(..n) {
        Some(head) if head.eq_ignore_ascii_case(vendor) && model[n..].starts_with(' ') => {
            model[n..].trim_start()
        }
        _ => model,
    }
}

/// Normalize a MAC to `XX:XX:XX:XX:XX:XX`. Accepts `:`, `-` or no separators.
pub fn normalize_mac(raw: &str) -> Option<String> {
    let hex: String = raw
        .trim()
        .chars()
        .filter(|c| *c != ':' && *c != '-' && *c != '.')
        .collect();
    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let hex = hex.to_ascii_uppercase();
    let octets: Vec<&str> = (0..12).step_by(2).map(|i| &hex[i..i + 2]).collect();
    Some(octets.join(":"))
}

/// OUI prefix of a MAC (first six hex digits, upper-case).
pub fn oui_prefix(mac: &str) -> String {
    normalize_key(mac).chars().take(6).collect()
}

fn normalize_key(key: &str) -> String {
    key.trim()
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .collect::<String>()
        .to_ascii_uppercase()
}

fn read_table(path: &Path) -> Option<HashMap<String, String>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::debug!("Lookup table {} not loaded: {}", path.display(), e);
            return None;
        }
    };
    match serde_json::from_str::<HashMap<String, String>>(&contents) {
        Ok(map) => {
            tracing::debug!("Loaded {} entries from {}", map.len(), path.display());
            Some(map)
        }
        Err(e) => {
            tracing::warn!("Failed to parse {}: {}", path.display(), e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn tables() -> VendorTables {
        VendorTables::new(
            [("aa-bb-cc".to_string(), "Other".to_string())],
            [("F0:18:98".to_string(), "HomePod".to_string())],
        )
    }

    #[test]
    fn test_inline_hint_wins_over_oui() {
        let vendor = tables().resolve_vendor("AA:BB:CC:DD:EE:FF", Some("Acme"), &props(&[]));
        assert_eq!(vendor, "Acme");
    }

    #[test]
    fn test_unknown_hint_falls_through_to_oui() {
        let vendor = tables().resolve_vendor("AA:BB:CC:DD:EE:FF", Some("Unknown"), &props(&[]));
        assert_eq!(vendor, "Other");
    }

    #[test]
    fn test_manuf_database_resolves_without_hint() {
        let manuf = ManufDatabase::parse(
            "3C:D9:2B\tHewlettP\tHewlett Packard\nAA:BB:CC\tDbName\tDatabase Vendor\n",
            "test",
        )
        .unwrap();
        let t = tables().with_manuf(manuf);

        assert_eq!(t.resolve_vendor("3C:D9:2B:01:02:03", None, &props(&[])), "Hewlett Packard");
        assert_eq!(t.resolve_vendor("AA:BB:CC:DD:EE:FF", None, &props(&[])), "Database Vendor");
        assert_eq!(t.resolve_vendor("3C:D9:2B:01:02:03", Some("Acme"), &props(&[])), "Acme");
        assert_eq!(t.resolve_vendor("F0:18:98:00:00:01", None, &props(&[])), "Apple");
    }

    #[test]
    fn test_apple_table_then_mdns_vendor() {
        let t = tables();
        assert_eq!(t.resolve_vendor("F0:18:98:00:00:01", None, &props(&[])), "Apple");
        assert_eq!(
            t.resolve_vendor("11:22:33:44:55:66", None, &props(&[("vn", "Sonos")])),
            "Sonos"
        );
        assert_eq!(t.resolve_vendor("11:22:33:44:55:66", None, &props(&[])), "");
    }

    #[test]
    fn test_model_priority_and_prefix_strip() {
        let p = props(&[("ty", "XEROX WorkCentre 3335"), ("product", "(WorkCentre)")]);
        assert_eq!(advertised_model(&p, "Xerox").as_deref(), Some("WorkCentre 3335"));

        let p = props(&[("md", "ACME Printer 100"), ("ty", "ignored")]);
        assert_eq!(advertised_model(&p, "Acme").as_deref(), Some("Printer 100"));

        let p = props(&[("model", ""), ("am", "AudioAccessory5,1")]);
        assert_eq!(advertised_model(&p, "Apple").as_deref(), Some("AudioAccessory5,1"));
    }

    #[test]
    fn test_placeholder_and_vendor_only_models_rejected() {
        assert_eq!(advertised_model(&props(&[("model", "0,1,2")]), ""), None);
        assert_eq!(advertised_model(&props(&[("md", "0")]), "Acme"), None);
        assert_eq!(advertised_model(&props(&[("md", "ACME")]), "Acme"), None);
    }

    #[test]
    fn test_model_falls_back_to_apple_table() {
        let model = tables().resolve_model("F0:18:98:00:00:01", "Apple", &props(&[]));
        assert_eq!(model, "HomePod");
    }

    #[test]
    fn test_strip_vendor_prefix_requires_word_boundary() {
        assert_eq!(strip_vendor_prefix("Acmeprint 1", "Acme"), "Acmeprint 1");
        assert_eq!(strip_vendor_prefix("Printer", ""), "Printer");
    }

    #[test]
    fn test_normalize_mac() {
        assert_eq!(normalize_mac("aa:bb:cc:dd:ee:ff").as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(normalize_mac("aa-bb-cc-dd-ee-ff").as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(normalize_mac("aabbccddeeff").as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(normalize_mac("AA:BB:CC"), None);
        assert_eq!(normalize_mac("ZZ:BB:CC:DD:EE:FF"), None);
    }

    #[test]
    fn test_load_tolerates_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("oui_extra.json"), r#"{"AA:BB:CC": "Extra"}"#).unwrap();
        std::fs::write(dir.path().join("mac_overrides.json"), r#"{"aabbcc": "Override"}"#).unwrap();
        std::fs::write(dir.path().join("apple_models.json"), "not json").unwrap();

        let t = VendorTables::load(dir.path());
        assert_eq!(t.oui_vendor("AA:BB:CC:00:00:00"), Some("Override"));
        assert_eq!(t.apple_len(), 0);
    }
}
