use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use oui::OuiDatabase;

/// Fallback used when no Wireshark manuf file is installed.
const BUILTIN_MANUF: &str = "\
00:00:5E\tIANA\tICANN, IANA Department
00:0C:29\tVMware\tVMware, Inc.
00:0F:FE\tIntelCor\tIntel Corporate
00:17:F2\tApple\tApple, Inc.
00:18:8B\tMicrosof\tMicrosoft Corporation
00:1A:11\tSamsungE\tSamsung Electronics Co.,Ltd
00:1C:B3\tApple\tApple, Inc.
00:22:48\tMicrosof\tMicrosoft Corporation
00:26:BB\tApple\tApple, Inc.
00:50:56\tVMware\tVMware, Inc.
B8:27:EB\tRaspberr\tRaspberry Pi Foundation
D8:27:27\tSamsungE\tSamsung Electronics Co.,Ltd
DC:A6:32\tRaspberr\tRaspberry Pi Trading Ltd
";

/// Wireshark manuf database: MAC prefix to manufacturer.
#[derive(Clone)]
pub struct ManufDatabase {
    db: Arc<OuiDatabase>,
    source: String,
}

impl fmt::Debug for ManufDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManufDatabase").field("source", &self.source).finish()
    }
}

impl ManufDatabase {
    pub fn parse(contents: &str, source: &str) -> Option<Self> {
        match OuiDatabase::new_from_str(contents) {
            Ok(db) => Some(Self {
                db: Arc::new(db),
                source: source.to_string(),
            }),
            Err(e) => {
                tracing::warn!("Failed to parse manuf database {}: {:?}", source, e);
                None
            }
        }
    }

    pub fn builtin() -> Self {
        Self::parse(BUILTIN_MANUF, "built-in").expect("built-in manuf table is valid")
    }

    /// First manuf file that loads, or the built-in table.
    pub fn load(paths: &[PathBuf]) -> Self {
        for path in paths {
            let contents = match std::fs::read_to_string(path) {
                Ok(contents) => contents,
                Err(e) => {
                    tracing::debug!("Manuf database {} not loaded: {}", path.display(), e);
                    continue;
                }
            };
            if let Some(db) = Self::parse(&contents, &path.display().to_string()) {
                return db;
            }
        }
        tracing::warn!("No manuf database found; using built-in manufacturer table");
        Self::builtin()
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Manufacturer long name, else short name.
    pub fn manufacturer(&self, mac: &str) -> Option<String> {
        let entry = self.db.query_by_str(mac).ok().flatten()?;
        let name = entry
            .name_long
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(entry.name_short);
        let name = name.trim();
        (!name.is_empty()).then(|| name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
# Wireshark manuf excerpt
00:1B:63\tApple\tApple, Inc.
3C:D9:2B\tHewlettP\tHewlett Packard
";

    #[test]
    fn test_lookup_prefers_long_name() {
        let db = ManufDatabase::parse(SAMPLE, "sample").unwrap();
        assert_eq!(db.manufacturer("3C:D9:2B:01:02:03").as_deref(), Some("Hewlett Packard"));
        assert_eq!(db.manufacturer("00:1B:63:AA:BB:CC").as_deref(), Some("Apple, Inc."));
        assert_eq!(db.manufacturer("11:22:33:44:55:66"), None);
    }

    #[test]
    fn test_load_falls_back_to_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let db = ManufDatabase::load(&[dir.path().join("manuf")]);
        assert_eq!(db.source(), "built-in");
        assert_eq!(
            db.manufacturer("B8:27:EB:12:34:56").as_deref(),
            Some("Raspberry Pi Foundation")
        );
    }

    #[test]
    fn test_load_reads_first_available_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manuf");
        std::fs::write(&path, SAMPLE).unwrap();

        let db = ManufDatabase::load(&[dir.path().join("absent"), path]);
        assert_eq!(db.manufacturer("3C:D9:2B:00:00:01").as_deref(), Some("Hewlett Packard"));
    }
}
