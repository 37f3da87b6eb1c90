pub mod manuf;
pub mod services;
pub mod vendor;

use crate::config::{CatalogConfig, PortsConfig};
use self::manuf::ManufDatabase;
use self::services::ServiceCatalog;
use self::vendor::VendorTables;

/// Read-only lookup tables, built once at startup and shared by `Arc`.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub vendors: VendorTables,
    pub services: ServiceCatalog,
}

impl Catalog {
    pub fn load(catalog: &CatalogConfig, ports: &PortsConfig) -> Self {
        let mut manuf_paths = vec![catalog.data_dir.join("manuf")];
        manuf_paths.extend(catalog.manuf_files.iter().cloned());
        let vendors = VendorTables::load(&catalog.data_dir).with_manuf(ManufDatabase::load(&manuf_paths));
        let services = ServiceCatalog::load(&ports.services_files, ports.quick_count);

        tracing::info!(
            "Catalog ready: manuf from {}, {} OUI overrides, {} Apple models, {} service names",
            vendors.manuf_source().unwrap_or("nowhere"),
            vendors.oui_len(),
            vendors.apple_len(),
            services.len()
        );

        Self { vendors, services }
    }
}
