use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::Deserialize;
use ulid::Ulid;

/// What the service catalog knows about one bookable service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceInfo {
    pub id: Ulid,
    pub name: String,
    /// `None` means the booking falls back to the default duration.
    pub duration_minutes: Option<u32>,
    pub price_cents: Option<i64>,
}

/// The service-catalog collaborator: resolves a service id to its duration
/// and price. The catalog itself is owned elsewhere; the engine only reads.
#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    async fn resolve(&self, service_id: Ulid) -> Option<ServiceInfo>;
}

/// The identity-store collaborator: answers whether an opaque id names a
/// known professional. Authentication happened upstream.
#[async_trait]
pub trait ProfessionalDirectory: Send + Sync {
    async fn is_professional(&self, id: Ulid) -> bool;
}

/// Fixed in-memory catalog, loaded once at startup.
pub struct StaticCatalog {
    services: HashMap<Ulid, ServiceInfo>,
}

impl StaticCatalog {
    pub fn new(services: Vec<ServiceInfo>) -> Self {
        Self {
            services: services.into_iter().map(|s| (s.id, s)).collect(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Load from a JSON array of services.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let services: Vec<ServiceInfo> = serde_json::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Self::new(services))
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

#[async_trait]
impl ServiceCatalog for StaticCatalog {
    async fn resolve(&self, service_id: Ulid) -> Option<ServiceInfo> {
        self.services.get(&service_id).cloned()
    }
}

/// Accepts any professional id. The default when no roster is provisioned —
/// identity validation lives upstream.
pub struct OpenDirectory;

#[async_trait]
impl ProfessionalDirectory for OpenDirectory {
    async fn is_professional(&self, _id: Ulid) -> bool {
        true
    }
}

/// Restricts bookings to a provisioned set of professional ids.
pub struct RosterDirectory {
    roster: std::collections::HashSet<Ulid>,
}

impl RosterDirectory {
    pub fn new(ids: impl IntoIterator<Item = Ulid>) -> Self {
        Self { roster: ids.into_iter().collect() }
    }

    /// Load from a file of one ULID per line; blank lines ignored.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut roster = std::collections::HashSet::new();
        for line in raw.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let id = line.parse::<Ulid>().map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
            })?;
            roster.insert(id);
        }
        Ok(Self { roster })
    }
}

#[async_trait]
impl ProfessionalDirectory for RosterDirectory {
    async fn is_professional(&self, id: Ulid) -> bool {
        self.roster.contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn svc(duration: Option<u32>) -> ServiceInfo {
        ServiceInfo {
            id: Ulid::new(),
            name: "Haircut".into(),
            duration_minutes: duration,
            price_cents: Some(3500),
        }
    }

    #[test]
    fn static_catalog_resolves() {
        let s = svc(Some(45));
        let id = s.id;
        let catalog = StaticCatalog::new(vec![s.clone()]);
        assert_eq!(tokio_test::block_on(catalog.resolve(id)), Some(s));
        assert_eq!(tokio_test::block_on(catalog.resolve(Ulid::new())), None);
    }

    #[test]
    fn open_directory_accepts_all() {
        assert!(tokio_test::block_on(OpenDirectory.is_professional(Ulid::new())));
    }

    #[test]
    fn roster_directory_restricts() {
        let known = Ulid::new();
        let dir = RosterDirectory::new([known]);
        assert!(tokio_test::block_on(dir.is_professional(known)));
        assert!(!tokio_test::block_on(dir.is_professional(Ulid::new())));
    }

    #[test]
    fn catalog_load_rejects_bad_json() {
        let dir = std::env::temp_dir().join("booked_test_catalog");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(StaticCatalog::load(&path).is_err());
        let _ = std::fs::remove_file(&path);
    }
}
