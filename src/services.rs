//! Host services injected into compiled trees and mutation routines.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

/// Identifies a service by its Rust type.
#[derive(Clone, Copy)]
pub struct ServiceKey {
    id: TypeId,
    name: &'static str,
}

impl ServiceKey {
    pub fn of<T: Any + Send + Sync>() -> Self {
        ServiceKey {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ServiceKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServiceKey {}

impl Hash for ServiceKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ServiceKey({})", self.name)
    }
}

type SharedService = Arc<dyn Any + Send + Sync>;

/// Registry of service instances, one per type.
#[derive(Clone, Default)]
pub struct ServiceProvider {
    services: HashMap<TypeId, SharedService>,
}

impl ServiceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Any + Send + Sync>(mut self, service: T) -> Self {
        self.insert(service);
        self
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, service: T) {
        self.services.insert(TypeId::of::<T>(), Arc::new(service));
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.services
            .get(&TypeId::of::<T>())
            .and_then(|s| s.downcast_ref::<T>())
    }

    pub fn contains(&self, key: &ServiceKey) -> bool {
        self.services.contains_key(&key.id)
    }

    pub(crate) fn get_dyn(&self, key: &ServiceKey) -> Option<&(dyn Any + Send + Sync)> {
        self.services.get(&key.id).map(|s| s.as_ref())
    }

    /// Looks up every key in order, stopping at the first one missing.
    pub fn resolve(&self, keys: &[ServiceKey]) -> Result<ResolvedServices, ServiceKey> {
        let mut resolved = Vec::with_capacity(keys.len());
        for key in keys {
            let service = self.services.get(&key.id).ok_or(*key)?;
            resolved.push((*key, Arc::clone(service)));
        }
        Ok(ResolvedServices { services: resolved })
    }
}

impl fmt::Debug for ServiceProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceProvider")
            .field("count", &self.services.len())
            .finish()
    }
}

/// Service instances resolved for one invocation, in declaration order.
#[derive(Clone, Default)]
pub struct ResolvedServices {
    services: Vec<(ServiceKey, SharedService)>,
}

impl ResolvedServices {
    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        let key = ServiceKey::of::<T>();
        self.services
            .iter()
            .find(|(k, _)| *k == key)
            .and_then(|(_, s)| s.downcast_ref::<T>())
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

impl fmt::Debug for ResolvedServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.services.iter().map(|(k, _)| k))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Clock(u32);
    struct Mailer;

    #[test]
    fn resolve_reports_the_missing_key() {
        let provider = ServiceProvider::new().with(Clock(7));
        let keys = [ServiceKey::of::<Clock>(), ServiceKey::of::<Mailer>()];
        let missing = provider.resolve(&keys).unwrap_err();
        assert_eq!(missing, ServiceKey::of::<Mailer>());
        assert!(missing.name().ends_with("Mailer"));

        let resolved = provider.resolve(&keys[..1]).unwrap();
        assert_eq!(resolved.get::<Clock>().map(|c| c.0), Some(7));
    }
}
