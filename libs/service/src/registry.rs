//! Immutable service registry.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{Result, Service, ServiceDefinition, ServiceError};

/// All services known to the process, built once at startup.
pub struct ServiceRegistry {
    entries: Vec<Entry>,
    by_name: HashMap<String, usize>,
}

struct Entry {
    definition: ServiceDefinition,
    service: Arc<dyn Service>,
}

impl ServiceRegistry {
    pub fn builder() -> ServiceRegistryBuilder {
        ServiceRegistryBuilder::default()
    }

    /// A registry without services.
    pub fn empty() -> Self {
        Self {
            entries: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Service>> {
        self.by_name.get(name).map(|&i| &self.entries[i].service)
    }

    pub fn definition(&self, name: &str) -> Option<&ServiceDefinition> {
        self.by_name.get(name).map(|&i| &self.entries[i].definition)
    }

    /// Services in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&ServiceDefinition, &Arc<dyn Service>)> {
        self.entries.iter().map(|e| (&e.definition, &e.service))
    }

    /// The service whose configuration block is named `block_name`.
    pub fn by_config_type(&self, block_name: &str) -> Option<&ServiceDefinition> {
        self.entries
            .iter()
            .map(|e| &e.definition)
            .find(|d| d.config_type.as_deref() == Some(block_name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

/// Builder for [`ServiceRegistry`].
#[derive(Default)]
pub struct ServiceRegistryBuilder {
    services: Vec<Arc<dyn Service>>,
}

impl ServiceRegistryBuilder {
    #[must_use]
    pub fn register<S: Service>(self, service: S) -> Self {
        self.register_arc(Arc::new(service))
    }

    #[must_use]
    pub fn register_arc(mut self, service: Arc<dyn Service>) -> Self {
        self.services.push(service);
        self
    }

    /// Builds the registry, rejecting duplicate names and config types.
    pub fn build(self) -> Result<ServiceRegistry> {
        let mut entries = Vec::with_capacity(self.services.len());
        let mut by_name = HashMap::new();
        let mut config_types = HashMap::new();

        for service in self.services {
            let definition = service.definition();
            if by_name.contains_key(&definition.name) {
                return Err(ServiceError::Duplicate(definition.name));
            }
            if let Some(config_type) = &definition.config_type {
                if let Some(other) = config_types.insert(config_type.clone(), definition.name.clone()) {
                    return Err(ServiceError::Duplicate(format!(
                        "config type {config_type:?} claimed by {other:?} and {:?}",
                        definition.name
                    )));
                }
            }
            by_name.insert(definition.name.clone(), entries.len());
            entries.push(Entry {
                definition,
                service,
            });
        }

        Ok(ServiceRegistry { entries, by_name })
    }
}
