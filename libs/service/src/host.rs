//! Lookup of service data by name.

use std::any::Any;
use std::sync::Arc;

use crate::{ClusterData, Result, ServiceData, ServiceError, ServiceRegistry};

/// Gives components and services access to registered services' data.
#[derive(Clone)]
pub struct ServiceHost {
    registry: Arc<ServiceRegistry>,
}

impl ServiceHost {
    pub fn new(registry: Arc<ServiceRegistry>) -> Self {
        Self { registry }
    }

    /// A host without any services.
    pub fn empty() -> Self {
        Self::new(Arc::new(ServiceRegistry::empty()))
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Returns the data exposed by the named service.
    pub fn get_service_data(&self, name: &str) -> Result<ServiceData> {
        let service = self
            .registry
            .get(name)
            .ok_or_else(|| ServiceError::NotFound(name.to_string()))?;
        service
            .data()
            .ok_or_else(|| ServiceError::NoData(name.to_string()))
    }

    /// Returns the named service's data downcast to `T`.
    pub fn get_data<T: Any + Send + Sync>(&self, name: &str) -> Result<Arc<T>> {
        self.get_service_data(name)?
            .downcast::<T>()
            .map_err(|_| ServiceError::NoData(name.to_string()))
    }

    /// The cluster service's data, when the cluster service is registered.
    pub fn cluster(&self) -> Option<Arc<ClusterData>> {
        self.get_data::<ClusterData>(crate::cluster::SERVICE_NAME).ok()
    }
}
