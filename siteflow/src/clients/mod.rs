//! HTTP stage clients.
//!
//! Thin `reqwest` wrappers around the external services. They translate
//! transport and status failures into [`ServiceError`](crate::errors::ServiceError)
//! and carry no pipeline logic.

mod services;
mod transport;

pub use services::{HttpDeployService, HttpFileService, HttpGenerationService, HttpProjectStore};
pub use transport::HttpTransport;

use std::sync::Arc;

use crate::config::ServiceEndpoints;
use crate::ports::StagePorts;

impl StagePorts {
    /// Wires every port to its HTTP client.
    #[must_use]
    pub fn http(endpoints: &ServiceEndpoints) -> Self {
        let client = reqwest::Client::new();
        let transport = |url: &str| HttpTransport::with_client(client.clone(), url);

        let files = Arc::new(HttpFileService::new(transport(&endpoints.files_url)));
        let deploy = Arc::new(HttpDeployService::new(
            transport(&endpoints.packaging_url),
            transport(&endpoints.build_url),
        ));

        Self::new(
            Arc::new(HttpProjectStore::new(transport(&endpoints.project_store_url))),
            Arc::new(HttpGenerationService::new(transport(&endpoints.generation_url))),
            files.clone(),
            files,
            deploy.clone(),
            deploy,
        )
    }
}
