use std::sync::Arc;

use super::ip::IpSource;
use crate::session::SessionService;

/// State shared by every authentication route and extractor.
#[derive(Clone)]
pub struct AuthState {
    pub service: Arc<SessionService>,
    pub ip_source: IpSource,
}

impl AuthState {
    pub fn new(service: Arc<SessionService>, ip_source: IpSource) -> Self {
        Self { service, ip_source }
    }
}
