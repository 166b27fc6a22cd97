use std::sync::Arc;

use chrono_tz::Tz;
use dashboard_core::alert_service::AlertService;

use crate::auth::AdminPolicy;
use crate::chat_relay::ChatRelay;
use crate::directory::UserDirectory;
use crate::identity::IdentityVerifier;

#[derive(Clone)]
pub struct AppState {
    pub alerts: AlertService,
    pub verifier: Arc<dyn IdentityVerifier>,
    pub directory: Arc<dyn UserDirectory>,
    pub chat: Arc<ChatRelay>,
    pub admin_policy: Arc<AdminPolicy>,
    /// Zone user timestamps are rendered in
    pub display_tz: Tz,
}
