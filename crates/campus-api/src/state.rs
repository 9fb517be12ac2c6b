use std::sync::Arc;

use campus_db::Database;
use campus_gateway::dispatcher::Dispatcher;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub dispatcher: Dispatcher,
    pub jwt_secret: String,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use campus_types::api::Claims;

    pub fn test_state() -> AppState {
        Arc::new(AppStateInner {
            db: Database::open_in_memory().unwrap(),
            dispatcher: Dispatcher::new(),
            jwt_secret: "test-secret".into(),
        })
    }

    pub fn claims_for(profile_id: &str) -> Claims {
        Claims {
            sub: profile_id.to_string(),
            email: format!("{}@example.edu", profile_id),
            exp: 4102444800, // 2100-01-01
        }
    }
}
