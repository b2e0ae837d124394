//! services/screening/src/controller.rs
//!
//! The application controller: owns the in-memory view state and wires user
//! actions to the analysis gateway and the session store.

use std::sync::Arc;

use hemoscan_core::{
    domain::{AnalysisResult, AuthContext, Gender, ImageBlob, User},
    ports::{AnalysisService, PortError, PortResult},
};
use tracing::{info, warn};

use crate::store::{Registration, SessionStore};

/// An enum representing the screen the user is currently on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Home,
    Auth,
    Capture,
    Analyzing,
    Result,
    History,
    Profile,
}

//=========================================================================================
// AppController
//=========================================================================================

pub struct AppController {
    store: Arc<SessionStore>,
    analysis: Arc<dyn AnalysisService>,
    auth: Option<AuthContext>,
    history: Vec<AnalysisResult>,
    selected: Option<AnalysisResult>,
    view: View,
    last_error: Option<String>,
}

impl AppController {
    pub fn new(store: Arc<SessionStore>, analysis: Arc<dyn AnalysisService>) -> Self {
        Self {
            store,
            analysis,
            auth: None,
            history: Vec::new(),
            selected: None,
            view: View::Home,
            last_error: None,
        }
    }

    /// Restores a persisted session, if any, and preloads its history.
    pub async fn start(&mut self) -> PortResult<()> {
        if let Some(user) = self.store.current_user().await? {
            info!("Restored session for user {}", user.id);
            self.history = self.store.get_history(user.id).await?;
            self.auth = Some(AuthContext { user });
        }
        self.view = View::Home;
        Ok(())
    }

    pub async fn register(&mut self, registration: Registration) -> PortResult<User> {
        let outcome = self.store.register(registration).await;
        self.authenticate(outcome).await
    }

    pub async fn login(&mut self, email: &str, password: &str) -> PortResult<User> {
        let outcome = self.store.login(email, password).await;
        self.authenticate(outcome).await
    }

    async fn authenticate(&mut self, outcome: PortResult<User>) -> PortResult<User> {
        let user = match outcome {
            Ok(user) => user,
            Err(e) => {
                self.view = View::Auth;
                return Err(self.record(e));
            }
        };
        self.history = self.store.get_history(user.id).await?;
        self.selected = None;
        self.auth = Some(AuthContext { user: user.clone() });
        self.last_error = None;
        self.view = View::Capture;
        Ok(user)
    }

    /// Signs out. In-memory state is cleared even when the stored session cannot be removed.
    pub async fn logout(&mut self) -> PortResult<()> {
        self.auth = None;
        self.history.clear();
        self.selected = None;
        self.last_error = None;
        self.view = View::Home;
        if let Err(e) = self.store.logout().await {
            return Err(self.record(e));
        }
        Ok(())
    }

    /// Analyzes a capture for the signed-in user and records the result.
    ///
    /// On failure nothing is persisted and the controller returns to `Capture`
    /// with the error message kept as `last_error`.
    pub async fn run_scan(&mut self, image: &ImageBlob) -> PortResult<AnalysisResult> {
        let Some(user_id) = self.auth.as_ref().map(AuthContext::user_id) else {
            return Err(self.record(PortError::Unauthorized));
        };

        self.view = View::Analyzing;
        self.last_error = None;

        let result = match self.analysis.analyze(image).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Scan failed: {}", e);
                self.view = View::Capture;
                return Err(self.record(e));
            }
        };

        if let Err(e) = self.store.save_scan(user_id, &result).await {
            self.view = View::Capture;
            return Err(self.record(e));
        }

        if result.is_synthetic() {
            warn!("Scan {} is a synthetic estimate", result.id);
        }
        self.history.push(result.clone());
        self.selected = Some(result.clone());
        self.view = View::Result;
        Ok(result)
    }

    pub fn select_result(&mut self, id: &str) -> PortResult<&AnalysisResult> {
        let found = self
            .history
            .iter()
            .find(|result| result.id == id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Scan {} not found", id)))?;
        self.view = View::Result;
        Ok(self.selected.insert(found))
    }

    pub async fn update_profile(
        &mut self,
        age: Option<u8>,
        gender: Option<Gender>,
        share_data: Option<bool>,
    ) -> PortResult<User> {
        let Some(mut user) = self.auth.as_ref().map(|auth| auth.user.clone()) else {
            return Err(self.record(PortError::Unauthorized));
        };

        if let Some(age) = age {
            user.age = age;
        }
        if let Some(gender) = gender {
            user.gender = gender;
        }
        if let Some(share_data) = share_data {
            user.share_data = share_data;
        }

        if let Err(e) = self.store.update_user(&user).await {
            return Err(self.record(e));
        }
        self.auth = Some(AuthContext { user: user.clone() });
        self.view = View::Profile;
        Ok(user)
    }

    pub fn navigate(&mut self, view: View) {
        self.view = view;
    }

    /// A copy of the history ordered oldest to newest by timestamp.
    pub fn chronological_history(&self) -> Vec<AnalysisResult> {
        let mut sorted = self.history.clone();
        sorted.sort_by_key(|result| result.timestamp);
        sorted
    }

    pub fn view(&self) -> View {
        self.view
    }

    pub fn auth(&self) -> Option<&AuthContext> {
        self.auth.as_ref()
    }

    pub fn history(&self) -> &[AnalysisResult] {
        &self.history
    }

    pub fn selected(&self) -> Option<&AnalysisResult> {
        self.selected.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn record(&mut self, error: PortError) -> PortError {
        self.last_error = Some(error.to_string());
        error
    }
}
