//! Which browser session may talk to which execution.
//!
//! A browser is authorized for one `(environment, app route)` at a time. An
//! execution is bound to the session that started it, and frames naming an
//! execution are only relayed when the sender owns that binding.

use std::collections::HashMap;

use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
struct BrowserAccess {
    environment_id: String,
    app_route: String,
    execution_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ExecutionAccess {
    browser_session_id: String,
    environment_id: String,
}

#[derive(Debug, Default)]
struct Ledger {
    browser_sessions: HashMap<String, BrowserAccess>,
    executions: HashMap<String, ExecutionAccess>,
}

/// Both maps sit behind one lock so a session and its execution entry always
/// change together.
#[derive(Debug, Default)]
pub struct Authorizations {
    ledger: Mutex<Ledger>,
}

impl Authorizations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites any earlier authorization of this session.
    pub fn authorize_browser(&self, session_id: &str, environment_id: &str, app_route: &str) {
        self.ledger.lock().browser_sessions.insert(
            session_id.to_string(),
            BrowserAccess {
                environment_id: environment_id.to_string(),
                app_route: app_route.to_string(),
                execution_id: None,
            },
        );
    }

    /// Used when a browser reconnects in the middle of a known execution.
    pub fn authorize_browser_and_execution(
        &self,
        session_id: &str,
        environment_id: &str,
        app_route: &str,
        execution_id: &str,
    ) {
        let mut ledger = self.ledger.lock();
        ledger.browser_sessions.insert(
            session_id.to_string(),
            BrowserAccess {
                environment_id: environment_id.to_string(),
                app_route: app_route.to_string(),
                execution_id: Some(execution_id.to_string()),
            },
        );
        ledger.executions.insert(
            execution_id.to_string(),
            ExecutionAccess {
                browser_session_id: session_id.to_string(),
                environment_id: environment_id.to_string(),
            },
        );
    }

    pub fn validate_existing_execution(
        &self,
        execution_id: &str,
        session_id: &str,
        environment_id: &str,
    ) -> bool {
        self.ledger
            .lock()
            .executions
            .get(execution_id)
            .is_some_and(|access| {
                access.browser_session_id == session_id && access.environment_id == environment_id
            })
    }

    /// Bind a fresh execution to a session that is already authorized for
    /// exactly this `(environment, app route)`. Nothing changes on failure.
    pub fn authorize_new_execution_if_valid(
        &self,
        session_id: &str,
        execution_id: &str,
        environment_id: &str,
        app_route: &str,
    ) -> bool {
        let mut ledger = self.ledger.lock();

        let Some(access) = ledger.browser_sessions.get_mut(session_id) else {
            return false;
        };
        if access.environment_id != environment_id || access.app_route != app_route {
            return false;
        }

        access.execution_id = Some(execution_id.to_string());
        ledger.executions.insert(
            execution_id.to_string(),
            ExecutionAccess {
                browser_session_id: session_id.to_string(),
                environment_id: environment_id.to_string(),
            },
        );
        true
    }

    pub fn remove_browser_session(&self, session_id: &str) {
        let mut ledger = self.ledger.lock();
        if let Some(access) = ledger.browser_sessions.remove(session_id) {
            if let Some(execution_id) = access.execution_id {
                ledger.executions.remove(&execution_id);
            }
        }
    }

    /// `(sessions, executions)` currently held.
    pub fn counts(&self) -> (usize, usize) {
        let ledger = self.ledger.lock();
        (ledger.browser_sessions.len(), ledger.executions.len())
    }
}
