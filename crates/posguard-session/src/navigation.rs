//! Navigation contract and the route guard built on the validation cache.

use parking_lot::Mutex;
use tracing::debug;

use crate::cache::ValidationCache;

/// View router the guard redirects through.
pub trait Navigator: Send + Sync {
    /// Route currently displayed.
    fn current_route(&self) -> String;

    /// Navigates to `route`.
    fn redirect(&self, route: &str);
}

/// In-memory [`Navigator`] that records every redirect.
#[derive(Debug)]
pub struct HistoryNavigator {
    history: Mutex<Vec<String>>,
}

impl HistoryNavigator {
    /// Starts at `initial_route`.
    pub fn new(initial_route: impl Into<String>) -> Self {
        Self {
            history: Mutex::new(vec![initial_route.into()]),
        }
    }

    /// Every route visited, oldest first.
    pub fn history(&self) -> Vec<String> {
        self.history.lock().clone()
    }

    /// Number of redirects performed.
    pub fn redirects(&self) -> usize {
        self.history.lock().len().saturating_sub(1)
    }
}

impl Navigator for HistoryNavigator {
    fn current_route(&self) -> String {
        self.history.lock().last().cloned().unwrap_or_default()
    }

    fn redirect(&self, route: &str) {
        self.history.lock().push(route.to_string());
    }
}

/// Access requirement declared by a route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteAccess {
    /// Anyone may view.
    Public,
    /// Only signed-in users.
    RequiresAuth,
    /// Only signed-out users (the login page).
    RequiresGuest,
}

/// Outcome of a navigation check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationDecision {
    /// Continue to the requested route.
    Proceed,
    /// Go to this route instead.
    Redirect(String),
}

/// Decides whether a navigation may proceed.
#[derive(Clone)]
pub struct RouteGuard {
    cache: ValidationCache,
    login_route: String,
    home_route: String,
}

impl RouteGuard {
    /// Creates a guard.
    pub fn new(
        cache: ValidationCache,
        login_route: impl Into<String>,
        home_route: impl Into<String>,
    ) -> Self {
        Self {
            cache,
            login_route: login_route.into(),
            home_route: home_route.into(),
        }
    }

    /// Checks `access` against the current credential.
    pub async fn authorize(&self, access: RouteAccess) -> NavigationDecision {
        if access == RouteAccess::Public {
            return NavigationDecision::Proceed;
        }

        let authenticated = self.cache.check().await;
        let decision = match access {
            RouteAccess::RequiresAuth if !authenticated => {
                NavigationDecision::Redirect(self.login_route.clone())
            }
            RouteAccess::RequiresGuest if authenticated => {
                NavigationDecision::Redirect(self.home_route.clone())
            }
            _ => NavigationDecision::Proceed,
        };
        debug!(?access, authenticated, ?decision, "route guard decision");
        decision
    }
}
