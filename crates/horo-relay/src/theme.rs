//! Light/dark theme preference, persisted in a key-value store.

use std::sync::{Arc, RwLock};

use tracing::{error, warn};

use horo_types::theme::Theme;

use crate::error::Result;
use crate::store::KeyValueStore;

pub const THEME_STORAGE_KEY: &str = "@theme";

pub struct ThemeProvider {
    store: Arc<dyn KeyValueStore>,
    current: RwLock<Theme>,
}

impl ThemeProvider {
    /// Read the saved theme. Missing or unreadable values fall back to light.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let theme = match store.get(THEME_STORAGE_KEY) {
            Ok(Some(saved)) => saved.parse().unwrap_or_else(|e| {
                warn!("Ignoring saved theme: {e}");
                Theme::default()
            }),
            Ok(None) => Theme::default(),
            Err(e) => {
                error!("Error loading theme: {e}");
                Theme::default()
            }
        };
        Self {
            store,
            current: RwLock::new(theme),
        }
    }

    pub fn current(&self) -> Theme {
        *self.current.read().unwrap()
    }

    /// Flip the theme. The in-memory value only changes once the new value
    /// has been persisted.
    pub fn toggle(&self) -> Result<Theme> {
        let mut current = self.current.write().unwrap();
        let next = current.toggled();
        if let Err(e) = self.store.set(THEME_STORAGE_KEY, &next.to_string()) {
            error!("Error saving theme: {e}");
            return Err(e);
        }
        *current = next;
        Ok(next)
    }
}
