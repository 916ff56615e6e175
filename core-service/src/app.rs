//! Application instances.
//!
//! An app is a named configuration scope. Feature modules are created per app
//! and every module that does not support multiple apps only runs on the
//! default one.

use std::fmt;

pub const DEFAULT_APP_NAME: &str = "[DEFAULT]";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppInstance {
    name: String,
}

impl AppInstance {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn default_app() -> Self {
        Self::new(DEFAULT_APP_NAME)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_default(&self) -> bool {
        self.name == DEFAULT_APP_NAME
    }
}

impl Default for AppInstance {
    fn default() -> Self {
        Self::default_app()
    }
}

impl fmt::Display for AppInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_app() {
        let app = AppInstance::default();
        assert_eq!(app.name(), "[DEFAULT]");
        assert!(app.is_default());
        assert!(!AppInstance::new("secondary").is_default());
    }
}
