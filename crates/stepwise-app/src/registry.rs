//! Language → tracer lookup

use std::collections::BTreeMap;
use std::time::Duration;

use stepwise_core::prelude::*;
use stepwise_tracer::{LinePolicy, ProcessLauncher, TracerSession};

use crate::config::{Settings, TracerConfig};

/// Tracers available to this run, built from [`Settings`].
#[derive(Debug, Clone)]
pub struct TracerRegistry {
    tracers: BTreeMap<String, TracerConfig>,
    shutdown_grace: Duration,
}

impl TracerRegistry {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            tracers: settings.tracers.clone(),
            shutdown_grace: settings.limits.shutdown_grace(),
        }
    }

    /// Configured languages, sorted by name
    pub fn languages(&self) -> Vec<&str> {
        self.tracers.keys().map(String::as_str).collect()
    }

    pub fn get(&self, language: &str) -> Option<&TracerConfig> {
        self.tracers.get(language)
    }

    /// A fresh, unstarted session for `language`.
    pub fn session(&self, language: &str) -> Result<TracerSession> {
        let config = self
            .get(language)
            .ok_or_else(|| Error::unknown_language(language))?;

        debug!("Creating {} session: {}", language, config.command);
        Ok(session_for_command(
            &config.command,
            config.policy.into(),
            self.shutdown_grace,
        ))
    }
}

/// A session for an ad-hoc command line not taken from the config.
pub fn session_for_command(
    command: &str,
    policy: LinePolicy,
    shutdown_grace: Duration,
) -> TracerSession {
    TracerSession::with_launcher(command, ProcessLauncher::new(shutdown_grace)).with_policy(policy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicySetting;
    use stepwise_core::SessionState;

    fn registry() -> TracerRegistry {
        let mut settings = Settings::default();
        settings.tracers.insert(
            "python".to_string(),
            TracerConfig {
                command: "python3 tracer.py".to_string(),
                policy: PolicySetting::Strict,
            },
        );
        settings.tracers.insert(
            "java".to_string(),
            TracerConfig {
                command: "java -jar tracer.jar".to_string(),
                policy: PolicySetting::Lenient,
            },
        );
        TracerRegistry::from_settings(&settings)
    }

    #[test]
    fn test_languages_sorted() {
        assert_eq!(registry().languages(), vec!["java", "python"]);
    }

    #[test]
    fn test_session_uses_language_config() {
        let session = registry().session("java").unwrap();
        assert_eq!(session.command(), "java -jar tracer.jar");
        assert_eq!(session.policy(), LinePolicy::Lenient);
        assert_eq!(session.state(), SessionState::Created);
    }

    #[test]
    fn test_unknown_language() {
        let err = registry().session("cobol").err().unwrap();
        assert!(matches!(err, Error::UnknownLanguage { .. }));
        assert_eq!(err.to_string(), "Language cobol is not available");
    }
}
