use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use chromiumoxide::Page;

use crate::core::session::wait_for_element;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Text,
    Password,
    Email,
}

#[derive(Debug, Clone)]
pub struct LoginField {
    pub label: &'static str,
    pub kind: InputKind,
    pub desc: &'static str,
}

/// Credentials shape consumed by `LoginStrategy::execute`. `custom` holds
/// the strategy's manual-entry fields keyed positionally ("field0",
/// "field1", ...); absent or empty disables the strategy-specific steps.
#[derive(Debug, Clone, Default)]
pub struct LoginCredentials {
    /// The reserved top-level identifier typed into the shared email step.
    pub msid: String,
    pub custom: Option<HashMap<String, String>>,
}

impl LoginCredentials {
    pub fn custom_field(&self, index: usize) -> Option<&str> {
        self.custom
            .as_ref()
            .and_then(|m| m.get(&format!("field{}", index)))
            .map(|s| s.as_str())
    }

    pub fn has_custom(&self) -> bool {
        self.custom.as_ref().map(|m| !m.is_empty()).unwrap_or(false)
    }
}

/// The closed set of per-institution authentication sequences. Selected by
/// index at configuration time; stateless between invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoginStrategy {
    /// Shared identifier step only; the user completes sign-in by hand in
    /// the headed browser while the driver waits for the player.
    #[default]
    Manual,
    /// Username + password sequence against a simple university IdP.
    SimpleUniversity,
    /// No interaction at all, for already-authenticated sessions.
    Bypass,
}

impl LoginStrategy {
    pub fn module_names() -> &'static [&'static str] {
        &["Basic - Manual login", "University [Simple]", "Bypass login"]
    }

    /// Out-of-range indices fall back to the manual strategy.
    pub fn from_index(index: usize) -> Self {
        match index {
            1 => LoginStrategy::SimpleUniversity,
            2 => LoginStrategy::Bypass,
            _ => LoginStrategy::Manual,
        }
    }

    pub fn is_bypass(&self) -> bool {
        matches!(self, LoginStrategy::Bypass)
    }

    /// Manual-entry fields the strategy needs at runtime, in positional
    /// order ("field0", "field1", ...).
    pub fn fields(&self) -> Vec<LoginField> {
        match self {
            LoginStrategy::Manual | LoginStrategy::Bypass => Vec::new(),
            LoginStrategy::SimpleUniversity => vec![
                LoginField {
                    label: "Username",
                    kind: InputKind::Text,
                    desc: "Username provided by your university",
                },
                LoginField {
                    label: "Password",
                    kind: InputKind::Password,
                    desc: "",
                },
            ],
        }
    }

    /// Drives the identity-provider page in the context of a live session.
    /// A failed step bubbles up as a session-resolution failure; there is
    /// no internal retry.
    pub async fn execute(
        &self,
        page: &Page,
        creds: &LoginCredentials,
        timeout: Duration,
    ) -> anyhow::Result<()> {
        if self.is_bypass() {
            return Ok(());
        }

        wait_for_element(page, "input[type=\"email\"]", timeout).await?;
        if !creds.msid.is_empty() {
            page.find_element("input[type=\"email\"]")
                .await?
                .click()
                .await?
                .type_str(&creds.msid)
                .await?;
            page.find_element("input[type=\"submit\"]").await?.click().await?;
        }

        if !creds.has_custom() {
            return Ok(());
        }

        match self {
            LoginStrategy::SimpleUniversity => {
                self.simple_university(page, creds, timeout).await
            }
            _ => Ok(()),
        }
    }

    async fn simple_university(
        &self,
        page: &Page,
        creds: &LoginCredentials,
        timeout: Duration,
    ) -> anyhow::Result<()> {
        let username = creds.custom_field(0).context("missing login field0")?;
        let password = creds.custom_field(1).context("missing login field1")?;

        page.wait_for_navigation().await?;
        wait_for_element(page, "input[type=\"text\"]", timeout).await?;
        page.find_element("input[type=\"text\"]")
            .await?
            .click()
            .await?
            .type_str(username)
            .await?;
        wait_for_element(page, "input[type=\"password\"]", timeout).await?;
        page.find_element("input[type=\"password\"]")
            .await?
            .click()
            .await?
            .type_str(password)
            .await?;
        wait_for_element(page, "[type=\"submit\"]", timeout).await?;
        page.find_element("[type=\"submit\"]").await?.click().await?;
        page.wait_for_navigation().await?;

        // "Stay signed in?" interstitial, shown only sometimes.
        if let Ok(back) = page.find_element("input[id=\"idBtn_Back\"]").await {
            let _ = back.click().await;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_resolution_with_fallback() {
        assert_eq!(LoginStrategy::from_index(0), LoginStrategy::Manual);
        assert_eq!(LoginStrategy::from_index(1), LoginStrategy::SimpleUniversity);
        assert_eq!(LoginStrategy::from_index(2), LoginStrategy::Bypass);
        assert_eq!(LoginStrategy::from_index(99), LoginStrategy::Manual);
    }

    #[test]
    fn module_list_matches_strategy_count() {
        assert_eq!(LoginStrategy::module_names().len(), 3);
    }

    #[test]
    fn field_lists() {
        assert!(LoginStrategy::Manual.fields().is_empty());
        assert!(LoginStrategy::Bypass.fields().is_empty());
        let fields = LoginStrategy::SimpleUniversity.fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1].kind, InputKind::Password);
    }

    #[test]
    fn positional_field_lookup() {
        let mut custom = HashMap::new();
        custom.insert("field0".to_string(), "alice".to_string());
        custom.insert("field1".to_string(), "secret".to_string());
        let creds = LoginCredentials {
            msid: "alice@uni.example".into(),
            custom: Some(custom),
        };
        assert_eq!(creds.custom_field(0), Some("alice"));
        assert_eq!(creds.custom_field(1), Some("secret"));
        assert_eq!(creds.custom_field(2), None);
        assert!(creds.has_custom());
    }

    #[test]
    fn empty_custom_disables_automatic_login() {
        let creds = LoginCredentials {
            msid: "alice@uni.example".into(),
            custom: Some(HashMap::new()),
        };
        assert!(!creds.has_custom());
        let creds = LoginCredentials::default();
        assert!(!creds.has_custom());
    }
}
