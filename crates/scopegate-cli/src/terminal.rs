//! Terminal consent prompt.

use async_trait::async_trait;
use dialoguer::Confirm;
use tracing::warn;

use scopegate_access::permission::{ConsentDenied, ConsentPrompt, ConsentUi};

/// Asks on the terminal before sending the user to the provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalConsent {
    auto_approve: bool,
}

impl TerminalConsent {
    /// `auto_approve` skips the question and approves every prompt.
    pub const fn new(auto_approve: bool) -> Self {
        Self { auto_approve }
    }
}

#[async_trait]
impl ConsentUi for TerminalConsent {
    async fn request_consent(&self, prompt: &ConsentPrompt) -> Result<(), ConsentDenied> {
        if self.auto_approve {
            return Ok(());
        }
        let question = format!("{}\n{}\nContinue?", prompt.title, prompt.message);
        let answer = tokio::task::spawn_blocking(move || {
            Confirm::new()
                .with_prompt(question)
                .default(false)
                .interact()
        })
        .await;

        match answer {
            Ok(Ok(true)) => Ok(()),
            Ok(Ok(false)) => Err(ConsentDenied),
            Ok(Err(e)) => {
                warn!(error = %e, "Consent prompt failed");
                Err(ConsentDenied)
            }
            Err(e) => {
                warn!(error = %e, "Consent prompt task failed");
                Err(ConsentDenied)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scopegate_core::{ScopeLevel, ServiceType};

    #[tokio::test]
    async fn auto_approve_never_prompts() {
        let ui = TerminalConsent::new(true);
        let prompt = ConsentPrompt::for_scope(ServiceType::Mail, ScopeLevel::Send);
        assert_eq!(ui.request_consent(&prompt).await, Ok(()));
    }
}
