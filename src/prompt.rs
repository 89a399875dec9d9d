use crate::error::MigrationError;

/// Operator interaction. Kept behind a trait so runs can be scripted in tests.
pub trait Prompter: Send + Sync {
    /// Free-text answer. An empty string means "no answer".
    fn text(&self, prompt: &str, help: Option<&str>) -> Result<String, MigrationError>;

    fn confirm(&self, prompt: &str, default: bool) -> Result<bool, MigrationError>;
}

/// Terminal prompts through `inquire`.
pub struct InquirePrompter;

impl Prompter for InquirePrompter {
    fn text(&self, prompt: &str, help: Option<&str>) -> Result<String, MigrationError> {
        use inquire::Text;
        let mut text = Text::new(prompt);
        if let Some(help) = help {
            text = text.with_help_message(help);
        }
        text.prompt().map(|s| s.trim().to_string()).map_err(from_inquire)
    }

    fn confirm(&self, prompt: &str, default: bool) -> Result<bool, MigrationError> {
        use inquire::Confirm;
        Confirm::new(prompt).with_default(default).prompt().map_err(from_inquire)
    }
}

fn from_inquire(err: inquire::InquireError) -> MigrationError {
    match err {
        inquire::InquireError::OperationCanceled | inquire::InquireError::OperationInterrupted => MigrationError::Cancelled,
        inquire::InquireError::IO(e) => MigrationError::io("Prompt failed", e),
        other => MigrationError::external("Prompt failed", other),
    }
}
