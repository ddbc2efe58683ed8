//! System prompt rendering.
//!
//! The session asks a [`ContextSource`] for a fresh snapshot of host state on every round-trip
//! and hands it, together with any standing user directives, to a [`SystemPromptProvider`].
//! Both are supplied by the host; [`DefaultPromptBuilder`] and [`StaticContext`] cover the
//! simple cases.

/// Supplies host state to embed in the system prompt.
pub trait ContextSource: Send + Sync {
    /// Current state rendered as text. Empty when there is nothing to report.
    fn snapshot(&self) -> String;

    /// Standing instructions from the user, if any.
    fn directives(&self) -> Option<String> {
        None
    }
}

/// Renders the system prompt for one request.
pub trait SystemPromptProvider: Send + Sync {
    fn build(&self, context_snapshot: &str, directives: Option<&str>) -> String;
}

/// Fixed snapshot and directives.
#[derive(Debug, Clone, Default)]
pub struct StaticContext {
    pub snapshot: String,
    pub directives: Option<String>,
}

impl StaticContext {
    pub fn new(snapshot: impl Into<String>) -> Self {
        Self {
            snapshot: snapshot.into(),
            directives: None,
        }
    }

    pub fn with_directives(mut self, directives: impl Into<String>) -> Self {
        self.directives = Some(directives.into());
        self
    }
}

impl ContextSource for StaticContext {
    fn snapshot(&self) -> String {
        self.snapshot.clone()
    }

    fn directives(&self) -> Option<String> {
        self.directives.clone()
    }
}

/// Base instructions followed by optional directives and snapshot sections.
#[derive(Debug, Clone)]
pub struct DefaultPromptBuilder {
    assistant_name: String,
    base_prompt: String,
}

const DEFAULT_GUIDELINES: &str = "\
You have access to tools that let you query detailed information about the current state. \
Use them before answering; do not guess.

GUIDELINES:
- You can call multiple tools in sequence to gather comprehensive information.
- Be concise but helpful. Use 1-3 sentences unless asked for detail.
- When giving advice, be specific and actionable.
- If asked about something your tools cannot query, say so honestly.";

impl DefaultPromptBuilder {
    pub fn new(assistant_name: &str) -> Self {
        Self {
            assistant_name: assistant_name.to_string(),
            base_prompt: DEFAULT_GUIDELINES.to_string(),
        }
    }

    /// Replace the guideline block that follows the "You are ..." line.
    pub fn with_base_prompt(mut self, base_prompt: &str) -> Self {
        self.base_prompt = base_prompt.to_string();
        self
    }
}

impl Default for DefaultPromptBuilder {
    fn default() -> Self {
        Self::new("an AI assistant")
    }
}

impl SystemPromptProvider for DefaultPromptBuilder {
    fn build(&self, context_snapshot: &str, directives: Option<&str>) -> String {
        let mut prompt = format!("You are {}.\n\n{}\n", self.assistant_name, self.base_prompt);

        if let Some(directives) = directives.map(str::trim).filter(|d| !d.is_empty()) {
            prompt.push_str("\nStanding directives from the user (always respect these):\n");
            prompt.push_str(directives);
            prompt.push('\n');
        }

        let snapshot = context_snapshot.trim();
        if !snapshot.is_empty() {
            prompt.push_str("\nCurrent snapshot:\n");
            prompt.push_str(snapshot);
            prompt.push('\n');
        }
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_are_optional() {
        let builder = DefaultPromptBuilder::new("RelayBot");
        let bare = builder.build("", None);
        assert!(bare.starts_with("You are RelayBot."));
        assert!(!bare.contains("snapshot"));
        assert!(!bare.contains("directives"));

        let full = builder.build("3 colonists, 40 meals", Some("  prioritize food "));
        assert!(full.contains("Current snapshot:\n3 colonists, 40 meals\n"));
        assert!(full.contains("(always respect these):\nprioritize food\n"));
        assert!(full.find("directives").unwrap() < full.find("snapshot").unwrap());
    }

    #[test]
    fn test_blank_directives_are_skipped() {
        let prompt = DefaultPromptBuilder::default().build("x", Some("   "));
        assert!(!prompt.contains("directives"));
    }
}
