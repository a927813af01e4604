//! Agent command-line construction.
//!
//! The multiplexer runs the command through a shell, so every user-supplied
//! value is passed through [`quote_arg`].

/// Flag that skips the agent's interactive permission prompts.
pub const AUTO_APPROVE_FLAG: &str = "--dangerously-skip-permissions";

/// Inputs to [`build_agent_command`].
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions<'a> {
    /// Model override.
    pub model: Option<&'a str>,
    /// Session UUID to resume.
    pub resume: Option<&'a str>,
    /// Prompt handed to the agent on startup.
    pub initial_prompt: Option<&'a str>,
    /// Skip permission prompts.
    pub auto_approve: bool,
}

/// Compose the shell command that launches `agent_binary`.
///
/// Flags are only emitted for inputs that are present and non-empty.
#[must_use]
pub fn build_agent_command(agent_binary: &str, opts: &LaunchOptions<'_>) -> String {
    let mut parts = vec![agent_binary.to_owned()];

    if opts.auto_approve {
        parts.push(AUTO_APPROVE_FLAG.to_owned());
    }
    if let Some(model) = opts.model.filter(|m| !m.is_empty()) {
        parts.push("--model".to_owned());
        parts.push(quote_arg(model));
    }
    if let Some(resume) = opts.resume.filter(|r| !r.is_empty()) {
        parts.push("--resume".to_owned());
        parts.push(quote_arg(resume));
    }
    if let Some(prompt) = opts.initial_prompt.filter(|p| !p.is_empty()) {
        parts.push("-p".to_owned());
        parts.push(double_quote(prompt));
    }

    parts.join(" ")
}

/// Leave shell-safe tokens bare and double-quote anything else.
#[must_use]
pub fn quote_arg(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '@' | '='));
    if safe {
        value.to_owned()
    } else {
        double_quote(value)
    }
}

/// Wrap `value` in double quotes, escaping the characters a POSIX shell
/// still interprets there.
#[must_use]
pub fn double_quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        if matches!(c, '\\' | '"' | '$' | '`') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('"');
    out
}
