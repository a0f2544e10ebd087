//! External command channel.
//!
//! Runs a program once per recipient, substituting placeholders in its
//! arguments. Suitable for device notification CLIs such as SMS bridges.
//!
//! Supported placeholders: `{message}`, `{level}`, `{reading}`, `{id}`,
//! `{recipient}`.

use std::process::Stdio;
use std::time::Duration;

use hydro_alerts::{
    AlertError, AlertMessage, ChannelAdapter, ChannelFuture, ChannelOutcome, Result,
};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, warn};

const fn default_timeout_secs() -> u64 {
    15
}

/// Settings of a command channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSettings {
    /// Program to run.
    pub program: String,
    /// Argument templates.
    #[serde(default)]
    pub args: Vec<String>,
    /// Recipients; the program runs once per entry. Empty runs it once.
    #[serde(default)]
    pub recipients: Vec<String>,
    /// Arguments of the availability check. No check when absent.
    #[serde(default)]
    pub probe_args: Option<Vec<String>>,
    /// Upper bound on one invocation.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

/// A channel that shells out to an external program.
#[derive(Debug, Clone)]
pub struct CommandChannel {
    name: String,
    settings: CommandSettings,
}

impl CommandChannel {
    /// Creates a command channel.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidConfig` if the program is empty or the
    /// timeout is zero.
    pub fn new(name: impl Into<String>, settings: CommandSettings) -> Result<Self> {
        let name = name.into();
        if settings.program.trim().is_empty() {
            return Err(AlertError::InvalidConfig {
                reason: format!("channel '{name}': program cannot be empty"),
            });
        }
        if settings.timeout_secs == 0 {
            return Err(AlertError::InvalidConfig {
                reason: format!("channel '{name}': timeout_secs must be positive"),
            });
        }
        Ok(Self { name, settings })
    }

    /// Returns the settings.
    #[must_use]
    pub const fn settings(&self) -> &CommandSettings {
        &self.settings
    }

    /// Expands the argument templates for one recipient.
    #[must_use]
    pub fn render_args(&self, message: &AlertMessage, recipient: &str) -> Vec<String> {
        let reading = format!("{:.0}", message.reading);
        self.settings
            .args
            .iter()
            .map(|arg| {
                arg.replace("{message}", &message.text)
                    .replace("{level}", message.level.as_str())
                    .replace("{reading}", &reading)
                    .replace("{id}", message.short_id())
                    .replace("{recipient}", recipient)
            })
            .collect()
    }

    async fn run(&self, args: &[String]) -> std::result::Result<(), String> {
        let timeout = Duration::from_secs(self.settings.timeout_secs);
        let mut cmd = Command::new(&self.settings.program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        match tokio::time::timeout(timeout, cmd.output()).await {
            Err(_) => Err(format!("timed out after {}s", self.settings.timeout_secs)),
            Ok(Err(e)) => Err(format!("failed to run {}: {e}", self.settings.program)),
            Ok(Ok(output)) if output.status.success() => Ok(()),
            Ok(Ok(output)) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                let stderr = stderr.trim();
                if stderr.is_empty() {
                    Err(format!("{} exited with {}", self.settings.program, output.status))
                } else {
                    Err(format!(
                        "{} exited with {}: {stderr}",
                        self.settings.program, output.status
                    ))
                }
            }
        }
    }
}

impl ChannelAdapter for CommandChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn send<'a>(&'a self, message: &'a AlertMessage) -> ChannelFuture<'a, ChannelOutcome> {
        Box::pin(async move {
            let recipients: Vec<&str> = if self.settings.recipients.is_empty() {
                vec![""]
            } else {
                self.settings.recipients.iter().map(String::as_str).collect()
            };

            let mut failures = Vec::new();
            for recipient in recipients {
                let args = self.render_args(message, recipient);
                match self.run(&args).await {
                    Ok(()) => {
                        debug!(channel = %self.name, recipient, id = %message.short_id(), "command delivered");
                    }
                    Err(reason) => {
                        warn!(channel = %self.name, recipient, error = %reason, "command failed");
                        if recipient.is_empty() {
                            failures.push(reason);
                        } else {
                            failures.push(format!("{recipient}: {reason}"));
                        }
                    }
                }
            }

            if failures.is_empty() {
                ChannelOutcome::Delivered
            } else {
                ChannelOutcome::failure(failures.join("; "))
            }
        })
    }

    fn probe(&self) -> ChannelFuture<'_, bool> {
        Box::pin(async move {
            match &self.settings.probe_args {
                Some(args) => match self.run(args).await {
                    Ok(()) => true,
                    Err(reason) => {
                        debug!(channel = %self.name, error = %reason, "probe command failed");
                        false
                    }
                },
                None => true,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hydro_alerts::{AlertEvent, AlertKind, AlertLevel};

    fn message() -> AlertMessage {
        let event = AlertEvent::new(
            AlertKind::Transition,
            AlertLevel::Warning,
            AlertLevel::Danger,
            265.4,
            0.0,
        );
        AlertMessage::from_event(&event)
    }

    fn settings(program: &str, args: &[&str]) -> CommandSettings {
        CommandSettings {
            program: program.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
            recipients: Vec::new(),
            probe_args: None,
            timeout_secs: 5,
        }
    }

    mod construction_tests {
        use super::*;

        #[test]
        fn empty_program_is_rejected() {
            assert!(CommandChannel::new("sms", settings(" ", &[])).is_err());
        }

        #[test]
        fn zero_timeout_is_rejected() {
            let mut settings = settings("true", &[]);
            settings.timeout_secs = 0;
            assert!(CommandChannel::new("sms", settings).is_err());
        }

        #[test]
        fn settings_defaults() {
            let parsed: CommandSettings =
                serde_json::from_value(serde_json::json!({ "program": "notify" })).unwrap();
            assert!(parsed.args.is_empty());
            assert!(parsed.recipients.is_empty());
            assert_eq!(parsed.probe_args, None);
            assert_eq!(parsed.timeout_secs, 15);
        }
    }

    mod render_tests {
        use super::*;

        #[test]
        fn placeholders_are_substituted() {
            let channel = CommandChannel::new(
                "sms",
                settings(
                    "notify",
                    &["--to", "{recipient}", "[{level}] {reading}cm", "{message}", "#{id}"],
                ),
            )
            .unwrap();
            let message = message();

            let args = channel.render_args(&message, "+15550100");
            assert_eq!(args[1], "+15550100");
            assert_eq!(args[2], "[DANGER] 265cm");
            assert_eq!(args[3], message.text);
            assert_eq!(args[4], format!("#{}", message.short_id()));
        }
    }

    mod send_tests {
        use super::*;

        #[tokio::test]
        async fn successful_program_delivers() {
            let channel = CommandChannel::new("sms", settings("true", &[])).unwrap();
            assert!(channel.send(&message()).await.is_delivered());
        }

        #[tokio::test]
        async fn failing_program_reports_status() {
            let channel = CommandChannel::new("sms", settings("false", &[])).unwrap();
            let outcome = channel.send(&message()).await;
            assert!(outcome.reason().is_some_and(|r| r.contains("exited with")));
        }

        #[tokio::test]
        async fn missing_program_fails() {
            let channel =
                CommandChannel::new("sms", settings("/nonexistent/hydroguard-notify", &[])).unwrap();
            let outcome = channel.send(&message()).await;
            assert!(outcome.reason().is_some_and(|r| r.contains("failed to run")));
        }

        #[tokio::test]
        async fn slow_program_times_out() {
            let mut settings = settings("sleep", &["5"]);
            settings.timeout_secs = 1;
            let channel = CommandChannel::new("sms", settings).unwrap();
            let outcome = channel.send(&message()).await;
            assert!(outcome.reason().is_some_and(|r| r.contains("timed out")));
        }

        #[tokio::test]
        async fn runs_once_per_recipient() {
            let dir = tempfile::tempdir().unwrap();
            let log = dir.path().join("sent.log");
            let script = format!("printf '%s\\n' \"$1\" >> {}", log.display());

            let mut settings = settings("sh", &["-c", script.as_str(), "sh", "{recipient}: {message}"]);
            settings.recipients = vec!["alice".to_string(), "bob".to_string()];
            let channel = CommandChannel::new("sms", settings).unwrap();

            let message = message();
            assert!(channel.send(&message).await.is_delivered());

            let sent = std::fs::read_to_string(&log).unwrap();
            let lines: Vec<&str> = sent.lines().collect();
            assert_eq!(lines.len(), 2);
            assert_eq!(lines[0], format!("alice: {}", message.text));
            assert!(lines[1].starts_with("bob: FLOOD ALERT [DANGER]"));
        }
    }

    mod probe_tests {
        use super::*;

        #[tokio::test]
        async fn no_probe_args_is_available() {
            let channel = CommandChannel::new("sms", settings("notify", &[])).unwrap();
            assert!(channel.probe().await);
        }

        #[tokio::test]
        async fn probe_runs_probe_args() {
            let mut ok = settings("sh", &[]);
            ok.probe_args = Some(vec!["-c".to_string(), "exit 0".to_string()]);
            assert!(CommandChannel::new("sms", ok).unwrap().probe().await);

            let mut down = settings("sh", &[]);
            down.probe_args = Some(vec!["-c".to_string(), "exit 3".to_string()]);
            assert!(!CommandChannel::new("sms", down).unwrap().probe().await);
        }
    }
}
