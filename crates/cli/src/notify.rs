//! End-of-run notification delivery

use crate::system_config::NotifyConfig;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use vault_journal::Notifier;

const SEND_TIMEOUT: Duration = Duration::from_secs(120);

/// Pipes an RFC 5322 message into a mail command such as `sendmail -t`
#[derive(Debug, Clone)]
pub struct CommandNotifier {
    command: Vec<String>,
    from: String,
}

impl CommandNotifier {
    pub fn new(command: Vec<String>, from: impl Into<String>) -> Self {
        Self {
            command,
            from: from.into(),
        }
    }

    /// Message text handed to the mail command
    pub fn render(&self, recipients: &[String], subject: &str, body: &str) -> String {
        let mut message = String::new();
        message.push_str(&format!("From: {}\r\n", self.from));
        message.push_str(&format!("To: {}\r\n", recipients.join(", ")));
        message.push_str(&format!("Subject: {}\r\n", subject));
        message.push_str(&format!("Date: {}\r\n", Utc::now().to_rfc2822()));
        message.push_str("MIME-Version: 1.0\r\n");
        message.push_str("Content-Type: text/plain; charset=utf-8\r\n");
        message.push_str("\r\n");
        for line in body.lines() {
            message.push_str(line);
            message.push_str("\r\n");
        }
        message
    }
}

#[async_trait]
impl Notifier for CommandNotifier {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<()> {
        let (program, args) = self
            .command
            .split_first()
            .context("Notification command is empty")?;
        let message = self.render(recipients, subject, body);

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to start {}", program))?;

        let mut stdin = child.stdin.take().context("Mail command has no stdin")?;
        stdin
            .write_all(message.as_bytes())
            .await
            .with_context(|| format!("Failed to write message to {}", program))?;
        drop(stdin);

        let output = tokio::time::timeout(SEND_TIMEOUT, child.wait_with_output())
            .await
            .with_context(|| format!("{} timed out", program))??;
        if !output.status.success() {
            bail!(
                "{} exited with {}: {}",
                program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

/// Writes the notification to the log instead of sending it
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, recipients: &[String], subject: &str, body: &str) -> Result<()> {
        tracing::info!("Notification for {}: {}", recipients.join(", "), subject);
        for line in body.lines() {
            tracing::info!("  {}", line);
        }
        Ok(())
    }
}

/// Notifier for this invocation
pub fn notifier_for(config: &NotifyConfig, disabled: bool) -> Box<dyn Notifier> {
    if disabled || config.recipients.is_empty() || config.command.is_empty() {
        tracing::debug!("Email disabled, notifications go to the log");
        Box::new(LogNotifier)
    } else {
        Box::new(CommandNotifier::new(config.command.clone(), &config.from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_render_headers() {
        let notifier = CommandNotifier::new(vec!["sendmail".into(), "-t".into()], "backups@example.org");
        let message = notifier.render(
            &["a@example.org".to_string(), "b@example.org".to_string()],
            "ccb_backup backup completed without errors",
            "line one\nline two",
        );
        assert!(message.starts_with("From: backups@example.org\r\n"));
        assert!(message.contains("To: a@example.org, b@example.org\r\n"));
        assert!(message.contains("Subject: ccb_backup backup completed without errors\r\n"));
        assert!(message.ends_with("\r\n\r\nline one\r\nline two\r\n"));
    }

    #[tokio::test]
    async fn test_send_pipes_message_to_command() {
        let temp_dir = TempDir::new().unwrap();
        let spool = temp_dir.path().join("spool.eml");
        let notifier = CommandNotifier::new(
            vec![
                "sh".into(),
                "-c".into(),
                format!("cat > '{}'", spool.display()),
            ],
            "backups@example.org",
        );

        notifier
            .send(&["admin@example.org".to_string()], "hello", "body text")
            .await
            .unwrap();

        let written = std::fs::read_to_string(&spool).unwrap();
        assert!(written.contains("Subject: hello"));
        assert!(written.contains("body text"));
    }

    #[tokio::test]
    async fn test_failing_command_is_error() {
        let notifier = CommandNotifier::new(
            vec!["sh".into(), "-c".into(), "cat >/dev/null; exit 75".into()],
            "x@example.org",
        );
        assert!(notifier
            .send(&["a@example.org".to_string()], "s", "b")
            .await
            .is_err());
    }
}
