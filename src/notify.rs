//! User notifications
//!
//! Every notification goes to the log. When enabled and a desktop notifier
//! binary is available it is also shown on the desktop: `notify-send` on
//! Linux, `terminal-notifier` on macOS. Failing to notify never fails the
//! operation that triggered it.

use crate::config::NotificationConfig;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

/// Upper bound on a single notifier invocation
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Notification sink
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Show `message` under `title`
    async fn notify(&self, title: &str, message: &str);

    /// Name of the implementation
    fn name(&self) -> &'static str;
}

/// Which desktop notifier binary is driven
#[derive(Clone, Debug, PartialEq, Eq)]
enum Backend {
    NotifySend(PathBuf),
    TerminalNotifier(PathBuf),
    LogOnly,
}

/// Desktop notifier, falling back to log-only output
#[derive(Clone, Debug)]
pub struct DesktopNotifier {
    backend: Backend,
}

impl DesktopNotifier {
    /// Detect the platform's notifier binary in PATH
    pub fn detect() -> Self {
        let backend = if cfg!(target_os = "macos") {
            which::which("terminal-notifier").map(Backend::TerminalNotifier)
        } else if cfg!(unix) {
            which::which("notify-send").map(Backend::NotifySend)
        } else {
            Ok(Backend::LogOnly)
        };

        match backend {
            Ok(backend) => Self { backend },
            Err(e) => {
                tracing::debug!(error = %e, "no desktop notifier found, notifications go to the log only");
                Self::log_only()
            }
        }
    }

    /// Build from the notification settings
    pub fn from_config(config: &NotificationConfig) -> Self {
        if config.enabled {
            Self::detect()
        } else {
            Self::log_only()
        }
    }

    /// A notifier that only logs
    pub fn log_only() -> Self {
        Self {
            backend: Backend::LogOnly,
        }
    }

    /// Drive `notify-send` at `binary_path`
    pub fn notify_send(binary_path: PathBuf) -> Self {
        Self {
            backend: Backend::NotifySend(binary_path),
        }
    }

    /// Drive `terminal-notifier` at `binary_path`
    pub fn terminal_notifier(binary_path: PathBuf) -> Self {
        Self {
            backend: Backend::TerminalNotifier(binary_path),
        }
    }

    fn command(&self, title: &str, message: &str) -> Option<(&PathBuf, Vec<String>)> {
        match &self.backend {
            Backend::NotifySend(path) => Some((
                path,
                vec![
                    "--hint=int:transient:1".to_string(),
                    "--urgency=normal".to_string(),
                    "--".to_string(),
                    title.to_string(),
                    message.to_string(),
                ],
            )),
            Backend::TerminalNotifier(path) => Some((
                path,
                vec![
                    "-title".to_string(),
                    title.to_string(),
                    "-message".to_string(),
                    message.to_string(),
                ],
            )),
            Backend::LogOnly => None,
        }
    }
}

#[async_trait]
impl Notifier for DesktopNotifier {
    async fn notify(&self, title: &str, message: &str) {
        tracing::info!(title = %title, message = %message, "notification");

        let Some((binary, args)) = self.command(title, message) else {
            return;
        };

        let result = tokio::time::timeout(
            NOTIFY_TIMEOUT,
            tokio::process::Command::new(binary)
                .args(&args)
                .stdin(std::process::Stdio::null())
                .kill_on_drop(true)
                .output(),
        )
        .await;

        match result {
            Ok(Ok(output)) if output.status.success() => {
                tracing::debug!(binary = ?binary, "notification sent");
            }
            Ok(Ok(output)) => {
                tracing::warn!(
                    binary = ?binary,
                    code = ?output.status.code(),
                    "desktop notifier failed"
                );
            }
            Ok(Err(e)) => {
                tracing::warn!(binary = ?binary, error = %e, "failed to run desktop notifier");
            }
            Err(_) => {
                tracing::warn!(binary = ?binary, timeout = ?NOTIFY_TIMEOUT, "desktop notifier timed out");
            }
        }
    }

    fn name(&self) -> &'static str {
        match self.backend {
            Backend::NotifySend(_) => "notify-send",
            Backend::TerminalNotifier(_) => "terminal-notifier",
            Backend::LogOnly => "log",
        }
    }
}
