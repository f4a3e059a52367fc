//! 触发优雅退出的系统信号

use std::fmt;
use std::io;

use serde::{Deserialize, Serialize};

/// 可配置的退出信号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Signal {
    #[serde(rename = "SIGTERM")]
    Terminate,
    #[serde(rename = "SIGQUIT")]
    Quit,
    #[serde(rename = "SIGINT")]
    Interrupt,
    #[serde(rename = "SIGHUP")]
    Hangup,
}

impl Signal {
    /// 默认监听 SIGTERM、SIGQUIT 与 SIGINT
    pub fn defaults() -> Vec<Signal> {
        vec![Signal::Terminate, Signal::Quit, Signal::Interrupt]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::Terminate => "SIGTERM",
            Signal::Quit => "SIGQUIT",
            Signal::Interrupt => "SIGINT",
            Signal::Hangup => "SIGHUP",
        }
    }

    #[cfg(unix)]
    fn kind(&self) -> tokio::signal::unix::SignalKind {
        use tokio::signal::unix::SignalKind;
        match self {
            Signal::Terminate => SignalKind::terminate(),
            Signal::Quit => SignalKind::quit(),
            Signal::Interrupt => SignalKind::interrupt(),
            Signal::Hangup => SignalKind::hangup(),
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 等待任意一个配置的信号
///
/// 信号集合为空时永不返回。
#[cfg(unix)]
pub async fn wait_for(signals: &[Signal]) -> io::Result<Signal> {
    use tokio::signal::unix;

    if signals.is_empty() {
        return std::future::pending().await;
    }

    let mut streams = Vec::with_capacity(signals.len());
    for signal in signals {
        let stream = unix::signal(signal.kind()).inspect_err(|e| {
            tracing::error!(signal = %signal, error = %e, "Failed to install signal handler");
        })?;
        streams.push((*signal, stream));
    }

    let waits = streams.iter_mut().map(|(signal, stream)| {
        Box::pin(async move {
            stream.recv().await;
            *signal
        })
    });
    let (received, _, _) = futures::future::select_all(waits).await;

    tracing::info!(signal = %received, "Received shutdown signal");
    Ok(received)
}

#[cfg(not(unix))]
pub async fn wait_for(signals: &[Signal]) -> io::Result<Signal> {
    if !signals.contains(&Signal::Interrupt) {
        return std::future::pending().await;
    }
    tokio::signal::ctrl_c().await.inspect_err(|e| {
        tracing::error!(error = %e, "Error handling Ctrl+C signal");
    })?;
    tracing::info!(signal = %Signal::Interrupt, "Received shutdown signal");
    Ok(Signal::Interrupt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_names() {
        let signals: Vec<Signal> = serde_json::from_str(r#"["SIGTERM","SIGHUP"]"#).unwrap();
        assert_eq!(signals, vec![Signal::Terminate, Signal::Hangup]);
        assert_eq!(Signal::Quit.to_string(), "SIGQUIT");
        assert!(serde_json::from_str::<Signal>(r#""SIGKILL""#).is_err());
    }

    #[tokio::test]
    async fn test_empty_signal_set_never_fires() {
        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            wait_for(&[]),
        )
        .await;
        assert!(waited.is_err());
    }
}
