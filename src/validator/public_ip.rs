//! One-shot public IP discovery
//!
//! The anonymity probe compares echoed origin addresses against this
//! process's public IP, acquired once at startup by running the `curl`
//! command found on PATH. When discovery fails, transparent proxies cannot be
//! told apart from anonymous ones; everything else keeps working.

use once_cell::sync::OnceCell;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::warn;

use crate::hub::LogChannel;

const IP_ECHO_HOST: &str = "ip.sb";
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

static PUBLIC_IP: OnceCell<Option<String>> = OnceCell::new();

/// Discover and cache the public IP. Subsequent calls are no-ops.
pub async fn init(logs: &LogChannel) {
    if PUBLIC_IP.get().is_some() {
        return;
    }
    let discovered = discover().await;
    match &discovered {
        Some(ip) => logs.info(format!("public IP detected: {}", ip)),
        None => logs.warn(
            "public IP discovery failed; transparent proxies will not be detected".to_string(),
        ),
    }
    let _ = PUBLIC_IP.set(discovered);
}

/// The cached public IP, if discovery succeeded.
pub fn get() -> Option<&'static str> {
    PUBLIC_IP.get().and_then(|ip| ip.as_deref())
}

/// Pin the discovery result so unit tests never shell out.
#[cfg(test)]
pub(crate) fn pin_for_tests(ip: Option<String>) {
    let _ = PUBLIC_IP.set(ip);
}

async fn discover() -> Option<String> {
    let output = match timeout(
        DISCOVERY_TIMEOUT,
        Command::new("curl").arg(IP_ECHO_HOST).output(),
    )
    .await
    {
        Ok(Ok(output)) if output.status.success() => output,
        Ok(Ok(output)) => {
            warn!("ip echo command exited with {}", output.status);
            return None;
        }
        Ok(Err(e)) => {
            warn!("ip echo command failed to run: {}", e);
            return None;
        }
        Err(_) => {
            warn!("ip echo command timed out");
            return None;
        }
    };

    let ip = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if !ip.is_empty() && ip.contains('.') {
        Some(ip)
    } else {
        warn!("ip echo command returned no usable address: '{}'", ip);
        None
    }
}
