use async_trait::async_trait;
use std::net::IpAddr;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time;
use tracing::{debug, info, info_span, Instrument, Span};

/// Size of the echo payload, matching the usual `ping` default.
const PAYLOAD_LEN: usize = 56;

/// A single reachability check.
///
/// Implementations must normalize every failure mode (timeout, unreachable,
/// socket or permission errors) to `false`.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, addr: IpAddr, timeout: Duration) -> bool;
}

/// ICMP echo through a raw socket. Usually needs elevated privileges; without
/// them every attempt reports unreachable.
#[derive(Debug, Clone)]
pub struct IcmpProbe {
    span: Span,
}

impl IcmpProbe {
    pub fn new() -> Self {
        Self::with_span(info_span!("icmp_probe"))
    }

    pub fn with_span(span: Span) -> Self {
        Self { span }
    }
}

impl Default for IcmpProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe for IcmpProbe {
    async fn probe(&self, addr: IpAddr, timeout: Duration) -> bool {
        async move {
            debug!(%addr, "pinging");
            let payload = [0u8; PAYLOAD_LEN];
            match time::timeout(timeout, surge_ping::ping(addr, &payload)).await {
                Ok(Ok((_packet, rtt))) => {
                    info!(%addr, rtt_ms = rtt.as_millis() as u64, "reachable");
                    true
                }
                Ok(Err(e)) => {
                    debug!(%addr, error = %e, "ping failed");
                    false
                }
                Err(_) => {
                    debug!(%addr, timeout_ms = timeout.as_millis() as u64, "ping timed out");
                    false
                }
            }
        }
        .instrument(self.span.clone())
        .await
    }
}

/// Shells out to the platform `ping` for a single echo. Works without raw
/// socket privileges on most systems.
#[derive(Debug, Clone)]
pub struct SystemPingProbe {
    span: Span,
}

impl SystemPingProbe {
    pub fn new() -> Self {
        Self::with_span(info_span!("system_ping_probe"))
    }

    pub fn with_span(span: Span) -> Self {
        Self { span }
    }

    fn command(addr: IpAddr, timeout: Duration) -> Command {
        let mut cmd = Command::new("ping");

        #[cfg(target_os = "windows")]
        cmd.args(["-n", "1", "-w"])
            .arg(timeout.as_millis().max(1).to_string());

        #[cfg(not(target_os = "windows"))]
        cmd.args(["-c", "1", "-W"]).arg(whole_seconds(timeout).to_string());

        cmd.arg(addr.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd
    }
}

impl Default for SystemPingProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Probe for SystemPingProbe {
    async fn probe(&self, addr: IpAddr, timeout: Duration) -> bool {
        async move {
            debug!(%addr, "running system ping");
            let mut cmd = Self::command(addr, timeout);
            // The child gets its own -W; the outer bound covers process startup.
            let bound = timeout + Duration::from_secs(1);
            match time::timeout(bound, cmd.status()).await {
                Ok(Ok(status)) if status.success() => {
                    info!(%addr, "reachable");
                    true
                }
                Ok(Ok(status)) => {
                    debug!(%addr, code = ?status.code(), "ping exited unsuccessfully");
                    false
                }
                Ok(Err(e)) => {
                    debug!(%addr, error = %e, "failed to run ping");
                    false
                }
                Err(_) => {
                    debug!(%addr, "ping command timed out");
                    false
                }
            }
        }
        .instrument(self.span.clone())
        .await
    }
}

/// `ping -W` takes whole seconds; round up and never pass zero.
fn whole_seconds(timeout: Duration) -> u64 {
    let secs = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0);
    secs.max(1)
}
