//! Host capability checks

use tokio::process::Command;
use tracing::info;

/// Check if systemd-inhibit is available on the system
pub async fn check_inhibit_available() -> Result<(), String> {
    let output = Command::new("systemd-inhibit")
        .arg("--version")
        .output()
        .await
        .map_err(|_| "systemd-inhibit is not available. Sessions will not keep the host awake.".to_string())?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("systemd-inhibit --version failed: {}", stderr));
    }

    info!("systemd-inhibit is available");
    Ok(())
}
