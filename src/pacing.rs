use std::time::Duration;

use log::debug;

/// Fixed pause between UI steps so the target site isn't hammered.
pub async fn pause(duration: Duration) {
    if duration.is_zero() {
        return;
    }
    debug!("Waiting for {duration:?}...");
    tokio::time::sleep(duration).await;
}
