use crate::errors::{Error, Result};
use crate::sntp::SntpClient;
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Serialize, Serializer};
use std::fmt;
use tokio::time::Instant;
use tracing::{debug, info};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Wall-clock time in the node's configured offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp(pub DateTime<FixedOffset>);

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy)]
struct Anchor {
    at: Instant,
    utc: DateTime<Utc>,
}

/// Free-running clock re-anchored on every successful sync.
///
/// Until the first sync the clock reads the Unix epoch plus uptime. Each sync
/// may step the reading forward or backward.
pub struct TimeSource {
    sntp: SntpClient,
    offset: FixedOffset,
    boot: Instant,
    anchor: Option<Anchor>,
}

impl TimeSource {
    pub fn new(sntp: SntpClient, utc_offset_secs: i32) -> Result<Self> {
        let offset = FixedOffset::east_opt(utc_offset_secs)
            .ok_or_else(|| Error::Config(format!("UTC offset out of range: {}", utc_offset_secs)))?;

        Ok(Self {
            sntp,
            offset,
            boot: Instant::now(),
            anchor: None,
        })
    }

    pub async fn sync(&mut self) -> Result<()> {
        let utc = self.sntp.query().await?;
        self.set_time(utc);
        Ok(())
    }

    /// Re-anchor the clock so that it reads `utc` now.
    pub fn set_time(&mut self, utc: DateTime<Utc>) {
        let at = Instant::now();
        match self.anchor {
            Some(_) => {
                let step = utc - self.utc_at(at);
                debug!("Clock stepped by {} ms", step.num_milliseconds());
            }
            None => info!("Clock set to {}", utc.with_timezone(&self.offset).format(TIMESTAMP_FORMAT)),
        }
        self.anchor = Some(Anchor { at, utc });
    }

    pub fn is_synced(&self) -> bool {
        self.anchor.is_some()
    }

    pub fn now(&self) -> Timestamp {
        Timestamp(self.utc_at(Instant::now()).with_timezone(&self.offset))
    }

    fn utc_at(&self, at: Instant) -> DateTime<Utc> {
        let (base, since) = match self.anchor {
            Some(anchor) => (anchor.utc, at.saturating_duration_since(anchor.at)),
            None => (DateTime::<Utc>::UNIX_EPOCH, at.saturating_duration_since(self.boot)),
        };
        base + chrono::Duration::from_std(since).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::time::Duration;

    fn source(offset: i32) -> TimeSource {
        let sntp = SntpClient::new("127.0.0.1:9", Duration::from_millis(10));
        TimeSource::new(sntp, offset).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsynced_clock_reads_uptime() {
        let clock = source(0);
        tokio::time::sleep(Duration::from_secs(90)).await;
        assert!(!clock.is_synced());
        assert_eq!(clock.now().to_string(), "1970-01-01 00:01:30");
    }

    #[tokio::test(start_paused = true)]
    async fn test_anchor_and_extrapolate() {
        let mut clock = source(3 * 3600);
        clock.set_time(Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap());
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert!(clock.is_synced());
        assert_eq!(clock.now().to_string(), "2025-03-26 21:45:30");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_may_step_backwards() {
        let mut clock = source(0);
        clock.set_time(Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap());
        tokio::time::sleep(Duration::from_secs(60)).await;
        clock.set_time(Utc.with_ymd_and_hms(2025, 1, 1, 11, 59, 0).unwrap());
        assert_eq!(clock.now().to_string(), "2025-01-01 11:59:00");
    }

    #[test]
    fn test_offset_out_of_range() {
        let sntp = SntpClient::new("127.0.0.1:9", Duration::from_millis(10));
        assert!(matches!(TimeSource::new(sntp, 90_000), Err(Error::Config(_))));
    }

    #[test]
    fn test_timestamp_serializes_as_string() {
        let ts = Timestamp(
            FixedOffset::east_opt(0)
                .unwrap()
                .with_ymd_and_hms(2025, 3, 26, 18, 45, 7)
                .unwrap(),
        );
        assert_eq!(serde_json::to_string(&ts).unwrap(), "\"2025-03-26 18:45:07\"");
    }
}
