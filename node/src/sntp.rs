use crate::errors::{Error, Result};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_NTP_SERVER: &str = "pool.ntp.org:123";

const PACKET_LEN: usize = 48;
/// Seconds between 1900-01-01 and 1970-01-01.
const NTP_UNIX_OFFSET_SECS: i64 = 2_208_988_800;
const MODE_CLIENT: u8 = 3;
const MODE_SERVER: u8 = 4;
const MODE_BROADCAST: u8 = 5;
const VERSION: u8 = 3;

/// Minimal RFC 4330 client: one request, one reply, transmit timestamp only.
pub struct SntpClient {
    server: String,
    timeout: Duration,
}

impl SntpClient {
    pub fn new(server: impl Into<String>, timeout: Duration) -> Self {
        Self {
            server: server.into(),
            timeout,
        }
    }

    /// Current UTC as estimated from the server reply, bounded by the timeout.
    pub async fn query(&self) -> Result<DateTime<Utc>> {
        match tokio::time::timeout(self.timeout, self.exchange()).await {
            Ok(result) => result,
            Err(_) => Err(Error::TimeSync(format!(
                "no reply from {} within {:?}",
                self.server, self.timeout
            ))),
        }
    }

    async fn exchange(&self) -> Result<DateTime<Utc>> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(&self.server).await?;

        let sent = Instant::now();
        socket.send(&request_packet()).await?;

        let mut buf = [0u8; PACKET_LEN];
        let len = socket.recv(&mut buf).await?;
        let round_trip = sent.elapsed();
        if len < PACKET_LEN {
            return Err(Error::TimeSync(format!("short reply: {} bytes", len)));
        }

        let transmit = parse_response(&buf)?;
        debug!("SNTP reply from {} in {:?}", self.server, round_trip);

        // The reply spent roughly half the round trip in flight.
        let flight = chrono::Duration::from_std(round_trip / 2).unwrap_or_default();
        Ok(transmit + flight)
    }
}

pub fn request_packet() -> [u8; PACKET_LEN] {
    let mut packet = [0u8; PACKET_LEN];
    packet[0] = (VERSION << 3) | MODE_CLIENT;
    packet
}

/// Extracts the server transmit timestamp.
pub fn parse_response(buf: &[u8; PACKET_LEN]) -> Result<DateTime<Utc>> {
    let mode = buf[0] & 0x07;
    if mode != MODE_SERVER && mode != MODE_BROADCAST {
        return Err(Error::TimeSync(format!("unexpected mode {}", mode)));
    }

    let stratum = buf[1];
    if stratum == 0 {
        let code = String::from_utf8_lossy(&buf[12..16]).into_owned();
        return Err(Error::TimeSync(format!("kiss-of-death {}", code)));
    }

    let secs = u32::from_be_bytes([buf[40], buf[41], buf[42], buf[43]]);
    let frac = u32::from_be_bytes([buf[44], buf[45], buf[46], buf[47]]);
    if secs == 0 {
        return Err(Error::TimeSync("server clock not synchronized".to_string()));
    }

    // Timestamps with the top bit clear belong to era 1 (after 2036-02-07).
    let ntp_secs = if secs & 0x8000_0000 == 0 {
        secs as i64 + (1i64 << 32)
    } else {
        secs as i64
    };
    let nanos = ((frac as u64 * 1_000_000_000) >> 32) as u32;

    DateTime::from_timestamp(ntp_secs - NTP_UNIX_OFFSET_SECS, nanos)
        .ok_or_else(|| Error::TimeSync(format!("timestamp out of range: {}", ntp_secs)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reply_for(unix_secs: i64, frac: u32) -> [u8; PACKET_LEN] {
        let mut buf = [0u8; PACKET_LEN];
        buf[0] = (VERSION << 3) | MODE_SERVER;
        buf[1] = 2;
        let ntp = (unix_secs + NTP_UNIX_OFFSET_SECS) as u32;
        buf[40..44].copy_from_slice(&ntp.to_be_bytes());
        buf[44..48].copy_from_slice(&frac.to_be_bytes());
        buf
    }

    #[test]
    fn test_request_header() {
        let packet = request_packet();
        assert_eq!(packet[0], 0x1B);
        assert!(packet[1..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_parse_transmit_timestamp() {
        let expected = Utc.with_ymd_and_hms(2025, 3, 26, 18, 45, 0).unwrap();
        let parsed = parse_response(&reply_for(expected.timestamp(), 1 << 31)).unwrap();
        assert_eq!(parsed.timestamp(), expected.timestamp());
        assert_eq!(parsed.timestamp_subsec_millis(), 500);
    }

    #[test]
    fn test_parse_era_one() {
        let expected = Utc.with_ymd_and_hms(2040, 1, 1, 0, 0, 0).unwrap();
        let parsed = parse_response(&reply_for(expected.timestamp(), 0)).unwrap();
        assert_eq!(parsed, expected);
    }

    #[test]
    fn test_kiss_of_death_rejected() {
        let mut buf = reply_for(1_700_000_000, 0);
        buf[1] = 0;
        buf[12..16].copy_from_slice(b"RATE");
        let err = parse_response(&buf).unwrap_err();
        assert!(err.to_string().contains("RATE"));
    }

    #[test]
    fn test_client_mode_reply_rejected() {
        let mut buf = reply_for(1_700_000_000, 0);
        buf[0] = (VERSION << 3) | MODE_CLIENT;
        assert!(matches!(parse_response(&buf), Err(Error::TimeSync(_))));
    }

    #[tokio::test]
    async fn test_query_local_server() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = server.local_addr().unwrap();
        let expected = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; PACKET_LEN];
            let (_, peer) = server.recv_from(&mut buf).await.unwrap();
            assert_eq!(buf[0] & 0x07, MODE_CLIENT);
            server
                .send_to(&reply_for(expected.timestamp(), 0), peer)
                .await
                .unwrap();
        });

        let client = SntpClient::new(addr.to_string(), Duration::from_secs(2));
        let now = client.query().await.unwrap();
        let drift = (now - expected).num_milliseconds();
        assert!((0..1_000).contains(&drift), "drift {} ms", drift);
    }

    #[tokio::test]
    async fn test_query_times_out() {
        // Bound but never answers.
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = silent.local_addr().unwrap();

        let client = SntpClient::new(addr.to_string(), Duration::from_millis(100));
        let err = client.query().await.unwrap_err();
        assert!(matches!(err, Error::TimeSync(_)));
        drop(silent);
    }
}
