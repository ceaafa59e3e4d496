//! One-shot SNTP query used to anchor the wall clock at startup.

use embassy_futures::select::{Either, select};
use embassy_net::dns::DnsQueryType;
use embassy_net::udp::{PacketMetadata, UdpSocket};
use embassy_net::{IpEndpoint, Stack};
use embassy_time::{Duration, Timer};
use log::{debug, info};
use thiserror_no_std::Error;

use co2mon_core::app_state::{Attempt, retry_bounded};

use crate::CLOCK;

pub const NTP_SERVER: &str = "pool.ntp.org";
const NTP_PORT: u16 = 123;
const NTP_PACKET_LEN: usize = 48;
/// Seconds from 1900-01-01 (NTP era 0) to 1970-01-01.
const NTP_UNIX_OFFSET: u64 = 2_208_988_800;
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(3);
const RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SntpError {
    #[error("could not resolve the NTP server")]
    Dns,
    #[error("UDP socket failed")]
    Socket,
    #[error("no response within the timeout")]
    Timeout,
    #[error("invalid NTP response")]
    InvalidResponse,
}

/// Ask `server` for the current Unix time in seconds.
pub async fn query_unix_time(stack: Stack<'static>, server: &str) -> Result<u64, SntpError> {
    let server_ip = stack
        .dns_query(server, DnsQueryType::A)
        .await
        .map_err(|_| SntpError::Dns)?
        .first()
        .copied()
        .ok_or(SntpError::Dns)?;
    let endpoint = IpEndpoint::new(server_ip, NTP_PORT);

    let mut rx_meta = [PacketMetadata::EMPTY; 2];
    let mut rx_buffer = [0u8; 64];
    let mut tx_meta = [PacketMetadata::EMPTY; 2];
    let mut tx_buffer = [0u8; 64];
    let mut socket = UdpSocket::new(
        stack,
        &mut rx_meta,
        &mut rx_buffer,
        &mut tx_meta,
        &mut tx_buffer,
    );
    socket.bind(0).map_err(|_| SntpError::Socket)?;

    // LI=0, VN=3, Mode=3 (client)
    let mut request = [0u8; NTP_PACKET_LEN];
    request[0] = 0x1B;
    socket
        .send_to(&request, endpoint)
        .await
        .map_err(|_| SntpError::Socket)?;

    let mut response = [0u8; NTP_PACKET_LEN];
    let (len, from) = match select(
        Timer::after(RESPONSE_TIMEOUT),
        socket.recv_from(&mut response),
    )
    .await
    {
        Either::First(()) => return Err(SntpError::Timeout),
        Either::Second(result) => result.map_err(|_| SntpError::Socket)?,
    };

    if len < NTP_PACKET_LEN || from.endpoint.addr != server_ip {
        return Err(SntpError::InvalidResponse);
    }
    let stratum = response[1];
    if stratum == 0 || stratum > 15 {
        return Err(SntpError::InvalidResponse);
    }

    let transmit_secs =
        u32::from_be_bytes([response[40], response[41], response[42], response[43]]);
    debug!("NTP stratum {} transmit {}", stratum, transmit_secs);

    u64::from(transmit_secs)
        .checked_sub(NTP_UNIX_OFFSET)
        .ok_or(SntpError::InvalidResponse)
}

/// Set [`CLOCK`] from SNTP, trying at most `attempts` times.
///
/// Returns whether the clock is now synchronized. On failure the readings keep
/// uptime timestamps.
pub async fn sync_clock(stack: Stack<'static>, attempts: u32) -> bool {
    match retry_bounded("SNTP sync", attempts, RETRY_DELAY, |_| {
        query_unix_time(stack, NTP_SERVER)
    })
    .await
    {
        Attempt::Succeeded(unix_secs, _) => {
            CLOCK.set_unix_time(unix_secs);
            info!("Clock set to {} (Unix)", unix_secs);
            true
        }
        Attempt::GaveUp(_) => false,
    }
}
