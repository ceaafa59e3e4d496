//! TCP front end for the JSON query service.

use co2mon_core::query::handle_request;
use embassy_net::Stack;
use embassy_net::tcp::TcpSocket;
use embassy_time::{Duration, Timer};
use log::{debug, warn};

use crate::Store;

/// One worker can sit in `accept` while another is answering.
pub const HTTP_WORKERS: usize = 2;
const MAX_REQUEST_LEN: usize = 1024;
const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

#[embassy_executor::task(pool_size = HTTP_WORKERS)]
pub async fn http_worker(stack: Stack<'static>, store: &'static Store, port: u16, worker: usize) {
    let mut rx_buf = [0u8; 1024];
    let mut tx_buf = [0u8; 2048];

    loop {
        // Nothing is served until the link is up
        stack.wait_config_up().await;

        let mut socket = TcpSocket::new(stack, &mut rx_buf, &mut tx_buf);
        socket.set_timeout(Some(SOCKET_TIMEOUT));

        match socket.accept(port).await {
            Ok(()) => {
                if let Err(e) = serve_connection(&mut socket, store).await {
                    warn!("HTTP worker {}: connection failed: {:?}", worker, e);
                }
            }
            Err(e) => {
                warn!("HTTP worker {}: accept failed: {:?}", worker, e);
                Timer::after(Duration::from_millis(200)).await;
            }
        }

        socket.close();
        // Let the FIN go out before the buffers are reused
        let _ = socket.flush().await;
        socket.abort();
    }
}

async fn serve_connection(
    socket: &mut TcpSocket<'_>,
    store: &'static Store,
) -> Result<(), embassy_net::tcp::Error> {
    let mut buf = [0u8; MAX_REQUEST_LEN];
    let mut total = 0;

    // The request line is all that matters; stop at the end of the headers
    while total < MAX_REQUEST_LEN {
        let n = socket.read(&mut buf[total..]).await?;
        if n == 0 {
            break;
        }
        total += n;
        if buf[..total].windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    if total == 0 {
        return Ok(());
    }

    let response = handle_request(store, &buf[..total]).await;
    debug!("HTTP {} ({} byte body)", response.status.line(), response.body.len());

    let bytes = response.to_bytes();
    let mut sent = 0;
    while sent < bytes.len() {
        match socket.write(&bytes[sent..]).await? {
            0 => return Err(embassy_net::tcp::Error::ConnectionReset),
            n => sent += n,
        }
    }
    socket.flush().await
}
