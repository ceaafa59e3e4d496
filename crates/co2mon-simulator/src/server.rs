//! Blocking HTTP front end for the query service.

use std::io::{self, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::Duration;

use co2mon_core::query::handle_request;
use co2mon_core::storage::{LogBackend, LogStore};
use embassy_futures::block_on;
use embassy_sync::blocking_mutex::raw::RawMutex;
use log::{debug, info, warn};

/// Request bytes read per connection; only the request line matters.
const REQUEST_BUF_LEN: usize = 1024;
const SOCKET_TIMEOUT: Duration = Duration::from_secs(5);

/// Serve connections one at a time, forever.
pub fn serve<M, B>(listener: TcpListener, store: &LogStore<M, B>) -> !
where
    M: RawMutex,
    B: LogBackend,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Serving readings on http://{}/json", addr);
    }

    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("Connection from {}", peer);
                if let Err(e) = answer(stream, store) {
                    warn!("Connection from {} failed: {}", peer, e);
                }
            }
            Err(e) => warn!("Accept failed: {}", e),
        }
    }
}

fn answer<M, B>(mut stream: TcpStream, store: &LogStore<M, B>) -> io::Result<()>
where
    M: RawMutex,
    B: LogBackend,
{
    stream.set_read_timeout(Some(SOCKET_TIMEOUT))?;
    stream.set_write_timeout(Some(SOCKET_TIMEOUT))?;

    let mut buf = [0u8; REQUEST_BUF_LEN];
    let len = stream.read(&mut buf)?;

    let response = block_on(handle_request(store, &buf[..len]));
    stream.write_all(&response.to_bytes())?;
    stream.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use co2mon_core::storage::MemoryBackend;
    use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
    use std::thread;

    #[test]
    fn test_answer_over_loopback() {
        let store: &'static LogStore<CriticalSectionRawMutex, MemoryBackend> =
            Box::leak(Box::new(LogStore::new(
                MemoryBackend::with_contents(b"1700000000,412.5\n"),
                10,
            )));

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            answer(stream, store).unwrap();
        });

        let mut client = TcpStream::connect(addr).unwrap();
        client.write_all(b"GET /json?n=1 HTTP/1.1\r\n\r\n").unwrap();
        let mut reply = String::new();
        client.read_to_string(&mut reply).unwrap();

        assert!(reply.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(reply.ends_with(r#"[{"timestamp":"1700000000","co2":"412.5"}]"#));
    }
}
