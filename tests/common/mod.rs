#![allow(dead_code)]

use gis_pd_monitor::gis::frame::{encode_float_swapped, encode_read_request, WAKE_UP};
use gis_pd_monitor::prelude::*;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

pub const PAYLOAD_LEN: usize = 399 * 2;

pub fn common_setup() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub struct Factory;
impl Factory {
    pub fn device(port: u16) -> config::Device {
        config::Device {
            host: "127.0.0.1".to_string(),
            port,
            wake_settle_ms: Some(0),
            request_settle_ms: Some(0),
            read_timeout_ms: Some(300),
            connect_timeout_ms: Some(1000),
            use_tcp_nodelay: None,
        }
    }

    pub fn config(port: u16, accumulate: bool) -> ConfigWrapper {
        let yaml = format!(
            "device:\n  host: 127.0.0.1\n  port: {}\n  wake_settle_ms: 0\n  request_settle_ms: 0\n  read_timeout_ms: 300\n\
             poll:\n  interval_ms: 50\n  accumulate: {}\n  history: 5\n\
             classifier:\n  enabled: false\n",
            port, accumulate
        );
        ConfigWrapper::from_config(Config::from_yaml(&yaml).expect("valid test config"))
    }

    /// (counter, amplitude, phase) for each of the 50 groups.
    pub fn groups() -> Vec<(u16, f32, f32)> {
        (0..50)
            .map(|i| (i as u16 * 3, 20.0 + i as f32 * 0.75 + 0.004, i as f32 * 7.2))
            .collect()
    }

    pub fn payload(groups: &[(u16, f32, f32)]) -> Vec<u8> {
        let mut payload = vec![0u8; PAYLOAD_LEN];

        for (i, (counter, amplitude, phase)) in groups.iter().enumerate() {
            let offset = i * 12; // 6 registers per group
            payload[offset..offset + 2].copy_from_slice(&counter.to_be_bytes());
            payload[offset + 4..offset + 8].copy_from_slice(&encode_float_swapped(*amplitude));
            payload[offset + 8..offset + 12].copy_from_slice(&encode_float_swapped(*phase));
        }

        payload
    }

    pub fn response(payload: &[u8]) -> Vec<u8> {
        let mut r = vec![0x00, 0x01, 0x00, 0x00];
        r.extend_from_slice(&((payload.len() + 3) as u16).to_be_bytes());
        // the byte count is a single byte; a full 798 byte payload saturates it
        r.extend_from_slice(&[0x02, 0x04, payload.len().min(255) as u8]);
        r.extend_from_slice(payload);
        r
    }

    pub fn full_response() -> Vec<u8> {
        Self::response(&Self::payload(&Self::groups()))
    }
}

/// What the fake device does with one poll.
#[derive(Clone, Debug)]
pub enum Reply {
    Respond(Vec<u8>),
    /// Drop the socket without answering.
    Close,
    /// Send these bytes, then go quiet but keep the socket open.
    Stall(Vec<u8>),
    /// Send these bytes, then drop the socket.
    Truncate(Vec<u8>),
    /// Drop the socket as soon as the wake-up arrives, without acknowledging.
    HangUpOnWake,
}

/// Loopback stand-in for the telemetry device. Replies are consumed in order
/// across connections; once they run out the device stays silent.
pub struct FakeDevice {
    pub port: u16,
    accepted: Arc<AtomicUsize>,
}

impl FakeDevice {
    pub async fn start(replies: Vec<Reply>) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let port = listener.local_addr()?.port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let replies = Arc::new(Mutex::new(VecDeque::from(replies)));

        let accepted_clone = accepted.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accepted_clone.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(Self::serve(socket, replies.clone()));
            }
        });

        Ok(Self { port, accepted })
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Waits up to a second for the accept count to reach `n`.
    pub async fn wait_for_accepted(&self, n: usize) -> usize {
        for _ in 0..100 {
            if self.accepted() >= n {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.accepted()
    }

    async fn serve(mut socket: TcpStream, replies: Arc<Mutex<VecDeque<Reply>>>) {
        loop {
            let mut wake = [0u8; 4];
            if socket.read_exact(&mut wake).await.is_err() || wake != WAKE_UP {
                return;
            }

            let reply = replies.lock().unwrap().pop_front();
            if let Some(Reply::HangUpOnWake) = reply {
                return;
            }
            if socket.write_all(&[0xAA, 0x55]).await.is_err() {
                return;
            }

            let mut request = [0u8; 12];
            if socket.read_exact(&mut request).await.is_err() || request[..] != encode_read_request()[..] {
                return;
            }

            match reply {
                Some(Reply::Respond(bytes)) => {
                    if socket.write_all(&bytes).await.is_err() {
                        return;
                    }
                }
                Some(Reply::Close) | Some(Reply::HangUpOnWake) => return,
                Some(Reply::Truncate(bytes)) => {
                    let _ = socket.write_all(&bytes).await;
                    return;
                }
                Some(Reply::Stall(bytes)) => {
                    let _ = socket.write_all(&bytes).await;
                    Self::drain(&mut socket).await;
                    return;
                }
                None => {
                    Self::drain(&mut socket).await;
                    return;
                }
            }
        }
    }

    async fn drain(socket: &mut TcpStream) {
        let mut buf = [0u8; 64];
        while let Ok(n) = socket.read(&mut buf).await {
            if n == 0 {
                break;
            }
        }
    }
}
