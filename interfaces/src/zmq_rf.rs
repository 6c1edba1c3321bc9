//! ZeroMQ radio driver: exchanges IQ sample buffers with a simulated or
//! loopback front end over a pair of blocking sockets.
//!
//! The wire pattern mirrors srsRAN's "zmq" RF plugin: the driver is the
//! REQuester on the RX link (it asks its peer for the next buffer of
//! received samples) and the REPlier on the TX link (its peer asks it for
//! the next buffer to transmit). Both calls block until the peer answers,
//! which is exactly the contract [`RadioDriver`] asks of its implementers.

use std::sync::Mutex;

use num_complex::Complex32;
use tracing::info;
use zmq::{Context, Socket};

use common::SAMPLE_RATE_HZ;
use layers::coordinator::RadioDriver;
use layers::phy::subframe::SYMBOL_LEN;
use layers::CoreError;

use crate::InterfaceError;

/// Default ZMQ ports, matching the srsRAN `zmq` RF plugin's convention.
pub const DEFAULT_TX_PORT: u16 = 2000;
pub const DEFAULT_RX_PORT: u16 = 2001;

/// Samples requested per `rx()` call: one symbol pair, matching the pair
/// the TX-stream task produces per iteration (§4.6).
const RX_BUF_SYMBOLS: usize = 2;

/// ZMQ RF driver configuration.
#[derive(Debug, Clone)]
pub struct ZmqRfConfig {
    /// Sample rate in Hz. Informational only: the driver exchanges raw
    /// sample buffers and does not resample.
    pub sample_rate: f64,
    /// TX socket bind address (the driver is the REP peer here).
    pub tx_address: String,
    /// RX socket connect address (the driver is the REQ peer here).
    pub rx_address: String,
    /// Transmit gain in dB, carried through for front ends that honor it.
    pub tx_gain: f32,
    /// Receive gain in dB, carried through for front ends that honor it.
    pub rx_gain: f32,
}

impl Default for ZmqRfConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE_HZ,
            tx_address: format!("tcp://*:{}", DEFAULT_TX_PORT),
            rx_address: format!("tcp://localhost:{}", DEFAULT_RX_PORT),
            tx_gain: 0.0,
            rx_gain: 0.0,
        }
    }
}

impl ZmqRfConfig {
    /// Parse device arguments in srsRAN's `key=value,key=value` format.
    pub fn from_device_args(args: &str) -> Result<Self, InterfaceError> {
        let mut config = Self::default();

        for pair in args.split(',') {
            let parts: Vec<&str> = pair.trim().split('=').collect();
            if parts.len() != 2 {
                continue;
            }
            let key = parts[0].trim();
            let value = parts[1].trim();

            match key {
                "base_srate" => {
                    config.sample_rate = value
                        .parse()
                        .map_err(|_| InterfaceError::InvalidConfig("invalid base_srate".to_string()))?;
                }
                "tx_gain" => {
                    config.tx_gain = value
                        .parse()
                        .map_err(|_| InterfaceError::InvalidConfig("invalid tx_gain".to_string()))?;
                }
                "rx_gain" => {
                    config.rx_gain = value
                        .parse()
                        .map_err(|_| InterfaceError::InvalidConfig("invalid rx_gain".to_string()))?;
                }
                "tx_port" => config.tx_address = value.to_string(),
                "rx_port" => config.rx_address = value.to_string(),
                _ => {}
            }
        }

        Ok(config)
    }
}

/// Serialize IQ samples as raw little-endian `cf_t` pairs, srsRAN's wire
/// format for its zmq RF plugin.
fn samples_to_bytes(samples: &[Complex32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 8);
    for sample in samples {
        bytes.extend_from_slice(&sample.re.to_le_bytes());
        bytes.extend_from_slice(&sample.im.to_le_bytes());
    }
    bytes
}

fn bytes_to_samples(bytes: &[u8]) -> Result<Vec<Complex32>, InterfaceError> {
    if bytes.len() % 8 != 0 {
        return Err(InterfaceError::InvalidMessage);
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| {
            let re = f32::from_le_bytes(c[0..4].try_into().unwrap());
            let im = f32::from_le_bytes(c[4..8].try_into().unwrap());
            Complex32::new(re, im)
        })
        .collect())
}

/// Cumulative sample counters, surfaced for diagnostics.
#[derive(Debug, Default, Clone, Copy)]
pub struct RfStats {
    pub tx_samples: u64,
    pub rx_samples: u64,
}

/// Synchronous [`RadioDriver`] backed by two ZMQ sockets. One request on
/// the RX socket yields one symbol pair; one TX-socket request/reply
/// round trip carries the pair most recently staged by `tx_prep`.
pub struct ZmqRfDriver {
    config: ZmqRfConfig,
    _context: Context,
    tx_socket: Mutex<Socket>,
    rx_socket: Mutex<Socket>,
    tx_staging: Mutex<Vec<Complex32>>,
    stats: Mutex<RfStats>,
}

impl ZmqRfDriver {
    pub fn new(config: ZmqRfConfig) -> Result<Self, InterfaceError> {
        let context = Context::new();

        let tx_socket = context.socket(zmq::REP)?;
        tx_socket.bind(&config.tx_address)?;
        info!(address = %config.tx_address, "ZMQ TX socket bound");

        let rx_socket = context.socket(zmq::REQ)?;
        rx_socket.connect(&config.rx_address)?;
        info!(address = %config.rx_address, "ZMQ RX socket connected");

        Ok(Self {
            config,
            _context: context,
            tx_socket: Mutex::new(tx_socket),
            rx_socket: Mutex::new(rx_socket),
            tx_staging: Mutex::new(Vec::with_capacity(RX_BUF_SYMBOLS * SYMBOL_LEN)),
            stats: Mutex::new(RfStats::default()),
        })
    }

    pub fn config(&self) -> &ZmqRfConfig {
        &self.config
    }

    pub fn stats(&self) -> RfStats {
        *self.stats.lock().expect("stats mutex poisoned")
    }
}

impl RadioDriver for ZmqRfDriver {
    fn rx(&self) -> Result<Vec<Complex32>, CoreError> {
        let socket = self.rx_socket.lock().expect("rx socket mutex poisoned");
        socket
            .send("", 0)
            .map_err(|e| CoreError::DriverUnavailable(format!("rx request: {e}")))?;
        let bytes = socket
            .recv_bytes(0)
            .map_err(|e| CoreError::DriverUnavailable(format!("rx reply: {e}")))?;
        let samples = bytes_to_samples(&bytes)
            .map_err(|e| CoreError::DriverUnavailable(format!("rx payload: {e}")))?;

        self.stats.lock().expect("stats mutex poisoned").rx_samples += samples.len() as u64;
        Ok(samples)
    }

    fn tx_prep(&self, samples: &[Complex32], offset: usize, length: usize) -> Result<(), CoreError> {
        if offset + length > samples.len() {
            return Err(CoreError::DriverUnavailable("tx_prep range out of bounds".to_string()));
        }
        let mut staging = self.tx_staging.lock().expect("tx staging mutex poisoned");
        staging.clear();
        staging.extend_from_slice(&samples[offset..offset + length]);
        Ok(())
    }

    fn tx_push(&self) -> Result<(), CoreError> {
        let staging = self.tx_staging.lock().expect("tx staging mutex poisoned");
        let bytes = samples_to_bytes(&staging);
        let sample_count = staging.len() as u64;
        drop(staging);

        let socket = self.tx_socket.lock().expect("tx socket mutex poisoned");
        let _request = socket
            .recv_bytes(0)
            .map_err(|e| CoreError::DriverUnavailable(format!("tx request: {e}")))?;
        socket
            .send(&bytes, 0)
            .map_err(|e| CoreError::DriverUnavailable(format!("tx reply: {e}")))?;

        self.stats.lock().expect("stats mutex poisoned").tx_samples += sample_count;
        Ok(())
    }

    /// Zero the linger period on both sockets so a pending blocking
    /// `recv`/`send` returns with `EAGAIN`/`ETERM` instead of hanging the
    /// streaming tasks past the coordinator's shutdown signal.
    fn stop(&self) {
        if let Ok(socket) = self.rx_socket.lock() {
            if let Err(e) = socket.set_linger(0) {
                tracing::warn!(error = %e, "failed to zero RX socket linger on shutdown");
            }
        }
        if let Ok(socket) = self.tx_socket.lock() {
            if let Err(e) = socket.set_linger(0) {
                tracing::warn!(error = %e, "failed to zero TX socket linger on shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_device_args_parses_known_keys() {
        let config = ZmqRfConfig::from_device_args("tx_gain=10.5,rx_gain=-3,base_srate=1e6,tx_port=tcp://*:3000")
            .unwrap();
        assert_eq!(config.tx_gain, 10.5);
        assert_eq!(config.rx_gain, -3.0);
        assert_eq!(config.sample_rate, 1e6);
        assert_eq!(config.tx_address, "tcp://*:3000");
    }

    #[test]
    fn from_device_args_ignores_malformed_pairs() {
        let config = ZmqRfConfig::from_device_args("garbage,tx_gain=5").unwrap();
        assert_eq!(config.tx_gain, 5.0);
    }

    #[test]
    fn sample_byte_round_trip() {
        let samples = vec![Complex32::new(1.0, -2.5), Complex32::new(0.0, 3.25)];
        let bytes = samples_to_bytes(&samples);
        let decoded = bytes_to_samples(&bytes).unwrap();
        assert_eq!(samples, decoded);
    }

    #[test]
    fn odd_byte_length_is_rejected() {
        assert!(bytes_to_samples(&[0u8; 7]).is_err());
    }
}
