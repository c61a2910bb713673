//! Argument parsing for running from the command line

use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use clap::Parser;

use crate::{
    capture::{FileBudget, SessionConfig},
    channels::{BitDepth, PacketLayout},
    error::PlanError,
    source::{Subscription, DEFAULT_CAPTURE_BUFFER, DEFAULT_RECV_TIMEOUT},
};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Network device to capture packets from
    #[clap(short, long, default_value = "eth0")]
    pub device_name: String,
    /// Destination address the digitizer sends to
    #[clap(long, default_value = "10.10.11.99")]
    pub dest_host: Ipv4Addr,
    /// Port to capture UDP data from
    #[clap(short, long, default_value_t = 7417)]
    #[clap(value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,
    /// Only keep packets sent from this address
    #[clap(long)]
    pub src_host: Option<Ipv4Addr>,
    /// Receive on a bound UDP socket instead of a libpcap capture
    #[clap(long)]
    pub bind: Option<SocketAddr>,
    /// Channel ranges as start:stop (stop exclusive), separated by spaces
    #[clap(short, long, default_value = "200:240")]
    pub channels: String,
    /// Bits per real/imaginary component: 1, 2 or 4
    #[clap(short, long, default_value_t = BitDepth::Four, value_parser = valid_bit_depth)]
    pub bits: BitDepth,
    /// Largest UDP payload the firmware may send
    #[clap(long, default_value_t = 1380)]
    pub max_bytes_per_packet: u64,
    /// Size of each baseband file in GB
    #[clap(short, long, default_value_t = 0.5)]
    pub file_size: f64,
    /// Also start a new file after this many seconds
    #[clap(long)]
    pub rotate_secs: Option<u64>,
    /// Root directory for baseband files
    #[clap(short, long, default_value = "/media/BASEBAND/baseband")]
    pub output: PathBuf,
    /// Leading digits of the epoch used to name the per-file directory
    #[clap(long, default_value_t = 5)]
    pub dir_digits: usize,
    /// File write buffer in MiB
    #[clap(long, default_value_t = 20)]
    pub write_buffer_mb: usize,
    /// Seconds to wait before restarting a failed capture
    #[clap(long, default_value_t = 5)]
    pub backoff_secs: u64,
    /// Stop after writing this many files
    #[clap(long)]
    pub files: Option<u64>,
    /// Summarize an existing baseband file and exit
    #[clap(long)]
    pub inspect: Option<PathBuf>,
    #[clap(flatten)]
    pub verbose: clap_verbosity_flag::Verbosity,
}

impl Args {
    pub fn layout(&self) -> Result<PacketLayout, PlanError> {
        PacketLayout::from_ranges(&self.channels, self.bits, self.max_bytes_per_packet)
    }

    pub fn subscription(&self) -> Subscription {
        Subscription {
            device: self.device_name.clone(),
            dest_host: self.dest_host,
            dest_port: self.port,
            src_host: self.src_host,
            timeout: DEFAULT_RECV_TIMEOUT,
            buffer_size: DEFAULT_CAPTURE_BUFFER,
        }
    }

    pub fn session_config(&self, layout: PacketLayout) -> SessionConfig {
        let mut budget = FileBudget::from_bytes(
            (self.file_size * 1e9) as u64,
            layout.bytes_per_packet() as u64,
        );
        if let Some(secs) = self.rotate_secs {
            budget = budget.with_duration(Duration::from_secs(secs));
        }
        let mut config = SessionConfig::new(layout, &self.output, budget);
        config.dir_prefix_digits = self.dir_digits;
        config.write_buffer = self.write_buffer_mb * 1024 * 1024;
        config.file_limit = self.files;
        config
    }
}

/// Match verbosity filter with tracing subscriber log levels
pub fn convert_filter(filter: log::LevelFilter) -> tracing_subscriber::filter::LevelFilter {
    match filter {
        log::LevelFilter::Off => tracing_subscriber::filter::LevelFilter::OFF,
        log::LevelFilter::Error => tracing_subscriber::filter::LevelFilter::ERROR,
        log::LevelFilter::Warn => tracing_subscriber::filter::LevelFilter::WARN,
        log::LevelFilter::Info => tracing_subscriber::filter::LevelFilter::INFO,
        log::LevelFilter::Debug => tracing_subscriber::filter::LevelFilter::DEBUG,
        log::LevelFilter::Trace => tracing_subscriber::filter::LevelFilter::TRACE,
    }
}

fn valid_bit_depth(s: &str) -> Result<BitDepth, String> {
    let bits: u64 = s.parse().map_err(|_| format!("{s} is not a number"))?;
    BitDepth::try_from(bits).map_err(|e| e.to_string())
}
