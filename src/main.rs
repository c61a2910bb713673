use std::{
    fs::File,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Context;
use baseband_slurper::{
    args::{convert_filter, Args},
    capture::TracingSink,
    header::FileHeaderWriter,
    inspect::inspect,
    reference::TimeSource,
    source::{PcapSource, UdpSocketSource, DEFAULT_RECV_TIMEOUT},
    supervisor::SessionSupervisor,
};
use clap::Parser;
use tracing::{info, warn};

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(convert_filter(args.verbose.log_level_filter()))
        .init();

    if let Some(path) = &args.inspect {
        let file = File::open(path).with_context(|| format!("opening {path:?}"))?;
        let report = inspect(file).with_context(|| format!("reading {path:?}"))?;
        println!("{:#?}", report.header);
        println!("packets: {} (+{} trailing bytes)", report.packets, report.trailing_bytes);
        println!("loss: {}", report.loss);
        if let Some((pol0, pol1)) = report.power {
            for (chan, (p0, p1)) in pol0.iter().zip(&pol1).enumerate() {
                println!("{chan:>5} {p0:>10.3} {p1:>10.3}");
            }
        }
        return Ok(());
    }

    let layout = args.layout().context("building the channel plan")?;
    info!(
        spectra_per_packet = layout.spectra_per_packet,
        bytes_per_packet = layout.bytes_per_packet(),
        bits = %layout.bit_depth,
        "Packet layout"
    );
    let config = args.session_config(layout);
    info!(
        packets_per_file = config.budget.packets,
        root = %config.output_root.display(),
        "File rotation"
    );

    // Stop cleanly on SIGINT/SIGTERM, finishing the current file
    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = shutdown.clone();
    ctrlc::set_handler(move || {
        warn!("Signal received, stopping after the current packet");
        handler_flag.store(true, Ordering::Relaxed);
    })
    .context("installing the signal handler")?;

    // No reference device driver is linked in, headers carry system time
    let headers = FileHeaderWriter::new(TimeSource::SystemClock);
    let mut supervisor =
        SessionSupervisor::new(config, headers, Arc::new(TracingSink), shutdown.clone())
            .with_backoff(Duration::from_secs(args.backoff_secs));

    match args.bind {
        Some(addr) => supervisor.run(|| UdpSocketSource::bind(addr, DEFAULT_RECV_TIMEOUT))?,
        None => {
            let subscription = args.subscription();
            supervisor.run(|| PcapSource::open(&subscription))?
        }
    }
    info!(
        files = supervisor.files(),
        restarts = supervisor.restarts(),
        "Done"
    );
    Ok(())
}
