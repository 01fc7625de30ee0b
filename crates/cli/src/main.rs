use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use parking_lot::Mutex;
use satip::config::{DeliverySystem, FecInner, Polarization};
use satip::{RtspSession, TsSink, TuningParams, TuningStore};

#[derive(Parser)]
#[command(
    name = "satip-client",
    about = "Stream a DVB-S/S2 transponder from a SAT>IP server to a local device or file"
)]
struct Args {
    /// SAT>IP server host
    #[arg(long)]
    host: String,

    /// RTSP control port
    #[arg(long, default_value_t = 554)]
    port: u16,

    /// Receive media interleaved on the RTSP TCP connection instead of UDP
    #[arg(long)]
    tcp: bool,

    /// Kernel receive buffer for the media socket, in MiB
    #[arg(long, default_value_t = 4)]
    buffer_mb: usize,

    /// Signal source (DiSEqC position), 1-based
    #[arg(long, default_value_t = 1)]
    src: u8,

    /// Transponder frequency in MHz
    #[arg(long)]
    freq: u32,

    /// Polarisation (h or v)
    #[arg(long, value_parser = parse_pol)]
    pol: Polarization,

    /// Delivery system (dvbs or dvbs2)
    #[arg(long, default_value = "dvbs", value_parser = parse_msys)]
    msys: DeliverySystem,

    /// Symbol rate in kSym/s
    #[arg(long, default_value_t = 22000)]
    sr: u32,

    /// Inner FEC in compact form (12, 23, 34, 56, 78, 89, 910)
    #[arg(long, value_parser = parse_fec)]
    fec: Option<FecInner>,

    /// Comma-separated PID list
    #[arg(long, default_value = "0", value_delimiter = ',')]
    pids: Vec<u16>,

    /// Output path: vtuner device node or plain file
    #[arg(long, short)]
    output: PathBuf,
}

fn parse_pol(value: &str) -> Result<Polarization, String> {
    match value {
        "h" | "H" => Ok(Polarization::Horizontal),
        "v" | "V" => Ok(Polarization::Vertical),
        other => Err(format!("invalid polarisation '{other}', expected h or v")),
    }
}

fn parse_msys(value: &str) -> Result<DeliverySystem, String> {
    match value {
        "dvbs" => Ok(DeliverySystem::Dvbs),
        "dvbs2" => Ok(DeliverySystem::Dvbs2),
        other => Err(format!("invalid delivery system '{other}'")),
    }
}

fn parse_fec(value: &str) -> Result<FecInner, String> {
    match value {
        "12" => Ok(FecInner::F12),
        "23" => Ok(FecInner::F23),
        "34" => Ok(FecInner::F34),
        "56" => Ok(FecInner::F56),
        "78" => Ok(FecInner::F78),
        "89" => Ok(FecInner::F89),
        "910" => Ok(FecInner::F910),
        other => Err(format!("invalid FEC '{other}'")),
    }
}

/// Writes TS payload to the output file or device, retrying short writes.
struct DeviceSink {
    file: Mutex<File>,
}

impl TsSink for DeviceSink {
    fn write_ts(&self, payload: &[u8]) -> std::io::Result<()> {
        let mut file = self.file.lock();
        let mut rest = payload;
        while !rest.is_empty() {
            match file.write(rest) {
                Ok(0) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::WriteZero,
                        "output refused data",
                    ));
                }
                Ok(n) => rest = &rest[n..],
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

const STATUS_INTERVAL: Duration = Duration::from_secs(10);

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let file = match OpenOptions::new().write(true).create(true).open(&args.output) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("cannot open {}: {e}", args.output.display());
            std::process::exit(1);
        }
    };
    let sink = Arc::new(DeviceSink {
        file: Mutex::new(file),
    });

    let store = Arc::new(TuningStore::new(args.tcp, args.buffer_mb));
    store.set_channel(TuningParams {
        src: args.src,
        freq_mhz: args.freq,
        pol: args.pol,
        msys: args.msys,
        sr: args.sr,
        fec: args.fec,
    });
    store.set_pids(args.pids.clone());

    let mut session = RtspSession::new(args.host.clone(), args.port, store, sink);

    tracing::info!(
        host = %args.host,
        port = args.port,
        tcp_data = args.tcp,
        freq_mhz = args.freq,
        "SAT>IP client started"
    );

    let mut last_status = Instant::now();

    loop {
        let (fd, events) = session.poll_descriptor();
        let mut fds = [libc::pollfd {
            fd,
            events,
            revents: 0,
        }];
        let ready = unsafe { libc::poll(fds.as_mut_ptr(), 1, session.poll_timeout_ms()) };

        if ready < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            tracing::error!(error = %err, "poll failed");
            std::process::exit(1);
        }

        if ready > 0 && fds[0].revents != 0 {
            session.handle_events(fds[0].revents);
        } else {
            session.tick_timers();
        }

        if last_status.elapsed() >= STATUS_INTERVAL {
            last_status = Instant::now();
            let status = session.signal_status();
            tracing::info!(
                state = ?session.state(),
                has_lock = status.has_lock,
                strength = status.signal_strength,
                quality = status.signal_quality,
                "tuner status"
            );
        }
    }
}
