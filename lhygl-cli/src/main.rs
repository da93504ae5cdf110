use clap::{Parser, Subcommand};
use lhygl_lib::LhySession;
use lhygl_lib::board::Board;
use lhygl_lib::egv::{EgvEncoder, JobConfig, Scanline, Segment, write_job_file};
use lhygl_lib::speed::{make_speed_code, parse_speed_code};
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Parser)]
#[command(name = "lhygl", about = "Drive an LHYMICRO-GL laser cutter over USB")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Home the head
    Home,
    /// Unlock the stepper rail
    Unlock,
    /// Send an emergency stop
    Stop,
    /// Send a raw EGV job file to the device
    Send { path: PathBuf },
    /// Encode a JSON segment list into an EGV vector job
    Vector {
        /// JSON file holding a list of segments
        path: PathBuf,
        /// Board variant
        #[arg(long, default_value = "M2")]
        board: String,
        /// Write the encoded job to this file instead of sending it
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Encode a JSON segment list as a raster job
    Raster {
        path: PathBuf,
        #[arg(long, default_value = "M2")]
        board: String,
        /// Feed rate in units/s
        #[arg(long)]
        feed: f64,
        /// Scanline spacing in ticks
        #[arg(long, default_value_t = 2)]
        step: u16,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Print the speed token for a feed rate
    Speed {
        feed: f64,
        #[arg(long, default_value = "M2")]
        board: String,
        #[arg(long, default_value_t = 0)]
        raster_step: u16,
        #[arg(long, default_value_t = 0.0)]
        d_ratio: f64,
    },
    /// Decode a speed token
    Decode {
        token: String,
        #[arg(long, default_value = "M2")]
        board: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Home => {
            let mut session = open_session().await?;
            session.home().await?;
            println!("Homed");
        }
        Command::Unlock => {
            let mut session = open_session().await?;
            session.unlock_rail().await?;
            println!("Rail unlocked");
        }
        Command::Stop => {
            let mut session = open_session().await?;
            session.emergency_stop().await?;
            println!("Stopped");
        }
        Command::Send { path } => {
            let stream = fs::read(&path)?;
            // Strip the readability newlines a persisted job file carries
            let stream: Vec<u8> = stream.into_iter().filter(|b| *b != b'\n').collect();
            let mut session = open_session().await?;
            session.send_job(stream.into()).await?;
            println!("Job complete");
        }
        Command::Vector { path, board, out } => {
            let segments: Vec<Segment> = serde_json::from_str(&fs::read_to_string(&path)?)?;
            let config = JobConfig {
                board: Board::from_str(&board)?,
                ..JobConfig::default()
            };
            let mut encoder = EgvEncoder::new(config);
            encoder.encode_vector(&segments)?;
            dispatch(encoder.into_stream(), out).await?;
        }
        Command::Raster {
            path,
            board,
            feed,
            step,
            out,
        } => {
            let segments: Vec<Segment> = serde_json::from_str(&fs::read_to_string(&path)?)?;
            let lines = Scanline::from_segments(&segments);
            let config = JobConfig {
                board: Board::from_str(&board)?,
                ..JobConfig::default()
            };
            let mut encoder = EgvEncoder::new(config);
            encoder.encode_raster(&lines, feed, step)?;
            dispatch(encoder.into_stream(), out).await?;
        }
        Command::Speed {
            feed,
            board,
            raster_step,
            d_ratio,
        } => {
            let board = Board::from_str(&board)?;
            println!("{}", make_speed_code(feed, raster_step, board, d_ratio, None));
        }
        Command::Decode { token, board } => {
            let board = Board::from_str(&board)?;
            let info = parse_speed_code(&token)?;
            println!("register value: {}", info.value);
            println!("gear:           {}", info.gear);
            if info.is_raster() {
                println!("raster step:    {}", info.raster_step);
            } else if info.step != 0 {
                println!("diag step:      {}", info.step);
                println!("diag value:     {}", info.diagonal);
            }
            println!("feed rate:      {:.3} units/s on {board}", info.feed_rate(board));
        }
    }
    Ok(())
}

async fn open_session() -> Result<LhySession, Box<dyn Error>> {
    let mut session = LhySession::open().await?;
    session.set_progress(|msg| println!("{msg}"));
    Ok(session)
}

/// Write the job to a file when `--out` is given, otherwise send it.
async fn dispatch(
    stream: bytes::Bytes,
    out: Option<PathBuf>,
) -> Result<(), Box<dyn Error>> {
    match out {
        Some(path) => {
            let mut file = fs::File::create(&path)?;
            write_job_file(&stream, &mut file)?;
            println!("Wrote {} bytes to {}", stream.len(), path.display());
        }
        None => {
            let mut session = open_session().await?;
            session.send_job(stream).await?;
            println!("Job complete");
        }
    }
    Ok(())
}
