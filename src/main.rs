//! Streams raw random bytes to stdout for external statistical test suites,
//! for example `rand_split --impl fry | RNG_test stdin32`.

use std::io::Write;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rand_split::config::{self, Config};
use rand_split::{lookup, seed, DynArray, KeyArray, Lowering};

/// Random byte streamer
#[derive(Parser, Debug)]
#[command(name = "rand_split")]
#[command(version, about, long_about = None)]
struct Args {
    /// Implementation name or tag (threefry2x32, rbg, unsafe_rbg); defaults to the configured one
    #[arg(long = "impl")]
    prng: Option<String>,

    /// Integer seed of the root key
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    seed: i64,

    /// Bit width of generated values (8, 16, 32 or 64)
    #[arg(long, default_value_t = 32)]
    bit_width: u32,

    /// Values generated per key
    #[arg(long, default_value_t = 4096)]
    block: usize,

    /// Derive block keys by folding the block index into the root key instead of splitting;
    /// the index is 32 bits, so the stream stops after 2^32 blocks
    #[arg(long)]
    fold: bool,

    /// Threefry evaluation strategy (rolled or unrolled)
    #[arg(long)]
    lowering: Option<Lowering>,

    /// Stop after this many bytes; runs until stdout closes otherwise
    #[arg(long)]
    bytes: Option<u64>,
}

fn init_tracing() {
    // Log to stderr; stdout carries the random stream.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Little-endian bytes of generated values.
fn le_bytes(bits: &DynArray) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    Ok(match bits {
        DynArray::U8(a) => a.data().to_vec(),
        DynArray::U16(a) => a.data().iter().flat_map(|x| x.to_le_bytes()).collect(),
        DynArray::U32(a) => a.data().iter().flat_map(|x| x.to_le_bytes()).collect(),
        DynArray::U64(a) => a.data().iter().flat_map(|x| x.to_le_bytes()).collect(),
        other => return Err(format!("unexpected {} output", other.dtype()).into()),
    })
}

/// Key for block `n`, or `None` once fold-in indices run out.
/// Splitting advances `root`; folding leaves it alone.
fn next_key(root: &mut KeyArray, n: u64, fold: bool) -> rand_split::Result<Option<KeyArray>> {
    if fold {
        return match u32::try_from(n) {
            Ok(data) => root.fold_in(data).map(Some),
            Err(_) => Ok(None),
        };
    }
    let pair = root.split(2)?;
    *root = pair.index(0)?;
    pair.index(1).map(Some)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing();

    let mut config = Config::from_env()?;
    if let Some(name) = &args.prng {
        config.default_impl = name.clone();
    }
    if let Some(lowering) = args.lowering {
        config.threefry_lowering = lowering;
    }
    config::init(config)?;
    let prng = lookup(&config::get()?.default_impl)?;
    info!(prng = prng.tag, seed = args.seed, bit_width = args.bit_width, fold = args.fold, "streaming");

    let mut root = seed(args.seed, prng)?;
    let mut stdout = std::io::stdout().lock();
    let mut written: u64 = 0;

    for n in 0 .. {
        let Some(key) = next_key(&mut root, n, args.fold)? else {
            warn!(blocks = n, "fold-in block indices exhausted; stopping");
            break;
        };
        let mut bytes = le_bytes(&key.random_bits(args.bit_width, &[args.block])?)?;
        if let Some(limit) = args.bytes {
            bytes.truncate(limit.saturating_sub(written) as usize);
        }
        match stdout.write_all(&bytes) {
            Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
            result => result?,
        }
        written += bytes.len() as u64;
        if args.bytes.map_or(false, |limit| written >= limit) {
            break;
        }
    }
    stdout.flush()?;
    Ok(())
}
