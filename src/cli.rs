use std::sync::Arc;

use playback_dsp::io::wav::{read_wav_file, write_wav_file_float};
use playback_dsp::{
    AudioBuffer, ChainConfig, HrirManifest, MemorySource, PlaybackChain, PositionMatrix,
    SampleSource, SpatialConfig, VocoderParams, WindowType,
};

/// Parsed command line.
#[derive(Debug, Clone, PartialEq)]
struct Options {
    input: String,
    output: String,
    speed: f32,
    hrir: Option<String>,
    isolate: bool,
    spatial: bool,
    meter: bool,
    chunk: usize,
    window: WindowType,
    verbose: bool,
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let options = match parse_args(args.get(1..).unwrap_or(&[])) {
        Ok(o) => o,
        Err(msg) => {
            eprintln!("ERROR: {}", msg);
            print_usage();
            std::process::exit(1);
        }
    };

    let default_filter = if options.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    if let Err(e) = run(&options) {
        eprintln!("ERROR: {}", e);
        std::process::exit(1);
    }
}

fn run(options: &Options) -> playback_dsp::Result<()> {
    let buffer = read_wav_file(&options.input)?;
    log::info!(
        "input: {} frames, {} Hz, {} ch, {:.2}s",
        buffer.num_frames(),
        buffer.sample_rate,
        buffer.channels,
        buffer.duration_secs()
    );
    let channels = buffer.channels;
    let sample_rate = buffer.sample_rate;

    let matrix = match &options.hrir {
        Some(path) => HrirManifest::load_matrix(path)?,
        None => PositionMatrix::forward(sample_rate),
    };
    let spatial = Arc::new(SpatialConfig::new(matrix));
    spatial.set_isolate_channels(options.isolate)?;

    let config = ChainConfig::default()
        .with_vocoder(
            VocoderParams::default()
                .with_speed(options.speed)
                .with_window(options.window),
        )
        .with_spatial(options.spatial)
        .with_meter(options.meter);
    let mut chain = PlaybackChain::build(MemorySource::new(buffer), &config, Arc::clone(&spatial))?;
    let levels = chain.subscribe_meter(256);

    let start = std::time::Instant::now();
    let mut rendered = Vec::new();
    let mut block = vec![0.0; options.chunk * channels as usize];
    loop {
        let n = chain.read(&mut block);
        if n == 0 {
            break;
        }
        rendered.extend_from_slice(&block[..n]);
        if let Some(rx) = &levels {
            for level in rx.try_iter() {
                eprintln!(
                    "band {:>2} {:>7.0} Hz  L {:.4}  R {:.4}",
                    level.band, level.frequency, level.left, level.right
                );
            }
        }
    }
    let elapsed = start.elapsed();

    let output = AudioBuffer::new(rendered, channels, sample_rate)?;
    log::info!(
        "output: {} frames, {:.2}s, rendered in {:.3}s",
        output.num_frames(),
        output.duration_secs(),
        elapsed.as_secs_f64()
    );
    write_wav_file_float(&options.output, &output)?;
    log::info!("written to {}", options.output);
    Ok(())
}

fn parse_args(args: &[String]) -> Result<Options, String> {
    if args.len() < 2 {
        return Err("missing input or output path".to_string());
    }
    let mut options = Options {
        input: args[0].clone(),
        output: args[1].clone(),
        speed: 1.0,
        hrir: None,
        isolate: false,
        spatial: true,
        meter: false,
        chunk: 1024,
        window: WindowType::Hann,
        verbose: false,
    };

    let mut rest = args[2..].iter();
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--speed" | "-s" => {
                options.speed = parse_value(rest.next(), "speed")?;
            }
            "--hrir" => {
                let path = rest.next().ok_or("--hrir requires a manifest path")?;
                options.hrir = Some(path.clone());
            }
            "--isolate" => options.isolate = true,
            "--no-spatial" => options.spatial = false,
            "--meter" => options.meter = true,
            "--chunk" => {
                options.chunk = parse_value(rest.next(), "chunk")?;
                if options.chunk == 0 {
                    return Err("--chunk must be at least 1".to_string());
                }
            }
            "--window" | "-w" => {
                let name = rest.next().ok_or("--window requires a value")?;
                options.window = parse_window_str(name)?;
            }
            "--verbose" | "-v" => options.verbose = true,
            other => return Err(format!("unknown argument '{}'", other)),
        }
    }
    Ok(options)
}

fn parse_value<T: std::str::FromStr>(value: Option<&String>, name: &str) -> Result<T, String> {
    let value = value.ok_or_else(|| format!("--{} requires a value", name))?;
    value
        .parse()
        .map_err(|_| format!("invalid {}: {}", name, value))
}

fn parse_window_str(s: &str) -> Result<WindowType, String> {
    match s {
        "hann" => Ok(WindowType::Hann),
        "hamming" => Ok(WindowType::Hamming),
        "blackman-harris" | "bh" => Ok(WindowType::BlackmanHarris),
        other => Err(format!(
            "unknown window type '{}' (use hann, hamming or blackman-harris)",
            other
        )),
    }
}

fn print_usage() {
    eprintln!("Usage: playback-dsp <input.wav> <output.wav> [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --speed, -s <f>     Playback speed 0.5..1.0 (default: 1.0)");
    eprintln!("  --hrir <file>       HRIR manifest (JSON); default is the Forward preset");
    eprintln!("  --isolate           Silence the cross-ear impulse paths");
    eprintln!("  --no-spatial        Leave the spatializer out of the chain");
    eprintln!("  --meter             Print band levels to stderr while rendering");
    eprintln!("  --chunk <N>         Frames per pull (default: 1024)");
    eprintln!("  --window, -w <type> Vocoder window: hann, hamming, blackman-harris");
    eprintln!("  --verbose, -v       Debug logging");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  playback-dsp in.wav out.wav --speed 0.75");
    eprintln!("  playback-dsp in.wav out.wav --hrir wide.json --meter");
}
