use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use retrograde_engine::{
    write_wav, EngineConfig, MediaDecoder, OfflineGraph, ParameterUpdate, PlannedSegment,
    PlaybackParameters, ReverseScheduler, SegmentPlanner, SourceBuffer,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Commands::Plan(args) => execute_plan(&config, args),
        Commands::Render(args) => {
            let summary = render_reverse(&config, &args)?;
            println!(
                "Rendered {} segments ({} frames, {:.2}s) to {}",
                summary.segments,
                summary.frames,
                summary.seconds,
                args.output.display()
            );
            println!("  {}", summary.parameters);
            Ok(())
        }
        #[cfg(feature = "native")]
        Commands::Play(args) => play::execute_play(config, args),
    }
}

#[derive(Parser)]
#[command(author, version, about = "Segmented reverse playback of audio recordings")]
struct Cli {
    /// Engine configuration (JSON). Flags override its defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the segments a reverse run would schedule, without audio.
    Plan(PlanArgs),
    /// Render a reverse run of a recording to a WAV file.
    Render(RenderArgs),
    /// Play a recording backwards through the default output device.
    #[cfg(feature = "native")]
    Play(play::PlayArgs),
}

#[derive(Args, Debug, Clone, Default)]
struct ParamArgs {
    /// Chunk length in seconds.
    #[arg(long = "chunk")]
    segment_duration: Option<f64>,
    /// Crossfade overlap between chunks in seconds.
    #[arg(long)]
    overlap: Option<f64>,
    /// Reverse playback speed (magnitude).
    #[arg(long)]
    speed: Option<f64>,
    /// Cursor jump per chunk; follows the period when omitted.
    #[arg(long)]
    step: Option<f64>,
    /// Time between chunk starts; derived from chunk, overlap and speed when
    /// omitted.
    #[arg(long)]
    period: Option<f64>,
    /// Position in seconds to play backwards from. Defaults to the middle.
    #[arg(long = "start")]
    start_position: Option<f64>,
}

impl ParamArgs {
    fn update(&self) -> ParameterUpdate {
        ParameterUpdate {
            start_position: self.start_position,
            segment_duration: self.segment_duration,
            step: self.step,
            period: self.period,
            overlap: self.overlap,
            speed: self.speed.map(f64::abs),
            clear_step: false,
        }
    }
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// Recording whose duration bounds the plan.
    #[arg(long, conflicts_with = "duration")]
    input: Option<PathBuf>,
    /// Recording duration in seconds, instead of decoding a file.
    #[arg(long)]
    duration: Option<f64>,
    /// Maximum number of segments to print.
    #[arg(long, default_value_t = 64)]
    limit: usize,
    /// Emit one JSON object per segment.
    #[arg(long)]
    json: bool,
    #[command(flatten)]
    params: ParamArgs,
}

#[derive(Args, Debug)]
struct RenderArgs {
    #[arg(long)]
    input: PathBuf,
    #[arg(long)]
    output: PathBuf,
    /// Output sample rate; defaults to the recording's.
    #[arg(long)]
    sample_rate: Option<u32>,
    /// Output channel count; defaults to the recording's.
    #[arg(long)]
    channels: Option<usize>,
    #[command(flatten)]
    params: ParamArgs,
}

#[derive(Debug, Serialize)]
struct RenderSummary {
    segments: usize,
    frames: usize,
    seconds: f64,
    parameters: PlaybackParameters,
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("failed to load configuration {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn decode(path: &Path) -> Result<SourceBuffer> {
    let source = MediaDecoder::new()
        .decode_path(path)
        .with_context(|| format!("failed to decode {}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        seconds = source.duration(),
        channels = source.channel_count(),
        "decoded recording"
    );
    Ok(source)
}

fn plan_segments(
    config: &EngineConfig,
    duration: f64,
    params: &ParamArgs,
    limit: usize,
) -> Result<(PlaybackParameters, Vec<PlannedSegment>)> {
    if !duration.is_finite() || duration < 0.0 {
        bail!("duration must be a non-negative number of seconds, got {duration}");
    }
    let resolved =
        PlaybackParameters::resolve(&params.update(), None, &config.defaults, Some(duration))?;
    let cursor = resolved.start_position.min(duration);
    let plan = SegmentPlanner::iter(cursor, resolved).take(limit).collect();
    Ok((resolved, plan))
}

fn execute_plan(config: &EngineConfig, args: PlanArgs) -> Result<()> {
    let duration = match (&args.input, args.duration) {
        (Some(path), _) => decode(path)?.duration(),
        (None, Some(duration)) => duration,
        (None, None) => bail!("either --input or --duration is required"),
    };
    let (params, plan) = plan_segments(config, duration, &args.params, args.limit)?;

    if args.json {
        for planned in &plan {
            println!("{}", serde_json::to_string(planned)?);
        }
        return Ok(());
    }

    println!("{params}");
    for (index, planned) in plan.iter().enumerate() {
        println!(
            "{index:>4}  {:>8.3}s .. {:>8.3}s  fades {:.3}s/{:.3}s",
            planned.segment_start,
            planned.end(),
            planned.envelope.fade_in,
            planned.envelope.fade_out
        );
    }
    if plan.len() == args.limit {
        println!("  (stopped after {} segments)", args.limit);
    }
    Ok(())
}

fn render_reverse(config: &EngineConfig, args: &RenderArgs) -> Result<RenderSummary> {
    let source = decode(&args.input)?;
    let sample_rate = args
        .sample_rate
        .unwrap_or_else(|| source.sample_rate().round() as u32);
    let channels = args.channels.unwrap_or(source.channel_count()).max(1);

    let graph = Arc::new(OfflineGraph::new(sample_rate, channels));
    let scheduler = ReverseScheduler::new(graph.clone(), graph.clone(), config.clone());
    scheduler.start(source, &args.params.update())?;
    scheduler.join();

    let parameters = scheduler
        .parameters()
        .map(|params| *params)
        .context("scheduler did not resolve any parameters")?;
    let rendered = graph.render();
    let frames = rendered.first().map_or(0, Vec::len);
    write_wav(&args.output, sample_rate, &rendered)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    Ok(RenderSummary {
        segments: graph.submitted_count(),
        frames,
        seconds: frames as f64 / sample_rate.max(1) as f64,
        parameters,
    })
}

#[cfg(feature = "native")]
mod play {
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{bail, Context, Result};
    use clap::Args;
    use retrograde_engine::{
        start_realtime, CommitOutcome, ControlSurface, EngineConfig, ReverseScheduler,
        ThreadPacer,
    };

    #[derive(Args, Debug)]
    pub struct PlayArgs {
        #[arg(long)]
        input: PathBuf,
        /// Chunk length in seconds.
        #[arg(long = "chunk")]
        segment_duration: Option<f64>,
        #[arg(long)]
        overlap: Option<f64>,
        #[arg(long)]
        step: Option<f64>,
        /// Reverse playback speed (magnitude).
        #[arg(long)]
        speed: Option<f64>,
        /// Position in seconds to play backwards from. Defaults to the middle.
        #[arg(long = "start")]
        start_position: Option<f64>,
    }

    pub fn execute_play(config: EngineConfig, args: PlayArgs) -> Result<()> {
        let source = super::decode(&args.input)?;
        let speed = args.speed.unwrap_or(config.defaults.speed).abs();
        let (stream, graph) = start_realtime().context("failed to open the default output device")?;
        let graph = Arc::new(graph);
        let scheduler = Arc::new(ReverseScheduler::new(
            graph.clone(),
            Arc::new(ThreadPacer),
            config,
        ));

        let surface = ControlSurface::new(scheduler.clone());
        surface.load(source);
        if let Some(chunk) = args.segment_duration {
            surface.set_segment_duration(chunk)?;
        }
        if let Some(overlap) = args.overlap {
            surface.set_overlap(overlap)?;
        }
        if args.step.is_some() {
            surface.set_step(args.step)?;
        }
        if let Some(start) = args.start_position {
            surface.seek(start)?;
        }
        surface.set_speed(-speed)?;
        match surface.commit_speed()? {
            CommitOutcome::Started => {}
            other => bail!("reverse playback did not start ({other:?})"),
        }
        if let Some(params) = surface.parameters() {
            println!("{params}");
        }

        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();
        ctrlc::set_handler(move || {
            running_clone.store(false, Ordering::SeqCst);
        })?;

        while running.load(Ordering::SeqCst) && scheduler.is_running() {
            std::thread::sleep(Duration::from_millis(250));
            eprint!("\r{}  {}", surface.time_display(), surface.speed_label());
        }
        eprintln!();

        if scheduler.stop() {
            println!("Stopped at {}", surface.time_display());
        } else if let Some(params) = surface.parameters() {
            let tail = params.segment_duration + scheduler.config().lead_in;
            std::thread::sleep(Duration::from_secs_f64(tail.min(10.0)));
        }

        drop(stream);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise_file(dir: &Path) -> PathBuf {
        let path = dir.join("input.wav");
        let samples: Vec<f32> = (0..8_000).map(|i| ((i % 50) as f32 / 50.0) - 0.5).collect();
        write_wav(&path, 4_000, &[samples]).expect("write input");
        path
    }

    #[test]
    fn plan_stops_at_the_limit() {
        let params = ParamArgs {
            segment_duration: Some(0.5),
            overlap: Some(0.0),
            start_position: Some(10.0),
            ..ParamArgs::default()
        };
        let (resolved, plan) =
            plan_segments(&EngineConfig::default(), 20.0, &params, 5).expect("plan");
        assert_eq!(resolved.period, 0.5);
        assert_eq!(plan.len(), 5);
        assert_eq!(plan[0].segment_start, 9.5);
    }

    #[test]
    fn plan_defaults_to_the_middle() {
        let (resolved, plan) =
            plan_segments(&EngineConfig::default(), 6.0, &ParamArgs::default(), 1_000)
                .expect("plan");
        assert_eq!(resolved.start_position, 3.0);
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn plan_rejects_negative_durations() {
        assert!(plan_segments(&EngineConfig::default(), -1.0, &ParamArgs::default(), 10).is_err());
    }

    #[test]
    fn render_writes_a_decodable_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = noise_file(dir.path());
        let args = RenderArgs {
            input,
            output: dir.path().join("reversed.wav"),
            sample_rate: None,
            channels: Some(2),
            params: ParamArgs {
                segment_duration: Some(0.25),
                start_position: Some(2.0),
                ..ParamArgs::default()
            },
        };
        let summary = render_reverse(&EngineConfig::default(), &args).expect("render");
        assert!(summary.segments > 0);
        assert!(summary.frames > 0);

        let rendered = MediaDecoder::new()
            .decode_path(&args.output)
            .expect("decode output");
        assert_eq!(rendered.channel_count(), 2);
        assert_eq!(rendered.frames(), summary.frames);
    }
}
