//! atenea: текст → речь → говорящее видео

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;

use atenea::utils::logger::init_logger;
use atenea::{
    AvatarRequest, LazySynthesizer, LogObserver, Pipeline, PipelineConfig, QualityPreset,
    SpeechRequest, TtsModel, TtsVoice, VideoSpec,
};

#[derive(Debug, Parser)]
#[command(
    name = "atenea",
    about = "Generate a talking-head video from text and a portrait",
    version = env!("CARGO_PKG_VERSION")
)]
struct Args {
    /// Text to speak
    #[arg(short, long, conflicts_with = "text_file")]
    text: Option<String>,

    /// Read the text from a file
    #[arg(long)]
    text_file: Option<PathBuf>,

    /// Portrait image for the avatar
    #[arg(short, long, required_unless_present = "speech_only")]
    image: Option<PathBuf>,

    /// Output path (video, or audio with --speech-only)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// TTS voice (defaults to TTS_VOICE or nova)
    #[arg(long)]
    voice: Option<String>,

    /// TTS model (defaults to TTS_MODEL or tts-1)
    #[arg(long)]
    model: Option<String>,

    /// Quality preset: balanced, high, ultra
    #[arg(short, long, default_value = "balanced")]
    quality: QualityPreset,

    #[arg(long)]
    fps: Option<u32>,

    #[arg(long)]
    steps: Option<u32>,

    #[arg(long)]
    resolution: Option<u32>,

    #[arg(long)]
    lip_weight: Option<f32>,

    #[arg(long)]
    cfg_scale: Option<f32>,

    /// Kill the worker after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Only synthesize speech, skip video generation
    #[arg(long)]
    speech_only: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logger();

    let mut config = PipelineConfig::from_env();
    if args.timeout.is_some() {
        config.worker_timeout_secs = args.timeout;
    }

    let text = match (&args.text, &args.text_file) {
        (Some(text), _) => text.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read text from {}", path.display()))?,
        (None, None) => bail!("Either --text or --text-file is required"),
    };
    if text.trim().is_empty() {
        bail!("Text is empty");
    }

    let voice = match &args.voice {
        Some(voice) => voice.parse::<TtsVoice>().unwrap_or_default(),
        None => config.tts_voice.clone(),
    };
    let model = match &args.model {
        Some(model) => model.parse::<TtsModel>().unwrap_or_default(),
        None => config.tts_model.clone(),
    };

    let synthesizer = LazySynthesizer::from_config(&config);
    let pipeline = Pipeline::new(config, &synthesizer);
    pipeline.add_observer(Arc::new(LogObserver));

    let mut speech = SpeechRequest::new(text, voice, model);

    if args.speech_only {
        if let Some(output) = &args.output {
            speech = speech.with_destination(output);
        }
        let audio = pipeline
            .acquire_speech(&speech)
            .await
            .context("Speech synthesis failed")?;
        println!("{}", audio.display());
        return Ok(());
    }

    let image = args
        .image
        .context("--image is required for video generation")?;
    let output = args
        .output
        .unwrap_or_else(|| PathBuf::from("output/avatar.mp4"));
    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let video = VideoSpec {
        preset: args.quality,
        frame_rate: args.fps,
        steps: args.steps,
        resolution: args.resolution,
        lip_weight: args.lip_weight,
        guidance_scale: args.cfg_scale,
        ..VideoSpec::new(image, output)
    };

    let result = pipeline
        .run(AvatarRequest::new(speech, video))
        .await
        .context("Avatar generation failed")?;
    println!("{}", result.display());
    Ok(())
}
