//! `kiln generate`: run one generation job end to end

use anyhow::{bail, Result};
use chrono::Local;
use clap::Args;
use kiln_core::KilnError;
use kiln_gen::providers::create_provider;
use kiln_gen::{
    CosUploader, GenerationJobSpec, ImageSource, JobStore, KilnConfig, MemoryUploader,
    ModelProvider, ObjectUploader, Orchestrator, ProviderKind, ViewImage, ViewTag,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::character::CharacterSpec;

#[derive(Args)]
pub struct GenerateArgs {
    /// Direct text prompt
    #[arg(long, short)]
    pub prompt: Option<String>,

    /// Character spec file (.toml or .json)
    #[arg(long)]
    pub character: Option<PathBuf>,

    /// Local front-view image
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// Public front-view image URL
    #[arg(long)]
    pub image_url: Option<String>,

    /// Left view (path or URL), only with --image or --image-url
    #[arg(long)]
    pub left_view: Option<String>,

    /// Right view (path or URL), only with --image or --image-url
    #[arg(long)]
    pub right_view: Option<String>,

    /// Back view (path or URL), only with --image or --image-url
    #[arg(long)]
    pub back_view: Option<String>,

    /// Provider to use (sdk, http, mock)
    #[arg(long)]
    pub provider: Option<String>,

    /// Generate PBR materials
    #[arg(long)]
    pub pbr: bool,

    /// Target face count (40000 - 1500000)
    #[arg(long)]
    pub face_count: Option<u32>,

    /// Normal, LowPoly, Geometry or Sketch
    #[arg(long)]
    pub generate_type: Option<String>,

    /// triangle or quadrilateral (LowPoly only)
    #[arg(long)]
    pub polygon_type: Option<String>,

    /// Seconds to wait for the job before giving up
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Initial seconds between status polls
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Base output directory; each run gets a timestamped subdirectory
    #[arg(long, short, default_value = "output/3d")]
    pub output: PathBuf,
}

pub fn run(args: GenerateArgs) -> Result<()> {
    let input_count = [
        args.prompt.is_some(),
        args.character.is_some(),
        args.image.is_some(),
        args.image_url.is_some(),
    ]
    .iter()
    .filter(|set| **set)
    .count();
    if input_count == 0 {
        bail!("No input provided. Use one of --prompt, --character, --image or --image-url");
    }
    if input_count > 1 {
        bail!("Provide only one input mode (--prompt, --character, --image or --image-url)");
    }
    let has_side_views =
        args.left_view.is_some() || args.right_view.is_some() || args.back_view.is_some();
    if has_side_views && args.image.is_none() && args.image_url.is_none() {
        bail!("--left-view, --right-view and --back-view can only be used with --image or --image-url");
    }

    let mut config = KilnConfig::load()?;
    if let Some(name) = &args.provider {
        config.provider.kind = Some(name.parse::<ProviderKind>()?);
    }

    let mut options = config.generation_options();
    if args.pbr {
        options.enable_pbr = true;
    }
    if let Some(count) = args.face_count {
        options.face_count = count;
    }
    if let Some(kind) = &args.generate_type {
        options.generate_type = kind.parse()?;
    }
    if let Some(polygon) = &args.polygon_type {
        options.polygon_type = Some(polygon.parse()?);
    }

    let mut timing = config.orchestrator_config();
    if let Some(secs) = args.timeout {
        timing.timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = args.poll_interval {
        timing.poll_interval = Duration::from_secs(secs);
    }

    let spec = build_spec(&args)?.with_options(options);
    spec.validate()?;

    let provider_kind = config.provider_kind();
    let provider = create_provider(&config)?;
    let mut orchestrator =
        Orchestrator::new(provider.clone(), timing).with_job_store(JobStore::default_store());
    if spec.local_image_count() > 0 {
        let uploader: Arc<dyn ObjectUploader> = match provider_kind {
            ProviderKind::Mock => Arc::new(MemoryUploader::new()),
            _ => Arc::new(CosUploader::from_config(&config)?),
        };
        orchestrator = orchestrator.with_uploader(uploader);
    }

    let run_dir = args
        .output
        .join(Local::now().format("%Y-%m-%d_%H-%M-%S").to_string());

    println!("Generating 3D model via {}...", provider.name());
    if let Some(prompt) = &spec.prompt {
        println!("  Prompt: {}", prompt);
    }
    for image in &spec.images {
        println!("  {} view: {}", image.view, describe_source(&image.source));
    }
    println!(
        "  Options: pbr={} faces={} type={}",
        spec.options.enable_pbr, spec.options.face_count, spec.options.generate_type
    );

    match orchestrator.run(&spec, &run_dir) {
        Ok(outcome) => {
            println!("  Job: {}", outcome.job_id());
            println!(
                "  Primary model: {}",
                outcome.artifacts.primary_model_file.display()
            );
            for file in &outcome.artifacts.companion_files {
                println!("  Companion: {}", file.path.display());
            }
            println!("  Metadata: {}", outcome.metadata_path.display());
            println!("  Done in {:.1}s", outcome.metadata.elapsed_secs);
            Ok(())
        }
        Err(err) => {
            if let (Some(job_id), KilnError::Timeout { .. } | KilnError::Cancelled(_)) =
                (&err.job_id, &err.error)
            {
                eprintln!(
                    "Job {} may still be running remotely. Check it later with `kiln job poll {}`",
                    job_id, job_id
                );
            }
            Err(err.into())
        }
    }
}

fn build_spec(args: &GenerateArgs) -> Result<GenerationJobSpec> {
    if let Some(prompt) = &args.prompt {
        return Ok(GenerationJobSpec::from_prompt(prompt.clone()));
    }
    if let Some(path) = &args.character {
        let character = CharacterSpec::load(path)?;
        println!("Character: {} ({})", character.name, character.role);
        return Ok(GenerationJobSpec::from_prompt(character.to_prompt()));
    }

    let front = match (&args.image, &args.image_url) {
        (Some(path), _) => ImageSource::from_path(path)?,
        (None, Some(url)) => ImageSource::Url(url.clone()),
        (None, None) => bail!("No input provided"),
    };
    let mut images = vec![ViewImage::new(ViewTag::Front, front)];
    for (view, value) in [
        (ViewTag::Left, &args.left_view),
        (ViewTag::Right, &args.right_view),
        (ViewTag::Back, &args.back_view),
    ] {
        if let Some(value) = value {
            images.push(ViewImage::new(view, parse_view_source(value)?));
        }
    }
    Ok(GenerationJobSpec::from_images(images))
}

/// A side view given as either a URL or a local path
fn parse_view_source(value: &str) -> Result<ImageSource> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(ImageSource::Url(value.to_string()))
    } else {
        Ok(ImageSource::from_path(Path::new(value))?)
    }
}

fn describe_source(source: &ImageSource) -> String {
    match source {
        ImageSource::Url(url) => url.clone(),
        ImageSource::Bytes {
            file_name, data, ..
        } => format!("{} ({} bytes, will be uploaded)", file_name, data.len()),
    }
}
