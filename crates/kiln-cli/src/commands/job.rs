//! `kiln job`: tracked jobs and live status checks

use anyhow::Result;
use clap::Subcommand;
use kiln_gen::providers::create_provider;
use kiln_gen::{JobHandle, JobStore, KilnConfig, ModelProvider};

#[derive(Subcommand)]
pub enum JobCommands {
    /// List tracked generation jobs
    List,

    /// Show the recorded state of a job
    Status {
        /// Job ID
        id: String,
    },

    /// Ask the provider for a job's current status
    Poll {
        /// Job ID
        id: String,

        /// Provider to ask (sdk, http, mock)
        #[arg(long)]
        provider: Option<String>,
    },
}

pub fn run(cmd: JobCommands) -> Result<()> {
    let store = JobStore::default_store();

    match cmd {
        JobCommands::Status { id } => {
            let job = store.load(&id)?;

            println!("Job: {}", job.job_id);
            println!("  Provider: {}", job.provider);
            println!("  Status: {}", job.status);
            println!("  Input: {}", job.input_type);
            println!("  Submitted: {}", job.submitted_at.to_rfc3339());
            println!("  Updated: {}", job.updated_at.to_rfc3339());
            if let Some(ref prompt) = job.prompt {
                println!("  Prompt: {}", prompt);
            }
            if let Some(ref dir) = job.output_dir {
                println!("  Output: {}", dir);
            }
            if let Some(ref primary) = job.primary_model_file {
                println!("  Primary model: {}", primary);
            }
            if let Some(ref err) = job.error {
                println!("  Error: {}", err);
            }
            Ok(())
        }
        JobCommands::List => {
            let jobs = store.list()?;

            if jobs.is_empty() {
                println!("No generation jobs found.");
                return Ok(());
            }

            println!("{} job(s):\n", jobs.len());
            for job in &jobs {
                println!(
                    "  {} ({}) {} {} {}",
                    job.job_id,
                    job.provider,
                    job.status,
                    job.input_type,
                    job.submitted_at.format("%Y-%m-%d %H:%M:%S")
                );
            }
            Ok(())
        }
        JobCommands::Poll { id, provider } => {
            let mut config = KilnConfig::load()?;
            if let Some(name) = provider {
                config.provider.kind = Some(name.parse()?);
            }
            let provider = create_provider(&config)?;
            let status = provider.poll(&JobHandle::new(id))?;

            println!("Job: {}", status.job_id);
            println!("  State: {}", status.state);
            for file in &status.result_files {
                println!("  Result ({}): {}", file.file_type, file.url);
                if let Some(ref preview) = file.preview_url {
                    println!("    Preview: {}", preview);
                }
            }
            if let Some(ref code) = status.error_code {
                println!("  Error code: {}", code);
            }
            if let Some(ref message) = status.error_message {
                println!("  Error: {}", message);
            }
            Ok(())
        }
    }
}
