//! Sandbox Review CLI
//!
//! Reviews one pull request, as described by the CI environment.

use sandbox_review::{
    DockerSandboxProvider, LocalSandboxProvider, PipelineOutcome, ProviderKind, Result,
    ReviewConfig, ReviewPipeline, Validate,
};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let code = match run().await {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            tracing::error!(error = %e, "review run failed");
            1
        }
    };

    tracing::info!(exit_code = code, "done");
    std::process::exit(code);
}

async fn run() -> Result<PipelineOutcome> {
    let config = ReviewConfig::from_env()?;
    for warning in config.validate().into_result()? {
        tracing::warn!("{}", warning);
    }

    let redactor = config.redactor();
    match config.sandbox.provider {
        ProviderKind::Local => {
            let provider = LocalSandboxProvider::new(None).with_redactor(redactor);
            ReviewPipeline::from_config(config, provider)?.run().await
        }
        ProviderKind::Docker => {
            let provider =
                DockerSandboxProvider::new(config.sandbox.image.clone()).with_redactor(redactor);
            ReviewPipeline::from_config(config, provider)?.run().await
        }
    }
}
