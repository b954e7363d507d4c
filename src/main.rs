//! shard-verify - judge a shard result from the command line.
//!
//! Usage: `shard-verify <task> <result-file>`
//!
//! Prints the judgment as JSON and exits non-zero when it fails.

use std::sync::Arc;

use shard_verify::{
    config::Config,
    llm::{Completer, ModelCompleter, OpenRouterClient},
    verification::{resolve, Judge, JudgeMode, LlmJudge, VerifyError},
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shard_verify=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut args = std::env::args().skip(1);
    let (Some(task), Some(result_path)) = (args.next(), args.next()) else {
        anyhow::bail!("usage: shard-verify <task> <result-file>");
    };

    let config = Config::from_env()?;
    info!("Loaded configuration: judge_model={}", config.judge_model);

    let result = tokio::fs::read_to_string(&result_path).await?;

    let completer: Option<Arc<dyn Completer>> = match &config.api_key {
        Some(key) => {
            let llm = Arc::new(OpenRouterClient::new(key.clone()));
            Some(Arc::new(ModelCompleter::new(llm, config.judge_model.clone())))
        }
        None => {
            warn!("OPENROUTER_API_KEY not set; using basic check");
            None
        }
    };
    let judge = LlmJudge::new(completer).with_char_budget(config.verifier.judge_char_budget);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let mode = JudgeMode::detect(&task);
    let mut judgment = match judge.judge(&cancel, mode, &task, &result).await {
        Ok(judgment) => judgment,
        Err(VerifyError::Cancelled) => anyhow::bail!("interrupted"),
        Err(e) => return Err(e.into()),
    };
    judgment.normalize();
    judgment.corrective_action = resolve(&judgment, &task);

    println!("{}", serde_json::to_string_pretty(&judgment)?);

    if !judgment.success {
        std::process::exit(1);
    }
    Ok(())
}
