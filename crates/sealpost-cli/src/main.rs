mod fixture;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use sealpost_crypto::NativeCrypto;
use sealpost_dispatch::memory::{MemoryReconciler, MemoryTransport};
use sealpost_dispatch::{DispatchConfig, Dispatcher, MetadataPreparer, PackageBuilder, WireRequest};
use tracing_subscriber::EnvFilter;

use fixture::Fixture;

const USAGE: &str = "usage: sealpost [--config <config.json>] <fixture.json>";

/// Command-line arguments.
struct Args {
    config: Option<PathBuf>,
    fixture: Option<PathBuf>,
}

fn parse_args() -> Args {
    let mut args = std::env::args().skip(1);
    let mut config = None;
    let mut fixture = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = args.next().map(PathBuf::from),
            _ if fixture.is_none() && !arg.starts_with("--") => fixture = Some(PathBuf::from(&arg)),
            _ => tracing::warn!(argument = %arg, "ignoring unknown argument"),
        }
    }

    Args { config, fixture }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<DispatchConfig> {
    let config = match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse config {}", path.display()))?
        }
        None => DispatchConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

/// Run one dispatch attempt for `fixture` and return what was submitted.
async fn run(config: DispatchConfig, fixture: Fixture) -> anyhow::Result<WireRequest> {
    let prepared = fixture.into_run()?;
    let crypto = Arc::new(NativeCrypto);
    let transport = Arc::new(MemoryTransport::new());
    let reconciler = Arc::new(MemoryReconciler::new());

    let dispatcher = Dispatcher::new(
        MetadataPreparer::new(
            crypto.clone(),
            Arc::new(prepared.policy),
            Arc::new(prepared.fetcher),
            config.clone(),
        ),
        PackageBuilder::new(crypto, config),
        transport.clone(),
        reconciler,
    );

    let outcome = dispatcher.run_attempt(prepared.pending).await;
    tracing::info!(
        phases = ?outcome.phases,
        final_phase = %outcome.final_phase(),
        "dispatch attempt finished"
    );
    let receipt = outcome.result?;
    tracing::debug!(message_id = %receipt.message_id, sent_at = receipt.sent_at, "receipt");

    transport
        .submitted()
        .pop()
        .context("transport accepted the message but recorded no request")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args();
    let config = load_config(args.config.as_deref())?;
    let fixture_path = args.fixture.context(USAGE)?;
    let fixture = Fixture::load(&fixture_path)?;

    let request = run(config, fixture).await?;
    let output = serde_json::json!({
        "Method": "POST",
        "Path": request.path(),
        "Body": request.to_api_body(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn temp_json(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn config_defaults_without_file() {
        assert_eq!(load_config(None).unwrap(), DispatchConfig::default());
    }

    #[test]
    fn config_file_overrides_and_is_validated() {
        let file = temp_json(r#"{ "outside_token_len": 48, "api_path_prefix": "/api/messages" }"#);
        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.outside_token_len, 48);
        assert_eq!(config.api_path_prefix, "/api/messages");
        assert_eq!(config.mime_boundary_bytes, 20);

        let file = temp_json(r#"{ "mime_boundary_bytes": 1 }"#);
        assert!(load_config(Some(file.path())).is_err());
    }

    #[tokio::test]
    async fn fixture_runs_end_to_end() {
        let file = temp_json(
            r#"{
                "message_id": "demo",
                "body": "<p>Hello <b>world</b></p>",
                "recipients": [
                    { "email": "in@proton.me", "scheme": "proton_internal" },
                    { "email": "out@gmail.com", "scheme": "cleartext_mime", "sign": true },
                    { "email": "txt@old.net", "scheme": "cleartext_inline", "mime_type": "plain_text" }
                ],
                "undo_delay_seconds": 5
            }"#,
        );
        let fixture = Fixture::load(file.path()).unwrap();

        let request = run(DispatchConfig::default(), fixture).await.unwrap();
        assert_eq!(request.path(), "/mail/v4/messages/demo");
        assert_eq!(request.packages.len(), 3);
        assert_eq!(request.delay_seconds, 5);

        let body = request.to_api_body();
        assert_eq!(body["Packages"].as_array().unwrap().len(), 3);
        assert_eq!(body["DelaySeconds"], 5);
    }

    #[tokio::test]
    async fn outside_recipient_without_password_fails() {
        let file = temp_json(
            r#"{
                "body": "<p>x</p>",
                "recipients": [{ "email": "eo@x.org", "scheme": "encrypted_to_outside" }]
            }"#,
        );
        let fixture = Fixture::load(file.path()).unwrap();
        let err = run(DispatchConfig::default(), fixture).await.unwrap_err();
        assert!(err.to_string().contains("eo@x.org"));
    }
}
