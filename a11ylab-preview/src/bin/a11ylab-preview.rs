//! Renders a snippet in a sandboxed preview and prints the accessibility report as JSON.
//!
//! Usage:
//!   a11ylab-preview challenge.jsx
//!   a11ylab-preview challenge.jsx --config preview.yaml --html
//!   a11ylab-preview challenge.jsx --click 'div[role="button"]' --highlight '#email'
//!   a11ylab-preview banner.jsx --asset image=https://cdn.example/banner.png

use a11ylab_preview::{
    Asset, AssetKind, ClickReport, HighlightOutcome, PreviewConfig, PreviewSession, PreviewState,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "a11ylab-preview")]
#[command(about = "Render a markup snippet in a sandboxed preview and audit its accessibility")]
struct Args {
    /// Snippet to render (HTML or JSX-flavoured markup)
    file: PathBuf,

    /// YAML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Assets as kind=url, kind being image or video
    #[arg(long = "asset")]
    assets: Vec<String>,

    /// Click this selector once the analysis settles
    #[arg(long)]
    click: Option<String>,

    /// Highlight this selector before printing
    #[arg(long)]
    highlight: Option<String>,

    /// Include the rendered document, markers applied
    #[arg(long)]
    html: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Report {
    state: PreviewState,
    #[serde(skip_serializing_if = "Option::is_none")]
    click: Option<ClickReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    highlight: Option<HighlightOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    html: Option<String>,
}

fn parse_asset(spec: &str) -> Result<Asset> {
    let Some((kind, url)) = spec.split_once('=') else {
        bail!("asset '{}' is not kind=url", spec);
    };
    let kind = match kind {
        "image" => AssetKind::Image,
        "video" => AssetKind::Video,
        other => bail!("unknown asset kind '{}'", other),
    };
    Ok(Asset {
        kind,
        url: url.to_string(),
        alt_description: None,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => PreviewConfig::load(path)?,
        None => PreviewConfig::default(),
    };
    let code = fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let assets = args
        .assets
        .iter()
        .map(|a| parse_asset(a))
        .collect::<Result<Vec<_>>>()?;

    let session = PreviewSession::new(config);
    session.submit(&code, &assets).await;
    let mut state = session.settled().await;

    let click = match &args.click {
        Some(selector) => {
            let report = session.click(selector).await;
            state = session.state();
            Some(report)
        }
        None => None,
    };
    let highlight = match &args.highlight {
        Some(selector) => Some(session.highlight_by_selector(selector).await),
        None => None,
    };
    let html = if args.html {
        session.rendered_html().await
    } else {
        None
    };

    let report = Report {
        state,
        click,
        highlight,
        html,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    session.shutdown().await;
    Ok(())
}
