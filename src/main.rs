use std::sync::Arc;

use hlswave::{
    common::{logger, types::AnyResult},
    configs::Config,
    hls::{FrameSender, HlsPipeline},
    net::WebReaderManager,
};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> AnyResult<()> {
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}, using built-in defaults", e);
            Config::default()
        }
    };
    logger::init(&config);

    info!(
        "hlswave {} (commit {}, built {})",
        env!("CARGO_PKG_VERSION"),
        option_env!("GIT_COMMIT").unwrap_or("unknown"),
        option_env!("BUILD_TIME").unwrap_or("unknown")
    );

    let Some(url) = std::env::args().nth(1) else {
        return Err("usage: hlswave <playlist-or-media-url>".into());
    };
    let url = Url::parse(&url)?;

    let manager = Arc::new(WebReaderManager::new(&config)?);
    let pipeline = HlsPipeline::new(manager, &config);
    let position = pipeline.position();
    let cancel = CancellationToken::new();

    let stopper = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping playback");
            stopper.cancel();
        }
    });

    let (tx, mut rx): (FrameSender, _) = mpsc::channel(config.pipeline.event_queue.max(1));
    let counter = tokio::spawn(async move {
        let (mut frames, mut bytes) = (0u64, 0usize);
        while let Some(Some(frame)) = rx.recv().await {
            frames += 1;
            bytes += frame.len();
        }
        (frames, bytes)
    });

    let result = pipeline.play(&url, tx, &cancel).await;
    let (frames, bytes) = counter.await?;

    info!(
        "{} frames ({} bytes), last pts {}, {:.1}s of audio, state {:?}",
        frames,
        bytes,
        position.position(),
        position.emitted_duration().as_secs_f64(),
        position.state()
    );
    if let Some(audio) = position.audio_configuration() {
        info!(
            "Audio: {} at {} Hz, {} channels",
            audio.codec, audio.sample_rate, audio.channels
        );
    }

    match result {
        Err(e) if !e.is_cancelled() => Err(e.into()),
        _ => Ok(()),
    }
}
