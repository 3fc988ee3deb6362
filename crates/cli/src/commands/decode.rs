//! `toolweave decode`: rebuild a run's aggregate from NDJSON frames.

use std::path::PathBuf;

use anyhow::Context;
use tokio::io::AsyncRead;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

use toolweave_agent::{DecodedRun, FrameCodec, FrameDecoder};

pub async fn run(input: Option<PathBuf>) -> anyhow::Result<()> {
    let decoded = match input {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            decode(file).await?
        }
        None => decode(tokio::io::stdin()).await?,
    };

    if !decoded.is_complete() {
        tracing::warn!("Frame stream ended without a terminal frame");
    }
    println!("{}", serde_json::to_string_pretty(&decoded)?);
    Ok(())
}

async fn decode(reader: impl AsyncRead + Unpin) -> anyhow::Result<DecodedRun> {
    let mut frames = FramedRead::new(reader, FrameCodec::new());
    let mut decoder = FrameDecoder::new();
    let mut count = 0usize;

    while let Some(frame) = frames.next().await {
        decoder.push(frame.with_context(|| format!("bad frame at line {}", count + 1))?);
        count += 1;
    }

    tracing::debug!(frames = count, "Decoded frame stream");
    Ok(decoder.finish())
}
