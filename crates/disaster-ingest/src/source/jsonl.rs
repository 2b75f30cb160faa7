//! JSON lines file source
//!
//! One packet per line; blank lines are skipped. Useful for replaying captured
//! topic contents without a broker.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};

use super::{decode_packet, MessageSource};
use crate::error::IngestError;
use crate::packet::RawPacket;

pub struct JsonLinesSource {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    exhausted: bool,
}

impl JsonLinesSource {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, IngestError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await.map_err(|e| {
            IngestError::SourceUnavailable(format!("cannot open {}: {e}", path.display()))
        })?;

        Ok(Self {
            path,
            lines: BufReader::new(file).lines(),
            exhausted: false,
        })
    }
}

#[async_trait]
impl MessageSource for JsonLinesSource {
    async fn fetch(
        &mut self,
        max: usize,
        _timeout: Duration,
    ) -> Result<Vec<RawPacket>, IngestError> {
        let mut packets = Vec::new();

        while !self.exhausted && packets.len() < max {
            let line = self.lines.next_line().await.map_err(|e| {
                IngestError::SourceUnavailable(format!("reading {}: {e}", self.path.display()))
            })?;

            match line {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => packets.push(decode_packet(Some(line.trim().as_bytes()))),
                None => self.exhausted = true,
            }
        }

        Ok(packets)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}
