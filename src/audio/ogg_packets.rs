//! Streaming Ogg/Opus packet reader.
//!
//! Reads Ogg pages straight off a pipe without seeking and hands out the Opus
//! packets they carry, one packet per frame. The `OpusHead` and `OpusTags`
//! header packets are skipped: the transport only wants audio.

use std::collections::VecDeque;
use std::mem;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::frame::{Frame, FrameSource};

const CAPTURE_PATTERN: &[u8; 4] = b"OggS";
const PAGE_HEADER_LEN: usize = 27;
const FLAG_CONTINUED: u8 = 0x01;

pub struct OggOpusSource<R> {
    reader: R,
    packets: VecDeque<Bytes>,
    partial: Vec<u8>,
    finished: bool,
}

impl<R> OggOpusSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            packets: VecDeque::new(),
            partial: Vec::new(),
            finished: false,
        }
    }

    /// Fills `buf` completely. Returns `false` on a clean EOF before the first byte.
    async fn read_full(&mut self, buf: &mut [u8]) -> Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.reader.read(&mut buf[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(false);
                }
                bail!("unexpected EOF inside Ogg page");
            }
            filled += n;
        }
        Ok(true)
    }

    async fn read_page(&mut self) -> Result<()> {
        let mut header = [0u8; PAGE_HEADER_LEN];
        if !self.read_full(&mut header).await? {
            if !self.partial.is_empty() {
                log::debug!("Dropping {} bytes of unterminated Ogg packet", self.partial.len());
                self.partial.clear();
            }
            self.finished = true;
            return Ok(());
        }

        if &header[0..4] != CAPTURE_PATTERN {
            bail!("invalid Ogg capture pattern");
        }
        if header[4] != 0 {
            bail!("unsupported Ogg version {}", header[4]);
        }
        let flags = header[5];
        let segment_count = header[26] as usize;

        let mut lacing = vec![0u8; segment_count];
        if !self.read_full(&mut lacing).await.context("reading Ogg segment table")? && segment_count > 0 {
            bail!("unexpected EOF before Ogg segment table");
        }

        let body_len: usize = lacing.iter().map(|&len| len as usize).sum();
        let mut body = vec![0u8; body_len];
        if !self.read_full(&mut body).await.context("reading Ogg page body")? && body_len > 0 {
            bail!("unexpected EOF before Ogg page body");
        }

        // A fresh page without the continuation flag can't extend the old packet.
        if flags & FLAG_CONTINUED == 0 && !self.partial.is_empty() {
            log::debug!("Ogg packet not continued, dropping {} bytes", self.partial.len());
            self.partial.clear();
        }

        let mut offset = 0;
        for len in lacing {
            let len = len as usize;
            self.partial.extend_from_slice(&body[offset..offset + len]);
            offset += len;
            if len < 255 {
                let packet = mem::take(&mut self.partial);
                self.push_packet(packet);
            }
        }
        Ok(())
    }

    fn push_packet(&mut self, packet: Vec<u8>) {
        if packet.is_empty() || packet.starts_with(b"OpusHead") || packet.starts_with(b"OpusTags") {
            return;
        }
        self.packets.push_back(Bytes::from(packet));
    }
}

#[async_trait]
impl<R> FrameSource for OggOpusSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn next_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            if let Some(packet) = self.packets.pop_front() {
                return Ok(Some(packet));
            }
            if self.finished {
                return Ok(None);
            }
            self.read_page().await?;
        }
    }
}
