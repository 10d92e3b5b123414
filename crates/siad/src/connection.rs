//! Per-connection state machine (C5) — reads Galaxy SIA blocks off one TCP
//! socket, replies ACK/REJECT, and hands assembled events off for
//! notification.
//!
//! Read a block, validate it, buffer it if valid, and on `END_OF_DATA`
//! turn whatever was buffered into events. `END_OF_DATA` always ends the
//! connection — one batch of blocks per socket, then Closing — so the ACK
//! for it is sent before processing, not after. A connection that goes
//! quiet for longer than the configured read timeout is dropped — panels
//! reconnect on their own schedule and we'd rather free the socket than
//! wait forever.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use sia_core::config::SiaConfig;
use sia_core::wire::{self, Command, Frame, FrameError};
use sia_core::{event, parse};
use sia_services::{format_notification, DispatchQueue};

/// One received block, or a reason the connection should end.
enum ReadOutcome {
    Block(Vec<u8>),
    /// `0x05 0x01` encryption handshake — we don't speak it, close quietly.
    EncryptionHandshake,
    Eof,
}

async fn read_next(
    stream: &mut TcpStream,
    read_timeout: Duration,
) -> std::io::Result<ReadOutcome> {
    let mut header = [0u8; 2];
    let read = tokio::time::timeout(read_timeout, stream.read_exact(&mut header)).await;
    let read = match read {
        Ok(result) => result,
        Err(_) => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "idle read timeout",
            ))
        }
    };
    if let Err(e) = read {
        return if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Ok(ReadOutcome::Eof)
        } else {
            Err(e)
        };
    }

    if wire::is_encryption_handshake(&header) {
        return Ok(ReadOutcome::EncryptionHandshake);
    }

    let declared_len = header[0] as i16 - 0x40;
    let mut block = header.to_vec();

    if (0..=(wire::MAX_PAYLOAD as i16)).contains(&declared_len) {
        let mut rest = vec![0u8; declared_len as usize + 1]; // payload + checksum
        tokio::time::timeout(read_timeout, stream.read_exact(&mut rest))
            .await
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "idle read timeout"))??;
        block.extend_from_slice(&rest);
    }
    // A declared length outside the valid range is left as a 2-byte block;
    // `wire::decode` below rejects it with `LengthMismatch`/`TooShort`.

    Ok(ReadOutcome::Block(block))
}

async fn write_block(
    stream: &mut TcpStream,
    block: &[u8],
    write_timeout: Duration,
) -> std::io::Result<()> {
    tokio::time::timeout(write_timeout, stream.write_all(block))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "write timeout"))?
}

pub async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    config: Arc<SiaConfig>,
    queue: DispatchQueue,
) {
    let read_timeout = Duration::from_secs(config.listener.read_timeout_secs);
    let write_timeout = Duration::from_secs(config.listener.write_timeout_secs);
    let char_map = config.char_map();

    let mut blocks: Vec<Frame> = Vec::new();

    loop {
        let outcome = match read_next(&mut stream, read_timeout).await {
            Ok(o) => o,
            Err(e) => {
                tracing::debug!(%peer_addr, error = %e, "connection read failed, closing");
                return;
            }
        };

        match outcome {
            ReadOutcome::Eof => {
                tracing::debug!(%peer_addr, "connection closed by peer");
                return;
            }
            ReadOutcome::EncryptionHandshake => {
                tracing::info!(%peer_addr, "encryption handshake detected, closing (unsupported)");
                return;
            }
            ReadOutcome::Block(raw) => match wire::decode(&raw) {
                Ok(frame) => {
                    if frame.command == Command::EndOfData {
                        if write_block(&mut stream, &wire::ack_block(), write_timeout)
                            .await
                            .is_err()
                        {
                            tracing::debug!(%peer_addr, "failed to send ACK, closing");
                            return;
                        }
                        process_chunk(&blocks, &config, &char_map, &queue, peer_addr).await;
                        return;
                    } else {
                        if !matches!(
                            frame.command,
                            Command::AccountId | Command::NewEvent | Command::Ascii
                        ) {
                            tracing::warn!(%peer_addr, command = %frame.command.name(), "unrecognized or unassembled command byte, acknowledging anyway");
                        }
                        blocks.push(frame);
                        if write_block(&mut stream, &wire::ack_block(), write_timeout)
                            .await
                            .is_err()
                        {
                            tracing::debug!(%peer_addr, "failed to send ACK, closing");
                            return;
                        }
                    }
                }
                Err(e) => {
                    log_frame_error(&e, peer_addr);
                    if write_block(&mut stream, &wire::reject_block(), write_timeout)
                        .await
                        .is_err()
                    {
                        tracing::debug!(%peer_addr, "failed to send REJECT, closing");
                        return;
                    }
                }
            },
        }
    }
}

fn log_frame_error(error: &FrameError, peer_addr: SocketAddr) {
    tracing::warn!(%peer_addr, error = %error, "rejecting malformed block");
}

async fn process_chunk(
    blocks: &[Frame],
    config: &SiaConfig,
    char_map: &sia_core::text::CharMap,
    queue: &DispatchQueue,
    peer_addr: SocketAddr,
) {
    for chunk in event::assemble(blocks) {
        let mut parsed = parse::build_event(&chunk, char_map);
        if parsed.account.is_empty() {
            tracing::debug!(%peer_addr, "chunk produced no account, skipping notification");
            continue;
        }
        if parsed.event_code.is_none() {
            tracing::debug!(%peer_addr, account = %parsed.account, "chunk has no event code, nothing to notify");
            continue;
        }

        tracing::info!(
            %peer_addr,
            account = %parsed.account,
            event_code = parsed.event_code.as_deref().unwrap_or(""),
            "event received"
        );

        let topic = config.topic_config(&parsed.account);
        if !topic.ntfy_enabled || topic.ntfy_topic_url.is_empty() {
            tracing::debug!(%peer_addr, account = %parsed.account, "no enabled topic for account, dropping notification");
            continue;
        }
        parsed.site_name = Some(if topic.site_name.is_empty() {
            parsed.account.clone()
        } else {
            topic.site_name.clone()
        });
        let priority = config.priority(parsed.event_code.as_deref());
        let job = format_notification(&parsed, &topic, priority);
        queue.enqueue(job).await;
    }
}
