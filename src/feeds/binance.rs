//! Binance USDS-M futures depth feed (leader L2).
//!
//! Wire contract: `{method:"SUBSCRIBE",params:["<sym>@depth5@100ms"],id:1}`
//! with lowercase symbols; depth frames are `{e:"depthUpdate", E:<ms>,
//! s:<SYMBOL>, b:[[px,qty],...], a:[[px,qty],...]}`. Heartbeat is protocol
//! level (server pings, tungstenite pongs); liveness is enforced with a read
//! deadline refreshed by any inbound frame.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, ORIGIN, USER_AGENT};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use super::{
    forward_event, spawn_metrics_task, ConnectionMetrics, ParseErrorSampler,
    BOOK_CHANNEL_CAPACITY,
};
use crate::config::ExchangeWsConfig;
use crate::metadata::SymbolMap;
use crate::model::{BookEvent, Level, Venue};
use crate::util::backoff::Backoff;
use crate::util::clock;
use crate::util::num::parse_f64;

#[derive(Serialize)]
struct SubscribeRequest {
    method: &'static str,
    params: Vec<String>,
    id: u64,
}

enum StreamExit {
    Shutdown,
}

pub struct BinanceClient {
    cfg: ExchangeWsConfig,
    streams: Vec<String>,
    canon_symbols: HashSet<String>,
    book_tx: mpsc::Sender<BookEvent>,
    metrics: Arc<ConnectionMetrics>,
    sampler: ParseErrorSampler,
    backoff: Backoff,
}

impl BinanceClient {
    pub fn new(
        cfg: ExchangeWsConfig,
        symbols: &HashMap<String, SymbolMap>,
    ) -> (Self, mpsc::Receiver<BookEvent>) {
        let (book_tx, book_rx) = mpsc::channel(BOOK_CHANNEL_CAPACITY);
        let streams = symbols
            .values()
            .map(|m| format!("{}@depth5@100ms", m.binance_sym))
            .collect();
        let canon_symbols = symbols.keys().cloned().collect();
        (
            Self {
                cfg,
                streams,
                canon_symbols,
                book_tx,
                metrics: ConnectionMetrics::new(),
                sampler: ParseErrorSampler::new(),
                backoff: Backoff::default(),
            },
            book_rx,
        )
    }

    pub fn metrics(&self) -> Arc<ConnectionMetrics> {
        Arc::clone(&self.metrics)
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let metrics_task = spawn_metrics_task(self.metrics(), shutdown.clone());

        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.connect_and_stream(&mut shutdown).await {
                Ok(StreamExit::Shutdown) => break,
                Err(err) => {
                    self.metrics.note_reconnect();
                    let delay = self.backoff.next();
                    warn!(error = %err, delay_ms = delay.as_millis() as u64, "binance stream failed, reconnecting");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        res = shutdown.changed() => {
                            if res.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
            }
        }

        metrics_task.abort();
        info!("binance client stopped");
    }

    async fn connect_and_stream(
        &mut self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<StreamExit> {
        let mut request = self
            .cfg
            .url
            .as_str()
            .into_client_request()
            .context("building binance ws request")?;
        request
            .headers_mut()
            .insert(ORIGIN, HeaderValue::from_static("https://www.binance.com"));
        request
            .headers_mut()
            .insert(USER_AGENT, HeaderValue::from_static("arb-validator/0.1"));

        let (ws, _) = connect_async(request)
            .await
            .context("connecting to binance")?;
        self.backoff.reset();
        info!(url = %self.cfg.url, streams = self.streams.len(), "binance connected");

        let (mut write, mut read) = ws.split();

        let sub = SubscribeRequest {
            method: "SUBSCRIBE",
            params: self.streams.clone(),
            id: 1,
        };
        write
            .send(Message::Text(serde_json::to_string(&sub)?))
            .await
            .context("sending binance subscribe")?;

        let read_timeout = Duration::from_millis(self.cfg.read_timeout_ms.max(1));
        let mut parse_buf: Vec<u8> = Vec::with_capacity(4096);

        loop {
            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(StreamExit::Shutdown);
                    }
                }

                // The deadline restarts on every select pass, so any inbound
                // frame (including protocol pongs) refreshes it.
                msg = tokio::time::timeout(read_timeout, read.next()) => {
                    let arrived_at_ns = clock::now_ns();
                    let msg = match msg {
                        Err(_) => bail!("binance read deadline ({}ms) exceeded", self.cfg.read_timeout_ms),
                        Ok(Some(Ok(m))) => m,
                        Ok(Some(Err(err))) => bail!("binance read error: {err}"),
                        Ok(None) => bail!("binance stream closed"),
                    };
                    self.metrics.note_message(arrived_at_ns);

                    match msg {
                        Message::Text(text) => {
                            self.handle_frame(text.as_bytes(), arrived_at_ns, &mut parse_buf);
                        }
                        Message::Binary(data) => {
                            self.handle_frame(&data, arrived_at_ns, &mut parse_buf);
                        }
                        Message::Ping(payload) => {
                            // Protocol-level heartbeat: answer in kind.
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Message::Pong(_) => {}
                        Message::Close(frame) => {
                            bail!("binance closed the connection: {frame:?}");
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    fn handle_frame(&self, raw: &[u8], arrived_at_ns: i64, parse_buf: &mut Vec<u8>) {
        parse_buf.clear();
        parse_buf.extend_from_slice(raw);

        match decode(parse_buf, arrived_at_ns, &self.canon_symbols) {
            Ok(Decoded::Book(ev)) => forward_event(&self.book_tx, &self.metrics, ev),
            Ok(Decoded::Ack) => debug!("binance subscribe ack"),
            Ok(Decoded::Ignore) => {}
            Err(err) => {
                self.metrics.note_parse_error();
                self.sampler
                    .maybe_log(Venue::Binance, &err.to_string(), raw);
            }
        }
    }
}

enum Decoded {
    Book(BookEvent),
    Ack,
    Ignore,
}

#[derive(Debug)]
enum DecodeError {
    InvalidJson,
    NotObject,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::InvalidJson => f.write_str("invalid json"),
            DecodeError::NotObject => f.write_str("frame is not an object"),
        }
    }
}

/// Decode one Binance frame. `E` maps to `exch_ts_ms`; the stream carries no
/// usable book sequence, so `seq` stays 0.
fn decode(
    raw: &mut [u8],
    arrived_at_ns: i64,
    canon_symbols: &HashSet<String>,
) -> Result<Decoded, DecodeError> {
    use simd_json::prelude::*;

    let value = simd_json::to_borrowed_value(raw).map_err(|_| DecodeError::InvalidJson)?;
    let obj = value.as_object().ok_or(DecodeError::NotObject)?;

    // Subscription responses: {"result":null,"id":1}
    if obj.contains_key("result") || obj.contains_key("id") {
        return Ok(Decoded::Ack);
    }

    if obj.get("e").and_then(|v| v.as_str()) != Some("depthUpdate") {
        return Ok(Decoded::Ignore);
    }

    let canon = obj
        .get("s")
        .and_then(|v| v.as_str())
        .map(|s| s.to_uppercase())
        .unwrap_or_default();
    if canon.is_empty() || !canon_symbols.contains(&canon) {
        return Ok(Decoded::Ignore); // unmapped symbol, dropped silently
    }

    let exch_ts_ms = obj.get("E").and_then(|v| v.as_i64()).unwrap_or(0);

    let mut levels: Vec<Level> = Vec::with_capacity(10);
    let (best_bid_px, best_bid_qty) =
        collect_side(obj.get("b").and_then(|v| v.as_array()), &mut levels);
    let (best_ask_px, best_ask_qty) =
        collect_side(obj.get("a").and_then(|v| v.as_array()), &mut levels);

    Ok(Decoded::Book(BookEvent {
        venue: Venue::Binance,
        symbol_canon: canon,
        best_bid_px,
        best_bid_qty,
        best_ask_px,
        best_ask_qty,
        levels,
        arrived_at_ns,
        exch_ts_ms,
        seq: 0,
    }))
}

fn collect_side(
    side: Option<&Vec<simd_json::BorrowedValue<'_>>>,
    levels: &mut Vec<Level>,
) -> (f64, f64) {
    use simd_json::prelude::*;

    let mut best_px = 0.0;
    let mut best_qty = 0.0;
    let Some(rows) = side else {
        return (best_px, best_qty);
    };
    for (i, row) in rows.iter().take(5).enumerate() {
        let Some(cells) = row.as_array() else { break };
        if cells.len() < 2 {
            break;
        }
        let px = cells[0].as_str().map(parse_f64).unwrap_or(0.0);
        let qty = cells[1].as_str().map(parse_f64).unwrap_or(0.0);
        if i == 0 {
            best_px = px;
            best_qty = qty;
        }
        levels.push(Level { price: px, qty });
    }
    (best_px, best_qty)
}
