//! OKX public depth feed (leader L1).
//!
//! Wire contract: subscribe to `books5` per instrument; depth frames carry
//! `arg` + `data[].{bids,asks,ts,seqId,instId}` with prices as strings.
//! Heartbeat is an application-level textual `ping` every 25s with a `pong`
//! expected inside 10s; the round trip is recorded as `ws_rtt_ms`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
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
use crate::util::num::{parse_f64, parse_i64};

#[derive(Serialize)]
struct SubscribeRequest<'a> {
    op: &'static str,
    args: Vec<SubscribeArg<'a>>,
}

#[derive(Serialize)]
struct SubscribeArg<'a> {
    channel: &'static str,
    #[serde(rename = "instId")]
    inst_id: &'a str,
}

enum StreamExit {
    Shutdown,
}

pub struct OkxClient {
    cfg: ExchangeWsConfig,
    inst_ids: Vec<String>,
    inst_to_canon: HashMap<String, String>,
    book_tx: mpsc::Sender<BookEvent>,
    metrics: Arc<ConnectionMetrics>,
    sampler: ParseErrorSampler,
    backoff: Backoff,
}

impl OkxClient {
    pub fn new(
        cfg: ExchangeWsConfig,
        symbols: &HashMap<String, SymbolMap>,
    ) -> (Self, mpsc::Receiver<BookEvent>) {
        let (book_tx, book_rx) = mpsc::channel(BOOK_CHANNEL_CAPACITY);
        let mut inst_ids = Vec::with_capacity(symbols.len());
        let mut inst_to_canon = HashMap::with_capacity(symbols.len());
        for m in symbols.values() {
            inst_ids.push(m.okx_inst_id.clone());
            inst_to_canon.insert(m.okx_inst_id.clone(), m.canon.clone());
        }
        (
            Self {
                cfg,
                inst_ids,
                inst_to_canon,
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

    /// Connect-subscribe-read until shutdown, reconnecting with backoff on
    /// every transport or heartbeat failure.
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
                    warn!(error = %err, delay_ms = delay.as_millis() as u64, "okx stream failed, reconnecting");
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
        info!("okx client stopped");
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
            .context("building okx ws request")?;
        request
            .headers_mut()
            .insert(ORIGIN, HeaderValue::from_static("https://www.okx.com"));
        request
            .headers_mut()
            .insert(USER_AGENT, HeaderValue::from_static("arb-validator/0.1"));

        let (ws, _) = connect_async(request).await.context("connecting to okx")?;
        self.backoff.reset();
        info!(url = %self.cfg.url, symbols = self.inst_ids.len(), "okx connected");

        let (mut write, mut read) = ws.split();

        let sub = SubscribeRequest {
            op: "subscribe",
            args: self
                .inst_ids
                .iter()
                .map(|id| SubscribeArg {
                    channel: "books5",
                    inst_id: id,
                })
                .collect(),
        };
        write
            .send(Message::Text(serde_json::to_string(&sub)?))
            .await
            .context("sending okx subscribe")?;

        let mut heartbeat = interval(Duration::from_millis(self.cfg.ping_interval_ms.max(1)));
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.reset(); // no ping before the first full interval

        let pong_timeout = Duration::from_millis(self.cfg.pong_timeout_ms.max(1));
        let mut awaiting_pong = false;
        let mut pong_deadline = Instant::now();
        let mut last_ping_ns = 0i64;
        let mut parse_buf: Vec<u8> = Vec::with_capacity(4096);

        loop {
            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        let _ = write.send(Message::Close(None)).await;
                        return Ok(StreamExit::Shutdown);
                    }
                }

                _ = heartbeat.tick() => {
                    last_ping_ns = clock::now_ns();
                    write
                        .send(Message::Text("ping".to_string()))
                        .await
                        .context("sending okx ping")?;
                    if !awaiting_pong {
                        awaiting_pong = true;
                        pong_deadline = Instant::now() + pong_timeout;
                    }
                }

                _ = sleep_until(pong_deadline), if awaiting_pong => {
                    bail!("okx pong not received within {}ms", self.cfg.pong_timeout_ms);
                }

                msg = read.next() => {
                    let arrived_at_ns = clock::now_ns();
                    let msg = match msg {
                        Some(Ok(m)) => m,
                        Some(Err(err)) => bail!("okx read error: {err}"),
                        None => bail!("okx stream closed"),
                    };
                    self.metrics.note_message(arrived_at_ns);

                    match msg {
                        Message::Text(text) => {
                            if text == "pong" {
                                awaiting_pong = false;
                                if last_ping_ns > 0 {
                                    self.metrics.set_ws_rtt_ms((arrived_at_ns - last_ping_ns) / 1_000_000);
                                }
                                continue;
                            }
                            self.handle_frame(text.as_bytes(), arrived_at_ns, &mut parse_buf);
                        }
                        Message::Binary(data) => {
                            self.handle_frame(&data, arrived_at_ns, &mut parse_buf);
                        }
                        Message::Ping(payload) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Message::Close(frame) => {
                            bail!("okx closed the connection: {frame:?}");
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

        match decode(parse_buf, arrived_at_ns, &self.inst_to_canon) {
            Ok(Decoded::Books(events)) => {
                for ev in events {
                    forward_event(&self.book_tx, &self.metrics, ev);
                }
            }
            Ok(Decoded::Ack) => {
                debug!("okx subscribe ack");
            }
            Ok(Decoded::Ignore) => {}
            Err(err) => {
                self.metrics.note_parse_error();
                self.sampler.maybe_log(Venue::Okx, &err.to_string(), raw);
            }
        }
    }
}

enum Decoded {
    Books(Vec<BookEvent>),
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

/// Decode one OKX frame. `ts` (ms string) maps to `exch_ts_ms`, `seqId` to
/// `seq`; instruments outside the symbol map are skipped silently.
fn decode(
    raw: &mut [u8],
    arrived_at_ns: i64,
    inst_to_canon: &HashMap<String, String>,
) -> Result<Decoded, DecodeError> {
    use simd_json::prelude::*;

    let value = simd_json::to_borrowed_value(raw).map_err(|_| DecodeError::InvalidJson)?;
    let obj = value.as_object().ok_or(DecodeError::NotObject)?;

    // Subscribe acks and error events: {"event":"subscribe"|"error",...}
    if obj.contains_key("event") {
        return Ok(Decoded::Ack);
    }

    let channel = obj
        .get("arg")
        .and_then(|a| a.as_object())
        .and_then(|a| a.get("channel"))
        .and_then(|c| c.as_str());
    if channel != Some("books5") {
        return Ok(Decoded::Ignore);
    }

    let Some(data) = obj.get("data").and_then(|d| d.as_array()) else {
        return Ok(Decoded::Ignore);
    };

    let mut events = Vec::with_capacity(data.len());
    for row in data {
        let Some(row) = row.as_object() else { continue };

        let Some(inst_id) = row.get("instId").and_then(|v| v.as_str()) else {
            continue;
        };
        let Some(canon) = inst_to_canon.get(inst_id) else {
            continue; // unknown instrument, not an error
        };

        let exch_ts_ms = row
            .get("ts")
            .and_then(|v| v.as_str())
            .map(parse_i64)
            .unwrap_or(0);
        let seq = row.get("seqId").and_then(|v| v.as_i64()).unwrap_or(0);

        let mut levels: Vec<Level> = Vec::with_capacity(10);
        let (best_bid_px, best_bid_qty) =
            collect_side(row.get("bids").and_then(|v| v.as_array()), &mut levels);
        let (best_ask_px, best_ask_qty) =
            collect_side(row.get("asks").and_then(|v| v.as_array()), &mut levels);

        events.push(BookEvent {
            venue: Venue::Okx,
            symbol_canon: canon.clone(),
            best_bid_px,
            best_bid_qty,
            best_ask_px,
            best_ask_qty,
            levels,
            arrived_at_ns,
            exch_ts_ms,
            seq,
        });
    }

    Ok(Decoded::Books(events))
}

/// Pull up to five `[px, qty, ...]` string rows into `levels`, returning the
/// touch (first row) prices.
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
