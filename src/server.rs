use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::debug;

use crate::engine::{Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::model::{Published, Topic};
use crate::observability::{REQUESTS_TOTAL, REQUEST_DURATION_SECONDS, request_label};
use crate::protocol::{ProtocolError, Reply, Request, parse_request};

/// Events waiting to be written to one connection.
const PUSH_QUEUE: usize = 256;

/// Serve one client until it disconnects.
///
/// Requests are answered in order. Once the client subscribes, published
/// events are interleaved between replies as they arrive.
pub async fn process_connection<S>(socket: S, engine: Arc<Engine>) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (push_tx, mut push_rx) = mpsc::channel::<Published>(PUSH_QUEUE);
    let mut topics: BTreeSet<Topic> = BTreeSet::new();
    let mut forwarders: Vec<JoinHandle<()>> = Vec::new();

    let result = loop {
        tokio::select! {
            line = framed.next() => {
                let reply = match line {
                    None => break Ok(()),
                    Some(Ok(line)) => match parse_request(&line) {
                        Ok(Request::Subscribe { topics: wanted }) => {
                            for topic in wanted {
                                if topics.insert(topic) {
                                    let rx = engine.notify.subscribe(topic);
                                    forwarders.push(tokio::spawn(forward(rx, push_tx.clone())));
                                }
                            }
                            Reply::data(&topics)
                        }
                        Ok(req) => handle(&engine, req).await,
                        Err(e) => Reply::error(e.code(), e.to_string()),
                    },
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        let e = ProtocolError::LineTooLong;
                        let _ = send_json(&mut framed, &Reply::error(e.code(), e.to_string())).await;
                        break Err(e);
                    }
                    Some(Err(e)) => break Err(e.into()),
                };
                if let Err(e) = send_json(&mut framed, &reply).await {
                    break Err(e);
                }
            }
            Some(event) = push_rx.recv() => {
                if let Err(e) = send_json(&mut framed, &event).await {
                    break Err(e);
                }
            }
        }
    };

    for f in forwarders {
        f.abort();
    }
    result
}

async fn send_json<S, T>(framed: &mut Framed<S, LinesCodec>, value: &T) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: serde::Serialize,
{
    let line = serde_json::to_string(value)?;
    framed.send(line).await?;
    Ok(())
}

/// Copy one topic's events into the connection's push queue. A lagging
/// connection loses events; it is never allowed to slow the publisher.
async fn forward(mut rx: broadcast::Receiver<Published>, tx: mpsc::Sender<Published>) {
    loop {
        match rx.recv().await {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                debug!("subscriber lagged, dropped {n} events");
            }
            Err(broadcast::error::RecvError::Closed) => return,
        }
    }
}

async fn handle(engine: &Engine, req: Request) -> Reply {
    let op = request_label(&req);
    let started = Instant::now();
    let reply = dispatch(engine, req).await.unwrap_or_else(Reply::from);
    let status = if reply.ok { "ok" } else { "error" };
    metrics::counter!(REQUESTS_TOTAL, "op" => op, "status" => status).increment(1);
    metrics::histogram!(REQUEST_DURATION_SECONDS, "op" => op).record(started.elapsed().as_secs_f64());
    reply
}

async fn dispatch(engine: &Engine, req: Request) -> Result<Reply, EngineError> {
    Ok(match req {
        Request::Provision {
            name,
            kind,
            building,
            floor,
        } => Reply::data(&engine.provision_space(&name, &kind, &building, floor).await?),
        Request::Book {
            space_id,
            user_id,
            slot,
            date,
        } => Reply::data(&engine.book(space_id, &user_id, &slot, date).await?),
        Request::CheckIn { space_id, user_id } => {
            Reply::data(&engine.check_in(space_id, &user_id).await?)
        }
        Request::Cancel { space_id, user_id } => Reply::data(&engine.cancel(space_id, &user_id).await?),
        Request::CheckOut { space_id, user_id } => {
            Reply::data(&engine.check_out(space_id, &user_id).await?)
        }
        Request::GetSpace { space_id } => Reply::data(&engine.get_space(space_id).await?),
        Request::ListSpaces => Reply::data(&engine.list_spaces().await),
        Request::Schedule { space_id, date } => Reply::data(&engine.schedule(space_id, date).await?),
        Request::Search { user_id, query } => Reply::data(&engine.search(&query, &user_id).await?),
        Request::Options => Reply::data(&engine.options().await),
        Request::MyClaims { user_id } => Reply::data(&engine.claims_for_user(&user_id).await),
        Request::History {
            user_id,
            page,
            limit,
        } => Reply::data(&engine.history_for_user(&user_id, page, limit)?),
        Request::SpaceHistory { space_id } => Reply::data(&engine.history_for_space(space_id)?),
        Request::Notifications { user_id } => Reply::data(&engine.notifications(&user_id)),
        Request::Rate {
            space_id,
            user_id,
            score,
            comment,
        } => Reply::data(&engine.rate(space_id, &user_id, score, comment).await?),
        Request::Ratings { space_id } => Reply::data(&engine.ratings_for_space(space_id)?),
        Request::Subscribe { .. } => Reply::error("bad_request", "subscribe is per connection"),
    })
}
