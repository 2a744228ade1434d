use actix::prelude::*;
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use tokio::sync::broadcast;

use crate::pipeline::AlertPipeline;

// -- Broadcast fan-out (tokio broadcast channel, one receiver per client)

pub struct Broadcaster {
    tx: broadcast::Sender<String>,
}

impl Broadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Broadcaster { tx }
    }

    pub fn send_message(&self, msg: &str) {
        // Err means no subscribers; nothing to deliver to
        let _ = self.tx.send(msg.to_string());
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Broadcaster::new()
    }
}

// -- WebSocket Session Actor

pub struct WsSession {
    rx: Option<broadcast::Receiver<String>>,
    replay: Vec<String>,
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        // Replay the recent window first, then switch to the live feed. The
        // receiver was subscribed before the replay snapshot was taken, so
        // anything accepted since is already queued behind the replay.
        for msg in self.replay.drain(..) {
            ctx.text(msg);
        }

        if let Some(mut rx) = self.rx.take() {
            let addr = ctx.address();
            let fut = async move {
                loop {
                    match rx.recv().await {
                        Ok(msg) => addr.do_send(AlertMessage(msg)),
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            println!("[WS] Slow client lagged, {} alerts dropped", n);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            };
            ctx.spawn(actix::fut::wrap_future(fut));
        }
    }
}

#[derive(Message)]
#[rtype(result = "()")]
struct AlertMessage(String);

impl Handler<AlertMessage> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: AlertMessage, ctx: &mut Self::Context) {
        ctx.text(msg.0);
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(data)) => ctx.pong(&data),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            // Inbound text is keepalive only
            _ => (),
        }
    }
}

// -- HTTP Endpoint for WS Upgrade

pub async fn ws_route(
    req: HttpRequest,
    stream: web::Payload,
    pipeline: web::Data<std::sync::Arc<AlertPipeline>>,
) -> Result<HttpResponse, Error> {
    let rx = pipeline.broadcaster().subscribe();
    let replay = pipeline.replay_snapshot().await;
    ws::start(
        WsSession {
            rx: Some(rx),
            replay,
        },
        &req,
        stream,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{normalize, CanonicalAlert};
    use crate::config::Config;
    use crate::pipeline::AlertPipeline;
    use crate::store;
    use actix_web::App;
    use awc::error::WsProtocolError;
    use futures::{Stream, StreamExt};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn every_subscriber_receives_every_broadcast_in_order() {
        let broadcaster = Broadcaster::new();
        let mut receivers: Vec<_> = (0..3).map(|_| broadcaster.subscribe()).collect();

        for i in 0..5 {
            broadcaster.send_message(&format!("alert-{}", i));
        }

        for rx in receivers.iter_mut() {
            for i in 0..5 {
                let msg = timeout(Duration::from_secs(1), rx.recv())
                    .await
                    .expect("broadcast timed out")
                    .expect("broadcast channel closed");
                assert_eq!(msg, format!("alert-{}", i));
            }
            // exactly once: nothing further is queued for this client
            assert!(rx.try_recv().is_err());
        }
    }

    #[tokio::test]
    async fn stalled_subscriber_does_not_block_the_others() {
        let broadcaster = Broadcaster::new();
        // subscribed but never read from
        let _stalled = broadcaster.subscribe();
        let mut active = broadcaster.subscribe();

        for i in 0..50 {
            broadcaster.send_message(&format!("alert-{}", i));
        }
        for i in 0..50 {
            let msg = timeout(Duration::from_secs(1), active.recv())
                .await
                .expect("active client starved by the stalled one")
                .expect("broadcast channel closed");
            assert_eq!(msg, format!("alert-{}", i));
        }
    }

    #[tokio::test]
    async fn subscribers_only_see_alerts_sent_after_subscribing() {
        let broadcaster = Broadcaster::new();
        broadcaster.send_message("before");
        let mut rx = broadcaster.subscribe();
        broadcaster.send_message("after");

        let msg = timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("broadcast timed out")
            .expect("broadcast channel closed");
        assert_eq!(msg, "after");
        assert!(rx.try_recv().is_err());
    }

    fn stamped(title: &str, ts: &str, ip: &str) -> CanonicalAlert {
        normalize(json!({
            "rule": {"level": 3, "groups": ["syslog"], "description": title},
            "agent": {"name": "h1", "ip": ip},
            "timestamp": ts,
        }))
    }

    async fn next_text_frame(
        connection: &mut (impl Stream<Item = Result<awc::ws::Frame, WsProtocolError>> + Unpin),
    ) -> Value {
        loop {
            let frame = timeout(Duration::from_secs(3), connection.next())
                .await
                .expect("websocket frame timed out")
                .expect("websocket stream ended")
                .expect("websocket protocol error");
            match frame {
                awc::ws::Frame::Text(bytes) => return serde_json::from_slice(&bytes).unwrap(),
                // skip interleaved control frames
                _ => continue,
            }
        }
    }

    #[actix_web::test]
    async fn ws_clients_see_replay_before_live_alerts() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            alerts_file: dir.path().join("alerts.json").to_string_lossy().to_string(),
            db_file: dir.path().join("alerts.db").to_string_lossy().to_string(),
            retention_limit: 1000,
            startup_load_limit: 50,
            prune_interval: 1000,
            correlation_window_seconds: 300,
            correlation_threshold: 100,
            listen_port: 0,
        };
        let pool = store::init_db(&config.db_file).await.unwrap();
        let pipeline = AlertPipeline::start(pool, Arc::new(Broadcaster::new()), &config).await;

        // seed the replay window and wait for the worker to ring the alerts
        pipeline.submit(stamped("seed-0", "2025-01-01T00:00:00Z", "10.1.0.1"));
        pipeline.submit(stamped("seed-1", "2025-01-01T00:00:01Z", "10.1.0.2"));
        for _ in 0..40 {
            if pipeline.recent_snapshot().await.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(pipeline.recent_snapshot().await.len(), 2);

        let data = web::Data::new(pipeline.clone());
        let mut srv = actix_test::start(move || {
            App::new()
                .app_data(data.clone())
                .route("/ws", web::get().to(ws_route))
        });
        let mut connection = srv.ws_at("/ws").await.unwrap();

        // replay batch first, in ascending timestamp order
        let first = next_text_frame(&mut connection).await;
        assert_eq!(first["title"], "seed-0");
        let second = next_text_frame(&mut connection).await;
        assert_eq!(second["title"], "seed-1");

        // an alert accepted after the subscription arrives live, after replay
        pipeline.submit(stamped("live-0", "2025-01-01T00:00:02Z", "10.1.0.3"));
        let live = next_text_frame(&mut connection).await;
        assert_eq!(live["title"], "live-0");
        assert_eq!(live["source"], "wazuh");
    }
}
