use std::time::Duration;

use axum::{
    body::Bytes,
    extract::ws::{Message as WsMessage, WebSocket},
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::{
    sync::mpsc,
    time::{self, Instant},
};

use application::{OutboundFrame, Session, SessionInfo};
use domain::SessionState;

use crate::state::AppState;

/// 单个实时会话：注册到推送中心后运行读写两个泵，任一方结束即注销
pub(crate) async fn run_session(socket: WebSocket, state: AppState, info: SessionInfo) {
    let realtime = state.config.current().realtime.clone();
    let mut lifecycle = SessionState::Upgrading;

    let (session, outbound) = Session::new(info.clone(), realtime.queue_capacity);
    let serial = session.serial();

    if let Err(err) = state.hub.register(session).await {
        tracing::error!(session_id = %info.id, error = %err, "hub unavailable, closing connection");
        advance(&mut lifecycle, SessionState::Closing, &info.id);
        let mut socket = socket;
        let _ = socket.send(WsMessage::Close(None)).await;
        advance(&mut lifecycle, SessionState::Closed, &info.id);
        return;
    }
    advance(&mut lifecycle, SessionState::Registered, &info.id);
    tracing::info!(session_id = %info.id, role = %info.role, "WebSocket session registered");

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_pump(
        sink,
        outbound,
        realtime.ping_interval(),
        info.id.clone(),
    ));

    let writer_done = tokio::select! {
        _ = read_pump(stream, &state, &info, realtime.pong_wait()) => false,
        _ = &mut writer => true,
    };

    advance(&mut lifecycle, SessionState::Closing, &info.id);
    // 注销会关闭出站队列，写泵随之退出
    state.hub.unregister(&info.id, serial);

    if !writer_done && time::timeout(realtime.pong_wait(), &mut writer).await.is_err() {
        tracing::warn!(session_id = %info.id, "write pump did not stop in time");
        writer.abort();
    }

    advance(&mut lifecycle, SessionState::Closed, &info.id);
    tracing::info!(session_id = %info.id, "WebSocket session closed");
}

fn advance(lifecycle: &mut SessionState, next: SessionState, session_id: &str) {
    match lifecycle.advance(next) {
        Ok(state) => *lifecycle = state,
        Err(err) => tracing::warn!(session_id, error = %err, "unexpected session transition"),
    }
}

/// 读泵：把客户端帧交给分发器；读错误、关闭帧或 pong 超时都会结束会话
async fn read_pump(
    mut stream: SplitStream<WebSocket>,
    state: &AppState,
    info: &SessionInfo,
    pong_wait: Duration,
) {
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let message = match time::timeout_at(deadline, stream.next()).await {
            Err(_) => {
                tracing::info!(session_id = %info.id, "pong timeout, closing connection");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(err))) => {
                tracing::debug!(session_id = %info.id, error = %err, "WebSocket read error");
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        match message {
            WsMessage::Text(text) => {
                state.dispatcher.dispatch_text(info, text.as_str()).await;
            }
            WsMessage::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => {
                    state.dispatcher.dispatch_text(info, text).await;
                }
                Err(_) => tracing::debug!(session_id = %info.id, "non-utf8 binary frame dropped"),
            },
            WsMessage::Pong(_) => {
                deadline = Instant::now() + pong_wait;
            }
            // axum 自动回复 ping
            WsMessage::Ping(_) => {}
            WsMessage::Close(_) => {
                tracing::debug!(session_id = %info.id, "close frame received");
                break;
            }
        }
    }
}

/// 写泵：按入队顺序写出帧并定时发送 ping；队列关闭或写失败时退出
async fn write_pump(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut outbound: mpsc::Receiver<OutboundFrame>,
    ping_interval: Duration,
    session_id: String,
) {
    let mut ticker = time::interval_at(Instant::now() + ping_interval, ping_interval);

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    break;
                };
                if let Err(err) = sink.send(WsMessage::Text(frame.to_string().into())).await {
                    tracing::debug!(session_id = %session_id, error = %err, "WebSocket write error");
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Err(err) = sink.send(WsMessage::Ping(Bytes::new())).await {
                    tracing::debug!(session_id = %session_id, error = %err, "ping failed");
                    break;
                }
            }
        }
    }

    let _ = sink.close().await;
}
